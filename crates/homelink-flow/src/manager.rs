//! Flow manager.
//!
//! Owns all flows in progress and drives their step transitions. Within one
//! flow, steps run strictly sequentially (the flow is locked for the length
//! of a dispatch); independent flows run concurrently as independent tasks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use homelink_core::ConfigEntryStore;

use crate::error::{FlowError, Result};
use crate::handler::{FlowContext, FlowHandler, StepContext};
use crate::progress::ProgressAttachment;
use crate::result::StepResult;

/// Answers whether a unique ID already belongs to a configured entry.
///
/// Implemented for [`ConfigEntryStore`]; tests and embedders can supply
/// their own source.
#[async_trait]
pub trait ConfiguredLookup: Send + Sync {
    async fn async_is_configured(&self, domain: &str, unique_id: &str) -> bool;
}

#[async_trait]
impl ConfiguredLookup for ConfigEntryStore {
    async fn async_is_configured(&self, domain: &str, unique_id: &str) -> bool {
        self.async_entries(domain)
            .await
            .iter()
            .any(|entry| entry.unique_id.as_deref() == Some(unique_id))
    }
}

/// Serializable view of a flow in progress.
#[derive(Debug, Clone)]
pub struct FlowStateSnapshot {
    pub flow_id: String,
    pub domain: String,
    pub current_step: Option<String>,
    pub is_finished: bool,
}

/// Map entry for one flow: identity fields readable without locking the
/// flow itself.
struct FlowEntry {
    domain: String,
    context: FlowContext,
    flow: Arc<Mutex<ActiveFlow>>,
}

struct ActiveFlow {
    flow_id: String,
    handler: Box<dyn FlowHandler>,
    cur_step: Option<StepResult>,
    progress: Option<ProgressAttachment>,
    watcher: Option<JoinHandle<()>>,
}

impl ActiveFlow {
    /// Abort the tracked background task and detach its watcher.
    ///
    /// The watcher is detached rather than aborted: re-entry may be running
    /// on the watcher task itself, and an abandoned watcher resolves to
    /// `UnknownFlow` harmlessly.
    fn cancel_progress(&mut self) {
        if let Some(att) = self.progress.take() {
            att.abort.abort();
        }
        self.watcher = None;
    }
}

/// Manage all flows in progress.
#[derive(Default)]
pub struct FlowManager {
    flows: Mutex<HashMap<String, FlowEntry>>,
    configured: Option<Arc<dyn ConfiguredLookup>>,
}

impl FlowManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A manager that aborts new flows whose claimed unique ID is already
    /// configured according to `lookup`.
    pub fn with_configured_lookup(lookup: Arc<dyn ConfiguredLookup>) -> Arc<Self> {
        Arc::new(Self {
            flows: Mutex::default(),
            configured: Some(lookup),
        })
    }

    /// Start a new flow with the given handler.
    ///
    /// Returns the new flow's ID and its first transition. When the context
    /// claims a unique ID that another flow in progress already claims, or
    /// that an existing entry is configured with, the flow aborts here with
    /// `already_in_progress` / `already_configured`, before any side effect.
    pub async fn async_init(
        self: &Arc<Self>,
        handler: Box<dyn FlowHandler>,
        context: FlowContext,
    ) -> Result<(String, StepResult)> {
        let initial_step = handler.initial_step();
        if !handler.step_ids().contains(&initial_step) {
            return Err(FlowError::UnknownStep {
                handler: handler.domain().to_string(),
                step_id: initial_step.to_string(),
            });
        }

        let domain = handler.domain().to_string();
        let flow_id = Uuid::new_v4().simple().to_string();

        if let Some(unique_id) = context.unique_id.clone() {
            if self.unique_id_in_progress(&domain, &unique_id).await {
                debug!(domain = %domain, unique_id = %unique_id, "flow already in progress");
                return Ok((flow_id, StepResult::abort("already_in_progress")));
            }
            if let Some(lookup) = &self.configured {
                if lookup.async_is_configured(&domain, &unique_id).await {
                    debug!(domain = %domain, unique_id = %unique_id, "already configured");
                    return Ok((flow_id, StepResult::abort("already_configured")));
                }
            }
        }

        debug!(flow_id = %flow_id, domain = %domain, "initializing flow");

        let flow = Arc::new(Mutex::new(ActiveFlow {
            flow_id: flow_id.clone(),
            handler,
            cur_step: None,
            progress: None,
            watcher: None,
        }));
        self.flows.lock().await.insert(
            flow_id.clone(),
            FlowEntry {
                domain,
                context,
                flow: flow.clone(),
            },
        );

        let mut guard = flow.lock().await;
        let result = self.drive(&mut guard, initial_step.to_string(), None).await?;
        Ok((flow_id, result))
    }

    /// Whether another flow in progress for `domain` has claimed `unique_id`.
    async fn unique_id_in_progress(&self, domain: &str, unique_id: &str) -> bool {
        self.flows.lock().await.values().any(|entry| {
            entry.domain == domain && entry.context.unique_id.as_deref() == Some(unique_id)
        })
    }

    /// Continue a flow in progress.
    ///
    /// With `user_input`, submits the current form or menu selection; with
    /// `None`, re-renders the current step (or re-enters it after a progress
    /// task completed).
    pub async fn async_configure(
        self: &Arc<Self>,
        flow_id: &str,
        user_input: Option<Value>,
    ) -> Result<StepResult> {
        let flow = self
            .flows
            .lock()
            .await
            .get(flow_id)
            .map(|entry| entry.flow.clone())
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        let mut guard = flow.lock().await;

        let cur_step = guard
            .cur_step
            .clone()
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        let (step_id, input) = match (&cur_step, user_input) {
            // Validate form input against the schema before the step sees it;
            // failures re-render the same form and do not advance the flow.
            (StepResult::Form { step_id, schema, .. }, Some(input)) => {
                match schema.validate(&input) {
                    Ok(normalized) => (step_id.clone(), Some(normalized)),
                    Err(errors) => {
                        let result =
                            StepResult::form_with_errors(step_id.clone(), schema.clone(), errors);
                        guard.cur_step = Some(result.clone());
                        return Ok(result);
                    }
                }
            }
            // A menu selection routes directly to the chosen step.
            (StepResult::Menu { step_id, menu_options }, Some(input)) => {
                let chosen = input
                    .get("next_step_id")
                    .and_then(Value::as_str)
                    .filter(|s| menu_options.iter().any(|o| o == s))
                    .ok_or_else(|| FlowError::InvalidTransition(format!(
                        "menu step '{step_id}' requires a next_step_id from its options"
                    )))?;
                (chosen.to_string(), None)
            }
            (other, input) => {
                let step_id = other
                    .step_id()
                    .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
                (step_id.to_string(), input)
            }
        };

        let from_progress = matches!(cur_step, StepResult::ShowProgress { .. });
        self.drive_checked(&mut guard, step_id, input, from_progress)
            .await
    }

    /// Abort a flow in progress, cancelling its tracked progress task.
    pub async fn async_abort(self: &Arc<Self>, flow_id: &str) -> Result<()> {
        let entry = self
            .flows
            .lock()
            .await
            .remove(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;
        entry.flow.lock().await.cancel_progress();
        Ok(())
    }

    /// Snapshot of one flow in progress.
    pub async fn async_get(&self, flow_id: &str) -> Option<FlowStateSnapshot> {
        let (domain, flow) = {
            let flows = self.flows.lock().await;
            let entry = flows.get(flow_id)?;
            (entry.domain.clone(), entry.flow.clone())
        };
        let guard = flow.lock().await;
        Some(FlowStateSnapshot {
            flow_id: guard.flow_id.clone(),
            domain,
            current_step: guard.cur_step.as_ref().and_then(|s| s.step_id().map(String::from)),
            is_finished: false,
        })
    }

    /// Snapshots of all flows in progress.
    pub async fn async_progress(&self) -> Vec<FlowStateSnapshot> {
        let flows: Vec<_> = self
            .flows
            .lock()
            .await
            .values()
            .map(|entry| (entry.domain.clone(), entry.flow.clone()))
            .collect();
        let mut out = Vec::with_capacity(flows.len());
        for (domain, flow) in flows {
            let guard = flow.lock().await;
            out.push(FlowStateSnapshot {
                flow_id: guard.flow_id.clone(),
                domain,
                current_step: guard.cur_step.as_ref().and_then(|s| s.step_id().map(String::from)),
                is_finished: false,
            });
        }
        out
    }

    /// Dispatch a step, then keep following `ShowProgressDone` transitions
    /// until the flow settles on a renderable or terminal result.
    async fn drive(
        self: &Arc<Self>,
        flow: &mut ActiveFlow,
        step_id: String,
        user_input: Option<Value>,
    ) -> Result<StepResult> {
        self.drive_checked(flow, step_id, user_input, false).await
    }

    /// Like [`Self::drive`], but when resuming from a show-progress step,
    /// enforce that the step's own transition is show-progress or
    /// show-progress-done.
    async fn drive_checked(
        self: &Arc<Self>,
        flow: &mut ActiveFlow,
        step_id: String,
        user_input: Option<Value>,
        from_progress: bool,
    ) -> Result<StepResult> {
        let mut step_id = step_id;
        let mut input = user_input;
        let mut first = true;
        loop {
            let result = self.dispatch(flow, &step_id, input.take()).await?;
            if first && from_progress {
                first = false;
                if !matches!(
                    result,
                    StepResult::ShowProgress { .. } | StepResult::ShowProgressDone { .. }
                ) {
                    return Err(FlowError::InvalidTransition(format!(
                        "show progress step '{step_id}' can only transition to \
                         show progress or show progress done"
                    )));
                }
            } else {
                first = false;
            }
            match result {
                StepResult::ShowProgressDone { next_step_id } => {
                    step_id = next_step_id;
                }
                result => return self.settle(flow, result).await,
            }
        }
    }

    /// Run a single step on the handler and post-process its transition.
    async fn dispatch(
        self: &Arc<Self>,
        flow: &mut ActiveFlow,
        step_id: &str,
        user_input: Option<Value>,
    ) -> Result<StepResult> {
        if !flow.handler.step_ids().contains(&step_id) {
            return Err(FlowError::UnknownStep {
                handler: flow.handler.domain().to_string(),
                step_id: step_id.to_string(),
            });
        }

        let mut ctx = StepContext::default();
        let result = match flow.handler.handle_step(step_id, user_input, &mut ctx).await {
            Ok(result) => result,
            // Aborts raised inside steps become terminal results, never
            // errors to the caller.
            Err(FlowError::Aborted {
                reason,
                description_placeholders,
            }) => StepResult::Abort {
                reason,
                description_placeholders,
            },
            Err(err) => return Err(err),
        };

        // Every step the result references must exist in the handler's table.
        if let Some(referenced) = result.step_id() {
            if !flow.handler.step_ids().contains(&referenced) {
                return Err(FlowError::UnknownStep {
                    handler: flow.handler.domain().to_string(),
                    step_id: referenced.to_string(),
                });
            }
        }
        // Menu options too, so a typo fails when the menu is produced, not
        // when the user happens to pick it.
        if let StepResult::Menu { menu_options, .. } = &result {
            for option in menu_options {
                if !flow.handler.step_ids().contains(&option.as_str()) {
                    return Err(FlowError::UnknownStep {
                        handler: flow.handler.domain().to_string(),
                        step_id: option.clone(),
                    });
                }
            }
        }

        if let Some(attachment) = ctx.take_progress() {
            if !matches!(result, StepResult::ShowProgress { .. }) {
                return Err(FlowError::InvalidTransition(format!(
                    "step '{step_id}' attached a progress task without returning show_progress"
                )));
            }
            self.register_progress(flow, attachment);
        } else if !matches!(result, StepResult::ShowProgress { .. }) {
            // Leaving a progress step cancels the tracked task.
            flow.cancel_progress();
        }

        Ok(result)
    }

    /// Store a non-transient result, removing the flow if it is terminal.
    async fn settle(self: &Arc<Self>, flow: &mut ActiveFlow, result: StepResult) -> Result<StepResult> {
        if result.is_terminal() {
            debug!(flow_id = %flow.flow_id, "flow finished");
            flow.cancel_progress();
            flow.cur_step = None;
            self.flows.lock().await.remove(&flow.flow_id);
        } else {
            flow.cur_step = Some(result.clone());
        }
        Ok(result)
    }

    /// Track a newly attached progress task and schedule re-entry of the
    /// step once it completes.
    fn register_progress(self: &Arc<Self>, flow: &mut ActiveFlow, attachment: ProgressAttachment) {
        flow.cancel_progress();

        let watch = attachment.watch.clone();
        let manager = Arc::downgrade(self);
        let flow_id = flow.flow_id.clone();
        let watcher = tokio::spawn(async move {
            watch.wait().await;
            if let Some(manager) = manager.upgrade() {
                if let Err(err) = manager.async_configure(&flow_id, None).await {
                    // The flow may have been aborted in the meantime.
                    if !matches!(err, FlowError::UnknownFlow(_)) {
                        warn!(flow_id = %flow_id, error = %err, "progress re-entry failed");
                    }
                }
            }
        });

        flow.progress = Some(attachment);
        flow.watcher = Some(watcher);
    }
}
