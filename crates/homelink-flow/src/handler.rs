//! Flow handler contract.
//!
//! A handler implements one wizard: it declares its step table up front and
//! dispatches on step IDs in `handle_step`. The step table is validated when
//! the flow is created and every time a result references a step, so a typo
//! in a `next_step_id` fails fast instead of at some later dispatch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::progress::ProgressAttachment;
use crate::result::StepResult;

/// Context a flow was initialized with.
#[derive(Debug, Clone, Default)]
pub struct FlowContext {
    /// Discovery source that initiated the flow (`user`, `usb`, `hardware`).
    pub source: Option<String>,
    /// Unique ID claimed by the flow, used for duplicate detection.
    pub unique_id: Option<String>,
    /// Free-form extra context.
    pub extra: HashMap<String, Value>,
}

impl FlowContext {
    pub fn with_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Claim a unique ID for duplicate detection at init.
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }
}

/// Per-invocation step context.
///
/// A step that newly spawned a background operation attaches it here; the
/// manager then re-enters the step as soon as the operation completes. Only
/// attach on the invocation that spawned the task, not on re-entry, or the
/// step will be re-entered once per attachment.
#[derive(Default)]
pub struct StepContext {
    progress: Option<ProgressAttachment>,
}

impl StepContext {
    /// Attach a newly spawned progress task to the flow.
    pub fn attach_progress(&mut self, attachment: ProgressAttachment) {
        self.progress = Some(attachment);
    }

    pub(crate) fn take_progress(&mut self) -> Option<ProgressAttachment> {
        self.progress.take()
    }
}

/// One wizard implementation.
#[async_trait]
pub trait FlowHandler: Send {
    /// Domain the flow configures (e.g. `zigbee`).
    fn domain(&self) -> &str;

    /// Every step ID this handler can dispatch.
    fn step_ids(&self) -> &'static [&'static str];

    /// Step the flow starts at.
    fn initial_step(&self) -> &'static str {
        "init"
    }

    /// Run one step.
    ///
    /// `user_input` is `None` when the step is (re-)rendered or re-entered
    /// after a progress task completes. Collaborator failures must be
    /// converted to [`crate::FlowError::Aborted`] or a form error here; the
    /// manager turns aborts into [`StepResult::Abort`].
    async fn handle_step(
        &mut self,
        step_id: &str,
        user_input: Option<Value>,
        ctx: &mut StepContext,
    ) -> Result<StepResult>;
}
