//! Typed step results.
//!
//! Every step method ends in exactly one of these transitions. The enum is
//! the wire shape exposed to the UI layer: it serializes with a lowercase
//! `type` discriminator (`form`, `show_progress`, `show_progress_done`,
//! `menu`, `create_entry`, `abort`, `external_step`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::FormSchema;

/// The result of one flow step transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    /// Show a form and wait for user input.
    Form {
        step_id: String,
        schema: FormSchema,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        errors: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        description_placeholders: HashMap<String, String>,
    },
    /// A long-running background operation is in progress; no user input
    /// allowed. The step will be re-entered when the operation completes.
    ShowProgress {
        step_id: String,
        progress_action: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        description_placeholders: HashMap<String, String>,
    },
    /// The background operation finished; continue at `next_step_id`.
    ShowProgressDone { next_step_id: String },
    /// Show a navigation menu; the selected option names the next step.
    Menu {
        step_id: String,
        menu_options: Vec<String>,
    },
    /// Terminal: the flow produced a config entry.
    CreateEntry {
        title: String,
        data: Value,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        options: Value,
    },
    /// Terminal: the flow was aborted with a machine-readable reason.
    Abort {
        reason: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        description_placeholders: HashMap<String, String>,
    },
    /// The user must complete a step on an external website.
    ExternalStep { step_id: String, url: String },
}

impl StepResult {
    /// Show a form for the given step.
    pub fn form(step_id: impl Into<String>, schema: FormSchema) -> Self {
        StepResult::Form {
            step_id: step_id.into(),
            schema,
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
        }
    }

    /// Show a form with field validation errors.
    pub fn form_with_errors(
        step_id: impl Into<String>,
        schema: FormSchema,
        errors: HashMap<String, String>,
    ) -> Self {
        StepResult::Form {
            step_id: step_id.into(),
            schema,
            errors,
            description_placeholders: HashMap::new(),
        }
    }

    /// Show a progress indicator for the given step.
    pub fn show_progress(step_id: impl Into<String>, progress_action: impl Into<String>) -> Self {
        StepResult::ShowProgress {
            step_id: step_id.into(),
            progress_action: progress_action.into(),
            description_placeholders: HashMap::new(),
        }
    }

    /// Mark the progress operation done; continue at `next_step_id`.
    pub fn show_progress_done(next_step_id: impl Into<String>) -> Self {
        StepResult::ShowProgressDone {
            next_step_id: next_step_id.into(),
        }
    }

    /// Show a navigation menu.
    pub fn menu(step_id: impl Into<String>, menu_options: Vec<String>) -> Self {
        StepResult::Menu {
            step_id: step_id.into(),
            menu_options,
        }
    }

    /// Finish the flow with a new entry.
    pub fn create_entry(title: impl Into<String>, data: Value) -> Self {
        StepResult::CreateEntry {
            title: title.into(),
            data,
            options: Value::Null,
        }
    }

    /// Abort the flow.
    pub fn abort(reason: impl Into<String>) -> Self {
        StepResult::Abort {
            reason: reason.into(),
            description_placeholders: HashMap::new(),
        }
    }

    /// Abort the flow with human-readable placeholders.
    pub fn abort_with(
        reason: impl Into<String>,
        placeholders: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        StepResult::Abort {
            reason: reason.into(),
            description_placeholders: placeholders.into_iter().collect(),
        }
    }

    /// Whether this result ends the flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepResult::CreateEntry { .. } | StepResult::Abort { .. })
    }

    /// The step the flow is waiting on after this transition, if any.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            StepResult::Form { step_id, .. }
            | StepResult::ShowProgress { step_id, .. }
            | StepResult::Menu { step_id, .. }
            | StepResult::ExternalStep { step_id, .. } => Some(step_id),
            StepResult::ShowProgressDone { next_step_id } => Some(next_step_id),
            StepResult::CreateEntry { .. } | StepResult::Abort { .. } => None,
        }
    }
}
