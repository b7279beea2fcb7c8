//! Error types for the flow engine.

use std::collections::HashMap;

/// Flow engine errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FlowError {
    /// No flow in progress with the given ID.
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    /// A step ID was referenced that the handler does not declare.
    #[error("Unknown step '{step_id}' for handler '{handler}'")]
    UnknownStep { handler: String, step_id: String },

    /// The current step type does not allow the attempted transition.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// The flow was aborted with a machine-readable reason.
    ///
    /// Steps raise this to bail out; the manager converts it into a
    /// [`crate::StepResult::Abort`] transition, so it never escapes
    /// `async_configure`.
    #[error("Flow aborted: {reason}")]
    Aborted {
        reason: String,
        description_placeholders: HashMap<String, String>,
    },

    /// Internal engine error.
    #[error("Flow engine error: {0}")]
    Internal(String),
}

impl FlowError {
    /// Abort with a bare reason code.
    pub fn abort(reason: impl Into<String>) -> Self {
        FlowError::Aborted {
            reason: reason.into(),
            description_placeholders: HashMap::new(),
        }
    }

    /// Abort with a reason code and human-readable placeholders.
    pub fn abort_with(
        reason: impl Into<String>,
        placeholders: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        FlowError::Aborted {
            reason: reason.into(),
            description_placeholders: placeholders.into_iter().collect(),
        }
    }
}

/// Result type for flow operations.
pub type Result<T> = std::result::Result<T, FlowError>;
