//! Multi-step configuration flow engine.
//!
//! A flow is one resumable instance of a step state machine: named async
//! steps that each end in a typed [`StepResult`] transition. The engine
//! drives forms, menus, long-running progress steps and terminal
//! create-entry/abort results, the same contract every onboarding wizard in
//! the hub plugs into.

pub mod error;
pub mod handler;
pub mod manager;
pub mod progress;
pub mod result;
pub mod schema;

pub use error::{FlowError, Result};
pub use handler::{FlowContext, FlowHandler, StepContext};
pub use manager::{ConfiguredLookup, FlowManager, FlowStateSnapshot};
pub use progress::{ProgressAttachment, ProgressTask, ProgressWatch};
pub use result::StepResult;
pub use schema::{FieldType, FormField, FormSchema};
