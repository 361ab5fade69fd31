//! Evaluation tasks: submission, background execution and status polling.
//!
//! Status moves `PENDING -> RUNNING -> {COMPLETED, FAILED}`; a terminal task
//! is never modified again and disappears once its retention window passes.

mod orchestrator;
mod store;
mod types;

pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use store::TaskStore;
pub use types::{
    EvaluationRequest, EvaluationTask, TaskError, TaskKind, TaskResult, TaskStatus, TaskView,
};

use thiserror::Error;
use uuid::Uuid;

use crate::prompt::PromptError;

/// Errors reported synchronously by the orchestrator. Pipeline failures are
/// not errors here; they end up in the task's terminal state.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("{0}")]
    Validation(String),

    #[error("Template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Evaluation {0} not found")]
    NotFound(Uuid),

    #[error("Too many evaluations in progress, try again later")]
    Overloaded,

    #[error("Service is shutting down")]
    ShuttingDown,
}

impl From<PromptError> for EvaluationError {
    fn from(e: PromptError) -> Self {
        Self::Validation(e.to_string())
    }
}
