use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::llm::{LlmError, LlmErrorKind, SamplingParams};
use crate::parser::Verdict;
use crate::prompt::{EvaluationInputs, PromptOverrides};
use crate::template::OutputParserRules;

/// Lifecycle state of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SingleResponse,
    PairwiseComparison,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingleResponse => write!(f, "single_response"),
            Self::PairwiseComparison => write!(f, "pairwise_comparison"),
        }
    }
}

/// Everything a caller supplies for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub judge_model_id: String,
    pub inputs: EvaluationInputs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_id: Option<String>,
    #[serde(default)]
    pub custom_prompt_segments: PromptOverrides,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format_instruction: Option<String>,
    /// Replaces the template's rules for this request only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_parser_rules: Option<OutputParserRules>,
    #[serde(default)]
    pub provide_reasoning: bool,
    #[serde(default)]
    pub sampling_params: SamplingParams,
}

impl EvaluationRequest {
    pub fn kind(&self) -> TaskKind {
        match self.inputs {
            EvaluationInputs::SingleResponse { .. } => TaskKind::SingleResponse,
            EvaluationInputs::PairwiseComparison { .. } => TaskKind::PairwiseComparison,
        }
    }
}

/// Outcome of a completed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub judgment: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Why an evaluation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl From<LlmError> for TaskError {
    fn from(e: LlmError) -> Self {
        Self {
            kind: e.kind,
            message: e.message,
        }
    }
}

/// A task as held by the task store.
#[derive(Debug, Clone)]
pub struct EvaluationTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub request: EvaluationRequest,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
    pub error: Option<TaskError>,
}

impl EvaluationTask {
    pub fn new(request: EvaluationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: request.kind(),
            request,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn view(&self) -> TaskView {
        TaskView {
            evaluation_id: self.id,
            kind: self.kind,
            status: self.status,
            created_at: self.created_at,
            completed_at: self.completed_at,
            result: self.result.clone(),
            error_kind: self.error.as_ref().map(|e| e.kind),
            error_message: self.error.as_ref().map(|e| e.message.clone()),
        }
    }
}

/// What a status poll returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskView {
    pub evaluation_id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<LlmErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        let status: TaskStatus = serde_json::from_str("\"COMPLETED\"").unwrap();
        assert_eq!(status, TaskStatus::Completed);
        assert!(status.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_failed_view_carries_error() {
        let request = EvaluationRequest {
            judge_model_id: "judge".to_string(),
            inputs: EvaluationInputs::SingleResponse {
                text: "hello".to_string(),
                evaluation_criteria: "politeness".to_string(),
            },
            prompt_template_id: Some("binary_classification".to_string()),
            custom_prompt_segments: PromptOverrides::default(),
            output_format_instruction: None,
            output_parser_rules: None,
            provide_reasoning: false,
            sampling_params: SamplingParams::default(),
        };
        let mut task = EvaluationTask::new(request);
        task.status = TaskStatus::Failed;
        task.error = Some(LlmError::timeout("no reply").into());

        let view = serde_json::to_value(task.view()).unwrap();
        assert_eq!(view["status"], "FAILED");
        assert_eq!(view["kind"], "single_response");
        assert_eq!(view["error_kind"], "timeout");
        assert_eq!(view["error_message"], "no reply");
        assert!(view.get("result").is_none());
        assert!(view.get("completed_at").is_none());
    }
}
