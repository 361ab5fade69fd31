//! Request and response bodies for the HTTP API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::llm::SamplingParams;
use crate::prompt::{EvaluationInputs, PromptOverrides};
use crate::task::{EvaluationRequest, TaskStatus};
use crate::template::{OutputParserRules, PromptStructure, Template};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct SingleResponseRequest {
    pub judge_model_id: String,
    pub text_to_evaluate: String,
    pub evaluation_criteria: String,
    #[serde(default)]
    pub prompt_template_id: Option<String>,
    #[serde(default)]
    pub custom_prompt_segments: Option<PromptOverrides>,
    #[serde(default)]
    pub output_format_instruction: Option<String>,
    #[serde(default)]
    pub output_parser_rules: Option<OutputParserRules>,
    #[serde(default)]
    pub provide_reasoning: bool,
    #[serde(default, alias = "sampling_params")]
    pub vllm_sampling_params: Option<SamplingParams>,
}

impl From<SingleResponseRequest> for EvaluationRequest {
    fn from(req: SingleResponseRequest) -> Self {
        Self {
            judge_model_id: req.judge_model_id,
            inputs: EvaluationInputs::SingleResponse {
                text: req.text_to_evaluate,
                evaluation_criteria: req.evaluation_criteria,
            },
            prompt_template_id: req.prompt_template_id,
            custom_prompt_segments: req.custom_prompt_segments.unwrap_or_default(),
            output_format_instruction: req.output_format_instruction,
            output_parser_rules: req.output_parser_rules,
            provide_reasoning: req.provide_reasoning,
            sampling_params: req.vllm_sampling_params.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PairwiseComparisonRequest {
    pub judge_model_id: String,
    #[serde(rename = "text_A")]
    pub text_a: String,
    #[serde(rename = "text_B")]
    pub text_b: String,
    #[serde(default)]
    pub comparison_criteria: Option<String>,
    #[serde(default)]
    pub prompt_template_id: Option<String>,
    #[serde(default)]
    pub custom_prompt_segments: Option<PromptOverrides>,
    #[serde(default)]
    pub output_format_instruction: Option<String>,
    #[serde(default)]
    pub output_parser_rules: Option<OutputParserRules>,
    #[serde(default)]
    pub provide_reasoning: bool,
    #[serde(default, alias = "sampling_params")]
    pub vllm_sampling_params: Option<SamplingParams>,
}

impl From<PairwiseComparisonRequest> for EvaluationRequest {
    fn from(req: PairwiseComparisonRequest) -> Self {
        Self {
            judge_model_id: req.judge_model_id,
            inputs: EvaluationInputs::PairwiseComparison {
                text_a: req.text_a,
                text_b: req.text_b,
                comparison_criteria: req.comparison_criteria,
            },
            prompt_template_id: req.prompt_template_id,
            custom_prompt_segments: req.custom_prompt_segments.unwrap_or_default(),
            output_format_instruction: req.output_format_instruction,
            output_parser_rules: req.output_parser_rules,
            provide_reasoning: req.provide_reasoning,
            sampling_params: req.vllm_sampling_params.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub evaluation_id: Uuid,
    pub status: TaskStatus,
}

/// Body for creating or overwriting a template. On create a missing
/// `template_id` is derived from the name; on update it defaults to the id in
/// the path.
#[derive(Debug, Deserialize)]
pub struct TemplateRequest {
    #[serde(default)]
    pub template_id: Option<String>,
    pub template_name: String,
    #[serde(default)]
    pub target_judge_model_family: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt_structure: PromptStructure,
    pub output_parser_rules: OutputParserRules,
}

impl TemplateRequest {
    pub fn into_template(self, default_id: impl FnOnce(&str) -> String) -> Template {
        let id = self
            .template_id
            .unwrap_or_else(|| default_id(&self.template_name));
        Template {
            id,
            name: self.template_name,
            target_judge_model_family: self.target_judge_model_family,
            description: self.description,
            prompt_structure: self.prompt_structure,
            output_parser_rules: self.output_parser_rules,
        }
    }
}
