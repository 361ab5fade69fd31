//! Prompt rendering: template segments + evaluation inputs → chat messages.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::template::{placeholder_regex, referenced_placeholders, PromptStructure};

/// Appended to the user message when the caller asks for reasoning, so the
/// reply ends in a marker the output parser recognizes.
const REASONING_INSTRUCTION: &str = "Before giving your final answer, briefly explain your \
reasoning. Then state your final answer on its own last line, starting with \"Answer:\".";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Placeholder {{{0}}} has no value in this request")]
    Unresolved(String),

    #[error("Missing required input: {0}")]
    MissingInput(&'static str),

    #[error("Pairwise prompts must reference {{{0}}}")]
    MissingPlaceholder(&'static str),

    #[error("Prompt segment {0} is empty")]
    EmptySegment(&'static str),
}

/// Caller-supplied replacements for template segments. Each one replaces the
/// template's field wholesale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_instruction_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_instruction_suffix: Option<String>,
}

impl PromptOverrides {
    pub fn is_empty(&self) -> bool {
        self.system_message.is_none()
            && self.user_instruction_prefix.is_none()
            && self.user_instruction_suffix.is_none()
    }

    /// Apply to a base structure (`None` when there is no template).
    pub fn apply(&self, base: Option<&PromptStructure>) -> PromptStructure {
        let pick = |over: &Option<String>, base: Option<&String>| {
            over.clone()
                .or_else(|| base.cloned())
                .unwrap_or_default()
        };
        PromptStructure {
            system_message: pick(&self.system_message, base.map(|b| &b.system_message)),
            user_instruction_prefix: pick(
                &self.user_instruction_prefix,
                base.map(|b| &b.user_instruction_prefix),
            ),
            user_instruction_suffix: pick(
                &self.user_instruction_suffix,
                base.map(|b| &b.user_instruction_suffix),
            ),
        }
    }
}

/// The texts being judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationInputs {
    SingleResponse {
        text: String,
        evaluation_criteria: String,
    },
    PairwiseComparison {
        text_a: String,
        text_b: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comparison_criteria: Option<String>,
    },
}

impl EvaluationInputs {
    fn value(&self, placeholder: &str) -> Option<&str> {
        match (self, placeholder) {
            (Self::SingleResponse { evaluation_criteria, .. }, "evaluation_criteria") => {
                Some(evaluation_criteria.as_str())
            }
            (Self::PairwiseComparison { text_a, .. }, "text_A") => Some(text_a.as_str()),
            (Self::PairwiseComparison { text_b, .. }, "text_B") => Some(text_b.as_str()),
            (
                Self::PairwiseComparison {
                    comparison_criteria: Some(criteria),
                    ..
                },
                "comparison_criteria",
            ) => Some(criteria.as_str()),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), PromptError> {
        match self {
            Self::SingleResponse {
                text,
                evaluation_criteria,
            } => {
                if text.trim().is_empty() {
                    return Err(PromptError::MissingInput("text_to_evaluate"));
                }
                if evaluation_criteria.trim().is_empty() {
                    return Err(PromptError::MissingInput("evaluation_criteria"));
                }
            }
            Self::PairwiseComparison { text_a, text_b, .. } => {
                if text_a.trim().is_empty() {
                    return Err(PromptError::MissingInput("text_A"));
                }
                if text_b.trim().is_empty() {
                    return Err(PromptError::MissingInput("text_B"));
                }
            }
        }
        Ok(())
    }
}

/// A fully rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedPrompt {
    pub system_message: String,
    pub user_message: String,
}

/// Render `structure` (template segments with overrides already applied).
///
/// `output_format_instruction` always comes from the request. If the segments
/// never reference it, it is appended so the reply format is still requested.
pub fn render(
    structure: &PromptStructure,
    inputs: &EvaluationInputs,
    output_format_instruction: Option<&str>,
    provide_reasoning: bool,
) -> Result<RenderedPrompt, PromptError> {
    inputs.check()?;
    if structure.system_message.trim().is_empty() {
        return Err(PromptError::EmptySegment("system_message"));
    }
    if structure.user_instruction_prefix.trim().is_empty() {
        return Err(PromptError::EmptySegment("user_instruction_prefix"));
    }

    let instruction = output_format_instruction.filter(|s| !s.trim().is_empty());
    let values = Values {
        inputs,
        instruction,
    };

    let segments = [
        &structure.system_message,
        &structure.user_instruction_prefix,
        &structure.user_instruction_suffix,
    ];
    let mut referenced: Vec<&str> = Vec::new();
    for segment in segments {
        for name in referenced_placeholders(segment) {
            if values.get(name).is_none() {
                return Err(PromptError::Unresolved(name.to_string()));
            }
            referenced.push(name);
        }
    }

    if let EvaluationInputs::PairwiseComparison { .. } = inputs {
        for name in ["text_A", "text_B"] {
            if !referenced.contains(&name) {
                return Err(PromptError::MissingPlaceholder(name));
            }
        }
    }

    let system_message = values.substitute(&structure.system_message);
    let prefix = values.substitute(&structure.user_instruction_prefix);
    let suffix = values.substitute(&structure.user_instruction_suffix);

    let mut user_message = match inputs {
        EvaluationInputs::SingleResponse { text, .. } => format!("{}{}{}", prefix, text, suffix),
        EvaluationInputs::PairwiseComparison { .. } => format!("{}{}", prefix, suffix),
    };

    if let Some(instruction) = instruction {
        if !referenced.contains(&"output_format_instruction") {
            push_paragraph(&mut user_message, instruction);
        }
    }
    if provide_reasoning {
        push_paragraph(&mut user_message, REASONING_INSTRUCTION);
    }

    Ok(RenderedPrompt {
        system_message,
        user_message,
    })
}

/// Placeholder values available to one render.
struct Values<'a> {
    inputs: &'a EvaluationInputs,
    instruction: Option<&'a str>,
}

impl<'a> Values<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        match name {
            "output_format_instruction" => self.instruction,
            other => self.inputs.value(other),
        }
    }

    /// Single-pass literal substitution: inserted values are never re-expanded.
    fn substitute(&self, segment: &str) -> String {
        placeholder_regex()
            .replace_all(segment, |caps: &regex::Captures<'_>| {
                self.get(&caps[1]).unwrap_or_default().to_string()
            })
            .into_owned()
    }
}

fn push_paragraph(message: &mut String, paragraph: &str) {
    let trimmed_len = message.trim_end().len();
    message.truncate(trimmed_len);
    if !message.is_empty() {
        message.push_str("\n\n");
    }
    message.push_str(paragraph);
}
