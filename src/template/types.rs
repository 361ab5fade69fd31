//! Template records and their validation.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use super::TemplateError;

/// Placeholders a prompt segment may reference.
pub const PLACEHOLDERS: [&str; 5] = [
    "evaluation_criteria",
    "comparison_criteria",
    "output_format_instruction",
    "text_A",
    "text_B",
];

/// Matches `{identifier}` tokens. JSON braces such as `{"score": 1}` never match.
pub(crate) fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid")
    })
}

/// Placeholder names referenced by a segment, in order of first appearance.
pub fn referenced_placeholders(segment: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for caps in placeholder_regex().captures_iter(segment) {
        if let Some(name) = caps.get(1).map(|m| m.as_str()) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

fn check_placeholders(field: &str, segment: &str) -> Result<(), TemplateError> {
    for name in referenced_placeholders(segment) {
        if !PLACEHOLDERS.contains(&name) {
            return Err(TemplateError::Invalid(format!(
                "{} references unknown placeholder {{{}}}",
                field, name
            )));
        }
    }
    Ok(())
}

/// Prompt segments of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStructure {
    pub system_message: String,
    pub user_instruction_prefix: String,
    #[serde(default)]
    pub user_instruction_suffix: String,
}

impl PromptStructure {
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.system_message.trim().is_empty() {
            return Err(TemplateError::Invalid(
                "prompt_structure.system_message cannot be empty".to_string(),
            ));
        }
        if self.user_instruction_prefix.trim().is_empty() {
            return Err(TemplateError::Invalid(
                "prompt_structure.user_instruction_prefix cannot be empty".to_string(),
            ));
        }
        check_placeholders("system_message", &self.system_message)?;
        check_placeholders("user_instruction_prefix", &self.user_instruction_prefix)?;
        check_placeholders("user_instruction_suffix", &self.user_instruction_suffix)?;
        Ok(())
    }
}

/// Score range a numeric rule uses when it declares none.
pub const DEFAULT_SCORE_RANGE: (f64, f64) = (1.0, 5.0);

/// Effective `[min, max]` of a numeric rule. Declared bounds are kept as the
/// JSON numbers they were written as so the rule serializes back unchanged.
pub fn score_range(min: Option<&Number>, max: Option<&Number>) -> (f64, f64) {
    (
        min.and_then(Number::as_f64).unwrap_or(DEFAULT_SCORE_RANGE.0),
        max.and_then(Number::as_f64).unwrap_or(DEFAULT_SCORE_RANGE.1),
    )
}

/// How a judge reply is turned into a verdict. Exactly one rule kind per template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputParserRules {
    /// Phrase patterns; the last mention in the reply wins.
    Binary {
        positive_patterns: Vec<String>,
        negative_patterns: Vec<String>,
    },
    /// First match of `pattern` (group 1 if present) as a number in `[min, max]`.
    Numeric {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<Number>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<Number>,
    },
    /// Matches of `pattern` normalized to A, B or EQUAL.
    Preference { pattern: String },
    /// JSON object with declared fields.
    Json { format: BTreeMap<String, FieldDecl> },
}

impl OutputParserRules {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Binary { .. } => "binary",
            Self::Numeric { .. } => "numeric",
            Self::Preference { .. } => "preference",
            Self::Json { .. } => "json",
        }
    }

    pub fn validate(&self) -> Result<(), TemplateError> {
        match self {
            Self::Binary {
                positive_patterns,
                negative_patterns,
            } => {
                check_pattern_list("positive_patterns", positive_patterns)?;
                check_pattern_list("negative_patterns", negative_patterns)
            }
            Self::Numeric { pattern, min, max } => {
                check_pattern("pattern", pattern)?;
                let (min, max) = score_range(min.as_ref(), max.as_ref());
                if min > max {
                    return Err(TemplateError::Invalid(format!(
                        "numeric range [{}, {}] is not a valid range",
                        min, max
                    )));
                }
                Ok(())
            }
            Self::Preference { pattern } => check_pattern("pattern", pattern),
            Self::Json { format } => {
                if format.is_empty() {
                    return Err(TemplateError::Invalid(
                        "json rules need at least one field in format".to_string(),
                    ));
                }
                for (name, decl) in format {
                    if name.trim().is_empty() {
                        return Err(TemplateError::Invalid(
                            "json format has an empty field name".to_string(),
                        ));
                    }
                    decl.field_type().map_err(|e| {
                        TemplateError::Invalid(format!("json field '{}': {}", name, e))
                    })?;
                }
                Ok(())
            }
        }
    }
}

fn check_pattern_list(field: &str, patterns: &[String]) -> Result<(), TemplateError> {
    if patterns.is_empty() {
        return Err(TemplateError::Invalid(format!("{} cannot be empty", field)));
    }
    for pattern in patterns {
        check_pattern(field, pattern)?;
    }
    Ok(())
}

fn check_pattern(field: &str, pattern: &str) -> Result<(), TemplateError> {
    if pattern.trim().is_empty() {
        return Err(TemplateError::Invalid(format!("{} contains an empty pattern", field)));
    }
    Regex::new(pattern).map_err(|e| {
        TemplateError::Invalid(format!("{} pattern '{}' is invalid: {}", field, pattern, e))
    })?;
    Ok(())
}

/// Declared type of a JSON field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldType {
    Number { min: Option<f64>, max: Option<f64> },
    Boolean,
    String,
    StringArray,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number { .. } => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::StringArray => write!(f, "array of strings"),
        }
    }
}

/// A JSON field declaration, kept as written (`"number (1-5)"`, `"boolean"`,
/// `"array of strings"`) so stored templates round-trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldDecl(pub String);

impl FieldDecl {
    pub fn new(decl: impl Into<String>) -> Self {
        Self(decl.into())
    }

    /// Interpret the declaration. The leading word picks the type; numbers may
    /// carry a `(lo-hi)` range.
    pub fn field_type(&self) -> Result<FieldType, String> {
        let decl = self.0.trim().to_ascii_lowercase();
        let head: String = decl
            .chars()
            .take_while(|c| c.is_ascii_alphabetic() || *c == '_' || *c == '-' || *c == ' ')
            .collect();
        let head = head.trim();

        if head.starts_with("array") || head.starts_with("list") {
            return Ok(FieldType::StringArray);
        }
        match head.split_whitespace().next().unwrap_or("") {
            "number" | "integer" | "int" | "float" => {
                let (min, max) = parse_range(&decl).unzip();
                Ok(FieldType::Number { min, max })
            }
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "string" | "str" | "text" => Ok(FieldType::String),
            _ => Err(format!("unrecognized type declaration '{}'", self.0)),
        }
    }
}

/// Extract `(lo-hi)` from a declaration such as `number (1-5)`.
fn parse_range(decl: &str) -> Option<(f64, f64)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"\(\s*(-?\d+(?:\.\d+)?)\s*(?:-|to|\.\.)\s*(-?\d+(?:\.\d+)?)\s*\)")
            .expect("range regex is valid")
    });
    let caps = re.captures(decl)?;
    let lo = caps.get(1)?.as_str().parse().ok()?;
    let hi = caps.get(2)?.as_str().parse().ok()?;
    Some((lo, hi))
}

/// A stored judge template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "template_id")]
    pub id: String,
    #[serde(rename = "template_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_judge_model_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub prompt_structure: PromptStructure,
    pub output_parser_rules: OutputParserRules,
}

impl Template {
    pub fn validate(&self) -> Result<(), TemplateError> {
        if !is_valid_id(&self.id) {
            return Err(TemplateError::Invalid(format!(
                "template_id '{}' must be non-empty and use only letters, digits, '_' or '-'",
                self.id
            )));
        }
        if self.name.trim().is_empty() {
            return Err(TemplateError::Invalid(
                "template_name cannot be empty".to_string(),
            ));
        }
        self.prompt_structure.validate()?;
        self.output_parser_rules.validate()
    }

    pub fn summary(&self) -> TemplateSummary {
        TemplateSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            target_judge_model_family: self.target_judge_model_family.clone(),
            parser_type: self.output_parser_rules.kind(),
        }
    }
}

/// Listing view of a template.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateSummary {
    #[serde(rename = "template_id")]
    pub id: String,
    #[serde(rename = "template_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_judge_model_family: Option<String>,
    pub parser_type: &'static str,
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Derive a template id from a display name ("Code Quality Evaluation" →
/// "code_quality_evaluation").
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}
