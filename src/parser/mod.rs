//! Output parser: turns a free-form judge reply into a typed [`Verdict`].
//!
//! All pattern matching against model output lives here. Parsing never
//! fails: when the reply cannot be resolved confidently the verdict is
//! flagged `ambiguous` and the caller decides what that means.
//!
//! ## Flow
//! 1. With reasoning requested, split the reply into reasoning and answer
//!    segments ([`reasoning::split`]).
//! 2. Apply the template's rule kind to the answer segment. If nothing at all
//!    is recognized there, retry on the whole reply.
//! 3. Fall back to an ambiguous verdict of the rule's kind.

mod binary;
mod json;
mod numeric;
mod preference;
pub mod reasoning;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::template::{score_range, OutputParserRules};

/// Label produced by binary rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryLabel {
    Positive,
    Negative,
}

/// Choice produced by preference rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Preference {
    A,
    B,
    Equal,
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
            Self::Equal => write!(f, "EQUAL"),
        }
    }
}

/// A numeric score, kept in the form the model wrote it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Score {
    Integer(i64),
    Float(f64),
}

impl Score {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<i64>() {
            return Some(Self::Integer(n));
        }
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Self::Float)
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Integer(n) => *n as f64,
            Self::Float(f) => *f,
        }
    }
}

/// The parsed value, one case per rule kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerdictValue {
    Binary {
        label: Option<BinaryLabel>,
        /// The phrase that decided the label, as written in the reply.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        matched: Option<String>,
    },
    Numeric {
        score: Option<Score>,
    },
    Preference {
        choice: Preference,
    },
    Json {
        fields: Option<serde_json::Map<String, serde_json::Value>>,
    },
}

/// Typed result extracted from a judge reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(flatten)]
    pub value: VerdictValue,
    pub ambiguous: bool,
    /// Text the value was derived from.
    pub source: String,
}

impl Verdict {
    fn clear(value: VerdictValue, source: &str) -> Self {
        Self {
            value,
            ambiguous: false,
            source: source.to_string(),
        }
    }

    fn ambiguous(value: VerdictValue, source: &str) -> Self {
        Self {
            value,
            ambiguous: true,
            source: source.to_string(),
        }
    }

    /// The verdict reported when nothing recognizable was found.
    fn unresolved(rules: &OutputParserRules, source: &str) -> Self {
        let value = match rules {
            OutputParserRules::Binary { .. } => VerdictValue::Binary {
                label: None,
                matched: None,
            },
            OutputParserRules::Numeric { .. } => VerdictValue::Numeric { score: None },
            OutputParserRules::Preference { .. } => VerdictValue::Preference {
                choice: Preference::Equal,
            },
            OutputParserRules::Json { .. } => VerdictValue::Json { fields: None },
        };
        Self::ambiguous(value, source)
    }
}

/// Parser output: the verdict plus the reasoning segment when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedOutput {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Parse a raw judge reply under `rules`.
pub fn parse(raw: &str, rules: &OutputParserRules, provide_reasoning: bool) -> ParsedOutput {
    let (answer, reasoning) = if provide_reasoning {
        let split = reasoning::split(raw);
        let reasoning = Some(split.reasoning.to_string()).filter(|r| !r.is_empty());
        (split.answer, reasoning)
    } else {
        (raw, None)
    };

    let mut found = extract(answer, rules);
    if found.is_none() && answer != raw {
        found = extract(raw, rules);
    }

    let verdict = found.unwrap_or_else(|| {
        // Unparseable JSON keeps the whole reply for diagnosis.
        let source = match rules {
            OutputParserRules::Json { .. } => raw,
            _ => answer,
        };
        Verdict::unresolved(rules, source)
    });

    if verdict.ambiguous {
        tracing::debug!("Ambiguous {} verdict from reply: {:?}", rules.kind(), raw);
    }

    ParsedOutput { verdict, reasoning }
}

/// Run one rule kind over `text`. `None` means nothing recognizable was found.
fn extract(text: &str, rules: &OutputParserRules) -> Option<Verdict> {
    match rules {
        OutputParserRules::Binary {
            positive_patterns,
            negative_patterns,
        } => binary::extract(text, positive_patterns, negative_patterns),
        OutputParserRules::Numeric { pattern, min, max } => {
            let (min, max) = score_range(min.as_ref(), max.as_ref());
            numeric::extract(text, pattern, min, max)
        }
        OutputParserRules::Preference { pattern } => preference::extract(text, pattern),
        OutputParserRules::Json { format } => json::extract(text, format),
    }
}
