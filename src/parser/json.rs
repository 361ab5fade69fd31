use regex::Regex;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::{Verdict, VerdictValue};
use crate::template::{FieldDecl, FieldType};

fn code_fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*\s*\n?(.*?)```").expect("code fence regex is valid")
    })
}

/// Locate the first JSON object in `text`: fenced blocks first, then the
/// first `{` that starts a complete object.
fn find_object(text: &str) -> Option<Map<String, Value>> {
    for caps in code_fence().captures_iter(text) {
        if let Some(Value::Object(map)) = caps
            .get(1)
            .and_then(|body| serde_json::from_str::<Value>(body.as_str().trim()).ok())
        {
            return Some(map);
        }
    }

    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(map))) = stream.next() {
            return Some(map);
        }
    }
    None
}

fn number_from_str(raw: &str) -> Option<Number> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Some(n.into());
    }
    raw.parse::<f64>().ok().and_then(Number::from_f64)
}

fn in_range(n: &Number, min: Option<f64>, max: Option<f64>) -> bool {
    let Some(v) = n.as_f64() else {
        return false;
    };
    min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
}

/// Coerce `value` to `ty`. `None` when it cannot be made to fit.
fn coerce(value: &Value, ty: FieldType) -> Option<Value> {
    match (ty, value) {
        (FieldType::Number { min, max }, Value::Number(n)) => {
            in_range(n, min, max).then(|| value.clone())
        }
        (FieldType::Number { min, max }, Value::String(s)) => {
            let n = number_from_str(s)?;
            in_range(&n, min, max).then_some(Value::Number(n))
        }
        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::String, Value::String(_)) => Some(value.clone()),
        (FieldType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::StringArray, Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(_) => Some(item.clone()),
                Value::Number(n) => Some(Value::String(n.to_string())),
                Value::Bool(b) => Some(Value::String(b.to_string())),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(Value::Array),
        _ => None,
    }
}

/// Apply the declared field types in place. Returns false when any declared
/// field could not be coerced; such values are left as the model wrote them.
fn apply_schema(fields: &mut Map<String, Value>, format: &BTreeMap<String, FieldDecl>) -> bool {
    let mut conforms = true;
    for (name, decl) in format {
        let Some(value) = fields.get_mut(name) else {
            continue;
        };
        let ty = match decl.field_type() {
            Ok(ty) => ty,
            Err(e) => {
                tracing::warn!("Ignoring declaration for field '{}': {}", name, e);
                continue;
            }
        };
        match coerce(value, ty) {
            Some(coerced) => *value = coerced,
            None => {
                tracing::debug!("Field '{}' does not fit declared type {}", name, ty);
                conforms = false;
            }
        }
    }
    conforms
}

pub(super) fn extract(text: &str, format: &BTreeMap<String, FieldDecl>) -> Option<Verdict> {
    let mut fields = find_object(text)?;
    let conforms = apply_schema(&mut fields, format);
    let value = VerdictValue::Json {
        fields: Some(fields),
    };
    Some(if conforms {
        Verdict::clear(value, text)
    } else {
        Verdict::ambiguous(value, text)
    })
}
