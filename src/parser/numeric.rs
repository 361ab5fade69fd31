use regex::Regex;

use super::{Score, Verdict, VerdictValue};

/// First match of `pattern` wins; capture group 1 is the number when the
/// pattern has one. Values outside `[min, max]` are not reported.
pub(super) fn extract(text: &str, pattern: &str, min: f64, max: f64) -> Option<Verdict> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("Invalid numeric pattern '{}': {}", pattern, e);
            return None;
        }
    };

    let caps = re.captures(text)?;
    let m = caps.get(1).or_else(|| caps.get(0))?;

    match Score::parse(m.as_str()) {
        Some(score) if (min..=max).contains(&score.as_f64()) => Some(Verdict::clear(
            VerdictValue::Numeric { score: Some(score) },
            text,
        )),
        Some(score) => {
            tracing::debug!("Score {:?} outside range {}..={}", score, min, max);
            Some(Verdict::ambiguous(VerdictValue::Numeric { score: None }, text))
        }
        None => Some(Verdict::ambiguous(VerdictValue::Numeric { score: None }, text)),
    }
}
