use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

use super::{BinaryLabel, Verdict, VerdictValue};

/// A pattern hit: byte span and the text it covered.
#[derive(Debug, Clone, Copy)]
struct Hit<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

/// Wrap a pattern so it only matches whole words. `-` counts as a word
/// character, so `toxic` does not match inside `non-toxic`.
fn compile(pattern: &str) -> Option<Regex> {
    let wrapped = format!(r"(?:^|[^\w-])((?:{}))(?:[^\w-]|$)", pattern);
    match RegexBuilder::new(&wrapped).case_insensitive(true).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!("Skipping invalid binary pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// The hit ending latest across all `patterns`; on equal ends the longer one.
fn last_hit<'a>(text: &'a str, patterns: &[String]) -> Option<Hit<'a>> {
    let mut best: Option<Hit<'a>> = None;

    for re in patterns.iter().filter_map(|p| compile(p)) {
        let mut pos = 0;
        while pos <= text.len() {
            let Some(m) = re.captures_at(text, pos).and_then(|caps| caps.get(1)) else {
                break;
            };
            let hit = Hit {
                start: m.start(),
                end: m.end(),
                text: m.as_str(),
            };
            if best.map_or(true, |b| later(&hit, &b) == Ordering::Greater) {
                best = Some(hit);
            }
            pos = if m.end() > pos {
                m.end()
            } else {
                pos + text[pos..].chars().next().map_or(1, char::len_utf8)
            };
        }
    }

    best
}

fn later(a: &Hit<'_>, b: &Hit<'_>) -> Ordering {
    a.end.cmp(&b.end).then_with(|| b.start.cmp(&a.start))
}

pub(super) fn extract(text: &str, positive: &[String], negative: &[String]) -> Option<Verdict> {
    let (label, hit) = match (last_hit(text, positive), last_hit(text, negative)) {
        (None, None) => return None,
        (Some(p), None) => (BinaryLabel::Positive, p),
        (None, Some(n)) => (BinaryLabel::Negative, n),
        (Some(p), Some(n)) => match later(&p, &n) {
            Ordering::Greater => (BinaryLabel::Positive, p),
            Ordering::Less => (BinaryLabel::Negative, n),
            Ordering::Equal => {
                return Some(Verdict::ambiguous(
                    VerdictValue::Binary {
                        label: None,
                        matched: Some(p.text.to_string()),
                    },
                    text,
                ))
            }
        },
    };

    Some(Verdict::clear(
        VerdictValue::Binary {
            label: Some(label),
            matched: Some(hit.text.to_string()),
        },
        text,
    ))
}
