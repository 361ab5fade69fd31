//! Separates a judge's reasoning from its final answer.

use regex::Regex;
use std::sync::OnceLock;

/// The two halves of a reply. When no split point exists both point at the
/// whole (trimmed) reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split<'a> {
    pub answer: &'a str,
    pub reasoning: &'a str,
}

fn answer_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t>*_#-]*(?:final\s+answer|answer|judge?ment|verdict|decision|conclusion)[ \t*_]*:[ \t*_]*",
        )
        .expect("answer marker regex is valid")
    })
}

fn reasoning_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?im)^[ \t>*_#-]*(?:reasoning|explanation|rationale|justification)[ \t*_]*:[ \t*_]*",
        )
        .expect("reasoning marker regex is valid")
    })
}

/// Split `raw` into answer and reasoning.
///
/// Tried in order: the last line opening with an answer label ("Answer:",
/// "Verdict:", ...); the first line opening with a reasoning label, whose
/// preceding text is the answer; the last line of a multi-line reply.
pub fn split(raw: &str) -> Split<'_> {
    let text = raw.trim();

    if let Some(m) = answer_marker().find_iter(text).last() {
        let answer = text[m.end()..].trim();
        if !answer.is_empty() {
            return Split {
                answer,
                reasoning: strip_reasoning_label(text[..m.start()].trim()),
            };
        }
    }

    if let Some(m) = reasoning_marker().find(text) {
        let answer = text[..m.start()].trim();
        let reasoning = text[m.end()..].trim();
        if !answer.is_empty() && !reasoning.is_empty() {
            return Split { answer, reasoning };
        }
    }

    if let Some(idx) = text.rfind('\n') {
        let answer = text[idx + 1..].trim();
        let reasoning = text[..idx].trim();
        if !answer.is_empty() && !reasoning.is_empty() {
            return Split { answer, reasoning };
        }
    }

    Split {
        answer: text,
        reasoning: text,
    }
}

fn strip_reasoning_label(text: &str) -> &str {
    match reasoning_marker().find(text) {
        Some(m) if m.start() == 0 => text[m.end()..].trim(),
        _ => text,
    }
}
