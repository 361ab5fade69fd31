use regex::Regex;
use std::sync::OnceLock;

use super::{Preference, Verdict, VerdictValue};

fn tie_wording() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:tie|tied|equal|equally\s+(?:good|bad|strong|weak|well|effective)|no\s+(?:clear\s+)?(?:winner|preference|difference)|neither\s+(?:one\s+)?is\s+better)\b",
        )
        .expect("tie regex is valid")
    })
}

/// Map a matched phrase such as "Text A", "response_b" or "equal" to a choice.
fn normalize(phrase: &str) -> Option<Preference> {
    let tokens: Vec<String> = phrase
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect();

    match tokens.first().map(String::as_str) {
        Some("EQUAL" | "TIE" | "TIED" | "SAME" | "BOTH" | "NEITHER") => {
            return Some(Preference::Equal)
        }
        _ => {}
    }
    match tokens.last().map(String::as_str) {
        Some("A") => Some(Preference::A),
        Some("B") => Some(Preference::B),
        _ => None,
    }
}

/// A reply that is nothing but the choice, e.g. `B` or `**EQUAL**.`
fn bare_choice(text: &str) -> Option<Preference> {
    let stripped = text.trim_matches(|c: char| !c.is_alphanumeric());
    match stripped.to_uppercase().as_str() {
        "A" => Some(Preference::A),
        "B" => Some(Preference::B),
        "EQUAL" | "TIE" => Some(Preference::Equal),
        _ => None,
    }
}

/// Standalone capital `A`/`B` tokens, as in "B is better." or "Answer: B".
fn letter_token() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([AB])\b").expect("letter token regex is valid"))
}

/// Which sides the standalone letters name. An `A` followed by a lowercase
/// word other than a verb is the article, not a side.
fn letter_sides(text: &str) -> (bool, bool) {
    let (mut saw_a, mut saw_b) = (false, false);
    for m in letter_token().find_iter(text) {
        if m.as_str() == "A" && is_article(text, m.end()) {
            continue;
        }
        match m.as_str() {
            "A" => saw_a = true,
            _ => saw_b = true,
        }
    }
    (saw_a, saw_b)
}

fn is_article(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    let Some(word) = rest
        .strip_prefix(' ')
        .and_then(|r| r.split(|c: char| !c.is_alphabetic()).next())
    else {
        return false;
    };
    let lowercase = word.chars().next().is_some_and(char::is_lowercase);
    lowercase
        && !matches!(
            word,
            "is" | "was" | "wins" | "won" | "seems" | "has" | "provides" | "performs" | "does"
                | "better" | "and" | "or"
        )
}

fn preference(choice: Preference, ambiguous: bool, text: &str) -> Verdict {
    let value = VerdictValue::Preference { choice };
    if ambiguous {
        Verdict::ambiguous(value, text)
    } else {
        Verdict::clear(value, text)
    }
}

/// Only a single unambiguous choice counts.
///
/// Sides come from `pattern` first; when it names no side, standalone capital
/// letters are used instead. Tie wording alone, or alongside both sides, means
/// EQUAL. Tie wording next to a single side contradicts it, so the result is
/// EQUAL flagged ambiguous. Both sides without a tie is also ambiguous.
pub(super) fn extract(text: &str, pattern: &str) -> Option<Verdict> {
    if let Some(choice) = bare_choice(text) {
        return Some(Verdict::clear(VerdictValue::Preference { choice }, text));
    }

    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("Invalid preference pattern '{}': {}", pattern, e);
            return None;
        }
    };

    let (mut saw_a, mut saw_b, mut saw_tie) = (false, false, false);
    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(1).or_else(|| caps.get(0)) else {
            continue;
        };
        match normalize(m.as_str()) {
            Some(Preference::A) => saw_a = true,
            Some(Preference::B) => saw_b = true,
            Some(Preference::Equal) => saw_tie = true,
            None => {}
        }
    }
    if !saw_a && !saw_b {
        (saw_a, saw_b) = letter_sides(text);
    }
    saw_tie |= tie_wording().is_match(text);

    let verdict = match (saw_a, saw_b, saw_tie) {
        (false, false, false) => return None,
        (false, false, true) | (true, true, true) => preference(Preference::Equal, false, text),
        (true, false, false) => preference(Preference::A, false, text),
        (false, true, false) => preference(Preference::B, false, text),
        (true, false, true) | (false, true, true) => {
            tracing::debug!("Single preference contradicted by tie wording");
            preference(Preference::Equal, true, text)
        }
        (true, true, false) => preference(Preference::Equal, true, text),
    };
    Some(verdict)
}
