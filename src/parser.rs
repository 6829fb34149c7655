//! Tolerant parsing of panel-member replies into `{score, justification}`.
//!
//! Models are asked to reply with a JSON object, but in practice the
//! text back from a vendor API wanders: fenced code blocks, a stray
//! preamble sentence, or — for older prompts still in the wild — a
//! `SCORE:`/`JUSTIFICATION:` line format. Rather than one large regex
//! doing everything, this mirrors the adversarial validator's style of
//! small, explicit, independently testable strategies tried in a fixed
//! acceptance order, falling back to partial extraction before finally
//! giving up.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::model::{Outcomes, ParsedReply, ScoreVector};

/// Attempts a reply against each parsing strategy in order, returning the
/// first one that yields a structurally valid score vector. Returns
/// `None` if every strategy fails, in which case the caller is expected
/// to fall back to [`ScoreVector::uniform`] and record a parsing warning.
pub fn parse_reply(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    try_strict_json(raw, outcomes)
        .or_else(|| try_fenced_json(raw, outcomes))
        .or_else(|| try_repaired_json(raw, outcomes))
        .or_else(|| try_legacy_pattern(raw, outcomes))
        .or_else(|| try_partial_extraction(raw, outcomes))
}

#[derive(Debug, Deserialize)]
struct RawReply {
    score: Vec<f64>,
    #[serde(default)]
    justification: String,
}

/// Turns a `RawReply`'s float score vector into a validated, normalized
/// [`ScoreVector`], rejecting vectors of the wrong length or containing
/// negative values.
fn finalize(raw: RawReply, outcomes: &Outcomes) -> Option<ParsedReply> {
    if raw.score.len() != outcomes.len() {
        return None;
    }
    if raw.score.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    if raw.score.iter().sum::<f64>() == 0.0 {
        return None;
    }

    let scaled: Vec<u64> = raw.score.iter().map(|v| v.round().max(0.0) as u64).collect();
    let normalized = ScoreVector::raw(scaled).normalize().ok()?;

    Some(ParsedReply {
        score: normalized,
        justification: raw.justification,
    })
}

/// Strategy 1: the whole reply, trimmed, is a JSON object.
fn try_strict_json(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    let parsed: RawReply = serde_json::from_str(raw.trim()).ok()?;
    finalize(parsed, outcomes)
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?\s*\n?(\{.*?\})\s*```").unwrap())
}

/// Strategy 2: a JSON object inside a markdown fenced code block,
/// possibly preceded or followed by prose.
fn try_fenced_json(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    let captures = fence_re().captures(raw)?;
    let body = captures.get(1)?.as_str();
    let parsed: RawReply = serde_json::from_str(body).ok()?;
    finalize(parsed, outcomes)
}

fn brace_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[\s\S]*\}").unwrap())
}

fn fence_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```(?:json)?").unwrap())
}

/// Strategy 3: strip fence markers, extract the widest `{...}` span, and
/// apply conservative repairs before retrying JSON: a literal line break
/// inside a string becomes `\n`, and unescaped quotes inside the
/// `justification` value are escaped by scanning for its balanced outer
/// quotes.
fn try_repaired_json(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    let stripped = fence_marker_re().replace_all(raw, "");
    let span = brace_span_re().find(&stripped)?.as_str();
    let repaired = repair_json(span);
    let parsed: RawReply = serde_json::from_str(&repaired).ok()?;
    finalize(parsed, outcomes)
}

fn repair_json(text: &str) -> String {
    let line_breaks_escaped = escape_line_breaks_in_strings(text);
    escape_justification_quotes(&line_breaks_escaped)
}

/// Walks the text tracking whether we're inside a JSON string, replacing
/// any literal line break found inside a string with the two-character
/// escape `\n`.
fn escape_line_breaks_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                out.push(ch);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out
}

fn justification_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""justification"\s*:\s*""#).unwrap())
}

/// Finds the `justification` value's balanced outer quotes — the opening
/// quote right after the key, and the last quote before the object's
/// closing brace — and escapes any unescaped quote in between.
fn escape_justification_quotes(text: &str) -> String {
    let Some(m) = justification_key_re().find(text) else {
        return text.to_string();
    };
    let value_start = m.end();

    let search_end = text.rfind('}').unwrap_or(text.len());
    if search_end <= value_start {
        return text.to_string();
    }
    let Some(close_rel) = text[value_start..search_end].rfind('"') else {
        return text.to_string();
    };
    let value_end = value_start + close_rel;
    if value_end <= value_start {
        return text.to_string();
    }

    let mut repaired = String::with_capacity(text.len() + 8);
    repaired.push_str(&text[..value_start]);
    let mut prev_escape = false;
    for ch in text[value_start..value_end].chars() {
        if ch == '"' && !prev_escape {
            repaired.push('\\');
        }
        prev_escape = ch == '\\' && !prev_escape;
        repaired.push(ch);
    }
    repaired.push_str(&text[value_end..]);
    repaired
}

fn legacy_score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)SCORE:\s*\[?([\d,\s]+)\]?").unwrap())
}

fn legacy_justification_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)JUSTIFICATION:\s*(.+?)(?:\n\s*\n|\z)").unwrap())
}

/// Strategy 4: the legacy `SCORE: [a, b, c]` / `JUSTIFICATION: ...` line
/// format carried over from earlier prompt versions still in use by some
/// callers.
fn try_legacy_pattern(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    let score_match = legacy_score_re().captures(raw)?;
    let numbers: Vec<f64> = score_match
        .get(1)?
        .as_str()
        .split(',')
        .filter_map(|s| s.trim().parse::<f64>().ok())
        .collect();

    if numbers.len() != outcomes.len() {
        return None;
    }

    let justification = legacy_justification_re()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    finalize(
        RawReply {
            score: numbers,
            justification,
        },
        outcomes,
    )
}

fn partial_score_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""score"\s*:\s*\[([^\]]*)\]"#).unwrap())
}

const JUSTIFICATION_TOKEN: &str = "\"justification\":";

/// Strategy 5: last resort. Requires a `"score":[…]` substring that
/// parses as exactly `outcomes.len()` integers, and a `"justification":`
/// token somewhere after it; the justification is the longest
/// contiguous run of printable characters following that token, with
/// trailing truncation at the last balanced `}` or end-of-input.
fn try_partial_extraction(raw: &str, outcomes: &Outcomes) -> Option<ParsedReply> {
    let score_match = partial_score_re().captures(raw)?;
    let numbers: Vec<f64> = score_match
        .get(1)?
        .as_str()
        .split(',')
        .filter_map(|s| s.trim().parse::<i64>().ok())
        .map(|n| n as f64)
        .collect();

    if numbers.len() != outcomes.len() {
        return None;
    }

    let token_idx = raw.find(JUSTIFICATION_TOKEN)?;
    let after = raw[token_idx + JUSTIFICATION_TOKEN.len()..].trim_start();
    let body = match after.rfind('}') {
        Some(end) => &after[..end],
        None => after,
    };
    let justification = body.trim().trim_matches('"').to_string();

    finalize(
        RawReply {
            score: numbers,
            justification,
        },
        outcomes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes(n: usize) -> Outcomes {
        (0..n).map(|i| format!("outcome-{i}")).collect()
    }

    #[test]
    fn strict_json_parses_clean_reply() {
        let raw = r#"{"score": [600000, 400000], "justification": "because"}"#;
        let parsed = parse_reply(raw, &outcomes(2)).unwrap();
        assert_eq!(parsed.score.0, vec![600_000, 400_000]);
        assert_eq!(parsed.justification, "because");
    }

    #[test]
    fn fenced_json_is_extracted_from_prose() {
        let raw = "Here's my assessment:\n```json\n{\"score\": [700000, 300000], \"justification\": \"x\"}\n```\nHope that helps.";
        let parsed = parse_reply(raw, &outcomes(2)).unwrap();
        assert_eq!(parsed.score.sum(), 1_000_000);
    }

    #[test]
    fn repaired_json_escapes_newline_and_quote_in_justification() {
        let raw = "some preamble {\"score\": [500000, 500000], \"justification\": \"the \"primary\" filing\nsupports a split\"} trailing text";
        let parsed = parse_reply(raw, &outcomes(2)).unwrap();
        assert_eq!(parsed.score.sum(), 1_000_000);
        assert_eq!(parsed.justification, "the \"primary\" filing\nsupports a split");
    }

    #[test]
    fn legacy_pattern_parses_score_and_justification_lines() {
        let raw = "SCORE: [600000, 400000]\nJUSTIFICATION: because the evidence favors outcome one\n";
        let parsed = parse_reply(raw, &outcomes(2)).unwrap();
        assert_eq!(parsed.score.0, vec![600_000, 400_000]);
        assert_eq!(parsed.justification, "because the evidence favors outcome one");
    }

    #[test]
    fn legacy_pattern_rejects_decimal_scores() {
        let raw = "SCORE: [0.6, 0.4]\nJUSTIFICATION: not integers\n";
        // Falls through strategy 4 (integers only) into strategy 5, which
        // requires a `"score":[…]` token that isn't present here either.
        assert!(parse_reply(raw, &outcomes(2)).is_none());
    }

    #[test]
    fn partial_extraction_recovers_score_and_justification_tokens() {
        let raw = "Here is my answer - \"score\": [550000, 450000], \"justification\": the filing favors outcome one";
        let parsed = parse_reply(raw, &outcomes(2)).unwrap();
        assert_eq!(parsed.score.0, vec![550_000, 450_000]);
        assert_eq!(parsed.justification, "the filing favors outcome one");
    }

    #[test]
    fn mismatched_length_falls_through_every_strategy() {
        let raw = r#"{"score": [100, 200, 300], "justification": "three numbers, two outcomes"}"#;
        assert!(parse_reply(raw, &outcomes(2)).is_none());
    }

    #[test]
    fn unparseable_garbage_returns_none() {
        let raw = "I refuse to answer in a structured format today.";
        assert!(parse_reply(raw, &outcomes(2)).is_none());
    }

    #[test]
    fn negative_scores_are_rejected() {
        let raw = r#"{"score": [-100, 1100000], "justification": "negative"}"#;
        assert!(parse_reply(raw, &outcomes(2)).is_none());
    }
}
