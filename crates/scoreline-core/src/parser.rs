//! Multi-strategy extraction of score predictions from raw LLM output.
//!
//! Provider output is non-deterministic: the same model will return a bare
//! JSON array one day and a fenced code block wrapped in prose the next.
//! Extraction runs a fixed strategy ladder, most-structured first, and each
//! rung is only tried when the previous one produced no valid,
//! schema-passing result:
//!
//! 1. direct JSON parse
//! 2. JSON fenced in a markdown code block
//! 3. regex extraction of a bracketed JSON array/object
//! 4. loose score-pattern extraction ("2-1") as last resort
//!
//! When every rung fails, the failure is classified (reasoning-tag leak,
//! wrong language, plain parse failure) so callers get a remediation path,
//! not a shrug.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::domain::{ScorePrediction, MAX_SCORE};
use crate::failure::PredictionFailure;

lazy_static! {
    /// Markdown code fence, with or without a language tag.
    static ref FENCED_BLOCK: Regex = Regex::new(
        r"(?s)```(?:json)?\s*(.*?)```"
    ).unwrap();

    /// Loose scoreline like "2-1" or "2:1".
    static ref LOOSE_SCORE: Regex = Regex::new(
        r"\b(\d{1,2})\s*[-:]\s*(\d{1,2})\b"
    ).unwrap();

    /// Reasoning tags that some models fail to strip from their output.
    static ref REASONING_TAG: Regex = Regex::new(
        r"(?i)</?\s*(?:think|thinking|reasoning|thought)\s*>"
    ).unwrap();

    /// A whole reasoning block, for pre-parse stripping.
    static ref REASONING_BLOCK: Regex = Regex::new(
        r"(?is)<\s*(?:think|thinking|reasoning|thought)\s*>.*?</\s*(?:think|thinking|reasoning|thought)\s*>"
    ).unwrap();
}

/// Compiled prediction schema (initialized once, reused).
static PREDICTION_SCHEMA: OnceLock<jsonschema::Validator> = OnceLock::new();

fn prediction_validator() -> &'static jsonschema::Validator {
    PREDICTION_SCHEMA.get_or_init(|| {
        let schema = serde_json::json!({
            "type": "array",
            "minItems": 1,
            "items": {
                "type": "object",
                "required": ["matchId", "homeScore", "awayScore"],
                "properties": {
                    "matchId": { "type": ["string", "integer"] },
                    "homeScore": { "type": "integer", "minimum": 0, "maximum": MAX_SCORE },
                    "awayScore": { "type": "integer", "minimum": 0, "maximum": MAX_SCORE }
                }
            }
        });
        jsonschema::options()
            .build(&schema)
            .expect("prediction schema must compile")
    })
}

/// Extract validated predictions for the expected matches from raw output.
///
/// Returns only predictions whose match id appears in `expected`; ids the
/// model invented are dropped. Scores outside `0..=MAX_SCORE` never pass
/// the schema gate; out-of-range values are rejected, not clamped.
pub fn parse_predictions(
    raw: &str,
    expected: &[String],
) -> Result<Vec<ScorePrediction>, PredictionFailure> {
    if raw.trim().is_empty() {
        return Err(PredictionFailure::EmptyResponse);
    }

    let strategies: [fn(&str, &[String]) -> Vec<ScorePrediction>; 4] = [
        strategy_direct,
        strategy_fenced,
        strategy_bracketed,
        strategy_loose,
    ];

    for strategy in strategies {
        let parsed = strategy(raw, expected);
        if !parsed.is_empty() {
            return Ok(parsed);
        }
    }

    // Nothing extracted. Classify why so the caller gets a fix path.
    if REASONING_TAG.is_match(raw) {
        return Err(PredictionFailure::ThinkingTagLeak);
    }
    if looks_non_target_language(raw) {
        return Err(PredictionFailure::LanguageMismatch);
    }
    Err(PredictionFailure::ParseFailure(format!(
        "no strategy matched ({} chars)",
        raw.len()
    )))
}

/// Remove reasoning blocks (`<think>…</think>` and friends) from output.
///
/// Used as the strip-reasoning-tags response handler. Unpaired tags are
/// dropped individually so a truncated block does not poison the payload.
pub fn strip_reasoning_blocks(raw: &str) -> String {
    let without_blocks = REASONING_BLOCK.replace_all(raw, "");
    REASONING_TAG.replace_all(&without_blocks, "").into_owned()
}

/// Extract the first JSON array or object embedded in prose, if any.
///
/// Used as the extract-embedded-json response handler for models that wrap
/// their payload in commentary.
pub fn extract_embedded_json(raw: &str) -> Option<String> {
    bracketed_slice(raw, '[', ']').or_else(|| bracketed_slice(raw, '{', '}'))
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Strategy 1: the whole response is JSON.
fn strategy_direct(raw: &str, expected: &[String]) -> Vec<ScorePrediction> {
    serde_json::from_str::<Value>(raw.trim())
        .ok()
        .map(|v| validated(v, expected))
        .unwrap_or_default()
}

/// Strategy 2: JSON fenced in a markdown code block.
fn strategy_fenced(raw: &str, expected: &[String]) -> Vec<ScorePrediction> {
    for capture in FENCED_BLOCK.captures_iter(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(capture[1].trim()) {
            let parsed = validated(value, expected);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    Vec::new()
}

/// Strategy 3: first bracketed array (or object) anywhere in the text.
fn strategy_bracketed(raw: &str, expected: &[String]) -> Vec<ScorePrediction> {
    for candidate in [
        bracketed_slice(raw, '[', ']'),
        bracketed_slice(raw, '{', '}'),
    ]
    .into_iter()
    .flatten()
    {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            let parsed = validated(value, expected);
            if !parsed.is_empty() {
                return parsed;
            }
        }
    }
    Vec::new()
}

/// Strategy 4: loose "2-1" patterns, associated with expected match ids.
///
/// A score next to a known match id wins; a bare list of scores is only
/// accepted when it lines up one-to-one with the expected matches, since
/// guessing an association would silently attach scores to the wrong match.
fn strategy_loose(raw: &str, expected: &[String]) -> Vec<ScorePrediction> {
    let mut found = Vec::new();
    let mut claimed: HashSet<usize> = HashSet::new();

    // Pass 1: a score following a match id on the same line. Only the text
    // after the id is searched so digits inside the id itself (e.g. "m-7")
    // cannot be mistaken for a score.
    for (line_no, line) in raw.lines().enumerate() {
        for (idx, id) in expected.iter().enumerate() {
            if claimed.contains(&idx) {
                continue;
            }
            let Some(pos) = line.find(id.as_str()) else {
                continue;
            };
            let tail = &line[pos + id.len()..];
            if let Some(cap) = LOOSE_SCORE.captures(tail) {
                if let Some(p) = loose_prediction(id, &cap) {
                    tracing::trace!(line = line_no, match_id = %id, "loose score matched");
                    claimed.insert(idx);
                    found.push(p);
                }
            }
        }
    }
    if !found.is_empty() {
        return found;
    }

    // Pass 2: bare scores, only when counts line up exactly.
    let scores: Vec<_> = LOOSE_SCORE.captures_iter(raw).collect();
    if scores.len() == expected.len() {
        for (id, cap) in expected.iter().zip(scores.iter()) {
            match loose_prediction(id, cap) {
                Some(p) => found.push(p),
                None => return Vec::new(),
            }
        }
    }
    found
}

fn loose_prediction(match_id: &str, cap: &regex::Captures<'_>) -> Option<ScorePrediction> {
    let home: u8 = cap[1].parse().ok()?;
    let away: u8 = cap[2].parse().ok()?;
    if home > MAX_SCORE || away > MAX_SCORE {
        return None;
    }
    Some(ScorePrediction {
        match_id: match_id.to_string(),
        home,
        away,
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Normalize a parsed value, gate it through the schema, and keep the
/// predictions for expected matches. A single object is treated as a
/// one-element array.
fn validated(value: Value, expected: &[String]) -> Vec<ScorePrediction> {
    let normalized = match value {
        Value::Array(_) => value,
        Value::Object(_) => Value::Array(vec![value]),
        _ => return Vec::new(),
    };

    if !prediction_validator().is_valid(&normalized) {
        return Vec::new();
    }

    let expected_set: HashSet<&str> = expected.iter().map(String::as_str).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for item in normalized.as_array().into_iter().flatten() {
        let match_id = match &item["matchId"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => continue,
        };
        if !expected_set.contains(match_id.as_str()) {
            tracing::debug!(match_id = %match_id, "dropping prediction for unexpected match");
            continue;
        }
        // First occurrence wins when a model repeats itself.
        if !seen.insert(match_id.clone()) {
            continue;
        }
        let (home, away) = match (item["homeScore"].as_u64(), item["awayScore"].as_u64()) {
            (Some(h), Some(a)) => (h as u8, a as u8),
            _ => continue,
        };
        out.push(ScorePrediction {
            match_id,
            home,
            away,
        });
    }
    out
}

/// Balanced slice from the first `open` to its matching `close`.
fn bracketed_slice(raw: &str, open: char, close: char) -> Option<String> {
    let start = raw.find(open)?;
    let mut depth = 0usize;
    for (offset, ch) in raw[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(raw[start..start + offset + ch.len_utf8()].to_string());
            }
        }
    }
    None
}

/// Heuristic for output that drifted out of the target language.
///
/// A score payload is language-neutral, so this only matters after every
/// strategy failed: a response dominated by non-Latin script is flagged so
/// the model can be moved to the language-enforced prompt.
fn looks_non_target_language(raw: &str) -> bool {
    let alphabetic: Vec<char> = raw.chars().filter(|c| c.is_alphabetic()).collect();
    if alphabetic.is_empty() {
        return false;
    }
    let non_latin = alphabetic
        .iter()
        .filter(|c| {
            let cp = **c as u32;
            // CJK, Cyrillic, Arabic, Hangul blocks.
            (0x0400..=0x04FF).contains(&cp)
                || (0x0600..=0x06FF).contains(&cp)
                || (0x4E00..=0x9FFF).contains(&cp)
                || (0x3040..=0x30FF).contains(&cp)
                || (0xAC00..=0xD7AF).contains(&cp)
        })
        .count();
    non_latin * 10 > alphabetic.len() * 3
}
