//! Prediction prompts.
//!
//! One base prompt establishes the task and the exact output contract;
//! per-model variants layer quirk fixes on top. The variants exist
//! because observed failure modes differ by model family: some drift out
//! of English, some wrap JSON in prose, and small models lose the thread
//! on long prompts entirely.

use scoreline_core::domain::{Match, PromptVariant};

/// Base prompt shared by all variants.
///
/// The output contract is stated once, precisely, and mirrors what the
/// response parser's schema accepts. Keep the two in sync.
pub const BASE_PROMPT: &str = r#"
You are a football analyst submitting exact-score predictions.

For every match listed below, predict the final score after regular time.

## Output Format (JSON array, nothing else)
[
  {"matchId": "<id from the list>", "homeScore": <integer>, "awayScore": <integer>}
]

## Rules
1. Predict every listed match, exactly once each
2. Use the matchId values exactly as given
3. Scores are integers between 0 and 20
4. Do not add commentary before or after the JSON
"#;

const LANGUAGE_ENFORCED_SUFFIX: &str = r#"
## Language
Respond in English only. The JSON keys and all text must be English,
regardless of the teams' home country or your own defaults.
"#;

const JSON_EMPHASIS_SUFFIX: &str = r#"
## Output Reminder
Your ENTIRE response must be the JSON array. No introduction, no markdown
fences, no explanation after. The first character of your response is `[`
and the last is `]`.
"#;

const MINIMAL_TEMPLATE: &str = r#"
Predict exact final scores. Reply with only a JSON array:
[{"matchId": "...", "homeScore": 0, "awayScore": 0}]
"#;

/// Build the prediction prompt for a model's variant.
pub fn prediction_prompt(
    variant: PromptVariant,
    matches: &[Match],
    analysis: Option<&str>,
) -> String {
    let mut lines = String::new();
    for m in matches {
        lines.push_str(&format!(
            "- {} | {} vs {} | {} | kickoff {}\n",
            m.id,
            m.home_team,
            m.away_team,
            m.competition,
            m.kickoff.format("%Y-%m-%d %H:%M UTC"),
        ));
    }

    let mut prompt = match variant {
        PromptVariant::Minimal => format!("{MINIMAL_TEMPLATE}\nMatches:\n{lines}"),
        _ => format!("{BASE_PROMPT}\n## Matches\n{lines}"),
    };

    if let Some(brief) = analysis {
        if variant != PromptVariant::Minimal {
            prompt.push_str(&format!("\n## Match Context\n{brief}\n"));
        }
    }

    match variant {
        PromptVariant::LanguageEnforced => prompt.push_str(LANGUAGE_ENFORCED_SUFFIX),
        PromptVariant::JsonEmphasis => prompt.push_str(JSON_EMPHASIS_SUFFIX),
        _ => {}
    }

    prompt
}

/// Prompt for the analysis stage: a short pre-match brief that later
/// prediction prompts embed as context.
pub fn analysis_prompt(m: &Match) -> String {
    format!(
        "Write a four-sentence pre-match brief for {} vs {} ({}, kickoff {}).\n\
         Cover current form, notable absences, and anything tactical worth\n\
         knowing. Plain text, no predictions yet.",
        m.home_team,
        m.away_team,
        m.competition,
        m.kickoff.format("%Y-%m-%d %H:%M UTC"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use scoreline_core::domain::MatchStatus;

    fn fixture() -> Match {
        Match {
            id: "m1".to_string(),
            home_team: "FCB".to_string(),
            away_team: "BVB".to_string(),
            competition: "bundesliga".to_string(),
            kickoff: Utc.with_ymd_and_hms(2026, 8, 15, 14, 30, 0).unwrap(),
            status: MatchStatus::Scheduled,
            home_score: None,
            away_score: None,
        }
    }

    #[test]
    fn test_all_variants_carry_match_id() {
        for variant in [
            PromptVariant::Plain,
            PromptVariant::LanguageEnforced,
            PromptVariant::JsonEmphasis,
            PromptVariant::Minimal,
        ] {
            let prompt = prediction_prompt(variant, &[fixture()], None);
            assert!(prompt.contains("m1"), "variant {variant:?} lost the match id");
            assert!(prompt.contains("matchId"));
        }
    }

    #[test]
    fn test_language_variant_enforces_english() {
        let prompt = prediction_prompt(PromptVariant::LanguageEnforced, &[fixture()], None);
        assert!(prompt.contains("English only"));
    }

    #[test]
    fn test_minimal_is_actually_minimal() {
        let minimal = prediction_prompt(PromptVariant::Minimal, &[fixture()], Some("long brief"));
        let plain = prediction_prompt(PromptVariant::Plain, &[fixture()], Some("long brief"));
        assert!(minimal.len() < plain.len());
        // Minimal drops the context brief on purpose.
        assert!(!minimal.contains("long brief"));
        assert!(plain.contains("long brief"));
    }

    #[test]
    fn test_analysis_prompt_names_the_fixture() {
        let prompt = analysis_prompt(&fixture());
        assert!(prompt.contains("FCB"));
        assert!(prompt.contains("BVB"));
    }
}
