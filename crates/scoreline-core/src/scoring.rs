//! Kicktipp quota scoring.
//!
//! Points reward rare-but-correct calls over common-but-correct ones:
//! the tendency score is scaled inversely to how many of the match's
//! predictions shared the correct tendency. Bonuses stack on top:
//!
//! - 2–6 points for the correct tendency (win/draw/loss), quota-scaled
//! - +1 for the correct goal difference
//! - +3 for the exact score
//! - capped at [`MAX_POINTS`] per match
//!
//! The function is pure and total over its inputs. Settlement in the
//! runtime crate wraps it in the transactional machinery; nothing here
//! touches storage.

use crate::domain::{ScorePrediction, Tendency};

/// Maximum points a single prediction can earn on one match.
pub const MAX_POINTS: u8 = 10;

/// Lowest and highest tendency scores of the quota band.
pub const TENDENCY_MIN: u8 = 2;
pub const TENDENCY_MAX: u8 = 6;

/// Bonus for predicting the exact goal difference.
pub const GOAL_DIFF_BONUS: u8 = 1;

/// Bonus for predicting the exact score.
pub const EXACT_SCORE_BONUS: u8 = 3;

/// Settled points for one model on one match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledScore {
    pub model_id: String,
    pub home: u8,
    pub away: u8,
    pub points: u8,
}

/// Quota-scaled tendency points.
///
/// `correct_count` is how many of the `total` predictions on the match
/// called the tendency that actually occurred. Everyone right earns
/// [`TENDENCY_MIN`]; a lone correct call among many earns [`TENDENCY_MAX`].
/// Integer arithmetic keeps the result deterministic across platforms.
pub fn tendency_points(correct_count: u32, total: u32) -> u8 {
    debug_assert!(correct_count >= 1 && correct_count <= total);
    if total <= 1 {
        return TENDENCY_MIN;
    }
    let span = (TENDENCY_MAX - TENDENCY_MIN) as u32;
    let scaled = span * (total - correct_count) / (total - 1);
    TENDENCY_MIN + scaled as u8
}

/// Score every prediction on a finished match.
///
/// The quota is computed only from the predictions present at settlement
/// time. A match with a single participant still scores (the quota simply
/// bottoms out); a match with none returns an empty set and the caller
/// decides whether that is worth logging.
pub fn score_match(
    result_home: u8,
    result_away: u8,
    predictions: &[(String, ScorePrediction)],
) -> Vec<SettledScore> {
    let actual = Tendency::of(result_home, result_away);
    let actual_diff = result_home as i16 - result_away as i16;
    let total = predictions.len() as u32;

    let correct_count = predictions
        .iter()
        .filter(|(_, p)| p.tendency() == actual)
        .count() as u32;

    predictions
        .iter()
        .map(|(model_id, p)| {
            let points = if p.tendency() == actual {
                let mut pts = tendency_points(correct_count, total);
                if p.goal_difference() == actual_diff {
                    pts += GOAL_DIFF_BONUS;
                }
                if p.home == result_home && p.away == result_away {
                    pts += EXACT_SCORE_BONUS;
                }
                pts.min(MAX_POINTS)
            } else {
                0
            };
            SettledScore {
                model_id: model_id.clone(),
                home: p.home,
                away: p.away,
                points,
            }
        })
        .collect()
}
