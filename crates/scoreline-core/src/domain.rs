//! Domain types shared across the prediction pipeline.
//!
//! Everything here is plain data: no I/O, no async. The runtime crate owns
//! persistence and wire formats; this module owns the invariants that must
//! hold regardless of where the data came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound for a single side of a sane football scoreline.
///
/// Predictions outside `0..=MAX_SCORE` are rejected outright, never clamped.
pub const MAX_SCORE: u8 = 20;

/// Lifecycle status of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
    Postponed,
    Cancelled,
}

impl MatchStatus {
    /// Whether the pipeline should still schedule or run jobs for a match.
    ///
    /// Postponed matches stay eligible: they can be rescheduled, and a
    /// catch-up pass after downtime must not lose them. Only finished and
    /// cancelled matches are excluded. Gating on kickoff time instead of
    /// status would make catch-up after an outage silently skip matches.
    pub fn accepts_jobs(self) -> bool {
        !matches!(self, MatchStatus::Finished | MatchStatus::Cancelled)
    }

    /// Status transitions are monotonic except that postponed and cancelled
    /// matches may be rescheduled.
    pub fn can_transition_to(self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Scheduled, Live | Finished | Postponed | Cancelled) => true,
            (Live, Finished | Postponed | Cancelled) => true,
            // Terminal-but-reschedulable
            (Postponed | Cancelled, Scheduled) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Live => "live",
            MatchStatus::Finished => "finished",
            MatchStatus::Postponed => "postponed",
            MatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(MatchStatus::Scheduled),
            "live" => Some(MatchStatus::Live),
            "finished" => Some(MatchStatus::Finished),
            "postponed" => Some(MatchStatus::Postponed),
            "cancelled" => Some(MatchStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A football match as seen by the pipeline.
///
/// Owned by fixture ingestion; the pipeline only transitions `status` and,
/// on finish, records the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    pub home_team: String,
    pub away_team: String,
    pub competition: String,
    pub kickoff: DateTime<Utc>,
    pub status: MatchStatus,
    pub home_score: Option<u8>,
    pub away_score: Option<u8>,
}

/// Result tendency of a scoreline: home win, draw, or away win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tendency {
    Home,
    Draw,
    Away,
}

impl Tendency {
    pub fn of(home: u8, away: u8) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => Tendency::Home,
            std::cmp::Ordering::Equal => Tendency::Draw,
            std::cmp::Ordering::Less => Tendency::Away,
        }
    }
}

/// A single validated score prediction extracted from provider output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScorePrediction {
    pub match_id: String,
    pub home: u8,
    pub away: u8,
}

impl ScorePrediction {
    pub fn tendency(&self) -> Tendency {
        Tendency::of(self.home, self.away)
    }

    pub fn goal_difference(&self) -> i16 {
        self.home as i16 - self.away as i16
    }
}

/// Which HTTP backend serves a model.
///
/// A closed set: new backends are added here, not discovered at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderBackend {
    Anthropic,
    #[serde(rename = "openai-compatible")]
    OpenAiCompatible,
}

/// Latency class of a model. Reasoning models stream an internal
/// chain-of-thought before answering and need materially longer deadlines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutClass {
    #[default]
    Standard,
    Reasoning,
}

/// Prompt variant selected per model quirk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptVariant {
    #[default]
    Plain,
    /// Some models drift into their training-majority language.
    LanguageEnforced,
    /// Some models wrap JSON in prose unless told twice.
    JsonEmphasis,
    /// Small models do better with a stripped-down prompt.
    Minimal,
}

/// How raw provider output is pre-processed before parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseHandler {
    #[default]
    PassThrough,
    /// Remove `<think>…</think>`-style blocks emitted by reasoning models.
    StripReasoningTags,
    /// The payload is a JSON fragment buried in prose.
    ExtractEmbeddedJson,
}

/// A registered prediction model.
///
/// `active = false` excludes the model from new prediction jobs but keeps
/// its historical predictions on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub backend: ProviderBackend,
    pub model_name: String,
    pub active: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub fallback_target: Option<String>,
    #[serde(default)]
    pub timeout_class: TimeoutClass,
    #[serde(default)]
    pub prompt_variant: PromptVariant,
    #[serde(default)]
    pub response_handler: ResponseHandler,
}

/// Token and cost accounting for one provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionCost {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub estimated_cost: f64,
}

impl PredictionCost {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A stored prediction. At most one row exists per (match, model) pair;
/// writes are upserts, and `points` is written exactly once by settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub match_id: String,
    pub model_id: String,
    pub home: u8,
    pub away: u8,
    pub points: Option<u8>,
    pub used_fallback: bool,
    pub fallback_model: Option<String>,
    #[serde(default)]
    pub cost: PredictionCost,
}

/// Pipeline job categories, each with its own worker pool and queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    Analysis,
    Predictions,
    LiveMonitor,
    Settlement,
    Backfill,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::Analysis => "analysis",
            JobType::Predictions => "predictions",
            JobType::LiveMonitor => "live-monitor",
            JobType::Settlement => "settlement",
            JobType::Backfill => "backfill",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "analysis" => Some(JobType::Analysis),
            "predictions" => Some(JobType::Predictions),
            "live-monitor" => Some(JobType::LiveMonitor),
            "settlement" => Some(JobType::Settlement),
            "backfill" => Some(JobType::Backfill),
            _ => None,
        }
    }

    pub const ALL: [JobType; 5] = [
        JobType::Analysis,
        JobType::Predictions,
        JobType::LiveMonitor,
        JobType::Settlement,
        JobType::Backfill,
    ];
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the idempotent queue id for a job.
///
/// The id is a pure function of its inputs, so re-enqueueing after a crash
/// or a duplicate scheduling pass collides with the original row instead of
/// producing a second execution.
pub fn job_id(job_type: JobType, match_id: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) => format!("{}:{}:{}", job_type.as_str(), match_id, s),
        None => format!("{}:{}", job_type.as_str(), match_id),
    }
}

/// Queue status of a job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    Dead,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            "dead" => Some(JobStatus::Dead),
            _ => None,
        }
    }
}

/// A job queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: JobType,
    pub match_id: String,
    pub execute_at: DateTime<Utc>,
    pub status: JobStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tendency_of_scoreline() {
        assert_eq!(Tendency::of(2, 1), Tendency::Home);
        assert_eq!(Tendency::of(1, 1), Tendency::Draw);
        assert_eq!(Tendency::of(0, 3), Tendency::Away);
    }

    #[test]
    fn test_job_id_is_deterministic() {
        assert_eq!(job_id(JobType::Predictions, "m-42", None), "predictions:m-42");
        assert_eq!(
            job_id(JobType::Predictions, "m-42", Some("retry")),
            "predictions:m-42:retry"
        );
        // Same inputs, same id: the dedup key for the queue.
        assert_eq!(
            job_id(JobType::Settlement, "m-42", None),
            job_id(JobType::Settlement, "m-42", None)
        );
    }

    #[test]
    fn test_status_gates_jobs_not_kickoff() {
        assert!(MatchStatus::Scheduled.accepts_jobs());
        assert!(MatchStatus::Live.accepts_jobs());
        assert!(MatchStatus::Postponed.accepts_jobs());
        assert!(!MatchStatus::Finished.accepts_jobs());
        assert!(!MatchStatus::Cancelled.accepts_jobs());
    }

    #[test]
    fn test_status_transitions() {
        assert!(MatchStatus::Scheduled.can_transition_to(MatchStatus::Live));
        assert!(MatchStatus::Live.can_transition_to(MatchStatus::Finished));
        assert!(!MatchStatus::Finished.can_transition_to(MatchStatus::Live));
        // Postponed matches can be rescheduled.
        assert!(MatchStatus::Postponed.can_transition_to(MatchStatus::Scheduled));
        assert!(!MatchStatus::Finished.can_transition_to(MatchStatus::Scheduled));
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            MatchStatus::Scheduled,
            MatchStatus::Live,
            MatchStatus::Finished,
            MatchStatus::Postponed,
            MatchStatus::Cancelled,
        ] {
            assert_eq!(MatchStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(MatchStatus::parse("abandoned"), None);
    }
}
