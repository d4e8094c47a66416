//! SQLite-backed durable store.
//!
//! One database file holds matches, predictions, the model registry, the
//! job queue, circuit-breaker mirrors, and budget counters. SQLite is
//! deliberate: the pipeline is a single process, and a transactional
//! embedded store gives the settlement path its serialization guarantee
//! without operating a server.
//!
//! All queries use the runtime API (`sqlx::query` + `Row::get`) so the
//! crate builds without a live database.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use thiserror::Error;

use scoreline_core::domain::{
    Job, JobStatus, JobType, Match, MatchStatus, ModelEntry, Prediction, PredictionCost,
    PromptVariant, ProviderBackend, ResponseHandler, TimeoutClass,
};

/// Errors from the durable store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS matches (
    id           TEXT PRIMARY KEY,
    home_team    TEXT NOT NULL,
    away_team    TEXT NOT NULL,
    competition  TEXT NOT NULL,
    kickoff      TEXT NOT NULL,
    status       TEXT NOT NULL,
    home_score   INTEGER,
    away_score   INTEGER,
    settled_at   TEXT
);

CREATE TABLE IF NOT EXISTS models (
    id                    TEXT PRIMARY KEY,
    backend               TEXT NOT NULL,
    model_name            TEXT NOT NULL,
    active                INTEGER NOT NULL DEFAULT 1,
    consecutive_failures  INTEGER NOT NULL DEFAULT 0,
    last_failure_at       TEXT,
    fallback_target       TEXT,
    timeout_class         TEXT NOT NULL,
    prompt_variant        TEXT NOT NULL,
    response_handler      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS predictions (
    match_id          TEXT NOT NULL,
    model_id          TEXT NOT NULL,
    home              INTEGER NOT NULL,
    away              INTEGER NOT NULL,
    points            INTEGER,
    used_fallback     INTEGER NOT NULL DEFAULT 0,
    fallback_model    TEXT,
    prompt_tokens     INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    estimated_cost    REAL NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    PRIMARY KEY (match_id, model_id)
);

CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    job_type    TEXT NOT NULL,
    match_id    TEXT NOT NULL,
    execute_at  TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_error  TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (job_type, status, execute_at);

CREATE TABLE IF NOT EXISTS circuit_state (
    service    TEXT PRIMARY KEY,
    state      TEXT NOT NULL,
    failures   INTEGER NOT NULL DEFAULT 0,
    opened_at  TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS budget_counters (
    provider  TEXT NOT NULL,
    day       TEXT NOT NULL,
    count     INTEGER NOT NULL DEFAULT 0,
    resets_at TEXT NOT NULL,
    PRIMARY KEY (provider, day)
);

CREATE TABLE IF NOT EXISTS analysis (
    match_id   TEXT PRIMARY KEY,
    brief      TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

/// Handle to the SQLite database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database for tests. A single connection keeps every
    /// query on the same memory instance.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(StoreError::Database)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -----------------------------------------------------------------
    // Matches
    // -----------------------------------------------------------------

    pub async fn upsert_match(&self, m: &Match) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO matches (id, home_team, away_team, competition, kickoff, status, home_score, away_score)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                home_team = excluded.home_team,
                away_team = excluded.away_team,
                competition = excluded.competition,
                kickoff = excluded.kickoff,
                status = excluded.status,
                home_score = excluded.home_score,
                away_score = excluded.away_score
            "#,
        )
        .bind(&m.id)
        .bind(&m.home_team)
        .bind(&m.away_team)
        .bind(&m.competition)
        .bind(m.kickoff)
        .bind(m.status.as_str())
        .bind(m.home_score.map(i64::from))
        .bind(m.away_score.map(i64::from))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_match(&self, id: &str) -> Result<Option<Match>, StoreError> {
        let row = sqlx::query(
            "SELECT id, home_team, away_team, competition, kickoff, status, home_score, away_score
             FROM matches WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| match_from_row(&r)).transpose()
    }

    /// Record a status transition, and the final score when finishing.
    pub async fn update_match_status(
        &self,
        id: &str,
        status: MatchStatus,
        home_score: Option<u8>,
        away_score: Option<u8>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE matches SET status = ?, home_score = COALESCE(?, home_score),
             away_score = COALESCE(?, away_score) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(home_score.map(i64::from))
        .bind(away_score.map(i64::from))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every match the pipeline still owes work to (not finished or
    /// cancelled). Drives the catch-up pass on restart.
    pub async fn matches_accepting_jobs(&self) -> Result<Vec<Match>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, home_team, away_team, competition, kickoff, status, home_score, away_score
             FROM matches WHERE status NOT IN ('finished', 'cancelled') ORDER BY kickoff",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(match_from_row).collect()
    }

    pub async fn match_settled_at(&self, id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT settled_at FROM matches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<DateTime<Utc>>, _>("settled_at")))
    }

    // -----------------------------------------------------------------
    // Models
    // -----------------------------------------------------------------

    /// Seed the model registry from config. Config-owned fields are
    /// refreshed; health fields (active, failure counters) survive
    /// restarts untouched.
    pub async fn seed_models(&self, entries: &[ModelEntry]) -> Result<(), StoreError> {
        for e in entries {
            sqlx::query(
                r#"
                INSERT INTO models (id, backend, model_name, active, consecutive_failures,
                                    last_failure_at, fallback_target, timeout_class,
                                    prompt_variant, response_handler)
                VALUES (?, ?, ?, 1, 0, NULL, ?, ?, ?, ?)
                ON CONFLICT (id) DO UPDATE SET
                    backend = excluded.backend,
                    model_name = excluded.model_name,
                    fallback_target = excluded.fallback_target,
                    timeout_class = excluded.timeout_class,
                    prompt_variant = excluded.prompt_variant,
                    response_handler = excluded.response_handler
                "#,
            )
            .bind(&e.id)
            .bind(enum_to_str(&e.backend)?)
            .bind(&e.model_name)
            .bind(&e.fallback_target)
            .bind(enum_to_str(&e.timeout_class)?)
            .bind(enum_to_str(&e.prompt_variant)?)
            .bind(enum_to_str(&e.response_handler)?)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_model(&self, id: &str) -> Result<Option<ModelEntry>, StoreError> {
        let row = sqlx::query("SELECT * FROM models WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| model_from_row(&r)).transpose()
    }

    /// Models eligible for a prediction pass: every active model, plus
    /// disabled models whose cooldown has elapsed (probe candidates).
    /// The bool marks the probe.
    pub async fn eligible_models(
        &self,
        now: DateTime<Utc>,
        cooldown: chrono::Duration,
    ) -> Result<Vec<(ModelEntry, bool)>, StoreError> {
        let rows = sqlx::query("SELECT * FROM models ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::new();
        for row in &rows {
            let entry = model_from_row(row)?;
            if entry.active {
                out.push((entry, false));
            } else if let Some(failed_at) = entry.last_failure_at {
                if now - failed_at >= cooldown {
                    out.push((entry, true));
                }
            }
        }
        Ok(out)
    }

    /// Increment the consecutive-failure counter; auto-disable at the
    /// threshold. Returns true when this call disabled the model.
    pub async fn record_model_failure(
        &self,
        id: &str,
        threshold: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE models
            SET consecutive_failures = consecutive_failures + 1,
                last_failure_at = ?,
                active = CASE WHEN consecutive_failures + 1 >= ? THEN 0 ELSE active END
            WHERE id = ?
            RETURNING active, consecutive_failures
            "#,
        )
        .bind(now)
        .bind(i64::from(threshold))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(false);
        };
        let active: i64 = row.get("active");
        let failures: i64 = row.get("consecutive_failures");
        let just_disabled = active == 0 && failures == i64::from(threshold);
        if just_disabled {
            tracing::warn!(model = id, failures, "model auto-disabled after repeated failures");
        }
        Ok(just_disabled)
    }

    /// Reset the failure counter and re-enable the model.
    pub async fn record_model_success(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE models SET consecutive_failures = 0, last_failure_at = NULL,
             active = 1 WHERE id = ? AND active = 0",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        let reenabled = result.rows_affected() > 0;
        if !reenabled {
            sqlx::query(
                "UPDATE models SET consecutive_failures = 0, last_failure_at = NULL WHERE id = ?",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(reenabled)
    }

    pub async fn set_model_active(&self, id: &str, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE models SET active = ? WHERE id = ? AND active != ?")
            .bind(i64::from(active))
            .bind(id)
            .bind(i64::from(active))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------
    // Predictions
    // -----------------------------------------------------------------

    /// Upsert a prediction. The (match, model) primary key makes repeated
    /// job executions collapse into one row instead of duplicating.
    pub async fn upsert_prediction(&self, p: &Prediction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO predictions (match_id, model_id, home, away, points, used_fallback,
                                     fallback_model, prompt_tokens, completion_tokens,
                                     estimated_cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (match_id, model_id) DO UPDATE SET
                home = excluded.home,
                away = excluded.away,
                used_fallback = excluded.used_fallback,
                fallback_model = excluded.fallback_model,
                prompt_tokens = excluded.prompt_tokens,
                completion_tokens = excluded.completion_tokens,
                estimated_cost = excluded.estimated_cost
            "#,
        )
        .bind(&p.match_id)
        .bind(&p.model_id)
        .bind(i64::from(p.home))
        .bind(i64::from(p.away))
        .bind(p.points.map(i64::from))
        .bind(i64::from(p.used_fallback))
        .bind(&p.fallback_model)
        .bind(i64::from(p.cost.prompt_tokens))
        .bind(i64::from(p.cost.completion_tokens))
        .bind(p.cost.estimated_cost)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn predictions_for_match(
        &self,
        match_id: &str,
    ) -> Result<Vec<Prediction>, StoreError> {
        let rows = sqlx::query("SELECT * FROM predictions WHERE match_id = ? ORDER BY model_id")
            .bind(match_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(prediction_from_row).collect()
    }

    // -----------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------

    /// Enqueue a job under its derived id. Returns false when the id
    /// already exists, which is the idempotent no-op path.
    pub async fn enqueue_job(
        &self,
        id: &str,
        job_type: JobType,
        match_id: &str,
        execute_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO jobs (id, job_type, match_id, execute_at, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(id)
        .bind(job_type.as_str())
        .bind(match_id)
        .bind(execute_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn due_jobs(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM jobs WHERE job_type = ? AND status = 'pending' AND execute_at <= ?
             ORDER BY execute_at LIMIT ?",
        )
        .bind(job_type.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(job_from_row).collect()
    }

    /// Claim a pending job. The conditional update makes the claim
    /// single-winner under at-least-once delivery: the second worker
    /// sees zero rows affected and walks away.
    pub async fn claim_job(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'running', updated_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn complete_job(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET status = 'done', updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a job failure. Under the retry budget the job returns to
    /// `failed` with a future execute_at; past it, the job is dead.
    pub async fn fail_job(
        &self,
        id: &str,
        error: &str,
        retry_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Result<JobStatus, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET retry_count = retry_count + 1,
                last_error = ?,
                execute_at = ?,
                status = CASE WHEN retry_count + 1 > ? THEN 'dead' ELSE 'failed' END,
                updated_at = ?
            WHERE id = ?
            RETURNING status
            "#,
        )
        .bind(error)
        .bind(retry_at)
        .bind(i64::from(max_retries))
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let status: String = row.get("status");
        JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{status}'")))
    }

    /// Return a failed job to the pending queue for immediate execution.
    ///
    /// Accepts jobs from both the live failed set and the dead-letter set
    /// so the admin surface needs no knowledge of which one holds the id.
    pub async fn retry_job(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', execute_at = ?, updated_at = ?
             WHERE id = ? AND status IN ('failed', 'dead')",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Failed jobs become due again once their backoff delay expires.
    pub async fn revive_failed_jobs(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'pending', updated_at = ?
             WHERE status = 'failed' AND execute_at <= ?",
        )
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    pub async fn job_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
            .collect())
    }

    // -----------------------------------------------------------------
    // Circuit mirror
    // -----------------------------------------------------------------

    pub async fn load_circuit(
        &self,
        service: &str,
    ) -> Result<Option<(String, u32, Option<DateTime<Utc>>)>, StoreError> {
        let row = sqlx::query("SELECT state, failures, opened_at FROM circuit_state WHERE service = ?")
            .bind(service)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            (
                r.get::<String, _>("state"),
                r.get::<i64, _>("failures") as u32,
                r.get::<Option<DateTime<Utc>>, _>("opened_at"),
            )
        }))
    }

    pub async fn save_circuit(
        &self,
        service: &str,
        state: &str,
        failures: u32,
        opened_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO circuit_state (service, state, failures, opened_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (service) DO UPDATE SET
                state = excluded.state,
                failures = excluded.failures,
                opened_at = excluded.opened_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(service)
        .bind(state)
        .bind(i64::from(failures))
        .bind(opened_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Budget counters
    // -----------------------------------------------------------------

    /// Atomic post-increment of the (provider, day) counter. `resets_at`
    /// is written only by the first increment of the day; the row simply
    /// stops being read once the UTC date rolls over.
    pub async fn increment_budget(
        &self,
        provider: &str,
        day: &str,
        resets_at: DateTime<Utc>,
    ) -> Result<(u32, DateTime<Utc>), StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO budget_counters (provider, day, count, resets_at)
            VALUES (?, ?, 1, ?)
            ON CONFLICT (provider, day) DO UPDATE SET count = count + 1
            RETURNING count, resets_at
            "#,
        )
        .bind(provider)
        .bind(day)
        .bind(resets_at)
        .fetch_one(&self.pool)
        .await?;
        Ok((
            row.get::<i64, _>("count") as u32,
            row.get::<DateTime<Utc>, _>("resets_at"),
        ))
    }

    pub async fn budget_used(&self, provider: &str, day: &str) -> Result<u32, StoreError> {
        let row = sqlx::query("SELECT count FROM budget_counters WHERE provider = ? AND day = ?")
            .bind(provider)
            .bind(day)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("count") as u32).unwrap_or(0))
    }

    // -----------------------------------------------------------------
    // Analysis briefs
    // -----------------------------------------------------------------

    pub async fn save_analysis(&self, match_id: &str, brief: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO analysis (match_id, brief, created_at) VALUES (?, ?, ?)
             ON CONFLICT (match_id) DO UPDATE SET brief = excluded.brief",
        )
        .bind(match_id)
        .bind(brief)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_analysis(&self, match_id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT brief FROM analysis WHERE match_id = ?")
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("brief")))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn match_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Match, StoreError> {
    let status: String = row.get("status");
    Ok(Match {
        id: row.get("id"),
        home_team: row.get("home_team"),
        away_team: row.get("away_team"),
        competition: row.get("competition"),
        kickoff: row.get("kickoff"),
        status: MatchStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown match status '{status}'")))?,
        home_score: row.get::<Option<i64>, _>("home_score").map(|v| v as u8),
        away_score: row.get::<Option<i64>, _>("away_score").map(|v| v as u8),
    })
}

fn model_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ModelEntry, StoreError> {
    Ok(ModelEntry {
        id: row.get("id"),
        backend: str_to_enum(&row.get::<String, _>("backend"))?,
        model_name: row.get("model_name"),
        active: row.get::<i64, _>("active") != 0,
        consecutive_failures: row.get::<i64, _>("consecutive_failures") as u32,
        last_failure_at: row.get("last_failure_at"),
        fallback_target: row.get("fallback_target"),
        timeout_class: str_to_enum(&row.get::<String, _>("timeout_class"))?,
        prompt_variant: str_to_enum(&row.get::<String, _>("prompt_variant"))?,
        response_handler: str_to_enum(&row.get::<String, _>("response_handler"))?,
    })
}

fn prediction_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Prediction, StoreError> {
    Ok(Prediction {
        match_id: row.get("match_id"),
        model_id: row.get("model_id"),
        home: row.get::<i64, _>("home") as u8,
        away: row.get::<i64, _>("away") as u8,
        points: row.get::<Option<i64>, _>("points").map(|v| v as u8),
        used_fallback: row.get::<i64, _>("used_fallback") != 0,
        fallback_model: row.get("fallback_model"),
        cost: PredictionCost {
            prompt_tokens: row.get::<i64, _>("prompt_tokens") as u32,
            completion_tokens: row.get::<i64, _>("completion_tokens") as u32,
            estimated_cost: row.get("estimated_cost"),
        },
    })
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Job, StoreError> {
    let job_type: String = row.get("job_type");
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        job_type: JobType::parse(&job_type)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job type '{job_type}'")))?,
        match_id: row.get("match_id"),
        execute_at: row.get("execute_at"),
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown job status '{status}'")))?,
        retry_count: row.get::<i64, _>("retry_count") as u32,
        last_error: row.get("last_error"),
    })
}

/// Serialize a serde-tagged enum to its wire string (e.g. "anthropic").
fn enum_to_str<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        other => Err(StoreError::Corrupt(format!(
            "enum did not serialize to a string: {other:?}"
        ))),
    }
}

fn str_to_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| StoreError::Corrupt(format!("'{s}': {e}")))
}
