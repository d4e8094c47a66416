//! Per-provider daily request budgets.
//!
//! Each provider gets a daily request quota keyed by (provider, UTC date).
//! The counter is a single atomic UPSERT: insert-or-increment, then judge
//! the post-increment value against the limit. A new UTC date keys a
//! fresh row, so the reset at midnight is structural; there is no
//! cleanup job to forget to run.
//!
//! When the counter store is unreachable the enforcer fails open: a
//! missed quota check is cheaper than a missed matchday. The circuit
//! breaker makes the opposite choice for its own reasons; see DESIGN.md.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::config::BudgetConfig;
use crate::store::Store;

/// Outcome of a granted budget check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetReceipt {
    pub used: u32,
    pub limit: u32,
    pub resets_at: DateTime<Utc>,
}

/// A rejected budget check.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error("daily budget exceeded for {provider}: {used}/{limit}, resets at {resets_at}")]
    Exceeded {
        provider: String,
        used: u32,
        limit: u32,
        resets_at: DateTime<Utc>,
    },
}

/// Daily request-quota enforcer.
pub struct BudgetEnforcer {
    store: Arc<Store>,
    config: BudgetConfig,
}

impl BudgetEnforcer {
    pub fn new(store: Arc<Store>, config: BudgetConfig) -> Self {
        Self { store, config }
    }

    /// Count this request against the provider's daily quota.
    ///
    /// The increment happens first and the verdict is read off the
    /// post-increment count, so two racing calls at the limit cannot both
    /// slip through. A rejected call has still consumed its slot; the
    /// counter is monotone within the day by design.
    pub async fn check_and_increment(
        &self,
        provider: &str,
    ) -> Result<BudgetReceipt, BudgetError> {
        self.check_at(provider, Utc::now()).await
    }

    /// Clock-injected variant for tests.
    pub async fn check_at(
        &self,
        provider: &str,
        now: DateTime<Utc>,
    ) -> Result<BudgetReceipt, BudgetError> {
        let limit = self.config.daily_limit(provider);
        let day = now.format("%Y-%m-%d").to_string();
        let resets_at = next_utc_midnight(now);

        let (used, resets_at) = match self.store.increment_budget(provider, &day, resets_at).await
        {
            Ok(row) => row,
            Err(e) => {
                // Fail open: availability of the prediction flow outweighs
                // strict quota enforcement during a store outage.
                tracing::warn!(
                    provider,
                    error = %e,
                    "budget store unavailable, failing open in degraded mode"
                );
                return Ok(BudgetReceipt {
                    used: 0,
                    limit,
                    resets_at,
                });
            }
        };

        if used > limit {
            return Err(BudgetError::Exceeded {
                provider: provider.to_string(),
                used,
                limit,
                resets_at,
            });
        }

        Ok(BudgetReceipt {
            used,
            limit,
            resets_at,
        })
    }

    /// Requests used so far today, for status reporting.
    pub async fn used_today(&self, provider: &str) -> u32 {
        let day = Utc::now().format("%Y-%m-%d").to_string();
        self.store.budget_used(provider, &day).await.unwrap_or(0)
    }

    pub fn limit(&self, provider: &str) -> u32 {
        self.config.daily_limit(provider)
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .unwrap();
    today + ChronoDuration::days(1)
}
