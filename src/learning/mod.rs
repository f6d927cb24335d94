//! The Learning Layer's persistent outcome stores (§3, §4.7 step 1, §4.9
//! step 4): strategy metrics and routing/prompt-variant history, all
//! backed by [`crate::stores::JsonFileStore`] whole-file JSON documents.
//!
//! Grounded on the teacher's repository-port pattern generalized to plain
//! JSON documents (see `crate::stores`), with the neutral-prior-on-no-data
//! idiom (`0.5` success rate, `0.0` trend) applied consistently the way
//! `priority_calculator.rs` defaults unknown inputs to a neutral score
//! rather than special-casing callers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-strategy-name outcome counters (§3 `StrategyMetrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyMetrics {
    pub success_count: u32,
    pub failure_count: u32,
    pub total_time_ms: u64,
    pub last_used: chrono::DateTime<chrono::Utc>,
    pub task_type_counts: HashMap<String, u32>,
}

impl Default for StrategyMetrics {
    fn default() -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            total_time_ms: 0,
            last_used: chrono::Utc::now(),
            task_type_counts: HashMap::new(),
        }
    }
}

impl StrategyMetrics {
    /// `successes / (successes + failures)`, or `0.5` (neutral prior) when
    /// nothing has been recorded yet.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.success_count) / f64::from(total)
        }
    }

    #[must_use]
    pub fn avg_duration_ms(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.0
        } else {
            self.total_time_ms as f64 / f64::from(total)
        }
    }

    pub fn record(&mut self, task_type: &str, success: bool, duration_ms: u64) {
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.total_time_ms += duration_ms;
        self.last_used = chrono::Utc::now();
        *self.task_type_counts.entry(task_type.to_string()).or_insert(0) += 1;
    }
}

/// The whole-document shape persisted at
/// `<storage_dir>/memory/strategy_metrics.json`: one [`StrategyMetrics`]
/// per named strategy.
pub type StrategyMetricsDocument = HashMap<String, StrategyMetrics>;

/// Thin convenience wrapper over a `JsonFileStore<StrategyMetricsDocument>`
/// with the read/record operations the Router and Tree Planner need.
pub struct StrategyStore {
    inner: crate::stores::JsonFileStore<StrategyMetricsDocument>,
}

impl StrategyStore {
    pub async fn open(path: impl Into<std::path::PathBuf>) -> crate::stores::StoreResult<Self> {
        Ok(Self {
            inner: crate::stores::JsonFileStore::open(path).await?,
        })
    }

    pub async fn metrics_for(&self, strategy: &str) -> StrategyMetrics {
        self.inner.get().await.get(strategy).cloned().unwrap_or_default()
    }

    pub async fn record_outcome(
        &self,
        strategy: &str,
        task_type: &str,
        success: bool,
        duration_ms: u64,
    ) -> crate::stores::StoreResult<()> {
        self.inner
            .mutate(|doc| {
                doc.entry(strategy.to_string())
                    .or_default()
                    .record(task_type, success, duration_ms);
            })
            .await
    }

    /// The strategy with the highest success rate among those that have
    /// handled `task_type` at least once, or `None` if no strategy has any
    /// history for it.
    pub async fn recommended_strategy_for(&self, task_type: &str) -> Option<String> {
        let doc = self.inner.get().await;
        doc.iter()
            .filter(|(_, metrics)| metrics.task_type_counts.contains_key(task_type))
            .max_by(|(_, a), (_, b)| a.success_rate().partial_cmp(&b.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(name, _)| name.clone())
    }
}
