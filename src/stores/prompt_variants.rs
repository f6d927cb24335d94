//! Prompt-variant storage: `<configDir>/memory/prompt_variants.json` (§6
//! persistent file layout).
//!
//! The Learning Layer tracks more than strategy and delegation outcomes —
//! it also lets the host vary an agent type's system-prompt wording and
//! learn which variant performs best, the same neutral-prior-until-data
//! idiom as [`crate::learning::StrategyMetrics`] applied to prompt text
//! instead of strategy names.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::json_file::JsonFileStore;
use super::StoreResult;

/// One candidate system-prompt template for an agent type, with its
/// tracked outcome counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVariant {
    pub id: String,
    pub template: String,
    pub success_count: u32,
    pub failure_count: u32,
}

impl PromptVariant {
    fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            template: template.into(),
            success_count: 0,
            failure_count: 0,
        }
    }

    /// `successes / (successes + failures)`, or `0.5` (neutral prior) with
    /// no recorded outcomes yet, matching [`crate::learning::StrategyMetrics::
    /// success_rate`].
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            f64::from(self.success_count) / f64::from(total)
        }
    }
}

type PromptVariantsDocument = HashMap<String, Vec<PromptVariant>>;

/// Whole-file JSON store of prompt variants, keyed by agent type.
pub struct PromptVariantStore {
    inner: JsonFileStore<PromptVariantsDocument>,
}

impl PromptVariantStore {
    pub async fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Ok(Self {
            inner: JsonFileStore::open(path).await?,
        })
    }

    /// Add `template` as a new variant for `agent_type` under `id`, unless
    /// that id is already registered.
    pub async fn register_variant(&self, agent_type: &str, id: &str, template: &str) -> StoreResult<()> {
        self.inner
            .mutate(|doc| {
                let variants = doc.entry(agent_type.to_string()).or_default();
                if !variants.iter().any(|v| v.id == id) {
                    variants.push(PromptVariant::new(id, template));
                }
            })
            .await
    }

    /// The highest-success-rate variant registered for `agent_type`, or
    /// `None` if it has none.
    pub async fn best_variant_for(&self, agent_type: &str) -> Option<PromptVariant> {
        let doc = self.inner.get().await;
        doc.get(agent_type)?
            .iter()
            .max_by(|a, b| a.success_rate().partial_cmp(&b.success_rate()).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
    }

    /// Record an outcome for `(agent_type, variant_id)`. A no-op if that
    /// variant was never registered.
    pub async fn record_outcome(&self, agent_type: &str, variant_id: &str, success: bool) -> StoreResult<()> {
        self.inner
            .mutate(|doc| {
                if let Some(variant) = doc.get_mut(agent_type).and_then(|vs| vs.iter_mut().find(|v| v.id == variant_id)) {
                    if success {
                        variant.success_count += 1;
                    } else {
                        variant.failure_count += 1;
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn best_variant_favors_higher_success_rate() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptVariantStore::open(dir.path().join("prompt_variants.json")).await.unwrap();
        store.register_variant("general", "terse", "Be terse.").await.unwrap();
        store.register_variant("general", "verbose", "Explain your reasoning step by step.").await.unwrap();

        for _ in 0..4 {
            store.record_outcome("general", "terse", true).await.unwrap();
        }
        store.record_outcome("general", "verbose", false).await.unwrap();

        let best = store.best_variant_for("general").await.unwrap();
        assert_eq!(best.id, "terse");
    }

    #[tokio::test]
    async fn register_variant_is_idempotent_per_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptVariantStore::open(dir.path().join("prompt_variants.json")).await.unwrap();
        store.register_variant("general", "a", "first").await.unwrap();
        store.register_variant("general", "a", "second").await.unwrap();
        let doc = store.inner.get().await;
        assert_eq!(doc.get("general").unwrap().len(), 1);
        assert_eq!(doc.get("general").unwrap()[0].template, "first");
    }

    #[tokio::test]
    async fn unknown_agent_type_has_no_best_variant() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptVariantStore::open(dir.path().join("prompt_variants.json")).await.unwrap();
        assert!(store.best_variant_for("nonexistent").await.is_none());
    }
}
