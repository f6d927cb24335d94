//! Hierarchical configuration for the orchestration core.
//!
//! Loading precedence (lowest to highest), mirroring the teacher's own
//! `ConfigLoader`: programmatic defaults, then `.overmind/config.yaml`, then
//! `.overmind/local.yaml`, then `OVERMIND_`-prefixed environment variables.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `coordinator.max_parallel` was zero.
    #[error("max_parallel must be at least 1")]
    InvalidMaxParallel,

    /// `agent_loop.max_turn_limit` exceeded the hard cap or was zero.
    #[error("max_turn_limit must be between 1 and {0}")]
    InvalidMaxTurnLimit(u32),

    /// `agent_loop.max_history_size` exceeded the hard cap or was zero.
    #[error("max_history_size must be between 1 and {0}")]
    InvalidMaxHistorySize(usize),

    /// `shared_memory.max_entries` was zero.
    #[error("shared_memory.max_entries must be at least 1")]
    InvalidMaxSharedEntries,

    /// `delegation.max_depth` exceeded the hard cap.
    #[error("delegation.max_depth must be between 1 and {0}")]
    InvalidMaxDelegationDepth(u32),

    /// Router's decompose threshold fell outside the 1-10 complexity scale.
    #[error("router.decompose_threshold must be between 1 and 10")]
    InvalidDecomposeThreshold,

    #[error("configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Hard ceilings named throughout §5 — never configurable above these.
pub mod bounds {
    /// Hard cap on agent history length regardless of configured size.
    pub const MAX_HISTORY_SIZE_HARD: usize = 200;
    /// Hard cap on turns per agent run regardless of configured `maxTurns`.
    pub const MAX_TURN_LIMIT_HARD: u32 = 100;
    /// Hard cap on delegation chain depth.
    pub const MAX_DELEGATION_DEPTH_HARD: u32 = 5;
    /// Hard cap on live shared-memory entries.
    pub const MAX_SHARED_ENTRIES_HARD: usize = 500;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentLoopConfig {
    pub max_history_size: usize,
    pub max_turn_limit: u32,
    pub checkpoint_interval: u32,
    pub token_warning_ratio: f64,
    pub summarize_to_ratio: f64,
    pub tool_result_max_chars: usize,
    pub mental_loop_threshold: u32,
    pub mental_loop_bonus_turns: u32,
    pub tool_retry_max_attempts: u32,
    pub tool_retry_initial_backoff_ms: u64,
    pub parallel_tool_cap: usize,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_history_size: bounds::MAX_HISTORY_SIZE_HARD,
            max_turn_limit: bounds::MAX_TURN_LIMIT_HARD,
            checkpoint_interval: 10,
            token_warning_ratio: 0.8,
            summarize_to_ratio: 0.5,
            tool_result_max_chars: 10_000,
            mental_loop_threshold: 3,
            mental_loop_bonus_turns: 3,
            tool_retry_max_attempts: 3,
            tool_retry_initial_backoff_ms: 1_000,
            parallel_tool_cap: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedMemoryConfig {
    pub max_entries: usize,
    pub subscriber_channel_capacity: usize,
    pub eviction_fraction: f64,
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: bounds::MAX_SHARED_ENTRIES_HARD,
            subscriber_channel_capacity: 100,
            eviction_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegationConfig {
    pub max_depth: u32,
    pub stuck_threshold: u32,
    pub suppression_cooldown_secs: u64,
    pub timeout_secs: u64,
    pub min_samples_for_confidence: usize,
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            max_depth: bounds::MAX_DELEGATION_DEPTH_HARD,
            stuck_threshold: 5,
            suppression_cooldown_secs: 300,
            timeout_secs: 180,
            min_samples_for_confidence: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlannerAlgorithm {
    Beam,
    Mcts,
    AStar,
}

impl Default for PlannerAlgorithm {
    fn default() -> Self {
        Self::Beam
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreePlannerConfig {
    pub algorithm: PlannerAlgorithm,
    pub beam_width: usize,
    pub mcts_iterations: u32,
    pub max_replans: u32,
    pub max_tree_nodes: usize,
    pub min_samples_for_confidence: usize,
    pub weight_success_prob: f64,
    pub weight_cost: f64,
    pub weight_progress: f64,
    pub depth_penalty: f64,
}

impl Default for TreePlannerConfig {
    fn default() -> Self {
        Self {
            algorithm: PlannerAlgorithm::Beam,
            beam_width: 5,
            mcts_iterations: 100,
            max_replans: 3,
            max_tree_nodes: 500,
            min_samples_for_confidence: 5,
            weight_success_prob: 0.4,
            weight_cost: 0.3,
            weight_progress: 0.3,
            depth_penalty: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_parallel: usize,
    pub tick_interval_ms: u64,
    pub wait_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            tick_interval_ms: 100,
            wait_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub decompose_threshold: u8,
    pub max_decomposed_subtasks: usize,
    pub decomposition_parallel_cap: usize,
    pub error_rate_upgrade_threshold: f64,
    pub history_window: usize,
    pub min_samples_for_override: usize,
    pub low_success_rate_threshold: f64,
    pub fast_model: String,
    pub default_model: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            decompose_threshold: 4,
            max_decomposed_subtasks: 10,
            decomposition_parallel_cap: 5,
            error_rate_upgrade_threshold: 0.3,
            history_window: 100,
            min_samples_for_override: 3,
            low_success_rate_threshold: 0.3,
            fast_model: "claude-3-5-haiku-20241022".to_string(),
            default_model: "claude-3-5-sonnet-20241022".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key_env: String,
    pub base_url: String,
    pub rate_limit_rps: f64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    pub planning_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            rate_limit_rps: 10.0,
            max_retries: 3,
            initial_backoff_ms: 10_000,
            max_backoff_ms: 300_000,
            timeout_secs: 300,
            planning_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for all persistent-store JSON files
    /// (`<storage_dir>/agents/...`, `<storage_dir>/memory/...`).
    pub storage_dir: String,
    pub checkpoints_retained_per_agent: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_dir: ".overmind".to_string(),
            checkpoints_retained_per_agent: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub agent_loop: AgentLoopConfig,
    pub shared_memory: SharedMemoryConfig,
    pub delegation: DelegationConfig,
    pub tree_planner: TreePlannerConfig,
    pub coordinator: CoordinatorConfig,
    pub router: RouterConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub log_level: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent_loop: AgentLoopConfig::default(),
            shared_memory: SharedMemoryConfig::default(),
            delegation: DelegationConfig::default(),
            tree_planner: TreePlannerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            router: RouterConfig::default(),
            llm: LlmConfig::default(),
            storage: StorageConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Loads and validates [`OrchestratorConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults.
    /// 2. `.overmind/config.yaml` (project config).
    /// 3. `.overmind/local.yaml` (optional project-local override).
    /// 4. `OVERMIND_`-prefixed environment variables.
    pub fn load() -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(".overmind/config.yaml"))
            .merge(Yaml::file(".overmind/local.yaml"))
            .merge(Env::prefixed("OVERMIND_").split("__"))
            .extract()
            .context("failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific YAML file, skipping project/env
    /// layers. Used by tests and by the CLI's `--config` override.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<OrchestratorConfig> {
        let config: OrchestratorConfig = Figment::new()
            .merge(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &OrchestratorConfig) -> Result<(), ConfigError> {
        if config.coordinator.max_parallel == 0 {
            return Err(ConfigError::InvalidMaxParallel);
        }
        if config.agent_loop.max_turn_limit == 0
            || config.agent_loop.max_turn_limit > bounds::MAX_TURN_LIMIT_HARD
        {
            return Err(ConfigError::InvalidMaxTurnLimit(bounds::MAX_TURN_LIMIT_HARD));
        }
        if config.agent_loop.max_history_size == 0
            || config.agent_loop.max_history_size > bounds::MAX_HISTORY_SIZE_HARD
        {
            return Err(ConfigError::InvalidMaxHistorySize(
                bounds::MAX_HISTORY_SIZE_HARD,
            ));
        }
        if config.shared_memory.max_entries == 0 {
            return Err(ConfigError::InvalidMaxSharedEntries);
        }
        if config.delegation.max_depth == 0
            || config.delegation.max_depth > bounds::MAX_DELEGATION_DEPTH_HARD
        {
            return Err(ConfigError::InvalidMaxDelegationDepth(
                bounds::MAX_DELEGATION_DEPTH_HARD,
            ));
        }
        if config.router.decompose_threshold == 0 || config.router.decompose_threshold > 10 {
            return Err(ConfigError::InvalidDecomposeThreshold);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = OrchestratorConfig::default();
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn rejects_zero_max_parallel() {
        let mut config = OrchestratorConfig::default();
        config.coordinator.max_parallel = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxParallel)
        ));
    }

    #[test]
    fn rejects_turn_limit_above_hard_cap() {
        let mut config = OrchestratorConfig::default();
        config.agent_loop.max_turn_limit = bounds::MAX_TURN_LIMIT_HARD + 1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxTurnLimit(_))
        ));
    }

    #[test]
    fn rejects_history_size_above_hard_cap() {
        let mut config = OrchestratorConfig::default();
        config.agent_loop.max_history_size = bounds::MAX_HISTORY_SIZE_HARD + 1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxHistorySize(_))
        ));
    }

    #[test]
    fn rejects_delegation_depth_above_hard_cap() {
        let mut config = OrchestratorConfig::default();
        config.delegation.max_depth = bounds::MAX_DELEGATION_DEPTH_HARD + 1;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxDelegationDepth(_))
        ));
    }

    #[test]
    fn rejects_decompose_threshold_out_of_range() {
        let mut config = OrchestratorConfig::default();
        config.router.decompose_threshold = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDecomposeThreshold)
        ));
        config.router.decompose_threshold = 11;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidDecomposeThreshold)
        ));
    }

    #[test]
    fn load_from_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "coordinator:\n  max_parallel: 7\n").unwrap();
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.coordinator.max_parallel, 7);
        assert_eq!(config.agent_loop.max_turn_limit, bounds::MAX_TURN_LIMIT_HARD);
    }
}
