//! Overmind CLI entry point.
//!
//! A thin `clap` front end: load config, init logging, wire the nine
//! orchestration components, then route and run one task end to end.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use overmind::agent_loop::{AgentLoop, AgentLoopContext, AgentLoopDeps};
use overmind::config::{ConfigLoader, OrchestratorConfig};
use overmind::coordinator::Coordinator;
use overmind::delegation::DelegationStrategy;
use overmind::domain::agent::Agent;
use overmind::domain::task::Task;
use overmind::infrastructure::logging::{LogConfig, LogFormat, LoggerImpl, RotationPolicy};
use overmind::learning::StrategyStore;
use overmind::llm::claude::{ClaudeClient, ClaudeClientConfig};
use overmind::llm::LlmClient;
use overmind::reflector::{NullFilePredictor, Reflector};
use overmind::router::{Router, Strategy};
use overmind::shared_memory::SharedMemoryBus;
use overmind::stores::checkpoint::CheckpointStore;
use overmind::stores::{AgentStateStore, DelegationStore};
use overmind::tools::{Tool, ToolRegistry};
use overmind::tree_planner::TreePlanner;

mod builtin_tools;

use builtin_tools::{BashTool, ReadFileTool, SharedMemoryMessenger, WriteFileTool};

#[derive(Parser)]
#[command(name = "overmind", about = "Orchestration core for a multi-agent coding assistant")]
struct Cli {
    /// Path to a YAML config file, overriding the default project/env layering.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route and run a single instruction end to end.
    Run {
        /// The user instruction to execute.
        prompt: String,

        /// Goal description for the tree planner, if this routes to a plan.
        #[arg(long)]
        goal: Option<String>,

        /// Agent type to tag a direct/single-tool run with.
        #[arg(long, default_value = "general")]
        agent_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load config file")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    let log_config = LogConfig {
        level: config.log_level.clone(),
        format: LogFormat::Pretty,
        log_dir: None,
        enable_stdout: true,
        rotation: RotationPolicy::Never,
        retention_days: 14,
    };
    let _logger_guard = LoggerImpl::init(&log_config).context("failed to initialize logging")?;

    match cli.command {
        Commands::Run { prompt, goal, agent_type } => run_task(config, prompt, goal, agent_type).await,
    }
}

async fn run_task(config: OrchestratorConfig, prompt: String, goal: Option<String>, agent_type: String) -> Result<()> {
    let storage_dir = PathBuf::from(&config.storage.storage_dir);
    std::fs::create_dir_all(storage_dir.join("agents/checkpoints")).context("failed to create checkpoint directory")?;
    std::fs::create_dir_all(storage_dir.join("memory")).context("failed to create strategy-store directory")?;

    let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        warn!(env = %config.llm.api_key_env, "no API key set; model calls will fail at request time");
    }
    let llm: Arc<dyn LlmClient> = Arc::new(
        ClaudeClient::new(ClaudeClientConfig {
            api_key,
            base_url: config.llm.base_url.clone(),
            rate_limit_rps: config.llm.rate_limit_rps,
            max_retries: config.llm.max_retries,
            initial_backoff_ms: config.llm.initial_backoff_ms,
            max_backoff_ms: config.llm.max_backoff_ms,
            timeout_secs: config.llm.timeout_secs,
            model: "claude-3-5-sonnet-20241022".to_string(),
        })
        .map_err(|err| anyhow::anyhow!("failed to construct the Claude client: {err}"))?,
    );

    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ReadFileTool) as Arc<dyn Tool>);
    registry.register(Arc::new(WriteFileTool) as Arc<dyn Tool>);
    registry.register(Arc::new(BashTool) as Arc<dyn Tool>);
    let tool_surface = registry.surface(registry.all_names());

    let reflector = Arc::new(Reflector::new(Some(llm.clone()), Arc::new(NullFilePredictor)));
    let delegation = Arc::new(DelegationStrategy::with_built_in_rules());
    let delegation_store = DelegationStore::open(storage_dir.join("memory/delegation_metrics.json"))
        .await
        .context("failed to open the delegation metrics store")?;
    delegation.load_stats(delegation_store.load_all().await);
    let agent_states = AgentStateStore::new(storage_dir.join("agents"));
    let checkpoints = Arc::new(CheckpointStore::new(
        storage_dir.join("agents/checkpoints"),
        config.storage.checkpoints_retained_per_agent,
    ));
    let strategy_store = StrategyStore::open(storage_dir.join("memory/strategy_metrics.json"))
        .await
        .context("failed to open the strategy store")?;
    let shared_memory = Arc::new(SharedMemoryBus::new(config.shared_memory.clone()));
    let messenger: Arc<dyn overmind::delegation::Messenger> = Arc::new(SharedMemoryMessenger::new(shared_memory.clone()));
    let tree_planner = Arc::new(TreePlanner::new(config.tree_planner.clone()));

    let agent_loop = Arc::new(AgentLoop::new(
        config.agent_loop.clone(),
        AgentLoopDeps {
            llm: llm.clone(),
            tools: tool_surface,
            reflector: Some(reflector),
            delegation: Some(delegation.clone()),
            messenger: Some(messenger),
            checkpoints: Some(checkpoints),
            shared_memory: Some(shared_memory),
            tree_planner: Some(tree_planner.clone()),
        },
    ));

    let router = Router::new(config.router.clone());

    let repo_present = std::env::current_dir().map(|d| d.join(".git").exists()).unwrap_or(false);
    let decision = router.route(&prompt, false, 0.0, repo_present).await;
    info!(
        class = ?decision.class,
        strategy = ?decision.strategy,
        score = decision.score,
        model = %decision.model,
        "routed instruction"
    );

    match decision.strategy {
        Strategy::Direct | Strategy::SingleTool => {
            run_single_agent(&agent_loop, &agent_states, &agent_type, &prompt).await?;
        }
        Strategy::Executor | Strategy::SubAgent => {
            run_plan(&tree_planner, &strategy_store, &agent_loop, &config, &llm, &prompt, goal.as_deref()).await?;
        }
    }

    delegation_store.save_all(delegation.snapshot_stats()).await.context("failed to persist delegation metrics")?;

    Ok(())
}

async fn run_single_agent(agent_loop: &Arc<AgentLoop>, agent_states: &AgentStateStore, agent_type: &str, prompt: &str) -> Result<()> {
    let mut ctx = AgentLoopContext {
        agent_type: agent_type.to_string(),
        system_prompt: format!("You are a {agent_type} agent. Complete the user's request."),
        plan: None,
        cancel: CancellationToken::new(),
        delegation_depth: 0,
        active_agents: 1,
    };
    let mut agent = Agent::new(agent_type);
    let result = agent_loop.run(&mut ctx, &mut agent, prompt).await;
    agent_states
        .save(agent.id, &agent)
        .await
        .context("failed to persist agent state")?;
    if result.is_success() {
        println!("{}", result.output);
    } else {
        println!("task did not complete cleanly: {:?}", result.error);
    }
    Ok(())
}

async fn run_plan(
    tree_planner: &TreePlanner,
    strategy_store: &StrategyStore,
    agent_loop: &Arc<AgentLoop>,
    config: &OrchestratorConfig,
    llm: &Arc<dyn LlmClient>,
    prompt: &str,
    goal: Option<&str>,
) -> Result<()> {
    let goal = goal.unwrap_or(prompt);
    let mut tree = tree_planner
        .build_tree(Some(llm.as_ref()), Some(strategy_store), prompt, goal, config.tree_planner.max_tree_nodes as u32)
        .await
        .context("failed to build the plan tree")?;

    let coordinator = Arc::new(Coordinator::new(config.coordinator.clone(), agent_loop.clone()));
    let mut node_of_task: HashMap<Uuid, Uuid> = HashMap::new();

    for node_id in tree_planner.ready_actions(&tree) {
        let Some(node) = tree.node_index.get(&node_id).cloned() else { continue };
        let task = Task::new(node.action.prompt.clone(), node.action.agent_type.clone().unwrap_or_else(|| "general".to_string()));
        let task_id = coordinator.add_task(task, Vec::new()).await.context("failed to enqueue plan step")?;
        node_of_task.insert(task_id, node_id);
    }

    let run_handle = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.run().await })
    };

    let wait_timeout = std::time::Duration::from_secs(config.coordinator.wait_timeout_secs);
    if let Err(err) = coordinator.wait_with_timeout(wait_timeout).await {
        warn!(error = %err, "plan did not finish within the configured timeout");
    }

    for task in coordinator.snapshot().await {
        let Some(&node_id) = node_of_task.get(&task.id) else { continue };
        let succeeded = task.result.as_ref().is_some_and(overmind::domain::agent::AgentResult::is_success);
        let output = task.result.as_ref().map(|r| r.output.clone());
        let _ = tree_planner.record_result(&mut tree, node_id, succeeded, output, None, None, true);
    }

    run_handle.abort();

    let best_path = tree_planner.select_best_path(&tree);
    for node_id in &best_path {
        if let Some(node) = tree.node_index.get(node_id) {
            println!("[{:?}] {}", node.status, node.action.prompt);
            if let Some(result) = &node.result {
                println!("  -> {result}");
            }
        }
    }

    Ok(())
}
