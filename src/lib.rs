//! Overmind - orchestration core for a multi-agent coding assistant.
//!
//! Ties together a router that picks an execution strategy for an incoming
//! instruction, a tree planner that breaks complex work into scored plan
//! nodes, an agent loop that drives a single agent's turn-by-turn model/tool
//! conversation, a coordinator that schedules many agents against a
//! dependency graph, and a learning layer (shared memory, persistent
//! stores, and a reflector) that lets agents recover from and learn from
//! tool failures across runs.

pub mod agent_loop;
pub mod config;
pub mod coordinator;
pub mod delegation;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod learning;
pub mod llm;
pub mod reflector;
pub mod ring_buffer;
pub mod router;
pub mod shared_memory;
pub mod stores;
pub mod tools;
pub mod tree_planner;

pub use config::{ConfigLoader, OrchestratorConfig};
pub use coordinator::Coordinator;
pub use error::{OrchestratorError, OrchestratorResult};
pub use router::Router;
pub use tree_planner::TreePlanner;
