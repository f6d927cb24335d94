//! Core data model: tasks, agents, and plan trees.

pub mod agent;
pub mod plan;
pub mod task;

pub use agent::{Agent, AgentResult, AgentStatus, Turn, TurnPart, TurnRole};
pub use plan::{PlanNode, PlanNodeStatus, PlanTree, PlannedAction, PlannedActionType};
pub use task::{CoordinatedTask, Task, TaskPriority, TaskStatus};
