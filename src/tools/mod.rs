//! Tool Registry & Dependency Classifier (§4.1).
//!
//! Grounded on the teacher's read-mostly port-trait shape
//! (`domain::ports::substrate::Substrate`, `async_trait`) and its
//! "filtered view, never mutate the base" registry philosophy: per-request
//! tool surfaces are derived `HashMap` snapshots, never handles back into
//! the base registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The write set named in §4.1. Anything not in this set is read-only.
const WRITE_TOOLS: &[&str] = &[
    "write", "edit", "bash", "delete", "move", "copy", "mkdir", "git_add", "git_commit", "ssh",
];

/// Whether `tool_name` state-mutates per the fixed write set.
#[must_use]
pub fn is_write_tool(tool_name: &str) -> bool {
    WRITE_TOOLS.contains(&tool_name)
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The outcome of executing a [`ToolCall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub success: bool,
}

impl ToolResult {
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: true,
        }
    }

    #[must_use]
    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            success: false,
        }
    }
}

/// A named, schema-validated, executable tool handle.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn schema(&self) -> serde_json::Value;
    /// `Some(message)` iff `args` fails schema/semantic validation.
    fn validate(&self, args: &serde_json::Value) -> Option<String>;
    async fn execute(&self, ctx: &ToolContext, args: serde_json::Value) -> ToolResult;

    /// State-mutating iff its name is in the fixed write set.
    fn is_write(&self) -> bool {
        is_write_tool(self.name())
    }
}

/// Per-call context threaded through `execute`. Carries only what every
/// tool needs; individual tools downcast `extra` for anything bespoke.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub agent_id: Option<uuid::Uuid>,
    pub working_dir: Option<std::path::PathBuf>,
}

/// Holds named tool handles. Read-mostly: filtered views are derived
/// `HashMap` snapshots, never mutating references back into the registry.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn all_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// A filtered, named view over a subset of this registry's tools. Never
    /// mutates `self`; callers construct a fresh [`ToolSurface`] per
    /// request from the router's tool-surface selection.
    #[must_use]
    pub fn surface(&self, names: impl IntoIterator<Item = impl AsRef<str>>) -> ToolSurface {
        let tools = names
            .into_iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.tools.get(name).map(|t| (name.to_string(), Arc::clone(t)))
            })
            .collect();
        ToolSurface { tools }
    }
}

/// A filtered, per-request view over a [`ToolRegistry`]. Exposed to the
/// model as the set of callable tools for one turn.
#[derive(Clone, Default)]
pub struct ToolSurface {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSurface {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Whether a group of calls runs concurrently or one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    Parallel,
    Sequential,
}

/// One batch of calls the executor should run together.
#[derive(Debug, Clone)]
pub struct CallGroup {
    pub mode: GroupMode,
    pub calls: Vec<ToolCall>,
}

/// Scan `calls` left to right; accumulate consecutive read-only calls into
/// one `Parallel` group (flagged only when its size > 1 — a lone read-only
/// call is still its own group, just not parallel in spirit), and place
/// each write call in its own `Sequential` group.
#[must_use]
pub fn classify(calls: &[ToolCall]) -> Vec<CallGroup> {
    let mut groups = Vec::new();
    let mut read_run: Vec<ToolCall> = Vec::new();

    let flush = |read_run: &mut Vec<ToolCall>, groups: &mut Vec<CallGroup>| {
        if !read_run.is_empty() {
            let mode = if read_run.len() > 1 {
                GroupMode::Parallel
            } else {
                GroupMode::Sequential
            };
            groups.push(CallGroup {
                mode,
                calls: std::mem::take(read_run),
            });
        }
    };

    for call in calls {
        if is_write_tool(&call.name) {
            flush(&mut read_run, &mut groups);
            groups.push(CallGroup {
                mode: GroupMode::Sequential,
                calls: vec![call.clone()],
            });
        } else {
            read_run.push(call.clone());
        }
    }
    flush(&mut read_run, &mut groups);
    groups
}

/// Reorder `calls` to put all reads before writes while preserving the
/// relative order within each partition. This is the *only* permitted
/// reordering: reads may pass through writes they precede; writes never
/// reorder relative to each other or to later reads.
#[must_use]
pub fn optimize(calls: &[ToolCall]) -> Vec<ToolCall> {
    let (reads, writes): (Vec<ToolCall>, Vec<ToolCall>) =
        calls.iter().cloned().partition(|c| !is_write_tool(&c.name));
    reads.into_iter().chain(writes).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            args: serde_json::json!({}),
        }
    }

    #[test]
    fn classify_groups_consecutive_reads_then_isolates_writes() {
        let calls = vec![call("read"), call("grep"), call("write")];
        let groups = classify(&calls);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].mode, GroupMode::Parallel);
        assert_eq!(groups[0].calls.len(), 2);
        assert_eq!(groups[1].mode, GroupMode::Sequential);
        assert_eq!(groups[1].calls[0].name, "write");
    }

    #[test]
    fn classify_each_write_is_its_own_group() {
        let calls = vec![call("write"), call("edit")];
        let groups = classify(&calls);
        assert_eq!(groups.len(), 2);
        assert!(groups.iter().all(|g| g.mode == GroupMode::Sequential));
    }

    #[test]
    fn classify_lone_read_is_not_flagged_parallel() {
        let calls = vec![call("read")];
        let groups = classify(&calls);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mode, GroupMode::Sequential);
    }

    #[test]
    fn optimize_moves_all_reads_before_writes_preserving_relative_order() {
        let calls = vec![call("write"), call("read"), call("grep"), call("edit")];
        let optimized = optimize(&calls);
        let names: Vec<&str> = optimized.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["read", "grep", "write", "edit"]);
    }

    #[test]
    fn classify_then_optimize_yields_one_read_group_then_individual_writes() {
        let calls = vec![call("write"), call("read"), call("grep"), call("bash")];
        let optimized = optimize(&calls);
        let groups = classify(&optimized);
        let parallel_groups = groups.iter().filter(|g| g.mode == GroupMode::Parallel).count();
        assert!(parallel_groups <= 1);
        for g in groups.iter().skip(if parallel_groups == 1 { 1 } else { 0 }) {
            assert_eq!(g.calls.len(), 1);
        }
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "read"
        }
        fn schema(&self) -> serde_json::Value {
            serde_json::json!({})
        }
        fn validate(&self, _args: &serde_json::Value) -> Option<String> {
            None
        }
        async fn execute(&self, _ctx: &ToolContext, _args: serde_json::Value) -> ToolResult {
            ToolResult::ok("echoed")
        }
    }

    #[test]
    fn surface_is_a_filtered_view_that_never_mutates_the_base() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let surface = registry.surface(["read", "nonexistent"]);
        assert_eq!(surface.len(), 1);
        assert!(surface.get("read").is_some());
        assert_eq!(registry.all_names().len(), 1);
    }
}
