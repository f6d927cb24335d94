//! Concrete tool implementations wired into the binary's registry.
//!
//! The orchestration core never touches the filesystem or a shell itself
//! (§4.1 keeps `Tool` a narrow trait); these are the handful of real
//! tools an embedder plugs in. Grounded on the teacher's `shell_exec`
//! tool: a timeout, an output cap, and `/bin/sh -c` for commands.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

use overmind::delegation::Messenger;
use overmind::shared_memory::{SharedEntryType, SharedMemoryBus};
use overmind::tools::{Tool, ToolContext, ToolResult};

const MAX_OUTPUT_BYTES: usize = 64 * 1024;
const DEFAULT_BASH_TIMEOUT_SECS: u64 = 30;

fn require_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, String> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing or non-string field `{field}`"))
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_OUTPUT_BYTES {
        s.truncate(MAX_OUTPUT_BYTES);
        s.push_str("\n...(truncated)");
    }
    s
}

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "read",
            "description": "Read a file's contents.",
            "parameters": {"path": {"type": "string", "required": true}},
        })
    }

    fn validate(&self, args: &Value) -> Option<String> {
        require_str(args, "path").err()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Ok(path) = require_str(&args, "path") else {
            return ToolResult::err("missing `path`");
        };
        let resolved = ctx.working_dir.as_deref().map_or_else(|| path.into(), |dir| dir.join(path));
        match tokio::fs::read_to_string(&resolved).await {
            Ok(contents) => ToolResult::ok(truncate(contents)),
            Err(err) => ToolResult::err(format!("failed to read {path}: {err}")),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "write",
            "description": "Write (overwrite) a file with the given contents.",
            "parameters": {
                "path": {"type": "string", "required": true},
                "contents": {"type": "string", "required": true},
            },
        })
    }

    fn validate(&self, args: &Value) -> Option<String> {
        require_str(args, "path").err().or_else(|| require_str(args, "contents").err())
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let (Ok(path), Ok(contents)) = (require_str(&args, "path"), require_str(&args, "contents")) else {
            return ToolResult::err("missing `path` or `contents`");
        };
        let resolved = ctx.working_dir.as_deref().map_or_else(|| path.into(), |dir| dir.join(path));
        if let Some(parent) = resolved.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::err(format!("failed to create {}: {err}", parent.display()));
            }
        }
        match tokio::fs::File::create(&resolved).await {
            Ok(mut file) => match file.write_all(contents.as_bytes()).await {
                Ok(()) => ToolResult::ok(format!("wrote {} bytes to {path}", contents.len())),
                Err(err) => ToolResult::err(format!("failed to write {path}: {err}")),
            },
            Err(err) => ToolResult::err(format!("failed to create {path}: {err}")),
        }
    }
}

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn schema(&self) -> Value {
        json!({
            "name": "bash",
            "description": "Execute a shell command with a timeout (default 30s) and output cap (64 KB).",
            "parameters": {
                "command": {"type": "string", "required": true},
                "timeout_secs": {"type": "integer", "required": false},
            },
        })
    }

    fn validate(&self, args: &Value) -> Option<String> {
        require_str(args, "command").err()
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolResult {
        let Ok(command) = require_str(&args, "command") else {
            return ToolResult::err("missing `command`");
        };
        let timeout_secs = args
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_BASH_TIMEOUT_SECS);

        let mut cmd = tokio::process::Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        if let Some(dir) = &ctx.working_dir {
            cmd.current_dir(dir);
        }

        let run = async {
            cmd.output().await.map_err(|err| format!("failed to spawn shell: {err}"))
        };

        match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), run).await {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let combined = truncate(combined);
                if output.status.success() {
                    ToolResult::ok(combined)
                } else {
                    ToolResult::err(format!("exit status {}: {combined}", output.status))
                }
            }
            Ok(Err(err)) => ToolResult::err(err),
            Err(_) => ToolResult::err(format!("command timed out after {timeout_secs}s")),
        }
    }
}

/// Bridges delegation messaging (§4.5) onto the shared memory bus instead
/// of a dedicated message queue: a send is a keyed write, a response is
/// read back from the same key once the target role has written one.
pub struct SharedMemoryMessenger {
    bus: Arc<SharedMemoryBus>,
}

impl SharedMemoryMessenger {
    #[must_use]
    pub fn new(bus: Arc<SharedMemoryBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Messenger for SharedMemoryMessenger {
    async fn send_message(
        &self,
        kind: &str,
        to_role: &str,
        content: &str,
        data: Value,
    ) -> Result<String, String> {
        let key = format!("delegation:{to_role}:{}", uuid::Uuid::new_v4());
        self.bus
            .write(
                key.clone(),
                json!({"kind": kind, "content": content, "data": data, "response": Value::Null}),
                SharedEntryType::Generic,
                "delegation",
                None,
            )
            .await;
        Ok(key)
    }

    async fn receive_response(&self, _ctx: &overmind::delegation::DelegationContext, message_id: &str) -> Result<String, String> {
        match self.bus.read(message_id).await {
            Some(entry) => match entry.value.get("response") {
                Some(Value::Null) | None => Err(format!("no response yet for {message_id}")),
                Some(response) => Ok(response.to_string()),
            },
            None => Err(format!("no such message {message_id}")),
        }
    }
}
