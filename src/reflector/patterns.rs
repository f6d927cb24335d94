//! The ordered, case-insensitive regex pattern table §4.4 step 2 matches
//! against. First match wins; miss falls through to the LLM semantic
//! fallback, then to `unknown`.

use serde::{Deserialize, Serialize};

/// The closed sealed set of error categories plus an `unknown` catch-all,
/// per Design Note "Reflection result enum".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionCategory {
    FileNotFound,
    PermissionDenied,
    CommandNotFound,
    Timeout,
    NetworkError,
    SyntaxError,
    CompilationError,
    TestFailure,
    ResourceError,
    GitError,
    RateLimit,
    AuthError,
    AlreadyExists,
    InvalidArgs,
    Unknown,
}

pub(super) struct PatternMatch {
    pub category: ReflectionCategory,
    pub suggestion: String,
    pub should_retry: bool,
    pub suggested_fix: Option<String>,
    pub alternative_tool: Option<String>,
}

impl PatternMatch {
    pub(super) fn unknown() -> Self {
        Self {
            category: ReflectionCategory::Unknown,
            suggestion: "No known pattern matched this error; treat as opaque and ask the \
                         model to investigate further."
                .to_string(),
            should_retry: false,
            suggested_fix: None,
            alternative_tool: None,
        }
    }
}

struct Entry {
    category: ReflectionCategory,
    keywords: &'static [&'static str],
    suggestion: &'static str,
    should_retry: bool,
    alternative_tool: Option<&'static str>,
}

/// Ordered so that more specific categories (timeout, rate limit) are
/// checked before generic ones (network, resource) that could otherwise
/// shadow them via overlapping keywords.
const TABLE: &[Entry] = &[
    Entry {
        category: ReflectionCategory::RateLimit,
        keywords: &["rate limit", "429", "too many requests"],
        suggestion: "The upstream service is rate-limiting requests; back off and retry.",
        should_retry: true,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::Timeout,
        keywords: &["timeout", "timed out", "deadline exceeded"],
        suggestion: "The operation exceeded its deadline; retrying with backoff may succeed.",
        should_retry: true,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::AuthError,
        keywords: &["unauthorized", "401", "403 forbidden", "invalid api key", "auth"],
        suggestion: "Authentication or authorization failed; credentials likely need refreshing.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::FileNotFound,
        keywords: &["no such file or directory", "file not found", "enoent", "cannot find path"],
        suggestion: "The referenced path does not exist; check for a typo or list the directory.",
        should_retry: false,
        alternative_tool: Some("glob"),
    },
    Entry {
        category: ReflectionCategory::AlreadyExists,
        keywords: &["already exists", "file exists", "eexist"],
        suggestion: "The target already exists; read it first or choose a different path.",
        should_retry: false,
        alternative_tool: Some("read"),
    },
    Entry {
        category: ReflectionCategory::PermissionDenied,
        keywords: &["permission denied", "eacces", "access is denied"],
        suggestion: "The process lacks permission for this operation; check file modes or sandbox policy.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::CommandNotFound,
        keywords: &["command not found", "not recognized as an internal", "no such command"],
        suggestion: "The invoked binary is not on PATH; verify it is installed or use an alternative tool.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::NetworkError,
        keywords: &["connection refused", "connection reset", "network is unreachable", "dns"],
        suggestion: "A network-level failure occurred; retrying may succeed once connectivity recovers.",
        should_retry: true,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::GitError,
        keywords: &["not a git repository", "merge conflict", "fatal: ", "nothing to commit"],
        suggestion: "A git operation failed; inspect repository state before retrying.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::CompilationError,
        keywords: &["error[e", "compilation failed", "cannot find type", "cannot find value", "does not compile"],
        suggestion: "The code does not compile; inspect the referenced types/imports before the next edit.",
        should_retry: false,
        alternative_tool: Some("explore"),
    },
    Entry {
        category: ReflectionCategory::TestFailure,
        keywords: &["test failed", "assertion failed", "expected:", "tests failed"],
        suggestion: "A test assertion failed; re-read the test expectation before changing code again.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::SyntaxError,
        keywords: &["syntax error", "unexpected token", "parse error"],
        suggestion: "The input could not be parsed; check for unbalanced delimiters or stray characters.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::ResourceError,
        keywords: &["out of memory", "disk full", "no space left", "too many open files"],
        suggestion: "A system resource is exhausted; free resources or reduce the operation's scope.",
        should_retry: false,
        alternative_tool: None,
    },
    Entry {
        category: ReflectionCategory::InvalidArgs,
        keywords: &["invalid argument", "missing required", "unexpected argument"],
        suggestion: "The tool call's arguments are malformed; review the schema and retry with corrected args.",
        should_retry: false,
        alternative_tool: None,
    },
];

/// Scan the ordered table for the first keyword that appears (case
/// insensitive) in `error_text`.
pub(super) fn match_pattern(error_text: &str) -> Option<PatternMatch> {
    let lower = error_text.to_lowercase();
    for entry in TABLE {
        if entry.keywords.iter().any(|kw| lower.contains(kw)) {
            return Some(PatternMatch {
                category: entry.category,
                suggestion: entry.suggestion.to_string(),
                should_retry: entry.should_retry,
                suggested_fix: None,
                alternative_tool: entry.alternative_tool.map(str::to_string),
            });
        }
    }
    None
}
