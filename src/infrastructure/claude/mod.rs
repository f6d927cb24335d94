//! Claude API client infrastructure
//!
//! HTTP client for Claude API with:
//! - Rate limiting (token bucket)
//! - Retry logic with exponential backoff
//!
//! The full request/response/streaming plumbing lives in
//! [`crate::llm::claude`], which consumes these two building blocks
//! directly; request/response shapes moved there to match the §6
//! `LlmClient` trait surface instead of the old `domain::ports::ClaudeClient`
//! port this infrastructure module originally adapted.

pub mod error;
pub mod rate_limiter;
pub mod retry;
