//! Infrastructure layer
//!
//! The ambient stack the rest of the crate builds on:
//! - HTTP client plumbing for the Claude API (rate limiting, retry)
//! - Structured logging (JSON formatting, rotation, secret scrubbing, audit trail)

pub mod claude;
pub mod logging;
