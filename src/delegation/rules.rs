//! Built-in delegation rules (§4.5): explore/bash/general cross-overs, plus
//! the generic stuck-count escalation path.

use super::{DelegationContext, DelegationRule, STUCK_THRESHOLD};
use crate::reflector::ReflectionCategory;

/// A rule's trigger condition, kept as a named enum purely for
/// documentation/testing purposes — the stored closure is what actually
/// runs, but this makes `built_in_rules` self-describing in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationCondition {
    NeedsShell,
    CompilationError,
    FileNotFound,
    StuckAsGeneral,
    StuckAsNonGeneral,
}

fn reflection_is(ctx: &DelegationContext, category: ReflectionCategory) -> bool {
    ctx.reflection.as_ref().is_some_and(|r| r.category == category)
}

/// The rule table evaluated in `DelegationStrategy::decide`, ordered to
/// match §4.5's listing (order only matters for tie-break readability;
/// scoring, not position, picks the winner when several match).
#[must_use]
pub fn built_in_rules() -> Vec<DelegationRule> {
    vec![
        DelegationRule {
            from_type: Some("explore".to_string()),
            target_type: "bash".to_string(),
            reason: "exploration needs a shell command to proceed".to_string(),
            condition: Box::new(|ctx| {
                ctx.last_tool_error.is_some()
                    && ctx
                        .last_tool_name
                        .as_deref()
                        .is_some_and(|t| t == "read" || t == "grep" || t == "glob")
            }),
            build_query: Box::new(|ctx| {
                format!(
                    "Exploring agent needs a shell command to continue past: {}",
                    ctx.last_tool_error.clone().unwrap_or_default()
                )
            }),
        },
        DelegationRule {
            from_type: Some("bash".to_string()),
            target_type: "explore".to_string(),
            reason: "compilation error needs investigation before another shell attempt".to_string(),
            condition: Box::new(|ctx| reflection_is(ctx, ReflectionCategory::CompilationError)),
            build_query: Box::new(|ctx| {
                format!(
                    "A compilation error occurred; investigate the referenced types/imports: {}",
                    ctx.last_tool_error.clone().unwrap_or_default()
                )
            }),
        },
        DelegationRule {
            from_type: None,
            target_type: "explore".to_string(),
            reason: "file not found; explore for a glob alternative".to_string(),
            condition: Box::new(|ctx| reflection_is(ctx, ReflectionCategory::FileNotFound)),
            build_query: Box::new(|ctx| {
                format!(
                    "A referenced path was not found; locate the correct path via glob: {}",
                    ctx.last_tool_error.clone().unwrap_or_default()
                )
            }),
        },
        DelegationRule {
            from_type: Some("general".to_string()),
            target_type: "plan".to_string(),
            reason: "stuck without progress; replanning may unblock".to_string(),
            condition: Box::new(|ctx| ctx.stuck_count >= STUCK_THRESHOLD),
            build_query: Box::new(|_ctx| {
                "Progress has stalled; produce a revised plan for the remaining work.".to_string()
            }),
        },
        DelegationRule {
            from_type: None,
            target_type: "general".to_string(),
            reason: "stuck for an extended run; fall back to a general-purpose agent".to_string(),
            condition: Box::new(|ctx| ctx.agent_type != "general" && ctx.stuck_count >= STUCK_THRESHOLD + 2),
            build_query: Box::new(|ctx| {
                format!(
                    "A {} agent made no progress for {} turns; continue with a general approach.",
                    ctx.agent_type, ctx.stuck_count
                )
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(agent_type: &str, stuck: u32) -> DelegationContext {
        DelegationContext {
            agent_type: agent_type.to_string(),
            turn: 1,
            max_turns: 20,
            last_tool_name: None,
            last_tool_error: None,
            last_tool_args: None,
            reflection: None,
            stuck_count: stuck,
            delegation_depth: 0,
        }
    }

    #[test]
    fn general_to_plan_triggers_at_threshold() {
        let rules = built_in_rules();
        let rule = rules.iter().find(|r| r.target_type == "plan").unwrap();
        assert!((rule.condition)(&ctx("general", STUCK_THRESHOLD)));
        assert!(!(rule.condition)(&ctx("general", STUCK_THRESHOLD - 1)));
    }

    #[test]
    fn non_general_to_general_requires_higher_threshold() {
        let rules = built_in_rules();
        let rule = rules
            .iter()
            .find(|r| r.target_type == "general" && r.from_type.is_none())
            .unwrap();
        assert!(!(rule.condition)(&ctx("bash", STUCK_THRESHOLD)));
        assert!((rule.condition)(&ctx("bash", STUCK_THRESHOLD + 2)));
        assert!(!(rule.condition)(&ctx("general", STUCK_THRESHOLD + 2)));
    }

    #[test]
    fn file_not_found_rule_has_no_from_type_restriction() {
        let rules = built_in_rules();
        let rule = rules
            .iter()
            .find(|r| r.reason.contains("file not found"))
            .unwrap();
        assert!(rule.from_type.is_none());
    }
}
