//! End-to-end scenario tests (§8): one binary, one module per scenario,
//! sharing the fixtures in `common`.

mod common;

mod scenario_question_path;
mod scenario_refactor_decomposition;
mod scenario_parallel_reads_then_write;
mod scenario_loop_intervention;
mod scenario_replan_on_failure;
mod scenario_checkpoint_roundtrip;
