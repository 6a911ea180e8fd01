//! Structured logging for graph execution: one `tracing` call per lifecycle
//! event, no custom subscriber setup (the binary crates choose their own).

use crate::error::ShuttleError;
use crate::model::{RunState, StepStatus};

pub fn log_run_start(run_id: &str, graph_hash: &str) {
    tracing::info!(run_id, graph_hash, "run starting");
}

pub fn log_run_state(run_id: &str, state: RunState) {
    tracing::debug!(run_id, ?state, "run state transition");
}

pub fn log_run_complete(run_id: &str, total_tokens: u64, total_cost_usd: f64) {
    tracing::info!(run_id, total_tokens, total_cost_usd, "run complete");
}

pub fn log_run_error(run_id: &str, error: &ShuttleError) {
    tracing::error!(run_id, ?error, "run failed");
}

pub fn log_node_start(run_id: &str, node_id: &str) {
    tracing::debug!(run_id, node_id, "node starting");
}

pub fn log_node_complete(run_id: &str, node_id: &str, status: StepStatus) {
    tracing::debug!(run_id, node_id, ?status, "node complete");
}

pub fn log_node_retry(run_id: &str, node_id: &str, attempt: usize, error: &ShuttleError) {
    tracing::warn!(run_id, node_id, attempt, ?error, "retrying node after error");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_functions_do_not_panic() {
        log_run_start("r1", "h1");
        log_run_state("r1", RunState::Running);
        log_run_complete("r1", 10, 0.01);
        log_run_error("r1", &ShuttleError::System("boom".to_string()));
        log_node_start("r1", "n1");
        log_node_complete("r1", "n1", StepStatus::Success);
        log_node_retry("r1", "n1", 1, &ShuttleError::Provider("flaky".to_string()));
    }
}
