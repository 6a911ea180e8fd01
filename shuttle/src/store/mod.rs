//! The `Store` trait: the only persistence seam the
//! runtime depends on. `createRun`/`setRunState` guard the Run state
//! machine's monotonic-transition invariant; `appendStep`/`appendEvent`
//! assign a monotonically increasing index/event id atomically per run.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use stream_event::Envelope;

use crate::error::ShuttleError;
use crate::model::{Run, RunState, Step};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_run(&self, run: Run) -> Result<(), ShuttleError>;

    /// Transitions `run_id` to `state`, returning `NonMonotonicTransition` if
    /// `state` would move the Run backward out of a terminal state.
    async fn set_run_state(
        &self,
        run_id: &str,
        state: RunState,
        ended_at: Option<i64>,
    ) -> Result<(), ShuttleError>;

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>, ShuttleError>;

    async fn update_run_totals(
        &self,
        run_id: &str,
        total_tokens: u64,
        total_cost_usd: f64,
    ) -> Result<(), ShuttleError>;

    async fn set_run_output(&self, run_id: &str, output: serde_json::Value) -> Result<(), ShuttleError>;

    /// Appends a Step, assigning it the next `index` for `run_id` atomically.
    /// Returns the assigned index.
    async fn append_step(&self, step: Step) -> Result<u64, ShuttleError>;

    async fn update_step(&self, step: Step) -> Result<(), ShuttleError>;

    async fn list_runs(&self) -> Result<Vec<Run>, ShuttleError>;

    async fn list_steps(&self, run_id: &str) -> Result<Vec<Step>, ShuttleError>;

    /// Appends an event, assigning it the next event id for `run_id`
    /// atomically (the monotonic sequence backing the `EventBus`'s replay).
    async fn append_event(&self, envelope: Envelope) -> Result<(), ShuttleError>;

    async fn list_events(&self, run_id: &str) -> Result<Vec<Envelope>, ShuttleError>;
}

fn is_monotonic_transition(from: RunState, to: RunState) -> bool {
    use RunState::*;
    if from == to {
        return true;
    }
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Idle, Running)
            | (Idle, Cancelled)
            | (Running, Paused)
            | (Paused, Running)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Cancelled)
    )
}

#[cfg(test)]
mod transition_tests {
    use super::*;
    use RunState::*;

    #[test]
    fn idle_to_running_is_monotonic() {
        assert!(is_monotonic_transition(Idle, Running));
    }

    #[test]
    fn running_can_pause_and_resume() {
        assert!(is_monotonic_transition(Running, Paused));
        assert!(is_monotonic_transition(Paused, Running));
    }

    #[test]
    fn terminal_states_never_move() {
        assert!(!is_monotonic_transition(Completed, Running));
        assert!(!is_monotonic_transition(Failed, Running));
        assert!(!is_monotonic_transition(Cancelled, Idle));
    }

    #[test]
    fn running_cannot_go_back_to_idle() {
        assert!(!is_monotonic_transition(Running, Idle));
    }
}
