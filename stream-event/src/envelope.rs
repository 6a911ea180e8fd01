//! Envelope: `{eventId, runId, ts}` wrapped around an `EventPayload`.
//!
//! `eventId` is a per-Run monotonically increasing sequence number, not a
//! wall-clock value: the runtime spec's open question on ordering across
//! parallel siblings is resolved in favor of a per-Run sequence rather than
//! relying on `ts` (§9, open question a).

use crate::event::EventPayload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// A fully-addressed event as delivered to subscribers: `{eventId, runId, type, payload, ts}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: u64,
    pub run_id: String,
    pub ts: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Envelope {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Per-Run sequence/clock state used to stamp outgoing events.
///
/// One `EnvelopeState` lives for the lifetime of a Run. `next` assigns a
/// strictly increasing `event_id` and a monotonic `ts` (clamped so it never
/// moves backward even if the wall clock does).
pub struct EnvelopeState {
    pub run_id: String,
    next_event_id: u64,
    last_ts: u64,
}

impl EnvelopeState {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            next_event_id: 1,
            last_ts: 0,
        }
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    /// Wraps `payload` in an `Envelope`, assigning the next sequence number
    /// and a `ts` that is monotonic within this Run.
    pub fn next(&mut self, payload: EventPayload) -> Envelope {
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        let ts = Self::now_ms().max(self.last_ts + 1);
        self.last_ts = ts;
        Envelope {
            event_id,
            run_id: self.run_id.clone(),
            ts,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ids_strictly_increase() {
        let mut state = EnvelopeState::new("run-1");
        let a = state.next(EventPayload::RunStarted {
            graph_hash: "h".into(),
        });
        let b = state.next(EventPayload::RunCancelled);
        assert_eq!(a.event_id, 1);
        assert_eq!(b.event_id, 2);
        assert!(b.ts >= a.ts);
    }

    #[test]
    fn envelope_serializes_with_run_id_and_type_tag() {
        let mut state = EnvelopeState::new("run-42");
        let env = state.next(EventPayload::RunCancelled);
        let v = env.to_value().unwrap();
        assert_eq!(v["run_id"], "run-42");
        assert_eq!(v["type"], "run_cancelled");
        assert_eq!(v["event_id"], 1);
    }
}
