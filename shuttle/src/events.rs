//! `EventBus`: in-process fan-out to subscribers. A slow
//! subscriber must not block the producer, so each subscriber gets a bounded
//! ring buffer; once full the oldest entry is dropped and a `DroppedEvents`
//! signal is queued for the next `recv`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use stream_event::{Envelope, EventPayload};
use tokio::sync::Notify;

struct Subscriber {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

/// Handle a subscriber uses to pull events in commit order.
pub struct EventSubscription {
    inner: Arc<Subscriber>,
}

impl EventSubscription {
    /// Waits for and returns the next event, surfacing a synthetic
    /// `DroppedEvents` envelope first if this subscriber fell behind.
    pub async fn recv(&mut self) -> Envelope {
        loop {
            if let Some(env) = self.try_take() {
                return env;
            }
            self.inner.notify.notified().await;
        }
    }

    fn try_take(&self) -> Option<Envelope> {
        let dropped = self.inner.dropped.swap(0, Ordering::AcqRel);
        if dropped > 0 {
            return Some(Envelope {
                event_id: 0,
                run_id: String::new(),
                ts: 0,
                payload: EventPayload::DroppedEvents { count: dropped },
            });
        }
        self.inner.queue.lock().unwrap().pop_front()
    }
}

/// Fan-out point the `GraphRuntime` publishes persisted Events to.
pub struct EventBus {
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        let sub = Arc::new(Subscriber {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: self.capacity,
        });
        self.subscribers.lock().unwrap().push(sub.clone());
        EventSubscription { inner: sub }
    }

    /// Publishes `envelope` to every live subscriber, dropping the oldest
    /// queued entry (not this new one) for any subscriber at capacity.
    pub fn publish(&self, envelope: Envelope) {
        let subs = self.subscribers.lock().unwrap();
        for sub in subs.iter() {
            let mut queue = sub.queue.lock().unwrap();
            if queue.len() >= sub.capacity {
                queue.pop_front();
                sub.dropped.fetch_add(1, Ordering::AcqRel);
            }
            queue.push_back(envelope.clone());
            drop(queue);
            sub.notify.notify_one();
        }
    }
}
