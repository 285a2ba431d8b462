//! Observability events emitted while the pipeline runs.
//!
//! Every subscriber gets its own bounded channel. Sending never blocks: a
//! subscriber that stops draining keeps only its most recent events.

use crate::pipeline::id::NodeId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The driver could not take the graph lock and dropped a cycle.
    CycleSkipped { skipped_total: u64 },

    /// A real-time clock tick took longer than one period.
    ClockOverrun {
        node: NodeId,
        tick: u64,
        late_by_us: u64,
    },

    NodeRecovered {
        node: NodeId,
        cycle: u64,
        message: String,
    },

    NodeFatal {
        node: NodeId,
        cycle: u64,
        message: String,
    },

    StreamEnded { node: NodeId },

    /// Async launches skipped because the previous task was still running.
    AsyncDropped { node: NodeId, dropped: u64 },

    /// `node == None` means the whole pipeline.
    Paused { node: Option<NodeId>, paused: bool },

    Stopped,
}

/// One subscriber's queue. The bus keeps a receiver too, to evict.
struct Subscriber {
    tx: Sender<PipelineEvent>,
    oldest: Receiver<PipelineEvent>,
}

impl Subscriber {
    fn deliver(&self, mut event: PipelineEvent) {
        loop {
            match self.tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(stale) = self.oldest.try_recv() {
                        tracing::trace!("Event queue full, evicting {:?}", stale);
                    }
                    event = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Fans every event out to each subscriber's own bounded queue.
pub(crate) struct EventBus {
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn emit(&self, event: PipelineEvent) {
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            subscriber.deliver(event.clone());
        }
    }

    /// A new queue that sees every event emitted from now on. A subscriber
    /// that falls `capacity` events behind loses the oldest ones.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(Subscriber {
            tx,
            oldest: rx.clone(),
        });
        rx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}
