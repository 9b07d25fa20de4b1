//! Bounded event queue feeding the processor.
//!
//! Producers (network, timers, block builder) only ever enqueue. Enqueueing
//! never blocks: when the queue is full the event is dropped and counted.

use crate::events::ConsensusEvent;
use crate::metrics::ConsensusMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Producer handle of the event queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<ConsensusEvent>,
    overflow: Arc<AtomicU64>,
    metrics: Option<ConsensusMetrics>,
}

/// Consumer side of the event queue, owned by the processor.
pub struct EventReceiver {
    rx: mpsc::Receiver<ConsensusEvent>,
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` events.
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            overflow: Arc::new(AtomicU64::new(0)),
            metrics: None,
        };
        (queue, EventReceiver { rx })
    }

    /// Attaches metrics; overflows are also counted there.
    pub fn with_metrics(mut self, metrics: ConsensusMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Enqueues an event. Returns false if it was dropped.
    pub fn add(&self, event: ConsensusEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                let dropped = self.overflow.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(metrics) = &self.metrics {
                    metrics.queue_overflow.inc();
                }
                warn!(kind = event.kind(), dropped, "event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(kind = event.kind(), "event queue closed, dropping event");
                false
            }
        }
    }

    /// Number of events dropped because the queue was full.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }

    /// Returns true once the processor has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Waits for the next event. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<ConsensusEvent> {
        self.rx.recv().await
    }

    /// Takes the next event without waiting.
    pub fn try_recv(&mut self) -> Option<ConsensusEvent> {
        self.rx.try_recv().ok()
    }
}
