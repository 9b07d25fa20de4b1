//! Round and block timers.
//!
//! Each timer is a tokio task that sleeps and then posts a single expiry
//! event into the event queue. At most one instance of each timer is
//! active; starting a new one or dropping the owner aborts the previous
//! task. An expiry that was already queued when the timer got cancelled is
//! left for the state machine to discard as stale.

use crate::event_queue::EventQueue;
use crate::events::ConsensusEvent;
use ibft_types::{BlockHeader, RoundIdentifier};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Largest exponent applied to the round timeout.
const MAX_BACKOFF_SHIFT: u32 = 16;

/// Returns the timeout of `round`: `base * 2^round`.
pub fn round_timeout(base: Duration, round: u32) -> Duration {
    base.saturating_mul(1u32 << round.min(MAX_BACKOFF_SHIFT))
}

fn spawn_expiry(queue: EventQueue, delay: Duration, event: ConsensusEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        trace!(kind = event.kind(), "timer fired");
        queue.add(event);
    })
}

/// Timer bounding how long a round may take.
pub struct RoundTimer {
    queue: EventQueue,
    base: Duration,
    active: Option<(RoundIdentifier, JoinHandle<()>)>,
}

impl RoundTimer {
    /// Creates a timer with round 0 timeout `base`.
    pub fn new(queue: EventQueue, base: Duration) -> Self {
        Self {
            queue,
            base,
            active: None,
        }
    }

    /// Starts the timer for `round`, cancelling any running instance.
    pub fn start(&mut self, round: RoundIdentifier) {
        self.cancel();
        let timeout = round_timeout(self.base, round.round);
        let handle = spawn_expiry(
            self.queue.clone(),
            timeout,
            ConsensusEvent::RoundExpiry(round),
        );
        debug!(%round, ?timeout, "round timer started");
        self.active = Some((round, handle));
    }

    /// Cancels the running instance. A no-op if nothing is running.
    pub fn cancel(&mut self) {
        if let Some((round, handle)) = self.active.take() {
            handle.abort();
            trace!(%round, "round timer cancelled");
        }
    }

    /// Returns true if the timer for `round` is armed and has not fired.
    pub fn is_running(&self, round: &RoundIdentifier) -> bool {
        matches!(&self.active, Some((r, handle)) if r == round && !handle.is_finished())
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Timer delaying the round 0 proposal until the block period has passed.
pub struct BlockTimer {
    queue: EventQueue,
    period: Duration,
    active: Option<(RoundIdentifier, JoinHandle<()>)>,
}

impl BlockTimer {
    /// Creates a timer enforcing `period` between a parent and its child.
    pub fn new(queue: EventQueue, period: Duration) -> Self {
        Self {
            queue,
            period,
            active: None,
        }
    }

    /// Returns how long to wait before proposing on top of `parent`.
    pub fn delay_for(&self, parent: &BlockHeader, now: Duration) -> Duration {
        let expiry = Duration::from_secs(parent.timestamp) + self.period;
        expiry.saturating_sub(now)
    }

    /// Starts the timer for `round` on top of `parent`.
    pub fn start(&mut self, round: RoundIdentifier, parent: &BlockHeader) {
        self.cancel();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let delay = self.delay_for(parent, now);
        let handle = spawn_expiry(
            self.queue.clone(),
            delay,
            ConsensusEvent::BlockTimerExpiry(round),
        );
        debug!(%round, ?delay, "block timer started");
        self.active = Some((round, handle));
    }

    /// Cancels the running instance. A no-op if nothing is running.
    pub fn cancel(&mut self) {
        if let Some((round, handle)) = self.active.take() {
            handle.abort();
            trace!(%round, "block timer cancelled");
        }
    }

    /// Returns true if the timer for `round` is armed and has not fired.
    pub fn is_running(&self, round: &RoundIdentifier) -> bool {
        matches!(&self.active, Some((r, handle)) if r == round && !handle.is_finished())
    }
}

impl Drop for BlockTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibft_types::{BlockDigest, ValidatorId};

    fn header(timestamp: u64) -> BlockHeader {
        BlockHeader {
            number: 9,
            parent: BlockDigest::GENESIS_PARENT,
            proposer: ValidatorId::from_bytes([0; 32]),
            timestamp,
            body_root: [0; 32],
        }
    }

    #[test]
    fn test_round_timeout_backoff() {
        let base = Duration::from_secs(4);
        assert_eq!(round_timeout(base, 0), Duration::from_secs(4));
        assert_eq!(round_timeout(base, 1), Duration::from_secs(8));
        assert_eq!(round_timeout(base, 3), Duration::from_secs(32));
        // Very high rounds saturate instead of overflowing.
        assert_eq!(round_timeout(base, 1000), round_timeout(base, MAX_BACKOFF_SHIFT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_timer_fires_once() {
        let (queue, mut rx) = EventQueue::new(8);
        let mut timer = RoundTimer::new(queue, Duration::from_secs(4));
        let round = RoundIdentifier::new(3, 1);

        timer.start(round);
        assert!(timer.is_running(&round));

        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(rx.try_recv().is_none());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Some(ConsensusEvent::RoundExpiry(r)) if r == round));
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_cancels_previous() {
        let (queue, mut rx) = EventQueue::new(8);
        let mut timer = RoundTimer::new(queue, Duration::from_secs(1));

        timer.start(RoundIdentifier::new(1, 0));
        timer.start(RoundIdentifier::new(1, 1));
        assert!(!timer.is_running(&RoundIdentifier::new(1, 0)));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(
            matches!(rx.try_recv(), Some(ConsensusEvent::RoundExpiry(r)) if r.round == 1)
        );
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (queue, mut rx) = EventQueue::new(8);
        let mut timer = RoundTimer::new(queue.clone(), Duration::from_secs(1));
        timer.start(RoundIdentifier::new(1, 0));
        drop(timer);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_is_noop() {
        let (queue, mut rx) = EventQueue::new(8);
        let mut timer = RoundTimer::new(queue, Duration::from_secs(1));
        let round = RoundIdentifier::new(2, 0);
        timer.start(round);

        tokio::time::sleep(Duration::from_secs(2)).await;
        timer.cancel();
        timer.cancel();
        assert!(rx.try_recv().is_some());
    }

    #[test]
    fn test_block_timer_delay() {
        let (queue, _rx) = EventQueue::new(1);
        let timer = BlockTimer::new(queue, Duration::from_secs(2));

        let now = Duration::from_secs(100);
        assert_eq!(timer.delay_for(&header(99), now), Duration::from_secs(1));
        // A parent older than the period means propose immediately.
        assert_eq!(timer.delay_for(&header(50), now), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_timer_fires_for_old_parent() {
        let (queue, mut rx) = EventQueue::new(8);
        let mut timer = BlockTimer::new(queue, Duration::from_secs(1));
        let round = RoundIdentifier::new(10, 0);

        timer.start(round, &header(0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(
            matches!(rx.try_recv(), Some(ConsensusEvent::BlockTimerExpiry(r)) if r == round)
        );
    }
}
