//! Bounded multi-producer/single-consumer event handoff.
//!
//! The queue is the only channel between the ingestion side (ring consumers
//! feeding the normalizer) and the analysis side. It is a bounded buffer
//! with an overflow policy fixed at construction, plus atomic counters for
//! the pending/processed statistics; processed events are persisted rather
//! than retained.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::event::{wall_clock_ns, Event, QueueStats};
use crate::shutdown::ShutdownToken;

/// What `enqueue` does when the queue holds `capacity` events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Refuse the new event with [`Error::Full`].
    #[default]
    Reject,
    /// Evict the oldest pending event to make room.
    DropOldest,
}

/// Bounded MPSC queue with pending/processed statistics.
pub struct EventQueue {
    pending: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
    total: AtomicU64,
    processed: AtomicU64,
    last_event_ns: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            notify: Notify::new(),
            capacity,
            policy,
            total: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            last_event_ns: AtomicU64::new(0),
        }
    }

    /// Hand an event to the consumer side. FIFO per producer. When full the
    /// overflow policy applies: `Reject` returns [`Error::Full`] and the
    /// event is dropped by the caller; `DropOldest` evicts the head.
    pub fn enqueue(&self, event: Event) -> Result<()> {
        let timestamp_ns = event.timestamp_ns;
        {
            let mut pending = self.pending.lock().unwrap();
            if pending.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::Reject => return Err(Error::Full),
                    OverflowPolicy::DropOldest => {
                        pending.pop_front();
                    }
                }
            }
            pending.push_back(event);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        self.last_event_ns.store(timestamp_ns, Ordering::Relaxed);
        self.notify.notify_one();
        Ok(())
    }

    /// Non-blocking dequeue for drain loops.
    pub fn try_dequeue(&self) -> Option<Event> {
        self.pending.lock().unwrap().pop_front()
    }

    /// Wait up to `timeout` for an event. Returns `Ok(None)` when the queue
    /// stayed empty for the whole timeout and [`Error::ShuttingDown`] once
    /// the token is signalled.
    pub async fn dequeue(
        &self,
        timeout: Duration,
        token: &ShutdownToken,
    ) -> Result<Option<Event>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if token.is_signalled() {
                return Err(Error::ShuttingDown);
            }
            if let Some(event) = self.try_dequeue() {
                return Ok(Some(event));
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = token.wait() => return Err(Error::ShuttingDown),
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    /// Transition an event to processed. The timestamp is stamped once; a
    /// second call leaves it untouched.
    pub fn mark_processed(&self, event: &mut Event) {
        if !event.processed {
            event.processed = true;
            event.processed_time_ns = wall_clock_ns();
            self.processed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            total: self.total.load(Ordering::Relaxed),
            pending: self.pending.lock().unwrap().len() as u64,
            processed: self.processed.load(Ordering::Relaxed),
            last_event_ns: self.last_event_ns.load(Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Severity};

    fn make_event(seq: u64) -> Event {
        Event {
            id: 0,
            timestamp_ns: 1_000_000_000 + seq,
            kind: EventKind::ExecFs,
            severity: Severity::Low,
            pid: 100 + seq as u32,
            uid: 1000,
            gid: 1000,
            comm: format!("proc-{seq}"),
            filename: String::new(),
            raw: vec![0],
            processed: false,
            processed_time_ns: 0,
        }
    }

    #[test]
    fn test_fifo_order_single_producer() {
        let queue = EventQueue::new(16_384, OverflowPolicy::Reject);
        for i in 0..10_000u64 {
            queue.enqueue(make_event(i)).unwrap();
        }
        for i in 0..10_000u64 {
            let event = queue.try_dequeue().unwrap();
            assert_eq!(event.pid, 100 + i as u32);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_reject_policy_bounds_queue() {
        let n = 8;
        let k = 3;
        let queue = EventQueue::new(n, OverflowPolicy::Reject);
        let mut rejected = 0;
        for i in 0..(n + k) as u64 {
            match queue.enqueue(make_event(i)) {
                Ok(()) => {}
                Err(Error::Full) => rejected += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(rejected, k);
        assert_eq!(queue.len(), n);
        assert_eq!(queue.stats().total, n as u64);
    }

    #[test]
    fn test_drop_oldest_policy_evicts_head() {
        let queue = EventQueue::new(4, OverflowPolicy::DropOldest);
        for i in 0..6u64 {
            queue.enqueue(make_event(i)).unwrap();
        }
        assert_eq!(queue.len(), 4);
        // Events 0 and 1 were evicted; the head is now event 2.
        let head = queue.try_dequeue().unwrap();
        assert_eq!(head.pid, 102);
        // Every enqueue was accepted under drop-oldest.
        assert_eq!(queue.stats().total, 6);
    }

    #[test]
    fn test_overflow_scenario_capacity_four() {
        // Capacity 4; enqueue 6 in sequence: pending stays 4, enqueues 5 and
        // 6 are rejected.
        let queue = EventQueue::new(4, OverflowPolicy::Reject);
        let mut lost_enqueued = 0;
        for i in 0..6u64 {
            if matches!(queue.enqueue(make_event(i)), Err(Error::Full)) {
                lost_enqueued += 1;
            }
            if i == 3 {
                assert_eq!(queue.stats().pending, 4);
            }
        }
        assert_eq!(lost_enqueued, 2);
        assert_eq!(queue.stats().pending, 4);
    }

    #[test]
    fn test_stats_track_last_event_ns() {
        let queue = EventQueue::new(8, OverflowPolicy::Reject);
        queue.enqueue(make_event(7)).unwrap();
        assert_eq!(queue.stats().last_event_ns, 1_000_000_007);
        assert_eq!(queue.stats().total, 1);
        assert_eq!(queue.stats().processed, 0);
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let queue = EventQueue::new(8, OverflowPolicy::Reject);
        let mut event = make_event(0);

        queue.mark_processed(&mut event);
        assert!(event.processed);
        let first_stamp = event.processed_time_ns;
        assert!(first_stamp > 0);

        queue.mark_processed(&mut event);
        assert_eq!(event.processed_time_ns, first_stamp);
        assert_eq!(queue.stats().processed, 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = EventQueue::new(8, OverflowPolicy::Reject);
        let token = ShutdownToken::new();
        let result = queue.dequeue(Duration::from_millis(20), &token).await;
        assert!(matches!(result, Ok(None)));
    }

    #[tokio::test]
    async fn test_dequeue_returns_shutting_down() {
        let queue = EventQueue::new(8, OverflowPolicy::Reject);
        let token = ShutdownToken::new();
        token.signal();
        let result = queue.dequeue(Duration::from_secs(5), &token).await;
        assert!(matches!(result, Err(Error::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        use std::sync::Arc;

        let queue = Arc::new(EventQueue::new(8, OverflowPolicy::Reject));
        let token = ShutdownToken::new();

        let consumer = Arc::clone(&queue);
        let consumer_token = token.clone();
        let handle = tokio::spawn(async move {
            consumer
                .dequeue(Duration::from_secs(5), &consumer_token)
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(make_event(42)).unwrap();

        let event = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(event.pid, 142);
    }

    #[test]
    fn test_multi_producer_total_accounting() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(EventQueue::new(100_000, OverflowPolicy::Reject));
        let mut handles = Vec::new();
        for p in 0..4u64 {
            let queue = Arc::clone(&queue);
            handles.push(thread::spawn(move || {
                for i in 0..1000u64 {
                    queue.enqueue(make_event(p * 1000 + i)).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(queue.stats().total, 4000);
        assert_eq!(queue.stats().pending, 4000);
    }
}
