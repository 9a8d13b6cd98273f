//! # Metrics Queue
//!
//! A concurrent FIFO holding area for telemetry batches awaiting
//! transmission. Unbounded; a hardened deployment would add a bound and a
//! drop policy.

use std::collections::VecDeque;
use std::sync::Mutex;

use shared::types::MetricBatch;

/// Concurrent, unbounded, FIFO queue of metric batches.
///
/// Any number of producers may `enqueue` concurrently; one consumer calls
/// `drain_all` per dispatch cycle. No operation blocks on I/O and none can
/// fail.
#[derive(Default)]
pub struct MetricsQueue {
    inner: Mutex<VecDeque<MetricBatch>>,
}

impl MetricsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch. Never blocks, never fails.
    pub fn enqueue(&self, batch: MetricBatch) {
        self.inner
            .lock()
            .expect("metrics queue lock poisoned")
            .push_back(batch);
    }

    /// Remove and return everything currently queued, in FIFO order.
    ///
    /// Atomic with respect to concurrent `enqueue` calls: a batch is either
    /// part of this drain or still queued for the next one, never both or
    /// neither.
    pub fn drain_all(&self) -> Vec<MetricBatch> {
        let mut queue = self.inner.lock().expect("metrics queue lock poisoned");
        queue.drain(..).collect()
    }

    /// Number of batches currently queued
    pub fn len(&self) -> usize {
        self.inner.lock().expect("metrics queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use uuid::Uuid;

    fn batch(family: &str) -> MetricBatch {
        MetricBatch {
            device_id: Uuid::nil(),
            family_name: family.into(),
            labels: vec![],
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_drain_preserves_fifo_order() {
        let queue = MetricsQueue::new();
        for name in ["a", "b", "c"] {
            queue.enqueue(batch(name));
        }

        let drained = queue.drain_all();
        let names: Vec<&str> = drained.iter().map(|b| b.family_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_on_empty_queue_returns_nothing() {
        let queue = MetricsQueue::new();
        assert!(queue.drain_all().is_empty());
    }

    #[test]
    fn test_concurrent_enqueue_is_lossless() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 200;

        let queue = Arc::new(MetricsQueue::new());

        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        queue.enqueue(batch(&format!("{}-{}", p, i)));
                    }
                })
            })
            .collect();

        // Drain concurrently with the producers; nothing may be lost or
        // duplicated across the enqueue/drain race.
        let mut collected = Vec::new();
        while collected.len() < PRODUCERS * PER_PRODUCER {
            collected.extend(queue.drain_all());
        }

        for handle in handles {
            handle.join().unwrap();
        }
        collected.extend(queue.drain_all());

        assert_eq!(collected.len(), PRODUCERS * PER_PRODUCER);

        let mut names: Vec<String> =
            collected.iter().map(|b| b.family_name.clone()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), PRODUCERS * PER_PRODUCER);
    }

    #[test]
    fn test_per_producer_order_is_preserved() {
        let queue = Arc::new(MetricsQueue::new());

        for i in 0..100 {
            queue.enqueue(batch(&format!("{:03}", i)));
        }

        let drained = queue.drain_all();
        let names: Vec<&str> = drained.iter().map(|b| b.family_name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }
}
