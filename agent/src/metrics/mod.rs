//! # Metrics Collection
//!
//! Local telemetry capture and delivery. `MetricsManager` is the collection
//! entry point: it stamps every batch with the device identity and capture
//! time, then hands it to the [`MetricsQueue`] for the [`MetricsDispatcher`]
//! to drain on its next cycle.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::{DispatchOutcome, MetricsDispatcher};
pub use queue::MetricsQueue;

use std::sync::Arc;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use shared::constants::{LABEL_DEVICE_UUID, LABEL_TIMESTAMP};
use shared::types::{LabelPair, MetricBatch};

/// Collection facade stamping batches with device identity before queueing
pub struct MetricsManager {
    device_id: Uuid,
    queue: Arc<MetricsQueue>,
}

impl MetricsManager {
    pub fn new(device_id: Uuid, queue: Arc<MetricsQueue>) -> Self {
        Self { device_id, queue }
    }

    /// Capture one batch of labels under `family_name` and queue it.
    ///
    /// Two implicit labels are always present, ahead of the caller's: the
    /// owning device id and the capture timestamp in epoch milliseconds.
    pub fn collect(&self, family_name: impl Into<String>, labels: Vec<LabelPair>) -> MetricBatch {
        let family_name = family_name.into();
        let captured_at = Utc::now();

        let mut stamped = Vec::with_capacity(labels.len() + 2);
        stamped.push(LabelPair::new(LABEL_DEVICE_UUID, self.device_id.to_string()));
        stamped.push(LabelPair::new(
            LABEL_TIMESTAMP,
            captured_at.timestamp_millis().to_string(),
        ));
        stamped.extend(labels);

        let batch = MetricBatch {
            device_id: self.device_id,
            family_name: family_name.clone(),
            labels: stamped,
            captured_at,
        };

        self.queue.enqueue(batch.clone());
        debug!(family = %family_name, "Metric batch queued");
        batch
    }

    /// The queue fed by this manager
    pub fn queue(&self) -> Arc<MetricsQueue> {
        self.queue.clone()
    }
}
