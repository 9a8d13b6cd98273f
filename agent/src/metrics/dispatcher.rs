//! # Metrics Dispatcher
//!
//! Periodically drains the metrics queue and pushes the drained batches over
//! a mutual-TLS channel authenticated with the bootstrapped credential.
//!
//! Delivery is at-most-once: batches drained for a failed push are dropped,
//! not re-enqueued. Push failures are logged and never kill the loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use shared::{
    error::AgentResult,
    types::{MetricBatch, PushAck, SignedCredential},
};

use crate::credential::CredentialStore;
use crate::metrics::queue::MetricsQueue;
use crate::transport::ChannelOpener;

/// What one dispatch cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No credential installed yet; nothing was attempted
    NotProvisioned,
    /// Credential present but nothing queued
    QueueEmpty,
    /// All drained batches were transmitted
    Sent(usize),
    /// Transmission failed; the drained batches were dropped
    Dropped(usize),
}

/// Drains the queue and transmits batches on a fixed period
pub struct MetricsDispatcher {
    queue: Arc<MetricsQueue>,
    credentials: Arc<CredentialStore>,
    opener: Arc<dyn ChannelOpener>,
    period: Duration,
}

impl MetricsDispatcher {
    pub fn new(
        queue: Arc<MetricsQueue>,
        credentials: Arc<CredentialStore>,
        opener: Arc<dyn ChannelOpener>,
        period: Duration,
    ) -> Self {
        Self {
            queue,
            credentials,
            opener,
            period,
        }
    }

    /// Run one dispatch cycle.
    ///
    /// Skips without draining when no credential is installed — not an
    /// error, the device is just not provisioned yet. Exposed separately
    /// from the loop so tests can drive ticks deterministically.
    pub async fn run_cycle(&self) -> DispatchOutcome {
        let Some(credential) = self.credentials.current() else {
            debug!("No credential installed, deferring dispatch");
            return DispatchOutcome::NotProvisioned;
        };

        if self.queue.is_empty() {
            return DispatchOutcome::QueueEmpty;
        }

        let batches = self.queue.drain_all();
        if batches.is_empty() {
            return DispatchOutcome::QueueEmpty;
        }

        match self.transmit(&credential, &batches).await {
            Ok(ack) => {
                info!(
                    batches = batches.len(),
                    accepted = ack.accepted,
                    "Metrics pushed"
                );
                DispatchOutcome::Sent(batches.len())
            }
            Err(err) => {
                // At-most-once: the drained batches are gone.
                warn!(
                    batches = batches.len(),
                    error = %err,
                    "Metrics push failed, dropping drained batches"
                );
                DispatchOutcome::Dropped(batches.len())
            }
        }
    }

    async fn transmit(
        &self,
        credential: &SignedCredential,
        batches: &[MetricBatch],
    ) -> AgentResult<PushAck> {
        let mut channel = self.opener.open(Some(credential)).await?;
        channel.push_metrics(batches).await
    }

    /// Spawn the dispatch loop, one cycle per period, forever
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let outcome = self.run_cycle().await;
                debug!(outcome = ?outcome, "Dispatch cycle finished");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::{FileKeyStore, SecureKeyStore};
    use crate::transport::ControllerChannel;
    use async_trait::async_trait;
    use chrono::Utc;
    use shared::config::StorageConfig;
    use shared::constants::GATEWAY_KEY_ALIAS;
    use shared::error::AgentError;
    use shared::types::{Challenge, ChallengeResponse, SignedCertificate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;
    use uuid::Uuid;

    struct RecorderState {
        opens: AtomicUsize,
        fail_pushes: bool,
        pushed: StdMutex<Vec<Vec<MetricBatch>>>,
    }

    impl RecorderState {
        fn new(fail_pushes: bool) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                fail_pushes,
                pushed: StdMutex::new(Vec::new()),
            })
        }
    }

    struct PushRecorder {
        state: Arc<RecorderState>,
    }

    struct RecorderChannel {
        state: Arc<RecorderState>,
    }

    #[async_trait]
    impl ControllerChannel for RecorderChannel {
        async fn get_challenge(&mut self, _device_id: Uuid) -> AgentResult<Challenge> {
            unreachable!("dispatcher never requests challenges")
        }

        async fn request_sign(
            &mut self,
            _response: &ChallengeResponse,
        ) -> AgentResult<SignedCertificate> {
            unreachable!("dispatcher never submits CSRs")
        }

        async fn push_metrics(&mut self, batches: &[MetricBatch]) -> AgentResult<PushAck> {
            if self.state.fail_pushes {
                return Err(AgentError::TransportError {
                    endpoint: "test".into(),
                    reason: "connection reset".into(),
                });
            }
            self.state.pushed.lock().unwrap().push(batches.to_vec());
            Ok(PushAck {
                accepted: batches.len() as u32,
            })
        }
    }

    #[async_trait]
    impl ChannelOpener for PushRecorder {
        async fn open(
            &self,
            client_credential: Option<&SignedCredential>,
        ) -> AgentResult<Box<dyn ControllerChannel>> {
            assert!(
                client_credential.is_some(),
                "dispatcher must authenticate with the installed credential"
            );
            self.state.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecorderChannel {
                state: self.state.clone(),
            }))
        }
    }

    fn batch(family: &str) -> MetricBatch {
        MetricBatch {
            device_id: Uuid::nil(),
            family_name: family.into(),
            labels: vec![],
            captured_at: Utc::now(),
        }
    }

    async fn credentials_at(dir: &std::path::Path) -> Arc<CredentialStore> {
        let config = StorageConfig {
            data_path: dir.to_path_buf(),
        };
        let keystore: Arc<dyn SecureKeyStore> =
            Arc::new(FileKeyStore::open(&config).await.unwrap());
        Arc::new(CredentialStore::new(keystore, GATEWAY_KEY_ALIAS))
    }

    async fn install_dummy(credentials: &CredentialStore) {
        credentials
            .install(SignedCredential::new(
                GATEWAY_KEY_ALIAS.into(),
                vec![vec![1, 2, 3]],
                vec![4, 5, 6],
            ))
            .await
            .unwrap();
    }

    fn recorder(fail_pushes: bool) -> (Arc<dyn ChannelOpener>, Arc<RecorderState>) {
        let state = RecorderState::new(fail_pushes);
        (
            Arc::new(PushRecorder {
                state: state.clone(),
            }),
            state,
        )
    }

    #[tokio::test]
    async fn test_no_credential_means_no_transmission() {
        let dir = tempdir().unwrap();
        let queue = Arc::new(MetricsQueue::new());
        let (opener, state) = recorder(false);

        queue.enqueue(batch("a"));

        let dispatcher = MetricsDispatcher::new(
            queue.clone(),
            credentials_at(dir.path()).await,
            opener,
            Duration::from_secs(1),
        );

        // Several ticks with no credential: nothing sent, nothing dropped.
        for _ in 0..3 {
            assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::NotProvisioned);
        }
        assert_eq!(state.opens.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_skips_transmission() {
        let dir = tempdir().unwrap();
        let credentials = credentials_at(dir.path()).await;
        install_dummy(&credentials).await;

        let (opener, state) = recorder(false);
        let dispatcher = MetricsDispatcher::new(
            Arc::new(MetricsQueue::new()),
            credentials,
            opener,
            Duration::from_secs(1),
        );

        assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::QueueEmpty);
        assert_eq!(state.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_transmission_per_tick_with_exact_payload() {
        let dir = tempdir().unwrap();
        let credentials = credentials_at(dir.path()).await;
        install_dummy(&credentials).await;

        let queue = Arc::new(MetricsQueue::new());
        queue.enqueue(batch("a"));
        queue.enqueue(batch("b"));

        let (opener, state) = recorder(false);
        let dispatcher = MetricsDispatcher::new(
            queue.clone(),
            credentials,
            opener,
            Duration::from_secs(1),
        );

        assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::Sent(2));
        assert_eq!(state.opens.load(Ordering::SeqCst), 1);
        assert!(queue.is_empty());

        // Exactly one push carrying both batches in enqueue order.
        let pushed = state.pushed.lock().unwrap();
        assert_eq!(pushed.len(), 1);
        let names: Vec<&str> = pushed[0].iter().map(|b| b.family_name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        drop(pushed);

        // Next tick has nothing left to send.
        assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::QueueEmpty);
        assert_eq!(state.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_push_failure_drops_batches_and_loop_survives() {
        let dir = tempdir().unwrap();
        let credentials = credentials_at(dir.path()).await;
        install_dummy(&credentials).await;

        let queue = Arc::new(MetricsQueue::new());
        queue.enqueue(batch("a"));

        let (opener, state) = recorder(true);
        let dispatcher = MetricsDispatcher::new(
            queue.clone(),
            credentials,
            opener,
            Duration::from_secs(1),
        );

        assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::Dropped(1));
        // At-most-once: the failed batch is not re-enqueued.
        assert!(queue.is_empty());
        assert!(state.pushed.lock().unwrap().is_empty());

        // The next cycle proceeds normally.
        queue.enqueue(batch("b"));
        assert_eq!(dispatcher.run_cycle().await, DispatchOutcome::Dropped(1));
    }
}
