//! # Controller Transport
//!
//! The channel abstraction the bootstrap protocol and the metrics dispatcher
//! talk through, plus the real TLS implementation.
//!
//! Frames are length-prefixed JSON: a 4-byte big-endian length followed by a
//! serialized [`ControllerRequest`]/[`ControllerResponse`], capped at
//! [`MAX_FRAME_SIZE`]. TLS is established through the [`TrustAnchor`]'s
//! pinned-root configuration; there is no plaintext fallback.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};
use uuid::Uuid;

use rustls::pki_types::ServerName;

use shared::{
    constants::MAX_FRAME_SIZE,
    error::{AgentError, AgentResult},
    types::{
        Challenge, ChallengeResponse, ControllerErrorCode, ControllerRequest, ControllerResponse,
        MetricBatch, PushAck, SignedCertificate, SignedCredential,
    },
};

use crate::trust::TrustAnchor;

// =============================================================================
// CHANNEL TRAITS
// =============================================================================

/// A connected channel to the controller
#[async_trait]
pub trait ControllerChannel: Send {
    /// Ask the controller for a fresh challenge
    async fn get_challenge(&mut self, device_id: Uuid) -> AgentResult<Challenge>;

    /// Submit a challenge response and receive the signed certificate
    async fn request_sign(
        &mut self,
        response: &ChallengeResponse,
    ) -> AgentResult<SignedCertificate>;

    /// Push a drained set of metric batches as one request
    async fn push_metrics(&mut self, batches: &[MetricBatch]) -> AgentResult<PushAck>;
}

/// Opens channels to the controller.
///
/// Bootstrap opens without a client credential (server-authenticated only);
/// the dispatcher opens with the installed credential for mutual TLS.
#[async_trait]
pub trait ChannelOpener: Send + Sync {
    async fn open(
        &self,
        client_credential: Option<&SignedCredential>,
    ) -> AgentResult<Box<dyn ControllerChannel>>;
}

// =============================================================================
// FRAMED CHANNEL
// =============================================================================

/// A controller channel speaking length-prefixed JSON over any byte stream
pub struct FramedChannel<S> {
    stream: S,
    endpoint: String,
}

impl<S> FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established stream
    pub fn new(stream: S, endpoint: String) -> Self {
        Self { stream, endpoint }
    }

    fn transport_err(&self, reason: impl ToString) -> AgentError {
        AgentError::TransportError {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }

    /// Map a read-side I/O error; a peer that vanished mid-exchange is a
    /// cancellation, everything else a transport failure.
    fn read_err(&self, err: std::io::Error) -> AgentError {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => {
                AgentError::Cancelled("transport closed mid-exchange".into())
            }
            _ => self.transport_err(err),
        }
    }

    async fn send_frame(&mut self, request: &ControllerRequest) -> AgentResult<()> {
        let json = serde_json::to_vec(request)?;

        let len = (json.len() as u32).to_be_bytes();
        self.stream
            .write_all(&len)
            .await
            .map_err(|e| self.transport_err(e))?;
        self.stream
            .write_all(&json)
            .await
            .map_err(|e| self.transport_err(e))?;
        self.stream
            .flush()
            .await
            .map_err(|e| self.transport_err(e))?;

        Ok(())
    }

    async fn read_frame(&mut self) -> AgentResult<ControllerResponse> {
        let mut len_bytes = [0u8; 4];
        self.stream
            .read_exact(&mut len_bytes)
            .await
            .map_err(|e| self.read_err(e))?;

        let len = u32::from_be_bytes(len_bytes) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(self.transport_err(format!("frame of {} bytes exceeds limit", len)));
        }

        let mut buffer = vec![0u8; len];
        self.stream
            .read_exact(&mut buffer)
            .await
            .map_err(|e| self.read_err(e))?;

        Ok(serde_json::from_slice(&buffer)?)
    }

    /// One unary exchange: send `request`, read the reply, surface
    /// controller-reported errors as typed failures.
    async fn call(&mut self, request: &ControllerRequest) -> AgentResult<ControllerResponse> {
        self.send_frame(request).await?;

        match self.read_frame().await? {
            ControllerResponse::Error { code, message } => Err(match code {
                ControllerErrorCode::ChallengeRejected => AgentError::ChallengeRejected(message),
                ControllerErrorCode::Internal => self.transport_err(message),
            }),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl<S> ControllerChannel for FramedChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn get_challenge(&mut self, device_id: Uuid) -> AgentResult<Challenge> {
        match self
            .call(&ControllerRequest::GetChallenge { device_id })
            .await?
        {
            ControllerResponse::Challenge(challenge) => Ok(challenge),
            other => Err(AgentError::UnexpectedResponse(format!(
                "expected challenge, got {:?}",
                other
            ))),
        }
    }

    async fn request_sign(
        &mut self,
        response: &ChallengeResponse,
    ) -> AgentResult<SignedCertificate> {
        match self
            .call(&ControllerRequest::RequestSign(response.clone()))
            .await?
        {
            ControllerResponse::Signed(certificate) => Ok(certificate),
            other => Err(AgentError::UnexpectedResponse(format!(
                "expected signed certificate, got {:?}",
                other
            ))),
        }
    }

    async fn push_metrics(&mut self, batches: &[MetricBatch]) -> AgentResult<PushAck> {
        match self
            .call(&ControllerRequest::PushMetrics {
                batches: batches.to_vec(),
            })
            .await?
        {
            ControllerResponse::Ack(ack) => Ok(ack),
            other => Err(AgentError::UnexpectedResponse(format!(
                "expected ack, got {:?}",
                other
            ))),
        }
    }
}

// =============================================================================
// TLS OPENER
// =============================================================================

/// Opens TLS channels to the controller, verified against the trust anchor
pub struct TlsChannelOpener {
    address: String,
    port: u16,
    trust_anchor: TrustAnchor,
    handshake_timeout: Duration,
}

impl TlsChannelOpener {
    pub fn new(
        address: String,
        port: u16,
        trust_anchor: TrustAnchor,
        handshake_timeout_secs: u64,
    ) -> Self {
        Self {
            address,
            port,
            trust_anchor,
            handshake_timeout: Duration::from_secs(handshake_timeout_secs),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[async_trait]
impl ChannelOpener for TlsChannelOpener {
    async fn open(
        &self,
        client_credential: Option<&SignedCredential>,
    ) -> AgentResult<Box<dyn ControllerChannel>> {
        let endpoint = self.endpoint();
        info!(endpoint = %endpoint, mtls = client_credential.is_some(), "Opening controller channel");

        let tls_config = self.trust_anchor.client_config(client_credential)?;
        let connector = TlsConnector::from(Arc::new(tls_config));

        let stream = TcpStream::connect(&endpoint)
            .await
            .map_err(|e| AgentError::TransportError {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let server_name = ServerName::try_from(self.address.clone()).map_err(|_| {
            AgentError::TransportError {
                endpoint: endpoint.clone(),
                reason: "invalid server name".into(),
            }
        })?;

        let tls_stream = tokio::time::timeout(
            self.handshake_timeout,
            connector.connect(server_name, stream),
        )
        .await
        .map_err(|_| AgentError::ConnectionTimeout {
            timeout_secs: self.handshake_timeout.as_secs(),
        })?
        .map_err(|e| AgentError::TransportError {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        debug!(endpoint = %endpoint, "TLS handshake completed");

        Ok(Box::new(FramedChannel::new(tls_stream, endpoint)))
    }
}
