//! Outbound Linkage client.
//!
//! [`RpcClient`] is the capability a [`Link`](crate::link::Link) uses to reach
//! the next hop: open a relay stream seeded with a source envelope, or
//! register a service. [`GrpcRpcClient`] implements it over tonic.

use crate::config::ClientSettings;
use crate::discovery::ServiceEndpoint;
use crate::error::RelayError;
use crate::producer::OutboundStream;
use crate::proto::{linkage_client::LinkageClient, Message, Receipt, ServiceInfo};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

/// An open outbound relay stream together with the envelope it was opened for.
pub struct ClientRelay {
    pub stream: Arc<dyn OutboundStream>,
    pub source_message: Message,
}

/// Outbound RPC capability.
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Opens a new relay stream to `endpoint` for `source`.
    async fn build_client_relay(
        &self,
        source: Message,
        endpoint: &ServiceEndpoint,
    ) -> Result<ClientRelay, RelayError>;

    /// Registers `service_info` with the Linkage service at `endpoint`.
    async fn client_register(
        &self,
        endpoint: &ServiceEndpoint,
        service_info: ServiceInfo,
    ) -> Result<Receipt, RelayError>;
}

/// tonic implementation of [`RpcClient`].
///
/// Every relay opens its own connection and stream; nothing is pooled.
#[derive(Debug, Clone, Default)]
pub struct GrpcRpcClient {
    settings: ClientSettings,
}

impl GrpcRpcClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    async fn connect(
        &self,
        endpoint: &ServiceEndpoint,
    ) -> Result<LinkageClient<Channel>, RelayError> {
        let uri = endpoint.uri();
        debug!(uri = %uri, "Connecting to relay endpoint");

        let mut builder =
            Endpoint::from_shared(uri)?.connect_timeout(self.settings.connect_timeout());
        if let Some(timeout) = self.settings.request_timeout() {
            builder = builder.timeout(timeout);
        }

        let channel = builder.connect().await?;
        Ok(LinkageClient::new(channel))
    }
}

#[async_trait]
impl RpcClient for GrpcRpcClient {
    async fn build_client_relay(
        &self,
        source: Message,
        endpoint: &ServiceEndpoint,
    ) -> Result<ClientRelay, RelayError> {
        let mut client = self.connect(endpoint).await?;
        let (tx, rx) = mpsc::channel(self.settings.relay_buffer);

        let mut receipts = client.relay(ReceiverStream::new(rx)).await?.into_inner();

        let source_id = source.id.clone();
        let peer = endpoint.to_string();
        let drain = tokio::spawn(async move {
            // holds the connection until the peer ends the receipt stream
            let _client = client;
            loop {
                match receipts.message().await {
                    Ok(Some(receipt)) if receipt.is_ok => {
                        debug!(peer = %peer, message_id = %source_id, "Relay receipt received");
                    }
                    Ok(Some(receipt)) => {
                        warn!(
                            peer = %peer,
                            message_id = %source_id,
                            error = %receipt.error,
                            "Negative relay receipt"
                        );
                    }
                    Ok(None) => return Ok(()),
                    Err(status) => {
                        warn!(
                            peer = %peer,
                            message_id = %source_id,
                            error = %status,
                            "Relay stream ended with error"
                        );
                        return Err(RelayError::from(status));
                    }
                }
            }
        });

        Ok(ClientRelay {
            stream: Arc::new(GrpcOutboundStream::with_drain(
                tx,
                drain,
                self.settings.receipt_timeout(),
            )),
            source_message: source,
        })
    }

    async fn client_register(
        &self,
        endpoint: &ServiceEndpoint,
        service_info: ServiceInfo,
    ) -> Result<Receipt, RelayError> {
        let mut client = self.connect(endpoint).await?;
        let receipt = client.registration(service_info).await?.into_inner();
        info!(peer = %endpoint, is_ok = receipt.is_ok, "Registration receipt received");
        Ok(receipt)
    }
}

/// Send side of a tonic relay stream.
///
/// `close_send` ends the request stream and then waits for the peer to end
/// its receipt stream, bounded by the receipt timeout.
pub struct GrpcOutboundStream {
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    drain: Mutex<Option<JoinHandle<Result<(), RelayError>>>>,
    receipt_timeout: Option<Duration>,
    sent: AtomicU64,
}

impl GrpcOutboundStream {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            drain: Mutex::new(None),
            receipt_timeout: None,
            sent: AtomicU64::new(0),
        }
    }

    /// Stream whose `close_send` joins `drain`, the task reading receipts.
    pub fn with_drain(
        sender: mpsc::Sender<Message>,
        drain: JoinHandle<Result<(), RelayError>>,
        receipt_timeout: Option<Duration>,
    ) -> Self {
        Self {
            drain: Mutex::new(Some(drain)),
            receipt_timeout,
            ..Self::new(sender)
        }
    }
}

#[async_trait]
impl OutboundStream for GrpcOutboundStream {
    async fn send(&self, message: Message) -> Result<(), RelayError> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or_else(|| RelayError::transport("send side already closed"))?;
        sender
            .send(message)
            .await
            .map_err(|_| RelayError::transport("relay stream closed by peer"))?;
        self.sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn close_send(&self) -> Result<(), RelayError> {
        self.sender.lock().take();
        let drain = self.drain.lock().take();
        let Some(mut drain) = drain else {
            return Ok(());
        };

        let joined = match self.receipt_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut drain).await {
                Ok(joined) => joined,
                Err(_) => {
                    drain.abort();
                    return Err(RelayError::transport(format!(
                        "peer did not end the receipt stream within {:?}",
                        limit
                    )));
                }
            },
            None => drain.await,
        };

        match joined {
            Ok(Ok(())) => Ok(()),
            // the peer rejects a stream that carried no message
            Ok(Err(e)) if self.sent.load(Ordering::Acquire) == 0 => {
                debug!(error = %e, "Empty relay stream rejected by peer");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(RelayError::transport(e)),
        }
    }
}
