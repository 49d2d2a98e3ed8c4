//! Relay server: terminates inbound Linkage streams.
//!
//! For every inbound `Relay` stream the server
//! - acknowledges each received envelope with a receipt before anything else,
//! - stamps the 1-based `sequence_term` on it,
//! - dispatches the *previous* envelope through `on_relay` (one-message lag,
//!   so sequence metadata is final before dispatch),
//! - hands the last envelope to `on_relay_complete` once the peer closes the
//!   stream, or to `on_relay_complete_error` when the stream fails.
//!
//! Each stream runs on its own task and owns its counter and pending slot.

use crate::error::RelayError;
use crate::proto::{
    linkage_server::{Linkage, LinkageServer},
    Message, Receipt, ServiceInfo,
};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

/// Capacity of the per-stream receipt channel.
const RECEIPT_BUFFER: usize = 32;

pub type OnRelayHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<(), RelayError>> + Send + Sync>;
pub type OnRelayCompleteHandler = OnRelayHandler;
pub type OnRelayCompleteErrorHandler =
    Arc<dyn Fn(Option<Message>, RelayError) -> BoxFuture<'static, ()> + Send + Sync>;
pub type OnRegistrationCompleteHandler =
    Arc<dyn Fn(ServiceInfo) -> BoxFuture<'static, Result<(), RelayError>> + Send + Sync>;

/// Callbacks bound to a [`RelayServer`] at construction.
#[derive(Clone)]
pub struct RelayHandlers {
    pub on_relay: OnRelayHandler,
    pub on_relay_complete: OnRelayCompleteHandler,
    pub on_relay_complete_error: OnRelayCompleteErrorHandler,
    pub on_registration_complete: OnRegistrationCompleteHandler,
}

impl Default for RelayHandlers {
    fn default() -> Self {
        Self {
            on_relay: Arc::new(|msg: Message| unhandled("on_relay", msg).boxed()),
            on_relay_complete: Arc::new(|msg: Message| unhandled("on_relay_complete", msg).boxed()),
            on_relay_complete_error: Arc::new(|last: Option<Message>, err: RelayError| {
                async move {
                    warn!(
                        message_id = last.as_ref().map(|m| m.id.as_str()).unwrap_or_default(),
                        error = %err,
                        "Relay stream failed"
                    );
                }
                .boxed()
            }),
            on_registration_complete: Arc::new(|_: ServiceInfo| {
                async { Ok::<(), RelayError>(()) }.boxed()
            }),
        }
    }
}

async fn unhandled(handler: &'static str, msg: Message) -> Result<(), RelayError> {
    warn!(
        handler,
        message_id = %msg.id,
        consumption_id = %msg.consumption_id,
        "No relay handler installed, dropping message"
    );
    Ok(())
}

impl RelayHandlers {
    pub fn with_on_relay<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        self.on_relay = Arc::new(move |msg: Message| f(msg).boxed());
        self
    }

    pub fn with_on_relay_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        self.on_relay_complete = Arc::new(move |msg: Message| f(msg).boxed());
        self
    }

    pub fn with_on_relay_complete_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<Message>, RelayError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_relay_complete_error =
            Arc::new(move |last: Option<Message>, err: RelayError| f(last, err).boxed());
        self
    }

    pub fn with_on_registration_complete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ServiceInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
    {
        self.on_registration_complete = Arc::new(move |info: ServiceInfo| f(info).boxed());
        self
    }
}

/// Linkage service implementation driving the inbound half of the protocol.
#[derive(Clone)]
pub struct RelayServer {
    name: Arc<str>,
    handlers: Arc<RelayHandlers>,
}

impl RelayServer {
    pub fn new(name: impl Into<String>, handlers: RelayHandlers) -> Self {
        Self {
            name: Arc::from(name.into()),
            handlers: Arc::new(handlers),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_service(self) -> LinkageServer<Self> {
        LinkageServer::new(self)
    }

    /// Serves the Linkage service on `addr` until `shutdown` resolves.
    pub async fn serve<F>(self, addr: SocketAddr, shutdown: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        info!(service_name = %self.name, address = %addr, "Starting relay server");
        Server::builder()
            .add_service(self.into_service())
            .serve_with_shutdown(addr, shutdown)
            .await?;
        info!("Relay server stopped");
        Ok(())
    }

    /// Runs the registration callback for `service_info`.
    ///
    /// The local caller gets the callback error; the gRPC peer gets it as a
    /// negative receipt (see the `Linkage` implementation).
    pub async fn complete_registration(
        &self,
        service_info: ServiceInfo,
    ) -> Result<Receipt, RelayError> {
        debug!(
            service_name = %service_info.service_name,
            service_version = %service_info.service_version,
            "Registration received"
        );
        (self.handlers.on_registration_complete)(service_info)
            .await
            .map_err(|e| {
                error!(error = %e, "Error in service registration");
                match e.kind() {
                    crate::error::ErrorKind::Registration => e,
                    _ => RelayError::registration(e),
                }
            })?;
        Ok(Receipt::ok())
    }

    /// Drives one inbound relay stream to completion.
    ///
    /// Returns the number of envelopes received when the peer closed the
    /// stream cleanly.
    pub async fn relay_stream<S>(
        &self,
        mut inbound: S,
        receipts: mpsc::Sender<Result<Receipt, Status>>,
    ) -> Result<u64, RelayError>
    where
        S: Stream<Item = Result<Message, Status>> + Unpin + Send,
    {
        debug!(service_name = %self.name, "Starting to receive relay messages on stream");

        let mut count: u64 = 0;
        let mut pending: Option<Message> = None;

        loop {
            match inbound.next().await {
                None => return self.complete(pending, count).await,
                Some(Err(status)) => {
                    error!(
                        service_name = %self.name,
                        error = %status,
                        "Error in receiving relay messages"
                    );
                    (self.handlers.on_relay_complete_error)(pending, RelayError::from(status.clone()))
                        .await;
                    return Err(RelayError::from(status));
                }
                Some(Ok(mut msg)) => {
                    debug!(
                        service_name = %self.name,
                        parent_message_id = %msg.parent_id,
                        message_id = %msg.id,
                        "Received message to relay"
                    );
                    self.send_receipt(&receipts).await;

                    count += 1;
                    msg.stamp_sequence_term(count);
                    if let Some(mut previous) = pending.take() {
                        previous.mark_sequence_member();
                        self.dispatch(previous).await;
                    }
                    pending = Some(msg);
                }
            }
        }
    }

    async fn send_receipt(&self, receipts: &mpsc::Sender<Result<Receipt, Status>>) {
        match receipts.send(Ok(Receipt::ok())).await {
            Ok(()) => debug!(service_name = %self.name, "Relay receipt sent"),
            Err(e) => error!(
                service_name = %self.name,
                error = %e,
                "Error in sending relay receipt"
            ),
        }
    }

    async fn dispatch(&self, msg: Message) {
        let message_id = msg.id.clone();
        if let Err(e) = (self.handlers.on_relay)(msg).await {
            error!(
                service_name = %self.name,
                message_id = %message_id,
                error = %e,
                "Relay handler failed"
            );
        }
    }

    async fn complete(&self, last: Option<Message>, count: u64) -> Result<u64, RelayError> {
        let Some(mut last) = last else {
            error!(
                service_name = %self.name,
                "Unexpected end of message stream, expected to have at least one message"
            );
            (self.handlers.on_relay_complete_error)(None, RelayError::empty_stream()).await;
            return Err(RelayError::empty_stream());
        };

        debug!(
            service_name = %self.name,
            message_count = count,
            "Message relay complete"
        );
        last.finalize_sequence(count);

        let message_id = last.id.clone();
        if let Err(e) = (self.handlers.on_relay_complete)(last).await {
            error!(
                service_name = %self.name,
                message_id = %message_id,
                error = %e,
                "Relay completion handler failed"
            );
        }
        Ok(count)
    }
}

#[tonic::async_trait]
impl Linkage for RelayServer {
    type RelayStream = ReceiverStream<Result<Receipt, Status>>;

    async fn registration(
        &self,
        request: Request<ServiceInfo>,
    ) -> Result<Response<Receipt>, Status> {
        let receipt = match self.complete_registration(request.into_inner()).await {
            Ok(receipt) => receipt,
            Err(e) => Receipt::failed(&e),
        };
        Ok(Response::new(receipt))
    }

    async fn relay(
        &self,
        request: Request<Streaming<Message>>,
    ) -> Result<Response<Self::RelayStream>, Status> {
        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(RECEIPT_BUFFER);

        let server = self.clone();
        tokio::spawn(async move {
            if let Err(e) = server.relay_stream(inbound, tx.clone()).await {
                let _ = tx.send(Err(e.into())).await;
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
