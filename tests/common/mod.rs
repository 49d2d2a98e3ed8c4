//! Common test utilities for relay server and link tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relaylink_core::{
    ClientRelay, ErrorKind, Message, OutboundStream, Receipt, RelayError, RelayHandlers,
    RelayServer, RpcClient, ServiceEndpoint, ServiceInfo,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

pub const SIDECAR_HOST: &str = "sidecar.test";
pub const SIDECAR_PORT: u16 = 50010;

pub fn sidecar() -> ServiceEndpoint {
    ServiceEndpoint::new(SIDECAR_HOST, SIDECAR_PORT)
}

/// Outbound stream that records everything sent through it.
#[derive(Default)]
pub struct RecordingStream {
    sent: Mutex<Vec<Message>>,
    closed: AtomicUsize,
    fail_send: AtomicBool,
}

impl RecordingStream {
    pub fn failing() -> Self {
        let stream = Self::default();
        stream.fail_send.store(true, Ordering::SeqCst);
        stream
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutboundStream for RecordingStream {
    async fn send(&self, message: Message) -> Result<(), RelayError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(RelayError::transport("stream reset by peer"));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn close_send(&self) -> Result<(), RelayError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// [`RpcClient`] that hands out a shared [`RecordingStream`] and records
/// every call.
pub struct MockRpcClient {
    pub stream: Arc<RecordingStream>,
    relays: Mutex<Vec<(String, ServiceEndpoint)>>,
    registrations: Mutex<Vec<(ServiceEndpoint, ServiceInfo)>>,
    refuse_connections: bool,
    registration_error: Option<String>,
}

impl MockRpcClient {
    pub fn new() -> Self {
        Self::with_stream(RecordingStream::default())
    }

    pub fn with_stream(stream: RecordingStream) -> Self {
        Self {
            stream: Arc::new(stream),
            relays: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            refuse_connections: false,
            registration_error: None,
        }
    }

    pub fn refusing_connections() -> Self {
        Self {
            refuse_connections: true,
            ..Self::new()
        }
    }

    pub fn rejecting_registration(reason: &str) -> Self {
        Self {
            registration_error: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// `(source message id, endpoint)` of every relay opened.
    pub fn relays(&self) -> Vec<(String, ServiceEndpoint)> {
        self.relays.lock().clone()
    }

    pub fn registrations(&self) -> Vec<(ServiceEndpoint, ServiceInfo)> {
        self.registrations.lock().clone()
    }
}

#[async_trait]
impl RpcClient for MockRpcClient {
    async fn build_client_relay(
        &self,
        source: Message,
        endpoint: &ServiceEndpoint,
    ) -> Result<ClientRelay, RelayError> {
        if self.refuse_connections {
            return Err(RelayError::transport("connection refused"));
        }
        self.relays.lock().push((source.id.clone(), endpoint.clone()));
        Ok(ClientRelay {
            stream: self.stream.clone(),
            source_message: source,
        })
    }

    async fn client_register(
        &self,
        endpoint: &ServiceEndpoint,
        service_info: ServiceInfo,
    ) -> Result<Receipt, RelayError> {
        if self.refuse_connections {
            return Err(RelayError::transport("connection refused"));
        }
        self.registrations
            .lock()
            .push((endpoint.clone(), service_info));
        Ok(match &self.registration_error {
            Some(reason) => Receipt {
                is_ok: false,
                error: reason.clone(),
            },
            None => Receipt::ok(),
        })
    }
}

/// Callback observed by a [`Recorder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Relay(Message),
    Complete(Message),
    CompleteError(Option<String>, ErrorKind),
    Registration(ServiceInfo),
}

/// Records relay server callbacks.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn handlers(&self) -> RelayHandlers {
        let on_relay = self.events.clone();
        let on_complete = self.events.clone();
        let on_error = self.events.clone();
        let on_registration = self.events.clone();
        RelayHandlers::default()
            .with_on_relay(move |msg| {
                on_relay.lock().push(Event::Relay(msg));
                async { Ok(()) }
            })
            .with_on_relay_complete(move |msg| {
                on_complete.lock().push(Event::Complete(msg));
                async { Ok(()) }
            })
            .with_on_relay_complete_error(move |last, err| {
                on_error
                    .lock()
                    .push(Event::CompleteError(last.map(|m| m.id), err.kind()));
                async {}
            })
            .with_on_registration_complete(move |info| {
                on_registration.lock().push(Event::Registration(info));
                async { Ok(()) }
            })
    }

    pub fn server(&self, name: &str) -> RelayServer {
        RelayServer::new(name, self.handlers())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Waits until at least `count` events were recorded.
    pub async fn wait_for(&self, count: usize) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let events = self.events();
            if events.len() >= count || tokio::time::Instant::now() >= deadline {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Serves `server` on an ephemeral local port.
pub async fn spawn_server(server: RelayServer) -> ServiceEndpoint {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let incoming = TcpListenerStream::new(listener);

    tokio::spawn(async move {
        Server::builder()
            .add_service(server.into_service())
            .serve_with_incoming(incoming)
            .await
            .unwrap();
    });

    ServiceEndpoint::new("127.0.0.1", addr.port())
}
