//! Relay link: binds a message processor to outbound relay capability.
//!
//! A [`Link`] is created once per process with [`Link::register`]. For every
//! envelope handed to [`Link::on_relay`] it opens a fresh outbound stream to
//! the next hop, runs the processor with a [`Producer`] bound to that stream,
//! forwards classified processor failures as flagged envelopes and finally
//! closes the send side.

use crate::client::{ClientRelay, GrpcRpcClient, RpcClient};
use crate::discovery::{ServiceEndpoint, ServiceLocator, StaticLocator};
use crate::error::RelayError;
use crate::producer::{Producer, StreamProducer};
use crate::proto::{message::ErrorType, BusinessMessage, Message, ServiceInfo, StepPattern};
use crate::server::{RelayHandlers, RelayServer};
use async_trait::async_trait;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identity of the envelope being processed.
#[derive(Debug, Clone, Default)]
pub struct RelayContext {
    pub message_id: String,
    pub parent_id: String,
    pub consumption_id: String,
    pub pattern: Option<StepPattern>,
}

impl From<&Message> for RelayContext {
    fn from(msg: &Message) -> Self {
        Self {
            message_id: msg.id.clone(),
            parent_id: msg.parent_id.clone(),
            consumption_id: msg.consumption_id.clone(),
            pattern: msg.pattern.clone(),
        }
    }
}

/// Application-supplied transformation run on every relayed message.
///
/// Return [`RelayError::processing`] (or [`RelayError::system`]) to have the
/// failure forwarded downstream on the source envelope. Any other error is
/// returned to the caller of [`Link::on_relay`].
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(
        &self,
        ctx: RelayContext,
        message: BusinessMessage,
        producer: Producer,
    ) -> Result<(), RelayError>;
}

#[async_trait]
impl<F, Fut> MessageProcessor for F
where
    F: Fn(RelayContext, BusinessMessage, Producer) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), RelayError>> + Send + 'static,
{
    async fn process(
        &self,
        ctx: RelayContext,
        message: BusinessMessage,
        producer: Producer,
    ) -> Result<(), RelayError> {
        (self)(ctx, message, producer).await
    }
}

/// Builder for a [`Link`] with injectable collaborators.
pub struct LinkBuilder {
    name: String,
    version: String,
    description: String,
    processor: Arc<dyn MessageProcessor>,
    client: Arc<dyn RpcClient>,
    locator: Arc<dyn ServiceLocator>,
    advertised: Option<ServiceEndpoint>,
}

impl LinkBuilder {
    pub fn new<P>(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        processor: P,
    ) -> Self
    where
        P: MessageProcessor + 'static,
    {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            processor: Arc::new(processor),
            client: Arc::new(GrpcRpcClient::default()),
            locator: Arc::new(StaticLocator::new()),
            advertised: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn RpcClient>) -> Self {
        self.client = client;
        self
    }

    pub fn with_locator(mut self, locator: Arc<dyn ServiceLocator>) -> Self {
        self.locator = locator;
        self
    }

    /// Endpoint of this link's own relay server, announced on registration.
    pub fn with_advertised_endpoint(mut self, endpoint: ServiceEndpoint) -> Self {
        self.advertised = Some(endpoint);
        self
    }

    pub fn build(self) -> Result<Link, RelayError> {
        if self.name.trim().is_empty() {
            return Err(RelayError::invalid_argument("service name must not be empty"));
        }
        if self.version.trim().is_empty() {
            return Err(RelayError::invalid_argument("service version must not be empty"));
        }
        Ok(Link {
            name: self.name,
            version: self.version,
            description: self.description,
            processor: self.processor,
            client: self.client,
            locator: self.locator,
            advertised: self.advertised,
        })
    }
}

/// Client-side binding of a processor to outbound relay capability.
pub struct Link {
    name: String,
    version: String,
    description: String,
    processor: Arc<dyn MessageProcessor>,
    client: Arc<dyn RpcClient>,
    locator: Arc<dyn ServiceLocator>,
    advertised: Option<ServiceEndpoint>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("advertised", &self.advertised)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Registers `processor` under the given identity using the tonic client
    /// and an empty route table.
    pub fn register<P>(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        processor: P,
    ) -> Result<Link, RelayError>
    where
        P: MessageProcessor + 'static,
    {
        LinkBuilder::new(name, version, description, processor).build()
    }

    pub fn builder<P>(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        processor: P,
    ) -> LinkBuilder
    where
        P: MessageProcessor + 'static,
    {
        LinkBuilder::new(name, version, description, processor)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Identity this link registers with.
    pub fn service_info(&self) -> ServiceInfo {
        let mut info = ServiceInfo::new(self.name.clone(), self.version.clone());
        info.service_description = self.description.clone();
        if let Some(endpoint) = &self.advertised {
            info.service_host = endpoint.host.clone();
            info.service_port = u32::from(endpoint.port);
        }
        info
    }

    /// Registers this link with the peer described by `service_info`.
    ///
    /// Every failure, including a negative receipt, is reported as a
    /// registration error.
    pub async fn on_sidecar_registration_complete(
        &self,
        service_info: ServiceInfo,
    ) -> Result<(), RelayError> {
        let endpoint = self
            .locator
            .resolve(&service_info.service_name, &service_info.service_version)
            .map_err(RelayError::registration)?;
        info!(
            service_name = %self.name,
            sidecar = %endpoint,
            "Sidecar registration complete, registering service"
        );

        let receipt = self
            .client
            .client_register(&endpoint, self.service_info())
            .await
            .map_err(RelayError::registration)?;
        if !receipt.is_ok {
            return Err(RelayError::registration(receipt.error));
        }
        Ok(())
    }

    /// Runs one relay hop for `envelope`.
    pub async fn on_relay(&self, envelope: Message) -> Result<(), RelayError> {
        let pattern = envelope.pattern.clone().unwrap_or_default();
        let endpoint = self
            .locator
            .resolve(&pattern.service_name, &pattern.service_version)?;

        debug!(
            service_name = %self.name,
            message_id = %envelope.id,
            consumption_id = %envelope.consumption_id,
            next_hop = %endpoint,
            "Relaying message"
        );

        let ClientRelay {
            stream,
            mut source_message,
        } = self.client.build_client_relay(envelope, &endpoint).await?;

        let ctx = RelayContext::from(&source_message);
        let business_message = source_message.business_message.clone().unwrap_or_default();
        let producer = Arc::new(StreamProducer::new(stream.clone(), source_message.clone()));

        let result = match self
            .processor
            .process(ctx, business_message, producer.clone() as Producer)
            .await
        {
            Ok(()) => {
                debug!(
                    service_name = %self.name,
                    message_id = %source_message.id,
                    produced = producer.sent(),
                    "Message processed"
                );
                Ok(())
            }
            Err(e) => match ErrorType::for_error(&e) {
                Some(error_type) => {
                    warn!(
                        service_name = %self.name,
                        message_id = %source_message.id,
                        error = %e,
                        "Message processing failed, forwarding error downstream"
                    );
                    source_message.flag_error(error_type);
                    stream.send(source_message).await
                }
                None => {
                    error!(
                        service_name = %self.name,
                        message_id = %source_message.id,
                        error = %e,
                        "Message processor returned an unclassified error"
                    );
                    Err(e)
                }
            },
        };

        let closed = stream.close_send().await;
        result.and(closed)
    }

    /// Relay server whose callbacks drive this link.
    pub fn relay_server(self: &Arc<Self>) -> RelayServer {
        let on_relay = Arc::clone(self);
        let on_complete = Arc::clone(self);
        let on_registration = Arc::clone(self);
        let service_name = self.name.clone();

        let handlers = RelayHandlers::default()
            .with_on_relay(move |msg| {
                let link = Arc::clone(&on_relay);
                async move { link.on_relay(msg).await }
            })
            .with_on_relay_complete(move |msg| {
                let link = Arc::clone(&on_complete);
                async move { link.on_relay(msg).await }
            })
            .with_on_relay_complete_error(move |last, err| {
                let service_name = service_name.clone();
                async move {
                    error!(
                        service_name = %service_name,
                        message_id = last.as_ref().map(|m| m.id.as_str()).unwrap_or_default(),
                        error = %err,
                        "Inbound relay stream failed"
                    );
                }
            })
            .with_on_registration_complete(move |info| {
                let link = Arc::clone(&on_registration);
                async move { link.on_sidecar_registration_complete(info).await }
            });

        RelayServer::new(self.name.clone(), handlers)
    }

    /// Serves this link's relay endpoint until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, addr: SocketAddr, shutdown: F) -> Result<(), RelayError>
    where
        F: Future<Output = ()> + Send,
    {
        self.relay_server().serve(addr, shutdown).await?;
        Ok(())
    }
}
