//! Message producer capability handed to message processors.
//!
//! A processor never sees the outbound transport: it receives a
//! [`MsgProducer`] and calls [`MsgProducer::send`] once per business message it
//! wants to forward to the next hop.

use crate::error::RelayError;
use crate::proto::{BusinessMessage, Message};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Send side of one outbound relay stream.
#[async_trait]
pub trait OutboundStream: Send + Sync {
    /// Transmits one envelope to the next hop.
    async fn send(&self, message: Message) -> Result<(), RelayError>;

    /// Closes the send side. The peer observes end-of-stream.
    async fn close_send(&self) -> Result<(), RelayError>;
}

/// Capability used by processors to emit derived messages.
#[async_trait]
pub trait MsgProducer: Send + Sync {
    /// Wraps `message` in an envelope derived from the source message and
    /// transmits it on the currently open outbound stream.
    async fn send(&self, message: BusinessMessage) -> Result<(), RelayError>;
}

/// Shared handle passed to processors.
pub type Producer = Arc<dyn MsgProducer>;

/// [`MsgProducer`] bound to one outbound stream and its source envelope.
pub struct StreamProducer {
    stream: Arc<dyn OutboundStream>,
    source: Message,
    sent: AtomicU64,
}

impl StreamProducer {
    pub fn new(stream: Arc<dyn OutboundStream>, source: Message) -> Self {
        Self {
            stream,
            source,
            sent: AtomicU64::new(0),
        }
    }

    /// Number of envelopes this producer has transmitted.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MsgProducer for StreamProducer {
    async fn send(&self, message: BusinessMessage) -> Result<(), RelayError> {
        let envelope = self.source.derive(message);
        debug!(
            message_id = %envelope.id,
            parent_message_id = %envelope.parent_id,
            consumption_id = %envelope.consumption_id,
            "Producing message"
        );
        self.stream.send(envelope).await?;
        self.sent.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
