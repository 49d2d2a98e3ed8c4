//! relaylink: point-to-point message relay over gRPC.
//!
//! A service built on relaylink runs a [`RelayServer`] that receives envelopes
//! on inbound `Relay` streams and a [`Link`] that processes each envelope and
//! forwards the results to the next hop through a [`Producer`].

pub mod proto {
    tonic::include_proto!("linkage");
}

pub mod cli;
pub mod client;
pub mod config;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod link;
pub mod producer;
pub mod server;

pub use client::{ClientRelay, GrpcOutboundStream, GrpcRpcClient, RpcClient};
pub use config::{ConfigArgs, Settings};
pub use discovery::{ServiceEndpoint, ServiceLocator, StaticLocator};
pub use error::{Error, ErrorKind, RelayError, Result};
pub use link::{Link, LinkBuilder, MessageProcessor, RelayContext};
pub use producer::{MsgProducer, OutboundStream, Producer, StreamProducer};
pub use proto::{
    message::ErrorType, BusinessMessage, Message, Payload, Receipt, ServiceInfo, StepPattern,
};
pub use server::RelayHandlers;
pub use server::RelayServer;
