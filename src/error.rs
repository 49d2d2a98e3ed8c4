//! Error types for the relay protocol and the relaylink service.
//!
//! Protocol failures are carried as a [`RelayError`], a tagged error whose
//! [`ErrorKind`] decides how the failure travels: processing and system
//! failures are encoded into the outgoing envelope, transport failures end the
//! affected stream, registration failures are reported back in a receipt.

use std::fmt;
use std::result;
use thiserror::Error;
use tonic::Status;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Classification of a [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Business logic failure reported by a message processor.
    Processing,
    /// Non-business failure reported by a message processor.
    System,
    /// Receive/send/connect failure on a relay stream.
    Transport,
    /// Failure raised while completing a service registration.
    Registration,
    /// Invalid arguments handed to a relay operation.
    InvalidArgument,
    /// No endpoint could be resolved for a service.
    Discovery,
    /// An inbound stream ended before carrying any message.
    EmptyStream,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Processing => "processing error",
            ErrorKind::System => "system error",
            ErrorKind::Transport => "transport error",
            ErrorKind::Registration => "registration error",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Discovery => "discovery error",
            ErrorKind::EmptyStream => "empty relay stream",
        };
        f.write_str(name)
    }
}

/// Error raised by relay server, link and producer operations.
#[derive(Debug, Error)]
#[error("{kind}: {source}")]
pub struct RelayError {
    kind: ErrorKind,
    #[source]
    source: BoxError,
}

impl RelayError {
    pub fn new<E>(kind: ErrorKind, cause: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            kind,
            source: cause.into(),
        }
    }

    /// Wraps a business failure so that it is forwarded downstream as
    /// `ErrorType::Processing` instead of being returned to the caller.
    pub fn processing<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::Processing, cause)
    }

    /// Wraps a failure that is forwarded downstream as `ErrorType::System`.
    pub fn system<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::System, cause)
    }

    pub fn transport<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::Transport, cause)
    }

    pub fn registration<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::Registration, cause)
    }

    pub fn invalid_argument<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::InvalidArgument, cause)
    }

    pub fn discovery<E: Into<BoxError>>(cause: E) -> Self {
        Self::new(ErrorKind::Discovery, cause)
    }

    pub fn empty_stream() -> Self {
        Self::new(
            ErrorKind::EmptyStream,
            "relay stream ended without carrying any message",
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_processing(&self) -> bool {
        self.kind == ErrorKind::Processing
    }

    /// Message of the underlying cause, without the kind prefix.
    pub fn cause_message(&self) -> String {
        self.source.to_string()
    }
}

impl From<Status> for RelayError {
    fn from(status: Status) -> Self {
        RelayError::transport(status)
    }
}

impl From<tonic::transport::Error> for RelayError {
    fn from(err: tonic::transport::Error) -> Self {
        RelayError::transport(err)
    }
}

impl From<RelayError> for Status {
    fn from(err: RelayError) -> Self {
        let message = err.cause_message();
        match err.kind {
            ErrorKind::Processing | ErrorKind::System => Status::aborted(message),
            ErrorKind::Transport => Status::unavailable(message),
            ErrorKind::Registration => Status::failed_precondition(message),
            ErrorKind::InvalidArgument => Status::invalid_argument(message),
            ErrorKind::Discovery => Status::not_found(message),
            ErrorKind::EmptyStream => Status::failed_precondition(message),
        }
    }
}

/// A specialized Result type for relaylink service operations.
pub type Result<T> = result::Result<T, Error>;

/// The error type for service bootstrap and configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<std::net::AddrParseError> for Error {
    fn from(err: std::net::AddrParseError) -> Self {
        Error::InvalidAddress(err.to_string())
    }
}
