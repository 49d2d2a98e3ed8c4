//! Envelope helpers layered over the generated Linkage wire types.
//!
//! The relay server stamps sequencing data onto inbound envelopes, the link
//! flags processing failures on them and the producer derives new envelopes
//! from a source message.

use crate::error::{ErrorKind, RelayError};
use crate::proto::{message::ErrorType, BusinessMessage, Message, Payload, Receipt, ServiceInfo, StepPattern};
use std::fmt;
use uuid::Uuid;

/// Metadata key holding the parent id of a multi-message sequence.
pub const SEQUENCE_UUID_KEY: &str = "SequenceUUID";
/// Metadata key holding the 1-based position within a multi-message sequence.
pub const SEQUENCE_TERM_KEY: &str = "SequenceTerm";
/// Metadata key holding the total count of a completed multi-message sequence.
pub const SEQUENCE_UPPER_BOUND_KEY: &str = "SequenceUpperBound";

impl Message {
    /// Records the 1-based position of this envelope within its inbound stream.
    pub(crate) fn stamp_sequence_term(&mut self, term: u64) {
        self.sequence_term = term;
    }

    /// Publishes the sequence id and term of a non-terminal envelope of a
    /// multi-message stream.
    pub(crate) fn mark_sequence_member(&mut self) {
        self.meta_data
            .insert(SEQUENCE_UUID_KEY.to_string(), self.parent_id.clone());
        self.meta_data
            .insert(SEQUENCE_TERM_KEY.to_string(), self.sequence_term.to_string());
    }

    /// Marks this envelope as the terminal one of a stream of `count` messages.
    ///
    /// The derived metadata keys are only written when the stream carried
    /// more than one message.
    pub(crate) fn finalize_sequence(&mut self, count: u64) {
        self.sequence_upper_bound = count;
        if count > 1 {
            self.meta_data
                .insert(SEQUENCE_UUID_KEY.to_string(), self.parent_id.clone());
            self.meta_data
                .insert(SEQUENCE_TERM_KEY.to_string(), count.to_string());
            self.meta_data
                .insert(SEQUENCE_UPPER_BOUND_KEY.to_string(), count.to_string());
        }
    }

    /// Flags a failure on this envelope. `ErrorType::None` is ignored: once an
    /// envelope carries a failure it is never reset.
    pub fn flag_error(&mut self, error_type: ErrorType) {
        if error_type != ErrorType::None {
            self.set_error_type(error_type);
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_type() != ErrorType::None
    }

    /// Builds an envelope produced from this one: fresh id, this envelope as
    /// parent, same routing pattern and consumption id.
    pub fn derive(&self, business_message: BusinessMessage) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            parent_id: self.id.clone(),
            pattern: self.pattern.clone(),
            business_message: Some(business_message),
            consumption_id: self.consumption_id.clone(),
            ..Default::default()
        }
    }

    /// Sequence metadata value for `key`, if present.
    pub fn sequence_meta(&self, key: &str) -> Option<&str> {
        self.meta_data.get(key).map(String::as_str)
    }
}

impl ErrorType {
    /// Envelope error type used to forward a classified processor failure.
    pub fn for_error(err: &RelayError) -> Option<ErrorType> {
        match err.kind() {
            ErrorKind::Processing => Some(ErrorType::Processing),
            ErrorKind::System => Some(ErrorType::System),
            _ => None,
        }
    }
}

impl Receipt {
    pub fn ok() -> Self {
        Self {
            is_ok: true,
            error: String::new(),
        }
    }

    pub fn failed(err: &RelayError) -> Self {
        Self {
            is_ok: false,
            error: err.cause_message(),
        }
    }
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            service_version: version.into(),
            ..Default::default()
        }
    }
}

impl StepPattern {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            service_version: version.into(),
        }
    }
}

impl fmt::Display for StepPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.service_name, self.service_version)
    }
}

impl BusinessMessage {
    pub fn from_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Some(Payload { body: body.into() }),
            ..Default::default()
        }
    }

    pub fn body(&self) -> &[u8] {
        self.payload.as_ref().map(|p| p.body.as_slice()).unwrap_or(&[])
    }
}
