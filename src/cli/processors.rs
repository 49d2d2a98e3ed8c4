//! Message processors selectable from configuration.

use crate::error::RelayError;
use crate::link::{MessageProcessor, RelayContext};
use crate::producer::Producer;
use crate::proto::BusinessMessage;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinProcessor {
    /// Forwards the business message unchanged.
    Passthrough,
    /// Rejects every message with a processing error.
    Fail,
}

impl FromStr for BuiltinProcessor {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "passthrough" => Ok(BuiltinProcessor::Passthrough),
            "fail" => Ok(BuiltinProcessor::Fail),
            other => Err(RelayError::invalid_argument(format!(
                "unknown processor '{}', expected passthrough or fail",
                other
            ))),
        }
    }
}

impl fmt::Display for BuiltinProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuiltinProcessor::Passthrough => f.write_str("passthrough"),
            BuiltinProcessor::Fail => f.write_str("fail"),
        }
    }
}

#[async_trait]
impl MessageProcessor for BuiltinProcessor {
    async fn process(
        &self,
        ctx: RelayContext,
        message: BusinessMessage,
        producer: Producer,
    ) -> Result<(), RelayError> {
        match self {
            BuiltinProcessor::Passthrough => producer.send(message).await,
            BuiltinProcessor::Fail => Err(RelayError::processing(format!(
                "message {} rejected",
                ctx.message_id
            ))),
        }
    }
}
