//! Request/response envelopes exchanged with the conversion service.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::RpcError;
use crate::pipeline::types::OrderedRecords;
use crate::transport::traits::Message;

/// One outbound call: serialized records tagged with a fresh correlation
/// token and the queue the reply should go to.
#[derive(Debug, Clone)]
pub struct RpcEnvelope {
    pub correlation_id: String,
    pub reply_to: String,
    /// JSON array of records.
    pub payload: Vec<u8>,
}

impl RpcEnvelope {
    /// Serialize `records` and mint a new random correlation token.
    pub fn for_records(records: &OrderedRecords, reply_to: impl Into<String>) -> Result<Self, RpcError> {
        let payload = serde_json::to_vec(records).map_err(RpcError::Serialize)?;
        Ok(Self {
            correlation_id: Uuid::new_v4().to_string(),
            reply_to: reply_to.into(),
            payload,
        })
    }

    pub fn into_message(self) -> Message {
        Message::json(self.payload)
            .with_correlation_id(self.correlation_id)
            .with_reply_to(self.reply_to)
    }
}

/// The service's answer: string keys mapped to integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    pub correlation_id: String,
    pub payload: BTreeMap<String, i64>,
}

impl RpcResponse {
    /// Decode a reply message.
    pub fn from_message(message: Message) -> Result<Self, RpcError> {
        let payload = serde_json::from_slice(&message.body).map_err(RpcError::MalformedResponse)?;
        Ok(Self {
            correlation_id: message.correlation_id.unwrap_or_default(),
            payload,
        })
    }

    pub fn get(&self, key: &str) -> Option<i64> {
        self.payload.get(key).copied()
    }

    /// The `length` the service reports for the converted document.
    pub fn length(&self) -> Option<i64> {
        self.get("length")
    }
}
