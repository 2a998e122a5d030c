use serde::{Deserialize, Serialize};

use crate::ChaincodeEvent;

/// Type of a message exchanged between the peer and a chaincode handler.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Register,
    Registered,
    Init,
    Ready,
    Transaction,
    Completed,
    Error,
    Keepalive,
}

impl MessageType {
    /// Returns a short symbolic identifier for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageType::Register => "register",
            MessageType::Registered => "registered",
            MessageType::Init => "init",
            MessageType::Ready => "ready",
            MessageType::Transaction => "transaction",
            MessageType::Completed => "completed",
            MessageType::Error => "error",
            MessageType::Keepalive => "keepalive",
        }
    }
}

/// One message on the peer/chaincode channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub tx_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chaincode_event: Option<ChaincodeEvent>,
}

impl ChaincodeMessage {
    pub fn new(
        kind: MessageType,
        payload: Vec<u8>,
        tx_id: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            payload,
            tx_id: tx_id.into(),
            channel_id: channel_id.into(),
            chaincode_event: None,
        }
    }

    /// Reply to `self` with the same transaction and channel.
    pub fn reply(&self, kind: MessageType, payload: Vec<u8>) -> Self {
        Self::new(kind, payload, self.tx_id.clone(), self.channel_id.clone())
    }

    pub fn with_event(mut self, event: ChaincodeEvent) -> Self {
        self.chaincode_event = Some(event);
        self
    }
}
