use serde::{Deserialize, Serialize};

/// Application-level result of a chaincode call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl Response {
    pub const OK: i32 = 200;
    /// Statuses at or above this value are errors.
    pub const ERROR_THRESHOLD: i32 = 400;
    pub const ERROR: i32 = 500;

    pub fn success(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Self::OK,
            message: String::new(),
            payload: payload.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Self::ERROR,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status < Self::ERROR_THRESHOLD
    }
}

/// Event emitted by a chaincode during a transaction.
///
/// `chaincode_id` and `tx_id` are stamped by the peer, not trusted from the chaincode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeEvent {
    #[serde(default)]
    pub chaincode_id: String,
    #[serde(default)]
    pub tx_id: String,
    pub event_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}
