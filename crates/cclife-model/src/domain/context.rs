use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ContainerId;

/// Transaction-scoped context of a chaincode call.
///
/// Carries the channel, the chaincode identity and the transaction being processed.
/// `syscc` marks built-in system chaincodes, which are launched once at process start and never reaped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcContext {
    pub chain_id: String,
    pub name: String,
    pub version: String,
    pub tx_id: String,
    #[serde(default)]
    pub syscc: bool,
    /// Proposal decorations forwarded to the chaincode with every message.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub decorations: HashMap<String, Vec<u8>>,
}

impl CcContext {
    pub fn new(
        chain_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        tx_id: impl Into<String>,
        syscc: bool,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            name: name.into(),
            version: version.into(),
            tx_id: tx_id.into(),
            syscc,
            decorations: HashMap::new(),
        }
    }

    pub fn with_decorations(mut self, decorations: HashMap<String, Vec<u8>>) -> Self {
        self.decorations = decorations;
        self
    }

    /// `name:version`.
    pub fn canonical_name(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Container identity of this chaincode on the given peer.
    pub fn container_id(&self, peer_id: &str, network_id: &str) -> ContainerId {
        ContainerId::new(peer_id, network_id, &self.name, &self.version)
    }
}
