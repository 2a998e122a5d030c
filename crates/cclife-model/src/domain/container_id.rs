use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of one chaincode container.
///
/// Built once from the peer identity, the network identity and the chaincode name/version.
/// Fields are private: a `ContainerId` never changes after construction, so every driver resolves it to the same resource name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId {
    peer_id: String,
    network_id: String,
    name: String,
    version: String,
}

impl ContainerId {
    pub fn new(
        peer_id: impl Into<String>,
        network_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            network_id: network_id.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    #[inline]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    #[inline]
    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    /// Chaincode name without version.
    #[inline]
    pub fn chaincode(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name-version`, or just `name` when the version is empty.
    pub fn name(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, self.version)
        }
    }

    /// `name:version`, the key used by the handler registry and the reaper.
    pub fn canonical_name(&self) -> String {
        format!("{}:{}", self.name, self.version)
    }

    /// Fully qualified container name: `network-peer-name-version` with empty parts skipped.
    pub fn vm_name(&self) -> String {
        [
            self.network_id.as_str(),
            self.peer_id.as_str(),
            self.name.as_str(),
            self.version.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("-")
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.vm_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_derived_from_parts() {
        let id = ContainerId::new("peer0", "dev", "mycc", "1.0");
        assert_eq!(id.name(), "mycc-1.0");
        assert_eq!(id.canonical_name(), "mycc:1.0");
        assert_eq!(id.vm_name(), "dev-peer0-mycc-1.0");
    }

    #[test]
    fn empty_parts_are_skipped() {
        let id = ContainerId::new("", "", "mycc", "");
        assert_eq!(id.name(), "mycc");
        assert_eq!(id.vm_name(), "mycc");
        assert_eq!(id.canonical_name(), "mycc:");
    }

    #[test]
    fn display_uses_vm_name() {
        let id = ContainerId::new("peer0", "net", "cc", "2");
        assert_eq!(id.to_string(), "net-peer0-cc-2");
    }
}
