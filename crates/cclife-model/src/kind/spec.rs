use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Identity of a chaincode as written in its spec.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeId {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    /// Source path or import path of the chaincode.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl ChaincodeId {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            path: String::new(),
        }
    }
}

/// Arguments of a chaincode call.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeInput {
    #[serde(default)]
    pub args: Vec<Vec<u8>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub decorations: HashMap<String, Vec<u8>>,
}

impl ChaincodeInput {
    /// Build an input from string arguments.
    pub fn from_strings<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            args: args
                .into_iter()
                .map(|a| a.as_ref().as_bytes().to_vec())
                .collect(),
            decorations: HashMap::new(),
        }
    }

    /// Function name: the first argument, lossily decoded.
    pub fn function(&self) -> Option<String> {
        self.args
            .first()
            .map(|f| String::from_utf8_lossy(f).into_owned())
    }
}

/// Language the chaincode is written in.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChaincodeLang {
    #[default]
    Golang,
    Node,
    Java,
    Car,
}

/// Where a deployed chaincode executes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecEnv {
    /// Isolated host process (user chaincode).
    #[default]
    Process,
    /// Inside the peer (built-in system chaincode).
    System,
}

impl ExecEnv {
    /// Returns a short symbolic identifier, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecEnv::Process => "process",
            ExecEnv::System => "system",
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChaincodeSpec {
    #[serde(default)]
    pub lang: ChaincodeLang,
    pub chaincode_id: ChaincodeId,
    #[serde(default)]
    pub input: ChaincodeInput,
}

/// Everything needed to start a chaincode: its spec plus the code package.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    pub chaincode_spec: ChaincodeSpec,
    /// Packaged chaincode. Empty when the package must be fetched separately.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_package: Vec<u8>,
    #[serde(default)]
    pub exec_env: ExecEnv,
}

impl DeploymentSpec {
    #[inline]
    pub fn has_package(&self) -> bool {
        !self.code_package.is_empty()
    }

    #[inline]
    pub fn is_system(&self) -> bool {
        self.exec_env == ExecEnv::System
    }
}

/// A call against an already deployed chaincode.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationSpec {
    pub chaincode_spec: ChaincodeSpec,
}

/// What a caller hands to launch/execute.
///
/// A deployment carries its own package and results in an `Init` message.
/// An invocation needs the deployment spec looked up first and results in a `Transaction` message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LaunchSpec {
    Deployment(DeploymentSpec),
    Invocation(InvocationSpec),
}

impl LaunchSpec {
    pub fn chaincode_spec(&self) -> &ChaincodeSpec {
        match self {
            LaunchSpec::Deployment(cds) => &cds.chaincode_spec,
            LaunchSpec::Invocation(cis) => &cis.chaincode_spec,
        }
    }

    /// Returns a short symbolic identifier: `"deployment"` or `"invocation"`.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchSpec::Deployment(_) => "deployment",
            LaunchSpec::Invocation(_) => "invocation",
        }
    }

    /// Reject specs without a chaincode name.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.chaincode_spec().chaincode_id.name.trim().is_empty() {
            return Err(ModelError::InvalidSpec("chaincode name is empty".into()));
        }
        Ok(())
    }
}

impl From<DeploymentSpec> for LaunchSpec {
    fn from(cds: DeploymentSpec) -> Self {
        LaunchSpec::Deployment(cds)
    }
}

impl From<InvocationSpec> for LaunchSpec {
    fn from(cis: InvocationSpec) -> Self {
        LaunchSpec::Invocation(cis)
    }
}
