//! Chaincodes built into the daemon.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use cclife_chaincode::SystemChaincode;
use cclife_model::{CcContext, ChaincodeInput, DeploymentSpec, Response};
use tracing::debug;

/// Lifecycle system chaincode: answers `getdepspec <chain> <name>` with the deployment spec defined on that channel.
#[derive(Default)]
pub struct Lscc {
    definitions: RwLock<HashMap<(String, String), DeploymentSpec>>,
}

impl Lscc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Define `cds` on channel `chain`. The code package is stripped; it is fetched from the package store at launch.
    pub fn define(&self, chain: &str, mut cds: DeploymentSpec) {
        cds.code_package.clear();
        let name = cds.chaincode_spec.chaincode_id.name.clone();
        debug!(chain, %name, "chaincode defined");
        self.definitions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((chain.to_string(), name), cds);
    }

    fn get_deployment_spec(&self, args: &[Vec<u8>]) -> Response {
        let [_, chain, name] = args else {
            return Response::error("getdepspec expects <chain> <name>");
        };
        let key = (
            String::from_utf8_lossy(chain).into_owned(),
            String::from_utf8_lossy(name).into_owned(),
        );
        let definitions = self.definitions.read().unwrap_or_else(|e| e.into_inner());
        match definitions.get(&key) {
            Some(cds) => match serde_json::to_vec(cds) {
                Ok(payload) => Response::success(payload),
                Err(e) => Response::error(e.to_string()),
            },
            None => Response::error(format!("chaincode {} not defined on {}", key.1, key.0)),
        }
    }
}

#[async_trait]
impl SystemChaincode for Lscc {
    async fn init(&self, _: &CcContext, _: &ChaincodeInput) -> Response {
        Response::success(Vec::new())
    }

    async fn invoke(&self, _: &CcContext, input: &ChaincodeInput) -> Response {
        match input.function().as_deref() {
            Some("getdepspec") => self.get_deployment_spec(&input.args),
            Some(other) => Response::error(format!("unknown function {other}")),
            None => Response::error("missing function"),
        }
    }
}

/// Returns its arguments, minus the function name, joined by spaces.
pub struct Echo;

#[async_trait]
impl SystemChaincode for Echo {
    async fn init(&self, cccid: &CcContext, _: &ChaincodeInput) -> Response {
        debug!(chaincode = %cccid.canonical_name(), "echo initialized");
        Response::success(Vec::new())
    }

    async fn invoke(&self, _: &CcContext, input: &ChaincodeInput) -> Response {
        let words: Vec<_> = input
            .args
            .iter()
            .skip(1)
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        Response::success(words.join(" ").into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cclife_model::{ChaincodeId, ChaincodeSpec};

    fn cccid() -> CcContext {
        CcContext::new("ch1", "lscc", "latest", "tx-1", true)
    }

    #[tokio::test]
    async fn lscc_serves_definitions_without_package() {
        let lscc = Lscc::new();
        lscc.define(
            "ch1",
            DeploymentSpec {
                chaincode_spec: ChaincodeSpec {
                    chaincode_id: ChaincodeId::new("echo", "1.0"),
                    ..Default::default()
                },
                code_package: b"code".to_vec(),
                ..Default::default()
            },
        );

        let res = lscc
            .invoke(&cccid(), &ChaincodeInput::from_strings(["getdepspec", "ch1", "echo"]))
            .await;
        assert!(res.is_ok());
        let cds: DeploymentSpec = serde_json::from_slice(&res.payload).unwrap();
        assert_eq!(cds.chaincode_spec.chaincode_id.version, "1.0");
        assert!(!cds.has_package());

        let res = lscc
            .invoke(&cccid(), &ChaincodeInput::from_strings(["getdepspec", "ch2", "echo"]))
            .await;
        assert_eq!(res.message, "chaincode echo not defined on ch2");
        let res = lscc
            .invoke(&cccid(), &ChaincodeInput::from_strings(["getdepspec"]))
            .await;
        assert!(!res.is_ok());
    }

    #[tokio::test]
    async fn echo_skips_function_name() {
        let res = Echo
            .invoke(&cccid(), &ChaincodeInput::from_strings(["say", "hello", "world"]))
            .await;
        assert_eq!(res.payload, b"hello world");
    }
}
