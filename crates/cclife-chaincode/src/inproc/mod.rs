//! In-process driver: system chaincodes run inside the peer and register their handler on start.
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use async_trait::async_trait;
use cclife_core::{
    DeployRequest, DestroyRequest, Driver, DriverError, NameFormatter, StartRequest, StopRequest,
    driver::format_name, kinds,
};
use cclife_model::{CcContext, ChaincodeInput, ChaincodeMessage, ContainerId, MessageType, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    error::HandlerError,
    registry::{Handler, Registry},
};

/// Chaincode compiled into the peer.
#[async_trait]
pub trait SystemChaincode: Send + Sync {
    async fn init(&self, cccid: &CcContext, input: &ChaincodeInput) -> Response;

    async fn invoke(&self, cccid: &CcContext, input: &ChaincodeInput) -> Response;
}

/// [`Driver`] of kind [`kinds::SYSTEM`].
///
/// Starting a container registers a handler that calls the [`SystemChaincode`] directly; stopping it
/// deregisters the handler.
pub struct InprocDriver {
    registry: Arc<dyn Registry>,
    chaincodes: RwLock<HashMap<String, Arc<dyn SystemChaincode>>>,
    running: Mutex<HashSet<String>>,
}

impl InprocDriver {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            chaincodes: RwLock::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Make `cc` startable under chaincode name `name`. Replaces a previous registration.
    pub fn register(&self, name: impl Into<String>, cc: Arc<dyn SystemChaincode>) {
        let name = name.into();
        debug!(%name, "system chaincode registered");
        self.chaincodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, cc);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.chaincodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    pub fn is_running(&self, id: &ContainerId) -> bool {
        self.running().contains(&id.canonical_name())
    }

    fn running(&self) -> MutexGuard<'_, HashSet<String>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn halt(&self, id: &ContainerId) {
        let cname = id.canonical_name();
        if !self.running().remove(&cname) {
            debug!(chaincode = %cname, "system chaincode not running");
        }
        if let Err(e) = self.registry.deregister(&cname) {
            debug!(chaincode = %cname, error = %e, "nothing to deregister");
        }
    }
}

#[async_trait]
impl Driver for InprocDriver {
    fn kind(&self) -> &str {
        kinds::SYSTEM
    }

    async fn start(&self, _ctx: &CancellationToken, req: &StartRequest) -> Result<(), DriverError> {
        if let Some(hook) = &req.prelaunch {
            hook()?;
        }
        let cc = self
            .chaincodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(req.id.chaincode())
            .cloned()
            .ok_or_else(|| DriverError::NotRegistered(req.id.chaincode().to_string()))?;

        let cname = req.id.canonical_name();
        self.registry
            .ready(&cname, Arc::new(InprocHandler { cc }))
            .map_err(|e| DriverError::Start(e.to_string()))?;
        self.running().insert(cname.clone());
        info!(chaincode = %cname, "system chaincode started");
        Ok(())
    }

    async fn stop(&self, _ctx: &CancellationToken, req: &StopRequest) -> Result<(), DriverError> {
        self.halt(&req.id);
        Ok(())
    }

    async fn destroy(
        &self,
        _ctx: &CancellationToken,
        req: &DestroyRequest,
    ) -> Result<(), DriverError> {
        self.halt(&req.id);
        Ok(())
    }

    /// Nothing to deploy: the code is part of the peer.
    async fn deploy(
        &self,
        _ctx: &CancellationToken,
        _req: &DeployRequest,
    ) -> Result<(), DriverError> {
        Ok(())
    }

    fn resolve_name(
        &self,
        id: &ContainerId,
        formatter: Option<&NameFormatter>,
    ) -> Result<String, DriverError> {
        format_name(id.name(), formatter)
    }
}

struct InprocHandler {
    cc: Arc<dyn SystemChaincode>,
}

#[async_trait]
impl Handler for InprocHandler {
    async fn execute(
        &self,
        _ctx: &CancellationToken,
        cccid: &CcContext,
        msg: ChaincodeMessage,
    ) -> Result<ChaincodeMessage, HandlerError> {
        let input: ChaincodeInput = match serde_json::from_slice(&msg.payload) {
            Ok(input) => input,
            Err(e) => {
                let reason = format!("failed to decode input: {e}");
                return Ok(msg.reply(MessageType::Error, reason.into_bytes()));
            }
        };

        let res = match msg.kind {
            MessageType::Init => self.cc.init(cccid, &input).await,
            MessageType::Transaction => self.cc.invoke(cccid, &input).await,
            other => {
                let reason = format!("{} messages are not handled", other.kind());
                return Ok(msg.reply(MessageType::Error, reason.into_bytes()));
            }
        };

        if !res.is_ok() {
            return Ok(msg.reply(MessageType::Error, res.message.into_bytes()));
        }
        let payload = serde_json::to_vec(&res).map_err(|e| HandlerError::Encode(e.to_string()))?;
        Ok(msg.reply(MessageType::Completed, payload))
    }
}
