mod config;
mod syscc;

use std::sync::Arc;

use anyhow::Context;
use cclife_chaincode::{ChaincodeSupport, FsPackageProvider, HandlerRegistry, InprocDriver, Registry};
use cclife_core::{Controller, DriverRouter};
use cclife_exec::ProcessDriver;
use cclife_model::{
    CcContext, ChaincodeId, ChaincodeSpec, DeploymentSpec, ExecEnv, LIFECYCLE_CHAINCODE,
    SYSTEM_CHAINCODE_VERSION,
};
use cclife_observe::{LoggerConfig, logger_init};
use cclife_prometheus::PrometheusMetrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::{
    config::PeerConfig,
    syscc::{Echo, Lscc},
};

const CHANNEL: &str = "demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1) Logger
    logger_init(&LoggerConfig::from_env()?)?;
    let cfg = PeerConfig::from_env()?;
    info!(
        peer_id = %cfg.support.peer_id,
        user_driver = %cfg.support.user_driver,
        dev_mode = cfg.support.user_runs_cc,
        "logger initialized"
    );

    // 2) Registry + drivers
    let metrics = PrometheusMetrics::new()?;
    let registry = Arc::new(HandlerRegistry::new(cfg.support.user_runs_cc));
    let lscc = Lscc::new();
    let inproc = Arc::new(InprocDriver::new(Arc::clone(&registry) as Arc<dyn Registry>));
    inproc.register(LIFECYCLE_CHAINCODE, lscc.clone());
    inproc.register("echo", Arc::new(Echo));

    let router = DriverRouter::new()
        .with(Arc::new(ProcessDriver::new(cfg.proc.clone())))
        .with(inproc);
    let controller = Arc::new(Controller::new(router).with_metrics(Arc::new(metrics.clone())));

    // 3) Facade
    let packages = Arc::new(FsPackageProvider::new(&cfg.package_dir));
    let support = ChaincodeSupport::new(
        cfg.support.clone(),
        controller,
        registry,
        Arc::clone(&packages) as _,
    );
    info!("chaincode support ready");

    // 4) System chaincodes
    let ctx = CancellationToken::new();
    deploy_system(&support, &ctx, LIFECYCLE_CHAINCODE).await?;

    // 5) Install and define the demo chaincode, then invoke it
    let echo = DeploymentSpec {
        chaincode_spec: ChaincodeSpec {
            chaincode_id: ChaincodeId::new("echo", "1.0"),
            ..Default::default()
        },
        code_package: b"echo".to_vec(),
        exec_env: ExecEnv::Process,
    };
    packages.install(&echo).await?;
    lscc.define(CHANNEL, echo);

    let cccid = CcContext::new(CHANNEL, "echo", "1.0", Uuid::new_v4().to_string(), false);
    let args = vec![b"say".to_vec(), b"hello".to_vec(), b"world".to_vec()];
    match support.execute_chaincode(&ctx, &cccid, args).await {
        Ok((res, _)) => info!(
            status = res.status,
            payload = %String::from_utf8_lossy(&res.payload),
            "echo answered"
        ),
        Err(e) => error!(error = %e, "echo failed"),
    }

    // 6) Keep running
    info!(
        idle_threshold = ?support.reaper().config().idle_threshold,
        "peer is running; idle chaincodes are stopped by the reaper"
    );
    info!("press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down...");
    ctx.cancel();
    support.close().await;
    debug!(metrics = %metrics.encode_text()?, "final metrics");

    Ok(())
}

/// Launch a system chaincode and run its `Init`.
async fn deploy_system(
    support: &ChaincodeSupport,
    ctx: &CancellationToken,
    name: &str,
) -> anyhow::Result<()> {
    let cccid = CcContext::new(
        "",
        name,
        SYSTEM_CHAINCODE_VERSION,
        Uuid::new_v4().to_string(),
        true,
    );
    let cds = DeploymentSpec {
        chaincode_spec: ChaincodeSpec {
            chaincode_id: ChaincodeId::new(name, SYSTEM_CHAINCODE_VERSION),
            ..Default::default()
        },
        code_package: Vec::new(),
        exec_env: ExecEnv::System,
    };
    support
        .execute_spec(ctx, &cccid, &cds.into())
        .await
        .with_context(|| format!("deploying system chaincode {name}"))?;
    info!(chaincode = name, "system chaincode deployed");
    Ok(())
}
