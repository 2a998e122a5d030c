use std::{
    collections::HashMap,
    io,
    path::{Component, Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    fs,
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use cclife_core::{
    DeployRequest, DestroyRequest, Driver, DriverError, NameFormatter, StartRequest, StopRequest,
    driver::format_name, kinds,
};
use cclife_model::ContainerId;

use crate::{
    error::{ExecError, ExecResult},
    limits::{RlimitConfig, attach_rlimits},
    util::{cmd_program, kill_graceful},
};

/// File name of the built chaincode package inside a container directory.
pub const ARTIFACT: &str = "chaincode.pkg";

#[derive(Clone, Debug)]
pub struct ProcConfig {
    /// Parent of every container directory.
    pub root: PathBuf,
    pub limits: RlimitConfig,
    /// Grace period of a non-forced destroy.
    pub stop_grace: Duration,
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("cclife"),
            limits: RlimitConfig::default(),
            stop_grace: Duration::from_secs(10),
        }
    }
}

struct Instance {
    child: Child,
    output: Vec<JoinHandle<()>>,
}

/// Runs every chaincode container as a host process in `<root>/<resource>/`.
pub struct ProcessDriver {
    cfg: ProcConfig,
    formatter: Option<Arc<NameFormatter>>,
    children: Mutex<HashMap<String, Instance>>,
}

impl ProcessDriver {
    pub fn new(cfg: ProcConfig) -> Self {
        Self {
            cfg,
            formatter: None,
            children: Mutex::new(HashMap::new()),
        }
    }

    /// Formatter applied to every resolved name unless the caller passes its own.
    pub fn with_formatter(mut self, formatter: Arc<NameFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    #[inline]
    pub fn config(&self) -> &ProcConfig {
        &self.cfg
    }

    /// Working directory of `resource`.
    pub fn dir(&self, resource: &str) -> PathBuf {
        self.cfg.root.join(resource)
    }

    pub fn is_running(&self, resource: &str) -> bool {
        self.children().contains_key(resource)
    }

    /// Resources with a live process, sorted.
    pub fn running(&self) -> Vec<String> {
        let mut names: Vec<_> = self.children().keys().cloned().collect();
        names.sort();
        names
    }

    /// Process id of `resource`, if running.
    pub fn pid(&self, resource: &str) -> Option<u32> {
        self.children().get(resource).and_then(|i| i.child.id())
    }

    fn resource(&self, id: &ContainerId) -> Result<String, DriverError> {
        self.resolve_name(id, None)
    }

    fn take(&self, resource: &str) -> Option<Instance> {
        self.children().remove(resource)
    }

    fn children(&self) -> MutexGuard<'_, HashMap<String, Instance>> {
        self.children.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stop an instance. Puts it back when it was left running.
    async fn halt(
        &self,
        resource: &str,
        mut inst: Instance,
        grace: Duration,
        keep_running: bool,
    ) -> ExecResult<()> {
        let exited = kill_graceful(&mut inst.child, grace, keep_running).await;
        self.settle(resource, inst, exited).await
    }

    /// Reap an instance after a kill attempt. One that is not known to have exited stays tracked.
    async fn settle(
        &self,
        resource: &str,
        mut inst: Instance,
        exited: io::Result<Option<ExitStatus>>,
    ) -> ExecResult<()> {
        match exited {
            Ok(Some(status)) => {
                for task in inst.output.drain(..) {
                    let _ = task.await;
                }
                debug!(resource, %status, "container process exited");
                Ok(())
            }
            Ok(None) => {
                debug!(resource, "container process kept running");
                self.children().insert(resource.to_string(), inst);
                Ok(())
            }
            Err(e) => {
                warn!(resource, pid = ?inst.child.id(), error = %e, "failed to stop container process");
                self.children().insert(resource.to_string(), inst);
                Err(e.into())
            }
        }
    }
}

impl Default for ProcessDriver {
    fn default() -> Self {
        Self::new(ProcConfig::default())
    }
}

#[async_trait]
impl Driver for ProcessDriver {
    fn kind(&self) -> &str {
        kinds::PROCESS
    }

    #[instrument(level = "debug", skip_all, fields(container = %req.id))]
    async fn start(&self, _ctx: &CancellationToken, req: &StartRequest) -> Result<(), DriverError> {
        let resource = self.resource(&req.id)?;
        let (program, args) = req.args.split_first().ok_or(ExecError::MissingProgram)?;
        for path in req.files.keys() {
            check_relative(path)?;
        }

        if let Some(prev) = self.take(&resource) {
            debug!(resource = %resource, "replacing previous instance");
            self.halt(&resource, prev, Duration::ZERO, false).await?;
        }

        let dir = self.dir(&resource);
        fs::create_dir_all(&dir).await.map_err(ExecError::from)?;

        let artifact = dir.join(ARTIFACT);
        if let Some(builder) = &req.builder {
            if !fs::try_exists(&artifact).await.map_err(ExecError::from)? {
                let package = builder.build()?;
                fs::write(&artifact, package).await.map_err(ExecError::from)?;
                trace!(resource = %resource, "artifact written");
            }
        }

        for (path, content) in &req.files {
            let target = dir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await.map_err(ExecError::from)?;
            }
            fs::write(&target, content).await.map_err(ExecError::from)?;
        }

        if let Some(hook) = &req.prelaunch {
            hook().map_err(|e| DriverError::Prelaunch(e.to_string()))?;
        }

        let mut cmd = cmd_program(program, args);
        cmd.current_dir(&dir).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        for (k, v) in req.env_pairs() {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        attach_rlimits(&mut cmd, &self.cfg.limits);

        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn(format!("{program}: {e}")))?;
        let mut output = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            output.push(forward(resource.clone(), "stdout", out));
        }
        if let Some(err) = child.stderr.take() {
            output.push(forward(resource.clone(), "stderr", err));
        }

        info!(resource = %resource, pid = ?child.id(), program = %program, "container process started");
        self.children()
            .insert(resource, Instance { child, output });
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(container = %req.id))]
    async fn stop(&self, _ctx: &CancellationToken, req: &StopRequest) -> Result<(), DriverError> {
        let resource = self.resource(&req.id)?;
        match self.take(&resource) {
            Some(inst) => self.halt(&resource, inst, req.timeout, req.keep_running).await?,
            None => debug!(resource = %resource, "container not running"),
        }
        if !req.keep_artifact && !self.is_running(&resource) {
            prune(&self.dir(&resource), false).await?;
        }
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(container = %req.id))]
    async fn destroy(
        &self,
        _ctx: &CancellationToken,
        req: &DestroyRequest,
    ) -> Result<(), DriverError> {
        let resource = self.resource(&req.id)?;
        if let Some(inst) = self.take(&resource) {
            let grace = if req.force {
                Duration::ZERO
            } else {
                self.cfg.stop_grace
            };
            self.halt(&resource, inst, grace, false).await?;
        }
        prune(&self.dir(&resource), req.no_prune).await?;
        info!(resource = %resource, "container destroyed");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(container = %req.id))]
    async fn deploy(
        &self,
        _ctx: &CancellationToken,
        req: &DeployRequest,
    ) -> Result<(), DriverError> {
        if req.package.is_empty() {
            return Err(ExecError::EmptyPackage.into());
        }
        let resource = self.resource(&req.id)?;
        let dir = self.dir(&resource);
        fs::create_dir_all(&dir).await.map_err(ExecError::from)?;
        fs::write(dir.join(ARTIFACT), &req.package)
            .await
            .map_err(ExecError::from)?;
        info!(resource = %resource, bytes = req.package.len(), "chaincode deployed");
        Ok(())
    }

    fn resolve_name(
        &self,
        id: &ContainerId,
        formatter: Option<&NameFormatter>,
    ) -> Result<String, DriverError> {
        let name = sanitize(&id.vm_name());
        if name.is_empty() {
            return Err(ExecError::InvalidName(format!("empty name for {id:?}")).into());
        }
        format_name(name, formatter.or(self.formatter.as_deref()))
    }
}

/// Lowercase and replace everything outside `[a-z0-9_.-]` with `-`.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Uploaded files must stay inside the container directory.
fn check_relative(path: &str) -> ExecResult<()> {
    let p = Path::new(path);
    if path.is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ExecError::UnsafePath(path.to_string()));
    }
    Ok(())
}

/// Remove a container directory, or everything in it but the artifact.
async fn prune(dir: &Path, keep_artifact: bool) -> ExecResult<()> {
    if !keep_artifact {
        return match fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
    }

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name() == ARTIFACT {
            continue;
        }
        if entry.file_type().await?.is_dir() {
            fs::remove_dir_all(entry.path()).await?;
        } else {
            fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

fn forward<R>(resource: String, stream: &'static str, reader: R) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(target: "cclife.exec.proc.out", container = %resource, stream, %line),
                Ok(None) => break,
                Err(e) => {
                    warn!(container = %resource, stream, error = %e, "failed to read container output");
                    break;
                }
            }
        }
    })
}
