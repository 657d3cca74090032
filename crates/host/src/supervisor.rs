// crates/host/src/supervisor.rs

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use agent_shim_core::transport::RequestHandler;
use agent_shim_core::{
    CapabilityClient, CapabilityService, ClientMode, CorrelationTransport, RuntimeConfig,
    ShimError, ShimResult,
};

/// Overrides where the worker binary is looked up.
pub const WORKER_ENV: &str = "AGENT_SHIM_WORKER";

const WORKER_BINARY: &str = "agent-worker";

/// Runs one agent in a worker process and serves its capability calls.
///
/// Contract:
/// - the worker gets the entry path and a credential-free proxy config
/// - the worker's stdout/stdin carry the capability transport
/// - the worker's stderr is re-logged here
/// - a failing worker is logged and reported, never propagated as a panic
pub struct Supervisor {
    config: RuntimeConfig,
    client: Arc<dyn CapabilityClient>,
    worker_binary: PathBuf,
}

impl Supervisor {
    /// Build the real client from `config`; proxy mode makes no sense here.
    pub fn new(config: RuntimeConfig) -> ShimResult<Self> {
        if config.client == ClientMode::Proxy {
            return Err(ShimError::Config(
                "supervisor needs a direct or local client, not proxy".into(),
            ));
        }
        let client = config.build_client()?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: RuntimeConfig, client: Arc<dyn CapabilityClient>) -> Self {
        Self {
            config,
            client,
            worker_binary: PathBuf::from(WORKER_BINARY),
        }
    }

    pub fn with_worker_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.worker_binary = path.into();
        self
    }

    pub fn worker_binary(&self) -> &Path {
        &self.worker_binary
    }

    /// Launch the worker on `entry` and serve it until it exits.
    pub async fn run(&self, entry: &Path) -> Result<ExitStatus> {
        let worker_config = self.config.for_proxied_worker().to_json()?;
        let agent = agent_name(entry);

        let mut child = Command::new(&self.worker_binary)
            .arg(entry)
            .arg(worker_config)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn worker {:?}", self.worker_binary))?;

        let stdin = child.stdin.take().context("worker stdin unavailable")?;
        let stdout = child.stdout.take().context("worker stdout unavailable")?;
        let stderr = child.stderr.take().context("worker stderr unavailable")?;

        let service: Arc<dyn RequestHandler> =
            Arc::new(CapabilityService::new(self.client.clone(), agent.clone()));
        let transport = CorrelationTransport::spawn(stdout, stdin, Some(service));

        let forward_agent = agent.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::info!(target: "worker", agent = %forward_agent, "{line}");
            }
        });

        tracing::info!(%agent, entry = %entry.display(), "worker started");
        let status = child.wait().await.context("failed to wait for worker")?;
        drop(transport);
        // Drain whatever the worker wrote before exiting.
        let _ = stderr_task.await;

        if status.success() {
            tracing::info!(%agent, "worker finished");
        } else {
            tracing::error!(%agent, %status, "worker failed");
        }
        Ok(status)
    }
}

/// Name used for an agent in logs: its directory name, else `agent`.
pub fn agent_name(entry: &Path) -> String {
    entry
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "agent".to_string())
}

/// Locate the worker binary from the process environment.
pub fn resolve_worker_binary() -> PathBuf {
    worker_binary_from(std::env::var_os(WORKER_ENV), std::env::current_exe().ok())
}

/// `override_path` wins; otherwise the worker sits next to the current
/// executable; otherwise it is looked up on `PATH`.
pub fn worker_binary_from(override_path: Option<OsString>, current_exe: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path.filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    let file_name = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);
    if let Some(sibling) = current_exe
        .as_deref()
        .and_then(Path::parent)
        .map(|dir| dir.join(&file_name))
    {
        if sibling.exists() {
            return sibling;
        }
    }
    PathBuf::from(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_name_from_directory() {
        assert_eq!(agent_name(Path::new("agents/echo/agent.wat")), "echo");
        assert_eq!(agent_name(Path::new("agent.wat")), "agent");
    }

    #[test]
    fn worker_binary_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("agent-shim");
        let file_name = format!("{WORKER_BINARY}{}", std::env::consts::EXE_SUFFIX);

        assert_eq!(
            worker_binary_from(Some("/opt/worker".into()), Some(exe.clone())),
            PathBuf::from("/opt/worker")
        );
        assert_eq!(
            worker_binary_from(None, Some(exe.clone())),
            PathBuf::from(&file_name)
        );

        std::fs::write(dir.path().join(&file_name), b"").unwrap();
        assert_eq!(
            worker_binary_from(Some(OsString::new()), Some(exe)),
            dir.path().join(&file_name)
        );
    }

    #[test]
    fn proxy_config_is_rejected() {
        let config = RuntimeConfig::new("t-1", ClientMode::Proxy);
        assert!(matches!(Supervisor::new(config), Err(ShimError::Config(_))));
    }
}
