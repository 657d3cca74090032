// crates/host/src/main.rs

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};

use agent_shim_core::RuntimeConfig;
use agent_shim_host::log::{self, Role};
use agent_shim_host::supervisor::{self, Supervisor};

const USAGE: &str = "usage: agent-shim <agent-entry> <config-json>";

#[tokio::main]
async fn main() -> ExitCode {
    log::init(Role::Supervisor);
    match run().await {
        Ok(code) => code,
        Err(e) => {
            log::fatal(Role::Supervisor, format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let mut args = std::env::args().skip(1);
    let entry = PathBuf::from(args.next().context(USAGE)?);
    let raw_config = args.next().context(USAGE)?;

    let config = RuntimeConfig::parse(&raw_config)?;
    let supervisor =
        Supervisor::new(config)?.with_worker_binary(supervisor::resolve_worker_binary());

    tracing::info!(
        entry = %entry.display(),
        worker = %supervisor.worker_binary().display(),
        "launching agent"
    );
    // A failed worker is already logged by `run`.
    supervisor.run(&entry).await?;
    Ok(ExitCode::SUCCESS)
}
