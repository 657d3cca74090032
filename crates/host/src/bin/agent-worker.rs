// crates/host/src/bin/agent-worker.rs

use std::process::ExitCode;
use std::time::Duration;

use agent_shim_host::log::{self, Role};
use agent_shim_host::worker::{self, WorkerArgs};

fn main() -> ExitCode {
    log::init(Role::Worker);

    let args = match WorkerArgs::parse(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            log::fatal(Role::Worker, e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::fatal(Role::Worker, e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = runtime.block_on(worker::run(&args));
    // A blocked stdin read cannot be cancelled; don't wait on it.
    runtime.shutdown_timeout(Duration::from_millis(250));

    match outcome {
        Ok(Some(report)) => {
            log::run_report(&report);
            ExitCode::SUCCESS
        }
        Ok(None) => ExitCode::FAILURE,
        Err(e) => {
            log::fatal(Role::Worker, format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}
