// crates/host/src/worker.rs

use std::path::PathBuf;

use anyhow::{bail, Result};

use agent_shim_core::{AgentRunReport, RuntimeContext};

/// Command line of `agent-worker <entry> <config-json>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    pub entry: PathBuf,
    pub config: String,
}

impl WorkerArgs {
    /// Parse the arguments after the program name.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let Some(entry) = args.next() else {
            bail!("missing agent entry path (usage: agent-worker <entry> <config-json>)");
        };
        let Some(config) = args.next() else {
            bail!("missing runtime config (usage: agent-worker <entry> <config-json>)");
        };
        Ok(Self {
            entry: PathBuf::from(entry),
            config,
        })
    }
}

/// Initialize the process-wide context and wait for the agent run.
///
/// `Ok(None)` means the run itself failed; the failure is already logged.
pub async fn run(args: &WorkerArgs) -> Result<Option<AgentRunReport>> {
    let context = RuntimeContext::global();
    match context.initialize(&args.config, &args.entry)? {
        Some(run) => Ok(run.await?),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_entry_and_config() {
        let args = WorkerArgs::parse(strings(&["agents/echo/agent.wat", "{}"])).unwrap();
        assert_eq!(args.entry, PathBuf::from("agents/echo/agent.wat"));
        assert_eq!(args.config, "{}");
    }

    #[test]
    fn missing_arguments_are_fatal() {
        let err = WorkerArgs::parse(Vec::new()).unwrap_err();
        assert!(err.to_string().contains("entry"));

        let err = WorkerArgs::parse(strings(&["agent.wat"])).unwrap_err();
        assert!(err.to_string().contains("config"));
    }
}
