// crates/host/src/log.rs

//! Logging setup and agent-run summaries.
//!
//! Everything goes to stderr: a proxied worker's stdout carries the
//! transport, and the supervisor forwards the worker's stderr into its own
//! log.

use std::fmt::Display;

use agent_shim_core::AgentRunReport;
use tracing_subscriber::EnvFilter;

/// Which side of the shim is logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Supervisor,
    Worker,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::Supervisor => "supervisor",
            Role::Worker => "worker",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
pub fn init(role: Role) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        // A worker's lines are re-logged by the supervisor, which adds its own colors.
        .with_ansi(role == Role::Supervisor)
        .try_init();
    if installed.is_ok() {
        tracing::debug!(role = role.name(), "logging initialized");
    }
}

/// Log what an agent printed and which capability calls it saw fail.
pub fn run_report(report: &AgentRunReport) {
    for line in report.stdout.lines().filter(|l| !l.trim().is_empty()) {
        tracing::info!(target: "agent", "{line}");
    }
    for line in report.stderr.lines().filter(|l| !l.trim().is_empty()) {
        tracing::warn!(target: "agent", "{line}");
    }
    for failure in &report.capability_errors {
        tracing::warn!(target: "agent", failure = %truncate(failure, 200), "capability call failed");
    }
    tracing::info!(
        entry = %report.entry.display(),
        invoked = report.invoked,
        capability_errors = report.capability_errors.len(),
        "agent run summary"
    );
}

/// Log a fatal startup error.
pub fn fatal(role: Role, error: impl Display) {
    tracing::error!(role = role.name(), "{error}");
}

/// Strip control characters and cap the length for single-line display.
pub fn truncate(s: &str, max: usize) -> String {
    let clean: String = s
        .chars()
        .filter(|c| !c.is_control() || *c == ' ')
        .collect();
    let trimmed = clean.trim();
    match trimmed.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
