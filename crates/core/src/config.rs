// crates/core/src/config.rs

//! Runtime configuration handed to a worker as its second bootstrap argument.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capability_client::CapabilityClient;
use crate::error::{ShimError, ShimResult};
use crate::memory::{InMemoryCapabilityClient, ThreadFixture};
use crate::remote_client::RemoteCapabilityClient;
use crate::transport::ProxyCapabilityClient;

/// Default deadline for a single transport request.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// How the worker reaches its capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    /// Talk to the upstream API over HTTP.
    #[default]
    Direct,
    /// Forward every call to the supervisor over stdin/stdout.
    Proxy,
    /// Serve calls from an in-memory thread seeded by `fixture`.
    Local,
}

/// Everything needed to build a capability client and identify the thread.
///
/// Fields not present in the payload fall back to environment variables:
/// - AGENT_SHIM_API_URL
/// - AGENT_SHIM_AUTH_TOKEN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub thread_id: String,
    #[serde(default)]
    pub client: ClientMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,
    /// Instruction budget for one agent run; unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fuel: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<ThreadFixture>,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl RuntimeConfig {
    pub fn new(thread_id: impl Into<String>, client: ClientMode) -> Self {
        Self {
            thread_id: thread_id.into(),
            client,
            api_url: None,
            auth_token: None,
            default_model: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            scratch_dir: None,
            max_fuel: None,
            fixture: None,
        }
    }

    /// Parse the serialized payload.
    pub fn parse(raw: &str) -> ShimResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(raw).map_err(|e| ShimError::Config(e.to_string()))?;
        if config.thread_id.trim().is_empty() {
            return Err(ShimError::Config("thread_id must not be empty".into()));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> ShimResult<String> {
        serde_json::to_string(self).map_err(|e| ShimError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Scratch directory for translated artifacts. Each run works in its
    /// own subdirectory, so the default is shared across processes.
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("agent-shim"))
    }

    pub fn resolved_api_url(&self) -> ShimResult<String> {
        self.api_url
            .clone()
            .or_else(|| std::env::var("AGENT_SHIM_API_URL").ok())
            .ok_or_else(|| ShimError::Config("api_url not set (AGENT_SHIM_API_URL)".into()))
    }

    pub fn resolved_auth_token(&self) -> Option<String> {
        self.auth_token
            .clone()
            .or_else(|| std::env::var("AGENT_SHIM_AUTH_TOKEN").ok())
    }

    /// Config for a worker launched by a supervisor: same thread and limits,
    /// but no credentials, and every call goes back over the transport.
    pub fn for_proxied_worker(&self) -> Self {
        Self {
            thread_id: self.thread_id.clone(),
            client: ClientMode::Proxy,
            api_url: None,
            auth_token: None,
            default_model: None,
            request_timeout_ms: self.request_timeout_ms,
            scratch_dir: self.scratch_dir.clone(),
            max_fuel: self.max_fuel,
            fixture: None,
        }
    }

    /// Build the capability client this config describes.
    ///
    /// Proxy mode binds the process stdin/stdout and must run inside a
    /// tokio runtime.
    pub fn build_client(&self) -> ShimResult<Arc<dyn CapabilityClient>> {
        match self.client {
            ClientMode::Direct => Ok(Arc::new(RemoteCapabilityClient::from_config(self)?)),
            ClientMode::Local => Ok(Arc::new(InMemoryCapabilityClient::from_fixture(
                &self.thread_id,
                self.fixture.clone().unwrap_or_default(),
            ))),
            ClientMode::Proxy => Ok(Arc::new(ProxyCapabilityClient::stdio(
                self.request_timeout(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_applies_defaults() {
        let config = RuntimeConfig::parse(r#"{"thread_id":"t-1"}"#).unwrap();
        assert_eq!(config.client, ClientMode::Direct);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert!(config.max_fuel.is_none());
    }

    #[test]
    fn parse_rejects_garbage_and_blank_thread() {
        assert!(matches!(
            RuntimeConfig::parse("not json"),
            Err(ShimError::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::parse(r#"{"thread_id":"  "}"#),
            Err(ShimError::Config(_))
        ));
    }

    #[test]
    fn proxied_worker_config_drops_credentials() {
        let mut config = RuntimeConfig::new("t-9", ClientMode::Direct);
        config.api_url = Some("https://api.example.test".into());
        config.auth_token = Some("secret".into());
        config.max_fuel = Some(1_000);

        let worker = config.for_proxied_worker();
        assert_eq!(worker.client, ClientMode::Proxy);
        assert_eq!(worker.thread_id, "t-9");
        assert_eq!(worker.max_fuel, Some(1_000));
        assert!(worker.api_url.is_none());
        assert!(worker.auth_token.is_none());
        assert!(!worker.to_json().unwrap().contains("secret"));
    }
}
