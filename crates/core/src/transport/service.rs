// crates/core/src/transport/service.rs

//! Supervisor side of the capability proxy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::capability_client::{operations, CapabilityClient};
use crate::error::{ShimError, ShimResult};
use crate::transport::correlation::RequestHandler;
use crate::transport::proxy::{
    AppendReplyParams, CompletionParams, ListMessagesParams, ListThreadFilesParams,
    ReadFileParams,
};

/// Answers a worker's capability requests with a real client.
///
/// Every call is logged with its operation and outcome so a run's effects
/// on the outside world can be audited from the supervisor's log alone.
pub struct CapabilityService {
    client: Arc<dyn CapabilityClient>,
    agent: String,
}

impl CapabilityService {
    pub fn new(client: Arc<dyn CapabilityClient>, agent: impl Into<String>) -> Self {
        Self {
            client,
            agent: agent.into(),
        }
    }

    async fn dispatch(&self, operation: &str, payload: Value) -> ShimResult<Value> {
        match operation {
            operations::LIST_THREAD_FILES => {
                let p: ListThreadFilesParams = params(operation, payload)?;
                to_value(
                    self.client
                        .list_thread_files(p.order, p.thread_id.as_deref())
                        .await?,
                )
            }
            operations::READ_FILE_BY_ID => {
                let p: ReadFileParams = params(operation, payload)?;
                to_value(self.client.read_file_by_id(&p.file_id).await?)
            }
            operations::REQUEST_COMPLETION => {
                let p: CompletionParams = params(operation, payload)?;
                to_value(
                    self.client
                        .request_completion(&p.messages, p.model.as_deref())
                        .await?,
                )
            }
            operations::APPEND_REPLY => {
                let p: AppendReplyParams = params(operation, payload)?;
                to_value(
                    self.client
                        .append_reply(&p.message, p.message_type.as_deref())
                        .await?,
                )
            }
            operations::LIST_MESSAGES => {
                let p: ListMessagesParams = params(operation, payload)?;
                to_value(
                    self.client
                        .list_messages(p.thread_id.as_deref(), p.limit, p.order)
                        .await?,
                )
            }
            other => Err(ShimError::UnknownOperation(other.to_string())),
        }
    }
}

fn params<T: DeserializeOwned>(operation: &str, payload: Value) -> ShimResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| ShimError::MalformedResponse(format!("{operation} params: {e}")))
}

fn to_value<T: Serialize>(value: T) -> ShimResult<Value> {
    serde_json::to_value(value).map_err(|e| ShimError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl RequestHandler for CapabilityService {
    async fn handle(&self, operation: &str, payload: Value) -> ShimResult<Value> {
        let result = self.dispatch(operation, payload).await;
        match &result {
            Ok(_) => tracing::info!(agent = %self.agent, operation, "capability call served"),
            Err(error) => {
                tracing::warn!(agent = %self.agent, operation, %error, "capability call failed")
            }
        }
        result
    }
}
