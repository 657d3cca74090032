// crates/core/src/transport/proxy.rs

//! Capability client that forwards every call over a correlation transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability_client::{operations, CapabilityClient};
use crate::error::{ShimError, ShimResult};
use crate::transport::CorrelationTransport;
use crate::types::{ChatMessage, CompletionResult, FileRef, Message, SortOrder};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ListThreadFilesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ReadFileParams {
    pub file_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CompletionParams {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AppendReplyParams {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ListMessagesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Worker-side client: the supervisor holds the real one.
pub struct ProxyCapabilityClient {
    transport: Arc<CorrelationTransport>,
}

impl ProxyCapabilityClient {
    pub fn new(transport: Arc<CorrelationTransport>) -> Self {
        Self { transport }
    }

    /// Client over this process's stdin/stdout; must be called inside a
    /// tokio runtime.
    pub fn stdio(timeout: Duration) -> Self {
        Self::new(Arc::new(
            CorrelationTransport::stdio().with_default_timeout(timeout),
        ))
    }

    pub fn transport(&self) -> &Arc<CorrelationTransport> {
        &self.transport
    }

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        params: &P,
    ) -> ShimResult<T> {
        let payload = serde_json::to_value(params)
            .map_err(|e| ShimError::MalformedResponse(format!("{operation} params: {e}")))?;
        let result: Value = self.transport.send(operation, payload).await?;
        serde_json::from_value(result)
            .map_err(|e| ShimError::MalformedResponse(format!("{operation} result: {e}")))
    }
}

#[async_trait]
impl CapabilityClient for ProxyCapabilityClient {
    async fn list_thread_files(
        &self,
        order: Option<SortOrder>,
        thread_id: Option<&str>,
    ) -> ShimResult<Vec<FileRef>> {
        let params = ListThreadFilesParams {
            order,
            thread_id: thread_id.map(str::to_string),
        };
        self.call(operations::LIST_THREAD_FILES, &params).await
    }

    async fn read_file_by_id(&self, file_id: &str) -> ShimResult<String> {
        let params = ReadFileParams {
            file_id: file_id.to_string(),
        };
        self.call(operations::READ_FILE_BY_ID, &params).await
    }

    async fn request_completion(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> ShimResult<CompletionResult> {
        let params = CompletionParams {
            messages: messages.to_vec(),
            model: model.map(str::to_string),
        };
        self.call(operations::REQUEST_COMPLETION, &params).await
    }

    async fn append_reply(
        &self,
        message: &str,
        message_type: Option<&str>,
    ) -> ShimResult<Message> {
        let params = AppendReplyParams {
            message: message.to_string(),
            message_type: message_type.map(str::to_string),
        };
        self.call(operations::APPEND_REPLY, &params).await
    }

    async fn list_messages(
        &self,
        thread_id: Option<&str>,
        limit: Option<u32>,
        order: SortOrder,
    ) -> ShimResult<Vec<Message>> {
        let params = ListMessagesParams {
            thread_id: thread_id.map(str::to_string),
            limit,
            order,
        };
        self.call(operations::LIST_MESSAGES, &params).await
    }
}
