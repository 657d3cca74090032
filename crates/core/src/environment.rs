// crates/core/src/environment.rs

//! Agent-facing environment API.
//!
//! This is the surface agent authors program against; wasm agents reach it
//! through the `host` imports in `loader::host_functions`.

use std::sync::Arc;

use crate::context::RuntimeContext;
use crate::error::{ShimError, ShimResult};
use crate::types::{ChatMessage, Message, SortOrder};

#[derive(Clone)]
pub struct Environment {
    ctx: Arc<RuntimeContext>,
}

impl Environment {
    pub fn new(ctx: Arc<RuntimeContext>) -> Self {
        Self { ctx }
    }

    /// Environment bound to the process-wide context.
    pub fn global() -> Self {
        Self::new(RuntimeContext::global())
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Content of the thread file named exactly `filename`.
    ///
    /// A missing file yields an empty string rather than an error.
    pub async fn read_file(&self, filename: &str) -> ShimResult<String> {
        let client = self.ctx.client()?;
        let files = client.list_thread_files(None, None).await?;
        match files.iter().find(|f| f.filename == filename) {
            Some(file) => client.read_file_by_id(&file.id).await,
            None => {
                tracing::debug!(filename, "thread file not found");
                Ok(String::new())
            }
        }
    }

    /// Text of the first completion choice.
    ///
    /// Returns `None` when no client is available yet, so agents can test
    /// the result instead of handling `NotInitialized`.
    pub async fn completion(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> ShimResult<Option<String>> {
        let client = match self.ctx.client() {
            Ok(client) => client,
            Err(ShimError::NotInitialized) => return Ok(None),
            Err(other) => return Err(other),
        };
        let result = client.request_completion(messages, model).await?;
        Ok(Some(result.first_message()?.content.clone()))
    }

    pub async fn add_reply(&self, message: &str, message_type: Option<&str>) -> ShimResult<Message> {
        self.ctx.client()?.append_reply(message, message_type).await
    }

    pub async fn list_messages(
        &self,
        thread_id: Option<&str>,
        limit: Option<u32>,
        order: SortOrder,
    ) -> ShimResult<Vec<Message>> {
        self.ctx
            .client()?
            .list_messages(thread_id, limit, order)
            .await
    }

    /// Most recent message with the given role.
    pub async fn get_last_message(&self, role: &str) -> ShimResult<Option<Message>> {
        let messages = self.list_messages(None, None, SortOrder::Ascending).await?;
        Ok(messages.into_iter().rev().find(|m| m.role == role))
    }
}
