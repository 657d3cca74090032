// crates/core/src/capability_client.rs

use async_trait::async_trait;

use crate::error::ShimResult;
use crate::types::{ChatMessage, CompletionResult, FileRef, Message, SortOrder};

/// The only sanctioned path from agent code to the outside world.
///
/// Implementations can talk to the upstream API directly, proxy calls
/// through a supervisor over a correlation transport, or serve them from
/// memory. None of them retry: failures go straight back to the caller.
///
/// Where a `thread_id` is optional, `None` means the client's own thread.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    async fn list_thread_files(
        &self,
        order: Option<SortOrder>,
        thread_id: Option<&str>,
    ) -> ShimResult<Vec<FileRef>>;

    /// Full decoded content of a file.
    async fn read_file_by_id(&self, file_id: &str) -> ShimResult<String>;

    async fn request_completion(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> ShimResult<CompletionResult>;

    /// Append a reply to the thread; returns the persisted message.
    async fn append_reply(
        &self,
        message: &str,
        message_type: Option<&str>,
    ) -> ShimResult<Message>;

    async fn list_messages(
        &self,
        thread_id: Option<&str>,
        limit: Option<u32>,
        order: SortOrder,
    ) -> ShimResult<Vec<Message>>;
}

/// Operation names used when capability calls travel over a transport.
pub mod operations {
    pub const LIST_THREAD_FILES: &str = "list_thread_files";
    pub const READ_FILE_BY_ID: &str = "read_file_by_id";
    pub const REQUEST_COMPLETION: &str = "request_completion";
    pub const APPEND_REPLY: &str = "append_reply";
    pub const LIST_MESSAGES: &str = "list_messages";
}
