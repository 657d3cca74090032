// crates/core/src/memory.rs

//! In-memory thread store used for local dry runs and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability_client::CapabilityClient;
use crate::error::{ShimError, ShimResult};
use crate::types::{ChatMessage, CompletionResult, FileRef, Message, SortOrder};

/// Seed data for a local thread.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadFixture {
    /// filename -> content
    #[serde(default)]
    pub files: HashMap<String, String>,
    /// Messages in chronological order.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// Produces a completion for a prompt.
pub type Responder = Arc<dyn Fn(&[ChatMessage]) -> ShimResult<CompletionResult> + Send + Sync>;

struct StoredFile {
    meta: FileRef,
    content: String,
}

#[derive(Default)]
struct ThreadStore {
    files: Vec<StoredFile>,
    messages: HashMap<String, Vec<Message>>,
    completions: Vec<Vec<ChatMessage>>,
}

/// Capability client backed by process memory.
pub struct InMemoryCapabilityClient {
    thread_id: String,
    store: Mutex<ThreadStore>,
    responder: Responder,
}

impl InMemoryCapabilityClient {
    pub fn new(thread_id: &str) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            store: Mutex::new(ThreadStore::default()),
            responder: Arc::new(echo_last_user_message),
        }
    }

    pub fn from_fixture(thread_id: &str, fixture: ThreadFixture) -> Self {
        let client = Self::new(thread_id);
        let mut names: Vec<_> = fixture.files.into_iter().collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));
        for (filename, content) in names {
            client.add_file(&filename, &content);
        }
        for message in fixture.messages {
            client.push_message(&message.role, &message.content);
        }
        client
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }

    /// Attach a file to the client's thread; returns its id.
    pub fn add_file(&self, filename: &str, content: &str) -> String {
        let mut store = self.lock();
        let id = format!("file-{}", store.files.len() + 1);
        store.files.push(StoredFile {
            meta: FileRef {
                id: id.clone(),
                filename: filename.to_string(),
                bytes: Some(content.len() as u64),
                purpose: Some("assistants".to_string()),
            },
            content: content.to_string(),
        });
        id
    }

    /// Append a message with an arbitrary role to the client's thread.
    pub fn push_message(&self, role: &str, content: &str) -> Message {
        self.insert_message(role, content, None)
    }

    /// Snapshot of the client's thread, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.lock()
            .messages
            .get(&self.thread_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every prompt passed to `request_completion`, in call order.
    pub fn completion_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.lock().completions.clone()
    }

    fn insert_message(&self, role: &str, content: &str, message_type: Option<&str>) -> Message {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: Some(self.thread_id.clone()),
            role: role.to_string(),
            content: content.to_string(),
            message_type: message_type.map(str::to_string),
            created_at: Some(chrono::Utc::now().timestamp()),
        };
        self.lock()
            .messages
            .entry(self.thread_id.clone())
            .or_default()
            .push(message.clone());
        message
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ThreadStore> {
        // A panic while holding the lock leaves plain data behind; keep serving.
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn echo_last_user_message(messages: &[ChatMessage]) -> ShimResult<CompletionResult> {
    let last = messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.content.clone())
        .unwrap_or_default();
    Ok(CompletionResult::from_text(last))
}

#[async_trait]
impl CapabilityClient for InMemoryCapabilityClient {
    async fn list_thread_files(
        &self,
        order: Option<SortOrder>,
        thread_id: Option<&str>,
    ) -> ShimResult<Vec<FileRef>> {
        // Files are only attached to the client's own thread.
        if thread_id.is_some_and(|id| id != self.thread_id) {
            return Ok(Vec::new());
        }
        let mut files: Vec<FileRef> = self.lock().files.iter().map(|f| f.meta.clone()).collect();
        if order == Some(SortOrder::Descending) {
            files.reverse();
        }
        Ok(files)
    }

    async fn read_file_by_id(&self, file_id: &str) -> ShimResult<String> {
        self.lock()
            .files
            .iter()
            .find(|f| f.meta.id == file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| ShimError::remote(Some(404), format!("file {file_id} not found")))
    }

    async fn request_completion(
        &self,
        messages: &[ChatMessage],
        _model: Option<&str>,
    ) -> ShimResult<CompletionResult> {
        self.lock().completions.push(messages.to_vec());
        (self.responder)(messages)
    }

    async fn append_reply(
        &self,
        message: &str,
        message_type: Option<&str>,
    ) -> ShimResult<Message> {
        Ok(self.insert_message("assistant", message, message_type))
    }

    async fn list_messages(
        &self,
        thread_id: Option<&str>,
        limit: Option<u32>,
        order: SortOrder,
    ) -> ShimResult<Vec<Message>> {
        let thread = thread_id.unwrap_or(&self.thread_id);
        let mut messages = self
            .lock()
            .messages
            .get(thread)
            .cloned()
            .unwrap_or_default();
        if order == SortOrder::Descending {
            messages.reverse();
        }
        if let Some(limit) = limit {
            messages.truncate(limit as usize);
        }
        Ok(messages)
    }
}
