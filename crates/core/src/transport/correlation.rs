// crates/core/src/transport/correlation.rs

//! Request/response multiplexing over a single duplex byte channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::DEFAULT_REQUEST_TIMEOUT_MS;
use crate::error::{ShimError, ShimResult};
use crate::transport::message::{MessageKind, TransportMessage};

/// Serves requests that arrive from the other end of the channel.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, operation: &str, payload: Value) -> ShimResult<Value>;
}

struct PendingRequest {
    operation: String,
    deadline: Instant,
    reply: oneshot::Sender<ShimResult<Value>>,
}

// Only ever locked for a single map operation, never across an await.
type PendingMap = Arc<std::sync::Mutex<HashMap<String, PendingRequest>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Duplex request/response channel keyed by correlation id.
///
/// Contract:
/// - every `send` registers a pending entry before its request is written
/// - a reply resolves only the entry with the same correlation id
/// - an entry is removed on reply, timeout, or channel close; replies with
///   no matching entry are dropped
/// - when the channel ends, every pending request fails with
///   `TransportClosed`
pub struct CorrelationTransport {
    writer: SharedWriter,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    default_timeout: Duration,
    reader_task: JoinHandle<()>,
}

impl CorrelationTransport {
    /// Start the transport; must be called inside a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, handler: Option<Arc<dyn RequestHandler>>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));
        let pending: PendingMap = Arc::new(std::sync::Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        let reader_task = tokio::spawn(read_loop(
            reader,
            writer.clone(),
            pending.clone(),
            closed.clone(),
            handler,
        ));

        Self {
            writer,
            pending,
            closed,
            default_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            reader_task,
        }
    }

    /// Transport over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::spawn(tokio::io::stdin(), tokio::io::stdout(), None)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    pub async fn send(&self, operation: &str, payload: Value) -> ShimResult<Value> {
        self.send_with_timeout(operation, payload, self.default_timeout)
            .await
    }

    pub async fn send_with_timeout(
        &self,
        operation: &str,
        payload: Value,
        timeout: Duration,
    ) -> ShimResult<Value> {
        if self.is_closed() {
            return Err(ShimError::TransportClosed);
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(
            correlation_id.clone(),
            PendingRequest {
                operation: operation.to_string(),
                deadline: Instant::now() + timeout,
                reply: tx,
            },
        );
        // Removes the entry however this call ends, including the caller
        // dropping the future.
        let _entry = PendingEntry {
            pending: &self.pending,
            correlation_id: &correlation_id,
        };

        // The reader may have drained the map between the check above and the insert.
        if self.is_closed() {
            return Err(ShimError::TransportClosed);
        }

        let request = TransportMessage::request(operation, payload, &correlation_id);
        if let Err(error) = write_message(&self.writer, &request).await {
            tracing::warn!(operation, %error, "failed to write transport request");
            return Err(ShimError::TransportClosed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ShimError::TransportClosed),
            Err(_) => {
                tracing::debug!(operation, %correlation_id, "transport request timed out");
                Err(ShimError::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                })
            }
        }
    }
}

/// Pending-map registration of one in-flight send.
struct PendingEntry<'a> {
    pending: &'a PendingMap,
    correlation_id: &'a str,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock_pending(self.pending).remove(self.correlation_id);
    }
}

fn lock_pending(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for CorrelationTransport {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_message(writer: &SharedWriter, message: &TransportMessage) -> std::io::Result<()> {
    let line = message.to_line()?;
    let mut writer = writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn read_loop<R>(
    reader: R,
    writer: SharedWriter,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    handler: Option<Arc<dyn RequestHandler>>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!("transport channel reached end of stream");
                break;
            }
            Ok(_) => {
                let line = buf.trim_ascii();
                if line.is_empty() {
                    continue;
                }
                // A bad line is skipped; only I/O failure or EOF ends the channel.
                match serde_json::from_slice::<TransportMessage>(line) {
                    Ok(message) => dispatch(message, &writer, &pending, &handler).await,
                    Err(error) => tracing::warn!(
                        %error,
                        line = %String::from_utf8_lossy(line),
                        "unparsable transport message"
                    ),
                }
            }
            Err(error) => {
                tracing::warn!(%error, "transport channel read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    reject_all(&pending).await;
}

async fn dispatch(
    message: TransportMessage,
    writer: &SharedWriter,
    pending: &PendingMap,
    handler: &Option<Arc<dyn RequestHandler>>,
) {
    match message.kind {
        MessageKind::Request => {
            tokio::spawn(serve_request(handler.clone(), writer.clone(), message));
        }
        MessageKind::Response | MessageKind::Error => {
            let entry = lock_pending(pending).remove(&message.correlation_id);
            let Some(entry) = entry else {
                tracing::debug!(
                    correlation_id = %message.correlation_id,
                    operation = %message.operation,
                    "dropping reply with no pending request"
                );
                return;
            };
            let result = match message.kind {
                MessageKind::Response => Ok(message.payload),
                _ => Err(message.into_error()),
            };
            // The requester may have given up in the meantime.
            let _ = entry.reply.send(result);
        }
    }
}

async fn serve_request(
    handler: Option<Arc<dyn RequestHandler>>,
    writer: SharedWriter,
    request: TransportMessage,
) {
    let TransportMessage {
        operation,
        payload,
        correlation_id,
        ..
    } = request;

    let reply = match handler {
        Some(handler) => match handler.handle(&operation, payload).await {
            Ok(result) => TransportMessage::response(&operation, result, &correlation_id),
            Err(error) => TransportMessage::error(&operation, &error, &correlation_id),
        },
        None => TransportMessage::error(
            &operation,
            &ShimError::UnknownOperation(operation.clone()),
            &correlation_id,
        ),
    };

    if let Err(error) = write_message(&writer, &reply).await {
        tracing::warn!(operation = %operation, %error, "failed to write transport reply");
    }
}

async fn reject_all(pending: &PendingMap) {
    let drained: Vec<_> = lock_pending(pending).drain().collect();
    let now = Instant::now();
    for (correlation_id, entry) in drained {
        tracing::debug!(
            %correlation_id,
            operation = %entry.operation,
            remaining = ?entry.deadline.saturating_duration_since(now),
            "rejecting pending request: transport closed"
        );
        let _ = entry.reply.send(Err(ShimError::TransportClosed));
    }
}
