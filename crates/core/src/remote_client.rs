// crates/core/src/remote_client.rs

//! Direct HTTP client for the upstream thread and inference API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::capability_client::CapabilityClient;
use crate::config::RuntimeConfig;
use crate::error::{ShimError, ShimResult};
use crate::types::{ChatMessage, CompletionResult, FileRef, Message, SortOrder};

/// Capability client that talks to the upstream API over HTTP.
///
/// Endpoint shape:
/// - GET  {api}/threads/{thread}/files?order=asc
/// - GET  {api}/files/{file}/content
/// - POST {api}/chat/completions
/// - POST {api}/threads/{thread}/messages
/// - GET  {api}/threads/{thread}/messages?order=asc&limit=N
pub struct RemoteCapabilityClient {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    thread_id: String,
    default_model: Option<String>,
}

impl RemoteCapabilityClient {
    pub fn new(base_url: &str, auth_token: Option<String>, thread_id: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            thread_id: thread_id.to_string(),
            default_model: None,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> ShimResult<Self> {
        let base_url = config.resolved_api_url()?;
        let mut client = Self::new(&base_url, config.resolved_auth_token(), &config.thread_id);
        client.default_model = config.default_model.clone();
        Ok(client)
    }

    fn thread_url(&self, thread_id: Option<&str>, suffix: &str) -> String {
        let thread = thread_id.unwrap_or(&self.thread_id);
        format!(
            "{}/threads/{}/{}",
            self.base_url,
            urlencoding::encode(thread),
            suffix
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> ShimResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| ShimError::remote(None, format!("{what}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read error body>".to_string());
            return Err(ShimError::remote(
                Some(status.as_u16()),
                format!("{what}: {body}"),
            ));
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> ShimResult<T> {
        let response = self.send(request, what).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ShimError::remote(None, format!("{what}: failed to read body: {e}")))?;
        serde_json::from_str(&body).map_err(|e| ShimError::MalformedResponse(format!("{what}: {e}")))
    }
}

/// Upstream list responses wrap their items in `data`.
#[derive(serde::Deserialize)]
struct ListEnvelope<T> {
    data: Vec<T>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Serialize)]
struct AppendMessageRequest<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message_type: Option<&'a str>,
}

#[async_trait]
impl CapabilityClient for RemoteCapabilityClient {
    async fn list_thread_files(
        &self,
        order: Option<SortOrder>,
        thread_id: Option<&str>,
    ) -> ShimResult<Vec<FileRef>> {
        let mut request = self.client.get(self.thread_url(thread_id, "files"));
        if let Some(order) = order {
            request = request.query(&[("order", order.as_query())]);
        }
        let envelope: ListEnvelope<FileRef> = self.send_json(request, "list thread files").await?;
        Ok(envelope.data)
    }

    async fn read_file_by_id(&self, file_id: &str) -> ShimResult<String> {
        let url = format!(
            "{}/files/{}/content",
            self.base_url,
            urlencoding::encode(file_id)
        );
        let response = self.send(self.client.get(url), "read file").await?;
        response
            .text()
            .await
            .map_err(|e| ShimError::MalformedResponse(format!("read file {file_id}: {e}")))
    }

    async fn request_completion(
        &self,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> ShimResult<CompletionResult> {
        let body = CompletionRequest {
            messages,
            model: model.or(self.default_model.as_deref()),
        };
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        self.send_json(request, "request completion").await
    }

    async fn append_reply(
        &self,
        message: &str,
        message_type: Option<&str>,
    ) -> ShimResult<Message> {
        let body = AppendMessageRequest {
            role: "assistant",
            content: message,
            message_type,
        };
        let request = self
            .client
            .post(self.thread_url(None, "messages"))
            .json(&body);
        self.send_json(request, "append reply").await
    }

    async fn list_messages(
        &self,
        thread_id: Option<&str>,
        limit: Option<u32>,
        order: SortOrder,
    ) -> ShimResult<Vec<Message>> {
        let mut request = self
            .client
            .get(self.thread_url(thread_id, "messages"))
            .query(&[("order", order.as_query())]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let envelope: ListEnvelope<Message> = self.send_json(request, "list messages").await?;
        Ok(envelope.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientMode;
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// What the canned server saw.
    #[derive(Debug)]
    struct CapturedRequest {
        request_line: String,
        headers: HashMap<String, String>,
        body: String,
    }

    /// Serve one canned HTTP/1.1 response on a local port; returns the base
    /// url and a handle resolving to the captured request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<CapturedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap();
            let mut headers = HashMap::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
            let length = headers
                .get("content-length")
                .map(|v| v.parse::<usize>().unwrap())
                .unwrap_or(0);
            let mut body = vec![0u8; length];
            reader.read_exact(&mut body).await.unwrap();

            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            CapturedRequest {
                request_line: request_line.trim_end().to_string(),
                headers,
                body: String::from_utf8(body).unwrap(),
            }
        });
        (base_url, handle)
    }

    #[test]
    fn thread_urls_encode_segments() {
        let client = RemoteCapabilityClient::new("https://api.example.test/v1/", None, "a/b c");
        assert_eq!(
            client.thread_url(None, "files"),
            "https://api.example.test/v1/threads/a%2Fb%20c/files"
        );
        assert_eq!(
            client.thread_url(Some("other"), "messages"),
            "https://api.example.test/v1/threads/other/messages"
        );
    }

    #[test]
    fn from_config_keeps_default_model() {
        let mut config = RuntimeConfig::new("t-1", ClientMode::Direct);
        config.api_url = Some("http://localhost:9".into());
        config.default_model = Some("small-model".into());
        let client = RemoteCapabilityClient::from_config(&config).unwrap();
        assert_eq!(client.default_model.as_deref(), Some("small-model"));
        assert_eq!(client.base_url, "http://localhost:9");
    }

    #[tokio::test]
    async fn unreachable_service_is_a_remote_error() {
        // Port 9 (discard) is expected to refuse connections.
        let client = RemoteCapabilityClient::new("http://127.0.0.1:9", None, "t-1");
        let err = client.read_file_by_id("f-1").await.unwrap_err();
        assert!(matches!(err, ShimError::RemoteService { status: None, .. }));
    }

    /// Client for the canned server; ignores any proxy set in the environment.
    fn local_client(base_url: &str, auth_token: Option<&str>) -> RemoteCapabilityClient {
        RemoteCapabilityClient {
            client: Client::builder().no_proxy().build().unwrap(),
            ..RemoteCapabilityClient::new(base_url, auth_token.map(str::to_string), "t-1")
        }
    }

    #[tokio::test]
    async fn non_success_status_keeps_code_and_body() {
        let (base_url, server) =
            serve_once("404 Not Found", r#"{"error":"no such thread"}"#).await;
        let client = local_client(&base_url, None);

        let err = client
            .list_messages(None, None, SortOrder::Ascending)
            .await
            .unwrap_err();
        match err {
            ShimError::RemoteService { status, message } => {
                assert_eq!(status, Some(404));
                assert!(message.contains("no such thread"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let (base_url, server) = serve_once("200 OK", "this is not json").await;
        let client = local_client(&base_url, None);

        let err = client
            .request_completion(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ShimError::MalformedResponse(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn list_messages_sends_query_and_bearer_and_unwraps_data() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"object":"list","data":[
                {"id":"m-2","role":"assistant","content":"second"},
                {"id":"m-1","role":"user","content":"first"}
            ]}"#,
        )
        .await;
        let client = local_client(&base_url, Some("secret"));

        let messages = client
            .list_messages(None, Some(2), SortOrder::Descending)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m-2");
        assert_eq!(messages[1].content, "first");

        let request = server.await.unwrap();
        assert_eq!(
            request.request_line,
            "GET /v1/threads/t-1/messages?order=desc&limit=2 HTTP/1.1"
        );
        assert_eq!(
            request.headers.get("authorization").map(String::as_str),
            Some("Bearer secret")
        );
    }

    #[tokio::test]
    async fn list_files_without_token_sends_no_authorization() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"data":[{"id":"f-1","filename":"notes.txt","bytes":5}]}"#,
        )
        .await;
        let client = local_client(&base_url, None);

        let files = client
            .list_thread_files(Some(SortOrder::Ascending), None)
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "notes.txt");

        let request = server.await.unwrap();
        assert_eq!(request.request_line, "GET /v1/threads/t-1/files?order=asc HTTP/1.1");
        assert!(!request.headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn append_reply_posts_assistant_message() {
        let (base_url, server) = serve_once(
            "200 OK",
            r#"{"id":"m-9","role":"assistant","content":"done","message_type":"text"}"#,
        )
        .await;
        let client = local_client(&base_url, Some("secret"));

        let posted = client.append_reply("done", Some("text")).await.unwrap();
        assert_eq!(posted.id, "m-9");

        let request = server.await.unwrap();
        assert_eq!(request.request_line, "POST /v1/threads/t-1/messages HTTP/1.1");
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"role":"assistant","content":"done","message_type":"text"})
        );
    }
}
