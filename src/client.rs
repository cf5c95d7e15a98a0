use crate::error::{ClientError, ClientResult, error_chain};
use crate::protocol::{ChatMessage, DashboardStats, Period, SendMessageRequest, StreamEvent};
use crate::sse::{failed_reply, read_reply};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client as HttpClient, Response, Url};
use std::io::Write;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Deadline for the stats and history requests; for a streamed reply it
    /// only bounds the wait between two reads.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// HTTP client for the stats and chat endpoints.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    request_timeout: Duration,
    http: HttpClient,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let base_url = normalize_base_url(&config.base_url);
        Url::parse(&base_url).map_err(|e| ClientError::Url(format!("{base_url}: {e}")))?;

        // No client-wide deadline: it would cut off long streamed replies.
        let http = HttpClient::builder()
            .read_timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            base_url,
            request_timeout: config.request_timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch_stats(&self, period: Period) -> ClientResult<DashboardStats> {
        let url = self.endpoint("/api/stats", &[("period", period.as_str())])?;
        tracing::debug!(%period, "fetching dashboard stats");

        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = ensure_success(response, "Failed to fetch stats")?;

        Ok(response.json().await?)
    }

    pub async fn chat_history(&self, session_id: &str) -> ClientResult<Vec<ChatMessage>> {
        let url = self.endpoint("/api/chat/history", &[("session_id", session_id)])?;
        tracing::debug!(session_id, "loading chat history");

        let response = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = ensure_success(response, "Failed to load chat history")?;

        Ok(response.json().await?)
    }

    /// Posts a chat message and streams the reply.
    ///
    /// Failures never surface as `Err`: a bad status or a transport error
    /// becomes the stream's single `Error` item.
    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
    ) -> BoxStream<'static, StreamEvent> {
        let url = match self.endpoint("/api/chat/message", &[]) {
            Ok(url) => url,
            Err(err) => return failed_reply(err.to_string()),
        };
        let request = SendMessageRequest {
            session_id: session_id.to_string(),
            message: message.to_string(),
        };

        tracing::info!(session_id, len = message.len(), "sending chat message");
        let response = match self.http.post(url).json(&request).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "chat request failed");
                return failed_reply(error_chain(&err));
            }
        };

        match ensure_success(response, "Failed to send message") {
            Ok(response) => read_reply(response.bytes_stream()),
            Err(err) => {
                tracing::warn!(error = %err, "chat request rejected");
                failed_reply(err.to_string())
            }
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> ClientResult<Url> {
        let raw = format!("{}{}", self.base_url, path);
        let parsed = if params.is_empty() {
            Url::parse(&raw)
        } else {
            Url::parse_with_params(&raw, params)
        };
        parsed.map_err(|e| ClientError::Url(format!("{raw}: {e}")))
    }
}

/// Drains a reply stream into the full assistant text.
pub async fn collect_reply(mut stream: BoxStream<'static, StreamEvent>) -> ClientResult<String> {
    let mut reply = String::new();
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Token { content } => reply.push_str(&content),
            StreamEvent::Done => break,
            StreamEvent::Error { content } => return Err(ClientError::Reply(content)),
        }
    }
    Ok(reply)
}

/// Writes a reply to `out` as it streams, ending with a newline.
///
/// Tokens are flushed one by one. An `Error` item ends the output (with a
/// newline if anything was written) and comes back as [`ClientError::Reply`].
pub async fn write_reply<W: Write>(
    mut stream: BoxStream<'static, StreamEvent>,
    out: &mut W,
) -> ClientResult<()> {
    let mut written = false;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Token { content } => {
                out.write_all(content.as_bytes())?;
                out.flush()?;
                written = true;
            }
            StreamEvent::Done => break,
            StreamEvent::Error { content } => {
                if written {
                    writeln!(out)?;
                }
                return Err(ClientError::Reply(content));
            }
        }
    }

    writeln!(out)?;
    out.flush()?;
    Ok(())
}

fn ensure_success(response: Response, context: &'static str) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status { context, status })
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}
