use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use mnemo_protocol::{RawChunk, SseDecoder, StreamEvent, ThreadRecord};
use reqwest::header::ACCEPT;
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use url::Url;

use crate::config::{AuthConfig, BackendConfig};
use crate::error::ClientError;

/// HTTP/SSE client for the chat backend.
///
/// Carries bearer-token auth with a single refresh-and-retry cycle on 401;
/// if the refresh fails the error surfaces instead of looping.
pub struct BackendClient {
    http: reqwest::Client,
    base: Url,
    request_timeout: Duration,
    auth: Mutex<AuthState>,
}

#[derive(Debug, Default)]
struct AuthState {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl BackendClient {
    pub fn new(backend: &BackendConfig, auth: &AuthConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(backend.connect_timeout_secs))
            .build()?;
        let mut base = Url::parse(&backend.base_url)?;
        // Keep a trailing slash so endpoint joins stay relative to any
        // path prefix in the base url.
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        Ok(Self {
            http,
            base,
            request_timeout: Duration::from_secs(backend.request_timeout_secs),
            auth: Mutex::new(AuthState {
                access_token: auth.access_token.clone(),
                refresh_token: auth.refresh_token.clone(),
            }),
        })
    }

    /// Open the reply stream for one user message.
    pub async fn stream_chat(
        &self,
        thread_id: &str,
        message: &str,
    ) -> Result<ChunkStream, ClientError> {
        let body = json!({ "thread_id": thread_id, "message": message });
        let resp = self
            .execute(Method::POST, "chat/stream", Some(&body), true)
            .await?;
        Ok(ChunkStream::new(resp))
    }

    /// Full message history of a thread, as raw wire chunks.
    pub async fn fetch_history(&self, thread_id: &str) -> Result<Vec<RawChunk>, ClientError> {
        let resp = self
            .execute(Method::GET, &format!("chat/history/{thread_id}"), None, false)
            .await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadRecord>, ClientError> {
        let resp = self.execute(Method::GET, "chat/threads", None, false).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn create_thread(&self, title: &str) -> Result<ThreadRecord, ClientError> {
        let body = json!({ "title": title });
        let resp = self
            .execute(Method::POST, "chat/threads", Some(&body), false)
            .await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        streaming: bool,
    ) -> Result<Response, ClientError> {
        let url = self.endpoint(path)?;
        let resp = self
            .send_once(method.clone(), url.clone(), body, streaming)
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Self::check(resp);
        }
        tracing::debug!(%url, "401 from backend; refreshing token");
        self.refresh_tokens().await?;
        let retry = self.send_once(method, url, body, streaming).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        Self::check(retry)
    }

    async fn send_once(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        streaming: bool,
    ) -> Result<Response, ClientError> {
        let mut rb = self.http.request(method, url);
        if streaming {
            rb = rb.header(ACCEPT, "text/event-stream");
        } else {
            rb = rb.timeout(self.request_timeout);
        }
        if let Some(body) = body {
            rb = rb.json(body);
        }
        if let Some(token) = self.auth.lock().await.access_token.clone() {
            rb = rb.bearer_auth(token);
        }
        Ok(rb.send().await?)
    }

    async fn refresh_tokens(&self) -> Result<(), ClientError> {
        let refresh_token = self
            .auth
            .lock()
            .await
            .refresh_token
            .clone()
            .ok_or(ClientError::Unauthorized)?;
        let url = self.endpoint("auth/refresh")?;
        let resp = self
            .http
            .post(url)
            .timeout(self.request_timeout)
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Unauthorized);
        }
        let bytes = resp.bytes().await?;
        let tokens: TokenResponse = serde_json::from_slice(&bytes)?;
        let mut auth = self.auth.lock().await;
        auth.access_token = Some(tokens.access_token);
        if let Some(rt) = tokens.refresh_token {
            auth.refresh_token = Some(rt);
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    fn check(resp: Response) -> Result<Response, ClientError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(ClientError::Status(resp.status()))
        }
    }
}

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Decoded event stream over one chat reply.
///
/// Malformed events are logged and skipped here (best-effort degradation);
/// only transport failures surface as errors.
pub struct ChunkStream {
    body: BodyStream,
    decoder: SseDecoder,
    pending: std::collections::VecDeque<StreamEvent>,
    closed: bool,
}

impl ChunkStream {
    fn new(resp: Response) -> Self {
        Self {
            body: Box::pin(resp.bytes_stream()),
            decoder: SseDecoder::new(),
            pending: std::collections::VecDeque::new(),
            closed: false,
        }
    }

    /// Next decoded event, or `None` once the transport closes.
    pub async fn next(&mut self) -> Option<Result<StreamEvent, ClientError>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.closed {
                return None;
            }
            match self.body.next().await {
                Some(Ok(bytes)) => {
                    for item in self.decoder.feed(&bytes) {
                        match item {
                            Ok(event) => self.pending.push_back(event),
                            Err(e) => {
                                tracing::warn!(error = %e, "skipping malformed stream event");
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.closed = true;
                    match self.decoder.finish() {
                        Some(Ok(event)) => self.pending.push_back(event),
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "skipping malformed trailing event");
                        }
                        None => {}
                    }
                }
            }
        }
    }
}
