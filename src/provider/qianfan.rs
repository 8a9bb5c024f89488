use super::sse::{SseEvent, SseParser};
use super::types::{ChatRequest, ChunkStream, CompletionChunk, CompletionResponse, Provider};
use crate::ClientError;
use futures_core::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

pub const DEFAULT_BASE_URL: &str = "https://qianfan.baidubce.com/v2/";

/// Qianfan v2 chat completions over HTTPS.
///
/// The v2 API is OpenAI-compatible: bearer auth plus an optional `appid`
/// header scoping the call to an application.
#[derive(Debug, Clone)]
pub struct QianfanProvider {
    http: reqwest::Client,
    endpoint: Url,
    headers: HeaderMap,
    request_timeout: Duration,
}

impl QianfanProvider {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        bearer_token: &str,
        app_id: Option<&str>,
        request_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let endpoint = build_url(base_url)?;
        let headers = build_headers(bearer_token, app_id)?;
        Ok(Self {
            http,
            endpoint,
            headers,
            request_timeout,
        })
    }
}

fn build_url(base_url: &str) -> Result<Url, ClientError> {
    // Url::join drops the last path segment unless the base ends with '/'.
    let base = if base_url.ends_with('/') {
        base_url.to_string()
    } else {
        format!("{base_url}/")
    };
    Url::parse(&base)
        .and_then(|u| u.join("chat/completions"))
        .map_err(|e| ClientError::invalid(format!("bad base_url {base_url:?}: {e}")))
}

fn build_headers(bearer_token: &str, app_id: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let auth = HeaderValue::from_str(&format!("Bearer {bearer_token}"))
        .map_err(|e| ClientError::invalid(format!("bearer token is not a valid header value: {e}")))?;
    h.insert(AUTHORIZATION, auth);
    if let Some(app_id) = app_id.filter(|s| !s.is_empty()) {
        let v = HeaderValue::from_str(app_id)
            .map_err(|e| ClientError::invalid(format!("app_id is not a valid header value: {e}")))?;
        h.insert(HeaderName::from_static("appid"), v);
    }
    Ok(h)
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Http {
        status: status.as_u16(),
        body,
    })
}

impl Provider for QianfanProvider {
    fn name(&self) -> &'static str {
        "qianfan"
    }

    fn complete(&self, req: ChatRequest) -> BoxFuture<'static, Result<CompletionResponse, ClientError>> {
        let this = self.clone();

        Box::pin(async move {
            let resp = this
                .http
                .post(this.endpoint.clone())
                .headers(this.headers.clone())
                .timeout(this.request_timeout)
                .json(&req)
                .send()
                .await?;
            let resp = check_status(resp).await?;
            let body = resp.bytes().await?;
            let mut parsed = serde_json::from_slice::<CompletionResponse>(&body)?;
            match parsed.error.take() {
                Some(e) => Err(e.into()),
                None => Ok(parsed),
            }
        })
    }

    fn stream_chat(&self, req: ChatRequest) -> BoxFuture<'static, Result<ChunkStream, ClientError>> {
        let this = self.clone();

        Box::pin(async move {
            let resp = this
                .http
                .post(this.endpoint.clone())
                .headers(this.headers.clone())
                .header(ACCEPT, "text/event-stream")
                .json(&req)
                .send()
                .await?;
            let resp = check_status(resp).await?;

            let (tx, rx) = mpsc::channel::<Result<CompletionChunk, ClientError>>(64);

            tokio::spawn(async move {
                let mut stream = resp.bytes_stream();
                let mut parser = SseParser::new();

                while let Some(item) = stream.next().await {
                    let bytes = match item {
                        Ok(b) => b,
                        Err(e) => {
                            let _ = tx.send(Err(ClientError::from(e))).await;
                            return;
                        }
                    };

                    for ev in parser.push(&bytes) {
                        if !forward(&tx, ev).await {
                            return;
                        }
                    }
                }

                if let Some(ev) = parser.finish() {
                    forward(&tx, Ok(ev)).await;
                }
            });

            let out = ReceiverStream::new(rx);
            Ok(Box::pin(out) as ChunkStream)
        })
    }
}

/// Decode one SSE event and pass it on. Returns false once the stream is
/// over: `[DONE]`, a failure (including an `error` event), or a receiver
/// that went away.
async fn forward(
    tx: &mpsc::Sender<Result<CompletionChunk, ClientError>>,
    ev: Result<SseEvent, ClientError>,
) -> bool {
    match ev {
        Ok(SseEvent::Done) => false,
        Ok(SseEvent::Data(data)) => {
            if data.trim().is_empty() {
                return true;
            }
            match serde_json::from_str::<CompletionChunk>(&data) {
                Ok(CompletionChunk { error: Some(e), .. }) => {
                    let _ = tx.send(Err(e.into())).await;
                    false
                }
                Ok(chunk) => tx.send(Ok(chunk)).await.is_ok(),
                Err(e) => {
                    let _ = tx.send(Err(ClientError::from(e))).await;
                    false
                }
            }
        }
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}
