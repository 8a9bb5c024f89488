use super::types::{ChatRequest, ChunkStream, CompletionChunk, CompletionResponse, Provider, Role};
use crate::ClientError;
use futures_core::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;

/// One scripted streaming step.
#[derive(Debug, Clone)]
pub enum StreamStep {
    Chunk(CompletionChunk),
    Fail(ClientError),
}

#[derive(Debug, Clone)]
enum Mode {
    Echo { delay: Duration },
    Scripted,
}

#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Result<CompletionResponse, ClientError>>,
    streams: VecDeque<Result<Vec<StreamStep>, ClientError>>,
    calls: Vec<Instant>,
    requests: Vec<ChatRequest>,
}

/// Offline provider.
///
/// `echo` answers with the last user message; `scripted` replays queued
/// replies and records every call so attempt counts and spacing can be
/// checked.
#[derive(Debug, Clone)]
pub struct StubProvider {
    mode: Mode,
    script: Arc<Mutex<Script>>,
}

impl Default for StubProvider {
    fn default() -> Self {
        Self::echo()
    }
}

impl StubProvider {
    pub fn echo() -> Self {
        Self {
            mode: Mode::Echo {
                delay: Duration::from_millis(120),
            },
            script: Arc::default(),
        }
    }

    pub fn scripted() -> Self {
        Self {
            mode: Mode::Scripted,
            script: Arc::default(),
        }
    }

    /// Queue a non-streaming reply.
    pub fn reply(self, r: Result<CompletionResponse, ClientError>) -> Self {
        self.lock().replies.push_back(r);
        self
    }

    pub fn reply_text(self, text: &str) -> Self {
        self.reply(Ok(CompletionResponse::text(text)))
    }

    pub fn fail(self, e: ClientError) -> Self {
        self.reply(Err(e))
    }

    /// Queue a streaming reply: either the steps to play or an error
    /// raised before the stream opens.
    pub fn stream(self, r: Result<Vec<StreamStep>, ClientError>) -> Self {
        self.lock().streams.push_back(r);
        self
    }

    pub fn calls(&self) -> usize {
        self.lock().calls.len()
    }

    /// Instants at which each call was issued, on tokio's clock.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.lock().calls.clone()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        // A panic while holding the lock only happens in a failing test.
        self.script.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, req: &ChatRequest) {
        let mut s = self.lock();
        s.calls.push(Instant::now());
        s.requests.push(req.clone());
    }
}

fn last_user_text(req: &ChatRequest) -> String {
    req.messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn complete(&self, req: ChatRequest) -> BoxFuture<'static, Result<CompletionResponse, ClientError>> {
        self.record(&req);
        let reply = match self.mode {
            Mode::Echo { .. } => {
                let mut r = CompletionResponse::text(format!("You said: {}", last_user_text(&req)));
                r.model = Some(req.model.clone());
                Ok(r)
            }
            Mode::Scripted => self
                .lock()
                .replies
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Network("stub script exhausted".into()))),
        };
        Box::pin(async move { reply })
    }

    fn stream_chat(&self, req: ChatRequest) -> BoxFuture<'static, Result<ChunkStream, ClientError>> {
        self.record(&req);
        let (steps, delay) = match self.mode {
            Mode::Echo { delay } => {
                let text = format!("You said: {}", last_user_text(&req));
                let steps = text
                    .split_inclusive(' ')
                    .map(|w| StreamStep::Chunk(CompletionChunk::text(w)))
                    .collect::<Vec<_>>();
                (Ok(steps), delay)
            }
            Mode::Scripted => (
                self.lock()
                    .streams
                    .pop_front()
                    .unwrap_or_else(|| Err(ClientError::Network("stub script exhausted".into()))),
                Duration::ZERO,
            ),
        };

        Box::pin(async move {
            let steps = steps?;
            let (tx, rx) = mpsc::channel::<Result<CompletionChunk, ClientError>>(32);

            tokio::spawn(async move {
                for step in steps {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let (item, last) = match step {
                        StreamStep::Chunk(c) => (Ok(c), false),
                        StreamStep::Fail(e) => (Err(e), true),
                    };
                    if tx.send(item).await.is_err() || last {
                        break;
                    }
                }
            });

            Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
        })
    }
}
