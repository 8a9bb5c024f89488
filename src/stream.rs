use crate::cancel::Cancellation;
use crate::provider::{ChatRequest, Provider};
use crate::ClientError;
use futures_core::Stream;
use serde::Serialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// One item of a streaming reply.
///
/// A stream yields zero or more `Data` fragments and then either ends or
/// yields a single `Error` and ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "lowercase")]
pub enum StreamFragment {
    Data(String),
    Error(String),
}

impl StreamFragment {
    /// Text carried by the fragment; empty for errors.
    pub fn content(&self) -> &str {
        match self {
            Self::Data(s) => s,
            Self::Error(_) => "",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Data(_) => None,
            Self::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Single-pass sequence of fragments for one streaming request.
///
/// Not restartable: a new request is needed to read the reply again.
/// Dropping it stops the producer and closes the transport.
pub struct FragmentStream {
    inner: ReceiverStream<StreamFragment>,
}

impl std::fmt::Debug for FragmentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentStream").finish_non_exhaustive()
    }
}

impl Stream for FragmentStream {
    type Item = StreamFragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl FragmentStream {
    /// Drain the stream, concatenating data. Stops at the first error.
    pub async fn collect_text(mut self) -> Result<String, String> {
        let mut out = String::new();
        while let Some(frag) = self.next().await {
            match frag {
                StreamFragment::Data(s) => out.push_str(&s),
                StreamFragment::Error(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Open `req` on `provider` and relay fragments. Never retries.
    pub(crate) fn spawn(provider: &dyn Provider, req: ChatRequest, cancel: Cancellation) -> Self {
        let (tx, rx) = mpsc::channel::<StreamFragment>(64);
        let open = provider.stream_chat(req);

        tokio::spawn(async move {
            if let Err(e) = relay(open, &tx, &cancel).await {
                tracing::warn!(error = %e, "streaming chat failed");
                let _ = tx.send(StreamFragment::Error(e.to_string())).await;
            }
        });

        Self {
            inner: ReceiverStream::new(rx),
        }
    }
}

/// Forward non-empty deltas until the source ends. A closed receiver ends
/// quietly; any transport failure or cancellation is returned.
async fn relay(
    open: futures_core::future::BoxFuture<'static, Result<crate::provider::ChunkStream, ClientError>>,
    tx: &mpsc::Sender<StreamFragment>,
    cancel: &Cancellation,
) -> Result<(), ClientError> {
    if let Some(e) = cancel.check() {
        return Err(e);
    }

    let mut chunks = tokio::select! {
        r = open => r?,
        e = cancel.fired() => return Err(e),
        _ = tx.closed() => return Ok(()),
    };

    loop {
        let item = tokio::select! {
            item = chunks.next() => item,
            e = cancel.fired() => return Err(e),
            _ = tx.closed() => return Ok(()),
        };
        let Some(item) = item else {
            return Ok(());
        };
        let chunk = item?;
        if let Some(text) = chunk.delta_text() {
            if tx.send(StreamFragment::Data(text.to_string())).await.is_err() {
                return Ok(());
            }
        }
    }
}
