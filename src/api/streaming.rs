//! Streaming relay for upstream responses.
//!
//! The upstream body is modeled as a lazy sequence of byte chunks that
//! are forwarded to the client without reassembly: server-sent events for
//! OpenAI-style upstreams, newline-delimited JSON for Ollama-style ones.
//! On a mid-stream upstream error one final error frame is emitted and
//! the stream closes. The provider lease travels inside the stream, so a
//! client disconnect releases the lock via the lease drop.

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use futures::stream::Stream;
use serde_json::json;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::services::chooser::ProviderLease;

type ByteResult = std::result::Result<Bytes, std::io::Error>;

/// Stream adapter that forwards chunks verbatim, appends one error frame
/// when the upstream read fails and carries the provider lease until the
/// stream is dropped.
struct RelayStream {
    inner: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>,
    ndjson: bool,
    finished: bool,
    // Released on drop, covering client disconnects.
    _lease: Option<ProviderLease>,
}

impl Stream for RelayStream {
    type Item = ByteResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.inner.as_mut().poll_next(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(err))) => {
                self.finished = true;
                tracing::warn!(error = %err, "upstream stream failed mid-flight");
                Poll::Ready(Some(Ok(error_frame(&err.to_string(), self.ndjson))))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

/// Final frame emitted when the upstream dies mid-stream.
fn error_frame(message: &str, ndjson: bool) -> Bytes {
    let body = json!({ "error": message });
    if ndjson {
        Bytes::from(format!("{}\n", body))
    } else {
        Bytes::from(format!("data: {}\n\n", body))
    }
}

/// Build the chunked client response for an upstream stream.
///
/// `ndjson` selects the Ollama dialect (newline-delimited JSON) over
/// server-sent events.
pub fn relay_stream(
    upstream: reqwest::Response,
    ndjson: bool,
    lease: Option<ProviderLease>,
) -> Response {
    let status = upstream.status();
    let stream = RelayStream {
        inner: Box::pin(upstream.bytes_stream()),
        ndjson,
        finished: false,
        _lease: lease,
    };

    let content_type = if ndjson {
        "application/x-ndjson"
    } else {
        "text/event-stream"
    };

    Response::builder()
        .status(status.as_u16())
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .expect("static response parts are valid")
}
