//! Transport session: opens the event stream and surfaces its lifecycle.
//!
//! [`ChatTransport`] is the seam between the session controller and the
//! network. [`HttpTransport`] is the reqwest implementation; tests plug in
//! fakes that yield frames from memory.
mod http;
mod sse;

use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::debug;

pub use http::HttpTransport;
pub use sse::{DONE_SENTINEL, SseDecoder, SseFrame, decode_all};

use crate::errors::TransportError;

/// Content type the backend must answer with.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Body prefix that marks an error response which is itself an event stream.
pub const STREAM_ERROR_SENTINEL: &str = "event: error";

pub(crate) type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Stream of decoded frames; ends after the first error.
pub type FrameStream =
    Pin<Box<dyn futures::Stream<Item = Result<SseFrame, TransportError>> + Send + 'static>>;

/// One outbound streaming request.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// Endpoint path or absolute URL.
    pub endpoint: String,
    /// JSON request body.
    pub body: serde_json::Value,
}

/// Response details captured when the stream opened.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    pub content_type: String,
}

/// Opened stream returned by a transport.
pub struct FrameStreamHandle {
    pub frames: FrameStream,
    pub metadata: ResponseMeta,
}

/// Opens event streams against a chat backend.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and validates the response head.
    ///
    /// Open-time rejections (bad status, wrong content type) are returned as
    /// [`TransportError::Rejected`].
    async fn open(&self, request: TransportRequest) -> Result<FrameStreamHandle, TransportError>;
}

/// Lifecycle signal produced while a session is streaming.
#[derive(Debug)]
pub enum TransportSignal {
    /// A raw frame, forwarded unmodified.
    Frame(SseFrame),
    /// The backend closed the stream.
    Closed,
    /// Mid-stream failure.
    Failed(TransportError),
    /// The caller aborted; no further frames are read.
    Aborted,
}

/// Owns one stream connection together with its connect timeout and abort
/// signal.
pub(crate) struct TransportSession<'a> {
    transport: &'a dyn ChatTransport,
    connect_timeout: Duration,
    abort_rx: watch::Receiver<bool>,
    frames: Option<FrameStream>,
}

impl<'a> TransportSession<'a> {
    pub(crate) fn new(
        transport: &'a dyn ChatTransport,
        connect_timeout: Duration,
        abort_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            connect_timeout,
            abort_rx,
            frames: None,
        }
    }

    /// Opens the stream. Returns `Ok(None)` when the caller aborted first.
    ///
    /// The connect timer only covers the open; it is dropped as soon as the
    /// response head arrives or the open fails.
    pub(crate) async fn open(
        &mut self,
        request: TransportRequest,
    ) -> Result<Option<ResponseMeta>, TransportError> {
        let timeout = self.connect_timeout;
        let open = tokio::time::timeout(timeout, self.transport.open(request));
        tokio::select! {
            biased;
            _ = wait_for_abort(&mut self.abort_rx) => Ok(None),
            result = open => match result {
                Ok(Ok(handle)) => {
                    debug!(status = handle.metadata.status, content_type = %handle.metadata.content_type, "event stream opened");
                    self.frames = Some(handle.frames);
                    Ok(Some(handle.metadata))
                }
                Ok(Err(err)) => Err(err),
                Err(_) => Err(TransportError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                }),
            },
        }
    }

    /// Waits for the next frame or terminal condition.
    ///
    /// Cancel-safe: dropping the returned future never loses a frame.
    pub(crate) async fn next_signal(&mut self) -> TransportSignal {
        let Some(frames) = self.frames.as_mut() else {
            return TransportSignal::Closed;
        };
        let signal = tokio::select! {
            biased;
            _ = wait_for_abort(&mut self.abort_rx) => TransportSignal::Aborted,
            next = frames.next() => match next {
                Some(Ok(frame)) => TransportSignal::Frame(frame),
                Some(Err(err)) => TransportSignal::Failed(err),
                None => TransportSignal::Closed,
            },
        };
        if !matches!(signal, TransportSignal::Frame(_)) {
            self.frames = None;
        }
        signal
    }

    /// Resolves once the caller requests cancellation.
    pub(crate) async fn aborted(&mut self) {
        wait_for_abort(&mut self.abort_rx).await;
    }
}

/// Resolves once the abort flag is set. Never resolves if every handle was
/// dropped without aborting.
pub(crate) async fn wait_for_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
