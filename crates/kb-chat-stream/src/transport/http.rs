use futures::StreamExt as _;
use futures::stream;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use super::sse::{decode_all, frame_stream};
use super::{
    ByteStream, ChatTransport, EVENT_STREAM_CONTENT_TYPE, FrameStreamHandle, ResponseMeta,
    STREAM_ERROR_SENTINEL, TransportRequest,
};
use crate::config::ChatClientConfig;
use crate::errors::{ChatError, DEFAULT_SERVER_ERROR, TransportError, error_text, non_empty_or};

/// reqwest-backed transport that POSTs JSON and reads an event stream.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Builds a transport from client configuration.
    ///
    /// No overall request timeout is set: streams may legitimately run for
    /// minutes. The connect timeout is enforced by the session.
    pub fn new(config: &ChatClientConfig) -> Result<Self, ChatError> {
        let mut builder = reqwest::Client::builder();
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub(crate) fn resolve_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: TransportRequest) -> Result<FrameStreamHandle, TransportError> {
        let url = self.resolve_url(&request.endpoint);
        debug!(url = %url, "posting chat request");

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    TransportError::fatal(format!("invalid chat request: {e}"))
                } else {
                    TransportError::io(format!("chat request failed: {e}"))
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let metadata = ResponseMeta {
            status: status.as_u16(),
            content_type: content_type.clone(),
        };

        if content_type.starts_with("text/plain") {
            let text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat backend answered with plain text");
            return Err(TransportError::rejected(
                Some(status.as_u16()),
                non_empty_or(&text, DEFAULT_SERVER_ERROR),
            ));
        }

        if status != StatusCode::OK || !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
            let text = response.text().await.unwrap_or_default();
            return reject_or_replay(status, text, metadata);
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| TransportError::io(format!("event stream read failed: {e}")))
        }));
        Ok(FrameStreamHandle {
            frames: frame_stream(bytes_stream),
            metadata,
        })
    }
}

/// Handles a response that is not a healthy event stream.
///
/// A JSON body is turned into a rejection carrying its message. A body that
/// starts with `event: error` is an event stream sent with the wrong head, so
/// its frames are replayed and the `error` event inside finalizes the session.
// TODO: drop the replay once the backend sends `text/event-stream` with its
// error events.
fn reject_or_replay(
    status: StatusCode,
    text: String,
    metadata: ResponseMeta,
) -> Result<FrameStreamHandle, TransportError> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
        let message = error_text(&value, DEFAULT_SERVER_ERROR);
        warn!(status = status.as_u16(), message = %message, "chat stream rejected");
        return Err(TransportError::rejected(Some(status.as_u16()), message));
    }
    if text.starts_with(STREAM_ERROR_SENTINEL) {
        warn!(
            status = status.as_u16(),
            "error body is an event stream; replaying its frames"
        );
        let frames = decode_all(&text);
        return Ok(FrameStreamHandle {
            frames: Box::pin(stream::iter(frames.into_iter().map(Ok))),
            metadata,
        });
    }
    warn!(status = status.as_u16(), content_type = %metadata.content_type, "chat stream rejected without a readable body");
    Err(TransportError::rejected(
        Some(status.as_u16()),
        DEFAULT_SERVER_ERROR,
    ))
}
