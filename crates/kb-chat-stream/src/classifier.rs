//! Pure mapping from raw frames to typed events.
//!
//! Malformed payloads never fail a frame: undecodable JSON is replaced with
//! an empty object and the event degrades to its default content.

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{DEFAULT_STREAM_ERROR, error_text};
use crate::event::{EventKind, NodeResponse, QuoteItem, StreamEvent};
use crate::transport::SseFrame;

/// `statusText` the backend uses when the account is out of AI points.
pub const BALANCE_EXHAUSTED_STATUS: &str = "aiPointsNotEnough";

/// One retrieved document attached to an `answer` frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceDocument {
    pub file_name: String,
    pub content: String,
    pub retrieval_query: String,
    /// Base64-encoded PNG, when the excerpt came from an image.
    pub image: Option<String>,
}

impl SourceDocument {
    /// Reads a document field by field. A null or mistyped field degrades to
    /// empty without affecting the others.
    pub fn from_value(doc: &Value) -> Self {
        Self {
            file_name: text_field(doc, "file_name"),
            content: text_field(doc, "content"),
            retrieval_query: text_field(doc, "retrieval_query"),
            image: doc
                .get("image")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        }
    }

    pub fn quote(&self) -> QuoteItem {
        QuoteItem {
            source_name: self.file_name.clone(),
            a: self.content.clone(),
            q: self.retrieval_query.clone(),
            extra: Map::new(),
        }
    }

    /// HTML fragment embedding the inline image, if any.
    pub fn image_fragment(&self) -> Option<String> {
        self.image
            .as_deref()
            .filter(|image| !image.is_empty())
            .map(|image| format!("<img src=\"data:image/png;base64,{image}\" />"))
    }
}

/// Everything one frame contributes to a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classified {
    /// Events in wire order; an `answer` frame fans out into one per fragment.
    pub events: Vec<StreamEvent>,
    /// Retrieval sources carried by an `answer` frame.
    pub sources: Vec<SourceDocument>,
}

impl Classified {
    fn event(event: StreamEvent) -> Self {
        Self {
            events: vec![event],
            sources: Vec::new(),
        }
    }
}

/// Classifies one frame.
pub fn classify(frame: &SseFrame) -> Classified {
    if frame.is_done() {
        return Classified::default();
    }
    let Some(kind) = EventKind::from_wire(frame.event.as_deref()) else {
        debug!(event = ?frame.event, "ignoring unknown stream event");
        return Classified::default();
    };
    let payload = parse_payload(kind, &frame.data);

    match kind {
        EventKind::Answer => classify_answer(&payload),
        EventKind::FastAnswer => {
            let text = payload
                .pointer("/choices/0/delta/content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Classified::event(StreamEvent::FastAnswer { text })
        }
        EventKind::ToolCall => Classified::event(StreamEvent::ToolCall { payload }),
        EventKind::ToolParams => Classified::event(StreamEvent::ToolParams { payload }),
        EventKind::ToolResponse => Classified::event(StreamEvent::ToolResponse { payload }),
        EventKind::FlowNodeStatus => Classified::event(StreamEvent::FlowNodeStatus { payload }),
        EventKind::FlowResponses => match payload {
            Value::Array(items) => Classified::event(StreamEvent::FlowResponses {
                list: items.into_iter().map(NodeResponse::from_value).collect(),
            }),
            _ => {
                debug!("ignoring flowResponses payload that is not a list");
                Classified::default()
            }
        },
        EventKind::UpdateVariables => Classified::event(StreamEvent::UpdateVariables { payload }),
        EventKind::Error => {
            let message = error_text(&payload, DEFAULT_STREAM_ERROR);
            let status_text = payload
                .get("statusText")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned);
            Classified::event(StreamEvent::Error {
                message,
                status_text,
                payload,
            })
        }
    }
}

fn parse_payload(kind: EventKind, data: &str) -> Value {
    match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            debug!(%kind, error = %e, "malformed stream payload; using empty object");
            Value::Object(Map::new())
        }
    }
}

fn classify_answer(payload: &Value) -> Classified {
    let events = match payload.get("response") {
        Some(Value::Array(fragments)) => fragments
            .iter()
            .filter_map(Value::as_str)
            .map(|text| StreamEvent::Answer {
                text: text.to_string(),
            })
            .collect(),
        Some(Value::String(text)) => vec![StreamEvent::Answer { text: text.clone() }],
        _ => Vec::new(),
    };
    let sources = payload
        .get("source_documents")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .map(SourceDocument::from_value)
                .collect()
        })
        .unwrap_or_default();
    Classified { events, sources }
}

/// Strings as-is, numbers and booleans in their JSON form, anything else empty.
fn text_field(doc: &Value, key: &str) -> String {
    match doc.get(key) {
        Some(Value::String(text)) => text.clone(),
        Some(value @ (Value::Number(_) | Value::Bool(_))) => value.to_string(),
        _ => String::new(),
    }
}

impl StreamEvent {
    /// True for an `error` event reporting an exhausted AI-points balance.
    pub fn is_balance_exhausted(&self) -> bool {
        matches!(
            self,
            StreamEvent::Error { status_text: Some(status), .. } if status == BALANCE_EXHAUSTED_STATUS
        )
    }
}
