use std::fmt;

use serde_json::Value;

/// Module type reported for synthesized retrieval responses.
pub const DATASET_SEARCH_MODULE_TYPE: &str = "datasetSearchNode";

/// Module name reported for synthesized retrieval responses.
pub const DATASET_SEARCH_MODULE_NAME: &str = "Knowledge base search";

/// Wire name of each event kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    FastAnswer,
    Answer,
    ToolCall,
    ToolParams,
    ToolResponse,
    FlowNodeStatus,
    FlowResponses,
    UpdateVariables,
    Error,
}

impl EventKind {
    /// Resolves an `event:` field. A missing or empty name means `answer`.
    pub fn from_wire(name: Option<&str>) -> Option<Self> {
        match name.map(str::trim).unwrap_or_default() {
            "" | "answer" => Some(Self::Answer),
            "fastAnswer" => Some(Self::FastAnswer),
            "toolCall" => Some(Self::ToolCall),
            "toolParams" => Some(Self::ToolParams),
            "toolResponse" => Some(Self::ToolResponse),
            "flowNodeStatus" => Some(Self::FlowNodeStatus),
            "flowResponses" => Some(Self::FlowResponses),
            "updateVariables" => Some(Self::UpdateVariables),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Returns the wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastAnswer => "fastAnswer",
            Self::Answer => "answer",
            Self::ToolCall => "toolCall",
            Self::ToolParams => "toolParams",
            Self::ToolResponse => "toolResponse",
            Self::FlowNodeStatus => "flowNodeStatus",
            Self::FlowResponses => "flowResponses",
            Self::UpdateVariables => "updateVariables",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an event reaches the caller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    /// Buffered and released by the pacer.
    Paced,
    /// Handed to the caller as soon as it is classified.
    Immediate,
    /// Consumed by the aggregator; never shown to the caller callback.
    Absorbed,
}

/// One typed event decoded from a stream frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Incremental text from a chat-completions style delta.
    FastAnswer { text: String },
    /// One answer fragment.
    Answer { text: String },
    ToolCall { payload: Value },
    ToolParams { payload: Value },
    ToolResponse { payload: Value },
    /// Workflow node progress; UI state rather than content.
    FlowNodeStatus { payload: Value },
    /// Full replacement for the structured response data.
    FlowResponses { list: Vec<NodeResponse> },
    /// Variables the backend wants the caller to store.
    UpdateVariables { payload: Value },
    /// Backend-reported failure.
    Error {
        message: String,
        status_text: Option<String>,
        payload: Value,
    },
}

impl StreamEvent {
    /// Returns the kind tag of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::FastAnswer { .. } => EventKind::FastAnswer,
            Self::Answer { .. } => EventKind::Answer,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::ToolParams { .. } => EventKind::ToolParams,
            Self::ToolResponse { .. } => EventKind::ToolResponse,
            Self::FlowNodeStatus { .. } => EventKind::FlowNodeStatus,
            Self::FlowResponses { .. } => EventKind::FlowResponses,
            Self::UpdateVariables { .. } => EventKind::UpdateVariables,
            Self::Error { .. } => EventKind::Error,
        }
    }

    /// Text contributed to the accumulated answer, if any.
    pub fn answer_text(&self) -> Option<&str> {
        match self {
            Self::FastAnswer { text } | Self::Answer { text } => Some(text),
            _ => None,
        }
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            Self::FastAnswer { .. }
            | Self::Answer { .. }
            | Self::ToolCall { .. }
            | Self::ToolParams { .. }
            | Self::ToolResponse { .. } => Delivery::Paced,
            Self::FlowNodeStatus { .. } | Self::UpdateVariables { .. } => Delivery::Immediate,
            Self::FlowResponses { .. } | Self::Error { .. } => Delivery::Absorbed,
        }
    }
}

/// One quoted source document shown alongside an answer.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QuoteItem {
    #[serde(rename = "sourceName", default)]
    pub source_name: String,
    /// Excerpt content.
    #[serde(default)]
    pub a: String,
    /// Query that retrieved the excerpt.
    #[serde(default)]
    pub q: String,
    /// Backend fields such as `id`, `collectionId` or `score`, kept as sent.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Structured per-node response data attached to a chat answer.
///
/// Fields this crate does not interpret are kept in `extra` so responses
/// received through `flowResponses` round-trip unchanged.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeResponse {
    pub node_id: String,
    pub module_name: String,
    pub module_type: String,
    pub image_list: Vec<String>,
    pub quote_list: Vec<QuoteItem>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NodeResponse {
    /// Builds the retrieval-module response synthesized from source documents.
    pub fn dataset_search(
        node_id: impl Into<String>,
        image_list: Vec<String>,
        quote_list: Vec<QuoteItem>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            module_name: DATASET_SEARCH_MODULE_NAME.to_string(),
            module_type: DATASET_SEARCH_MODULE_TYPE.to_string(),
            image_list,
            quote_list,
            extra: serde_json::Map::new(),
        }
    }

    /// Decodes one `flowResponses` element, keeping malformed entries as
    /// opaque extra fields instead of dropping them.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<NodeResponse>(value.clone()) {
            Ok(response) => response,
            Err(_) => {
                let mut extra = serde_json::Map::new();
                match value {
                    Value::Object(map) => extra = map,
                    other => {
                        extra.insert("value".to_string(), other);
                    }
                }
                Self {
                    extra,
                    ..Self::default()
                }
            }
        }
    }
}
