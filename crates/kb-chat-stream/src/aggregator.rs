use tracing::debug;

use crate::classifier::SourceDocument;
use crate::event::{NodeResponse, QuoteItem, StreamEvent};
use crate::output::ChatOutput;

/// Mutable response state owned by one in-flight session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseState {
    /// Append-only answer text, in delivery order.
    pub text: String,
    /// Latest structured response data.
    pub data: Vec<NodeResponse>,
    /// Image fragments collected from retrieval sources.
    pub images: Vec<String>,
}

/// Applies per-kind merge rules to a [`ResponseState`].
#[derive(Debug, Default)]
pub struct Aggregator {
    state: ResponseState,
    quotes: Vec<QuoteItem>,
    retrieval_node_id: Option<String>,
    error: Option<String>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event that was just handed to the caller.
    ///
    /// Only answer kinds change state: their text is appended.
    pub fn apply_delivered(&mut self, event: &StreamEvent) {
        if let Some(text) = event.answer_text() {
            self.state.text.push_str(text);
        }
    }

    /// Applies an event the caller never sees (`flowResponses`, `error`).
    pub fn absorb(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::FlowResponses { list } => {
                debug!(nodes = list.len(), "replacing response data");
                self.state.data = list;
            }
            StreamEvent::Error { message, .. } => self.record_error(message),
            other => self.apply_delivered(&other),
        }
    }

    /// Merges retrieval sources from an `answer` frame.
    ///
    /// The data is replaced by a single retrieval-module response holding
    /// every quote and image seen so far. Its node id is fixed on first use.
    pub fn merge_sources(&mut self, sources: &[SourceDocument]) {
        if sources.is_empty() {
            return;
        }
        self.quotes.extend(sources.iter().map(SourceDocument::quote));
        self.state
            .images
            .extend(sources.iter().filter_map(SourceDocument::image_fragment));
        let node_id = self
            .retrieval_node_id
            .get_or_insert_with(|| chrono::Utc::now().timestamp_millis().to_string())
            .clone();
        self.state.data = vec![NodeResponse::dataset_search(
            node_id,
            self.state.images.clone(),
            self.quotes.clone(),
        )];
    }

    /// Records a stream error. The latest message wins.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn state(&self) -> &ResponseState {
        &self.state
    }

    pub fn text(&self) -> &str {
        &self.state.text
    }

    /// Freezes the state into the caller-facing output.
    pub fn into_output(self) -> ChatOutput {
        ChatOutput {
            text: self.state.text,
            data: self.state.data,
        }
    }
}
