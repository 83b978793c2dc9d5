use crate::event::NodeResponse;

/// Success half of a session result.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatOutput {
    /// Answer text in delivery order.
    pub text: String,
    /// Structured per-node response data (retrieval quotes, workflow output).
    pub data: Vec<NodeResponse>,
}

impl ChatOutput {
    /// Quotes from every node response, in order.
    pub fn quotes(&self) -> impl Iterator<Item = &crate::event::QuoteItem> {
        self.data.iter().flat_map(|node| node.quote_list.iter())
    }
}
