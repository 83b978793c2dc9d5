//! Common imports for typical client usage.
pub use crate::{
    AbortHandle, BalanceNotifier, ChatClient, ChatClientBuilder, ChatClientConfig, ChatError,
    ChatFailure, ChatOutput, ChatRequest, ChatRun, EventKind, FailureKind, NodeResponse,
    QuoteItem, StreamEvent, Ticker,
};
