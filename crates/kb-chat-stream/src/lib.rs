//! Streaming consumer for knowledge-base chat backends.
//!
//! A [`ChatClient`] posts a question, reads the server-sent event stream
//! that comes back, classifies each frame, paces answer fragments out to a
//! caller callback and resolves with the accumulated answer plus any
//! retrieval metadata.
//!
//! # Usage
//!
//! ```no_run
//! use kb_chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let client = ChatClient::from_env()?;
//!
//! let output = client
//!     .chat(ChatRequest::new("user-1", ["kb-handbook"], "How do I file expenses?"))
//!     .on_event(|event| {
//!         if let Some(text) = event.answer_text() {
//!             print!("{text}");
//!         }
//!     })
//!     .run()
//!     .await?;
//!
//! for quote in output.quotes() {
//!     println!("\n[{}]", quote.source_name);
//! }
//! # Ok(())
//! # }
//! ```

/// Response-state merge rules.
pub mod aggregator;
/// Frame classification into typed events.
pub mod classifier;
/// Client entry point, run builder and cancellation handle.
pub mod client;
/// Client configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Typed stream events and structured response data.
pub mod event;
/// Host notification hooks.
pub mod notify;
/// Process-wide logging setup.
pub mod observability;
/// Final run output.
pub mod output;
/// Delivery pacing.
pub mod pacer;
/// Common imports for typical usage.
pub mod prelude;
/// Outbound request body.
pub mod request;
/// Session life-cycle controller.
pub mod session;
/// Event-stream transport.
pub mod transport;

pub use aggregator::{Aggregator, ResponseState};
pub use classifier::{Classified, SourceDocument, classify};
pub use client::{AbortHandle, ChatClient, ChatClientBuilder, ChatRun};
pub use config::ChatClientConfig;
pub use errors::{ChatError, ChatFailure, FailureKind, TransportError};
pub use event::{Delivery, EventKind, NodeResponse, QuoteItem, StreamEvent};
pub use notify::{BalanceNotifier, NoopBalanceNotifier};
pub use output::ChatOutput;
pub use pacer::{IntervalTicker, Pacer, Ticker};
pub use request::ChatRequest;
pub use session::{SessionResult, SessionState};
pub use transport::{ChatTransport, FrameStreamHandle, HttpTransport, SseFrame, TransportRequest};
