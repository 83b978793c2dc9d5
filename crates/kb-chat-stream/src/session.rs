//! Session controller: drives one request/response life-cycle.
//!
//! ```text
//! Connecting --open--> Streaming --close--> Draining --empty--> Finalized
//!      |                   |  \--abort--> flush --------------------^
//!      \--timeout/reject---+----transport error--------------------^
//! ```
//!
//! Everything runs on the caller's task: frames, ticks and the abort signal
//! are multiplexed with `select!`, so the response state needs no locking.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::classifier::classify;
use crate::errors::{ChatFailure, FailureKind, TransportError};
use crate::event::{Delivery, StreamEvent};
use crate::notify::BalanceNotifier;
use crate::output::ChatOutput;
use crate::pacer::{Pacer, Ticker, deliver};
use crate::transport::{ChatTransport, SseFrame, TransportRequest, TransportSession, TransportSignal};

/// Life-cycle state of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Draining,
    Finalized,
}

/// Result of one session.
pub type SessionResult = Result<ChatOutput, ChatFailure>;

pub(crate) struct ChatSession<'a> {
    id: uuid::Uuid,
    state: SessionState,
    transport: TransportSession<'a>,
    notifier: &'a dyn BalanceNotifier,
    ticker: Box<dyn Ticker + 'a>,
    on_event: Box<dyn FnMut(&StreamEvent) + Send + 'a>,
    pacer: Pacer,
    aggregator: Aggregator,
}

impl<'a> ChatSession<'a> {
    pub(crate) fn new(
        transport: &'a dyn ChatTransport,
        connect_timeout: Duration,
        abort_rx: tokio::sync::watch::Receiver<bool>,
        notifier: &'a dyn BalanceNotifier,
        ticker: Box<dyn Ticker + 'a>,
        on_event: Box<dyn FnMut(&StreamEvent) + Send + 'a>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            state: SessionState::Connecting,
            transport: TransportSession::new(transport, connect_timeout, abort_rx),
            notifier,
            ticker,
            on_event,
            pacer: Pacer::new(),
            aggregator: Aggregator::new(),
        }
    }

    /// Runs the session to completion. Consumes the session, so the result
    /// is produced exactly once and no callback fires afterwards.
    pub(crate) async fn run(mut self, request: TransportRequest) -> SessionResult {
        debug!(session_id = %self.id, endpoint = %request.endpoint, "connecting chat stream");
        match self.transport.open(request).await {
            Ok(Some(_)) => self.transition(SessionState::Streaming),
            Ok(None) => return self.finish_aborted(),
            Err(err) => return self.fail(err),
        }

        loop {
            match self.state {
                SessionState::Streaming => {
                    tokio::select! {
                        signal = self.transport.next_signal() => match signal {
                            TransportSignal::Frame(frame) => self.on_frame(&frame),
                            TransportSignal::Closed => self.transition(SessionState::Draining),
                            TransportSignal::Failed(err) => return self.fail(err),
                            TransportSignal::Aborted => return self.finish_aborted(),
                        },
                        _ = self.ticker.tick(), if !self.pacer.is_empty() => self.drain_tick(),
                    }
                }
                SessionState::Draining => {
                    if self.pacer.is_empty() {
                        return self.finalize();
                    }
                    tokio::select! {
                        biased;
                        _ = self.transport.aborted() => return self.finish_aborted(),
                        _ = self.ticker.tick() => self.drain_tick(),
                    }
                }
                SessionState::Connecting | SessionState::Finalized => {
                    return self.finalize();
                }
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(session_id = %self.id, from = ?self.state, to = ?next, queued = self.pacer.len(), "session state change");
        self.state = next;
    }

    fn on_frame(&mut self, frame: &SseFrame) {
        let classified = classify(frame);
        self.aggregator.merge_sources(&classified.sources);
        for event in classified.events {
            match event.delivery() {
                Delivery::Paced => self.pacer.enqueue(event),
                Delivery::Immediate => {
                    deliver(&event, &mut self.aggregator, self.on_event.as_mut());
                }
                Delivery::Absorbed => {
                    if event.is_balance_exhausted() {
                        warn!(session_id = %self.id, "AI points balance exhausted");
                        self.notifier.notify_insufficient_balance();
                    }
                    if let StreamEvent::Error { message, .. } = &event {
                        warn!(session_id = %self.id, message = %message, "stream reported an error");
                    }
                    self.aggregator.absorb(event);
                }
            }
        }
    }

    fn drain_tick(&mut self) {
        let delivered = self
            .pacer
            .tick(&mut self.aggregator, self.on_event.as_mut());
        debug!(session_id = %self.id, batch = delivered, queued = self.pacer.len(), "pacer tick");
    }

    /// Cancellation: deliver everything still queued, then finalize.
    fn finish_aborted(mut self) -> SessionResult {
        let flushed = self
            .pacer
            .flush(&mut self.aggregator, self.on_event.as_mut());
        info!(session_id = %self.id, flushed, "chat session aborted by caller");
        self.finalize()
    }

    fn fail(mut self, err: TransportError) -> SessionResult {
        self.transition(SessionState::Finalized);
        let kind = err.failure_kind();
        if matches!(err, TransportError::Fatal { .. }) {
            tracing::error!(session_id = %self.id, error = %err, "fatal transport error");
        } else {
            warn!(session_id = %self.id, error = %err, ?kind, "chat session failed");
        }
        Err(ChatFailure::new(kind, err.message(), self.aggregator.text()))
    }

    /// Error takes precedence over success.
    fn finalize(mut self) -> SessionResult {
        self.transition(SessionState::Finalized);
        if let Some(message) = self.aggregator.error() {
            let failure = ChatFailure::new(FailureKind::Stream, message, self.aggregator.text());
            info!(session_id = %self.id, chars = failure.partial_text.len(), "chat session finished with stream error");
            return Err(failure);
        }
        let output = self.aggregator.into_output();
        info!(session_id = %self.id, chars = output.text.len(), nodes = output.data.len(), "chat session completed");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopBalanceNotifier;
    use crate::pacer::IntervalTicker;
    use crate::transport::{FrameStreamHandle, ResponseMeta};
    use futures::channel::mpsc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;

    type FrameResult = Result<SseFrame, TransportError>;

    /// Transport whose frames are pushed by the test through a channel.
    struct ChannelTransport {
        rx: Mutex<Option<mpsc::UnboundedReceiver<FrameResult>>>,
        open_error: Option<TransportError>,
    }

    impl ChannelTransport {
        fn new() -> (Self, mpsc::UnboundedSender<FrameResult>) {
            let (tx, rx) = mpsc::unbounded();
            (
                Self {
                    rx: Mutex::new(Some(rx)),
                    open_error: None,
                },
                tx,
            )
        }

        fn failing(err: TransportError) -> Self {
            Self {
                rx: Mutex::new(None),
                open_error: Some(err),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ChannelTransport {
        async fn open(
            &self,
            _request: TransportRequest,
        ) -> Result<FrameStreamHandle, TransportError> {
            if let Some(err) = &self.open_error {
                return Err(err.clone());
            }
            let rx = self
                .rx
                .lock()
                .expect("lock")
                .take()
                .expect("opened once");
            Ok(FrameStreamHandle {
                frames: Box::pin(rx),
                metadata: ResponseMeta::default(),
            })
        }
    }

    struct CountingNotifier(AtomicUsize);

    impl BalanceNotifier for CountingNotifier {
        fn notify_insufficient_balance(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn request() -> TransportRequest {
        TransportRequest {
            endpoint: "/chat".into(),
            body: serde_json::json!({}),
        }
    }

    fn answer(texts: &[&str]) -> FrameResult {
        Ok(SseFrame::new(
            Some("answer"),
            serde_json::json!({ "response": texts }).to_string(),
        ))
    }

    async fn run_session(
        transport: &dyn ChatTransport,
        notifier: &dyn BalanceNotifier,
        abort_rx: watch::Receiver<bool>,
        delivered: &mut Vec<StreamEvent>,
    ) -> SessionResult {
        let session = ChatSession::new(
            transport,
            Duration::from_secs(60),
            abort_rx,
            notifier,
            Box::new(IntervalTicker::new(Duration::from_millis(16))),
            Box::new(|event: &StreamEvent| delivered.push(event.clone())),
        );
        session.run(request()).await
    }

    #[tokio::test(start_paused = true)]
    async fn answer_then_done_resolves_with_text() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(Ok(SseFrame::new(
            Some("answer"),
            r#"{"response":["Hi"],"source_documents":[]}"#,
        )))
        .expect("send");
        tx.unbounded_send(Ok(SseFrame::data("[DONE]"))).expect("send");
        drop(tx);

        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let output = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect("success");
        assert_eq!(output, ChatOutput { text: "Hi".into(), data: vec![] });
        assert_eq!(delivered, vec![StreamEvent::Answer { text: "Hi".into() }]);
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_text_matches_accumulated_text() {
        let (transport, tx) = ChannelTransport::new();
        for i in 0..20 {
            tx.unbounded_send(answer(&[&format!("{i},"), "x"])).expect("send");
        }
        tx.unbounded_send(Ok(SseFrame::new(
            Some("fastAnswer"),
            r#"{"choices":[{"delta":{"content":"!"}}]}"#,
        )))
        .expect("send");
        tx.unbounded_send(Ok(SseFrame::new(Some("toolCall"), r#"{"id":"t1"}"#)))
            .expect("send");
        drop(tx);

        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let output = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect("success");
        let concatenated: String = delivered.iter().filter_map(StreamEvent::answer_text).collect();
        assert_eq!(output.text, concatenated);
        assert_eq!(delivered.len(), 42);
        assert!(matches!(delivered.last(), Some(StreamEvent::ToolCall { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_then_clean_close_fails_with_message() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(answer(&["partial"])).expect("send");
        tx.unbounded_send(Ok(SseFrame::new(Some("error"), r#"{"message":"model overloaded"}"#)))
            .expect("send");
        tx.unbounded_send(answer(&[" more"])).expect("send");
        drop(tx);

        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let failure = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect_err("stream error wins");
        assert_eq!(failure.kind, FailureKind::Stream);
        assert_eq!(failure.message, "model overloaded");
        assert_eq!(failure.partial_text, "partial more");
        assert!(delivered.iter().all(|e| !matches!(e, StreamEvent::Error { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn balance_exhausted_error_calls_the_notifier() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(Ok(SseFrame::new(
            Some("error"),
            r#"{"statusText":"aiPointsNotEnough","message":"AI points exhausted"}"#,
        )))
        .expect("send");
        drop(tx);

        let notifier = CountingNotifier(AtomicUsize::new(0));
        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let failure = run_session(&transport, &notifier, abort_rx, &mut delivered)
            .await
            .expect_err("error event");
        assert_eq!(failure.message, "AI points exhausted");
        assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_flushes_every_queued_event_and_succeeds() {
        let (transport, tx) = ChannelTransport::new();
        let fragments: Vec<String> = (0..90).map(|i| format!("{i} ")).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        tx.unbounded_send(answer(&refs)).expect("send");

        let (abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let session = ChatSession::new(
            &transport,
            Duration::from_secs(60),
            abort_rx,
            &NoopBalanceNotifier,
            Box::new(IntervalTicker::new(Duration::from_millis(16))),
            Box::new(|event: &StreamEvent| delivered.push(event.clone())),
        );
        let run = session.run(request());
        let abort = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            abort_tx.send_replace(true);
        };
        let (result, ()) = tokio::join!(run, abort);
        let output = result.expect("abort resolves");
        assert_eq!(output.text, fragments.concat());
        assert_eq!(delivered.len(), 90);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_while_draining_flushes_the_rest_and_succeeds() {
        let (transport, tx) = ChannelTransport::new();
        let fragments: Vec<String> = (0..90).map(|i| format!("{i} ")).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        tx.unbounded_send(answer(&refs)).expect("send");
        // Closing the channel moves the session to draining with a full queue.
        drop(tx);

        let (abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let session = ChatSession::new(
            &transport,
            Duration::from_secs(60),
            abort_rx,
            &NoopBalanceNotifier,
            Box::new(IntervalTicker::new(Duration::from_millis(16))),
            Box::new(|event: &StreamEvent| delivered.push(event.clone())),
        );
        let start = tokio::time::Instant::now();
        let run = session.run(request());
        let abort = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            abort_tx.send_replace(true);
        };
        let (result, ()) = tokio::join!(run, abort);
        let output = result.expect("abort resolves");
        // A full drain of 90 events takes dozens of ticks.
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(output.text, fragments.concat());
        assert_eq!(delivered.len(), 90);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_after_stream_error_still_fails() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(Ok(SseFrame::new(Some("error"), r#"{"message":"bad kb"}"#)))
            .expect("send");
        let (abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let run = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered);
        let abort = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            abort_tx.send_replace(true);
        };
        let (result, ()) = tokio::join!(run, abort);
        assert_eq!(result.expect_err("error recorded").message, "bad kb");
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn node_status_bypasses_the_queue() {
        let (transport, tx) = ChannelTransport::new();
        let fragments: Vec<String> = (0..40).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = fragments.iter().map(String::as_str).collect();
        tx.unbounded_send(answer(&refs)).expect("send");
        tx.unbounded_send(Ok(SseFrame::new(Some("flowNodeStatus"), r#"{"status":"running"}"#)))
            .expect("send");
        drop(tx);

        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect("success");
        let status_at = delivered
            .iter()
            .position(|e| matches!(e, StreamEvent::FlowNodeStatus { .. }))
            .expect("status delivered");
        assert!(status_at < 40, "status should overtake queued answers");
        assert_eq!(delivered.len(), 41);
    }

    #[tokio::test(start_paused = true)]
    async fn flow_responses_replace_retrieval_data() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(Ok(SseFrame::data(
            serde_json::json!({
                "response": ["ok"],
                "source_documents": [{"file_name": "a.pdf", "content": "c", "retrieval_query": "q"}]
            })
            .to_string(),
        )))
        .expect("send");
        tx.unbounded_send(Ok(SseFrame::new(
            Some("flowResponses"),
            r#"[{"nodeId":"n1","moduleName":"AI chat","moduleType":"chatNode"}]"#,
        )))
        .expect("send");
        drop(tx);

        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let output = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect("success");
        assert_eq!(output.data.len(), 1);
        assert_eq!(output.data[0].node_id, "n1");
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_transport_error_keeps_delivered_text() {
        let (transport, tx) = ChannelTransport::new();
        tx.unbounded_send(answer(&["Hello"])).expect("send");
        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let run = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered);
        let fail = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.unbounded_send(Err(TransportError::io("connection reset")))
                .expect("send");
        };
        let (result, ()) = tokio::join!(run, fail);
        let failure = result.expect_err("transport error");
        assert_eq!(failure.kind, FailureKind::Transport);
        assert_eq!(failure.message, "connection reset");
        assert_eq!(failure.partial_text, "Hello");
    }

    #[tokio::test(start_paused = true)]
    async fn open_rejection_fails_without_partial_text() {
        let transport =
            ChannelTransport::failing(TransportError::rejected(Some(500), "server busy"));
        let (_abort_tx, abort_rx) = watch::channel(false);
        let mut delivered = Vec::new();
        let failure = run_session(&transport, &NoopBalanceNotifier, abort_rx, &mut delivered)
            .await
            .expect_err("rejected");
        assert_eq!(
            failure,
            ChatFailure::new(FailureKind::OpenRejected, "server busy", "")
        );
        assert!(delivered.is_empty());
    }
}
