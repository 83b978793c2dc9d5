use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::ChatClientConfig;
use crate::errors::ChatError;
use crate::event::StreamEvent;
use crate::notify::{BalanceNotifier, NoopBalanceNotifier};
use crate::output::ChatOutput;
use crate::pacer::{IntervalTicker, Ticker};
use crate::request::ChatRequest;
use crate::session::ChatSession;
use crate::transport::{ChatTransport, HttpTransport, TransportRequest};

/// Handle used to request cancellation of a running chat.
///
/// Cancellation is cooperative: already-buffered events are still delivered
/// and the run resolves with what was accumulated.
#[derive(Clone)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for AbortHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct ClientInner {
    transport: Arc<dyn ChatTransport>,
    notifier: Arc<dyn BalanceNotifier>,
    config: ChatClientConfig,
}

/// Entry point for streaming chats against a knowledge-base backend.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

impl ChatClient {
    /// Starts a builder for the given configuration.
    pub fn builder(config: ChatClientConfig) -> ChatClientBuilder {
        ChatClientBuilder {
            config,
            transport: None,
            notifier: None,
        }
    }

    /// Builds a client with an HTTP transport from `KB_CHAT_*` variables.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::builder(ChatClientConfig::from_env()?).build()
    }

    pub fn config(&self) -> &ChatClientConfig {
        &self.inner.config
    }

    /// Starts configuring a chat run.
    pub fn chat<'a>(&self, request: ChatRequest) -> ChatRun<'a> {
        ChatRun {
            client: self.inner.clone(),
            request,
            endpoint: None,
            connect_timeout: None,
            abort: AbortHandle::new(),
            on_event: None,
            ticker: None,
        }
    }
}

/// Builder used to wire the transport and notifier before creating a client.
pub struct ChatClientBuilder {
    config: ChatClientConfig,
    transport: Option<Arc<dyn ChatTransport>>,
    notifier: Option<Arc<dyn BalanceNotifier>>,
}

impl ChatClientBuilder {
    /// Replaces the default HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the notifier called when the AI-points balance runs out.
    pub fn balance_notifier(mut self, notifier: Arc<dyn BalanceNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validates the configuration and builds the client.
    pub fn build(self) -> Result<ChatClient, ChatError> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        Ok(ChatClient {
            inner: Arc::new(ClientInner {
                transport,
                notifier: self
                    .notifier
                    .unwrap_or_else(|| Arc::new(NoopBalanceNotifier)),
                config: self.config,
            }),
        })
    }
}

/// Builder for a single chat run.
///
/// The callback passed to [`ChatRun::on_event`] is invoked zero or more
/// times, always before [`ChatRun::run`] resolves.
pub struct ChatRun<'a> {
    client: Arc<ClientInner>,
    request: ChatRequest,
    endpoint: Option<String>,
    connect_timeout: Option<Duration>,
    abort: AbortHandle,
    on_event: Option<Box<dyn FnMut(&StreamEvent) + Send + 'a>>,
    ticker: Option<Box<dyn Ticker + 'a>>,
}

impl<'a> ChatRun<'a> {
    /// Overrides the endpoint for this run.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the connect timeout for this run.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Uses `handle` to cancel this run.
    pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = handle;
        self
    }

    /// Sets the per-event callback.
    pub fn on_event(mut self, callback: impl FnMut(&StreamEvent) + Send + 'a) -> Self {
        self.on_event = Some(Box::new(callback));
        self
    }

    /// Drives the pacer from a custom tick source instead of the configured
    /// interval.
    pub fn ticker(mut self, ticker: impl Ticker + 'a) -> Self {
        self.ticker = Some(Box::new(ticker));
        self
    }

    /// Runs the chat to completion.
    ///
    /// Resolves with the accumulated answer on success or caller abort, and
    /// with [`ChatError::Failed`] on timeout, rejection, transport failure or
    /// a backend `error` event.
    pub async fn run(self) -> Result<ChatOutput, ChatError> {
        let validated = self.validate()?;
        let client = validated.client;
        let body = validated.request.to_body(&chrono::Local::now());
        let ticker = validated
            .ticker
            .unwrap_or_else(|| Box::new(IntervalTicker::new(client.config.tick_interval)));
        let on_event = validated
            .on_event
            .unwrap_or_else(|| Box::new(|_: &StreamEvent| {}));

        let session = ChatSession::new(
            client.transport.as_ref(),
            validated.connect_timeout,
            validated.abort.subscribe(),
            client.notifier.as_ref(),
            ticker,
            on_event,
        );
        session
            .run(TransportRequest {
                endpoint: validated.endpoint,
                body,
            })
            .await
            .map_err(ChatError::Failed)
    }

    /// Runs to completion and returns only the answer text.
    pub async fn collect_text(self) -> Result<String, ChatError> {
        Ok(self.run().await?.text)
    }

    fn validate(self) -> Result<ValidatedRun<'a>, ChatError> {
        if self.request.user_id.trim().is_empty() {
            return Err(ChatError::Validation("user_id must not be empty".into()));
        }
        if self.request.question.trim().is_empty() {
            return Err(ChatError::Validation("question must not be empty".into()));
        }
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| self.client.config.endpoint.clone());
        if endpoint.trim().is_empty() {
            return Err(ChatError::Validation("endpoint must not be empty".into()));
        }
        let connect_timeout = self
            .connect_timeout
            .unwrap_or(self.client.config.connect_timeout);
        if connect_timeout.is_zero() {
            return Err(ChatError::Validation(
                "connect_timeout must be greater than 0".into(),
            ));
        }
        Ok(ValidatedRun {
            client: self.client,
            request: self.request,
            endpoint,
            connect_timeout,
            abort: self.abort,
            on_event: self.on_event,
            ticker: self.ticker,
        })
    }
}

struct ValidatedRun<'a> {
    client: Arc<ClientInner>,
    request: ChatRequest,
    endpoint: String,
    connect_timeout: Duration,
    abort: AbortHandle,
    on_event: Option<Box<dyn FnMut(&StreamEvent) + Send + 'a>>,
    ticker: Option<Box<dyn Ticker + 'a>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{FailureKind, TransportError};
    use crate::transport::{FrameStreamHandle, ResponseMeta, SseFrame};
    use futures::stream;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records request bodies and replays canned frames.
    struct ScriptedTransport {
        frames: Vec<Result<SseFrame, TransportError>>,
        bodies: Mutex<Vec<(String, serde_json::Value)>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(frames: Vec<Result<SseFrame, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                frames,
                bodies: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open(
            &self,
            request: TransportRequest,
        ) -> Result<FrameStreamHandle, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .lock()
                .expect("lock")
                .push((request.endpoint, request.body));
            Ok(FrameStreamHandle {
                frames: Box::pin(stream::iter(self.frames.clone())),
                metadata: ResponseMeta::default(),
            })
        }
    }

    struct PendingTransport;

    #[async_trait::async_trait]
    impl ChatTransport for PendingTransport {
        async fn open(
            &self,
            _request: TransportRequest,
        ) -> Result<FrameStreamHandle, TransportError> {
            futures::future::pending().await
        }
    }

    fn client_with(transport: Arc<dyn ChatTransport>) -> ChatClient {
        ChatClient::builder(ChatClientConfig::new("http://kb.test"))
            .transport(transport)
            .build()
            .expect("client")
    }

    fn request() -> ChatRequest {
        ChatRequest::new("u1", ["kb-1"], "How do I reset my password?")
    }

    #[tokio::test(start_paused = true)]
    async fn run_streams_events_and_posts_to_default_endpoint() {
        let transport = ScriptedTransport::new(vec![
            Ok(SseFrame::new(Some("answer"), r#"{"response":["Open ","settings."]}"#)),
            Ok(SseFrame::data("[DONE]")),
        ]);
        let mut seen = Vec::new();
        let output = client_with(transport.clone())
            .chat(request())
            .on_event(|event| seen.push(event.clone()))
            .run()
            .await
            .expect("run");
        assert_eq!(output.text, "Open settings.");
        assert_eq!(seen.len(), 2);

        let bodies = transport.bodies.lock().expect("lock");
        let (endpoint, body) = &bodies[0];
        assert_eq!(endpoint, crate::config::DEFAULT_ENDPOINT);
        assert_eq!(body["question"], "How do I reset my password?");
        assert_eq!(body["streaming"], true);
    }

    #[tokio::test]
    async fn validation_rejects_empty_question_before_io() {
        let transport = ScriptedTransport::new(vec![]);
        let err = client_with(transport.clone())
            .chat(ChatRequest::new("u1", ["kb"], "   "))
            .run()
            .await
            .expect_err("empty question");
        assert!(matches!(err, ChatError::Validation(msg) if msg.contains("question")));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_rejects_empty_user() {
        let err = client_with(ScriptedTransport::new(vec![]))
            .chat(ChatRequest::new("", ["kb"], "q"))
            .run()
            .await
            .expect_err("empty user");
        assert!(matches!(err, ChatError::Validation(msg) if msg.contains("user_id")));
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_fails_the_run() {
        let err = client_with(Arc::new(PendingTransport))
            .chat(request())
            .connect_timeout(Duration::from_secs(5))
            .run()
            .await
            .expect_err("timeout");
        let failure = err.failure().expect("session failure");
        assert_eq!(failure.kind, FailureKind::ConnectTimeout);
        assert!(failure.partial_text.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_open_resolves_empty() {
        let abort = AbortHandle::new();
        abort.abort();
        let output = client_with(Arc::new(PendingTransport))
            .chat(request())
            .abort_handle(abort.clone())
            .run()
            .await
            .expect("abort resolves");
        assert_eq!(output, ChatOutput::default());
        assert!(abort.is_aborted());
    }

    #[tokio::test(start_paused = true)]
    async fn collect_text_returns_answer_only() {
        let transport = ScriptedTransport::new(vec![Ok(SseFrame::new(
            Some("fastAnswer"),
            r#"{"choices":[{"delta":{"content":"fast"}}]}"#,
        ))]);
        let text = client_with(transport)
            .chat(request())
            .endpoint("/v1/chat/completions")
            .collect_text()
            .await
            .expect("text");
        assert_eq!(text, "fast");
    }

    #[test]
    fn build_rejects_zero_tick_interval() {
        let result = ChatClient::builder(
            ChatClientConfig::new("http://kb.test").tick_interval(Duration::ZERO),
        )
        .transport(ScriptedTransport::new(vec![]))
        .build();
        assert!(matches!(result, Err(ChatError::Config(msg)) if msg.contains("tick_interval")));
    }
}
