use std::time::Duration;

use crate::errors::ChatError;

/// Endpoint used when a run does not name one.
pub const DEFAULT_ENDPOINT: &str = "/api/aidong/kbqa/adrag_chat";

/// Configuration for a [`ChatClient`](crate::ChatClient).
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Base URL of the chat backend; relative endpoints resolve against it.
    pub base_url: String,
    /// Default endpoint for runs.
    pub endpoint: String,
    /// How long a run may wait for the stream to open.
    pub connect_timeout: Duration,
    /// Interval between pacer ticks.
    ///
    /// The default is one 60 Hz display frame.
    pub tick_interval: Duration,
    /// Optional `User-Agent` header.
    pub user_agent: Option<String>,
}

impl ChatClientConfig {
    /// Creates a config with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout: Duration::from_secs(60),
            tick_interval: Duration::from_millis(16),
            user_agent: None,
        }
    }

    /// Builds a config from `KB_CHAT_*` environment variables.
    ///
    /// `KB_CHAT_BASE_URL` is required. `KB_CHAT_ENDPOINT`,
    /// `KB_CHAT_CONNECT_TIMEOUT_SECS` and `KB_CHAT_TICK_MS` override defaults.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ChatError> {
        let base_url = lookup("KB_CHAT_BASE_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ChatError::Config(
                "missing KB_CHAT_BASE_URL for chat backend".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(endpoint) = lookup("KB_CHAT_ENDPOINT").filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint.trim().to_string();
        }
        if let Some(secs) = parse_u64(&lookup, "KB_CHAT_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, "KB_CHAT_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        Ok(config)
    }

    /// Overrides the default endpoint.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the pacer tick interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the `User-Agent` header.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.connect_timeout.is_zero() {
            return Err(ChatError::Config(
                "connect_timeout must be greater than 0".into(),
            ));
        }
        if self.tick_interval.is_zero() {
            return Err(ChatError::Config(
                "tick_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ChatError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ChatError::Config(format!("invalid {key} ({raw}): {e}"))),
        _ => Ok(None),
    }
}
