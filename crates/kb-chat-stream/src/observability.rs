use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "kb-chat.logs.jsonl";

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn logging_enabled(lookup: &impl Fn(&str) -> Option<String>) -> bool {
    lookup("KB_CHAT_OBSERVABILITY")
        .and_then(|value| parse_flag(&value))
        .unwrap_or(true)
}

fn env_filter(lookup: &impl Fn(&str) -> Option<String>) -> EnvFilter {
    if let Some(level) = lookup("KB_CHAT_LOG_LEVEL")
        && let Ok(filter) = EnvFilter::try_new(level)
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Installs the global tracing subscriber once per process.
///
/// Environment variables:
/// - `KB_CHAT_OBSERVABILITY`: set to `0`/`false`/`off` to skip installing a subscriber.
/// - `KB_CHAT_LOG_LEVEL`: filter directive (`debug`, `kb_chat_stream=trace`, ...).
///   Falls back to `RUST_LOG`, then `warn`.
/// - `KB_CHAT_JSON_LOG_PATH`: write JSON lines to this file instead of stderr.
///
/// Library code only emits events; embedding hosts may install their own
/// subscriber and never call this.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let lookup = |key: &str| std::env::var(key).ok();
        if !logging_enabled(&lookup) {
            return;
        }

        let filter = env_filter(&lookup);
        if let Some(raw) = lookup("KB_CHAT_JSON_LOG_PATH").filter(|v| !v.trim().is_empty()) {
            let path = std::path::PathBuf::from(raw);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let _ = std::fs::create_dir_all(dir);
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(false)
                .with_writer(tracing_appender::rolling::never(dir, file_name));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .try_init();
        } else {
            // stdout carries the streamed answer, so console logs go to stderr.
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(console_layer)
                .try_init();
        }
    });
}
