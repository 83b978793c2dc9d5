use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use kb_chat_stream::observability::init_observability;
use kb_chat_stream::prelude::*;
use tracing::warn;

/// Ask a knowledge base a question and stream the answer to stdout.
#[derive(Debug, Parser)]
#[command(name = "kb-chat", version, about)]
struct Cli {
    /// Question to ask.
    question: String,

    /// Caller identity sent as `user_id`.
    #[arg(long, env = "KB_CHAT_USER_ID")]
    user_id: String,

    /// Knowledge base to search; repeat for several.
    #[arg(long = "kb-id", required = true)]
    kb_ids: Vec<String>,

    /// Backend base URL (overrides `KB_CHAT_BASE_URL`).
    #[arg(long)]
    base_url: Option<String>,

    /// Endpoint path or absolute URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Seconds to wait for the stream to open.
    #[arg(long)]
    connect_timeout_secs: Option<u64>,

    /// Application id forwarded to the backend.
    #[arg(long)]
    app_id: Option<String>,

    /// Application name forwarded to the backend.
    #[arg(long, requires = "app_id")]
    app_name: Option<String>,

    /// Print retrieval sources after the answer.
    #[arg(long)]
    sources: bool,
}

struct StderrNotifier;

impl BalanceNotifier for StderrNotifier {
    fn notify_insufficient_balance(&self) {
        eprintln!("kb-chat: AI points balance exhausted");
    }
}

fn config_for(cli: &Cli) -> Result<ChatClientConfig, ChatError> {
    let mut config = match &cli.base_url {
        Some(base_url) => ChatClientConfig::new(base_url.clone()),
        None => ChatClientConfig::from_env()?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config = config.endpoint(endpoint.clone());
    }
    if let Some(secs) = cli.connect_timeout_secs {
        config = config.connect_timeout(Duration::from_secs(secs));
    }
    Ok(config.user_agent(concat!("kb-chat/", env!("CARGO_PKG_VERSION"))))
}

async fn run(cli: Cli) -> Result<ChatOutput, ChatError> {
    let client = ChatClient::builder(config_for(&cli)?)
        .balance_notifier(std::sync::Arc::new(StderrNotifier))
        .build()?;

    let mut request = ChatRequest::new(cli.user_id, cli.kb_ids, cli.question);
    if let Some(app_id) = cli.app_id {
        request = request.app(app_id, cli.app_name.unwrap_or_default());
    }

    let abort = AbortHandle::new();
    let on_ctrl_c = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping stream");
            on_ctrl_c.abort();
        }
    });

    let mut sink = AnswerSink::new(std::io::stdout(), abort.clone());
    client
        .chat(request)
        .abort_handle(abort)
        .on_event(move |event| {
            if let Some(text) = event.answer_text() {
                sink.write(text);
            }
        })
        .run()
        .await
}

/// Streams answer text to a writer and stops the run once writing fails,
/// for example when stdout is a closed pipe.
struct AnswerSink<W> {
    out: W,
    abort: AbortHandle,
}

impl<W: Write> AnswerSink<W> {
    fn new(out: W, abort: AbortHandle) -> Self {
        Self { out, abort }
    }

    fn write(&mut self, text: &str) {
        if self.abort.is_aborted() {
            return;
        }
        if let Err(err) = self
            .out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
        {
            warn!(error = %err, "cannot write answer, stopping stream");
            self.abort.abort();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_observability();

    let cli = Cli::parse();
    let show_sources = cli.sources;
    match run(cli).await {
        Ok(output) => {
            println!();
            if show_sources {
                for quote in output.quotes() {
                    println!("[source] {}", quote.source_name);
                }
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let partial = err.partial_text();
            if !partial.is_empty() {
                println!();
                eprintln!("kb-chat: stream ended early after {} chars", partial.len());
            }
            eprintln!("kb-chat: {err}");
            ExitCode::FAILURE
        }
    }
}
