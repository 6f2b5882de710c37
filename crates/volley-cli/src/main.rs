//! volley: send a batch of requests to an OpenAI-compatible endpoint with
//! bounded concurrency, retries and a shared credential.
//!
//! Configuration comes from the environment (a `.env` file is loaded first);
//! flags override it. Exit status is 0 only if every request succeeded.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volley_inference::{
    ApiRequest, ApiResponse, ChatCompletionRequest, CommandCredentialProvider, EmbeddingRequest,
    EndpointConfig, EnvCredentialProvider, OpenAIEndpoint, ResponseBody,
};
use volley_jobs::{
    defaults, BatchReport, CredentialCache, CredentialProvider, Dispatcher, DispatcherConfig,
    Error, RetryPolicy, Session, StalePolicy, Task,
};

/// Prompts cycled across the batch when none are given.
const DEFAULT_PROMPTS: &[&str] = &[
    "Explain concept simply: Quantum Entanglement",
    "Explain concept simply: Blockchain",
    "Explain concept simply: General Relativity",
];

const DEFAULT_MAX_TOKENS: u32 = 100;

/// Longest response excerpt printed per task.
const PREVIEW_CHARS: usize = 80;

#[derive(Parser)]
#[command(name = "volley")]
#[command(author, version, about = "Concurrent batch requests against OpenAI-compatible APIs")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a batch of chat completion requests
    Chat {
        #[command(flatten)]
        batch: BatchArgs,

        #[command(flatten)]
        chat: ChatArgs,
    },

    /// Send a batch of embedding requests
    Embed {
        #[command(flatten)]
        batch: BatchArgs,

        /// Text to embed; each request appends its index
        #[arg(short, long, default_value = "The quick brown fox")]
        text: String,
    },
}

#[derive(Args)]
struct ChatArgs {
    /// Prompt to send; repeat to cycle several prompts across the batch
    #[arg(short, long)]
    prompt: Vec<String>,

    /// Optional system message
    #[arg(long)]
    system: Option<String>,

    /// Maximum tokens to generate per request
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// Sampling temperature of the first request
    #[arg(long)]
    temperature: Option<f32>,

    /// Added to the temperature for each subsequent request
    #[arg(long, default_value_t = 0.0, requires = "temperature")]
    temperature_step: f32,

    /// Request streamed (SSE) responses
    #[arg(long)]
    stream: bool,
}

#[derive(Args)]
struct BatchArgs {
    /// Number of requests in the batch
    #[arg(short = 'n', long, default_value_t = defaults::BATCH_SIZE)]
    requests: usize,

    /// Maximum requests in flight (default: VOLLEY_CONCURRENCY or 3)
    #[arg(short = 'k', long)]
    concurrency: Option<usize>,

    /// Model name
    #[arg(short, long, env = "MODEL_NAME", default_value = defaults::MODEL_NAME)]
    model: String,

    /// API base URL (default: OPENAI_API_BASE or http://localhost:8000/v1)
    #[arg(long)]
    base_url: Option<String>,

    /// Attempts per request, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-attempt timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Command printing a bearer token, e.g. "gcloud auth print-access-token"
    #[arg(long, env = "VOLLEY_CREDENTIAL_COMMAND")]
    credential_command: Option<String>,

    /// Use a placeholder token when OPENAI_API_KEY is unset
    #[arg(long)]
    dummy_key: bool,

    /// Fail requests when a credential refresh fails instead of reusing the
    /// previous token
    #[arg(long)]
    fail_hard: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard = init_tracing();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: "volley=info")
///
/// Console logs go to stderr so stdout carries only results.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "volley=info".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("volley.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stderr)"),
        "Logging initialized"
    );

    guard
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Commands::Chat { batch, chat } => {
            let requests = chat_requests(&batch, &chat)?;
            execute(&batch, requests, describe_chat).await
        }
        Commands::Embed { batch, text } => {
            let requests = (0..batch.requests)
                .map(|i| {
                    let payload =
                        EmbeddingRequest::new(&batch.model, vec![format!("{} {}", text, i)]);
                    ApiRequest::embeddings(&payload)
                })
                .collect::<volley_jobs::Result<Vec<_>>>()?;
            execute(&batch, requests, describe_embedding).await
        }
    }
}

fn chat_requests(batch: &BatchArgs, chat: &ChatArgs) -> volley_jobs::Result<Vec<ApiRequest>> {
    let prompts: Vec<&str> = if chat.prompt.is_empty() {
        DEFAULT_PROMPTS.to_vec()
    } else {
        chat.prompt.iter().map(String::as_str).collect()
    };

    (0..batch.requests)
        .map(|i| {
            let mut payload = ChatCompletionRequest::user(&batch.model, prompts[i % prompts.len()])
                .with_max_tokens(chat.max_tokens)
                .with_stream(chat.stream);
            if let Some(system) = &chat.system {
                payload = payload.with_system(system);
            }
            if let Some(temperature) = chat.temperature {
                payload = payload.with_temperature(temperature + chat.temperature_step * i as f32);
            }
            ApiRequest::chat(&payload)
        })
        .collect()
}

fn credential_provider(batch: &BatchArgs) -> volley_jobs::Result<Arc<dyn CredentialProvider>> {
    let provider: Arc<dyn CredentialProvider> = match batch.credential_command {
        Some(ref command) => Arc::new(CommandCredentialProvider::from_command_line(command)?),
        None => Arc::new(EnvCredentialProvider::default().with_dummy_fallback(batch.dummy_key)),
    };
    Ok(provider)
}

async fn execute(
    batch: &BatchArgs,
    requests: Vec<ApiRequest>,
    describe: fn(&ApiResponse) -> String,
) -> anyhow::Result<bool> {
    let mut endpoint_config = EndpointConfig::from_env();
    if let Some(ref base_url) = batch.base_url {
        endpoint_config = endpoint_config.with_base_url(base_url);
    }

    let mut policy = RetryPolicy::from_env();
    if let Some(max_attempts) = batch.max_attempts {
        policy = policy.with_max_attempts(max_attempts);
    }
    if let Some(secs) = batch.timeout {
        policy = policy.with_attempt_timeout(Duration::from_secs(secs));
    }

    let mut dispatcher_config = DispatcherConfig::from_env();
    if let Some(k) = batch.concurrency {
        dispatcher_config = dispatcher_config.with_concurrency(k);
    }

    let stale_policy = if batch.fail_hard {
        StalePolicy::FailHard
    } else {
        StalePolicy::ServeStale
    };
    let credentials =
        CredentialCache::from_env(credential_provider(batch)?).with_stale_policy(stale_policy);

    println!(
        "--- Sending {} requests with a concurrency limit of {} ---",
        requests.len(),
        dispatcher_config.concurrency_limit
    );
    println!("Base URL: {}", endpoint_config.base_url);
    println!("Model: {}", batch.model);
    println!("---");

    let endpoint = OpenAIEndpoint::new(endpoint_config)?;
    let session = Session::new(endpoint, Arc::new(credentials), policy);
    let dispatcher = Dispatcher::new(dispatcher_config);

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling batch");
        } else {
            std::future::pending::<()>().await;
        }
    };

    let report = match dispatcher
        .run_batch_until(&session, Task::batch(requests), shutdown)
        .await
    {
        Ok(report) => report,
        Err(Error::Cancelled) => {
            eprintln!("Batch cancelled before all requests finished");
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    print_report(&report, describe);

    match report.ensure_success() {
        Ok(()) => Ok(true),
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(false)
        }
    }
}

fn print_report(report: &BatchReport<ApiResponse>, describe: fn(&ApiResponse) -> String) {
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(response) => println!(
                "[Request {}] ok after {} attempt(s): {}",
                outcome.index + 1,
                outcome.attempts,
                describe(response)
            ),
            Err(e) => println!(
                "[Request {}] FAILED after {} attempt(s): {}",
                outcome.index + 1,
                outcome.attempts,
                e
            ),
        }
    }

    println!("--- All requests finished ---");
    println!("Total time: {:.2} seconds", report.elapsed.as_secs_f64());
    println!("Total attempts: {}", report.total_attempts());
    println!(
        "Successfully completed {} out of {} requests.",
        report.successful(),
        report.total()
    );
}

fn describe_chat(response: &ApiResponse) -> String {
    let text = response.text().unwrap_or_default();
    let preview = preview(&text);
    match response.body {
        ResponseBody::Stream { chunks, .. } => format!("{} ({} chunks)", preview, chunks),
        ResponseBody::Json(_) => preview,
    }
}

fn describe_embedding(response: &ApiResponse) -> String {
    match response.embedding_count() {
        Some(n) => format!("{} embedding(s)", n),
        None => "no embeddings in response".to_string(),
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_chat_flags() {
        let cli = Cli::try_parse_from([
            "volley", "chat", "-n", "4", "-k", "2", "--stream", "-p", "a", "-p", "b",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat { batch, chat } => {
                assert_eq!(batch.requests, 4);
                assert_eq!(batch.concurrency, Some(2));
                assert_eq!(chat.prompt, vec!["a", "b"]);
                assert!(chat.stream);
                assert_eq!(chat.temperature, None);
            }
            Commands::Embed { .. } => panic!("expected chat"),
        }
    }

    #[test]
    fn test_chat_requests_cycle_prompts() {
        let cli = Cli::try_parse_from(["volley", "chat", "-n", "5", "-m", "m"]).unwrap();
        let Commands::Chat { batch, chat } = cli.command else {
            panic!("expected chat");
        };

        let requests = chat_requests(&batch, &chat).unwrap();
        assert_eq!(requests.len(), 5);
        assert_eq!(
            requests[3].body["messages"][0]["content"],
            DEFAULT_PROMPTS[0]
        );
        assert_eq!(requests[4].body["max_tokens"], 100);
        assert!(requests[0].body.get("temperature").is_none());
        assert!(!requests[0].stream);
    }

    #[test]
    fn test_chat_requests_step_temperature() {
        let cli = Cli::try_parse_from([
            "volley",
            "chat",
            "-n",
            "3",
            "--temperature",
            "0.5",
            "--temperature-step",
            "0.25",
        ])
        .unwrap();
        let Commands::Chat { batch, chat } = cli.command else {
            panic!("expected chat");
        };

        let requests = chat_requests(&batch, &chat).unwrap();
        let temperatures: Vec<f64> = requests
            .iter()
            .filter_map(|r| r.body["temperature"].as_f64())
            .collect();
        assert_eq!(temperatures, vec![0.5, 0.75, 1.0]);
    }

    #[test]
    fn test_temperature_step_requires_temperature() {
        let result = Cli::try_parse_from(["volley", "chat", "--temperature-step", "0.1"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_preview_truncates() {
        let long = "word ".repeat(50);
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), PREVIEW_CHARS + 3);
        assert_eq!(preview("  short\n text "), "short text");
    }
}
