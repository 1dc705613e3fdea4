use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures_util::StreamExt;
use ollama_meter_core::{
    Completion, MeteredOllama, UsageMetadata,
    config::{Config, ENV_LOG_LEVEL},
    http_client::HttpClient,
    metering::revenium::ReveniumClient,
    model::{ChatMessage, ChatRequest, GenerateRequest},
    providers::ollama::OllamaClient,
    telemetry::{DispatchHandle, ShutdownSignal},
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(author, version, about = "Metered Ollama CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    #[arg(long)]
    model: String,
    /// Stream fragments as they arrive
    #[arg(long)]
    stream: bool,
    /// Usage metadata as a JSON object
    #[arg(long)]
    metadata: Option<String>,
    /// Config file (JSON or TOML); environment variables override it
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat request
    Chat {
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Send a generate request
    Generate {
        #[arg(short, long, help = "Prompt text")]
        prompt: String,
        #[command(flatten)]
        common: CommonArgs,
    },
}

/// `RUST_LOG` directives win; otherwise a plain level name from
/// `REVENIUM_LOG_LEVEL`; unset, empty or unparseable values fall back to `info`.
fn env_filter(rust_log: Option<&str>, log_level: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log.map(str::trim).filter(|d| !d.is_empty())
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return filter;
    }
    let level = log_level
        .and_then(|l| l.trim().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);
    EnvFilter::default().add_directive(level.into())
}

fn init_tracing() {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let log_level = std::env::var(ENV_LOG_LEVEL).ok();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref(), log_level.as_deref()))
        .with_writer(io::stderr)
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::from_path(p).with_context(|| format!("loading config {}", p.display()))?,
        None => Config::default(),
    };
    cfg.apply_env(&ollama_meter_core::trace_fields::ProcessEnv);
    Ok(cfg)
}

fn parse_metadata(raw: Option<&str>) -> anyhow::Result<Option<UsageMetadata>> {
    let Some(raw) = raw else { return Ok(None) };
    let value: serde_json::Value = serde_json::from_str(raw).context("--metadata is not valid JSON")?;
    Ok(Some(UsageMetadata::from_value(value)?))
}

fn build_client(cfg: &Config, shutdown: ShutdownSignal) -> anyhow::Result<MeteredOllama> {
    let http = HttpClient::from_cfg(&cfg.http)?;
    let ollama = OllamaClient::new(http.clone(), cfg.ollama.base_url.clone());
    let dispatch = match (&cfg.metering.api_key, cfg.metering.enabled) {
        (Some(key), true) => {
            let meter = ReveniumClient::new(http, key.clone(), cfg.metering.base_url.clone());
            DispatchHandle::spawn(Arc::new(meter), shutdown, cfg.metering.queue_capacity)
        }
        (None, true) => {
            tracing::warn!("no metering API key configured; usage will not be reported");
            DispatchHandle::disabled()
        }
        (_, false) => DispatchHandle::disabled(),
    };
    Ok(MeteredOllama::new(Arc::new(ollama), dispatch))
}

fn print_live(text: &str) {
    print!("{text}");
    io::stdout().flush().ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let common = match &cli.command {
        Commands::Chat { common, .. } | Commands::Generate { common, .. } => common,
    };
    let cfg = load_config(common.config.as_deref())?;
    let metadata = parse_metadata(common.metadata.as_deref())?;
    let shutdown = ShutdownSignal::new();
    let client = build_client(&cfg, shutdown.clone())?;

    let transaction_id = match cli.command {
        Commands::Chat { message, common } => {
            let req = ChatRequest::new(common.model, vec![ChatMessage::user(message)]).streaming(common.stream);
            match client.chat(req, metadata).await? {
                Completion::Single(resp) => {
                    println!("{}", resp.message.as_ref().map(|m| m.content.as_str()).unwrap_or_default());
                    Some(resp.transaction_id().to_string())
                }
                Completion::Stream(mut stream) => {
                    let mut id = None;
                    while let Some(fragment) = stream.next().await {
                        let fragment = fragment?;
                        if let Some(m) = &fragment.message {
                            print_live(&m.content);
                        }
                        id.get_or_insert_with(|| fragment.transaction_id().to_string());
                    }
                    println!();
                    id
                }
            }
        }
        Commands::Generate { prompt, common } => {
            let req = GenerateRequest::new(common.model, prompt).streaming(common.stream);
            match client.generate(req, metadata).await? {
                Completion::Single(resp) => {
                    println!("{}", resp.response);
                    Some(resp.transaction_id().to_string())
                }
                Completion::Stream(mut stream) => {
                    let mut id = None;
                    while let Some(fragment) = stream.next().await {
                        let fragment = fragment?;
                        print_live(&fragment.response);
                        id.get_or_insert_with(|| fragment.transaction_id().to_string());
                    }
                    println!();
                    id
                }
            }
        }
    };

    if let Some(id) = transaction_id {
        eprintln!("[transaction: {id}]");
    }
    if tokio::time::timeout(FLUSH_TIMEOUT, client.dispatch().flush()).await.is_err() {
        tracing::warn!("timed out waiting for metering submissions");
    }
    shutdown.trigger();
    Ok(())
}
