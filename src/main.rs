use claude_relay::config::{config_search_paths, FORCE_STREAM_ENV};
use claude_relay::{build_router, AppState, Relay, ServerConfig, SharedJournal};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-relay",
    about = "Anthropic Messages API in front of OpenAI-compatible backends",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Append a JSON line per call to this file (overrides config)
    #[arg(long)]
    journal_file: Option<PathBuf>,

    /// Force streaming to every upstream
    #[arg(long)]
    force_stream: bool,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = ServerConfig::find_and_load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.journal_file.is_some() {
        config.journal_file = cli.journal_file;
    }
    config.force_stream |= cli.force_stream;

    let journal = match &config.journal_file {
        Some(path) => SharedJournal::open(path)?,
        None => SharedJournal::in_memory(),
    };

    info!("claude-relay v{}", env!("CARGO_PKG_VERSION"));
    info!("  Timeout:      {}s", config.request_timeout().as_secs());
    info!(
        "  Force stream: {} (env {FORCE_STREAM_ENV} read per request)",
        config.force_stream
    );
    match &config.journal_file {
        Some(path) => info!("  Journal:      {}", path.display()),
        None => info!("  Journal:      in memory"),
    }

    // Per-call deadlines are enforced by the relay; only connecting is bounded here.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    let relay = Relay::new(client, config.request_timeout(), config.force_stream, journal);
    let app = build_router(Arc::new(AppState { relay }));

    let bind_addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://{} claude", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
