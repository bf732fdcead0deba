use anyhow::Context;
use clap::Parser;
use dicearena_execution::{FileJournal, IntentJournal, Memory, MemoryJournal};
use dicearena_server::{Api, Config, Server};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Config::from_yaml(&source)
                .with_context(|| format!("failed to parse {}", path.display()))?
        }
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = config.validate().context("invalid configuration")?;

    // Create logger
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_max_level(config.log_level)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(config.log_level)
            .init();
    }
    let rules = config.engine.rules;
    info!(
        tie_break = ?rules.tie_break,
        termination = ?rules.termination,
        start_mode = ?rules.start_mode,
        fee_bps = config.engine.policy.fee_bps,
        accounts = config.accounts.len(),
        "match rules loaded"
    );

    // Collaborators
    let backend = Memory::new(config.accounts.clone())
        .with_referral_levels(config.referral_level_bps.clone())
        .with_counter_seed(config.history_counter_seed);
    let journal: Arc<dyn IntentJournal> = match &config.journal_directory {
        Some(directory) => Arc::new(
            FileJournal::open(directory)
                .with_context(|| format!("failed to open journal {}", directory.display()))?,
        ),
        None => {
            warn!("no journal_directory configured, interrupted settlements will not survive a restart");
            Arc::new(MemoryJournal::default())
        }
    };

    let server = Arc::new(Server::new(backend, journal, config.engine, config.session));
    let recovered = server
        .engine()
        .recover()
        .await
        .context("failed to replay settlement journal")?;
    if recovered > 0 {
        info!(recovered, "finished interrupted settlements");
    }
    let app = Api::new(server, config.rate_limit).router();

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}
