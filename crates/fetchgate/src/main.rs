use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use fetchgate::cli::{Cli, Commands};
use fetchgate::core::metrics_server::start_metrics_server;
use fetchgate::core::validation::{parse_download_request, HostAllowList};
use fetchgate::core::web_server::{start_web_server, AppState};
use fetchgate::core::{config, init_logger, log_extractor_configuration, metrics};
use fetchgate::download::metadata::{collect_metadata, MetadataLimits};
use fetchgate::download::process::run_with_timeout;
use fetchgate::download::{ExtractionMode, ExtractorCommand, Launcher};

/// How long `check` waits for `--version`
const CHECK_TIMEOUT: Duration = Duration::from_secs(30);

/// Main entry point for the gateway
///
/// Parses CLI arguments and dispatches to appropriate subcommand.
///
/// # Errors
/// Returns an error if initialization fails (logging, binding a port) or the
/// chosen one-shot command fails.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Load environment variables from .env if present (before any config is read)
    let _ = dotenv();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH, &config::LOG_LEVEL)?;

    match cli.command {
        Some(Commands::Run { port }) => run_gateway(port).await,
        Some(Commands::Info { url }) => print_metadata(&url).await,
        Some(Commands::Check) => check_extractor().await,
        None => run_gateway(None).await,
    }
}

async fn run_gateway(port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(*config::WEB_PORT);
    let shutdown = CancellationToken::new();

    log_extractor_configuration(&ExtractorCommand::from_config());
    metrics::init_metrics();

    let metrics_port = *config::METRICS_PORT;
    if metrics_port != 0 {
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics_port, token).await {
                log::error!("Metrics server error: {}", e);
            }
        });
    } else {
        log::info!("Metrics server disabled (METRICS_PORT=0)");
    }

    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let state = Arc::new(AppState::from_config(shutdown));
    start_web_server(port, state).await
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM. Every relay runs under a child
/// token, so this also kills the running extractors.
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => log::info!("Received Ctrl-C"),
        _ = terminate => log::info!("Received SIGTERM"),
    }

    log::info!("Shutting down gracefully...");
    shutdown.cancel();
}

/// `fetchgate info <url>`: one metadata lookup, printed as JSON.
async fn print_metadata(url: &str) -> Result<()> {
    let hosts = HostAllowList::from_config();
    let body = serde_json::json!({ "url": url }).to_string();
    let request = parse_download_request(body.as_bytes(), &hosts)?;

    let process = Launcher::from_config().launch(&request, ExtractionMode::Metadata, "cli")?;
    let record = collect_metadata(process, MetadataLimits::from_config()).await?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// `fetchgate check`: verifies the extractor starts and reports its version.
async fn check_extractor() -> Result<()> {
    let extractor = ExtractorCommand::from_config();
    log_extractor_configuration(&extractor);

    let mut cmd = extractor.command();
    cmd.arg("--version");

    let output = run_with_timeout(&mut cmd, CHECK_TIMEOUT)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run {} --version: {}", extractor.program(), e))?;

    if !output.status.success() {
        anyhow::bail!(
            "{} --version exited with {}: {}",
            extractor.program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    log::info!(
        "✅ {} is working, version {}",
        extractor.program(),
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(())
}
