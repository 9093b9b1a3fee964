use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use lambox_core::{FunctionService, LamboxConfig};
use lambox_docker::DockerGateway;
use lambox_server::{AppState, router};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "lambox",
    version,
    about = "lambox: a local Lambda control plane that runs functions in Docker"
)]
struct Cli {
    /// Path to a lambox.toml config file
    #[arg(long, env = "LAMBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Address to serve the Lambda API on
    #[arg(long)]
    listen: Option<String>,

    /// Region used in function ARNs
    #[arg(long)]
    region: Option<String>,

    /// Directory where function code is staged
    #[arg(long)]
    code_dir: Option<PathBuf>,

    /// Docker engine address (unix:// or tcp://)
    #[arg(long)]
    docker_host: Option<String>,

    /// Docker network for function containers
    #[arg(long)]
    network: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn load_config(&self) -> Result<LamboxConfig> {
        let mut config = match &self.config {
            Some(path) => LamboxConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => LamboxConfig::default(),
        };
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(code_dir) = &self.code_dir {
            config.code_dir = code_dir.clone();
        }
        if let Some(host) = &self.docker_host {
            config.docker.host = host.clone();
        }
        if let Some(network) = &self.network {
            config.docker.network = Some(network.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; LAMBOX_LOG takes EnvFilter directives.
    let filter = EnvFilter::try_from_env("LAMBOX_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let config = cli.load_config()?;
    tracing::info!(
        region = %config.region,
        code_dir = %config.code_dir.display(),
        docker_host = %config.docker.host,
        "Starting lambox"
    );

    let gateway = DockerGateway::connect(config.gateway_config())
        .await
        .context("failed to connect to the Docker engine")?;
    let service = Arc::new(FunctionService::from_config(&config, Arc::new(gateway)));

    let shutdown = CancellationToken::new();
    let app = router(AppState {
        service: Arc::clone(&service),
        shutdown: shutdown.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen))?;
    tracing::info!(listen = %listener.local_addr()?, "Lambda API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    tracing::info!("Shutting down, stopping function containers");
    service.close().await?;
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels in-flight requests.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    shutdown.cancel();
}
