use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use chess_agent::config::{BackendKind, Config};
use chess_agent::inference::build_backend;
use chess_agent::logging::init_logging;
use chess_agent::server::{AppState, serve};

#[derive(Parser, Debug)]
#[command(name = "chess-agent")]
#[command(version, about = "Serve a language model as a chess agent that always plays a legal move")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model identifier: ONNX path or URL (local), served model name (remote)
    #[arg(long)]
    model: Option<String>,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Backend {
    Local,
    Remote,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(model) = self.model {
            config.model.id = model;
        }
        if let Some(backend) = self.backend {
            config.model.backend = match backend {
                Backend::Local => BackendKind::Local,
                Backend::Remote => BackendKind::Remote,
            };
        }
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref()).context("loading configuration")?;
    args.apply(&mut config);
    config.validate()?;

    init_logging(&config.server.log_level).context("installing log subscriber")?;
    info!(model = %config.model.id, backend = ?config.model.backend, "starting");

    // Weights are loaded, and downloaded if needed, before the runtime
    // exists; a failure here ends the process with a non-zero status.
    let backend = build_backend(&config.model)
        .inspect_err(|e| error!(error = %e, "model failed to load"))
        .with_context(|| format!("loading model {}", config.model.id))?;
    let state = Arc::new(AppState::from_config(backend, &config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    runtime.block_on(async {
        let addr = config.server.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        serve(listener, state, shutdown_signal()).await?;
        info!("shut down cleanly");
        Ok::<_, anyhow::Error>(())
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
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
    info!("shutdown requested");
}
