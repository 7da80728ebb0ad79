//! GameSync Server - central sequencing ledger
//!
//! Assigns the global cloud sequence to journal entries pushed by devices
//! and hands back everything they have not seen yet.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use gamesync_core::config::PURGE_SECRET_ENV;
use gamesync_server::{LedgerService, MAX_BODY_SIZE, handle_request, json_error};
use http_body_util::{BodyExt, Full, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "gamesync-server")]
#[command(author = "GameSync Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Sequencing ledger for gamesync devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the server
    Start {
        /// Listen address (e.g., 0.0.0.0:8480)
        #[arg(short, long, default_value = "0.0.0.0:8480")]
        addr: String,

        /// Directory holding the ledger file
        #[arg(short, long, default_value = "./data/ledger")]
        data_dir: PathBuf,

        /// Shared secret for purge requests (purge is disabled without one)
        #[arg(long)]
        secret: Option<String>,

        /// Enable debug logging
        #[arg(long)]
        debug: bool,
    },

    /// Print the ledger summary without serving
    Inspect {
        /// Directory holding the ledger file
        #[arg(short, long, default_value = "./data/ledger")]
        data_dir: PathBuf,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            addr,
            data_dir,
            secret,
            debug,
        } => {
            init_tracing(debug);

            let secret = secret.or_else(|| std::env::var(PURGE_SECRET_ENV).ok());
            let service = LedgerService::open(&data_dir, secret.clone())
                .with_context(|| format!("Failed to open ledger in {}", data_dir.display()))?;
            let summary = service.info().await;
            info!(
                "Ledger at {} holds {} entries from {} installations",
                data_dir.display(),
                summary.head_seq,
                summary.installations
            );
            if secret.is_none() {
                info!("No purge secret configured; POST /purge is disabled");
            }

            let service = Arc::new(service);
            let addr: SocketAddr = addr.parse()?;
            let listener = TcpListener::bind(addr).await?;
            info!("Server listening on {}", addr);

            loop {
                let (stream, peer) = listener.accept().await?;
                let service = service.clone();
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(
                            io,
                            service_fn(move |req| serve(req, service.clone())),
                        )
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", peer, e);
                    }
                });
            }
        }

        Commands::Inspect { data_dir } => {
            let service = LedgerService::open(&data_dir, None)
                .with_context(|| format!("Failed to open ledger in {}", data_dir.display()))?;
            let summary = service.info().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

/// Collect the body and hand the request to the dispatcher.
async fn serve(
    req: Request<hyper::body::Incoming>,
    service: Arc<LedgerService>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();
    debug!("Request: {} {}", method, path);

    let body = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Failed to read body of {} {}: {}", method, path, e);
            return Ok(json_error(413, "Request body unreadable or too large"));
        }
    };

    let response = handle_request(&path, &method, &body, &service).await;
    info!("{} {} -> {}", method, path, response.status());
    Ok(response)
}
