//! # Deploy-Hook Service
//!
//! Binary entry point for the deploy-hook webhook receiver.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes console and file logging
//! - Checks the build directory and builds the pipeline runner
//! - Provisions a TLS certificate
//! - Starts the HTTPS server from deploy-hook-api

mod logging;

use clap::Parser;
use deploy_hook_api::{
    load_server_config, start_server, LoggingConfig, ServiceConfig, ServiceError, TlsError,
    TlsProvisioner, HEALTH_PATH, WEBHOOK_PATH,
};
use deploy_hook_core::PipelineRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "deploy-hook")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Receives GitHub push webhooks and runs the build and deploy scripts")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DEPLOY_HOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("deploy-hook failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), ServiceError> {
    // -------------------------------------------------------------------------
    // Load configuration
    //
    // Logging depends on configuration, so a failed load still initializes
    // console logging before the error is reported.
    // -------------------------------------------------------------------------
    let loaded = ServiceConfig::load(cli.config.as_deref());

    let log_file = match &loaded {
        Ok(config) => logging::init(&config.logging, &config.pipeline.build_path),
        Err(_) => {
            let console_only = LoggingConfig {
                file_enabled: false,
                ..LoggingConfig::default()
            };
            logging::init(&console_only, &PathBuf::new())
        }
    };

    let config = loaded?;
    config.validate()?;

    if cli.check_config {
        info!("Configuration is valid");
        return Ok(());
    }

    info!("Starting deploy-hook service");

    if config.webhook.secret.is_placeholder() {
        warn!("Using default webhook secret - CHANGE THIS IN PRODUCTION!");
    }

    let build_path = &config.pipeline.build_path;
    if !build_path.is_dir() {
        return Err(ServiceError::BuildDirectoryMissing {
            path: build_path.display().to_string(),
        });
    }

    let pipeline: Arc<dyn PipelineRunner> = Arc::new(config.pipeline.to_pipeline()?);

    let tls = resolve_tls(&config).await?;

    let scheme = if tls.is_some() { "https" } else { "http" };
    info!(
        host = %config.server.host,
        port = config.server.port,
        tls = tls.is_some(),
        "Starting HTTP server"
    );
    info!(
        "Webhook URL: {}://<server>:{}{}",
        scheme, config.server.port, WEBHOOK_PATH
    );
    info!(
        "Health check: {}://<server>:{}{}",
        scheme, config.server.port, HEALTH_PATH
    );
    match &log_file {
        Some(path) => info!("Logs: {}", path.display()),
        None => info!("Logs: console only"),
    }

    start_server(config, pipeline, tls).await
}

/// Obtain the certificate and apply the `tls.required` policy.
async fn resolve_tls(
    config: &ServiceConfig,
) -> Result<Option<Arc<rustls::ServerConfig>>, ServiceError> {
    let provisioner =
        TlsProvisioner::new(config.tls.certificate_dir(&config.pipeline.build_path));

    let pair = provisioner
        .obtain_certificate(
            config.tls.cert_file.as_deref(),
            config.tls.key_file.as_deref(),
        )
        .await;

    let outcome = match pair {
        Some(pair) => load_server_config(&pair).map(Some),
        None => Err(TlsError::Generation {
            message: "no certificate available".to_string(),
        }),
    };

    match outcome {
        Ok(tls) => Ok(tls),
        Err(e) if config.tls.required => Err(e.into()),
        Err(e) => {
            warn!(error = %e, "Running without TLS (NOT RECOMMENDED for production)");
            Ok(None)
        }
    }
}
