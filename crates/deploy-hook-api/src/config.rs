//! Configuration types for the HTTP service

use crate::errors::ConfigError;
use deploy_hook_core::{PipelineStage, ScriptPipeline, StageCommand, WebhookSecret};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_FILE_ENV: &str = "DEPLOY_HOOK_CONFIG";

/// Prefix for structured environment overrides, e.g. `DH__SERVER__PORT`.
pub const ENV_PREFIX: &str = "DH";

/// Single-name variables honoured for compatibility with existing deployments.
const LEGACY_ENV_OVERRIDES: [(&str, &str); 4] = [
    ("WEBHOOK_SECRET", "webhook.secret"),
    ("WEBHOOK_PORT", "server.port"),
    ("SSL_CERT_FILE", "tls.cert_file"),
    ("SSL_KEY_FILE", "tls.key_file"),
];

/// Service configuration
///
/// Built once at startup and shared read-only between request handlers.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook authentication and acceptance rules
    pub webhook: WebhookConfig,

    /// Build pipeline settings
    pub pipeline: PipelineConfig,

    /// TLS settings
    pub tls: TlsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum accepted request body in bytes
    pub max_payload_bytes: usize,

    /// Time allowed for reading a request body
    pub body_read_timeout_seconds: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            max_payload_bytes: 1024 * 1024, // 1MB
            body_read_timeout_seconds: 30,
            shutdown_timeout_seconds: 30,
        }
    }
}

/// Webhook authentication and acceptance rules
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// HMAC key shared with GitHub
    pub secret: WebhookSecret,

    /// Only pushes to this `owner/name` repository are accepted
    pub expected_repository: String,

    /// Only pushes to this ref are accepted
    pub expected_ref: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: WebhookSecret::default(),
            expected_repository: "Contaura/tuliocp".to_string(),
            expected_ref: "refs/heads/main".to_string(),
        }
    }
}

/// Overrides for one pipeline stage; unset fields use the stage defaults
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Program followed by its arguments
    pub command: Option<Vec<String>>,

    pub timeout_seconds: Option<u64>,
}

/// Built-in command and timeout for each stage.
fn stage_defaults(stage: PipelineStage) -> (&'static [&'static str], u64) {
    match stage {
        PipelineStage::Sync => (&["git", "-C", "tuliocp", "pull", "origin", "main"], 30),
        PipelineStage::Build => (&["./auto-build.sh"], 600),
        PipelineStage::Deploy => (&["./deploy-to-repo.sh"], 120),
    }
}

/// Build pipeline settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Working directory for every stage; holds the checkout and scripts
    pub build_path: PathBuf,

    /// Variables added to every stage's environment
    pub environment: BTreeMap<String, String>,

    pub sync: StageConfig,
    pub build: StageConfig,
    pub deploy: StageConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            build_path: PathBuf::from("/opt/deploy-hook"),
            environment: BTreeMap::from([(
                "DEBIAN_FRONTEND".to_string(),
                "noninteractive".to_string(),
            )]),
            sync: StageConfig::default(),
            build: StageConfig::default(),
            deploy: StageConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn stage(&self, stage: PipelineStage) -> &StageConfig {
        match stage {
            PipelineStage::Sync => &self.sync,
            PipelineStage::Build => &self.build,
            PipelineStage::Deploy => &self.deploy,
        }
    }

    /// Effective argv for `stage`.
    pub fn command_for(&self, stage: PipelineStage) -> Vec<String> {
        match &self.stage(stage).command {
            Some(command) => command.clone(),
            None => stage_defaults(stage)
                .0
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Effective timeout for `stage`.
    pub fn timeout_for(&self, stage: PipelineStage) -> Duration {
        let seconds = self
            .stage(stage)
            .timeout_seconds
            .unwrap_or(stage_defaults(stage).1);
        Duration::from_secs(seconds)
    }

    /// Build the process-backed runner described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a stage has an empty command.
    pub fn to_pipeline(&self) -> Result<ScriptPipeline, ConfigError> {
        Ok(ScriptPipeline::new(
            &self.build_path,
            self.stage_command(PipelineStage::Sync)?,
            self.stage_command(PipelineStage::Build)?,
            self.stage_command(PipelineStage::Deploy)?,
        )
        .with_environment(self.environment.clone()))
    }

    fn stage_command(&self, stage: PipelineStage) -> Result<StageCommand, ConfigError> {
        StageCommand::from_argv(&self.command_for(stage), self.timeout_for(stage)).ok_or_else(
            || ConfigError::Invalid {
                message: format!("pipeline.{stage}.command must not be empty"),
            },
        )
    }
}

/// TLS settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM certificate chain supplied by the operator
    pub cert_file: Option<PathBuf>,

    /// PEM private key supplied by the operator
    pub key_file: Option<PathBuf>,

    /// Where a self-signed pair is generated; defaults to the build path
    pub generated_dir: Option<PathBuf>,

    /// Refuse to start rather than serve plaintext when no certificate is available
    pub required: bool,

    pub handshake_timeout_seconds: u64,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_file: None,
            key_file: None,
            generated_dir: None,
            required: false,
            handshake_timeout_seconds: 10,
        }
    }
}

impl TlsConfig {
    /// Directory holding the generated self-signed pair.
    pub fn certificate_dir<'a>(&'a self, build_path: &'a Path) -> &'a Path {
        self.generated_dir.as_deref().unwrap_or(build_path)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,

    /// Enable JSON structured logging on the console
    pub json_format: bool,

    /// Mirror log lines to an append-only file
    pub file_enabled: bool,

    /// Log file path; defaults to `webhook.log` in the build path
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_enabled: true,
            file_path: None,
        }
    }
}

impl LoggingConfig {
    /// Resolved log file location, or `None` when file logging is disabled.
    pub fn file_path(&self, build_path: &Path) -> Option<PathBuf> {
        if !self.file_enabled {
            return None;
        }
        Some(
            self.file_path
                .clone()
                .unwrap_or_else(|| build_path.join("webhook.log")),
        )
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl ServiceConfig {
    /// Load configuration from files and the environment.
    ///
    /// Sources (later sources override earlier ones):
    ///  1. `/etc/deploy-hook/service.yaml`
    ///  2. `./config/service.yaml`
    ///  3. `explicit_path`, which must exist when given
    ///  4. `DH__SECTION__KEY` environment variables
    ///  5. `WEBHOOK_SECRET`, `WEBHOOK_PORT`, `SSL_CERT_FILE`, `SSL_KEY_FILE`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] for unreadable files or values that
    /// cannot be coerced to the expected type.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("/etc/deploy-hook/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            )
            .add_source(
                config::File::with_name("config/service")
                    .required(false)
                    .format(config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        for (variable, key) in LEGACY_ENV_OVERRIDES {
            let value = std::env::var(variable).ok().filter(|v| !v.is_empty());
            builder = builder.set_override_option(key, value)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] or [`ConfigError::Missing`] describing
    /// the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook.secret.is_empty() {
            return Err(ConfigError::Missing {
                key: "webhook.secret".to_string(),
            });
        }

        if self.webhook.expected_repository.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "webhook.expected_repository".to_string(),
            });
        }

        if !self.webhook.expected_ref.starts_with("refs/") {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhook.expected_ref must be a full ref such as refs/heads/main, got '{}'",
                    self.webhook.expected_ref
                ),
            });
        }

        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.server.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_payload_bytes must be greater than zero".to_string(),
            });
        }

        for stage in PipelineStage::ALL {
            if self.pipeline.command_for(stage).is_empty() {
                return Err(ConfigError::Invalid {
                    message: format!("pipeline.{stage}.command must not be empty"),
                });
            }
            if self.pipeline.timeout_for(stage).is_zero() {
                return Err(ConfigError::Invalid {
                    message: format!("pipeline.{stage}.timeout_seconds must be greater than zero"),
                });
            }
        }

        if self.tls.cert_file.is_some() != self.tls.key_file.is_some() {
            return Err(ConfigError::Invalid {
                message: "tls.cert_file and tls.key_file must be set together".to_string(),
            });
        }

        Ok(())
    }

    pub fn body_read_timeout(&self) -> Duration {
        Duration::from_secs(self.server.body_read_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_seconds)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
