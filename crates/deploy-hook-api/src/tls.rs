//! TLS certificate provisioning and rustls configuration.
//!
//! Operators normally supply a certificate chain and key. When they do not,
//! a self-signed pair is generated once with `openssl` and reused on later
//! starts.

use crate::errors::TlsError;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

/// File name of the generated certificate.
pub const CERT_FILE_NAME: &str = "webhook-cert.pem";

/// File name of the generated private key.
pub const KEY_FILE_NAME: &str = "webhook-key.pem";

const DEFAULT_SUBJECT: &str = "/C=US/ST=State/L=City/O=TulioCP/CN=localhost";
const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Paths of a PEM certificate chain and its private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificatePair {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl CertificatePair {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// True when both files are present on disk.
    pub fn exists(&self) -> bool {
        self.cert_path.is_file() && self.key_path.is_file()
    }
}

/// Supplies the certificate the listener serves
#[derive(Debug, Clone)]
pub struct TlsProvisioner {
    default_dir: PathBuf,
    openssl_program: String,
    subject: String,
    generation_timeout: Duration,
}

impl TlsProvisioner {
    /// Provisioner that stores generated pairs in `default_dir`.
    pub fn new(default_dir: impl Into<PathBuf>) -> Self {
        Self {
            default_dir: default_dir.into(),
            openssl_program: "openssl".to_string(),
            subject: DEFAULT_SUBJECT.to_string(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_openssl_program(mut self, program: impl Into<String>) -> Self {
        self.openssl_program = program.into();
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_generation_timeout(mut self, timeout: Duration) -> Self {
        self.generation_timeout = timeout;
        self
    }

    /// Location of the generated pair.
    pub fn default_pair(&self) -> CertificatePair {
        CertificatePair::new(
            self.default_dir.join(CERT_FILE_NAME),
            self.default_dir.join(KEY_FILE_NAME),
        )
    }

    /// Resolve the certificate to serve.
    ///
    /// Preference order: both overrides when they exist on disk, then a pair
    /// generated on an earlier run, then a freshly generated self-signed
    /// pair. Returns `None` when none of these is available; the caller
    /// decides whether that is fatal.
    #[instrument(skip(self))]
    pub async fn obtain_certificate(
        &self,
        cert_override: Option<&Path>,
        key_override: Option<&Path>,
    ) -> Option<CertificatePair> {
        if let (Some(cert), Some(key)) = (cert_override, key_override) {
            let pair = CertificatePair::new(cert, key);
            if pair.exists() {
                info!(cert = %pair.cert_path.display(), "Using configured TLS certificate");
                return Some(pair);
            }
            warn!(
                cert = %pair.cert_path.display(),
                key = %pair.key_path.display(),
                "Configured TLS certificate files not found; falling back to self-signed certificate"
            );
        }

        let pair = self.default_pair();
        if pair.exists() {
            info!(cert = %pair.cert_path.display(), "Reusing previously generated certificate");
            return Some(pair);
        }

        match self.generate(&pair).await {
            Ok(()) => {
                info!(cert = %pair.cert_path.display(), "Self-signed certificate generated");
                Some(pair)
            }
            Err(e) => {
                error!(error = %e, "Failed to generate certificate");
                None
            }
        }
    }

    async fn generate(&self, pair: &CertificatePair) -> Result<(), TlsError> {
        info!("Generating self-signed certificate...");

        tokio::fs::create_dir_all(&self.default_dir)
            .await
            .map_err(|source| TlsError::Io {
                path: self.default_dir.display().to_string(),
                source,
            })?;

        let child = Command::new(&self.openssl_program)
            .args(["req", "-x509", "-newkey", "rsa:2048", "-keyout"])
            .arg(&pair.key_path)
            .arg("-out")
            .arg(&pair.cert_path)
            .args(["-days", "365", "-nodes", "-subj", self.subject.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TlsError::Generation {
                message: format!("failed to start {}: {e}", self.openssl_program),
            })?;

        let output = tokio::time::timeout(self.generation_timeout, child.wait_with_output())
            .await
            .map_err(|_| TlsError::GenerationTimedOut {
                seconds: self.generation_timeout.as_secs(),
            })?
            .map_err(|e| TlsError::Generation {
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TlsError::Generation {
                message: format!(
                    "{} exited with {}: {}",
                    self.openssl_program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        set_mode(&pair.key_path, 0o600).await?;
        set_mode(&pair.cert_path, 0o644).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), TlsError> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .map_err(|source| TlsError::Io {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), TlsError> {
    Ok(())
}

/// Build the rustls server configuration for `pair`.
///
/// Accepts TLS 1.2 and 1.3 and advertises HTTP/1.1 via ALPN.
///
/// # Errors
///
/// Returns [`TlsError::Io`] when a file cannot be read and
/// [`TlsError::Certificate`] when the PEM content is unusable.
pub fn load_server_config(pair: &CertificatePair) -> Result<Arc<ServerConfig>, TlsError> {
    let cert_pem = read_pem(&pair.cert_path)?;
    let key_pem = read_pem(&pair.key_path)?;

    let certs = CertificateDer::pem_slice_iter(&cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate {
            message: format!("failed to parse certificates: {e}"),
        })?;
    if certs.is_empty() {
        return Err(TlsError::Certificate {
            message: format!("no certificates found in {}", pair.cert_path.display()),
        });
    }

    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|e| TlsError::Certificate {
        message: format!("failed to parse private key: {e}"),
    })?;

    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
#[path = "tls_tests.rs"]
mod tests;
