//! Tests for [`ServiceConfig`] defaults, loading and validation.

use super::*;
use serial_test::serial;
use tempfile::TempDir;

fn valid_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhook.secret = WebhookSecret::new("s3cr3t");
    config
}

// ============================================================================
// Defaults
// ============================================================================

mod default_tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServiceConfig::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8443);
        assert_eq!(config.server.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.body_read_timeout(), Duration::from_secs(30));
        assert_eq!(config.webhook.expected_repository, "Contaura/tuliocp");
        assert_eq!(config.webhook.expected_ref, "refs/heads/main");
    }

    #[test]
    fn test_stage_defaults() {
        let pipeline = PipelineConfig::default();

        assert_eq!(
            pipeline.command_for(PipelineStage::Sync),
            ["git", "-C", "tuliocp", "pull", "origin", "main"]
        );
        assert_eq!(pipeline.command_for(PipelineStage::Build), ["./auto-build.sh"]);
        assert_eq!(
            pipeline.command_for(PipelineStage::Deploy),
            ["./deploy-to-repo.sh"]
        );
        assert_eq!(pipeline.timeout_for(PipelineStage::Sync), Duration::from_secs(30));
        assert_eq!(pipeline.timeout_for(PipelineStage::Build), Duration::from_secs(600));
        assert_eq!(pipeline.timeout_for(PipelineStage::Deploy), Duration::from_secs(120));
        assert_eq!(
            pipeline.environment.get("DEBIAN_FRONTEND").map(String::as_str),
            Some("noninteractive")
        );
    }

    #[test]
    fn test_stage_override_keeps_other_default() {
        let mut pipeline = PipelineConfig::default();
        pipeline.build.timeout_seconds = Some(5);

        assert_eq!(pipeline.timeout_for(PipelineStage::Build), Duration::from_secs(5));
        assert_eq!(pipeline.command_for(PipelineStage::Build), ["./auto-build.sh"]);
    }

    #[test]
    fn test_log_file_defaults_to_build_path() {
        let logging = LoggingConfig::default();

        assert_eq!(
            logging.file_path(Path::new("/opt/deploy-hook")),
            Some(PathBuf::from("/opt/deploy-hook/webhook.log"))
        );
    }

    #[test]
    fn test_log_file_disabled() {
        let logging = LoggingConfig {
            file_enabled: false,
            ..LoggingConfig::default()
        };

        assert_eq!(logging.file_path(Path::new("/opt/deploy-hook")), None);
    }

    #[test]
    fn test_certificate_dir_falls_back_to_build_path() {
        let mut tls = TlsConfig::default();
        assert_eq!(tls.certificate_dir(Path::new("/build")), Path::new("/build"));

        tls.generated_dir = Some(PathBuf::from("/etc/deploy-hook/tls"));
        assert_eq!(
            tls.certificate_dir(Path::new("/build")),
            Path::new("/etc/deploy-hook/tls")
        );
    }

    #[test]
    fn test_debug_output_redacts_secret() {
        let config = valid_config();
        let debug = format!("{config:?}");

        assert!(!debug.contains("s3cr3t"), "secret leaked: {debug}");
        assert!(debug.contains("REDACTED"));
    }
}

// ============================================================================
// Validation
// ============================================================================

mod validation_tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_empty_secret_is_missing() {
        let mut config = valid_config();
        config.webhook.secret = WebhookSecret::new("");

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { key }) if key == "webhook.secret"
        ));
    }

    #[test]
    fn test_empty_repository_is_missing() {
        let mut config = valid_config();
        config.webhook.expected_repository = "  ".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing { key }) if key == "webhook.expected_repository"
        ));
    }

    #[test]
    fn test_short_ref_rejected() {
        let mut config = valid_config();
        config.webhook.expected_ref = "main".to_string();

        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = valid_config();
        config.server.port = 0;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_zero_payload_limit_rejected() {
        let mut config = valid_config();
        config.server.max_payload_bytes = 0;

        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_empty_stage_command_rejected() {
        let mut config = valid_config();
        config.pipeline.deploy.command = Some(vec![]);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.deploy.command"), "{err}");
        assert!(config.pipeline.to_pipeline().is_err());
    }

    #[test]
    fn test_zero_stage_timeout_rejected() {
        let mut config = valid_config();
        config.pipeline.sync.timeout_seconds = Some(0);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pipeline.sync.timeout_seconds"), "{err}");
    }

    #[test]
    fn test_cert_without_key_rejected() {
        let mut config = valid_config();
        config.tls.cert_file = Some(PathBuf::from("/etc/ssl/cert.pem"));

        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        config.tls.key_file = Some(PathBuf::from("/etc/ssl/key.pem"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_pipeline_uses_build_path() {
        let mut config = valid_config();
        config.pipeline.build_path = PathBuf::from("/srv/build");

        let pipeline = config.pipeline.to_pipeline().unwrap();

        assert_eq!(pipeline.working_dir(), Path::new("/srv/build"));
        assert_eq!(pipeline.command(PipelineStage::Build).program(), "./auto-build.sh");
        assert_eq!(
            pipeline.command(PipelineStage::Deploy).timeout(),
            Duration::from_secs(120)
        );
    }
}

// ============================================================================
// Loading
// ============================================================================

mod load_tests {
    use super::*;

    const MANAGED_VARIABLES: [&str; 8] = [
        "WEBHOOK_SECRET",
        "WEBHOOK_PORT",
        "SSL_CERT_FILE",
        "SSL_KEY_FILE",
        "DH__SERVER__PORT",
        "DH__WEBHOOK__EXPECTED_REPOSITORY",
        "DH__PIPELINE__BUILD__TIMEOUT_SECONDS",
        "DH__WEBHOOK__SECRET",
    ];

    fn clear_env() {
        for variable in MANAGED_VARIABLES {
            std::env::remove_var(variable);
        }
    }

    fn write_yaml(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("service.yaml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_without_sources_gives_defaults() {
        clear_env();

        let config = ServiceConfig::load(None).unwrap();

        assert_eq!(config.server.port, 8443);
        assert!(config.webhook.secret.is_placeholder());
        assert_eq!(config.webhook.expected_ref, "refs/heads/main");
    }

    #[test]
    #[serial]
    fn test_secret_alone_is_a_valid_configuration() {
        clear_env();
        std::env::set_var("WEBHOOK_SECRET", "from-environment");

        let result = ServiceConfig::load(None);
        clear_env();
        let config = result.unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.webhook.expected_repository, "Contaura/tuliocp");
    }

    #[test]
    #[serial]
    fn test_load_from_explicit_yaml() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = write_yaml(
            &dir,
            r#"
server:
  port: 9443
webhook:
  secret: from-file
  expected_repository: Contaura/tuliocp
pipeline:
  build_path: /srv/build
  build:
    command: ["make", "release"]
"#,
        );

        let config = ServiceConfig::load(Some(&path)).unwrap();

        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.max_payload_bytes, 1024 * 1024);
        assert_eq!(config.webhook.secret, WebhookSecret::new("from-file"));
        assert_eq!(config.webhook.expected_repository, "Contaura/tuliocp");
        assert_eq!(config.pipeline.build_path, PathBuf::from("/srv/build"));
        assert_eq!(config.pipeline.command_for(PipelineStage::Build), ["make", "release"]);
        assert_eq!(config.pipeline.timeout_for(PipelineStage::Build), Duration::from_secs(600));
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_fails() {
        clear_env();
        let dir = TempDir::new().unwrap();

        let result = ServiceConfig::load(Some(&dir.path().join("absent.yaml")));

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    #[serial]
    fn test_prefixed_environment_overrides_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = write_yaml(&dir, "server:\n  port: 9443\n");
        std::env::set_var("DH__SERVER__PORT", "10443");
        std::env::set_var("DH__WEBHOOK__EXPECTED_REPOSITORY", "owner/repo");
        std::env::set_var("DH__PIPELINE__BUILD__TIMEOUT_SECONDS", "45");

        let result = ServiceConfig::load(Some(&path));
        clear_env();
        let config = result.unwrap();

        assert_eq!(config.server.port, 10443);
        assert_eq!(config.webhook.expected_repository, "owner/repo");
        assert_eq!(config.pipeline.timeout_for(PipelineStage::Build), Duration::from_secs(45));
        assert_eq!(config.pipeline.command_for(PipelineStage::Build), ["./auto-build.sh"]);
    }

    #[test]
    #[serial]
    fn test_legacy_variables_take_precedence() {
        clear_env();
        std::env::set_var("DH__SERVER__PORT", "10443");
        std::env::set_var("DH__WEBHOOK__SECRET", "prefixed");
        std::env::set_var("WEBHOOK_PORT", "8444");
        std::env::set_var("WEBHOOK_SECRET", "legacy");
        std::env::set_var("SSL_CERT_FILE", "/etc/ssl/hook.pem");
        std::env::set_var("SSL_KEY_FILE", "/etc/ssl/hook.key");

        let result = ServiceConfig::load(None);
        clear_env();
        let config = result.unwrap();

        assert_eq!(config.server.port, 8444);
        assert_eq!(config.webhook.secret, WebhookSecret::new("legacy"));
        assert_eq!(config.tls.cert_file, Some(PathBuf::from("/etc/ssl/hook.pem")));
        assert_eq!(config.tls.key_file, Some(PathBuf::from("/etc/ssl/hook.key")));
    }

    #[test]
    #[serial]
    fn test_empty_legacy_variable_is_ignored() {
        clear_env();
        std::env::set_var("WEBHOOK_PORT", "");

        let result = ServiceConfig::load(None);
        clear_env();

        assert_eq!(result.unwrap().server.port, 8443);
    }

    #[test]
    #[serial]
    fn test_invalid_port_value_fails_to_load() {
        clear_env();
        std::env::set_var("WEBHOOK_PORT", "not-a-port");

        let result = ServiceConfig::load(None);
        clear_env();

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
