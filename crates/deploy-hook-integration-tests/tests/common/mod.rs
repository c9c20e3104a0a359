//! Common test utilities for deploy-hook integration tests
//!
//! This module provides:
//! - A build directory populated with shell-script stages
//! - Signed webhook request builders
//! - Response body helpers

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use deploy_hook_api::{create_router, AppState, ServiceConfig, WEBHOOK_PATH};
use deploy_hook_core::{
    signature::{compute_signature, format_signature_header, SIGNATURE_HEADER},
    payload::EVENT_HEADER,
    WebhookSecret,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const SECRET: &str = "integration-secret";
pub const REPOSITORY: &str = "Contaura/tuliocp";
pub const MAIN_REF: &str = "refs/heads/main";

/// Name of the file each stage appends its name to.
pub const STAGE_LOG: &str = "stages.log";

// ============================================================================
// Build directory
// ============================================================================

/// A temporary build directory holding one script per stage.
///
/// Scripts are run through `sh` and append their stage name to
/// [`STAGE_LOG`] before doing anything else.
pub struct BuildDir {
    dir: TempDir,
}

#[allow(dead_code)]
impl BuildDir {
    /// Every stage succeeds.
    pub fn new() -> Self {
        let build = Self {
            dir: TempDir::new().unwrap(),
        };
        build.set_stage("sync", "exit 0");
        build.set_stage("build", "exit 0");
        build.set_stage("deploy", "exit 0");
        build
    }

    /// Replace the body of a stage script.
    pub fn set_stage(&self, stage: &str, body: &str) {
        let script = format!("echo {stage} >> {STAGE_LOG}\n{body}\n");
        std::fs::write(self.script_path(stage), script).unwrap();
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn script_path(&self, stage: &str) -> PathBuf {
        self.dir.path().join(format!("{stage}.sh"))
    }

    /// Stage names in the order they ran.
    pub fn stages_run(&self) -> Vec<String> {
        match std::fs::read_to_string(self.dir.path().join(STAGE_LOG)) {
            Ok(contents) => contents.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Service configuration pointing every stage at this directory.
    pub fn config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.webhook.secret = WebhookSecret::new(SECRET);
        config.webhook.expected_repository = REPOSITORY.to_string();
        config.pipeline.build_path = self.dir.path().to_path_buf();
        config.pipeline.sync.command = Some(vec!["sh".to_string(), "sync.sh".to_string()]);
        config.pipeline.build.command = Some(vec!["sh".to_string(), "build.sh".to_string()]);
        config.pipeline.deploy.command = Some(vec!["sh".to_string(), "deploy.sh".to_string()]);
        config
    }

    /// Router backed by a real [`deploy_hook_core::ScriptPipeline`].
    pub fn router(&self) -> axum::Router {
        self.router_with(self.config())
    }

    pub fn router_with(&self, config: ServiceConfig) -> axum::Router {
        let pipeline = config.pipeline.to_pipeline().unwrap();
        create_router(AppState::new(config, Arc::new(pipeline)))
    }
}

// ============================================================================
// Requests
// ============================================================================

#[allow(dead_code)]
pub fn push_payload(git_ref: &str) -> Vec<u8> {
    json!({
        "ref": git_ref,
        "before": "0000000000000000000000000000000000000000",
        "after": "1111111111111111111111111111111111111111",
        "repository": {
            "full_name": REPOSITORY,
            "name": "tuliocp"
        },
        "pusher": { "name": "octocat" }
    })
    .to_string()
    .into_bytes()
}

/// POST to the webhook path signed with [`SECRET`].
#[allow(dead_code)]
pub fn signed_webhook(event: &str, body: Vec<u8>) -> Request<Body> {
    let signature = format_signature_header(&compute_signature(&body, SECRET.as_bytes()));
    webhook_request(event, Some(&signature), body)
}

/// POST to the webhook path with an arbitrary (or no) signature header.
#[allow(dead_code)]
pub fn webhook_request(event: &str, signature: Option<&str>, body: Vec<u8>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(WEBHOOK_PATH)
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .header(EVENT_HEADER, event);
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body)).unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
