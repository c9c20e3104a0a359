//! The sync → build → deploy pipeline.
//!
//! Each stage is an external command run in the configured build directory
//! with a fixed environment override and its own timeout. Stages run strictly
//! in order and the pipeline stops at the first failure. There is no retry
//! and no rollback; the next push triggers a fresh run.
//!
//! Only the exit status and captured standard error of a stage are
//! interpreted. On unix each stage runs in its own process group; a stage that
//! overruns its timeout has the whole group killed and is reaped before the
//! pipeline reports the failure.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Maximum number of characters of stage error output kept in a failure message.
pub const MAX_ERROR_CHARS: usize = 2000;

/// Summary reported when every stage succeeds.
pub const SUCCESS_MESSAGE: &str = "Build and deployment completed successfully";

/// How long output is still collected after a stage has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Stages and results
// ============================================================================

/// One step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    /// Update the local checkout to the branch tip
    Sync,
    /// Run the build script
    Build,
    /// Run the deploy script
    Deploy,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [PipelineStage; 3] = [Self::Sync, Self::Build, Self::Deploy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Build => "build",
            Self::Deploy => "deploy",
        }
    }

    /// Human-readable name used in failure messages.
    fn label(&self) -> &'static str {
        match self {
            Self::Sync => "Repository update",
            Self::Build => "Build process",
            Self::Deploy => "Deployment",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    Success { message: String },
    Failure { stage: PipelineStage, message: String },
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message } | Self::Failure { message, .. } => message,
        }
    }

    /// Stage that failed, if any.
    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { stage, .. } => Some(*stage),
        }
    }
}

/// Why a single stage failed.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("exited with {status}: {stderr}")]
    NonZeroExit { status: ExitStatus, stderr: String },

    #[error("timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },
}

impl StageError {
    /// Message reported to the caller for a failure of `stage`.
    pub fn describe(&self, stage: PipelineStage) -> String {
        let label = stage.label();
        match self {
            Self::NonZeroExit { status, stderr } => {
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    format!("{label} failed: exited with {status}")
                } else {
                    format!("{label} failed: {}", truncate_tail(stderr, MAX_ERROR_CHARS))
                }
            }
            Self::TimedOut { after } => format!("{label} timed out after {}s", after.as_secs()),
            other => format!("{label} failed: {other}"),
        }
    }
}

// ============================================================================
// Stage commands
// ============================================================================

/// A fixed argument list plus timeout for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl StageCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from an argv-style list. Returns `None` for an empty list.
    pub fn from_argv(argv: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), timeout))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve the program against the working directory.
    ///
    /// Relative paths containing a separator (`./deploy.sh`, `bin/build`) are
    /// joined onto `working_dir`; bare names are left for `PATH` lookup.
    pub fn resolve_program(&self, working_dir: &Path) -> PathBuf {
        let program = Path::new(&self.program);
        if program.is_relative() && self.program.contains('/') {
            working_dir.join(program)
        } else {
            program.to_path_buf()
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Executes the pipeline.
///
/// The HTTP layer depends on this trait rather than on [`ScriptPipeline`]
/// so it can be exercised without spawning processes.
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Run all stages in order, stopping at the first failure.
    async fn run(&self) -> PipelineResult;
}

/// Runs each stage as a child process.
///
/// Runs are serialized: a second call waits until the first has finished so
/// two deliveries never operate on the shared checkout at the same time.
pub struct ScriptPipeline {
    working_dir: PathBuf,
    environment: BTreeMap<String, String>,
    sync: StageCommand,
    build: StageCommand,
    deploy: StageCommand,
    run_lock: Mutex<()>,
}

impl ScriptPipeline {
    pub fn new(
        working_dir: impl Into<PathBuf>,
        sync: StageCommand,
        build: StageCommand,
        deploy: StageCommand,
    ) -> Self {
        Self {
            working_dir: working_dir.into(),
            environment: BTreeMap::new(),
            sync,
            build,
            deploy,
            run_lock: Mutex::new(()),
        }
    }

    /// Variables set on every stage in addition to the inherited environment.
    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn command(&self, stage: PipelineStage) -> &StageCommand {
        match stage {
            PipelineStage::Sync => &self.sync,
            PipelineStage::Build => &self.build,
            PipelineStage::Deploy => &self.deploy,
        }
    }

    #[instrument(skip(self), fields(stage = %stage))]
    async fn execute_stage(&self, stage: PipelineStage) -> Result<(), StageError> {
        let command = self.command(stage);
        let program = command.resolve_program(&self.working_dir);

        let mut builder = Command::new(&program);
        builder
            .args(command.args())
            .current_dir(&self.working_dir)
            .envs(&self.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group so a timeout can take down everything the stage started.
        #[cfg(unix)]
        builder.process_group(0);

        let mut child = builder.spawn().map_err(|source| StageError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        let status = {
            let output = read_output(stdout_pipe, stderr_pipe, &mut stdout, &mut stderr);
            tokio::pin!(output);
            let mut output_closed = false;

            let waited = tokio::time::timeout(command.timeout(), async {
                loop {
                    tokio::select! {
                        status = child.wait() => break status,
                        () = &mut output, if !output_closed => output_closed = true,
                    }
                }
            })
            .await;

            let status = match waited {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => return Err(StageError::Wait(e)),
                Err(_) => {
                    terminate(&mut child).await;
                    return Err(StageError::TimedOut {
                        after: command.timeout(),
                    });
                }
            };

            // A background process started by the stage may keep the pipes open.
            if !output_closed
                && tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut output)
                    .await
                    .is_err()
            {
                debug!("Stage output still open after exit; keeping what was read");
            }
            status
        };

        debug!(
            stdout_bytes = stdout.len(),
            stderr_bytes = stderr.len(),
            "Stage process exited"
        );
        if status.success() {
            Ok(())
        } else {
            Err(StageError::NonZeroExit {
                status,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        }
    }
}

impl fmt::Debug for ScriptPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptPipeline")
            .field("working_dir", &self.working_dir)
            .field("environment", &self.environment)
            .field("sync", &self.sync)
            .field("build", &self.build)
            .field("deploy", &self.deploy)
            .finish()
    }
}

#[async_trait]
impl PipelineRunner for ScriptPipeline {
    async fn run(&self) -> PipelineResult {
        let _guard = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Another pipeline run is in progress; waiting for it to finish");
                self.run_lock.lock().await
            }
        };

        info!(working_dir = %self.working_dir.display(), "Starting build pipeline");
        let started = Instant::now();

        for stage in PipelineStage::ALL {
            let stage_started = Instant::now();
            info!(stage = %stage, "Starting pipeline stage");

            if let Err(e) = self.execute_stage(stage).await {
                let message = e.describe(stage);
                error!(
                    stage = %stage,
                    error = %message,
                    duration_ms = stage_started.elapsed().as_millis() as u64,
                    "Pipeline stage failed"
                );
                return PipelineResult::Failure { stage, message };
            }

            info!(
                stage = %stage,
                duration_ms = stage_started.elapsed().as_millis() as u64,
                "Pipeline stage completed"
            );
        }

        info!(
            duration_ms = started.elapsed().as_millis() as u64,
            "Build and deployment completed successfully"
        );
        PipelineResult::Success {
            message: SUCCESS_MESSAGE.to_string(),
        }
    }
}

// ============================================================================
// Private helpers
// ============================================================================

async fn read_output(
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    stdout_buf: &mut Vec<u8>,
    stderr_buf: &mut Vec<u8>,
) {
    tokio::join!(read_pipe(stdout, stdout_buf), read_pipe(stderr, stderr_buf));
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>, buffer: &mut Vec<u8>) {
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(buffer).await {
            debug!(error = %e, "Failed to read stage output");
        }
    }
}

/// Kill the stage's process group, then the child itself, and reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        #[allow(clippy::cast_possible_wrap)]
        let group = Pid::from_raw(pid as i32);
        if let Err(e) = killpg(group, Signal::SIGKILL) {
            warn!(pid, error = %e, "Failed to kill stage process group");
        }
    }

    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill timed-out stage process");
    }
}

/// Keep the last `max_chars` characters of `text`, marking the cut with `...`.
pub(crate) fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let tail: String = text.chars().skip(count - max_chars).collect();
    format!("...{tail}")
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
