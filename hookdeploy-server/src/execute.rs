use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use hookdeploy::{DeploymentTarget, ExecutionOutcome, Stage, StageCommand};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

/// Runs one external command to completion and captures its output.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn run(
        &self,
        command: &StageCommand,
        dir: &Path,
    ) -> std::io::Result<std::process::Output>;
}

/// Spawns commands as child processes of the server.
///
/// Each command leads its own process group. If the run is abandoned before
/// the command exits, e.g. on timeout, the whole group is killed, so helpers
/// a build script started in the background do not outlive it.
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &StageCommand,
        dir: &Path,
    ) -> std::io::Result<std::process::Output> {
        let mut process = std::process::Command::new(&command.cmd);
        process
            .args(&command.args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut process, 0);
        let child = tokio::process::Command::from(process)
            .kill_on_drop(true)
            .spawn()?;
        let group = ProcessGroup(child.id());
        let output = child.wait_with_output().await;
        group.release();
        output
    }
}

/// Kills the process group it names when dropped, unless released.
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn release(mut self) {
        self.0 = None;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if let Some(id) = self.0.take() {
            debug!("Killing process group {}", id);
            kill_group(id);
        }
    }
}

#[cfg(unix)]
fn kill_group(id: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // ESRCH only means the group is already gone
    if let Err(err) = killpg(Pid::from_raw(id as i32), Signal::SIGKILL) {
        debug!("Could not kill process group {}: {}", id, err);
    }
}

// The leader is still killed by `kill_on_drop`
#[cfg(not(unix))]
fn kill_group(_id: u32) {}

/// Runs the sync and build pipeline of deployment targets.
///
/// Pipelines of one target are serialized: a trigger arriving while the
/// target is busy waits for the running pipeline to finish. Pipelines of
/// different targets run in parallel.
#[derive(Clone)]
pub struct Executor {
    workspace: PathBuf,
    runner: Arc<dyn CommandRunner>,
    stage_timeout: Option<Duration>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Executor {
    pub fn new(
        workspace: impl Into<PathBuf>,
        runner: Arc<dyn CommandRunner>,
        stage_timeout: Option<Duration>,
    ) -> Self {
        Executor {
            workspace: workspace.into(),
            runner,
            stage_timeout,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the pipeline of `target` on its own task and returns immediately.
    pub fn launch(
        &self,
        target: DeploymentTarget,
    ) -> tokio::task::JoinHandle<Vec<ExecutionOutcome>> {
        let executor = self.clone();
        tokio::spawn(async move {
            let outcomes = executor.execute(&target).await;
            match outcomes.iter().find(|outcome| !outcome.succeeded) {
                Some(failed) => error!(
                    "Deployment of {} halted at {} stage: {}",
                    target.name,
                    failed.stage,
                    failed.error.as_deref().unwrap_or("unknown error")
                ),
                None => info!(
                    "Deployment of {} complete ({} stages)",
                    target.name,
                    outcomes.len()
                ),
            }
            outcomes
        })
    }

    pub async fn execute(&self, target: &DeploymentTarget) -> Vec<ExecutionOutcome> {
        let lock = self.target_lock(&target.name).await;
        let _guard = match lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("Pipeline for {} already running, queued", target.name);
                lock.lock().await
            }
        };

        let repository = self.workspace.join(&target.repository);
        let mut outcomes = Vec::new();
        info!("Pulling {} from git", target.repository);
        let sync = self
            .run_stage(Stage::Sync, &sync_command(target), &repository)
            .await;
        let synced = sync.succeeded;
        outcomes.push(sync);
        if !synced {
            warn!("git pull for {} failed, skipping build", target.repository);
            return outcomes;
        }
        if !target.build_required {
            debug!("No build stage for {}", target.name);
            return outcomes;
        }

        info!("Building {}", target.repository);
        let build_dir = repository.join(&target.build.dir);
        for command in &target.build.commands {
            let outcome = self.run_stage(Stage::Build, command, &build_dir).await;
            let is_ok = outcome.succeeded;
            outcomes.push(outcome);
            if !is_ok {
                break;
            }
        }
        outcomes
    }

    async fn target_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    async fn run_stage(
        &self,
        stage: Stage,
        command: &StageCommand,
        dir: &Path,
    ) -> ExecutionOutcome {
        debug!("Running {} stage: {} in {}", stage, command, dir.display());
        let (output, result) = match self.run(command, dir).await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if output.status.success() {
                    if !stderr.is_empty() {
                        debug!("stderr: {}", stderr);
                    }
                    (stdout, Ok(()))
                } else {
                    let status = output.status;
                    (stdout, Err(StageError::Exit { status, stderr }))
                }
            }
            Err(err) => (String::new(), Err(err)),
        };
        let error = match result {
            Ok(()) => {
                info!("{} `{}` succeeded", stage, command);
                if !output.is_empty() {
                    info!("{}", output);
                }
                None
            }
            Err(err) => {
                error!("{} `{}` failed: {}", stage, command, err);
                if !output.is_empty() {
                    warn!("{}", output);
                }
                Some(err.to_string())
            }
        };
        ExecutionOutcome {
            stage,
            command: command.to_string(),
            succeeded: error.is_none(),
            output,
            error,
        }
    }

    async fn run(
        &self,
        command: &StageCommand,
        dir: &Path,
    ) -> Result<std::process::Output, StageError> {
        let running = self.runner.run(command, dir);
        match self.stage_timeout {
            Some(limit) => tokio::time::timeout(limit, running)
                .await
                .map_err(|_| StageError::Timeout(limit))?,
            None => running.await,
        }
        .map_err(StageError::Spawn)
    }
}

fn sync_command(target: &DeploymentTarget) -> StageCommand {
    StageCommand::new("git", &["pull", "origin", target.branch.as_str()])
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("error starting process: {0}")]
    Spawn(std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{status}: {stderr}")]
    Exit {
        status: std::process::ExitStatus,
        stderr: String,
    },
}
