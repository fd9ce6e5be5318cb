use std::collections::HashSet;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hookdeploy::{BuildDefinition, DeploymentTarget, StageCommand};

use crate::execute::CommandRunner;

pub fn target(name: &str, build_required: bool) -> DeploymentTarget {
    DeploymentTarget {
        name: name.to_string(),
        repository: name.to_string(),
        branch: String::from("master"),
        build_required,
        verification_required: true,
        build: BuildDefinition::default(),
    }
}

/// Records commands instead of spawning them.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    failing: Arc<HashSet<String>>,
    unspawnable: bool,
    delay: Option<Duration>,
    calls: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    pub max_active: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn failing(commands: &[&str]) -> Self {
        ScriptedRunner {
            failing: Arc::new(commands.iter().map(|cmd| cmd.to_string()).collect()),
            ..Default::default()
        }
    }

    pub fn unspawnable() -> Self {
        ScriptedRunner {
            unspawnable: true,
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        ScriptedRunner {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(
        &self,
        command: &StageCommand,
        dir: &Path,
    ) -> std::io::Result<std::process::Output> {
        let line = command.to_string();
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}: {}", dir.display(), line));
        if self.unspawnable {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file or directory",
            ));
        }
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        let output = if self.failing.contains(&line) {
            std::process::Output {
                status: std::process::ExitStatus::from_raw(1 << 8),
                stdout: Vec::new(),
                stderr: b"fatal: scripted failure\n".to_vec(),
            }
        } else {
            std::process::Output {
                status: std::process::ExitStatus::from_raw(0),
                stdout: format!("ran {}\n", line).into_bytes(),
                stderr: Vec::new(),
            }
        };
        Ok(output)
    }
}
