// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::LaunchError;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_SHELL: &str = "/bin/sh";
/// How long a freshly spawned shell is watched for a "command not found" exit.
pub const DEFAULT_LAUNCH_GRACE: Duration = Duration::from_millis(200);

/// POSIX shell exit codes for a command that could not be executed.
const SHELL_NOT_EXECUTABLE: i32 = 126;
const SHELL_NOT_FOUND: i32 = 127;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStatus {
    /// Handle exists, spawn not attempted yet.
    Unstarted,
    /// The OS accepted the spawn request.
    Running,
    /// Spawn was refused by the OS, or the shell could not exec the command.
    Failed,
}

impl fmt::Display for LaunchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchStatus::Unstarted => write!(f, "unstarted"),
            LaunchStatus::Running => write!(f, "running"),
            LaunchStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The spawned worker. stdin/stdout are kept apart from the child so that
/// waiting on the child never closes the pipeline's end of the pipes.
pub struct WorkerProcessHandle {
    command: String,
    status: LaunchStatus,
    pid: Option<u32>,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl WorkerProcessHandle {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            status: LaunchStatus::Unstarted,
            pid: None,
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn status(&self) -> LaunchStatus {
        self.status
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn has_child(&self) -> bool {
        self.child.is_some()
    }

    /// Pipe feeding the worker's standard input.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Pipe carrying the worker's standard output.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    fn attach(&mut self, mut child: Child) {
        self.pid = child.id();
        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        self.child = Some(child);
        self.status = LaunchStatus::Running;
    }

    fn mark_failed(&mut self) {
        self.status = LaunchStatus::Failed;
    }

    /// Wait up to `grace` for the worker to exit. The child stays attached so
    /// a later `wait` still reports the same status.
    async fn exited_within(&mut self, grace: Duration) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        if grace.is_zero() {
            return child.try_wait().ok().flatten();
        }
        match timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                debug!(command = %self.command, error = %e, "wait during launch grace failed");
                None
            }
            Err(_) => None,
        }
    }

    pub fn send_signal(&self, sig: Signal) {
        if let Some(ref child) = self.child
            && let Some(pid) = child.id()
            && let Err(e) = signal::kill(Pid::from_raw(pid as i32), sig)
        {
            warn!(command = %self.command, "failed to send {sig}: {e}");
        }
    }

    /// Wait for the worker to exit.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| std::io::Error::other("no worker process to wait on"))?;
        let status = child.wait().await?;
        info!(command = %self.command, "worker exited with {status}");
        self.child = None;
        Ok(status)
    }

    /// Non-blocking exit check; `None` while the worker is alive.
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.try_wait(),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for WorkerProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcessHandle")
            .field("command", &self.command)
            .field("status", &self.status)
            .field("pid", &self.pid)
            .finish()
    }
}

/// Port for starting the worker without waiting on it.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, command: &str) -> Result<WorkerProcessHandle, LaunchError>;
}

/// How the shell command is executed.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub shell: String,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    /// `inherit` or `null`.
    pub stderr: String,
    /// Window in which a shell exiting 126/127 counts as a launch failure.
    pub launch_grace: Duration,
}

impl Default for LaunchSpec {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            working_dir: None,
            env: HashMap::new(),
            stderr: "inherit".to_string(),
            launch_grace: DEFAULT_LAUNCH_GRACE,
        }
    }
}

/// Runs the command through `<shell> -c`, with stdin/stdout piped. A shell
/// that reports the command as missing or not executable within the launch
/// grace window is a launch failure, not a running worker.
#[derive(Debug, Clone, Default)]
pub struct ShellLauncher {
    spec: LaunchSpec,
}

impl ShellLauncher {
    pub fn new(spec: LaunchSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

#[async_trait]
impl Launcher for ShellLauncher {
    async fn launch(&self, command: &str) -> Result<WorkerProcessHandle, LaunchError> {
        let mut handle = WorkerProcessHandle::new(command);

        let mut cmd = Command::new(&self.spec.shell);
        cmd.arg("-c").arg(command);
        for (k, v) in &self.spec.env {
            cmd.env(k, v);
        }
        if let Some(ref dir) = self.spec.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(stdio_from_str(&self.spec.stderr));
        // A worker that never became ready must not outlive its handle.
        cmd.kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => {
                handle.attach(child);
                info!(
                    pid = handle.pid().unwrap_or(0),
                    command = %command,
                    "spawned shell process"
                );
                if let Some(status) = handle.exited_within(self.spec.launch_grace).await
                    && let Some(source) = exec_failure(&self.spec.shell, status)
                {
                    handle.mark_failed();
                    warn!(command = %command, error = %source, "shell could not run command");
                    return Err(LaunchError {
                        command: command.to_string(),
                        source,
                    });
                }
                Ok(handle)
            }
            Err(source) => {
                handle.mark_failed();
                warn!(command = %command, error = %source, "failed to spawn shell process");
                Err(LaunchError {
                    command: command.to_string(),
                    source,
                })
            }
        }
    }
}

/// Map the shell's "cannot execute" exit codes onto the error the OS would
/// have returned for a direct exec.
fn exec_failure(shell: &str, status: ExitStatus) -> Option<io::Error> {
    let kind = match status.code()? {
        SHELL_NOT_FOUND => io::ErrorKind::NotFound,
        SHELL_NOT_EXECUTABLE => io::ErrorKind::PermissionDenied,
        _ => return None,
    };
    Some(io::Error::new(kind, format!("{shell} exited with {status}")))
}

fn stdio_from_str(s: &str) -> Stdio {
    match s {
        "null" => Stdio::null(),
        _ => Stdio::inherit(),
    }
}
