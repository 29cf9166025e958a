// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Optional step that installs or prepares the worker app before launch.

use crate::error::DeployError;
use crate::launcher::DEFAULT_SHELL;
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self) -> Result<(), DeployError>;
}

/// Runs a preparation command (e.g. `pip install -r requirements.txt`) to
/// completion. Its stdout is discarded so it cannot pollute the data stream.
#[derive(Debug, Clone)]
pub struct CommandDeployer {
    command: String,
    shell: String,
    working_dir: Option<String>,
    env: HashMap<String, String>,
}

impl CommandDeployer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: DEFAULT_SHELL.to_string(),
            working_dir: None,
            env: HashMap::new(),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Extra variables, on top of the inherited environment.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn working_dir(&self) -> Option<&str> {
        self.working_dir.as_deref()
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self) -> Result<(), DeployError> {
        info!(command = %self.command, "running deploy command");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&self.command);
        cmd.envs(&self.env);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());

        let status = cmd.status().await.map_err(|source| DeployError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        if !status.success() {
            warn!(command = %self.command, "deploy command exited with {status}");
            return Err(DeployError::CommandFailed {
                command: self.command.clone(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}
