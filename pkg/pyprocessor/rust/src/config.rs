// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::deployer::CommandDeployer;
use crate::launcher::{DEFAULT_LAUNCH_GRACE, DEFAULT_SHELL, LaunchSpec};
use crate::probe::{self, PortProbeConfig};
use crate::supervisor::WorkerCommand;
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/datadog-agent/pyprocessor.yaml";
pub const CONFIG_PATH_ENV: &str = "DD_PYPROC_CONFIG";

const DEFAULT_NAME: &str = "python-processor";
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 90;

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_inherit() -> String {
    "inherit".to_string()
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_host() -> String {
    probe::DEFAULT_HOST.to_string()
}

fn default_max_attempts() -> u32 {
    probe::DEFAULT_MAX_ATTEMPTS
}

fn default_retry_delay_ms() -> u64 {
    probe::DEFAULT_RETRY_DELAY.as_millis() as u64
}

fn default_connect_timeout_ms() -> u64 {
    probe::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_launch_grace_ms() -> u64 {
    DEFAULT_LAUNCH_GRACE.as_millis() as u64
}

fn default_stop_timeout() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

#[derive(Debug, Deserialize)]
pub struct ProcessorConfig {
    /// Name used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Shell command that starts the worker.
    pub command: String,
    #[serde(default = "default_shell")]
    pub shell: String,
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_inherit")]
    pub stderr: String,
    /// Milliseconds after spawn in which "command not found" is a launch failure.
    #[serde(default = "default_launch_grace_ms")]
    pub launch_grace_ms: u64,
    pub deploy: Option<DeployConfig>,
    pub tcp: TcpConfig,
    /// Upper bound on the whole startup sequence, in seconds.
    pub startup_timeout: Option<u64>,
    /// Seconds to wait after SIGTERM before SIGKILL.
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeployConfig {
    pub command: String,
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TcpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub monitor_port: u16,
    pub port: u16,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl TcpConfig {
    fn probe_config(&self, port: u16) -> PortProbeConfig {
        PortProbeConfig::new(port)
            .with_host(self.host.clone())
            .with_max_attempts(self.max_attempts)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms))
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            bail!("command must not be empty");
        }
        if self.tcp.monitor_port == 0 || self.tcp.port == 0 {
            bail!("tcp.monitor_port and tcp.port must be in 1..=65535");
        }
        if self.tcp.monitor_port == self.tcp.port {
            bail!(
                "tcp.monitor_port and tcp.port must differ (both {})",
                self.tcp.port
            );
        }
        if self.tcp.max_attempts == 0 {
            bail!("tcp.max_attempts must be at least 1");
        }
        if let Some(ref deploy) = self.deploy
            && deploy.command.trim().is_empty()
        {
            bail!("deploy.command must not be empty");
        }
        Ok(())
    }

    pub fn worker_command(&self) -> WorkerCommand {
        WorkerCommand::new(self.name.clone(), self.command.clone())
    }

    pub fn monitor_probe(&self) -> PortProbeConfig {
        self.tcp.probe_config(self.tcp.monitor_port)
    }

    pub fn data_probe(&self) -> PortProbeConfig {
        self.tcp.probe_config(self.tcp.port)
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            shell: self.shell.clone(),
            working_dir: self.working_dir.clone(),
            env: self.env.clone(),
            stderr: self.stderr.clone(),
            launch_grace: Duration::from_millis(self.launch_grace_ms),
        }
    }

    /// Deploy step run with the worker's shell and environment. The deploy
    /// working directory falls back to the worker's.
    pub fn deployer(&self) -> Option<CommandDeployer> {
        let deploy = self.deploy.as_ref()?;
        let mut deployer = CommandDeployer::new(deploy.command.clone())
            .with_shell(self.shell.clone())
            .with_env(self.env.clone());
        if let Some(dir) = deploy.working_dir.as_ref().or(self.working_dir.as_ref()) {
            deployer = deployer.with_working_dir(dir.clone());
        }
        Some(deployer)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout.map(Duration::from_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout)
    }
}

pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config(path: &Path) -> Result<ProcessorConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: ProcessorConfig =
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(config)
}
