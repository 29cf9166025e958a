// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Readiness supervisor
//!
//! Drives one startup sequence: deploy (optional), launch, probe the monitor
//! port, probe the data port, then admit the downstream receiver. Any failure
//! is terminal and returned to the caller; retries only happen inside a
//! single port probe.

use crate::deployer::Deployer;
use crate::error::{Result, SupervisorError};
use crate::launcher::{Launcher, ShellLauncher, WorkerProcessHandle};
use crate::probe::{PortProbeConfig, PortProber, PortRole, ProbeResult, TcpProber};
use crate::receiver::Receiver;
use crate::state::SupervisorState;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The shell command to supervise and the name used for it in logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub command: String,
    pub name: String,
}

impl WorkerCommand {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            name: name.into(),
        }
    }
}

pub struct ReadinessSupervisor {
    command: WorkerCommand,
    monitor: PortProbeConfig,
    data: PortProbeConfig,
    downstream: Arc<dyn Receiver>,
    deployer: Option<Arc<dyn Deployer>>,
    monitor_receiver: Option<Arc<dyn Receiver>>,
    data_receiver: Option<Arc<dyn Receiver>>,
    launcher: Arc<dyn Launcher>,
    prober: Arc<dyn PortProber>,
    state: SupervisorState,
}

impl ReadinessSupervisor {
    pub fn new(
        command: WorkerCommand,
        monitor: PortProbeConfig,
        data: PortProbeConfig,
        downstream: Arc<dyn Receiver>,
    ) -> Self {
        Self {
            command,
            monitor,
            data,
            downstream,
            deployer: None,
            monitor_receiver: None,
            data_receiver: None,
            launcher: Arc::new(ShellLauncher::default()),
            prober: Arc::new(TcpProber),
            state: SupervisorState::Idle,
        }
    }

    pub fn with_deployer(mut self, deployer: Arc<dyn Deployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Started as soon as the monitor port answers, before the data probe.
    pub fn with_monitor_receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.monitor_receiver = Some(receiver);
        self
    }

    /// Started as soon as the data port answers.
    pub fn with_data_receiver(mut self, receiver: Arc<dyn Receiver>) -> Self {
        self.data_receiver = Some(receiver);
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.prober = prober;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    /// Run the startup sequence once. On success the worker handle is
    /// returned to the caller, who owns it from then on.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<WorkerProcessHandle> {
        if self.state != SupervisorState::Idle {
            return Err(SupervisorError::AlreadyRun(self.state.to_string()));
        }

        if let Err(e) = self.validate() {
            self.transition(SupervisorState::Failed);
            return Err(e);
        }

        self.transition(SupervisorState::Launching);
        match self.startup(cancel).await {
            Ok(handle) => {
                info!(
                    worker = %self.command.name,
                    pid = handle.pid().unwrap_or(0),
                    "worker admitted"
                );
                Ok(handle)
            }
            Err(e) => {
                self.transition(SupervisorState::Failed);
                error!(worker = %self.command.name, "startup failed: {e}");
                Err(e)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.command.command.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "worker command must not be empty".to_string(),
            ));
        }
        self.monitor
            .validate()
            .map_err(|e| SupervisorError::InvalidConfig(format!("monitor port: {e}")))?;
        self.data
            .validate()
            .map_err(|e| SupervisorError::InvalidConfig(format!("data port: {e}")))?;
        Ok(())
    }

    async fn startup(&mut self, cancel: &CancellationToken) -> Result<WorkerProcessHandle> {
        match self.deployer.clone() {
            Some(deployer) => {
                deployer.deploy().await?;
                info!(worker = %self.command.name, "deploy finished");
            }
            None => debug!(worker = %self.command.name, "no deployer configured"),
        }
        self.check_cancelled(cancel)?;

        let mut handle = self.launcher.launch(&self.command.command).await?;

        self.transition(SupervisorState::AwaitingMonitorPort);
        self.await_port(PortRole::Monitor, &mut handle, cancel).await?;
        if let Some(receiver) = self.monitor_receiver.clone() {
            self.start_receiver(receiver.as_ref()).await?;
        }

        self.transition(SupervisorState::AwaitingDataPort);
        self.await_port(PortRole::Data, &mut handle, cancel).await?;
        if let Some(receiver) = self.data_receiver.clone() {
            self.start_receiver(receiver.as_ref()).await?;
        }

        let downstream = self.downstream.clone();
        self.start_receiver(downstream.as_ref()).await?;
        self.transition(SupervisorState::Ready);
        Ok(handle)
    }

    /// Probe one port while watching for the worker dying underneath us.
    async fn await_port(
        &self,
        role: PortRole,
        handle: &mut WorkerProcessHandle,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = match role {
            PortRole::Monitor => &self.monitor,
            PortRole::Data => &self.data,
        };
        debug!(
            worker = %self.command.name,
            role = %role,
            addr = %config.addr(),
            max_attempts = config.max_attempts,
            "probing worker port"
        );

        let exited = handle.try_exit_status().map_err(|e| SupervisorError::WorkerExited {
            command: self.command.command.clone(),
            status: e.to_string(),
        })?;
        if let Some(status) = exited {
            return Err(SupervisorError::WorkerExited {
                command: self.command.command.clone(),
                status: status.to_string(),
            });
        }

        let result = tokio::select! {
            result = self.prober.probe(config, cancel) => result,
            status = worker_exit(handle) => {
                let status = match status {
                    Ok(s) => s.to_string(),
                    Err(e) => e.to_string(),
                };
                return Err(SupervisorError::WorkerExited {
                    command: self.command.command.clone(),
                    status,
                });
            }
        };

        match result {
            ProbeResult::Ready => {
                info!(worker = %self.command.name, role = %role, port = config.port, "port ready");
                Ok(())
            }
            ProbeResult::Unreachable if cancel.is_cancelled() => Err(SupervisorError::Cancelled {
                command: self.command.command.clone(),
            }),
            ProbeResult::Unreachable => Err(SupervisorError::ProbeUnreachable {
                command: self.command.command.clone(),
                role,
                host: config.host.clone(),
                port: config.port,
                attempts: config.max_attempts,
            }),
        }
    }

    async fn start_receiver(&self, receiver: &dyn Receiver) -> Result<()> {
        receiver
            .start()
            .await
            .map_err(|source| SupervisorError::Receiver {
                command: self.command.command.clone(),
                receiver: receiver.name().to_string(),
                source,
            })?;
        info!(worker = %self.command.name, receiver = %receiver.name(), "receiver started");
        Ok(())
    }

    fn check_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SupervisorError::Cancelled {
                command: self.command.command.clone(),
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: SupervisorState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "unexpected supervisor transition");
        }
        debug!(worker = %self.command.name, from = %self.state, to = %next, "supervisor state");
        self.state = next;
    }
}

/// Resolves when the worker exits; never resolves for a handle without a
/// child (e.g. one produced by a test launcher).
async fn worker_exit(handle: &mut WorkerProcessHandle) -> std::io::Result<ExitStatus> {
    if !handle.has_child() {
        return std::future::pending().await;
    }
    handle.wait().await
}
