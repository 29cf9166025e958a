// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Errors surfaced by the readiness supervisor and its collaborators.

use crate::probe::PortRole;
use thiserror::Error;

/// The deployment step that prepares the worker app failed.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("deploy command `{command}` could not be run")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("deploy command `{command}` exited with {status}")]
    CommandFailed { command: String, status: String },

    #[error("deploy failed: {0}")]
    Other(String),
}

/// The worker command could not be spawned at all.
#[derive(Debug, Error)]
#[error("failed to launch shell process `{command}`")]
pub struct LaunchError {
    pub command: String,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(
        "unable to connect to shell process `{command}`: {role} port {host}:{port} unreachable after {attempts} attempt(s)"
    )]
    ProbeUnreachable {
        command: String,
        role: PortRole,
        host: String,
        port: u16,
        attempts: u32,
    },

    #[error("shell process `{command}` exited before becoming ready ({status})")]
    WorkerExited { command: String, status: String },

    #[error("failed to start {receiver} receiver for shell process `{command}`")]
    Receiver {
        command: String,
        receiver: String,
        #[source]
        source: std::io::Error,
    },

    #[error("startup of shell process `{command}` was cancelled")]
    Cancelled { command: String },

    #[error("supervisor already ran (state: {0})")]
    AlreadyRun(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SupervisorError {
    /// Port role that failed its probe, if this is a probe failure.
    pub fn unreachable_role(&self) -> Option<PortRole> {
        match self {
            SupervisorError::ProbeUnreachable { role, .. } => Some(*role),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
