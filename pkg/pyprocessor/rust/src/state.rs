// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Constructed, `run` not called yet.
    Idle,
    /// Deploying (if configured) and spawning the worker.
    Launching,
    /// Worker spawned, probing the monitor port.
    AwaitingMonitorPort,
    /// Monitor port answered, probing the data port.
    AwaitingDataPort,
    /// Both ports answered; the worker is admitted.
    Ready,
    /// Startup aborted.
    Failed,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SupervisorState::Ready | SupervisorState::Failed)
    }

    pub(crate) fn can_transition_to(self, next: SupervisorState) -> bool {
        use SupervisorState::*;
        matches!(
            (self, next),
            (Idle, Launching)
                | (Launching, AwaitingMonitorPort)
                | (AwaitingMonitorPort, AwaitingDataPort)
                | (AwaitingDataPort, Ready)
                | (Idle, Failed)
                | (Launching, Failed)
                | (AwaitingMonitorPort, Failed)
                | (AwaitingDataPort, Failed)
        )
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Launching => write!(f, "launching"),
            SupervisorState::AwaitingMonitorPort => write!(f, "awaiting_monitor_port"),
            SupervisorState::AwaitingDataPort => write!(f, "awaiting_data_port"),
            SupervisorState::Ready => write!(f, "ready"),
            SupervisorState::Failed => write!(f, "failed"),
        }
    }
}
