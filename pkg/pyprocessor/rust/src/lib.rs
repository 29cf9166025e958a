// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Stream processor that forks an external (Python) worker, pipes messages
//! to and from it over stdin/stdout, and admits it into the pipeline only once
//! its monitor and data ports accept TCP connections.

pub mod bridge;
pub mod config;
pub mod deployer;
pub mod error;
pub mod launcher;
pub mod probe;
pub mod receiver;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use error::{DeployError, LaunchError, SupervisorError};
pub use launcher::{LaunchStatus, WorkerProcessHandle};
pub use probe::{PortProbeConfig, PortRole, ProbeResult, probe};
pub use state::SupervisorState;
pub use supervisor::{ReadinessSupervisor, WorkerCommand};
