// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::launcher::WorkerProcessHandle;
use nix::sys::signal::Signal;
use tokio::time::{Duration, timeout};
use tracing::{info, warn};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(90);
const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Send SIGTERM to the worker, wait up to `stop_timeout`, then SIGKILL.
pub async fn stop_worker(worker: &mut WorkerProcessHandle, stop_timeout: Duration) {
    if !worker.has_child() {
        return;
    }
    if let Ok(Some(status)) = worker.try_exit_status() {
        info!(command = %worker.command(), "worker already exited with {status}");
        return;
    }

    info!(command = %worker.command(), "sending SIGTERM");
    worker.send_signal(Signal::SIGTERM);
    if timeout(stop_timeout, worker.wait()).await.is_ok() {
        return;
    }

    warn!(
        command = %worker.command(),
        "stop timeout ({}s) reached, sending SIGKILL",
        stop_timeout.as_secs()
    );
    worker.send_signal(Signal::SIGKILL);
    if timeout(SIGKILL_TIMEOUT, worker.wait()).await.is_err() {
        warn!(command = %worker.command(), "still running after SIGKILL, giving up");
    }
}
