// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use anyhow::{Context, Result};
use clap::Parser;
use dd_pyprocessor::bridge::pump_lines;
use dd_pyprocessor::config::{self, ProcessorConfig};
use dd_pyprocessor::launcher::ShellLauncher;
use dd_pyprocessor::receiver::{NoopReceiver, TcpLineReceiver};
use dd_pyprocessor::shutdown::stop_worker;
use dd_pyprocessor::supervisor::ReadinessSupervisor;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MONITOR_CHANNEL_CAPACITY: usize = 64;

/// Python stream processor
#[derive(Parser, Debug)]
#[command(name = "dd-pyprocessor")]
#[command(about = "Fork a Python worker and pipe stream messages through it")]
struct Args {
    /// Path to the processor YAML config (falls back to $DD_PYPROC_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries the data stream, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to build runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(run(args));
    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_background();

    match result {
        Ok(()) => {
            info!("dd-pyprocessor stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!(
        "dd-pyprocessor starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let path = args.config.unwrap_or_else(config::config_path);
    let cfg = config::load_config(&path)?;
    info!(
        config = %path.display(),
        worker = %cfg.name,
        monitor_port = cfg.tcp.monitor_port,
        port = cfg.tcp.port,
        "loaded processor config"
    );

    let shutdown = CancellationToken::new();
    watch_signals(shutdown.clone())?;

    let (monitor_tx, monitor_rx) = mpsc::channel(MONITOR_CHANNEL_CAPACITY);
    tokio::spawn(log_monitor_messages(cfg.name.clone(), monitor_rx));
    let monitor = Arc::new(TcpLineReceiver::new(
        "monitor",
        cfg.monitor_probe().addr(),
        monitor_tx,
        shutdown.child_token(),
    ));

    let mut supervisor = build_supervisor(&cfg, monitor.clone());

    let startup = shutdown.child_token();
    let startup_timer = cfg.startup_timeout().map(|limit| {
        let startup = startup.clone();
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            warn!("startup timeout ({}s) reached", limit.as_secs());
            startup.cancel();
        })
    });

    let result = supervisor.run(&startup).await;
    if let Some(timer) = startup_timer {
        timer.abort();
    }
    let mut worker = match result {
        Ok(worker) => worker,
        Err(e) if shutdown.is_cancelled() => {
            info!("shutdown requested during startup: {e}");
            return Ok(());
        }
        Err(e) => return Err(e).context("worker startup failed"),
    };

    let worker_stdin = worker
        .take_stdin()
        .context("worker stdin is not piped")?;
    let worker_stdout = worker
        .take_stdout()
        .context("worker stdout is not piped")?;

    let to_worker = tokio::spawn(pump_lines(
        "stdin->worker",
        BufReader::new(tokio::io::stdin()),
        worker_stdin,
        shutdown.child_token(),
    ));
    let mut from_worker = tokio::spawn(pump_lines(
        "worker->stdout",
        BufReader::new(worker_stdout),
        tokio::io::stdout(),
        shutdown.child_token(),
    ));

    let outcome = tokio::select! {
        _ = shutdown.cancelled() => Ok(()),
        res = &mut from_worker => match res {
            Ok(Ok(count)) => {
                info!(messages = count, "worker closed its output");
                Ok(())
            }
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("forwarding worker output failed")),
            Err(e) => Err(anyhow::Error::new(e).context("worker output task failed")),
        },
    };

    info!("dd-pyprocessor shutting down");
    let forwarded = monitor.stop().await;
    debug!(messages = forwarded, "monitor receiver stopped");
    stop_worker(&mut worker, cfg.stop_timeout()).await;
    to_worker.abort();
    from_worker.abort();
    outcome
}

fn build_supervisor(cfg: &ProcessorConfig, monitor: Arc<TcpLineReceiver>) -> ReadinessSupervisor {
    let mut supervisor = ReadinessSupervisor::new(
        cfg.worker_command(),
        cfg.monitor_probe(),
        cfg.data_probe(),
        Arc::new(NoopReceiver::new("pipeline")),
    )
    .with_launcher(Arc::new(ShellLauncher::new(cfg.launch_spec())))
    .with_monitor_receiver(monitor);

    if let Some(deployer) = cfg.deployer() {
        supervisor = supervisor.with_deployer(Arc::new(deployer));
    }
    supervisor
}

fn watch_signals(shutdown: CancellationToken) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });
    Ok(())
}

async fn log_monitor_messages(worker: String, mut rx: mpsc::Receiver<String>) {
    while let Some(msg) = rx.recv().await {
        debug!(worker = %worker, message = %msg, "monitor message");
    }
}
