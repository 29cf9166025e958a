// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Components admitted into the pipeline once the worker answers its probes.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[async_trait]
pub trait Receiver: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn start(&self) -> std::io::Result<()>;
}

/// Receiver for deployments that consume nothing from the port.
#[derive(Debug, Clone)]
pub struct NoopReceiver {
    name: String,
}

impl NoopReceiver {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Receiver for NoopReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> std::io::Result<()> {
        debug!(receiver = %self.name, "noop receiver started");
        Ok(())
    }
}

/// Connects to a worker port and forwards newline-delimited messages to a
/// channel until the worker closes the connection or the token is cancelled.
pub struct TcpLineReceiver {
    name: String,
    addr: String,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<u64>>>,
}

impl TcpLineReceiver {
    pub fn new(
        name: impl Into<String>,
        addr: impl Into<String>,
        tx: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
            tx,
            cancel,
            task: Mutex::new(None),
        }
    }

    pub fn is_started(&self) -> bool {
        self.task.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Stop reading and return the number of messages forwarded.
    pub async fn stop(&self) -> u64 {
        self.cancel.cancel();
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match task {
            Some(task) => task.await.unwrap_or(0),
            None => 0,
        }
    }
}

#[async_trait]
impl Receiver for TcpLineReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> std::io::Result<()> {
        let stream = TcpStream::connect(&self.addr).await?;
        info!(receiver = %self.name, addr = %self.addr, "receiver connected");

        let name = self.name.clone();
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            let mut forwarded = 0u64;
            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(msg)) => {
                        if tx.send(msg).await.is_err() {
                            debug!(receiver = %name, "downstream channel closed");
                            break;
                        }
                        forwarded += 1;
                    }
                    Ok(None) => {
                        info!(receiver = %name, "worker closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(receiver = %name, error = %e, "read failed");
                        break;
                    }
                }
            }
            debug!(receiver = %name, forwarded, "receiver stopped");
            forwarded
        });

        if let Ok(mut guard) = self.task.lock()
            && let Some(previous) = guard.replace(task)
        {
            previous.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_forwards_lines_until_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"alive\nstatus=ok\n").await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(8);
        let receiver =
            TcpLineReceiver::new("monitor", addr.to_string(), tx, CancellationToken::new());
        receiver.start().await.unwrap();
        assert!(receiver.is_started());

        assert_eq!(rx.recv().await.as_deref(), Some("alive"));
        assert_eq!(rx.recv().await.as_deref(), Some("status=ok"));
        assert_eq!(receiver.stop().await, 2);
    }

    #[tokio::test]
    async fn test_start_fails_when_port_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::channel(1);
        let receiver =
            TcpLineReceiver::new("monitor", addr.to_string(), tx, CancellationToken::new());
        assert!(receiver.start().await.is_err());
        assert!(!receiver.is_started());
    }

    #[tokio::test]
    async fn test_stop_cancels_idle_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            // Hold the connection open without writing.
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            drop(socket);
        });

        let (tx, _rx) = mpsc::channel(1);
        let receiver =
            TcpLineReceiver::new("monitor", addr.to_string(), tx, CancellationToken::new());
        receiver.start().await.unwrap();
        assert_eq!(receiver.stop().await, 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_noop_receiver() {
        let receiver = NoopReceiver::new("data");
        assert_eq!(receiver.name(), "data");
        receiver.start().await.unwrap();
    }
}
