// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! TCP liveness probe with a bounded number of attempts and a fixed delay.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which side of the worker a port belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    /// Control-plane liveness signaling.
    Monitor,
    /// Data-plane message traffic.
    Data,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRole::Monitor => write!(f, "monitor"),
            PortRole::Data => write!(f, "data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProbeConfig {
    pub host: String,
    pub port: u16,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
}

impl PortProbeConfig {
    pub fn new(port: u16) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("probe host must not be empty".to_string());
        }
        if self.port == 0 {
            return Err("probe port must be in 1..=65535".to_string());
        }
        if self.max_attempts == 0 {
            return Err("probe max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Ready,
    Unreachable,
}

impl ProbeResult {
    pub fn is_ready(self) -> bool {
        self == ProbeResult::Ready
    }
}

/// Port for checking that a worker accepts connections.
#[async_trait]
pub trait PortProber: Send + Sync {
    async fn probe(&self, config: &PortProbeConfig, cancel: &CancellationToken) -> ProbeResult;
}

/// Prober that opens (and immediately drops) a real TCP connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

#[async_trait]
impl PortProber for TcpProber {
    async fn probe(&self, config: &PortProbeConfig, cancel: &CancellationToken) -> ProbeResult {
        probe(config, cancel).await
    }
}

/// Try to connect up to `max_attempts` times, sleeping `retry_delay` between
/// failures. Connection errors are never propagated; cancellation yields
/// `Unreachable` without waiting out the remaining budget.
pub async fn probe(config: &PortProbeConfig, cancel: &CancellationToken) -> ProbeResult {
    probe_with(config, cancel, |addr| async move {
        TcpStream::connect(addr).await.map(drop)
    })
    .await
}

/// Attempt loop behind [`probe`]; `connect` makes one connection attempt.
async fn probe_with<F, Fut>(
    config: &PortProbeConfig,
    cancel: &CancellationToken,
    mut connect: F,
) -> ProbeResult
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    let addr = config.addr();

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            info!(addr = %addr, attempt, "probe cancelled");
            return ProbeResult::Unreachable;
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!(addr = %addr, attempt, "probe cancelled during connect");
                return ProbeResult::Unreachable;
            }
            res = timeout(config.connect_timeout, connect(addr.clone())) => res,
        };

        match outcome {
            Ok(Ok(())) => {
                debug!(addr = %addr, attempt, "port is accepting connections");
                return ProbeResult::Ready;
            }
            Ok(Err(e)) => {
                debug!(addr = %addr, attempt, error = %e, "connect failed");
            }
            Err(_) => {
                debug!(
                    addr = %addr,
                    attempt,
                    timeout_ms = config.connect_timeout.as_millis() as u64,
                    "connect timed out"
                );
            }
        }

        if attempt == config.max_attempts {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                info!(addr = %addr, attempt, "probe cancelled while waiting to retry");
                return ProbeResult::Unreachable;
            }
            _ = sleep(config.retry_delay) => {}
        }
    }

    warn!(
        addr = %addr,
        attempts = config.max_attempts,
        "port unreachable, giving up"
    );
    ProbeResult::Unreachable
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;
    use tokio::net::TcpListener;

    /// Connector that refuses the first `failures` attempts and counts them all.
    async fn scripted_probe(config: &PortProbeConfig, failures: u32) -> (ProbeResult, u32) {
        let attempts = AtomicU32::new(0);
        let result = probe_with(config, &CancellationToken::new(), |_addr| {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n > failures {
                    Ok(())
                } else {
                    Err(io::Error::from(io::ErrorKind::ConnectionRefused))
                }
            }
        })
        .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    /// Reserve a port on loopback and release it so nothing is listening.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    fn fast_config(port: u16) -> PortProbeConfig {
        PortProbeConfig::new(port)
            .with_host("127.0.0.1")
            .with_retry_delay(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_secs(1))
    }

    #[test]
    fn test_defaults() {
        let cfg = PortProbeConfig::new(9999);
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.retry_delay, Duration::from_secs(1));
        assert_eq!(cfg.addr(), "localhost:9999");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_port_zero_and_zero_attempts() {
        assert!(PortProbeConfig::new(0).validate().is_err());
        assert!(
            PortProbeConfig::new(80)
                .with_max_attempts(0)
                .validate()
                .is_err()
        );
        assert!(PortProbeConfig::new(80).with_host("").validate().is_err());
    }

    #[test]
    fn test_port_role_display() {
        assert_eq!(PortRole::Monitor.to_string(), "monitor");
        assert_eq!(PortRole::Data.to_string(), "data");
    }

    #[tokio::test]
    async fn test_probe_ready_on_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let result = probe(&fast_config(port), &CancellationToken::new()).await;
        assert_eq!(result, ProbeResult::Ready);
    }

    #[tokio::test]
    async fn test_probe_twice_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cfg = fast_config(port);
        let cancel = CancellationToken::new();

        assert!(probe(&cfg, &cancel).await.is_ready());
        assert!(probe(&cfg, &cancel).await.is_ready());
    }

    #[tokio::test]
    async fn test_probe_unreachable_after_exactly_max_attempts() {
        let cfg = fast_config(9).with_max_attempts(3).with_retry_delay(Duration::from_millis(10));
        let (result, attempts) = scripted_probe(&cfg, u32::MAX).await;
        assert_eq!(result, ProbeResult::Unreachable);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_probe_stops_at_first_success() {
        let cfg = fast_config(9).with_max_attempts(5).with_retry_delay(Duration::from_millis(10));
        let (result, attempts) = scripted_probe(&cfg, 2).await;
        assert_eq!(result, ProbeResult::Ready);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_probe_unreachable_after_all_attempts() {
        let port = closed_port().await;
        let cfg = fast_config(port).with_max_attempts(3);

        let start = Instant::now();
        let result = probe(&cfg, &CancellationToken::new()).await;
        let elapsed = start.elapsed();

        assert_eq!(result, ProbeResult::Unreachable);
        // Two inter-attempt delays, none after the last attempt; a third
        // delay would push this past 300ms.
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_sleep() {
        let port = closed_port().await;
        let cfg = fast_config(port)
            .with_max_attempts(1)
            .with_retry_delay(Duration::from_secs(30));

        let start = Instant::now();
        assert_eq!(
            probe(&cfg, &CancellationToken::new()).await,
            ProbeResult::Unreachable
        );
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_probe_ready_when_port_opens_late() {
        let port = closed_port().await;
        let cfg = fast_config(port)
            .with_max_attempts(20)
            .with_retry_delay(Duration::from_millis(50));

        let accepted = Arc::new(AtomicU32::new(0));
        let counter = accepted.clone();
        let opener = tokio::spawn(async move {
            sleep(Duration::from_millis(200)).await;
            let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
            loop {
                let (_socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let result = probe(&cfg, &CancellationToken::new()).await;
        assert_eq!(result, ProbeResult::Ready);

        // Give the listener time to accept anything else the probe sent.
        sleep(Duration::from_millis(300)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        opener.abort();
    }

    #[tokio::test]
    async fn test_cancellation_aborts_retry_wait() {
        let port = closed_port().await;
        let cfg = fast_config(port)
            .with_max_attempts(10)
            .with_retry_delay(Duration::from_secs(10));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let result = probe(&cfg, &cancel).await;
        assert_eq!(result, ProbeResult::Unreachable);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(
            TcpProber.probe(&fast_config(port), &cancel).await,
            ProbeResult::Unreachable
        );
    }
}
