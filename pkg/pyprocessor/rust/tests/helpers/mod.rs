// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to a running dd-pyprocessor process.
pub struct ProcessorHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    log_lines: Arc<Mutex<Vec<String>>>,
    output_lines: Arc<Mutex<Vec<String>>>,
    _stdout_thread: std::thread::JoinHandle<()>,
    _stderr_thread: std::thread::JoinHandle<()>,
}

fn collect_lines<R: std::io::Read + Send + 'static>(
    reader: R,
    prefix: &'static str,
    sink: Arc<Mutex<Vec<String>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(l) => {
                    eprintln!("[{prefix}] {l}");
                    sink.lock().unwrap().push(l);
                }
                Err(_) => break,
            }
        }
    })
}

impl ProcessorHandle {
    /// Start the processor with `--config` pointing at the given file.
    pub fn start(config: &Path) -> Self {
        let bin = env!("CARGO_BIN_EXE_dd-pyprocessor");
        let mut child = Command::new(bin)
            .arg("--config")
            .arg(config)
            .env("RUST_LOG", "info")
            .env("NO_COLOR", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("failed to start dd-pyprocessor");

        let stdin = child.stdin.take().expect("failed to capture stdin");
        let stdout = child.stdout.take().expect("failed to capture stdout");
        let stderr = child.stderr.take().expect("failed to capture stderr");
        let log_lines = Arc::new(Mutex::new(Vec::new()));
        let output_lines = Arc::new(Mutex::new(Vec::new()));

        // Logs go to stderr, the data stream to stdout.
        let _stderr_thread = collect_lines(stderr, "processor", Arc::clone(&log_lines));
        let _stdout_thread = collect_lines(stdout, "processor:out", Arc::clone(&output_lines));

        Self {
            child,
            stdin: Some(stdin),
            log_lines,
            output_lines,
            _stdout_thread,
            _stderr_thread,
        }
    }

    fn wait_for(lines: &Mutex<Vec<String>>, pattern: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if lines.lock().unwrap().iter().any(|l| l.contains(pattern)) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Wait until a log line containing `pattern` appears, or timeout.
    pub fn wait_for_log(&self, pattern: &str, timeout: Duration) -> bool {
        Self::wait_for(&self.log_lines, pattern, timeout)
    }

    pub fn wait_for_log_default(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, DEFAULT_TIMEOUT)
    }

    pub fn has_log(&self, pattern: &str) -> bool {
        self.wait_for_log(pattern, Duration::from_secs(0))
    }

    /// Wait until a line on the processor's stdout equals `expected`.
    pub fn wait_for_output(&self, expected: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.output_lines.lock().unwrap().iter().any(|l| l == expected) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Write one message to the processor's stdin.
    pub fn send_line(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin already closed");
        writeln!(stdin, "{line}").expect("failed to write to processor stdin");
        stdin.flush().expect("failed to flush processor stdin");
    }

    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    pub fn send_signal(&self, sig: Signal) {
        let pid = self.child.id() as i32;
        signal::kill(Pid::from_raw(pid), sig).expect("failed to send signal to processor");
    }

    /// Send SIGTERM and wait for the processor to exit.
    pub fn stop(&mut self) -> std::process::ExitStatus {
        self.send_signal(Signal::SIGTERM);
        self.wait_with_timeout(DEFAULT_TIMEOUT)
    }

    /// Wait for the processor to exit within the given timeout, killing it
    /// if it does not.
    pub fn wait_with_timeout(&mut self, timeout: Duration) -> std::process::ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            match self
                .child
                .try_wait()
                .expect("failed to check processor status")
            {
                Some(status) => return status,
                None => {
                    if Instant::now() >= deadline {
                        self.child.kill().ok();
                        return self.child.wait().expect("failed to wait on killed processor");
                    }
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

impl Drop for ProcessorHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A listener standing in for one of the worker's ports.
pub fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A loopback port with nothing listening on it.
pub fn closed_port() -> u16 {
    let (listener, port) = listen();
    drop(listener);
    port
}

/// Write a processor config into `dir` and return its path.
pub fn write_config(dir: &Path, command: &str, monitor_port: u16, port: u16, extra: &str) -> PathBuf {
    let path = dir.join("pyprocessor.yaml");
    let yaml = format!(
        "name: test-worker\ncommand: \"{command}\"\nstderr: \"null\"\nstop_timeout: 5\ntcp:\n  host: 127.0.0.1\n  monitor_port: {monitor_port}\n  port: {port}\n  max_attempts: 2\n  retry_delay_ms: 100\n  connect_timeout_ms: 1000\n{extra}"
    );
    std::fs::write(&path, yaml)
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", path.display()));
    path
}
