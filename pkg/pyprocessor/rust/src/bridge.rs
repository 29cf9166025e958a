// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Forward newline-delimited messages from `reader` to `writer` until EOF or
/// cancellation, flushing after every message. Messages are passed through as
/// raw bytes, so a line that is not valid UTF-8 is forwarded like any other.
/// A final unterminated message gets a trailing newline. Returns the message
/// count.
pub async fn pump_lines<R, W>(
    name: &str,
    mut reader: R,
    mut writer: W,
    cancel: CancellationToken,
) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::new();
    let mut count = 0u64;

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(pipe = name, count, "pipe cancelled");
                break;
            }
            read = reader.read_until(b'\n', &mut line) => read?,
        };
        if read == 0 {
            debug!(pipe = name, count, "pipe reached EOF");
            break;
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        writer.write_all(&line).await?;
        writer.flush().await?;
        count += 1;
    }

    writer.shutdown().await.ok();
    Ok(count)
}
