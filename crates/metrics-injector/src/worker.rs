// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-connection read loop.
//!
//! A worker owns one stream and one [`LineFramer`]. Each read is framed into
//! lines which are pushed to the shared batch sender in arrival order. A
//! `version` line is answered on the same stream instead of being parsed.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::{READ_BUFFER_SIZE, VERSION_COMMAND};
use crate::errors::SenderError;
use crate::framer::LineFramer;
use crate::sender::BatchSenderHandle;
use crate::VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Reading,
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub bytes_read: usize,
    pub lines: usize,
    pub accepted: usize,
    pub rejected: usize,
}

pub struct ConnectionWorker<S> {
    stream: S,
    peer: String,
    framer: LineFramer,
    sender: BatchSenderHandle,
    state: ConnectionState,
    stats: WorkerStats,
}

impl<S> ConnectionWorker<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: impl Into<String>, sender: BatchSenderHandle) -> Self {
        Self {
            stream,
            peer: peer.into(),
            framer: LineFramer::new(),
            sender,
            state: ConnectionState::Open,
            stats: WorkerStats::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reads until end of stream, a read error, cancellation or a stopped
    /// sender. An unterminated trailing line is discarded. The worker is
    /// left in [`ConnectionState::Closed`].
    pub async fn run(&mut self, cancel: CancellationToken) -> WorkerStats {
        info!(peer = %self.peer, "Connection opened");
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Connection {} cancelled", self.peer);
                    break;
                }
                read = self.stream.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = buf.split();
                    if let Err(e) = self.handle_chunk(&chunk).await {
                        warn!("Dropping connection {}: {e}", self.peer);
                        break;
                    }
                }
                Err(e) if is_connection_reset(&e) => {
                    debug!("Connection {} reset: {e}", self.peer);
                    break;
                }
                Err(e) => {
                    warn!("Failed to read from {}: {e}", self.peer);
                    break;
                }
            }
        }

        if let Some(rest) = self.framer.drain() {
            debug!(
                "Discarding {} unterminated bytes from {}: {rest}",
                rest.len(),
                self.peer
            );
        }
        let _ = self.stream.shutdown().await;
        self.state = ConnectionState::Closed;
        info!(
            peer = %self.peer,
            lines = self.stats.lines,
            accepted = self.stats.accepted,
            rejected = self.stats.rejected,
            "Connection closed"
        );
        self.stats
    }

    async fn handle_chunk(&mut self, chunk: &[u8]) -> Result<(), SenderError> {
        self.state = ConnectionState::Reading;
        self.stats.bytes_read += chunk.len();
        let lines = self.framer.feed(chunk);
        self.handle_lines(lines).await
    }

    async fn handle_lines(&mut self, lines: Vec<String>) -> Result<(), SenderError> {
        if lines.is_empty() {
            return Ok(());
        }
        self.stats.lines += lines.len();

        let mut metrics = Vec::with_capacity(lines.len());
        for line in lines {
            if line.trim_end_matches('\r') == VERSION_COMMAND {
                self.reply_version().await;
            } else {
                metrics.push(line);
            }
        }

        if metrics.is_empty() {
            return Ok(());
        }
        let report = self.sender.push(metrics, &self.peer).await?;
        self.stats.accepted += report.accepted;
        self.stats.rejected += report.rejected;
        Ok(())
    }

    async fn reply_version(&mut self) {
        let reply = format!("{VERSION}\n");
        if let Err(e) = self.stream.write_all(reply.as_bytes()).await {
            debug!("Failed to answer version to {}: {e}", self.peer);
            return;
        }
        let _ = self.stream.flush().await;
    }
}

fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}
