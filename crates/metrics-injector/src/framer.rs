// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reassembly of newline-terminated lines from arbitrary socket reads.
//!
//! A read may end anywhere: between lines, in the middle of a line, or in the
//! middle of a multi-byte character. The framer keeps the unterminated tail
//! of the stream (the remainder) and prefixes it to the next chunk, so the
//! sequence of emitted lines only depends on the bytes received, never on how
//! they were split into reads.

use bytes::BytesMut;

const LINE_SEPARATOR: u8 = b'\n';

/// Per-connection line framer. Owned by exactly one connection worker.
#[derive(Debug, Default)]
pub struct LineFramer {
    remainder: BytesMut,
}

impl LineFramer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one chunk and returns the lines it completes, separator stripped.
    ///
    /// Bytes after the last separator are kept as the new remainder and are
    /// not emitted. An empty chunk returns no lines and leaves the remainder
    /// untouched.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == LINE_SEPARATOR) {
            self.remainder.extend_from_slice(&rest[..pos]);
            let line = self.remainder.split();
            lines.push(String::from_utf8_lossy(&line).into_owned());
            rest = &rest[pos + 1..];
        }

        self.remainder.extend_from_slice(rest);
        lines
    }

    /// Takes the unterminated remainder, if any.
    pub fn drain(&mut self) -> Option<String> {
        if self.remainder.is_empty() {
            return None;
        }
        let tail = self.remainder.split();
        Some(String::from_utf8_lossy(&tail).into_owned())
    }

    /// Number of bytes held waiting for a separator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.remainder.len()
    }
}
