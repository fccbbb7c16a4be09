// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for every stage of the relay.

use reqwest::StatusCode;

/// Why a metric line was rejected. The line is dropped, never partially indexed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid prefix line: {0}")]
    InvalidPrefix(String),

    #[error("incorrect metric line: {0}")]
    IncorrectLine(String),

    #[error("invalid tag: {tag} in: {line}")]
    InvalidTag { tag: String, line: String },

    /// A tag or the metric name would overwrite the metric value or the timestamp.
    #[error("conflicting field: {field} in: {line}")]
    FieldConflict { field: String, line: String },
}

/// Flush-level failure of a bulk write. Per-item rejections are not errors.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    #[error("bulk request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("bulk request returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to encode bulk body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode bulk response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("batch sender is not running")]
    Closed,

    #[error(transparent)]
    Backend(#[from] BulkError),
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
