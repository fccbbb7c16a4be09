// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_HOST: &str = "0.0.0.0";

pub const DEFAULT_PORT: u16 = 8888;

pub const DEFAULT_INDEX: &str = "test-metrics";

/// Number of buffered documents above which a push triggers a flush.
pub const DEFAULT_BUFFER_SIZE: usize = 500;

/// Seconds since the last flush above which a push triggers a flush.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 60;

pub const DEFAULT_ES_URL: &str = "http://localhost:9200";

pub const DEFAULT_ES_TIMEOUT_SECS: u64 = 10;

/// Max documents per `_bulk` request.
pub const DEFAULT_BULK_CHUNK_SIZE: usize = 500;

pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Prefix token of OpenTSDB telnet-style lines.
pub const PUT_PREFIX: &str = "put";

/// Line a producer sends to ask for the relay version.
pub const VERSION_COMMAND: &str = "version";

// Bytes requested per socket read
pub const READ_BUFFER_SIZE: usize = 8192;

/// How often an idle sender re-checks the time threshold.
pub const IDLE_FLUSH_CHECK_INTERVAL: Duration = Duration::from_secs(1);
