// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Metrics Injector
//!
//! A small relay that accepts line-delimited metric datapoints from many TCP
//! producers, parses each line into a document and forwards the documents to
//! Elasticsearch in bulk requests.
//!
//! ```text
//! socket bytes -> LineFramer -> lines -> MetricParser -> documents
//!              -> BatchSender buffer -> (threshold) -> bulk write
//! ```
//!
//! - [`framer`]: reassembles lines split across reads
//! - [`parser`]: turns one line into a [`document::ParsedDocument`]
//! - [`sender`]: buffers documents and owns the flush policy
//! - [`worker`] / [`server`]: connection handling
//! - [`bulk`]: the backend contract and the Elasticsearch implementation

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod bulk;
pub mod config;
pub mod constants;
pub mod document;
pub mod errors;
pub mod framer;
pub mod logger;
pub mod parser;
pub mod sender;
pub mod server;
pub mod worker;

/// Version string answered to the `version` command.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
