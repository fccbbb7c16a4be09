// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk writes to the document backend.
//!
//! The relay only depends on [`BulkWriter`]: one call carrying many items,
//! answered with a per-item status. [`ElasticsearchWriter`] implements it on
//! top of the `_bulk` endpoint.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::document::BulkItem;
use crate::errors::BulkError;

/// Outcome of one bulk write that reached the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    /// Items the backend accepted.
    pub success: usize,
    /// Items the backend rejected individually.
    pub errors: Vec<BulkItemError>,
}

impl BulkResponse {
    fn merge(&mut self, other: BulkResponse) {
        self.success += other.success;
        self.errors.extend(other.errors);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemError {
    /// Position of the item in the slice handed to [`BulkWriter::bulk`].
    pub position: usize,
    pub status: u16,
    pub reason: String,
}

#[async_trait]
pub trait BulkWriter: Send + Sync {
    /// Writes all items, in order.
    ///
    /// Returns `Err` only when the call as a whole failed (connectivity, HTTP
    /// error status, unreadable answer). Per-item rejections are reported in
    /// [`BulkResponse::errors`].
    async fn bulk(&self, items: &[BulkItem]) -> Result<BulkResponse, BulkError>;
}

#[derive(Debug, Clone)]
pub struct ElasticsearchConfig {
    /// Base URL, e.g. `http://localhost:9200`.
    pub url: String,
    pub timeout: Duration,
    pub chunk_size: usize,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Send the category as `_type` in each action line (pre-7.x clusters).
    pub mapping_types: bool,
    pub https_proxy: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ElasticsearchWriter {
    client: reqwest::Client,
    bulk_url: String,
    config: ElasticsearchConfig,
}

#[derive(Serialize)]
struct Action<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type", skip_serializing_if = "Option::is_none")]
    category: Option<&'a str>,
}

#[derive(Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    items: Vec<RawItem>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(alias = "create", alias = "update", alias = "delete")]
    index: RawItemStatus,
}

#[derive(Deserialize)]
struct RawItemStatus {
    status: u16,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ElasticsearchWriter {
    pub fn new(config: ElasticsearchConfig) -> Result<Self, BulkError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        let client = builder.build()?;
        let bulk_url = format!("{}/_bulk", config.url.trim_end_matches('/'));
        Ok(Self {
            client,
            bulk_url,
            config,
        })
    }

    /// Builds the NDJSON body: an action line then a source line per item,
    /// trailing newline included.
    fn encode(&self, items: &[BulkItem]) -> Result<Vec<u8>, BulkError> {
        let mut body = Vec::new();
        for item in items {
            let action = Action {
                index: ActionMeta {
                    index: &item.index,
                    category: self
                        .config
                        .mapping_types
                        .then_some(item.category.as_str()),
                },
            };
            serde_json::to_writer(&mut body, &action).map_err(BulkError::Encode)?;
            body.push(b'\n');
            serde_json::to_writer(&mut body, &item.document).map_err(BulkError::Encode)?;
            body.push(b'\n');
        }
        Ok(body)
    }

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-ndjson"),
        );
        headers
    }

    async fn send_chunk(&self, items: &[BulkItem], offset: usize) -> Result<BulkResponse, BulkError> {
        let body = self.encode(items)?;
        let mut request = self
            .client
            .post(&self.bulk_url)
            .headers(Self::headers())
            .body(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BulkError::Status { status, body: text });
        }

        let raw: RawBulkResponse = serde_json::from_str(&text).map_err(BulkError::Decode)?;
        Ok(summarize(raw, offset))
    }
}

fn summarize(raw: RawBulkResponse, offset: usize) -> BulkResponse {
    let mut response = BulkResponse::default();
    for (i, item) in raw.items.into_iter().enumerate() {
        let status = item.index.status;
        if (200..300).contains(&status) {
            response.success += 1;
        } else {
            let reason = item
                .index
                .error
                .map(|e| match e.get("reason").and_then(serde_json::Value::as_str) {
                    Some(reason) => reason.to_string(),
                    None => e.to_string(),
                })
                .unwrap_or_default();
            response.errors.push(BulkItemError {
                position: offset + i,
                status,
                reason,
            });
        }
    }
    response
}

#[async_trait]
impl BulkWriter for ElasticsearchWriter {
    async fn bulk(&self, items: &[BulkItem]) -> Result<BulkResponse, BulkError> {
        let mut total = BulkResponse::default();
        let chunk_size = self.config.chunk_size.max(1);

        for (n, chunk) in items.chunks(chunk_size).enumerate() {
            let offset = n * chunk_size;
            match self.send_chunk(chunk, offset).await {
                Ok(response) => {
                    debug!(
                        "Bulk chunk {n}: {} accepted, {} rejected",
                        response.success,
                        response.errors.len()
                    );
                    total.merge(response);
                }
                Err(e) => {
                    if total.success > 0 {
                        error!(
                            "Bulk write interrupted after {} accepted documents",
                            total.success
                        );
                    }
                    return Err(e);
                }
            }
        }

        Ok(total)
    }
}
