// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations for integration tests

use async_trait::async_trait;
use metrics_injector::bulk::{BulkResponse, BulkWriter};
use metrics_injector::document::BulkItem;
use metrics_injector::errors::BulkError;
use std::sync::Mutex;

/// Backend that accepts everything and keeps what it was given
#[derive(Default)]
pub struct RecordingWriter {
    items: Mutex<Vec<BulkItem>>,
    calls: Mutex<usize>,
}

impl RecordingWriter {
    pub fn items(&self) -> Vec<BulkItem> {
        self.items.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BulkWriter for RecordingWriter {
    async fn bulk(&self, items: &[BulkItem]) -> Result<BulkResponse, BulkError> {
        *self.calls.lock().unwrap() += 1;
        self.items.lock().unwrap().extend_from_slice(items);
        Ok(BulkResponse {
            success: items.len(),
            errors: Vec::new(),
        })
    }
}
