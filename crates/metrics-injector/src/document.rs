// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::BTreeMap;

pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Replaces characters Elasticsearch refuses in type names.
#[must_use]
pub fn category_name(metric: &str) -> String {
    metric.replace('.', "-")
}

/// One parsed metric datapoint.
///
/// Serializes as a flat object: `{"<metric>": "<value>", "timestamp": "<ms>", "<tag>": "<value>", ...}`.
/// Values are kept as text, exactly as they appeared on the line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParsedDocument {
    #[serde(skip)]
    metric: String,
    fields: BTreeMap<String, String>,
}

impl ParsedDocument {
    /// Fields are inserted in order metric, timestamp, tags. A later key
    /// overwrites an earlier one.
    #[must_use]
    pub fn new<I>(metric: String, value: String, timestamp: String, tags: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut fields = BTreeMap::new();
        fields.insert(metric.clone(), value);
        fields.insert(TIMESTAMP_FIELD.to_string(), timestamp);
        fields.extend(tags);
        Self { metric, fields }
    }

    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}

/// A document addressed to its index, with a category derived from the metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItem {
    pub index: String,
    pub category: String,
    pub document: ParsedDocument,
}

impl BulkItem {
    #[must_use]
    pub fn new(index: &str, document: ParsedDocument) -> Self {
        Self {
            index: index.to_string(),
            category: category_name(document.metric()),
            document,
        }
    }
}
