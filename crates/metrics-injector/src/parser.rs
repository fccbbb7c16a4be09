// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of one metric line into a [`ParsedDocument`].
//!
//! The shipped format is the OpenTSDB telnet `put` line:
//!
//! ```text
//! [put ]<metric> <value> <timestamp> [<key>=<value> ...]
//! ```
//!
//! Fields are separated by single spaces. Any malformed part rejects the
//! whole line; no partial document is ever produced.

use std::fmt;
use std::str::FromStr;

use crate::constants::PUT_PREFIX;
use crate::document::{category_name, ParsedDocument, TIMESTAMP_FIELD};
use crate::errors::{ConfigError, ParseError};

/// Unit of the timestamps sent by producers. Documents always carry milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeUnit {
    #[default]
    Seconds,
    Milliseconds,
}

impl TimeUnit {
    fn to_millis(self, timestamp: &str) -> String {
        match self {
            TimeUnit::Seconds => format!("{timestamp}000"),
            TimeUnit::Milliseconds => timestamp.to_string(),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "seconds" => Ok(TimeUnit::Seconds),
            "ms" | "milliseconds" => Ok(TimeUnit::Milliseconds),
            other => Err(ConfigError::Invalid(format!(
                "Invalid time unit '{other}'. Must be one of: s, ms"
            ))),
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeUnit::Seconds => write!(f, "s"),
            TimeUnit::Milliseconds => write!(f, "ms"),
        }
    }
}

/// A line format. Implementations must be pure: same line, same result.
pub trait MetricParser: Send + Sync {
    fn parse(&self, line: &str) -> Result<ParsedDocument, ParseError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTsdbParser {
    time_unit: TimeUnit,
    prefix: Option<String>,
}

impl OpenTsdbParser {
    /// Parser for bare lines, without a leading token.
    #[must_use]
    pub fn new(time_unit: TimeUnit) -> Self {
        Self {
            time_unit,
            prefix: None,
        }
    }

    /// Parser for lines starting with the `put` keyword.
    #[must_use]
    pub fn put(time_unit: TimeUnit) -> Self {
        Self::with_prefix(time_unit, PUT_PREFIX)
    }

    #[must_use]
    pub fn with_prefix(time_unit: TimeUnit, prefix: &str) -> Self {
        Self {
            time_unit,
            prefix: Some(prefix.to_string()),
        }
    }

    fn strip_prefix<'a>(&self, line: &'a str) -> Result<&'a str, ParseError> {
        let Some(prefix) = self.prefix.as_deref() else {
            return Ok(line);
        };
        let (first, rest) = line.split_once(' ').unwrap_or((line, ""));
        if first == prefix {
            Ok(rest)
        } else {
            Err(ParseError::InvalidPrefix(line.to_string()))
        }
    }
}

impl MetricParser for OpenTsdbParser {
    fn parse(&self, line: &str) -> Result<ParsedDocument, ParseError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let body = self.strip_prefix(line)?;

        let elements: Vec<&str> = body.split(' ').collect();
        let [metric, value, timestamp, tag_elements @ ..] = elements.as_slice() else {
            return Err(ParseError::IncorrectLine(line.to_string()));
        };

        let metric = category_name(metric);
        let conflict = |field: &str| ParseError::FieldConflict {
            field: field.to_string(),
            line: line.to_string(),
        };
        if metric == TIMESTAMP_FIELD {
            return Err(conflict(&metric));
        }

        let mut tags = Vec::with_capacity(tag_elements.len());
        for tag in tag_elements {
            match tag.split('=').collect::<Vec<_>>().as_slice() {
                [key, _] if *key == metric || *key == TIMESTAMP_FIELD => {
                    return Err(conflict(key));
                }
                [key, tag_value] => tags.push(((*key).to_string(), (*tag_value).to_string())),
                _ => {
                    return Err(ParseError::InvalidTag {
                        tag: (*tag).to_string(),
                        line: line.to_string(),
                    })
                }
            }
        }

        Ok(ParsedDocument::new(
            metric,
            (*value).to_string(),
            self.time_unit.to_millis(timestamp),
            tags,
        ))
    }
}
