// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Actor owning the pending batch and the flush policy.
//!
//! Every connection pushes through a cloneable [`BatchSenderHandle`]; the
//! single [`BatchSender`] task processes commands one at a time. Appending a
//! document, checking the thresholds and flushing therefore happen as one
//! step with respect to any other push or flush: a document is written by
//! exactly one flush and never lost between a threshold flush and an explicit
//! one.
//!
//! ```text
//!   worker ──push──┐
//!   worker ──push──┼──> BatchSender ──bulk──> BulkWriter
//!   server ──flush─┘      (owns batch)
//! ```
//!
//! A flush blocks the actor for the duration of the bulk write, so a slow
//! backend delays every producer. There is no back-pressure towards senders
//! and no retry: the batch is emptied whatever the outcome of the write.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::bulk::{BulkItemError, BulkResponse, BulkWriter};
use crate::constants::IDLE_FLUSH_CHECK_INTERVAL;
use crate::document::BulkItem;
use crate::errors::{BulkError, SenderError};
use crate::parser::MetricParser;

/// Either threshold being exceeded triggers a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Flush once more than this many documents are pending.
    pub buffer_size: usize,
    /// Flush once more than this much time passed since the last flush.
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushReport {
    pub accepted: usize,
    pub rejected: usize,
    /// Flushes triggered by this push.
    pub flushes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub success: usize,
    pub errors: Vec<BulkItemError>,
}

impl From<BulkResponse> for FlushReport {
    fn from(response: BulkResponse) -> Self {
        Self {
            success: response.success,
            errors: response.errors,
        }
    }
}

#[derive(Debug)]
pub enum SenderCommand {
    Push {
        lines: Vec<String>,
        context: String,
        response_tx: oneshot::Sender<PushReport>,
    },
    Flush(oneshot::Sender<Result<FlushReport, BulkError>>),
    Pending(oneshot::Sender<usize>),
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct BatchSenderHandle {
    tx: mpsc::UnboundedSender<SenderCommand>,
}

impl BatchSenderHandle {
    /// Parses `lines` and appends the documents, flushing if a threshold is
    /// exceeded. Resolves once any triggered flush has completed.
    ///
    /// `context` identifies the origin of the lines in parse failure logs.
    pub async fn push(&self, lines: Vec<String>, context: &str) -> Result<PushReport, SenderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SenderCommand::Push {
                lines,
                context: context.to_string(),
                response_tx,
            })
            .map_err(|_| SenderError::Closed)?;
        response_rx.await.map_err(|_| SenderError::Closed)
    }

    /// Writes the whole pending batch and empties it.
    pub async fn flush(&self) -> Result<FlushReport, SenderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SenderCommand::Flush(response_tx))
            .map_err(|_| SenderError::Closed)?;
        let result = response_rx.await.map_err(|_| SenderError::Closed)?;
        Ok(result?)
    }

    /// Number of documents waiting for the next flush.
    pub async fn pending(&self) -> Result<usize, SenderError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(SenderCommand::Pending(response_tx))
            .map_err(|_| SenderError::Closed)?;
        response_rx.await.map_err(|_| SenderError::Closed)
    }

    /// Stops the actor. Documents still pending are dropped; flush first.
    pub fn shutdown(&self) -> Result<(), SenderError> {
        self.tx
            .send(SenderCommand::Shutdown)
            .map_err(|_| SenderError::Closed)
    }
}

pub struct BatchSender {
    parser: Arc<dyn MetricParser>,
    writer: Arc<dyn BulkWriter>,
    index: String,
    policy: FlushPolicy,
    batch: Vec<BulkItem>,
    last_flush: Instant,
    rx: mpsc::UnboundedReceiver<SenderCommand>,
}

impl BatchSender {
    #[must_use]
    pub fn new(
        parser: Arc<dyn MetricParser>,
        writer: Arc<dyn BulkWriter>,
        index: &str,
        policy: FlushPolicy,
    ) -> (Self, BatchSenderHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = Self {
            parser,
            writer,
            index: index.to_string(),
            policy,
            batch: Vec::new(),
            last_flush: Instant::now(),
            rx,
        };
        (sender, BatchSenderHandle { tx })
    }

    pub async fn run(mut self) {
        debug!("Batch sender started");

        let mut idle_check = interval(IDLE_FLUSH_CHECK_INTERVAL);
        idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
        idle_check.tick().await; // first tick is immediate

        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    match command {
                        SenderCommand::Push { lines, context, response_tx } => {
                            let report = self.push(lines, &context).await;
                            if response_tx.send(report).is_err() {
                                debug!("Push response dropped by {context}");
                            }
                        }
                        SenderCommand::Flush(response_tx) => {
                            let result = self.flush().await;
                            if response_tx.send(result).is_err() {
                                error!("Failed to send flush response - receiver dropped");
                            }
                        }
                        SenderCommand::Pending(response_tx) => {
                            let _ = response_tx.send(self.batch.len());
                        }
                        SenderCommand::Shutdown => {
                            debug!("Batch sender shutting down");
                            break;
                        }
                    }
                }
                _ = idle_check.tick() => {
                    if !self.batch.is_empty() && self.delay_exceeded() {
                        debug!("Flushing {} documents after max delay", self.batch.len());
                        let _ = self.flush().await;
                    }
                }
            }
        }

        if !self.batch.is_empty() {
            warn!("Batch sender stopped with {} unflushed documents", self.batch.len());
        }
        debug!("Batch sender stopped");
    }

    async fn push(&mut self, lines: Vec<String>, context: &str) -> PushReport {
        let mut report = PushReport::default();

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match self.parser.parse(&line) {
                Ok(document) => {
                    trace!("Parsed metric from {context}: {line}");
                    self.batch.push(BulkItem::new(&self.index, document));
                    report.accepted += 1;
                }
                Err(e) => {
                    warn!("Failed to parse metric from {context}: {e}");
                    report.rejected += 1;
                    continue;
                }
            }

            if self.batch.len() > self.policy.buffer_size || self.delay_exceeded() {
                // outcome already logged; the batch is gone either way
                let _ = self.flush().await;
                report.flushes += 1;
            }
        }

        report
    }

    fn delay_exceeded(&self) -> bool {
        self.last_flush.elapsed() > self.policy.max_delay
    }

    async fn flush(&mut self) -> Result<FlushReport, BulkError> {
        let items = std::mem::take(&mut self.batch);
        if items.is_empty() {
            self.last_flush = Instant::now();
            return Ok(FlushReport::default());
        }

        debug!("Flushing {} documents", items.len());
        let result = self.writer.bulk(&items).await;
        self.last_flush = Instant::now();

        match result {
            Ok(response) => {
                info!(
                    "Flushed {} documents: {} accepted, {} rejected",
                    items.len(),
                    response.success,
                    response.errors.len()
                );
                for rejected in &response.errors {
                    warn!(
                        "Document {} rejected with status {}: {}",
                        rejected.position, rejected.status, rejected.reason
                    );
                }
                Ok(response.into())
            }
            Err(e) => {
                error!("Bulk write failed, discarding {} documents: {e}", items.len());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{OpenTsdbParser, TimeUnit};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<Vec<BulkItem>>>,
        reject_metric: Option<String>,
        unavailable: bool,
    }

    impl RecordingWriter {
        fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().unwrap().iter().map(Vec::len).collect()
        }

        fn total(&self) -> usize {
            self.batch_sizes().iter().sum()
        }
    }

    #[async_trait]
    impl BulkWriter for RecordingWriter {
        async fn bulk(&self, items: &[BulkItem]) -> Result<BulkResponse, BulkError> {
            self.batches.lock().unwrap().push(items.to_vec());
            if self.unavailable {
                return Err(BulkError::Status {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    body: "unavailable".to_string(),
                });
            }
            let mut response = BulkResponse::default();
            for (position, item) in items.iter().enumerate() {
                if Some(item.document.metric()) == self.reject_metric.as_deref() {
                    response.errors.push(BulkItemError {
                        position,
                        status: 400,
                        reason: "rejected".to_string(),
                    });
                } else {
                    response.success += 1;
                }
            }
            Ok(response)
        }
    }

    fn policy(buffer_size: usize) -> FlushPolicy {
        FlushPolicy {
            buffer_size,
            max_delay: Duration::from_secs(60),
        }
    }

    fn sender_with(
        writer: Arc<RecordingWriter>,
        policy: FlushPolicy,
    ) -> (BatchSender, BatchSenderHandle) {
        BatchSender::new(
            Arc::new(OpenTsdbParser::put(TimeUnit::Seconds)),
            writer,
            "test-metrics",
            policy,
        )
    }

    fn lines(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("put metric{i} {i} 1454962560 host=me"))
            .collect()
    }

    #[tokio::test]
    async fn test_push_appends_bulk_items() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));

        let report = sender
            .push(vec!["put sys.cpu 0.5 1454962560 host=a".to_string()], "test")
            .await;

        assert_eq!(
            report,
            PushReport {
                accepted: 1,
                rejected: 0,
                flushes: 0
            }
        );
        assert_eq!(sender.batch.len(), 1);
        assert_eq!(sender.batch[0].index, "test-metrics");
        assert_eq!(sender.batch[0].category, "sys-cpu");
        assert_eq!(sender.batch[0].document.get("timestamp"), Some("1454962560000"));
    }

    #[tokio::test]
    async fn test_huge_buffer_size_does_not_preallocate() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(usize::MAX));

        let report = sender.push(lines(3), "test").await;

        assert_eq!(report.accepted, 3);
        assert_eq!(report.flushes, 0);
        assert_eq!(sender.flush().await.unwrap().success, 3);
    }

    #[tokio::test]
    async fn test_push_over_buffer_size_flushes() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));

        let report = sender.push(lines(15), "test").await;

        assert_eq!(report.accepted, 15);
        assert_eq!(report.flushes, 1);
        assert_eq!(writer.batch_sizes(), vec![11]);
        assert!(sender.batch.len() < 10);
        assert_eq!(sender.batch.len(), 4);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_bad_lines_are_skipped_and_logged_with_context() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));

        let report = sender
            .push(
                vec![
                    "one".to_string(),
                    "put one two".to_string(),
                    "put m 1 10 host=a".to_string(),
                    "put one two three four".to_string(),
                    String::new(),
                ],
                "10.0.0.1:4242",
            )
            .await;

        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected, 3);
        assert_eq!(sender.batch.len(), 1);
        assert!(logs_contain("10.0.0.1:4242"));
        assert!(logs_contain("invalid prefix line: one"));
        assert!(logs_contain("incorrect metric line: put one two"));
        assert!(logs_contain("invalid tag: four in: put one two three four"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_max_delay_flushes() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(100));

        sender.push(lines(1), "test").await;
        assert!(writer.batch_sizes().is_empty());

        tokio::time::advance(Duration::from_secs(61)).await;
        let report = sender.push(lines(1), "test").await;

        assert_eq!(report.flushes, 1);
        assert_eq!(writer.batch_sizes(), vec![2]);
        assert!(sender.batch.is_empty());

        // the flush reset the clock
        let report = sender.push(lines(1), "test").await;
        assert_eq!(report.flushes, 0);
    }

    #[tokio::test]
    async fn test_flush_reports_item_rejections_and_empties_batch() {
        let writer = Arc::new(RecordingWriter {
            reject_metric: Some("bad".to_string()),
            ..Default::default()
        });
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));
        sender
            .push(
                vec![
                    "put good 1 10".to_string(),
                    "put bad 1 10".to_string(),
                    "put good 2 10".to_string(),
                ],
                "test",
            )
            .await;

        let report = sender.flush().await.unwrap();

        assert_eq!(report.success, 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].position, 1);
        assert!(sender.batch.is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_discards_batch() {
        let writer = Arc::new(RecordingWriter {
            unavailable: true,
            ..Default::default()
        });
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));
        sender.push(lines(3), "test").await;

        let result = sender.flush().await;

        assert!(matches!(result, Err(BulkError::Status { .. })));
        assert!(sender.batch.is_empty());
        // no retry on the next flush
        assert!(sender.flush().await.unwrap().errors.is_empty());
        assert_eq!(writer.batch_sizes(), vec![3]);
    }

    #[tokio::test]
    async fn test_empty_flush_skips_backend() {
        let writer = Arc::new(RecordingWriter::default());
        let (mut sender, _handle) = sender_with(Arc::clone(&writer), policy(10));

        let report = sender.flush().await.unwrap();

        assert_eq!(report, FlushReport::default());
        assert!(writer.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let writer = Arc::new(RecordingWriter::default());
        let (sender, handle) = sender_with(Arc::clone(&writer), policy(10));
        let task = tokio::spawn(sender.run());

        let report = handle.push(lines(3), "test").await.unwrap();
        assert_eq!(report.accepted, 3);
        assert_eq!(handle.pending().await.unwrap(), 3);

        let flushed = handle.flush().await.unwrap();
        assert_eq!(flushed.success, 3);
        assert_eq!(handle.pending().await.unwrap(), 0);

        handle.shutdown().unwrap();
        task.await.unwrap();
        assert!(matches!(
            handle.push(lines(1), "test").await,
            Err(SenderError::Closed)
        ));
        assert!(matches!(handle.flush().await, Err(SenderError::Closed)));
    }

    #[tokio::test]
    async fn test_handle_flush_surfaces_backend_error() {
        let writer = Arc::new(RecordingWriter {
            unavailable: true,
            ..Default::default()
        });
        let (sender, handle) = sender_with(Arc::clone(&writer), policy(10));
        tokio::spawn(sender.run());

        handle.push(lines(2), "test").await.unwrap();
        let result = handle.flush().await;

        assert!(matches!(result, Err(SenderError::Backend(_))));
        assert_eq!(handle.pending().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pushes_and_flushes_lose_nothing() {
        let writer = Arc::new(RecordingWriter::default());
        let (sender, handle) = sender_with(Arc::clone(&writer), policy(7));
        tokio::spawn(sender.run());

        let mut tasks = Vec::new();
        for producer in 0..8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..25 {
                    let batch = (0..4)
                        .map(|n| format!("put metric{n} {n} 1454962560 host=producer{producer}-{round}"))
                        .collect();
                    handle
                        .push(batch, &format!("producer-{producer}"))
                        .await
                        .unwrap();
                    if producer % 2 == 0 {
                        handle.flush().await.unwrap();
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        handle.flush().await.unwrap();

        assert_eq!(writer.total(), 8 * 25 * 4);
        assert!(writer.batch_sizes().iter().all(|&n| n <= 8));

        let flushed: HashSet<(String, String)> = writer
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|item| {
                (
                    item.document.get("host").unwrap().to_string(),
                    item.document.metric().to_string(),
                )
            })
            .collect();
        assert_eq!(flushed.len(), 8 * 25 * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_batch_flushed_after_max_delay() {
        let writer = Arc::new(RecordingWriter::default());
        let (sender, handle) = sender_with(
            Arc::clone(&writer),
            FlushPolicy {
                buffer_size: 100,
                max_delay: Duration::from_secs(5),
            },
        );
        tokio::spawn(sender.run());

        handle.push(lines(2), "test").await.unwrap();
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert_eq!(writer.batch_sizes(), vec![2]);
        assert_eq!(handle.pending().await.unwrap(), 0);
    }
}
