// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP listener accepting producers and spawning one worker per connection.
//!
//! Shutdown order, once the cancellation token fires:
//!
//! 1. stop accepting
//! 2. give open connections `shutdown_grace` to finish
//! 3. cancel the ones still open
//! 4. flush the pending batch and stop the sender

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::InjectorConfig;
use crate::errors::ServerError;
use crate::sender::BatchSenderHandle;
use crate::worker::ConnectionWorker;

pub struct ListenerServer {
    listener: TcpListener,
    sender: BatchSenderHandle,
    connection_limit: Option<Arc<Semaphore>>,
    shutdown_grace: Duration,
}

impl ListenerServer {
    /// Binds the listen socket. A bind failure is fatal to the caller.
    pub async fn bind(
        config: &InjectorConfig,
        sender: BatchSenderHandle,
    ) -> Result<Self, ServerError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::Bind {
                address: address.clone(),
                source: e,
            })?;

        Ok(Self {
            listener,
            sender,
            connection_limit: config
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS)))),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `cancel` fires, then drains and flushes.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        let address = match self.local_addr() {
            Ok(address) => address,
            Err(e) => {
                let _ = self.sender.shutdown();
                return Err(e);
            }
        };
        info!("Listening for metrics on {address}");

        let tracker = TaskTracker::new();
        let connections = CancellationToken::new();

        loop {
            let permit = match &self.connection_limit {
                Some(limit) => tokio::select! {
                    _ = cancel.cancelled() => break,
                    permit = Arc::clone(limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                },
                None => None,
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let mut worker = ConnectionWorker::new(stream, peer.to_string(), self.sender.clone());
                        let worker_cancel = connections.clone();
                        tracker.spawn(async move {
                            worker.run(worker_cancel).await;
                            drop(permit);
                        });
                    }
                    Err(e) => {
                        // transient, e.g. too many open files
                        warn!("Failed to accept connection: {e}");
                    }
                },
            }
        }

        info!("Stopped accepting connections on {address}");
        drop(self.listener);
        tracker.close();

        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connections still open after {:?}, closing them",
                tracker.len(),
                self.shutdown_grace
            );
            connections.cancel();
            tracker.wait().await;
        }

        match self.sender.flush().await {
            Ok(report) => debug!(
                "Final flush: {} accepted, {} rejected",
                report.success,
                report.errors.len()
            ),
            Err(e) => error!("Final flush failed: {e}"),
        }
        if self.sender.shutdown().is_err() {
            debug!("Batch sender already stopped");
        }

        info!("Listener on {address} stopped");
        Ok(())
    }
}
