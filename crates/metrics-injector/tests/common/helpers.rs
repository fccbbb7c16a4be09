// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use metrics_injector::bulk::BulkWriter;
use metrics_injector::config::InjectorConfig;
use metrics_injector::errors::ServerError;
use metrics_injector::sender::{BatchSender, BatchSenderHandle};
use metrics_injector::server::ListenerServer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// A running listener with its sender, bound to an ephemeral local port
pub struct Relay {
    pub address: SocketAddr,
    pub handle: BatchSenderHandle,
    cancel: CancellationToken,
    server_task: JoinHandle<Result<(), ServerError>>,
}

impl Relay {
    /// Stops accepting, waits for the final flush and the sender to stop
    pub async fn stop(self) {
        self.cancel.cancel();
        timeout(Duration::from_secs(10), self.server_task)
            .await
            .expect("relay did not stop in time")
            .expect("server task panicked")
            .expect("server returned an error");
    }
}

/// Local config on an ephemeral port
pub fn test_config() -> InjectorConfig {
    InjectorConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        shutdown_grace: Duration::from_secs(5),
        ..Default::default()
    }
}

pub async fn start_relay(config: &InjectorConfig, writer: Arc<dyn BulkWriter>) -> Relay {
    let (sender, handle) = BatchSender::new(
        Arc::new(config.parser()),
        writer,
        &config.index,
        config.flush_policy(),
    );
    tokio::spawn(sender.run());

    let server = ListenerServer::bind(config, handle.clone())
        .await
        .expect("failed to bind relay");
    let address = server.local_addr().expect("no local address");
    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(cancel.clone()));

    Relay {
        address,
        handle,
        cancel,
        server_task,
    }
}

/// Connects, writes `payload` and closes the connection
pub async fn send(address: SocketAddr, payload: &[u8]) {
    let mut stream = TcpStream::connect(address)
        .await
        .expect("failed to connect to relay");
    stream.write_all(payload).await.expect("failed to write");
    stream.shutdown().await.expect("failed to close");
}
