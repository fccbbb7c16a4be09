// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, process, sync::Arc};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use metrics_injector::{
    bulk::ElasticsearchWriter,
    config::InjectorConfig,
    constants::DEFAULT_LOG_LEVEL,
    errors::SenderError,
    logger::Formatter,
    sender::BatchSender,
    server::ListenerServer,
    VERSION,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("INJECTOR_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or(DEFAULT_LOG_LEVEL.to_string());

    let env_filter = format!("h2=off,hyper=off,reqwest=off,rustls=off,{log_level}");
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .event_format(Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
    }

    debug!("Logging subsystem enabled");

    let config = match InjectorConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let writer = match ElasticsearchWriter::new(config.elasticsearch()) {
        Ok(writer) => Arc::new(writer),
        Err(e) => {
            error!("Error creating Elasticsearch client: {e}");
            process::exit(1);
        }
    };

    let (sender, sender_handle) = BatchSender::new(
        Arc::new(config.parser()),
        writer,
        &config.index,
        config.flush_policy(),
    );
    let sender_task = tokio::spawn(sender.run());

    let server = match ListenerServer::bind(&config, sender_handle.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    info!(
        "metrics injector {VERSION} forwarding to {} index {}",
        config.es_url, config.index
    );

    let cancel = CancellationToken::new();
    let server_task = tokio::spawn(server.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();

    let failure = match server_task.await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(e) => Some(e.to_string()),
    };
    if let Some(e) = failure {
        error!("Listener stopped with error: {e}");
        // the listener did not reach its final flush
        match sender_handle.flush().await {
            Ok(_) | Err(SenderError::Closed) => {}
            Err(e) => error!("Final flush failed: {e}"),
        }
        let _ = sender_handle.shutdown();
    }
    if let Err(e) = sender_task.await {
        error!("Batch sender task failed: {e}");
    }
    info!("metrics injector stopped");
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
                    _ = terminate.recv() => info!("SIGTERM received, shutting down"),
                }
                return;
            }
            Err(e) => error!("Unable to listen for SIGTERM: {e}"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Interrupt received, shutting down"),
        Err(e) => error!("Unable to listen for shutdown signal: {e}"),
    }
}
