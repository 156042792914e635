use anyhow::{Context, Result};
use proctor_core::Pipeline;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod dispatch;
mod engine;

use dispatch::Dispatcher;

/// Decoded frames allowed to wait on the engine at once.
const MAX_FRAMES_IN_FLIGHT: usize = 8;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries responses; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "proctord starting");

    let config = config::Config::from_env().context("loading configuration")?;
    tracing::info!(
        model_dir = %config.detector.model_dir.display(),
        body_mode = ?config.detector.body_mode,
        warmup = config.warmup,
        "configuration loaded"
    );

    let pipeline = Pipeline::load(&config.detector);
    let engine = engine::spawn_engine(pipeline, config.warmup).context("starting inference engine")?;
    let dispatcher = Dispatcher::new(
        engine,
        Duration::from_secs(config.request_timeout_secs),
        MAX_FRAMES_IN_FLIGHT,
    );

    let (out_tx, mut out_rx) = mpsc::channel::<String>(16);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                tracing::warn!("stdout closed, dropping responses");
                break;
            }
        }
    });

    tracing::info!("proctord ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    tracing::info!("stdin closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let dispatcher = dispatcher.clone();
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    let response = dispatcher.handle_line(&line).await;
                    let _ = out_tx.send(format!("{response}\n")).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    // Let in-flight requests finish writing.
    drop(out_tx);
    drop(dispatcher);
    let _ = writer.await;

    tracing::info!("proctord shutting down");
    Ok(())
}
