/// Snore detection service binary
///
/// Listens for snoring and runs the configured action once enough detections
/// land inside the sliding window. Without the `microphone` feature, audio is
/// read from stdin as raw little-endian f32 mono PCM, e.g.
/// `arecord -f FLOAT_LE -c1 -r44100 | snore-service`.

use anyhow::Context;
use snore_detector::{
    ActionSink, AudioSource, CommandAction, LogAction, SnoreConfig, SnoreDetector,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("snore_detector=debug,snore_service=info")),
        )
        .init();

    info!("Starting snore detection service v{}", snore_detector::VERSION);

    let config = SnoreConfig::load().context("Failed to load configuration")?;
    info!(
        "Window {} samples @ {} Hz, trigger after {} detections within {}s",
        config.window_len(),
        config.sample_rate,
        config.event_count_threshold,
        config.sliding_window_secs
    );

    let mut detector = SnoreDetector::new(&config).context("Failed to create detector")?;
    let sink = build_sink(&config);
    let mut source = open_source(&config).context("Failed to open audio source")?;

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
        ctrl_c_token.cancel();
    });

    let stats = detector
        .run(source.as_mut(), sink, config.inter_tick_delay(), shutdown)
        .await;

    info!(
        "Snore detection service stopped ({} triggers, {} capture failures)",
        stats.triggers, stats.capture_failures
    );

    Ok(())
}

fn build_sink(config: &SnoreConfig) -> Arc<dyn ActionSink> {
    match &config.action_command {
        Some(command) => {
            Arc::new(CommandAction::new(command.clone()).with_timeout(config.action_timeout()))
        }
        None => Arc::new(LogAction),
    }
}

#[cfg(feature = "microphone")]
fn open_source(config: &SnoreConfig) -> anyhow::Result<Box<dyn AudioSource>> {
    let source = snore_detector::MicrophoneSource::open(config.sample_rate, config.window_len())?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "microphone"))]
fn open_source(config: &SnoreConfig) -> anyhow::Result<Box<dyn AudioSource>> {
    use tokio::io::AsyncReadExt;

    let (sender, source) = snore_detector::channel(config.window_len(), config.sample_rate)?;
    info!("Reading f32le mono PCM from stdin");

    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 16 * 1024];
        let mut pending: Vec<u8> = Vec::new();

        loop {
            match stdin.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    let whole = pending.len() / 4 * 4;
                    let samples: Vec<f32> = pending[..whole]
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect();
                    pending.drain(..whole);

                    if sender.send(samples).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = sender.fail(e.to_string());
                    break;
                }
            }
        }
    });

    Ok(Box::new(source))
}
