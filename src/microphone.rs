//! Live capture from the default input device (cpal)
//!
//! The cpal stream lives on a dedicated thread; its callback down-mixes to
//! mono and forwards chunks through a `ChunkSender`, so the async side only
//! ever sees a `ChannelSource`.

use crate::audio_buffer::SampleBuffer;
use crate::capture::{channel, downmix, AudioSource, CaptureError, ChannelSource, ChunkSender};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use tracing::{error, info};

pub struct MicrophoneSource {
    inner: ChannelSource,
    shutdown_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneSource {
    /// Open the default input device at `sample_rate`
    pub fn open(sample_rate: u32, window_len: usize) -> Result<Self, CaptureError> {
        let (sender, inner) = channel(window_len, sample_rate)?;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("snore-capture".to_string())
            .spawn(move || match start_stream(sample_rate, sender) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    // Blocks until the source is dropped.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        ready_rx.recv().map_err(|_| {
            CaptureError::DeviceUnavailable("capture thread exited during setup".to_string())
        })??;

        info!("Microphone capture started at {} Hz", sample_rate);

        Ok(Self {
            inner,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn start_stream(sample_rate: u32, sender: ChunkSender) -> Result<cpal::Stream, CaptureError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| CaptureError::DeviceUnavailable("No default input device found".to_string()))?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let channels = supported.channels();
    let config = StreamConfig {
        channels,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Default,
    };

    let data_sender = sender.clone();
    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = data_sender.send(downmix(data, channels as usize));
            },
            move |err| {
                error!("Audio stream error: {}", err);
                let _ = sender.fail(err.to_string());
            },
            None,
        )
        .map_err(|e| CaptureError::InvalidFormat(e.to_string()))?;

    stream
        .play()
        .map_err(|e| CaptureError::StreamFailed(e.to_string()))?;

    Ok(stream)
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn capture(&mut self) -> Result<SampleBuffer, CaptureError> {
        self.inner.capture().await
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn discard_buffered(&mut self) {
        self.inner.discard_buffered();
    }
}

impl Drop for MicrophoneSource {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
