/// Audio capture boundary
///
/// The detector pulls fixed-size windows from an `AudioSource`. Backends push
/// raw chunks through a `ChunkSender`; the paired `ChannelSource` windows them
/// in arrival order and hands out one `SampleBuffer` per `capture` call.

use crate::audio_buffer::{AudioBufferError, AudioSample, SampleBuffer, Windower};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio stream failed: {0}")]
    StreamFailed(String),

    #[error("Audio source closed")]
    SourceClosed,

    #[error("Invalid audio format: {0}")]
    InvalidFormat(String),
}

impl From<AudioBufferError> for CaptureError {
    fn from(e: AudioBufferError) -> Self {
        CaptureError::InvalidFormat(e.to_string())
    }
}

/// Pull source of fixed-size mono windows
#[async_trait]
pub trait AudioSource: Send {
    /// Wait for the next complete window
    async fn capture(&mut self) -> Result<SampleBuffer, CaptureError>;

    fn sample_rate(&self) -> u32;

    /// Drop audio captured so far, so the next window starts from fresh input
    fn discard_buffered(&mut self) {}
}

#[derive(Debug)]
enum CaptureMessage {
    Samples(Vec<AudioSample>),
    Failed(String),
}

/// Producer half handed to a capture backend
#[derive(Debug, Clone)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<CaptureMessage>,
}

impl ChunkSender {
    /// Queue a chunk of mono samples of any length
    pub fn send(&self, chunk: Vec<AudioSample>) -> Result<(), CaptureError> {
        self.tx
            .send(CaptureMessage::Samples(chunk))
            .map_err(|_| CaptureError::SourceClosed)
    }

    /// Report a backend failure; the next `capture` call returns it
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), CaptureError> {
        self.tx
            .send(CaptureMessage::Failed(reason.into()))
            .map_err(|_| CaptureError::SourceClosed)
    }
}

/// Consumer half: windows whatever the backend sends
///
/// Everything queued is moved into the windowing ring before a window is cut,
/// so a consumer that falls behind loses the oldest audio instead of building
/// an unbounded backlog.
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<CaptureMessage>,
    windower: Windower,
    failure: Option<String>,
}

impl ChannelSource {
    fn drain_queued(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.accept(message);
        }
    }

    fn accept(&mut self, message: CaptureMessage) {
        match message {
            CaptureMessage::Samples(chunk) => self.windower.push(&chunk),
            CaptureMessage::Failed(reason) => {
                // Keep the first failure; later ones usually repeat it
                if self.failure.is_none() {
                    self.failure = Some(reason);
                }
            }
        }
    }
}

/// Create a connected sender/source pair producing `window_len`-sample windows
pub fn channel(
    window_len: usize,
    sample_rate: u32,
) -> Result<(ChunkSender, ChannelSource), CaptureError> {
    let windower = Windower::new(window_len, sample_rate)?;
    let (tx, rx) = mpsc::unbounded_channel();

    debug!(
        "Capture channel ready: {} samples per window at {} Hz",
        window_len, sample_rate
    );

    Ok((
        ChunkSender { tx },
        ChannelSource {
            rx,
            windower,
            failure: None,
        },
    ))
}

#[async_trait]
impl AudioSource for ChannelSource {
    async fn capture(&mut self) -> Result<SampleBuffer, CaptureError> {
        self.drain_queued();

        loop {
            if let Some(reason) = self.failure.take() {
                return Err(CaptureError::StreamFailed(reason));
            }

            if let Some(window) = self.windower.next_window() {
                trace!("Captured window of {} samples", window.len());
                return Ok(window);
            }

            match self.rx.recv().await {
                Some(message) => self.accept(message),
                None => return Err(CaptureError::SourceClosed),
            }
        }
    }

    fn sample_rate(&self) -> u32 {
        self.windower.sample_rate()
    }

    fn discard_buffered(&mut self) {
        self.drain_queued();
        let dropped = self.windower.pending();
        self.windower.clear();
        if dropped > 0 {
            trace!("Discarded {} buffered samples", dropped);
        }
    }
}

/// Average interleaved frames down to one channel
pub fn downmix(interleaved: &[AudioSample], channels: usize) -> Vec<AudioSample> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
