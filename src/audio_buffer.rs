/// Audio buffer module: fixed-size analysis windows and the ring buffer that feeds them
///
/// Capture backends deliver audio in whatever chunk sizes the device chooses.
/// The `Windower` reassembles those chunks, in capture order, into
/// `SampleBuffer`s of exactly `buffer_duration × sample_rate` samples.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Audio sample format (mono f32, nominally in [-1.0, 1.0])
pub type AudioSample = f32;

/// Default capture sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Smallest window the spectral transform accepts
pub const MIN_BUFFER_LEN: usize = 2;

/// How many analysis windows the ring can hold before dropping old audio
pub const RING_WINDOWS: usize = 4;

/// Largest window accepted (about 95 s at 44.1 kHz)
pub const MAX_WINDOW_LEN: usize = 1 << 22;

#[derive(Error, Debug, PartialEq)]
pub enum AudioBufferError {
    #[error("Buffer too short: {0} samples (need at least 2)")]
    TooShort(usize),

    #[error("Window too long: {0} samples")]
    TooLong(usize),

    #[error("Buffer underflow: attempted to read {0} samples, but only {1} available")]
    Underflow(usize, usize),

    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),
}

/// Number of samples in a window of `duration_secs` at `sample_rate`
pub fn window_len(duration_secs: f64, sample_rate: u32) -> usize {
    (duration_secs * sample_rate as f64).round().max(0.0) as usize
}

/// One immutable single-channel analysis window
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<AudioSample>,
    sample_rate: u32,
}

impl SampleBuffer {
    /// Wrap captured samples, rejecting windows too short to analyse
    pub fn new(samples: Vec<AudioSample>, sample_rate: u32) -> Result<Self, AudioBufferError> {
        if sample_rate == 0 {
            return Err(AudioBufferError::InvalidSampleRate(sample_rate));
        }

        if samples.len() < MIN_BUFFER_LEN {
            return Err(AudioBufferError::TooShort(samples.len()));
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the window in seconds
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ring buffer for audio samples
/// Uses separate producer and consumer halves so the write path never reallocates
pub struct AudioBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
}

impl AudioBuffer {
    /// Create a buffer holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        debug!("Creating audio buffer with capacity: {} samples", capacity);

        let rb = RingBuffer::new(capacity.max(1));
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
        }
    }

    /// Write samples, dropping the oldest buffered audio when full
    ///
    /// Returns the number of samples that ended up in the buffer.
    pub fn write(&mut self, samples: &[AudioSample]) -> usize {
        let capacity = self.capacity();
        let samples = if samples.len() > capacity {
            warn!(
                "Chunk of {} samples exceeds ring capacity, keeping newest {}",
                samples.len(),
                capacity
            );
            &samples[samples.len() - capacity..]
        } else {
            samples
        };

        let mut producer = lock(&self.producer);
        let available_space = producer.vacant_len();

        if samples.len() > available_space {
            let to_drop = samples.len() - available_space;
            let mut consumer = lock(&self.consumer);
            consumer.skip(to_drop);
            drop(consumer);

            warn!(
                "Buffer full, dropping {} oldest samples to make room",
                to_drop
            );
        }

        let written = producer.push_slice(samples);
        trace!("Wrote {} samples to buffer", written);

        written
    }

    /// Remove exactly `count` samples
    pub fn read(&mut self, count: usize) -> Result<Vec<AudioSample>, AudioBufferError> {
        let mut consumer = lock(&self.consumer);
        let available = consumer.occupied_len();

        if count > available {
            return Err(AudioBufferError::Underflow(count, available));
        }

        let mut result = vec![0.0; count];
        let read = consumer.pop_slice(&mut result);
        result.truncate(read);

        trace!("Read {} samples from buffer", read);
        Ok(result)
    }

    pub fn len(&self) -> usize {
        lock(&self.consumer).occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        lock(&self.consumer).capacity().get()
    }

    /// Discard everything buffered
    pub fn clear(&mut self) {
        let mut consumer = lock(&self.consumer);
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared audio buffer");
    }
}

/// Cuts a continuous chunk stream into fixed-length analysis windows
pub struct Windower {
    ring: AudioBuffer,
    window_len: usize,
    sample_rate: u32,
}

impl Windower {
    pub fn new(window_len: usize, sample_rate: u32) -> Result<Self, AudioBufferError> {
        if sample_rate == 0 {
            return Err(AudioBufferError::InvalidSampleRate(sample_rate));
        }

        if window_len < MIN_BUFFER_LEN {
            return Err(AudioBufferError::TooShort(window_len));
        }

        if window_len > MAX_WINDOW_LEN {
            return Err(AudioBufferError::TooLong(window_len));
        }

        Ok(Self {
            ring: AudioBuffer::with_capacity(window_len * RING_WINDOWS),
            window_len,
            sample_rate,
        })
    }

    /// Append a captured chunk
    pub fn push(&mut self, chunk: &[AudioSample]) {
        self.ring.write(chunk);
    }

    /// Pop the next complete window, if enough audio has arrived
    pub fn next_window(&mut self) -> Option<SampleBuffer> {
        if self.ring.len() < self.window_len {
            return None;
        }

        let samples = self.ring.read(self.window_len).ok()?;
        SampleBuffer::new(samples, self.sample_rate).ok()
    }

    /// Samples buffered towards the next window
    pub fn pending(&self) -> usize {
        self.ring.len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Drop the partial window and any unread backlog
    pub fn clear(&mut self) {
        self.ring.clear();
    }
}
