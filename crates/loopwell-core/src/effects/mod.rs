//! Effects — the collaborator seams around the scheduling core.
//!
//! The engine only talks to fetch, decode and hardware output through these
//! traits. Native adapters (file/HTTP fetch, symphonia decode, cpal output)
//! live in the submodules; tests and headless hosts plug in their own.

use std::sync::Arc;

use crate::error::{DecodeError, FetchError};
use crate::models::AudioBuffer;
use crate::timer::{Clock, SystemClock};

/// Byte source for part locators.
pub trait Fetch: Send + Sync {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError>;
}

/// Container/codec decoding of fetched bytes.
///
/// `hint` is a lowercase file extension when the locator carries one.
pub trait Decode: Send + Sync {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<AudioBuffer, DecodeError>;
}

/// Hardware audio output.
///
/// `now()` is the output's own clock in seconds, the reference for every
/// `start` time handed to a source.
pub trait AudioOutput: Send + Sync {
    fn now(&self) -> f64;
    fn sample_rate(&self) -> u32;
    fn create_source(&self, buffer: Arc<AudioBuffer>) -> Box<dyn AudioSource>;
}

/// One buffer playback on the output.
///
/// A start time already in the past starts immediately. `stop` is idempotent
/// and valid before the source has started sounding.
pub trait AudioSource: Send {
    /// Schedule playback at hardware time `when`, from `offset` seconds into
    /// the buffer, for at most `length` seconds.
    fn start(&mut self, when: f64, offset: f64, length: Option<f64>);
    fn stop(&mut self);
    fn is_finished(&self) -> bool;
}

/// Silent output for headless hosts.
///
/// Hardware time follows the wall clock so scheduling stays meaningful; no
/// samples are produced. Sources still finish when their scheduled span has
/// elapsed on that clock.
pub struct NullOutput {
    clock: Arc<dyn Clock>,
    sample_rate: u32,
}

impl NullOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), sample_rate)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, sample_rate: u32) -> Self {
        Self { clock, sample_rate }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new(48_000)
    }
}

impl AudioOutput for NullOutput {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_source(&self, buffer: Arc<AudioBuffer>) -> Box<dyn AudioSource> {
        Box::new(NullSource {
            clock: Arc::clone(&self.clock),
            buffer_duration: buffer.duration(),
            ends_at: None,
            stopped: false,
        })
    }
}

struct NullSource {
    clock: Arc<dyn Clock>,
    buffer_duration: f64,
    /// Clock time the span would stop sounding, once started.
    ends_at: Option<f64>,
    stopped: bool,
}

impl AudioSource for NullSource {
    fn start(&mut self, when: f64, offset: f64, length: Option<f64>) {
        let span = length
            .unwrap_or(self.buffer_duration - offset)
            .min(self.buffer_duration - offset)
            .max(0.0);
        self.ends_at = Some(when.max(self.clock.now()) + span);
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.ends_at.is_some_and(|end| self.clock.now() >= end)
    }
}

#[cfg(feature = "native")]
pub mod audio;
pub mod decode;
pub mod fetch;
#[cfg(feature = "http")]
pub mod http;
