//! Test doubles shared by the unit tests: a hand-driven clock, a recording
//! output, in-memory fetchers and a decoder that needs no real audio.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::effects::{AudioOutput, AudioSource, Decode, Fetch};
use crate::error::{DecodeError, FetchError};
use crate::models::AudioBuffer;
use crate::timer::Clock;

/// Fixture sample rate: 1000 frames per second keeps durations exact enough.
pub const FIXTURE_RATE: u32 = 1_000;

pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(0.0),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

/// One `start` call seen by the recording output.
#[derive(Debug, Clone, PartialEq)]
pub struct StartCall {
    pub source: usize,
    pub buffer_duration: f64,
    pub when: f64,
    pub offset: f64,
    pub length: Option<f64>,
}

#[derive(Default)]
struct OutputLog {
    created: usize,
    starts: Vec<StartCall>,
    stopped: HashSet<usize>,
}

/// Output whose hardware clock is a `ManualClock` and whose sources only
/// record what they were asked to do.
pub struct RecordingOutput {
    clock: Arc<ManualClock>,
    log: Arc<Mutex<OutputLog>>,
}

impl RecordingOutput {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            log: Arc::new(Mutex::new(OutputLog::default())),
        }
    }

    pub fn starts(&self) -> Vec<StartCall> {
        self.log.lock().starts.clone()
    }

    pub fn clear(&self) {
        self.log.lock().starts.clear();
    }

    /// Sources started and not yet stopped.
    pub fn live(&self) -> usize {
        let log = self.log.lock();
        log.starts
            .iter()
            .filter(|s| !log.stopped.contains(&s.source))
            .count()
    }

    pub fn stop_count(&self) -> usize {
        self.log.lock().stopped.len()
    }
}

impl AudioOutput for RecordingOutput {
    fn now(&self) -> f64 {
        self.clock.now()
    }

    fn sample_rate(&self) -> u32 {
        FIXTURE_RATE
    }

    fn create_source(&self, buffer: Arc<AudioBuffer>) -> Box<dyn AudioSource> {
        let id = {
            let mut log = self.log.lock();
            log.created += 1;
            log.created
        };
        Box::new(RecordingSource {
            id,
            buffer_duration: buffer.duration(),
            clock: Arc::clone(&self.clock),
            ends_at: None,
            log: Arc::clone(&self.log),
        })
    }
}

struct RecordingSource {
    id: usize,
    buffer_duration: f64,
    clock: Arc<ManualClock>,
    ends_at: Option<f64>,
    log: Arc<Mutex<OutputLog>>,
}

impl AudioSource for RecordingSource {
    fn start(&mut self, when: f64, offset: f64, length: Option<f64>) {
        let span = length.unwrap_or(self.buffer_duration - offset);
        self.ends_at = Some(when.max(self.clock.now()) + span);
        self.log.lock().starts.push(StartCall {
            source: self.id,
            buffer_duration: self.buffer_duration,
            when,
            offset,
            length,
        });
    }

    fn stop(&mut self) {
        self.log.lock().stopped.insert(self.id);
    }

    /// Stopped, or past the end of its scheduled span on the manual clock.
    fn is_finished(&self) -> bool {
        self.log.lock().stopped.contains(&self.id)
            || self.ends_at.is_some_and(|end| self.clock.now() >= end)
    }
}

/// In-memory fetcher. A part's bytes are its duration in seconds as text,
/// which `SilenceDecoder` turns back into a silent buffer.
#[derive(Default)]
pub struct MemoryFetcher {
    parts: HashMap<String, Vec<u8>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_part(mut self, locator: &str, seconds: f64) -> Self {
        self.parts
            .insert(locator.to_string(), seconds.to_string().into_bytes());
        self
    }

    pub fn with_bytes(mut self, locator: &str, bytes: &[u8]) -> Self {
        self.parts.insert(locator.to_string(), bytes.to_vec());
        self
    }

    pub fn fail(&self, locator: &str) {
        self.failing.lock().insert(locator.to_string());
    }

    pub fn heal(&self, locator: &str) {
        self.failing.lock().remove(locator);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetch for MemoryFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(locator) {
            return Err(FetchError::new(locator, "unavailable"));
        }
        self.parts
            .get(locator)
            .cloned()
            .ok_or_else(|| FetchError::new(locator, "not found"))
    }
}

/// Wraps a fetcher and holds every fetch until `open()` is called.
pub struct GatedFetcher {
    inner: MemoryFetcher,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedFetcher {
    pub fn new(inner: MemoryFetcher) -> Self {
        Self {
            inner,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Block until `n` fetches are parked at the gate.
    pub fn wait_for_entered(&self, n: usize) {
        for _ in 0..2_000 {
            if self.entered.load(Ordering::SeqCst) >= n {
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("fetches never reached the gate");
    }

    pub fn calls(&self) -> usize {
        self.inner.calls()
    }
}

impl Fetch for GatedFetcher {
    fn fetch(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
        drop(open);
        self.inner.fetch(locator)
    }
}

/// Decodes the `MemoryFetcher` encoding into mono silence at `FIXTURE_RATE`.
#[derive(Default)]
pub struct SilenceDecoder {
    calls: AtomicUsize,
}

impl SilenceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Decode for SilenceDecoder {
    fn decode(&self, bytes: Vec<u8>, _hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let seconds: f64 = String::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| DecodeError::Format("not a fixture".into()))?;
        Ok(AudioBuffer::silence(seconds, 1, FIXTURE_RATE))
    }
}

/// Minimal 16-bit PCM RIFF/WAVE file holding `samples` (interleaved).
pub fn wav_bytes(samples: &[f32], channels: u16, sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let block_align = channels * 2;
    let byte_rate = sample_rate * block_align as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&channels.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
