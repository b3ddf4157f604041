//! Native audio output — one cpal stream mixing scheduled voices.
//!
//! Pipeline:
//! 1. the scheduler hands each decoded part to a `CpalSource`
//! 2. `start(when, offset, length)` registers a voice on the shared mixer,
//!    pinned to an output frame index
//! 3. the cpal callback sums every due voice into the device buffer,
//!    adapting channel counts and stepping through source rates
//!
//! Hardware time is the number of frames the callback has rendered divided
//! by the device rate, so a voice's start and end land on exact frames. The
//! reading lags the device by up to one callback; the engine anchors loop
//! iterations to each other rather than to fresh `now()` readings.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::effects::{AudioOutput, AudioSource};
use crate::error::OutputError;
use crate::models::AudioBuffer;

/// Handle on the output thread, which owns the (non-`Send`) cpal stream.
pub struct CpalOutput {
    mixer: Arc<MixerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct MixerState {
    /// Frames rendered since the stream started: the hardware clock.
    frames_rendered: AtomicU64,
    sample_rate: AtomicU32,
    channels: AtomicU16,
    voices: Mutex<Vec<Voice>>,
    shutdown: AtomicBool,
    /// Set by the cpal error callback.
    error: AtomicBool,
}

struct Voice {
    buffer: Arc<AudioBuffer>,
    /// Output frame at which the voice starts sounding.
    start_frame: u64,
    /// Output frame at which a length-bounded voice falls silent. Derived
    /// from `when + length`, so a voice scheduled at that time starts on
    /// exactly this frame.
    end_frame: u64,
    /// Read position in source frames.
    cursor: f64,
    /// Stop reading at this source frame.
    end: f64,
    /// Source frames advanced per output frame.
    step: f64,
    control: Arc<VoiceControl>,
}

#[derive(Default)]
struct VoiceControl {
    stopped: AtomicBool,
    finished: AtomicBool,
}

impl CpalOutput {
    /// Open the default output device and start the stream.
    ///
    /// Blocks until the output thread reports the negotiated format.
    pub fn open() -> Result<Self, OutputError> {
        let mixer = Arc::new(MixerState {
            frames_rendered: AtomicU64::new(0),
            sample_rate: AtomicU32::new(0),
            channels: AtomicU16::new(0),
            voices: Mutex::new(Vec::new()),
            shutdown: AtomicBool::new(false),
            error: AtomicBool::new(false),
        });

        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_mixer = Arc::clone(&mixer);
        let handle = thread::spawn(move || run_output(thread_mixer, ready_tx));

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "loopwell: output open at {}Hz, {} channels",
                    mixer.sample_rate.load(Ordering::SeqCst),
                    mixer.channels.load(Ordering::SeqCst)
                );
                Ok(Self {
                    mixer,
                    thread: Mutex::new(Some(handle)),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(OutputError::Device("output thread exited before start".into()))
            }
        }
    }

    /// True once the device has reported a stream error.
    pub fn is_error(&self) -> bool {
        self.mixer.error.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> u16 {
        self.mixer.channels.load(Ordering::SeqCst)
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> f64 {
        let rate = self.mixer.sample_rate.load(Ordering::SeqCst);
        if rate == 0 {
            return 0.0;
        }
        self.mixer.frames_rendered.load(Ordering::SeqCst) as f64 / rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.mixer.sample_rate.load(Ordering::SeqCst)
    }

    fn create_source(&self, buffer: Arc<AudioBuffer>) -> Box<dyn AudioSource> {
        Box::new(CpalSource {
            mixer: Arc::clone(&self.mixer),
            buffer,
            control: Arc::new(VoiceControl::default()),
        })
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.mixer.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

struct CpalSource {
    mixer: Arc<MixerState>,
    buffer: Arc<AudioBuffer>,
    control: Arc<VoiceControl>,
}

impl AudioSource for CpalSource {
    fn start(&mut self, when: f64, offset: f64, length: Option<f64>) {
        if self.control.stopped.load(Ordering::SeqCst) {
            return;
        }
        let out_rate = self.mixer.sample_rate.load(Ordering::SeqCst).max(1) as f64;
        let src_rate = self.buffer.sample_rate.max(1) as f64;
        let frames = self.buffer.frames() as f64;

        let cursor = (offset.max(0.0) * src_rate).min(frames);
        let end = match length {
            Some(len) => (cursor + len.max(0.0) * src_rate).min(frames),
            None => frames,
        };

        let when = when.max(0.0);
        let end_frame = match length {
            Some(len) => ((when + len.max(0.0)) * out_rate).round() as u64,
            None => u64::MAX,
        };

        // Late starts sound immediately.
        let now_frame = self.mixer.frames_rendered.load(Ordering::SeqCst);
        let start_frame = ((when * out_rate).round() as u64).max(now_frame);

        self.mixer.voices.lock().push(Voice {
            buffer: Arc::clone(&self.buffer),
            start_frame,
            end_frame,
            cursor,
            end,
            step: src_rate / out_rate,
            control: Arc::clone(&self.control),
        });
    }

    fn stop(&mut self) {
        self.control.stopped.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.control.stopped.load(Ordering::SeqCst) || self.control.finished.load(Ordering::SeqCst)
    }
}

/// Output thread body: build the stream, report readiness, keep it alive.
fn run_output(mixer: Arc<MixerState>, ready: mpsc::Sender<Result<(), OutputError>>) {
    let stream = match build_stream(&mixer) {
        Ok(stream) => stream,
        Err(e) => {
            log::error!("loopwell: output open failed: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    while !mixer.shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(25));
    }

    drop(stream);
    mixer.voices.lock().clear();
}

fn build_stream(mixer: &Arc<MixerState>) -> Result<cpal::Stream, OutputError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(OutputError::NoDevice)?;

    let default_cfg = device
        .default_output_config()
        .map_err(|e| OutputError::Device(e.to_string()))?;
    if default_cfg.sample_format() != cpal::SampleFormat::F32 {
        return Err(OutputError::Device(format!(
            "device does not support f32 output (got {:?})",
            default_cfg.sample_format()
        )));
    }
    let config: cpal::StreamConfig = default_cfg.into();

    mixer.sample_rate.store(config.sample_rate.0, Ordering::SeqCst);
    mixer.channels.store(config.channels, Ordering::SeqCst);

    let out_channels = config.channels;
    let cb_mixer = Arc::clone(mixer);
    let err_mixer = Arc::clone(mixer);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render(&cb_mixer, data, out_channels);
            },
            move |err| {
                log::error!("loopwell: cpal error: {}", err);
                err_mixer.error.store(true, Ordering::SeqCst);
            },
            None,
        )
        .map_err(|e| OutputError::Device(e.to_string()))?;

    stream
        .play()
        .map_err(|e| OutputError::Device(e.to_string()))?;
    Ok(stream)
}

/// Mix every due voice into `data` and advance the hardware clock.
fn render(mixer: &MixerState, data: &mut [f32], out_channels: u16) {
    data.fill(0.0);
    if out_channels == 0 {
        return;
    }
    let out_ch = out_channels as usize;
    let frames = data.len() / out_ch;
    let base = mixer.frames_rendered.load(Ordering::SeqCst);

    let mut frame = vec![0.0f32; out_ch];
    let mut voices = mixer.voices.lock();
    for voice in voices.iter_mut() {
        if voice.control.stopped.load(Ordering::SeqCst) {
            continue;
        }
        let src_stride = voice.buffer.channels.max(1) as usize;
        let first = voice.start_frame.saturating_sub(base).min(frames as u64) as usize;

        for f in first..frames {
            if voice.cursor >= voice.end || base + f as u64 >= voice.end_frame {
                voice.control.finished.store(true, Ordering::SeqCst);
                break;
            }
            let idx = voice.cursor as usize * src_stride;
            let Some(src) = voice.buffer.samples.get(idx..idx + src_stride) else {
                voice.control.finished.store(true, Ordering::SeqCst);
                break;
            };
            map_frame(src, &mut frame);
            let dst = &mut data[f * out_ch..(f + 1) * out_ch];
            for (d, s) in dst.iter_mut().zip(&frame) {
                *d += *s;
            }
            voice.cursor += voice.step;
        }
        if voice.cursor >= voice.end || base + frames as u64 >= voice.end_frame {
            voice.control.finished.store(true, Ordering::SeqCst);
        }
    }
    voices.retain(|v| {
        !v.control.stopped.load(Ordering::SeqCst) && !v.control.finished.load(Ordering::SeqCst)
    });
    drop(voices);

    for s in data.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
    mixer
        .frames_rendered
        .store(base + frames as u64, Ordering::SeqCst);
}

/// Map one source frame onto one output frame. Mono spreads to every
/// output channel and multichannel folds to mono by averaging; otherwise the
/// shared channels are copied and the rest silenced.
fn map_frame(src: &[f32], dst: &mut [f32]) {
    match (src.len(), dst.len()) {
        (0, _) => dst.fill(0.0),
        (1, _) => dst.fill(src[0]),
        (n, 1) => dst[0] = src.iter().sum::<f32>() / n as f32,
        _ => {
            let shared = src.len().min(dst.len());
            dst[..shared].copy_from_slice(&src[..shared]);
            dst[shared..].fill(0.0);
        }
    }
}
