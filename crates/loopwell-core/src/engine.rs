//! Loopwell engine — playback controller over the timer, cache and scheduler.
//!
//! Owns one session (timer, live sources, state machine) behind a mutex.
//! Commands and heartbeat ticks are serialized through that lock; part
//! loading runs outside it so a slow fetch never stalls the heartbeat.
//!
//! State machine:
//!
//! ```text
//! Idle/Paused --play--> Loading --parts ready--> Playing
//! Playing --pause--> Paused          Loading --pause--> Paused (load discarded)
//! Playing --Loop--> Playing (next iteration pre-armed)
//! Playing --End--> Idle (rewound, TrackEnded emitted)
//! any --set_track--> Idle (hard reset)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::{DecodedPart, PartCache};
use crate::config::EngineConfig;
use crate::effects::decode::SymphoniaDecoder;
use crate::effects::{AudioOutput, Fetch, NullOutput};
use crate::error::{PlayerError, Result};
use crate::models::{PlaybackCommand, PlayerEvent, PlayerSnapshot, PlayerState, TrackDescriptor};
use crate::scheduler::{plan_next_loop, plan_now, PlanContext, SourceSet};
use crate::timer::{Clock, SystemClock, Timer, TimerEvent};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The loopwell playback engine.
pub struct Engine {
    shared: Arc<Shared>,
    tick_interval: Duration,
    /// Shutdown signal for the heartbeat thread.
    shutdown: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// State reachable from both the caller's thread and the heartbeat.
struct Shared {
    cache: Arc<PartCache>,
    output: Arc<dyn AudioOutput>,
    session: Mutex<Session>,
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

struct Session {
    track: Option<Arc<TrackDescriptor>>,
    /// Decoded parts of the current track, once loaded.
    parts: Option<Vec<Arc<DecodedPart>>>,
    timer: Timer,
    sources: SourceSet,
    state: PlayerState,
    repeat: bool,
    /// Bumped on every track change; a load that finishes under a stale
    /// generation is discarded.
    generation: u64,
    last_error: Option<String>,
    /// Hardware time at which the armed iteration enters `loop_start`.
    /// Each pre-arm chains off this, so iterations abut exactly.
    next_loop_at: Option<f64>,
}

impl Engine {
    /// Engine on the default cpal output device, decoding with symphonia.
    #[cfg(feature = "native")]
    pub fn native(fetcher: Arc<dyn Fetch>, config: EngineConfig) -> Result<Self> {
        let output = Arc::new(crate::effects::audio::CpalOutput::open()?);
        let decoder = decoder_for(&config, output.sample_rate());
        let cache = Arc::new(PartCache::new(fetcher, Arc::new(decoder)));
        Self::new(cache, output, config)
    }

    /// Engine on `NullOutput`: full scheduling, no sound.
    pub fn headless(fetcher: Arc<dyn Fetch>, config: EngineConfig) -> Result<Self> {
        let output = Arc::new(NullOutput::default());
        let decoder = decoder_for(&config, output.sample_rate());
        let cache = Arc::new(PartCache::new(fetcher, Arc::new(decoder)));
        Self::new(cache, output, config)
    }

    /// Engine with injected collaborators, timed by the wall clock.
    pub fn new(
        cache: Arc<PartCache>,
        output: Arc<dyn AudioOutput>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::with_clock(cache, output, Arc::new(SystemClock::new()), config)
    }

    /// Engine with an injected logical-timer clock.
    pub fn with_clock(
        cache: Arc<PartCache>,
        output: Arc<dyn AudioOutput>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut timer = Timer::new(clock);
        timer.set_bounds(0.0, 0.0, 0.0);
        timer.set_looping(config.repeat);

        let session = Session {
            track: None,
            parts: None,
            timer,
            sources: SourceSet::new(),
            state: PlayerState::Idle,
            repeat: config.repeat,
            generation: 0,
            last_error: None,
            next_loop_at: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                cache,
                output,
                session: Mutex::new(session),
                subscribers: Mutex::new(Vec::new()),
            }),
            tick_interval: config.tick_interval(),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Start the heartbeat. Idempotent — calling twice is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        self.shutdown.store(false, Ordering::SeqCst);
        handles.push(self.start_heartbeat());
    }

    /// Stop the heartbeat, wait for it, and silence the session.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);

        let mut handles = self.handles.lock();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
        drop(handles);

        self.pause();
    }

    /// Fixed-interval timer polling: drives loop pre-arming and track end.
    fn start_heartbeat(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.tick_interval;

        thread::spawn(move || {
            while !shutdown.load(Ordering::SeqCst) {
                thread::sleep(interval);

                if shutdown.load(Ordering::SeqCst) {
                    break;
                }

                shared.tick();
            }
        })
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Replace the current track (or clear it with `None`). Hard reset: all
    /// sources stop, the timer rewinds, and any in-flight load is discarded.
    pub fn set_track(&self, track: Option<Arc<TrackDescriptor>>) -> Result<()> {
        if let Some(track) = &track {
            track.validate()?;
        }

        let mut s = self.shared.session.lock();
        s.sources.stop_all();
        s.generation += 1;
        s.parts = None;
        s.last_error = None;
        s.timer.reset();
        match &track {
            Some(t) => {
                log::info!("loopwell: track {} ({} parts, {:.2}s)", t.id, t.parts.len(), t.duration);
                s.timer.set_bounds(t.duration, t.loop_start, t.loop_end);
            }
            None => {
                log::info!("loopwell: track cleared");
                s.timer.set_bounds(0.0, 0.0, 0.0);
            }
        }
        let repeat = s.repeat;
        s.timer.set_looping(repeat);
        s.track = track;
        self.shared.set_state(&mut s, PlayerState::Idle);
        Ok(())
    }

    /// Start (or restart) playback from the current position.
    ///
    /// Blocks while the track's parts are fetched and decoded. A second
    /// `play()` while loading returns immediately without doing anything.
    pub fn play(&self) -> Result<()> {
        let (track, generation) = {
            let mut s = self.shared.session.lock();
            let track = s.track.clone().ok_or(PlayerError::NoTrack)?;
            if s.state == PlayerState::Loading {
                log::debug!("loopwell: play ignored, already loading");
                return Ok(());
            }
            if s.parts.is_some() {
                self.shared.start_playback(&mut s);
                return Ok(());
            }
            s.sources.stop_all();
            self.shared.set_state(&mut s, PlayerState::Loading);
            (track, s.generation)
        };

        let loaded = self.shared.cache.load_track(&track);

        let mut s = self.shared.session.lock();
        if s.generation != generation {
            log::debug!("loopwell: discarding load for replaced track {}", track.id);
            return Ok(());
        }

        match loaded {
            Ok(parts) => {
                s.parts = Some(parts);
                s.last_error = None;
                if s.state != PlayerState::Loading {
                    // Paused (or restarted by another play) while loading.
                    return Ok(());
                }
                self.shared.start_playback(&mut s);
                Ok(())
            }
            Err(e) => {
                log::error!("loopwell: failed to load {}: {}", track.id, e);
                s.last_error = Some(e.to_string());
                if s.state == PlayerState::Loading {
                    let fallback = if s.timer.position() > 0.0 {
                        PlayerState::Paused
                    } else {
                        PlayerState::Idle
                    };
                    self.shared.set_state(&mut s, fallback);
                }
                self.shared.emit(PlayerEvent::LoadFailed {
                    track_id: track.id.clone(),
                    error: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Stop all sources and freeze the position. No-op unless playing or
    /// loading; pausing a pending load keeps it from starting.
    pub fn pause(&self) {
        let mut s = self.shared.session.lock();
        match s.state {
            PlayerState::Playing => {
                s.sources.stop_all();
                let event = s.timer.pause();
                if event == Some(TimerEvent::End) {
                    self.shared.finish_track(&mut s);
                } else {
                    self.shared.set_state(&mut s, PlayerState::Paused);
                }
            }
            PlayerState::Loading => self.shared.set_state(&mut s, PlayerState::Paused),
            PlayerState::Idle | PlayerState::Paused => {}
        }
    }

    /// Play or pause. `Some(state)` forces the outcome.
    pub fn toggle_play(&self, state: Option<bool>) -> Result<()> {
        let active = {
            let s = self.shared.session.lock();
            matches!(s.state, PlayerState::Playing | PlayerState::Loading)
        };
        if state.unwrap_or(!active) {
            self.play()
        } else {
            self.pause();
            Ok(())
        }
    }

    /// Jump to `seconds` (clamped to the track). While playing, the sources
    /// are replanned from the new position.
    pub fn seek(&self, seconds: f64) {
        let mut s = self.shared.session.lock();
        s.timer.seek(seconds);
        log::debug!("loopwell: seek to {:.3}", s.timer.position());
        if s.state == PlayerState::Playing {
            self.shared.start_playback(&mut s);
        }
    }

    /// Set the repeat flag. While playing, the sources are replanned.
    pub fn set_repeat(&self, repeat: bool) {
        let mut s = self.shared.session.lock();
        s.repeat = repeat;
        s.timer.set_looping(repeat);
        log::info!("loopwell: repeat {}", if repeat { "on" } else { "off" });
        if s.state == PlayerState::Playing {
            self.shared.start_playback(&mut s);
        }
    }

    /// Flip the repeat flag. `Some(state)` forces the outcome.
    pub fn toggle_repeat(&self, state: Option<bool>) {
        let current = self.shared.session.lock().repeat;
        self.set_repeat(state.unwrap_or(!current));
    }

    /// Dispatch a serialized command.
    pub fn command(&self, cmd: PlaybackCommand) -> Result<()> {
        match cmd {
            PlaybackCommand::Play => self.play(),
            PlaybackCommand::Pause => {
                self.pause();
                Ok(())
            }
            PlaybackCommand::TogglePlay { state } => self.toggle_play(state),
            PlaybackCommand::Seek { seconds } => {
                self.seek(seconds);
                Ok(())
            }
            PlaybackCommand::ToggleRepeat { state } => {
                self.toggle_repeat(state);
                Ok(())
            }
        }
    }

    /// Poll the timer once. The heartbeat calls this; hosts without one
    /// (tests, FFI callers driving their own loop) may call it directly.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Observable state for UIs.
    pub fn snapshot(&self) -> PlayerSnapshot {
        let s = self.shared.session.lock();
        let (duration, loop_start, loop_end) = match &s.track {
            Some(t) => (t.duration, t.loop_start, t.loop_end),
            None => (0.0, 0.0, 0.0),
        };
        PlayerSnapshot {
            track_id: s.track.as_ref().map(|t| t.id.clone()),
            state: s.state,
            position: s.timer.current_position(),
            duration,
            loop_start,
            loop_end,
            playing: s.state == PlayerState::Playing,
            loading: s.state == PlayerState::Loading,
            repeat: s.repeat,
            error: s.last_error.clone(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.shared.session.lock().state
    }

    pub fn track(&self) -> Option<Arc<TrackDescriptor>> {
        self.shared.session.lock().track.clone()
    }

    /// Subscribe to player events. Dropped receivers are pruned on the next
    /// emit.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    pub fn cache(&self) -> &PartCache {
        &self.shared.cache
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shared.session.lock().sources.stop_all();
        // Don't join here — the heartbeat exits on its next wakeup
    }
}

// ---------------------------------------------------------------------------
// Session transitions (called with the session lock held)
// ---------------------------------------------------------------------------

impl Shared {
    fn tick(&self) {
        let mut s = self.session.lock();
        if s.state != PlayerState::Playing {
            return;
        }
        s.sources.prune_finished();
        if let Some(event) = s.timer.tick() {
            self.on_timer_event(&mut s, event);
        }
    }

    /// Stop whatever is sounding, plan from the timer position and start.
    fn start_playback(&self, s: &mut Session) {
        s.sources.stop_all();
        if s.timer.pause() == Some(TimerEvent::End) {
            self.finish_track(s);
            return;
        }

        let (planned, next_loop_at) = {
            let Some(parts) = s.parts.as_deref() else {
                return;
            };
            let ctx = PlanContext {
                parts,
                current_time: s.timer.position(),
                looping: s.timer.is_looping(),
                loop_start: s.timer.loop_start(),
                loop_end: s.timer.loop_end(),
                hw_now: self.output.now(),
            };
            let mut planned = plan_now(&ctx);
            let mut next_loop_at = None;
            if ctx.looping {
                planned.extend(plan_next_loop(&ctx));
                next_loop_at = Some(ctx.hw_now + (ctx.loop_end - ctx.current_time).max(0.0));
            }
            log::debug!(
                "loopwell: planned {} sources from {:.3}s (looping: {})",
                planned.len(),
                ctx.current_time,
                ctx.looping
            );
            (planned, next_loop_at)
        };
        s.sources.start(&*self.output, planned);
        s.next_loop_at = next_loop_at;

        self.set_state(s, PlayerState::Playing);
        if let Some(event) = s.timer.resume() {
            self.on_timer_event(s, event);
        }
    }

    fn on_timer_event(&self, s: &mut Session, event: TimerEvent) {
        match event {
            TimerEvent::Loop => {
                let Some(parts) = s.parts.as_deref() else {
                    return;
                };
                // The timer has already wrapped; this arms the iteration
                // after the one the hardware is about to play. It is placed
                // relative to that iteration's start, not to a fresh clock
                // reading, which can lag the device by a callback.
                let loop_start = s.timer.loop_start();
                let loop_end = s.timer.loop_end();
                let (hw_now, current_time) = match s.next_loop_at {
                    Some(at) => (at, loop_start),
                    None => (self.output.now(), s.timer.position()),
                };
                let ctx = PlanContext {
                    parts,
                    current_time,
                    looping: true,
                    loop_start,
                    loop_end,
                    hw_now,
                };
                let planned = plan_next_loop(&ctx);
                s.sources.start(&*self.output, planned);
                s.next_loop_at = Some(hw_now + (loop_end - current_time));
                if let Some(track) = &s.track {
                    log::debug!("loopwell: loop in {}", track.id);
                    self.emit(PlayerEvent::Looped {
                        track_id: track.id.clone(),
                    });
                }
            }
            TimerEvent::End => self.finish_track(s),
        }
    }

    /// Track reached its end: silence, rewind, go idle, tell the playlist.
    fn finish_track(&self, s: &mut Session) {
        s.sources.stop_all();
        s.timer.reset();
        self.set_state(s, PlayerState::Idle);
        if let Some(track) = &s.track {
            log::info!("loopwell: track {} ended", track.id);
            self.emit(PlayerEvent::TrackEnded {
                track_id: track.id.clone(),
            });
        }
    }

    fn set_state(&self, s: &mut Session, state: PlayerState) {
        if s.state == state {
            return;
        }
        log::info!("loopwell: {:?} -> {:?}", s.state, state);
        s.state = state;
        self.emit(PlayerEvent::StateChanged { state });
    }

    fn emit(&self, event: PlayerEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

fn decoder_for(config: &EngineConfig, output_rate: u32) -> SymphoniaDecoder {
    if config.resample {
        SymphoniaDecoder::with_target_rate(output_rate)
    } else {
        SymphoniaDecoder::new()
    }
}
