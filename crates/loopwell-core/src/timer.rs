//! Logical playback timer.
//!
//! A pollable clock decoupled from the audio hardware. Position advances by
//! the wall-clock time elapsed between samples; boundary crossings are
//! reported as return values rather than callbacks, so the owner decides
//! what to do with them while it still holds its own state.
//!
//! The timer only decides *when* the engine should pre-arm the next loop. The
//! audible loop point itself is placed by the hardware clock.

use std::sync::Arc;
use std::time::Instant;

/// Seconds on some monotonic reference.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Monotonic wall clock anchored at construction.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Boundary crossing reported by the timer. At most one per evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Position wrapped from loop-end back into the loop region.
    Loop,
    /// Position reached the track duration; the timer stopped.
    End,
}

pub struct Timer {
    clock: Arc<dyn Clock>,
    position: f64,
    last_sample: f64,
    running: bool,
    duration: f64,
    looping: bool,
    loop_start: f64,
    loop_end: f64,
    /// Set by a seek at or past loop-end while looping: play out to the end
    /// of the track instead of wrapping on the next boundary.
    skip_loop: bool,
}

impl Timer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            clock,
            position: 0.0,
            last_sample: now,
            running: false,
            duration: f64::INFINITY,
            looping: false,
            loop_start: 0.0,
            loop_end: f64::INFINITY,
            skip_loop: false,
        }
    }

    /// Replace duration and loop boundaries. Does not move the position.
    pub fn set_bounds(&mut self, duration: f64, loop_start: f64, loop_end: f64) {
        self.duration = duration;
        self.loop_start = loop_start;
        self.loop_end = loop_end;
    }

    /// Persistent repeat setting. Clears any pending loop suppression, except
    /// that enabling repeat while already past loop-end defers wrapping to
    /// the next pass.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        self.skip_loop = looping
            && self.loop_end > self.loop_start
            && self.current_position() >= self.loop_end;
    }

    /// Whether the next loop-end crossing will wrap.
    pub fn is_looping(&self) -> bool {
        self.looping && !self.skip_loop && self.loop_end > self.loop_start
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn loop_start(&self) -> f64 {
        self.loop_start
    }

    pub fn loop_end(&self) -> f64 {
        self.loop_end
    }

    /// Position as of the last sample.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Position extrapolated to now, without evaluating boundaries.
    pub fn current_position(&self) -> f64 {
        if !self.running {
            return self.position;
        }
        let elapsed = (self.clock.now() - self.last_sample).max(0.0);
        (self.position + elapsed).min(self.duration)
    }

    /// Start advancing from the current position.
    pub fn resume(&mut self) -> Option<TimerEvent> {
        self.last_sample = self.clock.now();
        self.running = true;
        self.advance()
    }

    /// Freeze the position at its precise current value. No-op when paused.
    pub fn pause(&mut self) -> Option<TimerEvent> {
        if !self.running {
            return None;
        }
        let event = self.advance();
        self.running = false;
        event
    }

    /// Jump to `value`, clamped to `[0, duration]`.
    pub fn seek(&mut self, value: f64) {
        let value = if value.is_nan() { 0.0 } else { value };
        self.position = value.clamp(0.0, self.duration.max(0.0));
        self.last_sample = self.clock.now();
        self.skip_loop =
            self.looping && self.loop_end > self.loop_start && self.position >= self.loop_end;
    }

    /// Stop and rewind to the start.
    pub fn reset(&mut self) {
        self.running = false;
        self.skip_loop = false;
        self.position = 0.0;
        self.last_sample = self.clock.now();
    }

    /// Periodic poll.
    pub fn tick(&mut self) -> Option<TimerEvent> {
        if !self.running {
            return None;
        }
        self.advance()
    }

    fn advance(&mut self) -> Option<TimerEvent> {
        let now = self.clock.now();
        self.position += (now - self.last_sample).max(0.0);
        self.last_sample = now;

        if self.is_looping() && self.position >= self.loop_end {
            let overflow = self.position - self.loop_end;
            self.position = self.loop_start + overflow;
            return Some(TimerEvent::Loop);
        }

        if !self.is_looping() && self.position >= self.duration {
            self.position = self.duration;
            self.running = false;
            self.skip_loop = false;
            return Some(TimerEvent::End);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    fn timer(duration: f64, start: f64, end: f64, looping: bool) -> (Arc<ManualClock>, Timer) {
        let clock = Arc::new(ManualClock::new());
        let mut timer = Timer::new(clock.clone());
        timer.set_bounds(duration, start, end);
        timer.set_looping(looping);
        (clock, timer)
    }

    #[test]
    fn advances_by_elapsed_time() {
        let (clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        assert_eq!(timer.resume(), None);
        clock.advance(0.25);
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.position(), 0.25);
    }

    #[test]
    fn paused_timer_does_not_advance() {
        let (clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        timer.resume();
        clock.advance(1.0);
        timer.pause();
        clock.advance(5.0);
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.position(), 1.0);
        assert_eq!(timer.current_position(), 1.0);
    }

    #[test]
    fn pause_captures_time_since_last_tick() {
        let (clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        timer.resume();
        clock.advance(0.25);
        timer.tick();
        clock.advance(0.125);
        timer.pause();
        assert_eq!(timer.position(), 0.375);
    }

    #[test]
    fn pause_twice_is_same_as_once() {
        let (clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        timer.resume();
        clock.advance(2.0);
        assert_eq!(timer.pause(), None);
        let position = timer.position();
        clock.advance(1.0);
        assert_eq!(timer.pause(), None);
        assert_eq!(timer.position(), position);
        assert!(!timer.is_running());
    }

    #[test]
    fn end_clamps_and_fires_once() {
        let (clock, mut timer) = timer(3.0, 0.0, 3.0, false);
        timer.resume();
        let mut ends = 0;
        let mut last = 0.0;
        for _ in 0..40 {
            clock.advance(0.2);
            if timer.tick() == Some(TimerEvent::End) {
                ends += 1;
            }
            assert!(timer.position() >= last);
            last = timer.position();
        }
        assert_eq!(ends, 1);
        assert_eq!(timer.position(), 3.0);
        assert!(!timer.is_running());
    }

    #[test]
    fn loop_wraps_with_exact_overflow() {
        let (clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.resume();
        clock.advance(8.125);
        assert_eq!(timer.tick(), Some(TimerEvent::Loop));
        assert_eq!(timer.position() - 2.0, 0.125);
        assert!(timer.is_running());
    }

    #[test]
    fn looping_never_ends() {
        let (clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.resume();
        for _ in 0..500 {
            clock.advance(0.2);
            assert_ne!(timer.tick(), Some(TimerEvent::End));
            assert!(timer.position() < 8.0 + 0.2);
        }
    }

    #[test]
    fn one_event_per_tick_after_long_stall() {
        let (clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.resume();
        clock.advance(20.0);
        assert_eq!(timer.tick(), Some(TimerEvent::Loop));
        assert_eq!(timer.position(), 14.0);
        assert_eq!(timer.tick(), Some(TimerEvent::Loop));
        assert_eq!(timer.position(), 8.0);
    }

    #[test]
    fn seek_while_paused_reads_back_exactly() {
        let (_clock, mut timer) = timer(10.0, 2.0, 8.0, false);
        for x in [0.0, 0.1, 3.3, 7.999, 10.0] {
            timer.seek(x);
            assert_eq!(timer.position(), x);
        }
    }

    #[test]
    fn seek_clamps_to_duration() {
        let (_clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        timer.seek(12.0);
        assert_eq!(timer.position(), 10.0);
        timer.seek(-1.0);
        assert_eq!(timer.position(), 0.0);
    }

    #[test]
    fn seek_while_running_reanchors() {
        let (clock, mut timer) = timer(10.0, 0.0, 10.0, false);
        timer.resume();
        clock.advance(3.0);
        timer.seek(1.0);
        clock.advance(0.5);
        timer.tick();
        assert_eq!(timer.position(), 1.5);
    }

    #[test]
    fn seek_past_loop_end_plays_out_to_end() {
        let (clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.seek(9.0);
        assert!(!timer.is_looping());
        timer.resume();
        clock.advance(0.5);
        assert_eq!(timer.tick(), None);
        assert_eq!(timer.position(), 9.5);
        clock.advance(0.75);
        assert_eq!(timer.tick(), Some(TimerEvent::End));
        assert_eq!(timer.position(), 10.0);
        assert!(timer.is_looping());
    }

    #[test]
    fn seek_back_inside_loop_restores_wrapping() {
        let (_clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.seek(9.0);
        assert!(!timer.is_looping());
        timer.seek(4.0);
        assert!(timer.is_looping());
    }

    #[test]
    fn enabling_repeat_past_loop_end_plays_out() {
        let (clock, mut timer) = timer(10.0, 2.0, 8.0, false);
        timer.seek(9.0);
        timer.set_looping(true);
        assert!(!timer.is_looping());
        timer.resume();
        clock.advance(1.0);
        assert_eq!(timer.tick(), Some(TimerEvent::End));
    }

    #[test]
    fn disabling_repeat_clears_suppression() {
        let (_clock, mut timer) = timer(10.0, 2.0, 8.0, true);
        timer.seek(9.0);
        timer.set_looping(false);
        timer.seek(4.0);
        timer.set_looping(true);
        assert!(timer.is_looping());
    }

    #[test]
    fn empty_loop_region_does_not_wrap() {
        let (clock, mut timer) = timer(4.0, 2.0, 2.0, true);
        timer.resume();
        clock.advance(2.5);
        assert_eq!(timer.tick(), None);
        clock.advance(2.0);
        assert_eq!(timer.tick(), Some(TimerEvent::End));
    }

    #[test]
    fn resume_at_duration_ends_immediately() {
        let (_clock, mut timer) = timer(5.0, 0.0, 5.0, false);
        timer.seek(5.0);
        assert_eq!(timer.resume(), Some(TimerEvent::End));
        assert!(!timer.is_running());
    }

    #[test]
    fn reset_rewinds() {
        let (clock, mut timer) = timer(5.0, 0.0, 5.0, false);
        timer.resume();
        clock.advance(2.0);
        timer.tick();
        timer.reset();
        assert_eq!(timer.position(), 0.0);
        assert!(!timer.is_running());
    }
}
