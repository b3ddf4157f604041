//! Part scheduler — turns a timeline position into hardware start times.
//!
//! Planning is pure: given the decoded parts, the logical position, the loop
//! window and the hardware clock's `now`, compute which parts to start, when,
//! and from where in their buffers. `SourceSet` then owns the started sources.
//!
//! Loop transitions are placed on the hardware clock one iteration ahead
//! (`plan_next_loop`), so the audible loop point never depends on how
//! promptly the logical timer is polled.

use std::fmt;
use std::sync::Arc;

use crate::cache::DecodedPart;
use crate::effects::{AudioOutput, AudioSource};

/// Snapshot of everything a plan depends on.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub parts: &'a [Arc<DecodedPart>],
    /// Logical timer position.
    pub current_time: f64,
    /// Whether the loop region is in effect for this pass.
    pub looping: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    /// Hardware clock reading taken when the plan is made.
    pub hw_now: f64,
}

/// One scheduled playback of a decoded part. Never reused across loop
/// iterations; each plan produces fresh ones.
pub struct PlannedSource {
    pub part: Arc<DecodedPart>,
    /// Hardware time to start sounding.
    pub when: f64,
    /// Seconds into the part's buffer to start from.
    pub offset: f64,
    /// Play at most this long. `None` plays to the end of the buffer.
    pub length: Option<f64>,
    handle: Option<Box<dyn AudioSource>>,
}

impl PlannedSource {
    fn new(part: &Arc<DecodedPart>, when: f64, offset: f64, length: Option<f64>) -> Self {
        Self {
            part: Arc::clone(part),
            when,
            offset,
            length,
            handle: None,
        }
    }

    /// Bind a fresh hardware source to the part's buffer and start it.
    /// A previous handle, if any, is stopped first.
    pub fn start(&mut self, output: &dyn AudioOutput) {
        self.stop();
        let mut handle = output.create_source(Arc::clone(&self.part.buffer));
        handle.start(self.when, self.offset, self.length);
        self.handle = Some(handle);
    }

    /// Stop and release the hardware source. Idempotent.
    pub fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.stop();
        }
    }

    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl fmt::Debug for PlannedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlannedSource")
            .field("part", &self.part.index)
            .field("when", &self.when)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("started", &self.is_started())
            .finish()
    }
}

/// Sources for the rest of the current pass, starting at `current_time`.
pub fn plan_now(ctx: &PlanContext<'_>) -> Vec<PlannedSource> {
    ctx.parts
        .iter()
        .filter(|p| p.part.end() >= ctx.current_time)
        .filter(|p| !ctx.looping || p.offset() < ctx.loop_end)
        .filter_map(|p| {
            let when = ctx.hw_now + (p.offset() - ctx.current_time).max(0.0);
            let offset = (ctx.current_time - p.offset()).max(0.0);
            let length = ctx
                .looping
                .then(|| ctx.loop_end - p.offset().max(ctx.current_time));
            admit(p, when, offset, length)
        })
        .collect()
}

/// Sources for the next iteration of the loop region, starting at the
/// hardware time the current pass reaches `loop_end`.
pub fn plan_next_loop(ctx: &PlanContext<'_>) -> Vec<PlannedSource> {
    let until_loop_end = (ctx.loop_end - ctx.current_time).max(0.0);
    ctx.parts
        .iter()
        .filter(|p| p.part.end() > ctx.loop_start && p.offset() < ctx.loop_end)
        .filter_map(|p| {
            let when = ctx.hw_now + until_loop_end + (p.offset() - ctx.loop_start).max(0.0);
            let offset = (ctx.loop_start - p.offset()).max(0.0);
            let length = Some(ctx.loop_end - p.offset().max(ctx.loop_start));
            admit(p, when, offset, length)
        })
        .collect()
}

fn admit(
    part: &Arc<DecodedPart>,
    when: f64,
    offset: f64,
    length: Option<f64>,
) -> Option<PlannedSource> {
    if offset >= part.buffer_duration() {
        log::debug!(
            "loopwell: skipping part {} ({}): offset {:.3}s past buffer end {:.3}s",
            part.index,
            part.part.src,
            offset,
            part.buffer_duration()
        );
        return None;
    }
    if matches!(length, Some(l) if l <= 0.0) {
        log::debug!("loopwell: skipping part {}: nothing left before loop end", part.index);
        return None;
    }
    Some(PlannedSource::new(part, when, offset, length))
}

/// The live sources of one playback session.
#[derive(Debug, Default)]
pub struct SourceSet {
    sources: Vec<PlannedSource>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start every planned source on `output` and take ownership of them.
    pub fn start(&mut self, output: &dyn AudioOutput, planned: Vec<PlannedSource>) {
        for mut source in planned {
            log::debug!(
                "loopwell: start part {} at hw {:.3} from {:.3}s",
                source.part.index,
                source.when,
                source.offset
            );
            source.start(output);
            self.sources.push(source);
        }
    }

    /// Stop and release every source, started or not.
    pub fn stop_all(&mut self) {
        for source in &mut self.sources {
            source.stop();
        }
        self.sources.clear();
    }

    /// Release sources the output reports as done.
    pub fn prune_finished(&mut self) {
        self.sources.retain_mut(|s| {
            if s.is_finished() {
                s.stop();
                false
            } else {
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl Drop for SourceSet {
    fn drop(&mut self) {
        self.stop_all();
    }
}
