//! Part cache — memoized fetch + decode, keyed by (track id, part index).
//!
//! At most one fetch/decode runs per key. Callers that arrive while a load is
//! in flight park on that flight's condvar and receive the same `Arc` (or the
//! same error). Ready entries are never evicted; failed flights are removed
//! so the next `load` retries. A loader that unwinds still clears its flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::effects::fetch::extension_hint;
use crate::effects::{Decode, Fetch};
use crate::error::LoadError;
use crate::models::{AudioBuffer, PartRef, TrackDescriptor};

/// A part with its decoded samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPart {
    pub index: usize,
    pub part: PartRef,
    pub buffer: Arc<AudioBuffer>,
}

impl DecodedPart {
    pub fn offset(&self) -> f64 {
        self.part.offset
    }

    pub fn duration(&self) -> f64 {
        self.part.duration
    }

    /// Playable length of the decoded samples, which may differ slightly
    /// from the descriptor's nominal duration.
    pub fn buffer_duration(&self) -> f64 {
        self.buffer.duration()
    }
}

type LoadResult = Result<Arc<DecodedPart>, LoadError>;
type PartKey = (String, usize);

#[derive(Default)]
struct Flight {
    result: Mutex<Option<LoadResult>>,
    done: Condvar,
}

impl Flight {
    fn wait(&self) -> LoadResult {
        let mut result = self.result.lock();
        loop {
            if let Some(r) = result.as_ref() {
                return r.clone();
            }
            self.done.wait(&mut result);
        }
    }

    fn resolve(&self, result: LoadResult) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }
}

enum Entry {
    Ready(Arc<DecodedPart>),
    InFlight(Arc<Flight>),
}

/// Owns an in-flight marker until the load settles. Dropped unsettled (the
/// loader panicked), it removes the marker and fails the waiters.
struct FlightGuard<'a> {
    entries: &'a Mutex<HashMap<PartKey, Entry>>,
    key: Option<PartKey>,
    flight: Arc<Flight>,
    locator: &'a str,
}

impl FlightGuard<'_> {
    fn settle(mut self, result: &LoadResult, track_id: &str, index: usize) {
        let Some(key) = self.key.take() else {
            return;
        };
        {
            let mut entries = self.entries.lock();
            match result {
                Ok(decoded) => {
                    entries.insert(key, Entry::Ready(Arc::clone(decoded)));
                }
                Err(e) => {
                    log::warn!("loopwell: part {} of {} failed to load: {}", index, track_id, e);
                    entries.remove(&key);
                }
            }
        }
        self.flight.resolve(result.clone());
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        log::error!("loopwell: load of {} aborted", self.locator);
        self.entries.lock().remove(&key);
        self.flight.resolve(Err(LoadError::Aborted {
            locator: self.locator.to_string(),
        }));
    }
}

pub struct PartCache {
    fetcher: Arc<dyn Fetch>,
    decoder: Arc<dyn Decode>,
    entries: Mutex<HashMap<PartKey, Entry>>,
}

impl PartCache {
    pub fn new(fetcher: Arc<dyn Fetch>, decoder: Arc<dyn Decode>) -> Self {
        Self {
            fetcher,
            decoder,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch and decode one part, or return the cached result.
    pub fn load(&self, track_id: &str, index: usize, part: &PartRef) -> LoadResult {
        let key = (track_id.to_string(), index);

        let flight = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(Entry::Ready(decoded)) => return Ok(Arc::clone(decoded)),
                Some(Entry::InFlight(flight)) => {
                    let flight = Arc::clone(flight);
                    drop(entries);
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(Flight::default());
                    entries.insert(key.clone(), Entry::InFlight(Arc::clone(&flight)));
                    flight
                }
            }
        };

        let guard = FlightGuard {
            entries: &self.entries,
            key: Some(key),
            flight,
            locator: &part.src,
        };
        let result = self.fetch_and_decode(index, part);
        guard.settle(&result, track_id, index);
        result
    }

    /// Load every part of `track` concurrently. Parts come back in descriptor
    /// order; the first failure (by part index) wins.
    pub fn load_track(&self, track: &TrackDescriptor) -> Result<Vec<Arc<DecodedPart>>, LoadError> {
        if track.parts.len() <= 1 {
            return track
                .parts
                .iter()
                .enumerate()
                .map(|(i, part)| self.load(&track.id, i, part))
                .collect();
        }

        let results: Vec<LoadResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = track
                .parts
                .iter()
                .enumerate()
                .map(|(i, part)| scope.spawn(move || self.load(&track.id, i, part)))
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(i, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(LoadError::Aborted {
                            locator: track.parts[i].src.clone(),
                        })
                    })
                })
                .collect()
        });

        results.into_iter().collect()
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| matches!(e, Entry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, track_id: &str, index: usize) -> bool {
        matches!(
            self.entries.lock().get(&(track_id.to_string(), index)),
            Some(Entry::Ready(_))
        )
    }

    fn fetch_and_decode(&self, index: usize, part: &PartRef) -> LoadResult {
        let bytes = self.fetcher.fetch(&part.src)?;
        let hint = extension_hint(&part.src);
        let buffer = self
            .decoder
            .decode(bytes, hint.as_deref())
            .map_err(|source| LoadError::Decode {
                locator: part.src.clone(),
                source,
            })?;
        log::debug!(
            "loopwell: decoded part {} ({}, {:.3}s)",
            index,
            part.src,
            buffer.duration()
        );
        Ok(Arc::new(DecodedPart {
            index,
            part: part.clone(),
            buffer: Arc::new(buffer),
        }))
    }
}
