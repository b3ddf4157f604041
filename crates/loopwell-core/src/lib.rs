//! loopwell-core — gapless, loop-aware playback of multi-part tracks.
//!
//! A track is a timeline of parts. The engine keeps a logical clock, decodes
//! parts through a memoized cache, and schedules them on the hardware clock
//! so loop points land sample-accurately.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: Models (track descriptors, commands, events, snapshots)
//! Layer 1: Effects (fetch, decode, audio output — behind traits)
//! Layer 2: Core (timer, part cache, scheduler)
//! Layer 3: Engine (session state machine, heartbeat)
//! ```

pub mod cache;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod timer;

#[cfg(test)]
mod testing;

pub use cache::{DecodedPart, PartCache};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{PlayerError, Result};
pub use models::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::decode::SymphoniaDecoder;
    use crate::effects::fetch::FileFetcher;
    use crate::testing::wav_bytes;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Two WAV parts on disk and a descriptor pointing at them.
    fn wav_track(dir: &TempDir) -> TrackDescriptor {
        for name in ["intro.wav", "loop.wav"] {
            let bytes = wav_bytes(&vec![0.1; 8_000], 1, 8_000);
            std::fs::write(dir.path().join(name), bytes).unwrap();
        }
        TrackDescriptor::from_json(
            r#"{"id":"wav","duration":2,"loop_start":1,
                "parts":[{"src":"intro.wav","duration":1},{"src":"loop.wav","offset":1,"duration":1}]}"#,
        )
        .unwrap()
    }

    #[test]
    fn headless_engine_plays_real_files() {
        let dir = TempDir::new().expect("tempdir");
        let track = wav_track(&dir);
        let engine = Engine::headless(
            Arc::new(FileFetcher::with_root(dir.path())),
            EngineConfig::default(),
        )
        .unwrap();

        engine.set_track(Some(Arc::new(track))).unwrap();
        engine.play().unwrap();

        let snap = engine.snapshot();
        assert_eq!(snap.state, PlayerState::Playing);
        assert_eq!(snap.loop_end, 2.0);
        assert!(snap.repeat);
        assert_eq!(engine.cache().len(), 2);

        engine.pause();
        assert_eq!(engine.state(), PlayerState::Paused);
    }

    #[test]
    fn resampling_decoder_matches_output_rate() {
        let dir = TempDir::new().expect("tempdir");
        let track = wav_track(&dir);
        let cache = PartCache::new(
            Arc::new(FileFetcher::with_root(dir.path())),
            Arc::new(SymphoniaDecoder::with_target_rate(16_000)),
        );
        let parts = cache.load_track(&track).unwrap();
        assert!(parts.iter().all(|p| p.buffer.sample_rate == 16_000));
        assert!((parts[1].buffer_duration() - 1.0).abs() < 0.01);
    }

    #[test]
    fn heartbeat_drives_the_timer() {
        let dir = TempDir::new().expect("tempdir");
        let track = wav_track(&dir);
        let config = EngineConfig::from_json(r#"{"tick_interval_ms": 10, "repeat": false}"#).unwrap();
        let engine = Engine::headless(Arc::new(FileFetcher::with_root(dir.path())), config).unwrap();
        let events = engine.subscribe();

        engine.set_track(Some(Arc::new(track))).unwrap();
        engine.start();
        engine.play().unwrap();

        let ended = loop {
            match events.recv_timeout(std::time::Duration::from_secs(5)) {
                Ok(e @ PlayerEvent::TrackEnded { .. }) => break Some(e),
                Ok(_) => continue,
                Err(_) => break None,
            }
        };
        engine.shutdown();
        assert_eq!(
            ended,
            Some(PlayerEvent::TrackEnded {
                track_id: "wav".into()
            })
        );
        assert_eq!(engine.state(), PlayerState::Idle);
    }

    #[test]
    fn shutdown_completes_without_deadlock() {
        let engine = Engine::headless(Arc::new(FileFetcher::new()), EngineConfig::default()).unwrap();
        engine.start();
        engine.shutdown();
    }
}
