//! loopwell data models.
//!
//! Plain value types shared by the timer, scheduler, engine and the outer
//! surfaces. Only the descriptor carries validation; everything else is data.

pub mod audio;
pub mod playback;
pub mod track;

pub use audio::AudioBuffer;
pub use playback::{PlaybackCommand, PlayerEvent, PlayerSnapshot, PlayerState};
pub use track::{PartRef, TrackDescriptor};
