//! Track descriptors — the immutable input handed over by the catalog.
//!
//! A track is a timeline of parts. Parts may overlap or leave gaps; the
//! scheduler copes with both. Validation happens once, here, so the timer
//! and scheduler can trust their inputs.

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// One fetchable segment of a track's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartRef {
    /// Opaque fetch key (file path or URL).
    pub src: String,
    /// Where the part starts on the track timeline, in seconds.
    #[serde(default)]
    pub offset: f64,
    /// Length of the part on the timeline, in seconds.
    pub duration: f64,
}

impl PartRef {
    pub fn new(src: impl Into<String>, offset: f64, duration: f64) -> Self {
        Self {
            src: src.into(),
            offset,
            duration,
        }
    }

    /// Timeline position where this part stops sounding.
    pub fn end(&self) -> f64 {
        self.offset + self.duration
    }
}

/// A logical track: duration, loop boundaries and ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackDescriptor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub duration: f64,
    pub loop_start: f64,
    pub loop_end: f64,
    pub parts: Vec<PartRef>,
}

/// Wire shape: loop bounds are optional and fall back to the whole track.
#[derive(Deserialize)]
struct RawTrack {
    id: String,
    #[serde(default)]
    title: Option<String>,
    duration: f64,
    #[serde(default)]
    loop_start: Option<f64>,
    #[serde(default)]
    loop_end: Option<f64>,
    #[serde(default)]
    parts: Vec<PartRef>,
}

impl<'de> Deserialize<'de> for TrackDescriptor {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawTrack::deserialize(deserializer)?;
        Ok(Self {
            id: raw.id,
            title: raw.title,
            duration: raw.duration,
            loop_start: raw.loop_start.unwrap_or(0.0),
            loop_end: raw.loop_end.unwrap_or(raw.duration),
            parts: raw.parts,
        })
    }
}

impl TrackDescriptor {
    /// Build and validate a descriptor.
    pub fn new(
        id: impl Into<String>,
        duration: f64,
        loop_start: f64,
        loop_end: f64,
        parts: Vec<PartRef>,
    ) -> Result<Self, TrackError> {
        let track = Self {
            id: id.into(),
            title: None,
            duration,
            loop_start,
            loop_end,
            parts,
        };
        track.validate()?;
        Ok(track)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Parse a descriptor from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        let track: Self =
            serde_json::from_str(json).map_err(|e| TrackError::Parse(e.to_string()))?;
        track.validate()?;
        Ok(track)
    }

    /// Check the descriptor invariants.
    pub fn validate(&self) -> Result<(), TrackError> {
        if self.id.is_empty() {
            return Err(TrackError::EmptyId);
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(TrackError::InvalidDuration(self.duration));
        }
        let bounds_ok = self.loop_start.is_finite()
            && self.loop_end.is_finite()
            && 0.0 <= self.loop_start
            && self.loop_start <= self.loop_end
            && self.loop_end <= self.duration;
        if !bounds_ok {
            return Err(TrackError::InvalidLoop {
                start: self.loop_start,
                end: self.loop_end,
                duration: self.duration,
            });
        }
        for (index, part) in self.parts.iter().enumerate() {
            if part.src.is_empty() {
                return Err(TrackError::InvalidPart {
                    index,
                    reason: "empty source locator".into(),
                });
            }
            if !part.offset.is_finite() || part.offset < 0.0 {
                return Err(TrackError::InvalidPart {
                    index,
                    reason: format!("offset {} must be >= 0", part.offset),
                });
            }
            if !part.duration.is_finite() || part.duration <= 0.0 {
                return Err(TrackError::InvalidPart {
                    index,
                    reason: format!("duration {} must be > 0", part.duration),
                });
            }
        }
        Ok(())
    }

    /// True when the loop boundaries describe a non-empty region.
    pub fn has_loop_region(&self) -> bool {
        self.loop_end > self.loop_start
    }
}
