//! Decoded sample data.

/// Interleaved f32 PCM, fully decoded in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Silent buffer of the given length. Handy for fixtures and headless use.
    pub fn silence(seconds: f64, channels: u16, sample_rate: u32) -> Self {
        let frames = (seconds * sample_rate as f64).round() as usize;
        Self::new(vec![0.0; frames * channels as usize], channels, sample_rate)
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Playable length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}
