//! Part decoding — symphonia into a fully decoded in-memory buffer.
//!
//! Parts are short enough to hold in memory, and the scheduler needs random
//! access (intra-buffer offsets), so each part is decoded once, completely,
//! and resampled to the output rate up front when asked to.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::effects::Decode;
use crate::error::DecodeError;
use crate::models::AudioBuffer;

/// symphonia-backed decoder (MP3, FLAC, AAC, OGG, WAV, ALAC).
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    target_rate: Option<u32>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resample every decoded part to `rate` (normally the output device rate).
    pub fn with_target_rate(rate: u32) -> Self {
        Self {
            target_rate: Some(rate),
        }
    }
}

impl Decode for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<AudioBuffer, DecodeError> {
        let buffer = decode_all(bytes, hint)?;
        match self.target_rate {
            Some(rate) if rate != buffer.sample_rate => {
                log::debug!("loopwell: resampling part {}Hz -> {}Hz", buffer.sample_rate, rate);
                Ok(resample(&buffer, rate))
            }
            _ => Ok(buffer),
        }
    }
}

fn decode_all(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| DecodeError::Format(e.to_string()))?;

    let mut format = probed.format;
    let track = format.default_track().ok_or(DecodeError::NoTrack)?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::Format(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(DecodeError::Format(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // Corrupt frame: skip it, keep the rest of the part.
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("loopwell: skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(DecodeError::Format(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate = spec.rate;
        channels = spec.channels.count() as u16;

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        return Err(DecodeError::Empty);
    }

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

/// Linear-interpolation resample of a whole decoded part. The frame count
/// scales with the rate change, so the part keeps its duration.
fn resample(buffer: &AudioBuffer, rate: u32) -> AudioBuffer {
    if rate == 0 || buffer.sample_rate == rate {
        return buffer.clone();
    }
    let ch = buffer.channels.max(1) as usize;
    let in_frames = buffer.samples.len() / ch;
    if in_frames == 0 {
        return AudioBuffer::new(Vec::new(), buffer.channels, rate);
    }

    let step = buffer.sample_rate.max(1) as f64 / rate as f64;
    let out_frames = (in_frames as f64 / step).round() as usize;
    let last = in_frames - 1;
    let mut samples = Vec::with_capacity(out_frames * ch);
    for i in 0..out_frames {
        let pos = i as f64 * step;
        let idx = (pos as usize).min(last);
        let next = (idx + 1).min(last);
        let frac = (pos - idx as f64).clamp(0.0, 1.0) as f32;
        let here = &buffer.samples[idx * ch..(idx + 1) * ch];
        let there = &buffer.samples[next * ch..(next + 1) * ch];
        samples.extend(here.iter().zip(there).map(|(a, b)| a + (b - a) * frac));
    }
    AudioBuffer::new(samples, buffer.channels, rate)
}
