//! Track descriptors built from plain audio files laid end to end.

use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use loopwell_core::{PartRef, TrackDescriptor};

/// Probe an audio file's playable length in seconds without decoding it.
pub fn probe_duration(path: &Path) -> Result<f64, String> {
    let tagged = Probe::open(path)
        .and_then(|p| p.read())
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    let seconds = tagged.properties().duration().as_secs_f64();
    if seconds <= 0.0 {
        return Err(format!("{}: no audio duration", path.display()));
    }
    Ok(seconds)
}

/// One part per file, each starting where the previous one ends. The loop
/// region defaults to the whole track.
pub fn track_from_files(
    files: &[String],
    loop_start: Option<f64>,
    loop_end: Option<f64>,
) -> Result<TrackDescriptor, String> {
    if files.is_empty() {
        return Err("no input files".into());
    }

    let mut parts = Vec::with_capacity(files.len());
    let mut offset = 0.0;
    let mut canonical = Vec::with_capacity(files.len());
    for file in files {
        let path = std::fs::canonicalize(file).map_err(|e| format!("{}: {}", file, e))?;
        let duration = probe_duration(&path)?;
        let src = path.to_string_lossy().into_owned();
        parts.push(PartRef::new(src.clone(), offset, duration));
        canonical.push(src);
        offset += duration;
    }

    let title = Path::new(&files[0])
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string();

    let track = TrackDescriptor::new(
        stable_id(&canonical, &title),
        offset,
        loop_start.unwrap_or(0.0),
        loop_end.unwrap_or(offset),
        parts,
    )
    .map_err(|e| e.to_string())?;
    Ok(track.with_title(title))
}

/// Stable ID from the part paths — FNV-1a hash, so the same files always
/// give the same track (and hit the same cache entries).
pub fn stable_id(paths: &[String], name: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for path in paths {
        for byte in path.bytes().chain(std::iter::once(0)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    format!("{}_{:016x}", sanitize_id(name), hash)
}

fn sanitize_id(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_wav(path: &Path, frames: u32) {
        let rate: u32 = 8_000;
        let data_len = frames * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVEfmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&rate.to_le_bytes());
        out.extend_from_slice(&(rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + data_len as usize, 0);
        std::fs::write(path, out).unwrap();
    }

    #[test]
    fn stable_id_deterministic() {
        let paths = vec!["/music/a.ogg".to_string()];
        assert_eq!(stable_id(&paths, "a"), stable_id(&paths, "a"));
    }

    #[test]
    fn stable_id_different_for_different_paths() {
        let a = stable_id(&["/music/a.ogg".to_string()], "a");
        let b = stable_id(&["/other/a.ogg".to_string()], "a");
        assert_ne!(a, b);
    }

    #[test]
    fn stable_id_respects_part_boundaries() {
        let a = stable_id(&["ab".to_string(), "c".to_string()], "x");
        let b = stable_id(&["a".to_string(), "bc".to_string()], "x");
        assert_ne!(a, b);
    }

    #[test]
    fn files_are_laid_end_to_end() {
        let dir = TempDir::new().expect("tempdir");
        let intro = dir.path().join("intro part.wav");
        let body = dir.path().join("body.wav");
        write_wav(&intro, 8_000);
        write_wav(&body, 16_000);

        let files = vec![
            intro.to_string_lossy().into_owned(),
            body.to_string_lossy().into_owned(),
        ];
        let track = track_from_files(&files, Some(1.0), None).unwrap();

        assert_eq!(track.parts.len(), 2);
        assert!((track.parts[1].offset - 1.0).abs() < 0.01);
        assert!((track.duration - 3.0).abs() < 0.01);
        assert_eq!(track.loop_start, 1.0);
        assert_eq!(track.loop_end, track.duration);
        assert_eq!(track.title.as_deref(), Some("intro part"));
        assert!(track.id.starts_with("intro_part_"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = track_from_files(&["/nonexistent/x.wav".to_string()], None, None).unwrap_err();
        assert!(err.contains("/nonexistent/x.wav"));
    }

    #[test]
    fn loop_end_past_duration_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("a.wav");
        write_wav(&path, 8_000);
        let files = vec![path.to_string_lossy().into_owned()];
        assert!(track_from_files(&files, None, Some(5.0)).is_err());
    }
}
