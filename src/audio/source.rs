//! Decoded, seekable audio assets
//!
//! An `AudioSource` is immutable once built and cheap to clone: decks, the
//! sync loop and the retire queue all hold the same `Arc`'d sample data.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;
use uuid::Uuid;

use crate::error::DecodeError;

/// Opaque identity of a loaded asset
///
/// A fresh id is minted for every decode, so reloading the same file is
/// still observed as a track change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(Uuid);

impl SourceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Descriptive metadata carried alongside the samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
}

#[derive(Debug)]
struct SourceData {
    id: SourceId,
    info: TrackInfo,
    /// Interleaved stereo samples
    samples: Box<[f32]>,
    sample_rate: u32,
}

/// Decoded stereo asset
#[derive(Debug, Clone)]
pub struct AudioSource {
    inner: Arc<SourceData>,
}

impl AudioSource {
    /// Build a source from interleaved samples with any channel count
    ///
    /// Mono is duplicated to both channels; beyond two channels only the
    /// first two are kept.
    pub fn from_interleaved(
        samples: &[f32],
        channels: u16,
        sample_rate: u32,
        info: TrackInfo,
    ) -> Result<Self, DecodeError> {
        if channels == 0 || sample_rate == 0 {
            return Err(DecodeError::UnsupportedFormat(format!(
                "{} channels at {} Hz",
                channels, sample_rate
            )));
        }
        let channels = channels as usize;
        let frames = samples.len() / channels;
        if frames == 0 {
            return Err(DecodeError::Empty);
        }

        let mut stereo = Vec::with_capacity(frames * 2);
        for frame in samples.chunks_exact(channels) {
            let left = frame[0];
            let right = if channels > 1 { frame[1] } else { left };
            stereo.push(left);
            stereo.push(right);
        }

        Ok(Self {
            inner: Arc::new(SourceData {
                id: SourceId::new(),
                info,
                samples: stereo.into_boxed_slice(),
                sample_rate,
            }),
        })
    }

    pub fn id(&self) -> SourceId {
        self.inner.id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.inner.info
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.inner.samples.len() / 2
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.inner.sample_rate as f64
    }

    /// Stereo sample pair at `frame`, silence past the end
    #[inline]
    pub fn frame(&self, frame: usize) -> (f32, f32) {
        let base = frame * 2;
        match self.inner.samples.get(base..base + 2) {
            Some(pair) => (pair[0], pair[1]),
            None => (0.0, 0.0),
        }
    }

    /// Linearly interpolated stereo sample at a fractional frame position
    #[inline]
    pub fn sample_at(&self, position: f64) -> (f32, f32) {
        let index = position.floor();
        let frac = (position - index) as f32;
        let index = index as usize;
        let (l0, r0) = self.frame(index);
        if frac == 0.0 {
            return (l0, r0);
        }
        let (l1, r1) = self.frame(index + 1);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }
}

/// Decode a file into an `AudioSource`
///
/// Runs on the caller's thread and may take a while for long files; never
/// call it from the audio callback.
pub fn decode_file(path: &Path) -> Result<AudioSource, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

    let mut info = TrackInfo::default();
    if let Some(rev) = probed.format.metadata().current() {
        read_tags(rev.tags(), &mut info);
    }
    if info == TrackInfo::default() {
        if let Some(metadata) = probed.metadata.get() {
            if let Some(rev) = metadata.current() {
                read_tags(rev.tags(), &mut info);
            }
        }
    }
    if info.title.is_none() {
        info.title = path.file_stem().map(|s| s.to_string_lossy().into_owned());
    }

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::NoAudioTrack(path.display().to_string()))?;

    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(DecodeError::UnsupportedFormat(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buffer.samples());
            }
            // Corrupt packets are skipped; the rest of the file still plays
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::debug!("Skipping undecodable packet in {}: {}", path.display(), e);
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(e) => return Err(DecodeError::UnsupportedFormat(e.to_string())),
        }
    }

    AudioSource::from_interleaved(&samples, channels, sample_rate, info)
}

fn read_tags(tags: &[symphonia::core::meta::Tag], info: &mut TrackInfo) {
    for tag in tags {
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => info.title = Some(tag.value.to_string()),
            Some(StandardTagKey::Artist) => info.artist = Some(tag.value.to_string()),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_is_duplicated() {
        let source = AudioSource::from_interleaved(&[0.1, 0.2], 1, 100, TrackInfo::default()).unwrap();
        assert_eq!(source.frames(), 2);
        assert_eq!(source.frame(1), (0.2, 0.2));
        assert_eq!(source.frame(2), (0.0, 0.0));
    }

    #[test]
    fn test_duration_and_interpolation() {
        let samples: Vec<f32> = (0..200).map(|i| (i / 2) as f32).collect();
        let source = AudioSource::from_interleaved(&samples, 2, 100, TrackInfo::default()).unwrap();

        assert!((source.duration() - 1.0).abs() < 1e-9);
        let (l, r) = source.sample_at(10.5);
        assert!((l - 10.5).abs() < 1e-6);
        assert!((r - 10.5).abs() < 1e-6);
    }

    #[test]
    fn test_empty_asset_is_rejected() {
        let err = AudioSource::from_interleaved(&[], 2, 44100, TrackInfo::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }

    #[test]
    fn test_each_source_gets_a_fresh_id() {
        let a = AudioSource::from_interleaved(&[0.0; 4], 2, 100, TrackInfo::default()).unwrap();
        let b = AudioSource::from_interleaved(&[0.0; 4], 2, 100, TrackInfo::default()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_garbage_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(matches!(decode_file(&path), Err(DecodeError::UnsupportedFormat(_))));
    }
}
