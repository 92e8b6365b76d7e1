use crate::error::EngineError;
use crate::models::{AudioBuffer, StemBank, TrackRole};
use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// Extensions tried, in order, when resolving a stem by conventional name.
const STEM_EXTENSIONS: [&str; 4] = ["wav", "mp3", "flac", "ogg"];

/// Decode an audio file to interleaved stereo f32 at `sample_rate`,
/// resampling if the source rate differs.
pub fn decode_file(path: &Path, sample_rate: u32) -> anyhow::Result<AudioBuffer> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no default track"))?;
    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;
    let src_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| anyhow!("unknown channel count"))?
        .count();

    let mut sample_buf: Option<SampleBuffer<f32>> = None;
    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(_)) => break,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let decoded = decoder.decode(&packet)?;
        if sample_buf.is_none() {
            sample_buf = Some(SampleBuffer::<f32>::new(
                decoded.capacity() as u64,
                *decoded.spec(),
            ));
        }
        let sbuf = sample_buf.as_mut().unwrap();
        sbuf.copy_interleaved_ref(decoded);
        let data = sbuf.samples();
        for frame in data.chunks(channels) {
            let l = frame[0];
            let r = if channels > 1 { frame[1] } else { frame[0] };
            samples.push(l);
            samples.push(r);
        }
    }

    if samples.is_empty() {
        return Err(anyhow!("decoded no audio frames"));
    }
    if src_rate != sample_rate {
        samples = resample_stereo(&samples, src_rate, sample_rate);
    }
    Ok(AudioBuffer::new(samples, sample_rate))
}

/// Linear-interpolation resampler for interleaved stereo. The output frame
/// count is chosen so the clip keeps its duration at the new rate.
pub fn resample_stereo(input: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || input.len() < 2 {
        return input.to_vec();
    }
    let src_frames = input.len() / 2;
    let dst_frames = ((src_frames as f64 / src_rate as f64) * dst_rate as f64).round() as usize;
    let step = src_rate as f64 / dst_rate as f64;
    let last = src_frames - 1;

    let mut out = Vec::with_capacity(dst_frames * 2);
    for frame in 0..dst_frames {
        let src_pos = frame as f64 * step;
        let lo = (src_pos as usize).min(last);
        let hi = (lo + 1).min(last);
        let t = (src_pos - lo as f64) as f32;
        out.push(input[lo * 2] + (input[hi * 2] - input[lo * 2]) * t);
        out.push(input[lo * 2 + 1] + (input[hi * 2 + 1] - input[lo * 2 + 1]) * t);
    }
    out
}

/// Candidate paths for one stem role under a track-set directory.
pub fn stem_candidates(dir: &Path, role: TrackRole) -> Vec<PathBuf> {
    STEM_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", role.file_stem(), ext)))
        .collect()
}

/// Decode the four stems of a track-set directory by conventional file name.
/// A stem with no file, or one that fails to decode, degrades to a silent
/// channel; a directory where no stem decodes at all is an error.
pub fn load_stem_bank(dir: &Path, sample_rate: u32) -> Result<StemBank, EngineError> {
    let mut bank = StemBank::default();
    for role in TrackRole::STEMS {
        let Some(path) = stem_candidates(dir, role).into_iter().find(|p| p.exists()) else {
            log::warn!("{}: no {} stem, playing silent", dir.display(), role.file_stem());
            continue;
        };
        match decode_file(&path, sample_rate) {
            Ok(buf) => bank.set(role, Arc::new(buf)),
            Err(e) => {
                log::warn!("failed to decode {}: {e:#}, playing silent", path.display());
            }
        }
    }
    if bank.is_empty() {
        return Err(EngineError::AssetLoad {
            path: dir.to_path_buf(),
            reason: "no stem in this set could be decoded".into(),
        });
    }
    Ok(bank)
}

/// Decoded buffers for the session: the clock track plus every stem bank
/// buffered so far. Banks land here both from the synchronous connect path
/// and from background loads; only one bank is bound to live gain channels
/// at a time, the rest sit pre-fetched.
#[derive(Default)]
pub struct AssetStore {
    clock: Option<Arc<AudioBuffer>>,
    banks: HashMap<String, StemBank>,
}

impl AssetStore {
    pub fn set_clock(&mut self, buffer: Arc<AudioBuffer>) {
        self.clock = Some(buffer);
    }

    pub fn clock(&self) -> Option<&Arc<AudioBuffer>> {
        self.clock.as_ref()
    }

    pub fn insert_bank(&mut self, set_id: impl Into<String>, bank: StemBank) {
        self.banks.insert(set_id.into(), bank);
    }

    pub fn bank(&self, set_id: &str) -> Option<&StemBank> {
        self.banks.get(set_id)
    }

    pub fn has_bank(&self, set_id: &str) -> bool {
        self.banks.contains_key(set_id)
    }

    pub fn clear(&mut self) {
        self.clock = None;
        self.banks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_preserves_duration() {
        let input = vec![0.5f32; 100 * 2];
        let out = resample_stereo(&input, 100, 50);
        assert_eq!(out.len(), 50 * 2);
        let up = resample_stereo(&input, 100, 200);
        assert_eq!(up.len(), 200 * 2);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.25f32, -0.25, 0.5, -0.5];
        assert_eq!(resample_stereo(&input, 44_100, 44_100), input);
    }

    #[test]
    fn resample_interpolates_between_frames() {
        // Left channel ramps 0, 1 at 2 Hz; at 4 Hz the midpoint is 0.5.
        let input = vec![0.0f32, 0.0, 1.0, 1.0];
        let out = resample_stereo(&input, 2, 4);
        assert_eq!(out.len(), 4 * 2);
        assert!((out[2] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn stem_candidates_follow_naming_convention() {
        let dir = Path::new("/sets/song-a");
        let paths = stem_candidates(dir, TrackRole::Drums);
        assert_eq!(paths[0], dir.join("drums.wav"));
        assert_eq!(paths[1], dir.join("drums.mp3"));
    }

    #[test]
    fn empty_directory_is_a_load_error() {
        let missing = Path::new("/definitely/not/here");
        match load_stem_bank(missing, 44_100) {
            Err(EngineError::AssetLoad { .. }) => {}
            other => panic!("expected AssetLoad, got {other:?}"),
        }
    }

    #[test]
    fn store_tracks_prefetched_banks() {
        let mut store = AssetStore::default();
        assert!(!store.has_bank("a"));
        store.insert_bank("a", StemBank::default());
        assert!(store.has_bank("a"));
        store.clear();
        assert!(!store.has_bank("a"));
        assert!(store.clock().is_none());
    }
}
