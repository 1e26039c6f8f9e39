//! Per-source WAV track writing with silence substitution while muted.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use capstan_common::{CapstanError, CapstanResult};
use capstan_platform_core::{AudioFormat, SampleFormat};
use parking_lot::Mutex;

struct OpenTrack {
    writer: hound::WavWriter<BufWriter<File>>,
    format: AudioFormat,
    /// Bytes of a sample frame split across buffers.
    carry: Vec<u8>,
}

/// Writes one audio source to a WAV file.
///
/// While the mute flag is set every buffer is replaced by the same number
/// of zero samples, so the track length always follows wall time.
pub struct TrackWriter {
    path: PathBuf,
    muted: Arc<AtomicBool>,
    track: Mutex<Option<OpenTrack>>,
    bytes_written: AtomicU64,
    buffers_written: AtomicU64,
    write_error_logged: AtomicBool,
}

impl TrackWriter {
    /// A writer for `path`. Nothing is created on disk until [`open`](Self::open).
    pub fn new(path: impl Into<PathBuf>, muted: Arc<AtomicBool>) -> Self {
        Self {
            path: path.into(),
            muted,
            track: Mutex::new(None),
            bytes_written: AtomicU64::new(0),
            buffers_written: AtomicU64::new(0),
            write_error_logged: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file with a header matching `format`.
    pub fn open(&self, format: AudioFormat) -> CapstanResult<()> {
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: (format.bytes_per_sample() * 8) as u16,
            sample_format: match format.sample_format {
                SampleFormat::I16 => hound::SampleFormat::Int,
                SampleFormat::F32 => hound::SampleFormat::Float,
            },
        };
        let writer = hound::WavWriter::create(&self.path, spec).map_err(|e| {
            CapstanError::capture_start(format!(
                "Failed to create {}: {e}",
                self.path.display()
            ))
        })?;
        *self.track.lock() = Some(OpenTrack {
            writer,
            format,
            carry: Vec::new(),
        });
        Ok(())
    }

    /// Append one little-endian interleaved buffer.
    ///
    /// A trailing partial frame is held back and completed by the next
    /// buffer. Writes before `open` or after `finish` are ignored.
    pub fn write_buffer(&self, data: &[u8]) {
        let mut guard = self.track.lock();
        let Some(track) = guard.as_mut() else {
            return;
        };

        let joined;
        let data = if track.carry.is_empty() {
            data
        } else {
            track.carry.extend_from_slice(data);
            joined = std::mem::take(&mut track.carry);
            joined.as_slice()
        };

        let usable = data.len() - data.len() % track.format.block_align().max(1);
        track.carry.extend_from_slice(&data[usable..]);
        let data = &data[..usable];
        let muted = self.muted.load(Ordering::Relaxed);

        let result = match track.format.sample_format {
            SampleFormat::I16 => data.chunks_exact(2).try_for_each(|s| {
                let sample = if muted { 0 } else { i16::from_le_bytes([s[0], s[1]]) };
                track.writer.write_sample(sample)
            }),
            SampleFormat::F32 => data.chunks_exact(4).try_for_each(|s| {
                let sample = if muted {
                    0.0
                } else {
                    f32::from_le_bytes([s[0], s[1], s[2], s[3]])
                };
                track.writer.write_sample(sample)
            }),
        };

        match result {
            Ok(()) => {
                self.bytes_written.fetch_add(usable as u64, Ordering::Relaxed);
                self.buffers_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                if !self.write_error_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Audio write failed");
                }
            }
        }
    }

    /// Flush and close the file. Later writes are ignored.
    pub fn finish(&self) -> CapstanResult<()> {
        let Some(track) = self.track.lock().take() else {
            return Ok(());
        };
        if !track.carry.is_empty() {
            tracing::trace!(
                path = %self.path.display(),
                bytes = track.carry.len(),
                "Incomplete trailing sample frame dropped"
            );
        }
        track
            .writer
            .finalize()
            .map_err(|e| CapstanError::finalize_io(&self.path, format!("Failed to finalize WAV: {e}")))?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = self.bytes_written(),
            buffers = self.buffers_written(),
            "Audio track closed"
        );
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.track.lock().is_some()
    }

    /// PCM bytes written, silence included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn buffers_written(&self) -> u64 {
        self.buffers_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stereo() -> AudioFormat {
        AudioFormat::new(44_100, 2, SampleFormat::I16)
    }

    fn loud_buffer(frames: usize) -> Vec<u8> {
        (0..frames * 2)
            .flat_map(|i| ((i as i16).wrapping_mul(97) | 1).to_le_bytes())
            .collect()
    }

    fn read_samples(path: &Path) -> Vec<i16> {
        hound::WavReader::open(path)
            .unwrap()
            .into_samples::<i16>()
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn test_muted_buffers_become_silence_of_equal_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sys.wav");
        let muted = Arc::new(AtomicBool::new(false));
        let writer = TrackWriter::new(&path, Arc::clone(&muted));
        writer.open(stereo()).unwrap();

        writer.write_buffer(&loud_buffer(4));
        muted.store(true, Ordering::Relaxed);
        writer.write_buffer(&loud_buffer(4));
        writer.finish().unwrap();

        let samples = read_samples(&path);
        assert_eq!(samples.len(), 16);
        assert!(samples[..8].iter().all(|s| *s != 0));
        assert!(samples[8..].iter().all(|s| *s == 0));
        assert_eq!(writer.bytes_written(), 32);
    }

    #[test]
    fn test_trailing_partial_frame_dropped_and_writes_after_finish_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mic.wav");
        let writer = TrackWriter::new(&path, Arc::new(AtomicBool::new(false)));
        writer.write_buffer(&loud_buffer(2));
        writer.open(stereo()).unwrap();

        let mut odd = loud_buffer(3);
        odd.push(7);
        writer.write_buffer(&odd);
        writer.finish().unwrap();
        writer.write_buffer(&loud_buffer(3));

        assert_eq!(read_samples(&path).len(), 6);
        assert!(!writer.is_open());
    }

    #[test]
    fn test_frame_split_across_buffers_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.wav");
        let writer = TrackWriter::new(&path, Arc::new(AtomicBool::new(false)));
        writer.open(stereo()).unwrap();

        let data = loud_buffer(3);
        writer.write_buffer(&data[..5]);
        writer.write_buffer(&data[5..]);
        writer.finish().unwrap();

        let expected: Vec<i16> = data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(read_samples(&path), expected);
        assert_eq!(writer.bytes_written(), 12);
    }

    #[test]
    fn test_float_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.wav");
        let writer = TrackWriter::new(&path, Arc::new(AtomicBool::new(true)));
        writer.open(AudioFormat::new(48_000, 1, SampleFormat::F32)).unwrap();
        writer.write_buffer(&0.5f32.to_le_bytes());
        writer.finish().unwrap();

        let samples: Vec<f32> = hound::WavReader::open(&path)
            .unwrap()
            .into_samples::<f32>()
            .map(Result::unwrap)
            .collect();
        assert_eq!(samples, vec![0.0]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_mute_toggling_preserves_track_length(
            buffers in proptest::collection::vec((1usize..64, any::<bool>()), 1..24)
        ) {
            let dir = tempfile::tempdir().unwrap();
            let toggled_path = dir.path().join("toggled.wav");
            let plain_path = dir.path().join("plain.wav");

            let mute = Arc::new(AtomicBool::new(false));
            let toggled = TrackWriter::new(&toggled_path, Arc::clone(&mute));
            let plain = TrackWriter::new(&plain_path, Arc::new(AtomicBool::new(false)));
            toggled.open(stereo()).unwrap();
            plain.open(stereo()).unwrap();

            for (frames, muted) in &buffers {
                let data = loud_buffer(*frames);
                mute.store(*muted, Ordering::Relaxed);
                toggled.write_buffer(&data);
                plain.write_buffer(&data);
            }
            toggled.finish().unwrap();
            plain.finish().unwrap();

            prop_assert_eq!(
                std::fs::metadata(&toggled_path).unwrap().len(),
                std::fs::metadata(&plain_path).unwrap().len()
            );
            prop_assert_eq!(toggled.bytes_written(), plain.bytes_written());
        }
    }
}
