//! System loopback and microphone capture into temporary WAV tracks.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use capstan_common::naming::unique_path_in;
use capstan_common::CapstanResult;
use capstan_platform_core::{AudioFormat, AudioRole};

use crate::backend::{AudioBackend, AudioBufferSink, AudioStream};
use crate::wav::TrackWriter;

/// Temporary tracks left by one session. `None` where a source was not
/// requested or failed to start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioTrackResult {
    pub system_audio_path: Option<PathBuf>,
    pub mic_audio_path: Option<PathBuf>,
}

impl AudioTrackResult {
    /// Existing paths, system track first.
    pub fn paths(&self) -> Vec<PathBuf> {
        [&self.system_audio_path, &self.mic_audio_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.system_audio_path.is_none() && self.mic_audio_path.is_none()
    }

    /// Delete the tracks. Used when nothing will consume them.
    pub fn remove_files(&self) {
        for path in self.paths() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Could not remove audio track");
            }
        }
    }
}

struct ActiveSource {
    role: AudioRole,
    stream: Box<dyn AudioStream>,
    writer: Arc<TrackWriter>,
}

/// Captures up to two audio sources, each to its own WAV file.
///
/// A source that fails to open is skipped for the session; the other
/// source keeps recording.
pub struct AudioCaptureService {
    backend: Arc<dyn AudioBackend>,
    format_hint: AudioFormat,
    temp_dir: PathBuf,
    system_muted: Arc<AtomicBool>,
    mic_muted: Arc<AtomicBool>,
    system: Option<ActiveSource>,
    mic: Option<ActiveSource>,
}

impl AudioCaptureService {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            format_hint: AudioFormat::default(),
            temp_dir: std::env::temp_dir(),
            system_muted: Arc::new(AtomicBool::new(false)),
            mic_muted: Arc::new(AtomicBool::new(false)),
            system: None,
            mic: None,
        }
    }

    /// Write tracks under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    /// Preferred format for sources opened by the next `start_recording`.
    pub fn set_format_hint(&mut self, format: AudioFormat) {
        self.format_hint = format;
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Start the enabled sources and return how many are recording.
    ///
    /// Sources still active from an earlier call are stopped and their
    /// tracks deleted first. Both mute flags are cleared.
    pub fn start_recording(&mut self, capture_system: bool, capture_mic: bool) -> usize {
        if self.is_recording() {
            tracing::warn!("Audio capture still active, discarding previous tracks");
            self.stop_recording().remove_files();
        }

        self.system_muted.store(false, Ordering::SeqCst);
        self.mic_muted.store(false, Ordering::SeqCst);

        if capture_system {
            self.system = self.start_source(AudioRole::SystemLoopback);
        }
        if capture_mic {
            self.mic = self.start_source(AudioRole::Microphone);
        }

        let active = self.system.is_some() as usize + self.mic.is_some() as usize;
        tracing::info!(
            system = self.system.is_some(),
            mic = self.mic.is_some(),
            "Audio capture started with {active} source(s)"
        );
        active
    }

    fn start_source(&self, role: AudioRole) -> Option<ActiveSource> {
        let path = unique_path_in(&self.temp_dir, role.file_tag(), "wav");
        let writer = Arc::new(TrackWriter::new(path, self.mute_flag(role)));

        match self.open_source(role, &writer) {
            Ok(stream) => Some(ActiveSource {
                role,
                stream,
                writer,
            }),
            Err(e) => {
                tracing::warn!(%role, error = %e, "Audio source unavailable, continuing without it");
                let _ = writer.finish();
                if let Err(e) = std::fs::remove_file(writer.path()) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::debug!(path = %writer.path().display(), error = %e, "Could not remove track");
                    }
                }
                None
            }
        }
    }

    fn open_source(
        &self,
        role: AudioRole,
        writer: &Arc<TrackWriter>,
    ) -> CapstanResult<Box<dyn AudioStream>> {
        let sink_writer = Arc::clone(writer);
        let sink: AudioBufferSink = Arc::new(move |data: &[u8]| sink_writer.write_buffer(data));

        let mut stream = self.backend.open(role, self.format_hint, sink)?;
        writer.open(stream.format())?;
        stream.start()?;
        Ok(stream)
    }

    /// Stop every active source and return its track.
    ///
    /// Safe to call when nothing was started.
    pub fn stop_recording(&mut self) -> AudioTrackResult {
        AudioTrackResult {
            system_audio_path: self.system.take().and_then(Self::stop_source),
            mic_audio_path: self.mic.take().and_then(Self::stop_source),
        }
    }

    fn stop_source(mut source: ActiveSource) -> Option<PathBuf> {
        if let Err(e) = source.stream.stop() {
            tracing::warn!(role = %source.role, error = %e, "Audio source did not stop cleanly");
        }
        // The stream is gone, so nothing else writes to this track.
        match source.writer.finish() {
            Ok(()) => {
                tracing::info!(
                    role = %source.role,
                    path = %source.writer.path().display(),
                    bytes = source.writer.bytes_written(),
                    "Audio track saved"
                );
                Some(source.writer.path().to_path_buf())
            }
            Err(e) => {
                tracing::warn!(role = %source.role, error = %e, "Audio track unusable");
                let _ = std::fs::remove_file(source.writer.path());
                None
            }
        }
    }

    pub fn is_recording(&self) -> bool {
        self.system.is_some() || self.mic.is_some()
    }

    pub fn set_system_audio_muted(&self, muted: bool) {
        self.system_muted.store(muted, Ordering::SeqCst);
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_system_audio_muted(&self) -> bool {
        self.system_muted.load(Ordering::SeqCst)
    }

    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    fn mute_flag(&self, role: AudioRole) -> Arc<AtomicBool> {
        match role {
            AudioRole::SystemLoopback => Arc::clone(&self.system_muted),
            AudioRole::Microphone => Arc::clone(&self.mic_muted),
        }
    }
}

impl Drop for AudioCaptureService {
    fn drop(&mut self) {
        if self.is_recording() {
            self.stop_recording().remove_files();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SyntheticAudioBackend;
    use std::time::Duration;

    fn service(backend: SyntheticAudioBackend, dir: &Path) -> AudioCaptureService {
        AudioCaptureService::new(Arc::new(backend)).with_temp_dir(dir)
    }

    #[test]
    fn test_stop_without_start_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio = service(SyntheticAudioBackend::new(), dir.path());
        assert!(audio.stop_recording().is_empty());
    }

    #[test]
    fn test_both_sources_produce_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio = service(SyntheticAudioBackend::new(), dir.path());
        assert_eq!(audio.start_recording(true, true), 2);
        assert!(audio.is_recording());
        std::thread::sleep(Duration::from_millis(60));
        let tracks = audio.stop_recording();

        let sys = tracks.system_audio_path.clone().unwrap();
        let mic = tracks.mic_audio_path.clone().unwrap();
        assert!(sys.file_name().unwrap().to_string_lossy().starts_with("sys_"));
        assert!(mic.file_name().unwrap().to_string_lossy().starts_with("mic_"));
        assert!(hound::WavReader::open(&sys).unwrap().len() > 0);
        assert!(!audio.is_recording());
    }

    #[test]
    fn test_failed_source_is_skipped_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SyntheticAudioBackend::new().with_failure(AudioRole::Microphone);
        let mut audio = service(backend, dir.path());
        assert_eq!(audio.start_recording(true, true), 1);
        let tracks = audio.stop_recording();

        assert!(tracks.system_audio_path.is_some());
        assert!(tracks.mic_audio_path.is_none());
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with("mic_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_start_resets_mute_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio = service(SyntheticAudioBackend::new(), dir.path());
        audio.set_system_audio_muted(true);
        audio.set_mic_muted(true);
        assert!(audio.is_system_audio_muted() && audio.is_mic_muted());

        audio.start_recording(true, false);
        assert!(!audio.is_system_audio_muted());
        assert!(!audio.is_mic_muted());
        audio.stop_recording().remove_files();
    }

    #[test]
    fn test_restart_discards_stale_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let mut audio = service(SyntheticAudioBackend::new(), dir.path());
        audio.start_recording(true, false);
        audio.start_recording(true, false);
        let tracks = audio.stop_recording();

        let wavs = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(wavs, 1);
        tracks.remove_files();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
