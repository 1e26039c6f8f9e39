//! Recording session orchestration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capstan_common::naming::output_path_for;
use capstan_common::{CapstanError, CapstanResult, RecordingClock, RecordingConfiguration};
use capstan_platform_core::{AudioFormat, CaptureFrame, DisplayId, PixelFormat, SampleFormat};
use capstan_stream_encoder::{EncoderSettings, FinalizeOutcome, VideoEncoder};
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::audio::AudioCaptureService;
use crate::backend::{FrameSink, VideoCaptureRequest, VideoFrameSource};

/// How long stopping video capture may take before finalizing anyway.
pub const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// State of the recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing recording; a session may start.
    #[default]
    Idle,
    /// Components are being brought up.
    Starting,
    /// Frames and audio are flowing.
    Recording,
    /// Capture is winding down and the output is being produced.
    Stopping,
    /// The last start failed. A new start is allowed.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Lifecycle notifications for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    RecordingStarted { output_path: PathBuf },
    RecordingEnded { output_path: PathBuf },
}

/// Frame relay counters for the current or most recent session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames the encoder accepted.
    pub frames_forwarded: u64,
    /// Frames that arrived outside `Recording`.
    pub frames_discarded: u64,
    /// Frames the encoder rejected or failed to write.
    pub frames_failed: u64,
}

/// State shared with the frame callback.
struct Relay {
    state: RwLock<SessionState>,
    clock: RwLock<Option<RecordingClock>>,
    encoder: Arc<dyn VideoEncoder>,
    events: broadcast::Sender<SessionEvent>,
    frames_forwarded: AtomicU64,
    frames_discarded: AtomicU64,
    frames_failed: AtomicU64,
}

impl Relay {
    fn new(encoder: Arc<dyn VideoEncoder>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(SessionState::Idle),
            clock: RwLock::new(None),
            encoder,
            events,
            frames_forwarded: AtomicU64::new(0),
            frames_discarded: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, next: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Session state changed");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Forward one frame if recording. The frame is released on return
    /// whichever way it goes.
    fn relay(&self, frame: CaptureFrame) {
        if self.state() != SessionState::Recording {
            self.frames_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(sequence = frame.sequence, "Frame outside recording discarded");
            return;
        }

        let timestamp = self
            .clock
            .read()
            .as_ref()
            .map(RecordingClock::elapsed)
            .unwrap_or_default();

        match self.encoder.encode_frame(&frame.data, timestamp) {
            Ok(()) => {
                self.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failed = self.frames_failed.fetch_add(1, Ordering::Relaxed);
                if failed == 0 {
                    tracing::warn!(error = %e, "Frame write failed, recording continues");
                } else {
                    tracing::debug!(error = %e, sequence = frame.sequence, "Frame write failed");
                }
            }
        }
    }

    fn stats(&self) -> SessionStats {
        SessionStats {
            frames_forwarded: self.frames_forwarded.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
        }
    }

    fn reset_stats(&self) {
        self.frames_forwarded.store(0, Ordering::Relaxed);
        self.frames_discarded.store(0, Ordering::Relaxed);
        self.frames_failed.store(0, Ordering::Relaxed);
    }
}

/// Puts the session back to `Idle` however stopping ends.
struct IdleOnDrop(Arc<Relay>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        *self.0.clock.write() = None;
        self.0.set_state(SessionState::Idle);
    }
}

struct ActiveSession {
    output_path: PathBuf,
    audio_only: bool,
}

/// Drives one recording at a time across video capture, audio capture,
/// and the encoder.
///
/// ```text
/// Idle ──start──► Starting ──ok──► Recording ──stop──► Stopping ──► Idle
///                    │
///                    └──failure──► Error ──start──► Starting
/// ```
pub struct SessionOrchestrator {
    relay: Arc<Relay>,
    video: Box<dyn VideoFrameSource>,
    audio: AudioCaptureService,
    config: RecordingConfiguration,
    staged_config: Option<RecordingConfiguration>,
    session: Option<ActiveSession>,
    last_recording: Option<PathBuf>,
    capture_stop_timeout: Duration,
}

impl SessionOrchestrator {
    pub fn new(
        video: Box<dyn VideoFrameSource>,
        audio: AudioCaptureService,
        encoder: Arc<dyn VideoEncoder>,
        config: RecordingConfiguration,
    ) -> Self {
        Self {
            relay: Arc::new(Relay::new(encoder)),
            video,
            audio,
            config,
            staged_config: None,
            session: None,
            last_recording: None,
            capture_stop_timeout: CAPTURE_STOP_TIMEOUT,
        }
    }

    /// Bound on stopping video capture. A source still stopping after this
    /// is left to finish in the background.
    pub fn with_capture_stop_timeout(mut self, timeout: Duration) -> Self {
        self.capture_stop_timeout = timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.relay.state()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == SessionState::Recording
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.relay.events.subscribe()
    }

    /// Configuration the next session will use.
    pub fn configuration(&self) -> &RecordingConfiguration {
        self.staged_config.as_ref().unwrap_or(&self.config)
    }

    /// Replace the configuration. While a session is active the change is
    /// held back until it returns to `Idle`.
    pub fn set_configuration(&mut self, config: RecordingConfiguration) {
        match self.state() {
            SessionState::Idle | SessionState::Error => {
                self.config = config;
                self.staged_config = None;
            }
            state => {
                tracing::info!(%state, "Configuration staged until the session is idle");
                self.staged_config = Some(config);
            }
        }
    }

    fn apply_staged_config(&mut self) {
        if let Some(config) = self.staged_config.take() {
            tracing::debug!("Applying staged configuration");
            self.config = config;
        }
    }

    /// Output path of the session in progress.
    pub fn current_output_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.output_path.as_path())
    }

    /// Output of the most recent session that produced a file.
    pub fn last_recording_path(&self) -> Option<&Path> {
        self.last_recording.as_deref()
    }

    pub fn stats(&self) -> SessionStats {
        self.relay.stats()
    }

    pub fn set_system_audio_muted(&self, muted: bool) {
        self.audio.set_system_audio_muted(muted);
    }

    pub fn set_mic_muted(&self, muted: bool) {
        self.audio.set_mic_muted(muted);
    }

    pub fn is_system_audio_muted(&self) -> bool {
        self.audio.is_system_audio_muted()
    }

    pub fn is_mic_muted(&self) -> bool {
        self.audio.is_mic_muted()
    }

    /// Start a session.
    ///
    /// Allowed from `Idle` and `Error`. Any failure rolls back whatever was
    /// started, leaves the session in `Error`, and is returned.
    pub async fn start_session(&mut self, audio_only: bool) -> CapstanResult<()> {
        let state = self.state();
        if !matches!(state, SessionState::Idle | SessionState::Error) {
            return Err(CapstanError::invalid_state(format!(
                "Cannot start a session while {state}"
            )));
        }

        self.apply_staged_config();
        self.relay.set_state(SessionState::Starting);
        self.relay.reset_stats();

        let mut config = self.config.clone();
        config.audio_only = audio_only;

        match self.bring_up(&config).await {
            Ok(output_path) => {
                let clock = RecordingClock::start();
                let started_at = clock.epoch_wall().to_string();
                *self.relay.clock.write() = Some(clock);
                self.session = Some(ActiveSession {
                    output_path: output_path.clone(),
                    audio_only,
                });
                self.relay.set_state(SessionState::Recording);
                tracing::info!(
                    output = %output_path.display(),
                    audio_only,
                    %started_at,
                    "Recording started"
                );
                self.relay.emit(SessionEvent::RecordingStarted { output_path });
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Session start failed");
                self.roll_back_start().await;
                self.relay.set_state(SessionState::Error);
                Err(e)
            }
        }
    }

    async fn bring_up(&mut self, config: &RecordingConfiguration) -> CapstanResult<PathBuf> {
        if config.audio_only && !config.has_audio_source() {
            return Err(CapstanError::configuration(
                "At least one audio source is required for audio-only recording",
            ));
        }
        config.validate()?;

        let output_dir = config.resolved_output_dir();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            CapstanError::capture_start(format!(
                "Cannot create output directory {}: {e}",
                output_dir.display()
            ))
        })?;
        let output_path = output_path_for(config, &chrono::Local::now());

        if config.audio_only {
            self.relay.encoder.prepare_audio_only(&output_path)?;
        } else {
            self.relay.encoder.initialize(&EncoderSettings {
                output_path: output_path.clone(),
                width: config.width,
                height: config.height,
                fps: config.fps,
                bitrate: config.bitrate,
                pixel_format: PixelFormat::Bgra8,
            })?;
        }

        self.audio.set_format_hint(AudioFormat::new(
            config.audio_sample_rate,
            config.audio_channels,
            SampleFormat::I16,
        ));
        let active = self
            .audio
            .start_recording(config.capture_system_audio, config.capture_microphone);
        if config.audio_only && active == 0 {
            return Err(CapstanError::capture_start(
                "No audio source could be opened",
            ));
        }

        if !config.audio_only {
            let request = VideoCaptureRequest {
                display: DisplayId::from(config.display.clone()),
                width: config.width,
                height: config.height,
                fps: config.fps,
            };
            let relay = Arc::clone(&self.relay);
            let sink: FrameSink = Arc::new(move |frame| relay.relay(frame));
            self.video.start_capture(&request, sink).await?;
        }

        Ok(output_path)
    }

    async fn roll_back_start(&mut self) {
        if self.audio.is_recording() {
            self.audio.stop_recording().remove_files();
        }
        self.relay.encoder.abort();
        self.stop_video().await;
        *self.relay.clock.write() = None;
        self.session = None;
    }

    /// Stop the session and produce its output.
    ///
    /// Does nothing unless `Recording`. Returns the output path when a file
    /// was produced. The session is back in `Idle` when this returns,
    /// whatever the outcome.
    pub async fn stop_session(
        &mut self,
        suppress_completion_event: bool,
    ) -> CapstanResult<Option<PathBuf>> {
        if self.state() != SessionState::Recording {
            return Ok(None);
        }

        self.relay.set_state(SessionState::Stopping);
        let idle_guard = IdleOnDrop(Arc::clone(&self.relay));

        let result = self.wind_down().await;
        if let Ok(Some(path)) = &result {
            self.last_recording = Some(path.clone());
            if !suppress_completion_event {
                self.relay.emit(SessionEvent::RecordingEnded {
                    output_path: path.clone(),
                });
            }
        }

        drop(idle_guard);
        self.apply_staged_config();
        result
    }

    async fn wind_down(&mut self) -> CapstanResult<Option<PathBuf>> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };

        let tracks = self.audio.stop_recording();
        if !session.audio_only {
            self.stop_video().await;
        }

        let outcome = self.relay.encoder.finalize(&tracks.paths()).await?;
        let stats = self.relay.stats();
        tracing::info!(
            ?outcome,
            frames_forwarded = stats.frames_forwarded,
            frames_discarded = stats.frames_discarded,
            frames_failed = stats.frames_failed,
            "Session finalized"
        );

        if outcome == FinalizeOutcome::MuxFallback {
            tracing::warn!(output = %session.output_path.display(), "Recording saved without audio");
        }

        let produced = outcome.has_output() && session.output_path.exists();
        Ok(produced.then_some(session.output_path))
    }

    /// Stop video capture without waiting past `capture_stop_timeout`.
    ///
    /// A capture thread stuck in a frame write keeps the source from
    /// stopping until the encoder lets go of it, which finalize does.
    async fn stop_video(&mut self) {
        let timeout = self.capture_stop_timeout;
        match tokio::time::timeout(timeout, self.video.stop_capture()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Video capture did not stop cleanly"),
            Err(_) => tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Video capture still stopping, finalizing anyway"
            ),
        }
    }
}
