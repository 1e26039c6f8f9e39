//! Encoder abstraction used by the session orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use capstan_common::CapstanResult;
use capstan_platform_core::PixelFormat;

/// Parameters for one video encoding run.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// Final output path (the `.mp4` the user ends up with).
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target video bitrate in bits per second.
    pub bitrate: u32,
    pub pixel_format: PixelFormat,
}

impl EncoderSettings {
    /// Byte length every submitted frame must have.
    pub fn frame_len(&self) -> usize {
        self.pixel_format.frame_len(self.width, self.height)
    }
}

/// What `finalize` left on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Video with the given number of audio tracks mixed in.
    Muxed { audio_tracks: usize },
    /// No audio was available; the intermediate video became the output.
    VideoOnly,
    /// Audio mux failed; the intermediate video became the output.
    MuxFallback,
    /// Audio-only session mixed into the output.
    AudioOnly { tracks: usize },
    /// The intermediate video was too small and was deleted.
    Discarded,
    /// Nothing was produced.
    NoOutput,
}

impl FinalizeOutcome {
    /// Whether an artifact exists at the output path.
    pub fn has_output(&self) -> bool {
        !matches!(self, Self::Discarded | Self::NoOutput)
    }
}

/// Consumes frames during a session and produces the final artifact.
///
/// `encode_frame` is called from capture threads and must never block on
/// anything but the write itself. Implementations serialize writes
/// internally.
#[async_trait]
pub trait VideoEncoder: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Start a video encoding run. Any previous run is aborted first.
    fn initialize(&self, settings: &EncoderSettings) -> CapstanResult<()>;

    /// Arm an audio-only run writing to `output_path`.
    fn prepare_audio_only(&self, output_path: &Path) -> CapstanResult<()>;

    /// Submit one frame. `Ok` means the frame was accepted; a frame that
    /// was not written is an `EncodeWrite` error. Errors are per-frame and
    /// never end the session.
    fn encode_frame(&self, frame: &[u8], timestamp: Duration) -> CapstanResult<()>;

    /// Close the stream, wait for the encoder, and produce the output.
    ///
    /// `audio_files` are the WAV tracks captured for this session. Paths
    /// that do not exist are skipped.
    async fn finalize(&self, audio_files: &[PathBuf]) -> CapstanResult<FinalizeOutcome>;

    /// Drop the current run without producing output.
    fn abort(&self);

    /// Frames accepted by the current run.
    fn frames_written(&self) -> u64;
}
