//! Capture boundaries: where raw frames and PCM buffers come from.

use std::sync::Arc;

use async_trait::async_trait;
use capstan_common::CapstanResult;
use capstan_platform_core::{AudioFormat, AudioRole, CaptureFrame, DisplayId};

pub mod gst;
pub mod synthetic;

pub use gst::{GstAudioBackend, GstScreenSource};
pub use synthetic::{SyntheticAudioBackend, SyntheticScreenSource};

/// Receives each captured frame. Called on the source's own thread.
pub type FrameSink = Arc<dyn Fn(CaptureFrame) + Send + Sync>;

/// Receives each captured PCM buffer. Called on the stream's own thread.
pub type AudioBufferSink = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// What a video source should deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCaptureRequest {
    pub display: DisplayId,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Produces BGRA frames from a display.
#[async_trait]
pub trait VideoFrameSource: Send {
    /// Begin delivering frames to `sink`. Failure to establish capture is
    /// fatal; per-frame conversion failures only drop that frame.
    async fn start_capture(
        &mut self,
        request: &VideoCaptureRequest,
        sink: FrameSink,
    ) -> CapstanResult<()>;

    /// Tear capture down. Once this returns the sink is never called again.
    async fn stop_capture(&mut self) -> CapstanResult<()>;
}

/// Opens audio devices by role.
pub trait AudioBackend: Send + Sync {
    /// Open the device for `role`. `format_hint` is the preferred format;
    /// the stream reports what it actually delivers.
    fn open(
        &self,
        role: AudioRole,
        format_hint: AudioFormat,
        sink: AudioBufferSink,
    ) -> CapstanResult<Box<dyn AudioStream>>;
}

/// One opened audio device.
pub trait AudioStream: Send {
    fn format(&self) -> AudioFormat;
    fn start(&mut self) -> CapstanResult<()>;
    fn stop(&mut self) -> CapstanResult<()>;
}

/// The platform screen source.
pub fn default_video_source() -> Box<dyn VideoFrameSource> {
    Box::new(GstScreenSource::new())
}

/// The platform audio backend.
pub fn default_audio_backend() -> Arc<dyn AudioBackend> {
    Arc::new(GstAudioBackend::new())
}
