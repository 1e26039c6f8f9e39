//! Generated sources for tests and headless runs.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use capstan_common::{CapstanError, CapstanResult, FramePacer};
use capstan_platform_core::{AudioFormat, AudioRole, CaptureFrame, PixelFormat, SampleFormat};

use super::{AudioBackend, AudioBufferSink, AudioStream, FrameSink, VideoCaptureRequest, VideoFrameSource};

/// Buffers per second emitted by synthetic audio (10 ms each).
const AUDIO_BUFFERS_PER_SEC: u32 = 100;

struct Worker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(name: &str, body: impl FnOnce(Arc<AtomicBool>) + Send + 'static) -> CapstanResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(flag))
            .map_err(|e| CapstanError::capture_start(format!("Failed to spawn {name}: {e}")))?;
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Synthetic worker panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.halt();
    }
}

/// BGRA test pattern: a vertical bar sweeping across a dark background.
pub fn test_pattern(width: u32, height: u32, sequence: u64) -> Vec<u8> {
    let mut data = vec![0u8; PixelFormat::Bgra8.frame_len(width, height)];
    if width == 0 {
        return data;
    }
    let bar_width = (width / 16).max(1);
    let bar_x = ((sequence * 8) % width as u64) as u32;
    for (i, px) in data.chunks_exact_mut(4).enumerate() {
        let x = i as u32 % width;
        let on_bar = x >= bar_x && x < bar_x + bar_width;
        let (b, g, r) = if on_bar { (0x20, 0xc0, 0xf0) } else { (0x30, 0x18, 0x10) };
        px.copy_from_slice(&[b, g, r, 0xff]);
    }
    data
}

/// Frame source generating [`test_pattern`] frames at the requested rate.
#[derive(Default)]
pub struct SyntheticScreenSource {
    frame_limit: Option<u64>,
    emitted: Arc<AtomicU64>,
    worker: Option<Worker>,
}

impl SyntheticScreenSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop producing after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Frames handed to the sink so far.
    pub fn frames_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Shared counter for observing emission after the source is boxed.
    pub fn emitted_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted)
    }
}

#[async_trait]
impl VideoFrameSource for SyntheticScreenSource {
    async fn start_capture(
        &mut self,
        request: &VideoCaptureRequest,
        sink: FrameSink,
    ) -> CapstanResult<()> {
        self.stop_capture().await?;

        let (width, height, fps) = (request.width, request.height, request.fps);
        let limit = self.frame_limit;
        let emitted = Arc::clone(&self.emitted);
        emitted.store(0, Ordering::Relaxed);

        self.worker = Some(Worker::spawn("synthetic-screen", move |stop| {
            let mut pacer = FramePacer::new(fps);
            let mut sequence = 0u64;
            while !stop.load(Ordering::SeqCst) && limit.map_or(true, |n| sequence < n) {
                sink(CaptureFrame::new(test_pattern(width, height, sequence), width, height, sequence));
                sequence += 1;
                emitted.store(sequence, Ordering::Relaxed);
                pacer.wait_next();
            }
        })?);

        tracing::info!(width, height, fps, "Synthetic screen capture started");
        Ok(())
    }

    async fn stop_capture(&mut self) -> CapstanResult<()> {
        if let Some(mut worker) = self.worker.take() {
            tokio::task::spawn_blocking(move || worker.halt())
                .await
                .map_err(|e| CapstanError::platform(format!("Synthetic stop task failed: {e}")))?;
            tracing::info!(frames = self.frames_emitted(), "Synthetic screen capture stopped");
        }
        Ok(())
    }
}

/// Audio backend producing sine tones, with optional per-role failures.
#[derive(Debug, Default, Clone)]
pub struct SyntheticAudioBackend {
    failing: HashSet<AudioRole>,
}

impl SyntheticAudioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make opening `role` fail.
    pub fn with_failure(mut self, role: AudioRole) -> Self {
        self.failing.insert(role);
        self
    }
}

impl AudioBackend for SyntheticAudioBackend {
    fn open(
        &self,
        role: AudioRole,
        format_hint: AudioFormat,
        sink: AudioBufferSink,
    ) -> CapstanResult<Box<dyn AudioStream>> {
        if self.failing.contains(&role) {
            return Err(CapstanError::capture_start(format!("No {role} device available")));
        }
        Ok(Box::new(SyntheticAudioStream {
            role,
            format: AudioFormat::new(format_hint.sample_rate, format_hint.channels, SampleFormat::I16),
            sink,
            worker: None,
        }))
    }
}

struct SyntheticAudioStream {
    role: AudioRole,
    format: AudioFormat,
    sink: AudioBufferSink,
    worker: Option<Worker>,
}

fn tone_hz(role: AudioRole) -> f32 {
    match role {
        AudioRole::SystemLoopback => 440.0,
        AudioRole::Microphone => 660.0,
    }
}

/// One 10 ms interleaved S16LE buffer of a sine tone starting at `frame_offset`.
pub fn sine_buffer(format: &AudioFormat, hz: f32, frame_offset: u64) -> Vec<u8> {
    let frames = (format.sample_rate / AUDIO_BUFFERS_PER_SEC).max(1) as u64;
    let mut out = Vec::with_capacity(frames as usize * format.block_align());
    for n in 0..frames {
        let t = (frame_offset + n) as f32 / format.sample_rate as f32;
        let sample = ((t * hz * std::f32::consts::TAU).sin() * 0.2 * i16::MAX as f32) as i16;
        for _ in 0..format.channels {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
    out
}

impl AudioStream for SyntheticAudioStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> CapstanResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let format = self.format;
        let hz = tone_hz(self.role);
        let sink = Arc::clone(&self.sink);
        self.worker = Some(Worker::spawn("synthetic-audio", move |stop| {
            let mut pacer = FramePacer::new(AUDIO_BUFFERS_PER_SEC);
            let mut offset = 0u64;
            while !stop.load(Ordering::SeqCst) {
                let buffer = sine_buffer(&format, hz, offset);
                offset += (buffer.len() / format.block_align()) as u64;
                sink(&buffer);
                pacer.wait_next();
            }
        })?);
        tracing::info!(role = %self.role, "Synthetic audio capture started");
        Ok(())
    }

    fn stop(&mut self) -> CapstanResult<()> {
        if let Some(mut worker) = self.worker.take() {
            worker.halt();
            tracing::info!(role = %self.role, "Synthetic audio capture stopped");
        }
        Ok(())
    }
}
