//! GStreamer capture sources feeding appsink callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use capstan_common::{CapstanError, CapstanResult};
use capstan_platform_core::{AudioFormat, AudioRole, CaptureFrame, DisplayId, SampleFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;

use super::{AudioBackend, AudioBufferSink, AudioStream, FrameSink, VideoCaptureRequest, VideoFrameSource};

const APPSINK_NAME: &str = "sink";

/// Initialize GStreamer once per process.
pub fn init_gstreamer() -> CapstanResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(CapstanError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether an element factory is installed. Used by diagnostics.
pub fn element_available(name: &str) -> bool {
    init_gstreamer().is_ok() && gst::ElementFactory::find(name).is_some()
}

/// Elements a capture session on this platform depends on.
pub fn required_elements() -> Vec<&'static str> {
    let mut elements = if cfg!(target_os = "windows") {
        vec!["d3d11screencapturesrc", "wasapisrc"]
    } else if cfg!(target_os = "macos") {
        vec!["avfvideosrc", "osxaudiosrc"]
    } else {
        vec!["ximagesrc", "pulsesrc"]
    };
    elements.extend([
        "videoconvert",
        "videoscale",
        "videorate",
        "audioconvert",
        "audioresample",
        "appsink",
    ]);
    elements
}

/// The platform screen capture element with its display selection.
pub fn screen_source_fragment(display: &DisplayId) -> String {
    #[cfg(target_os = "windows")]
    {
        let index = display_index(display);
        format!("d3d11screencapturesrc show-cursor=true monitor-index={index}")
    }
    #[cfg(target_os = "macos")]
    {
        let index = display_index(display);
        format!("avfvideosrc capture-screen=true capture-screen-cursor=true device-index={index}")
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // `use-damage=false` ensures full frame delivery.
        match display.name() {
            Some(name) => format!(
                "ximagesrc use-damage=false show-pointer=true display-name=\"{}\"",
                escape(name)
            ),
            None => "ximagesrc use-damage=false show-pointer=true".to_string(),
        }
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn display_index(display: &DisplayId) -> u32 {
    match display.name() {
        None => 0,
        Some(name) => name.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(display = name, "Display is not a monitor index, using primary");
            0
        }),
    }
}

/// Full launch line: source, BGRA normalization at the requested
/// geometry and rate, then an appsink that drops rather than queues.
pub fn screen_launch(source: &str, request: &VideoCaptureRequest) -> String {
    format!(
        "{source} ! queue max-size-buffers=8 leaky=downstream ! videoconvert ! videoscale ! videorate ! \
         video/x-raw,format=BGRA,width={w},height={h},framerate={fps}/1 ! \
         appsink name={APPSINK_NAME} max-buffers=2 drop=true sync=false",
        w = request.width,
        h = request.height,
        fps = request.fps.max(1),
    )
}

/// The platform audio capture element for a role.
pub fn audio_source_fragment(role: AudioRole) -> CapstanResult<String> {
    #[cfg(target_os = "windows")]
    {
        Ok(match role {
            AudioRole::SystemLoopback => "wasapisrc loopback=true low-latency=true".to_string(),
            AudioRole::Microphone => "wasapisrc low-latency=true".to_string(),
        })
    }
    #[cfg(target_os = "macos")]
    {
        match role {
            AudioRole::SystemLoopback => Err(CapstanError::unsupported(
                "System audio loopback is not available on macOS",
            )),
            AudioRole::Microphone => Ok("osxaudiosrc".to_string()),
        }
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Ok(match role {
            AudioRole::SystemLoopback => "pulsesrc device=@DEFAULT_MONITOR@".to_string(),
            AudioRole::Microphone => "pulsesrc".to_string(),
        })
    }
}

/// Full audio launch line delivering interleaved S16LE.
pub fn audio_launch(source: &str, format: &AudioFormat) -> String {
    format!(
        "{source} ! audioconvert ! audioresample ! \
         audio/x-raw,format=S16LE,layout=interleaved,rate={rate},channels={channels} ! \
         appsink name={APPSINK_NAME} sync=false",
        rate = format.sample_rate,
        channels = format.channels,
    )
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn escape(value: &str) -> String {
    value.replace('"', "\\\"")
}

fn build_pipeline(label: &str, launch: &str) -> CapstanResult<(gst::Pipeline, gst_app::AppSink)> {
    init_gstreamer()?;
    tracing::debug!(pipeline = label, launch, "Building capture pipeline");

    let element = gst::parse::launch(launch).map_err(|e| {
        CapstanError::capture_start(format!("Failed to build {label} pipeline: {e}"))
    })?;
    let pipeline = element.dynamic_cast::<gst::Pipeline>().map_err(|_| {
        CapstanError::capture_start(format!("{label} launch line did not produce a pipeline"))
    })?;
    let appsink = pipeline
        .by_name(APPSINK_NAME)
        .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
        .ok_or_else(|| CapstanError::capture_start(format!("{label} pipeline has no appsink")))?;
    Ok((pipeline, appsink))
}

fn play(label: &str, pipeline: &gst::Pipeline) -> CapstanResult<()> {
    pipeline.set_state(gst::State::Playing).map_err(|e| {
        CapstanError::capture_start(format!("Failed to start {label} pipeline: {e:?}"))
    })?;

    // State changes are async; wait so a missing device fails here rather
    // than after the session reports Recording.
    match pipeline.state(gst::ClockTime::from_seconds(10)) {
        (Ok(_), gst::State::Playing, _) => Ok(()),
        (Ok(_), state, _) => {
            tracing::warn!(pipeline = label, ?state, "Pipeline did not reach Playing within timeout");
            Ok(())
        }
        (Err(e), _, _) => {
            let _ = pipeline.set_state(gst::State::Null);
            Err(CapstanError::capture_start(format!(
                "{label} pipeline failed to reach Playing: {e:?}"
            )))
        }
    }
}

fn halt(label: &str, pipeline: &gst::Pipeline) -> CapstanResult<()> {
    // Going to Null joins the streaming threads, so no callback runs after this.
    pipeline.set_state(gst::State::Null).map_err(|e| {
        CapstanError::platform(format!("Failed to stop {label} pipeline: {e:?}"))
    })?;
    Ok(())
}

/// Screen capture through the platform's GStreamer source element.
#[derive(Default)]
pub struct GstScreenSource {
    pipeline: Option<gst::Pipeline>,
}

impl GstScreenSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoFrameSource for GstScreenSource {
    async fn start_capture(
        &mut self,
        request: &VideoCaptureRequest,
        sink: FrameSink,
    ) -> CapstanResult<()> {
        if self.pipeline.is_some() {
            self.stop_capture().await?;
        }

        let launch = screen_launch(&screen_source_fragment(&request.display), request);
        let (pipeline, appsink) = build_pipeline("screen", &launch)?;

        let (width, height) = (request.width, request.height);
        let sequence = Arc::new(AtomicU64::new(0));
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    let Some(buffer) = sample.buffer() else {
                        tracing::trace!("Sample without buffer dropped");
                        return Ok(gst::FlowSuccess::Ok);
                    };
                    let map = match buffer.map_readable() {
                        Ok(map) => map,
                        Err(e) => {
                            tracing::trace!(error = %e, "Frame map failed, dropping");
                            return Ok(gst::FlowSuccess::Ok);
                        }
                    };
                    let seq = sequence.fetch_add(1, Ordering::Relaxed);
                    sink(CaptureFrame::new(map.as_slice().to_vec(), width, height, seq));
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        play("screen", &pipeline)?;
        tracing::info!(
            display = ?request.display,
            width,
            height,
            fps = request.fps,
            "Screen capture started"
        );
        self.pipeline = Some(pipeline);
        Ok(())
    }

    async fn stop_capture(&mut self) -> CapstanResult<()> {
        if let Some(pipeline) = self.pipeline.take() {
            // Going to Null joins the streaming thread, which may be inside
            // a frame write. Keep that off the async runtime.
            tokio::task::spawn_blocking(move || halt("screen", &pipeline))
                .await
                .map_err(|e| CapstanError::platform(format!("Screen stop task failed: {e}")))??;
            tracing::info!("Screen capture stopped");
        }
        Ok(())
    }
}

impl Drop for GstScreenSource {
    fn drop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            let _ = halt("screen", &pipeline);
        }
    }
}

/// Loopback and microphone capture through GStreamer.
#[derive(Debug, Default)]
pub struct GstAudioBackend;

impl GstAudioBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for GstAudioBackend {
    fn open(
        &self,
        role: AudioRole,
        format_hint: AudioFormat,
        sink: AudioBufferSink,
    ) -> CapstanResult<Box<dyn AudioStream>> {
        let format = AudioFormat::new(
            format_hint.sample_rate,
            format_hint.channels,
            SampleFormat::I16,
        );
        let launch = audio_launch(&audio_source_fragment(role)?, &format);
        let (pipeline, appsink) = build_pipeline(role.file_tag(), &launch)?;

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        match buffer.map_readable() {
                            Ok(map) => sink(map.as_slice()),
                            Err(e) => tracing::trace!(error = %e, "Audio buffer map failed"),
                        }
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        Ok(Box::new(GstAudioStream {
            role,
            format,
            pipeline: Some(pipeline),
        }))
    }
}

struct GstAudioStream {
    role: AudioRole,
    format: AudioFormat,
    pipeline: Option<gst::Pipeline>,
}

impl AudioStream for GstAudioStream {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self) -> CapstanResult<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| CapstanError::invalid_state("Audio stream already stopped"))?;
        play(self.role.file_tag(), pipeline)?;
        tracing::info!(role = %self.role, rate = self.format.sample_rate, channels = self.format.channels, "Audio capture started");
        Ok(())
    }

    fn stop(&mut self) -> CapstanResult<()> {
        if let Some(pipeline) = self.pipeline.take() {
            halt(self.role.file_tag(), &pipeline)?;
            tracing::info!(role = %self.role, "Audio capture stopped");
        }
        Ok(())
    }
}

impl Drop for GstAudioStream {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
