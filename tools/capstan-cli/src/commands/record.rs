//! Record a session.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capstan_capture_engine::backend::{
    default_audio_backend, default_video_source, AudioBackend, SyntheticAudioBackend,
    SyntheticScreenSource, VideoFrameSource,
};
use capstan_capture_engine::{AudioCaptureService, SessionOrchestrator};
use capstan_common::config::{AppConfig, RecordingConfiguration};
use capstan_stream_encoder::select_encoder;
use clap::Args;

#[derive(Debug, Args)]
pub struct RecordArgs {
    /// Output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Frame width
    #[arg(long)]
    width: Option<u32>,

    /// Frame height
    #[arg(long)]
    height: Option<u32>,

    /// Target FPS
    #[arg(long)]
    fps: Option<u32>,

    /// Target video bitrate (bits per second)
    #[arg(long)]
    bitrate: Option<u32>,

    /// Record audio only
    #[arg(long)]
    audio_only: bool,

    /// Disable system audio capture
    #[arg(long)]
    no_system_audio: bool,

    /// Enable microphone capture
    #[arg(long)]
    mic: bool,

    /// Display to capture (X11 display name, or monitor index on Windows/macOS)
    #[arg(long)]
    display: Option<String>,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Use generated test sources instead of real devices
    #[arg(long)]
    synthetic: bool,
}

impl RecordArgs {
    fn apply(&self, mut config: RecordingConfiguration) -> RecordingConfiguration {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate = bitrate;
        }
        if self.no_system_audio {
            config.capture_system_audio = false;
        }
        if self.mic {
            config.capture_microphone = true;
        }
        config.display = self.display.clone();
        config
    }
}

pub async fn run(args: RecordArgs, app_config: AppConfig) -> anyhow::Result<()> {
    let config = args.apply(app_config.recording.clone());

    println!("Starting recording session");
    println!("  Output dir: {}", config.resolved_output_dir().display());
    if args.audio_only {
        println!("  Mode: audio only");
    } else {
        println!("  Video: {}x{} @ {} fps, {} bps", config.width, config.height, config.fps, config.bitrate);
        println!("  Display: {}", config.display.as_deref().unwrap_or("primary"));
    }
    println!("  System audio: {}", config.capture_system_audio);
    println!("  Mic: {}", config.capture_microphone);
    println!();

    let (video, backend): (Box<dyn VideoFrameSource>, Arc<dyn AudioBackend>) = if args.synthetic {
        (
            Box::new(SyntheticScreenSource::new()),
            Arc::new(SyntheticAudioBackend::new()),
        )
    } else {
        (default_video_source(), default_audio_backend())
    };
    let encoder = select_encoder(&app_config.encoder);

    let mut session = SessionOrchestrator::new(
        video,
        AudioCaptureService::new(backend),
        encoder,
        config,
    );

    session.start_session(args.audio_only).await?;
    if let Some(path) = session.current_output_path() {
        println!("Recording to: {}", path.display());
    }

    match args.duration {
        Some(secs) => {
            println!("Recording for {secs}s (Ctrl+C to stop early)...");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                signal = tokio::signal::ctrl_c() => signal?,
            }
        }
        None => {
            println!("Press Ctrl+C to stop recording...");
            tokio::signal::ctrl_c().await?;
        }
    }

    println!();
    let output = session.stop_session(false).await?;
    let stats = session.stats();
    tracing::debug!(?stats, "Session stats");

    match output {
        Some(path) => println!("Recording saved to: {}", path.display()),
        None => println!("Recording produced no output"),
    }
    if !args.audio_only {
        println!(
            "  Frames: {} written, {} dropped outside recording, {} failed",
            stats.frames_forwarded, stats.frames_discarded, stats.frames_failed
        );
    }

    Ok(())
}
