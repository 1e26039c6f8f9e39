//! Streaming encoder backed by an external ffmpeg process.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ChildStdin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use capstan_common::naming::unique_temp_path;
use capstan_common::{CapstanError, CapstanResult, EncoderConfig};
use parking_lot::Mutex;

use crate::args::{audio_mix_args, encode_args, mux_args};
use crate::encoder::{EncoderSettings, FinalizeOutcome, VideoEncoder};
use crate::files::{file_len, remove_quietly, replace_file};
use crate::process::{run_to_completion, ManagedProcess};

const STDIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

enum Job {
    Video {
        process: ManagedProcess,
        intermediate: PathBuf,
        output_path: PathBuf,
    },
    AudioOnly {
        output_path: PathBuf,
    },
}

/// Pipes raw frames into `ffmpeg -f rawvideo -i -` and finalizes the result.
///
/// Frame writes take only the stdin lock, so a slow encoder applies
/// backpressure to the capture thread. Finalize never waits on that lock
/// longer than the process timeout: an encoder that stops reading is
/// killed, which fails the blocked write and frees the lock.
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    config: EncoderConfig,
    stdin: Mutex<Option<ChildStdin>>,
    job: Mutex<Option<Job>>,
    expected_frame_len: AtomicUsize,
    frames_written: AtomicU64,
    frames_rejected: AtomicU64,
    size_mismatch_logged: AtomicBool,
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, config: EncoderConfig) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            config,
            stdin: Mutex::new(None),
            job: Mutex::new(None),
            expected_frame_len: AtomicUsize::new(0),
            frames_written: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            size_mismatch_logged: AtomicBool::new(false),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Frames dropped because their size did not match the configured geometry.
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected.load(Ordering::Relaxed)
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.process_timeout_secs.map(Duration::from_secs)
    }

    fn reset_counters(&self, frame_len: usize) {
        self.expected_frame_len.store(frame_len, Ordering::Relaxed);
        self.frames_written.store(0, Ordering::Relaxed);
        self.frames_rejected.store(0, Ordering::Relaxed);
        self.size_mismatch_logged.store(false, Ordering::Relaxed);
    }

    /// Close the encoder's stdin, the end-of-stream signal.
    ///
    /// A frame write blocked on a full pipe holds the stdin lock. Polling
    /// keeps the runtime free while waiting for it; past the timeout the
    /// process is killed so the write fails and releases the lock.
    async fn close_stdin(&self, process: &mut ManagedProcess) {
        let started = Instant::now();
        let limit = self.timeout();
        loop {
            if let Some(mut stdin) = self.stdin.try_lock() {
                drop(stdin.take());
                return;
            }
            if limit.is_some_and(|limit| started.elapsed() >= limit) {
                tracing::warn!(
                    pid = process.id(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Encoder stopped reading frames, killing"
                );
                process.kill();
                drop(self.stdin.lock().take());
                return;
            }
            tokio::time::sleep(STDIN_POLL_INTERVAL).await;
        }
    }

    async fn finalize_video(
        &self,
        mut process: ManagedProcess,
        intermediate: PathBuf,
        output_path: PathBuf,
        audio_files: &[PathBuf],
    ) -> CapstanResult<FinalizeOutcome> {
        self.close_stdin(&mut process).await;

        match process.wait(self.timeout()).await {
            Ok(status) => {
                let stderr = process.take_stderr();
                if !status.success() {
                    tracing::warn!(%status, stderr = %stderr.trim(), "Encoder exited with failure");
                } else if !stderr.trim().is_empty() {
                    tracing::debug!(stderr = %stderr.trim(), "Encoder output");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Encoder did not finish cleanly"),
        }
        drop(process);

        let size = file_len(&intermediate);
        if size < self.config.min_video_bytes {
            tracing::warn!(
                bytes = size,
                min_bytes = self.config.min_video_bytes,
                frames = self.frames_written(),
                "Intermediate video too small, discarding"
            );
            remove_quietly(&intermediate);
            return Ok(FinalizeOutcome::Discarded);
        }

        let tracks: Vec<&Path> = audio_files
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| p.exists())
            .collect();

        if tracks.is_empty() {
            replace_file(&intermediate, &output_path)?;
            tracing::info!(output = %output_path.display(), "Video saved without audio");
            return Ok(FinalizeOutcome::VideoOnly);
        }

        let muxed = unique_temp_path("muxed", "mp4");
        let args = mux_args(&intermediate, &tracks, &muxed, &self.config.audio_bitrate);
        let mux_ok = match run_to_completion("ffmpeg mux", &self.ffmpeg, &args, self.timeout()).await
        {
            Ok(status) => status.success() && muxed.exists(),
            Err(e) => {
                tracing::warn!(error = %e, "Audio mux failed to run");
                false
            }
        };

        if mux_ok {
            match replace_file(&muxed, &output_path) {
                Ok(()) => {
                    remove_quietly(&intermediate);
                    for track in &tracks {
                        remove_quietly(track);
                    }
                    tracing::info!(
                        output = %output_path.display(),
                        audio_tracks = tracks.len(),
                        "Video saved with audio"
                    );
                    return Ok(FinalizeOutcome::Muxed {
                        audio_tracks: tracks.len(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Muxed output could not be placed, falling back to video-only output");
                }
            }
        } else {
            let err = CapstanError::mux(format!("{} audio track(s) not merged", tracks.len()));
            tracing::warn!(error = %err, "Falling back to video-only output");
        }
        remove_quietly(&muxed);

        replace_file(&intermediate, &output_path).map_err(|e| {
            tracing::error!(
                error = %e,
                intermediate = %intermediate.display(),
                "Video could not be placed, intermediate kept"
            );
            e
        })?;
        Ok(FinalizeOutcome::MuxFallback)
    }

    async fn finalize_audio_only(
        &self,
        output_path: PathBuf,
        audio_files: &[PathBuf],
    ) -> CapstanResult<FinalizeOutcome> {
        let tracks: Vec<&Path> = audio_files
            .iter()
            .map(PathBuf::as_path)
            .filter(|p| p.exists())
            .collect();

        if tracks.is_empty() {
            tracing::warn!("Audio-only session captured no tracks");
            return Ok(FinalizeOutcome::NoOutput);
        }

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CapstanError::finalize_io(&output_path, format!("Failed to create output directory: {e}"))
            })?;
        }

        let args = audio_mix_args(&tracks, &output_path);
        let ok = match run_to_completion("ffmpeg audio mix", &self.ffmpeg, &args, self.timeout())
            .await
        {
            Ok(status) => status.success() && output_path.exists(),
            Err(e) => {
                tracing::warn!(error = %e, "Audio mix failed to run");
                false
            }
        };

        if !ok {
            remove_quietly(&output_path);
            tracing::warn!(tracks = tracks.len(), "Audio mix failed, keeping source tracks");
            return Ok(FinalizeOutcome::NoOutput);
        }

        for track in &tracks {
            remove_quietly(track);
        }
        tracing::info!(output = %output_path.display(), tracks = tracks.len(), "Audio saved");
        Ok(FinalizeOutcome::AudioOnly {
            tracks: tracks.len(),
        })
    }
}

#[async_trait]
impl VideoEncoder for FfmpegEncoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn initialize(&self, settings: &EncoderSettings) -> CapstanResult<()> {
        self.abort();

        let intermediate = unique_temp_path("rec", "mp4");
        let args = encode_args(settings, &intermediate);
        let (process, stdin) = ManagedProcess::spawn("ffmpeg encoder", &self.ffmpeg, &args, true)?;
        let stdin = stdin
            .ok_or_else(|| CapstanError::encoder_unavailable("Encoder stdin was not captured"))?;

        tracing::info!(
            pid = process.id(),
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            bitrate = settings.bitrate,
            intermediate = %intermediate.display(),
            "Encoder initialized"
        );

        self.reset_counters(settings.frame_len());
        *self.stdin.lock() = Some(stdin);
        *self.job.lock() = Some(Job::Video {
            process,
            intermediate,
            output_path: settings.output_path.clone(),
        });
        Ok(())
    }

    fn prepare_audio_only(&self, output_path: &Path) -> CapstanResult<()> {
        self.abort();
        self.reset_counters(0);
        *self.job.lock() = Some(Job::AudioOnly {
            output_path: output_path.to_path_buf(),
        });
        tracing::debug!(output = %output_path.display(), "Encoder armed for audio-only output");
        Ok(())
    }

    fn encode_frame(&self, frame: &[u8], timestamp: Duration) -> CapstanResult<()> {
        let expected = self.expected_frame_len.load(Ordering::Relaxed);
        if frame.len() != expected {
            self.frames_rejected.fetch_add(1, Ordering::Relaxed);
            if !self.size_mismatch_logged.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    got = frame.len(),
                    expected,
                    "Dropping frame with unexpected size"
                );
            }
            return Err(CapstanError::encode_write(format!(
                "frame of {} bytes dropped, expected {expected}",
                frame.len()
            )));
        }

        let mut stdin = self.stdin.lock();
        let Some(pipe) = stdin.as_mut() else {
            return Err(CapstanError::encode_write("encoder input is closed"));
        };
        pipe.write_all(frame).map_err(|e| {
            CapstanError::encode_write(format!(
                "frame at {:.3}s: {e}",
                timestamp.as_secs_f64()
            ))
        })?;
        self.frames_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn finalize(&self, audio_files: &[PathBuf]) -> CapstanResult<FinalizeOutcome> {
        let job = self.job.lock().take();
        match job {
            None => {
                drop(self.stdin.lock().take());
                Ok(FinalizeOutcome::NoOutput)
            }
            Some(Job::AudioOnly { output_path }) => {
                self.finalize_audio_only(output_path, audio_files).await
            }
            Some(Job::Video {
                process,
                intermediate,
                output_path,
            }) => {
                self.finalize_video(process, intermediate, output_path, audio_files)
                    .await
            }
        }
    }

    fn abort(&self) {
        // Kill before touching stdin: a blocked frame write holds that lock
        // until the pipe breaks.
        let job = self.job.lock().take();
        if let Some(Job::Video {
            mut process,
            intermediate,
            ..
        }) = job
        {
            tracing::info!(pid = process.id(), "Aborting encoder");
            process.kill();
            drop(self.stdin.lock().take());
            remove_quietly(&intermediate);
        } else {
            drop(self.stdin.lock().take());
        }
    }

    fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}
