//! Encoder that accepts frames and produces nothing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use capstan_common::CapstanResult;

use crate::encoder::{EncoderSettings, FinalizeOutcome, VideoEncoder};

/// Used when no ffmpeg binary can be found, so capture can still be
/// exercised end to end.
#[derive(Debug, Default)]
pub struct NullEncoder {
    frames: AtomicU64,
}

impl NullEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VideoEncoder for NullEncoder {
    fn name(&self) -> &str {
        "null"
    }

    fn initialize(&self, settings: &EncoderSettings) -> CapstanResult<()> {
        tracing::warn!(
            output = %settings.output_path.display(),
            "Null encoder active, frames will be discarded"
        );
        self.frames.store(0, Ordering::Relaxed);
        Ok(())
    }

    fn prepare_audio_only(&self, output_path: &Path) -> CapstanResult<()> {
        tracing::warn!(output = %output_path.display(), "Null encoder active, audio will not be mixed");
        Ok(())
    }

    fn encode_frame(&self, _frame: &[u8], _timestamp: Duration) -> CapstanResult<()> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn finalize(&self, _audio_files: &[PathBuf]) -> CapstanResult<FinalizeOutcome> {
        Ok(FinalizeOutcome::NoOutput)
    }

    fn abort(&self) {}

    fn frames_written(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
