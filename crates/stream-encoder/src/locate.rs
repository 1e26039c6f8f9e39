//! Locating the ffmpeg binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use capstan_common::{app_data_dir, EncoderConfig};

use crate::encoder::VideoEncoder;
use crate::ffmpeg::FfmpegEncoder;
use crate::null::NullEncoder;

#[cfg(windows)]
const FFMPEG_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const FFMPEG_BINARY: &str = "ffmpeg";

/// Find a usable ffmpeg.
///
/// Order: the configured path, `ffmpeg` on `PATH`, then the copy bundled
/// under the application data directory.
pub fn locate_ffmpeg(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "Configured ffmpeg not found, searching PATH");
    }

    if responds_to_version(Path::new(FFMPEG_BINARY)) {
        return Some(PathBuf::from(FFMPEG_BINARY));
    }

    let bundled = bundled_ffmpeg_path();
    if bundled.is_file() {
        return Some(bundled);
    }

    tracing::debug!("ffmpeg not found");
    None
}

/// The ffmpeg encoder if a binary is available, otherwise the null encoder.
pub fn select_encoder(config: &EncoderConfig) -> Arc<dyn VideoEncoder> {
    match locate_ffmpeg(config.ffmpeg_path.as_deref()) {
        Some(path) => {
            tracing::info!(ffmpeg = %path.display(), "Using ffmpeg encoder");
            Arc::new(FfmpegEncoder::new(path, config.clone()))
        }
        None => {
            tracing::warn!("ffmpeg not found, recordings will not be saved");
            Arc::new(NullEncoder::new())
        }
    }
}

/// Where a bundled ffmpeg is expected to live.
pub fn bundled_ffmpeg_path() -> PathBuf {
    app_data_dir().join("ffmpeg").join("bin").join(FFMPEG_BINARY)
}

fn responds_to_version(binary: &Path) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
