//! Output and scratch file naming.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

use crate::config::RecordingConfiguration;

/// Timestamp layout embedded in finished recording names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Extension for a finished recording.
pub fn output_extension(audio_only: bool) -> &'static str {
    if audio_only {
        "mp3"
    } else {
        "mp4"
    }
}

/// `<prefix>_<timestamp>.<ext>`
pub fn output_file_name<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>, audio_only: bool) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{prefix}_{}.{}",
        at.format(TIMESTAMP_FORMAT),
        output_extension(audio_only)
    )
}

/// Final output path for a session started at `at`.
pub fn output_path_for<Tz: TimeZone>(config: &RecordingConfiguration, at: &DateTime<Tz>) -> PathBuf
where
    Tz::Offset: std::fmt::Display,
{
    config
        .resolved_output_dir()
        .join(output_file_name(&config.file_prefix, at, config.audio_only))
}

/// A fresh path in the system temp dir, unique per call.
pub fn unique_temp_path(prefix: &str, extension: &str) -> PathBuf {
    unique_path_in(&std::env::temp_dir(), prefix, extension)
}

/// A fresh path in `dir`, unique per call.
pub fn unique_path_in(dir: &Path, prefix: &str, extension: &str) -> PathBuf {
    dir.join(format!("{prefix}_{}.{extension}", uuid::Uuid::new_v4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn file_name_embeds_timestamp_and_mode_extension() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            output_file_name("Kayit", &at, false),
            "Kayit_2026-03-09_14-05-07.mp4"
        );
        assert_eq!(
            output_file_name("Kayit", &at, true),
            "Kayit_2026-03-09_14-05-07.mp3"
        );
    }

    #[test]
    fn output_path_uses_configured_dir() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let config = RecordingConfiguration {
            output_dir: PathBuf::from("/srv/recordings"),
            ..RecordingConfiguration::default()
        };
        assert_eq!(
            output_path_for(&config, &at),
            PathBuf::from("/srv/recordings/Kayit_2026-01-01_00-00-00.mp4")
        );
    }

    #[test]
    fn empty_output_dir_falls_back_to_default() {
        let config = RecordingConfiguration::default();
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let path = output_path_for(&config, &at);
        assert!(path.ends_with("Capstan/Kayit_2026-01-01_00-00-00.mp4"));
    }

    #[test]
    fn temp_paths_are_unique() {
        let a = unique_temp_path("sys", "wav");
        let b = unique_temp_path("sys", "wav");
        assert_ne!(a, b);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("wav"));
    }
}
