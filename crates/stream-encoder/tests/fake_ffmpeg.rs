//! Finalization behavior against a shell script standing in for ffmpeg.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capstan_common::{CapstanError, EncoderConfig};
use capstan_platform_core::PixelFormat;
use capstan_stream_encoder::{EncoderSettings, FfmpegEncoder, FinalizeOutcome, VideoEncoder};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 36;

/// Writes stdin to the last argument for encode runs. Other runs either
/// write a marker to the last argument or fail, depending on `mux_ok`.
fn fake_ffmpeg(dir: &Path, mux_ok: bool) -> PathBuf {
    let other = if mux_ok {
        "printf 'mixed' > \"$last\""
    } else {
        "exit 3"
    };
    let script = format!(
        "#!/bin/sh\n\
         echo \"$*\" >> \"$0.args\"\n\
         for last; do :; done\n\
         case \"$*\" in\n\
         *rawvideo*) cat > \"$last\" ;;\n\
         *) {other} ;;\n\
         esac\n"
    );
    let path = dir.join("ffmpeg");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// An encoder that never reads its input and never exits on its own.
fn stalled_ffmpeg(dir: &Path) -> PathBuf {
    let path = dir.join("ffmpeg-stalled");
    fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn logged_args(ffmpeg: &Path) -> String {
    fs::read_to_string(ffmpeg.with_extension("args")).unwrap_or_default()
}

fn encoder(ffmpeg: &Path) -> FfmpegEncoder {
    let config = EncoderConfig {
        process_timeout_secs: Some(10),
        ..EncoderConfig::default()
    };
    FfmpegEncoder::new(ffmpeg, config)
}

fn settings(output: &Path) -> EncoderSettings {
    EncoderSettings {
        output_path: output.to_path_buf(),
        width: WIDTH,
        height: HEIGHT,
        fps: 30,
        bitrate: 2_000_000,
        pixel_format: PixelFormat::Bgra8,
    }
}

fn frame(fill: u8) -> Vec<u8> {
    vec![fill; PixelFormat::Bgra8.frame_len(WIDTH, HEIGHT)]
}

fn write_frames(encoder: &FfmpegEncoder, count: usize) {
    for i in 0..count {
        encoder
            .encode_frame(&frame(i as u8), Duration::from_millis(33 * i as u64))
            .unwrap();
    }
}

fn wav(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, [0u8; 256]).unwrap();
    path
}

#[tokio::test]
async fn test_video_with_audio_is_muxed_and_temps_removed() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("out").join("Kayit.mp4");
    let sys = wav(dir.path(), "sys.wav");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 5);
    assert_eq!(enc.frames_written(), 5);

    let outcome = enc.finalize(&[sys.clone()]).await.unwrap();
    assert_eq!(outcome, FinalizeOutcome::Muxed { audio_tracks: 1 });
    assert_eq!(fs::read(&output).unwrap(), b"mixed");
    assert!(!sys.exists());

    let args = logged_args(&ffmpeg);
    assert!(args.contains("-map 1:a"));
    assert!(args.contains("-c:v copy"));
}

#[tokio::test]
async fn test_mux_failure_falls_back_to_video_only() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), false);
    let output = dir.path().join("Kayit.mp4");
    let sys = wav(dir.path(), "sys.wav");
    let mic = wav(dir.path(), "mic.wav");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 5);

    let outcome = enc.finalize(&[sys.clone(), mic.clone()]).await.unwrap();
    assert_eq!(outcome, FinalizeOutcome::MuxFallback);
    let expected_len = 5 * PixelFormat::Bgra8.frame_len(WIDTH, HEIGHT) as u64;
    assert_eq!(fs::metadata(&output).unwrap().len(), expected_len);
    assert!(logged_args(&ffmpeg).contains("amix=inputs=2:duration=longest"));
}

#[tokio::test]
async fn test_missing_audio_tracks_yield_identical_video() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp4");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 5);

    let outcome = enc
        .finalize(&[dir.path().join("never-written.wav")])
        .await
        .unwrap();
    assert_eq!(outcome, FinalizeOutcome::VideoOnly);

    let bytes = fs::read(&output).unwrap();
    let mut expected = Vec::new();
    for i in 0..5u8 {
        expected.extend(frame(i));
    }
    assert_eq!(bytes, expected);
}

#[tokio::test]
async fn test_tiny_intermediate_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp4");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 1);

    let outcome = enc.finalize(&[]).await.unwrap();
    assert_eq!(outcome, FinalizeOutcome::Discarded);
    assert!(!outcome.has_output());
    assert!(!output.exists());
}

#[tokio::test]
async fn test_wrong_size_frames_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp4");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    let err = enc.encode_frame(&[0u8; 16], Duration::ZERO).unwrap_err();
    assert!(matches!(err, CapstanError::EncodeWrite { .. }));
    assert!(enc.encode_frame(&[0u8; 17], Duration::ZERO).is_err());
    write_frames(&enc, 3);

    assert_eq!(enc.frames_written(), 3);
    assert_eq!(enc.frames_rejected(), 2);
    enc.abort();
}

#[tokio::test]
async fn test_frames_after_input_closed_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp4");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 2);
    enc.abort();

    assert!(enc.encode_frame(&frame(0), Duration::ZERO).is_err());
    assert_eq!(enc.frames_written(), 2);
}

#[tokio::test]
async fn test_finalize_is_bounded_when_encoder_stops_reading() {
    const BIG_WIDTH: u32 = 640;
    const BIG_HEIGHT: u32 = 360;

    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = stalled_ffmpeg(dir.path());
    let output = dir.path().join("Kayit.mp4");
    let config = EncoderConfig {
        process_timeout_secs: Some(1),
        ..EncoderConfig::default()
    };
    let enc = Arc::new(FfmpegEncoder::new(&ffmpeg, config));
    enc.initialize(&EncoderSettings {
        width: BIG_WIDTH,
        height: BIG_HEIGHT,
        ..settings(&output)
    })
    .unwrap();

    // Several frames overflow the pipe buffer, so the writer blocks.
    let writer = {
        let enc = Arc::clone(&enc);
        std::thread::spawn(move || {
            let frame = vec![0u8; PixelFormat::Bgra8.frame_len(BIG_WIDTH, BIG_HEIGHT)];
            for _ in 0..5 {
                let _ = enc.encode_frame(&frame, Duration::ZERO);
            }
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(10), enc.finalize(&[]))
        .await
        .expect("finalize should honour the process timeout")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome, FinalizeOutcome::Discarded);
    assert!(!output.exists());
    writer.join().unwrap();
}

#[tokio::test]
async fn test_unplaceable_mux_output_is_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    // A non-empty directory squats on the output path.
    let output = dir.path().join("Kayit.mp4");
    fs::create_dir_all(output.join("occupied")).unwrap();
    let sys = wav(dir.path(), "sys.wav");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 5);

    let err = enc.finalize(&[sys.clone()]).await.unwrap_err();
    assert!(matches!(err, CapstanError::FinalizeIo { .. }));

    let args = logged_args(&ffmpeg);
    let mux_line = args.lines().last().unwrap();
    assert!(mux_line.contains("-c:v copy"));
    let muxed = PathBuf::from(mux_line.split_whitespace().last().unwrap());
    assert!(!muxed.exists());
    assert!(sys.exists());
}

#[tokio::test]
async fn test_audio_only_mixes_existing_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp3");
    let sys = wav(dir.path(), "sys.wav");
    let mic = wav(dir.path(), "mic.wav");

    let enc = encoder(&ffmpeg);
    enc.prepare_audio_only(&output).unwrap();
    let outcome = enc.finalize(&[sys.clone(), mic.clone()]).await.unwrap();

    assert_eq!(outcome, FinalizeOutcome::AudioOnly { tracks: 2 });
    assert!(output.exists());
    assert!(!sys.exists() && !mic.exists());
    assert!(logged_args(&ffmpeg).contains("amix=inputs=2:duration=longest"));
}

#[tokio::test]
async fn test_audio_only_failure_keeps_tracks_and_reports_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), false);
    let output = dir.path().join("Kayit.mp3");
    let sys = wav(dir.path(), "sys.wav");

    let enc = encoder(&ffmpeg);
    enc.prepare_audio_only(&output).unwrap();
    let outcome = enc.finalize(&[sys.clone()]).await.unwrap();

    assert_eq!(outcome, FinalizeOutcome::NoOutput);
    assert!(!output.exists());
    assert!(sys.exists());
}

#[tokio::test]
async fn test_finalize_without_run_produces_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let enc = encoder(&fake_ffmpeg(dir.path(), true));
    assert_eq!(enc.finalize(&[]).await.unwrap(), FinalizeOutcome::NoOutput);
}

#[tokio::test]
async fn test_abort_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), true);
    let output = dir.path().join("Kayit.mp4");

    let enc = encoder(&ffmpeg);
    enc.initialize(&settings(&output)).unwrap();
    write_frames(&enc, 5);
    enc.abort();

    assert_eq!(enc.finalize(&[]).await.unwrap(), FinalizeOutcome::NoOutput);
    assert!(!output.exists());
}
