//! ffmpeg argument builders.

use std::path::Path;

use crate::encoder::EncoderSettings;

const COMMON_PREFIX: [&str; 4] = ["-hide_banner", "-loglevel", "error", "-y"];

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn prefixed() -> Vec<String> {
    COMMON_PREFIX.iter().map(|s| s.to_string()).collect()
}

/// Arguments for the streaming encoder reading raw frames from stdin.
pub fn encode_args(settings: &EncoderSettings, intermediate: &Path) -> Vec<String> {
    let mut args = prefixed();
    args.extend(
        [
            "-f",
            "rawvideo",
            "-pix_fmt",
            settings.pixel_format.ffmpeg_name(),
        ]
        .map(String::from),
    );
    args.push("-s".into());
    args.push(format!("{}x{}", settings.width, settings.height));
    args.push("-r".into());
    args.push(settings.fps.to_string());
    args.push("-i".into());
    args.push("-".into());

    // yuv420p needs even dimensions.
    if settings.width % 2 != 0 || settings.height % 2 != 0 {
        args.push("-vf".into());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".into());
    }

    args.extend(["-c:v", "libx264", "-preset", "ultrafast"].map(String::from));
    args.push("-b:v".into());
    args.push(settings.bitrate.to_string());
    args.extend(["-pix_fmt", "yuv420p"].map(String::from));
    args.push(path_arg(intermediate));
    args
}

/// Arguments for muxing audio tracks into a finished video.
///
/// One track is mapped directly. Several tracks are mixed with `amix`
/// using the longest input's duration so no audio is cut off.
pub fn mux_args(video: &Path, audio: &[&Path], output: &Path, audio_bitrate: &str) -> Vec<String> {
    let mut args = prefixed();
    args.push("-i".into());
    args.push(path_arg(video));
    for track in audio {
        args.push("-i".into());
        args.push(path_arg(track));
    }

    args.extend(["-map", "0:v"].map(String::from));
    match audio.len() {
        0 => {}
        1 => args.extend(["-map", "1:a"].map(String::from)),
        n => {
            let labels: String = (1..=n).map(|i| format!("[{i}:a]")).collect();
            args.push("-filter_complex".into());
            args.push(format!("{labels}amix=inputs={n}:duration=longest[aout]"));
            args.extend(["-map", "[aout]"].map(String::from));
        }
    }

    args.extend(["-c:v", "copy"].map(String::from));
    if !audio.is_empty() {
        args.extend(["-c:a", "aac", "-b:a"].map(String::from));
        args.push(audio_bitrate.to_string());
    }
    args.push(path_arg(output));
    args
}

/// Arguments for mixing audio-only tracks into a compressed file.
pub fn audio_mix_args(inputs: &[&Path], output: &Path) -> Vec<String> {
    let mut args = prefixed();
    for input in inputs {
        args.push("-i".into());
        args.push(path_arg(input));
    }
    if inputs.len() > 1 {
        args.push("-filter_complex".into());
        args.push(format!("amix=inputs={}:duration=longest", inputs.len()));
    }
    args.push(path_arg(output));
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_platform_core::PixelFormat;
    use std::path::PathBuf;

    fn settings(width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            output_path: PathBuf::from("/tmp/out.mp4"),
            width,
            height,
            fps: 30,
            bitrate: 4_000_000,
            pixel_format: PixelFormat::Bgra8,
        }
    }

    fn window<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_encode_args_read_raw_bgra_from_stdin() {
        let args = encode_args(&settings(1920, 1080), Path::new("/tmp/rec_1.mp4"));
        assert_eq!(window(&args, "-f"), Some("rawvideo"));
        assert_eq!(window(&args, "-s"), Some("1920x1080"));
        assert_eq!(window(&args, "-r"), Some("30"));
        assert_eq!(window(&args, "-i"), Some("-"));
        assert_eq!(window(&args, "-b:v"), Some("4000000"));
        assert_eq!(window(&args, "-c:v"), Some("libx264"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/rec_1.mp4"));
        assert!(!args.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_encode_args_pad_odd_geometry() {
        let args = encode_args(&settings(1365, 767), Path::new("/tmp/rec.mp4"));
        assert_eq!(window(&args, "-vf"), Some("pad=ceil(iw/2)*2:ceil(ih/2)*2"));
    }

    #[test]
    fn test_mux_args_single_track_maps_directly() {
        let sys = PathBuf::from("/tmp/sys.wav");
        let args = mux_args(
            Path::new("/tmp/rec.mp4"),
            &[sys.as_path()],
            Path::new("/tmp/muxed.mp4"),
            "192k",
        );
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a"));
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert_eq!(window(&args, "-b:a"), Some("192k"));
        assert!(!args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_mux_args_two_tracks_use_amix_longest() {
        let sys = PathBuf::from("/tmp/sys.wav");
        let mic = PathBuf::from("/tmp/mic.wav");
        let args = mux_args(
            Path::new("/tmp/rec.mp4"),
            &[sys.as_path(), mic.as_path()],
            Path::new("/tmp/muxed.mp4"),
            "192k",
        );
        assert_eq!(
            window(&args, "-filter_complex"),
            Some("[1:a][2:a]amix=inputs=2:duration=longest[aout]")
        );
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "[aout]"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "copy"));
    }

    #[test]
    fn test_audio_mix_args() {
        let sys = PathBuf::from("/tmp/sys.wav");
        let mic = PathBuf::from("/tmp/mic.wav");
        let single = audio_mix_args(&[sys.as_path()], Path::new("/tmp/out.mp3"));
        assert!(!single.contains(&"-filter_complex".to_string()));

        let both = audio_mix_args(&[sys.as_path(), mic.as_path()], Path::new("/tmp/out.mp3"));
        assert_eq!(
            window(&both, "-filter_complex"),
            Some("amix=inputs=2:duration=longest")
        );
        assert_eq!(both.last().map(String::as_str), Some("/tmp/out.mp3"));
    }
}
