//! Check system capabilities.

use capstan_capture_engine::backend::gst::{element_available, required_elements};
use capstan_common::config::{config_file_path, AppConfig};
use capstan_stream_encoder::locate::bundled_ffmpeg_path;
use capstan_stream_encoder::locate_ffmpeg;

pub fn run(app_config: &AppConfig) -> anyhow::Result<()> {
    println!("Capstan System Check");
    println!("{}", "=".repeat(50));

    let ffmpeg = locate_ffmpeg(app_config.encoder.ffmpeg_path.as_deref());
    match &ffmpeg {
        Some(path) => println!("[OK] ffmpeg: {}", path.display()),
        None => println!(
            "[MISSING] ffmpeg: not on PATH or at {}",
            bundled_ffmpeg_path().display()
        ),
    }

    let mut missing_elements = 0;
    for element in required_elements() {
        if element_available(element) {
            println!("[OK] GStreamer element: {element}");
        } else {
            println!("[MISSING] GStreamer element: {element}");
            missing_elements += 1;
        }
    }

    println!();
    println!("Config file: {}", config_file_path().display());
    println!(
        "Output directory: {}",
        app_config.recording.resolved_output_dir().display()
    );

    println!();
    if ffmpeg.is_some() && missing_elements == 0 {
        println!("All required capabilities are available. Capstan is ready.");
    } else {
        println!("Some required capabilities are missing. See above for fixes.");
    }

    Ok(())
}
