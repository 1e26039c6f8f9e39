//! Capstan Stream Encoder
//!
//! Streams raw frames into an external ffmpeg process while a session is
//! recording, then turns the intermediate file into the finished artifact.
//!
//! # Finalization
//!
//! ```text
//! raw BGRA frames ──► ffmpeg stdin ──► rec_<id>.mp4 (intermediate)
//!                                             │
//!                         size check ─────────┤ too small ──► discarded
//!                                             │
//!   sys_<id>.wav ──┐                          ▼
//!                  ├── amix ──► mux (-c:v copy, aac) ──► final .mp4
//!   mic_<id>.wav ──┘                │
//!                                   └── mux failed ──► video-only .mp4
//! ```
//!
//! Audio-only sessions skip the video process entirely and mix the WAV
//! tracks straight into an `.mp3`.

pub mod args;
pub mod encoder;
pub mod ffmpeg;
pub mod files;
pub mod locate;
pub mod null;
pub mod process;

pub use encoder::*;
pub use ffmpeg::FfmpegEncoder;
pub use locate::{locate_ffmpeg, select_encoder};
pub use null::NullEncoder;
