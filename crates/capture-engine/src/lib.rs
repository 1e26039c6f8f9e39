//! Capstan Capture Engine
//!
//! Runs one recording at a time. Video frames and audio buffers arrive on
//! their own capture threads; the session orchestrator decides whether
//! each frame is forwarded to the encoder and sequences start and stop
//! across all three components.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │               SessionOrchestrator                │
//! │  ┌──────────────┐ ┌──────────────────────────┐   │
//! │  │ VideoFrame   │ │ AudioCaptureService      │   │
//! │  │ Source       │ │  loopback ─► TrackWriter │   │
//! │  │              │ │  mic ──────► TrackWriter │   │
//! │  └──────┬───────┘ └────────────┬─────────────┘   │
//! │         │ frames (Recording)   │ sys_*.wav       │
//! │         ▼                      │ mic_*.wav       │
//! │  ┌─────────────────────────────▼──────────────┐  │
//! │  │ VideoEncoder (ffmpeg stdin → mux)          │  │
//! │  └────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backend;
pub mod session;
pub mod wav;

pub use audio::{AudioCaptureService, AudioTrackResult};
pub use session::*;
