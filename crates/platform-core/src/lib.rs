//! Capstan platform core contracts.
//!
//! This crate contains the cross-platform frame and audio data structures
//! exchanged between capture backends, the session orchestrator, and the
//! encoder, without coupling to a concrete OS backend.

use serde::{Deserialize, Serialize};

/// Pixel layout of frames handed to the encoder.
///
/// Capture backends normalize every frame to this layout regardless of
/// what the display produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha, interleaved.
    #[default]
    Bgra8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Bgra8 => 4,
        }
    }

    /// Name understood by ffmpeg's `-pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::Bgra8 => "bgra",
        }
    }

    /// Byte length of one tightly packed frame.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// One raw frame from a video source.
///
/// The frame is owned; dropping it releases the pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Monotonically increasing per capture session, starting at 0.
    pub sequence: u64,
}

impl CaptureFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format: PixelFormat::Bgra8,
            sequence,
        }
    }

    /// Whether the buffer length matches the declared geometry.
    pub fn is_well_formed(&self) -> bool {
        !self.data.is_empty() && self.data.len() == self.format.frame_len(self.width, self.height)
    }
}

/// PCM sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian integers.
    #[default]
    I16,
    /// 32-bit little-endian IEEE floats.
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::I16 => 2,
            Self::F32 => 4,
        }
    }
}

/// Native format of an audio capture stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            sample_format,
        }
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.sample_format.bytes_per_sample()
    }

    /// Bytes per interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn bytes_per_second(&self) -> usize {
        self.block_align() * self.sample_rate as usize
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(44_100, 2, SampleFormat::I16)
    }
}

/// Which device an audio stream is captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioRole {
    /// Whatever the system is currently playing.
    SystemLoopback,
    /// The default input device.
    Microphone,
}

impl AudioRole {
    /// Short tag used in temporary file names.
    pub fn file_tag(self) -> &'static str {
        match self {
            Self::SystemLoopback => "sys",
            Self::Microphone => "mic",
        }
    }
}

impl std::fmt::Display for AudioRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SystemLoopback => f.write_str("system-audio"),
            Self::Microphone => f.write_str("microphone"),
        }
    }
}

/// Display selector. `None` targets the system primary display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DisplayId(pub Option<String>);

impl DisplayId {
    pub fn primary() -> Self {
        Self(None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(Some(name.into()))
    }

    pub fn is_primary(&self) -> bool {
        self.0.is_none()
    }

    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

impl From<Option<String>> for DisplayId {
    fn from(value: Option<String>) -> Self {
        Self(value.filter(|name| !name.trim().is_empty()))
    }
}
