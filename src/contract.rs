use std::num::NonZeroU32;
use std::{fmt, fmt::Display};

use crate::delivery::FrameSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
    H264,
}

impl FrameFormat {
    /// Maps a producer-supplied format hint; unknown hints yield `None`.
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(Self::Jpeg),
            "h264" | "avc" => Some(Self::H264),
            _ => None,
        }
    }
}

impl Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("jpeg"),
            Self::H264 => f.write_str("h264"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: NonZeroU32,
    pub height: NonZeroU32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Option<Self> {
        Some(Self {
            width: NonZeroU32::new(width)?,
            height: NonZeroU32::new(height)?,
        })
    }

    pub fn rgba_len(&self) -> usize {
        (self.width.get() as usize)
            .saturating_mul(self.height.get() as usize)
            .saturating_mul(4)
    }
}

impl Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp90k(pub i64);

impl Display for Timestamp90k {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@90k", self.0)
    }
}

/// One unit of input as handed over by the transport.
#[derive(Debug, Clone, Default)]
pub struct FrameUnit {
    pub bytes: Vec<u8>,
    pub format: Option<String>,
    /// Advisory; NAL types are always inspected directly.
    pub is_config: bool,
    /// Capture time in epoch milliseconds, used for latency telemetry only.
    pub capture_ms: Option<i64>,
}

impl FrameUnit {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn config(mut self, is_config: bool) -> Self {
        self.is_config = is_config;
        self
    }

    #[must_use]
    pub fn captured_at(mut self, epoch_ms: i64) -> Self {
        self.capture_ms = Some(epoch_ms);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdrSlice,
    IdrSlice,
    Sps,
    Pps,
    Other(u8),
}

impl NalUnitType {
    pub fn from_header(header: u8) -> Self {
        match header & 0x1f {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            7 => Self::Sps,
            8 => Self::Pps,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::NonIdrSlice => 1,
            Self::IdrSlice => 5,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Other(code) => code,
        }
    }

    pub fn is_slice(self) -> bool {
        matches!(self, Self::NonIdrSlice | Self::IdrSlice)
    }

    pub fn is_parameter_set(self) -> bool {
        matches!(self, Self::Sps | Self::Pps)
    }
}

/// A NAL unit without its start code; `payload[0]` is the NAL header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub payload: Vec<u8>,
}

impl NalUnit {
    pub fn new(payload: Vec<u8>) -> Option<Self> {
        let header = *payload.first()?;
        Some(Self {
            nal_type: NalUnitType::from_header(header),
            payload,
        })
    }

    /// Whether this slice opens a new picture: `first_mb_in_slice` is the
    /// first ue(v) field after the header, and equals zero exactly when the
    /// next bit is set.
    pub fn starts_picture(&self) -> bool {
        self.nal_type.is_slice() && self.payload.get(1).is_none_or(|byte| byte & 0x80 != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl ParameterSet {
    /// SPS and PPS re-framed with 4-byte start codes.
    pub fn to_annexb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sps.len() + self.pps.len() + 8);
        for nal in [&self.sps, &self.pps] {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(nal);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Hardware,
    Software,
    StillImage,
}

impl Display for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Software => f.write_str("software"),
            Self::StillImage => f.write_str("still"),
        }
    }
}

/// A displayable bitmap. `pixels` is tightly packed RGBA8.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub dims: Dimensions,
    pub pts_90k: Timestamp90k,
    pub pixels: Vec<u8>,
    pub source: FrameSource,
    pub capture_ms: Option<i64>,
}

impl DecodedFrame {
    pub fn width(&self) -> u32 {
        self.dims.width.get()
    }

    pub fn height(&self) -> u32 {
        self.dims.height.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Uninitialized,
    Configured,
    Active,
    Failed,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::Configured => f.write_str("configured"),
            Self::Active => f.write_str("active"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ConfiguringHardware,
    ActiveHardware,
    ActiveSoftware,
}

impl Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::ConfiguringHardware => f.write_str("configuring_hardware"),
            Self::ActiveHardware => f.write_str("active_hardware"),
            Self::ActiveSoftware => f.write_str("active_software"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("format description rejected ({context}): status {status}")]
    FormatDescription { context: String, status: i32 },
    #[error("decode session rejected ({context}): status {status}")]
    Session { context: String, status: i32 },
    #[error("hardware decode unsupported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("still image decode failed: {0}")]
    StillImage(String),
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("software decoder error: {0}")]
    Software(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("pipeline disconnected")]
    Disconnected,
}

/// Platform decompression session fed with individual slice NAL units.
///
/// `decode` must not block on the result; decoded frames are pushed into the
/// sink handed over by the most recent successful `configure`, from whatever
/// thread the platform completes on.
pub trait HardwareDecoder: Send {
    fn name(&self) -> &'static str;

    fn configure(&mut self, parameter_set: &ParameterSet, sink: FrameSink)
    -> Result<(), ConfigError>;

    fn decode(&mut self, nal: &NalUnit, pts_90k: Timestamp90k) -> Result<(), DecodeError>;

    /// Tears the session down; in-flight outputs may still reach the old sink.
    fn invalidate(&mut self);

    fn state(&self) -> SessionState;
}

/// Self-framing decoder fed with raw Annex-B bytes.
pub trait SoftwareDecoder: Send {
    fn name(&self) -> &'static str;

    fn decode(
        &mut self,
        annexb: &[u8],
        pts_90k: Timestamp90k,
    ) -> Result<Vec<DecodedFrame>, DecodeError>;

    fn reset(&mut self);
}
