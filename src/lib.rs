mod backend;
mod bitstream;
mod config;
mod contract;
mod convert;
mod delivery;
mod engine;
mod format;
mod monitor;
mod pacer;
mod params;
mod pipeline;
mod queue;
mod soft_backend;
mod status;
mod still_image;

#[cfg(all(target_os = "macos", feature = "backend-vt"))]
mod vt_backend;

pub use backend::{BackendFactory, BackendKind, PlatformBackends, UnavailableHardware};
pub use bitstream::{
    H264Profile, SpsInfo, length_prefixed_to_annexb, split_nal_units, to_length_prefixed,
};
pub use config::{HardwarePreference, PipelineConfig};
pub use contract::{
    ConfigError, DecodeError, DecodedFrame, Dimensions, FrameFormat, FrameSource, FrameUnit,
    HardwareDecoder, NalUnit, NalUnitType, ParameterSet, PipelineState, SessionState,
    SoftwareDecoder, Timestamp90k,
};
pub use convert::{RgbaConverter, Yuv420Planes, bgra_to_rgba};
pub use delivery::{FrameCallback, FrameSink};
pub use format::detect_format;
pub use monitor::{PerformanceMonitor, PerformanceReport, PerformanceWindow, epoch_millis};
pub use pacer::{FramePacer, PaceDecision};
pub use params::ParameterSetStore;
pub use pipeline::MirrorPipeline;
pub use queue::QueueStats;
pub use soft_backend::OpenH264Decoder;
pub use status::PipelineStats;
pub use still_image::StillImageDecoder;
#[cfg(all(target_os = "macos", feature = "backend-vt"))]
pub use vt_backend::VtHardwareDecoder;
