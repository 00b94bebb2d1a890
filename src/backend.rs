use std::fmt;

use crate::delivery::FrameSink;
use crate::soft_backend::OpenH264Decoder;
use crate::{
    ConfigError, DecodeError, HardwareDecoder, NalUnit, ParameterSet, SessionState,
    SoftwareDecoder, Timestamp90k,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Hardware,
    Software,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hardware => f.write_str("hardware"),
            Self::Software => f.write_str("software"),
        }
    }
}

/// Builds fresh backends. A pipeline asks for a new hardware backend after
/// every `reset()` and for a software backend on fallback.
pub trait BackendFactory: Send + Sync {
    fn hardware(&self) -> Box<dyn HardwareDecoder>;

    fn software(&self) -> Result<Box<dyn SoftwareDecoder>, DecodeError>;
}

/// VideoToolbox when built with `backend-vt` on macOS, OpenH264 for software.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformBackends;

impl BackendFactory for PlatformBackends {
    fn hardware(&self) -> Box<dyn HardwareDecoder> {
        #[cfg(all(target_os = "macos", feature = "backend-vt"))]
        {
            Box::new(crate::vt_backend::VtHardwareDecoder::new())
        }
        #[cfg(not(all(target_os = "macos", feature = "backend-vt")))]
        {
            Box::new(UnavailableHardware::default())
        }
    }

    fn software(&self) -> Result<Box<dyn SoftwareDecoder>, DecodeError> {
        Ok(Box::new(OpenH264Decoder::new()?))
    }
}

/// Hardware stand-in for builds without a platform decoder; every
/// configuration attempt fails, which routes the stream to software.
#[derive(Debug, Default)]
pub struct UnavailableHardware {
    state: SessionState,
}

impl HardwareDecoder for UnavailableHardware {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn configure(
        &mut self,
        _parameter_set: &ParameterSet,
        _sink: FrameSink,
    ) -> Result<(), ConfigError> {
        self.state = SessionState::Failed;
        Err(ConfigError::Unsupported(
            "no hardware decode backend compiled into this build".to_string(),
        ))
    }

    fn decode(&mut self, _nal: &NalUnit, _pts_90k: Timestamp90k) -> Result<(), DecodeError> {
        Err(DecodeError::Backend {
            backend: "unavailable",
            message: "session is not configured".to_string(),
        })
    }

    fn invalidate(&mut self) {
        self.state = SessionState::Uninitialized;
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

/// The backend currently owning the decode session; switches from
/// `Hardware` to `Software` at most once per pipeline lifetime.
pub(crate) enum ActiveBackend {
    Idle,
    Hardware(Box<dyn HardwareDecoder>),
    Software(Box<dyn SoftwareDecoder>),
}

impl ActiveBackend {
    pub fn kind(&self) -> Option<BackendKind> {
        match self {
            Self::Idle => None,
            Self::Hardware(_) => Some(BackendKind::Hardware),
            Self::Software(_) => Some(BackendKind::Software),
        }
    }

    pub fn name(&self) -> Option<&'static str> {
        match self {
            Self::Idle => None,
            Self::Hardware(hw) => Some(hw.name()),
            Self::Software(sw) => Some(sw.name()),
        }
    }

    /// Tears down whichever session is active and returns to `Idle`.
    pub fn shutdown(&mut self) {
        match std::mem::replace(self, Self::Idle) {
            Self::Idle => {}
            Self::Hardware(mut hw) => hw.invalidate(),
            Self::Software(mut sw) => sw.reset(),
        }
    }
}
