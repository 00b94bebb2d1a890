use std::time::Duration;
use std::{fmt, fmt::Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardwarePreference {
    #[default]
    Auto,
    Disabled,
}

impl Display for HardwarePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Disabled => f.write_str("disabled"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Delivery cadence while decode keeps up.
    pub target_fps: u32,
    /// Degraded cadence once throughput drops into the low band.
    pub fallback_fps: u32,
    pub high_band_fps: f64,
    pub low_band_fps: f64,
    pub max_consecutive_drops: u32,
    pub report_interval: Duration,
    pub hardware: HardwarePreference,
    pub report_metrics: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            fallback_fps: 30,
            high_band_fps: 55.0,
            low_band_fps: 40.0,
            max_consecutive_drops: 3,
            report_interval: Duration::from_secs(5),
            hardware: HardwarePreference::Auto,
            report_metrics: false,
        }
    }
}

impl PipelineConfig {
    /// Defaults overlaid with `MIRROR_DECODE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    pub(crate) fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(fps) = lookup("MIRROR_DECODE_TARGET_FPS").and_then(|v| v.parse::<u32>().ok()) {
            self.target_fps = fps.clamp(1, 240);
        }
        if let Some(drops) = lookup("MIRROR_DECODE_MAX_DROPS").and_then(|v| v.parse::<u32>().ok())
        {
            self.max_consecutive_drops = drops.clamp(1, 120);
        }
        if let Some(secs) = lookup("MIRROR_DECODE_REPORT_SECS").and_then(|v| v.parse::<u64>().ok())
        {
            self.report_interval = Duration::from_secs(secs.clamp(1, 3_600));
        }
        if lookup("MIRROR_DECODE_DISABLE_HW").is_some_and(|v| is_truthy(&v)) {
            self.hardware = HardwarePreference::Disabled;
        }
        if let Some(v) = lookup("MIRROR_DECODE_METRICS") {
            self.report_metrics = is_truthy(&v);
        }
        self
    }
}

impl Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineConfig(target_fps={}, fallback_fps={}, max_consecutive_drops={}, report_interval_s={}, hardware={}, report_metrics={})",
            self.target_fps,
            self.fallback_fps,
            self.max_consecutive_drops,
            self.report_interval.as_secs(),
            self.hardware,
            self.report_metrics
        )
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
