use std::borrow::Cow;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::backend::{ActiveBackend, BackendFactory, BackendKind};
use crate::bitstream::{SpsInfo, length_prefixed_to_annexb, split_nal_units};
use crate::delivery::{DeliveryEvent, FrameSink};
use crate::format::detect_format;
use crate::monitor::PerformanceMonitor;
use crate::params::ParameterSetStore;
use crate::status::PipelineStatus;
use crate::still_image::StillImageDecoder;
use crate::{
    DecodeError, DecodedFrame, FrameFormat, FrameUnit, HardwarePreference, NalUnit, ParameterSet,
    PipelineConfig, PipelineState, Timestamp90k,
};

/// Synchronous decode state machine driven by the decode worker.
///
/// Owns the parameter-set store and the active backend; every decoded frame
/// leaves through a [`FrameSink`] tagged with the current session generation.
pub(crate) struct DecodeEngine {
    config: PipelineConfig,
    factory: Arc<dyn BackendFactory>,
    store: ParameterSetStore,
    backend: ActiveBackend,
    hardware_abandoned: bool,
    delivery: Sender<DeliveryEvent>,
    sink: FrameSink,
    monitor: Arc<Mutex<PerformanceMonitor>>,
    status: Arc<PipelineStatus>,
    still: StillImageDecoder,
    next_pts: i64,
    pts_step: i64,
}

impl DecodeEngine {
    pub fn new(
        config: PipelineConfig,
        factory: Arc<dyn BackendFactory>,
        delivery: Sender<DeliveryEvent>,
        monitor: Arc<Mutex<PerformanceMonitor>>,
        status: Arc<PipelineStatus>,
    ) -> Self {
        let sink = FrameSink::new(delivery.clone(), status.generation());
        let pts_step = 90_000 / i64::from(config.target_fps.max(1));
        Self {
            config,
            factory,
            store: ParameterSetStore::new(),
            backend: ActiveBackend::Idle,
            hardware_abandoned: false,
            delivery,
            sink,
            monitor,
            status,
            still: StillImageDecoder::new(),
            next_pts: 0,
            pts_step: pts_step.max(1),
        }
    }

    pub fn decode(&mut self, unit: FrameUnit) {
        if unit.is_config {
            trace!(
                target: "mirror_decode::engine",
                "producer marked {} bytes as parameter sets",
                unit.bytes.len()
            );
        }
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record_input(unit.bytes.len());
        }
        match detect_format(&unit.bytes, unit.format.as_deref()) {
            FrameFormat::Jpeg => self.decode_still(&unit),
            FrameFormat::H264 => self.decode_h264(&unit),
        }
    }

    /// Injects a parameter-set pair out of band. Start codes are tolerated.
    pub fn set_parameter_sets(&mut self, sps: Vec<u8>, pps: Vec<u8>) {
        let sps = strip_start_code(sps);
        let pps = strip_start_code(pps);
        if sps.is_empty() || pps.is_empty() {
            warn!(target: "mirror_decode::engine", "ignoring empty parameter set injection");
            return;
        }
        self.store.set(sps, pps);
        self.apply_pending_configuration();
        self.publish_hardware_session();
    }

    /// Tears down the active backend and forgets negotiated parameters, so
    /// the next complete SPS/PPS pair retries hardware.
    pub fn reset(&mut self) {
        self.backend.shutdown();
        self.store.clear();
        self.hardware_abandoned = false;
        self.status.set_hardware_abandoned(false);
        let generation = self.status.bump_generation();
        self.sink = FrameSink::new(self.delivery.clone(), generation);
        self.status.set_active(PipelineState::Idle, None);
        self.publish_hardware_session();
        let _ = self.delivery.send(DeliveryEvent::Reset);
        info!(target: "mirror_decode::engine", "pipeline reset (generation {generation})");
    }

    pub fn flush(&self) {
        let _ = self.delivery.send(DeliveryEvent::Flush);
    }

    /// Releases the backend on shutdown.
    pub fn shutdown(&mut self) {
        self.backend.shutdown();
    }

    fn next_timestamp(&mut self) -> Timestamp90k {
        let pts = Timestamp90k(self.next_pts);
        self.next_pts = self.next_pts.saturating_add(self.pts_step);
        pts
    }

    fn decode_still(&mut self, unit: &FrameUnit) {
        let pts = self.next_timestamp();
        let started = Instant::now();
        let result = self.still.decode(&unit.bytes, pts);
        self.record_decode_time(started.elapsed());
        match result {
            Ok(mut frame) => {
                frame.capture_ms = unit.capture_ms;
                self.deliver(frame);
            }
            Err(err) => warn!(target: "mirror_decode::engine", "dropping still frame: {err}"),
        }
    }

    fn decode_h264(&mut self, unit: &FrameUnit) {
        let (nals, annexb) = match split_input(&unit.bytes) {
            Ok(split) => split,
            Err(err) => {
                debug!(
                    target: "mirror_decode::engine",
                    "dropping {} byte buffer: {err}",
                    unit.bytes.len()
                );
                return;
            }
        };

        let mut picture_pts = None;
        let mut software_bound = false;
        for nal in &nals {
            if self.store.observe(nal) {
                continue;
            }
            if !nal.nal_type.is_slice() {
                continue;
            }
            self.apply_pending_configuration();
            // Continuation slices share the timestamp of their picture.
            let pts = match picture_pts {
                Some(pts) if !nal.starts_picture() => pts,
                _ => {
                    let pts = self.next_timestamp();
                    picture_pts = Some(pts);
                    if self.backend.kind() == Some(BackendKind::Hardware) {
                        self.note_submission(pts, unit.capture_ms);
                    }
                    pts
                }
            };
            match self.backend.kind() {
                Some(BackendKind::Hardware) => self.submit_hardware(nal, pts),
                Some(BackendKind::Software) => software_bound = true,
                None => {
                    debug!(
                        target: "mirror_decode::engine",
                        "dropping slice (type {}) before parameter sets were negotiated",
                        nal.nal_type.code()
                    );
                }
            }
        }
        // Parameter sets arriving without slices still configure eagerly.
        self.apply_pending_configuration();

        if software_bound {
            // The software decoder hands back the newest picture in the buffer.
            let pts = picture_pts.unwrap_or_else(|| self.next_timestamp());
            self.submit_software(&annexb, pts, unit.capture_ms);
        }
        self.publish_hardware_session();
    }

    /// Hardware completions arrive on the delivery side; this lets it time
    /// them and attach the capture time.
    fn note_submission(&self, pts: Timestamp90k, capture_ms: Option<i64>) {
        let _ = self.delivery.send(DeliveryEvent::Submitted {
            pts_90k: pts,
            submitted_at: Instant::now(),
            capture_ms,
        });
    }

    fn submit_hardware(&mut self, nal: &NalUnit, pts: Timestamp90k) {
        let ActiveBackend::Hardware(hw) = &mut self.backend else {
            return;
        };
        if let Err(err) = hw.decode(nal, pts) {
            warn!(
                target: "mirror_decode::engine",
                "{} dropped slice at {pts}: {err}",
                hw.name()
            );
        }
    }

    fn submit_software(&mut self, annexb: &[u8], pts: Timestamp90k, capture_ms: Option<i64>) {
        let ActiveBackend::Software(sw) = &mut self.backend else {
            return;
        };
        let name = sw.name();
        let started = Instant::now();
        let result = sw.decode(annexb, pts);
        self.record_decode_time(started.elapsed());
        match result {
            Ok(frames) => {
                for mut frame in frames {
                    frame.capture_ms = frame.capture_ms.or(capture_ms);
                    self.deliver(frame);
                }
            }
            Err(err) => {
                warn!(target: "mirror_decode::engine", "{name} dropped frame at {pts}: {err}");
            }
        }
    }

    fn record_decode_time(&self, elapsed: Duration) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record_decode_time(elapsed);
        }
    }

    fn publish_hardware_session(&self) {
        let session = match &self.backend {
            ActiveBackend::Hardware(hw) => Some(hw.state()),
            _ => None,
        };
        self.status.set_hardware_session(session);
    }

    fn deliver(&self, frame: DecodedFrame) {
        if let Err(err) = self.sink.deliver(frame) {
            debug!(target: "mirror_decode::engine", "delivery context gone: {err}");
        }
    }

    /// Configures a backend for a newly completed SPS/PPS pair, if any.
    fn apply_pending_configuration(&mut self) {
        let Some(params) = self.store.take_pending() else {
            return;
        };
        log_profile(&params);

        if let ActiveBackend::Software(sw) = &mut self.backend {
            // Software decoders negotiate in-band; hand them the new pair.
            if let Err(err) = sw.decode(&params.to_annexb(), Timestamp90k(self.next_pts)) {
                let name = sw.name();
                warn!(target: "mirror_decode::engine", "{name} rejected parameter sets: {err}");
            }
            return;
        }

        if self.hardware_abandoned || self.config.hardware == HardwarePreference::Disabled {
            self.activate_software(&params);
            return;
        }

        let mut hw = match std::mem::replace(&mut self.backend, ActiveBackend::Idle) {
            ActiveBackend::Hardware(hw) => hw,
            _ => self.factory.hardware(),
        };
        hw.invalidate();
        let generation = self.status.bump_generation();
        self.sink = FrameSink::new(self.delivery.clone(), generation);
        self.status.note_hardware_attempt();

        match hw.configure(&params, self.sink.clone()) {
            Ok(()) => {
                info!(
                    target: "mirror_decode::engine",
                    "{} session configured (generation {generation})",
                    hw.name()
                );
                self.status
                    .set_active(PipelineState::ActiveHardware, Some(hw.name()));
                self.backend = ActiveBackend::Hardware(hw);
            }
            Err(err) => {
                warn!(
                    target: "mirror_decode::engine",
                    "{} configuration failed, falling back to software decode: {err}",
                    hw.name()
                );
                self.hardware_abandoned = true;
                self.status.set_hardware_abandoned(true);
                self.activate_software(&params);
            }
        }
    }

    fn activate_software(&mut self, params: &ParameterSet) {
        let mut sw = match self.factory.software() {
            Ok(sw) => sw,
            Err(err) => {
                error!(target: "mirror_decode::engine", "software decoder unavailable: {err}");
                self.backend = ActiveBackend::Idle;
                self.status.set_active(PipelineState::Idle, None);
                return;
            }
        };
        if let Err(err) = sw.decode(&params.to_annexb(), Timestamp90k(self.next_pts)) {
            warn!(target: "mirror_decode::engine", "{} rejected parameter sets: {err}", sw.name());
        }
        info!(target: "mirror_decode::engine", "software decode active ({})", sw.name());
        self.status
            .set_active(PipelineState::ActiveSoftware, Some(sw.name()));
        self.backend = ActiveBackend::Software(sw);
    }
}

/// Splits Annex-B input, converting length-prefixed samples first when no
/// start code is present. Returns the units and the Annex-B bytes they came from.
fn split_input(bytes: &[u8]) -> Result<(Vec<NalUnit>, Cow<'_, [u8]>), DecodeError> {
    let nals = split_nal_units(bytes);
    if !nals.is_empty() {
        return Ok((nals, Cow::Borrowed(bytes)));
    }
    let annexb = length_prefixed_to_annexb(bytes)
        .map_err(|_| DecodeError::MalformedInput("no start code found".to_string()))?;
    let nals = split_nal_units(&annexb);
    if nals.is_empty() {
        return Err(DecodeError::MalformedInput("no NAL units found".to_string()));
    }
    Ok((nals, Cow::Owned(annexb)))
}

fn strip_start_code(mut nal: Vec<u8>) -> Vec<u8> {
    let prefix = if nal.starts_with(&[0, 0, 0, 1]) {
        4
    } else if nal.starts_with(&[0, 0, 1]) {
        3
    } else {
        0
    };
    nal.drain(..prefix);
    nal
}

fn log_profile(params: &ParameterSet) {
    match SpsInfo::parse(&params.sps) {
        Some(info) if info.profile.is_baseline() => warn!(
            target: "mirror_decode::engine",
            "SPS profile {} (profile_idc={}, level {:.1}); hardware session creation may fail",
            info.profile,
            info.profile_idc,
            info.level()
        ),
        Some(info) => info!(
            target: "mirror_decode::engine",
            "SPS profile {} (profile_idc={}, level {:.1})",
            info.profile,
            info.profile_idc,
            info.level()
        ),
        None => warn!(
            target: "mirror_decode::engine",
            "SPS too short to read profile ({} bytes)",
            params.sps.len()
        ),
    }
}
