use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fmt, fmt::Display};

use crate::monitor::PerformanceReport;
use crate::queue::QueueStats;
use crate::{PipelineState, SessionState};

#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub generation: u64,
    pub backend: Option<&'static str>,
    /// Session state reported by the hardware decoder while it is active.
    pub hardware_session: Option<SessionState>,
    pub hardware_abandoned: bool,
    pub hardware_configure_attempts: u64,
    pub queue: QueueStats,
    pub decoded_frames: u64,
    pub delivered_frames: u64,
    pub dropped_frames: u64,
    pub last_report: Option<PerformanceReport>,
}

impl Display for PipelineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PipelineStats(state={}, generation={}, backend={}, hw_session={}, hardware_abandoned={}, hw_attempts={}, queue_depth={}, queue_peak={}, decoded={}, delivered={}, dropped={})",
            self.state,
            self.generation,
            self.backend.unwrap_or("none"),
            self.hardware_session
                .map_or_else(|| "none".to_string(), |session| session.to_string()),
            self.hardware_abandoned,
            self.hardware_configure_attempts,
            self.queue.depth,
            self.queue.peak_depth,
            self.decoded_frames,
            self.delivered_frames,
            self.dropped_frames
        )
    }
}

#[derive(Debug)]
struct StatusInner {
    state: PipelineState,
    backend: Option<&'static str>,
    hardware_session: Option<SessionState>,
    hardware_abandoned: bool,
    hardware_configure_attempts: u64,
    decoded_frames: u64,
    delivered_frames: u64,
    dropped_frames: u64,
    last_report: Option<PerformanceReport>,
}

/// State shared between the ingest handle, the decode worker and the
/// delivery worker. The session generation is read on every delivered frame,
/// so it lives outside the mutex.
#[derive(Debug)]
pub(crate) struct PipelineStatus {
    generation: AtomicU64,
    inner: Mutex<StatusInner>,
}

impl PipelineStatus {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(0),
            inner: Mutex::new(StatusInner {
                state: PipelineState::Idle,
                backend: None,
                hardware_session: None,
                hardware_abandoned: false,
                hardware_configure_attempts: 0,
                decoded_frames: 0,
                delivered_frames: 0,
                dropped_frames: 0,
                last_report: None,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn set_active(&self, state: PipelineState, backend: Option<&'static str>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = state;
            inner.backend = backend;
        }
    }

    pub fn state(&self) -> PipelineState {
        self.inner
            .lock()
            .map(|inner| inner.state)
            .unwrap_or(PipelineState::Idle)
    }

    pub fn note_hardware_attempt(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.hardware_configure_attempts += 1;
            inner.state = PipelineState::ConfiguringHardware;
        }
    }

    pub fn set_hardware_session(&self, session: Option<SessionState>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.hardware_session = session;
        }
    }

    pub fn hardware_session(&self) -> Option<SessionState> {
        self.inner.lock().ok().and_then(|inner| inner.hardware_session)
    }

    pub fn set_hardware_abandoned(&self, abandoned: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.hardware_abandoned = abandoned;
        }
    }

    pub fn record_delivery_counters(&self, decoded: u64, delivered: u64, dropped: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.decoded_frames = decoded;
            inner.delivered_frames = delivered;
            inner.dropped_frames = dropped;
        }
    }

    pub fn set_last_report(&self, report: PerformanceReport) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_report = Some(report);
        }
    }

    pub fn snapshot(&self, queue: QueueStats) -> PipelineStats {
        let generation = self.generation();
        match self.inner.lock() {
            Ok(inner) => PipelineStats {
                state: inner.state,
                generation,
                backend: inner.backend,
                hardware_session: inner.hardware_session,
                hardware_abandoned: inner.hardware_abandoned,
                hardware_configure_attempts: inner.hardware_configure_attempts,
                queue,
                decoded_frames: inner.decoded_frames,
                delivered_frames: inner.delivered_frames,
                dropped_frames: inner.dropped_frames,
                last_report: inner.last_report,
            },
            Err(_) => PipelineStats {
                state: PipelineState::Idle,
                generation,
                backend: None,
                hardware_session: None,
                hardware_abandoned: false,
                hardware_configure_attempts: 0,
                queue,
                decoded_frames: 0,
                delivered_frames: 0,
                dropped_frames: 0,
                last_report: None,
            },
        }
    }
}
