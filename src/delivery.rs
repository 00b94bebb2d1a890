use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace};

use crate::monitor::{PerformanceMonitor, epoch_millis};
use crate::pacer::{FramePacer, PaceDecision};
use crate::status::PipelineStatus;
use crate::{DecodeError, DecodedFrame, PipelineConfig, Timestamp90k};

/// Upper bound on remembered hardware submissions awaiting their frame.
const MAX_TRACKED_SUBMISSIONS: usize = 256;

pub(crate) enum DeliveryEvent {
    Frame { frame: DecodedFrame, generation: u64 },
    Submitted {
        pts_90k: Timestamp90k,
        submitted_at: Instant,
        capture_ms: Option<i64>,
    },
    Flush,
    Reset,
    Sync(Sender<()>),
    Shutdown,
}

/// Hands decoded frames to the delivery context, tagged with the session
/// generation that produced them. Cloneable and usable from any thread.
#[derive(Clone)]
pub struct FrameSink {
    tx: Sender<DeliveryEvent>,
    generation: u64,
}

impl FrameSink {
    pub(crate) fn new(tx: Sender<DeliveryEvent>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn deliver(&self, frame: DecodedFrame) -> Result<(), DecodeError> {
        self.tx
            .send(DeliveryEvent::Frame {
                frame,
                generation: self.generation,
            })
            .map_err(|_| DecodeError::Disconnected)
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("generation", &self.generation)
            .finish()
    }
}

pub type FrameCallback = Box<dyn FnMut(DecodedFrame) + Send>;

#[derive(Debug, Clone, Copy)]
struct Submission {
    submitted_at: Instant,
    capture_ms: Option<i64>,
}

pub(crate) fn delivery_channel() -> (Sender<DeliveryEvent>, Receiver<DeliveryEvent>) {
    mpsc::channel()
}

/// Single consumer of decoded frames: filters stale generations, paces, and
/// invokes the UI callback. Every callback invocation happens on this thread.
pub(crate) struct DeliveryWorker {
    rx: Receiver<DeliveryEvent>,
    pacer: FramePacer,
    monitor: Arc<Mutex<PerformanceMonitor>>,
    status: Arc<PipelineStatus>,
    on_frame: FrameCallback,
    submissions: BTreeMap<Timestamp90k, Submission>,
    report_metrics: bool,
    decoded: u64,
}

impl DeliveryWorker {
    pub fn new(
        config: &PipelineConfig,
        rx: Receiver<DeliveryEvent>,
        monitor: Arc<Mutex<PerformanceMonitor>>,
        status: Arc<PipelineStatus>,
        on_frame: FrameCallback,
    ) -> Self {
        Self {
            rx,
            pacer: FramePacer::new(config),
            monitor,
            status,
            on_frame,
            submissions: BTreeMap::new(),
            report_metrics: config.report_metrics,
            decoded: 0,
        }
    }

    pub fn run(mut self) {
        loop {
            let wait = if self.pacer.has_pending() {
                self.pacer.min_interval()
            } else {
                self.pacer.target_interval().max(Duration::from_millis(50))
            };
            match self.rx.recv_timeout(wait) {
                Ok(DeliveryEvent::Frame { frame, generation }) => {
                    self.on_decoded(frame, generation);
                }
                Ok(DeliveryEvent::Submitted {
                    pts_90k,
                    submitted_at,
                    capture_ms,
                }) => {
                    self.submissions.insert(
                        pts_90k,
                        Submission {
                            submitted_at,
                            capture_ms,
                        },
                    );
                    while self.submissions.len() > MAX_TRACKED_SUBMISSIONS {
                        self.submissions.pop_first();
                    }
                }
                Ok(DeliveryEvent::Flush) => {
                    if let Some(frame) = self.pacer.flush(Instant::now()) {
                        self.emit(frame);
                    }
                }
                Ok(DeliveryEvent::Reset) => {
                    self.pacer.clear();
                    self.submissions.clear();
                }
                Ok(DeliveryEvent::Sync(ack)) => {
                    self.publish_counters();
                    let _ = ack.send(());
                }
                Ok(DeliveryEvent::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(frame) = self.pacer.poll(Instant::now()) {
                        self.emit(frame);
                    }
                }
            }
            self.roll_window(Instant::now());
        }
        self.publish_counters();
        debug!(target: "mirror_decode::delivery", "delivery worker stopped");
    }

    fn on_decoded(&mut self, mut frame: DecodedFrame, generation: u64) {
        let current = self.status.generation();
        if generation != current {
            debug!(
                target: "mirror_decode::delivery",
                "discarding {} frame {} from stale session generation {generation} (current {current})",
                frame.source,
                frame.pts_90k
            );
            return;
        }
        self.decoded += 1;
        let submission = self.submissions.get(&frame.pts_90k).copied();
        // Anything at or below this pts can no longer be delivered.
        self.submissions = self
            .submissions
            .split_off(&Timestamp90k(frame.pts_90k.0 + 1));
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record_decoded();
            if let Some(submission) = submission {
                monitor.record_decode_time(submission.submitted_at.elapsed());
            }
        }
        if let Some(submission) = submission {
            frame.capture_ms = frame.capture_ms.or(submission.capture_ms);
        }

        match self.pacer.offer(frame, Instant::now()) {
            PaceDecision::Deliver(frame) => self.emit(frame),
            PaceDecision::Held => self.note_dropped(),
            PaceDecision::Stale => {
                trace!(target: "mirror_decode::delivery", "dropping out-of-order frame");
                self.note_dropped();
            }
        }
    }

    fn note_dropped(&self) {
        if let Ok(mut monitor) = self.monitor.lock() {
            monitor.record_dropped();
        }
    }

    fn emit(&mut self, frame: DecodedFrame) {
        if let Some(capture_ms) = frame.capture_ms {
            if let Ok(mut monitor) = self.monitor.lock() {
                monitor.record_latency(capture_ms, epoch_millis());
            }
        }
        (self.on_frame)(frame);
    }

    fn roll_window(&mut self, now: Instant) {
        let report = match self.monitor.lock() {
            Ok(mut monitor) => monitor.roll_if_due(now),
            Err(_) => None,
        };
        let Some(report) = report else {
            return;
        };
        if self.report_metrics {
            info!(target: "mirror_decode::perf", "{report}");
        } else {
            debug!(target: "mirror_decode::perf", "{report}");
        }
        self.pacer.observe_fps(report.fps);
        self.status.set_last_report(report);
        self.publish_counters();
    }

    fn publish_counters(&self) {
        self.status.record_delivery_counters(
            self.decoded,
            self.pacer.delivered(),
            self.pacer.dropped(),
        );
    }
}
