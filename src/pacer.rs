use std::time::{Duration, Instant};

use crate::{DecodedFrame, PipelineConfig, Timestamp90k};

/// Slack applied to the target interval so frames arriving with ordinary
/// jitter are not held back.
const INTERVAL_TOLERANCE: f64 = 0.9;

#[derive(Debug)]
pub enum PaceDecision {
    Deliver(DecodedFrame),
    /// Kept as the pending frame; counted as dropped.
    Held,
    /// Not newer than what was already delivered or pending; discarded.
    Stale,
}

/// Throttles delivery to a target cadence while keeping the most recent
/// undelivered frame so the display never sticks on an old image.
#[derive(Debug)]
pub struct FramePacer {
    high_interval: Duration,
    low_interval: Duration,
    high_band_fps: f64,
    low_band_fps: f64,
    target_interval: Duration,
    max_consecutive_drops: u32,
    last_delivery: Option<Instant>,
    last_pts: Option<Timestamp90k>,
    pending: Option<DecodedFrame>,
    consecutive_drops: u32,
    delivered: u64,
    dropped: u64,
}

impl FramePacer {
    pub fn new(config: &PipelineConfig) -> Self {
        let high_interval = interval_for_fps(config.target_fps);
        Self {
            high_interval,
            low_interval: interval_for_fps(config.fallback_fps),
            high_band_fps: config.high_band_fps,
            low_band_fps: config.low_band_fps,
            target_interval: high_interval,
            max_consecutive_drops: config.max_consecutive_drops.max(1),
            last_delivery: None,
            last_pts: None,
            pending: None,
            consecutive_drops: 0,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    pub fn min_interval(&self) -> Duration {
        self.target_interval.mul_f64(INTERVAL_TOLERANCE)
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn offer(&mut self, frame: DecodedFrame, now: Instant) -> PaceDecision {
        let newest_seen = self
            .pending
            .as_ref()
            .map(|p| p.pts_90k)
            .max(self.last_pts);
        if newest_seen.is_some_and(|pts| frame.pts_90k <= pts) {
            self.dropped += 1;
            return PaceDecision::Stale;
        }

        let due = self
            .last_delivery
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval());
        if due || self.consecutive_drops >= self.max_consecutive_drops {
            self.pending = None;
            return PaceDecision::Deliver(self.mark_delivered(frame, now));
        }

        self.pending = Some(frame);
        self.consecutive_drops += 1;
        self.dropped += 1;
        PaceDecision::Held
    }

    /// Releases the pending frame once the interval has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<DecodedFrame> {
        let due = self
            .last_delivery
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_interval());
        if !due {
            return None;
        }
        let frame = self.pending.take()?;
        Some(self.mark_delivered(frame, now))
    }

    /// Releases the pending frame regardless of timing.
    pub fn flush(&mut self, now: Instant) -> Option<DecodedFrame> {
        let frame = self.pending.take()?;
        Some(self.mark_delivered(frame, now))
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.consecutive_drops = 0;
    }

    /// Adapts the target cadence to observed decode throughput.
    pub fn observe_fps(&mut self, fps: f64) {
        let next = if fps >= self.high_band_fps {
            self.high_interval
        } else if fps < self.low_band_fps {
            self.low_interval
        } else {
            self.target_interval
        };
        if next != self.target_interval {
            log::debug!(
                target: "mirror_decode::pacer",
                "pacing target {:.1}ms -> {:.1}ms (observed {fps:.1} fps)",
                self.target_interval.as_secs_f64() * 1_000.0,
                next.as_secs_f64() * 1_000.0
            );
            self.target_interval = next;
        }
    }

    fn mark_delivered(&mut self, frame: DecodedFrame, now: Instant) -> DecodedFrame {
        self.last_delivery = Some(now);
        self.last_pts = Some(frame.pts_90k);
        self.consecutive_drops = 0;
        self.delivered += 1;
        frame
    }
}

fn interval_for_fps(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(fps.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Dimensions, FrameSource};

    fn frame(pts: i64) -> DecodedFrame {
        DecodedFrame {
            dims: Dimensions::new(2, 2).unwrap(),
            pts_90k: Timestamp90k(pts),
            pixels: vec![0; 16],
            source: FrameSource::Software,
            capture_ms: None,
        }
    }

    fn pacer() -> FramePacer {
        FramePacer::new(&PipelineConfig::default())
    }

    #[test]
    fn first_frame_is_delivered_immediately() {
        let mut pacer = pacer();
        assert!(matches!(
            pacer.offer(frame(1), Instant::now()),
            PaceDecision::Deliver(_)
        ));
        assert_eq!(pacer.delivered(), 1);
    }

    #[test]
    fn burst_never_exceeds_drop_bound() {
        let mut pacer = pacer();
        let bound = PipelineConfig::default().max_consecutive_drops;
        let start = Instant::now();
        let mut run = 0u32;
        let mut longest_run = 0u32;
        let mut delivered = 0;
        for i in 0..200 {
            let now = start + Duration::from_micros(500 * i as u64);
            match pacer.offer(frame(i + 1), now) {
                PaceDecision::Deliver(_) => {
                    delivered += 1;
                    run = 0;
                }
                PaceDecision::Held => {
                    run += 1;
                    longest_run = longest_run.max(run);
                }
                PaceDecision::Stale => panic!("monotonic input must not be stale"),
            }
        }
        assert!(longest_run <= bound);
        assert!(delivered >= 200 / (bound as usize + 1));
    }

    #[test]
    fn flush_delivers_latest_pending_exactly_once() {
        let mut pacer = pacer();
        let start = Instant::now();
        assert!(matches!(pacer.offer(frame(1), start), PaceDecision::Deliver(_)));
        assert!(matches!(
            pacer.offer(frame(2), start + Duration::from_millis(1)),
            PaceDecision::Held
        ));
        assert!(matches!(
            pacer.offer(frame(3), start + Duration::from_millis(2)),
            PaceDecision::Held
        ));
        let flushed = pacer.flush(start + Duration::from_millis(3)).unwrap();
        assert_eq!(flushed.pts_90k, Timestamp90k(3));
        assert!(pacer.flush(start + Duration::from_millis(4)).is_none());
    }

    #[test]
    fn poll_releases_pending_after_interval() {
        let mut pacer = pacer();
        let start = Instant::now();
        let _ = pacer.offer(frame(1), start);
        let _ = pacer.offer(frame(2), start + Duration::from_millis(1));
        assert!(pacer.poll(start + Duration::from_millis(2)).is_none());
        let released = pacer.poll(start + Duration::from_millis(40)).unwrap();
        assert_eq!(released.pts_90k, Timestamp90k(2));
        assert!(!pacer.has_pending());
    }

    #[test]
    fn older_frames_are_stale() {
        let mut pacer = pacer();
        let start = Instant::now();
        let _ = pacer.offer(frame(10), start);
        assert!(matches!(
            pacer.offer(frame(5), start + Duration::from_millis(100)),
            PaceDecision::Stale
        ));
        let _ = pacer.offer(frame(20), start + Duration::from_millis(101));
        assert!(matches!(
            pacer.offer(frame(15), start + Duration::from_millis(102)),
            PaceDecision::Stale
        ));
    }

    #[test]
    fn target_adapts_to_throughput_bands() {
        let mut pacer = pacer();
        let high = pacer.target_interval();
        pacer.observe_fps(20.0);
        assert!(pacer.target_interval() > high);
        pacer.observe_fps(48.0);
        assert!(pacer.target_interval() > high);
        pacer.observe_fps(59.0);
        assert_eq!(pacer.target_interval(), high);
    }
}
