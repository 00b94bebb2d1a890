use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use std::{fmt, fmt::Display};

/// Counters accumulated over one reporting window.
#[derive(Debug, Clone)]
pub struct PerformanceWindow {
    pub frame_count: u64,
    pub dropped_count: u64,
    pub input_count: u64,
    pub total_bytes: u64,
    /// Synchronous decode calls, or submission to completion for hardware.
    pub decode_time_sum: Duration,
    pub decode_samples: u64,
    pub latency_sum_ms: f64,
    pub latency_samples: u64,
    pub window_start: Instant,
}

impl PerformanceWindow {
    fn starting_at(now: Instant) -> Self {
        Self {
            frame_count: 0,
            dropped_count: 0,
            input_count: 0,
            total_bytes: 0,
            decode_time_sum: Duration::ZERO,
            decode_samples: 0,
            latency_sum_ms: 0.0,
            latency_samples: 0,
            window_start: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceReport {
    pub fps: f64,
    pub kbps: f64,
    pub avg_decode_ms: f64,
    pub avg_latency_ms: Option<f64>,
    pub drop_percent: f64,
    pub window: Duration,
}

impl Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fps={:.1}, kbps={:.0}, decode_ms={:.2}, latency_ms=",
            self.fps, self.kbps, self.avg_decode_ms
        )?;
        match self.avg_latency_ms {
            Some(latency) => write!(f, "{latency:.1}")?,
            None => f.write_str("n/a")?,
        }
        write!(
            f,
            ", drop={:.1}%, window_ms={}",
            self.drop_percent,
            self.window.as_millis()
        )
    }
}

/// Rolling per-interval telemetry. Observes only; never gates decoding.
#[derive(Debug)]
pub struct PerformanceMonitor {
    interval: Duration,
    window: PerformanceWindow,
    last_report: Option<PerformanceReport>,
}

impl PerformanceMonitor {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, now: Instant) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            window: PerformanceWindow::starting_at(now),
            last_report: None,
        }
    }

    pub fn window(&self) -> &PerformanceWindow {
        &self.window
    }

    pub fn last_report(&self) -> Option<PerformanceReport> {
        self.last_report
    }

    pub fn record_input(&mut self, bytes: usize) {
        self.window.input_count += 1;
        self.window.total_bytes = self.window.total_bytes.saturating_add(bytes as u64);
    }

    pub fn record_decode_time(&mut self, elapsed: Duration) {
        self.window.decode_time_sum += elapsed;
        self.window.decode_samples += 1;
    }

    pub fn record_decoded(&mut self) {
        self.window.frame_count += 1;
    }

    pub fn record_dropped(&mut self) {
        self.window.dropped_count += 1;
    }

    /// Records `now - capture` for one delivered frame, both in epoch ms.
    pub fn record_latency(&mut self, capture_ms: i64, now_ms: i64) {
        let latency = now_ms.saturating_sub(capture_ms);
        if latency < 0 {
            return;
        }
        self.window.latency_sum_ms += latency as f64;
        self.window.latency_samples += 1;
    }

    pub fn report_at(&self, now: Instant) -> PerformanceReport {
        let w = &self.window;
        let elapsed = now.saturating_duration_since(w.window_start);
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let avg_decode_ms = if w.decode_samples == 0 {
            0.0
        } else {
            w.decode_time_sum.as_secs_f64() * 1_000.0 / w.decode_samples as f64
        };
        let avg_latency_ms =
            (w.latency_samples > 0).then(|| w.latency_sum_ms / w.latency_samples as f64);
        let drop_percent = if w.frame_count == 0 {
            0.0
        } else {
            w.dropped_count as f64 * 100.0 / w.frame_count as f64
        };
        PerformanceReport {
            fps: w.frame_count as f64 / secs,
            kbps: w.total_bytes as f64 * 8.0 / 1_000.0 / secs,
            avg_decode_ms,
            avg_latency_ms,
            drop_percent,
            window: elapsed,
        }
    }

    /// Closes the window when the interval has elapsed and starts a new one.
    pub fn roll_if_due(&mut self, now: Instant) -> Option<PerformanceReport> {
        if now.saturating_duration_since(self.window.window_start) < self.interval {
            return None;
        }
        let report = self.report_at(now);
        self.window = PerformanceWindow::starting_at(now);
        self.last_report = Some(report);
        Some(report)
    }
}

pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
