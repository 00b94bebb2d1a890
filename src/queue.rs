use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::DecodeError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub peak_depth: usize,
}

#[derive(Debug, Default)]
struct QueueCounters {
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
}

impl QueueCounters {
    fn on_send(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
    }

    fn on_recv(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| d.checked_sub(1));
    }

    fn snapshot(&self) -> QueueStats {
        QueueStats {
            depth: self.depth.load(Ordering::Relaxed),
            peak_depth: self.peak_depth.load(Ordering::Relaxed),
        }
    }
}

/// Producer side of the ingest queue. Sending never blocks; backpressure is
/// the pacer's job, not the producer's.
#[derive(Debug)]
pub(crate) struct IngestTx<T> {
    inner: Sender<T>,
    counters: Arc<QueueCounters>,
}

impl<T> Clone for IngestTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            counters: Arc::clone(&self.counters),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IngestRx<T> {
    inner: Receiver<T>,
    counters: Arc<QueueCounters>,
}

impl<T> IngestTx<T> {
    pub fn send(&self, value: T) -> Result<(), DecodeError> {
        self.counters.on_send();
        self.inner.send(value).map_err(|_| {
            self.counters.on_recv();
            DecodeError::Disconnected
        })
    }

    pub fn stats(&self) -> QueueStats {
        self.counters.snapshot()
    }
}

impl<T> IngestRx<T> {
    pub fn recv(&self) -> Option<T> {
        let item = self.inner.recv().ok()?;
        self.counters.on_recv();
        Some(item)
    }
}

pub(crate) fn ingest_queue<T>() -> (IngestTx<T>, IngestRx<T>) {
    let (tx, rx) = mpsc::channel();
    let counters = Arc::new(QueueCounters::default());
    (
        IngestTx {
            inner: tx,
            counters: Arc::clone(&counters),
        },
        IngestRx {
            inner: rx,
            counters,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_track_depth_and_peak() {
        let (tx, rx) = ingest_queue::<usize>();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();
        assert_eq!(
            tx.stats(),
            QueueStats {
                depth: 3,
                peak_depth: 3
            }
        );

        assert_eq!(rx.recv(), Some(1));
        assert_eq!(rx.recv(), Some(2));
        let stats = tx.stats();
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.peak_depth, 3);
    }

    #[test]
    fn send_after_receiver_drop_is_disconnected() {
        let (tx, rx) = ingest_queue::<usize>();
        drop(rx);
        assert_eq!(tx.send(1), Err(DecodeError::Disconnected));
        assert_eq!(tx.stats().depth, 0);
    }
}
