use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::backend::{BackendFactory, PlatformBackends};
use crate::delivery::{DeliveryEvent, DeliveryWorker, FrameCallback, delivery_channel};
use crate::engine::DecodeEngine;
use crate::monitor::PerformanceMonitor;
use crate::queue::{IngestRx, IngestTx, ingest_queue};
use crate::status::{PipelineStats, PipelineStatus};
use crate::{DecodeError, DecodedFrame, FrameUnit, PipelineConfig};

enum IngestTask {
    Decode(FrameUnit),
    SetParameterSets { sps: Vec<u8>, pps: Vec<u8> },
    Reset,
    Flush,
    Sync(Sender<()>),
    Shutdown,
}

/// One mirror session: a decode worker fed by a non-blocking ingest queue and
/// a delivery worker that paces frames into the callback.
///
/// Every control call only enqueues; failures inside the pipeline are logged
/// and degrade to dropped frames or software fallback. The one error a caller
/// can see is [`DecodeError::Disconnected`] after the workers have stopped.
pub struct MirrorPipeline {
    ingest: IngestTx<IngestTask>,
    status: Arc<PipelineStatus>,
    decode_worker: Option<JoinHandle<()>>,
    delivery_worker: Option<JoinHandle<()>>,
}

impl MirrorPipeline {
    /// Pipeline on the platform backends.
    pub fn new<F>(config: PipelineConfig, on_frame: F) -> Self
    where
        F: FnMut(DecodedFrame) + Send + 'static,
    {
        Self::with_factory(config, Arc::new(PlatformBackends), on_frame)
    }

    pub fn with_factory<F>(
        config: PipelineConfig,
        factory: Arc<dyn BackendFactory>,
        on_frame: F,
    ) -> Self
    where
        F: FnMut(DecodedFrame) + Send + 'static,
    {
        debug!(target: "mirror_decode::pipeline", "starting pipeline: {config}");
        let status = Arc::new(PipelineStatus::new());
        let monitor = Arc::new(Mutex::new(PerformanceMonitor::new(config.report_interval)));
        let (delivery_tx, delivery_rx) = delivery_channel();
        let (ingest, ingest_rx) = ingest_queue();

        let on_frame: FrameCallback = Box::new(on_frame);
        let delivery = DeliveryWorker::new(
            &config,
            delivery_rx,
            Arc::clone(&monitor),
            Arc::clone(&status),
            on_frame,
        );
        let delivery_worker = thread::spawn(move || delivery.run());

        let engine = DecodeEngine::new(
            config,
            factory,
            delivery_tx.clone(),
            monitor,
            Arc::clone(&status),
        );
        let decode_worker =
            thread::spawn(move || run_decode_worker(engine, ingest_rx, delivery_tx));

        Self {
            ingest,
            status,
            decode_worker: Some(decode_worker),
            delivery_worker: Some(delivery_worker),
        }
    }

    /// Enqueues one input unit; never blocks on decode work.
    pub fn decode(&self, unit: FrameUnit) -> Result<(), DecodeError> {
        self.ingest.send(IngestTask::Decode(unit))
    }

    /// Injects SPS/PPS out of band, bypassing in-band NAL detection.
    pub fn set_parameter_sets(
        &self,
        sps: impl Into<Vec<u8>>,
        pps: impl Into<Vec<u8>>,
    ) -> Result<(), DecodeError> {
        self.ingest.send(IngestTask::SetParameterSets {
            sps: sps.into(),
            pps: pps.into(),
        })
    }

    /// Drops the active backend and negotiated parameters. Frames still in
    /// flight from the old session are discarded on arrival.
    pub fn reset(&self) -> Result<(), DecodeError> {
        self.ingest.send(IngestTask::Reset)
    }

    /// Forces delivery of the pending frame, if any, once.
    pub fn flush(&self) -> Result<(), DecodeError> {
        self.ingest.send(IngestTask::Flush)
    }

    /// Waits until everything enqueued so far has passed through both workers.
    pub fn sync(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.ingest.send(IngestTask::Sync(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    pub fn stats(&self) -> PipelineStats {
        self.status.snapshot(self.ingest.stats())
    }
}

impl Drop for MirrorPipeline {
    fn drop(&mut self) {
        let _ = self.ingest.send(IngestTask::Shutdown);
        if let Some(worker) = self.decode_worker.take() {
            let _ = worker.join();
        }
        if let Some(worker) = self.delivery_worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for MirrorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorPipeline")
            .field("state", &self.status.state())
            .field("generation", &self.status.generation())
            .finish()
    }
}

fn run_decode_worker(
    mut engine: DecodeEngine,
    rx: IngestRx<IngestTask>,
    delivery: Sender<DeliveryEvent>,
) {
    while let Some(task) = rx.recv() {
        match task {
            IngestTask::Decode(unit) => engine.decode(unit),
            IngestTask::SetParameterSets { sps, pps } => engine.set_parameter_sets(sps, pps),
            IngestTask::Reset => engine.reset(),
            IngestTask::Flush => engine.flush(),
            IngestTask::Sync(ack) => {
                let _ = delivery.send(DeliveryEvent::Sync(ack));
            }
            IngestTask::Shutdown => break,
        }
    }
    engine.shutdown();
    let _ = delivery.send(DeliveryEvent::Shutdown);
    debug!(target: "mirror_decode::pipeline", "decode worker stopped");
}
