use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb};
use mirror_decode::{
    BackendFactory, ConfigError, DecodeError, DecodedFrame, Dimensions, FrameSink, FrameSource,
    FrameUnit, HardwareDecoder, HardwarePreference, MirrorPipeline, NalUnit, ParameterSet,
    PipelineConfig, PipelineState, SessionState, SoftwareDecoder, Timestamp90k, split_nal_units,
};
use rstest::rstest;

const SPS: [u8; 4] = [0x67, 0x64, 0x00, 0x1F];
const SPS_BASELINE: [u8; 4] = [0x67, 0x42, 0xC0, 0x1E];
const PPS: [u8; 2] = [0x68, 0xCE];
const IDR: [u8; 3] = [0x65, 0x88, 0x84];
const NON_IDR: [u8; 3] = [0x41, 0x9A, 0x02];
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Shared {
    configure_calls: usize,
    decode_calls: usize,
    /// Every sink handed to a hardware session, including stale ones.
    sinks: Vec<FrameSink>,
}

struct MockHardware {
    shared: Arc<Mutex<Shared>>,
    reject_sps: Option<Vec<u8>>,
    reverse_pairs: bool,
    /// 1-based index of the slice submission that fails.
    fail_decode_call: Option<usize>,
    sink: Option<FrameSink>,
    held: Option<DecodedFrame>,
    state: SessionState,
}

impl HardwareDecoder for MockHardware {
    fn name(&self) -> &'static str {
        "mock-hw"
    }

    fn configure(&mut self, params: &ParameterSet, sink: FrameSink) -> Result<(), ConfigError> {
        let mut shared = self.shared.lock().unwrap();
        shared.configure_calls += 1;
        if self.reject_sps.as_deref() == Some(params.sps.as_slice()) {
            self.state = SessionState::Failed;
            return Err(ConfigError::FormatDescription {
                context: "mock".to_string(),
                status: -12712,
            });
        }
        shared.sinks.push(sink.clone());
        self.sink = Some(sink);
        self.state = SessionState::Configured;
        Ok(())
    }

    fn decode(&mut self, _nal: &NalUnit, pts_90k: Timestamp90k) -> Result<(), DecodeError> {
        let call = {
            let mut shared = self.shared.lock().unwrap();
            shared.decode_calls += 1;
            shared.decode_calls
        };
        if self.fail_decode_call == Some(call) {
            return Err(DecodeError::Backend {
                backend: "mock-hw",
                message: "bad slice".to_string(),
            });
        }
        let Some(sink) = self.sink.clone() else {
            return Err(DecodeError::Backend {
                backend: "mock-hw",
                message: "not configured".to_string(),
            });
        };
        self.state = SessionState::Active;
        let frame = frame(pts_90k, FrameSource::Hardware);
        if !self.reverse_pairs {
            return sink.deliver(frame);
        }
        // Completes every second submission first, like a reordering decoder.
        match self.held.take() {
            Some(earlier) => {
                sink.deliver(frame)?;
                sink.deliver(earlier)
            }
            None => {
                self.held = Some(frame);
                Ok(())
            }
        }
    }

    fn invalidate(&mut self) {
        self.sink = None;
        self.held = None;
        self.state = SessionState::Uninitialized;
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

struct MockSoftware;

impl SoftwareDecoder for MockSoftware {
    fn name(&self) -> &'static str {
        "mock-sw"
    }

    fn decode(
        &mut self,
        annexb: &[u8],
        pts_90k: Timestamp90k,
    ) -> Result<Vec<DecodedFrame>, DecodeError> {
        let slices = split_nal_units(annexb)
            .iter()
            .filter(|nal| nal.nal_type.is_slice())
            .count();
        Ok((0..slices.min(1))
            .map(|_| frame(pts_90k, FrameSource::Software))
            .collect())
    }

    fn reset(&mut self) {}
}

#[derive(Default)]
struct MockFactory {
    shared: Arc<Mutex<Shared>>,
    reject_sps: Option<Vec<u8>>,
    reverse_pairs: bool,
    fail_decode_call: Option<usize>,
}

impl BackendFactory for MockFactory {
    fn hardware(&self) -> Box<dyn HardwareDecoder> {
        Box::new(MockHardware {
            shared: Arc::clone(&self.shared),
            reject_sps: self.reject_sps.clone(),
            reverse_pairs: self.reverse_pairs,
            fail_decode_call: self.fail_decode_call,
            sink: None,
            held: None,
            state: SessionState::Uninitialized,
        })
    }

    fn software(&self) -> Result<Box<dyn SoftwareDecoder>, DecodeError> {
        Ok(Box::new(MockSoftware))
    }
}

fn frame(pts: Timestamp90k, source: FrameSource) -> DecodedFrame {
    DecodedFrame {
        dims: Dimensions::new(4, 2).unwrap(),
        pts_90k: pts,
        pixels: vec![0; 32],
        source,
        capture_ms: None,
    }
}

fn annexb(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn relaxed_pacing() -> PipelineConfig {
    PipelineConfig {
        target_fps: 240,
        fallback_fps: 240,
        ..PipelineConfig::default()
    }
}

type Delivered = Arc<Mutex<Vec<DecodedFrame>>>;

fn start(config: PipelineConfig, factory: MockFactory) -> (MirrorPipeline, Delivered) {
    let delivered: Delivered = Arc::default();
    let sink = Arc::clone(&delivered);
    let pipeline = MirrorPipeline::with_factory(config, Arc::new(factory), move |frame| {
        sink.lock().unwrap().push(frame);
    });
    (pipeline, delivered)
}

/// Feeds one unit and leaves the pacer enough time to deliver it.
fn feed_spaced(pipeline: &MirrorPipeline, nals: &[&[u8]]) {
    pipeline.decode(FrameUnit::new(annexb(nals))).unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));
    thread::sleep(Duration::from_millis(15));
}

fn sources(delivered: &Delivered) -> Vec<FrameSource> {
    delivered.lock().unwrap().iter().map(|f| f.source).collect()
}

#[rstest]
#[case::hardware(None, HardwarePreference::Auto, FrameSource::Hardware, PipelineState::ActiveHardware, 1)]
#[case::rejected(Some(SPS.to_vec()), HardwarePreference::Auto, FrameSource::Software, PipelineState::ActiveSoftware, 1)]
#[case::disabled(None, HardwarePreference::Disabled, FrameSource::Software, PipelineState::ActiveSoftware, 0)]
fn backend_selection(
    #[case] reject_sps: Option<Vec<u8>>,
    #[case] hardware: HardwarePreference,
    #[case] expected_source: FrameSource,
    #[case] expected_state: PipelineState,
    #[case] expected_attempts: usize,
) {
    let factory = MockFactory {
        reject_sps,
        ..MockFactory::default()
    };
    let shared = Arc::clone(&factory.shared);
    let config = PipelineConfig {
        hardware,
        ..relaxed_pacing()
    };
    let (pipeline, delivered) = start(config, factory);

    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    feed_spaced(&pipeline, &[&NON_IDR]);
    feed_spaced(&pipeline, &[&NON_IDR]);
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    assert_eq!(sources(&delivered), vec![expected_source; 3]);
    assert_eq!(shared.lock().unwrap().configure_calls, expected_attempts);
    let stats = pipeline.stats();
    assert_eq!(stats.state, expected_state);
    assert_eq!(stats.hardware_configure_attempts, expected_attempts as u64);
    assert_eq!(stats.decoded_frames, 3);
}

#[test]
fn fallback_holds_until_reset() {
    let factory = MockFactory {
        reject_sps: Some(SPS_BASELINE.to_vec()),
        ..MockFactory::default()
    };
    let shared = Arc::clone(&factory.shared);
    let (pipeline, delivered) = start(relaxed_pacing(), factory);

    feed_spaced(&pipeline, &[&SPS_BASELINE, &PPS, &IDR]);
    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    let stats = pipeline.stats();
    assert!(stats.hardware_abandoned);
    assert_eq!(stats.state, PipelineState::ActiveSoftware);
    assert_eq!(shared.lock().unwrap().configure_calls, 1);

    pipeline.reset().unwrap();
    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    let stats = pipeline.stats();
    assert!(!stats.hardware_abandoned);
    assert_eq!(stats.state, PipelineState::ActiveHardware);
    assert_eq!(stats.hardware_configure_attempts, 2);
    assert_eq!(
        sources(&delivered),
        vec![FrameSource::Software, FrameSource::Software, FrameSource::Hardware]
    );
}

#[test]
fn frames_from_a_reset_session_are_discarded() {
    let factory = MockFactory::default();
    let shared = Arc::clone(&factory.shared);
    let (pipeline, delivered) = start(relaxed_pacing(), factory);

    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    let stale = shared.lock().unwrap().sinks[0].clone();
    pipeline.reset().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    stale
        .deliver(frame(Timestamp90k(1_000_000), FrameSource::Hardware))
        .unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].pts_90k < Timestamp90k(1_000_000));
}

#[test]
fn out_of_order_completions_never_go_backwards() {
    let factory = MockFactory {
        reverse_pairs: true,
        ..MockFactory::default()
    };
    let (pipeline, delivered) = start(relaxed_pacing(), factory);

    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    for _ in 0..5 {
        feed_spaced(&pipeline, &[&NON_IDR]);
    }
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    let pts = delivered
        .lock()
        .unwrap()
        .iter()
        .map(|f| f.pts_90k)
        .collect::<Vec<_>>();
    assert_eq!(pts.len(), 3);
    assert!(pts.windows(2).all(|w| w[0] < w[1]));
    assert!(pipeline.stats().dropped_frames >= 3);
}

#[test]
fn hardware_frame_error_drops_only_that_frame() {
    let factory = MockFactory {
        fail_decode_call: Some(2),
        ..MockFactory::default()
    };
    let shared = Arc::clone(&factory.shared);
    let (pipeline, delivered) = start(relaxed_pacing(), factory);

    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    feed_spaced(&pipeline, &[&NON_IDR]);
    feed_spaced(&pipeline, &[&NON_IDR]);
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    assert_eq!(sources(&delivered), vec![FrameSource::Hardware; 2]);
    let shared = shared.lock().unwrap();
    assert_eq!(shared.configure_calls, 1);
    assert_eq!(shared.decode_calls, 3);
    let stats = pipeline.stats();
    assert!(!stats.hardware_abandoned);
    assert_eq!(stats.state, PipelineState::ActiveHardware);
    assert_eq!(stats.hardware_session, Some(SessionState::Active));
    assert_eq!(stats.hardware_configure_attempts, 1);
}

#[test]
fn newest_picture_of_a_multi_picture_buffer_reaches_the_callback() {
    let (pipeline, delivered) = start(relaxed_pacing(), MockFactory::default());

    pipeline
        .decode(FrameUnit::new(annexb(&[&SPS, &PPS, &IDR, &NON_IDR, &NON_IDR])))
        .unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));
    thread::sleep(Duration::from_millis(20));
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    let step = 90_000 / 240;
    let pts = delivered
        .lock()
        .unwrap()
        .iter()
        .map(|f| f.pts_90k.0)
        .collect::<Vec<_>>();
    assert_eq!(pts.first().copied(), Some(0));
    assert_eq!(pts.last().copied(), Some(2 * step));
    assert!(pts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(pipeline.stats().decoded_frames, 3);
}

#[test]
fn burst_is_bounded_and_flush_delivers_latest() {
    let config = PipelineConfig {
        target_fps: 1,
        fallback_fps: 1,
        max_consecutive_drops: 3,
        ..PipelineConfig::default()
    };
    let (pipeline, delivered) = start(config, MockFactory::default());

    pipeline.decode(FrameUnit::new(annexb(&[&SPS, &PPS, &IDR]))).unwrap();
    for _ in 0..10 {
        pipeline.decode(FrameUnit::new(annexb(&[&NON_IDR]))).unwrap();
    }
    pipeline.flush().unwrap();
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    let pts = delivered
        .lock()
        .unwrap()
        .iter()
        .map(|f| f.pts_90k.0)
        .collect::<Vec<_>>();
    // 11 frames: #0 delivered, then every fourth forced through, then flush.
    assert_eq!(pts.len(), 4);
    assert_eq!(pts.last().copied(), Some(10 * 90_000));
    let stats = pipeline.stats();
    assert_eq!(stats.decoded_frames, 11);
    assert_eq!(stats.delivered_frames, 4);
}

#[test]
fn jpeg_frames_bypass_parameter_sets() {
    let img: ImageBuffer<Rgb<u8>, _> =
        ImageBuffer::from_fn(16, 8, |x, _| Rgb([x as u8 * 10, 0, 0]));
    let mut jpeg = Vec::new();
    JpegEncoder::new(&mut jpeg).encode_image(&img).unwrap();

    let (pipeline, delivered) = start(relaxed_pacing(), MockFactory::default());
    pipeline
        .decode(FrameUnit::new(jpeg).with_format("jpeg").captured_at(1))
        .unwrap();
    pipeline
        .decode(FrameUnit::new(vec![0xFF, 0xD8, 0xFF]))
        .unwrap();
    pipeline.flush().unwrap();
    assert!(pipeline.sync(SYNC_TIMEOUT));

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].source, FrameSource::StillImage);
    assert_eq!((delivered[0].width(), delivered[0].height()), (16, 8));
    assert_eq!(delivered[0].pixels.len(), 16 * 8 * 4);
    assert_eq!(pipeline.stats().state, PipelineState::Idle);
}

#[test]
fn injected_parameter_sets_enable_slice_only_input() {
    let factory = MockFactory::default();
    let shared = Arc::clone(&factory.shared);
    let (pipeline, delivered) = start(relaxed_pacing(), factory);

    pipeline.set_parameter_sets(SPS, PPS).unwrap();
    feed_spaced(&pipeline, &[&IDR]);
    pipeline.set_parameter_sets(SPS, PPS).unwrap();
    feed_spaced(&pipeline, &[&NON_IDR]);

    assert_eq!(shared.lock().unwrap().configure_calls, 1);
    assert_eq!(delivered.lock().unwrap().len(), 2);
}

#[test]
fn malformed_input_is_dropped_silently() {
    let (pipeline, delivered) = start(relaxed_pacing(), MockFactory::default());
    pipeline.decode(FrameUnit::new(vec![0x12, 0x34, 0x56, 0x78, 0x9A])).unwrap();
    pipeline.decode(FrameUnit::new(Vec::new())).unwrap();
    feed_spaced(&pipeline, &[&SPS, &PPS, &IDR]);
    assert_eq!(delivered.lock().unwrap().len(), 1);
    assert_eq!(pipeline.stats().queue.depth, 0);
}
