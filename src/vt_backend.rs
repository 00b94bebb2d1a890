use std::{ffi::c_void, sync::Mutex};

use crate::bitstream::{SpsInfo, to_length_prefixed};
use crate::convert::bgra_to_rgba;
use crate::delivery::FrameSink;
use crate::{
    ConfigError, DecodeError, DecodedFrame, Dimensions, FrameSource, HardwareDecoder, NalUnit,
    ParameterSet, SessionState, Timestamp90k,
};
use core_foundation::{
    base::{CFType, TCFType},
    boolean::CFBoolean,
    dictionary::CFMutableDictionary,
    number::CFNumber,
    string::CFString,
};
use core_media::{
    block_buffer::CMBlockBuffer,
    format_description::{CMFormatDescription, CMVideoFormatDescription},
    sample_buffer::{CMSampleBuffer, CMSampleTimingInfo},
    time::{CMTime, kCMTimeInvalid},
};
use core_video::pixel_buffer::{
    CVPixelBuffer, kCVPixelBufferPixelFormatTypeKey, kCVPixelFormatType_32BGRA,
};
use log::{debug, info, warn};
use video_toolbox::{
    decompression_properties::VideoDecoderSpecification,
    decompression_session::{VTDecompressionOutputCallbackRecord, VTDecompressionSession},
    errors::VTDecodeFrameFlags,
};

const TIMESCALE_90K: i32 = 90_000;

/// State reachable from the VideoToolbox output callback.
struct OutputState {
    sink: FrameSink,
    decoded_frames: u64,
    failed_frames: u64,
}

struct VtSession {
    session: VTDecompressionSession,
    format_description: CMVideoFormatDescription,
    // Declared after `session` so it outlives every callback.
    output: Box<Mutex<OutputState>>,
}

// SAFETY: decompression sessions may be driven from any thread, and the
// callback state is only reached through its mutex.
unsafe impl Send for VtSession {}

impl VtSession {
    fn new(parameter_set: &ParameterSet, sink: FrameSink) -> Result<Self, ConfigError> {
        let refs = [parameter_set.sps.as_slice(), parameter_set.pps.as_slice()];
        let format_description = CMVideoFormatDescription::from_h264_parameter_sets(&refs, 4)
            .map_err(|status| {
                cm_error("CMVideoFormatDescription::from_h264_parameter_sets", status)
            })?;
        let dims = format_description.get_dimensions();
        info!(
            target: "mirror_decode::vt",
            "format description created ({}x{})",
            dims.width,
            dims.height
        );

        let mut decoder_specification = CFMutableDictionary::<CFString, CFType>::new();
        decoder_specification.add(
            &VideoDecoderSpecification::RequireHardwareAcceleratedVideoDecoder.into(),
            &CFBoolean::true_value().as_CFType(),
        );
        let mut destination_attributes = CFMutableDictionary::<CFString, CFType>::new();
        destination_attributes.add(
            &unsafe { CFString::wrap_under_get_rule(kCVPixelBufferPixelFormatTypeKey) },
            &CFNumber::from(i64::from(kCVPixelFormatType_32BGRA)).as_CFType(),
        );

        let mut output = Box::new(Mutex::new(OutputState {
            sink,
            decoded_frames: 0,
            failed_frames: 0,
        }));
        let output_ptr = (&mut *output as *mut Mutex<OutputState>).cast::<c_void>();
        let callback = VTDecompressionOutputCallbackRecord {
            decompressionOutputCallback: Some(vt_decode_output_callback),
            decompressionOutputRefCon: output_ptr,
        };

        let session = unsafe {
            VTDecompressionSession::new_with_callback(
                format_description.clone(),
                Some(decoder_specification.to_immutable()),
                Some(destination_attributes.to_immutable()),
                Some(&callback as *const VTDecompressionOutputCallbackRecord),
            )
        }
        .map_err(|status| vt_error("VTDecompressionSession::new_with_callback", status))?;

        Ok(Self {
            session,
            format_description,
            output,
        })
    }

    fn decode(&self, nal: &NalUnit, pts_90k: Timestamp90k) -> Result<(), DecodeError> {
        let sample = to_length_prefixed(&nal.payload);
        let block_buffer = unsafe {
            let block_buffer =
                CMBlockBuffer::new_with_memory_block(None, sample.len(), None, 0, sample.len(), 0)
                    .map_err(|status| frame_error("CMBlockBuffer::new_with_memory_block", status))?;
            block_buffer
                .replace_data_bytes(&sample, 0)
                .map_err(|status| frame_error("CMBlockBuffer::replace_data_bytes", status))?;
            Ok::<CMBlockBuffer, DecodeError>(block_buffer)
        }?;

        let sample_size = [sample.len()];
        let format_description: CMFormatDescription = unsafe {
            CMFormatDescription::wrap_under_get_rule(self.format_description.as_concrete_TypeRef())
        };
        let timing = CMSampleTimingInfo {
            duration: unsafe { kCMTimeInvalid },
            presentationTimeStamp: CMTime::make(pts_90k.0.max(0), TIMESCALE_90K),
            decodeTimeStamp: unsafe { kCMTimeInvalid },
        };
        let sample_buffer = CMSampleBuffer::new_ready(
            &block_buffer,
            Some(&format_description),
            1,
            Some(&[timing]),
            Some(&sample_size),
        )
        .map_err(|status| frame_error("CMSampleBuffer::new_ready", status))?;

        unsafe {
            self.session
                .decode_frame(
                    sample_buffer,
                    VTDecodeFrameFlags::Frame_EnableAsynchronousDecompression,
                    std::ptr::null_mut(),
                )
                .map_err(|status| frame_error("VTDecompressionSession::decode_frame", status))?;
        }
        Ok(())
    }

    fn drain(&self) {
        if let Err(status) = self.session.finish_delayed_frames() {
            debug!(target: "mirror_decode::vt", "finish_delayed_frames: {status}");
        }
        if let Err(status) = self.session.wait_for_asynchronous_frames() {
            debug!(target: "mirror_decode::vt", "wait_for_asynchronous_frames: {status}");
        }
        if let Ok(output) = self.output.lock() {
            debug!(
                target: "mirror_decode::vt",
                "session drained (generation {}, decoded={}, failed={})",
                output.sink.generation(),
                output.decoded_frames,
                output.failed_frames
            );
        }
    }
}

impl Drop for VtSession {
    fn drop(&mut self) {
        self.drain();
    }
}

/// VideoToolbox hardware decoder producing BGRA surfaces that are repacked
/// to RGBA inside the output callback.
#[derive(Default)]
pub struct VtHardwareDecoder {
    session: Option<VtSession>,
    state: SessionState,
}

impl VtHardwareDecoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HardwareDecoder for VtHardwareDecoder {
    fn name(&self) -> &'static str {
        "videotoolbox"
    }

    fn configure(
        &mut self,
        parameter_set: &ParameterSet,
        sink: FrameSink,
    ) -> Result<(), ConfigError> {
        self.invalidate();
        if let Some(info) = SpsInfo::parse(&parameter_set.sps) {
            debug!(
                target: "mirror_decode::vt",
                "configuring for {} profile, level {:.1}",
                info.profile,
                info.level()
            );
        }
        match VtSession::new(parameter_set, sink) {
            Ok(session) => {
                self.session = Some(session);
                self.state = SessionState::Configured;
                Ok(())
            }
            Err(err) => {
                warn!(target: "mirror_decode::vt", "{err}");
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    fn decode(&mut self, nal: &NalUnit, pts_90k: Timestamp90k) -> Result<(), DecodeError> {
        let Some(session) = &self.session else {
            return Err(DecodeError::Backend {
                backend: "videotoolbox",
                message: format!("no session for slice at {pts_90k}"),
            });
        };
        session.decode(nal, pts_90k)?;
        self.state = SessionState::Active;
        Ok(())
    }

    fn invalidate(&mut self) {
        self.session = None;
        self.state = SessionState::Uninitialized;
    }

    fn state(&self) -> SessionState {
        self.state
    }
}

fn vt_error(context: &str, status: i32) -> ConfigError {
    ConfigError::Session {
        context: format!("videotoolbox({context})"),
        status,
    }
}

fn cm_error(context: &str, status: i32) -> ConfigError {
    ConfigError::FormatDescription {
        context: format!("coremedia({context})"),
        status,
    }
}

fn frame_error(context: &str, status: i32) -> DecodeError {
    DecodeError::Backend {
        backend: "videotoolbox",
        message: format!("{context}: {status}"),
    }
}

fn pts_from_cm_time(time: CMTime) -> Timestamp90k {
    if time.timescale <= 0 {
        return Timestamp90k(0);
    }
    let scaled = i128::from(time.value) * i128::from(TIMESCALE_90K) / i128::from(time.timescale);
    Timestamp90k(scaled as i64)
}

fn copy_pixel_buffer(pixel_buffer: &CVPixelBuffer) -> Result<(Dimensions, Vec<u8>), DecodeError> {
    let dims = Dimensions::new(pixel_buffer.get_width() as u32, pixel_buffer.get_height() as u32)
        .ok_or_else(|| DecodeError::MalformedInput("empty pixel buffer".to_string()))?;
    let pixel_format = pixel_buffer.get_pixel_format();
    if pixel_format != kCVPixelFormatType_32BGRA {
        return Err(DecodeError::Backend {
            backend: "videotoolbox",
            message: format!("unexpected pixel format {pixel_format:#x}"),
        });
    }

    let lock_status = pixel_buffer.lock_base_address(0);
    if lock_status != 0 {
        return Err(frame_error("CVPixelBuffer::lock_base_address", lock_status));
    }
    let bytes_per_row = pixel_buffer.get_bytes_per_row();
    let total = bytes_per_row.saturating_mul(dims.height.get() as usize);
    let base_ptr = unsafe { pixel_buffer.get_base_address() } as *const u8;
    let result = if base_ptr.is_null() || total == 0 {
        Err(DecodeError::MalformedInput("pixel buffer has no base address".to_string()))
    } else {
        let surface = unsafe { std::slice::from_raw_parts(base_ptr, total) };
        bgra_to_rgba(surface, bytes_per_row, dims)
    };
    pixel_buffer.unlock_base_address(0);
    Ok((dims, result?))
}

extern "C" fn vt_decode_output_callback(
    decompression_output_ref_con: *mut c_void,
    _source_frame_ref_con: *mut c_void,
    status: i32,
    _info_flags: video_toolbox::errors::VTDecodeInfoFlags,
    image_buffer: core_video::image_buffer::CVImageBufferRef,
    presentation_time_stamp: CMTime,
    _presentation_duration: CMTime,
) {
    if decompression_output_ref_con.is_null() {
        return;
    }
    let state = unsafe { &*(decompression_output_ref_con as *const Mutex<OutputState>) };
    let Ok(mut state) = state.lock() else {
        return;
    };
    let pts_90k = pts_from_cm_time(presentation_time_stamp);

    if status != 0 || image_buffer.is_null() {
        state.failed_frames += 1;
        warn!(target: "mirror_decode::vt", "frame at {pts_90k} failed to decode: status {status}");
        return;
    }

    let pixel_buffer = unsafe { CVPixelBuffer::wrap_under_get_rule(image_buffer) };
    match copy_pixel_buffer(&pixel_buffer) {
        Ok((dims, pixels)) => {
            state.decoded_frames += 1;
            let frame = DecodedFrame {
                dims,
                pts_90k,
                pixels,
                source: FrameSource::Hardware,
                capture_ms: None,
            };
            if state.sink.deliver(frame).is_err() {
                debug!(target: "mirror_decode::vt", "delivery closed, dropping frame at {pts_90k}");
            }
        }
        Err(err) => {
            state.failed_frames += 1;
            warn!(target: "mirror_decode::vt", "dropping frame at {pts_90k}: {err}");
        }
    }
}
