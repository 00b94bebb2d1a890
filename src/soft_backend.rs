use log::{debug, info, trace, warn};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;

use crate::convert::{RgbaConverter, Yuv420Planes};
use crate::{DecodeError, DecodedFrame, Dimensions, FrameSource, SoftwareDecoder, Timestamp90k};

/// OpenH264 software decoder. Parameter sets are negotiated in-band, so the
/// caller only has to keep feeding Annex-B buffers.
pub struct OpenH264Decoder {
    decoder: Decoder,
    converter: RgbaConverter,
    decoded_frames: u64,
}

impl OpenH264Decoder {
    pub fn new() -> Result<Self, DecodeError> {
        let decoder = new_decoder()?;
        info!(target: "mirror_decode::soft", "OpenH264 decoder initialized");
        Ok(Self {
            decoder,
            converter: RgbaConverter::new(),
            decoded_frames: 0,
        })
    }

    pub fn decoded_frames(&self) -> u64 {
        self.decoded_frames
    }
}

fn new_decoder() -> Result<Decoder, DecodeError> {
    Decoder::new().map_err(|err| DecodeError::Software(format!("openh264 init: {err}")))
}

impl SoftwareDecoder for OpenH264Decoder {
    fn name(&self) -> &'static str {
        "openh264"
    }

    fn decode(
        &mut self,
        annexb: &[u8],
        pts_90k: Timestamp90k,
    ) -> Result<Vec<DecodedFrame>, DecodeError> {
        let maybe_yuv = self
            .decoder
            .decode(annexb)
            .map_err(|err| DecodeError::Software(err.to_string()))?;
        let Some(yuv) = maybe_yuv else {
            trace!(target: "mirror_decode::soft", "no picture for {pts_90k} yet");
            return Ok(Vec::new());
        };

        let (width, height) = yuv.dimensions();
        let Some(dims) = Dimensions::new(width as u32, height as u32) else {
            return Ok(Vec::new());
        };
        let (y_stride, u_stride, v_stride) = yuv.strides();
        let planes = Yuv420Planes {
            y: yuv.y(),
            u: yuv.u(),
            v: yuv.v(),
            y_stride,
            u_stride,
            v_stride,
        };
        let pixels = self.converter.convert(planes, dims)?.to_vec();

        self.decoded_frames += 1;
        if self.decoded_frames % 120 == 1 {
            debug!(
                target: "mirror_decode::soft",
                "decoded frame #{} ({dims}, buffer reallocations={})",
                self.decoded_frames,
                self.converter.reallocations()
            );
        }

        Ok(vec![DecodedFrame {
            dims,
            pts_90k,
            pixels,
            source: FrameSource::Software,
            capture_ms: None,
        }])
    }

    fn reset(&mut self) {
        match new_decoder() {
            Ok(decoder) => self.decoder = decoder,
            Err(err) => {
                warn!(target: "mirror_decode::soft", "decoder re-creation failed: {err}");
            }
        }
        self.converter.invalidate();
    }
}
