use image::ImageFormat;

use crate::{DecodeError, DecodedFrame, Dimensions, FrameSource, Timestamp90k};

/// Decodes self-contained JPEG frames. Holds no session state.
#[derive(Debug, Default, Clone, Copy)]
pub struct StillImageDecoder;

impl StillImageDecoder {
    pub fn new() -> Self {
        Self
    }

    pub fn decode(&self, bytes: &[u8], pts_90k: Timestamp90k) -> Result<DecodedFrame, DecodeError> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
            .map_err(|err| DecodeError::StillImage(err.to_string()))?
            .to_rgba8();
        let dims = Dimensions::new(image.width(), image.height())
            .ok_or_else(|| DecodeError::StillImage("image has zero dimensions".to_string()))?;

        Ok(DecodedFrame {
            dims,
            pts_90k,
            pixels: image.into_raw(),
            source: FrameSource::StillImage,
            capture_ms: None,
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_test_jpeg(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageBuffer, Rgb};

    let img: ImageBuffer<Rgb<u8>, _> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 16) as u8, (y * 16) as u8, 128])
    });
    let mut jpeg = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
    encoder.encode_image(&img).unwrap();
    jpeg
}
