use crate::FrameFormat;

/// Classifies an input buffer. A recognised hint always wins; unrecognised
/// content falls through to the H.264 path, where the parser simply finds no
/// NAL units.
pub fn detect_format(bytes: &[u8], hint: Option<&str>) -> FrameFormat {
    if let Some(format) = hint.and_then(FrameFormat::from_hint) {
        return format;
    }
    if bytes.starts_with(&[0xFF, 0xD8]) {
        FrameFormat::Jpeg
    } else {
        // Start-code prefixed or not, everything else is parsed as Annex-B.
        FrameFormat::H264
    }
}
