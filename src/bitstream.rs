use std::fmt;

use crate::{DecodeError, NalUnit};

/// Splits an Annex-B buffer into NAL units, in order.
///
/// Bytes ahead of the first start code are discarded; the last unit runs to
/// the end of the buffer. A buffer without any start code yields nothing.
pub fn split_nal_units(data: &[u8]) -> Vec<NalUnit> {
    let start_codes = find_start_codes(data);
    let mut nalus = Vec::with_capacity(start_codes.len());
    for (index, &(start, start_len)) in start_codes.iter().enumerate() {
        let payload_start = start + start_len;
        let end = start_codes
            .get(index + 1)
            .map(|&(next, _)| next)
            .unwrap_or(data.len());
        if end > payload_start {
            if let Some(nal) = NalUnit::new(data[payload_start..end].to_vec()) {
                nalus.push(nal);
            }
        }
    }
    nalus
}

/// Returns `(offset, start_code_len)` for every start code in `data`.
pub(crate) fn find_start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 3 <= data.len() {
        if i + 4 <= data.len()
            && data[i] == 0
            && data[i + 1] == 0
            && data[i + 2] == 0
            && data[i + 3] == 1
        {
            out.push((i, 4));
            i += 4;
            continue;
        }
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            out.push((i, 3));
            i += 3;
            continue;
        }
        i += 1;
    }
    out
}

/// Re-frames one NAL payload as a 4-byte big-endian length followed by the payload.
pub fn to_length_prefixed(nal: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(nal.len().saturating_add(4));
    data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
    data.extend_from_slice(nal);
    data
}

pub fn length_prefixed_to_annexb(sample: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(sample.len());
    let mut payload = sample;
    while payload.len() >= 4 {
        let nal_len = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
        payload = &payload[4..];
        if nal_len == 0 || payload.len() < nal_len {
            return Err(DecodeError::MalformedInput(
                "invalid length-prefixed sample payload".to_string(),
            ));
        }
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(&payload[..nal_len]);
        payload = &payload[nal_len..];
    }
    if !payload.is_empty() || out.is_empty() {
        return Err(DecodeError::MalformedInput(
            "trailing bytes after length-prefixed sample parse".to_string(),
        ));
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    ConstrainedBaseline,
    Baseline,
    Main,
    Extended,
    High,
    High10,
    High422,
    High444,
    Unknown(u8),
}

impl H264Profile {
    pub fn is_baseline(self) -> bool {
        matches!(self, Self::Baseline | Self::ConstrainedBaseline)
    }
}

impl fmt::Display for H264Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConstrainedBaseline => f.write_str("constrained-baseline"),
            Self::Baseline => f.write_str("baseline"),
            Self::Main => f.write_str("main"),
            Self::Extended => f.write_str("extended"),
            Self::High => f.write_str("high"),
            Self::High10 => f.write_str("high10"),
            Self::High422 => f.write_str("high422"),
            Self::High444 => f.write_str("high444"),
            Self::Unknown(idc) => write!(f, "unknown({idc})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub profile: H264Profile,
}

impl SpsInfo {
    /// Reads profile/constraint/level from the three bytes after the NAL header.
    pub fn parse(sps: &[u8]) -> Option<Self> {
        let &[_, profile_idc, constraint_flags, level_idc, ..] = sps else {
            return None;
        };
        let profile = match profile_idc {
            66 if constraint_flags & 0x40 != 0 => H264Profile::ConstrainedBaseline,
            66 => H264Profile::Baseline,
            77 => H264Profile::Main,
            88 => H264Profile::Extended,
            100 => H264Profile::High,
            110 => H264Profile::High10,
            122 => H264Profile::High422,
            244 => H264Profile::High444,
            other => H264Profile::Unknown(other),
        };
        Some(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            profile,
        })
    }

    pub fn level(&self) -> f32 {
        f32::from(self.level_idc) / 10.0
    }
}
