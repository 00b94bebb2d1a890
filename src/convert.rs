use crate::{DecodeError, Dimensions};

/// Borrowed planar YUV 4:2:0 picture, valid only for one conversion call.
#[derive(Debug, Clone, Copy)]
pub struct Yuv420Planes<'a> {
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
    pub y_stride: usize,
    pub u_stride: usize,
    pub v_stride: usize,
}

/// Planar YUV 4:2:0 to interleaved RGBA converter with an owned output
/// buffer that is reallocated only when the coded dimensions change.
#[derive(Debug, Default)]
pub struct RgbaConverter {
    dims: Option<Dimensions>,
    buffer: Vec<u8>,
    reallocations: u64,
}

impl RgbaConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dims
    }

    pub fn reallocations(&self) -> u64 {
        self.reallocations
    }

    /// Drops the output buffer; the next conversion rebuilds it.
    pub fn invalidate(&mut self) {
        self.dims = None;
        self.buffer = Vec::new();
    }

    pub fn convert(
        &mut self,
        planes: Yuv420Planes<'_>,
        dims: Dimensions,
    ) -> Result<&[u8], DecodeError> {
        self.ensure_buffer(dims)?;
        let width = dims.width.get() as usize;
        let height = dims.height.get() as usize;
        validate_planes(&planes, width, height)?;

        for y in 0..height {
            let y_row = y * planes.y_stride;
            let u_row = (y / 2) * planes.u_stride;
            let v_row = (y / 2) * planes.v_stride;
            let dst_row = y * width * 4;
            for x in 0..width {
                let y_value = i32::from(planes.y[y_row + x]);
                let u_value = i32::from(planes.u[u_row + x / 2]);
                let v_value = i32::from(planes.v[v_row + x / 2]);
                let (r, g, b) = bt601_to_rgb(y_value, u_value, v_value);

                let dst = dst_row + x * 4;
                self.buffer[dst] = r;
                self.buffer[dst + 1] = g;
                self.buffer[dst + 2] = b;
                self.buffer[dst + 3] = 255;
            }
        }

        Ok(&self.buffer)
    }

    fn ensure_buffer(&mut self, dims: Dimensions) -> Result<(), DecodeError> {
        if self.dims == Some(dims) {
            return Ok(());
        }
        self.invalidate();
        let len = dims.rgba_len();
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|err| {
            DecodeError::ResourceExhausted(format!("rgba buffer for {dims} ({len} bytes): {err}"))
        })?;
        buffer.resize(len, 0);
        self.buffer = buffer;
        self.dims = Some(dims);
        self.reallocations += 1;
        Ok(())
    }
}

fn validate_planes(
    planes: &Yuv420Planes<'_>,
    width: usize,
    height: usize,
) -> Result<(), DecodeError> {
    let chroma_width = width.div_ceil(2);
    let chroma_height = height.div_ceil(2);
    let plane_fits = |data: &[u8], stride: usize, row_len: usize, rows: usize| {
        stride >= row_len
            && stride
                .checked_mul(rows - 1)
                .and_then(|v| v.checked_add(row_len))
                .is_some_and(|needed| data.len() >= needed)
    };
    if !plane_fits(planes.y, planes.y_stride, width, height)
        || !plane_fits(planes.u, planes.u_stride, chroma_width, chroma_height)
        || !plane_fits(planes.v, planes.v_stride, chroma_width, chroma_height)
    {
        return Err(DecodeError::MalformedInput(format!(
            "yuv420 planes too small for {width}x{height}"
        )));
    }
    Ok(())
}

#[inline]
fn bt601_to_rgb(y_value: i32, u_value: i32, v_value: i32) -> (u8, u8, u8) {
    let c = (y_value - 16).max(0);
    let d = u_value - 128;
    let e = v_value - 128;
    (
        clip_to_u8((298 * c + 409 * e + 128) >> 8),
        clip_to_u8((298 * c - 100 * d - 208 * e + 128) >> 8),
        clip_to_u8((298 * c + 516 * d + 128) >> 8),
    )
}

#[inline]
fn clip_to_u8(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

/// Copies a (possibly padded) BGRA surface into tightly packed RGBA.
pub fn bgra_to_rgba(
    src: &[u8],
    bytes_per_row: usize,
    dims: Dimensions,
) -> Result<Vec<u8>, DecodeError> {
    let width = dims.width.get() as usize;
    let height = dims.height.get() as usize;
    let row_len = width.saturating_mul(4);
    if bytes_per_row < row_len || src.len() < bytes_per_row * (height - 1) + row_len {
        return Err(DecodeError::MalformedInput(format!(
            "bgra surface too small for {dims} (bytes_per_row={bytes_per_row}, len={})",
            src.len()
        )));
    }
    let mut out = Vec::new();
    out.try_reserve_exact(dims.rgba_len()).map_err(|err| {
        DecodeError::ResourceExhausted(format!("rgba buffer for {dims}: {err}"))
    })?;
    for y in 0..height {
        let row = &src[y * bytes_per_row..y * bytes_per_row + row_len];
        for px in row.chunks_exact(4) {
            out.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    Ok(out)
}
