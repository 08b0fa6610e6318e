//! Planar 4:2:0 frame geometry and the owned frame buffer.

use livecap_common::error::{CaptureError, CaptureResult};

/// Horizontal alignment required by the chroma-subsampled encoder input.
pub const WIDTH_ALIGN: u32 = 32;

/// Vertical alignment required by 4:2:0 subsampling.
pub const HEIGHT_ALIGN: u32 = 2;

/// Geometry of an I420 frame: a full-size Y plane followed by
/// quarter-size U and V planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    width: u32,
    height: u32,
}

impl FrameLayout {
    /// Round `width`/`height` up to the encoder alignment.
    pub fn aligned(width: u32, height: u32) -> CaptureResult<Self> {
        if width == 0 || height == 0 {
            return Err(CaptureError::invalid_config(format!(
                "capture size {width}x{height} must be non-zero"
            )));
        }
        let width = align_up(width, WIDTH_ALIGN)
            .ok_or_else(|| CaptureError::invalid_config(format!("width {width} too large")))?;
        let height = align_up(height, HEIGHT_ALIGN)
            .ok_or_else(|| CaptureError::invalid_config(format!("height {height} too large")))?;
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes in the Y plane.
    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes in each of the U and V planes.
    pub fn chroma_len(&self) -> usize {
        self.luma_len() / 4
    }

    /// Total frame size, `width * height * 3 / 2`.
    pub fn frame_len(&self) -> usize {
        self.luma_len() * 3 / 2
    }

    /// Split a frame buffer into its Y, U and V planes.
    pub fn planes_mut<'a>(
        &self,
        data: &'a mut [u8],
    ) -> (&'a mut [u8], &'a mut [u8], &'a mut [u8]) {
        let (y, rest) = data.split_at_mut(self.luma_len());
        let (u, v) = rest.split_at_mut(self.chroma_len());
        (y, u, v)
    }

    /// Encoder `-s` argument.
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn align_up(value: u32, align: u32) -> Option<u32> {
    value.checked_add(align - 1).map(|v| v / align * align)
}

/// One frame owned by whichever side currently holds it.
#[derive(Debug)]
pub struct QueuedFrame {
    data: Box<[u8]>,
    timestamp_ns: u64,
}

impl QueuedFrame {
    /// Take ownership of `data`, checking it against the session layout.
    pub fn new(layout: &FrameLayout, data: Vec<u8>, timestamp_ns: u64) -> CaptureResult<Self> {
        if data.len() != layout.frame_len() {
            return Err(CaptureError::FrameSizeMismatch {
                expected: layout.frame_len(),
                actual: data.len(),
            });
        }
        Ok(Self {
            data: data.into_boxed_slice(),
            timestamp_ns,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
