use std::ops::Range;

use crate::FrameError;

/// Bytes in an I420 frame: a full resolution Y plane followed by U and V planes at
/// half resolution in each direction.
pub fn i420_len(width: u32, height: u32) -> usize {
    let (w, h) = (width as usize, height as usize);
    w * h + 2 * w.div_ceil(2) * h.div_ceil(2)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    Y,
    U,
    V,
}

impl Plane {
    pub const ALL: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];
}

/// The single I420 frame the encoder works on. Allocated once for the configured
/// geometry and refreshed in place every iteration.
#[derive(Clone, Debug)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; i420_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row of `plane`.
    pub fn stride(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y => self.width as usize,
            Plane::U | Plane::V => (self.width as usize).div_ceil(2),
        }
    }

    /// Number of rows in `plane`.
    pub fn rows(&self, plane: Plane) -> usize {
        match plane {
            Plane::Y => self.height as usize,
            Plane::U | Plane::V => (self.height as usize).div_ceil(2),
        }
    }

    fn plane_range(&self, plane: Plane) -> Range<usize> {
        let luma = self.stride(Plane::Y) * self.rows(Plane::Y);
        let chroma = self.stride(Plane::U) * self.rows(Plane::U);
        match plane {
            Plane::Y => 0..luma,
            Plane::U => luma..luma + chroma,
            Plane::V => luma + chroma..luma + 2 * chroma,
        }
    }

    pub fn plane(&self, plane: Plane) -> &[u8] {
        &self.data[self.plane_range(plane)]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Refreshes the frame from a raw I420 buffer. Trailing bytes past one frame are
    /// ignored; a short buffer leaves the frame untouched.
    pub fn copy_from(&mut self, src: &[u8]) -> Result<(), FrameError> {
        let len = self.data.len();
        let src = src.get(..len).ok_or(FrameError::SizeMismatch {
            expected: len,
            actual: src.len(),
        })?;
        self.data.copy_from_slice(src);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i420_len() {
        assert_eq!(i420_len(640, 480), 640 * 480 * 3 / 2);
        assert_eq!(i420_len(4, 2), 12);
        // odd geometry rounds chroma up
        assert_eq!(i420_len(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_plane_layout() {
        let mut frame = Frame::new(4, 2);
        let src: Vec<u8> = (0..12).collect();
        frame.copy_from(&src).unwrap();
        assert_eq!(frame.plane(Plane::Y), &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(frame.plane(Plane::U), &[8, 9]);
        assert_eq!(frame.plane(Plane::V), &[10, 11]);
        assert_eq!(frame.stride(Plane::Y), 4);
        assert_eq!(frame.stride(Plane::V), 2);
        assert_eq!(frame.rows(Plane::U), 1);
    }

    #[test]
    fn test_copy_from_sizes() {
        let mut frame = Frame::new(4, 2);
        let err = frame.copy_from(&[1; 11]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::SizeMismatch {
                expected: 12,
                actual: 11
            }
        ));
        assert!(frame.as_bytes().iter().all(|b| *b == 0));

        frame.copy_from(&[7; 64]).unwrap();
        assert_eq!(frame.len(), 12);
        assert!(frame.as_bytes().iter().all(|b| *b == 7));
    }
}
