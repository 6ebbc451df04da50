//! Bi-planar YUV 4:2:0 frames and encoded samples
//!
//! A [`PlaneFrame`] holds a full resolution luma plane and a half resolution
//! chroma plane of interleaved (U, V) pairs. Samples are stored as `u16`
//! regardless of bit depth so 8-bit (NV12) and 10-bit (P010) sources share
//! one code path.

use crate::{SuperviewError, SuperviewResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bits per sample of a plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitDepth {
    #[default]
    Eight,
    Ten,
}

impl BitDepth {
    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Eight => 8,
            BitDepth::Ten => 10,
        }
    }

    /// Largest representable sample value
    pub fn max_value(&self) -> u16 {
        ((1u32 << self.bits()) - 1) as u16
    }

    /// Bytes per sample in the raw interchange format
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            BitDepth::Eight => 1,
            BitDepth::Ten => 2,
        }
    }

    /// Raw pixel format name understood by ffmpeg
    pub fn raw_pixel_format(&self) -> &'static str {
        match self {
            BitDepth::Eight => "nv12",
            BitDepth::Ten => "p010le",
        }
    }
}

/// Chroma plane dimensions for a luma plane of `width` x `height`
pub fn chroma_dimensions(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(2), height.div_ceil(2))
}

/// Size in bytes of one raw NV12/P010 frame
pub fn raw_frame_size(width: u32, height: u32, depth: BitDepth) -> usize {
    let (cw, ch) = chroma_dimensions(width, height);
    let samples = width as usize * height as usize + cw as usize * ch as usize * 2;
    samples * depth.bytes_per_sample()
}

/// CPU-side bi-planar frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaneFrame {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    /// `width * height` luma samples, row major
    pub luma: Vec<u16>,
    /// `chroma_width * chroma_height` interleaved (U, V) pairs, row major
    pub chroma: Vec<u16>,
}

impl PlaneFrame {
    /// Allocate a zeroed frame
    pub fn new(width: u32, height: u32, depth: BitDepth) -> Self {
        let (cw, ch) = chroma_dimensions(width, height);
        Self {
            width,
            height,
            depth,
            luma: vec![0; width as usize * height as usize],
            chroma: vec![0; cw as usize * ch as usize * 2],
        }
    }

    /// Frame filled with one flat color
    pub fn filled(width: u32, height: u32, depth: BitDepth, y: u16, u: u16, v: u16) -> Self {
        let mut frame = Self::new(width, height, depth);
        frame.luma.fill(y);
        for pair in frame.chroma.chunks_exact_mut(2) {
            pair[0] = u;
            pair[1] = v;
        }
        frame
    }

    pub fn chroma_width(&self) -> u32 {
        self.width.div_ceil(2)
    }

    pub fn chroma_height(&self) -> u32 {
        self.height.div_ceil(2)
    }

    pub fn luma_at(&self, x: u32, y: u32) -> u16 {
        self.luma[(y * self.width + x) as usize]
    }

    pub fn chroma_at(&self, x: u32, y: u32) -> [u16; 2] {
        let index = ((y * self.chroma_width() + x) * 2) as usize;
        [self.chroma[index], self.chroma[index + 1]]
    }

    /// Check that plane lengths agree with the declared dimensions
    pub fn validate(&self) -> SuperviewResult<()> {
        let expected_luma = self.width as usize * self.height as usize;
        let expected_chroma = self.chroma_width() as usize * self.chroma_height() as usize * 2;
        if self.width == 0 || self.height == 0 {
            return Err(SuperviewError::ReaderFailure(format!(
                "Invalid frame dimensions {}x{}",
                self.width, self.height
            )));
        }
        if self.luma.len() != expected_luma || self.chroma.len() != expected_chroma {
            return Err(SuperviewError::ReaderFailure(format!(
                "Plane size mismatch for {}x{}: luma {} (expected {}), chroma {} (expected {})",
                self.width,
                self.height,
                self.luma.len(),
                expected_luma,
                self.chroma.len(),
                expected_chroma
            )));
        }
        Ok(())
    }

    /// Parse a raw NV12 (8-bit) or P010LE (10-bit) frame
    ///
    /// P010 keeps the 10 significant bits in the top of each 16-bit word.
    pub fn from_raw(data: &[u8], width: u32, height: u32, depth: BitDepth) -> SuperviewResult<Self> {
        let expected = raw_frame_size(width, height, depth);
        if data.len() != expected {
            return Err(SuperviewError::ReaderFailure(format!(
                "Raw frame is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                depth
            )));
        }

        let samples: Vec<u16> = match depth {
            BitDepth::Eight => data.iter().map(|&b| b as u16).collect(),
            BitDepth::Ten => data
                .chunks_exact(2)
                .map(|w| u16::from_le_bytes([w[0], w[1]]) >> 6)
                .collect(),
        };

        let luma_len = width as usize * height as usize;
        let mut luma = samples;
        let chroma = luma.split_off(luma_len);

        Ok(Self {
            width,
            height,
            depth,
            luma,
            chroma,
        })
    }

    /// Serialize back to raw NV12 / P010LE bytes
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw_frame_size(self.width, self.height, self.depth));
        let samples = self.luma.iter().chain(self.chroma.iter());
        match self.depth {
            BitDepth::Eight => out.extend(samples.map(|&s| s.min(255) as u8)),
            BitDepth::Ten => {
                for &s in samples {
                    out.extend_from_slice(&(s.min(1023) << 6).to_le_bytes());
                }
            }
        }
        out
    }
}

/// A decoded frame with its source timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub planes: PlaneFrame,
    pub presentation_time: Duration,
}

/// An encoded audio payload copied through without transformation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedSample {
    pub data: Vec<u8>,
    /// `None` when timing travels inside a container-framed payload
    pub presentation_time: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chroma_dimensions_round_up() {
        assert_eq!(chroma_dimensions(1920, 1080), (960, 540));
        assert_eq!(chroma_dimensions(5, 3), (3, 2));
    }

    #[test]
    fn test_raw_frame_size() {
        assert_eq!(raw_frame_size(4, 2, BitDepth::Eight), 8 + 4);
        assert_eq!(raw_frame_size(4, 2, BitDepth::Ten), (8 + 4) * 2);
    }

    #[test]
    fn test_filled_frame() {
        let frame = PlaneFrame::filled(6, 4, BitDepth::Eight, 100, 30, 200);
        assert!(frame.validate().is_ok());
        assert_eq!(frame.luma_at(5, 3), 100);
        assert_eq!(frame.chroma_at(2, 1), [30, 200]);
    }

    #[test]
    fn test_p010_parsing_uses_high_bits() {
        let mut raw = Vec::new();
        for value in [1023u16, 512, 0, 64, 256, 768] {
            raw.extend_from_slice(&(value << 6).to_le_bytes());
        }
        let frame = PlaneFrame::from_raw(&raw, 2, 2, BitDepth::Ten).unwrap();
        assert_eq!(frame.luma, vec![1023, 512, 0, 64]);
        assert_eq!(frame.chroma, vec![256, 768]);
        assert_eq!(frame.to_raw(), raw);
    }

    #[test]
    fn test_nv12_parsing() {
        let raw: Vec<u8> = (0..12).collect();
        let frame = PlaneFrame::from_raw(&raw, 4, 2, BitDepth::Eight).unwrap();
        assert_eq!(frame.luma.len(), 8);
        assert_eq!(frame.chroma_at(1, 0), [10, 11]);
    }

    #[test]
    fn test_from_raw_rejects_wrong_length() {
        let err = PlaneFrame::from_raw(&[0u8; 5], 4, 2, BitDepth::Eight).unwrap_err();
        assert!(matches!(err, SuperviewError::ReaderFailure(_)));
    }

    #[test]
    fn test_validate_detects_mismatch() {
        let mut frame = PlaneFrame::new(4, 4, BitDepth::Eight);
        frame.chroma.pop();
        assert!(frame.validate().is_err());
    }

    #[test]
    fn test_max_value() {
        assert_eq!(BitDepth::Eight.max_value(), 255);
        assert_eq!(BitDepth::Ten.max_value(), 1023);
    }
}
