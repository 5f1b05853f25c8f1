//! Budget-bounded JPEG compression for alert images.
//!
//! Walks quality down from 70 and halves the frame dimensions once quality
//! drops to 30, until the encoded size fits the configured budget. When the
//! frame cannot be shrunk any further, a terminal encode at quality 20 is
//! returned unconditionally, so callers always get *something* — the hard
//! budget is met in every case except that documented fallback.

use crate::detection::Frame;
use jpeg_encoder::{ColorType, Encoder};
use thiserror::Error;
use tracing::{debug, warn};

/// Smallest dimension the halving step is allowed to produce.
const MIN_DIMENSION: u32 = 8;

/// Errors that can occur while compressing a frame
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("JPEG encoding failed: {0}")]
    Codec(#[from] jpeg_encoder::EncodingError),
}

/// Compress a frame to at most `max_kb` kilobytes of JPEG.
///
/// Returns the encoded bytes, which exceed the budget only in the terminal
/// quality-20 fallback. Any codec error propagates; callers degrade to a
/// payload without an image.
pub fn encode_to_budget(frame: &Frame, max_kb: u32) -> Result<Vec<u8>, EncodeError> {
    let expected = frame.width as usize * frame.height as usize * 3;
    if frame.width == 0 || frame.height == 0 || frame.data.len() != expected {
        return Err(EncodeError::InvalidFrame(format!(
            "expected {}x{}x3 = {} bytes, got {}",
            frame.width,
            frame.height,
            expected,
            frame.data.len()
        )));
    }
    if frame.width > u16::MAX as u32 || frame.height > u16::MAX as u32 {
        return Err(EncodeError::InvalidFrame(format!(
            "frame dimensions {}x{} exceed encoder limits",
            frame.width, frame.height
        )));
    }

    let budget = max_kb as usize * 1024;
    let mut image = RgbImage {
        data: frame.data.clone(),
        width: frame.width,
        height: frame.height,
    };
    let mut quality: u8 = 70;

    while quality > 10 {
        let bytes = encode_jpeg(&image, quality)?;
        if bytes.len() <= budget {
            debug!(
                quality,
                width = image.width,
                height = image.height,
                size_bytes = bytes.len(),
                "alert image fit the budget"
            );
            return Ok(bytes);
        }

        quality -= 10;
        if quality <= 30 {
            if image.width < MIN_DIMENSION * 2 || image.height < MIN_DIMENSION * 2 {
                break;
            }
            image = image.halved();
            quality = 50;
        }
    }

    // Terminal fallback: the result may overshoot the budget.
    let bytes = encode_jpeg(&image, 20)?;
    warn!(
        size_bytes = bytes.len(),
        budget_bytes = budget,
        "alert image exceeds budget after terminal fallback"
    );
    Ok(bytes)
}

/// Owned RGB24 buffer the budget search shrinks in place.
struct RgbImage {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl RgbImage {
    /// Halve both dimensions with a 2x2 box average. Odd trailing rows and
    /// columns are discarded.
    fn halved(&self) -> RgbImage {
        let dst_width = self.width / 2;
        let dst_height = self.height / 2;
        let mut data = vec![0u8; dst_width as usize * dst_height as usize * 3];

        for y in 0..dst_height {
            for x in 0..dst_width {
                let dst_idx = ((y * dst_width + x) * 3) as usize;
                for c in 0..3 {
                    let mut sum = 0u32;
                    for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                        let src_y = y * 2 + dy;
                        let src_x = x * 2 + dx;
                        let src_idx = ((src_y * self.width + src_x) * 3) as usize + c;
                        sum += self.data[src_idx] as u32;
                    }
                    data[dst_idx + c] = (sum / 4) as u8;
                }
            }
        }

        RgbImage {
            data,
            width: dst_width,
            height: dst_height,
        }
    }
}

fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    let encoder = Encoder::new(&mut buf, quality);
    encoder.encode(
        &image.data,
        image.width as u16,
        image.height as u16,
        ColorType::Rgb,
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic noisy frame; noise defeats JPEG compression so size
    /// bounds are actually exercised.
    fn noisy_frame(width: u32, height: u32) -> Frame {
        let mut state = 0x2545_f491_u32;
        let data = (0..width as usize * height as usize * 3)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect();
        Frame::new(data, width, height)
    }

    fn flat_frame(width: u32, height: u32) -> Frame {
        Frame::new(vec![90u8; width as usize * height as usize * 3], width, height)
    }

    #[test]
    fn test_budget_met_for_generous_budget() {
        let frame = flat_frame(64, 64);
        let bytes = encode_to_budget(&frame, 50).unwrap();
        assert!(!bytes.is_empty());
        assert!(bytes.len() <= 50 * 1024);
    }

    #[test]
    fn test_budget_met_via_downscaling() {
        let frame = noisy_frame(320, 240);
        let bytes = encode_to_budget(&frame, 4).unwrap();
        assert!(bytes.len() <= 4 * 1024);
    }

    #[test]
    fn test_terminal_fallback_still_returns_bytes() {
        // A zero budget can never be met; the quality-20 fallback must still
        // produce a non-empty JPEG, overshooting the budget by design.
        let frame = noisy_frame(64, 64);
        let budget_bytes = 0;
        let bytes = encode_to_budget(&frame, 0).unwrap();
        assert!(!bytes.is_empty());
        assert!(
            bytes.len() > budget_bytes,
            "terminal fallback overshoots the budget"
        );
    }

    #[test]
    fn test_jpeg_magic_bytes() {
        let frame = flat_frame(32, 32);
        let bytes = encode_to_budget(&frame, 50).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_invalid_buffer_rejected() {
        let frame = Frame::new(vec![0u8; 10], 64, 64);
        assert!(matches!(
            encode_to_budget(&frame, 50),
            Err(EncodeError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_halving_averages_blocks() {
        let image = RgbImage {
            // One 2x2 block per channel: values 10, 20, 30, 40 -> mean 25
            data: vec![
                10, 10, 10, 20, 20, 20, //
                30, 30, 30, 40, 40, 40,
            ],
            width: 2,
            height: 2,
        };
        let half = image.halved();
        assert_eq!(half.width, 1);
        assert_eq!(half.height, 1);
        assert_eq!(half.data, vec![25, 25, 25]);
    }
}
