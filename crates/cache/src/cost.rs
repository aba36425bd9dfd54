//! Resident-size estimates for cached thumbnails.

use loupe_codec::Thumbnail;
use std::num::NonZeroU32;

/// Wrapper and metadata overhead on top of the raw pixel buffer.
pub const COST_OVERHEAD_FACTOR: f64 = 1.10;

/// Size information available for a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Dimensions {
    /// Exact pixel dimensions of the backing buffer.
    Pixels { width: u32, height: u32 },
    /// Logical (point) size, used when pixel dimensions are unknown.
    Logical { width: f64, height: f64 },
}

impl From<&Thumbnail> for Dimensions {
    fn from(thumbnail: &Thumbnail) -> Self {
        let (width, height) = thumbnail.dimensions();
        Self::Pixels { width, height }
    }
}

impl From<(u32, u32)> for Dimensions {
    fn from((width, height): (u32, u32)) -> Self {
        Self::Pixels { width, height }
    }
}

/// `round(width * height * cost_per_pixel * 1.10)`.
///
/// Negative or non-finite logical sizes cost nothing.
pub fn estimate_cost(dimensions: Dimensions, cost_per_pixel: NonZeroU32) -> u64 {
    let area = match dimensions {
        Dimensions::Pixels { width, height } => f64::from(width) * f64::from(height),
        Dimensions::Logical { width, height } => width.max(0.0) * height.max(0.0),
    };
    let cost = (area * f64::from(cost_per_pixel.get()) * COST_OVERHEAD_FACTOR).round();
    // `as` saturates for out-of-range floats and maps NaN to zero.
    cost as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const RGBA: NonZeroU32 = NonZeroU32::new(4).unwrap();

    #[rstest]
    #[case(Dimensions::Pixels { width: 100, height: 100 }, 44_000)]
    #[case(Dimensions::Pixels { width: 1, height: 1 }, 4)]
    #[case(Dimensions::Pixels { width: 0, height: 100 }, 0)]
    #[case(Dimensions::Logical { width: 10.0, height: 10.0 }, 440)]
    #[case(Dimensions::Logical { width: -3.0, height: 10.0 }, 0)]
    #[case(Dimensions::Logical { width: f64::NAN, height: 10.0 }, 0)]
    fn test_estimate_cost(#[case] dimensions: Dimensions, #[case] expected: u64) {
        assert_eq!(estimate_cost(dimensions, RGBA), expected);
    }

    #[test]
    fn test_cost_grows_with_area() {
        let small = estimate_cost((50, 50).into(), RGBA);
        let large = estimate_cost((500, 500).into(), RGBA);
        assert!(large > small);
    }

    #[test]
    fn test_cost_scales_with_bytes_per_pixel() {
        let rgba = estimate_cost((100, 100).into(), RGBA);
        let grey = estimate_cost((100, 100).into(), NonZeroU32::MIN);
        assert_eq!(rgba, grey * 4);
    }
}
