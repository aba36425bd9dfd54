use derive_more::Display;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Resampling quality from 1 (fastest) to 8 (best).
///
/// Out-of-range values are clamped rather than rejected.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(8);

    pub const fn new(level: u8) -> Self {
        match level {
            0 => Self::MIN,
            9.. => Self::MAX,
            level => Self(level),
        }
    }

    pub fn level(&self) -> u8 {
        self.0
    }

    /// 1-2 nearest neighbour, 3-4 bilinear, 5-8 Lanczos.
    pub fn filter(&self) -> FilterType {
        match self.0 {
            ..=2 => FilterType::Nearest,
            3..=4 => FilterType::Triangle,
            _ => FilterType::Lanczos3,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(4)
    }
}

impl From<u8> for Quality {
    fn from(level: u8) -> Self {
        Self::new(level)
    }
}

impl From<Quality> for u8 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 1)]
    #[case(1, 1)]
    #[case(4, 4)]
    #[case(8, 8)]
    #[case(200, 8)]
    fn test_clamping(#[case] input: u8, #[case] expected: u8) {
        assert_eq!(Quality::new(input).level(), expected);
    }

    #[rstest]
    #[case(1, FilterType::Nearest)]
    #[case(2, FilterType::Nearest)]
    #[case(3, FilterType::Triangle)]
    #[case(4, FilterType::Triangle)]
    #[case(5, FilterType::Lanczos3)]
    #[case(8, FilterType::Lanczos3)]
    fn test_filter(#[case] level: u8, #[case] expected: FilterType) {
        assert_eq!(Quality::new(level).filter(), expected);
    }

    #[test]
    fn test_default() {
        assert_eq!(Quality::default().level(), 4);
    }
}
