use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Cost limit applied under [`Critical`](MemoryPressureLevel::Critical) pressure.
pub const CRITICAL_COST_FLOOR: u64 = 50 * 1024 * 1024;
/// Share of the configured cost limit kept under [`Warning`](MemoryPressureLevel::Warning) pressure.
pub const WARNING_COST_PERCENT: u64 = 60;

/// Coarse host memory pressure signal.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    #[default]
    #[display("normal")]
    Normal,
    #[display("warning")]
    Warning,
    #[display("critical")]
    Critical,
}

impl MemoryPressureLevel {
    /// Whether the level warrants telling the user.
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::Normal)
    }

    /// Cost limit in force at this level for a configured limit.
    pub fn cost_limit(&self, configured: u64) -> u64 {
        match self {
            Self::Normal => configured,
            Self::Warning => (u128::from(configured) * u128::from(WARNING_COST_PERCENT) / 100) as u64,
            Self::Critical => configured.min(CRITICAL_COST_FLOOR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(MemoryPressureLevel::Normal, 1000, 1000)]
    #[case(MemoryPressureLevel::Warning, 1000, 600)]
    #[case(MemoryPressureLevel::Warning, 0, 0)]
    #[case(MemoryPressureLevel::Critical, 1000, 1000)]
    #[case(MemoryPressureLevel::Critical, 5000 * 1024 * 1024, CRITICAL_COST_FLOOR)]
    fn test_cost_limit(#[case] level: MemoryPressureLevel, #[case] configured: u64, #[case] expected: u64) {
        assert_eq!(level.cost_limit(configured), expected);
    }

    #[test]
    fn test_elevated() {
        assert!(!MemoryPressureLevel::Normal.is_elevated());
        assert!(MemoryPressureLevel::Warning.is_elevated());
        assert!(MemoryPressureLevel::Critical.is_elevated());
    }
}
