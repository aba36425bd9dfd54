use crate::Settings;
use derive_more::Display;
use sysinfo::System;

/// Memory cache sizes below this are allowed but make the grid thrash.
pub const MINIMUM_CACHE_SIZE_MB: u64 = 500;
/// Share of physical memory the memory cache should stay under.
pub const PHYSICAL_MEMORY_CEILING_PERCENT: u64 = 80;

/// A setting that is usable but probably not what the user wants.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Warning {
    #[display("memory cache of {configured_mb} MB is below the recommended minimum of {minimum_mb} MB")]
    BelowMinimum { configured_mb: u64, minimum_mb: u64 },
    #[display("memory cache of {configured_mb} MB exceeds {percent}% of physical memory ({ceiling_mb} MB)")]
    ExceedsPhysicalMemory { configured_mb: u64, ceiling_mb: u64, percent: u64 },
    #[display("quality {_0} is outside 1-8 and will be clamped")]
    QualityOutOfRange(u8),
    #[display("no source file extensions are configured; batch runs will find nothing")]
    NoExtensions,
}

/// Total physical memory, if the platform reports it.
pub fn physical_memory_bytes() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    match system.total_memory() {
        0 => None,
        total => Some(total),
    }
}

impl Settings {
    /// Checks the settings against the host, logging every warning found.
    pub fn validate(&self) -> Vec<Warning> {
        let warnings = self.validate_against(physical_memory_bytes());
        for warning in &warnings {
            tracing::warn!(%warning, "Questionable setting");
        }
        warnings
    }

    /// Checks the settings against a known amount of physical memory.
    pub fn validate_against(&self, physical_memory: Option<u64>) -> Vec<Warning> {
        let mut warnings = Vec::new();
        let configured_mb = self.memory_cache_size_mb;
        if configured_mb < MINIMUM_CACHE_SIZE_MB {
            warnings.push(Warning::BelowMinimum { configured_mb, minimum_mb: MINIMUM_CACHE_SIZE_MB });
        }
        if let Some(physical) = physical_memory {
            let ceiling_mb = physical / (1024 * 1024) * PHYSICAL_MEMORY_CEILING_PERCENT / 100;
            if configured_mb > ceiling_mb {
                warnings.push(Warning::ExceedsPhysicalMemory {
                    configured_mb,
                    ceiling_mb,
                    percent: PHYSICAL_MEMORY_CEILING_PERCENT,
                });
            }
        }
        if !(1..=8).contains(&self.quality) {
            warnings.push(Warning::QualityOutOfRange(self.quality));
        }
        if self.extensions.is_empty() {
            warnings.push(Warning::NoExtensions);
        }
        warnings
    }
}
