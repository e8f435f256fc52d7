//! Capacity Quantizer
//!
//! Maps a requested byte count onto a capacity the backing service can
//! actually allocate. Each storage/deployment tier only accepts multiples of
//! a fixed GiB allocation unit, so requests are rounded up to the next unit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Bytes per GiB
pub const GIB: u64 = 1 << 30;

/// Smallest SSD allocation unit
const SSD_MIN_UNIT_GIB: u64 = 1200;
/// SSD unit for scratch-1 (or unset) deployments at or above 3600 GiB
const SSD_SCRATCH1_LARGE_UNIT_GIB: u64 = 3600;
/// SSD unit for every other deployment at or above 2400 GiB
const SSD_LARGE_UNIT_GIB: u64 = 2400;
/// HDD unit when provisioned at 12 MB/s/TiB
const HDD_12_UNIT_GIB: u64 = 6000;
/// HDD unit for any other throughput
const HDD_UNIT_GIB: u64 = 1800;
/// Throughput value selecting the large HDD unit
const HDD_LARGE_UNIT_THROUGHPUT: u32 = 12;

// =============================================================================
// Storage Type
// =============================================================================

/// Storage media of a backing filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    #[default]
    Ssd,
    Hdd,
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageType::Ssd => write!(f, "SSD"),
            StorageType::Hdd => write!(f, "HDD"),
        }
    }
}

impl FromStr for StorageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "SSD" => Ok(StorageType::Ssd),
            "HDD" => Ok(StorageType::Hdd),
            _ => Err(Error::InvalidParameter {
                key: "storageType".into(),
                value: s.into(),
                reason: "expected SSD or HDD".into(),
            }),
        }
    }
}

// =============================================================================
// Deployment Type
// =============================================================================

/// Deployment tier of a backing filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentType {
    #[serde(rename = "SCRATCH_1")]
    Scratch1,
    #[serde(rename = "SCRATCH_2")]
    Scratch2,
    #[serde(rename = "PERSISTENT_1")]
    Persistent1,
    #[serde(rename = "PERSISTENT_2")]
    Persistent2,
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentType::Scratch1 => write!(f, "SCRATCH_1"),
            DeploymentType::Scratch2 => write!(f, "SCRATCH_2"),
            DeploymentType::Persistent1 => write!(f, "PERSISTENT_1"),
            DeploymentType::Persistent2 => write!(f, "PERSISTENT_2"),
        }
    }
}

impl FromStr for DeploymentType {
    type Err = Error;

    /// Accepts both `SCRATCH_1` and `scratch-1` spellings
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "SCRATCH_1" => Ok(DeploymentType::Scratch1),
            "SCRATCH_2" => Ok(DeploymentType::Scratch2),
            "PERSISTENT_1" => Ok(DeploymentType::Persistent1),
            "PERSISTENT_2" => Ok(DeploymentType::Persistent2),
            _ => Err(Error::InvalidParameter {
                key: "deploymentType".into(),
                value: s.into(),
                reason: "expected one of SCRATCH_1, SCRATCH_2, PERSISTENT_1, PERSISTENT_2"
                    .into(),
            }),
        }
    }
}

// =============================================================================
// Tier Specification
// =============================================================================

/// The tier parameters that decide the allocation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TierSpec {
    pub deployment_type: Option<DeploymentType>,
    pub storage_type: Option<StorageType>,
    pub per_unit_storage_throughput: Option<u32>,
}

impl TierSpec {
    /// Allocation unit in GiB for a request of `requested_bytes`
    pub fn allocation_unit_gib(&self, requested_bytes: u64) -> u64 {
        match self.storage_type.unwrap_or_default() {
            StorageType::Hdd => {
                if self.per_unit_storage_throughput == Some(HDD_LARGE_UNIT_THROUGHPUT) {
                    HDD_12_UNIT_GIB
                } else {
                    HDD_UNIT_GIB
                }
            }
            StorageType::Ssd => match self.deployment_type {
                None | Some(DeploymentType::Scratch1) => {
                    if requested_bytes < SSD_SCRATCH1_LARGE_UNIT_GIB * GIB {
                        SSD_MIN_UNIT_GIB
                    } else {
                        SSD_SCRATCH1_LARGE_UNIT_GIB
                    }
                }
                Some(_) => {
                    if requested_bytes < SSD_LARGE_UNIT_GIB * GIB {
                        SSD_MIN_UNIT_GIB
                    } else {
                        SSD_LARGE_UNIT_GIB
                    }
                }
            },
        }
    }
}

// =============================================================================
// Quantization
// =============================================================================

/// Round `requested_bytes` up to a valid allocation, in GiB.
///
/// A request of zero bytes yields the minimum unit; exact multiples are
/// returned unchanged.
pub fn quantize_capacity_gib(requested_bytes: u64, tier: &TierSpec) -> u64 {
    let unit_gib = tier.allocation_unit_gib(requested_bytes);
    let units = requested_bytes.div_ceil(unit_gib * GIB).max(1);
    units * unit_gib
}

/// Convert GiB to bytes, saturating on overflow
#[inline]
pub fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(GIB)
}

/// Convert bytes to whole GiB, rounding up
#[inline]
pub fn bytes_to_gib_ceil(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tiers() -> Vec<TierSpec> {
        let deployments = [
            None,
            Some(DeploymentType::Scratch1),
            Some(DeploymentType::Scratch2),
            Some(DeploymentType::Persistent1),
            Some(DeploymentType::Persistent2),
        ];
        let mut tiers = Vec::new();
        for deployment_type in deployments {
            for storage_type in [None, Some(StorageType::Ssd), Some(StorageType::Hdd)] {
                for per_unit_storage_throughput in [None, Some(12), Some(40)] {
                    tiers.push(TierSpec {
                        deployment_type,
                        storage_type,
                        per_unit_storage_throughput,
                    });
                }
            }
        }
        tiers
    }

    #[test]
    fn test_one_byte_default_tier() {
        assert_eq!(quantize_capacity_gib(1, &TierSpec::default()), 1200);
    }

    #[test]
    fn test_zero_bytes_is_minimum_unit() {
        assert_eq!(quantize_capacity_gib(0, &TierSpec::default()), 1200);

        let hdd = TierSpec {
            storage_type: Some(StorageType::Hdd),
            ..Default::default()
        };
        assert_eq!(quantize_capacity_gib(0, &hdd), 1800);
    }

    #[test]
    fn test_hdd_throughput_12() {
        let tier = TierSpec {
            deployment_type: Some(DeploymentType::Persistent1),
            storage_type: Some(StorageType::Hdd),
            per_unit_storage_throughput: Some(12),
        };
        assert_eq!(quantize_capacity_gib(2000 * GIB, &tier), 6000);
        assert_eq!(quantize_capacity_gib(6001 * GIB, &tier), 12000);
    }

    #[test]
    fn test_hdd_other_throughput() {
        let tier = TierSpec {
            storage_type: Some(StorageType::Hdd),
            per_unit_storage_throughput: Some(40),
            ..Default::default()
        };
        assert_eq!(quantize_capacity_gib(2000 * GIB, &tier), 3600);
    }

    #[test]
    fn test_ssd_scratch1_boundaries() {
        let tier = TierSpec {
            deployment_type: Some(DeploymentType::Scratch1),
            ..Default::default()
        };
        assert_eq!(quantize_capacity_gib(1200 * GIB, &tier), 1200);
        assert_eq!(quantize_capacity_gib(1200 * GIB + 1, &tier), 2400);
        assert_eq!(quantize_capacity_gib(3599 * GIB, &tier), 3600);
        assert_eq!(quantize_capacity_gib(3600 * GIB, &tier), 3600);
        assert_eq!(quantize_capacity_gib(3600 * GIB + 1, &tier), 7200);
    }

    #[test]
    fn test_ssd_persistent_boundaries() {
        let tier = TierSpec {
            deployment_type: Some(DeploymentType::Persistent2),
            storage_type: Some(StorageType::Ssd),
            per_unit_storage_throughput: Some(125),
        };
        assert_eq!(quantize_capacity_gib(1000 * GIB, &tier), 1200);
        assert_eq!(quantize_capacity_gib(2399 * GIB, &tier), 2400);
        assert_eq!(quantize_capacity_gib(2400 * GIB, &tier), 2400);
        assert_eq!(quantize_capacity_gib(2401 * GIB, &tier), 4800);
    }

    #[test]
    fn test_quantize_never_shrinks_and_is_monotonic() {
        let step = 97 * GIB + 12_345;
        for tier in all_tiers() {
            let mut previous = 0;
            let mut requested = 0u64;
            while requested < 20_000 * GIB {
                let quantized = quantize_capacity_gib(requested, &tier);
                assert!(gib_to_bytes(quantized) >= requested, "{tier:?} {requested}");
                assert!(quantized >= previous, "{tier:?} {requested}");
                previous = quantized;
                requested += step;
            }
        }
    }

    #[test]
    fn test_quantize_is_idempotent() {
        for tier in all_tiers() {
            for gib in [0u64, 1, 1199, 1200, 1201, 2400, 3599, 3600, 5000, 6000, 13_000] {
                let once = quantize_capacity_gib(gib * GIB, &tier);
                let twice = quantize_capacity_gib(gib_to_bytes(once), &tier);
                assert_eq!(once, twice, "{tier:?} {gib}");
            }
        }
    }

    #[test]
    fn test_parse_tiers() {
        assert_eq!("hdd".parse::<StorageType>().unwrap(), StorageType::Hdd);
        assert_eq!(
            "scratch-1".parse::<DeploymentType>().unwrap(),
            DeploymentType::Scratch1
        );
        assert_eq!(
            "PERSISTENT_2".parse::<DeploymentType>().unwrap(),
            DeploymentType::Persistent2
        );
        assert!("nvme".parse::<StorageType>().is_err());
        assert!("scratch-3".parse::<DeploymentType>().is_err());
    }

    #[test]
    fn test_bytes_to_gib_ceil() {
        assert_eq!(bytes_to_gib_ceil(0), 0);
        assert_eq!(bytes_to_gib_ceil(1), 1);
        assert_eq!(bytes_to_gib_ceil(GIB), 1);
        assert_eq!(bytes_to_gib_ceil(GIB + 1), 2);
    }
}
