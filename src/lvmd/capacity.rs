//! Capacity accounting
//!
//! Free-space computation per device class and allocation-size rounding.
//! Thick classes report the VG free space minus the configured spare;
//! thin classes report logical capacity (pool size times the
//! over-provision ratio) minus the committed virtual size.

use crate::domain::Lvm;
use crate::error::{Error, Result};
use crate::lvmd::device_class::{DeviceClass, DeviceClassKind};

/// Allocation rounding unit when a class has no stripe size.
pub const DEFAULT_ALLOCATION_UNIT: u64 = 1 << 20;

/// Round `size` up to the next multiple of `unit`.
pub fn round_up(size: u64, unit: u64) -> u64 {
    size.div_ceil(unit) * unit
}

/// Parse a size string with an optional binary suffix (`b`, `k`, `m`, `g`).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last() {
        Some('b' | 'B') => (&s[..s.len() - 1], 1u64),
        Some('k' | 'K') => (&s[..s.len() - 1], 1 << 10),
        Some('m' | 'M') => (&s[..s.len() - 1], 1 << 20),
        Some('g' | 'G') => (&s[..s.len() - 1], 1 << 30),
        _ => (s, 1),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::Configuration(format!("malformed size: {s:?}")))?;
    Ok(value * multiplier)
}

/// The rounding unit for allocations in a class: its stripe size, or 1 MiB.
pub fn allocation_unit(dc: &DeviceClass) -> Result<u64> {
    if dc.stripe_size.is_empty() {
        Ok(DEFAULT_ALLOCATION_UNIT)
    } else {
        parse_size(&dc.stripe_size)
    }
}

/// Free bytes available to new allocations in a device class.
pub async fn free_bytes(lvm: &dyn Lvm, dc: &DeviceClass) -> Result<u64> {
    match dc.kind {
        DeviceClassKind::Thick => {
            let vg = lvm.volume_group(&dc.volume_group).await?;
            Ok(vg.free_bytes.saturating_sub(dc.spare_bytes()))
        }
        DeviceClassKind::Thin => {
            let pool_config = dc.thin_pool.as_ref().ok_or_else(|| {
                Error::Configuration(format!("thin device class {} without thin-pool", dc.name))
            })?;
            let pool = lvm.thin_pool(&dc.volume_group, &pool_config.name).await?;
            let logical =
                (pool.size_bytes as f64 * pool_config.overprovision_ratio).floor() as u64;
            Ok(logical.saturating_sub(pool.virtual_used_bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lvm::testing::FakeLvm;
    use crate::lvmd::device_class::ThinPoolConfig;

    #[test]
    fn test_round_up() {
        let mib = DEFAULT_ALLOCATION_UNIT;
        assert_eq!(round_up(1, mib), mib);
        assert_eq!(round_up(mib, mib), mib);
        assert_eq!(round_up(mib + 1, mib), 2 * mib);
        assert_eq!(round_up(1000, 512), 1024);
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("4096b").unwrap(), 4096);
        assert_eq!(parse_size("64k").unwrap(), 64 << 10);
        assert_eq!(parse_size("8M").unwrap(), 8 << 20);
        assert_eq!(parse_size("1g").unwrap(), 1 << 30);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("").is_err());
    }

    #[tokio::test]
    async fn test_thick_free_subtracts_spare() {
        let lvm = FakeLvm::new();
        lvm.add_vg("myvg1", 100 << 30, 30 << 30);

        let mut dc = DeviceClass::test_thick();
        dc.name = "ssd".into();
        dc.volume_group = "myvg1".into();
        dc.spare_gb = 10;

        assert_eq!(free_bytes(&lvm, &dc).await.unwrap(), 20 << 30);
    }

    #[tokio::test]
    async fn test_thick_free_floors_at_zero() {
        let lvm = FakeLvm::new();
        lvm.add_vg("myvg1", 100 << 30, 5 << 30);

        let mut dc = DeviceClass::test_thick();
        dc.name = "ssd".into();
        dc.volume_group = "myvg1".into();
        dc.spare_gb = 10;

        assert_eq!(free_bytes(&lvm, &dc).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_thin_free_overprovisions() {
        let lvm = FakeLvm::new();
        lvm.add_vg("myvg2", 100 << 30, 50 << 30);
        lvm.add_pool("myvg2", "pool0", 10 << 30);

        let mut dc = DeviceClass::test_thick();
        dc.name = "fast".into();
        dc.volume_group = "myvg2".into();
        dc.kind = DeviceClassKind::Thin;
        dc.thin_pool = Some(ThinPoolConfig {
            name: "pool0".into(),
            overprovision_ratio: 10.0,
        });

        // 10 GiB pool at ratio 10 advertises 100 GiB of logical space.
        assert_eq!(free_bytes(&lvm, &dc).await.unwrap(), 100 << 30);
    }
}
