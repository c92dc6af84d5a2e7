//! Size arithmetic and human-readable formatting
//!
//! The destination stores every object as `total_shards` shards, each a whole
//! number of sectors, so the bytes actually consumed on the network differ from
//! the logical size. These helpers compute that footprint and render byte
//! counts and bit rates for log lines.

use chrono::TimeDelta;
use std::time::Duration;

/// Sector size of the destination network (4 MiB)
pub const SECTOR_SIZE: u64 = 1 << 22;

const BINARY_PREFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_PREFIXES: [&str; 6] = ["K", "M", "G", "T", "P", "E"];

/// Bytes consumed on the network by an object of `size` logical bytes
///
/// `ceil(size / (min_shards * SECTOR_SIZE)) * total_shards * SECTOR_SIZE`,
/// saturating instead of overflowing. Zero-byte objects consume nothing.
pub fn redundant_size(size: u64, min_shards: u32, total_shards: u32) -> u64 {
    let slab_size = u64::from(min_shards.max(1)).saturating_mul(SECTOR_SIZE);
    let slabs = size.div_ceil(slab_size);
    slabs
        .saturating_mul(u64::from(total_shards))
        .saturating_mul(SECTOR_SIZE)
}

/// Render a byte count with binary prefixes: `0 bytes`, `512 bytes`, `1.00 KiB`
pub fn format_byte_string(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} bytes", bytes);
    }

    let mut value = bytes as f64 / UNIT as f64;
    let mut exp = 0;
    while value >= UNIT as f64 && exp < BINARY_PREFIXES.len() - 1 {
        value /= UNIT as f64;
        exp += 1;
    }
    format!("{:.2} {}B", value, BINARY_PREFIXES[exp])
}

/// Render a transfer rate in bits per second with decimal prefixes
///
/// The rate is `bytes * 8 / whole seconds`. Anything that truncates to zero
/// seconds or less reports `0.00 bps`.
pub fn format_bps_string(bytes: u64, elapsed: TimeDelta) -> String {
    let secs = elapsed.num_seconds();
    if secs <= 0 {
        return "0.00 bps".to_string();
    }

    const UNIT: f64 = 1000.0;
    let mut bps = bytes as f64 * 8.0 / secs as f64;
    if bps < UNIT {
        return format!("{:.2} bps", bps);
    }

    let mut exp = 0;
    bps /= UNIT;
    while bps >= UNIT && exp < DECIMAL_PREFIXES.len() - 1 {
        bps /= UNIT;
        exp += 1;
    }
    format!("{:.2} {}bps", bps, DECIMAL_PREFIXES[exp])
}

/// [`format_bps_string`] for a std duration
pub fn format_bps(bytes: u64, elapsed: Duration) -> String {
    let elapsed = TimeDelta::from_std(elapsed).unwrap_or(TimeDelta::MAX);
    format_bps_string(bytes, elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redundant_size() {
        assert_eq!(redundant_size(0, 10, 30), 0);
        assert_eq!(redundant_size(1, 10, 30), 30 * SECTOR_SIZE);
        assert_eq!(redundant_size(10 * SECTOR_SIZE, 10, 30), 30 * SECTOR_SIZE);
        assert_eq!(redundant_size(10 * SECTOR_SIZE + 1, 10, 30), 60 * SECTOR_SIZE);
        assert_eq!(redundant_size(SECTOR_SIZE, 1, 1), SECTOR_SIZE);
    }

    #[test]
    fn test_redundant_size_saturates() {
        assert_eq!(redundant_size(u64::MAX, 1, u32::MAX), u64::MAX);
    }

    #[test]
    fn test_redundant_size_is_sector_multiple() {
        for size in [1, 4095, SECTOR_SIZE - 1, 7 * SECTOR_SIZE + 3, 123_456_789] {
            let redundant = redundant_size(size, 3, 7);
            assert_eq!(redundant % SECTOR_SIZE, 0);
            assert!(redundant >= size);
        }
    }

    #[test]
    fn test_redundant_size_covers_expansion_and_is_monotonic() {
        let sizes: Vec<u64> = (0..64u64)
            .map(|i| i * (SECTOR_SIZE / 3))
            .chain([SECTOR_SIZE * 100 - 1, SECTOR_SIZE * 100, SECTOR_SIZE * 100 + 1])
            .collect();

        for (m, t) in [(1, 1), (1, 3), (2, 5), (3, 7), (10, 30), (29, 30), (30, 30)] {
            let mut previous = 0;
            for &size in &sizes {
                let redundant = redundant_size(size, m, t);
                assert!(
                    u128::from(redundant) * u128::from(m) >= u128::from(size) * u128::from(t),
                    "size {} with {}-of-{} gave {}",
                    size,
                    m,
                    t,
                    redundant
                );
                assert!(redundant >= previous, "not monotonic at size {}", size);
                previous = redundant;
            }
        }
    }

    #[test]
    fn test_format_byte_string() {
        assert_eq!(format_byte_string(0), "0 bytes");
        assert_eq!(format_byte_string(1023), "1023 bytes");
        assert_eq!(format_byte_string(1024), "1.00 KiB");
        assert_eq!(format_byte_string(1536), "1.50 KiB");
        assert_eq!(format_byte_string(SECTOR_SIZE), "4.00 MiB");
        assert_eq!(format_byte_string(1 << 40), "1.00 TiB");
        assert_eq!(format_byte_string(u64::MAX), "16.00 EiB");
    }

    #[test]
    fn test_format_bps_string() {
        assert_eq!(format_bps_string(100, TimeDelta::zero()), "0.00 bps");
        assert_eq!(format_bps_string(100, TimeDelta::seconds(-5)), "0.00 bps");
        assert_eq!(format_bps_string(100, TimeDelta::milliseconds(999)), "0.00 bps");
        assert_eq!(format_bps_string(100, TimeDelta::seconds(1)), "800.00 bps");
        assert_eq!(format_bps_string(125, TimeDelta::seconds(1)), "1.00 Kbps");
        assert_eq!(format_bps_string(125_000_000, TimeDelta::seconds(1)), "1.00 Gbps");
        assert_eq!(format_bps_string(3_000, TimeDelta::milliseconds(2_500)), "12.00 Kbps");
    }

    #[test]
    fn test_format_bps_std_duration() {
        assert_eq!(format_bps(125, Duration::from_secs(1)), "1.00 Kbps");
        assert_eq!(format_bps(125, Duration::from_millis(10)), "0.00 bps");
    }
}
