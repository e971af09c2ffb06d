//! Human-readable byte sizes.

/// Formats a byte count with binary units (1024 divisor), two decimals.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_in_bytes_below_one_kilobyte() {
        assert_eq!(format_size(0), "0.00 B");
        assert_eq!(format_size(1023), "1023.00 B");
    }

    #[test]
    fn switches_units_at_powers_of_1024() {
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(16 * 1024 * 1024 * 1024), "16.00 GB");
    }

    #[test]
    fn everything_huge_lands_in_petabytes() {
        assert_eq!(format_size(1 << 50), "1.00 PB");
        assert_eq!(format_size(1 << 60), "1024.00 PB");
    }
}
