//! 统一的算力格式化工具

/// 格式化算力显示（智能单位自适应）
///
/// 根据数值大小自动选择 H/s 到 PH/s 之间最合适的单位，
/// 保证显示值落在 1-999 的可读范围内。
pub fn format_hashrate(hashrate: f64) -> String {
    if hashrate <= 0.0 {
        return "0.00 H/s".to_string();
    }

    if !hashrate.is_finite() {
        return "∞ H/s".to_string();
    }

    const UNITS: [(f64, &str); 5] = [
        (1e15, "PH/s"),
        (1e12, "TH/s"),
        (1e9, "GH/s"),
        (1e6, "MH/s"),
        (1e3, "KH/s"),
    ];

    for (scale, unit) in UNITS {
        if hashrate >= scale {
            let value = hashrate / scale;
            return if value >= 100.0 {
                format!("{:.1} {}", value, unit)
            } else if value >= 10.0 {
                format!("{:.2} {}", value, unit)
            } else {
                format!("{:.3} {}", value, unit)
            };
        }
    }

    format!("{:.2} H/s", hashrate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hashrate_units() {
        assert_eq!(format_hashrate(0.0), "0.00 H/s");
        assert_eq!(format_hashrate(512.0), "512.00 H/s");
        assert_eq!(format_hashrate(1234.0), "1.234 KH/s");
        assert_eq!(format_hashrate(1_234_567.0), "1.235 MH/s");
        assert_eq!(format_hashrate(12_345_678_901.0), "12.35 GH/s");
        assert_eq!(format_hashrate(123_456_789_012_345.0), "123.5 TH/s");
    }

    #[test]
    fn test_format_hashrate_degenerate_values() {
        assert_eq!(format_hashrate(-5.0), "0.00 H/s");
        assert_eq!(format_hashrate(f64::INFINITY), "∞ H/s");
    }
}
