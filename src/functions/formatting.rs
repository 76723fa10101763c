#[inline]
pub fn int_to_readable_byte_string(bytes: u64) -> String {
    let (value, unit) = if bytes < 1024 {
        (bytes as f32, "B")
    } else if bytes < 1024 * 1024 {
        (bytes as f32 / 1024.0, "KB")
    } else if bytes < 1024 * 1024 * 1024 {
        (bytes as f32 / (1024.0 * 1024.0), "MB")
    } else {
        (bytes as f32 / (1024.0 * 1024.0 * 1024.0), "GB")
    };

    if unit == "B" {
        format!("{value} {unit}")
    } else {
        format!("{value:.1} {unit}")
    }
}

/// "3.9 GB / 15.5 GB"
pub fn used_of_total(used: u64, total: u64) -> String {
    format!(
        "{} / {}",
        int_to_readable_byte_string(used),
        int_to_readable_byte_string(total)
    )
}

/// "2d 4h 13m", "4h 13m" or "13m"
pub fn uptime_string(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_strings() {
        assert_eq!(int_to_readable_byte_string(512), "512 B");
        assert_eq!(int_to_readable_byte_string(1536), "1.5 KB");
        assert_eq!(int_to_readable_byte_string(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(
            used_of_total(1024 * 1024, 2 * 1024 * 1024 * 1024),
            "1.0 MB / 2.0 GB"
        );
    }

    #[test]
    fn test_uptime_string() {
        assert_eq!(uptime_string(59), "0m");
        assert_eq!(uptime_string(4 * 3600 + 13 * 60), "4h 13m");
        assert_eq!(uptime_string(2 * 86_400 + 4 * 3600 + 13 * 60 + 5), "2d 4h 13m");
    }
}
