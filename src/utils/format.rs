//! Human-readable time formatting shared by the surfaces

/// Format milliseconds as `MM:SS`, rounding partial seconds up.
///
/// Rounding up keeps `00:00` for the moment the countdown actually ends.
pub fn format_countdown(ms: u64) -> String {
    let total_secs = ms.div_ceil(1000);
    let m = total_secs / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}", m, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_countdown(0), "00:00");
        assert_eq!(format_countdown(1), "00:01");
        assert_eq!(format_countdown(59_001), "01:00");
        assert_eq!(format_countdown(25 * 60_000), "25:00");
        assert_eq!(format_countdown(125 * 60_000), "125:00");
    }
}
