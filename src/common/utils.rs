//! Utility functions for shardkv

/// Get current Unix timestamp (milliseconds)
pub fn timestamp_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> crate::Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(crate::Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        s.split_at(s.len() - s.chars().last().map_or(0, char::len_utf8))
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| crate::Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let seconds = |factor: u64| {
        num.checked_mul(factor)
            .map(std::time::Duration::from_secs)
            .ok_or_else(|| crate::Error::InvalidConfig(format!("duration too large: {}", s)))
    };

    match unit {
        "ms" => Ok(std::time::Duration::from_millis(num)),
        "s" => Ok(std::time::Duration::from_secs(num)),
        "m" => seconds(60),
        "h" => seconds(3600),
        _ => Err(crate::Error::InvalidConfig(format!(
            "unknown duration unit: {}",
            unit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        assert!(parse_duration(&format!("{}h", u64::MAX)).is_err());
        assert!(parse_duration(&format!("{}m", u64::MAX / 2)).is_err());
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_timestamp_is_recent() {
        // 2020-01-01 in millis
        assert!(timestamp_now_millis() > 1_577_836_800_000);
    }
}
