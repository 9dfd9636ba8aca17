use std::time::Duration;

/// Time unit accepted in duration shorthands (`"250ms"`, `"2s"`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    fn to_millis(&self, value: u64) -> u64 {
        match self {
            TimeUnit::Milliseconds => value,
            TimeUnit::Seconds => value.saturating_mul(1000),
            TimeUnit::Minutes => value.saturating_mul(60_000),
            TimeUnit::Hours => value.saturating_mul(3_600_000),
            TimeUnit::Days => value.saturating_mul(86_400_000),
        }
    }

    /// Parse a duration string like "5s", "10m", "2h", "500ms" or a plain
    /// number of milliseconds ("250").
    ///
    /// Strict rules:
    /// - Only lowercase suffixes are accepted: "ms", "s", "m", "h", "d"
    /// - Format must be: <number><suffix> with no space in between
    pub(crate) fn parse_duration(s: &str) -> Option<Duration> {
        let s = s.trim();

        let split_pos = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        if split_pos == 0 {
            return None;
        }

        let (num_str, unit_str) = s.split_at(split_pos);
        let value = num_str.parse::<u64>().ok()?;

        let time_unit = match unit_str {
            "" | "ms" => TimeUnit::Milliseconds,
            "s" => TimeUnit::Seconds,
            "m" => TimeUnit::Minutes,
            "h" => TimeUnit::Hours,
            "d" => TimeUnit::Days,
            _ => return None,
        };

        Some(Duration::from_millis(time_unit.to_millis(value)))
    }
}
