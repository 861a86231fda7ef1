//! Timestamp parsing strategies for the CSV serializer variants

use chrono::{DateTime, NaiveDateTime};

/// Month abbreviations substituted literally before numeric parsing.
/// Covers English plus the French forms seen in exported plant archives.
const MONTHS: &[(&str, &str)] = &[
    ("jan", "01"),
    ("feb", "02"),
    ("fev", "02"),
    ("mar", "03"),
    ("apr", "04"),
    ("avr", "04"),
    ("may", "05"),
    ("mai", "05"),
    ("jun", "06"),
    ("jul", "07"),
    ("aug", "08"),
    ("aou", "08"),
    ("sep", "09"),
    ("oct", "10"),
    ("nov", "11"),
    ("dec", "12"),
];

/// Strategy for turning a timestamp token into epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// Integer epoch milliseconds
    EpochMillis,
    /// Integer epoch seconds
    EpochSeconds,
    /// ISO-8601, with or without fractional seconds and offset;
    /// offset-less values are read as UTC
    Iso8601,
    /// `dd-MMM-yyyy HH:MM:SS[.fff]` with a non-numeric month abbreviation
    MonthName,
}

impl TimestampFormat {
    /// Parse a token into epoch milliseconds
    pub fn parse(&self, token: &str) -> Option<i64> {
        let token = token.trim();
        match self {
            TimestampFormat::EpochMillis => token.parse::<i64>().ok(),
            TimestampFormat::EpochSeconds => {
                token.parse::<i64>().ok().and_then(|s| s.checked_mul(1000))
            }
            TimestampFormat::Iso8601 => parse_iso8601(token),
            TimestampFormat::MonthName => parse_month_name(token),
        }
    }

    /// Whether a token looks like this format, used for auto-detection.
    ///
    /// Stricter than `parse` where formats would otherwise overlap: epoch
    /// milliseconds and epoch seconds are both plain integers, so they are
    /// discriminated by magnitude.
    pub fn matches(&self, token: &str) -> bool {
        let token = token.trim();
        match self {
            TimestampFormat::EpochMillis => {
                matches!(token.parse::<i64>(), Ok(v) if v.abs() >= 100_000_000_000)
            }
            TimestampFormat::EpochSeconds => {
                matches!(token.parse::<i64>(), Ok(v) if v.abs() < 100_000_000_000)
            }
            _ => self.parse(token).is_some(),
        }
    }
}

fn parse_iso8601(token: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(token, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

fn parse_month_name(token: &str) -> Option<i64> {
    let lower = token.to_lowercase();
    let substituted = MONTHS
        .iter()
        .find(|(name, _)| lower.contains(name))
        .map(|(name, number)| lower.replacen(name, number, 1))?;
    for format in ["%d-%m-%Y %H:%M:%S%.f", "%d-%m-%y %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&substituted, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis() {
        assert_eq!(
            TimestampFormat::EpochMillis.parse("1577836800000"),
            Some(1_577_836_800_000)
        );
        assert!(TimestampFormat::EpochMillis.parse("not-a-number").is_none());
    }

    #[test]
    fn epoch_seconds_scaled_to_millis() {
        assert_eq!(
            TimestampFormat::EpochSeconds.parse("1577836800"),
            Some(1_577_836_800_000)
        );
    }

    #[test]
    fn epoch_detection_discriminates_by_magnitude() {
        assert!(TimestampFormat::EpochMillis.matches("1577836800000"));
        assert!(!TimestampFormat::EpochMillis.matches("1577836800"));
        assert!(TimestampFormat::EpochSeconds.matches("1577836800"));
        assert!(!TimestampFormat::EpochSeconds.matches("1577836800000"));
    }

    #[test]
    fn iso8601_with_offset() {
        assert_eq!(
            TimestampFormat::Iso8601.parse("2020-01-01T01:00:00+01:00"),
            Some(1_577_836_800_000)
        );
    }

    #[test]
    fn iso8601_fractional_and_offsetless() {
        assert_eq!(
            TimestampFormat::Iso8601.parse("2020-01-01T00:00:00.250"),
            Some(1_577_836_800_250)
        );
        assert_eq!(
            TimestampFormat::Iso8601.parse("2020-01-01 00:00:00"),
            Some(1_577_836_800_000)
        );
    }

    #[test]
    fn month_name_substitution() {
        assert_eq!(
            TimestampFormat::MonthName.parse("01-JAN-2020 00:00:00"),
            Some(1_577_836_800_000)
        );
        assert_eq!(
            TimestampFormat::MonthName.parse("01-jan-2020 00:00:00.500"),
            Some(1_577_836_800_500)
        );
        // French abbreviation
        assert_eq!(
            TimestampFormat::MonthName.parse("01-AVR-2020 00:00:00"),
            TimestampFormat::Iso8601.parse("2020-04-01T00:00:00Z")
        );
        assert!(TimestampFormat::MonthName.parse("2020-01-01").is_none());
    }
}
