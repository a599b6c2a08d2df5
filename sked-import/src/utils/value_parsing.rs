//! Lenient parsers for spreadsheet cell text
//!
//! Shared by type detection, transformations and row validation so all three
//! agree on what counts as a number, a time or a boolean.

use chrono::{NaiveDate, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;

/// Literals recognized as booleans (compared lower-cased)
pub const TRUE_LITERALS: &[&str] = &["true", "yes", "y", "1", "on", "t"];
pub const FALSE_LITERALS: &[&str] = &["false", "no", "n", "0", "off", "f"];

static DATE_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4})([ T].*)?$")
        .expect("valid date regex")
});

static TIME_SHAPED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d{1,2}[:.]\d{2}(:\d{2})?\s*(am|pm)?$|^\d{1,2}\s*(am|pm)$")
        .expect("valid time regex")
});

static HOUR_MERIDIEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})\s*(AM|PM)$").expect("valid meridiem regex"));

const TIME_FORMATS: &[&str] = &["%H:%M", "%H:%M:%S", "%H.%M", "%I:%M %p", "%I:%M%p", "%I:%M:%S %p"];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y", "%m/%d/%Y", "%d/%m/%y",
    "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y",
];

/// `true` when the text looks like a calendar date (2024-01-31, 31/01/2024, ...)
pub fn is_date_shaped(text: &str) -> bool {
    DATE_SHAPED.is_match(text.trim())
}

/// `true` when the text looks like a clock time (09:00, 9.30, 2pm, ...)
pub fn is_time_shaped(text: &str) -> bool {
    TIME_SHAPED.is_match(text.trim())
}

/// Parse a number, tolerating thousands separators and surrounding spaces
///
/// Date-shaped strings are rejected even when a prefix would parse.
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_date_shaped(trimmed) {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != ',' && *c != '_').collect();
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn parse_boolean(text: &str) -> Option<bool> {
    let lower = text.trim().to_lowercase();
    if TRUE_LITERALS.contains(&lower.as_str()) {
        Some(true)
    } else if FALSE_LITERALS.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Parse a clock time in any of the accepted layouts
///
/// Also accepts compact 24h forms like `0930`.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let upper = trimmed.to_uppercase();
    for format in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(&upper, format) {
            return Some(t);
        }
    }

    // "2pm": chrono insists on a minute field
    if let Some(caps) = HOUR_MERIDIEM.captures(&upper) {
        let hour: u32 = caps[1].parse().ok()?;
        if !(1..=12).contains(&hour) {
            return None;
        }
        let hour24 = match (&caps[2], hour) {
            ("AM", 12) => 0,
            ("AM", h) => h,
            ("PM", 12) => 12,
            (_, h) => h + 12,
        };
        return NaiveTime::from_hms_opt(hour24, 0, 0);
    }

    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let hours: u32 = trimmed[..2].parse().ok()?;
        let minutes: u32 = trimmed[2..].parse().ok()?;
        return NaiveTime::from_hms_opt(hours, minutes, 0);
    }

    None
}

/// Convert a spreadsheet day fraction (0.375 = 09:00) to a time
pub fn time_from_day_fraction(fraction: f64) -> Option<NaiveTime> {
    if !(0.0..1.0).contains(&fraction) {
        return None;
    }
    let total_minutes = (fraction * 24.0 * 60.0).round() as u32;
    NaiveTime::from_hms_opt(total_minutes / 60, total_minutes % 60, 0)
}

/// Time from a numeric cell: a day fraction (0.375) or compact `HHMM` (930)
pub fn time_from_number(n: f64) -> Option<NaiveTime> {
    if (0.0..1.0).contains(&n) {
        return time_from_day_fraction(n);
    }
    if n.fract() != 0.0 || !(0.0..2400.0).contains(&n) {
        return None;
    }
    let compact = n as u32;
    NaiveTime::from_hms_opt(compact / 100, compact % 100, 0)
}

/// Integer literal with a significant leading zero (`0900`, `007`)
pub fn has_leading_zero(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() > 1 && trimmed.starts_with('0') && trimmed.chars().all(|c| c.is_ascii_digit())
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    let date_part = trimmed.split(['T', ' ']).next().unwrap_or(trimmed);
    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(d);
        }
        if let Ok(d) = NaiveDate::parse_from_str(date_part, format) {
            return Some(d);
        }
    }
    None
}

/// Day of week as 1 (Monday) ..= 7 (Sunday)
pub fn parse_day_of_week(text: &str) -> Option<u8> {
    let lower = text.trim().to_lowercase();
    let day = match lower.as_str() {
        "mon" | "monday" | "1" => 1,
        "tue" | "tues" | "tuesday" | "2" => 2,
        "wed" | "wednesday" | "3" => 3,
        "thu" | "thur" | "thurs" | "thursday" | "4" => 4,
        "fri" | "friday" | "5" => 5,
        "sat" | "saturday" | "6" => 6,
        "sun" | "sunday" | "7" => 7,
        _ => return None,
    };
    Some(day)
}

pub fn day_name(day: u8) -> Option<&'static str> {
    match day {
        1 => Some("Monday"),
        2 => Some("Tuesday"),
        3 => Some("Wednesday"),
        4 => Some("Thursday"),
        5 => Some("Friday"),
        6 => Some("Saturday"),
        7 => Some("Sunday"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number_rejects_dates() {
        assert_eq!(parse_number("1,200"), Some(1200.0));
        assert_eq!(parse_number(" 42.5 "), Some(42.5));
        assert_eq!(parse_number("2024-01-31"), None);
        assert_eq!(parse_number("12/03/2024"), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }

    #[test]
    fn test_parse_time_layouts() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(parse_time("09:00"), Some(nine));
        assert_eq!(parse_time("9:00"), Some(nine));
        assert_eq!(parse_time("9:00 am"), Some(nine));
        assert_eq!(parse_time("0900"), Some(nine));
        assert_eq!(parse_time("2pm"), NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(parse_time("25:00"), None);
        assert_eq!(parse_time("lunch"), None);
    }

    #[test]
    fn test_day_fraction() {
        assert_eq!(time_from_day_fraction(0.375), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(time_from_day_fraction(1.5), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        assert_eq!(parse_date("2024-01-31"), Some(expected));
        assert_eq!(parse_date("31/01/2024"), Some(expected));
        assert_eq!(parse_date("2024-01-31T10:00:00"), Some(expected));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn test_day_of_week() {
        assert_eq!(parse_day_of_week("Monday"), Some(1));
        assert_eq!(parse_day_of_week(" thu "), Some(4));
        assert_eq!(parse_day_of_week("7"), Some(7));
        assert_eq!(parse_day_of_week("someday"), None);
        assert_eq!(day_name(3), Some("Wednesday"));
    }

    #[test]
    fn test_boolean_literals() {
        assert_eq!(parse_boolean("Yes"), Some(true));
        assert_eq!(parse_boolean("off"), Some(false));
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_shapes() {
        assert!(is_date_shaped("2024/3/1"));
        assert!(is_time_shaped("10:30"));
        assert!(is_time_shaped("9.30"));
        assert!(is_time_shaped("14.00"));
        assert!(is_time_shaped("10am"));
        assert!(!is_time_shaped("1030am-ish"));
        assert!(has_leading_zero("0900"));
        assert!(!has_leading_zero("0"));
        assert!(!has_leading_zero("0.5"));
        assert!(!has_leading_zero("900"));
    }

    #[test]
    fn test_time_from_number() {
        assert_eq!(time_from_number(0.375), NaiveTime::from_hms_opt(9, 0, 0));
        assert_eq!(time_from_number(930.0), NaiveTime::from_hms_opt(9, 30, 0));
        assert_eq!(time_from_number(1400.0), NaiveTime::from_hms_opt(14, 0, 0));
        assert_eq!(time_from_number(975.0), None);
        assert_eq!(time_from_number(9.3), None);
    }
}
