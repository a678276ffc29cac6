//! Conversion between a user's local time and the reference timezone.
//!
//! Offsets are whole hours relative to the reference timezone, positive when
//! the user is ahead of it.

use std::ops::RangeInclusive;

use chrono::{
    Duration, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;

/// Offsets a user may pick.
pub const OFFSET_RANGE: RangeInclusive<i32> = -12..=12;

/// Offsets offered by the `/set_timezone` keyboard.
pub const OFFSET_CHOICES: [i32; 9] = [-3, -2, -1, 0, 1, 2, 3, 4, 5];

/// Parse user input like `09:30` or `09:30:15`. Seconds are dropped.
pub fn parse_time_input(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    NaiveTime::parse_from_str(text, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .ok()
        .and_then(|t| t.with_second(0))
}

/// Parse a stored `HH:MM` value.
pub fn parse_hh_mm(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M").ok()
}

pub fn format_hh_mm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Convert a local time of a user `offset` hours ahead of the reference
/// timezone into the reference timezone. Wraps around midnight.
pub fn to_reference(local: NaiveTime, offset: i32) -> String {
    format_hh_mm(local - Duration::hours(offset.into()))
}

/// Inverse of [`to_reference`].
pub fn from_reference(reference: NaiveTime, offset: i32) -> String {
    format_hh_mm(reference + Duration::hours(offset.into()))
}

/// Current wall-clock time in the reference timezone.
pub fn reference_now(tz: Tz) -> NaiveDateTime {
    Utc::now().with_timezone(&tz).naive_local()
}

/// Current UTC offset of the reference timezone, in whole hours.
pub fn reference_utc_hours(tz: Tz) -> i32 {
    tz.offset_from_utc_datetime(&Utc::now().naive_utc()).fix().local_minus_utc()
        / 3600
}

/// Button label for an offset, e.g. `UTC+5 (+2 h)`.
pub fn offset_label(reference_utc_hours: i32, offset: i32) -> String {
    let utc = reference_utc_hours + offset;
    if offset == 0 {
        format!("UTC{utc:+} (reference)")
    } else {
        format!("UTC{utc:+} ({offset:+} h)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> NaiveTime {
        parse_time_input(s).unwrap()
    }

    #[test]
    fn test_parse_time_input() {
        assert_eq!(t("09:30"), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(t(" 18:05 "), NaiveTime::from_hms_opt(18, 5, 0).unwrap());
        assert_eq!(t("23:59:59"), NaiveTime::from_hms_opt(23, 59, 0).unwrap());
        assert_eq!(parse_time_input("24:00"), None);
        assert_eq!(parse_time_input("12:60"), None);
        assert_eq!(parse_time_input("noon"), None);
        assert_eq!(parse_time_input(""), None);
    }

    #[test]
    fn test_to_reference() {
        assert_eq!(to_reference(t("10:00"), 2), "08:00");
        assert_eq!(to_reference(t("10:00"), 0), "10:00");
        assert_eq!(to_reference(t("01:15"), 3), "22:15");
        assert_eq!(to_reference(t("23:00"), -3), "02:00");
        assert_eq!(to_reference(t("09:05"), -1), "10:05");
    }

    #[test]
    fn to_reference_is_always_hh_mm() {
        for offset in OFFSET_RANGE {
            for hour in 0..24 {
                for minute in [0, 7, 30, 59] {
                    let local =
                        NaiveTime::from_hms_opt(hour, minute, 0).unwrap();
                    let out = to_reference(local, offset);
                    assert_eq!(out.len(), 5, "{out}");
                    assert_eq!(&out[2..3], ":");
                    let parsed = parse_hh_mm(&out).unwrap();
                    assert_eq!(parsed.minute(), minute);
                    assert_eq!(
                        from_reference(parsed, offset),
                        format_hh_mm(local)
                    );
                }
            }
        }
    }

    #[test]
    fn test_offset_label() {
        assert_eq!(offset_label(3, 0), "UTC+3 (reference)");
        assert_eq!(offset_label(3, 2), "UTC+5 (+2 h)");
        assert_eq!(offset_label(3, -3), "UTC+0 (-3 h)");
    }

    #[test]
    fn moscow_is_utc_plus_three() {
        assert_eq!(reference_utc_hours(chrono_tz::Europe::Moscow), 3);
    }
}
