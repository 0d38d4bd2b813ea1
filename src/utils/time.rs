// src/utils/time.rs

use chrono::{Datelike, TimeZone, Utc};

/// Current time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Start of the UTC calendar day containing `ms`, in epoch milliseconds.
pub fn day_start_ms(ms: i64) -> i64 {
    let dt = Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
    Utc.with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(ms)
}

/// Start of the UTC calendar month containing `ms`, in epoch milliseconds.
/// Monthly quota windows are anchored here.
pub fn month_start_ms(ms: i64) -> i64 {
    let dt = Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now);
    Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
        .single()
        .map(|d| d.timestamp_millis())
        .unwrap_or(ms)
}

/// Fractional hours to milliseconds. 0.5h is exactly 1_800_000 ms.
pub fn hours_to_ms(hours: f64) -> i64 {
    (hours * 3_600_000.0).round() as i64
}

pub fn days_to_ms(days: i64) -> i64 {
    days * 86_400_000
}

/// `YYYY-MM-DD` rendering for user-facing messages.
pub fn format_date(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// UTC hour of day (0..=23) for the working-hours gate.
pub fn hour_of_day(ms: i64) -> u32 {
    use chrono::Timelike;
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|d| d.hour())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-15T13:45:30Z
    const SAMPLE_MS: i64 = 1_710_510_330_000;

    #[test]
    fn day_and_month_boundaries() {
        let day = day_start_ms(SAMPLE_MS);
        let month = month_start_ms(SAMPLE_MS);
        assert_eq!(format_date(day), "2024-03-15");
        assert_eq!(format_date(month), "2024-03-01");
        assert_eq!(day % 1000, 0);
        assert!(month <= day && day <= SAMPLE_MS);
    }

    #[test]
    fn month_start_is_idempotent() {
        let month = month_start_ms(SAMPLE_MS);
        assert_eq!(month_start_ms(month), month);
    }

    #[test]
    fn fractional_hours() {
        assert_eq!(hours_to_ms(0.5), 1_800_000);
        assert_eq!(hours_to_ms(1.0), 3_600_000);
        assert_eq!(hours_to_ms(0.0), 0);
    }

    #[test]
    fn hour_extraction() {
        assert_eq!(hour_of_day(SAMPLE_MS), 13);
    }
}
