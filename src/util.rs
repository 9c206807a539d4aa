use crate::error::app_error::AppError;
use chrono::offset::LocalResult;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Santiago;

/// Current civil date in Chile, `YYYY-MM-DD`.
pub fn santiago_today() -> String {
    Utc::now().with_timezone(&Santiago).format("%Y-%m-%d").to_string()
}

/// Convert a Chilean wall-clock date + time into a UTC instant string.
///
/// The portal reports all times as local wall-clock values; `date` is
/// `YYYY-MM-DD` (current civil date when absent) and `time` is `HH:MM:SS`.
/// Output is `YYYY-MM-DDTHH:MM:SSZ`.
pub fn santiago_to_utc(date: Option<&str>, time: &str) -> Result<String, AppError> {
    let date = match date {
        Some(d) => d.to_string(),
        None => santiago_today(),
    };

    let combined = format!("{} {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&combined, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| AppError::format(format!("'{}': {}", combined, e)))?;

    // DST fall-back repeats one local hour; resolve to the first occurrence.
    let local = match Santiago.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, _) => first,
        LocalResult::None => {
            return Err(AppError::format(format!(
                "'{}' does not exist in America/Santiago",
                combined
            )));
        }
    };

    Ok(local.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string())
}
