use crate::constants::FILE_TIMESTAMP_FORMAT;
use chrono::{DateTime, FixedOffset, TimeZone};
use chrono_tz::Asia::Colombo;
use std::path::PathBuf;

/// Get data directory from environment variable or use default
pub fn get_data_dir() -> PathBuf {
    std::env::var("CSE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Convert any instant to exchange local time (fixed UTC+5:30 offset)
pub fn to_exchange_time<Tz: TimeZone>(instant: &DateTime<Tz>) -> DateTime<FixedOffset> {
    instant.with_timezone(&Colombo).fixed_offset()
}

/// File stem for a poll instant, truncated to the minute in exchange local time
pub fn minute_file_stem<Tz: TimeZone>(instant: &DateTime<Tz>) -> String {
    to_exchange_time(instant).format(FILE_TIMESTAMP_FORMAT).to_string()
}
