//! Chuyển đổi ngày: số serial kiểu bảng tính (gốc 1899-12-30) và chuỗi lịch.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, Utc};

use crate::Cell;

const CALENDAR_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%Y年%m月%d日",
    "%m/%d/%Y",
    "%d.%m.%Y",
];

const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];

fn serial_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or(NaiveDate::MIN)
}

/// Ngày ứng với số serial; phần lẻ (giờ trong ngày) bị bỏ.
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    serial_epoch().checked_add_days(Days::new(serial.floor() as u64))
}

pub fn date_to_serial(date: NaiveDate) -> i64 {
    date.signed_duration_since(serial_epoch()).num_days()
}

/// Đọc ngày dương lịch từ chuỗi ở các định dạng thường gặp.
pub fn parse_calendar_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc).date_naive());
    }

    CALENDAR_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(|dt| dt.date())
        })
}

/// Ngày của một ô: số được hiểu là serial, chuỗi được đọc như ngày dương lịch.
pub fn cell_date(cell: &Cell) -> Option<NaiveDate> {
    match cell {
        Cell::Empty => None,
        Cell::Number(serial) => serial_to_date(*serial),
        Cell::Text(text) => parse_calendar_date(text),
    }
}

/// Serial ngày của một ô; ô số giữ nguyên giá trị.
pub fn cell_serial(cell: &Cell) -> Option<f64> {
    match cell {
        Cell::Number(serial) => serial_to_date(*serial).map(|_| *serial),
        other => cell_date(other).map(|date| date_to_serial(date) as f64),
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}
