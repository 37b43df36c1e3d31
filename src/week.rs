use chrono::{Datelike, Duration, Local, NaiveDate};

/// Weeks run Sunday through Saturday.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_sunday() as i64;
    date - Duration::days(offset)
}

/// Label for the week beginning at `start`, e.g. `1/5/2025 - 1/11/2025`.
pub fn format_week_range(start: NaiveDate) -> String {
    let end = start + Duration::days(6);
    format!("{} - {}", format_date(start), format_date(end))
}

pub fn week_key_for(date: NaiveDate) -> String {
    format_week_range(week_start(date))
}

/// Key of the week `weeks_back` weeks before the one containing `date`.
pub fn week_key_offset(date: NaiveDate, weeks_back: i64) -> String {
    week_key_for(date - Duration::weeks(weeks_back))
}

pub fn current_week_key() -> String {
    week_key_for(Local::now().date_naive())
}

fn format_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.month(), date.day(), date.year())
}
