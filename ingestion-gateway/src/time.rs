use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Clock used to stamp `ingested_at` and the health/metrics reports.
pub trait TimeSource {
    fn now(&self) -> OffsetDateTime;

    fn current_time(&self) -> String {
        format_rfc3339(self.now())
    }
}

#[derive(Clone)]
pub struct SystemTime {}

impl TimeSource for SystemTime {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Whole-second RFC3339 in UTC, e.g. `2024-05-01T12:00:00Z`.
pub fn format_rfc3339(time: OffsetDateTime) -> String {
    let time = time.to_offset(time::UtcOffset::UTC);
    let time = time.replace_nanosecond(0).unwrap_or(time);
    time.format(&Rfc3339)
        .unwrap_or_else(|_| time.unix_timestamp().to_string())
}
