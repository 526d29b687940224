//! Date parsing for range queries.
//!
//! Readings are stamped in UTC, but people type dates in local time and often
//! without a time-of-day at all. Comparing those strings against UTC stamps
//! shifts every window by the zone offset. Inputs without an explicit offset
//! are therefore resolved in a [`LocalZone`] first and converted to UTC.
//!
//! Accepted forms, tried in order:
//!
//! 1. RFC 3339 with an offset: `2024-05-01T12:00:00Z`, `2024-05-01T14:00:00+02:00`
//! 2. Local date-time: `2024-05-01T12:00:00`, `2024-05-01 12:00:00.250`, `2024-05-01T12:00`
//! 3. Local date: `2024-05-01` (start of day, or end of day for an upper bound)

use chrono::{
    DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};

use crate::error::QueryError;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const NAIVE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Time zone used to interpret dates that carry no offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalZone {
    /// The process's local zone, as reported by the operating system.
    #[default]
    System,
    /// A fixed offset from UTC.
    Fixed(FixedOffset),
}

impl LocalZone {
    /// A fixed zone `minutes` east of UTC, or `None` if out of range.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::Fixed)
    }

    /// Resolves a wall-clock time in this zone to a UTC instant.
    ///
    /// An ambiguous local time (clocks turned back) resolves to the earlier
    /// instant. A local time skipped by a DST transition resolves to `None`.
    pub fn to_utc(&self, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::System => resolve_earliest(&Local, naive),
            Self::Fixed(offset) => resolve_earliest(offset, naive),
        }
    }
}

/// Resolves a wall-clock time in `tz`, taking the earlier instant of an
/// ambiguous time and `None` for a time inside a DST gap.
pub fn resolve_earliest<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Which end of a range a parsed date bounds.
///
/// Only matters for date-only input: a lower bound starts at the first
/// instant of the day, an upper bound covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Inclusive lower bound.
    Start,
    /// Inclusive upper bound.
    End,
}

/// Parses one date parameter of a range query.
///
/// `field` names the parameter in the error message.
///
/// # Errors
///
/// Returns [`QueryError::InvalidDate`] if `input` matches none of the accepted
/// forms or names a local time that does not exist in `zone`.
///
/// # Examples
///
/// ```rust
/// use almanac::timeparse::{parse_date, Edge, LocalZone};
/// use chrono::{TimeZone, Utc};
///
/// let zone = LocalZone::from_offset_minutes(120).unwrap();
/// let start = parse_date("startDate", "2024-05-01T12:00:00", zone, Edge::Start).unwrap();
/// assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap());
/// ```
pub fn parse_date(
    field: &'static str,
    input: &str,
    zone: LocalZone,
    edge: Edge,
) -> Result<DateTime<Utc>, QueryError> {
    parse_date_with(field, input, edge, |naive| zone.to_utc(naive))
}

/// [`parse_date`] with a caller-supplied resolver for offset-less input.
///
/// # Errors
///
/// Returns [`QueryError::InvalidDate`] if `input` matches none of the accepted
/// forms or `resolve` returns `None` for it.
pub fn parse_date_with<F>(
    field: &'static str,
    input: &str,
    edge: Edge,
    resolve: F,
) -> Result<DateTime<Utc>, QueryError>
where
    F: Fn(NaiveDateTime) -> Option<DateTime<Utc>>,
{
    let invalid = || QueryError::InvalidDate {
        field,
        value: input.to_string(),
    };
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return resolve(naive).ok_or_else(invalid);
        }
    }

    let date = NaiveDate::parse_from_str(s, NAIVE_DATE_FORMAT).map_err(|_| invalid())?;
    let time = match edge {
        Edge::Start => NaiveTime::MIN,
        Edge::End => NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).ok_or_else(invalid)?,
    };
    resolve(date.and_time(time)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn zone(minutes: i32) -> LocalZone {
        LocalZone::from_offset_minutes(minutes).unwrap()
    }

    #[test]
    fn test_rfc3339_ignores_zone() {
        let got = parse_date("startDate", "2024-05-01T12:00:00Z", zone(300), Edge::Start).unwrap();
        assert_eq!(got, utc(2024, 5, 1, 12, 0, 0));

        let got =
            parse_date("startDate", "2024-05-01T12:00:00+02:00", zone(-300), Edge::Start).unwrap();
        assert_eq!(got, utc(2024, 5, 1, 10, 0, 0));
    }

    #[test]
    fn test_naive_datetime_uses_zone_offset() {
        let got = parse_date("startDate", "2020-01-01T00:00:00", zone(-480), Edge::Start).unwrap();
        assert_eq!(got, utc(2020, 1, 1, 8, 0, 0));

        let got = parse_date("endDate", "2020-01-01 09:30:00", zone(60), Edge::End).unwrap();
        assert_eq!(got, utc(2020, 1, 1, 8, 30, 0));

        let got = parse_date("endDate", "2020-01-01T09:30", zone(0), Edge::End).unwrap();
        assert_eq!(got, utc(2020, 1, 1, 9, 30, 0));
    }

    #[test]
    fn test_fractional_seconds() {
        let got = parse_date("startDate", "2020-01-01T00:00:00.250", zone(0), Edge::Start).unwrap();
        assert_eq!(got.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_date_only_edges() {
        let start = parse_date("startDate", "2021-03-04", zone(60), Edge::Start).unwrap();
        assert_eq!(start, utc(2021, 3, 3, 23, 0, 0));

        let end = parse_date("endDate", "2021-03-04", zone(60), Edge::End).unwrap();
        assert_eq!(end.timestamp(), utc(2021, 3, 4, 22, 59, 59).timestamp());
        assert_eq!(end.timestamp_subsec_nanos(), 999_999_999);
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let got = parse_date("startDate", "  2020-01-01  ", zone(0), Edge::Start).unwrap();
        assert_eq!(got, utc(2020, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_invalid_inputs() {
        for input in ["x", "", "2020-13-01", "2020-01-01T25:00:00", "01/02/2020", "yesterday"] {
            let err = parse_date("startDate", input, zone(0), Edge::Start).unwrap_err();
            assert_eq!(
                err,
                QueryError::InvalidDate {
                    field: "startDate",
                    value: input.to_string(),
                }
            );
        }
    }

    #[test]
    fn test_offset_out_of_range() {
        assert!(LocalZone::from_offset_minutes(24 * 60).is_none());
        assert!(LocalZone::from_offset_minutes(i32::MAX).is_none());
        assert!(LocalZone::from_offset_minutes(-(23 * 60 + 59)).is_some());
    }

    #[test]
    fn test_system_zone_resolves() {
        let naive = NaiveDate::from_ymd_opt(2022, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert!(LocalZone::System.to_utc(naive).is_some());
    }

    fn new_york(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
        resolve_earliest(&chrono_tz::America::New_York, naive)
    }

    #[test]
    fn test_ambiguous_local_time_takes_earliest() {
        // 2024-11-03 01:30 happens twice in New York: EDT (-4) then EST (-5).
        let got = parse_date_with("startDate", "2024-11-03T01:30:00", Edge::Start, new_york).unwrap();
        assert_eq!(got, utc(2024, 11, 3, 5, 30, 0));
    }

    #[test]
    fn test_local_time_in_dst_gap_is_invalid() {
        // 2024-03-10 02:30 never happens in New York.
        let err = parse_date_with("endDate", "2024-03-10 02:30", Edge::End, new_york).unwrap_err();
        assert_eq!(
            err,
            QueryError::InvalidDate {
                field: "endDate",
                value: "2024-03-10 02:30".to_string(),
            }
        );

        let after = parse_date_with("endDate", "2024-03-10T03:30:00", Edge::End, new_york).unwrap();
        assert_eq!(after, utc(2024, 3, 10, 7, 30, 0));
    }

    #[test]
    fn test_date_only_bounds_across_dst_day() {
        let start = parse_date_with("startDate", "2024-03-10", Edge::Start, new_york).unwrap();
        let end = parse_date_with("endDate", "2024-03-10", Edge::End, new_york).unwrap();
        assert_eq!(start, utc(2024, 3, 10, 5, 0, 0));
        assert_eq!(end.timestamp(), utc(2024, 3, 11, 3, 59, 59).timestamp());
    }
}
