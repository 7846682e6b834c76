//! Field-level conversions shared by every sentence parser.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{NavError, Result};

pub const KNOTS_TO_KMH: f64 = 1.852;

/// Comma-split payload of one sentence, index 0 being the address field.
///
/// Indexing past the end reads as an empty field, so optional trailing
/// fields of newer NMEA versions need no length checks.
pub struct Fields<'a> {
    line: &'a str,
    values: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    pub fn new(line: &'a str, payload: &'a str) -> Self {
        Self {
            line,
            values: payload.split(',').collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text(&self, index: usize) -> &'a str {
        self.values.get(index).copied().unwrap_or("")
    }

    /// Non-empty field as an owned string.
    pub fn string(&self, index: usize) -> Option<String> {
        let raw = self.text(index);
        (!raw.is_empty()).then(|| raw.to_string())
    }

    fn error(&self, reason: String) -> NavError {
        NavError::parse(self.line, reason)
    }

    pub fn float(&self, index: usize) -> Result<Option<f64>> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|_| self.error(format!("field {index} is not numeric: '{raw}'")))
    }

    pub fn uint(&self, index: usize) -> Result<Option<u32>> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<u32>()
            .map(Some)
            .map_err(|_| self.error(format!("field {index} is not an integer: '{raw}'")))
    }

    /// Speed in knots converted to km/h.
    pub fn knots(&self, index: usize) -> Result<Option<f64>> {
        Ok(self.float(index)?.map(|knots| knots * KNOTS_TO_KMH))
    }

    /// Distance with a unit field; only meters (or a blank unit) are accepted.
    pub fn distance(&self, index: usize, unit_index: usize) -> Result<Option<f64>> {
        let value = self.float(index)?;
        if value.is_none() {
            return Ok(None);
        }
        match self.text(unit_index) {
            "M" | "" => Ok(value),
            unit => Err(self.error(format!("unknown distance unit '{unit}'"))),
        }
    }

    /// `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed decimal degrees.
    pub fn coordinate(&self, index: usize, hemisphere_index: usize) -> Result<Option<f64>> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(None);
        }
        let degrees = parse_coordinate(raw)
            .ok_or_else(|| self.error(format!("malformed coordinate '{raw}'")))?;
        Ok(Some(match self.text(hemisphere_index) {
            "S" | "W" => -degrees,
            _ => degrees,
        }))
    }

    /// Signed magnetic variation, west negative.
    pub fn variation(&self, index: usize, direction_index: usize) -> Result<Option<f64>> {
        let direction = self.text(direction_index);
        if direction.is_empty() {
            return Ok(None);
        }
        Ok(self
            .float(index)?
            .map(|value| if direction == "W" { -value } else { value }))
    }

    /// Time of day combined with today's UTC date.
    pub fn time(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        self.time_on(index, Utc::now().date_naive())
    }

    /// Time of day combined with a `ddmmyy` date field, falling back to
    /// today's UTC date when the date field is blank.
    pub fn time_with_date(&self, index: usize, date_index: usize) -> Result<Option<DateTime<Utc>>> {
        let raw = self.text(date_index);
        let date = if raw.is_empty() {
            Utc::now().date_naive()
        } else {
            parse_ddmmyy(raw).ok_or_else(|| self.error(format!("invalid date '{raw}'")))?
        };
        self.time_on(index, date)
    }

    /// ZDA layout: time, day, month, four-digit year.
    pub fn time_with_dmy(
        &self,
        index: usize,
        day_index: usize,
        month_index: usize,
        year_index: usize,
    ) -> Result<Option<DateTime<Utc>>> {
        let date = match (
            self.uint(day_index)?,
            self.uint(month_index)?,
            self.uint(year_index)?,
        ) {
            (Some(day), Some(month), Some(year)) => i32::try_from(year)
                .ok()
                .and_then(|year| NaiveDate::from_ymd_opt(year, month, day))
                .ok_or_else(|| self.error(format!("invalid date {day}/{month}/{year}")))?,
            _ => Utc::now().date_naive(),
        };
        self.time_on(index, date)
    }

    fn time_on(&self, index: usize, date: NaiveDate) -> Result<Option<DateTime<Utc>>> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(None);
        }
        let time = parse_hhmmss(raw).ok_or_else(|| self.error(format!("invalid time '{raw}'")))?;
        Ok(Some(Utc.from_utc_datetime(&NaiveDateTime::new(date, time))))
    }
}

/// Degree digits are everything before the two whole-minute digits, so the
/// same rule covers two-digit latitudes and three-digit longitudes.
fn parse_coordinate(raw: &str) -> Option<f64> {
    let integer_len = raw.find('.').unwrap_or(raw.len());
    if integer_len < 3 || !raw.is_char_boundary(integer_len - 2) {
        return None;
    }
    let (degrees, minutes) = raw.split_at(integer_len - 2);
    let degrees: f64 = degrees.parse().ok()?;
    let minutes: f64 = minutes.parse().ok()?;
    if !(0.0..60.0).contains(&minutes) {
        return None;
    }
    Some(degrees + minutes / 60.0)
}

fn parse_hhmmss(raw: &str) -> Option<NaiveTime> {
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.len() != 6 || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = whole[0..2].parse().ok()?;
    let minutes: u32 = whole[2..4].parse().ok()?;
    let seconds: u32 = whole[4..6].parse().ok()?;

    // Fraction of a second, whatever its number of digits
    let nanos = if fraction.is_empty() {
        0
    } else {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = &fraction[..fraction.len().min(9)];
        let value: u32 = digits.parse().ok()?;
        value * 10u32.pow(9 - digits.len() as u32)
    };

    NaiveTime::from_hms_nano_opt(hours, minutes, seconds, nanos)
}

/// `ddmmyy`; two-digit years below 73 are 20xx, the rest 19xx.
fn parse_ddmmyy(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day: u32 = raw[0..2].parse().ok()?;
    let month: u32 = raw[2..4].parse().ok()?;
    let year: i32 = raw[4..6].parse().ok()?;
    let year = if year < 73 { 2000 + year } else { 1900 + year };
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Datelike, Timelike};

    fn fields(payload: &str) -> Fields<'_> {
        Fields::new(payload, payload)
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let f = fields("GPGGA,,,");
        assert_eq!(f.float(1).unwrap(), None);
        assert_eq!(f.uint(2).unwrap(), None);
        assert_eq!(f.coordinate(1, 2).unwrap(), None);
        assert_eq!(f.time(3).unwrap(), None);
        // Past the end reads as empty
        assert_eq!(f.float(40).unwrap(), None);
    }

    #[test]
    fn test_coordinates() {
        let f = fields("X,4807.038,N,01131.000,E,3345.123,S,07030.500,W");
        assert_abs_diff_eq!(f.coordinate(1, 2).unwrap().unwrap(), 48.1173, epsilon = 1e-9);
        assert_abs_diff_eq!(
            f.coordinate(3, 4).unwrap().unwrap(),
            11.0 + 31.0 / 60.0,
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            f.coordinate(5, 6).unwrap().unwrap(),
            -(33.0 + 45.123 / 60.0),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            f.coordinate(7, 8).unwrap().unwrap(),
            -(70.0 + 30.5 / 60.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_three_digit_longitude_degrees() {
        let f = fields("X,12218.000,W");
        assert_abs_diff_eq!(
            f.coordinate(1, 2).unwrap().unwrap(),
            -(122.0 + 18.0 / 60.0),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_malformed_coordinate_is_error() {
        let f = fields("X,48AB.0,N");
        assert!(matches!(f.coordinate(1, 2), Err(NavError::Parse { .. })));
    }

    #[test]
    fn test_knots_to_kmh() {
        let f = fields("X,10.0");
        assert_abs_diff_eq!(f.knots(1).unwrap().unwrap(), 18.52, epsilon = 1e-9);
    }

    #[test]
    fn test_distance_units() {
        let f = fields("X,545.4,M,12.0,,3.0,F");
        assert_eq!(f.distance(1, 2).unwrap(), Some(545.4));
        assert_eq!(f.distance(3, 4).unwrap(), Some(12.0));
        let err = f.distance(5, 6).unwrap_err();
        assert!(err.to_string().contains("unknown distance unit"));
    }

    #[test]
    fn test_non_numeric_field_is_error() {
        let f = fields("X,abc,1.5x");
        assert!(f.float(1).is_err());
        assert!(f.uint(2).is_err());
    }

    #[test]
    fn test_time_fraction_is_sub_second() {
        let f = fields("X,123519.5,123519.25,123519");
        let t = f.time(1).unwrap().unwrap();
        assert_eq!((t.hour(), t.minute(), t.second()), (12, 35, 19));
        assert_eq!(t.nanosecond(), 500_000_000);
        assert_eq!(f.time(2).unwrap().unwrap().nanosecond(), 250_000_000);
        assert_eq!(f.time(3).unwrap().unwrap().nanosecond(), 0);
    }

    #[test]
    fn test_time_with_two_digit_year() {
        let f = fields("X,123519,230394,010172,311273");
        let t = f.time_with_date(1, 2).unwrap().unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (1994, 3, 23));
        assert_eq!(f.time_with_date(1, 3).unwrap().unwrap().year(), 2072);
        assert_eq!(f.time_with_date(1, 4).unwrap().unwrap().year(), 1973);
    }

    #[test]
    fn test_impossible_time_or_date_is_error() {
        let f = fields("X,256000,123519,310299");
        assert!(f.time(1).is_err());
        assert!(f.time_with_date(2, 3).is_err());
    }

    #[test]
    fn test_zda_date() {
        let f = fields("GPZDA,201530.00,04,07,2002,00,00");
        let t = f.time_with_dmy(1, 2, 3, 4).unwrap().unwrap();
        assert_eq!((t.year(), t.month(), t.day()), (2002, 7, 4));
        assert_eq!((t.hour(), t.minute(), t.second()), (20, 15, 30));
    }

    #[test]
    fn test_variation_sign() {
        let f = fields("X,3.1,W,2.0,E,1.0,");
        assert_eq!(f.variation(1, 2).unwrap(), Some(-3.1));
        assert_eq!(f.variation(3, 4).unwrap(), Some(2.0));
        assert_eq!(f.variation(5, 6).unwrap(), None);
    }
}
