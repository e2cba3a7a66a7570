//! Date and time conversion between FHIR ISO-8601 text and HL7 V3 timestamps.
//!
//! HL7 V3 timestamps are `YYYYMMDDHHMMSS` in UTC; dates are `YYYYMMDD`. FHIR partial dates
//! (`2021` or `2021-03`) are padded to the first day of the period.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};

use crate::{TranslationError, TranslationResult};

const HL7_DATE_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
const HL7_DATE_FORMAT: &str = "%Y%m%d";

/// Converts a FHIR `dateTime` (or `instant`) to an HL7 V3 UTC timestamp.
pub fn to_hl7_date_time(value: &str, path: &str) -> TranslationResult<String> {
    parse_fhir_date_time(value, path).map(|instant| instant.format(HL7_DATE_TIME_FORMAT).to_string())
}

/// Converts a FHIR `date` or `dateTime` to an HL7 V3 date, dropping any time component.
pub fn to_hl7_date(value: &str, path: &str) -> TranslationResult<String> {
    if value.contains('T') {
        return parse_fhir_date_time(value, path)
            .map(|instant| instant.format(HL7_DATE_FORMAT).to_string());
    }
    parse_fhir_date(value, path).map(|date| date.format(HL7_DATE_FORMAT).to_string())
}

/// The current instant as an HL7 V3 timestamp.
pub fn now_hl7() -> String {
    Utc::now().format(HL7_DATE_TIME_FORMAT).to_string()
}

/// Converts an HL7 V3 timestamp back to a FHIR `dateTime` with an explicit `+00:00` offset.
pub fn from_hl7_date_time(value: &str, path: &str) -> TranslationResult<String> {
    let instant = parse_hl7(value, path)?;
    Ok(Utc
        .from_utc_datetime(&instant)
        .to_rfc3339_opts(SecondsFormat::Secs, false))
}

/// Converts an HL7 V3 timestamp or date to a FHIR `date`.
pub fn from_hl7_date(value: &str, path: &str) -> TranslationResult<String> {
    parse_hl7(value, path).map(|instant| instant.format("%Y-%m-%d").to_string())
}

/// Whether the FHIR date or dateTime lies after the current instant.
pub fn is_future_dated(value: &str, path: &str) -> TranslationResult<bool> {
    let instant = if value.contains('T') {
        parse_fhir_date_time(value, path)?
    } else {
        let date = parse_fhir_date(value, path)?;
        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
    };
    Ok(instant > Utc::now())
}

/// Renders a FHIR date or dateTime as `DD/MM/YYYY` for dosage text.
pub fn to_display_date(value: &str, path: &str) -> TranslationResult<String> {
    let date = if value.contains('T') {
        parse_fhir_date_time(value, path)?.date_naive()
    } else {
        parse_fhir_date(value, path)?
    };
    Ok(date.format("%d/%m/%Y").to_string())
}

fn parse_fhir_date_time(value: &str, path: &str) -> TranslationResult<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(value) {
        return Ok(instant.with_timezone(&Utc));
    }
    // FHIR allows a dateTime without an offset only when it is a bare date.
    if !value.contains('T') {
        let date = parse_fhir_date(value, path)?;
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| invalid_date(value, path))
}

fn parse_fhir_date(value: &str, path: &str) -> TranslationResult<NaiveDate> {
    let padded = match value.len() {
        4 => format!("{value}-01-01"),
        7 => format!("{value}-01"),
        _ => value.to_owned(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d").map_err(|_| invalid_date(value, path))
}

fn parse_hl7(value: &str, path: &str) -> TranslationResult<NaiveDateTime> {
    if value.len() < 8 || value.len() > 14 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid_date(value, path));
    }
    let mut padded = value.to_owned();
    padded.push_str(&"000000"[..14 - value.len()]);
    NaiveDateTime::parse_from_str(&padded, HL7_DATE_TIME_FORMAT).map_err(|_| invalid_date(value, path))
}

fn invalid_date(value: &str, path: &str) -> TranslationError {
    TranslationError::invalid(path, format!("'{value}' is not a valid date"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fhir_date_time_converts_to_utc_timestamp() {
        assert_eq!(
            to_hl7_date_time("2020-06-10T10:26:31.000+00:00", "x").expect("convert"),
            "20200610102631"
        );
        assert_eq!(
            to_hl7_date_time("2020-06-10T11:26:31+01:00", "x").expect("convert"),
            "20200610102631"
        );
        assert_eq!(
            to_hl7_date_time("2020-06-10", "x").expect("convert"),
            "20200610000000"
        );
    }

    #[test]
    fn partial_dates_are_padded() {
        assert_eq!(to_hl7_date("2021", "x").expect("year"), "20210101");
        assert_eq!(to_hl7_date("2021-03", "x").expect("month"), "20210301");
        assert_eq!(to_hl7_date("2021-03-15", "x").expect("day"), "20210315");
        assert_eq!(
            to_hl7_date("2021-03-15T23:30:00+00:00", "x").expect("date time"),
            "20210315"
        );
    }

    #[test]
    fn malformed_dates_name_the_path() {
        let err = to_hl7_date_time("10/06/2020", "MedicationRequest.authoredOn")
            .expect_err("not ISO");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "MedicationRequest.authoredOn"
        ));
        assert!(to_hl7_date("2021-13-01", "x").is_err());
    }

    #[test]
    fn hl7_timestamps_convert_back() {
        assert_eq!(
            from_hl7_date_time("20200610102631", "x").expect("convert"),
            "2020-06-10T10:26:31+00:00"
        );
        assert_eq!(
            from_hl7_date_time("20200610", "x").expect("convert"),
            "2020-06-10T00:00:00+00:00"
        );
        assert_eq!(from_hl7_date("20200610102631", "x").expect("convert"), "2020-06-10");
        assert!(from_hl7_date("2020-06-10", "x").is_err());
    }

    #[test]
    fn future_dating_compares_with_now() {
        assert!(is_future_dated("2999-01-01", "x").expect("parse"));
        assert!(!is_future_dated("2000-01-01T00:00:00+00:00", "x").expect("parse"));
    }

    #[test]
    fn display_dates_are_day_first() {
        assert_eq!(to_display_date("2021-02-03", "x").expect("render"), "03/02/2021");
        assert_eq!(
            to_display_date("2021-02-03T10:00:00+00:00", "x").expect("render"),
            "03/02/2021"
        );
    }
}
