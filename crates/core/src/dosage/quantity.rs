//! Quantities, ranges, units of time and list phrasing.

use eps_types::NumericText;
use fhir::{Quantity, Range, Ratio};

use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

const TIME_UNITS: [&str; 7] = ["second", "minute", "hour", "day", "week", "month", "year"];

/// The UCUM units of time a `Timing` may use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitOfTime {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl UnitOfTime {
    pub fn from_code(code: &str) -> TranslationResult<Self> {
        match code {
            "s" => Ok(UnitOfTime::Second),
            "min" => Ok(UnitOfTime::Minute),
            "h" => Ok(UnitOfTime::Hour),
            "d" => Ok(UnitOfTime::Day),
            "wk" => Ok(UnitOfTime::Week),
            "mo" => Ok(UnitOfTime::Month),
            "a" => Ok(UnitOfTime::Year),
            other => Err(TranslationError::unmapped(Domain::UnitOfTime, other)),
        }
    }

    /// Reads an optional unit code, reporting `path` when it is absent.
    pub fn required(code: Option<&str>, path: &str) -> TranslationResult<Self> {
        UnitOfTime::from_code(required(code, path)?)
    }

    pub fn display(self) -> &'static str {
        match self {
            UnitOfTime::Second => "second",
            UnitOfTime::Minute => "minute",
            UnitOfTime::Hour => "hour",
            UnitOfTime::Day => "day",
            UnitOfTime::Week => "week",
            UnitOfTime::Month => "month",
            UnitOfTime::Year => "year",
        }
    }

    /// "every second", "hourly", "daily" and so on.
    pub fn reciprocal(self) -> &'static str {
        match self {
            UnitOfTime::Second => "every second",
            UnitOfTime::Minute => "every minute",
            UnitOfTime::Hour => "hourly",
            UnitOfTime::Day => "daily",
            UnitOfTime::Week => "weekly",
            UnitOfTime::Month => "monthly",
            UnitOfTime::Year => "annually",
        }
    }

    pub fn indefinite_article(self) -> &'static str {
        match self {
            UnitOfTime::Hour => "an",
            _ => "a",
        }
    }

    /// The display, pluralised against `value`.
    pub fn with_value(self, value: Option<&NumericText>) -> String {
        pluralise(self.display(), value.map(NumericText::as_str))
    }
}

/// Appends "s" to a unit of time when the value is present and not exactly `1`.
///
/// Other units (tablet, ml, ...) are never changed.
pub fn pluralise(unit: &str, value: Option<&str>) -> String {
    match value {
        Some(value) if value != "1" && TIME_UNITS.contains(&unit) => format!("{unit}s"),
        _ => unit.to_owned(),
    }
}

pub fn value<'a>(quantity: &'a Quantity, path: &str) -> TranslationResult<&'a str> {
    quantity
        .value
        .as_ref()
        .map(NumericText::as_str)
        .ok_or_else(|| TranslationError::missing(format!("{path}.value")))
}

pub fn unit(quantity: &Quantity, path: &str, pluralised: bool) -> TranslationResult<String> {
    let unit = required(quantity.unit.as_deref(), &format!("{path}.unit"))?;
    if pluralised {
        Ok(pluralise(unit, quantity.value.as_ref().map(NumericText::as_str)))
    } else {
        Ok(unit.to_owned())
    }
}

/// "V unit".
pub fn quantity(quantity: &Quantity, path: &str) -> TranslationResult<String> {
    Ok(format!("{} {}", value(quantity, path)?, unit(quantity, path, false)?))
}

/// "at least L", "up to H", "L lu to H hu" or "L to H hu".
pub fn range(range: &Range, path: &str, pluralised: bool) -> TranslationResult<String> {
    let low_path = format!("{path}.low");
    let high_path = format!("{path}.high");
    match (&range.low, &range.high) {
        (Some(low), None) => Ok(format!(
            "at least {} {}",
            value(low, &low_path)?,
            unit(low, &low_path, pluralised)?
        )),
        (None, Some(high)) => Ok(format!(
            "up to {} {}",
            value(high, &high_path)?,
            unit(high, &high_path, pluralised)?
        )),
        (Some(low), Some(high)) => {
            let low_unit = unit(low, &low_path, pluralised)?;
            let high_unit = unit(high, &high_path, pluralised)?;
            let low_value = value(low, &low_path)?;
            let high_value = value(high, &high_path)?;
            // Compared after pluralisation, so "1 day to 3 days" keeps both units.
            if low_unit != high_unit {
                Ok(format!("{low_value} {low_unit} to {high_value} {high_unit}"))
            } else {
                Ok(format!("{low_value} to {high_value} {high_unit}"))
            }
        }
        (None, None) => Err(TranslationError::missing(low_path)),
    }
}

/// Numerator and denominator of a ratio, both required.
pub fn ratio_parts<'a>(ratio: &'a Ratio, path: &str) -> TranslationResult<(&'a Quantity, &'a Quantity)> {
    let numerator = required(ratio.numerator.as_ref(), &format!("{path}.numerator"))?;
    let denominator = required(ratio.denominator.as_ref(), &format!("{path}.denominator"))?;
    Ok((numerator, denominator))
}

/// Joins items as "a", "a and b", "a, b and c".
pub fn list<S: AsRef<str>>(items: &[S]) -> String {
    match items {
        [] => String::new(),
        [only] => only.as_ref().to_owned(),
        [init @ .., last] => {
            let head: Vec<&str> = init.iter().map(AsRef::as_ref).collect();
            format!("{} and {}", head.join(", "), last.as_ref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn range_of(value: serde_json::Value) -> Range {
        serde_json::from_value(value).expect("range")
    }

    #[test]
    fn only_units_of_time_are_pluralised() {
        assert_eq!(pluralise("day", Some("2")), "days");
        assert_eq!(pluralise("day", Some("1")), "day");
        assert_eq!(pluralise("day", Some("0.5")), "days");
        assert_eq!(pluralise("day", None), "day");
        assert_eq!(pluralise("tablet", Some("2")), "tablet");
    }

    #[test]
    fn one_point_zero_is_not_one() {
        assert_eq!(pluralise("hour", Some("1.0")), "hours");
    }

    #[test]
    fn ranges_render_each_shape() {
        let low_only = range_of(json!({"low": {"value": 1, "unit": "tablet"}}));
        assert_eq!(range(&low_only, "r", false).expect("low"), "at least 1 tablet");

        let high_only = range_of(json!({"high": {"value": 3, "unit": "tablet"}}));
        assert_eq!(range(&high_only, "r", false).expect("high"), "up to 3 tablet");

        let same = range_of(json!({
            "low": {"value": 1, "unit": "tablet"},
            "high": {"value": 2, "unit": "tablet"}
        }));
        assert_eq!(range(&same, "r", false).expect("same"), "1 to 2 tablet");

        let mixed = range_of(json!({
            "low": {"value": 500, "unit": "milligram"},
            "high": {"value": 1, "unit": "gram"}
        }));
        assert_eq!(range(&mixed, "r", false).expect("mixed"), "500 milligram to 1 gram");
    }

    #[test]
    fn pluralised_range_repeats_unit_only_when_it_differs() {
        let days = range_of(json!({
            "low": {"value": 2, "unit": "day"},
            "high": {"value": 3, "unit": "day"}
        }));
        assert_eq!(range(&days, "r", true).expect("days"), "2 to 3 days");

        let singular_low = range_of(json!({
            "low": {"value": 1, "unit": "day"},
            "high": {"value": 3, "unit": "day"}
        }));
        assert_eq!(range(&singular_low, "r", true).expect("days"), "1 day to 3 days");

        let weeks = range_of(json!({
            "low": {"value": 3, "unit": "day"},
            "high": {"value": 2, "unit": "week"}
        }));
        assert_eq!(range(&weeks, "r", true).expect("weeks"), "3 days to 2 weeks");
    }

    #[test]
    fn missing_quantity_value_names_the_path() {
        let quantity: Quantity = serde_json::from_value(json!({"unit": "tablet"})).expect("quantity");
        let err = value(&quantity, "Dosage.doseAndRate.doseQuantity").expect_err("no value");
        assert!(matches!(
            err,
            TranslationError::MissingRequiredField { ref path } if path == "Dosage.doseAndRate.doseQuantity.value"
        ));
    }

    #[test]
    fn lists_use_and_before_the_last_item() {
        assert_eq!(list::<&str>(&[]), "");
        assert_eq!(list(&["Monday"]), "Monday");
        assert_eq!(list(&["Monday", "Friday"]), "Monday and Friday");
        assert_eq!(list(&["a", "b", "c"]), "a, b and c");
    }

    #[test]
    fn units_of_time_map_from_ucum() {
        assert_eq!(UnitOfTime::from_code("h").expect("hour").indefinite_article(), "an");
        assert_eq!(UnitOfTime::from_code("wk").expect("week").reciprocal(), "weekly");
        let err = UnitOfTime::from_code("fortnight").expect_err("unknown");
        assert!(matches!(err, TranslationError::UnmappedCode { domain: Domain::UnitOfTime, .. }));
    }
}
