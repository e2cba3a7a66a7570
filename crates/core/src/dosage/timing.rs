//! Phrases derived from `Dosage.timing`.

use chrono::{NaiveTime, Timelike};
use eps_types::NumericText;
use fhir::{Period, Quantity, Range, Timing, TimingRepeat};

use super::quantity::{self, list, pluralise, UnitOfTime};
use crate::dates::to_display_date;
use crate::{Domain, TranslationError, TranslationResult};

const EVENT_TIMINGS: &[(&str, &str)] = &[
    ("MORN", "during the morning"),
    ("MORN.early", "during the early morning"),
    ("MORN.late", "during the late morning"),
    ("NOON", "around 12:00pm"),
    ("AFT", "during the afternoon"),
    ("AFT.early", "during the early afternoon"),
    ("AFT.late", "during the late afternoon"),
    ("EVE", "during the evening"),
    ("EVE.early", "during the early evening"),
    ("EVE.late", "during the late evening"),
    ("NIGHT", "during the night"),
    ("PHS", "once asleep"),
    ("HS", "before sleep"),
    ("WAKE", "upon waking"),
    ("C", "at a meal"),
    ("CM", "at breakfast"),
    ("CD", "at lunch"),
    ("CV", "at dinner"),
    ("AC", "before a meal"),
    ("ACM", "before breakfast"),
    ("ACD", "before lunch"),
    ("ACV", "before dinner"),
    ("PC", "after a meal"),
    ("PCM", "after breakfast"),
    ("PCD", "after lunch"),
    ("PCV", "after dinner"),
];

const DAYS_OF_WEEK: &[(&str, &str)] = &[
    ("mon", "Monday"),
    ("tue", "Tuesday"),
    ("wed", "Wednesday"),
    ("thu", "Thursday"),
    ("fri", "Friday"),
    ("sat", "Saturday"),
    ("sun", "Sunday"),
];

const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 60 * 24;

/// The one bounds shape a repeat carries, chosen in FHIR's declared order.
#[derive(Debug)]
pub enum BoundsKind<'a> {
    Duration(&'a Quantity),
    Range(&'a Range),
    Period(&'a Period),
}

impl<'a> BoundsKind<'a> {
    pub fn of(repeat: &'a TimingRepeat) -> Option<Self> {
        repeat
            .bounds_duration
            .as_ref()
            .map(BoundsKind::Duration)
            .or_else(|| repeat.bounds_range.as_ref().map(BoundsKind::Range))
            .or_else(|| repeat.bounds_period.as_ref().map(BoundsKind::Period))
    }
}

/// "over 30 minutes (maximum 1 hour)".
pub fn duration(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    if repeat.duration.is_none() && repeat.duration_max.is_none() {
        return Ok(None);
    }
    let unit = UnitOfTime::required(repeat.duration_unit.as_deref(), "Dosage.timing.repeat.durationUnit")?;
    let duration = required_number(repeat.duration.as_ref(), "Dosage.timing.repeat.duration")?;
    let mut phrase = format!("over {duration} {}", unit.with_value(repeat.duration.as_ref()));
    if let Some(max) = &repeat.duration_max {
        phrase.push_str(&format!(" (maximum {max} {})", unit.with_value(Some(max))));
    }
    Ok(Some(phrase))
}

/// Frequency and period together: "twice a day", "3 times every 2 hours", "daily".
pub fn frequency_and_period(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    let frequency = repeat.frequency.as_ref();
    let frequency_max = repeat.frequency_max.as_ref();
    let has_period = repeat.period.is_some() || repeat.period_max.is_some();
    let period_is_exactly_one =
        repeat.period.as_ref().is_some_and(NumericText::is_one) && repeat.period_max.is_none();

    match (frequency, frequency_max) {
        (None, None) => {
            if !has_period {
                Ok(None)
            } else if period_is_exactly_one {
                Ok(Some(period_unit(repeat)?.reciprocal().to_owned()))
            } else {
                Err(TranslationError::invalid(
                    "Dosage.timing.repeat.period",
                    "a period other than 1 needs a frequency",
                ))
            }
        }
        (Some(once), None) if once.is_one() => {
            if !has_period {
                Ok(Some("once".to_owned()))
            } else if period_is_exactly_one {
                Ok(Some(format!("once {}", standard_period(repeat)?)))
            } else {
                standard_period(repeat).map(Some)
            }
        }
        (Some(twice), None) if twice.is_two() => {
            if has_period {
                Ok(Some(format!("twice {}", standard_period(repeat)?)))
            } else {
                Ok(Some("twice".to_owned()))
            }
        }
        (frequency, frequency_max) => {
            let mut phrase = match (frequency, frequency_max) {
                (Some(low), Some(high)) => format!("{low} to {high} times"),
                (Some(low), None) => format!("{low} times"),
                (None, Some(high)) => format!("up to {high} times"),
                (None, None) => return Ok(None),
            };
            if has_period {
                phrase.push(' ');
                phrase.push_str(&standard_period(repeat)?);
            }
            Ok(Some(phrase))
        }
    }
}

fn standard_period(repeat: &TimingRepeat) -> TranslationResult<String> {
    let unit = period_unit(repeat)?;
    match (&repeat.period, &repeat.period_max) {
        (period, Some(max)) => Ok(format!(
            "every {} to {max} {}",
            required_number(period.as_ref(), "Dosage.timing.repeat.period")?,
            unit.with_value(Some(max))
        )),
        (Some(period), None) if period.is_one() => {
            Ok(format!("{} {}", unit.indefinite_article(), unit.display()))
        }
        (period, None) => Ok(format!(
            "every {} {}",
            required_number(period.as_ref(), "Dosage.timing.repeat.period")?,
            unit.with_value(period.as_ref())
        )),
    }
}

fn period_unit(repeat: &TimingRepeat) -> TranslationResult<UnitOfTime> {
    UnitOfTime::required(repeat.period_unit.as_deref(), "Dosage.timing.repeat.periodUnit")
}

/// "30 minutes before breakfast and before dinner".
pub fn offset_and_when(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    if repeat.offset.is_none() && repeat.when.is_empty() {
        return Ok(None);
    }

    let offset = repeat
        .offset
        .as_ref()
        .map(|offset| {
            let minutes: i64 = offset.as_str().parse().map_err(|_| {
                TranslationError::invalid("Dosage.timing.repeat.offset", "offset must be whole minutes")
            })?;
            let (value, unit) = offset_value_and_unit(minutes);
            let value = value.to_string();
            Ok::<_, TranslationError>(format!("{value} {}", pluralise(unit, Some(&value))))
        })
        .transpose()?;

    let timings = repeat
        .when
        .iter()
        .map(|code| lookup(EVENT_TIMINGS, code, Domain::EventTiming))
        .collect::<TranslationResult<Vec<_>>>()?;
    let when = (!timings.is_empty()).then(|| list(&timings));

    Ok(Some([offset, when].into_iter().flatten().collect::<Vec<_>>().join(" ")))
}

fn offset_value_and_unit(minutes: i64) -> (i64, &'static str) {
    if minutes % MINUTES_PER_HOUR != 0 {
        (minutes, "minute")
    } else if minutes % MINUTES_PER_DAY != 0 {
        (minutes / MINUTES_PER_HOUR, "hour")
    } else {
        (minutes / MINUTES_PER_DAY, "day")
    }
}

/// "on Monday and Friday at 08:00 and 20:00".
pub fn day_of_week_and_time_of_day(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    if repeat.day_of_week.is_empty() && repeat.time_of_day.is_empty() {
        return Ok(None);
    }

    let mut phrase = String::new();
    if !repeat.day_of_week.is_empty() {
        let days = repeat
            .day_of_week
            .iter()
            .map(|code| lookup(DAYS_OF_WEEK, code, Domain::DayOfWeek))
            .collect::<TranslationResult<Vec<_>>>()?;
        phrase.push_str("on ");
        phrase.push_str(&list(&days));
    }
    if !repeat.time_of_day.is_empty() {
        if !phrase.is_empty() {
            phrase.push(' ');
        }
        let times = repeat
            .time_of_day
            .iter()
            .map(|time| format_time(time))
            .collect::<TranslationResult<Vec<_>>>()?;
        phrase.push_str("at ");
        phrase.push_str(&list(&times));
    }
    Ok(Some(phrase))
}

fn format_time(time: &str) -> TranslationResult<String> {
    let parsed = NaiveTime::parse_from_str(time, "%H:%M:%S%.f").map_err(|_| {
        TranslationError::invalid(
            "Dosage.timing.repeat.timeOfDay",
            format!("'{time}' is not a valid time"),
        )
    })?;
    if parsed.second() == 0 {
        Ok(parsed.format("%H:%M").to_string())
    } else {
        Ok(parsed.format("%H:%M:%S").to_string())
    }
}

/// "for 10 days", "for 1 to 2 weeks" or "from 01/02/2021 to 28/02/2021".
pub fn bounds(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    let phrase = match BoundsKind::of(repeat) {
        None => return Ok(None),
        Some(BoundsKind::Duration(duration)) => {
            let path = "Dosage.timing.repeat.boundsDuration";
            format!(
                "for {} {}",
                quantity::value(duration, path)?,
                quantity::unit(duration, path, true)?
            )
        }
        Some(BoundsKind::Range(range)) => {
            format!("for {}", quantity::range(range, "Dosage.timing.repeat.boundsRange", true)?)
        }
        Some(BoundsKind::Period(period)) => {
            let path = "Dosage.timing.repeat.boundsPeriod";
            match (&period.start, &period.end) {
                (Some(start), Some(end)) => format!(
                    "from {} to {}",
                    to_display_date(start, &format!("{path}.start"))?,
                    to_display_date(end, &format!("{path}.end"))?
                ),
                (Some(start), None) => {
                    format!("from {}", to_display_date(start, &format!("{path}.start"))?)
                }
                (None, Some(end)) => {
                    format!("until {}", to_display_date(end, &format!("{path}.end"))?)
                }
                (None, None) => return Err(TranslationError::missing(format!("{path}.start"))),
            }
        }
    };
    Ok(Some(phrase))
}

/// "take once", "take twice" or "take 3 to 5 times".
pub fn count(repeat: &TimingRepeat) -> TranslationResult<Option<String>> {
    match (&repeat.count, &repeat.count_max) {
        (None, None) => Ok(None),
        (Some(count), None) if count.is_one() => Ok(Some("take once".to_owned())),
        (Some(count), None) if count.is_two() => Ok(Some("take twice".to_owned())),
        (count, max) => {
            let count = required_number(count.as_ref(), "Dosage.timing.repeat.count")?;
            Ok(Some(match max {
                Some(max) => format!("take {count} to {max} times"),
                None => format!("take {count} times"),
            }))
        }
    }
}

/// "on 01/02/2021 and 08/02/2021".
pub fn event(timing: &Timing) -> TranslationResult<Option<String>> {
    if timing.event.is_empty() {
        return Ok(None);
    }
    let dates = timing
        .event
        .iter()
        .map(|event| to_display_date(event, "Dosage.timing.event"))
        .collect::<TranslationResult<Vec<_>>>()?;
    Ok(Some(format!("on {}", list(&dates))))
}

fn required_number<'a>(value: Option<&'a NumericText>, path: &str) -> TranslationResult<&'a str> {
    value
        .map(NumericText::as_str)
        .ok_or_else(|| TranslationError::missing(path))
}

fn lookup(table: &[(&str, &'static str)], code: &str, domain: Domain) -> TranslationResult<&'static str> {
    table
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, display)| *display)
        .ok_or_else(|| TranslationError::unmapped(domain, code))
}
