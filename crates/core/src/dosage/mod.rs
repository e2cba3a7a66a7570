//! Natural-language rendering of structured FHIR dosage instructions.
//!
//! A dosage becomes one sentence. The method phrase leads; every other non-empty phrase follows
//! in a fixed order, separated by `" - "`:
//!
//! ```text
//! method | dose | rate | duration | frequency+period | offset+when | days+times | route | site |
//! asNeeded | bounds | count | event | maxDosePerPeriod | maxDosePerAdministration |
//! maxDosePerLifetime | additionalInstruction | patientInstruction
//! ```
//!
//! Several dosages are grouped by `sequence`: dosages sharing a sequence are concurrent
//! (`", and "`), and groups run one after another in ascending order (`", then "`).

mod quantity;
mod timing;

use std::collections::BTreeMap;

use fhir::{CodeableConcept, Dosage, Quantity, Range, Ratio};

use self::quantity::list;
use crate::{TranslationError, TranslationResult};

pub use self::quantity::{pluralise, UnitOfTime};
pub use self::timing::BoundsKind;

/// The rate component of `doseAndRate`, first match across the list.
#[derive(Debug)]
pub enum RateKind<'a> {
    Ratio(&'a Ratio),
    Range(&'a Range),
    Quantity(&'a Quantity),
}

impl<'a> RateKind<'a> {
    pub fn of(dosage: &'a Dosage) -> Option<Self> {
        let rates = &dosage.dose_and_rate;
        rates
            .iter()
            .find_map(|entry| entry.rate_ratio.as_ref().map(RateKind::Ratio))
            .or_else(|| rates.iter().find_map(|entry| entry.rate_range.as_ref().map(RateKind::Range)))
            .or_else(|| {
                rates
                    .iter()
                    .find_map(|entry| entry.rate_quantity.as_ref().map(RateKind::Quantity))
            })
    }
}

/// `asNeeded[x]`: a reason always wins over the flag.
#[derive(Debug)]
pub enum AsNeeded<'a> {
    CodeableConcept(&'a CodeableConcept),
    Boolean(bool),
}

impl<'a> AsNeeded<'a> {
    pub fn of(dosage: &'a Dosage) -> Option<Self> {
        dosage
            .as_needed_codeable_concept
            .as_ref()
            .map(AsNeeded::CodeableConcept)
            .or_else(|| dosage.as_needed_boolean.map(AsNeeded::Boolean))
    }
}

/// Renders every dosage of a line item as one instruction.
///
/// An empty slice renders as the empty string.
pub fn render(dosages: &[Dosage]) -> TranslationResult<String> {
    match dosages {
        [] => Ok(String::new()),
        [single] => render_dosage(single),
        many => render_sequenced(many),
    }
}

fn render_sequenced(dosages: &[Dosage]) -> TranslationResult<String> {
    let mut groups: BTreeMap<u32, Vec<String>> = BTreeMap::new();
    for (index, dosage) in dosages.iter().enumerate() {
        let path = format!("dosageInstruction[{index}].sequence");
        let sequence = dosage
            .sequence
            .as_ref()
            .ok_or_else(|| TranslationError::MissingSequenceNumber { path: path.clone() })?;
        let sequence = sequence
            .as_u32()
            .ok_or_else(|| TranslationError::invalid(path, "sequence must be a whole number"))?;
        groups.entry(sequence).or_default().push(render_dosage(dosage)?);
    }

    Ok(groups
        .into_values()
        .map(|concurrent| concurrent.join(", and "))
        .collect::<Vec<_>>()
        .join(", then "))
}

/// Renders a single dosage as one sentence.
pub fn render_dosage(dosage: &Dosage) -> TranslationResult<String> {
    let repeat = dosage.timing.as_ref().and_then(|timing| timing.repeat.as_ref());

    let head = dosage
        .method
        .as_ref()
        .map(|method| displays(method, "Dosage.method"))
        .transpose()?
        .unwrap_or_default();

    let mut tail: Vec<Option<String>> = vec![dose(dosage)?, rate(dosage)?];
    if let Some(repeat) = repeat {
        tail.extend([
            timing::duration(repeat)?,
            timing::frequency_and_period(repeat)?,
            timing::offset_and_when(repeat)?,
            timing::day_of_week_and_time_of_day(repeat)?,
        ]);
    }
    tail.push(dosage.route.as_ref().map(|route| displays(route, "Dosage.route")).transpose()?);
    tail.push(dosage.site.as_ref().map(|site| displays(site, "Dosage.site")).transpose()?);
    tail.push(as_needed(dosage)?);
    if let Some(repeat) = repeat {
        tail.extend([timing::bounds(repeat)?, timing::count(repeat)?]);
    }
    if let Some(schedule) = &dosage.timing {
        tail.push(timing::event(schedule)?);
    }
    tail.extend([
        max_dose_per_period(dosage)?,
        max_dose(dosage.max_dose_per_administration.as_ref(), "Dosage.maxDosePerAdministration", "per dose")?,
        max_dose(
            dosage.max_dose_per_lifetime.as_ref(),
            "Dosage.maxDosePerLifetime",
            "for the lifetime of the patient",
        )?,
        additional_instruction(dosage)?,
        dosage
            .patient_instruction
            .as_ref()
            .map(|text| text.as_str().to_owned()),
    ]);

    let tail = tail
        .into_iter()
        .flatten()
        .filter(|phrase| !phrase.is_empty())
        .collect::<Vec<_>>()
        .join(" - ");

    Ok([head, tail]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
}

/// Coding displays run together, as the method, route and site phrases expect.
fn displays(concept: &CodeableConcept, path: &str) -> TranslationResult<String> {
    concept
        .coding
        .iter()
        .map(|coding| {
            coding
                .display
                .as_deref()
                .ok_or_else(|| TranslationError::missing(format!("{path}.coding.display")))
        })
        .collect()
}

fn dose(dosage: &Dosage) -> TranslationResult<Option<String>> {
    let entries = &dosage.dose_and_rate;
    if let Some(dose) = entries.iter().find_map(|entry| entry.dose_quantity.as_ref()) {
        return quantity::quantity(dose, "Dosage.doseAndRate.doseQuantity").map(Some);
    }
    if let Some(dose) = entries.iter().find_map(|entry| entry.dose_range.as_ref()) {
        return quantity::range(dose, "Dosage.doseAndRate.doseRange", false).map(Some);
    }
    Ok(None)
}

fn rate(dosage: &Dosage) -> TranslationResult<Option<String>> {
    let phrase = match RateKind::of(dosage) {
        None => return Ok(None),
        Some(RateKind::Ratio(ratio)) => {
            let path = "Dosage.doseAndRate.rateRatio";
            let (numerator, denominator) = quantity::ratio_parts(ratio, path)?;
            let numerator_path = format!("{path}.numerator");
            let denominator_path = format!("{path}.denominator");
            let amount = quantity::quantity(numerator, &numerator_path)?;
            if denominator.value.as_ref().is_some_and(|value| value.is_one()) {
                format!(
                    "at a rate of {amount} per {}",
                    quantity::unit(denominator, &denominator_path, false)?
                )
            } else {
                format!(
                    "at a rate of {amount} every {} {}",
                    quantity::value(denominator, &denominator_path)?,
                    quantity::unit(denominator, &denominator_path, true)?
                )
            }
        }
        Some(RateKind::Range(range)) => format!(
            "at a rate of {}",
            quantity::range(range, "Dosage.doseAndRate.rateRange", false)?
        ),
        Some(RateKind::Quantity(rate)) => format!(
            "at a rate of {}",
            quantity::quantity(rate, "Dosage.doseAndRate.rateQuantity")?
        ),
    };
    Ok(Some(phrase))
}

fn as_needed(dosage: &Dosage) -> TranslationResult<Option<String>> {
    match AsNeeded::of(dosage) {
        Some(AsNeeded::CodeableConcept(reason)) => {
            if reason.coding.is_empty() {
                return Err(TranslationError::missing("Dosage.asNeededCodeableConcept.coding"));
            }
            let reasons = reason
                .coding
                .iter()
                .map(|coding| coding.display.as_deref())
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| TranslationError::missing("Dosage.asNeededCodeableConcept.coding.display"))?;
            Ok(Some(format!("as required for {}", list(&reasons))))
        }
        Some(AsNeeded::Boolean(true)) => Ok(Some("as required".to_owned())),
        Some(AsNeeded::Boolean(false)) | None => Ok(None),
    }
}

fn max_dose_per_period(dosage: &Dosage) -> TranslationResult<Option<String>> {
    let Some(ratio) = &dosage.max_dose_per_period else {
        return Ok(None);
    };
    let path = "Dosage.maxDosePerPeriod";
    let (numerator, denominator) = quantity::ratio_parts(ratio, path)?;
    let denominator_path = format!("{path}.denominator");
    Ok(Some(format!(
        "up to a maximum of {} in {} {}",
        quantity::quantity(numerator, &format!("{path}.numerator"))?,
        quantity::value(denominator, &denominator_path)?,
        quantity::unit(denominator, &denominator_path, true)?
    )))
}

fn max_dose(limit: Option<&Quantity>, path: &str, suffix: &str) -> TranslationResult<Option<String>> {
    limit
        .map(|limit| {
            quantity::quantity(limit, path)
                .map(|amount| format!("up to a maximum of {amount} {suffix}"))
        })
        .transpose()
}

fn additional_instruction(dosage: &Dosage) -> TranslationResult<Option<String>> {
    let instructions = dosage
        .additional_instruction
        .iter()
        .flat_map(|concept| concept.coding.iter())
        .map(|coding| {
            coding
                .display
                .as_deref()
                .ok_or_else(|| TranslationError::missing("Dosage.additionalInstruction.coding.display"))
        })
        .collect::<TranslationResult<Vec<_>>>()?;
    Ok((!instructions.is_empty()).then(|| list(&instructions)))
}
