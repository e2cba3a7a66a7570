//! Lookups and small node builders shared by every outbound message.

use eps_types::NumericText;
use fhir::{CodeableConcept, Coding, Extension, Identifier, Medication, Reference, ReferenceIndex};
use hl7v3::codes::{self, oid, AnnotationCode};
use hl7v3::vocab::{act, ClassCode, MoodCode};
use hl7v3::Element;
use tracing::warn;

use crate::code_systems::TargetCode;
use crate::constants::{code_system, extension, system};
use crate::error::required;
use crate::{TranslationError, TranslationResult};

// ============================================================================
// FHIR lookups
// ============================================================================

/// The value of the first identifier with `system`.
pub(crate) fn identifier_value<'a>(
    identifiers: &'a [Identifier],
    system: &str,
    path: &str,
) -> TranslationResult<&'a str> {
    Identifier::value_for_system(identifiers, system)
        .ok_or_else(|| TranslationError::missing(format!("{path}(\"{system}\")")))
}

pub(crate) fn required_extension<'a>(
    extensions: &'a [Extension],
    url: &str,
    path: &str,
) -> TranslationResult<&'a Extension> {
    Extension::find(extensions, url)
        .ok_or_else(|| TranslationError::missing(format!("{path}(\"{url}\")")))
}

pub(crate) fn nested<'a>(
    parent: &'a Extension,
    url: &str,
    path: &str,
) -> TranslationResult<&'a Extension> {
    parent
        .nested(url)
        .ok_or_else(|| TranslationError::missing(format!("{path}.extension(\"{url}\")")))
}

pub(crate) fn coding_for_system<'a>(
    concept: &'a CodeableConcept,
    system: &str,
    path: &str,
) -> TranslationResult<&'a Coding> {
    concept
        .coding_for_system(system)
        .ok_or_else(|| TranslationError::missing(format!("{path}.coding(\"{system}\")")))
}

pub(crate) fn coding_code<'a>(coding: &'a Coding, path: &str) -> TranslationResult<&'a str> {
    required(coding.code.as_deref(), &format!("{path}.code"))
}

/// The single element of a list that must hold exactly one.
pub(crate) fn only<'a, T>(items: &'a [T], path: &str) -> TranslationResult<&'a T> {
    match items {
        [only] => Ok(only),
        [] => Err(TranslationError::missing(path)),
        _ => Err(TranslationError::invalid(
            path,
            format!("expected exactly one value, found {}", items.len()),
        )),
    }
}

/// The message id carried by an identifier in the RFC 4122 namespace.
pub(crate) fn message_id<'a>(identifier: Option<&'a Identifier>, path: &str) -> TranslationResult<&'a str> {
    let identifier = required(identifier, path)?;
    required(identifier.value.as_deref(), &format!("{path}.value"))
}

/// A non-negative integer carried as decimal text.
pub(crate) fn count(value: &NumericText, path: &str) -> TranslationResult<u32> {
    value.as_u32().ok_or_else(|| {
        TranslationError::invalid(path, format!("'{value}' is not a non-negative integer"))
    })
}

/// The integer value of an extension, which may be an `integer` or an `unsignedInt`.
pub(crate) fn integer_extension(parent: &Extension, url: &str, path: &str) -> TranslationResult<u32> {
    let nested_path = format!("{path}.extension(\"{url}\")");
    let child = nested(parent, url, path)?;
    let value = child
        .value_integer
        .as_ref()
        .or(child.value_unsigned_int.as_ref())
        .ok_or_else(|| TranslationError::missing(format!("{nested_path}.valueInteger")))?;
    count(value, &nested_path)
}

/// Issued and allowed counts of an `Extension-EPS-RepeatInformation`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct RepeatInformation {
    pub issued: u32,
    pub allowed: u32,
}

impl RepeatInformation {
    pub(crate) fn from_extension(parent: &Extension, path: &str) -> TranslationResult<Self> {
        Ok(Self {
            issued: integer_extension(parent, "numberOfRepeatsIssued", path)?,
            allowed: integer_extension(parent, "numberOfRepeatsAllowed", path)?,
        })
    }

    /// The HL7 V3 repeat number interval, counted from one.
    pub(crate) fn repeat_number(self) -> Element {
        let low = (self.issued + 1).to_string();
        let high = (self.allowed + 1).to_string();
        codes::interval("repeatNumber", Some(&low), Some(&high))
    }
}

/// The global prescription id from `groupIdentifier.extension` and the short-form id.
pub(crate) struct PrescriptionIds<'a> {
    pub global: &'a str,
    pub short_form: &'a str,
}

impl<'a> PrescriptionIds<'a> {
    pub(crate) fn of(group_identifier: Option<&'a Identifier>, path: &str) -> TranslationResult<Self> {
        let group_path = format!("{path}.groupIdentifier");
        let group = required(group_identifier, &group_path)?;
        let prescription_id = required_extension(&group.extension, extension::PRESCRIPTION_ID, &format!("{group_path}.extension"))?;
        let global = prescription_id
            .value_identifier
            .as_ref()
            .and_then(|identifier| identifier.value.as_deref())
            .ok_or_else(|| TranslationError::missing(format!("{group_path}.extension.valueIdentifier.value")))?;
        let short_form = required(group.value.as_deref(), &format!("{group_path}.value"))?;
        Ok(Self { global, short_form })
    }
}

/// The SNOMED medication coding of a request or dispense.
///
/// A `medicationCodeableConcept` wins; otherwise `medicationReference` must resolve to a
/// `Medication` in the bundle.
pub(crate) fn medication_coding<'a>(
    index: &ReferenceIndex<'a>,
    concept: Option<&'a CodeableConcept>,
    reference: Option<&Reference>,
    path: &str,
) -> TranslationResult<&'a Coding> {
    if let Some(concept) = concept {
        return coding_for_system(concept, code_system::SNOMED, &format!("{path}.medicationCodeableConcept"));
    }
    let reference = required(reference, &format!("{path}.medication[x]"))?;
    let medication: &Medication = index.resolve(reference)?;
    let code = required(medication.code.as_ref(), "Medication.code")?;
    coding_for_system(code, code_system::SNOMED, "Medication.code")
}

/// Logs when a later item disagrees with the first on a prescription-level field.
///
/// The first item's value is the one translated.
pub(crate) fn warn_on_divergence<T, V>(items: &[&T], path: &str, field: impl Fn(&T) -> V)
where
    V: PartialEq + std::fmt::Debug,
{
    let Some((first, rest)) = items.split_first() else {
        return;
    };
    let expected = field(first);
    for (position, item) in rest.iter().enumerate() {
        let actual = field(item);
        if actual != expected {
            warn!(
                path = path,
                item = position + 1,
                ?expected,
                ?actual,
                "prescription-level field differs from the first item; using the first"
            );
        }
    }
}

// ============================================================================
// HL7 V3 nodes
// ============================================================================

pub(crate) fn sds_organisation_id(ods_code: &str) -> Element {
    codes::identifier("id", oid::SDS_ORGANIZATION, Some(ods_code))
}

pub(crate) fn short_form_id(slot: &str, value: &str) -> Element {
    codes::identifier(slot, oid::SHORT_FORM_PRESCRIPTION_ID, Some(value))
}

pub(crate) fn organisation_type_not_specified() -> Element {
    codes::code(
        "code",
        oid::ORGANIZATION_TYPE,
        crate::constants::ORGANISATION_TYPE_NOT_SPECIFIED,
        None,
    )
}

pub(crate) fn coded_value(target: TargetCode) -> Element {
    codes::code("value", target.system, target.code, target.display)
}

pub(crate) fn text_value(text: impl Into<String>) -> Element {
    Element::new("value").text(text)
}

/// An `OBS/EVN` annotation: its code, then `value`.
pub(crate) fn annotation(name: &str, code: AnnotationCode, value: Element) -> Element {
    act(name, ClassCode::Obs, MoodCode::Evn)
        .child(code.code())
        .child(value)
}

/// `pertinentPrescriptionID`, the short-form id as an annotation.
pub(crate) fn prescription_id_annotation(short_form: &str) -> Element {
    annotation(
        "pertinentPrescriptionID",
        AnnotationCode::PrescriptionId,
        short_form_id("value", short_form),
    )
}

/// A reference act carrying only a global id.
pub(crate) fn act_ref(name: &str, class: ClassCode, mood: MoodCode, id: &str) -> Element {
    act(name, class, mood).child(codes::global_identifier("id", id))
}

/// The `code` of a role, first from the SDS job role code system then the job role name system.
pub(crate) fn job_role_code(concepts: &[CodeableConcept], path: &str) -> TranslationResult<Element> {
    let coding = [code_system::SDS_JOB_ROLE_CODE, code_system::SDS_JOB_ROLE_NAME]
        .iter()
        .find_map(|system| concepts.iter().find_map(|concept| concept.coding_for_system(system)))
        .ok_or_else(|| TranslationError::missing(format!("{path}.code")))?;
    let code = coding_code(coding, &format!("{path}.code.coding"))?;
    Ok(codes::code("code", oid::SDS_JOB_ROLE, code, None))
}

/// The SDS role profile id of a role, if it carries one.
pub(crate) fn role_profile_id(identifiers: &[Identifier]) -> Option<Element> {
    Identifier::value_for_system(identifiers, system::SDS_ROLE_PROFILE_ID)
        .map(|value| codes::identifier("id", oid::SDS_ROLE_PROFILE, Some(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extension_of(value: serde_json::Value) -> Extension {
        serde_json::from_value(value).expect("extension")
    }

    #[test]
    fn repeat_information_counts_from_one() {
        let repeat = extension_of(json!({
            "url": extension::REPEAT_INFORMATION,
            "extension": [
                {"url": "numberOfRepeatsIssued", "valueInteger": 2},
                {"url": "numberOfRepeatsAllowed", "valueUnsignedInt": 5}
            ]
        }));
        let info = RepeatInformation::from_extension(&repeat, "Task.extension").expect("parse");
        assert_eq!(info, RepeatInformation { issued: 2, allowed: 5 });
        let element = info.repeat_number();
        assert_eq!(element.find(&["low"]).and_then(|e| e.attribute("value")), Some("3"));
        assert_eq!(element.find(&["high"]).and_then(|e| e.attribute("value")), Some("6"));
    }

    #[test]
    fn missing_repeat_count_names_the_nested_extension() {
        let repeat = extension_of(json!({
            "url": extension::REPEAT_INFORMATION,
            "extension": [{"url": "numberOfRepeatsAllowed", "valueInteger": 5}]
        }));
        let err = RepeatInformation::from_extension(&repeat, "Task.extension").expect_err("issued missing");
        assert!(matches!(
            err,
            TranslationError::MissingRequiredField { ref path } if path.contains("numberOfRepeatsIssued")
        ));
    }

    #[test]
    fn fractional_counts_are_rejected() {
        let err = count(&NumericText::new("1.5").expect("numeric"), "x").expect_err("fraction");
        assert!(matches!(err, TranslationError::InvalidValue { .. }));
    }

    #[test]
    fn job_role_prefers_the_code_system() {
        let concepts: Vec<CodeableConcept> = serde_json::from_value(json!([
            {"coding": [{"system": code_system::SDS_JOB_ROLE_NAME, "code": "R8000"}]},
            {"coding": [{"system": code_system::SDS_JOB_ROLE_CODE, "code": "S8000:G8000:R8001"}]}
        ]))
        .expect("concepts");
        let code = job_role_code(&concepts, "PractitionerRole").expect("job role");
        assert_eq!(code.attribute("code"), Some("S8000:G8000:R8001"));
        assert_eq!(code.attribute("codeSystem"), Some(oid::SDS_JOB_ROLE));

        let err = job_role_code(&[], "PractitionerRole").expect_err("no code");
        assert!(matches!(err, TranslationError::MissingRequiredField { .. }));
    }

    #[test]
    fn prescription_ids_read_both_forms() {
        let group: Identifier = serde_json::from_value(json!({
            "extension": [{
                "url": extension::PRESCRIPTION_ID,
                "valueIdentifier": {"system": system::PRESCRIPTION_ORDER_NUMBER, "value": "a5b9dc81-ccf4-4dab-b887-3d88e557febb"}
            }],
            "system": system::PRESCRIPTION_ORDER_NUMBER,
            "value": "18B064-A99968-4BCAA3"
        }))
        .expect("identifier");
        let ids = PrescriptionIds::of(Some(&group), "MedicationRequest").expect("ids");
        assert_eq!(ids.global, "a5b9dc81-ccf4-4dab-b887-3d88e557febb");
        assert_eq!(ids.short_form, "18B064-A99968-4BCAA3");

        let err = PrescriptionIds::of(None, "MedicationRequest").err().expect("absent");
        assert!(matches!(
            err,
            TranslationError::MissingRequiredField { ref path } if path == "MedicationRequest.groupIdentifier"
        ));
    }

    #[test]
    fn annotations_lead_with_their_code() {
        let element = prescription_id_annotation("18B064-A99968-4BCAA3");
        let names: Vec<_> = element.elements().map(Element::name).collect();
        assert_eq!(names, vec!["code", "value"]);
        assert_eq!(element.find(&["code"]).and_then(|e| e.attribute("code")), Some("PID"));
        assert_eq!(
            element.find(&["value"]).and_then(|e| e.attribute("extension")),
            Some("18B064-A99968-4BCAA3")
        );
    }
}
