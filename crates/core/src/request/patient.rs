//! The `recordTarget` participation.

use fhir::{Patient, ReferenceIndex};
use hl7v3::codes::{self, oid, NullFlavor};
use hl7v3::vocab::{act, entity, role, ClassCode, DeterminerCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;

use super::common::{identifier_value, sds_organisation_id};
use super::demographics::{address, name, telecom};
use super::organisation::gp_practice_ods;
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{system, UNREGISTERED_GP_PRACTICE};
use crate::dates::to_hl7_date;
use crate::error::required;
use crate::{Domain, TranslationResult};

/// Patient care provision type for a registered GP.
const GP_CARE_PROVISION: &str = "1";

fn nhs_number_id(nhs_number: &str) -> Element {
    codes::identifier("id", oid::NHS_NUMBER, Some(nhs_number))
}

/// `recordTarget` carrying the full patient: identifiers, demographics and registered practice.
pub(crate) fn record_target(
    index: &ReferenceIndex<'_>,
    patient: &Patient,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let nhs_number = identifier_value(&patient.identifier, system::NHS_NUMBER, "Patient.identifier")?;
    let addresses = patient.address.iter().map(address).collect::<TranslationResult<Vec<_>>>()?;
    let telecoms = patient
        .telecom
        .iter()
        .map(|contact| telecom(contact, "Patient.telecom"))
        .collect::<TranslationResult<Vec<_>>>()?;

    let patient_element = role("Patient", ClassCode::Pat)
        .child(nhs_number_id(nhs_number))
        .with_children(addresses)
        .with_children(telecoms)
        .child(patient_person(index, patient, config)?);
    Ok(Relationship::new(TypeCode::Rct).wrap("recordTarget", patient_element))
}

/// `recordTarget` carrying only the NHS number.
pub(crate) fn record_target_by_nhs_number(nhs_number: &str) -> Element {
    Relationship::new(TypeCode::Rct).wrap(
        "recordTarget",
        role("Patient", ClassCode::Pat).child(nhs_number_id(nhs_number)),
    )
}

fn patient_person(
    index: &ReferenceIndex<'_>,
    patient: &Patient,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let names = patient.name.iter().map(name).collect::<TranslationResult<Vec<_>>>()?;
    let gender = required(patient.gender.as_deref(), "Patient.gender")?;
    let sex = to_target(Domain::Sex, gender)?;
    let birth_date = required(patient.birth_date.as_deref(), "Patient.birthDate")?;

    Ok(entity("patientPerson", ClassCode::Psn, DeterminerCode::Instance)
        .with_children(names)
        .child(codes::code("administrativeGenderCode", sex.system, sex.code, None))
        .child(codes::value("birthTime", to_hl7_date(birth_date, "Patient.birthDate")?))
        .child(provider_patient(index, patient, config)?))
}

/// `playedProviderPatient`: the care provision with the registered practice as responsible party.
///
/// An unregistered patient, or one registered with the unregistered-practice code, has a
/// provider id of nullFlavor `UNK`.
fn provider_patient(
    index: &ReferenceIndex<'_>,
    patient: &Patient,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let practice = gp_practice_ods(index, &patient.general_practitioner, config.max_reference_depth())?;
    let provider_id = match practice {
        Some(ods_code) if ods_code != UNREGISTERED_GP_PRACTICE => sds_organisation_id(ods_code),
        _ => codes::null("id", NullFlavor::Unknown),
    };

    let care_provision = act("patientCareProvision", ClassCode::Pcpr, MoodCode::Evn)
        .child(codes::code(
            "code",
            oid::PATIENT_CARE_PROVISION_TYPE,
            GP_CARE_PROVISION,
            None,
        ))
        .child(Relationship::new(TypeCode::Resp).wrap(
            "responsibleParty",
            role("healthCareProvider", ClassCode::Prov).child(provider_id),
        ));

    Ok(role("playedProviderPatient", ClassCode::Pat)
        .child(Relationship::new(TypeCode::Sbj).wrap("subjectOf", care_provision)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TranslationError;
    use fhir::Bundle;
    use serde_json::json;

    fn patient(general_practitioner: serde_json::Value) -> Patient {
        serde_json::from_value(json!({
            "resourceType": "Patient",
            "identifier": [{"system": system::NHS_NUMBER, "value": "9449304130"}],
            "name": [{"use": "usual", "family": "TWITCHETT", "given": ["STACEY", "MARISA"], "prefix": ["MS"]}],
            "gender": "female",
            "birthDate": "1948-04-30",
            "address": [{"use": "home", "line": ["10 HEATHFIELD", "COBHAM"], "postalCode": "KT11 2QY"}],
            "generalPractitioner": general_practitioner
        }))
        .expect("patient")
    }

    fn empty_bundle() -> Bundle {
        serde_json::from_value(json!({"resourceType": "Bundle"})).expect("bundle")
    }

    #[test]
    fn patient_children_keep_schema_order() {
        let bundle = empty_bundle();
        let index = ReferenceIndex::new(&bundle);
        let patient = patient(json!([
            {"identifier": {"system": system::ODS_ORGANIZATION_CODE, "value": "B81001"}}
        ]));

        let target = record_target(&index, &patient, &TranslatorConfig::default()).expect("convert");
        assert_eq!(target.attribute("typeCode"), Some("RCT"));
        let patient_element = target.first("Patient").expect("patient");
        let children: Vec<_> = patient_element.elements().map(Element::name).collect();
        assert_eq!(children, vec!["id", "addr", "patientPerson"]);

        let person = patient_element.first("patientPerson").expect("person");
        let person_children: Vec<_> = person.elements().map(Element::name).collect();
        assert_eq!(
            person_children,
            vec!["name", "administrativeGenderCode", "birthTime", "playedProviderPatient"]
        );
        assert_eq!(
            person.first("administrativeGenderCode").and_then(|e| e.attribute("code")),
            Some("2")
        );
        assert_eq!(
            person.first("birthTime").and_then(|e| e.attribute("value")),
            Some("19480430")
        );
        let provider_id = person.find(&[
            "playedProviderPatient",
            "subjectOf",
            "patientCareProvision",
            "responsibleParty",
            "healthCareProvider",
            "id",
        ]);
        assert_eq!(provider_id.and_then(|e| e.attribute("extension")), Some("B81001"));
    }

    #[test]
    fn unregistered_practice_is_unknown() {
        let bundle = empty_bundle();
        let index = ReferenceIndex::new(&bundle);
        for general_practitioner in [
            json!([{"identifier": {"system": system::ODS_ORGANIZATION_CODE, "value": "V81999"}}]),
            json!([]),
        ] {
            let patient = patient(general_practitioner);
            let target = record_target(&index, &patient, &TranslatorConfig::default()).expect("convert");
            let provider_id = target.find(&[
                "Patient",
                "patientPerson",
                "playedProviderPatient",
                "subjectOf",
                "patientCareProvision",
                "responsibleParty",
                "healthCareProvider",
                "id",
            ]);
            assert_eq!(provider_id.and_then(|e| e.attribute("nullFlavor")), Some("UNK"));
        }
    }

    #[test]
    fn unknown_gender_is_unmapped() {
        let bundle = empty_bundle();
        let index = ReferenceIndex::new(&bundle);
        let mut patient = patient(json!([]));
        patient.gender = Some("robot".to_owned());
        let err = record_target(&index, &patient, &TranslatorConfig::default()).expect_err("gender");
        assert!(matches!(err, TranslationError::UnmappedCode { domain: Domain::Sex, .. }));
    }

    #[test]
    fn nhs_number_only_target() {
        let target = record_target_by_nhs_number("9449304130");
        assert_eq!(
            target.find(&["Patient", "id"]).and_then(|e| e.attribute("root")),
            Some(oid::NHS_NUMBER)
        );
    }
}
