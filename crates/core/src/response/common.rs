//! Readers shared by the inbound translations: participants, demographics and namespace-blind
//! navigation of parsed HL7 V3 documents.

use fhir::{
    Address, BundleEntry, CodeableConcept, Coding, ContactPoint, Extension, HumanName, Identifier,
    MessageDestination, MessageHeader, MessageResponse, MessageSource, Patient, PractitionerRole,
    Reference,
};
use hl7v3::Element;
use uuid::Uuid;

use super::full_url;
use crate::code_systems::to_source;
use crate::constants::{code_system, extension, system};
use crate::dates::from_hl7_date;
use crate::{Domain, TranslationError, TranslationResult};

const SPINE_ODS_CODE: &str = "X26";

pub(super) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The `MessageHeader` of a bundle the Spine sends back, answering `request_id`.
pub(super) fn message_header(
    message_id: &str,
    (event_code, event_display): (&str, &str),
    destination_ods: Option<&str>,
    request_id: &str,
    focus: Vec<Reference>,
) -> MessageHeader {
    let ods_identifier = |code: &str| Identifier::new(system::ODS_ORGANIZATION_CODE, code);
    MessageHeader {
        id: Some(new_id()),
        extension: vec![Extension {
            value_identifier: Some(Identifier::new(system::RFC4122, message_id.to_lowercase())),
            ..Extension::with_url(extension::MESSAGE_ID)
        }],
        event_coding: Some(Coding::new(code_system::MESSAGE_EVENT, event_code, event_display)),
        destination: destination_ods
            .map(|ods| MessageDestination {
                endpoint: Some(format!("urn:nhs-uk:addressing:ods:{ods}")),
                receiver: Some(Reference::to_identifier(ods_identifier(ods), None)),
            })
            .into_iter()
            .collect(),
        sender: Some(Reference::to_identifier(
            ods_identifier(SPINE_ODS_CODE),
            Some("NHS Digital Spine".to_owned()),
        )),
        source: Some(MessageSource {
            name: Some("NHS Spine".to_owned()),
            endpoint: None,
        }),
        response: Some(MessageResponse {
            identifier: request_id.to_lowercase(),
            code: "ok".to_owned(),
        }),
        focus,
    }
}

// ============================================================================
// Participants
// ============================================================================

/// A `PractitionerRole` read back from an `AgentPerson`, keyed by its role profile.
pub(super) struct TranslatedRole {
    pub id: String,
    pub role_profile: String,
    pub role: PractitionerRole,
}

impl TranslatedRole {
    pub(super) fn of(agent_person: &Element, at: &str) -> TranslationResult<Self> {
        let role_profile = required_attribute(
            required_path(agent_person, &["id"])?,
            "extension",
            &format!("{at}.id"),
        )?
        .to_owned();
        let person = required_path(agent_person, &["agentPerson"])?;
        let organisation = required_path(agent_person, &["representedOrganization"])?;

        let practitioner = Reference::to_identifier(
            Identifier::new(
                system::SDS_USER_ID,
                required_attribute(required_path(person, &["id"])?, "extension", &format!("{at}.agentPerson.id"))?,
            ),
            path(person, &["name"]).map(name_text).filter(|name| !name.is_empty()),
        );
        let organisation_reference = Reference::to_identifier(
            Identifier::new(
                system::ODS_ORGANIZATION_CODE,
                required_attribute(
                    required_path(organisation, &["id"])?,
                    "extension",
                    &format!("{at}.representedOrganization.id"),
                )?,
            ),
            path(organisation, &["name"]).map(Element::text_content),
        );
        let job_role = path(agent_person, &["code"])
            .and_then(|code| code.attribute("code"))
            .map(|code| {
                CodeableConcept::single(Coding {
                    system: Some(code_system::SDS_JOB_ROLE_CODE.to_owned()),
                    code: Some(code.to_owned()),
                    display: None,
                })
            });

        Ok(Self {
            id: new_id(),
            role: PractitionerRole {
                identifier: vec![Identifier::new(system::SDS_ROLE_PROFILE_ID, role_profile.as_str())],
                practitioner: Some(practitioner),
                organization: Some(organisation_reference),
                code: job_role.into_iter().collect(),
                telecom: children(agent_person, "telecom").map(telecom).collect::<TranslationResult<_>>()?,
                ..PractitionerRole::default()
            },
            role_profile,
        })
    }
}

/// Bundle entries for the translated roles, in the order they were first seen.
pub(super) fn role_entries(roles: Vec<TranslatedRole>) -> impl Iterator<Item = BundleEntry> {
    roles.into_iter().map(|translated| {
        BundleEntry::new(
            full_url(&translated.id),
            PractitionerRole {
                id: Some(translated.id),
                ..translated.role
            },
        )
    })
}

/// Position of the role matching `agent_person`'s role profile, adding it when new.
pub(super) fn roles_index(
    roles: &mut Vec<TranslatedRole>,
    agent_person: &Element,
    at: &str,
) -> TranslationResult<usize> {
    let role_profile = path(agent_person, &["id"]).and_then(|id| id.attribute("extension"));
    if let Some(index) = roles
        .iter()
        .position(|role| Some(role.role_profile.as_str()) == role_profile)
    {
        return Ok(index);
    }
    roles.push(TranslatedRole::of(agent_person, at)?);
    Ok(roles.len() - 1)
}

pub(super) fn patient(patient: &Element) -> TranslationResult<Patient> {
    let nhs_number = required_attribute(
        required_path(patient, &["id"])?,
        "extension",
        "recordTarget.Patient.id",
    )?;
    let person = required_path(patient, &["patientPerson"])?;

    let gender = path(person, &["administrativeGenderCode"])
        .and_then(|gender| gender.attribute("code"))
        .map(|code| to_source(Domain::Sex, code).map(|source| source.code.to_owned()))
        .transpose()?;
    let birth_date = path(person, &["birthTime"])
        .and_then(|birth| birth.attribute("value"))
        .map(|value| from_hl7_date(value, "recordTarget.Patient.patientPerson.birthTime"))
        .transpose()?;
    let general_practitioner = path(
        person,
        &[
            "playedProviderPatient",
            "subjectOf",
            "patientCareProvision",
            "responsibleParty",
            "healthCareProvider",
            "id",
        ],
    )
    .and_then(|id| id.attribute("extension"))
    .map(|ods| Reference::to_identifier(Identifier::new(system::ODS_ORGANIZATION_CODE, ods), None));

    Ok(Patient {
        identifier: vec![Identifier::new(system::NHS_NUMBER, nhs_number)],
        name: children(person, "name").map(human_name).collect::<TranslationResult<_>>()?,
        telecom: children(patient, "telecom").map(telecom).collect::<TranslationResult<_>>()?,
        gender,
        birth_date,
        address: children(patient, "addr").map(address).collect::<TranslationResult<_>>()?,
        general_practitioner: general_practitioner.into_iter().collect(),
        ..Patient::default()
    })
}

// ============================================================================
// Demographics
// ============================================================================

fn source_use(domain: Domain, element: &Element) -> TranslationResult<Option<String>> {
    element
        .attribute("use")
        .map(|code| to_source(domain, code).map(|source| source.code.to_owned()))
        .transpose()
}

fn texts(element: &Element, name: &str) -> Vec<String> {
    children(element, name)
        .map(Element::text_content)
        .filter(|text| !text.is_empty())
        .collect()
}

fn name_text(name: &Element) -> String {
    let parts: Vec<String> = ["prefix", "given", "family", "suffix"]
        .iter()
        .flat_map(|part| texts(name, part))
        .collect();
    if parts.is_empty() {
        name.text_content()
    } else {
        parts.join(" ")
    }
}

fn human_name(name: &Element) -> TranslationResult<HumanName> {
    let name_use = source_use(Domain::NameUse, name)?;
    if name.elements().next().is_none() {
        return Ok(HumanName {
            name_use,
            text: Some(name.text_content()),
            ..HumanName::default()
        });
    }
    Ok(HumanName {
        name_use,
        family: texts(name, "family").into_iter().next(),
        given: texts(name, "given"),
        prefix: texts(name, "prefix"),
        suffix: texts(name, "suffix"),
        ..HumanName::default()
    })
}

fn telecom(telecom: &Element) -> TranslationResult<ContactPoint> {
    Ok(ContactPoint {
        system: Some("phone".to_owned()),
        value: telecom
            .attribute("value")
            .map(|value| value.split_once(':').map_or(value, |(_, number)| number).to_owned()),
        contact_use: source_use(Domain::TelecomUse, telecom)?,
    })
}

fn address(address: &Element) -> TranslationResult<Address> {
    let address_use = source_use(Domain::AddressUse, address)?;
    if address.elements().next().is_none() {
        return Ok(Address {
            address_use,
            text: Some(address.text_content()),
            ..Address::default()
        });
    }
    Ok(Address {
        address_use,
        line: texts(address, "streetAddressLine"),
        postal_code: texts(address, "postalCode").into_iter().next(),
        ..Address::default()
    })
}

// ============================================================================
// Navigation
// ============================================================================

fn local_name(name: &str) -> &str {
    name.rsplit(':').next().unwrap_or(name)
}

pub(super) fn children<'a>(element: &'a Element, name: &'a str) -> impl Iterator<Item = &'a Element> {
    element
        .elements()
        .filter(move |child| local_name(child.name()) == name)
}

pub(super) fn path<'a>(element: &'a Element, names: &[&str]) -> Option<&'a Element> {
    names.iter().try_fold(element, |current, name| {
        current
            .elements()
            .find(|child| local_name(child.name()) == *name)
    })
}

pub(super) fn required_path<'a>(element: &'a Element, names: &[&str]) -> TranslationResult<&'a Element> {
    path(element, names).ok_or_else(|| {
        TranslationError::missing(format!("{}.{}", local_name(element.name()), names.join(".")))
    })
}

pub(super) fn required_attribute<'a>(element: &'a Element, attribute: &str, at: &str) -> TranslationResult<&'a str> {
    element
        .attribute(attribute)
        .ok_or_else(|| TranslationError::missing(format!("{at}@{attribute}")))
}

/// The `attribute` of the element at `names`, which must both exist.
pub(super) fn attribute<'a>(element: &'a Element, names: &[&str], attribute: &str) -> TranslationResult<&'a str> {
    required_attribute(required_path(element, names)?, attribute, &names.join("."))
}

pub(super) fn optional_attribute<'a>(element: &'a Element, names: &[&str], attribute: &str) -> Option<&'a str> {
    path(element, names).and_then(|found| found.attribute(attribute))
}

pub(super) fn find_descendant<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    if local_name(element.name()) == name {
        return Some(element);
    }
    element
        .elements()
        .find_map(|child| find_descendant(child, name))
}
