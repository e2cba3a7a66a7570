//! `AgentPerson`: the prescriber or dispenser acting for an organisation.
//!
//! Two shapes exist. A prescriber is built from a bundle `PractitionerRole` whose practitioner and
//! organisation are usually full resources; the person's id is a professional code. A dispenser
//! is built from a role whose practitioner is an identifier-only reference carrying an SDS user id.

use std::slice;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fhir::{
    ContactPoint, Identifier, Practitioner, PractitionerRole, Provenance, Reference, ReferenceIndex,
    ReferenceTarget,
};
use hl7v3::codes::{self, oid, NullFlavor};
use hl7v3::vocab::{entity, role, ClassCode, ContextControlCode, DeterminerCode, Relationship, TypeCode};
use hl7v3::Element;

use super::common::{identifier_value, job_role_code, only, role_profile_id};
use super::demographics::{display_name, name, telecom};
use super::organisation::{
    cost_centre_organisation, dispensing_organisation, represented_organisation, AgentOrgRef, CostCentre,
    Licence,
};
use crate::constants::{extension, system};
use crate::dates::{now_hl7, to_hl7_date_time};
use crate::error::required;
use crate::{TranslationError, TranslationResult};

/// The professional registration a prescriber is identified by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ProfessionalCode<'a> {
    Gmc(&'a str),
    Gmp(&'a str),
    Nmc(&'a str),
    Gphc(&'a str),
    Hcpc(&'a str),
    Professional(&'a str),
    /// NHSBSA spurious code of a prescribing role.
    Spurious(&'a str),
    /// Dental identification number.
    Din(&'a str),
}

impl<'a> ProfessionalCode<'a> {
    /// The first registration found, in priority order.
    pub(crate) fn for_author(practitioner: &'a [Identifier]) -> Option<Self> {
        let priority: [(&str, fn(&'a str) -> Self); 6] = [
            (system::GMC_NUMBER, ProfessionalCode::Gmc),
            (system::GMP_NUMBER, ProfessionalCode::Gmp),
            (system::NMC_NUMBER, ProfessionalCode::Nmc),
            (system::GPHC_NUMBER, ProfessionalCode::Gphc),
            (system::HCPC_NUMBER, ProfessionalCode::Hcpc),
            (system::PROFESSIONAL_CODE, ProfessionalCode::Professional),
        ];
        priority.into_iter().find_map(|(system, variant)| {
            Identifier::value_for_system(practitioner, system).map(variant)
        })
    }

    /// A spurious code on the role, then a DIN on the practitioner, then the author codes.
    pub(crate) fn for_responsible_party(
        role: &'a [Identifier],
        practitioner: &'a [Identifier],
    ) -> Option<Self> {
        Identifier::value_for_system(role, system::NHSBSA_SPURIOUS_CODE)
            .map(ProfessionalCode::Spurious)
            .or_else(|| {
                Identifier::value_for_system(practitioner, system::DIN_NUMBER).map(ProfessionalCode::Din)
            })
            .or_else(|| Self::for_author(practitioner))
    }

    /// The code as sent. A GMC number loses its leading `C`.
    pub(crate) fn value(&self) -> &'a str {
        match *self {
            ProfessionalCode::Gmc(value) => value
                .strip_prefix('C')
                .or_else(|| value.strip_prefix('c'))
                .unwrap_or(value),
            ProfessionalCode::Gmp(value)
            | ProfessionalCode::Nmc(value)
            | ProfessionalCode::Gphc(value)
            | ProfessionalCode::Hcpc(value)
            | ProfessionalCode::Professional(value)
            | ProfessionalCode::Spurious(value)
            | ProfessionalCode::Din(value) => value,
        }
    }

    fn id(&self) -> Element {
        codes::identifier("id", oid::AGENT_PERSON_ID, Some(self.value()))
    }
}

/// How the `agentPerson` id of a prescriber is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PersonId {
    Author,
    ResponsibleParty,
    /// The practitioner's SDS user id, as cancellations send it.
    SdsUser,
}

#[derive(Clone, Copy, Debug)]
enum PractitionerRef<'a> {
    Resource(&'a Practitioner),
    Identifier {
        identifier: &'a Identifier,
        display: Option<&'a str>,
    },
}

impl<'a> PractitionerRef<'a> {
    fn identifiers(&self) -> &'a [Identifier] {
        match *self {
            PractitionerRef::Resource(practitioner) => &practitioner.identifier,
            PractitionerRef::Identifier { identifier, .. } => slice::from_ref(identifier),
        }
    }
}

/// The prescriber `AgentPerson` for the `PractitionerRole` at `role_reference`.
pub(crate) fn prescriber_agent_person(
    index: &ReferenceIndex<'_>,
    role_reference: &Reference,
    person_id: PersonId,
    licence: Licence,
) -> TranslationResult<Element> {
    let practitioner_role: &PractitionerRole = index.resolve(role_reference)?;
    let practitioner_reference = required(
        practitioner_role.practitioner.as_ref(),
        "PractitionerRole.practitioner",
    )?;
    let organisation_reference = required(
        practitioner_role.organization.as_ref(),
        "PractitionerRole.organization",
    )?;
    let organisation = AgentOrgRef::resolve(index, organisation_reference)?;
    let mut practitioner =
        match index.resolve_identifier_or_reference::<Practitioner>(practitioner_reference)? {
            ReferenceTarget::Resource(practitioner) => PractitionerRef::Resource(practitioner),
            ReferenceTarget::Identifier { identifier, display } => {
                PractitionerRef::Identifier { identifier, display }
            }
        };

    // An organisation-only responsible party is named after its organisation.
    if person_id == PersonId::ResponsibleParty {
        if let (AgentOrgRef::Resource(org), PractitionerRef::Identifier { identifier, .. }) =
            (organisation, practitioner)
        {
            practitioner = PractitionerRef::Identifier {
                identifier,
                display: org.name.as_deref(),
            };
        }
    }

    let telecoms = prescriber_telecoms(practitioner_role, practitioner, &organisation)?;
    let person_id_element = match person_id {
        PersonId::Author => ProfessionalCode::for_author(practitioner.identifiers())
            .ok_or_else(|| TranslationError::missing("Practitioner.identifier"))?
            .id(),
        PersonId::ResponsibleParty => {
            ProfessionalCode::for_responsible_party(&practitioner_role.identifier, practitioner.identifiers())
                .ok_or_else(|| TranslationError::missing("Practitioner.identifier"))?
                .id()
        }
        PersonId::SdsUser => codes::identifier(
            "id",
            oid::SDS_UNIQUE_IDENTIFIER,
            Some(identifier_value(
                practitioner.identifiers(),
                system::SDS_USER_ID,
                "Practitioner.identifier",
            )?),
        ),
    };
    let person_name = match practitioner {
        PractitionerRef::Resource(resource) if resource.name.is_empty() => None,
        PractitionerRef::Resource(resource) => Some(name(only(&resource.name, "Practitioner.name")?)?),
        PractitionerRef::Identifier { display, .. } => display.map(display_name),
    };

    let job_role = if practitioner_role.code.is_empty() {
        None
    } else {
        Some(job_role_code(&practitioner_role.code, "PractitionerRole")?)
    };

    let represented = match CostCentre::of(index, practitioner_role)? {
        Some(cost_centre) => cost_centre_organisation(index, &cost_centre, &organisation, licence)?,
        None => represented_organisation(index, &organisation, &practitioner_role.telecom, licence)?,
    };

    Ok(role("AgentPerson", ClassCode::Agnt)
        .maybe_child(role_profile_id(&practitioner_role.identifier))
        .maybe_child(job_role)
        .with_children(telecoms)
        .child(
            entity("agentPerson", ClassCode::Psn, DeterminerCode::Instance)
                .child(person_id_element)
                .maybe_child(person_name),
        )
        .child(represented))
}

/// Role telecoms, else the practitioner's (when it is a full resource), else the
/// organisation's.
fn prescriber_telecoms(
    practitioner_role: &PractitionerRole,
    practitioner: PractitionerRef<'_>,
    organisation: &AgentOrgRef<'_>,
) -> TranslationResult<Vec<Element>> {
    let (contacts, path): (&[ContactPoint], &str) = if !practitioner_role.telecom.is_empty() {
        (&practitioner_role.telecom, "PractitionerRole.telecom")
    } else {
        match (practitioner, organisation) {
            (PractitionerRef::Resource(resource), _) => (&resource.telecom, "Practitioner.telecom"),
            (_, AgentOrgRef::Resource(org)) => (&org.telecom, "Organization.telecom"),
            _ => (&[], "PractitionerRole.telecom"),
        }
    };
    if contacts.is_empty() {
        return Err(TranslationError::missing("PractitionerRole.telecom"));
    }
    contacts.iter().map(|contact| telecom(contact, path)).collect()
}

/// `author`: the signing time and signature, then the prescriber.
///
/// A `Provenance` signature whose `who` is the requester supplies both. Without one the time is
/// now and the signature is nullFlavor `NA`.
pub(crate) fn signed_author(
    index: &ReferenceIndex<'_>,
    requester: &Reference,
) -> TranslationResult<Element> {
    let signatures: Vec<_> = index
        .all_of::<Provenance>()
        .flat_map(|provenance| provenance.signature.iter())
        .filter(|signature| {
            signature
                .who
                .as_ref()
                .is_some_and(|who| who.reference.is_some() && who.reference == requester.reference)
        })
        .collect();

    let (time, signature_text) = match signatures.as_slice() {
        [] => (
            codes::value("time", now_hl7()),
            codes::null("signatureText", NullFlavor::NotApplicable),
        ),
        [signature] => {
            let when = required(signature.when.as_deref(), "Provenance.signature.when")?;
            let data = required(signature.data.as_deref(), "Provenance.signature.data")?;
            (
                codes::value("time", to_hl7_date_time(when, "Provenance.signature.when")?),
                Element::new("signatureText").child(decode_signature(data)?),
            )
        }
        _ => {
            return Err(TranslationError::invalid(
                "Provenance.signature",
                "more than one signature for the requester",
            ))
        }
    };

    let agent_person = prescriber_agent_person(index, requester, PersonId::Author, Licence::Included)?;
    Ok(author_relationship().wrap_all("author", [time, signature_text, agent_person]))
}

fn decode_signature(data: &str) -> TranslationResult<Element> {
    let invalid = || TranslationError::invalid("Provenance.signature.data", "Invalid signature format.");
    let bytes = STANDARD.decode(data.trim()).map_err(|_| invalid())?;
    let xml = String::from_utf8(bytes).map_err(|_| invalid())?;
    hl7v3::parse(&xml).map_err(|_| invalid())
}

pub(crate) fn author_relationship() -> Relationship {
    Relationship::new(TypeCode::Aut).context_control(ContextControlCode::Op)
}

pub(crate) fn responsible_party_relationship() -> Relationship {
    Relationship::new(TypeCode::Resp).context_control(ContextControlCode::Op)
}

/// The `Extension-DM-ResponsiblePractitioner` reference, else the requester.
pub(crate) fn responsible_party_reference<'a>(
    extensions: &'a [fhir::Extension],
    requester: &'a Reference,
) -> &'a Reference {
    fhir::Extension::find(extensions, extension::RESPONSIBLE_PRACTITIONER)
        .and_then(|responsible| responsible.value_reference.as_ref())
        .unwrap_or(requester)
}

/// The dispenser `AgentPerson` of a role acting for `organisation`.
pub(crate) fn dispenser_agent_person(
    practitioner_role: &PractitionerRole,
    organisation: &AgentOrgRef<'_>,
) -> TranslationResult<Element> {
    let role_profile = identifier_value(
        &practitioner_role.identifier,
        system::SDS_ROLE_PROFILE_ID,
        "PractitionerRole.identifier",
    )?;
    let first_telecom = practitioner_role
        .telecom
        .first()
        .ok_or_else(|| TranslationError::missing("PractitionerRole.telecom"))?;

    let practitioner = required(
        practitioner_role.practitioner.as_ref(),
        "PractitionerRole.practitioner",
    )?;
    if practitioner.reference.is_some() {
        return Err(TranslationError::invalid(
            "PractitionerRole.practitioner",
            "PractitionerRole.practitioner should be an Identifier",
        ));
    }
    let practitioner_identifier = required(
        practitioner.identifier.as_ref(),
        "PractitionerRole.practitioner.identifier",
    )?;
    let sds_user_id = identifier_value(
        slice::from_ref(practitioner_identifier),
        system::SDS_USER_ID,
        "PractitionerRole.practitioner",
    )?;

    Ok(role("AgentPerson", ClassCode::Agnt)
        .child(codes::identifier("id", oid::SDS_ROLE_PROFILE, Some(role_profile)))
        .child(job_role_code(&practitioner_role.code, "PractitionerRole")?)
        .child(telecom(first_telecom, "PractitionerRole.telecom")?)
        .child(
            entity("agentPerson", ClassCode::Psn, DeterminerCode::Instance)
                .child(codes::identifier("id", oid::AGENT_PERSON_ID, Some(sds_user_id)))
                .maybe_child(practitioner.display.as_deref().map(display_name)),
        )
        .child(dispensing_organisation(organisation, Some(first_telecom))?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::code_system;
    use fhir::Bundle;
    use serde_json::json;

    fn identifiers(value: serde_json::Value) -> Vec<Identifier> {
        serde_json::from_value(value).expect("identifiers")
    }

    fn prescriber_bundle(signature: Option<serde_json::Value>) -> Bundle {
        let mut entries = vec![
            json!({"fullUrl": "urn:uuid:role", "resource": {
                "resourceType": "PractitionerRole",
                "identifier": [{"system": system::SDS_ROLE_PROFILE_ID, "value": "100102238986"}],
                "practitioner": {"reference": "urn:uuid:practitioner"},
                "organization": {"reference": "urn:uuid:org"},
                "code": [{"coding": [{"system": code_system::SDS_JOB_ROLE_CODE, "code": "R8000"}]}],
                "telecom": [{"system": "phone", "value": "01234567890", "use": "work"}]
            }}),
            json!({"fullUrl": "urn:uuid:practitioner", "resource": {
                "resourceType": "Practitioner",
                "identifier": [
                    {"system": system::SDS_USER_ID, "value": "555086689106"},
                    {"system": system::GMC_NUMBER, "value": "C6095103"}
                ],
                "name": [{"family": "Userq", "given": ["Random"], "prefix": ["MR"]}]
            }}),
            json!({"fullUrl": "urn:uuid:org", "resource": {
                "resourceType": "Organization",
                "identifier": [{"system": system::ODS_ORGANIZATION_CODE, "value": "A83008"}],
                "name": "HALLGARTH SURGERY",
                "telecom": [{"system": "phone", "value": "0115 9737320", "use": "work"}],
                "address": [{"use": "work", "line": ["HALLGARTH SURGERY", "CHEAPSIDE"], "postalCode": "DL14 4HP"}]
            }}),
        ];
        if let Some(signature) = signature {
            entries.push(json!({"fullUrl": "urn:uuid:provenance", "resource": {
                "resourceType": "Provenance", "signature": [signature]
            }}));
        }
        serde_json::from_value(json!({"resourceType": "Bundle", "entry": entries})).expect("bundle")
    }

    #[test]
    fn gmc_code_wins_and_loses_its_prefix() {
        let ids = identifiers(json!([
            {"system": system::PROFESSIONAL_CODE, "value": "P1"},
            {"system": system::GMC_NUMBER, "value": "C1234567"}
        ]));
        let code = ProfessionalCode::for_author(&ids).expect("code");
        assert_eq!(code, ProfessionalCode::Gmc("C1234567"));
        assert_eq!(code.value(), "1234567");
    }

    #[test]
    fn responsible_party_prefers_spurious_then_din() {
        let role_ids = identifiers(json!([{"system": system::NHSBSA_SPURIOUS_CODE, "value": "612345"}]));
        let practitioner_ids = identifiers(json!([
            {"system": system::DIN_NUMBER, "value": "977677"},
            {"system": system::GMP_NUMBER, "value": "G1234567"}
        ]));
        assert_eq!(
            ProfessionalCode::for_responsible_party(&role_ids, &practitioner_ids),
            Some(ProfessionalCode::Spurious("612345"))
        );
        assert_eq!(
            ProfessionalCode::for_responsible_party(&[], &practitioner_ids),
            Some(ProfessionalCode::Din("977677"))
        );
        assert_eq!(ProfessionalCode::for_responsible_party(&[], &[]), None);
    }

    #[test]
    fn prescriber_children_keep_schema_order() {
        let bundle = prescriber_bundle(None);
        let index = ReferenceIndex::new(&bundle);
        let agent = prescriber_agent_person(
            &index,
            &Reference::to("urn:uuid:role"),
            PersonId::Author,
            Licence::Included,
        )
        .expect("convert");
        let children: Vec<_> = agent.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec!["id", "code", "telecom", "agentPerson", "representedOrganization"]
        );
        assert_eq!(
            agent.find(&["agentPerson", "id"]).and_then(|id| id.attribute("extension")),
            Some("6095103")
        );
    }

    #[test]
    fn healthcare_service_stands_in_for_the_organisation() {
        let mut bundle = prescriber_bundle(None);
        if let Some(fhir::Resource::PractitionerRole(role)) = bundle.entry[0].resource.as_mut() {
            role.healthcare_service = vec![Reference::to("urn:uuid:service")];
        }
        bundle.entry.extend(
            serde_json::from_value::<Vec<fhir::BundleEntry>>(json!([
                {"fullUrl": "urn:uuid:service", "resource": {
                    "resourceType": "HealthcareService",
                    "identifier": [{"system": system::ODS_ORGANIZATION_CODE, "value": "A99968"}],
                    "name": "SOMERSET BOWEL CANCER SCREENING CENTRE",
                    "location": [{"reference": "urn:uuid:location"}],
                    "telecom": [{"system": "phone", "value": "01823333444", "use": "work"}]
                }},
                {"fullUrl": "urn:uuid:location", "resource": {
                    "resourceType": "Location",
                    "address": {"use": "work", "line": ["MUSGROVE PARK HOSPITAL"], "postalCode": "TA1 5DA"}
                }}
            ]))
            .expect("entries"),
        );
        let index = ReferenceIndex::new(&bundle);
        let agent = prescriber_agent_person(
            &index,
            &Reference::to("urn:uuid:role"),
            PersonId::Author,
            Licence::Included,
        )
        .expect("convert");
        let organisation = agent.first("representedOrganization").expect("organisation");
        assert_eq!(
            organisation.first("id").and_then(|id| id.attribute("extension")),
            Some("A99968")
        );
        assert_eq!(
            organisation
                .find(&["healthCareProviderLicense", "Organization", "id"])
                .and_then(|id| id.attribute("extension")),
            Some("A83008")
        );
    }

    #[test]
    fn cancellation_person_uses_the_sds_user_id() {
        let bundle = prescriber_bundle(None);
        let index = ReferenceIndex::new(&bundle);
        let agent = prescriber_agent_person(
            &index,
            &Reference::to("urn:uuid:role"),
            PersonId::SdsUser,
            Licence::Omitted,
        )
        .expect("convert");
        let id = agent.find(&["agentPerson", "id"]).expect("id");
        assert_eq!(id.attribute("root"), Some(oid::SDS_UNIQUE_IDENTIFIER));
        assert_eq!(id.attribute("extension"), Some("555086689106"));
        assert!(agent
            .find(&["representedOrganization", "healthCareProviderLicense"])
            .is_none());
    }

    #[test]
    fn unsigned_author_has_a_null_signature() {
        let bundle = prescriber_bundle(None);
        let index = ReferenceIndex::new(&bundle);
        let author = signed_author(&index, &Reference::to("urn:uuid:role")).expect("convert");
        assert_eq!(author.attribute("typeCode"), Some("AUT"));
        assert_eq!(author.attribute("contextControlCode"), Some("OP"));
        assert_eq!(
            author.first("signatureText").and_then(|s| s.attribute("nullFlavor")),
            Some("NA")
        );
    }

    #[test]
    fn requester_signature_is_decoded() {
        let signature_xml = r#"<Signature xmlns="http://www.w3.org/2000/09/xmldsig#"><SignatureValue>abc</SignatureValue></Signature>"#;
        let bundle = prescriber_bundle(Some(json!({
            "when": "2021-05-07T14:47:29+00:00",
            "who": {"reference": "urn:uuid:role"},
            "data": STANDARD.encode(signature_xml)
        })));
        let index = ReferenceIndex::new(&bundle);
        let author = signed_author(&index, &Reference::to("urn:uuid:role")).expect("convert");
        assert_eq!(
            author.first("time").and_then(|t| t.attribute("value")),
            Some("20210507144729")
        );
        assert_eq!(
            author.find(&["signatureText", "Signature", "SignatureValue"]).map(Element::text_content).as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn garbled_signature_is_invalid() {
        let bundle = prescriber_bundle(Some(json!({
            "when": "2021-05-07T14:47:29+00:00",
            "who": {"reference": "urn:uuid:role"},
            "data": "not base64!"
        })));
        let index = ReferenceIndex::new(&bundle);
        let err = signed_author(&index, &Reference::to("urn:uuid:role")).expect_err("garbled");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "Provenance.signature.data"
        ));
    }

    #[test]
    fn dispenser_practitioner_must_be_an_identifier() {
        let role: PractitionerRole = serde_json::from_value(json!({
            "identifier": [{"system": system::SDS_ROLE_PROFILE_ID, "value": "555086415105"}],
            "practitioner": {"reference": "urn:uuid:practitioner"},
            "code": [{"coding": [{"system": code_system::SDS_JOB_ROLE_CODE, "code": "S8000:G8000:R8000"}]}],
            "telecom": [{"system": "phone", "value": "02380798431", "use": "work"}]
        }))
        .expect("role");
        let org_identifier = Identifier::new(system::ODS_ORGANIZATION_CODE, "VNE51");
        let organisation = AgentOrgRef::Identifier {
            identifier: &org_identifier,
            name: Some("The Simple Pharmacy"),
        };
        let err = dispenser_agent_person(&role, &organisation).expect_err("reference");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "PractitionerRole.practitioner"
        ));

        let mut role = role;
        role.practitioner = Some(Reference::to_identifier(
            Identifier::new(system::SDS_USER_ID, "3415870201"),
            Some("Jackie Clark".to_owned()),
        ));
        let agent = dispenser_agent_person(&role, &organisation).expect("convert");
        let person = agent.first("agentPerson").expect("person");
        assert_eq!(
            person.first("id").and_then(|id| id.attribute("root")),
            Some(oid::AGENT_PERSON_ID)
        );
        assert_eq!(person.first("name").map(Element::text_content).as_deref(), Some("Jackie Clark"));
    }
}
