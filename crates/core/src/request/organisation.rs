//! Organisations: the represented organisation of an agent person, its provider licence and the
//! patient's registered GP practice.

use std::collections::HashSet;
use std::slice;

use fhir::{
    ContactPoint, HealthcareService, Identifier, Location, Organization, PractitionerRole, Reference,
    ReferenceIndex, ReferenceTarget, Resource,
};
use hl7v3::vocab::{entity, role, ClassCode, DeterminerCode};
use hl7v3::Element;

use super::common::{identifier_value, only, organisation_type_not_specified, sds_organisation_id};
use super::demographics::{address, telecom};
use crate::constants::system;
use crate::error::required;
use crate::{TranslationError, TranslationResult};

/// An organisation slot: a bundle resource, or a logical reference carrying only an ODS code and
/// a display.
#[derive(Clone, Copy, Debug)]
pub(crate) enum AgentOrgRef<'a> {
    Resource(&'a Organization),
    Identifier {
        identifier: &'a Identifier,
        name: Option<&'a str>,
    },
}

/// Whether a represented organisation carries its `healthCareProviderLicense`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Licence {
    Included,
    Omitted,
}

impl<'a> AgentOrgRef<'a> {
    pub(crate) fn resolve(
        index: &ReferenceIndex<'a>,
        reference: &'a Reference,
    ) -> TranslationResult<Self> {
        Ok(match index.resolve_identifier_or_reference::<Organization>(reference)? {
            ReferenceTarget::Resource(organisation) => AgentOrgRef::Resource(organisation),
            ReferenceTarget::Identifier { identifier, display } => AgentOrgRef::Identifier {
                identifier,
                name: display,
            },
        })
    }

    pub(crate) fn ods_code(&self) -> TranslationResult<&'a str> {
        match *self {
            AgentOrgRef::Resource(organisation) => identifier_value(
                &organisation.identifier,
                system::ODS_ORGANIZATION_CODE,
                "Organization.identifier",
            ),
            AgentOrgRef::Identifier { identifier, .. } => {
                required(identifier.value.as_deref(), "Organization.identifier.value")
            }
        }
    }

    pub(crate) fn name(&self) -> Option<&'a str> {
        match *self {
            AgentOrgRef::Resource(organisation) => organisation.name.as_deref(),
            AgentOrgRef::Identifier { name, .. } => name,
        }
    }

    /// The organisation's own telecoms. Identifier-only references have none.
    fn telecoms(&self) -> &'a [ContactPoint] {
        match *self {
            AgentOrgRef::Resource(organisation) => &organisation.telecom,
            AgentOrgRef::Identifier { .. } => &[],
        }
    }

    /// The `partOf` parent, or the organisation itself at the top of its hierarchy.
    fn parent(&self, index: &ReferenceIndex<'a>) -> TranslationResult<Self> {
        if let AgentOrgRef::Resource(organisation) = *self {
            if let Some(parent) = &organisation.part_of {
                return AgentOrgRef::resolve(index, parent);
            }
        }
        Ok(*self)
    }
}

/// `id`, type code `999` and the mandatory name.
fn common_details(name: &str, organisation: &AgentOrgRef<'_>) -> TranslationResult<Element> {
    let organisation_name = organisation
        .name()
        .ok_or_else(|| TranslationError::invalid("Organization.name", "Name must be provided."))?;
    Ok(entity(name, ClassCode::Org, DeterminerCode::Instance)
        .child(sds_organisation_id(organisation.ods_code()?))
        .child(organisation_type_not_specified())
        .child(Element::new("name").text(organisation_name)))
}

/// The prescriber's `representedOrganization`.
///
/// A resolved organisation must carry exactly one telecom and one address. An identifier-only
/// organisation borrows the role's first telecom and has no address.
pub(crate) fn represented_organisation(
    index: &ReferenceIndex<'_>,
    organisation: &AgentOrgRef<'_>,
    role_telecom: &[ContactPoint],
    licence: Licence,
) -> TranslationResult<Element> {
    let element = common_details("representedOrganization", organisation)?;
    let element = match organisation {
        AgentOrgRef::Resource(resource) => element
            .child(telecom(only(&resource.telecom, "Organization.telecom")?, "Organization.telecom")?)
            .child(address(only(&resource.address, "Organization.address")?)?),
        AgentOrgRef::Identifier { .. } => {
            let fallback = role_telecom
                .first()
                .ok_or_else(|| TranslationError::missing("PractitionerRole.telecom"))?;
            element.child(telecom(fallback, "PractitionerRole.telecom")?)
        }
    };
    with_licence(index, element, organisation, licence)
}

fn with_licence(
    index: &ReferenceIndex<'_>,
    element: Element,
    organisation: &AgentOrgRef<'_>,
    licence: Licence,
) -> TranslationResult<Element> {
    match licence {
        Licence::Omitted => Ok(element),
        Licence::Included => {
            let parent = organisation.parent(index)?;
            Ok(element.child(
                role("healthCareProviderLicense", ClassCode::Prov)
                    .child(common_details("Organization", &parent)?),
            ))
        }
    }
}

/// A `HealthcareService` the prescriber works for, standing in for the organisation as cost
/// centre.
///
/// An identifier-only service takes its telecom and location from the role.
#[derive(Clone, Copy, Debug)]
pub(crate) struct CostCentre<'a> {
    identifiers: &'a [Identifier],
    name: Option<&'a str>,
    telecom: &'a [ContactPoint],
    location: &'a [Reference],
}

impl<'a> CostCentre<'a> {
    pub(crate) fn of(
        index: &ReferenceIndex<'a>,
        practitioner_role: &'a PractitionerRole,
    ) -> TranslationResult<Option<Self>> {
        let Some(reference) = practitioner_role.healthcare_service.first() else {
            return Ok(None);
        };
        let cost_centre = match index.resolve_identifier_or_reference::<HealthcareService>(reference)? {
            ReferenceTarget::Resource(service) => CostCentre {
                identifiers: &service.identifier,
                name: service.name.as_deref(),
                telecom: &service.telecom,
                location: &service.location,
            },
            ReferenceTarget::Identifier { identifier, display } => CostCentre {
                identifiers: slice::from_ref(identifier),
                name: display,
                telecom: &practitioner_role.telecom,
                location: &practitioner_role.location,
            },
        };
        Ok(Some(cost_centre))
    }
}

/// The prescriber's `representedOrganization` when a healthcare service is the cost centre.
///
/// The address is the service's single `Location`. The licence still names the parent of
/// `organisation`.
pub(crate) fn cost_centre_organisation(
    index: &ReferenceIndex<'_>,
    cost_centre: &CostCentre<'_>,
    organisation: &AgentOrgRef<'_>,
    licence: Licence,
) -> TranslationResult<Element> {
    let ods_code = identifier_value(
        cost_centre.identifiers,
        system::ODS_ORGANIZATION_CODE,
        "HealthcareService.identifier",
    )?;
    let name = cost_centre
        .name
        .ok_or_else(|| TranslationError::invalid("HealthcareService.name", "Name must be provided."))?;
    let location: &Location = index.resolve(only(cost_centre.location, "HealthcareService.location")?)?;
    let location_address = location
        .address
        .as_ref()
        .ok_or_else(|| TranslationError::invalid("Location.address", "Address must be provided."))?;

    let element = entity("representedOrganization", ClassCode::Org, DeterminerCode::Instance)
        .child(sds_organisation_id(ods_code))
        .child(organisation_type_not_specified())
        .child(Element::new("name").text(name))
        .child(telecom(
            only(cost_centre.telecom, "HealthcareService.telecom")?,
            "HealthcareService.telecom",
        )?)
        .child(address(location_address)?);
    with_licence(index, element, organisation, licence)
}

/// The dispenser's `representedOrganization`: name and address are optional, and the role's
/// first telecom stands in when the organisation has none.
pub(crate) fn dispensing_organisation(
    organisation: &AgentOrgRef<'_>,
    role_telecom: Option<&ContactPoint>,
) -> TranslationResult<Element> {
    let contact = organisation
        .telecoms()
        .first()
        .or(role_telecom)
        .ok_or_else(|| TranslationError::missing("Organization.telecom"))?;
    let first_address = match organisation {
        AgentOrgRef::Resource(resource) => resource.address.first().map(address).transpose()?,
        AgentOrgRef::Identifier { .. } => None,
    };
    Ok(entity("representedOrganization", ClassCode::Org, DeterminerCode::Instance)
        .child(sds_organisation_id(organisation.ods_code()?))
        .child(organisation_type_not_specified())
        .maybe_child(organisation.name().map(|name| Element::new("name").text(name)))
        .child(telecom(contact, "Organization.telecom")?)
        .maybe_child(first_address))
}

/// The ODS code of the patient's registered practice.
///
/// The chain `generalPractitioner → PractitionerRole → Organization → partOf …` is followed until
/// an organisation has no parent or a reference carries only an identifier. The first
/// organisation met supplies the code. More than `max_depth` hops, or revisiting a reference, is
/// [`TranslationError::UnboundedReferenceChain`].
pub(crate) fn gp_practice_ods<'a>(
    index: &ReferenceIndex<'a>,
    general_practitioner: &'a [Reference],
    max_depth: usize,
) -> TranslationResult<Option<&'a str>> {
    const PATH: &str = "Patient.generalPractitioner";

    let Some(mut current) = general_practitioner.first() else {
        return Ok(None);
    };
    let mut visited: HashSet<&'a str> = HashSet::new();
    let mut practice: Option<&'a str> = None;
    let unbounded = || TranslationError::UnboundedReferenceChain {
        path: PATH.to_owned(),
        depth: max_depth,
    };

    loop {
        let Some(literal) = current.reference.as_deref() else {
            let by_identifier = current
                .identifier
                .as_ref()
                .and_then(|identifier| identifier.value.as_deref());
            return Ok(practice.or(by_identifier));
        };
        if visited.len() >= max_depth || !visited.insert(literal) {
            return Err(unbounded());
        }
        current = match index.resolve_any(current)? {
            Resource::Organization(organisation) => {
                if practice.is_none() {
                    practice = Some(identifier_value(
                        &organisation.identifier,
                        system::ODS_ORGANIZATION_CODE,
                        "Organization.identifier",
                    )?);
                }
                match &organisation.part_of {
                    Some(parent) => parent,
                    None => return Ok(practice),
                }
            }
            Resource::PractitionerRole(practitioner_role) => {
                required(practitioner_role.organization.as_ref(), "PractitionerRole.organization")?
            }
            other => {
                return Err(TranslationError::ReferenceTypeMismatch {
                    reference: literal.to_owned(),
                    expected: "Organization".to_owned(),
                    actual: other.resource_type().to_owned(),
                })
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::Bundle;
    use serde_json::json;

    fn bundle(entries: serde_json::Value) -> Bundle {
        serde_json::from_value(json!({"resourceType": "Bundle", "entry": entries})).expect("bundle")
    }

    fn ods(code: &str) -> serde_json::Value {
        json!([{"system": system::ODS_ORGANIZATION_CODE, "value": code}])
    }

    #[test]
    fn practice_is_the_first_organisation_in_the_chain() {
        let bundle = bundle(json!([
            {"fullUrl": "urn:uuid:role", "resource": {
                "resourceType": "PractitionerRole", "organization": {"reference": "urn:uuid:surgery"}
            }},
            {"fullUrl": "urn:uuid:surgery", "resource": {
                "resourceType": "Organization", "identifier": ods("A83008"),
                "partOf": {"reference": "urn:uuid:ccg"}
            }},
            {"fullUrl": "urn:uuid:ccg", "resource": {
                "resourceType": "Organization", "identifier": ods("84H")
            }}
        ]));
        let index = ReferenceIndex::new(&bundle);
        let references = vec![Reference::to("urn:uuid:role")];
        assert_eq!(gp_practice_ods(&index, &references, 16).expect("walk"), Some("A83008"));
    }

    #[test]
    fn identifier_only_practice_needs_no_resolution() {
        let bundle = bundle(json!([]));
        let index = ReferenceIndex::new(&bundle);
        let references = vec![Reference::to_identifier(
            Identifier::new(system::ODS_ORGANIZATION_CODE, "B81001"),
            None,
        )];
        assert_eq!(gp_practice_ods(&index, &references, 16).expect("walk"), Some("B81001"));
        assert_eq!(gp_practice_ods(&index, &[], 16).expect("walk"), None);
    }

    #[test]
    fn part_of_cycle_is_rejected() {
        let bundle = bundle(json!([
            {"fullUrl": "urn:uuid:a", "resource": {
                "resourceType": "Organization", "identifier": ods("A1"), "partOf": {"reference": "urn:uuid:b"}
            }},
            {"fullUrl": "urn:uuid:b", "resource": {
                "resourceType": "Organization", "identifier": ods("B1"), "partOf": {"reference": "urn:uuid:a"}
            }}
        ]));
        let index = ReferenceIndex::new(&bundle);
        let references = vec![Reference::to("urn:uuid:a")];
        let err = gp_practice_ods(&index, &references, 16).expect_err("cycle");
        assert!(matches!(
            err,
            TranslationError::UnboundedReferenceChain { ref path, depth: 16 } if path == "Patient.generalPractitioner"
        ));
    }

    #[test]
    fn deep_chains_stop_at_the_configured_depth() {
        let bundle = bundle(json!([
            {"fullUrl": "urn:uuid:a", "resource": {
                "resourceType": "Organization", "identifier": ods("A1"), "partOf": {"reference": "urn:uuid:b"}
            }},
            {"fullUrl": "urn:uuid:b", "resource": {
                "resourceType": "Organization", "identifier": ods("B1"), "partOf": {"reference": "urn:uuid:c"}
            }},
            {"fullUrl": "urn:uuid:c", "resource": {"resourceType": "Organization", "identifier": ods("C1")}}
        ]));
        let index = ReferenceIndex::new(&bundle);
        let references = vec![Reference::to("urn:uuid:a")];
        assert!(gp_practice_ods(&index, &references, 3).is_ok());
        let err = gp_practice_ods(&index, &references, 2).expect_err("too deep");
        assert!(matches!(err, TranslationError::UnboundedReferenceChain { depth: 2, .. }));
    }

    #[test]
    fn licence_names_the_parent_organisation() {
        let bundle = bundle(json!([
            {"fullUrl": "urn:uuid:org", "resource": {
                "resourceType": "Organization",
                "identifier": ods("RBA"),
                "name": "TAUNTON AND SOMERSET NHS FOUNDATION TRUST",
                "telecom": [{"system": "phone", "value": "01823333444", "use": "work"}],
                "address": [{"use": "work", "line": ["MUSGROVE PARK HOSPITAL"], "postalCode": "TA1 5DA"}],
                "partOf": {
                    "identifier": {"system": system::ODS_ORGANIZATION_CODE, "value": "RBA00"},
                    "display": "SOMERSET TRUST"
                }
            }}
        ]));
        let index = ReferenceIndex::new(&bundle);
        let reference = Reference::to("urn:uuid:org");
        let organisation = AgentOrgRef::resolve(&index, &reference).expect("resolve");

        let element = represented_organisation(&index, &organisation, &[], Licence::Included)
            .expect("convert");
        let children: Vec<_> = element.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec!["id", "code", "name", "telecom", "addr", "healthCareProviderLicense"]
        );
        let licence_id = element
            .find(&["healthCareProviderLicense", "Organization", "id"])
            .and_then(|id| id.attribute("extension"));
        assert_eq!(licence_id, Some("RBA00"));

        let without = represented_organisation(&index, &organisation, &[], Licence::Omitted)
            .expect("convert");
        assert!(without.first("healthCareProviderLicense").is_none());
    }

    #[test]
    fn identifier_only_organisation_borrows_the_role_telecom() {
        let bundle = bundle(json!([]));
        let index = ReferenceIndex::new(&bundle);
        let reference = Reference::to_identifier(
            Identifier::new(system::ODS_ORGANIZATION_CODE, "VNE51"),
            Some("The Simple Pharmacy".to_owned()),
        );
        let organisation = AgentOrgRef::resolve(&index, &reference).expect("resolve");
        let role_telecom: Vec<ContactPoint> =
            serde_json::from_value(json!([{"system": "phone", "value": "01234567890", "use": "work"}]))
                .expect("telecom");

        let element = represented_organisation(&index, &organisation, &role_telecom, Licence::Omitted)
            .expect("convert");
        let children: Vec<_> = element.elements().map(Element::name).collect();
        assert_eq!(children, vec!["id", "code", "name", "telecom"]);

        let dispensing = dispensing_organisation(&organisation, role_telecom.first()).expect("convert");
        assert_eq!(
            dispensing.find(&["telecom"]).and_then(|t| t.attribute("value")),
            Some("tel:01234567890")
        );
    }

    fn practice_with_service(service_reference: serde_json::Value) -> Bundle {
        bundle(json!([
            {"fullUrl": "urn:uuid:role", "resource": {
                "resourceType": "PractitionerRole",
                "organization": {"reference": "urn:uuid:trust"},
                "healthcareService": [service_reference],
                "location": [{"reference": "urn:uuid:location"}],
                "telecom": [{"system": "phone", "value": "01890807060", "use": "work"}]
            }},
            {"fullUrl": "urn:uuid:trust", "resource": {
                "resourceType": "Organization",
                "identifier": ods("RBA"),
                "name": "TAUNTON AND SOMERSET NHS FOUNDATION TRUST"
            }},
            {"fullUrl": "urn:uuid:service", "resource": {
                "resourceType": "HealthcareService",
                "identifier": ods("A99968"),
                "name": "SOMERSET BOWEL CANCER SCREENING CENTRE",
                "location": [{"reference": "urn:uuid:location"}],
                "telecom": [{"system": "phone", "value": "01823333444", "use": "work"}]
            }},
            {"fullUrl": "urn:uuid:location", "resource": {
                "resourceType": "Location",
                "address": {"use": "work", "line": ["MUSGROVE PARK HOSPITAL"], "city": "TAUNTON", "postalCode": "TA1 5DA"}
            }}
        ]))
    }

    #[test]
    fn healthcare_service_is_the_cost_centre() {
        let bundle = practice_with_service(json!({"reference": "urn:uuid:service"}));
        let index = ReferenceIndex::new(&bundle);
        let practitioner_role: &PractitionerRole =
            index.resolve_str("urn:uuid:role").expect("role");
        let cost_centre = CostCentre::of(&index, practitioner_role)
            .expect("resolve")
            .expect("service");
        let trust_reference = Reference::to("urn:uuid:trust");
        let trust = AgentOrgRef::resolve(&index, &trust_reference).expect("trust");

        let element = cost_centre_organisation(&index, &cost_centre, &trust, Licence::Included)
            .expect("convert");
        let children: Vec<_> = element.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec!["id", "code", "name", "telecom", "addr", "healthCareProviderLicense"]
        );
        assert_eq!(
            element.first("id").and_then(|id| id.attribute("extension")),
            Some("A99968")
        );
        assert_eq!(
            element.first("telecom").and_then(|t| t.attribute("value")),
            Some("tel:01823333444")
        );
        assert_eq!(
            element.find(&["addr", "postalCode"]).map(Element::text_content).as_deref(),
            Some("TA1 5DA")
        );
        assert_eq!(
            element
                .find(&["healthCareProviderLicense", "Organization", "id"])
                .and_then(|id| id.attribute("extension")),
            Some("RBA")
        );
    }

    #[test]
    fn identifier_only_service_uses_the_role_contact_and_location() {
        let bundle = practice_with_service(json!({
            "identifier": {"system": system::ODS_ORGANIZATION_CODE, "value": "A99968"},
            "display": "SOMERSET BOWEL CANCER SCREENING CENTRE"
        }));
        let index = ReferenceIndex::new(&bundle);
        let practitioner_role: &PractitionerRole =
            index.resolve_str("urn:uuid:role").expect("role");
        let cost_centre = CostCentre::of(&index, practitioner_role)
            .expect("resolve")
            .expect("service");
        let trust_reference = Reference::to("urn:uuid:trust");
        let trust = AgentOrgRef::resolve(&index, &trust_reference).expect("trust");

        let element = cost_centre_organisation(&index, &cost_centre, &trust, Licence::Omitted)
            .expect("convert");
        assert_eq!(
            element.first("name").map(Element::text_content).as_deref(),
            Some("SOMERSET BOWEL CANCER SCREENING CENTRE")
        );
        assert_eq!(
            element.first("telecom").and_then(|t| t.attribute("value")),
            Some("tel:01890807060")
        );
    }

    #[test]
    fn location_without_address_is_invalid() {
        let mut bundle = practice_with_service(json!({"reference": "urn:uuid:service"}));
        if let Some(Resource::Location(location)) = bundle.entry[3].resource.as_mut() {
            location.address = None;
        }
        let index = ReferenceIndex::new(&bundle);
        let practitioner_role: &PractitionerRole =
            index.resolve_str("urn:uuid:role").expect("role");
        let cost_centre = CostCentre::of(&index, practitioner_role)
            .expect("resolve")
            .expect("service");
        let trust_reference = Reference::to("urn:uuid:trust");
        let trust = AgentOrgRef::resolve(&index, &trust_reference).expect("trust");
        let err = cost_centre_organisation(&index, &cost_centre, &trust, Licence::Omitted)
            .expect_err("no address");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "Location.address"
        ));
    }

    #[test]
    fn missing_organisation_name_is_invalid() {
        let bundle = bundle(json!([]));
        let index = ReferenceIndex::new(&bundle);
        let reference = Reference::to_identifier(Identifier::new(system::ODS_ORGANIZATION_CODE, "X1"), None);
        let organisation = AgentOrgRef::resolve(&index, &reference).expect("resolve");
        let err = represented_organisation(&index, &organisation, &[], Licence::Omitted)
            .expect_err("no name");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "Organization.name"
        ));
    }
}
