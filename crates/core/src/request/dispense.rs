//! `DispenseNotification`: what a dispenser supplied against a released prescription.
//!
//! Every `MedicationDispense` carries the `MedicationRequest` it fulfils and the dispenser's
//! `PractitionerRole` as contained resources. Dispenses of the same requested item are merged
//! into one supplied line item with a quantity component per dispense.

use fhir::{
    Bundle, CodeableConcept, ContainedScope, Extension, MedicationDispense, MedicationRequest,
    MessageHeader, Organization, Patient, PractitionerRole, ReferenceIndex,
};
use hl7v3::codes::{self, AnnotationCode, NullFlavor};
use hl7v3::vocab::{
    act, entity, role, ClassCode, ContextControlCode, DeterminerCode, MoodCode, Relationship, TypeCode,
};
use hl7v3::Element;
use tracing::debug;

use super::agent_person::{author_relationship, dispenser_agent_person};
use super::common::{
    act_ref, annotation, coding_code, coding_for_system, count, identifier_value, medication_coding,
    message_id, only, organisation_type_not_specified, prescription_id_annotation,
    required_extension, sds_organisation_id, text_value, PrescriptionIds, RepeatInformation,
};
use super::line_item::supply_quantity;
use super::organisation::AgentOrgRef;
use super::patient::record_target_by_nhs_number;
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, extension, message_type, snomed, system, template};
use crate::dates::{now_hl7, to_hl7_date_time};
use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

pub(super) const SUPPLY_ANNOTATION: Relationship = Relationship::pertinent(true).separatable(false);

pub(super) const FULFILMENT: Relationship = Relationship::new(TypeCode::Flfs)
    .inversion(false)
    .negation(false)
    .separatable(true)
    .template(template::SOURCE_OF1);

/// A dispense together with the request it fulfils.
struct Fulfilment<'a> {
    dispense: &'a MedicationDispense,
    request: &'a MedicationRequest,
}

impl<'a> Fulfilment<'a> {
    fn of(dispense: &'a MedicationDispense) -> TranslationResult<Self> {
        let authorising = dispense
            .authorizing_prescription
            .first()
            .ok_or_else(|| TranslationError::missing("MedicationDispense.authorizingPrescription"))?;
        let request = ContainedScope::new(&dispense.contained).resolve(authorising)?;
        Ok(Self { dispense, request })
    }

    fn request_item_number(&self) -> TranslationResult<&'a str> {
        identifier_value(
            &self.request.identifier,
            system::PRESCRIPTION_ORDER_ITEM_NUMBER,
            "MedicationDispense.contained(MedicationRequest).identifier",
        )
    }
}

/// Builds the `DispenseNotification` for a dispense notification bundle.
pub(crate) fn dispense_notification(
    bundle: &Bundle,
    _config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let index = ReferenceIndex::new(bundle);
    let message_id = message_id(bundle.identifier.as_ref(), "Bundle.identifier")?;
    let header = index
        .first_of::<MessageHeader>()
        .ok_or_else(|| TranslationError::missing("Bundle.entry.ofType(MessageHeader)"))?;
    let fulfilments = index
        .all_of::<MedicationDispense>()
        .map(Fulfilment::of)
        .collect::<TranslationResult<Vec<_>>>()?;
    let first = fulfilments
        .first()
        .ok_or_else(|| TranslationError::missing("Bundle.entry.ofType(MedicationDispense)"))?;

    let performer = first
        .dispense
        .performer
        .first()
        .ok_or_else(|| TranslationError::missing("MedicationDispense.performer"))?;
    let practitioner_role: &PractitionerRole =
        ContainedScope::new(&first.dispense.contained).resolve(&performer.actor)?;
    let organisation_reference = required(
        practitioner_role.organization.as_ref(),
        "MedicationDispense.contained(PractitionerRole).organization",
    )?;
    if organisation_reference.reference.is_none() {
        return Err(TranslationError::invalid(
            "MedicationDispense.contained(PractitionerRole).organization",
            "PractitionerRole.organization should be a Reference",
        ));
    }
    let organisation: &Organization = index.resolve(organisation_reference)?;

    let when_handed_over = required(
        first.dispense.when_handed_over.as_deref(),
        "MedicationDispense.whenHandedOver",
    )?;
    let dispense_item_numbers = fulfilments
        .iter()
        .map(|fulfilment| dispense_item_number(fulfilment.dispense))
        .collect::<TranslationResult<Vec<_>>>()?;
    let category = act("pertinentCareRecordElementCategory", ClassCode::Category, MoodCode::Evn)
        .child(codes::snomed(
            "code",
            snomed::MEDICATION_CARE_RECORD.0,
            Some(snomed::MEDICATION_CARE_RECORD.1),
        ))
        .with_children(dispense_item_numbers.iter().map(|item_number| {
            Relationship::new(TypeCode::Comp).wrap(
                "component",
                act_ref("actRef", ClassCode::Sbadm, MoodCode::Prms, item_number),
            )
        }));

    let supply_header = supply_header(&index, message_id, &fulfilments, practitioner_role, organisation)?;
    let release_response = header
        .response
        .as_ref()
        .map(|response| response.identifier.as_str())
        .ok_or_else(|| TranslationError::missing("MessageHeader.response.identifier"))?;

    debug!(
        message_id,
        dispenses = fulfilments.len(),
        "translated dispense notification"
    );
    Ok(act("DispenseNotification", ClassCode::Info, MoodCode::Evn)
        .child(codes::global_identifier("id", message_id))
        .child(codes::snomed(
            "code",
            snomed::DISPENSE_NOTIFICATION.0,
            Some(snomed::DISPENSE_NOTIFICATION.1),
        ))
        .child(codes::value(
            "effectiveTime",
            to_hl7_date_time(when_handed_over, "MedicationDispense.whenHandedOver")?,
        ))
        .child(codes::type_id(message_type::DISPENSE_NOTIFICATION))
        .child(record_target_by_nhs_number(nhs_number(&index, first.dispense)?))
        .child(
            Relationship::new(TypeCode::Prcp)
                .context_control(ContextControlCode::On)
                .wrap("primaryInformationRecipient", payor(organisation)?),
        )
        .child(
            Relationship::pertinent(true)
                .template(template::PERTINENT_INFORMATION)
                .wrap("pertinentInformation1", supply_header),
        )
        .child(
            Relationship::new(TypeCode::Pert)
                .template(template::PERTINENT_INFORMATION1)
                .wrap("pertinentInformation2", category),
        )
        .maybe_child(replacement_of(header))
        .child(Relationship::new(TypeCode::Seql).wrap(
            "sequelTo",
            act_ref(
                "priorPrescriptionReleaseEventRef",
                ClassCode::Info,
                MoodCode::Rqo,
                release_response,
            ),
        )))
}

fn dispense_item_number(dispense: &MedicationDispense) -> TranslationResult<&str> {
    identifier_value(
        &dispense.identifier,
        system::PRESCRIPTION_DISPENSE_ITEM_NUMBER,
        "MedicationDispense.identifier",
    )
}

/// The patient's NHS number, from the bundle's `Patient` or else the dispense's logical subject.
fn nhs_number<'a>(
    index: &ReferenceIndex<'a>,
    dispense: &'a MedicationDispense,
) -> TranslationResult<&'a str> {
    if let Some(patient) = index.first_of::<Patient>() {
        return identifier_value(&patient.identifier, system::NHS_NUMBER, "Patient.identifier");
    }
    dispense
        .subject
        .as_ref()
        .and_then(|subject| subject.identifier.as_ref())
        .and_then(|identifier| identifier.value.as_deref())
        .ok_or_else(|| TranslationError::missing("MedicationDispense.subject.identifier.value"))
}

/// The reimbursement authority the dispensing organisation is commissioned by.
fn payor(organisation: &Organization) -> TranslationResult<Element> {
    let relationships = Extension::find(&organisation.extension, extension::ORGANISATION_RELATIONSHIPS)
        .ok_or_else(|| {
            TranslationError::invalid(
                "Organization.extension",
                "The dispense notification is missing the reimbursement authority.",
            )
        })?;
    let authority = relationships
        .nested("reimbursementAuthority")
        .and_then(|authority| authority.value_identifier.as_ref())
        .ok_or_else(|| {
            TranslationError::invalid(
                "Organization.extension.extension",
                "The dispense notification is missing the ODS code for the reimbursement authority.",
            )
        })?;
    let ods_code = required(
        authority.value.as_deref(),
        "Organization.extension.extension.valueIdentifier.value",
    )?;

    Ok(role("AgentOrg", ClassCode::Agnt).child(
        entity("agentOrganization", ClassCode::Org, DeterminerCode::Instance)
            .child(sds_organisation_id(ods_code))
            .child(organisation_type_not_specified()),
    ))
}

fn replacement_of(header: &MessageHeader) -> Option<Element> {
    let replaced = Extension::find(&header.extension, extension::REPLACEMENT_OF)?
        .value_identifier
        .as_ref()?
        .value
        .as_deref()?;
    Some(Relationship::new(TypeCode::Rplc).wrap(
        "replacementOf",
        act_ref("priorMessageRef", ClassCode::Info, MoodCode::Evn, replaced),
    ))
}

fn supply_header(
    index: &ReferenceIndex<'_>,
    message_id: &str,
    fulfilments: &[Fulfilment<'_>],
    practitioner_role: &PractitionerRole,
    organisation: &Organization,
) -> TranslationResult<Element> {
    let first = &fulfilments[0];
    let ids = PrescriptionIds::of(
        first.request.group_identifier.as_ref(),
        "MedicationDispense.contained(MedicationRequest)",
    )?;
    let repeat_number = first
        .request
        .based_on
        .first()
        .and_then(|based_on| Extension::find(&based_on.extension, extension::REPEAT_INFORMATION))
        .map(|repeat| {
            RepeatInformation::from_extension(
                repeat,
                "MedicationDispense.contained(MedicationRequest).basedOn.extension",
            )
        })
        .transpose()?
        .map(RepeatInformation::repeat_number);

    let author = act_author(practitioner_role, organisation)?;
    let supplied_line_items = supplied_line_items(index, fulfilments)?;

    Ok(act("pertinentSupplyHeader", ClassCode::Sbadm, MoodCode::Evn)
        .child(codes::global_identifier("id", message_id))
        .child(codes::snomed("code", snomed::ADMINISTRATION.0, None))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(repeat_number)
        .child(author)
        .with_children(supplied_line_items.into_iter().map(|item| {
            Relationship::pertinent(true)
                .inversion(false)
                .negation(false)
                .separatable(false)
                .template(template::SOURCE_OF2)
                .wrap("pertinentInformation1", item)
        }))
        .maybe_child(
            header_non_dispensing_reason(fulfilments)?
                .map(|reason| SUPPLY_ANNOTATION.wrap("pertinentInformation2", reason)),
        )
        .child(SUPPLY_ANNOTATION.wrap(
            "pertinentInformation3",
            prescription_status(first.dispense)?,
        ))
        .child(SUPPLY_ANNOTATION.wrap(
            "pertinentInformation4",
            prescription_id_annotation(ids.short_form),
        ))
        .child(FULFILMENT.wrap(
            "inFulfillmentOf",
            act_ref("priorOriginalPrescriptionRef", ClassCode::Sbadm, MoodCode::Rqo, ids.global),
        )))
}

/// The dispenser, with the time of translation and no signature.
fn act_author(
    practitioner_role: &PractitionerRole,
    organisation: &Organization,
) -> TranslationResult<Element> {
    let agent_person = dispenser_agent_person(practitioner_role, &AgentOrgRef::Resource(organisation))?;
    Ok(author_relationship().wrap_all(
        "author",
        [
            codes::value("time", now_hl7()),
            codes::null("signatureText", NullFlavor::NotApplicable),
            agent_person,
        ],
    ))
}

/// One supplied line item per requested item, in order of first appearance.
fn supplied_line_items(
    index: &ReferenceIndex<'_>,
    fulfilments: &[Fulfilment<'_>],
) -> TranslationResult<Vec<Element>> {
    let mut groups: Vec<(&str, Vec<&Fulfilment<'_>>)> = Vec::new();
    for fulfilment in fulfilments {
        let item_number = fulfilment.request_item_number()?;
        match groups.iter_mut().find(|(existing, _)| existing.eq_ignore_ascii_case(item_number)) {
            Some((_, members)) => members.push(fulfilment),
            None => groups.push((item_number, vec![fulfilment])),
        }
    }

    groups
        .into_iter()
        .map(|(item_number, members)| supplied_line_item(index, item_number, &members))
        .collect()
}

fn supplied_line_item(
    index: &ReferenceIndex<'_>,
    request_item_number: &str,
    members: &[&Fulfilment<'_>],
) -> TranslationResult<Element> {
    let Fulfilment { dispense, request } = *members[0];
    let requested_medication = medication_coding(
        index,
        request.medication_codeable_concept.as_ref(),
        request.medication_reference.as_ref(),
        "MedicationDispense.contained(MedicationRequest)",
    )?;
    let requested_code = coding_code(requested_medication, "MedicationRequest.medication.coding")?;
    let dispense_request = required(
        request.dispense_request.as_ref(),
        "MedicationDispense.contained(MedicationRequest).dispenseRequest",
    )?;
    let requested_quantity = required(
        dispense_request.quantity.as_ref(),
        "MedicationDispense.contained(MedicationRequest).dispenseRequest.quantity",
    )?;
    let requested_unit = required(
        requested_quantity.code.as_deref(),
        "MedicationDispense.contained(MedicationRequest).dispenseRequest.quantity.code",
    )?;

    let quantities = members
        .iter()
        .map(|member| supplied_quantity(index, member.dispense))
        .collect::<TranslationResult<Vec<_>>>()?;

    Ok(act("pertinentSuppliedLineItem", ClassCode::Sbadm, MoodCode::Prms)
        .child(codes::global_identifier("id", dispense_item_number(dispense)?))
        .child(codes::snomed(
            "code",
            snomed::ADMINISTRATION.0,
            Some(snomed::ADMINISTRATION.1),
        ))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(prescriptions_issued(request)?)
        .child(
            Relationship::new(TypeCode::Csm)
                .context_control(ContextControlCode::Op)
                .wrap(
                    "consumable",
                    role("requestedManufacturedProduct", ClassCode::Manu).child(
                        entity("manufacturedRequestedMaterial", ClassCode::Mmat, DeterminerCode::Kind)
                            .child(codes::snomed(
                                "code",
                                requested_code,
                                requested_medication.display.as_deref(),
                            )),
                    ),
                ),
        )
        .with_children(quantities.into_iter().map(|quantity| {
            Relationship::new(TypeCode::Comp)
                .separatable(false)
                .wrap("component", quantity)
        }))
        .child(Relationship::new(TypeCode::Comp).separatable(false).wrap(
            "component1",
            act("supplyRequest", ClassCode::Sply, MoodCode::Rqo)
                .child(codes::snomed("code", requested_unit, requested_quantity.unit.as_deref()))
                .child(supply_quantity(
                    requested_quantity,
                    "MedicationDispense.contained(MedicationRequest).dispenseRequest.quantity",
                )?),
        ))
        .maybe_child(
            line_item_non_dispensing_reason(dispense.status_reason_codeable_concept.as_ref())?
                .map(|reason| SUPPLY_ANNOTATION.wrap("pertinentInformation2", reason)),
        )
        .child(SUPPLY_ANNOTATION.wrap("pertinentInformation3", item_status(dispense)?))
        .child(FULFILMENT.wrap(
            "inFulfillmentOf",
            act_ref("priorOriginalItemRef", ClassCode::Sbadm, MoodCode::Rqo, request_item_number),
        )))
}

/// The UK Core repeat information: prescriptions issued so far up to one past the allowed count.
fn prescriptions_issued(request: &MedicationRequest) -> TranslationResult<Option<Element>> {
    const PATH: &str = "MedicationDispense.contained(MedicationRequest).extension";
    let Some(issued) = Extension::find(&request.extension, extension::UK_CORE_REPEAT_INFORMATION)
        .and_then(|repeat| repeat.nested("numberOfPrescriptionsIssued"))
    else {
        return Ok(None);
    };
    let issued_value = required(
        issued.value_unsigned_int.as_ref().or(issued.value_integer.as_ref()),
        &format!("{PATH}.extension(\"numberOfPrescriptionsIssued\").valueUnsignedInt"),
    )?;
    let issued = count(issued_value, PATH)?;
    let allowed = request
        .dispense_request
        .as_ref()
        .and_then(|dispense_request| dispense_request.number_of_repeats_allowed.as_ref())
        .ok_or_else(|| {
            TranslationError::missing(
                "MedicationDispense.contained(MedicationRequest).dispenseRequest.numberOfRepeatsAllowed",
            )
        })?;
    let allowed = count(allowed, "MedicationRequest.dispenseRequest.numberOfRepeatsAllowed")?;

    let low = issued.to_string();
    let high = (allowed + 1).to_string();
    Ok(Some(codes::interval("repeatNumber", Some(&low), Some(&high))))
}

/// `suppliedLineItemQuantity`: what one dispense handed over, and how it is to be taken.
fn supplied_quantity(
    index: &ReferenceIndex<'_>,
    dispense: &MedicationDispense,
) -> TranslationResult<Element> {
    let quantity = required(dispense.quantity.as_ref(), "MedicationDispense.quantity")?;
    let supplied = medication_coding(
        index,
        dispense.medication_codeable_concept.as_ref(),
        None,
        "MedicationDispense",
    )?;
    let supplied_code = coding_code(supplied, "MedicationDispense.medicationCodeableConcept.coding")?;
    let dosage = only(&dispense.dosage_instruction, "MedicationDispense.dosageInstruction")?;
    let instructions = required(dosage.text.as_ref(), "MedicationDispense.dosageInstruction.text")?;

    Ok(act("suppliedLineItemQuantity", ClassCode::Sply, MoodCode::Evn)
        .child(codes::snomed("code", snomed::DISPENSING.0, Some(snomed::DISPENSING.1)))
        .child(supply_quantity(quantity, "MedicationDispense.quantity")?)
        .child(supplied_product(supplied_code, supplied.display.as_deref()))
        .child(SUPPLY_ANNOTATION.wrap(
            "pertinentInformation1",
            annotation(
                "pertinentSupplyInstructions",
                AnnotationCode::SupplyInstructions,
                text_value(instructions.as_str()),
            ),
        )))
}

pub(super) fn supplied_product(code: &str, display: Option<&str>) -> Element {
    Relationship::new(TypeCode::Prd)
        .context_control(ContextControlCode::Op)
        .wrap(
            "product",
            role("suppliedManufacturedProduct", ClassCode::Manu).child(
                entity("manufacturedSuppliedMaterial", ClassCode::Mmat, DeterminerCode::Kind)
                    .child(codes::snomed("code", code, display)),
            ),
        )
}

/// A coded annotation, keeping the source display when it has one.
pub(super) fn mapped_annotation(
    name: &str,
    code: AnnotationCode,
    domain: Domain,
    source_code: &str,
    source_display: Option<&str>,
) -> TranslationResult<Element> {
    let target = to_target(domain, source_code)?;
    Ok(annotation(
        name,
        code,
        codes::code(
            "value",
            target.system,
            target.code,
            source_display.or(target.display),
        ),
    ))
}

fn item_status(dispense: &MedicationDispense) -> TranslationResult<Element> {
    let dispense_type = required(dispense.dispense_type.as_ref(), "MedicationDispense.type")?;
    let coding = coding_for_system(
        dispense_type,
        code_system::MEDICATION_DISPENSE_TYPE,
        "MedicationDispense.type",
    )?;
    mapped_annotation(
        "pertinentItemStatus",
        AnnotationCode::ItemStatus,
        Domain::ItemStatus,
        coding_code(coding, "MedicationDispense.type.coding")?,
        coding.display.as_deref(),
    )
}

fn line_item_non_dispensing_reason(
    status_reason: Option<&CodeableConcept>,
) -> TranslationResult<Option<Element>> {
    let Some(status_reason) = status_reason.filter(|concept| !concept.coding.is_empty()) else {
        return Ok(None);
    };
    let coding = coding_for_system(
        status_reason,
        code_system::MEDICATION_DISPENSE_STATUS_REASON,
        "MedicationDispense.statusReasonCodeableConcept",
    )?;
    mapped_annotation(
        "pertinentNonDispensingReason",
        AnnotationCode::NonDispensingReason,
        Domain::NonDispensingReason,
        coding_code(coding, "MedicationDispense.statusReasonCodeableConcept.coding")?,
        coding.display.as_deref(),
    )
    .map(Some)
}

/// The prescription-level non-dispensing reason.
///
/// Present only when every dispense carries the extension, and then all must agree.
fn header_non_dispensing_reason(fulfilments: &[Fulfilment<'_>]) -> TranslationResult<Option<Element>> {
    const PATH: &str = "MedicationDispense.extension(\"Extension-DM-PrescriptionNonDispensingReason\")";
    let reasons: Option<Vec<&Extension>> = fulfilments
        .iter()
        .map(|fulfilment| Extension::find(&fulfilment.dispense.extension, extension::NON_DISPENSING_REASON))
        .collect();
    let Some(reasons) = reasons else {
        return Ok(None);
    };
    let codings = reasons
        .iter()
        .map(|reason| {
            reason
                .value_coding
                .as_ref()
                .ok_or_else(|| TranslationError::missing(format!("{PATH}.valueCoding")))
        })
        .collect::<TranslationResult<Vec<_>>>()?;
    let Some(first) = codings.first() else {
        return Ok(None);
    };
    if codings.iter().any(|coding| coding.code != first.code) {
        return Err(TranslationError::InconsistentGroupField {
            path: PATH.to_owned(),
        });
    }

    mapped_annotation(
        "pertinentNonDispensingReason",
        AnnotationCode::NonDispensingReason,
        Domain::NonDispensingReason,
        coding_code(first, &format!("{PATH}.valueCoding"))?,
        first.display.as_deref(),
    )
    .map(Some)
}

fn prescription_status(dispense: &MedicationDispense) -> TranslationResult<Element> {
    let status = required_extension(
        &dispense.extension,
        extension::TASK_BUSINESS_STATUS,
        "MedicationDispense.extension",
    )?;
    let coding = status.value_coding.as_ref().ok_or_else(|| {
        TranslationError::missing("MedicationDispense.extension(\"Extension-EPS-TaskBusinessStatus\").valueCoding")
    })?;
    mapped_annotation(
        "pertinentPrescriptionStatus",
        AnnotationCode::PrescriptionStatus,
        Domain::PrescriptionStatus,
        coding_code(coding, "MedicationDispense.extension.valueCoding")?,
        coding.display.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hl7v3::codes::oid;
    use serde_json::json;

    fn contained_request(item_number: &str) -> serde_json::Value {
        json!({
            "resourceType": "MedicationRequest",
            "id": "request",
            "identifier": [{"system": system::PRESCRIPTION_ORDER_ITEM_NUMBER, "value": item_number}],
            "medicationCodeableConcept": {"coding": [{
                "system": code_system::SNOMED,
                "code": "39732311000001104",
                "display": "Amoxicillin 250mg capsules"
            }]},
            "groupIdentifier": {
                "extension": [{
                    "url": extension::PRESCRIPTION_ID,
                    "valueIdentifier": {"value": "a5b9dc81-ccf4-4dab-b887-3d88e557febb"}
                }],
                "value": "88AF6C-C81007-00001C"
            },
            "dispenseRequest": {
                "quantity": {"value": 20, "unit": "tablet", "system": code_system::SNOMED, "code": "428673006"}
            }
        })
    }

    fn contained_role() -> serde_json::Value {
        json!({
            "resourceType": "PractitionerRole",
            "id": "performer",
            "identifier": [{"system": system::SDS_ROLE_PROFILE_ID, "value": "555086415105"}],
            "practitioner": {
                "identifier": {"system": system::SDS_USER_ID, "value": "3415870201"},
                "display": "Jackie Clark"
            },
            "organization": {"reference": "urn:uuid:pharmacy"},
            "code": [{"coding": [{"system": code_system::SDS_JOB_ROLE_CODE, "code": "R8000"}]}],
            "telecom": [{"system": "phone", "use": "work", "value": "0532567890"}]
        })
    }

    fn dispense(dispense_item: &str, request_item: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut value = json!({
            "resourceType": "MedicationDispense",
            "contained": [contained_request(request_item), contained_role()],
            "extension": [{
                "url": extension::TASK_BUSINESS_STATUS,
                "valueCoding": {"system": code_system::TASK_BUSINESS_STATUS, "code": "0006", "display": "Dispensed"}
            }],
            "identifier": [{"system": system::PRESCRIPTION_DISPENSE_ITEM_NUMBER, "value": dispense_item}],
            "status": "completed",
            "medicationCodeableConcept": {"coding": [{
                "system": code_system::SNOMED,
                "code": "39732311000001104",
                "display": "Amoxicillin 250mg capsules"
            }]},
            "subject": {"identifier": {"system": system::NHS_NUMBER, "value": "9453740519"}},
            "performer": [{"actor": {"reference": "#performer"}}],
            "authorizingPrescription": [{"reference": "#request"}],
            "type": {"coding": [{"system": code_system::MEDICATION_DISPENSE_TYPE, "code": "0001", "display": "Item fully dispensed"}]},
            "quantity": {"value": 20, "unit": "tablet", "system": code_system::SNOMED, "code": "428673006"},
            "whenHandedOver": "2021-07-07T15:43:00+00:00",
            "dosageInstruction": [{"text": "2 times a day for 10 days"}]
        });
        if let (Some(target), Some(extra)) = (value.as_object_mut(), extra.as_object()) {
            for (key, field) in extra {
                target.insert(key.clone(), field.clone());
            }
        }
        value
    }

    fn pharmacy(extension: serde_json::Value) -> serde_json::Value {
        json!({
            "resourceType": "Organization",
            "extension": extension,
            "identifier": [{"system": system::ODS_ORGANIZATION_CODE, "value": "VNE51"}],
            "name": "The Simple Pharmacy",
            "telecom": [{"system": "phone", "use": "work", "value": "0113 3180277"}]
        })
    }

    fn reimbursement_authority() -> serde_json::Value {
        json!([{
            "url": extension::ORGANISATION_RELATIONSHIPS,
            "extension": [{
                "url": "reimbursementAuthority",
                "valueIdentifier": {"system": system::ODS_ORGANIZATION_CODE, "value": "T1450"}
            }]
        }])
    }

    fn header(replacement: bool) -> serde_json::Value {
        let mut header = json!({
            "resourceType": "MessageHeader",
            "eventCoding": {"system": code_system::MESSAGE_EVENT, "code": "dispense-notification"},
            "response": {"identifier": "999f9999-9999-9999-9ff9-f9fff9999999", "code": "ok"}
        });
        if replacement {
            header["extension"] = json!([{
                "url": extension::REPLACEMENT_OF,
                "valueIdentifier": {"system": system::RFC4122, "value": "d72a4d0f-f3c3-4b1f-a3cf-c3e0e4c4d5a1"}
            }]);
        }
        header
    }

    fn bundle(dispenses: Vec<serde_json::Value>, organisation: serde_json::Value, replacement: bool) -> Bundle {
        let mut entries = vec![
            json!({"fullUrl": "urn:uuid:header", "resource": header(replacement)}),
            json!({"fullUrl": "urn:uuid:pharmacy", "resource": organisation}),
        ];
        entries.extend(dispenses.into_iter().enumerate().map(|(position, dispense)| {
            json!({"fullUrl": format!("urn:uuid:dispense-{position}"), "resource": dispense})
        }));
        serde_json::from_value(json!({
            "resourceType": "Bundle",
            "identifier": {"system": system::RFC4122, "value": "aef77afb-7e3c-427a-8657-2c427f71a272"},
            "type": "message",
            "entry": entries
        }))
        .expect("bundle")
    }

    fn header_of(notification: &Element) -> &Element {
        notification
            .find(&["pertinentInformation1", "pertinentSupplyHeader"])
            .expect("supply header")
    }

    #[test]
    fn notification_keeps_slot_order() {
        let bundle = bundle(
            vec![dispense("d1", "a54219b8-f741-4c47-b662-e4f8dfa49ab6", json!({}))],
            pharmacy(reimbursement_authority()),
            true,
        );
        let notification =
            dispense_notification(&bundle, &TranslatorConfig::default()).expect("convert");
        let children: Vec<_> = notification.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec![
                "id",
                "code",
                "effectiveTime",
                "typeId",
                "recordTarget",
                "primaryInformationRecipient",
                "pertinentInformation1",
                "pertinentInformation2",
                "replacementOf",
                "sequelTo"
            ]
        );
        assert_eq!(
            notification
                .find(&["recordTarget", "Patient", "id"])
                .and_then(|id| id.attribute("extension")),
            Some("9453740519")
        );
        assert_eq!(
            notification
                .find(&["primaryInformationRecipient", "AgentOrg", "agentOrganization", "id"])
                .and_then(|id| id.attribute("extension")),
            Some("T1450")
        );
        assert_eq!(
            notification
                .find(&["sequelTo", "priorPrescriptionReleaseEventRef", "id"])
                .and_then(|id| id.attribute("root")),
            Some("999F9999-9999-9999-9FF9-F9FFF9999999")
        );
    }

    #[test]
    fn supply_header_carries_status_and_original_prescription() {
        let bundle = bundle(
            vec![dispense("d1", "a54219b8-f741-4c47-b662-e4f8dfa49ab6", json!({}))],
            pharmacy(reimbursement_authority()),
            false,
        );
        let notification =
            dispense_notification(&bundle, &TranslatorConfig::default()).expect("convert");
        assert!(notification.first("replacementOf").is_none());

        let header = header_of(&notification);
        let children: Vec<_> = header.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec![
                "id",
                "code",
                "effectiveTime",
                "author",
                "pertinentInformation1",
                "pertinentInformation3",
                "pertinentInformation4",
                "inFulfillmentOf"
            ]
        );
        let status = header
            .find(&["pertinentInformation3", "pertinentPrescriptionStatus", "value"])
            .expect("status");
        assert_eq!(status.attribute("code"), Some("0006"));
        assert_eq!(status.attribute("displayName"), Some("Dispensed"));
        assert_eq!(
            header
                .find(&["author", "AgentPerson", "id"])
                .and_then(|id| id.attribute("root")),
            Some(oid::SDS_ROLE_PROFILE)
        );
        assert_eq!(
            header
                .find(&["inFulfillmentOf", "priorOriginalPrescriptionRef", "id"])
                .and_then(|id| id.attribute("root")),
            Some("A5B9DC81-CCF4-4DAB-B887-3D88E557FEBB")
        );
    }

    #[test]
    fn dispenses_of_one_item_share_a_supplied_line_item() {
        let item = "a54219b8-f741-4c47-b662-e4f8dfa49ab6";
        let bundle = bundle(
            vec![
                dispense("d1", item, json!({})),
                dispense("d2", item, json!({})),
                dispense("d3", "6989b7bd-8db6-428c-a593-4022e3044c00", json!({})),
            ],
            pharmacy(reimbursement_authority()),
            false,
        );
        let notification =
            dispense_notification(&bundle, &TranslatorConfig::default()).expect("convert");
        let header = header_of(&notification);
        let items: Vec<_> = header
            .elements_named("pertinentInformation1")
            .filter_map(|relationship| relationship.first("pertinentSuppliedLineItem"))
            .collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].elements_named("component").count(), 2);
        assert_eq!(items[1].elements_named("component").count(), 1);

        let item_children: Vec<_> = items[0].elements().map(Element::name).collect();
        assert_eq!(
            item_children,
            vec![
                "id",
                "code",
                "effectiveTime",
                "consumable",
                "component",
                "component",
                "component1",
                "pertinentInformation3",
                "inFulfillmentOf"
            ]
        );
        let instructions = items[0].find(&[
            "component",
            "suppliedLineItemQuantity",
            "pertinentInformation1",
            "pertinentSupplyInstructions",
            "value",
        ]);
        assert_eq!(
            instructions.map(Element::text_content).as_deref(),
            Some("2 times a day for 10 days")
        );

        let category_refs = notification
            .find(&["pertinentInformation2", "pertinentCareRecordElementCategory"])
            .expect("category")
            .elements_named("component")
            .count();
        assert_eq!(category_refs, 3);
    }

    #[test]
    fn shared_non_dispensing_reason_reaches_the_header() {
        let reason = json!({"extension": [
            {
                "url": extension::TASK_BUSINESS_STATUS,
                "valueCoding": {"system": code_system::TASK_BUSINESS_STATUS, "code": "0007", "display": "Not Dispensed"}
            },
            {
                "url": extension::NON_DISPENSING_REASON,
                "valueCoding": {"system": code_system::NON_DISPENSING_REASON, "code": "0002", "display": "Clinically unsuitable"}
            }
        ]});
        let bundle = bundle(
            vec![dispense("d1", "item-1", reason.clone()), dispense("d2", "item-2", reason)],
            pharmacy(reimbursement_authority()),
            false,
        );
        let notification =
            dispense_notification(&bundle, &TranslatorConfig::default()).expect("convert");
        let value = header_of(&notification)
            .find(&["pertinentInformation2", "pertinentNonDispensingReason", "value"])
            .expect("reason");
        assert_eq!(value.attribute("code"), Some("0002"));
    }

    #[test]
    fn differing_non_dispensing_reasons_are_rejected() {
        let with_reason = |code: &str| {
            json!({"extension": [
                {
                    "url": extension::TASK_BUSINESS_STATUS,
                    "valueCoding": {"system": code_system::TASK_BUSINESS_STATUS, "code": "0007"}
                },
                {
                    "url": extension::NON_DISPENSING_REASON,
                    "valueCoding": {"system": code_system::NON_DISPENSING_REASON, "code": code}
                }
            ]})
        };
        let bundle = bundle(
            vec![
                dispense("d1", "item-1", with_reason("0002")),
                dispense("d2", "item-2", with_reason("0003")),
            ],
            pharmacy(reimbursement_authority()),
            false,
        );
        let err = dispense_notification(&bundle, &TranslatorConfig::default()).expect_err("inconsistent");
        assert!(matches!(err, TranslationError::InconsistentGroupField { .. }));
    }

    #[test]
    fn missing_reimbursement_authority_is_invalid() {
        let bundle = bundle(
            vec![dispense("d1", "item-1", json!({}))],
            pharmacy(json!([])),
            false,
        );
        let err = dispense_notification(&bundle, &TranslatorConfig::default()).expect_err("payor");
        assert!(matches!(
            err,
            TranslationError::InvalidValue { ref path, .. } if path == "Organization.extension"
        ));
    }

    #[test]
    fn uk_core_repeat_information_sets_supplied_repeat_number() {
        let mut request = contained_request("item-1");
        request["extension"] = json!([{
            "url": extension::UK_CORE_REPEAT_INFORMATION,
            "extension": [{"url": "numberOfPrescriptionsIssued", "valueUnsignedInt": 2}]
        }]);
        request["dispenseRequest"]["numberOfRepeatsAllowed"] = json!(5);
        let dispense = dispense("d1", "item-1", json!({"contained": [request, contained_role()]}));
        let bundle = bundle(vec![dispense], pharmacy(reimbursement_authority()), false);
        let notification =
            dispense_notification(&bundle, &TranslatorConfig::default()).expect("convert");
        let repeat = header_of(&notification)
            .find(&["pertinentInformation1", "pertinentSuppliedLineItem", "repeatNumber"])
            .expect("repeat number");
        assert_eq!(repeat.find(&["low"]).and_then(|low| low.attribute("value")), Some("2"));
        assert_eq!(repeat.find(&["high"]).and_then(|high| high.attribute("value")), Some("6"));
    }
}
