//! `DispenseClaim`: the dispenser's reimbursement claim for a completed prescription.
//!
//! A claim is a single FHIR `Claim` whose dispenser `PractitionerRole` and `Organization` are
//! contained resources. Its one item is the prescription; each item detail is a supplied line item
//! and each sub-detail one supplied quantity.

use fhir::{Claim, ClaimItem, ClaimItemDetail, ClaimItemSubDetail, CodeableConcept, ContainedScope, Extension, Organization, PractitionerRole};
use hl7v3::codes::{self, oid, AnnotationCode, NullFlavor};
use hl7v3::vocab::{act, entity, role, ClassCode, ContextControlCode, DeterminerCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;
use tracing::debug;

use super::agent_person::dispenser_agent_person;
use super::common::{
    act_ref, annotation, coding_code, coding_for_system, message_id, nested, only,
    organisation_type_not_specified, prescription_id_annotation, required_extension,
    sds_organisation_id, RepeatInformation,
};
use super::dispense::{mapped_annotation, supplied_product, FULFILMENT, SUPPLY_ANNOTATION};
use super::line_item::supply_quantity;
use super::organisation::AgentOrgRef;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, extension, message_type, snomed, template};
use crate::dates::to_hl7_date_time;
use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

/// Placeholder release event. The slot is mandatory but unused by the reimbursement agency.
const UNUSED_RELEASE_EVENT: &str = "ffffffff-ffff-4fff-bfff-ffffffffffff";

/// Code `0001` is the "patient has paid" entry of the exemption code system.
const NOT_EXEMPT: &str = "0001";

const EVIDENCE_SEEN: &str = "evidence-seen";

const CLAIM_ANNOTATION: Relationship = Relationship::pertinent(true).separatable(false);

/// Builds the `DispenseClaim` for `claim`.
pub(crate) fn dispense_claim(claim: &Claim, _config: &TranslatorConfig) -> TranslationResult<Element> {
    let message_id = message_id(claim.identifier.first(), "Claim.identifier")?;
    let created = required(claim.created.as_deref(), "Claim.created")?;
    let insurance = only(&claim.insurance, "Claim.insurance")?;
    let item = only(&claim.item, "Claim.item")?;

    debug!(message_id, details = item.detail.len(), "translating dispense claim");
    Ok(act("DispenseClaim", ClassCode::Info, MoodCode::Evn)
        .child(codes::global_identifier("id", message_id))
        .child(codes::snomed(
            "code",
            snomed::DISPENSE_NOTIFICATION.0,
            Some(snomed::DISPENSE_NOTIFICATION.1),
        ))
        .child(codes::value("effectiveTime", to_hl7_date_time(created, "Claim.created")?))
        .child(codes::type_id(message_type::DISPENSE_CLAIM))
        .child(Relationship::new(TypeCode::Prcp).wrap(
            "primaryInformationRecipient",
            agent_organisation(&insurance.coverage)?,
        ))
        .child(
            Relationship::pertinent(true)
                .template(template::PERTINENT_INFORMATION)
                .wrap("pertinentInformation1", supply_header(claim, item, message_id, created)?),
        )
        .maybe_child(replacement_of(claim)?)
        .maybe_child(coverage(item)?)
        .child(Relationship::new(TypeCode::Seql).wrap(
            "sequelTo",
            act_ref(
                "priorPrescriptionReleaseEventRef",
                ClassCode::Info,
                MoodCode::Rqo,
                UNUSED_RELEASE_EVENT,
            ),
        )))
}

/// The reimbursement agency named by `Claim.insurance.coverage`.
fn agent_organisation(coverage: &fhir::Reference) -> TranslationResult<Element> {
    let identifier = required(coverage.identifier.as_ref(), "Claim.insurance.coverage.identifier")?;
    let ods_code = required(
        identifier.value.as_deref(),
        "Claim.insurance.coverage.identifier.value",
    )?;
    Ok(role("AgentOrg", ClassCode::Agnt).child(
        entity("agentOrganization", ClassCode::Org, DeterminerCode::Instance)
            .child(sds_organisation_id(ods_code))
            .child(organisation_type_not_specified())
            .maybe_child(coverage.display.as_deref().map(|name| Element::new("name").text(name))),
    ))
}

fn replacement_of(claim: &Claim) -> TranslationResult<Option<Element>> {
    let Some(replacement) = Extension::find(&claim.extension, extension::REPLACEMENT_OF) else {
        return Ok(None);
    };
    let previous = identifier_of(replacement, "Claim.extension")?;
    Ok(Some(Relationship::new(TypeCode::Rplc).wrap(
        "replacementOf",
        act_ref("priorMessageRef", ClassCode::Info, MoodCode::Evn, previous),
    )))
}

/// `coverage`: the patient's charge exemption and whether evidence of it was seen.
///
/// Absent when the item carries no exemption coding.
fn coverage(item: &ClaimItem) -> TranslationResult<Option<Element>> {
    let Some(exemption) = coding_in(&item.program_code, code_system::CHARGE_EXEMPTION) else {
        return Ok(None);
    };
    let exemption_code = coding_code(exemption, "Claim.item.programCode.coding")?;
    let evidence = coding_in(&item.program_code, code_system::EXEMPTION_EVIDENCE)
        .map(|coding| coding_code(coding, "Claim.item.programCode.coding"))
        .transpose()?;

    let charge_exempt = negated_annotation(
        "coveringChargeExempt",
        AnnotationCode::ChargeExempt,
        exemption_code == NOT_EXEMPT,
    )
    .child(codes::code("value", oid::CHARGE_EXEMPTION, exemption_code, None))
    .maybe_child(evidence.map(|evidence| {
        Relationship::new(TypeCode::Auth)
            .context_conduction(true)
            .separatable(false)
            .wrap(
                "authorization",
                negated_annotation(
                    "authorizingEvidenceSeen",
                    AnnotationCode::EvidenceSeen,
                    evidence != EVIDENCE_SEEN,
                ),
            )
    }));

    Ok(Some(
        Relationship::new(TypeCode::Covby)
            .context_conduction(true)
            .separatable(false)
            .wrap("coverage", charge_exempt),
    ))
}

/// An annotation act whose `negationInd` states that the coded fact does not hold.
fn negated_annotation(name: &str, code: AnnotationCode, negated: bool) -> Element {
    act(name, ClassCode::Obs, MoodCode::Evn)
        .attr("negationInd", if negated { "true" } else { "false" })
        .child(code.code())
}

fn coding_in<'a>(concepts: &'a [CodeableConcept], system: &str) -> Option<&'a fhir::Coding> {
    concepts.iter().find_map(|concept| concept.coding_for_system(system))
}

fn supply_header(
    claim: &Claim,
    item: &ClaimItem,
    message_id: &str,
    created: &str,
) -> TranslationResult<Element> {
    let first_detail = item
        .detail
        .first()
        .ok_or_else(|| TranslationError::missing("Claim.item.detail"))?;
    let repeat_number = repeat_number(&first_detail.extension)?;

    let non_dispensing_reason = Extension::find(&item.extension, extension::TASK_BUSINESS_STATUS_REASON)
        .map(|reason| status_annotation(reason, Domain::NonDispensingReason, "Claim.item.extension"))
        .transpose()?;
    let status = required_extension(
        &item.extension,
        extension::TASK_BUSINESS_STATUS,
        "Claim.item.extension",
    )?;
    let line_items = item
        .detail
        .iter()
        .map(supplied_line_item)
        .collect::<TranslationResult<Vec<_>>>()?;
    let (short_form, global) = prescription_ids(claim)?;

    Ok(act("pertinentSupplyHeader", ClassCode::Sbadm, MoodCode::Evn)
        .child(codes::global_identifier("id", message_id))
        .child(codes::snomed("code", snomed::ADMINISTRATION.0, None))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(repeat_number)
        .child(legal_authenticator(claim, created)?)
        .with_children(line_items.into_iter().map(|line_item| {
            Relationship::pertinent(true)
                .inversion(false)
                .negation(false)
                .separatable(false)
                .template(template::SOURCE_OF2)
                .wrap("pertinentInformation1", line_item)
        }))
        .maybe_child(
            non_dispensing_reason.map(|reason| SUPPLY_ANNOTATION.wrap("pertinentInformation2", reason)),
        )
        .child(SUPPLY_ANNOTATION.wrap(
            "pertinentInformation3",
            status_annotation(status, Domain::PrescriptionStatus, "Claim.item.extension")?,
        ))
        .child(SUPPLY_ANNOTATION.wrap(
            "pertinentInformation4",
            prescription_id_annotation(short_form),
        ))
        .child(FULFILMENT.wrap(
            "inFulfillmentOf",
            act_ref("priorOriginalPrescriptionRef", ClassCode::Sbadm, MoodCode::Rqo, global),
        )))
}

fn repeat_number(extensions: &[Extension]) -> TranslationResult<Option<Element>> {
    Extension::find(extensions, extension::REPEAT_INFORMATION)
        .map(|repeat| RepeatInformation::from_extension(repeat, "Claim.item.detail.extension"))
        .transpose()
        .map(|repeat| repeat.map(RepeatInformation::repeat_number))
}

/// A prescription status or non-dispensing reason carried as a coding extension.
fn status_annotation(extension: &Extension, domain: Domain, path: &str) -> TranslationResult<Element> {
    let coding = extension
        .value_coding
        .as_ref()
        .ok_or_else(|| TranslationError::missing(format!("{path}(\"{}\").valueCoding", extension.url)))?;
    let (name, code) = match domain {
        Domain::NonDispensingReason => ("pertinentNonDispensingReason", AnnotationCode::NonDispensingReason),
        _ => ("pertinentPrescriptionStatus", AnnotationCode::PrescriptionStatus),
    };
    mapped_annotation(
        name,
        code,
        domain,
        coding_code(coding, &format!("{path}.valueCoding"))?,
        coding.display.as_deref(),
    )
}

/// The short-form and global prescription ids from `Extension-DM-GroupIdentifier`.
fn prescription_ids(claim: &Claim) -> TranslationResult<(&str, &str)> {
    const PATH: &str = "Claim.prescription.extension(\"Extension-DM-GroupIdentifier\")";
    let prescription = required(claim.prescription.as_ref(), "Claim.prescription")?;
    let group = required_extension(
        &prescription.extension,
        extension::GROUP_IDENTIFIER,
        "Claim.prescription.extension",
    )?;
    let path = format!("{PATH}.extension");
    Ok((
        identifier_of(nested(group, "shortForm", PATH)?, &path)?,
        identifier_of(nested(group, "UUID", PATH)?, &path)?,
    ))
}

/// The dispenser as legal authenticator, signed at the claim's creation time.
fn legal_authenticator(claim: &Claim, created: &str) -> TranslationResult<Element> {
    let scope = ContainedScope::new(&claim.contained);
    let provider = required(claim.provider.as_ref(), "Claim.provider")?;
    let practitioner_role: &PractitionerRole = scope.resolve(provider)?;
    let organisation_reference = required(
        practitioner_role.organization.as_ref(),
        "Claim.contained(\"PractitionerRole\").organization",
    )?;
    if organisation_reference.reference.is_none() {
        return Err(TranslationError::invalid(
            "Claim.contained(\"PractitionerRole\").organization",
            "practitioner.organization should be a reference",
        ));
    }
    let organisation: &Organization = scope.resolve(organisation_reference)?;
    let agent_person = dispenser_agent_person(practitioner_role, &AgentOrgRef::Resource(organisation))?;

    Ok(Relationship::new(TypeCode::La)
        .context_control(ContextControlCode::Op)
        .wrap_all(
            "legalAuthenticator",
            [
                codes::value("time", to_hl7_date_time(created, "Claim.created")?),
                codes::null("signatureText", NullFlavor::NotApplicable),
                agent_person,
            ],
        ))
}

fn supplied_line_item(detail: &ClaimItemDetail) -> TranslationResult<Element> {
    const PATH: &str = "Claim.item.detail.extension";
    let sequence = identifier_of(
        required_extension(&detail.extension, extension::CLAIM_SEQUENCE_IDENTIFIER, PATH)?,
        PATH,
    )?;
    let original_item = required_extension(&detail.extension, extension::CLAIM_MEDICATION_REQUEST_REFERENCE, PATH)?
        .value_reference
        .as_ref()
        .and_then(|reference| reference.identifier.as_ref())
        .and_then(|identifier| identifier.value.as_deref())
        .ok_or_else(|| {
            TranslationError::missing(format!(
                "{PATH}(\"{}\").valueReference.identifier.value",
                extension::CLAIM_MEDICATION_REQUEST_REFERENCE
            ))
        })?;
    let quantities = detail
        .sub_detail
        .iter()
        .map(|sub_detail| supplied_quantity(detail, sub_detail))
        .collect::<TranslationResult<Vec<_>>>()?;
    let non_dispensing_reason = Extension::find(&detail.extension, extension::TASK_BUSINESS_STATUS_REASON)
        .map(|reason| status_annotation(reason, Domain::NonDispensingReason, PATH))
        .transpose()?;

    let modifier = only(&detail.modifier, "Claim.item.detail.modifier")?;
    let status = coding_for_system(modifier, code_system::MEDICATION_DISPENSE_TYPE, "Claim.item.detail.modifier")?;
    let item_status = mapped_annotation(
        "pertinentItemStatus",
        AnnotationCode::ItemStatus,
        Domain::ItemStatus,
        coding_code(status, "Claim.item.detail.modifier.coding")?,
        status.display.as_deref(),
    )?;

    Ok(act("pertinentSuppliedLineItem", ClassCode::Sbadm, MoodCode::Prms)
        .child(codes::global_identifier("id", sequence))
        .child(codes::snomed(
            "code",
            snomed::ADMINISTRATION.0,
            Some(snomed::ADMINISTRATION.1),
        ))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(repeat_number(&detail.extension)?)
        .with_children(quantities.into_iter().map(|quantity| {
            Relationship::new(TypeCode::Comp)
                .separatable(false)
                .wrap("component", quantity)
        }))
        .maybe_child(
            non_dispensing_reason.map(|reason| SUPPLY_ANNOTATION.wrap("pertinentInformation2", reason)),
        )
        .child(SUPPLY_ANNOTATION.wrap("pertinentInformation3", item_status))
        .child(FULFILMENT.wrap(
            "inFulfillmentOf",
            act_ref("priorOriginalItemRef", ClassCode::Sbadm, MoodCode::Rqo, original_item),
        )))
}

fn identifier_of<'a>(extension: &'a Extension, path: &str) -> TranslationResult<&'a str> {
    extension
        .value_identifier
        .as_ref()
        .and_then(|identifier| identifier.value.as_deref())
        .ok_or_else(|| {
            TranslationError::missing(format!("{path}(\"{}\").valueIdentifier.value", extension.url))
        })
}

/// One supplied product with the charge paid and the dispenser's endorsements.
fn supplied_quantity(detail: &ClaimItemDetail, sub_detail: &ClaimItemSubDetail) -> TranslationResult<Element> {
    const PATH: &str = "Claim.item.detail.subDetail";
    let quantity = required(sub_detail.quantity.as_ref(), &format!("{PATH}.quantity"))?;
    let product = required(
        sub_detail.product_or_service.as_ref(),
        &format!("{PATH}.productOrService"),
    )?;
    let product = coding_for_system(product, code_system::SNOMED, &format!("{PATH}.productOrService"))?;
    let product_code = coding_code(product, &format!("{PATH}.productOrService.coding"))?;

    let charge_payment = annotation(
        "pertinentChargePayment",
        AnnotationCode::ChargePayment,
        codes::boolean("value", charge_paid(detail)?),
    );
    let endorsements = detail
        .program_code
        .iter()
        .filter_map(|concept| {
            concept
                .coding_for_system(code_system::DISPENSE_ENDORSEMENT)
                .map(|coding| (concept, coding))
        })
        .map(|(concept, coding)| {
            let code = coding_code(coding, "Claim.item.detail.programCode.coding")?;
            Ok(act("pertinentDispensingEndorsement", ClassCode::Obs, MoodCode::Evn)
                .child(AnnotationCode::DispensingEndorsement.code())
                .maybe_child(concept.text.as_deref().map(|text| Element::new("text").text(text)))
                .child(codes::code("value", oid::DISPENSING_ENDORSEMENT, code, None)))
        })
        .collect::<TranslationResult<Vec<_>>>()?;

    Ok(act("suppliedLineItemQuantity", ClassCode::Sply, MoodCode::Evn)
        .child(codes::snomed("code", snomed::DISPENSING.0, Some(snomed::DISPENSING.1)))
        .child(supply_quantity(quantity, &format!("{PATH}.quantity"))?)
        .child(supplied_product(product_code, product.display.as_deref()))
        .child(CLAIM_ANNOTATION.wrap("pertinentInformation1", charge_payment))
        .with_children(endorsements.into_iter().map(|endorsement| {
            Relationship::pertinent(true)
                .separatable(true)
                .wrap("pertinentInformation2", endorsement)
        })))
}

/// Whether the patient paid a prescription charge for the item.
fn charge_paid(detail: &ClaimItemDetail) -> TranslationResult<bool> {
    const PATH: &str = "Claim.item.detail.programCode";
    let coding = coding_in(&detail.program_code, code_system::PRESCRIPTION_CHARGE)
        .ok_or_else(|| TranslationError::missing(format!("{PATH}.coding(\"{}\")", code_system::PRESCRIPTION_CHARGE)))?;
    match coding_code(coding, &format!("{PATH}.coding"))? {
        "paid-once" | "paid-twice" => Ok(true),
        "not-paid" => Ok(false),
        _ => Err(TranslationError::invalid(PATH, "Unsupported prescription charge code")),
    }
}
