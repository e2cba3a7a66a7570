//! `CancellationRequest`: cancels one line item of a prescription.

use fhir::{Bundle, MedicationRequest, Patient, ReferenceIndex};
use hl7v3::codes::{self, AnnotationCode};
use hl7v3::vocab::{act, ClassCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;
use tracing::debug;

use super::agent_person::{prescriber_agent_person, responsible_party_reference, PersonId};
use super::common::{
    act_ref, coding_code, coding_for_system, identifier_value, message_id, prescription_id_annotation,
    PrescriptionIds,
};
use super::organisation::Licence;
use super::patient::record_target;
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, message_type, system};
use crate::dates::now_hl7;
use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

/// Builds the `CancellationRequest` for the first `MedicationRequest` of `bundle`.
///
/// The request's `statusReason` is the cancellation reason. The effective time is the time of
/// translation.
pub(crate) fn cancellation_request(
    bundle: &Bundle,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let index = ReferenceIndex::new(bundle);
    let medication_request = index
        .first_of::<MedicationRequest>()
        .ok_or_else(|| TranslationError::missing("Bundle.entry.ofType(MedicationRequest)"))?;
    let message_id = message_id(bundle.identifier.as_ref(), "Bundle.identifier")?;
    let subject = required(medication_request.subject.as_ref(), "MedicationRequest.subject")?;
    let patient: &Patient = index.resolve(subject)?;
    let requester = required(medication_request.requester.as_ref(), "MedicationRequest.requester")?;

    let author = prescriber_agent_person(&index, requester, PersonId::SdsUser, Licence::Omitted)?;
    let responsible_party = prescriber_agent_person(
        &index,
        responsible_party_reference(&medication_request.extension, requester),
        PersonId::SdsUser,
        Licence::Omitted,
    )?;

    let ids = PrescriptionIds::of(medication_request.group_identifier.as_ref(), "MedicationRequest")?;
    let line_item = identifier_value(
        &medication_request.identifier,
        system::PRESCRIPTION_ORDER_ITEM_NUMBER,
        "MedicationRequest.identifier",
    )?;

    debug!(message_id, line_item, "translated cancellation request");
    Ok(act("CancellationRequest", ClassCode::Info, MoodCode::Evn)
        .child(codes::global_identifier("id", message_id))
        .child(codes::value("effectiveTime", now_hl7()))
        .child(codes::type_id(message_type::CANCELLATION_REQUEST))
        .child(record_target(&index, patient, config)?)
        .child(Relationship::new(TypeCode::Aut).wrap("author", author))
        .child(Relationship::new(TypeCode::Resp).wrap("responsibleParty", responsible_party))
        .child(
            Relationship::new(TypeCode::Pert)
                .inversion(false)
                .negation(false)
                .separatable(true)
                .wrap(
                    "pertinentInformation1",
                    act_ref("pertinentLineItemRef", ClassCode::Sbadm, MoodCode::Rqo, line_item),
                ),
        )
        .child(
            Relationship::pertinent(true)
                .separatable(false)
                .wrap("pertinentInformation2", prescription_id_annotation(ids.short_form)),
        )
        .child(
            Relationship::pertinent(true)
                .separatable(false)
                .wrap("pertinentInformation", cancellation_reason(medication_request)?),
        )
        .child(
            Relationship::pertinent(false).separatable(true).wrap(
                "pertinentInformation3",
                act_ref(
                    "pertinentOriginalPrescriptionRef",
                    ClassCode::Sbadm,
                    MoodCode::Rqo,
                    ids.global,
                ),
            ),
        ))
}

/// `CR`: the reason code, with its display as free text.
fn cancellation_reason(medication_request: &MedicationRequest) -> TranslationResult<Element> {
    let status_reason = required(
        medication_request.status_reason.as_ref(),
        "MedicationRequest.statusReason",
    )?;
    let coding = coding_for_system(
        status_reason,
        code_system::MEDICATION_REQUEST_STATUS_REASON,
        "MedicationRequest.statusReason",
    )?;
    let code = coding_code(coding, "MedicationRequest.statusReason.coding")?;
    let target = to_target(Domain::CancellationReason, code)?;
    let display = coding.display.as_deref().or(target.display).unwrap_or_default();

    Ok(act("pertinentCancellationReason", ClassCode::Obs, MoodCode::Evn)
        .child(AnnotationCode::CancellationReason.code())
        .child(Element::new("text").text(display))
        .child(codes::code("value", target.system, target.code, None)))
}
