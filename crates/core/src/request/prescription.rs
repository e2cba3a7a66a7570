//! The `ParentPrescription` of a prescription order bundle.
//!
//! Prescription-level fields come from the first `MedicationRequest`. Later requests are only
//! compared against it, and a disagreement is logged rather than rejected.

use fhir::{Bundle, MedicationRequest, Patient, Reference, ReferenceIndex};
use hl7v3::codes::{self, AnnotationCode, NullFlavor};
use hl7v3::vocab::{
    act, entity, role, ClassCode, ContextControlCode, DeterminerCode, MoodCode, Relationship, TypeCode,
};
use hl7v3::Element;
use tracing::debug;

use super::agent_person::{
    prescriber_agent_person, responsible_party_reference, responsible_party_relationship,
    signed_author, PersonId,
};
use super::common::{
    act_ref, annotation, coded_value, coding_code, count, identifier_value, integer_extension,
    message_id, required_extension, sds_organisation_id, short_form_id, warn_on_divergence,
    PrescriptionIds,
};
use super::line_item::{line_item, Communicated};
use super::organisation::Licence;
use super::patient::record_target;
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, extension, message_type, snomed, system, template};
use crate::dates::{is_future_dated, to_hl7_date, to_hl7_date_time};
use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

/// How a prescription is to be dispensed over time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CourseOfTherapy {
    Acute,
    Continuous,
    ContinuousRepeatDispensing,
}

impl CourseOfTherapy {
    pub(crate) fn of(medication_request: &MedicationRequest) -> TranslationResult<Self> {
        const PATH: &str = "MedicationRequest.courseOfTherapyType.coding.code";
        let concept = required(
            medication_request.course_of_therapy_type.as_ref(),
            "MedicationRequest.courseOfTherapyType",
        )?;
        let coding = concept
            .coding_for_system(code_system::COURSE_OF_THERAPY)
            .ok_or_else(|| TranslationError::missing("MedicationRequest.courseOfTherapyType.coding"))?;
        match coding_code(coding, "MedicationRequest.courseOfTherapyType.coding")? {
            "acute" => Ok(CourseOfTherapy::Acute),
            "continuous" => Ok(CourseOfTherapy::Continuous),
            "continuous-repeat-dispensing" => Ok(CourseOfTherapy::ContinuousRepeatDispensing),
            other => Err(TranslationError::invalid(
                PATH,
                format!("Unhandled course of therapy type code '{other}'."),
            )),
        }
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            CourseOfTherapy::Acute => "acute",
            CourseOfTherapy::Continuous => "continuous",
            CourseOfTherapy::ContinuousRepeatDispensing => "continuous-repeat-dispensing",
        }
    }
}

const PRESCRIPTION_ANNOTATION: Relationship = Relationship::pertinent(true).separatable(false);

/// Builds the `ParentPrescription` for a prescription order bundle.
pub(crate) fn parent_prescription(
    bundle: &Bundle,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let index = ReferenceIndex::new(bundle);
    let medication_requests: Vec<&MedicationRequest> = index.all_of::<MedicationRequest>().collect();
    let first = *medication_requests
        .first()
        .ok_or_else(|| TranslationError::missing("Bundle.entry.ofType(MedicationRequest)"))?;
    check_prescription_level_fields(&medication_requests);

    let bundle_id = message_id(bundle.identifier.as_ref(), "Bundle.identifier")?;
    let authored_on = required(first.authored_on.as_deref(), "MedicationRequest.authoredOn")?;
    let subject = required(first.subject.as_ref(), "MedicationRequest.subject")?;
    let patient: &Patient = index.resolve(subject)?;

    let prescription = prescription(&index, &medication_requests, first, config)?;
    let line_item_refs = medication_requests
        .iter()
        .map(|request| {
            let item_number = identifier_value(
                &request.identifier,
                system::PRESCRIPTION_ORDER_ITEM_NUMBER,
                "MedicationRequest.identifier",
            )?;
            Ok(Relationship::new(TypeCode::Comp).wrap(
                "component",
                act_ref("actRef", ClassCode::Sbadm, MoodCode::Rqo, item_number),
            ))
        })
        .collect::<TranslationResult<Vec<_>>>()?;
    let category = act("pertinentCareRecordElementCategory", ClassCode::Category, MoodCode::Evn)
        .child(codes::snomed(
            "code",
            snomed::MEDICATION_CARE_RECORD.0,
            Some(snomed::MEDICATION_CARE_RECORD.1),
        ))
        .with_children(line_item_refs);

    debug!(
        bundle_id,
        line_items = medication_requests.len(),
        "translated parent prescription"
    );
    Ok(act("ParentPrescription", ClassCode::Info, MoodCode::Evn)
        .child(codes::global_identifier("id", bundle_id))
        .child(codes::snomed("code", snomed::PRESCRIPTION.0, Some(snomed::PRESCRIPTION.1)))
        .child(codes::value(
            "effectiveTime",
            to_hl7_date_time(authored_on, "MedicationRequest.authoredOn")?,
        ))
        .child(codes::type_id(message_type::PARENT_PRESCRIPTION))
        .child(record_target(&index, patient, config)?)
        .child(
            Relationship::pertinent(true)
                .template(template::PERTINENT_INFORMATION)
                .wrap("pertinentInformation1", prescription),
        )
        .child(
            Relationship::new(TypeCode::Pert)
                .template(template::PERTINENT_INFORMATION1)
                .wrap("pertinentInformation2", category),
        ))
}

/// Logs every prescription-level field on which a later request differs from the first.
fn check_prescription_level_fields(medication_requests: &[&MedicationRequest]) {
    const PATH: &str = "MedicationRequest";
    warn_on_divergence(medication_requests, PATH, |r| r.authored_on.clone());
    warn_on_divergence(medication_requests, PATH, |r| r.requester.clone());
    warn_on_divergence(medication_requests, PATH, |r| r.group_identifier.clone());
    warn_on_divergence(medication_requests, PATH, |r| r.course_of_therapy_type.clone());
    warn_on_divergence(medication_requests, PATH, |r| {
        fhir::Extension::find(&r.extension, extension::PRESCRIPTION_TYPE).cloned()
    });
    warn_on_divergence(medication_requests, PATH, |r| {
        fhir::Extension::find(&r.extension, extension::RESPONSIBLE_PRACTITIONER).cloned()
    });
    warn_on_divergence(medication_requests, PATH, |r| {
        r.dispense_request.as_ref().and_then(|dispense| {
            fhir::Extension::find(&dispense.extension, extension::PERFORMER_SITE_TYPE).cloned()
        })
    });
}

fn prescription(
    index: &ReferenceIndex<'_>,
    medication_requests: &[&MedicationRequest],
    first: &MedicationRequest,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let ids = PrescriptionIds::of(first.group_identifier.as_ref(), "MedicationRequest")?;
    let course_of_therapy = CourseOfTherapy::of(first)?;
    let repeat_number = repeat_number(first, course_of_therapy)?;
    let dispense_request = required(
        first.dispense_request.as_ref(),
        "MedicationRequest.dispenseRequest",
    )?;
    let requester = required(first.requester.as_ref(), "MedicationRequest.requester")?;

    let performer = dispense_request
        .performer
        .as_ref()
        .map(|performer| {
            let ods_code = performer
                .identifier
                .as_ref()
                .and_then(|identifier| identifier.value.as_deref())
                .ok_or_else(|| {
                    TranslationError::missing("MedicationRequest.dispenseRequest.performer.identifier")
                })?;
            Ok::<_, TranslationError>(
                Relationship::new(TypeCode::Prf)
                    .context_control(ContextControlCode::Op)
                    .wrap(
                        "performer",
                        role("AgentOrgSDS", ClassCode::Agnt).child(
                            entity("agentOrganizationSDS", ClassCode::Org, DeterminerCode::Instance)
                            .child(sds_organisation_id(ods_code)),
                        ),
                    ),
            )
        })
        .transpose()?;

    let responsible_party = prescriber_agent_person(
        index,
        responsible_party_reference(&first.extension, requester),
        PersonId::ResponsibleParty,
        Licence::Included,
    )?;

    let days_supply = match course_of_therapy {
        CourseOfTherapy::ContinuousRepeatDispensing => Some(days_supply(dispense_request)?),
        _ => None,
    };

    let treatment_type = to_target(Domain::PrescriptionTreatmentType, course_of_therapy.code())?;
    let site_type = required_extension(
        &dispense_request.extension,
        extension::PERFORMER_SITE_TYPE,
        "MedicationRequest.dispenseRequest.extension",
    )?;
    let site_code = coding_code(
        required(
            site_type.value_coding.as_ref(),
            "MedicationRequest.dispenseRequest.extension(\"Extension-DM-PerformerSiteType\").valueCoding",
        )?,
        "MedicationRequest.dispenseRequest.extension(\"Extension-DM-PerformerSiteType\").valueCoding",
    )?;
    let prescription_type = required_extension(
        &first.extension,
        extension::PRESCRIPTION_TYPE,
        "MedicationRequest.extension",
    )?;
    let prescription_type_code = coding_code(
        required(
            prescription_type.value_coding.as_ref(),
            "MedicationRequest.extension(\"Extension-DM-PrescriptionType\").valueCoding",
        )?,
        "MedicationRequest.extension(\"Extension-DM-PrescriptionType\").valueCoding",
    )?;

    let communicated = Communicated::collect(index)?;
    let nothing = Communicated::default();
    let line_items = medication_requests
        .iter()
        .enumerate()
        .map(|(position, request)| {
            let info = if position == 0 { &communicated } else { &nothing };
            let item = line_item(index, request, repeat_number.clone(), info, config)?
                .renamed("pertinentLineItem");
            Ok(Relationship::pertinent(true)
                .inversion(false)
                .negation(false)
                .separatable(true)
                .template(template::SOURCE_OF2)
                .wrap("pertinentInformation2", item))
        })
        .collect::<TranslationResult<Vec<_>>>()?;

    Ok(act("pertinentPrescription", ClassCode::Sbadm, MoodCode::Rqo)
        .child(codes::global_identifier("id", ids.global))
        .child(short_form_id("id", ids.short_form))
        .child(codes::snomed("code", snomed::ADMINISTRATION.0, Some(snomed::ADMINISTRATION.1)))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(repeat_number)
        .maybe_child(performer)
        .child(signed_author(index, requester)?)
        .child(responsible_party_relationship().wrap("responsibleParty", responsible_party))
        .maybe_child(days_supply)
        .maybe_child(review_date(first)?.map(|review| {
            PRESCRIPTION_ANNOTATION.wrap(
                "pertinentInformation7",
                annotation("pertinentReviewDate", AnnotationCode::ReviewDate, codes::value("value", review)),
            )
        }))
        .child(PRESCRIPTION_ANNOTATION.wrap(
            "pertinentInformation5",
            annotation(
                "pertinentPrescriptionTreatmentType",
                AnnotationCode::TreatmentType,
                coded_value(treatment_type),
            ),
        ))
        .child(
            Relationship::pertinent(true).separatable(true).wrap(
                "pertinentInformation1",
                annotation(
                    "pertinentDispensingSitePreference",
                    AnnotationCode::DispensingSite,
                    coded_value(to_target(Domain::DispensingSitePreference, site_code)?),
                ),
            ),
        )
        .with_children(line_items)
        .child(PRESCRIPTION_ANNOTATION.wrap(
            "pertinentInformation8",
            annotation(
                "pertinentTokenIssued",
                AnnotationCode::TokenIssued,
                codes::boolean("value", false),
            ),
        ))
        .child(PRESCRIPTION_ANNOTATION.wrap(
            "pertinentInformation4",
            annotation(
                "pertinentPrescriptionType",
                AnnotationCode::PrescriptionType,
                coded_value(to_target(Domain::PrescriptionType, prescription_type_code)?),
            ),
        )))
}

/// `repeatNumber`: `1..1` for continuous prescribing and `1..allowed` for repeat dispensing.
///
/// For repeat dispensing the allowed count is required on `dispenseRequest`; a
/// `basedOn` repeat information extension overrides it.
fn repeat_number(
    medication_request: &MedicationRequest,
    course_of_therapy: CourseOfTherapy,
) -> TranslationResult<Option<Element>> {
    let high = match course_of_therapy {
        CourseOfTherapy::Acute => return Ok(None),
        CourseOfTherapy::Continuous => 1,
        CourseOfTherapy::ContinuousRepeatDispensing => {
            const PATH: &str = "MedicationRequest.dispenseRequest.numberOfRepeatsAllowed";
            let from_dispense_request = medication_request
                .dispense_request
                .as_ref()
                .and_then(|dispense| dispense.number_of_repeats_allowed.as_ref())
                .ok_or_else(|| TranslationError::invalid(PATH, "Number of repeats allowed is required."))
                .and_then(|allowed| count(allowed, PATH))?;
            repeats_allowed_from_based_on(&medication_request.based_on)?.unwrap_or(from_dispense_request)
        }
    };
    let high = high.to_string();
    Ok(Some(codes::interval("repeatNumber", Some("1"), Some(&high))))
}

fn repeats_allowed_from_based_on(based_on: &[Reference]) -> TranslationResult<Option<u32>> {
    let repeat_information = based_on
        .iter()
        .find_map(|reference| fhir::Extension::find(&reference.extension, extension::REPEAT_INFORMATION));
    match repeat_information {
        Some(repeat_information) if repeat_information.nested("numberOfRepeatsAllowed").is_some() => {
            integer_extension(
                repeat_information,
                "numberOfRepeatsAllowed",
                "MedicationRequest.basedOn.extension",
            )
            .map(Some)
        }
        _ => Ok(None),
    }
}

/// `component1 → daysSupply`: the validity period and the expected supply duration in days.
fn days_supply(dispense_request: &fhir::DispenseRequest) -> TranslationResult<Element> {
    let validity_period = required(
        dispense_request.validity_period.as_ref(),
        "MedicationRequest.dispenseRequest.validityPeriod",
    )?;
    let start = required(
        validity_period.start.as_deref(),
        "MedicationRequest.dispenseRequest.validityPeriod.start",
    )?;
    let end = required(
        validity_period.end.as_deref(),
        "MedicationRequest.dispenseRequest.validityPeriod.end",
    )?;
    let low = to_hl7_date(start, "MedicationRequest.dispenseRequest.validityPeriod.start")?;
    let high = to_hl7_date(end, "MedicationRequest.dispenseRequest.validityPeriod.end")?;

    let duration = required(
        dispense_request.expected_supply_duration.as_ref(),
        "MedicationRequest.dispenseRequest.expectedSupplyDuration",
    )?;
    if duration.code.as_deref() != Some("d") {
        return Err(TranslationError::invalid(
            "MedicationRequest.dispenseRequest.expectedSupplyDuration.code",
            "Expected supply duration must be specified in days.",
        ));
    }
    let days = required(
        duration.value.as_ref(),
        "MedicationRequest.dispenseRequest.expectedSupplyDuration.value",
    )?;

    Ok(Relationship::new(TypeCode::Comp).separatable(true).wrap(
        "component1",
        act("daysSupply", ClassCode::Sply, MoodCode::Rqo)
            .child(codes::interval("effectiveTime", Some(&low), Some(&high)))
            .child(codes::unanchored_interval("expectedUseTime", days.as_str(), "d")),
    ))
}

/// The UK Core `authorisationExpiryDate`, which must lie in the future.
fn review_date(medication_request: &MedicationRequest) -> TranslationResult<Option<String>> {
    const PATH: &str = "MedicationRequest.extension.extension.valueDateTime";
    let Some(expiry) = fhir::Extension::find(&medication_request.extension, extension::UK_CORE_REPEAT_INFORMATION)
        .and_then(|repeat| repeat.nested("authorisationExpiryDate"))
    else {
        return Ok(None);
    };
    let value = required(expiry.value_date_time.as_deref(), PATH)?;
    if !is_future_dated(value, PATH)? {
        return Err(TranslationError::invalid(
            PATH,
            format!("authorisationExpiryDate is not in the future '{value}'."),
        ));
    }
    to_hl7_date(value, PATH).map(Some)
}
