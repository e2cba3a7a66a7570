//! A prescribed `LineItem`, one per `MedicationRequest`.

use fhir::{CommunicationRequest, Extension, List, MedicationRequest, ReferenceIndex};
use hl7v3::codes::{self, AnnotationCode, NullFlavor};
use hl7v3::vocab::{act, entity, role, ClassCode, ContextControlCode, DeterminerCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;

use super::common::{
    annotation, coded_value, coding_code, coding_for_system, identifier_value, medication_coding,
    text_value,
};
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, extension, snomed, system};
use crate::error::required;
use crate::{dosage, Domain, TranslationError, TranslationResult};

const LINE_ITEM_ANNOTATION: Relationship = Relationship::pertinent(true).separatable(false);

/// Free text the prescriber sends alongside the items through `CommunicationRequest` payloads.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Communicated<'a> {
    /// Displays of the entries of every referenced `List`.
    pub medications: Vec<&'a str>,
    pub patient_info: Vec<&'a str>,
}

impl<'a> Communicated<'a> {
    pub(crate) fn collect(index: &ReferenceIndex<'a>) -> TranslationResult<Self> {
        let payloads: Vec<_> = index
            .all_of::<CommunicationRequest>()
            .flat_map(|request| request.payload.iter())
            .collect();
        let mut medications = Vec::new();
        for reference in payloads.iter().filter_map(|payload| payload.content_reference.as_ref()) {
            let list: &List = index.resolve(reference)?;
            medications.extend(
                list.entry
                    .iter()
                    .filter_map(|entry| entry.item.display.as_deref())
                    .filter(|display| !display.is_empty()),
            );
        }
        let patient_info = payloads
            .iter()
            .filter_map(|payload| payload.content_string.as_deref())
            .collect();
        Ok(Self {
            medications,
            patient_info,
        })
    }

    fn is_empty(&self) -> bool {
        self.medications.is_empty() && self.patient_info.is_empty()
    }
}

/// Builds the line item for `medication_request`.
///
/// `communicated` is copied into the additional instructions; the prescription builder only
/// passes it for the first item.
pub(crate) fn line_item(
    index: &ReferenceIndex<'_>,
    medication_request: &MedicationRequest,
    repeat_number: Option<Element>,
    communicated: &Communicated<'_>,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let item_number = identifier_value(
        &medication_request.identifier,
        system::PRESCRIPTION_ORDER_ITEM_NUMBER,
        "MedicationRequest.identifier",
    )?;
    let medication = medication_coding(
        index,
        medication_request.medication_codeable_concept.as_ref(),
        medication_request.medication_reference.as_ref(),
        "MedicationRequest",
    )?;
    let medication_code = coding_code(medication, "MedicationRequest.medication.coding")?;

    let product = act_product(medication_code, medication.display.as_deref());
    let dispense_request = required(
        medication_request.dispense_request.as_ref(),
        "MedicationRequest.dispenseRequest",
    )?;
    let quantity = required(
        dispense_request.quantity.as_ref(),
        "MedicationRequest.dispenseRequest.quantity",
    )?;
    let line_item_quantity = act("lineItemQuantity", ClassCode::Sply, MoodCode::Rqo)
        .child(codes::snomed("code", snomed::DISPENSING.0, Some(snomed::DISPENSING.1)))
        .child(supply_quantity(quantity, "MedicationRequest.dispenseRequest.quantity")?);

    let endorsements = endorsements(&medication_request.extension)?
        .into_iter()
        .map(|endorsement| LINE_ITEM_ANNOTATION.wrap("pertinentInformation3", endorsement));

    Ok(act("LineItem", ClassCode::Sbadm, MoodCode::Rqo)
        .child(codes::global_identifier("id", item_number))
        .child(codes::snomed("code", snomed::ADMINISTRATION.0, Some(snomed::ADMINISTRATION.1)))
        .child(codes::null("effectiveTime", NullFlavor::NotApplicable))
        .maybe_child(repeat_number)
        .child(product)
        .child(
            Relationship::new(TypeCode::Comp)
                .separatable(false)
                .wrap("component", line_item_quantity),
        )
        .maybe_child(
            additional_instructions(medication_request, communicated)?
                .map(|instructions| LINE_ITEM_ANNOTATION.wrap("pertinentInformation1", instructions)),
        )
        .with_children(endorsements)
        .child(LINE_ITEM_ANNOTATION.wrap(
            "pertinentInformation2",
            dosage_instructions(medication_request, config)?,
        )))
}

fn act_product(code: &str, display: Option<&str>) -> Element {
    Relationship::new(TypeCode::Prd)
        .context_control(ContextControlCode::Op)
        .wrap(
            "product",
            role("manufacturedProduct", ClassCode::Manu).child(
                entity("manufacturedRequestedMaterial", ClassCode::Mmat, DeterminerCode::Kind)
                    .child(codes::snomed("code", code, display)),
            ),
        )
}

/// `<quantity value=".." unit="1">` with the SNOMED unit as a translation.
pub(crate) fn supply_quantity(quantity: &fhir::Quantity, path: &str) -> TranslationResult<Element> {
    let value = required(quantity.value.as_ref(), &format!("{path}.value"))?;
    let unit_code = required(quantity.code.as_deref(), &format!("{path}.code"))?;
    Ok(codes::quantity_in_alternative_units(
        "quantity",
        value.as_str(),
        unit_code,
        quantity.unit.as_deref(),
    ))
}

/// `PE` annotations, one per endorsement extension.
fn endorsements(extensions: &[Extension]) -> TranslationResult<Vec<Element>> {
    const PATH: &str =
        "MedicationRequest.extension(\"Extension-DM-PrescriptionEndorsement\").valueCodeableConcept";
    extensions
        .iter()
        .filter(|candidate| candidate.url == extension::PRESCRIPTION_ENDORSEMENT)
        .map(|endorsement| {
            let concept = required(endorsement.value_codeable_concept.as_ref(), PATH)?;
            let coding = coding_for_system(concept, code_system::ENDORSEMENT, PATH)?;
            let target = to_target(Domain::Endorsement, coding_code(coding, PATH)?)?;
            Ok(annotation(
                "pertinentPrescriberEndorsement",
                AnnotationCode::Endorsement,
                coded_value(target),
            ))
        })
        .collect()
}

/// `AI`: current medication and patient information, then the controlled drug quantity in words
/// and the note.
///
/// Omitted when there is nothing to say.
fn additional_instructions(
    medication_request: &MedicationRequest,
    communicated: &Communicated<'_>,
) -> TranslationResult<Option<Element>> {
    let note = match medication_request.note.as_slice() {
        [] => None,
        [note] => Some(note.text.as_str()),
        _ => {
            return Err(TranslationError::invalid(
                "MedicationRequest.note",
                "expected at most one note",
            ))
        }
    };
    let controlled_drug_words = Extension::find(&medication_request.extension, extension::CONTROLLED_DRUG)
        .and_then(|controlled| controlled.nested("quantityWords"))
        .and_then(|words| words.value_string.as_deref())
        .filter(|words| !words.is_empty())
        .map(|words| format!("CD: {words}"));

    let text = controlled_drug_words
        .as_deref()
        .into_iter()
        .chain(note)
        .collect::<Vec<_>>()
        .join("\n");
    if communicated.is_empty() && text.is_empty() {
        return Ok(None);
    }

    let mut value = Element::new("value")
        .with_children(
            communicated
                .medications
                .iter()
                .map(|medication| Element::new("medication").text(*medication)),
        )
        .with_children(
            communicated
                .patient_info
                .iter()
                .map(|info| Element::new("patientInfo").text(*info)),
        );
    if !text.is_empty() {
        value = value.text(text);
    }
    Ok(Some(annotation(
        "pertinentAdditionalInstructions",
        AnnotationCode::AdditionalInstructions,
        value,
    )))
}

/// `DI`: the prescriber's dosage text, or a rendering of the structured dosage when enabled.
fn dosage_instructions(
    medication_request: &MedicationRequest,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    let dosages = &medication_request.dosage_instruction;
    let texts: Option<Vec<&str>> = dosages
        .iter()
        .map(|dosage| dosage.text.as_ref().map(|text| text.as_str()))
        .collect();

    let text = match texts {
        Some(texts) if !texts.is_empty() => texts.join("\n"),
        _ if config.render_missing_dosage_text() && !dosages.is_empty() => dosage::render(dosages)?,
        _ => {
            return Err(TranslationError::missing(
                "MedicationRequest.dosageInstruction.text",
            ))
        }
    };
    Ok(annotation("pertinentDosageInstructions", AnnotationCode::Dosage, text_value(text)))
}
