//! HL7 V3 `PrescriptionReleaseResponse` to FHIR.
//!
//! Each signed `ParentPrescription` the Spine releases becomes a message bundle shaped like the
//! prescription order that created it. The bundles are returned together as a searchset.
//! Components carrying any other template are unsigned legacy prescriptions and are skipped.

use eps_types::{NonEmptyText, NumericText};
use fhir::{
    Annotation, Bundle, BundleEntry, CodeableConcept, Coding, CommunicationPayload,
    CommunicationRequest, DispenseRequest, Dosage, Extension, Identifier, List, ListEntry,
    MedicationRequest, Patient, Period, PractitionerRole, Quantity, Reference, Resource,
};
use hl7v3::Element;
use tracing::debug;

use super::common::{
    attribute, children, find_descendant, message_header, new_id, optional_attribute, path,
    patient, required_path, role_entries, roles_index, TranslatedRole,
};
use super::{full_url, FhirResponse};
use crate::code_systems::{medication_request_status, to_source};
use crate::constants::{code_system, extension, message_type, system};
use crate::dates::{from_hl7_date, from_hl7_date_time};
use crate::{Domain, TranslationError, TranslationResult};

const ROOT: &str = "PrescriptionReleaseResponse";
const ORDER_EVENT: (&str, &str) = ("prescription-order", "Prescription Order");
const CONTROLLED_DRUG_PREFIX: &str = "CD: ";
const REPEAT_DISPENSING: &str = "0003";

/// Parses and translates a release response document.
pub(crate) fn release_response(xml: &str) -> TranslationResult<FhirResponse> {
    let document = hl7v3::parse(xml)?;
    let response = find_descendant(&document, ROOT).ok_or_else(|| TranslationError::missing(ROOT))?;

    let response_id = attribute(response, &["id"], "root")?;
    let release_request_id = attribute(
        response,
        &["inFulfillmentOf", "priorDownloadRequestRef", "id"],
        "root",
    )?;
    let effective_time = from_hl7_date_time(attribute(response, &["effectiveTime"], "value")?, "effectiveTime")?;

    let mut entry = Vec::new();
    for component in children(response, "component") {
        let template = path(component, &["templateId"]).and_then(|id| id.attribute("extension"));
        if template != Some(message_type::RELEASED_PRESCRIPTION) {
            debug!(template, "skipping unsupported release component");
            continue;
        }
        let bundle = prescription_bundle(
            required_path(component, &["ParentPrescription"])?,
            release_request_id,
        )?;
        entry.push(BundleEntry::new(
            full_url(bundle.id.as_deref().unwrap_or_default()),
            bundle,
        ));
    }

    debug!(response_id, prescriptions = entry.len(), "translated release response");
    Ok(FhirResponse::Bundle(Bundle {
        id: Some(new_id()),
        identifier: Some(Identifier::new(system::RFC4122, response_id.to_lowercase())),
        bundle_type: Some("searchset".to_owned()),
        timestamp: Some(effective_time),
        total: u32::try_from(entry.len()).ok(),
        entry,
    }))
}

/// One released prescription as a `prescription-order` message bundle.
fn prescription_bundle(parent: &Element, release_request_id: &str) -> TranslationResult<Bundle> {
    let message_id = attribute(parent, &["id"], "root")?;
    let effective_time = from_hl7_date_time(attribute(parent, &["effectiveTime"], "value")?, "effectiveTime")?;
    let prescription = required_path(parent, &["pertinentInformation1", "pertinentPrescription"])?;

    let patient_id = new_id();
    let patient = patient(required_path(parent, &["recordTarget", "Patient"])?)?;

    let author = required_path(prescription, &["author", "AgentPerson"])?;
    let mut roles = vec![TranslatedRole::of(author, "author.AgentPerson")?];
    let responsible = match path(prescription, &["responsibleParty", "AgentPerson"]) {
        Some(agent) => roles_index(&mut roles, agent, "responsibleParty.AgentPerson")?,
        None => 0,
    };

    let line_items = children(prescription, "pertinentInformation2")
        .map(|relationship| required_path(relationship, &["pertinentLineItem"]))
        .collect::<TranslationResult<Vec<_>>>()?;
    let first_item = line_items
        .first()
        .ok_or_else(|| TranslationError::missing("pertinentPrescription.pertinentInformation2"))?;

    let context = Prescription {
        element: prescription,
        patient_id: &patient_id,
        requester_id: &roles[0].id,
        responsible_id: &roles[responsible].id,
    };
    let medication_requests = line_items
        .iter()
        .map(|line_item| context.medication_request(line_item))
        .collect::<TranslationResult<Vec<_>>>()?;

    let communicated = communication(
        &AdditionalInstructions::of(first_item),
        &patient_id,
        &patient,
        &roles[0].role,
    );

    let mut focus = vec![Reference::to(full_url(&patient_id))];
    focus.extend(
        medication_requests
            .iter()
            .filter_map(|request| request.id.as_deref())
            .map(|id| Reference::to(full_url(id))),
    );
    let header = message_header(
        message_id,
        ORDER_EVENT,
        optional_attribute(
            prescription,
            &["performer", "AgentOrgSDS", "agentOrganizationSDS", "id"],
            "extension",
        ),
        release_request_id,
        focus,
    );

    let mut entry = vec![
        entry_for(header.id.clone(), Resource::MessageHeader(header)),
        entry_for(
            Some(patient_id.clone()),
            Resource::Patient(Patient {
                id: Some(patient_id.clone()),
                ..patient
            }),
        ),
    ];
    entry.extend(role_entries(roles));
    entry.extend(communicated.into_iter().map(|resource| entry_for(resource.id().map(str::to_owned), resource)));
    entry.extend(
        medication_requests
            .into_iter()
            .map(|request| entry_for(request.id.clone(), Resource::MedicationRequest(request))),
    );

    Ok(Bundle {
        id: Some(new_id()),
        identifier: Some(Identifier::new(system::RFC4122, message_id.to_lowercase())),
        bundle_type: Some("message".to_owned()),
        timestamp: Some(effective_time),
        entry,
        ..Bundle::default()
    })
}

fn entry_for(id: Option<String>, resource: Resource) -> BundleEntry {
    BundleEntry::new(full_url(id.as_deref().unwrap_or_default()), resource)
}

// ============================================================================
// Additional instructions
// ============================================================================

/// The parts of a line item's additional instructions.
#[derive(Debug, Default, PartialEq)]
struct AdditionalInstructions {
    medication: Vec<String>,
    patient_info: Vec<String>,
    controlled_drug_words: Option<String>,
    note: Option<String>,
}

impl AdditionalInstructions {
    fn of(line_item: &Element) -> Self {
        let Some(value) = path(
            line_item,
            &["pertinentInformation1", "pertinentAdditionalInstructions", "value"],
        ) else {
            return Self::default();
        };
        let entries = |name: &str| {
            children(value, name)
                .map(Element::text_content)
                .collect::<Vec<_>>()
        };
        let text = value.text_content();
        let text = text.trim_start();
        let (words, note) = match text.strip_prefix(CONTROLLED_DRUG_PREFIX) {
            Some(rest) => rest.split_once('\n').unwrap_or((rest, "")),
            None => ("", text),
        };
        let non_empty = |text: &str| (!text.is_empty()).then(|| text.to_owned());
        Self {
            medication: entries("medication"),
            patient_info: entries("patientInfo"),
            controlled_drug_words: non_empty(words),
            note: non_empty(note),
        }
    }
}

/// The `CommunicationRequest`, and the medication `List` it points at, for the first item's
/// patient information.
fn communication(
    instructions: &AdditionalInstructions,
    patient_id: &str,
    patient: &Patient,
    author: &PractitionerRole,
) -> Vec<Resource> {
    if instructions.medication.is_empty() && instructions.patient_info.is_empty() {
        return Vec::new();
    }
    let mut payload: Vec<CommunicationPayload> = instructions
        .patient_info
        .iter()
        .map(|info| CommunicationPayload {
            content_string: Some(info.clone()),
            content_reference: None,
        })
        .collect();

    let list = (!instructions.medication.is_empty()).then(|| List {
        id: Some(new_id()),
        status: Some("current".to_owned()),
        mode: Some("snapshot".to_owned()),
        entry: instructions
            .medication
            .iter()
            .map(|medication| ListEntry {
                item: Reference {
                    display: Some(medication.clone()),
                    ..Reference::default()
                },
            })
            .collect(),
        ..List::default()
    });
    if let Some(id) = list.as_ref().and_then(|list| list.id.as_deref()) {
        payload.push(CommunicationPayload {
            content_string: None,
            content_reference: Some(Reference::to(full_url(id))),
        });
    }

    let request = CommunicationRequest {
        id: Some(new_id()),
        status: Some("unknown".to_owned()),
        subject: Some(Reference::to(full_url(patient_id))),
        payload,
        requester: author.organization.clone(),
        recipient: patient
            .identifier
            .first()
            .map(|identifier| Reference::to_identifier(identifier.clone(), None))
            .into_iter()
            .collect(),
    };
    let mut resources = vec![Resource::CommunicationRequest(request)];
    resources.extend(list.map(Resource::List));
    resources
}

// ============================================================================
// Medication requests
// ============================================================================

struct Prescription<'a> {
    element: &'a Element,
    patient_id: &'a str,
    requester_id: &'a str,
    responsible_id: &'a str,
}

impl Prescription<'_> {
    fn annotation_value(&self, slot: &str, name: &str) -> TranslationResult<&Element> {
        required_path(self.element, &[slot, name, "value"])
    }

    fn medication_request(&self, line_item: &Element) -> TranslationResult<MedicationRequest> {
        let prescription = self.element;
        let instructions = AdditionalInstructions::of(line_item);
        let repeat_number = path(line_item, &["repeatNumber"]);

        let treatment_type = attribute(
            self.annotation_value("pertinentInformation5", "pertinentPrescriptionTreatmentType")?,
            &[],
            "code",
        )?;
        let course = match (treatment_type, repeat_number) {
            (REPEAT_DISPENSING, _) => REPEAT_DISPENSING,
            (_, Some(_)) => "0002",
            _ => "0001",
        };
        let course_of_therapy = to_source(Domain::PrescriptionTreatmentType, course)?;
        let is_repeat_dispensing = course == REPEAT_DISPENSING;

        let product = required_path(
            line_item,
            &["product", "manufacturedProduct", "manufacturedRequestedMaterial", "code"],
        )?;
        let status = match optional_attribute(line_item, &["pertinentInformation4", "pertinentItemStatus", "value"], "code") {
            Some(code) => medication_request_status(code)?,
            None => "active",
        };
        let dosage = required_path(
            line_item,
            &["pertinentInformation2", "pertinentDosageInstructions", "value"],
        )?
        .text_content();
        let short_form = children(prescription, "id")
            .find_map(|id| id.attribute("extension"))
            .ok_or_else(|| TranslationError::missing("pertinentPrescription.id@extension"))?;
        let global = attribute(prescription, &["id"], "root")?;

        let mut extensions = vec![
            Extension {
                value_reference: Some(Reference::to(full_url(self.responsible_id))),
                ..Extension::with_url(extension::RESPONSIBLE_PRACTITIONER)
            },
            coded_extension(
                extension::PRESCRIPTION_TYPE,
                code_system::PRESCRIPTION_TYPE,
                self.annotation_value("pertinentInformation4", "pertinentPrescriptionType")?,
            )?,
        ];
        for endorsement in children(line_item, "pertinentInformation3")
            .filter_map(|relationship| path(relationship, &["pertinentPrescriberEndorsement", "value"]))
        {
            extensions.push(Extension {
                value_codeable_concept: Some(CodeableConcept::single(coding(code_system::ENDORSEMENT, endorsement)?)),
                ..Extension::with_url(extension::PRESCRIPTION_ENDORSEMENT)
            });
        }
        extensions.extend(self.repeat_information(repeat_number)?);
        if let Some(words) = &instructions.controlled_drug_words {
            extensions.push(Extension {
                extension: vec![Extension {
                    value_string: Some(words.clone()),
                    ..Extension::with_url("quantityWords")
                }],
                ..Extension::with_url(extension::CONTROLLED_DRUG)
            });
        }
        if let Some(issued) = optional_attribute(prescription, &["predecessor", "priorPreviousIssueDate", "value"], "value") {
            extensions.push(Extension {
                extension: vec![Extension {
                    value_date_time: Some(from_hl7_date_time(issued, "predecessor.priorPreviousIssueDate.value")?),
                    ..Extension::with_url("dateLastDispensed")
                }],
                ..Extension::with_url(extension::DISPENSING_INFORMATION)
            });
        }

        let item_id = attribute(line_item, &["id"], "root")?.to_lowercase();
        let based_on = if course != "0001" {
            self.based_on(&item_id)?
        } else {
            Vec::new()
        };
        let authored_on = from_hl7_date_time(
            attribute(prescription, &["author", "time"], "value")?,
            "author.time",
        )?;

        Ok(MedicationRequest {
            id: Some(new_id()),
            extension: extensions,
            identifier: vec![Identifier::new(system::PRESCRIPTION_ORDER_ITEM_NUMBER, item_id)],
            status: Some(status.to_owned()),
            intent: Some(if is_repeat_dispensing { "reflex-order" } else { "order" }.to_owned()),
            category: vec![CodeableConcept::single(Coding::new(
                code_system::MEDICATION_REQUEST_CATEGORY,
                "outpatient",
                "Outpatient",
            ))],
            medication_codeable_concept: Some(CodeableConcept::single(coding(code_system::SNOMED, product)?)),
            subject: Some(Reference::to(full_url(self.patient_id))),
            authored_on: Some(authored_on),
            requester: Some(Reference::to(full_url(self.requester_id))),
            group_identifier: Some(Identifier {
                extension: vec![Extension {
                    value_identifier: Some(Identifier::new(system::PRESCRIPTION, global.to_lowercase())),
                    ..Extension::with_url(extension::PRESCRIPTION_ID)
                }],
                ..Identifier::new(system::PRESCRIPTION_ORDER_NUMBER, short_form)
            }),
            course_of_therapy_type: Some(CodeableConcept::single(Coding {
                system: course_of_therapy.system.map(str::to_owned),
                code: Some(course_of_therapy.code.to_owned()),
                display: course_of_therapy.display.map(str::to_owned),
            })),
            based_on,
            note: instructions
                .note
                .as_deref()
                .and_then(|note| NonEmptyText::new(note).ok())
                .map(|text| Annotation { text })
                .into_iter()
                .collect(),
            dosage_instruction: vec![Dosage {
                text: NonEmptyText::new(&dosage).ok(),
                ..Dosage::default()
            }],
            dispense_request: Some(self.dispense_request(line_item, repeat_number)?),
            ..MedicationRequest::default()
        })
    }

    /// UK Core repeat information: the review date and how many issues have been made.
    fn repeat_information(&self, repeat_number: Option<&Element>) -> TranslationResult<Option<Extension>> {
        let review_date = optional_attribute(
            self.element,
            &["pertinentInformation7", "pertinentReviewDate", "value"],
            "value",
        );
        if review_date.is_none() && repeat_number.is_none() {
            return Ok(None);
        }
        let mut nested = Vec::new();
        if let Some(review_date) = review_date {
            nested.push(Extension {
                value_date_time: Some(from_hl7_date(review_date, "pertinentReviewDate.value")?),
                ..Extension::with_url("authorisationExpiryDate")
            });
        }
        if let Some(issued) = repeat_number.and_then(|repeat| optional_attribute(repeat, &["low"], "value")) {
            nested.push(Extension {
                value_unsigned_int: Some(numeric(issued, "repeatNumber.low")?),
                ..Extension::with_url("numberOfPrescriptionsIssued")
            });
        }
        Ok(Some(Extension {
            extension: nested,
            ..Extension::with_url(extension::UK_CORE_REPEAT_INFORMATION)
        }))
    }

    /// The line item as the authorising request, with the prescription's repeat counts from zero.
    fn based_on(&self, item_id: &str) -> TranslationResult<Vec<Reference>> {
        let Some(repeat_number) = path(self.element, &["repeatNumber"]) else {
            return Ok(Vec::new());
        };
        let counted_from_zero = |bound: &str| -> TranslationResult<NumericText> {
            let at = format!("pertinentPrescription.repeatNumber.{bound}");
            let value = attribute(repeat_number, &[bound], "value")?
                .parse::<u32>()
                .map_err(|_| TranslationError::invalid(&at, "expected a whole number"))?;
            Ok(NumericText::from(value.saturating_sub(1)))
        };
        Ok(vec![Reference {
            extension: vec![Extension {
                extension: vec![
                    Extension {
                        value_integer: Some(counted_from_zero("high")?),
                        ..Extension::with_url("numberOfRepeatsAllowed")
                    },
                    Extension {
                        value_integer: Some(counted_from_zero("low")?),
                        ..Extension::with_url("numberOfRepeatsIssued")
                    },
                ],
                ..Extension::with_url(extension::REPEAT_INFORMATION)
            }],
            ..Reference::to(full_url(item_id))
        }])
    }

    fn dispense_request(
        &self,
        line_item: &Element,
        repeat_number: Option<&Element>,
    ) -> TranslationResult<DispenseRequest> {
        let prescription = self.element;
        let site = self.annotation_value("pertinentInformation1", "pertinentDispensingSitePreference")?;
        let translation = required_path(
            line_item,
            &["component", "lineItemQuantity", "quantity", "translation"],
        )?;
        let value = attribute(translation, &[], "value")?;
        let value = if value.starts_with('.') { format!("0{value}") } else { value.to_owned() };

        let repeats_allowed = match repeat_number.and_then(|repeat| optional_attribute(repeat, &["high"], "value")) {
            Some(high) => high
                .parse::<u32>()
                .map_err(|_| TranslationError::invalid("pertinentLineItem.repeatNumber.high", "expected a whole number"))?
                .saturating_sub(1),
            None => 0,
        };

        let days_supply = path(prescription, &["component1", "daysSupply"]);
        let bound = |name: &str| -> TranslationResult<Option<String>> {
            days_supply
                .and_then(|supply| optional_attribute(supply, &["effectiveTime", name], "value"))
                .map(|value| from_hl7_date(value, "daysSupply.effectiveTime"))
                .transpose()
        };
        let (start, end) = (bound("low")?, bound("high")?);
        let expected_supply_duration = days_supply
            .and_then(|supply| optional_attribute(supply, &["expectedUseTime", "width"], "value"))
            .map(|days| -> TranslationResult<Quantity> {
                Ok(Quantity {
                    value: Some(numeric(days, "daysSupply.expectedUseTime.width")?),
                    unit: Some("days".to_owned()),
                    system: Some(code_system::UCUM.to_owned()),
                    code: Some("d".to_owned()),
                })
            })
            .transpose()?;

        Ok(DispenseRequest {
            extension: vec![Extension {
                value_coding: Some(Coding {
                    system: Some(code_system::DISPENSING_SITE_PREFERENCE.to_owned()),
                    code: Some(attribute(site, &[], "code")?.to_owned()),
                    display: None,
                }),
                ..Extension::with_url(extension::PERFORMER_SITE_TYPE)
            }],
            validity_period: (start.is_some() || end.is_some()).then_some(Period { start, end }),
            number_of_repeats_allowed: Some(NumericText::from(repeats_allowed)),
            quantity: Some(Quantity {
                value: Some(numeric(&value, "lineItemQuantity.quantity.translation")?),
                unit: translation.attribute("displayName").map(str::to_owned),
                system: Some(code_system::SNOMED.to_owned()),
                code: Some(attribute(translation, &[], "code")?.to_owned()),
            }),
            expected_supply_duration,
            performer: optional_attribute(
                prescription,
                &["performer", "AgentOrgSDS", "agentOrganizationSDS", "id"],
                "extension",
            )
            .map(|ods| Reference::to_identifier(Identifier::new(system::ODS_ORGANIZATION_CODE, ods), None)),
        })
    }
}

fn numeric(value: &str, at: &str) -> TranslationResult<NumericText> {
    NumericText::new(value).map_err(|e| TranslationError::invalid(at, e.to_string()))
}

/// A FHIR coding from an HL7 V3 coded value, keeping its display name.
fn coding(system: &str, value: &Element) -> TranslationResult<Coding> {
    Ok(Coding {
        system: Some(system.to_owned()),
        code: Some(attribute(value, &[], "code")?.to_owned()),
        display: value.attribute("displayName").map(str::to_owned),
    })
}

fn coded_extension(url: &str, system: &str, value: &Element) -> TranslationResult<Extension> {
    Ok(Extension {
        value_coding: Some(coding(system, value)?),
        ..Extension::with_url(url)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT_PERSON: &str = r#"<AgentPerson classCode="AGNT">
        <id root="1.2.826.0.1285.0.2.0.67" extension="200102238987"/>
        <code codeSystem="1.2.826.0.1285.0.2.1.104" code="R8000"/>
        <telecom use="WP" value="tel:01234567890"/>
        <agentPerson classCode="PSN" determinerCode="INSTANCE">
          <id root="1.2.826.0.1285.0.2.1.54" extension="6095103"/>
          <name><prefix>DR</prefix><given>C</given><family>BOIN</family></name>
        </agentPerson>
        <representedOrganization classCode="ORG" determinerCode="INSTANCE">
          <id root="1.2.826.0.1285.0.1.10" extension="A83008"/>
          <name>HALLGARTH SURGERY</name>
        </representedOrganization>
      </AgentPerson>"#;

    fn parent_prescription(treatment_type: &str, first_item_extras: &str) -> String {
        format!(
            r#"<ParentPrescription classCode="INFO" moodCode="EVN">
  <id root="E14AF4FF-EC28-40E4-93D4-41A9120BA524"/>
  <effectiveTime value="20220802000000"/>
  <recordTarget typeCode="RCT">
    <Patient classCode="PAT">
      <id root="2.16.840.1.113883.2.1.4.1" extension="9449304130"/>
      <addr use="H"><streetAddressLine>10 HEATHFIELD</streetAddressLine><postalCode>KT11 2QY</postalCode></addr>
      <patientPerson classCode="PSN" determinerCode="INSTANCE">
        <name use="L"><given>STACEY</given><family>TWITCHETT</family></name>
        <administrativeGenderCode code="2"/>
        <birthTime value="19480430"/>
      </patientPerson>
    </Patient>
  </recordTarget>
  <pertinentInformation1 typeCode="PERT">
    <pertinentPrescription classCode="SBADM" moodCode="RQO">
      <id root="24150080-53CA-409E-85C5-8F953F372AA0"/>
      <id root="2.16.840.1.113883.2.1.3.2.4.18.8" extension="58EFB9-A83008-27693K"/>
      <repeatNumber><low value="1"/><high value="6"/></repeatNumber>
      <performer typeCode="PRF"><AgentOrgSDS classCode="AGNT"><agentOrganizationSDS classCode="ORG" determinerCode="INSTANCE"><id root="1.2.826.0.1285.0.1.10" extension="FCG71"/></agentOrganizationSDS></AgentOrgSDS></performer>
      <author typeCode="AUT"><time value="20220802215856"/><signatureText nullFlavor="NA"/>{AGENT_PERSON}</author>
      <responsibleParty typeCode="RESP">{AGENT_PERSON}</responsibleParty>
      <component1 typeCode="COMP">
        <daysSupply classCode="SPLY" moodCode="RQO">
          <effectiveTime><low value="20220802"/><high value="20230802"/></effectiveTime>
          <expectedUseTime><width value="28" unit="d"/></expectedUseTime>
        </daysSupply>
      </component1>
      <pertinentInformation5 typeCode="PERT"><pertinentPrescriptionTreatmentType classCode="OBS" moodCode="EVN"><value code="{treatment_type}"/></pertinentPrescriptionTreatmentType></pertinentInformation5>
      <pertinentInformation1 typeCode="PERT"><pertinentDispensingSitePreference classCode="OBS" moodCode="EVN"><value code="P1"/></pertinentDispensingSitePreference></pertinentInformation1>
      <pertinentInformation2 typeCode="PERT">
        <pertinentLineItem classCode="SBADM" moodCode="RQO">
          <id root="DD99E4EF-2924-4BA7-9A6A-63F82300F851"/>
          <product typeCode="PRD"><manufacturedProduct classCode="MANU"><manufacturedRequestedMaterial classCode="MMAT" determinerCode="KIND"><code code="39720311000001101" displayName="Paracetamol 500mg soluble tablets"/></manufacturedRequestedMaterial></manufacturedProduct></product>
          <component typeCode="COMP"><lineItemQuantity classCode="SPLY" moodCode="RQO"><quantity unit="1" value="60"><translation code="428673006" displayName="tablet" value="60"/></quantity></lineItemQuantity></component>
          {first_item_extras}
          <pertinentInformation2 typeCode="PERT"><pertinentDosageInstructions classCode="OBS" moodCode="EVN"><value>4 times a day - Oral</value></pertinentDosageInstructions></pertinentInformation2>
        </pertinentLineItem>
      </pertinentInformation2>
      <pertinentInformation2 typeCode="PERT">
        <pertinentLineItem classCode="SBADM" moodCode="RQO">
          <id root="D8A37AA1-8C92-47E1-A257-ED4D506C9421"/>
          <product typeCode="PRD"><manufacturedProduct classCode="MANU"><manufacturedRequestedMaterial classCode="MMAT" determinerCode="KIND"><code code="39113611000001102" displayName="Salbutamol 100micrograms/dose inhaler CFC free"/></manufacturedRequestedMaterial></manufacturedProduct></product>
          <component typeCode="COMP"><lineItemQuantity classCode="SPLY" moodCode="RQO"><quantity unit="1" value=".5"><translation code="3317411000001100" displayName="dose" value=".5"/></quantity></lineItemQuantity></component>
          <pertinentInformation4 typeCode="PERT"><pertinentItemStatus classCode="OBS" moodCode="EVN"><value code="0005"/></pertinentItemStatus></pertinentInformation4>
          <pertinentInformation2 typeCode="PERT"><pertinentDosageInstructions classCode="OBS" moodCode="EVN"><value>5 times a day - Inhalation</value></pertinentDosageInstructions></pertinentInformation2>
        </pertinentLineItem>
      </pertinentInformation2>
      <pertinentInformation4 typeCode="PERT"><pertinentPrescriptionType classCode="OBS" moodCode="EVN"><value code="0101" displayName="Primary Care Prescriber - Medical Prescriber"/></pertinentPrescriptionType></pertinentInformation4>
    </pertinentPrescription>
  </pertinentInformation1>
</ParentPrescription>"#
        )
    }

    fn release_xml(treatment_type: &str, first_item_extras: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<hl7:PORX_IN070103UK31 xmlns:hl7="urn:hl7-org:v3" xmlns="urn:hl7-org:v3">
  <ControlActEvent classCode="CACT" moodCode="EVN">
    <subject typeCode="SUBJ">
      <PrescriptionReleaseResponse classCode="INFO" moodCode="EVN">
        <id root="9CF5D70F-D2E0-4E1E-9D0B-B0B3C1A8F1F2"/>
        <effectiveTime value="20220803101500"/>
        <component typeCode="COMP">
          <templateId root="2.16.840.1.113883.2.1.3.2.4.18.2" extension="PORX_MT122003UK32"/>
          {parent}
        </component>
        <component typeCode="COMP">
          <templateId root="2.16.840.1.113883.2.1.3.2.4.18.2" extension="PORX_MT122003UK30"/>
          {parent}
        </component>
        <inFulfillmentOf typeCode="FLFS">
          <priorDownloadRequestRef classCode="INFO" moodCode="RQO">
            <id root="A7B86F8D-1DBD-FC28-E050-D20AE3A215F0"/>
          </priorDownloadRequestRef>
        </inFulfillmentOf>
      </PrescriptionReleaseResponse>
    </subject>
  </ControlActEvent>
</hl7:PORX_IN070103UK31>"#,
            parent = parent_prescription(treatment_type, first_item_extras),
        )
    }

    const INSTRUCTIONS: &str = "<pertinentInformation1 typeCode=\"PERT\"><pertinentAdditionalInstructions classCode=\"OBS\" moodCode=\"EVN\"><value><medication>Salbutamol 100micrograms</medication><patientInfo>Patient moved address</patientInfo>CD: twenty eight\nTake with water</value></pertinentAdditionalInstructions></pertinentInformation1>";

    fn searchset(xml: &str) -> Bundle {
        match release_response(xml).expect("convert") {
            FhirResponse::Bundle(bundle) => bundle,
            other => panic!("expected a bundle, got {other:?}"),
        }
    }

    fn only_prescription(xml: &str) -> Bundle {
        let mut outer = searchset(xml);
        assert_eq!(outer.entry.len(), 1);
        match outer.entry.remove(0).resource {
            Some(Resource::Bundle(bundle)) => bundle,
            other => panic!("expected a message bundle, got {other:?}"),
        }
    }

    fn medication_requests(bundle: &Bundle) -> Vec<&MedicationRequest> {
        bundle
            .entry
            .iter()
            .filter_map(|entry| match entry.resource.as_ref() {
                Some(Resource::MedicationRequest(request)) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn signed_prescriptions_become_message_bundles() {
        let outer = searchset(&release_xml("0001", ""));
        assert_eq!(outer.bundle_type.as_deref(), Some("searchset"));
        assert_eq!(outer.total, Some(1));
        assert_eq!(
            outer.identifier.as_ref().and_then(|identifier| identifier.value.as_deref()),
            Some("9cf5d70f-d2e0-4e1e-9d0b-b0b3c1a8f1f2")
        );

        let bundle = only_prescription(&release_xml("0001", ""));
        let kinds: Vec<&str> = bundle
            .entry
            .iter()
            .filter_map(|entry| entry.resource.as_ref().map(Resource::resource_type))
            .collect();
        assert_eq!(
            kinds,
            vec!["MessageHeader", "Patient", "PractitionerRole", "MedicationRequest", "MedicationRequest"]
        );
        let Some(Resource::MessageHeader(header)) = bundle.entry[0].resource.as_ref() else {
            panic!("header first");
        };
        assert_eq!(
            header.event_coding.as_ref().and_then(|coding| coding.code.as_deref()),
            Some("prescription-order")
        );
        assert_eq!(
            header.response.as_ref().map(|response| response.identifier.as_str()),
            Some("a7b86f8d-1dbd-fc28-e050-d20ae3a215f0")
        );
        assert_eq!(
            header.destination[0].endpoint.as_deref(),
            Some("urn:nhs-uk:addressing:ods:FCG71")
        );
        assert_eq!(header.focus.len(), 3);
    }

    #[test]
    fn line_items_become_medication_requests() {
        let bundle = only_prescription(&release_xml("0001", ""));
        let requests = medication_requests(&bundle);
        let first = requests[0];

        assert_eq!(first.status.as_deref(), Some("active"));
        assert_eq!(first.intent.as_deref(), Some("order"));
        assert_eq!(first.authored_on.as_deref(), Some("2022-08-02T21:58:56+00:00"));
        assert_eq!(
            first.identifier[0].value.as_deref(),
            Some("dd99e4ef-2924-4ba7-9a6a-63f82300f851")
        );
        let group = first.group_identifier.as_ref().expect("group identifier");
        assert_eq!(group.value.as_deref(), Some("58EFB9-A83008-27693K"));
        assert_eq!(
            group.extension[0].value_identifier.as_ref().and_then(|id| id.value.as_deref()),
            Some("24150080-53ca-409e-85c5-8f953f372aa0")
        );
        assert_eq!(
            first.course_of_therapy_type.as_ref().and_then(|c| c.coding[0].code.as_deref()),
            Some("acute")
        );
        assert_eq!(
            first.dosage_instruction[0].text.as_ref().map(NonEmptyText::as_str),
            Some("4 times a day - Oral")
        );

        let dispense = first.dispense_request.as_ref().expect("dispense request");
        assert_eq!(dispense.quantity.as_ref().and_then(|q| q.unit.as_deref()), Some("tablet"));
        assert_eq!(dispense.number_of_repeats_allowed.as_ref().map(NumericText::as_str), Some("0"));
        assert_eq!(
            dispense.validity_period.as_ref().and_then(|p| p.start.as_deref()),
            Some("2022-08-02")
        );
        assert_eq!(
            dispense.expected_supply_duration.as_ref().and_then(|q| q.value.as_ref()).map(NumericText::as_str),
            Some("28")
        );
        assert_eq!(
            dispense.performer.as_ref().and_then(|p| p.identifier.as_ref()).and_then(|i| i.value.as_deref()),
            Some("FCG71")
        );

        let second = requests[1];
        assert_eq!(second.status.as_deref(), Some("cancelled"));
        assert_eq!(
            second
                .dispense_request
                .as_ref()
                .and_then(|d| d.quantity.as_ref())
                .and_then(|q| q.value.as_ref())
                .map(NumericText::as_str),
            Some("0.5")
        );
        let responsible = Extension::find(&first.extension, extension::RESPONSIBLE_PRACTITIONER)
            .and_then(|responsible| responsible.value_reference.as_ref());
        assert_eq!(responsible, first.requester.as_ref());
    }

    #[test]
    fn additional_instructions_split_into_resources() {
        let bundle = only_prescription(&release_xml("0001", INSTRUCTIONS));
        let communication = bundle
            .entry
            .iter()
            .find_map(|entry| match entry.resource.as_ref() {
                Some(Resource::CommunicationRequest(request)) => Some(request),
                _ => None,
            })
            .expect("communication request");
        assert_eq!(communication.payload[0].content_string.as_deref(), Some("Patient moved address"));
        assert!(communication.payload[1].content_reference.is_some());
        assert_eq!(
            communication.recipient[0].identifier.as_ref().and_then(|i| i.value.as_deref()),
            Some("9449304130")
        );

        let list = bundle
            .entry
            .iter()
            .find_map(|entry| match entry.resource.as_ref() {
                Some(Resource::List(list)) => Some(list),
                _ => None,
            })
            .expect("list");
        assert_eq!(list.entry[0].item.display.as_deref(), Some("Salbutamol 100micrograms"));

        let first = medication_requests(&bundle)[0];
        assert_eq!(first.note[0].text.as_str(), "Take with water");
        let words = Extension::find(&first.extension, extension::CONTROLLED_DRUG)
            .and_then(|controlled| controlled.nested("quantityWords"))
            .and_then(|words| words.value_string.as_deref());
        assert_eq!(words, Some("twenty eight"));
    }

    #[test]
    fn repeat_dispensing_is_a_reflex_order_based_on_the_item() {
        let extras = r#"<repeatNumber><low value="1"/><high value="6"/></repeatNumber>"#;
        let bundle = only_prescription(&release_xml(REPEAT_DISPENSING, extras));
        let first = medication_requests(&bundle)[0];
        assert_eq!(first.intent.as_deref(), Some("reflex-order"));
        assert_eq!(
            first.dispense_request.as_ref().and_then(|d| d.number_of_repeats_allowed.as_ref()).map(NumericText::as_str),
            Some("5")
        );
        let based_on = &first.based_on[0];
        assert_eq!(based_on.reference.as_deref(), Some("urn:uuid:dd99e4ef-2924-4ba7-9a6a-63f82300f851"));
        let repeat = &based_on.extension[0];
        assert_eq!(
            repeat.nested("numberOfRepeatsAllowed").and_then(|e| e.value_integer.as_ref()).map(NumericText::as_str),
            Some("5")
        );
        assert_eq!(
            repeat.nested("numberOfRepeatsIssued").and_then(|e| e.value_integer.as_ref()).map(NumericText::as_str),
            Some("0")
        );
        let issued = Extension::find(&first.extension, extension::UK_CORE_REPEAT_INFORMATION)
            .and_then(|info| info.nested("numberOfPrescriptionsIssued"))
            .and_then(|issued| issued.value_unsigned_int.as_ref())
            .map(NumericText::as_str);
        assert_eq!(issued, Some("1"));
    }

    #[test]
    fn unknown_item_status_is_unmapped() {
        let xml = release_xml("0001", "").replace(r#"<value code="0005"/>"#, r#"<value code="0042"/>"#);
        let err = release_response(&xml).expect_err("status");
        assert!(matches!(
            err,
            TranslationError::UnmappedCode { domain: Domain::ItemStatus, ref value } if value == "0042"
        ));
    }

    #[test]
    fn other_documents_are_rejected() {
        let err = release_response("<CancellationResponse/>").expect_err("wrong root");
        assert!(matches!(err, TranslationError::MissingRequiredField { ref path } if path == ROOT));
    }
}
