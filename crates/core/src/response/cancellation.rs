//! HL7 V3 `CancellationResponse` to FHIR.
//!
//! Successful outcomes become a message bundle describing the cancelled item. Responses
//! reporting that the request itself could not be processed become an `OperationOutcome`.
//!
//! The response may arrive bare or inside its interaction wrapper, and element names may carry
//! a namespace prefix, so lookups here match on local names.

use fhir::{
    Bundle, BundleEntry, CodeableConcept, Coding, DispenseRequest, Extension, Identifier,
    MedicationRequest, Patient, Reference,
};
use hl7v3::Element;
use tracing::debug;

use super::common::{
    attribute, find_descendant, message_header, new_id, patient, path, required_attribute,
    required_path, role_entries, roles_index, TranslatedRole,
};
use super::{error_outcome, full_url, FhirResponse};
use crate::code_systems::{cancellation_status, CancellationStatus};
use crate::constants::{code_system, extension, system};
use crate::dates::from_hl7_date_time;
use crate::{TranslationError, TranslationResult};

const ROOT: &str = "CancellationResponse";
const RESPONSE_EVENT: (&str, &str) = ("prescription-order-response", "Prescription Order Response");
const MEDICINAL_PRODUCT: (&str, &str) = ("763158003", "Medicinal product");

/// Parses and translates a cancellation response document.
pub(crate) fn cancellation_response(xml: &str) -> TranslationResult<FhirResponse> {
    let document = hl7v3::parse(xml)?;
    let response = find_descendant(&document, ROOT)
        .ok_or_else(|| TranslationError::missing(ROOT))?;

    let reason = required_path(response, &["pertinentInformation3", "pertinentResponse", "value"])?;
    let status = cancellation_status(
        required_attribute(reason, "code", "pertinentInformation3.pertinentResponse.value")?,
        reason.attribute("displayName").unwrap_or_default(),
    )?;

    if let Some(issue_code) = status.issue_code {
        debug!(code = status.status_code, "cancellation response reports an error");
        return Ok(error_outcome(issue_code, status_coding(&status)));
    }
    message_bundle(response, &status).map(FhirResponse::Bundle)
}

fn message_bundle(response: &Element, status: &CancellationStatus) -> TranslationResult<Bundle> {
    let message_id = attribute(response, &["id"], "root")?;
    let effective_time = from_hl7_date_time(attribute(response, &["effectiveTime"], "value")?, "effectiveTime")?;

    let patient = patient(required_path(response, &["recordTarget", "Patient"])?)?;
    let patient_id = new_id();

    // The author is whoever asked for the cancellation; the responsible party wrote the
    // prescription and is only a separate role when its role profile differs.
    let author = required_path(response, &["author", "AgentPerson"])?;
    let mut roles = vec![TranslatedRole::of(author, "author.AgentPerson")?];
    let prescriber = match path(response, &["responsibleParty", "AgentPerson"]) {
        Some(agent) => roles_index(&mut roles, agent, "responsibleParty.AgentPerson")?,
        None => 0,
    };
    let performer = path(response, &["performer", "AgentPerson"])
        .map(|agent| {
            let index = roles_index(&mut roles, agent, "performer.AgentPerson")?;
            dispensing_performer(agent, &roles[index].id)
        })
        .transpose()?;

    let line_item = attribute(response, &["pertinentInformation1", "pertinentLineItemRef", "id"], "root")?;
    let short_form = attribute(
        response,
        &["pertinentInformation2", "pertinentPrescriptionID", "value"],
        "extension",
    )?;
    let cancel_request_id = attribute(
        response,
        &["pertinentInformation4", "pertinentCancellationRequestRef", "id"],
        "root",
    )?;

    let medication_request_id = new_id();
    let medication_request = MedicationRequest {
        id: Some(medication_request_id.clone()),
        extension: vec![
            status_history(status, &effective_time),
            Extension {
                value_reference: Some(Reference::to(full_url(&roles[0].id))),
                ..Extension::with_url(extension::RESPONSIBLE_PRACTITIONER)
            },
        ],
        identifier: vec![Identifier::new(
            system::PRESCRIPTION_ORDER_ITEM_NUMBER,
            line_item.to_lowercase(),
        )],
        status: Some(status.medication_request_status.to_owned()),
        intent: Some("order".to_owned()),
        medication_codeable_concept: Some(CodeableConcept::single(Coding::new(
            code_system::SNOMED,
            MEDICINAL_PRODUCT.0,
            MEDICINAL_PRODUCT.1,
        ))),
        subject: Some(Reference::to(full_url(&patient_id))),
        requester: Some(Reference::to(full_url(&roles[prescriber].id))),
        group_identifier: Some(Identifier::new(system::PRESCRIPTION_ORDER_NUMBER, short_form)),
        dispense_request: performer.map(|performer| DispenseRequest {
            performer: Some(performer),
            ..DispenseRequest::default()
        }),
        ..MedicationRequest::default()
    };

    let sender_ods = roles[0]
        .role
        .organization
        .as_ref()
        .and_then(|organisation| organisation.identifier.as_ref())
        .and_then(|identifier| identifier.value.clone())
        .unwrap_or_default();
    let header = message_header(
        message_id,
        RESPONSE_EVENT,
        Some(&sender_ods),
        cancel_request_id,
        vec![
            Reference::to(full_url(&patient_id)),
            Reference::to(full_url(&medication_request_id)),
        ],
    );

    debug!(message_id, short_form, code = status.status_code, "translated cancellation response");
    let mut entry = vec![
        BundleEntry::new(full_url(header.id.as_deref().unwrap_or_default()), header),
        BundleEntry::new(full_url(&medication_request_id), medication_request),
        BundleEntry::new(
            full_url(&patient_id),
            Patient {
                id: Some(patient_id.clone()),
                ..patient
            },
        ),
    ];
    entry.extend(role_entries(roles));

    Ok(Bundle {
        identifier: Some(Identifier::new(system::RFC4122, message_id.to_lowercase())),
        bundle_type: Some("message".to_owned()),
        timestamp: Some(effective_time),
        entry,
        ..Bundle::default()
    })
}

fn status_coding(status: &CancellationStatus) -> Coding {
    Coding::new(
        code_system::MEDICATION_REQUEST_STATUS_HISTORY,
        status.status_code,
        status.status_display.as_str(),
    )
}

fn status_history(status: &CancellationStatus, effective_time: &str) -> Extension {
    Extension {
        extension: vec![
            Extension {
                value_coding: Some(status_coding(status)),
                ..Extension::with_url("status")
            },
            Extension {
                value_date_time: Some(effective_time.to_owned()),
                ..Extension::with_url("statusDate")
            },
        ],
        ..Extension::with_url(extension::STATUS_HISTORY)
    }
}

fn dispensing_performer(agent_person: &Element, role_id: &str) -> TranslationResult<Reference> {
    let organisation = required_path(agent_person, &["representedOrganization"])?;
    let ods_code = required_attribute(
        required_path(organisation, &["id"])?,
        "extension",
        "performer.AgentPerson.representedOrganization.id",
    )?;
    Ok(Reference {
        extension: vec![Extension {
            value_reference: Some(Reference::to(full_url(role_id))),
            ..Extension::with_url(extension::DISPENSING_PERFORMER)
        }],
        ..Reference::to_identifier(
            Identifier::new(system::ODS_ORGANIZATION_CODE, ods_code),
            path(organisation, &["name"]).map(Element::text_content),
        )
    })
}

#[cfg(test)]
mod tests {
    use fhir::Resource;

    use super::*;
    use crate::Domain;

    fn response_xml(code: &str, display: &str, performer: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<hl7:PORX_IN050101UK31 xmlns:hl7="urn:hl7-org:v3">
  <hl7:id root="8E8DE882-C367-204F-ECC6-59339FAA01BD"/>
  <hl7:ControlActEvent classCode="CACT" moodCode="EVN">
    <hl7:subject typeCode="SUBJ" contextConductionInd="false">
      <CancellationResponse classCode="INFRM" moodCode="EVN" xmlns="urn:hl7-org:v3">
        <id root="444309A2-81D9-85AE-4925-282C40D2F1D6"/>
        <effectiveTime value="20131209180449"/>
        <recordTarget typeCode="RCT">
          <Patient classCode="PAT">
            <id root="2.16.840.1.113883.2.1.4.1" extension="9446362768"/>
            <addr use="H">
              <streetAddressLine>41 BIRKDALE ROAD</streetAddressLine>
              <streetAddressLine>STOCKTON-ON-TEES</streetAddressLine>
              <postalCode>TS18 5JJ</postalCode>
              <addressKey/>
            </addr>
            <patientPerson classCode="PSN" determinerCode="INSTANCE">
              <name use="L"><prefix>MR</prefix><given>HORATIO</given><given>THEOBALD</given><family>FAZAL</family><suffix/></name>
              <administrativeGenderCode code="1"/>
              <birthTime value="19850828"/>
              <playedProviderPatient classCode="PAT">
                <subjectOf typeCode="SBJ">
                  <patientCareProvision classCode="PCPR" moodCode="EVN">
                    <responsibleParty typeCode="RESP">
                      <healthCareProvider classCode="PROV">
                        <id root="1.2.826.0.1285.0.2.0.65" extension="C81007"/>
                      </healthCareProvider>
                    </responsibleParty>
                  </patientCareProvision>
                </subjectOf>
              </playedProviderPatient>
            </patientPerson>
          </Patient>
        </recordTarget>
        <author typeCode="AUT">
          <AgentPerson classCode="AGNT">
            <id root="1.2.826.0.1285.0.2.0.67" extension="100102042981"/>
            <code codeSystem="1.2.826.0.1285.0.2.1.104" code="R0260"/>
            <telecom use="WP" value="tel:01332332812"/>
            <agentPerson classCode="PSN" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.2.0.65" extension="3410772"/>
              <name use="L">BHOWMIK</name>
            </agentPerson>
            <representedOrganization classCode="ORG" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.1.10" extension="C81007"/>
              <name>VERNON STREET MEDICAL CTR</name>
            </representedOrganization>
          </AgentPerson>
        </author>
        <responsibleParty typeCode="RESP">
          <AgentPerson classCode="AGNT">
            <id root="1.2.826.0.1285.0.2.0.67" extension="100102042981"/>
            <agentPerson classCode="PSN" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.2.0.65" extension="G34107"/>
            </agentPerson>
            <representedOrganization classCode="ORG" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.1.10" extension="C81007"/>
            </representedOrganization>
          </AgentPerson>
        </responsibleParty>
        {performer}
        <pertinentInformation2 typeCode="PERT" contextConductionInd="true">
          <pertinentPrescriptionID classCode="OBS" moodCode="EVN">
            <value root="2.16.840.1.113883.2.1.3.2.4.18.8" extension="396F33-C81007-5C8DD9"/>
          </pertinentPrescriptionID>
        </pertinentInformation2>
        <pertinentInformation1 typeCode="PERT" inversionInd="false" negationInd="false">
          <pertinentLineItemRef classCode="SBADM" moodCode="RQO">
            <id root="EBAF4A14-315C-322C-E040-950AE0731B49"/>
          </pertinentLineItemRef>
        </pertinentInformation1>
        <pertinentInformation3 typeCode="PERT" contextConductionInd="true">
          <pertinentResponse classCode="OBS" moodCode="EVN">
            <value codeSystem="2.16.840.1.113883.2.1.3.2.4.17.19" code="{code}" displayName="{display}"/>
          </pertinentResponse>
        </pertinentInformation3>
        <pertinentInformation4 typeCode="PERT" inversionInd="false" negationInd="false">
          <pertinentCancellationRequestRef classCode="ACTN" moodCode="RQO">
            <id root="EBAF6BD3-C349-3010-E040-950AE0731F3B"/>
          </pertinentCancellationRequestRef>
        </pertinentInformation4>
      </CancellationResponse>
    </hl7:subject>
  </hl7:ControlActEvent>
</hl7:PORX_IN050101UK31>"#
        )
    }

    const DISPENSER: &str = r#"<performer typeCode="PRF">
          <AgentPerson classCode="AGNT">
            <id root="1.2.826.0.1285.0.2.0.67" extension="555086415105"/>
            <agentPerson classCode="PSN" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.2.0.65" extension="3415870201"/>
            </agentPerson>
            <representedOrganization classCode="ORG" determinerCode="INSTANCE">
              <id root="1.2.826.0.1285.0.1.10" extension="VNE51"/>
              <name>The Simple Pharmacy</name>
            </representedOrganization>
          </AgentPerson>
        </performer>"#;

    fn bundle(xml: &str) -> Bundle {
        match cancellation_response(xml).expect("translate") {
            FhirResponse::Bundle(bundle) => bundle,
            other => panic!("expected a bundle, got {other:?}"),
        }
    }

    fn medication_request(bundle: &Bundle) -> &MedicationRequest {
        bundle
            .entry
            .iter()
            .find_map(|entry| match &entry.resource {
                Some(Resource::MedicationRequest(request)) => Some(request),
                _ => None,
            })
            .expect("medication request")
    }

    #[test]
    fn cancelled_item_becomes_message_bundle() {
        let bundle = bundle(&response_xml("0001", "Prescription/item was cancelled", ""));
        assert_eq!(bundle.bundle_type.as_deref(), Some("message"));
        assert_eq!(bundle.timestamp.as_deref(), Some("2013-12-09T18:04:49+00:00"));
        assert_eq!(
            bundle.identifier.as_ref().and_then(|i| i.value.as_deref()),
            Some("444309a2-81d9-85ae-4925-282c40d2f1d6")
        );
        let kinds: Vec<_> = bundle
            .entry
            .iter()
            .filter_map(|entry| entry.resource.as_ref().map(Resource::resource_type))
            .collect();
        assert_eq!(kinds, vec!["MessageHeader", "MedicationRequest", "Patient", "PractitionerRole"]);

        let request = medication_request(&bundle);
        assert_eq!(request.status.as_deref(), Some("cancelled"));
        assert_eq!(request.identifier[0].value.as_deref(), Some("ebaf4a14-315c-322c-e040-950ae0731b49"));
        assert_eq!(
            request.group_identifier.as_ref().and_then(|g| g.value.as_deref()),
            Some("396F33-C81007-5C8DD9")
        );
        let history = Extension::find(&request.extension, extension::STATUS_HISTORY).expect("history");
        assert_eq!(
            history.nested("status").and_then(|e| e.value_coding.as_ref()).and_then(|c| c.code.as_deref()),
            Some("R-0001")
        );
        assert!(request.dispense_request.is_none());
    }

    #[test]
    fn header_answers_the_cancel_request() {
        let bundle = bundle(&response_xml("0001", "Prescription/item was cancelled", ""));
        let Some(Resource::MessageHeader(header)) = bundle.entry[0].resource.as_ref() else {
            panic!("expected a message header first");
        };
        let response = header.response.as_ref().expect("response");
        assert_eq!(response.identifier, "ebaf6bd3-c349-3010-e040-950ae0731f3b");
        assert_eq!(response.code, "ok");
        assert_eq!(
            header.destination[0].endpoint.as_deref(),
            Some("urn:nhs-uk:addressing:ods:C81007")
        );
        assert_eq!(header.focus.len(), 2);
    }

    #[test]
    fn patient_demographics_are_read_back() {
        let bundle = bundle(&response_xml("0001", "Prescription/item was cancelled", ""));
        let patient = bundle
            .entry
            .iter()
            .find_map(|entry| match &entry.resource {
                Some(Resource::Patient(patient)) => Some(patient),
                _ => None,
            })
            .expect("patient");
        assert_eq!(patient.gender.as_deref(), Some("male"));
        assert_eq!(patient.birth_date.as_deref(), Some("1985-08-28"));
        let name = &patient.name[0];
        assert_eq!(name.name_use.as_deref(), Some("usual"));
        assert_eq!(name.given, vec!["HORATIO", "THEOBALD"]);
        assert!(name.suffix.is_empty());
        assert_eq!(patient.address[0].address_use.as_deref(), Some("home"));
        assert_eq!(patient.address[0].postal_code.as_deref(), Some("TS18 5JJ"));
        assert_eq!(
            patient.general_practitioner[0]
                .identifier
                .as_ref()
                .and_then(|i| i.value.as_deref()),
            Some("C81007")
        );
    }

    #[test]
    fn performer_becomes_dispensing_performer() {
        let bundle = bundle(&response_xml(
            "0002",
            "Prescription/item was not cancelled – With dispenser",
            DISPENSER,
        ));
        let roles = bundle
            .entry
            .iter()
            .filter(|entry| matches!(entry.resource, Some(Resource::PractitionerRole(_))))
            .count();
        assert_eq!(roles, 2);
        let request = medication_request(&bundle);
        assert_eq!(request.status.as_deref(), Some("active"));
        let performer = request
            .dispense_request
            .as_ref()
            .and_then(|d| d.performer.as_ref())
            .expect("performer");
        assert_eq!(performer.display.as_deref(), Some("The Simple Pharmacy"));
        assert_eq!(performer.extension[0].url, extension::DISPENSING_PERFORMER);
    }

    #[test]
    fn processing_failure_becomes_operation_outcome() {
        let outcome = cancellation_response(&response_xml("5000", "Unable to process message-Timeout", ""))
            .expect("translate");
        let FhirResponse::OperationOutcome(outcome) = outcome else {
            panic!("expected an operation outcome");
        };
        assert_eq!(outcome.issue[0].code, "exception");
        let coding = outcome.issue[0].details.as_ref().and_then(|d| d.coding.first()).expect("coding");
        assert_eq!(coding.code.as_deref(), Some("R-5000"));
        assert_eq!(coding.display.as_deref(), Some("Unable to process message.Timeout"));
    }

    #[test]
    fn unknown_reason_is_unmapped() {
        let err = cancellation_response(&response_xml("1234", "", "")).expect_err("reason");
        assert!(matches!(
            err,
            TranslationError::UnmappedCode { domain: Domain::CancellationResponseReason, .. }
        ));
    }

    #[test]
    fn other_documents_are_rejected() {
        let err = cancellation_response("<ParentPrescription/>").expect_err("root");
        assert!(matches!(err, TranslationError::MissingRequiredField { .. }));
    }
}
