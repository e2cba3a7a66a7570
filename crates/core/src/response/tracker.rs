//! Prescription tracker responses to a searchset of `Task`s.
//!
//! The tracker answers with a flat JSON object: `version`, `reason` and `statusCode`, and one
//! key per prescription short-form id holding that prescription's summary.

use eps_types::NumericText;
use fhir::{
    Bundle, BundleEntry, CodeableConcept, Coding, Extension, Identifier, Reference, Task,
    TaskParameter,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use super::{error_outcome, full_url, FhirResponse};
use crate::code_systems::{business_status, line_item_status, treatment_type_from_display};
use crate::constants::{code_system, extension, system};
use crate::dates::from_hl7_date;
use crate::{TranslationError, TranslationResult};

const STATUS_CODE_SUCCESS: &str = "0";
const ENVELOPE_KEYS: [&str; 3] = ["version", "reason", "statusCode"];
/// Dates the tracker has not recorded are sent as this literal.
const NOT_RECORDED: &str = "False";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackedPrescription {
    prescription_status: String,
    prescription_treatment_type: String,
    patient_nhs_number: String,
    prescription_issue_date: String,
    #[serde(default)]
    prescriber: Option<TrackedOrganisation>,
    #[serde(default)]
    nominated_pharmacy: Option<TrackedOrganisation>,
    #[serde(default)]
    dispensing_pharmacy: Option<TrackedOrganisation>,
    repeat_instance: RepeatInstance,
    #[serde(default)]
    line_items: Map<String, Value>,
    #[serde(default)]
    prescription_dispensed_date: Option<String>,
    #[serde(default)]
    prescription_last_issue_dispensed_date: Option<String>,
    #[serde(default)]
    prescription_download_date: Option<String>,
    #[serde(default)]
    prescription_claimed_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackedOrganisation {
    #[serde(default)]
    ods: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepeatInstance {
    current_issue: String,
    total_authorised: String,
}

/// Converts a raw tracker response.
///
/// A non-zero `statusCode` becomes an `OperationOutcome` carrying the tracker's reason.
pub(crate) fn task_bundle(response: &Value) -> TranslationResult<FhirResponse> {
    let object = response
        .as_object()
        .ok_or_else(|| TranslationError::invalid("$", "tracker response should be a JSON object"))?;

    let status_code = object.get("statusCode").and_then(Value::as_str).unwrap_or_default();
    if status_code != STATUS_CODE_SUCCESS {
        let reason = object.get("reason").and_then(Value::as_str).unwrap_or_default();
        debug!(status_code, reason, "tracker rejected the query");
        return Ok(error_outcome(
            "invalid",
            Coding::new(code_system::SPINE_ERROR_OR_WARNING, "INVALID", reason),
        ));
    }

    let tasks = object
        .iter()
        .filter(|(key, _)| !ENVELOPE_KEYS.contains(&key.as_str()))
        .map(|(id, prescription)| {
            let prescription: TrackedPrescription = serde_json::from_value(prescription.clone())
                .map_err(|e| TranslationError::invalid(id.as_str(), e.to_string()))?;
            task(id, &prescription)
        })
        .collect::<TranslationResult<Vec<_>>>()?;

    debug!(count = tasks.len(), "translated tracker response");
    Ok(FhirResponse::Bundle(Bundle {
        bundle_type: Some("searchset".to_owned()),
        total: Some(tasks.len() as u32),
        entry: tasks
            .into_iter()
            .map(|task| {
                let id = task.id.clone().unwrap_or_default();
                BundleEntry::new(full_url(&id), task)
            })
            .collect(),
        ..Bundle::default()
    }))
}

fn task(prescription_id: &str, prescription: &TrackedPrescription) -> TranslationResult<Task> {
    let status = business_status(&prescription.prescription_status)?;
    let id = Uuid::new_v4().to_string();

    let mut extensions = vec![course_of_therapy(&prescription.prescription_treatment_type)?];
    let repeat = &prescription.repeat_instance;
    if repeat.total_authorised != "1" {
        extensions.push(repeat_information(repeat)?);
    }

    let line_item_ids: Vec<&String> = prescription.line_items.keys().collect();
    let input = line_item_ids
        .iter()
        .map(|line_item_id| line_item_input(line_item_id, prescription))
        .collect::<TranslationResult<Vec<_>>>()?;
    let output = line_item_ids
        .iter()
        .map(|line_item_id| line_item_output(line_item_id, prescription))
        .collect::<TranslationResult<Vec<_>>>()?;

    Ok(Task {
        id: Some(id.clone()),
        extension: extensions,
        identifier: vec![Identifier::new(system::RFC4122, id)],
        status: Some(status.task_status.to_owned()),
        business_status: Some(CodeableConcept::single(Coding::new(
            code_system::TASK_BUSINESS_STATUS,
            status.code,
            prescription.prescription_status.as_str(),
        ))),
        intent: Some("order".to_owned()),
        code: Some(CodeableConcept::single(Coding::new(
            code_system::TASK_CODE,
            "fulfill",
            "Fulfill the focal request",
        ))),
        focus: Some(Reference::to_identifier(
            Identifier::new(system::PRESCRIPTION_ORDER_NUMBER, prescription_id),
            None,
        )),
        for_patient: Some(Reference::to_identifier(
            Identifier::new(system::NHS_NUMBER, prescription.patient_nhs_number.as_str()),
            None,
        )),
        authored_on: Some(from_hl7_date(
            &prescription.prescription_issue_date,
            "prescriptionIssueDate",
        )?),
        requester: prescription.prescriber.as_ref().map(organisation_reference),
        owner: owner(prescription).map(organisation_reference),
        input,
        output,
        ..Task::default()
    })
}

/// The dispensing pharmacy once it has one, else the nominated pharmacy.
fn owner(prescription: &TrackedPrescription) -> Option<&TrackedOrganisation> {
    let dispensing = prescription.dispensing_pharmacy.as_ref()?;
    if dispensing.ods.is_empty() {
        prescription.nominated_pharmacy.as_ref()
    } else {
        Some(dispensing)
    }
}

fn organisation_reference(organisation: &TrackedOrganisation) -> Reference {
    Reference::to_identifier(
        Identifier::new(system::ODS_ORGANIZATION_CODE, organisation.ods.as_str()),
        organisation.name.clone(),
    )
}

fn course_of_therapy(treatment_type: &str) -> TranslationResult<Extension> {
    let coding = treatment_type_from_display(treatment_type)?;
    Ok(Extension {
        extension: vec![Extension {
            value_coding: Some(Coding {
                system: coding.system.map(str::to_owned),
                code: Some(coding.code.to_owned()),
                display: coding.display.map(str::to_owned),
            }),
            ..Extension::with_url("courseOfTherapyType")
        }],
        ..Extension::with_url(extension::PRESCRIPTION)
    })
}

fn repeat_information(repeat: &RepeatInstance) -> TranslationResult<Extension> {
    let integer = |url: &str, value: &str, path: &str| -> TranslationResult<Extension> {
        let value = NumericText::new(value).map_err(|e| TranslationError::invalid(path, e.to_string()))?;
        Ok(Extension {
            value_integer: Some(value),
            ..Extension::with_url(url)
        })
    };
    Ok(Extension {
        extension: vec![
            integer(
                "numberOfRepeatsAllowed",
                &repeat.total_authorised,
                "repeatInstance.totalAuthorised",
            )?,
            integer(
                "numberOfRepeatsIssued",
                &repeat.current_issue,
                "repeatInstance.currentIssue",
            )?,
        ],
        ..Extension::with_url(extension::REPEAT_INFORMATION)
    })
}

fn recorded(date: Option<&String>) -> Option<&str> {
    date.map(String::as_str)
        .filter(|date| !date.is_empty() && *date != NOT_RECORDED)
}

fn date_extension(url: &str, hl7_date: &str, path: &str) -> TranslationResult<Extension> {
    Ok(Extension {
        value_date: Some(from_hl7_date(hl7_date, path)?),
        ..Extension::with_url(url)
    })
}

/// Wraps the nested extensions in `url`, or nothing when there are none.
fn grouped(url: &str, nested: Vec<Extension>) -> Vec<Extension> {
    if nested.is_empty() {
        Vec::new()
    } else {
        vec![Extension {
            extension: nested,
            ..Extension::with_url(url)
        }]
    }
}

fn item_reference(line_item_id: &str, resource_type: &str) -> Reference {
    Reference {
        resource_type: Some(resource_type.to_owned()),
        ..Reference::to_identifier(
            Identifier::new(system::PRESCRIPTION_ORDER_ITEM_NUMBER, line_item_id.to_lowercase()),
            None,
        )
    }
}

fn line_item_input(line_item_id: &str, prescription: &TrackedPrescription) -> TranslationResult<TaskParameter> {
    let mut dispensing = Vec::new();
    if let Some(date) = recorded(prescription.prescription_dispensed_date.as_ref()) {
        dispensing.push(date_extension("dateLastDispensed", date, "prescriptionDispensedDate")?);
    }
    let item_status = prescription
        .line_items
        .get(line_item_id)
        .and_then(|line_item| line_item.get("itemStatus"))
        .and_then(Value::as_str);
    if let Some(item_status) = item_status {
        dispensing.push(Extension {
            value_coding: Some(Coding::new(
                code_system::MEDICATION_DISPENSE_TYPE,
                line_item_status(item_status)?,
                item_status,
            )),
            ..Extension::with_url("dispenseStatus")
        });
    }

    Ok(TaskParameter {
        extension: grouped(extension::DISPENSING_INFORMATION, dispensing),
        parameter_type: CodeableConcept::single(Coding::new(code_system::SNOMED, "16076005", "Prescription")),
        value_reference: Some(item_reference(line_item_id, "MedicationRequest")),
    })
}

fn line_item_output(line_item_id: &str, prescription: &TrackedPrescription) -> TranslationResult<TaskParameter> {
    let mut release = Vec::new();
    if let Some(date) = recorded(prescription.prescription_last_issue_dispensed_date.as_ref()) {
        release.push(date_extension(
            "dateLastIssuedDispensed",
            date,
            "prescriptionLastIssueDispensedDate",
        )?);
    }
    if let Some(date) = prescription.prescription_download_date.as_deref().filter(|d| !d.is_empty()) {
        release.push(date_extension("dateDownloaded", date, "prescriptionDownloadDate")?);
    }
    if let Some(date) = prescription.prescription_claimed_date.as_deref().filter(|d| !d.is_empty()) {
        release.push(date_extension("dateClaimed", date, "prescriptionClaimedDate")?);
    }

    Ok(TaskParameter {
        extension: grouped(extension::DISPENSING_RELEASE_INFORMATION, release),
        parameter_type: CodeableConcept::single(Coding::new(
            code_system::SNOMED,
            "373784005",
            "Dispensing medication",
        )),
        value_reference: Some(item_reference(line_item_id, "MedicationDispense")),
    })
}
