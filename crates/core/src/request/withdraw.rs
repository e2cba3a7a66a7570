//! `ETPWithdraw`: a dispenser withdrawing its last dispense notification, from a `Task`.

use fhir::{ContainedScope, Extension, Organization, PractitionerRole, Task};
use hl7v3::codes::{self, oid, AnnotationCode};
use hl7v3::vocab::{act, entity, role, ClassCode, DeterminerCode, MoodCode, Relationship, TypeCode};
use hl7v3::Element;
use tracing::debug;

use super::common::{
    act_ref, annotation, coding_code, coding_for_system, identifier_value, integer_extension,
    message_id, short_form_id,
};
use super::patient::record_target_by_nhs_number;
use crate::code_systems::to_target;
use crate::config::TranslatorConfig;
use crate::constants::{code_system, extension, message_type, system};
use crate::dates::to_hl7_date_time;
use crate::error::required;
use crate::{Domain, TranslationError, TranslationResult};

const WITHDRAW_ANNOTATION: Relationship = Relationship::pertinent(true).separatable(false);

/// Only the last dispense notification can be withdrawn.
const LAST_DISPENSE: (&str, &str) = ("LD", "Last Dispense");

pub(crate) fn etp_withdraw(task: &Task, _config: &TranslatorConfig) -> TranslationResult<Element> {
    let id = message_id(task.identifier.first(), "Task.identifier")?;
    let authored_on = required(task.authored_on.as_deref(), "Task.authoredOn")?;
    let nhs_number = task
        .for_patient
        .as_ref()
        .and_then(|patient| patient.identifier.as_ref())
        .ok_or_else(|| TranslationError::missing("Task.for.identifier"))
        .and_then(|identifier| {
            identifier_value(std::slice::from_ref(identifier), system::NHS_NUMBER, "Task.for.identifier")
        })?;
    let group = required(task.group_identifier.as_ref(), "Task.groupIdentifier")?;
    let short_form = required(group.value.as_deref(), "Task.groupIdentifier.value")?;
    let dispense_notification = task
        .focus
        .as_ref()
        .and_then(|focus| focus.identifier.as_ref())
        .and_then(|identifier| identifier.value.as_deref())
        .ok_or_else(|| TranslationError::missing("Task.focus.identifier.value"))?;

    let repeat_instance = Extension::find(&task.extension, extension::REPEAT_INFORMATION)
        .map(|repeat| integer_extension(repeat, "numberOfRepeatsIssued", "Task.extension"))
        .transpose()?
        .map(|issued| {
            WITHDRAW_ANNOTATION.wrap(
                "pertinentInformation1",
                annotation(
                    "pertinentRepeatInstanceInfo",
                    AnnotationCode::RepeatInstance,
                    codes::value("value", (issued + 1).to_string()),
                ),
            )
        });

    debug!(id, short_form, "translated withdraw");
    Ok(act("ETPWithdraw", ClassCode::Alrt, MoodCode::Evn)
        .child(codes::global_identifier("id", id))
        .child(codes::value("effectiveTime", to_hl7_date_time(authored_on, "Task.authoredOn")?))
        .child(codes::type_id(message_type::ETP_WITHDRAW))
        .child(record_target_by_nhs_number(nhs_number))
        .child(Relationship::new(TypeCode::Aut).wrap("author", withdraw_author(task)?))
        .child(Relationship::pertinent(false).separatable(false).wrap(
            "pertinentInformation3",
            annotation(
                "pertinentWithdrawID",
                AnnotationCode::WithdrawId,
                short_form_id("value", short_form),
            ),
        ))
        .maybe_child(repeat_instance)
        .child(WITHDRAW_ANNOTATION.wrap("pertinentInformation2", withdraw_type()?))
        .child(WITHDRAW_ANNOTATION.wrap("pertinentInformation5", withdraw_reason(task)?))
        .child(
            Relationship::new(TypeCode::Pert)
                .inversion(false)
                .negation(false)
                .separatable(true)
                .wrap(
                    "pertinentInformation4",
                    act_ref(
                        "pertinentDispenseNotificationRef",
                        ClassCode::Info,
                        MoodCode::Evn,
                        dispense_notification,
                    ),
                ),
        ))
}

/// `AgentPersonSDS`: the requester's role profile and, as the person, its organisation's ODS code.
fn withdraw_author(task: &Task) -> TranslationResult<Element> {
    let requester = required(task.requester.as_ref(), "Task.requester")?;
    if requester.reference.is_none() {
        return Err(TranslationError::invalid(
            "Task.requester",
            "Task.requester should be a reference to a contained PractitionerRole",
        ));
    }
    let contained = ContainedScope::new(&task.contained);
    let practitioner_role: &PractitionerRole = contained.resolve(requester)?;

    let role_profile = identifier_value(
        &practitioner_role.identifier,
        system::SDS_ROLE_PROFILE_ID,
        "Task.contained(PractitionerRole).identifier",
    )?;
    if practitioner_role
        .practitioner
        .as_ref()
        .is_some_and(|practitioner| practitioner.reference.is_some())
    {
        return Err(TranslationError::invalid(
            "Task.contained(PractitionerRole).practitioner",
            "PractitionerRole.practitioner should be an Identifier",
        ));
    }
    let organisation_reference = required(
        practitioner_role.organization.as_ref(),
        "Task.contained(PractitionerRole).organization",
    )?;
    if organisation_reference.reference.is_none() {
        return Err(TranslationError::invalid(
            "Task.contained(PractitionerRole).organization",
            "PractitionerRole.organization should be a Reference",
        ));
    }
    let organisation: &Organization = contained.resolve(organisation_reference)?;
    let ods_code = identifier_value(
        &organisation.identifier,
        system::ODS_ORGANIZATION_CODE,
        "Task.contained(Organization).identifier",
    )?;

    Ok(role("AgentPersonSDS", ClassCode::Agnt)
        .child(codes::identifier("id", oid::SDS_ROLE_PROFILE, Some(role_profile)))
        .child(
            entity("agentPersonSDS", ClassCode::Psn, DeterminerCode::Instance)
                .child(codes::identifier("id", oid::SDS_UNIQUE_IDENTIFIER, Some(ods_code))),
        ))
}

fn withdraw_type() -> TranslationResult<Element> {
    let (code, display) = LAST_DISPENSE;
    let target = to_target(Domain::WithdrawType, code)?;
    Ok(annotation(
        "pertinentWithdrawType",
        AnnotationCode::WithdrawType,
        codes::code("value", target.system, target.code, Some(display)),
    ))
}

fn withdraw_reason(task: &Task) -> TranslationResult<Element> {
    let status_reason = required(task.status_reason.as_ref(), "Task.statusReason")?;
    let coding = coding_for_system(status_reason, code_system::WITHDRAW_REASON, "Task.statusReason")?;
    let target = to_target(
        Domain::WithdrawReason,
        coding_code(coding, "Task.statusReason.coding")?,
    )?;
    Ok(annotation(
        "pertinentWithdrawReason",
        AnnotationCode::WithdrawReason,
        codes::code(
            "value",
            target.system,
            target.code,
            coding.display.as_deref().or(target.display),
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(repeat: bool, reason_code: &str) -> Task {
        let mut task = json!({
            "resourceType": "Task",
            "contained": [
                {
                    "resourceType": "PractitionerRole",
                    "id": "requester",
                    "identifier": [{"system": system::SDS_ROLE_PROFILE_ID, "value": "555086415105"}],
                    "practitioner": {"identifier": {"system": system::SDS_USER_ID, "value": "3415870201"}},
                    "organization": {"reference": "#organisation"},
                    "telecom": [{"system": "phone", "use": "work", "value": "01234567890"}]
                },
                {
                    "resourceType": "Organization",
                    "id": "organisation",
                    "identifier": [{"system": system::ODS_ORGANIZATION_CODE, "value": "VNE51"}],
                    "name": "The Simple Pharmacy"
                }
            ],
            "identifier": [{"system": system::RFC4122, "value": "c1f7c1bc-8c61-4b5b-9b4e-0b0e6c6ec0b3"}],
            "status": "rejected",
            "statusReason": {"coding": [{
                "system": code_system::WITHDRAW_REASON,
                "code": reason_code,
                "display": "Quantity maximum"
            }]},
            "intent": "order",
            "code": {"coding": [{"system": code_system::TASK_CODE, "code": "abort"}]},
            "groupIdentifier": {"system": system::PRESCRIPTION_ORDER_NUMBER, "value": "88AF6C-C81007-00001C"},
            "focus": {"identifier": {"system": system::RFC4122, "value": "4a3e1b1a-3bd5-47a4-a0a2-1d8f4d7b5b1e"}},
            "for": {"identifier": {"system": system::NHS_NUMBER, "value": "9449304130"}},
            "authoredOn": "2021-08-30T15:17:10+00:00",
            "requester": {"reference": "#requester"}
        });
        if repeat {
            task["extension"] = json!([{
                "url": extension::REPEAT_INFORMATION,
                "extension": [
                    {"url": "numberOfRepeatsAllowed", "valueInteger": 6},
                    {"url": "numberOfRepeatsIssued", "valueInteger": 2}
                ]
            }]);
        }
        serde_json::from_value(task).expect("task")
    }

    #[test]
    fn withdraw_keeps_slot_order() {
        let withdraw = etp_withdraw(&task(false, "QU"), &TranslatorConfig::default()).expect("convert");
        assert_eq!(withdraw.name(), "ETPWithdraw");
        assert_eq!(withdraw.attribute("classCode"), Some("ALRT"));
        let children: Vec<_> = withdraw.elements().map(Element::name).collect();
        assert_eq!(
            children,
            vec![
                "id",
                "effectiveTime",
                "typeId",
                "recordTarget",
                "author",
                "pertinentInformation3",
                "pertinentInformation2",
                "pertinentInformation5",
                "pertinentInformation4"
            ]
        );
        assert_eq!(
            withdraw
                .find(&["author", "AgentPersonSDS", "agentPersonSDS", "id"])
                .and_then(|id| id.attribute("extension")),
            Some("VNE51")
        );
        assert_eq!(
            withdraw
                .find(&["pertinentInformation2", "pertinentWithdrawType", "value"])
                .and_then(|value| value.attribute("code")),
            Some("LD")
        );
        assert_eq!(
            withdraw
                .find(&["pertinentInformation4", "pertinentDispenseNotificationRef", "id"])
                .and_then(|id| id.attribute("root")),
            Some("4A3E1B1A-3BD5-47A4-A0A2-1D8F4D7B5B1E")
        );
    }

    #[test]
    fn repeat_instance_is_the_next_issue() {
        let withdraw = etp_withdraw(&task(true, "QU"), &TranslatorConfig::default()).expect("convert");
        let instance = withdraw
            .find(&["pertinentInformation1", "pertinentRepeatInstanceInfo", "value"])
            .and_then(|value| value.attribute("value"));
        assert_eq!(instance, Some("3"));
    }

    #[test]
    fn unknown_reason_is_unmapped() {
        let err = etp_withdraw(&task(false, "XX"), &TranslatorConfig::default()).expect_err("reason");
        assert!(matches!(err, TranslationError::UnmappedCode { domain: Domain::WithdrawReason, .. }));
    }
}
