//! OIDs, coded values and identifiers used by the EPS message set.
//!
//! A coded value is `<slot codeSystem=".." code=".." displayName=".."/>`; an identifier is
//! `<slot root=".." extension=".."/>`. Both are leaf elements named by the slot they fill.

use crate::element::Element;

/// HL7 V3 default namespace.
pub const HL7_NAMESPACE: &str = "urn:hl7-org:v3";

/// Object identifiers for code systems and identifier roots.
pub mod oid {
    pub const SNOMED: &str = "2.16.840.1.113883.2.1.3.2.4.15";
    pub const SEX: &str = "2.16.840.1.113883.2.1.3.2.4.16.25";
    pub const CANCELLATION_REASON: &str = "2.16.840.1.113883.2.1.3.2.4.16.27";
    pub const NOT_DISPENSED_REASON: &str = "2.16.840.1.113883.2.1.3.2.4.16.31";
    pub const DISPENSING_ENDORSEMENT: &str = "2.16.840.1.113883.2.1.3.2.4.16.29";
    pub const ENDORSEMENT: &str = "2.16.840.1.113883.2.1.3.2.4.16.32";
    pub const CHARGE_EXEMPTION: &str = "2.16.840.1.113883.2.1.3.2.4.16.33";
    pub const PRESCRIPTION_STATUS: &str = "2.16.840.1.113883.2.1.3.2.4.16.35";
    pub const TREATMENT_TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.16.36";
    pub const CANCELLATION_RESPONSE_REASON: &str = "2.16.840.1.113883.2.1.3.2.4.17.19";
    pub const DISPENSING_SITE_PREFERENCE: &str = "2.16.840.1.113883.2.1.3.2.4.17.21";
    pub const ITEM_STATUS: &str = "2.16.840.1.113883.2.1.3.2.4.17.23";
    pub const PRESCRIPTION_TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.17.25";
    pub const PRESCRIPTION_ANNOTATION: &str = "2.16.840.1.113883.2.1.3.2.4.17.30";
    pub const PATIENT_CARE_PROVISION_TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.17.37";
    pub const ORGANIZATION_TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.17.94";
    pub const WITHDRAW_TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.17.109";
    pub const WITHDRAW_REASON: &str = "2.16.840.1.113883.2.1.3.2.4.17.110";
    pub const SDS_JOB_ROLE: &str = "1.2.826.0.1285.0.2.1.104";

    pub const INTERACTION: &str = "2.16.840.1.113883.2.1.3.2.4.12";
    pub const TEMPLATE: &str = "2.16.840.1.113883.2.1.3.2.4.18.2";
    pub const TYPE: &str = "2.16.840.1.113883.2.1.3.2.4.18.7";
    pub const SHORT_FORM_PRESCRIPTION_ID: &str = "2.16.840.1.113883.2.1.3.2.4.18.8";
    pub const NHS_NUMBER: &str = "2.16.840.1.113883.2.1.4.1";
    pub const SDS_ORGANIZATION: &str = "1.2.826.0.1285.0.1.10";
    pub const SDS_UNIQUE_IDENTIFIER: &str = "1.2.826.0.1285.0.2.0.65";
    pub const SDS_ROLE_PROFILE: &str = "1.2.826.0.1285.0.2.0.67";
    pub const ACCREDITED_SYSTEM: &str = "1.2.826.0.1285.0.2.0.107";
    /// Professional and prescribing codes share this root.
    pub const AGENT_PERSON_ID: &str = "1.2.826.0.1285.0.2.1.54";
}

/// The prescription-annotation codes that tag an `OBS` act's meaning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnotationCode {
    AdditionalInstructions,
    CancellationReason,
    ChargeExempt,
    ChargePayment,
    Dosage,
    DispensingEndorsement,
    DispensingSite,
    Endorsement,
    EvidenceSeen,
    ItemStatus,
    NonDispensingReason,
    PrescriptionId,
    PrescriptionStatus,
    PrescriptionType,
    RepeatInstance,
    ReviewDate,
    SupplyInstructions,
    TokenIssued,
    TreatmentType,
    WithdrawId,
    WithdrawReason,
    WithdrawType,
}

impl AnnotationCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            AnnotationCode::AdditionalInstructions => "AI",
            AnnotationCode::CancellationReason => "CR",
            AnnotationCode::ChargeExempt => "EX",
            AnnotationCode::ChargePayment => "CP",
            AnnotationCode::Dosage => "DI",
            AnnotationCode::DispensingEndorsement => "DE",
            AnnotationCode::DispensingSite => "DSP",
            AnnotationCode::Endorsement => "PE",
            AnnotationCode::EvidenceSeen => "ES",
            AnnotationCode::ItemStatus => "IS",
            AnnotationCode::NonDispensingReason => "NDR",
            AnnotationCode::PrescriptionId => "PID",
            AnnotationCode::PrescriptionStatus => "PS",
            AnnotationCode::PrescriptionType => "PT",
            AnnotationCode::RepeatInstance => "RPI",
            AnnotationCode::ReviewDate => "RD",
            AnnotationCode::SupplyInstructions => "SI",
            AnnotationCode::TokenIssued => "TI",
            AnnotationCode::TreatmentType => "PTT",
            AnnotationCode::WithdrawId => "WID",
            AnnotationCode::WithdrawReason => "PWR",
            AnnotationCode::WithdrawType => "PWT",
        }
    }

    /// The `<code>` child of an annotation act.
    pub fn code(self) -> Element {
        code("code", oid::PRESCRIPTION_ANNOTATION, self.as_str(), None)
    }
}

/// The interaction a message root is sent as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interaction {
    ParentPrescription,
    CancelRequest,
    DispenseNotification,
    DispenseClaim,
    NominatedPrescriptionRelease,
    PatientPrescriptionRelease,
    DispenserWithdraw,
    DispenseProposalReturn,
}

impl Interaction {
    pub const fn id(self) -> &'static str {
        match self {
            Interaction::ParentPrescription => "PORX_IN020101SM31",
            Interaction::CancelRequest => "PORX_IN030101SM32",
            Interaction::DispenseNotification => "PORX_IN080101SM31",
            Interaction::DispenseClaim => "PORX_IN090101SM31",
            Interaction::NominatedPrescriptionRelease => "PORX_IN060102SM30",
            Interaction::PatientPrescriptionRelease => "PORX_IN132004SM30",
            Interaction::DispenserWithdraw => "PORX_IN510101SM31",
            Interaction::DispenseProposalReturn => "PORX_IN100101SM31",
        }
    }

    pub fn identifier(self) -> Element {
        identifier("interactionId", oid::INTERACTION, Some(self.id()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NullFlavor {
    NotApplicable,
    Unknown,
}

impl NullFlavor {
    pub const fn as_str(self) -> &'static str {
        match self {
            NullFlavor::NotApplicable => "NA",
            NullFlavor::Unknown => "UNK",
        }
    }
}

pub fn code(slot: &str, system: &str, code: &str, display: Option<&str>) -> Element {
    Element::new(slot)
        .attr("codeSystem", system)
        .attr("code", code)
        .maybe_attr("displayName", display)
}

pub fn snomed(slot: &str, value: &str, display: Option<&str>) -> Element {
    code(slot, oid::SNOMED, value, display)
}

pub fn identifier(slot: &str, root: &str, extension: Option<&str>) -> Element {
    Element::new(slot)
        .attr("root", root)
        .maybe_attr("extension", extension)
}

/// An `id` carrying only a `root`. UUIDs are upper-cased.
pub fn global_identifier(slot: &str, value: &str) -> Element {
    let root = if contains_uuid(value) {
        value.to_uppercase()
    } else {
        value.to_owned()
    };
    Element::new(slot).attr("root", root)
}

pub fn type_id(message_type: &str) -> Element {
    identifier("typeId", oid::TYPE, Some(message_type))
}

pub fn template_id(extension: &str) -> Element {
    identifier("templateId", oid::TEMPLATE, Some(extension))
}

pub fn null(slot: &str, flavor: NullFlavor) -> Element {
    Element::new(slot).attr("nullFlavor", flavor.as_str())
}

/// `<slot value=".."/>`, used for timestamps, numbers and booleans.
pub fn value(slot: &str, value: impl Into<String>) -> Element {
    Element::new(slot).attr("value", value)
}

pub fn boolean(slot: &str, value: bool) -> Element {
    self::value(slot, if value { "true" } else { "false" })
}

/// An anchored interval; either bound may be absent.
pub fn interval(slot: &str, low: Option<&str>, high: Option<&str>) -> Element {
    Element::new(slot)
        .maybe_child(low.map(|low| value("low", low)))
        .maybe_child(high.map(|high| value("high", high)))
}

/// `<slot><width value=".." unit=".."/></slot>`
pub fn unanchored_interval(slot: &str, width: &str, unit: &str) -> Element {
    Element::new(slot).child(Element::new("width").attr("value", width).attr("unit", unit))
}

/// A dose-form quantity: the approved value with unit `1`, and a SNOMED translation carrying
/// the original unit.
pub fn quantity_in_alternative_units(
    slot: &str,
    value: &str,
    unit_code: &str,
    unit_display: Option<&str>,
) -> Element {
    Element::new(slot)
        .attr("value", value)
        .attr("unit", "1")
        .child(
            Element::new("translation")
                .attr("value", value)
                .attr("codeSystem", oid::SNOMED)
                .attr("code", unit_code)
                .maybe_attr("displayName", unit_display),
        )
}

/// Whether `value` contains a UUID in 8-4-4-4-12 hex form.
pub fn contains_uuid(value: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let bytes = value.as_bytes();
    (0..bytes.len()).any(|start| {
        let mut position = start;
        GROUPS.iter().enumerate().all(|(index, &len)| {
            if index > 0 {
                if bytes.get(position) != Some(&b'-') {
                    return false;
                }
                position += 1;
            }
            let group = match bytes.get(position..position + len) {
                Some(group) => group,
                None => return false,
            };
            position += len;
            group.iter().all(u8::is_ascii_hexdigit)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_identifier_upper_cases_uuids_only() {
        let id = global_identifier("id", "a7b86f8d-1d81-fc28-e050-d20ae3a215f0");
        assert_eq!(
            id.attribute("root"),
            Some("A7B86F8D-1D81-FC28-E050-D20AE3A215F0")
        );
        let id = global_identifier("id", "18b064-a99968-4bcaa3");
        assert_eq!(id.attribute("root"), Some("18b064-a99968-4bcaa3"));
    }

    #[test]
    fn quantity_translation_carries_both_values() {
        let quantity = quantity_in_alternative_units(
            "quantity",
            "0.50",
            "3317411000001100",
            Some("dose"),
        );
        assert_eq!(quantity.attribute("unit"), Some("1"));
        let translation = quantity.first("translation").expect("translation");
        assert_eq!(translation.attribute("value"), Some("0.50"));
        assert_eq!(translation.attribute("codeSystem"), Some(oid::SNOMED));
        assert_eq!(translation.attribute("displayName"), Some("dose"));
    }

    #[test]
    fn interaction_identifier_uses_interaction_root() {
        let id = Interaction::PatientPrescriptionRelease.identifier();
        assert_eq!(id.attribute("root"), Some(oid::INTERACTION));
        assert_eq!(id.attribute("extension"), Some("PORX_IN132004SM30"));
    }

    #[test]
    fn annotation_code_is_in_prescription_annotation_system() {
        let code = AnnotationCode::TreatmentType.code();
        assert_eq!(code.attribute("code"), Some("PTT"));
        assert_eq!(code.attribute("codeSystem"), Some(oid::PRESCRIPTION_ANNOTATION));
        assert!(code.attribute("displayName").is_none());
    }
}
