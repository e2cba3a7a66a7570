//! Constants used throughout the EPS core crate.
//!
//! FHIR identifier systems, extension URLs and code-system URIs are gathered here so every
//! builder matches the exact same strings.

/// Default bound on `partOf` and GP reference chains.
pub const DEFAULT_MAX_REFERENCE_DEPTH: usize = 16;

/// Identifier systems.
pub mod system {
    pub const NHS_NUMBER: &str = "https://fhir.nhs.uk/Id/nhs-number";
    pub const ODS_ORGANIZATION_CODE: &str = "https://fhir.nhs.uk/Id/ods-organization-code";
    pub const SDS_ROLE_PROFILE_ID: &str = "https://fhir.nhs.uk/Id/sds-role-profile-id";
    pub const SDS_USER_ID: &str = "https://fhir.nhs.uk/Id/sds-user-id";
    pub const PRESCRIPTION: &str = "https://fhir.nhs.uk/Id/prescription";
    pub const PRESCRIPTION_ORDER_NUMBER: &str = "https://fhir.nhs.uk/Id/prescription-order-number";
    pub const PRESCRIPTION_ORDER_ITEM_NUMBER: &str =
        "https://fhir.nhs.uk/Id/prescription-order-item-number";
    pub const PRESCRIPTION_DISPENSE_ITEM_NUMBER: &str =
        "https://fhir.nhs.uk/Id/prescription-dispense-item-number";
    pub const RFC4122: &str = "https://tools.ietf.org/html/rfc4122";

    pub const GMC_NUMBER: &str = "https://fhir.hl7.org.uk/Id/gmc-number";
    pub const GMP_NUMBER: &str = "https://fhir.hl7.org.uk/Id/gmp-number";
    pub const NMC_NUMBER: &str = "https://fhir.hl7.org.uk/Id/nmc-number";
    pub const GPHC_NUMBER: &str = "https://fhir.hl7.org.uk/Id/gphc-number";
    pub const HCPC_NUMBER: &str = "https://fhir.hl7.org.uk/Id/hcpc-number";
    pub const PROFESSIONAL_CODE: &str = "https://fhir.hl7.org.uk/Id/professional-code";
    pub const NHSBSA_SPURIOUS_CODE: &str = "https://fhir.hl7.org.uk/Id/nhsbsa-spurious-code";
    pub const DIN_NUMBER: &str = "https://fhir.hl7.org.uk/Id/din-number";
}

/// Code-system URIs on the FHIR side.
pub mod code_system {
    pub const SNOMED: &str = "http://snomed.info/sct";
    pub const UCUM: &str = "http://unitsofmeasure.org";
    pub const MEDICATION_REQUEST_CATEGORY: &str =
        "http://terminology.hl7.org/CodeSystem/medicationrequest-category";
    pub const SDS_JOB_ROLE_CODE: &str = "https://fhir.hl7.org.uk/CodeSystem/UKCore-SDSJobRoleCode";
    pub const SDS_JOB_ROLE_NAME: &str = "https://fhir.hl7.org.uk/CodeSystem/UKCore-SDSJobRoleName";
    pub const COURSE_OF_THERAPY: &str =
        "http://terminology.hl7.org/CodeSystem/medicationrequest-course-of-therapy";
    pub const PRESCRIPTION_TYPE: &str = "https://fhir.nhs.uk/CodeSystem/prescription-type";
    pub const DISPENSING_SITE_PREFERENCE: &str =
        "https://fhir.nhs.uk/CodeSystem/dispensing-site-preference";
    pub const ENDORSEMENT: &str = "https://fhir.nhs.uk/CodeSystem/medicationrequest-endorsement";
    pub const MEDICATION_REQUEST_STATUS_REASON: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationrequest-status-reason";
    pub const MEDICATION_REQUEST_STATUS_HISTORY: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationrequest-status-history";
    pub const MEDICATION_DISPENSE_TYPE: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationdispense-type";
    pub const MEDICATION_DISPENSE_STATUS_REASON: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationdispense-status-reason";
    pub const TASK_BUSINESS_STATUS: &str = "https://fhir.nhs.uk/CodeSystem/EPS-task-business-status";
    pub const WITHDRAW_REASON: &str =
        "https://fhir.nhs.uk/CodeSystem/EPS-task-dispense-withdraw-reason";
    pub const WITHDRAW_TYPE: &str = "https://fhir.nhs.uk/CodeSystem/EPS-task-dispense-withdraw-type";
    pub const NON_DISPENSING_REASON: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationdispense-status-reason";
    pub const TASK_CODE: &str = "http://hl7.org/fhir/CodeSystem/task-code";
    pub const SPINE_ERROR_OR_WARNING: &str = "https://fhir.nhs.uk/CodeSystem/Spine-ErrorOrWarningCode";
    pub const MESSAGE_EVENT: &str = "https://fhir.nhs.uk/CodeSystem/message-event";
    pub const CHARGE_EXEMPTION: &str =
        "https://fhir.nhs.uk/CodeSystem/prescription-charge-exemption";
    pub const EXEMPTION_EVIDENCE: &str = "https://fhir.nhs.uk/CodeSystem/DM-exemption-evidence";
    pub const PRESCRIPTION_CHARGE: &str = "https://fhir.nhs.uk/CodeSystem/DM-prescription-charge";
    pub const DISPENSE_ENDORSEMENT: &str =
        "https://fhir.nhs.uk/CodeSystem/medicationdispense-endorsement";
}

/// Extension URLs.
pub mod extension {
    pub const PRESCRIPTION_ID: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PrescriptionId";
    pub const PRESCRIPTION_TYPE: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PrescriptionType";
    pub const RESPONSIBLE_PRACTITIONER: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-ResponsiblePractitioner";
    pub const PERFORMER_SITE_TYPE: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PerformerSiteType";
    pub const PRESCRIPTION_ENDORSEMENT: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PrescriptionEndorsement";
    pub const CONTROLLED_DRUG: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-ControlledDrug";
    pub const NON_DISPENSING_REASON: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PrescriptionNonDispensingReason";
    pub const STATUS_HISTORY: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-PrescriptionTaskStatusReason";
    pub const REPEAT_INFORMATION: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-RepeatInformation";
    pub const UK_CORE_REPEAT_INFORMATION: &str =
        "https://fhir.hl7.org.uk/StructureDefinition/Extension-UKCore-MedicationRepeatInformation";
    pub const TASK_BUSINESS_STATUS: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-TaskBusinessStatus";
    pub const ORGANISATION_RELATIONSHIPS: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-ODS-OrganisationRelationships";
    pub const REPLACEMENT_OF: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-replacementOf";
    pub const PRESCRIPTION: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-Prescription";
    pub const DISPENSING_INFORMATION: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-DispensingInformation";
    pub const DISPENSING_RELEASE_INFORMATION: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-DispensingReleaseInformation";
    pub const DISPENSING_PERFORMER: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-DispensingPerformer";
    pub const MESSAGE_ID: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-Spine-MessageHeader-messageId";
    pub const TASK_BUSINESS_STATUS_REASON: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-EPS-TaskBusinessStatusReason";
    pub const GROUP_IDENTIFIER: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-DM-GroupIdentifier";
    pub const CLAIM_SEQUENCE_IDENTIFIER: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-ClaimSequenceIdentifier";
    pub const CLAIM_MEDICATION_REQUEST_REFERENCE: &str =
        "https://fhir.nhs.uk/StructureDefinition/Extension-ClaimMedicationRequestReference";
}

/// Fixed SNOMED codes placed on HL7 V3 acts.
pub mod snomed {
    pub const PRESCRIPTION: (&str, &str) = (
        "163501000000109",
        "Prescription - FocusActOrEvent (record artifact)",
    );
    pub const DISPENSE_NOTIFICATION: (&str, &str) = (
        "163541000000107",
        "Dispensed Medication - FocusActOrEvent (administrative concept)",
    );
    pub const MEDICATION_CARE_RECORD: (&str, &str) = (
        "185361000000102",
        "Medication - care record element (record artifact)",
    );
    pub const ADMINISTRATION: (&str, &str) = (
        "225426007",
        "Administration of therapeutic substance (procedure)",
    );
    pub const DISPENSING: (&str, &str) = ("373784005", "Dispensing medication (procedure)");
}

/// Template extensions attached to relationship slots.
pub mod template {
    pub const PERTINENT_INFORMATION: &str = "CSAB_RM-NPfITUK10.pertinentInformation";
    pub const PERTINENT_INFORMATION1: &str = "CSAB_RM-NPfITUK10.pertinentInformation1";
    pub const SOURCE_OF1: &str = "CSAB_RM-NPfITUK10.sourceOf1";
    pub const SOURCE_OF2: &str = "CSAB_RM-NPfITUK10.sourceOf2";
}

/// Message types placed in `typeId`.
pub mod message_type {
    pub const PARENT_PRESCRIPTION: &str = "PORX_MT132004UK31";
    pub const CANCELLATION_REQUEST: &str = "PORX_MT135001UK32";
    pub const DISPENSE_NOTIFICATION: &str = "PORX_MT024001UK31";
    pub const DISPENSE_CLAIM: &str = "PORX_MT142001UK31";
    pub const ETP_WITHDRAW: &str = "PORX_MT122003UK32";
    /// Template of a signed `ParentPrescription` inside a release response.
    pub const RELEASED_PRESCRIPTION: &str = "PORX_MT122003UK32";
}

/// The organisation type code used when the real type is not conveyed.
pub const ORGANISATION_TYPE_NOT_SPECIFIED: &str = "999";

/// GP practice code meaning "no registered practice".
pub const UNREGISTERED_GP_PRACTICE: &str = "V81999";
