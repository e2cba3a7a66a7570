//! Terminology mapping between FHIR codings and HL7 V3 coded values.
//!
//! Every domain is a fixed `static` table. Lookups are exact and case-sensitive; anything not in
//! a table is [`TranslationError::UnmappedCode`]. Tables only ever grow.

use hl7v3::codes::oid;

use crate::constants::code_system;
use crate::{Domain, TranslationError, TranslationResult};

/// An HL7 V3 coded value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetCode {
    pub system: &'static str,
    pub code: &'static str,
    pub display: Option<&'static str>,
}

/// A FHIR coding. `system` is absent for domains that FHIR carries as a bare `code`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceCoding {
    pub system: Option<&'static str>,
    pub code: &'static str,
    pub display: Option<&'static str>,
}

struct Mapping {
    source: &'static str,
    target: &'static str,
    display: Option<&'static str>,
}

const fn map(source: &'static str, target: &'static str) -> Mapping {
    Mapping {
        source,
        target,
        display: None,
    }
}

const fn map_displayed(source: &'static str, target: &'static str, display: &'static str) -> Mapping {
    Mapping {
        source,
        target,
        display: Some(display),
    }
}

/// Codes carried through unchanged.
macro_rules! same {
    ($($code:literal),+ $(,)?) => {
        &[$(map($code, $code)),+]
    };
}

struct Table {
    source_system: Option<&'static str>,
    target_system: &'static str,
    mappings: &'static [Mapping],
    /// Extra target codes accepted by [`to_source`] only, as `(target, source)`.
    reverse_aliases: &'static [(&'static str, &'static str)],
}

static SEX: Table = Table {
    source_system: None,
    target_system: oid::SEX,
    mappings: &[
        map("male", "1"),
        map("female", "2"),
        map("other", "9"),
        map("unknown", "0"),
    ],
    reverse_aliases: &[],
};

/// HL7 V3 telecom and address uses are bare attributes, so the target system is empty.
static TELECOM_USE: Table = Table {
    source_system: None,
    target_system: "",
    mappings: &[
        map("home", "HP"),
        map("work", "WP"),
        map("temp", "HV"),
        map("mobile", "MC"),
    ],
    reverse_aliases: &[("H", "home"), ("PG", "mobile")],
};

static ADDRESS_USE: Table = Table {
    source_system: None,
    target_system: "",
    mappings: &[
        map("home", "H"),
        map("work", "WP"),
        map("temp", "TMP"),
        map("billing", "PST"),
    ],
    reverse_aliases: &[("HP", "home"), ("BP", "work")],
};

/// Several FHIR uses collapse onto one HL7 V3 use; the first row for a target is canonical.
static NAME_USE: Table = Table {
    source_system: None,
    target_system: "",
    mappings: &[
        map("usual", "L"),
        map("official", "L"),
        map("temp", "A"),
        map("anonymous", "A"),
        map("nickname", "PREFERRED"),
        map("old", "PREVIOUS"),
        map("maiden", "PREVIOUS-MAIDEN"),
    ],
    reverse_aliases: &[("PREVIOUS-BIRTH", "old"), ("PREVIOUS-BACHELOR", "maiden")],
};

static PRESCRIPTION_TREATMENT_TYPE: Table = Table {
    source_system: Some(code_system::COURSE_OF_THERAPY),
    target_system: oid::TREATMENT_TYPE,
    mappings: &[
        map_displayed("acute", "0001", "Short course (acute) therapy"),
        map_displayed("continuous", "0002", "Continuous long term therapy"),
        map_displayed(
            "continuous-repeat-dispensing",
            "0003",
            "Continuous long term (repeat dispensing)",
        ),
    ],
    reverse_aliases: &[],
};

static PRESCRIPTION_TYPE: Table = Table {
    source_system: Some(code_system::PRESCRIPTION_TYPE),
    target_system: oid::PRESCRIPTION_TYPE,
    mappings: same!(
        "0101", "0104", "0105", "0108", "0109", "0113", "0114", "0116", "0117", "0119", "0120",
        "0121", "0122", "0123", "0124", "0125", "0201", "0204", "0205", "0208", "0209", "0212",
        "0213", "0214", "0215", "0216", "0217", "0218", "0219", "0220", "0221", "0222", "0223",
        "0901", "0904", "0905", "0908", "0909", "0910", "0911", "0912", "0913", "0914", "0915",
        "0916", "0917", "1001", "1004", "1005", "1008", "1009", "1012", "1013", "1014", "1015",
        "1016", "1017", "1024", "1025",
    ),
    reverse_aliases: &[],
};

static DISPENSING_SITE_PREFERENCE: Table = Table {
    source_system: Some(code_system::DISPENSING_SITE_PREFERENCE),
    target_system: oid::DISPENSING_SITE_PREFERENCE,
    mappings: same!("P1", "P2", "P3", "P9"),
    reverse_aliases: &[],
};

static ITEM_STATUS: Table = Table {
    source_system: Some(code_system::MEDICATION_DISPENSE_TYPE),
    target_system: oid::ITEM_STATUS,
    mappings: same!("0001", "0002", "0003", "0004", "0005", "0006", "0007", "0008"),
    reverse_aliases: &[],
};

static PRESCRIPTION_STATUS: Table = Table {
    source_system: Some(code_system::TASK_BUSINESS_STATUS),
    target_system: oid::PRESCRIPTION_STATUS,
    mappings: same!("0001", "0002", "0003", "0004", "0005", "0006", "0007"),
    reverse_aliases: &[],
};

static CANCELLATION_REASON: Table = Table {
    source_system: Some(code_system::MEDICATION_REQUEST_STATUS_REASON),
    target_system: oid::CANCELLATION_REASON,
    mappings: same!("0001", "0002", "0003", "0004", "0005", "0006", "0007", "0008"),
    reverse_aliases: &[],
};

static WITHDRAW_TYPE: Table = Table {
    source_system: Some(code_system::WITHDRAW_TYPE),
    target_system: oid::WITHDRAW_TYPE,
    mappings: same!("LD", "AH"),
    reverse_aliases: &[],
};

static WITHDRAW_REASON: Table = Table {
    source_system: Some(code_system::WITHDRAW_REASON),
    target_system: oid::WITHDRAW_REASON,
    mappings: same!("QU", "MU", "DA", "PA", "OC", "ONC"),
    reverse_aliases: &[],
};

static ENDORSEMENT: Table = Table {
    source_system: Some(code_system::ENDORSEMENT),
    target_system: oid::ENDORSEMENT,
    mappings: same!("CC", "FS", "ACBS", "SLS", "AF"),
    reverse_aliases: &[],
};

static NON_DISPENSING_REASON: Table = Table {
    source_system: Some(code_system::NON_DISPENSING_REASON),
    target_system: oid::NOT_DISPENSED_REASON,
    mappings: same!(
        "0001", "0002", "0003", "0004", "0005", "0006", "0007", "0008", "0009", "0010", "0011",
    ),
    reverse_aliases: &[],
};

static ORGANISATION_TYPE: Table = Table {
    source_system: None,
    target_system: oid::ORGANIZATION_TYPE,
    mappings: same!(
        "001", "002", "003", "004", "005", "006", "007", "008", "009", "010", "011", "012",
        "013", "014", "015", "016", "017", "018", "019", "020", "021", "999",
    ),
    reverse_aliases: &[],
};

fn table(domain: Domain) -> Option<&'static Table> {
    match domain {
        Domain::Sex => Some(&SEX),
        Domain::TelecomUse => Some(&TELECOM_USE),
        Domain::AddressUse => Some(&ADDRESS_USE),
        Domain::NameUse => Some(&NAME_USE),
        Domain::OrganisationType => Some(&ORGANISATION_TYPE),
        Domain::PrescriptionType => Some(&PRESCRIPTION_TYPE),
        Domain::PrescriptionTreatmentType => Some(&PRESCRIPTION_TREATMENT_TYPE),
        Domain::DispensingSitePreference => Some(&DISPENSING_SITE_PREFERENCE),
        Domain::ItemStatus => Some(&ITEM_STATUS),
        Domain::PrescriptionStatus => Some(&PRESCRIPTION_STATUS),
        Domain::CancellationReason => Some(&CANCELLATION_REASON),
        Domain::WithdrawType => Some(&WITHDRAW_TYPE),
        Domain::WithdrawReason => Some(&WITHDRAW_REASON),
        Domain::Endorsement => Some(&ENDORSEMENT),
        Domain::NonDispensingReason => Some(&NON_DISPENSING_REASON),
        _ => None,
    }
}

/// Maps a FHIR code to its HL7 V3 coded value.
pub fn to_target(domain: Domain, code: &str) -> TranslationResult<TargetCode> {
    let table = table(domain).ok_or_else(|| TranslationError::unmapped(domain, code))?;
    table
        .mappings
        .iter()
        .find(|mapping| mapping.source == code)
        .map(|mapping| TargetCode {
            system: table.target_system,
            code: mapping.target,
            display: mapping.display,
        })
        .ok_or_else(|| TranslationError::unmapped(domain, code))
}

/// Maps an HL7 V3 code back to its canonical FHIR coding.
pub fn to_source(domain: Domain, code: &str) -> TranslationResult<SourceCoding> {
    let table = table(domain).ok_or_else(|| TranslationError::unmapped(domain, code))?;
    let canonical = table
        .mappings
        .iter()
        .find(|mapping| mapping.target == code)
        .map(|mapping| (mapping.source, mapping.display));
    let aliased = || {
        table
            .reverse_aliases
            .iter()
            .find(|(target, _)| *target == code)
            .map(|(_, source)| (*source, None))
    };
    canonical
        .or_else(aliased)
        .map(|(source, display)| SourceCoding {
            system: table.source_system,
            code: source,
            display,
        })
        .ok_or_else(|| TranslationError::unmapped(domain, code))
}

/// Maps a FHIR address to its HL7 V3 use. A `postal` type wins over the use.
pub fn address_use(address_use: Option<&str>, address_type: Option<&str>) -> TranslationResult<Option<&'static str>> {
    if address_type == Some("postal") {
        return Ok(Some("PST"));
    }
    address_use
        .map(|code| to_target(Domain::AddressUse, code).map(|target| target.code))
        .transpose()
}

/// Task status and business status derived from a tracker prescription status display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusinessStatus {
    pub task_status: &'static str,
    pub code: &'static str,
}

static BUSINESS_STATUS: &[(&str, BusinessStatus)] = &[
    ("Awaiting Release Ready", BusinessStatus { task_status: "requested", code: "0000" }),
    ("To Be Dispensed", BusinessStatus { task_status: "requested", code: "0001" }),
    ("With Dispenser", BusinessStatus { task_status: "accepted", code: "0002" }),
    ("With Dispenser - Active", BusinessStatus { task_status: "in-progress", code: "0003" }),
    ("Expired", BusinessStatus { task_status: "failed", code: "0004" }),
    ("Cancelled", BusinessStatus { task_status: "cancelled", code: "0005" }),
    ("Dispensed", BusinessStatus { task_status: "completed", code: "0006" }),
    ("Not Dispensed", BusinessStatus { task_status: "completed", code: "0007" }),
    ("Claimed", BusinessStatus { task_status: "completed", code: "0008" }),
    ("No-Claimed", BusinessStatus { task_status: "completed", code: "0009" }),
    ("Repeat Dispense future instance", BusinessStatus { task_status: "requested", code: "9000" }),
    ("Prescription future instance", BusinessStatus { task_status: "requested", code: "9001" }),
    ("Cancelled future instance", BusinessStatus { task_status: "cancelled", code: "9005" }),
];

/// One-directional lookup of a tracker prescription status display.
pub fn business_status(display: &str) -> TranslationResult<BusinessStatus> {
    lookup(BUSINESS_STATUS, display, Domain::BusinessStatus)
}

static LINE_ITEM_STATUS: &[(&str, &str)] = &[
    ("Dispensed", "0001"),
    ("Not Dispensed", "0002"),
    ("Dispensed - Partial", "0003"),
    ("Not Dispensed - Owing", "0004"),
    ("Cancelled", "0005"),
    ("Expired", "0006"),
    ("To be Dispensed", "0007"),
    ("With Dispenser", "0008"),
];

/// One-directional lookup of a tracker line item status display.
pub fn line_item_status(display: &str) -> TranslationResult<&'static str> {
    lookup(LINE_ITEM_STATUS, display, Domain::LineItemStatus)
}

static MEDICATION_REQUEST_STATUS: &[(&str, &str)] = &[
    ("0001", "completed"),
    ("0002", "stopped"),
    ("0003", "active"),
    ("0004", "active"),
    ("0005", "cancelled"),
    ("0006", "stopped"),
    ("0007", "active"),
    ("0008", "active"),
];

/// The `MedicationRequest.status` of a released line item, from its HL7 V3 item status.
pub fn medication_request_status(item_status: &str) -> TranslationResult<&'static str> {
    lookup(MEDICATION_REQUEST_STATUS, item_status, Domain::ItemStatus)
}

static TREATMENT_TYPE_DISPLAY: &[(&str, &str)] = &[
    ("Acute Prescription", "acute"),
    ("Repeat Prescribing", "continuous"),
    ("Repeat Dispensing", "continuous-repeat-dispensing"),
];

/// Maps a tracker treatment type display to the course-of-therapy coding.
pub fn treatment_type_from_display(display: &str) -> TranslationResult<SourceCoding> {
    let code = lookup(TREATMENT_TYPE_DISPLAY, display, Domain::TreatmentTypeDisplay)?;
    let target = to_target(Domain::PrescriptionTreatmentType, code)?;
    Ok(SourceCoding {
        system: Some(code_system::COURSE_OF_THERAPY),
        code,
        display: target.display,
    })
}

/// Outcome of a cancellation, keyed by the HL7 V3 cancellation response reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancellationStatus {
    pub status_code: &'static str,
    pub status_display: String,
    pub medication_request_status: &'static str,
    /// Set when the response reports a failure to process the request.
    pub issue_code: Option<&'static str>,
}

/// Maps a cancellation response reason code. `display` supplies the detail for `5000`.
pub fn cancellation_status(code: &str, display: &str) -> TranslationResult<CancellationStatus> {
    let status = |status_code, status_display: &str, medication_request_status| CancellationStatus {
        status_code,
        status_display: status_display.to_owned(),
        medication_request_status,
        issue_code: None,
    };
    Ok(match code {
        "0001" => status("R-0001", "Prescription/item was cancelled", "cancelled"),
        "0002" => status(
            "R-0002",
            "Prescription/item was not cancelled – With dispenser",
            "active",
        ),
        "0003" => status(
            "R-0003",
            "Prescription item was not cancelled – With dispenser active",
            "active",
        ),
        "0004" => status(
            "R-0004",
            "Prescription/item was not cancelled – Dispensed to Patient",
            "completed",
        ),
        "0005" => status("R-0005", "Prescription item had expired", "stopped"),
        "0006" => status("R-0006", "Prescription/item had already been cancelled", "cancelled"),
        "0007" => status(
            "R-0007",
            "Prescription/item cancellation requested by another prescriber",
            "unknown",
        ),
        "0008" => status("R-0008", "Prescription/item not found", "unknown"),
        "0009" => status("R-0009", "Cancellation functionality disabled in Spine", "active"),
        "0010" => status(
            "R-0010",
            "Prescription/item was not cancelled. Prescription has been not dispensed",
            "stopped",
        ),
        "5000" => {
            let detail = display.split('-').nth(1).unwrap_or_default();
            CancellationStatus {
                issue_code: Some("exception"),
                ..status("R-5000", &format!("Unable to process message.{detail}"), "unknown")
            }
        }
        "5888" => CancellationStatus {
            issue_code: Some("invalid"),
            ..status("R-5888", "Invalid message", "unknown")
        },
        other => {
            return Err(TranslationError::unmapped(
                Domain::CancellationResponseReason,
                other,
            ))
        }
    })
}

fn lookup<T: Copy>(table: &[(&str, T)], key: &str, domain: Domain) -> TranslationResult<T> {
    table
        .iter()
        .find(|(display, _)| *display == key)
        .map(|(_, value)| *value)
        .ok_or_else(|| TranslationError::unmapped(domain, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIJECTIVE: &[Domain] = &[
        Domain::Sex,
        Domain::TelecomUse,
        Domain::AddressUse,
        Domain::OrganisationType,
        Domain::PrescriptionType,
        Domain::PrescriptionTreatmentType,
        Domain::DispensingSitePreference,
        Domain::ItemStatus,
        Domain::PrescriptionStatus,
        Domain::CancellationReason,
        Domain::WithdrawType,
        Domain::WithdrawReason,
        Domain::Endorsement,
        Domain::NonDispensingReason,
    ];

    #[test]
    fn bijective_domains_round_trip() {
        for &domain in BIJECTIVE {
            let table = table(domain).expect("table");
            for mapping in table.mappings {
                let target = to_target(domain, mapping.source).expect("forward");
                let source = to_source(domain, target.code).expect("reverse");
                assert_eq!(source.code, mapping.source, "{domain} {}", mapping.source);
                assert_eq!(source.system, table.source_system);
            }
        }
    }

    #[test]
    fn name_use_reverses_to_canonical_member() {
        assert_eq!(to_target(Domain::NameUse, "official").expect("map").code, "L");
        assert_eq!(to_source(Domain::NameUse, "L").expect("map").code, "usual");
        assert_eq!(to_source(Domain::NameUse, "A").expect("map").code, "temp");
        assert_eq!(
            to_source(Domain::NameUse, "PREVIOUS-BIRTH").expect("alias").code,
            "old"
        );
    }

    #[test]
    fn reverse_aliases_are_not_forward_codes() {
        assert_eq!(to_source(Domain::TelecomUse, "PG").expect("alias").code, "mobile");
        assert_eq!(to_source(Domain::AddressUse, "HP").expect("alias").code, "home");
        let err = to_target(Domain::TelecomUse, "pager").expect_err("unknown");
        assert!(matches!(
            err,
            TranslationError::UnmappedCode { domain: Domain::TelecomUse, ref value } if value == "pager"
        ));
    }

    #[test]
    fn released_item_status_sets_request_status() {
        assert_eq!(medication_request_status("0001").expect("map"), "completed");
        assert_eq!(medication_request_status("0006").expect("map"), "stopped");
        assert_eq!(medication_request_status("0008").expect("map"), "active");
        assert!(matches!(
            medication_request_status("0009").expect_err("unknown"),
            TranslationError::UnmappedCode { domain: Domain::ItemStatus, .. }
        ));
    }

    #[test]
    fn sex_uses_the_sex_oid() {
        let target = to_target(Domain::Sex, "other").expect("map");
        assert_eq!(target, TargetCode { system: oid::SEX, code: "9", display: None });
        assert!(to_target(Domain::Sex, "Male").is_err());
    }

    #[test]
    fn postal_address_type_overrides_use() {
        assert_eq!(address_use(Some("home"), Some("postal")).expect("map"), Some("PST"));
        assert_eq!(address_use(Some("home"), Some("physical")).expect("map"), Some("H"));
        assert_eq!(address_use(None, None).expect("map"), None);
        assert!(address_use(Some("old"), None).is_err());
    }

    #[test]
    fn business_status_is_exact_and_case_sensitive() {
        assert_eq!(
            business_status("With Dispenser - Active").expect("known"),
            BusinessStatus { task_status: "in-progress", code: "0003" }
        );
        let err = business_status("with dispenser").expect_err("case differs");
        assert!(matches!(
            err,
            TranslationError::UnmappedCode { domain: Domain::BusinessStatus, .. }
        ));
        assert_eq!(line_item_status("Dispensed - Partial").expect("known"), "0003");
    }

    #[test]
    fn treatment_type_display_maps_to_course_of_therapy() {
        let coding = treatment_type_from_display("Repeat Dispensing").expect("known");
        assert_eq!(coding.code, "continuous-repeat-dispensing");
        assert_eq!(coding.display, Some("Continuous long term (repeat dispensing)"));
        assert!(treatment_type_from_display("Unknown").is_err());
    }

    #[test]
    fn cancellation_errors_carry_issue_codes() {
        let status = cancellation_status("5000", "Unable to process message-timeout").expect("map");
        assert_eq!(status.issue_code, Some("exception"));
        assert_eq!(status.status_display, "Unable to process message.timeout");
        assert_eq!(cancellation_status("5888", "").expect("map").issue_code, Some("invalid"));
        let status = cancellation_status("0001", "Cancelled").expect("map");
        assert_eq!(status.issue_code, None);
        assert_eq!(status.medication_request_status, "cancelled");
        assert!(cancellation_status("1234", "").is_err());
    }
}
