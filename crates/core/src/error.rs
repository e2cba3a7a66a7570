use std::fmt;

/// The terminology table a failed lookup was made against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Domain {
    Sex,
    TelecomUse,
    AddressUse,
    NameUse,
    OrganisationType,
    PrescriptionType,
    PrescriptionTreatmentType,
    DispensingSitePreference,
    ItemStatus,
    PrescriptionStatus,
    CancellationReason,
    WithdrawType,
    WithdrawReason,
    Endorsement,
    NonDispensingReason,
    BusinessStatus,
    LineItemStatus,
    TreatmentTypeDisplay,
    CancellationResponseReason,
    EventTiming,
    UnitOfTime,
    DayOfWeek,
    MessageEvent,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("unresolved reference {reference}")]
    UnresolvedReference { reference: String },

    #[error("reference {reference} resolved to {actual}, expected {expected}")]
    ReferenceTypeMismatch {
        reference: String,
        expected: String,
        actual: String,
    },

    #[error("no {domain} mapping for '{value}'")]
    UnmappedCode { domain: Domain, value: String },

    #[error("missing required field {path}")]
    MissingRequiredField { path: String },

    #[error("inconsistent values across the group at {path}")]
    InconsistentGroupField { path: String },

    #[error("dosage at {path} has no sequence number")]
    MissingSequenceNumber { path: String },

    #[error("reference chain at {path} exceeds depth {depth} or loops")]
    UnboundedReferenceChain { path: String, depth: usize },

    #[error("invalid value at {path}: {message}")]
    InvalidValue { path: String, message: String },

    #[error("FHIR error: {0}")]
    Fhir(fhir::FhirError),

    #[error("HL7 V3 error: {0}")]
    Hl7v3(#[from] hl7v3::Hl7v3Error),
}

/// Reference failures surface as the core's own variants so callers match one taxonomy.
impl From<fhir::FhirError> for TranslationError {
    fn from(err: fhir::FhirError) -> Self {
        match err {
            fhir::FhirError::UnresolvedReference { reference } => {
                TranslationError::UnresolvedReference { reference }
            }
            fhir::FhirError::ReferenceTypeMismatch {
                reference,
                expected,
                actual,
            } => TranslationError::ReferenceTypeMismatch {
                reference,
                expected,
                actual,
            },
            other => TranslationError::Fhir(other),
        }
    }
}

impl TranslationError {
    pub fn missing(path: impl Into<String>) -> Self {
        TranslationError::MissingRequiredField { path: path.into() }
    }

    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        TranslationError::InvalidValue {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn unmapped(domain: Domain, value: impl Into<String>) -> Self {
        TranslationError::UnmappedCode {
            domain,
            value: value.into(),
        }
    }
}

/// Type alias for Results that can fail with a [`TranslationError`].
pub type TranslationResult<T> = Result<T, TranslationError>;

/// Unwraps an optional field or reports its FHIR path.
pub(crate) fn required<T>(value: Option<T>, path: &str) -> TranslationResult<T> {
    value.ok_or_else(|| TranslationError::missing(path))
}
