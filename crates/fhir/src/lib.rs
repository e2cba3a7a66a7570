//! FHIR R4 wire/boundary support for the EPS translation core.
//!
//! This crate provides:
//! - **wire models** for the FHIR resources exchanged with the prescribing gateway
//!   ([`resources`], [`datatypes`])
//! - a **reference resolver** over a bundle and its contained resources ([`reference`])
//! - path-aware JSON parsing via `serde_path_to_error`
//!
//! It deliberately models only the elements the translation reads or writes; it is not a
//! general-purpose FHIR validator.

pub mod datatypes;
pub mod reference;
pub mod resources;

pub use datatypes::{
    Address, Annotation, CodeableConcept, Coding, ContactPoint, DoseAndRate, Dosage, Extension,
    HumanName, Identifier, Period, Quantity, Range, Ratio, Reference, Timing, TimingRepeat,
};
pub use reference::{ContainedScope, ReferenceIndex, ReferenceTarget};
pub use resources::{
    Bundle, BundleEntry, Claim, ClaimInsurance, ClaimItem, ClaimItemDetail, ClaimItemSubDetail,
    CommunicationPayload, CommunicationRequest, DispensePerformer, DispenseRequest, FhirResource,
    HealthcareService, List, ListEntry, Location, Medication, MedicationDispense,
    MedicationRequest, MessageDestination, MessageHeader, MessageResponse, MessageSource,
    OperationOutcome, OperationOutcomeIssue, Organization, Parameter, Parameters, Patient,
    Practitioner, PractitionerRole, Provenance, Resource, Signature, Task, TaskParameter,
};

use serde::de::DeserializeOwned;

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("{resource} schema mismatch at {path}: {message}")]
    SchemaMismatch {
        resource: String,
        path: String,
        message: String,
    },

    #[error("unresolved reference: {reference}")]
    UnresolvedReference { reference: String },

    #[error("reference {reference} resolved to {actual}, expected {expected}")]
    ReferenceTypeMismatch {
        reference: String,
        expected: String,
        actual: String,
    },
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

/// Parses FHIR JSON text into `T`.
///
/// Schema errors report the element path of the first failure (for example
/// `entry[2].resource.dosageInstruction[0].sequence`).
///
/// # Errors
///
/// Returns [`FhirError::InvalidJson`] if the text is not JSON at all, or
/// [`FhirError::SchemaMismatch`] if it does not fit the wire model.
pub fn parse<T>(json: &str) -> FhirResult<T>
where
    T: DeserializeOwned + FhirResource,
{
    let value: serde_json::Value = serde_json::from_str(json)?;
    from_value_with_path(value, T::RESOURCE_TYPE)
}

/// Deserialises a JSON value, attaching the failing path to any error.
pub(crate) fn from_value_with_path<T>(value: serde_json::Value, resource: &str) -> FhirResult<T>
where
    T: DeserializeOwned,
{
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>".to_owned()
        } else {
            path
        };
        FhirError::SchemaMismatch {
            resource: resource.to_owned(),
            path,
            message: source.to_string(),
        }
    })
}
