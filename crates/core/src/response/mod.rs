//! Inbound translation: backbone responses back into FHIR.

pub(crate) mod cancellation;
mod common;
pub(crate) mod release;
pub(crate) mod tracker;

use fhir::{Bundle, CodeableConcept, Coding, OperationOutcome, OperationOutcomeIssue, Resource};

/// A translated response: a result bundle, or the outcome describing why there is none.
#[derive(Clone, Debug, PartialEq)]
pub enum FhirResponse {
    Bundle(Bundle),
    OperationOutcome(OperationOutcome),
}

impl FhirResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, FhirResponse::OperationOutcome(_))
    }
}

impl From<FhirResponse> for Resource {
    fn from(response: FhirResponse) -> Self {
        match response {
            FhirResponse::Bundle(bundle) => Resource::Bundle(bundle),
            FhirResponse::OperationOutcome(outcome) => Resource::OperationOutcome(outcome),
        }
    }
}

/// A single-issue error outcome whose details are one coding.
pub(crate) fn error_outcome(issue_code: &str, details: Coding) -> FhirResponse {
    FhirResponse::OperationOutcome(OperationOutcome {
        id: None,
        issue: vec![OperationOutcomeIssue {
            severity: "error".to_owned(),
            code: issue_code.to_owned(),
            details: Some(CodeableConcept::single(details)),
            diagnostics: None,
        }],
    })
}

pub(crate) fn full_url(id: &str) -> String {
    format!("urn:uuid:{id}")
}
