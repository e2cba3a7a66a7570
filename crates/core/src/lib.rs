//! # EPS Core
//!
//! Translation core for the electronic prescription service.
//!
//! This crate turns FHIR R4 resources into the HL7 V3 documents the national messaging
//! backbone consumes, and turns the backbone's responses back into FHIR:
//! - prescription orders, cancellations, dispense notifications, dispense claims, release
//!   requests and withdrawals are built as HL7 V3 [`Element`] trees
//! - tracker, cancellation and release responses become FHIR bundles or operation outcomes
//! - structured dosages are rendered to text by [`dosage`]
//!
//! **No transport concerns**: HTTP, message signing and the ebXML envelope belong to the
//! caller. Every function here is synchronous and pure; configuration is passed in, never read
//! from the environment.

pub mod code_systems;
pub mod config;
pub mod constants;
pub mod dates;
pub mod dosage;
mod error;
mod request;
mod response;

pub use config::TranslatorConfig;
pub use error::{Domain, TranslationError, TranslationResult};
pub use request::ReleaseKind;
pub use response::FhirResponse;

use fhir::{Bundle, Claim, MessageHeader, Parameters, Resource, Task};
use hl7v3::codes::HL7_NAMESPACE;
use hl7v3::Element;

/// The message a FHIR bundle carries, from its `MessageHeader.eventCoding`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    PrescriptionOrder,
    PrescriptionOrderUpdate,
    DispenseNotification,
    DispenseClaim,
}

impl MessageKind {
    pub fn from_event_code(code: &str) -> TranslationResult<Self> {
        match code {
            "prescription-order" => Ok(MessageKind::PrescriptionOrder),
            "prescription-order-update" => Ok(MessageKind::PrescriptionOrderUpdate),
            "dispense-notification" => Ok(MessageKind::DispenseNotification),
            "dispense-claim" => Ok(MessageKind::DispenseClaim),
            other => Err(TranslationError::unmapped(Domain::MessageEvent, other)),
        }
    }

    /// Classifies a bundle by its first `MessageHeader`.
    pub fn of(bundle: &Bundle) -> TranslationResult<Self> {
        let header = bundle
            .entry
            .iter()
            .find_map(|entry| match &entry.resource {
                Some(Resource::MessageHeader(header)) => Some(header),
                _ => None,
            })
            .ok_or_else(|| TranslationError::missing("Bundle.entry.ofType(MessageHeader)"))?;
        Self::from_event_code(event_code(header)?)
    }

    pub fn event_code(self) -> &'static str {
        match self {
            MessageKind::PrescriptionOrder => "prescription-order",
            MessageKind::PrescriptionOrderUpdate => "prescription-order-update",
            MessageKind::DispenseNotification => "dispense-notification",
            MessageKind::DispenseClaim => "dispense-claim",
        }
    }
}

fn event_code(header: &MessageHeader) -> TranslationResult<&str> {
    header
        .event_coding
        .as_ref()
        .and_then(|coding| coding.code.as_deref())
        .ok_or_else(|| TranslationError::missing("MessageHeader.eventCoding.code"))
}

fn message_root(root: Element) -> Element {
    root.namespaced(HL7_NAMESPACE)
}

/// Builds the `ParentPrescription` sent as `PORX_IN020101SM31`.
///
/// # Errors
///
/// Fails on the first missing field, dangling reference or unmapped code, naming its FHIR path.
pub fn build_parent_prescription(
    bundle: &Bundle,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    request::prescription::parent_prescription(bundle, config).map(message_root)
}

/// Builds the `CancellationRequest` sent as `PORX_IN030101SM32`.
pub fn build_cancellation_request(
    bundle: &Bundle,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    request::cancellation::cancellation_request(bundle, config).map(message_root)
}

/// Builds the `DispenseNotification` sent as `PORX_IN080101SM31`.
pub fn build_dispense_notification(
    bundle: &Bundle,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    request::dispense::dispense_notification(bundle, config).map(message_root)
}

/// Builds the `DispenseClaim` sent as `PORX_IN090101SM31`.
pub fn build_dispense_claim(claim: &Claim, config: &TranslatorConfig) -> TranslationResult<Element> {
    request::claim::dispense_claim(claim, config).map(message_root)
}

/// Builds a nominated or patient release request; [`ReleaseKind::of`] tells which interaction
/// it is sent as.
pub fn build_release_request(
    parameters: &Parameters,
    config: &TranslatorConfig,
) -> TranslationResult<Element> {
    request::release::release_request(parameters, config).map(message_root)
}

/// Builds the `ETPWithdraw` sent as `PORX_IN510101SM31`.
pub fn build_withdraw(task: &Task, config: &TranslatorConfig) -> TranslationResult<Element> {
    request::withdraw::etp_withdraw(task, config).map(message_root)
}

/// Converts a raw tracker response into a searchset of `Task`s, or an `OperationOutcome` when
/// the tracker reports a failure.
pub fn build_task_from_tracker_response(
    response: &serde_json::Value,
) -> TranslationResult<FhirResponse> {
    response::tracker::task_bundle(response)
}

/// Converts an HL7 V3 `CancellationResponse` document.
///
/// # Errors
///
/// Fails if the XML is malformed, is not a cancellation response, or carries an unknown
/// response code.
pub fn build_cancellation_response(xml: &str) -> TranslationResult<FhirResponse> {
    response::cancellation::cancellation_response(xml)
}

/// Translates a `PrescriptionReleaseResponse` into a searchset of prescription message bundles.
///
/// # Errors
///
/// Fails if the XML is malformed or a released prescription lacks a required element.
pub fn build_release_response(xml: &str) -> TranslationResult<FhirResponse> {
    response::release::release_response(xml)
}

/// Serialises a built message, with or without the XML declaration per `config`.
pub fn to_xml(root: &Element, config: &TranslatorConfig) -> TranslationResult<String> {
    let xml = if config.xml_declaration() {
        hl7v3::to_xml(root)?
    } else {
        hl7v3::to_xml_fragment(root)?
    };
    Ok(xml)
}
