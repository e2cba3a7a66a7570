//! Outbound translation: FHIR resources to HL7 V3 message payloads.
//!
//! Each message type has its own module with a single crate-visible builder. The remaining
//! modules hold the participations and small node builders the messages share.

pub(crate) mod agent_person;
pub(crate) mod cancellation;
pub(crate) mod claim;
pub(crate) mod common;
pub(crate) mod demographics;
pub(crate) mod dispense;
pub(crate) mod line_item;
pub(crate) mod organisation;
pub(crate) mod patient;
pub(crate) mod prescription;
pub(crate) mod release;
pub(crate) mod withdraw;

pub use release::ReleaseKind;
