//! HL7 V3 wire/boundary support.
//!
//! This crate models the target side of the translation as a plain ordered tree:
//! - [`element`]: the attribute-bearing node type and its value-style builders
//! - [`vocab`]: the closed RIM vocabularies (`classCode`, `moodCode`, `typeCode`, ...) and the
//!   act-relationship/participation wrapper
//! - [`codes`]: OIDs, coded values and identifier helpers used by the EPS message set
//! - [`serializer`]: XML writing, reading and canonicalisation
//!
//! Message semantics (which slot holds what) live in `eps-core`. This crate handles structure
//! and text only.

pub mod codes;
pub mod element;
pub mod serializer;
pub mod vocab;

pub use element::{Element, Node};
pub use serializer::{canonicalize, parse, to_xml, to_xml_fragment};

use thiserror::Error;

/// Errors returned by the `hl7v3` boundary crate.
#[derive(Debug, Error)]
pub enum Hl7v3Error {
    #[error("failed to write XML: {0}")]
    Write(String),

    #[error("invalid XML: {0}")]
    InvalidXml(#[from] roxmltree::Error),

    #[error("invalid document structure: {0}")]
    InvalidStructure(String),
}

/// Type alias for Results that can fail with an [`Hl7v3Error`].
pub type Hl7v3Result<T> = Result<T, Hl7v3Error>;
