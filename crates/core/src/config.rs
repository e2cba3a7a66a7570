//! Translator runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into every build function.
//! Translation never reads process-wide environment variables, so concurrent translations and
//! test harnesses see the same settings for the life of a call.

use crate::constants::DEFAULT_MAX_REFERENCE_DEPTH;
use crate::{TranslationError, TranslationResult};

/// Translator configuration resolved at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslatorConfig {
    max_reference_depth: usize,
    render_missing_dosage_text: bool,
    xml_declaration: bool,
}

impl TranslatorConfig {
    /// Create a new `TranslatorConfig`.
    pub fn new(
        max_reference_depth: usize,
        render_missing_dosage_text: bool,
        xml_declaration: bool,
    ) -> TranslationResult<Self> {
        if max_reference_depth == 0 {
            return Err(TranslationError::invalid(
                "EPS_MAX_REFERENCE_DEPTH",
                "max_reference_depth must be at least 1",
            ));
        }

        Ok(Self {
            max_reference_depth,
            render_missing_dosage_text,
            xml_declaration,
        })
    }

    /// Longest `partOf` chain followed before giving up.
    pub fn max_reference_depth(&self) -> usize {
        self.max_reference_depth
    }

    /// Whether a line item without `dosageInstruction.text` gets rendered text instead of an
    /// error.
    pub fn render_missing_dosage_text(&self) -> bool {
        self.render_missing_dosage_text
    }

    pub fn xml_declaration(&self) -> bool {
        self.xml_declaration
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            max_reference_depth: DEFAULT_MAX_REFERENCE_DEPTH,
            render_missing_dosage_text: false,
            xml_declaration: true,
        }
    }
}

/// Parse `EPS_MAX_REFERENCE_DEPTH`; unset or blank means the default.
pub fn max_reference_depth_from_env_value(value: Option<String>) -> TranslationResult<usize> {
    let value = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let parsed = value
        .map(|v| {
            v.parse::<usize>().map_err(|_| {
                TranslationError::invalid(
                    "EPS_MAX_REFERENCE_DEPTH",
                    format!("'{v}' is not a positive integer"),
                )
            })
        })
        .transpose()?;

    Ok(parsed.unwrap_or(DEFAULT_MAX_REFERENCE_DEPTH))
}

/// Parse a boolean flag such as `EPS_RENDER_MISSING_DOSAGE_TEXT`.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case; unset or blank yields
/// `default`.
pub fn flag_from_env_value(
    name: &str,
    value: Option<String>,
    default: bool,
) -> TranslationResult<bool> {
    let value = value
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty());

    match value.as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(other) => Err(TranslationError::invalid(
            name,
            format!("'{other}' is not a boolean"),
        )),
    }
}
