//! Validated primitive types shared across the translation crates.
//!
//! - [`NonEmptyText`]: trimmed free text (notes, dosage text) guaranteed to contain something.
//! - [`NumericText`]: a decimal number carried as its original source text, so that clinical
//!   quantities are never re-rendered through a binary float.

use std::str::FromStr;

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input was not a valid decimal number
    #[error("invalid decimal number: {0}")]
    InvalidNumber(String),
}

/// A string type that guarantees non-empty content.
///
/// The input is trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText`, or `TextError::Empty` if nothing is left after trimming.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A decimal number kept in its original textual form.
///
/// FHIR `decimal`, `integer` and `positiveInt` values arrive as JSON numbers. Parsing them into
/// `f64` loses trailing zeros and can drift (`0.1 + 0.2`), which is unacceptable for dose
/// quantities. `NumericText` deserialises through `serde_json::Number` with the
/// `arbitrary_precision` feature enabled, so `2.50` stays `2.50` all the way to the output.
///
/// Comparisons such as [`NumericText::is_one`] are textual: `1.0` is not `1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumericText(String);

impl NumericText {
    /// Creates a `NumericText` after checking the input is a JSON-compatible number.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        serde_json::Number::from_str(trimmed)
            .map_err(|_| TextError::InvalidNumber(trimmed.to_owned()))?;
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the original decimal text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_one(&self) -> bool {
        self.0 == "1"
    }

    pub fn is_two(&self) -> bool {
        self.0 == "2"
    }

    /// Interprets the value as a non-negative integer, if it is written as one.
    pub fn as_u32(&self) -> Option<u32> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for NumericText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NumericText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<u32> for NumericText {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

impl serde::Serialize for NumericText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let number = serde_json::Number::from_str(&self.0).map_err(serde::ser::Error::custom)?;
        number.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for NumericText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let number = serde_json::Number::deserialize(deserializer)?;
        Ok(Self(number.to_string()))
    }
}
