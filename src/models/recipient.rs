//! Validated notification recipient identifiers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Raw `recipient_id` value as stored, before validation.
///
/// The entity table leaves `recipient_id` untyped so rows written by other
/// tools may carry any `SQLite` storage class.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecipient {
    /// Column is NULL.
    Missing,
    /// Column holds an INTEGER (e.g. a Telegram chat id).
    Integer(i64),
    /// Column holds TEXT.
    Text(String),
    /// Column holds a REAL or BLOB; carries the storage class name.
    Unsupported(String),
}

/// Reason a raw recipient was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedRecipient {
    /// Value is NULL.
    Missing,
    /// Text value is empty or whitespace only.
    Empty,
    /// Text value contains whitespace or control characters.
    InvalidCharacters,
    /// Storage class cannot identify a recipient.
    UnsupportedType(String),
}

impl Display for MalformedRecipient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "recipient_id is null"),
            Self::Empty => write!(f, "recipient_id is empty"),
            Self::InvalidCharacters => {
                write!(f, "recipient_id contains whitespace or control characters")
            }
            Self::UnsupportedType(kind) => write!(f, "recipient_id has unsupported type {kind}"),
        }
    }
}

/// A well-formed, channel-specific recipient identifier.
///
/// Integers are canonicalised to their decimal text so that the same chat
/// stored as `42` or `'42'` maps to one ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(String);

impl RecipientId {
    /// Validate a raw stored value.
    ///
    /// # Errors
    ///
    /// Returns the [`MalformedRecipient`] reason when the value cannot
    /// identify a recipient.
    pub fn from_raw(raw: &RawRecipient) -> std::result::Result<Self, MalformedRecipient> {
        match raw {
            RawRecipient::Missing => Err(MalformedRecipient::Missing),
            RawRecipient::Integer(value) => Ok(Self(value.to_string())),
            RawRecipient::Text(text) => Self::parse(text),
            RawRecipient::Unsupported(kind) => {
                Err(MalformedRecipient::UnsupportedType(kind.clone()))
            }
        }
    }

    /// Validate a textual identifier.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedRecipient::Empty`] or
    /// [`MalformedRecipient::InvalidCharacters`].
    pub fn parse(text: &str) -> std::result::Result<Self, MalformedRecipient> {
        if text.trim().is_empty() {
            return Err(MalformedRecipient::Empty);
        }
        if text.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(MalformedRecipient::InvalidCharacters);
        }
        Ok(Self(text.to_owned()))
    }

    /// Identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form, when the identifier is a decimal integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl From<i64> for RecipientId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl Display for RecipientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
