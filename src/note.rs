//! Note record, event-path payload, and validation.

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::types::NoteId;

/// Rejection raised before any store or bus call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// `id` was absent or blank.
    #[error("note id is required")]
    MissingId,
    /// `name` was absent.
    #[error("note {0:?} has no name")]
    MissingName(NoteId),
    /// `completed` was absent.
    #[error("note {0:?} has no completed flag")]
    MissingCompleted(NoteId),
    /// `completed` was not a boolean literal.
    #[error("note {id:?} has invalid completed flag {value:?}")]
    InvalidCompleted {
        /// Offending note.
        id: NoteId,
        /// Raw text received.
        value: String,
    },
    /// The event detail was not an object of the expected shape.
    #[error("malformed note payload: {0}")]
    Malformed(String),
}

/// A stored note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    /// Client-assigned, immutable primary key.
    pub id: NoteId,
    /// Free-form text.
    pub name: String,
    /// Completion flag; accepts `true`/`false` or their string forms on input.
    #[serde(deserialize_with = "deserialize_completed")]
    pub completed: bool,
}

impl NoteRecord {
    /// Builds a record from its parts.
    pub fn new(id: impl Into<NoteId>, name: impl Into<String>, completed: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed,
        }
    }

    /// Rejects records whose `id` cannot address the store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingId);
        }
        Ok(())
    }
}

/// String-typed payload carried in the `detail` of a note event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoteDetail {
    /// Note id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Note name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Completion flag encoded as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<String>,
}

impl NoteDetail {
    /// Builds a fully-populated detail.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        completed: impl Into<String>,
    ) -> Self {
        Self {
            id: Some(id.into()),
            name: Some(name.into()),
            completed: Some(completed.into()),
        }
    }

    /// Decodes a detail from the raw event payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ValidationError> {
        if !value.is_object() {
            return Err(ValidationError::Malformed(format!(
                "expected object, got {value}"
            )));
        }
        serde_json::from_value(value.clone()).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Validates presence of every field and converts to a [`NoteRecord`].
    pub fn into_record(self) -> Result<NoteRecord, ValidationError> {
        let id = match self.id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(ValidationError::MissingId),
        };
        let Some(name) = self.name else {
            return Err(ValidationError::MissingName(id));
        };
        let Some(raw) = self.completed else {
            return Err(ValidationError::MissingCompleted(id));
        };
        let Some(completed) = parse_completed(&raw) else {
            return Err(ValidationError::InvalidCompleted { id, value: raw });
        };
        Ok(NoteRecord { id, name, completed })
    }
}

impl From<&NoteRecord> for NoteDetail {
    fn from(rec: &NoteRecord) -> Self {
        Self::new(rec.id.clone(), rec.name.clone(), rec.completed.to_string())
    }
}

/// Parses the text encoding of the completion flag.
pub fn parse_completed(raw: &str) -> Option<bool> {
    match raw.trim() {
        s if s.eq_ignore_ascii_case("true") => Some(true),
        s if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn deserialize_completed<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => parse_completed(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid completed flag {s:?}"))),
    }
}
