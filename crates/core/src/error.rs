//! Structured error family for resolution, registry and encoding failures.
//!
//! Every error carries a stable code, a message, and an actionable hint and
//! suggestion so a caller can self-correct without inspecting internals.

use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::registry::EntityKind;

/// Maximum number of keys listed in a resolution hint.
pub const MAX_HINT_KEYS: usize = 10;

/// Failure resolving a short key, name or canonical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionCode {
    UnknownShortKey,
    InvalidKeyFormat,
    EntityNotFound,
    AmbiguousKey,
}

impl ResolutionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownShortKey => "UNKNOWN_SHORT_KEY",
            Self::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::AmbiguousKey => "AMBIGUOUS_KEY",
        }
    }
}

/// Failure building, refreshing or locating a session registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryCode {
    BuildFailed,
    Stale,
    SessionNotFound,
}

impl RegistryCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BuildFailed => "REGISTRY_BUILD_FAILED",
            Self::Stale => "REGISTRY_STALE",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
        }
    }
}

/// Failure turning a response into TOON text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingCode {
    InvalidSchema,
    FieldMismatch,
    UnsupportedType,
    EncodingFailed,
}

impl EncodingCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSchema => "INVALID_SCHEMA",
            Self::FieldMismatch => "FIELD_MISMATCH",
            Self::UnsupportedType => "UNSUPPORTED_TYPE",
            Self::EncodingFailed => "ENCODING_FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionError {
    pub code: ResolutionCode,
    pub message: String,
    pub hint: Option<String>,
    pub suggestion: Option<String>,
    pub cause: Option<String>,
    pub entity_type: EntityKind,
    pub short_key: String,
    pub available_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryError {
    pub code: RegistryCode,
    pub message: String,
    pub hint: Option<String>,
    pub suggestion: Option<String>,
    pub cause: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodingError {
    pub code: EncodingCode,
    pub message: String,
    pub hint: Option<String>,
    pub suggestion: Option<String>,
    pub cause: Option<String>,
    pub schema_name: Option<String>,
    pub field_name: Option<String>,
    pub row_index: Option<usize>,
}

/// Closed error family: one payload shape per kind.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToonError {
    #[error("{}: {}", .0.code.as_str(), .0.message)]
    Resolution(ResolutionError),
    #[error("{}: {}", .0.code.as_str(), .0.message)]
    Registry(RegistryError),
    #[error("{}: {}", .0.code.as_str(), .0.message)]
    Encoding(EncodingError),
}

fn key_hint(kind: EntityKind, keys: &[String]) -> String {
    if keys.is_empty() {
        format!("No {} keys are assigned in this session", kind.as_str())
    } else {
        format!("Available keys: {}", keys.join(", "))
    }
}

fn truncate_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    keys.into_iter().take(MAX_HINT_KEYS).map(Into::into).collect()
}

impl ToonError {
    /// A well-formed short key that was never assigned.
    pub fn unknown_short_key<I, S>(kind: EntityKind, short_key: &str, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let available_keys = truncate_keys(available);
        Self::Resolution(ResolutionError {
            code: ResolutionCode::UnknownShortKey,
            message: format!("Unknown {} key '{}'", kind.as_str(), short_key),
            hint: Some(key_hint(kind, &available_keys)),
            suggestion: Some(
                "Use a key from the lookup section, or refresh workspace metadata".to_string(),
            ),
            cause: None,
            entity_type: kind,
            short_key: short_key.to_string(),
            available_keys,
        })
    }

    /// A key that does not match the kind's `^{prefix}\d+$` shape.
    pub fn invalid_key_format<I, S>(kind: EntityKind, short_key: &str, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let available_keys = truncate_keys(available);
        Self::Resolution(ResolutionError {
            code: ResolutionCode::InvalidKeyFormat,
            message: format!(
                "'{}' is not a valid {} key (expected {}<number>)",
                short_key,
                kind.as_str(),
                kind.prefix()
            ),
            hint: Some(key_hint(kind, &available_keys)),
            suggestion: Some(format!(
                "Pass a {} key such as '{}0'",
                kind.as_str(),
                kind.prefix()
            )),
            cause: None,
            entity_type: kind,
            short_key: short_key.to_string(),
            available_keys,
        })
    }

    /// A resolved id that the upstream workspace no longer knows about.
    pub fn entity_not_found(kind: EntityKind, short_key: &str, canonical_id: &str) -> Self {
        Self::Resolution(ResolutionError {
            code: ResolutionCode::EntityNotFound,
            message: format!(
                "{} '{}' ({}) no longer exists in the workspace",
                kind.as_str(),
                short_key,
                canonical_id
            ),
            hint: Some("The session registry was built before this entity changed".to_string()),
            suggestion: Some("Refresh workspace metadata and retry".to_string()),
            cause: None,
            entity_type: kind,
            short_key: short_key.to_string(),
            available_keys: Vec::new(),
        })
    }

    /// A query that matches more than one entity.
    pub fn ambiguous_key<I, S>(kind: EntityKind, query: &str, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let available_keys = truncate_keys(candidates);
        Self::Resolution(ResolutionError {
            code: ResolutionCode::AmbiguousKey,
            message: format!("'{}' matches more than one {}", query, kind.as_str()),
            hint: Some(format!("Candidates: {}", available_keys.join(", "))),
            suggestion: Some("Pass the short key of the intended entity".to_string()),
            cause: None,
            entity_type: kind,
            short_key: query.to_string(),
            available_keys,
        })
    }

    pub fn registry_build_failed(session_id: &str, cause: impl std::fmt::Display) -> Self {
        Self::Registry(RegistryError {
            code: RegistryCode::BuildFailed,
            message: format!("Failed to build registry for session '{}'", session_id),
            hint: Some("Workspace metadata could not be fetched".to_string()),
            suggestion: Some("Check workspace connectivity and retry".to_string()),
            cause: Some(cause.to_string()),
            session_id: Some(session_id.to_string()),
        })
    }

    pub fn registry_stale(session_id: &str) -> Self {
        Self::Registry(RegistryError {
            code: RegistryCode::Stale,
            message: format!("Registry for session '{}' is stale", session_id),
            hint: Some("Short keys may no longer match workspace entities".to_string()),
            suggestion: Some("Refresh workspace metadata".to_string()),
            cause: None,
            session_id: Some(session_id.to_string()),
        })
    }

    pub fn session_not_found(session_id: &str) -> Self {
        Self::Registry(RegistryError {
            code: RegistryCode::SessionNotFound,
            message: format!("No registry has been built for session '{}'", session_id),
            hint: Some("Build the registry with get_or_build first".to_string()),
            suggestion: Some("Run any workspace query first to initialize the session".to_string()),
            cause: None,
            session_id: Some(session_id.to_string()),
        })
    }

    pub fn encoding(code: EncodingCode, message: impl Into<String>) -> Self {
        let suggestion = match code {
            EncodingCode::InvalidSchema => "Declare each field once with a non-empty name",
            EncodingCode::FieldMismatch => "Supply exactly the schema fields for every row",
            EncodingCode::UnsupportedType => "Flatten nested values before encoding",
            EncodingCode::EncodingFailed => "Use the JSON fallback for this response",
        };
        Self::Encoding(EncodingError {
            code,
            message: message.into(),
            hint: Some("Raised before any section was located".to_string()),
            suggestion: Some(suggestion.to_string()),
            cause: None,
            schema_name: None,
            field_name: None,
            row_index: None,
        })
    }

    /// Attach the section, field and row location to an encoding error.
    pub fn at(mut self, schema: &str, field: Option<&str>, row: Option<usize>) -> Self {
        if let Self::Encoding(ref mut e) = self {
            e.schema_name = Some(schema.to_string());
            if field.is_some() {
                e.field_name = field.map(str::to_string);
            }
            if row.is_some() {
                e.row_index = row;
            }
            e.hint = Some(match (e.field_name.as_deref(), e.row_index) {
                (Some(f), Some(r)) => format!("Section '{}', row {}, field '{}'", schema, r, f),
                (Some(f), None) => format!("Section '{}', field '{}'", schema, f),
                (None, Some(r)) => format!("Section '{}', row {}", schema, r),
                (None, None) => format!("Section '{}'", schema),
            });
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        let text = Some(cause.to_string());
        match self {
            Self::Resolution(ref mut e) => e.cause = text,
            Self::Registry(ref mut e) => e.cause = text,
            Self::Encoding(ref mut e) => e.cause = text,
        }
        self
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolution(e) => e.code.as_str(),
            Self::Registry(e) => e.code.as_str(),
            Self::Encoding(e) => e.code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Resolution(e) => &e.message,
            Self::Registry(e) => &e.message,
            Self::Encoding(e) => &e.message,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Resolution(e) => e.hint.as_deref(),
            Self::Registry(e) => e.hint.as_deref(),
            Self::Encoding(e) => e.hint.as_deref(),
        }
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Resolution(e) => e.suggestion.as_deref(),
            Self::Registry(e) => e.suggestion.as_deref(),
            Self::Encoding(e) => e.suggestion.as_deref(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "ResolutionError",
            Self::Registry(_) => "RegistryError",
            Self::Encoding(_) => "EncodingError",
        }
    }

    /// Structured JSON projection shared by all kinds.
    pub fn to_json(&self) -> Value {
        let (cause, extra) = match self {
            Self::Resolution(e) => (
                e.cause.as_deref(),
                json!({
                    "entityType": e.entity_type.as_str(),
                    "shortKey": e.short_key,
                    "availableKeys": e.available_keys,
                }),
            ),
            Self::Registry(e) => (e.cause.as_deref(), json!({ "sessionId": e.session_id })),
            Self::Encoding(e) => (
                e.cause.as_deref(),
                json!({
                    "schemaName": e.schema_name,
                    "fieldName": e.field_name,
                    "rowIndex": e.row_index,
                }),
            ),
        };

        let mut out = Map::new();
        out.insert("error".into(), Value::from(self.kind_name()));
        out.insert("code".into(), Value::from(self.code()));
        out.insert("message".into(), Value::from(self.message()));
        out.insert("hint".into(), self.hint().map_or(Value::Null, Value::from));
        out.insert("suggestion".into(), self.suggestion().map_or(Value::Null, Value::from));
        out.insert("cause".into(), cause.map_or(Value::Null, Value::from));
        if let Value::Object(fields) = extra {
            out.extend(fields);
        }
        Value::Object(out)
    }
}
