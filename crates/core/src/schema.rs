//! Schema-driven response model rendered by the encoder.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EncodingCode, ToonError};

/// Name prefix that marks a section as a lookup table.
pub const LOOKUP_PREFIX: char = '_';

/// How a field's value is formatted and truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClass {
    Title,
    Description,
    Text,
    Priority,
    Estimate,
    Cycle,
    /// Calendar date, rendered `YYYY-MM-DD`.
    Date,
    /// Full timestamp, rendered as supplied.
    Timestamp,
    Boolean,
    Progress,
    Number,
    /// Project slug, rendered as the project's short key when known.
    Project,
}

impl FieldClass {
    /// Default class for a field name.
    pub fn infer(field: &str) -> Self {
        match field {
            "title" => Self::Title,
            "description" | "body" | "content" | "summary" => Self::Description,
            "priority" => Self::Priority,
            "estimate" => Self::Estimate,
            "cycle" | "cycleNumber" => Self::Cycle,
            "dueDate" | "targetDate" | "startDate" | "startsAt" | "endsAt" => Self::Date,
            "createdAt" | "updatedAt" | "completedAt" | "canceledAt" | "archivedAt"
            | "startedAt" => Self::Timestamp,
            "progress" => Self::Progress,
            "project" => Self::Project,
            _ => Self::Text,
        }
    }
}

/// Section name plus ordered field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToonSchema {
    pub name: String,
    pub fields: Vec<String>,
    /// Per-field overrides of the inferred class.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub classes: BTreeMap<String, FieldClass>,
}

impl ToonSchema {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            classes: BTreeMap::new(),
        }
    }

    pub fn with_class(mut self, field: impl Into<String>, class: FieldClass) -> Self {
        self.classes.insert(field.into(), class);
        self
    }

    pub fn class_of(&self, field: &str) -> FieldClass {
        self.classes
            .get(field)
            .copied()
            .unwrap_or_else(|| FieldClass::infer(field))
    }

    /// Check that the schema can be rendered: named, with unique, non-empty,
    /// header-safe field names.
    pub fn validate(&self) -> Result<(), ToonError> {
        if self.name.is_empty() || self.name.contains(is_header_meta) {
            return Err(ToonError::encoding(
                EncodingCode::InvalidSchema,
                format!("Invalid section name '{}'", self.name),
            )
            .at(&self.name, None, None));
        }
        if self.fields.is_empty() {
            return Err(ToonError::encoding(
                EncodingCode::InvalidSchema,
                format!("Section '{}' declares no fields", self.name),
            )
            .at(&self.name, None, None));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.is_empty() || field.contains(is_header_meta) {
                return Err(ToonError::encoding(
                    EncodingCode::InvalidSchema,
                    format!("Invalid field name '{}'", field),
                )
                .at(&self.name, Some(field.as_str()), None));
            }
            if !seen.insert(field.as_str()) {
                return Err(ToonError::encoding(
                    EncodingCode::InvalidSchema,
                    format!("Field '{}' is declared twice", field),
                )
                .at(&self.name, Some(field.as_str()), None));
            }
        }
        for field in self.classes.keys() {
            if !seen.contains(field.as_str()) {
                return Err(ToonError::encoding(
                    EncodingCode::InvalidSchema,
                    format!("Class override for undeclared field '{}'", field),
                )
                .at(&self.name, Some(field.as_str()), None));
            }
        }
        Ok(())
    }
}

fn is_header_meta(c: char) -> bool {
    matches!(c, ',' | '{' | '}' | '[' | ']' | ':' | '\n' | '\r')
}

/// Row data keyed by field name.
pub type ToonRow = Map<String, Value>;

/// A schema plus its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToonSection {
    pub schema: ToonSchema,
    #[serde(default)]
    pub items: Vec<ToonRow>,
}

impl ToonSection {
    pub fn new(schema: ToonSchema, items: Vec<ToonRow>) -> Self {
        Self { schema, items }
    }

    pub fn is_lookup(&self) -> bool {
        self.schema.name.starts_with(LOOKUP_PREFIX)
    }
}

/// Response-level metadata, always rendered first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToonMeta {
    pub fields: Vec<String>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl ToonMeta {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            values: Map::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(field.into(), value.into());
        self
    }
}

/// A complete structured response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToonResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ToonMeta>,
    #[serde(default)]
    pub lookups: Vec<ToonSection>,
    #[serde(default)]
    pub data: Vec<ToonSection>,
}

impl ToonResponse {
    pub fn with_meta(mut self, meta: ToonMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_lookup(mut self, section: ToonSection) -> Self {
        self.lookups.push(section);
        self
    }

    pub fn with_data(mut self, section: ToonSection) -> Self {
        self.data.push(section);
        self
    }
}
