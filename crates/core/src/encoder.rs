//! TOON encoder: renders a [`ToonResponse`] into compact line-oriented text.
//!
//! Output layout:
//!
//! ```text
//! _meta{total,hasMore}:
//!   2,false
//! _users[2]{key,name,email}:
//!   u0,Alice,alice@x.com
//!   u1,Bob,bob@x.com
//! issues[1]{identifier,title,assignee,priority}:
//!   SQT-1,Fix bug,u0,p2
//! ```
//!
//! Failures never escape as panics: [`ToonEncoder::encode`] returns a
//! structured [`ToonError`], and [`ToonEncoder::encode_or_fallback`] turns it
//! into a lossless JSON fallback carrying the untransformed response.

use std::collections::HashMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::autolink::AutoLinker;
use crate::error::{EncodingCode, ToonError};
use crate::format::{format_scalar_text, format_value};
use crate::helpers::escape_value;
use crate::registry::ShortKeyRegistry;
use crate::schema::{FieldClass, ToonMeta, ToonResponse, ToonRow, ToonSchema, ToonSection, LOOKUP_PREFIX};
use crate::{
    DEFAULT_DESCRIPTION_LIMIT, DEFAULT_INDENT, DEFAULT_OTHER_LIMIT, DEFAULT_TITLE_LIMIT,
    DEFAULT_TRUNCATION_INDICATOR,
};

const META_SECTION: &str = "_meta";

/// Maximum characters per text class. Zero disables truncation for a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TruncationLimits {
    pub title: usize,
    pub description: usize,
    pub other: usize,
}

impl Default for TruncationLimits {
    fn default() -> Self {
        Self {
            title: DEFAULT_TITLE_LIMIT,
            description: DEFAULT_DESCRIPTION_LIMIT,
            other: DEFAULT_OTHER_LIMIT,
        }
    }
}

impl TruncationLimits {
    pub fn limit_for(&self, class: FieldClass) -> usize {
        match class {
            FieldClass::Title => self.title,
            FieldClass::Description => self.description,
            _ => self.other,
        }
    }
}

/// Configuration for the encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToonEncodingOptions {
    pub indent: String,
    /// Render sections with no rows as a bare header instead of omitting them.
    pub include_empty_sections: bool,
    pub truncation: TruncationLimits,
    pub truncation_indicator: String,
    /// Project slug id -> project short key.
    pub project_slugs: Option<HashMap<String, String>>,
}

impl Default for ToonEncodingOptions {
    fn default() -> Self {
        Self {
            indent: DEFAULT_INDENT.to_string(),
            include_empty_sections: false,
            truncation: TruncationLimits::default(),
            truncation_indicator: DEFAULT_TRUNCATION_INDICATOR.to_string(),
            project_slugs: None,
        }
    }
}

/// Lossless replacement for a response that could not be encoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackResponse {
    #[serde(rename = "_fallback")]
    pub fallback: bool,
    pub reason: String,
    pub error: Value,
    pub data: ToonResponse,
}

impl FallbackResponse {
    pub fn new(error: &ToonError, data: ToonResponse) -> Self {
        Self {
            fallback: true,
            reason: error.to_string(),
            error: error.to_json(),
            data,
        }
    }
}

/// Encoder output: TOON text, or the JSON fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum ToonOutput {
    Toon(String),
    Fallback(FallbackResponse),
}

impl ToonOutput {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }

    /// Text sent to the model.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Toon(text) => Ok(text.clone()),
            Self::Fallback(fallback) => serde_json::to_string(fallback),
        }
    }
}

fn fmt_failed(err: std::fmt::Error) -> ToonError {
    ToonError::encoding(EncodingCode::EncodingFailed, "Failed to write encoder output").with_cause(err)
}

/// Renders responses using one set of options and, optionally, an auto-linker
/// applied to description-class fields.
#[derive(Debug, Clone, Default)]
pub struct ToonEncoder {
    options: ToonEncodingOptions,
    linker: Option<AutoLinker>,
}

impl ToonEncoder {
    pub fn new(options: ToonEncodingOptions) -> Self {
        Self {
            options,
            linker: None,
        }
    }

    /// Encoder wired to a session registry: project slugs map to short keys
    /// and issue identifiers in descriptions are auto-linked.
    pub fn for_registry(mut options: ToonEncodingOptions, registry: &ShortKeyRegistry) -> Self {
        if options.project_slugs.is_none() {
            options.project_slugs = Some(registry.project_slugs().clone());
        }
        Self {
            options,
            linker: Some(AutoLinker::from_registry(registry)),
        }
    }

    pub fn with_auto_linker(mut self, linker: AutoLinker) -> Self {
        self.linker = Some(linker);
        self
    }

    pub fn options(&self) -> &ToonEncodingOptions {
        &self.options
    }

    /// Encode a response into TOON text.
    pub fn encode(&self, response: &ToonResponse) -> Result<String, ToonError> {
        let mut out = String::new();

        if let Some(meta) = &response.meta {
            self.encode_meta(meta, &mut out)?;
        }
        for section in &response.lookups {
            let name = if section.is_lookup() {
                section.schema.name.clone()
            } else {
                format!("{}{}", LOOKUP_PREFIX, section.schema.name)
            };
            self.encode_section(&name, section, &mut out)?;
        }
        for section in &response.data {
            self.encode_section(&section.schema.name, section, &mut out)?;
        }

        // Drop the trailing newline of the last line
        if out.ends_with('\n') {
            out.pop();
        }
        Ok(out)
    }

    /// Encode, or fall back to the untransformed response on any failure.
    pub fn encode_or_fallback(&self, response: &ToonResponse) -> ToonOutput {
        match self.encode(response) {
            Ok(text) => ToonOutput::Toon(text),
            Err(err) => {
                warn!(code = err.code(), "TOON encoding failed, using JSON fallback: {}", err);
                ToonOutput::Fallback(FallbackResponse::new(&err, response.clone()))
            }
        }
    }

    fn encode_meta(&self, meta: &ToonMeta, out: &mut String) -> Result<(), ToonError> {
        if meta.fields.is_empty() && meta.values.is_empty() {
            return Ok(());
        }
        let schema = ToonSchema::new(META_SECTION, meta.fields.iter().cloned());
        schema.validate()?;
        if let Some(extra) = meta.values.keys().find(|k| !meta.fields.contains(k)) {
            return Err(ToonError::encoding(
                EncodingCode::FieldMismatch,
                format!("Metadata value '{}' is not a declared field", extra),
            )
            .at(META_SECTION, Some(extra.as_str()), None));
        }

        writeln!(out, "{}{{{}}}:", META_SECTION, meta.fields.join(",")).map_err(fmt_failed)?;
        let mut cells = Vec::with_capacity(meta.fields.len());
        for field in &meta.fields {
            let value = meta.values.get(field).unwrap_or(&Value::Null);
            let cell = self
                .render_cell(&schema, field, value)
                .map_err(|e| e.at(META_SECTION, Some(field.as_str()), None))?;
            cells.push(cell);
        }
        writeln!(out, "{}{}", self.options.indent, cells.join(",")).map_err(fmt_failed)
    }

    fn encode_section(
        &self,
        name: &str,
        section: &ToonSection,
        out: &mut String,
    ) -> Result<(), ToonError> {
        let schema = &section.schema;
        schema.validate()?;
        if name.is_empty() || name.contains([',', '{', '}', '[', ']', ':', '\n']) {
            return Err(ToonError::encoding(
                EncodingCode::InvalidSchema,
                format!("Invalid section name '{}'", name),
            )
            .at(name, None, None));
        }

        if section.items.is_empty() && !self.options.include_empty_sections {
            debug!(section = name, "omitting empty section");
            return Ok(());
        }

        writeln!(
            out,
            "{}[{}]{{{}}}:",
            name,
            section.items.len(),
            schema.fields.join(",")
        )
        .map_err(fmt_failed)?;

        for (idx, row) in section.items.iter().enumerate() {
            let line = self
                .encode_row(schema, row)
                .map_err(|e| e.at(name, None, Some(idx)))?;
            writeln!(out, "{}{}", self.options.indent, line).map_err(fmt_failed)?;
        }
        Ok(())
    }

    fn encode_row(&self, schema: &ToonSchema, row: &ToonRow) -> Result<String, ToonError> {
        if let Some(extra) = row.keys().find(|k| !schema.fields.contains(k)) {
            return Err(ToonError::encoding(
                EncodingCode::FieldMismatch,
                format!("Row has undeclared field '{}'", extra),
            )
            .at(&schema.name, Some(extra.as_str()), None));
        }

        let mut cells = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            let value = row.get(field).ok_or_else(|| {
                ToonError::encoding(
                    EncodingCode::FieldMismatch,
                    format!("Row is missing declared field '{}'", field),
                )
                .at(&schema.name, Some(field.as_str()), None)
            })?;
            let cell = self
                .render_cell(schema, field, value)
                .map_err(|e| e.at(&schema.name, Some(field.as_str()), None))?;
            cells.push(cell);
        }
        Ok(cells.join(","))
    }

    fn render_cell(&self, schema: &ToonSchema, field: &str, value: &Value) -> Result<String, ToonError> {
        let class = schema.class_of(field);
        let text = match (&self.linker, class) {
            (Some(linker), FieldClass::Description) => {
                let raw = format_scalar_text(class, value)?;
                let cut = linker.truncate(
                    &raw,
                    self.options.truncation.limit_for(class),
                    &self.options.truncation_indicator,
                );
                linker.link(&cut).into_owned()
            }
            _ => format_value(class, value, &self.options)?,
        };
        Ok(escape_value(&text).into_owned())
    }
}

/// Encode with default options and no registry.
pub fn encode_toon(response: &ToonResponse, options: &ToonEncodingOptions) -> Result<String, ToonError> {
    ToonEncoder::new(options.clone()).encode(response)
}
