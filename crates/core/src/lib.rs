//! Core serialization logic for workspace entities.
//!
//! This crate turns workspace responses (issues, users, teams, states,
//! projects, cycles) into TOON, a compact line-oriented text encoding meant
//! for language models. It provides the session-scoped `ShortKeyRegistry`
//! that maps canonical ids to short keys, the `ToonEncoder`, and the
//! `AutoLinker` that rewrites bare issue identifiers in free text.

use std::time::Duration;

/// Trait for supplying workspace snapshots to the registry.
///
/// Implementors fetch users, states, projects and teams for a session from
/// the upstream workspace. Timeouts and cancellation belong to the fetcher.
pub trait RegistryFetcher {
    /// Fetch a fresh snapshot for the given session.
    fn fetch(
        &self,
        session_id: &str,
    ) -> Result<RegistryBuildData, Box<dyn std::error::Error + Send + Sync>>;
}

// Blanket implementation for references to RegistryFetchers
impl<T: RegistryFetcher + ?Sized> RegistryFetcher for &T {
    fn fetch(
        &self,
        session_id: &str,
    ) -> Result<RegistryBuildData, Box<dyn std::error::Error + Send + Sync>> {
        (*self).fetch(session_id)
    }
}

mod autolink;
mod encoder;
mod error;
mod format;
mod helpers;
mod registry;
mod schema;
mod session;

pub use autolink::AutoLinker;
pub use encoder::{
    encode_toon, FallbackResponse, ToonEncoder, ToonEncodingOptions, ToonOutput, TruncationLimits,
};
pub use error::{
    EncodingCode, EncodingError, RegistryCode, RegistryError, ResolutionCode, ResolutionError,
    ToonError, MAX_HINT_KEYS,
};
pub use format::{class_prefix, decode_prefixed, format_value};
pub use helpers::{escape_value, truncate_with_indicator};
pub use registry::{
    EntityKind, ProjectSnapshot, RegistryBuildData, ShortKeyRegistry, StateSnapshot, TeamSnapshot,
    UserSnapshot,
};
pub use schema::{FieldClass, ToonMeta, ToonResponse, ToonRow, ToonSchema, ToonSection};
pub use session::{RegistryStore, RegistryStoreConfig};

/// Default host for issue URLs
pub const DEFAULT_HOST: &str = "linear.app";

/// Default row indent
pub const DEFAULT_INDENT: &str = "  ";

/// Default maximum characters for title fields
pub const DEFAULT_TITLE_LIMIT: usize = 500;

/// Default maximum characters for description fields
pub const DEFAULT_DESCRIPTION_LIMIT: usize = 3000;

/// Default maximum characters for other text fields
pub const DEFAULT_OTHER_LIMIT: usize = 1000;

/// Appended to truncated text
pub const DEFAULT_TRUNCATION_INDICATOR: &str = "...";

/// Default lifetime of a session registry
pub const DEFAULT_REGISTRY_TTL: Duration = Duration::from_secs(30 * 60);
