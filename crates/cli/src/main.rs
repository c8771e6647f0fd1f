//! CLI tool for encoding workspace responses into TOON.
//!
//! Reads a workspace snapshot (`RegistryBuildData` JSON) and a structured
//! response JSON, then prints the TOON encoding to stdout. Logs go to stderr
//! and are controlled with `RUST_LOG`.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use toon_serializer_core::{
    AutoLinker, EntityKind, RegistryBuildData, RegistryFetcher, RegistryStore, RegistryStoreConfig,
    ToonEncoder, ToonEncodingOptions, ToonResponse, TruncationLimits, DEFAULT_DESCRIPTION_LIMIT,
    DEFAULT_HOST, DEFAULT_OTHER_LIMIT, DEFAULT_TITLE_LIMIT, DEFAULT_TRUNCATION_INDICATOR,
};

const CLI_SESSION: &str = "cli";

/// Encode workspace responses into TOON.
#[derive(Parser, Debug)]
#[command(name = "toon-serialize")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace snapshot JSON used to build the short-key registry
    #[arg(long)]
    registry: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode a response JSON file
    Encode {
        /// Response JSON ({meta, lookups, data})
        #[arg(long)]
        response: PathBuf,

        /// Maximum characters for title fields (0 disables truncation)
        #[arg(long, default_value_t = DEFAULT_TITLE_LIMIT)]
        title_limit: usize,

        /// Maximum characters for description fields (0 disables truncation)
        #[arg(long, default_value_t = DEFAULT_DESCRIPTION_LIMIT)]
        description_limit: usize,

        /// Maximum characters for other text fields (0 disables truncation)
        #[arg(long, default_value_t = DEFAULT_OTHER_LIMIT)]
        other_limit: usize,

        /// Suffix appended to truncated text
        #[arg(long, default_value = DEFAULT_TRUNCATION_INDICATOR)]
        truncation_indicator: String,

        /// Render sections that have no rows
        #[arg(long)]
        include_empty_sections: bool,

        /// Prepend user, state, project and team lookup sections from the registry
        #[arg(long)]
        with_lookups: bool,

        /// Host used for auto-linked issue URLs
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
    },
    /// Resolve a short key to its canonical id
    Resolve {
        /// Entity kind: user, state, project or team
        #[arg(long)]
        kind: String,

        /// Short key (u0, s3, pr1) or team key
        key: String,
    },
}

/// Serves the snapshot file as the workspace for every session.
struct SnapshotFile {
    path: PathBuf,
}

impl RegistryFetcher for SnapshotFile {
    fn fetch(
        &self,
        _session_id: &str,
    ) -> Result<RegistryBuildData, Box<dyn std::error::Error + Send + Sync>> {
        RegistryBuildData::from_path(&self.path)
    }
}

fn parse_kind(kind: &str) -> Result<EntityKind, Box<dyn std::error::Error>> {
    match kind.to_lowercase().as_str() {
        "user" | "u" => Ok(EntityKind::User),
        "state" | "s" => Ok(EntityKind::State),
        "project" | "pr" => Ok(EntityKind::Project),
        "team" => Ok(EntityKind::Team),
        other => Err(format!("Unknown entity kind '{}'", other).into()),
    }
}

fn read_response(path: &Path) -> Result<ToonResponse, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let store = RegistryStore::new(
        SnapshotFile {
            path: args.registry.clone(),
        },
        RegistryStoreConfig::default(),
    );
    info!("Loading workspace snapshot from {:?}", args.registry);
    let registry = store.get_or_build(CLI_SESSION)?;

    match args.command {
        Command::Encode {
            response,
            title_limit,
            description_limit,
            other_limit,
            truncation_indicator,
            include_empty_sections,
            with_lookups,
            host,
        } => {
            let mut response = read_response(&response)?;
            if with_lookups {
                let mut lookups: Vec<_> = [
                    EntityKind::User,
                    EntityKind::State,
                    EntityKind::Project,
                    EntityKind::Team,
                ]
                .into_iter()
                .map(|kind| registry.lookup_section(kind))
                .collect();
                lookups.append(&mut response.lookups);
                response.lookups = lookups;
            }

            let options = ToonEncodingOptions {
                include_empty_sections,
                truncation: TruncationLimits {
                    title: title_limit,
                    description: description_limit,
                    other: other_limit,
                },
                truncation_indicator,
                ..Default::default()
            };
            let linker = AutoLinker::from_registry(&registry).with_host(host);
            let encoder = ToonEncoder::for_registry(options, &registry).with_auto_linker(linker);

            let output = encoder.encode_or_fallback(&response);
            if output.is_fallback() {
                info!("Response could not be encoded as TOON; emitting JSON fallback");
            }
            println!("{}", output.render()?);
        }
        Command::Resolve { kind, key } => {
            let kind = parse_kind(&kind)?;
            match registry.resolve(kind, &key) {
                Ok(id) => println!("{}", id),
                Err(err) => {
                    println!("{}", serde_json::to_string_pretty(&err.to_json())?);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
