//! Session-scoped short-key registry.
//!
//! Assigns small stable keys (`u0`, `s3`, `pr1`) to workspace entities and
//! resolves them back to canonical ids. Keys follow creation order, with the
//! canonical id as tie-break, so the same snapshot always yields the same keys.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ToonError;
use crate::schema::{ToonRow, ToonSchema, ToonSection};

static USER_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^u\d+$").unwrap());
static STATE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^s\d+$").unwrap());
static PROJECT_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^pr\d+$").unwrap());

/// Kinds of entity tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    State,
    Project,
    /// Teams are addressed by their own team key rather than a short key.
    Team,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::State => "state",
            Self::Project => "project",
            Self::Team => "team",
        }
    }

    /// Short-key prefix; empty for teams.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::User => "u",
            Self::State => "s",
            Self::Project => "pr",
            Self::Team => "",
        }
    }

    fn key_pattern(&self) -> Option<&'static Regex> {
        match self {
            Self::User => Some(&*USER_KEY_RE),
            Self::State => Some(&*STATE_KEY_RE),
            Self::Project => Some(&*PROJECT_KEY_RE),
            Self::Team => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything the registry can order and key.
trait Snapshot {
    fn id(&self) -> &str;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub state_type: Option<String>,
    #[serde(default)]
    pub team_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub slug_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamSnapshot {
    pub id: String,
    pub key: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

macro_rules! impl_snapshot {
    ($($ty:ty),*) => {
        $(impl Snapshot for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        })*
    };
}

impl_snapshot!(UserSnapshot, StateSnapshot, ProjectSnapshot, TeamSnapshot);

/// Raw workspace snapshot consumed by [`ShortKeyRegistry::build`].
///
/// Ids must be unique within each kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryBuildData {
    #[serde(default)]
    pub users: Vec<UserSnapshot>,
    #[serde(default)]
    pub states: Vec<StateSnapshot>,
    #[serde(default)]
    pub projects: Vec<ProjectSnapshot>,
    #[serde(default)]
    pub teams: Vec<TeamSnapshot>,
    pub workspace_id: String,
    pub url_key: String,
    #[serde(default)]
    pub default_team_id: Option<String>,
}

impl RegistryBuildData {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_path(path: &Path) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }
}

/// Bidirectional short key <-> canonical id table for one kind.
#[derive(Debug, Clone, Default)]
struct KeyTable {
    forward: HashMap<String, String>,
    backward: HashMap<String, String>,
    /// Short keys in assignment order.
    order: Vec<String>,
}

impl KeyTable {
    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Sort by creation time ascending, then canonical id.
fn sorted_by_creation<T: Snapshot + Clone>(items: &[T]) -> Vec<T> {
    let mut sorted = items.to_vec();
    sorted.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
    sorted
}

fn assign_keys<T: Snapshot>(prefix: &str, sorted: &[T]) -> KeyTable {
    let mut table = KeyTable::default();
    for (idx, item) in sorted.iter().enumerate() {
        let key = format!("{}{}", prefix, idx);
        table.forward.insert(key.clone(), item.id().to_string());
        table.backward.insert(item.id().to_string(), key.clone());
        table.order.push(key);
    }
    table
}

/// Immutable per-session mapping between short keys and canonical ids.
#[derive(Debug, Clone)]
pub struct ShortKeyRegistry {
    url_key: String,
    workspace_id: String,
    default_team_id: Option<String>,
    users: Vec<UserSnapshot>,
    states: Vec<StateSnapshot>,
    projects: Vec<ProjectSnapshot>,
    teams: Vec<TeamSnapshot>,
    user_keys: KeyTable,
    state_keys: KeyTable,
    project_keys: KeyTable,
    /// Uppercased team key -> canonical team id.
    team_ids: HashMap<String, String>,
    team_keys: BTreeSet<String>,
    project_slugs: HashMap<String, String>,
    built_at: DateTime<Utc>,
}

impl ShortKeyRegistry {
    /// Build the registry from a workspace snapshot.
    pub fn build(data: &RegistryBuildData) -> Self {
        let users = sorted_by_creation(&data.users);
        let states = sorted_by_creation(&data.states);
        let projects = sorted_by_creation(&data.projects);
        let mut teams = sorted_by_creation(&data.teams);
        for team in &mut teams {
            team.key = team.key.to_uppercase();
        }

        let user_keys = assign_keys(EntityKind::User.prefix(), &users);
        let state_keys = assign_keys(EntityKind::State.prefix(), &states);
        let project_keys = assign_keys(EntityKind::Project.prefix(), &projects);

        let mut team_ids = HashMap::new();
        let mut team_keys = BTreeSet::new();
        for team in &teams {
            team_ids.insert(team.key.clone(), team.id.clone());
            team_keys.insert(team.key.clone());
        }

        let project_slugs = projects
            .iter()
            .filter_map(|p| {
                let slug = p.slug_id.as_ref()?;
                let key = project_keys.backward.get(&p.id)?;
                Some((slug.clone(), key.clone()))
            })
            .collect();

        debug!(
            users = user_keys.len(),
            states = state_keys.len(),
            projects = project_keys.len(),
            teams = team_keys.len(),
            workspace = %data.workspace_id,
            "built short-key registry"
        );

        Self {
            url_key: data.url_key.clone(),
            workspace_id: data.workspace_id.clone(),
            default_team_id: data.default_team_id.clone(),
            users,
            states,
            projects,
            teams,
            user_keys,
            state_keys,
            project_keys,
            team_ids,
            team_keys,
            project_slugs,
            built_at: Utc::now(),
        }
    }

    fn table(&self, kind: EntityKind) -> Option<&KeyTable> {
        match kind {
            EntityKind::User => Some(&self.user_keys),
            EntityKind::State => Some(&self.state_keys),
            EntityKind::Project => Some(&self.project_keys),
            EntityKind::Team => None,
        }
    }

    /// Resolve a short key (or, for teams, a team key) to its canonical id.
    pub fn resolve(&self, kind: EntityKind, short_key: &str) -> Result<&str, ToonError> {
        let (Some(table), Some(pattern)) = (self.table(kind), kind.key_pattern()) else {
            return self.resolve_team(short_key);
        };
        if !pattern.is_match(short_key) {
            return Err(ToonError::invalid_key_format(kind, short_key, table.order.iter().cloned()));
        }
        table
            .forward
            .get(short_key)
            .map(String::as_str)
            .ok_or_else(|| ToonError::unknown_short_key(kind, short_key, table.order.iter().cloned()))
    }

    /// Short key for a canonical id; `None` when the id is unmapped.
    pub fn to_short_key(&self, kind: EntityKind, canonical_id: &str) -> Option<&str> {
        match self.table(kind) {
            Some(table) => table.backward.get(canonical_id).map(String::as_str),
            None => self
                .teams
                .iter()
                .find(|t| t.id == canonical_id)
                .map(|t| t.key.as_str()),
        }
    }

    /// Resolve a team key, case-insensitively, to its canonical id.
    pub fn resolve_team(&self, team_key: &str) -> Result<&str, ToonError> {
        self.team_ids
            .get(&team_key.to_uppercase())
            .map(String::as_str)
            .ok_or_else(|| {
                ToonError::unknown_short_key(EntityKind::Team, team_key, self.team_keys.iter().cloned())
            })
    }

    /// Resolve a user by short key, name, display name or email.
    pub fn resolve_user_by_name(&self, query: &str) -> Result<&str, ToonError> {
        let query = query.trim();
        if USER_KEY_RE.is_match(query) {
            return self.resolve(EntityKind::User, query);
        }
        let needle = query.to_lowercase();
        let matches: Vec<&UserSnapshot> = self
            .users
            .iter()
            .filter(|u| {
                u.name.to_lowercase() == needle
                    || u.display_name.as_deref().is_some_and(|d| d.to_lowercase() == needle)
                    || u.email.as_deref().is_some_and(|e| e.to_lowercase() == needle)
            })
            .collect();

        match matches.as_slice() {
            [only] => Ok(only.id.as_str()),
            [] => Err(ToonError::unknown_short_key(
                EntityKind::User,
                query,
                self.user_keys.order.iter().cloned(),
            )),
            many => Err(ToonError::ambiguous_key(
                EntityKind::User,
                query,
                many.iter()
                    .filter_map(|u| self.user_keys.backward.get(&u.id).cloned()),
            )),
        }
    }

    /// Assigned short keys for a kind, in assignment order.
    pub fn keys(&self, kind: EntityKind) -> Vec<&str> {
        match self.table(kind) {
            Some(table) => table.order.iter().map(String::as_str).collect(),
            None => self.team_keys.iter().map(String::as_str).collect(),
        }
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        match self.table(kind) {
            Some(table) => table.len(),
            None => self.team_keys.len(),
        }
    }

    /// Lookup table rendering the registry's entities for a kind.
    pub fn lookup_section(&self, kind: EntityKind) -> ToonSection {
        let (name, fields, items): (&str, &[&str], Vec<Value>) = match kind {
            EntityKind::User => (
                "_users",
                &["key", "name", "email"],
                self.users
                    .iter()
                    .zip(&self.user_keys.order)
                    .map(|(u, key)| json!({ "key": key, "name": u.name, "email": u.email }))
                    .collect(),
            ),
            EntityKind::State => (
                "_states",
                &["key", "name", "type"],
                self.states
                    .iter()
                    .zip(&self.state_keys.order)
                    .map(|(s, key)| json!({ "key": key, "name": s.name, "type": s.state_type }))
                    .collect(),
            ),
            EntityKind::Project => (
                "_projects",
                &["key", "name", "state"],
                self.projects
                    .iter()
                    .zip(&self.project_keys.order)
                    .map(|(p, key)| json!({ "key": key, "name": p.name, "state": p.state }))
                    .collect(),
            ),
            EntityKind::Team => (
                "_teams",
                &["key", "name"],
                self.teams
                    .iter()
                    .map(|t| json!({ "key": t.key, "name": t.name }))
                    .collect(),
            ),
        };

        let rows: Vec<ToonRow> = items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        ToonSection::new(ToonSchema::new(name, fields.iter().copied()), rows)
    }

    pub fn url_key(&self) -> &str {
        &self.url_key
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn default_team_id(&self) -> Option<&str> {
        self.default_team_id.as_deref()
    }

    /// Uppercased team keys.
    pub fn team_keys(&self) -> &BTreeSet<String> {
        &self.team_keys
    }

    /// Project slug id -> project short key.
    pub fn project_slugs(&self) -> &HashMap<String, String> {
        &self.project_slugs
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn user(id: &str, name: &str, secs: i64) -> UserSnapshot {
        UserSnapshot {
            id: id.to_string(),
            name: name.to_string(),
            display_name: None,
            email: Some(format!("{}@x.com", name.to_lowercase())),
            created_at: at(secs),
        }
    }

    pub(crate) fn sample_data() -> RegistryBuildData {
        RegistryBuildData {
            users: vec![
                user("id-carol", "Carol", 30),
                user("id-alice", "Alice", 10),
                user("id-bob", "Bob", 20),
            ],
            states: vec![
                StateSnapshot {
                    id: "st-done".to_string(),
                    name: "Done".to_string(),
                    state_type: Some("completed".to_string()),
                    team_id: Some("team-1".to_string()),
                    created_at: at(5),
                },
                StateSnapshot {
                    id: "st-todo".to_string(),
                    name: "Todo".to_string(),
                    state_type: Some("unstarted".to_string()),
                    team_id: Some("team-1".to_string()),
                    created_at: at(5),
                },
            ],
            projects: vec![ProjectSnapshot {
                id: "proj-1".to_string(),
                name: "Launch".to_string(),
                slug_id: Some("launch-2f1c".to_string()),
                state: Some("started".to_string()),
                created_at: at(1),
            }],
            teams: vec![TeamSnapshot {
                id: "team-1".to_string(),
                key: "sqt".to_string(),
                name: "Squat".to_string(),
                created_at: at(0),
            }],
            workspace_id: "ws-1".to_string(),
            url_key: "acme".to_string(),
            default_team_id: Some("team-1".to_string()),
        }
    }

    #[test]
    fn test_keys_follow_creation_order() {
        let registry = ShortKeyRegistry::build(&sample_data());
        assert_eq!(registry.resolve(EntityKind::User, "u0").unwrap(), "id-alice");
        assert_eq!(registry.resolve(EntityKind::User, "u1").unwrap(), "id-bob");
        assert_eq!(registry.resolve(EntityKind::User, "u2").unwrap(), "id-carol");
    }

    #[test]
    fn test_ties_break_on_canonical_id() {
        let registry = ShortKeyRegistry::build(&sample_data());
        // Both states share a creation time; "st-done" < "st-todo"
        assert_eq!(registry.to_short_key(EntityKind::State, "st-done"), Some("s0"));
        assert_eq!(registry.to_short_key(EntityKind::State, "st-todo"), Some("s1"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let data = sample_data();
        let mut shuffled = data.clone();
        shuffled.users.reverse();
        shuffled.states.reverse();

        let a = ShortKeyRegistry::build(&data);
        let b = ShortKeyRegistry::build(&shuffled);
        for kind in [EntityKind::User, EntityKind::State, EntityKind::Project] {
            assert_eq!(a.keys(kind), b.keys(kind));
            for key in a.keys(kind) {
                assert_eq!(a.resolve(kind, key).unwrap(), b.resolve(kind, key).unwrap());
            }
        }
    }

    #[test]
    fn test_bijection() {
        let registry = ShortKeyRegistry::build(&sample_data());
        for kind in [EntityKind::User, EntityKind::State, EntityKind::Project] {
            for key in registry.keys(kind) {
                let id = registry.resolve(kind, key).unwrap();
                assert_eq!(registry.to_short_key(kind, id), Some(key));
            }
        }
    }

    #[test]
    fn test_unknown_key() {
        let registry = ShortKeyRegistry::build(&sample_data());
        match registry.resolve(EntityKind::User, "u999").unwrap_err() {
            ToonError::Resolution(e) => {
                assert_eq!(e.code.as_str(), "UNKNOWN_SHORT_KEY");
                assert!(!e.available_keys.is_empty());
                assert!(e.available_keys.len() <= 10);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_key() {
        let registry = ShortKeyRegistry::build(&sample_data());
        let err = registry.resolve(EntityKind::User, "xyz").unwrap_err();
        assert_eq!(err.code(), "INVALID_KEY_FORMAT");
        // A project key is malformed as a state key
        let err = registry.resolve(EntityKind::State, "pr0").unwrap_err();
        assert_eq!(err.code(), "INVALID_KEY_FORMAT");
    }

    #[test]
    fn test_unmapped_id_is_not_an_error() {
        let registry = ShortKeyRegistry::build(&sample_data());
        assert_eq!(registry.to_short_key(EntityKind::User, "id-nobody"), None);
    }

    #[test]
    fn test_teams_and_slugs() {
        let registry = ShortKeyRegistry::build(&sample_data());
        assert!(registry.team_keys().contains("SQT"));
        assert_eq!(registry.resolve_team("sqt").unwrap(), "team-1");
        assert_eq!(registry.resolve(EntityKind::Team, "SQT").unwrap(), "team-1");
        assert_eq!(registry.resolve_team("ABC").unwrap_err().code(), "UNKNOWN_SHORT_KEY");
        assert_eq!(registry.project_slugs().get("launch-2f1c").map(String::as_str), Some("pr0"));
    }

    #[test]
    fn test_resolve_user_by_name() {
        let mut data = sample_data();
        data.users.push(UserSnapshot {
            display_name: Some("bob".to_string()),
            ..user("id-bob2", "Robert", 40)
        });
        let registry = ShortKeyRegistry::build(&data);
        assert_eq!(registry.resolve_user_by_name("alice").unwrap(), "id-alice");
        assert_eq!(registry.resolve_user_by_name("carol@x.com").unwrap(), "id-carol");
        assert_eq!(registry.resolve_user_by_name("u2").unwrap(), "id-carol");

        let err = registry.resolve_user_by_name("Bob").unwrap_err();
        assert_eq!(err.code(), "AMBIGUOUS_KEY");
        assert_eq!(err.hint(), Some("Candidates: u1, u3"));
    }

    #[test]
    fn test_lookup_section() {
        let registry = ShortKeyRegistry::build(&sample_data());
        let section = registry.lookup_section(EntityKind::User);
        assert!(section.is_lookup());
        assert_eq!(section.schema.fields, vec!["key", "name", "email"]);
        assert_eq!(section.items.len(), 3);
        assert_eq!(section.items[1]["key"], "u1");
        assert_eq!(section.items[1]["name"], "Bob");
    }

    #[test]
    fn test_build_data_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "users": [{{"id": "a", "name": "Alice", "createdAt": "2024-01-01T00:00:00Z"}}],
                "teams": [{{"id": "t", "key": "SQT", "name": "Squat", "createdAt": "2024-01-01T00:00:00Z"}}],
                "workspaceId": "ws",
                "urlKey": "acme"
            }}"#
        )
        .unwrap();

        let data = RegistryBuildData::from_path(file.path()).unwrap();
        assert_eq!(data.users.len(), 1);
        assert!(data.states.is_empty());
        assert_eq!(data.url_key, "acme");
        let registry = ShortKeyRegistry::build(&data);
        assert_eq!(registry.to_short_key(EntityKind::User, "a"), Some("u0"));
    }
}
