//! Credential store: named agent identities persisted to a YAML file.
//!
//! The file maps agent names to `{agent_id, api_key}` pairs:
//!
//! ```yaml
//! my-agent:
//!   agent_id: 12345678-1234-1234-1234-123456789012
//!   api_key: sk-...
//! ```
//!
//! Every mutation rewrites the whole file and leaves it readable and
//! writable by the owner only (0600). Resolution honours the overrides in
//! [`overrides`] before looking at the file.

pub mod overrides;

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};
use uuid::Uuid;

pub use overrides::{AGENT_ID_ENV, API_KEY_ENV, CredentialOverrides};

/// Environment variable naming an alternate credential store path.
pub const CONFIG_PATH_ENV: &str = "THENVOI_CONFIG_PATH";

/// Store path used when neither a flag nor the environment names one.
pub const DEFAULT_CONFIG_FILE: &str = "agent_config.yaml";

const AGENT_ID_KEY: &str = "agent_id";
const API_KEY_KEY: &str = "api_key";

/// Errors raised by the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("agent '{name}' not found in configuration")]
    NotFound { name: String },

    #[error("{message}")]
    InvalidRecord { message: String },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("credential store is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl CredentialError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Remediation text for the user, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotFound { .. } => Some(
                "Run 'thenvoi config list' to see available agents, \
                 or 'thenvoi config set' to add a new agent."
                    .to_string(),
            ),
            Self::InvalidRecord { .. } => Some(
                "Fix the entry with 'thenvoi config set <name> --agent-id <uuid> --api-key <key>'."
                    .to_string(),
            ),
            Self::Io(_) | Self::Parse(_) => None,
        }
    }
}

/// A resolved identity, ready to authenticate an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub agent_id: String,
    pub api_key: String,
}

/// Raw stored fields for one agent, without overrides applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
}

/// Advisory: the store file is accessible to group or others.
///
/// Never blocks an operation; callers surface it as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionWarning {
    pub path: PathBuf,
    pub mode: u32,
}

impl fmt::Display for PermissionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config file {} has insecure permissions ({:04o}); consider running: chmod 600 {}",
            self.path.display(),
            self.mode & 0o7777,
            self.path.display()
        )
    }
}

/// Whether `value` has the canonical 8-4-4-4-12 hex UUID shape.
///
/// Letter case is not significant. Braced, URN and un-hyphenated forms are
/// rejected even though they name valid UUIDs.
pub fn is_uuid_shaped(value: &str) -> bool {
    value.len() == 36 && Uuid::try_parse(value).is_ok()
}

/// Resolve the store path: explicit path > `THENVOI_CONFIG_PATH` > `./agent_config.yaml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Render a YAML scalar as a string; mappings, sequences and nulls yield `None`.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}

/// Read a field of a record, treating empty strings as missing.
fn field(record: &Mapping, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(scalar_to_string)
        .filter(|v| !v.is_empty())
}

fn matches_name(key: &Value, name: &str) -> bool {
    scalar_to_string(key).is_some_and(|k| k == name)
}

fn find<'a>(doc: &'a Mapping, name: &str) -> Option<&'a Value> {
    doc.iter()
        .find(|(key, _)| matches_name(key, name))
        .map(|(_, value)| value)
}

/// Persistent, permission-hardened store of named agent credentials.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    overrides: CredentialOverrides,
}

impl CredentialStore {
    /// A store backed by `path` with no environment overrides.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: CredentialOverrides::none(),
        }
    }

    /// A store whose path and overrides come from the environment.
    ///
    /// `explicit` (typically a `--config` flag) wins over `THENVOI_CONFIG_PATH`.
    pub fn from_env(explicit: Option<&Path>) -> Self {
        Self::new(resolve_config_path(explicit)).with_overrides(CredentialOverrides::from_env())
    }

    /// Replace the overrides consulted by [`CredentialStore::resolve`].
    pub fn with_overrides(mut self, overrides: CredentialOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the backing file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    // -------------------------------------------------------------------
    // Backing file
    // -------------------------------------------------------------------

    fn load(&self) -> Result<Mapping, CredentialError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Mapping::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Mapping::new());
        }
        match serde_yaml::from_str::<Value>(&contents)? {
            Value::Null => Ok(Mapping::new()),
            Value::Mapping(doc) => Ok(doc),
            _ => Err(CredentialError::invalid(format!(
                "credential store {} must map agent names to credentials",
                self.path.display()
            ))),
        }
    }

    fn persist(&self, doc: &Mapping) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_yaml::to_string(doc)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path)?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;

        // `mode` only applies on creation; an existing file keeps its bits
        // until they are reset here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        debug!(path = %self.path.display(), agents = doc.len(), "credential store written");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------

    /// Resolve the credentials for `name`.
    ///
    /// When both override variables are set they are returned as-is and the
    /// store is not read. Otherwise single-field overrides are merged over
    /// the stored record and the merged record must carry a UUID-shaped
    /// `agent_id` and a non-empty `api_key`.
    pub fn resolve(&self, name: &str) -> Result<Credentials, CredentialError> {
        if let Some(creds) = self.overrides.complete() {
            debug!(agent = name, "using credentials from environment");
            return Ok(creds);
        }

        let doc = self.load()?;
        let entry = find(&doc, name).ok_or_else(|| CredentialError::NotFound {
            name: name.to_string(),
        })?;
        let record = entry.as_mapping().ok_or_else(|| {
            CredentialError::invalid(format!("Invalid configuration for agent '{name}'"))
        })?;

        let agent_id = self
            .overrides
            .agent_id
            .clone()
            .or_else(|| field(record, AGENT_ID_KEY))
            .ok_or_else(|| {
                CredentialError::invalid(format!("Missing 'agent_id' for agent '{name}'"))
            })?;
        let api_key = self
            .overrides
            .api_key
            .clone()
            .or_else(|| field(record, API_KEY_KEY))
            .ok_or_else(|| {
                CredentialError::invalid(format!("Missing 'api_key' for agent '{name}'"))
            })?;

        if !is_uuid_shaped(&agent_id) {
            return Err(CredentialError::invalid(format!(
                "Invalid agent_id '{agent_id}' for agent '{name}': must be a valid UUID"
            )));
        }

        Ok(Credentials { agent_id, api_key })
    }

    /// Save credentials under `name`, returning `true` if the name was new.
    ///
    /// Nothing is written when validation fails.
    pub fn save(
        &self,
        name: &str,
        agent_id: &str,
        api_key: &str,
        overwrite_without_warning: bool,
    ) -> Result<bool, CredentialError> {
        if !is_uuid_shaped(agent_id) {
            return Err(CredentialError::invalid(format!(
                "Invalid agent_id '{agent_id}': must be a valid UUID"
            )));
        }
        if api_key.is_empty() {
            return Err(CredentialError::invalid(format!(
                "Missing 'api_key' for agent '{name}'"
            )));
        }

        let mut doc = self.load()?;

        let mut record = Mapping::new();
        record.insert(AGENT_ID_KEY.into(), agent_id.into());
        record.insert(API_KEY_KEY.into(), api_key.into());

        let existing = doc
            .iter_mut()
            .find(|(key, _)| matches_name(key, name))
            .map(|(_, value)| value);
        let is_new = match existing {
            Some(slot) => {
                if !overwrite_without_warning {
                    warn!(agent = name, "overwriting existing credentials");
                }
                *slot = Value::Mapping(record);
                false
            }
            None => {
                doc.insert(name.into(), Value::Mapping(record));
                true
            }
        };

        self.persist(&doc)?;
        Ok(is_new)
    }

    /// Remove `name`, returning whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool, CredentialError> {
        let doc = self.load()?;
        if find(&doc, name).is_none() {
            return Ok(false);
        }
        let remaining: Mapping = doc
            .into_iter()
            .filter(|(key, _)| !matches_name(key, name))
            .collect();
        self.persist(&remaining)?;
        Ok(true)
    }

    /// All stored agent names, in file order.
    pub fn list(&self) -> Result<Vec<String>, CredentialError> {
        let doc = self.load()?;
        Ok(doc.keys().filter_map(scalar_to_string).collect())
    }

    /// Raw stored fields for `name`; overrides are not applied.
    pub fn get_details(&self, name: &str) -> Result<StoredRecord, CredentialError> {
        let doc = self.load()?;
        let entry = find(&doc, name).ok_or_else(|| CredentialError::NotFound {
            name: name.to_string(),
        })?;
        let record = entry.as_mapping().ok_or_else(|| {
            CredentialError::invalid(format!("Invalid configuration for agent '{name}'"))
        })?;
        Ok(StoredRecord {
            agent_id: record.get(AGENT_ID_KEY).and_then(scalar_to_string),
            api_key: record.get(API_KEY_KEY).and_then(scalar_to_string),
        })
    }

    /// Validate one agent, or every stored agent when `name` is `None`.
    ///
    /// Returns one human-readable message per violation; an empty list
    /// means the targeted records are valid.
    pub fn validate(&self, name: Option<&str>) -> Result<Vec<String>, CredentialError> {
        let doc = self.load()?;
        let targets: Vec<String> = match name {
            Some(name) => vec![name.to_string()],
            None => doc.keys().filter_map(scalar_to_string).collect(),
        };

        let mut errors = Vec::new();
        for agent in &targets {
            let Some(entry) = find(&doc, agent) else {
                errors.push(format!("Agent '{agent}' not found in configuration"));
                continue;
            };
            let Some(record) = entry.as_mapping() else {
                errors.push(format!("Agent '{agent}': configuration is not a mapping"));
                continue;
            };

            match field(record, AGENT_ID_KEY) {
                None => errors.push(format!("Agent '{agent}': missing 'agent_id'")),
                Some(id) if !is_uuid_shaped(&id) => {
                    errors.push(format!("Agent '{agent}': invalid UUID format for 'agent_id'"))
                }
                Some(_) => {}
            }
            if field(record, API_KEY_KEY).is_none() {
                errors.push(format!("Agent '{agent}': missing 'api_key'"));
            }
        }
        Ok(errors)
    }

    /// `true` if the file is absent or has no group/other permission bits.
    ///
    /// Pure observation; never changes the file.
    pub fn check_permissions(&self) -> bool {
        self.permission_warning().is_none()
    }

    /// The advisory form of [`CredentialStore::check_permissions`].
    pub fn permission_warning(&self) -> Option<PermissionWarning> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let meta = fs::metadata(&self.path).ok()?;
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                return Some(PermissionWarning {
                    path: self.path.clone(),
                    mode,
                });
            }
        }
        None
    }
}
