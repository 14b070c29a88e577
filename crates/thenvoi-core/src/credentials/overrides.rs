//! Environment-variable overrides for agent credentials.
//!
//! `THENVOI_AGENT_ID` and `THENVOI_API_KEY` take precedence over whatever
//! the store holds. When both are present the store is never read.

use super::Credentials;

/// Environment variable overriding the stored agent identifier.
pub const AGENT_ID_ENV: &str = "THENVOI_AGENT_ID";

/// Environment variable overriding the stored API key.
pub const API_KEY_ENV: &str = "THENVOI_API_KEY";

/// Field-level credential overrides. Empty values count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOverrides {
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
}

impl CredentialOverrides {
    /// No overrides at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Read overrides from `THENVOI_AGENT_ID` / `THENVOI_API_KEY`.
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(AGENT_ID_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        )
    }

    /// Build overrides from explicit values (testable without env vars).
    pub fn from_values(agent_id: Option<String>, api_key: Option<String>) -> Self {
        Self {
            agent_id: agent_id.filter(|v| !v.is_empty()),
            api_key: api_key.filter(|v| !v.is_empty()),
        }
    }

    /// The override pair, if both halves are present.
    pub fn complete(&self) -> Option<Credentials> {
        match (&self.agent_id, &self.api_key) {
            (Some(agent_id), Some(api_key)) => Some(Credentials {
                agent_id: agent_id.clone(),
                api_key: api_key.clone(),
            }),
            _ => None,
        }
    }
}
