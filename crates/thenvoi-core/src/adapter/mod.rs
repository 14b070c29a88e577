//! Agent-framework adapters.
//!
//! The set of adapters is closed: [`AdapterKind`] names every framework
//! the bridge knows how to host, [`AdapterInfo`] carries its static
//! metadata, and [`AdapterConfig`] carries the typed parameters used to
//! construct it. [`AdapterCatalog`] answers availability questions by
//! probing the host for the adapter's packages.

pub mod catalog;
pub mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use catalog::{AdapterCatalog, DependencyProbe, PYTHON_ENV, PythonProbe};
pub use config::{A2A_URL_ENV, AdapterConfig, CrewAiParams};

/// Adapter used by `thenvoi run` when none is given.
pub const DEFAULT_ADAPTER: AdapterKind = AdapterKind::Langgraph;

/// Errors from adapter lookup and readiness checks.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("unknown adapter '{name}'")]
    Unknown { name: String },

    #[error("adapter '{adapter}' requires missing dependencies: {}", packages.join(", "))]
    MissingDependencies {
        adapter: AdapterKind,
        packages: Vec<String>,
    },

    #[error("required environment variable '{var}' not set for {adapter} adapter")]
    MissingEnvironment { adapter: AdapterKind, var: String },
}

impl AdapterError {
    /// Remediation text for the user, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Unknown { .. } => Some(format!(
                "Available adapters: {}",
                AdapterKind::ALL
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Self::MissingDependencies { adapter, .. } => {
                Some(format!("Install with: pip install thenvoi-cli[{adapter}]"))
            }
            Self::MissingEnvironment { var, .. } => {
                Some(format!("Set the variable: export {var}=<value>"))
            }
        }
    }
}

/// Every adapter the bridge can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterKind {
    Langgraph,
    Anthropic,
    PydanticAi,
    ClaudeSdk,
    Crewai,
    Parlant,
    A2a,
    A2aGateway,
    Passthrough,
}

impl AdapterKind {
    /// All kinds, in display order.
    pub const ALL: [AdapterKind; 9] = [
        AdapterKind::Langgraph,
        AdapterKind::Anthropic,
        AdapterKind::PydanticAi,
        AdapterKind::ClaudeSdk,
        AdapterKind::Crewai,
        AdapterKind::Parlant,
        AdapterKind::A2a,
        AdapterKind::A2aGateway,
        AdapterKind::Passthrough,
    ];

    pub fn as_str(self) -> &'static str {
        self.info().name
    }

    /// Static metadata for this adapter.
    pub fn info(self) -> &'static AdapterInfo {
        match self {
            AdapterKind::Langgraph => &LANGGRAPH,
            AdapterKind::Anthropic => &ANTHROPIC,
            AdapterKind::PydanticAi => &PYDANTIC_AI,
            AdapterKind::ClaudeSdk => &CLAUDE_SDK,
            AdapterKind::Crewai => &CREWAI,
            AdapterKind::Parlant => &PARLANT,
            AdapterKind::A2a => &A2A,
            AdapterKind::A2aGateway => &A2A_GATEWAY,
            AdapterKind::Passthrough => &PASSTHROUGH,
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdapterKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AdapterError::Unknown {
                name: s.to_string(),
            })
    }
}

/// Static description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterInfo {
    pub name: &'static str,
    pub description: &'static str,
    /// Python packages (import names) the adapter needs.
    pub required_packages: &'static [&'static str],
    pub default_model: Option<&'static str>,
    /// Environment variables that must be set before the adapter can start.
    pub env_vars: &'static [&'static str],
}

const LANGGRAPH: AdapterInfo = AdapterInfo {
    name: "langgraph",
    description: "LangGraph ReAct agent with tool support",
    required_packages: &["langgraph", "langchain_openai"],
    default_model: Some("gpt-4o"),
    env_vars: &["OPENAI_API_KEY"],
};

const ANTHROPIC: AdapterInfo = AdapterInfo {
    name: "anthropic",
    description: "Anthropic SDK with direct Claude integration",
    required_packages: &["anthropic"],
    default_model: Some("claude-sonnet-4-5-20250929"),
    env_vars: &["ANTHROPIC_API_KEY"],
};

const PYDANTIC_AI: AdapterInfo = AdapterInfo {
    name: "pydantic-ai",
    description: "Pydantic AI with type-safe tools",
    required_packages: &["pydantic_ai"],
    default_model: Some("openai:gpt-4o"),
    env_vars: &["OPENAI_API_KEY"],
};

const CLAUDE_SDK: AdapterInfo = AdapterInfo {
    name: "claude-sdk",
    description: "Claude Agent SDK with extended thinking",
    required_packages: &["claude_agent_sdk"],
    default_model: Some("claude-sonnet-4-5-20250929"),
    env_vars: &["ANTHROPIC_API_KEY"],
};

const CREWAI: AdapterInfo = AdapterInfo {
    name: "crewai",
    description: "CrewAI role-based multi-agent framework",
    required_packages: &["crewai"],
    default_model: Some("gpt-4o"),
    env_vars: &["OPENAI_API_KEY"],
};

const PARLANT: AdapterInfo = AdapterInfo {
    name: "parlant",
    description: "Parlant guideline-based behavior framework",
    required_packages: &["parlant"],
    default_model: Some("gpt-4o"),
    env_vars: &["OPENAI_API_KEY"],
};

const A2A: AdapterInfo = AdapterInfo {
    name: "a2a",
    description: "A2A protocol adapter for external agents",
    required_packages: &["a2a_sdk"],
    default_model: None,
    env_vars: &[],
};

const A2A_GATEWAY: AdapterInfo = AdapterInfo {
    name: "a2a-gateway",
    description: "A2A gateway to expose peers as endpoints",
    required_packages: &["a2a_sdk", "starlette", "uvicorn"],
    default_model: None,
    env_vars: &[],
};

const PASSTHROUGH: AdapterInfo = AdapterInfo {
    name: "passthrough",
    description: "Output messages to stdout without LLM processing",
    required_packages: &[],
    default_model: None,
    env_vars: &[],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for kind in AdapterKind::ALL {
            assert_eq!(kind.as_str().parse::<AdapterKind>().unwrap(), kind);
        }
    }

    #[test]
    fn serde_names_match_display_names() {
        for kind in AdapterKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn unknown_adapter_lists_alternatives() {
        let err = "gpt-pilot".parse::<AdapterKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown adapter 'gpt-pilot'");
        let hint = err.hint().unwrap();
        assert!(hint.starts_with("Available adapters: langgraph, anthropic"));
        assert!(hint.ends_with("passthrough"));
    }

    #[test]
    fn default_models() {
        assert_eq!(AdapterKind::Langgraph.info().default_model, Some("gpt-4o"));
        assert_eq!(AdapterKind::PydanticAi.info().default_model, Some("openai:gpt-4o"));
        assert_eq!(
            AdapterKind::ClaudeSdk.info().default_model,
            Some("claude-sonnet-4-5-20250929")
        );
        assert_eq!(AdapterKind::A2a.info().default_model, None);
    }

    #[test]
    fn passthrough_needs_nothing() {
        let info = AdapterKind::Passthrough.info();
        assert!(info.required_packages.is_empty());
        assert!(info.env_vars.is_empty());
    }

    #[test]
    fn missing_dependencies_message_and_hint() {
        let err = AdapterError::MissingDependencies {
            adapter: AdapterKind::A2aGateway,
            packages: vec!["starlette".into(), "uvicorn".into()],
        };
        assert_eq!(
            err.to_string(),
            "adapter 'a2a-gateway' requires missing dependencies: starlette, uvicorn"
        );
        assert_eq!(
            err.hint().unwrap(),
            "Install with: pip install thenvoi-cli[a2a-gateway]"
        );
    }
}
