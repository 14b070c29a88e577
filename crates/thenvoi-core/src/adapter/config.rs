//! Typed construction parameters for each adapter.

use serde::{Deserialize, Serialize};

use super::{AdapterError, AdapterKind};

/// Environment variable holding the remote agent URL for the `a2a` adapter.
pub const A2A_URL_ENV: &str = "A2A_AGENT_URL";

/// Role-play parameters for CrewAI agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewAiParams {
    pub model: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

impl CrewAiParams {
    fn with_model(model: String) -> Self {
        Self {
            model,
            role: "AI Assistant".to_string(),
            goal: "Help users with their tasks".to_string(),
            backstory: "An intelligent AI assistant".to_string(),
        }
    }
}

/// Everything the bridge needs to instantiate one adapter.
///
/// Serialized with an `adapter` tag, e.g.
/// `{"adapter":"anthropic","model":"claude-sonnet-4-5-20250929"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "adapter", rename_all = "kebab-case")]
pub enum AdapterConfig {
    Langgraph { model: String },
    Anthropic { model: String },
    PydanticAi { model: String },
    ClaudeSdk { model: String },
    Crewai(CrewAiParams),
    Parlant { model: String },
    A2a { url: String },
    A2aGateway,
    Passthrough,
}

impl AdapterConfig {
    /// Build the configuration for `kind`.
    ///
    /// `model` overrides the adapter's default model and is ignored by
    /// adapters that have none. `env` looks up environment variables; the
    /// `a2a` adapter fails without `A2A_AGENT_URL`.
    pub fn build(
        kind: AdapterKind,
        model: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AdapterError> {
        let resolved = || {
            model
                .or(kind.info().default_model)
                .unwrap_or_default()
                .to_string()
        };

        Ok(match kind {
            AdapterKind::Langgraph => Self::Langgraph { model: resolved() },
            AdapterKind::Anthropic => Self::Anthropic { model: resolved() },
            AdapterKind::PydanticAi => Self::PydanticAi { model: resolved() },
            AdapterKind::ClaudeSdk => Self::ClaudeSdk { model: resolved() },
            AdapterKind::Crewai => Self::Crewai(CrewAiParams::with_model(resolved())),
            AdapterKind::Parlant => Self::Parlant { model: resolved() },
            AdapterKind::A2a => {
                let url = env(A2A_URL_ENV).filter(|v| !v.is_empty()).ok_or_else(|| {
                    AdapterError::MissingEnvironment {
                        adapter: kind,
                        var: A2A_URL_ENV.to_string(),
                    }
                })?;
                Self::A2a { url }
            }
            AdapterKind::A2aGateway => Self::A2aGateway,
            AdapterKind::Passthrough => Self::Passthrough,
        })
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::Langgraph { .. } => AdapterKind::Langgraph,
            Self::Anthropic { .. } => AdapterKind::Anthropic,
            Self::PydanticAi { .. } => AdapterKind::PydanticAi,
            Self::ClaudeSdk { .. } => AdapterKind::ClaudeSdk,
            Self::Crewai(_) => AdapterKind::Crewai,
            Self::Parlant { .. } => AdapterKind::Parlant,
            Self::A2a { .. } => AdapterKind::A2a,
            Self::A2aGateway => AdapterKind::A2aGateway,
            Self::Passthrough => AdapterKind::Passthrough,
        }
    }

    /// The model the adapter will use, if it takes one.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Langgraph { model }
            | Self::Anthropic { model }
            | Self::PydanticAi { model }
            | Self::ClaudeSdk { model }
            | Self::Parlant { model } => Some(model),
            Self::Crewai(params) => Some(&params.model),
            Self::A2a { .. } | Self::A2aGateway | Self::Passthrough => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn build_uses_default_model() {
        let cfg = AdapterConfig::build(AdapterKind::Anthropic, None, no_env).unwrap();
        assert_eq!(
            cfg,
            AdapterConfig::Anthropic {
                model: "claude-sonnet-4-5-20250929".into()
            }
        );
    }

    #[test]
    fn explicit_model_overrides_default() {
        let cfg =
            AdapterConfig::build(AdapterKind::Langgraph, Some("gpt-4o-mini"), no_env).unwrap();
        assert_eq!(cfg.model(), Some("gpt-4o-mini"));
        assert_eq!(cfg.kind(), AdapterKind::Langgraph);
    }

    #[test]
    fn crewai_gets_default_persona() {
        let cfg = AdapterConfig::build(AdapterKind::Crewai, None, no_env).unwrap();
        let AdapterConfig::Crewai(params) = cfg else {
            panic!("expected crewai config");
        };
        assert_eq!(params.model, "gpt-4o");
        assert_eq!(params.role, "AI Assistant");
        assert_eq!(params.goal, "Help users with their tasks");
        assert_eq!(params.backstory, "An intelligent AI assistant");
    }

    #[test]
    fn a2a_requires_url() {
        let err = AdapterConfig::build(AdapterKind::A2a, None, no_env).unwrap_err();
        assert!(matches!(
            err,
            AdapterError::MissingEnvironment { ref var, .. } if var == A2A_URL_ENV
        ));

        let cfg = AdapterConfig::build(AdapterKind::A2a, Some("ignored"), |var| {
            (var == A2A_URL_ENV).then(|| "http://localhost:9000".to_string())
        })
        .unwrap();
        assert_eq!(cfg, AdapterConfig::A2a { url: "http://localhost:9000".into() });
        assert_eq!(cfg.model(), None);
    }

    #[test]
    fn every_kind_builds_to_itself() {
        let env = |_: &str| Some("http://agent.local".to_string());
        for kind in AdapterKind::ALL {
            assert_eq!(AdapterConfig::build(kind, None, env).unwrap().kind(), kind);
        }
    }

    #[test]
    fn serializes_with_adapter_tag() {
        let cfg = AdapterConfig::build(AdapterKind::PydanticAi, None, no_env).unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"adapter": "pydantic-ai", "model": "openai:gpt-4o"})
        );

        let json = serde_json::to_value(AdapterConfig::Passthrough).unwrap();
        assert_eq!(json, serde_json::json!({"adapter": "passthrough"}));
    }

    #[test]
    fn crewai_params_are_flattened_into_tagged_object() {
        let cfg = AdapterConfig::build(AdapterKind::Crewai, Some("gpt-4o-mini"), no_env).unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["adapter"], "crewai");
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["role"], "AI Assistant");
    }
}
