//! Connection to the collaboration platform.
//!
//! The platform protocol itself lives outside this crate. [`PlatformLink`]
//! is the seam: `connect` establishes a session for one agent and returns a
//! [`LinkConnection`], whose `run` drives it until shutdown is requested or
//! the platform side goes away.
//!
//! ```text
//! run command
//!     |
//!     v
//! PlatformLink::connect(session) --> Box<dyn LinkConnection>
//!     |                                   |
//!     |   register pid                    |
//!     |                                   v
//!     |                      run(shutdown, on_event) --> LinkEvent*
//!     v
//! unregister
//! ```

pub mod bridge;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterConfig;
use crate::credentials::Credentials;

pub use bridge::{BRIDGE_ENV, BridgeLink, DEFAULT_BRIDGE};

/// Environment variable naming the platform REST endpoint.
pub const REST_URL_ENV: &str = "THENVOI_REST_URL";

/// Environment variable naming the platform WebSocket endpoint.
pub const WS_URL_ENV: &str = "THENVOI_WS_URL";

/// Errors from establishing or running a platform link.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("{var} not set")]
    MissingEndpoint { var: &'static str },

    #[error("failed to start platform bridge '{}': {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("platform link closed unexpectedly ({reason})")]
    Disconnected { reason: String },

    #[error(
        "timed out after {}s waiting for the platform to accept the connection",
        timeout.as_secs()
    )]
    ConnectTimeout { timeout: Duration },

    #[error("platform link I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Remediation text for the user, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::MissingEndpoint { var } if *var == WS_URL_ENV => {
                Some(format!("export {WS_URL_ENV}=wss://app.thenvoi.com/..."))
            }
            Self::MissingEndpoint { var } => Some(format!("export {var}=https://app.thenvoi.com/")),
            Self::Spawn { .. } => Some(format!(
                "Install the bridge or point {BRIDGE_ENV} at it."
            )),
            Self::ConnectTimeout { .. } => {
                Some("Check the endpoint URLs and the agent's API key.".to_string())
            }
            Self::Disconnected { .. } | Self::Io(_) => None,
        }
    }
}

/// REST and WebSocket endpoints of the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformEndpoints {
    pub rest_url: String,
    pub ws_url: String,
}

impl PlatformEndpoints {
    /// Explicit values win over `THENVOI_REST_URL` / `THENVOI_WS_URL`.
    /// Both endpoints are required; the WebSocket URL is checked first.
    pub fn resolve(
        rest_url: Option<String>,
        ws_url: Option<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, LinkError> {
        let pick = |explicit: Option<String>, var: &'static str| {
            explicit
                .or_else(|| env(var))
                .filter(|v| !v.is_empty())
                .ok_or(LinkError::MissingEndpoint { var })
        };
        let ws_url = pick(ws_url, WS_URL_ENV)?;
        let rest_url = pick(rest_url, REST_URL_ENV)?;
        Ok(Self { rest_url, ws_url })
    }
}

/// Everything needed to connect one agent.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub agent_name: String,
    pub credentials: Credentials,
    pub endpoints: PlatformEndpoints,
    pub adapter: AdapterConfig,
    /// How long `connect` waits for the platform to accept the agent.
    pub connect_timeout: Duration,
    /// How long shutdown waits for a graceful exit before forcing it.
    pub shutdown_timeout: Duration,
}

/// Something that happened on an established link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    /// The platform accepted the agent.
    Connected {
        #[serde(default)]
        agent_id: Option<String>,
    },
    /// A chat message was delivered to or produced by the agent.
    Message {
        #[serde(default)]
        room_id: Option<String>,
        #[serde(default)]
        sender: Option<String>,
        content: String,
    },
    /// A recoverable error reported by the platform side.
    Error { message: String },
}

/// Establishes platform sessions.
#[async_trait]
pub trait PlatformLink: Send + Sync {
    /// Connect `session`, resolving once the platform has accepted it.
    async fn connect(&self, session: &SessionConfig) -> Result<Box<dyn LinkConnection>, LinkError>;
}

/// An established session.
#[async_trait]
pub trait LinkConnection: Send {
    /// OS process backing the link, if there is one.
    fn pid(&self) -> Option<u32>;

    /// Drive the link until `shutdown` is cancelled (returns `Ok`) or the
    /// platform side ends. Every event is passed to `on_event`.
    async fn run(
        self: Box<Self>,
        shutdown: CancellationToken,
        on_event: &mut (dyn FnMut(LinkEvent) + Send),
    ) -> Result<(), LinkError>;
}
