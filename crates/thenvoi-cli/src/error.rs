//! Command-layer errors and how they map to messages and exit codes.

use thenvoi_core::adapter::AdapterError;
use thenvoi_core::credentials::CredentialError;
use thenvoi_core::link::LinkError;
use thenvoi_core::process::ProcessError;

/// Exit code for an interrupted command (128 + SIGINT).
pub const EXIT_INTERRUPTED: u8 = 130;

/// Failures that belong to the command layer rather than a library.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{message}")]
    Usage {
        message: String,
        hint: Option<String>,
    },

    #[error("aborted")]
    Aborted { hint: Option<String> },

    #[error("interrupted")]
    Interrupted,

    #[error("{count} validation error(s)")]
    ValidationFailed { count: usize },
}

impl CliError {
    pub fn usage(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }
}

/// Remediation text for any error the command layer may surface.
pub fn hint(err: &anyhow::Error) -> Option<String> {
    if let Some(e) = err.downcast_ref::<CredentialError>() {
        return e.hint();
    }
    if let Some(e) = err.downcast_ref::<ProcessError>() {
        return e.hint();
    }
    if let Some(e) = err.downcast_ref::<AdapterError>() {
        return e.hint();
    }
    if let Some(e) = err.downcast_ref::<LinkError>() {
        return e.hint();
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::Usage { hint, .. } | CliError::Aborted { hint }) => hint.clone(),
        _ => None,
    }
}

/// Process exit code for `err`.
///
/// Link failures exit 2, interruption 130, everything else 1.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<LinkError>().is_some() {
        return 2;
    }
    match err.downcast_ref::<CliError>() {
        Some(CliError::Interrupted) => EXIT_INTERRUPTED,
        _ => 1,
    }
}

/// Whether `err` was already reported to the user by the command itself.
pub fn is_silent(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<CliError>(),
        Some(CliError::ValidationFailed { .. })
    )
}
