//! `thenvoi test`: local preflight checks for one agent.
//!
//! Everything here runs offline. A failing check never aborts the others, so
//! one invocation reports every problem.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use thenvoi_core::credentials::{CredentialError, CredentialStore, is_uuid_shaped};
use thenvoi_core::link::{REST_URL_ENV, WS_URL_ENV};

use crate::error::CliError;
use crate::output::{self, OutputFormat};

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct CheckResult {
    name: &'static str,
    passed: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: true,
            message: message.into(),
            details: None,
        }
    }

    fn fail(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            passed: false,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Serialize)]
struct Report<'a> {
    agent: &'a str,
    checks: &'a [CheckResult],
    passed: usize,
    total: usize,
}

fn display_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

fn check_config_file(store: &CredentialStore) -> CheckResult {
    let path = display_path(store.path());
    if store.exists() {
        CheckResult::pass("Config file", "Found").with_details(path)
    } else {
        CheckResult::fail("Config file", "Not found").with_details(format!("Expected at: {path}"))
    }
}

fn check_agent_config(store: &CredentialStore, name: &str) -> CheckResult {
    const CHECK: &str = "Agent config";
    match store.resolve(name) {
        Ok(_) => CheckResult::pass(CHECK, "Found"),
        Err(CredentialError::NotFound { .. }) => {
            CheckResult::fail(CHECK, format!("Agent '{name}' not found"))
                .with_details("Run 'thenvoi config set' to add it")
        }
        Err(CredentialError::InvalidRecord { message }) => CheckResult::fail(CHECK, message),
        Err(e) => CheckResult::fail(CHECK, e.to_string()),
    }
}

fn check_agent_id(store: &CredentialStore, name: &str) -> CheckResult {
    const CHECK: &str = "Agent ID format";
    match store.get_details(name) {
        Ok(record) => {
            let agent_id = record.agent_id.unwrap_or_default();
            if is_uuid_shaped(&agent_id) {
                return CheckResult::pass(CHECK, "Valid UUID");
            }
            let shown = if agent_id.chars().count() > 20 {
                format!("{}...", agent_id.chars().take(20).collect::<String>())
            } else {
                agent_id
            };
            CheckResult::fail(CHECK, "Invalid UUID format").with_details(format!("Got: {shown}"))
        }
        Err(CredentialError::NotFound { .. }) => {
            CheckResult::fail(CHECK, "Cannot validate (agent not found)")
        }
        Err(e) => CheckResult::fail(CHECK, format!("Cannot validate ({e})")),
    }
}

fn check_env_vars(env: impl Fn(&str) -> Option<String>) -> CheckResult {
    const CHECK: &str = "Environment vars";
    let required = [REST_URL_ENV, WS_URL_ENV];
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|var| env(var).is_none_or(|v| v.is_empty()))
        .collect();

    if missing.is_empty() {
        CheckResult::pass(CHECK, "All required variables set").with_details(required.join(", "))
    } else {
        CheckResult::fail(CHECK, format!("Missing: {}", missing.join(", ")))
            .with_details("Export these variables before running")
    }
}

fn run_checks(
    store: &CredentialStore,
    name: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Vec<CheckResult> {
    vec![
        check_config_file(store),
        check_agent_config(store, name),
        check_agent_id(store, name),
        check_env_vars(env),
    ]
}

/// Run the test command.
///
/// Exits non-zero (silently, the report already says why) when any check
/// fails.
pub fn run_test(
    store: &CredentialStore,
    name: &str,
    verbose: bool,
    format: OutputFormat,
) -> Result<()> {
    let checks = run_checks(store, name, |var| std::env::var(var).ok());
    let total = checks.len();
    let passed = checks.iter().filter(|check| check.passed).count();

    if format == OutputFormat::Json {
        let report = Report {
            agent: name,
            checks: &checks,
            passed,
            total,
        };
        println!("{}", output::to_json(&report)?);
    } else {
        println!("Testing agent '{name}'...");
        println!();
        println!("Configuration:");
        for check in &checks {
            let status = if check.passed { "PASS" } else { "FAIL" };
            println!("  {status} {}: {}", check.name, check.message);
            if let Some(details) = check.details.as_deref().filter(|_| verbose) {
                println!("       {details}");
            }
        }
        println!();
        if passed == total {
            println!("All {total} checks passed");
        } else {
            println!("{} of {total} checks failed", total - passed);
        }
    }

    if passed == total {
        Ok(())
    } else {
        Err(CliError::ValidationFailed {
            count: total - passed,
        }
        .into())
    }
}
