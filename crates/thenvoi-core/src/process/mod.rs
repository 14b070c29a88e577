//! Process registry and supervisor for long-running agents.
//!
//! Each running agent is represented by two files in a per-user state
//! directory:
//!
//! - `<name>.pid`: the decimal process id
//! - `<name>.info`: JSON with `started_at` (RFC 3339) and `adapter`
//!
//! Liveness is never stored. It is derived on every lookup by probing the
//! PID with signal 0, and a lookup that finds a dead PID deletes both files
//! before reporting the agent as absent. There is no background sweeper:
//! every read is also a cleanup.
//!
//! The registry takes no cross-process lock. Two CLI invocations racing on
//! the same name may interleave.

pub mod launch;
pub mod signal;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use launch::launch_detached;
pub use signal::Signal;

/// Environment variable overriding the state directory.
pub const STATE_DIR_ENV: &str = "THENVOI_STATE_DIR";

/// Directory name under the user's state area.
pub const APP_DIR_NAME: &str = "thenvoi-cli";

/// Default graceful-shutdown timeout used by the CLI.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

const PID_SUFFIX: &str = "pid";
const INFO_SUFFIX: &str = "info";
const LOG_SUFFIX: &str = "log";

/// Errors from the process registry and supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("invalid agent name {name:?}: must be non-empty and contain no path separators")]
    InvalidName { name: String },

    #[error("agent '{name}' is not running")]
    NotRunning { name: String },

    #[error("failed to deliver {signal} to agent '{name}' (pid {pid}): {source}")]
    SignalDelivery {
        name: String,
        pid: u32,
        signal: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("process state I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProcessError {
    /// Remediation text for the user, if any.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotRunning { name } => Some(format!("Start the agent with: thenvoi run {name}")),
            Self::SignalDelivery { pid, .. } => Some(format!(
                "Process {pid} may belong to another user; stop it manually."
            )),
            Self::InvalidName { .. } | Self::Io(_) => None,
        }
    }
}

/// A live agent process as seen by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentProcess {
    pub name: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub adapter: Option<String>,
}

impl AgentProcess {
    /// Time elapsed since the process registered, never negative.
    pub fn uptime(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }
}

/// Contents of the `.info` artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProcessInfo {
    started_at: DateTime<Utc>,
    #[serde(default)]
    adapter: Option<String>,
}

/// Return the default state directory.
///
/// `THENVOI_STATE_DIR` > `$XDG_STATE_HOME/thenvoi-cli` > `~/.local/state/thenvoi-cli`.
/// Like the config directory, this ignores the platform-specific
/// `dirs::state_dir()`, which is unset on macOS.
pub fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join(APP_DIR_NAME);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("state")
        .join(APP_DIR_NAME)
}

/// Whether `name` can be used as an artifact file stem.
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// PID-file registry and supervisor for agent processes.
#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    state_dir: PathBuf,
    poll_interval: Duration,
}

impl ProcessRegistry {
    /// Open (creating if needed) a registry rooted at `state_dir`.
    pub fn new(state_dir: impl Into<PathBuf>) -> Result<Self, ProcessError> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)?;
        Ok(Self {
            state_dir,
            poll_interval: Duration::from_secs(1),
        })
    }

    /// Open the registry at the default (or explicitly given) state directory.
    pub fn from_env(explicit: Option<&Path>) -> Result<Self, ProcessError> {
        match explicit {
            Some(dir) => Self::new(dir),
            None => Self::new(default_state_dir()),
        }
    }

    /// Override how often a graceful stop re-checks liveness.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn artifact(&self, name: &str, suffix: &str) -> PathBuf {
        self.state_dir.join(format!("{name}.{suffix}"))
    }

    /// Path of the PID artifact for `name`.
    pub fn pid_path(&self, name: &str) -> PathBuf {
        self.artifact(name, PID_SUFFIX)
    }

    /// Path of the info artifact for `name`.
    pub fn info_path(&self, name: &str) -> PathBuf {
        self.artifact(name, INFO_SUFFIX)
    }

    /// Path that a detached agent's stdout/stderr is appended to.
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.artifact(name, LOG_SUFFIX)
    }

    // -------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------

    /// Record `pid` as the running process for `name`.
    ///
    /// Overwrites any previous entry without checking whether it is live;
    /// callers check [`ProcessRegistry::is_running`] first.
    pub fn register(
        &self,
        name: &str,
        pid: u32,
        adapter: Option<&str>,
    ) -> Result<(), ProcessError> {
        if !is_valid_name(name) {
            return Err(ProcessError::InvalidName {
                name: name.to_string(),
            });
        }

        fs::write(self.pid_path(name), pid.to_string())?;

        let info = ProcessInfo {
            started_at: Utc::now(),
            adapter: adapter.map(str::to_string),
        };
        let json = serde_json::to_string(&info).map_err(io::Error::other)?;
        fs::write(self.info_path(name), json)?;

        info!(agent = name, pid, adapter = ?adapter, "registered agent process");
        Ok(())
    }

    /// Delete both artifacts for `name`. Missing files are not an error.
    pub fn unregister(&self, name: &str) -> Result<(), ProcessError> {
        if !is_valid_name(name) {
            return Ok(());
        }
        for path in [self.pid_path(name), self.info_path(name)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(agent = name, "unregistered agent process");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Lookup (side-effecting: dead entries are purged)
    // -------------------------------------------------------------------

    /// The live PID for `name`, if any.
    ///
    /// An unreadable or malformed PID file counts as absent. A PID that no
    /// longer answers the liveness check has its artifacts deleted before
    /// `None` is returned.
    pub fn get_pid(&self, name: &str) -> Option<u32> {
        if !is_valid_name(name) {
            return None;
        }
        let raw = fs::read_to_string(self.pid_path(name)).ok()?;
        let pid: u32 = match raw.trim().parse() {
            Ok(pid) => pid,
            Err(_) => {
                debug!(agent = name, contents = raw.trim(), "ignoring malformed pid file");
                return None;
            }
        };

        if signal::is_alive(pid) {
            return Some(pid);
        }

        debug!(agent = name, pid, "purging stale process entry");
        if let Err(e) = self.unregister(name) {
            warn!(agent = name, error = %e, "failed to purge stale process entry");
        }
        None
    }

    /// Whether `name` has a live process. Purges stale entries.
    pub fn is_running(&self, name: &str) -> bool {
        self.get_pid(name).is_some()
    }

    /// Full status for `name`, or `None` if it is not running.
    ///
    /// A missing or unreadable info artifact falls back to "now" as the
    /// start time and no adapter label.
    pub fn get_status(&self, name: &str) -> Option<AgentProcess> {
        let pid = self.get_pid(name)?;

        let info = fs::read_to_string(self.info_path(name))
            .ok()
            .and_then(|raw| serde_json::from_str::<ProcessInfo>(&raw).ok());
        let (started_at, adapter) = match info {
            Some(info) => (info.started_at, info.adapter),
            None => (Utc::now(), None),
        };

        Some(AgentProcess {
            name: name.to_string(),
            pid,
            started_at,
            adapter,
        })
    }

    /// Every live agent in the state directory.
    ///
    /// Resolves each `*.pid` file through [`ProcessRegistry::get_status`],
    /// so dead entries are purged as a side effect. Order is unspecified.
    pub fn list_running(&self) -> Result<Vec<AgentProcess>, ProcessError> {
        let entries = match fs::read_dir(&self.state_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut running = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PID_SUFFIX) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if let Some(status) = self.get_status(name) {
                running.push(status);
            }
        }
        Ok(running)
    }

    // -------------------------------------------------------------------
    // Supervision
    // -------------------------------------------------------------------

    /// Stop the agent registered as `name`.
    ///
    /// Returns `Ok(false)` if nothing was running. With `force`, sends
    /// SIGKILL at once. Otherwise sends SIGTERM, re-checks liveness every
    /// poll interval until `timeout` elapses, then escalates to SIGKILL.
    /// A process that vanishes before a signal lands counts as stopped.
    /// On success the entry is unregistered.
    pub fn stop(&self, name: &str, force: bool, timeout: Duration) -> Result<bool, ProcessError> {
        let Some(pid) = self.get_pid(name) else {
            return Ok(false);
        };

        let first = if force { Signal::Kill } else { Signal::Terminate };
        info!(agent = name, pid, signal = first.name(), "stopping agent");

        let outcome = signal::send(pid, first).map_err(|e| (first, e)).and_then(|()| {
            if force || self.wait_for_exit(pid, timeout) {
                return Ok(());
            }
            warn!(
                agent = name,
                pid,
                timeout_secs = timeout.as_secs(),
                "agent ignored SIGTERM, sending SIGKILL"
            );
            signal::send(pid, Signal::Kill).map_err(|e| (Signal::Kill, e))
        });

        match outcome {
            Ok(()) => {}
            Err((_, e)) if signal::is_already_gone(&e) => {
                debug!(agent = name, pid, "process exited before it could be signalled");
            }
            Err((sig, source)) => {
                return Err(ProcessError::SignalDelivery {
                    name: name.to_string(),
                    pid,
                    signal: sig.name(),
                    source,
                });
            }
        }

        self.unregister(name)?;
        Ok(true)
    }

    /// Poll until `pid` is gone or `timeout` elapses. Returns `true` if it exited.
    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !signal::is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Stop every live agent, returning how many were stopped.
    ///
    /// Not transactional: a failure on one agent is logged and the rest are
    /// still attempted.
    pub fn stop_all(&self, force: bool, timeout: Duration) -> Result<usize, ProcessError> {
        let mut stopped = 0;
        for agent in self.list_running()? {
            match self.stop(&agent.name, force, timeout) {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => warn!(agent = %agent.name, error = %e, "failed to stop agent"),
            }
        }
        Ok(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, ProcessRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ProcessRegistry::new(tmp.path().join("state")).unwrap();
        (tmp, registry)
    }

    #[test]
    fn new_creates_state_dir() {
        let (_tmp, registry) = registry();
        assert!(registry.state_dir().is_dir());
    }

    #[test]
    fn artifact_paths_use_name_as_stem() {
        let (_tmp, registry) = registry();
        assert!(registry.pid_path("bot").ends_with("bot.pid"));
        assert!(registry.info_path("bot").ends_with("bot.info"));
        assert!(registry.log_path("bot").ends_with("bot.log"));
    }

    #[test]
    fn names_with_separators_are_rejected() {
        let (_tmp, registry) = registry();
        for name in ["", ".", "..", "../escape", "a/b", "nul\0byte"] {
            let err = registry.register(name, std::process::id(), None).unwrap_err();
            assert!(matches!(err, ProcessError::InvalidName { .. }), "{name:?}: {err}");
            assert!(registry.get_pid(name).is_none());
        }
    }

    #[test]
    fn register_writes_both_artifacts() {
        let (_tmp, registry) = registry();
        registry.register("bot", 4242, Some("anthropic")).unwrap();

        let pid = fs::read_to_string(registry.pid_path("bot")).unwrap();
        assert_eq!(pid, "4242");

        let info: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(registry.info_path("bot")).unwrap()).unwrap();
        assert_eq!(info["adapter"], "anthropic");
        assert!(info["started_at"].as_str().is_some());
    }

    #[test]
    fn malformed_pid_file_counts_as_absent() {
        let (_tmp, registry) = registry();
        fs::write(registry.pid_path("bot"), "not a number").unwrap();
        assert_eq!(registry.get_pid("bot"), None);
    }

    #[test]
    fn status_falls_back_when_info_is_corrupt() {
        let (_tmp, registry) = registry();
        let me = std::process::id();
        registry.register("bot", me, Some("langgraph")).unwrap();
        fs::write(registry.info_path("bot"), "{not json").unwrap();

        let before = Utc::now();
        let status = registry.get_status("bot").unwrap();
        assert_eq!(status.pid, me);
        assert_eq!(status.adapter, None);
        assert!(status.started_at >= before);
    }

    #[test]
    fn status_reads_info_artifact() {
        let (_tmp, registry) = registry();
        let me = std::process::id();
        registry.register("bot", me, Some("crewai")).unwrap();

        let status = registry.get_status("bot").unwrap();
        assert_eq!(status.name, "bot");
        assert_eq!(status.adapter.as_deref(), Some("crewai"));
        assert!(status.uptime(Utc::now()) < Duration::from_secs(60));
    }

    #[test]
    fn uptime_is_never_negative() {
        let process = AgentProcess {
            name: "bot".into(),
            pid: 1,
            started_at: Utc::now() + chrono::Duration::hours(1),
            adapter: None,
        };
        assert_eq!(process.uptime(Utc::now()), Duration::ZERO);
    }

    #[test]
    fn list_running_ignores_unrelated_files() {
        let (_tmp, registry) = registry();
        registry.register("bot", std::process::id(), None).unwrap();
        fs::write(registry.state_dir().join("notes.txt"), "hello").unwrap();
        fs::write(registry.log_path("bot"), "log line").unwrap();

        let running = registry.list_running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "bot");
    }

    #[test]
    fn default_state_dir_honours_override() {
        let _lock = thenvoi_test_utils::lock_env();

        unsafe { std::env::set_var(STATE_DIR_ENV, "/tmp/thenvoi-state") };
        assert_eq!(default_state_dir(), PathBuf::from("/tmp/thenvoi-state"));
        unsafe { std::env::remove_var(STATE_DIR_ENV) };

        let orig_xdg = std::env::var("XDG_STATE_HOME").ok();
        unsafe { std::env::set_var("XDG_STATE_HOME", "/tmp/xdg-state") };
        let dir = default_state_dir();
        match orig_xdg {
            Some(x) => unsafe { std::env::set_var("XDG_STATE_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_STATE_HOME") },
        }
        assert_eq!(dir, PathBuf::from("/tmp/xdg-state/thenvoi-cli"));
    }

    #[test]
    fn not_running_hint_names_run_command() {
        let err = ProcessError::NotRunning { name: "bot".into() };
        assert_eq!(err.hint().unwrap(), "Start the agent with: thenvoi run bot");
    }
}
