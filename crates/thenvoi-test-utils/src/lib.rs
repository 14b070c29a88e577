//! Shared test utilities for thenvoi integration tests.
//!
//! Provides isolated on-disk locations for the credential store and the
//! process state directory, plus helpers for producing OS processes in
//! known states (dead, alive, deaf to SIGTERM).

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Canonical UUID used by fixtures.
pub const SAMPLE_AGENT_ID: &str = "12345678-1234-1234-1234-123456789012";

/// Secret used by fixtures.
pub const SAMPLE_API_KEY: &str = "sk-test-api-key-12345";

/// A temporary sandbox holding a credential store path and a state directory.
///
/// Everything is removed when the sandbox is dropped.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create sandbox dir");
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the credential store file (not created).
    pub fn config_path(&self) -> PathBuf {
        self.dir.path().join("agent_config.yaml")
    }

    /// Path of the process state directory (not created).
    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Write raw YAML into the credential store file.
    pub fn write_config(&self, yaml: &str) -> PathBuf {
        let path = self.config_path();
        std::fs::write(&path, yaml).expect("failed to write sandbox config");
        path
    }

    /// Write a store with two valid agents, `test-agent` and `another-agent`.
    pub fn write_sample_config(&self) -> PathBuf {
        self.write_config(&format!(
            "test-agent:\n  agent_id: {SAMPLE_AGENT_ID}\n  api_key: {SAMPLE_API_KEY}\n\
             another-agent:\n  agent_id: 87654321-4321-4321-4321-210987654321\n\
             \x20 api_key: sk-another-key-67890\n"
        ))
    }

    /// Write an executable shell script into the sandbox and return its path.
    pub fn write_script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("failed to chmod script");
        }
        path
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Return a PID that belonged to a process which has already exited and
/// been reaped.
pub fn dead_pid() -> u32 {
    let mut child = Command::new("true")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn `true`");
    let pid = child.id();
    child.wait().expect("failed to reap `true`");
    pid
}

/// A child process reaped by a background thread as soon as it exits.
///
/// Reaping matters for liveness checks: an exited but un-waited child is a
/// zombie until its parent collects it.
pub struct ReapedChild {
    pid: u32,
    waiter: Option<JoinHandle<()>>,
}

impl ReapedChild {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the process has exited and been reaped.
    pub fn join(mut self) {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
    }
}

fn reap_in_background(mut child: Child) -> ReapedChild {
    let pid = child.id();
    let waiter = std::thread::spawn(move || {
        let _ = child.wait();
    });
    ReapedChild {
        pid,
        waiter: Some(waiter),
    }
}

/// Spawn a long sleeper that exits on SIGTERM.
pub fn spawn_sleeper() -> ReapedChild {
    let child = Command::new("sleep")
        .arg("3600")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn sleeper");
    reap_in_background(child)
}

/// Spawn a long sleeper that ignores SIGTERM; only SIGKILL ends it.
///
/// Returns once the signal disposition is in place.
pub fn spawn_term_ignoring() -> ReapedChild {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg("trap '' TERM; echo ready; exec sleep 3600")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn TERM-ignoring sleeper");

    let stdout = child.stdout.take().expect("child stdout is piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("failed to read readiness line");
    assert_eq!(line.trim(), "ready", "unexpected readiness line: {line:?}");

    reap_in_background(child)
}

/// Spawn a shell that leads its own process group and has one sleeping
/// child in that group.
///
/// Returns the leader and the PID of its child. Signalling only the leader
/// would leave the child behind; signalling the group ends both.
#[cfg(unix)]
pub fn spawn_process_group() -> (ReapedChild, u32) {
    use std::os::unix::process::CommandExt;

    let mut child = Command::new("sh")
        .arg("-c")
        .arg("sleep 3600 & echo $!; wait")
        .process_group(0)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn process group");

    let stdout = child.stdout.take().expect("child stdout is piped");
    let mut line = String::new();
    BufReader::new(stdout)
        .read_line(&mut line)
        .expect("failed to read member pid");
    let member = line.trim().parse().expect("member pid is numeric");

    (reap_in_background(child), member)
}

/// Poll `condition` every 50ms until it holds or `timeout` passes.
///
/// Returns whether the condition was met.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Read the PID a fake bridge script wrote to `path`, waiting for it to
/// appear.
pub fn read_pid_file(path: &Path, timeout: Duration) -> Option<u32> {
    let mut pid = None;
    wait_for(timeout, || {
        pid = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse().ok());
        pid.is_some()
    });
    pid
}

/// Serialize tests that mutate process-wide environment variables.
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
