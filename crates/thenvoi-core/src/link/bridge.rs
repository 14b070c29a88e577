//! Subprocess bridge to the platform SDK.
//!
//! Launches the bridge executable with the session in its environment and
//! parses the JSON lines it prints on stdout into [`LinkEvent`]s. Lines that
//! are not recognised events (including plain log output) are skipped.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    LinkConnection, LinkError, LinkEvent, PlatformLink, REST_URL_ENV, SessionConfig, WS_URL_ENV,
};
use crate::credentials::{AGENT_ID_ENV, API_KEY_ENV};
use crate::process::signal::{self, Signal};

/// Environment variable naming the bridge executable.
pub const BRIDGE_ENV: &str = "THENVOI_BRIDGE";

/// Bridge executable looked up on `PATH` when `THENVOI_BRIDGE` is unset.
pub const DEFAULT_BRIDGE: &str = "thenvoi-bridge";

/// Variables the bridge reads its session from.
pub const AGENT_NAME_ENV: &str = "THENVOI_AGENT_NAME";
pub const ADAPTER_CONFIG_ENV: &str = "THENVOI_ADAPTER_CONFIG";

/// [`PlatformLink`] backed by a bridge subprocess.
#[derive(Debug, Clone)]
pub struct BridgeLink {
    program: PathBuf,
}

impl BridgeLink {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// `THENVOI_BRIDGE`, else `thenvoi-bridge` on `PATH`.
    ///
    /// Falls back to the bare name when `PATH` has no match, so the spawn
    /// error names what was looked for.
    pub fn from_env() -> Self {
        let program = std::env::var_os(BRIDGE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| which::which(DEFAULT_BRIDGE).ok())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BRIDGE));
        Self::new(program)
    }
}

/// Parse one stdout line, returning `None` for anything that is not an event.
fn parse_event_line(line: &str) -> Option<LinkEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(line = trimmed, error = %e, "ignoring non-event bridge output");
            None
        }
    }
}

/// Read lines until the bridge reports `connected`. `Ok(false)` means stdout
/// closed first.
async fn await_connected(
    lines: &mut Lines<BufReader<ChildStdout>>,
    agent: &str,
) -> std::io::Result<bool> {
    while let Some(line) = lines.next_line().await? {
        match parse_event_line(&line) {
            Some(LinkEvent::Connected { .. }) => return Ok(true),
            Some(LinkEvent::Error { message }) => {
                warn!(agent, %message, "bridge reported error while connecting");
            }
            Some(other) => debug!(event = ?other, "event before connect"),
            None => {}
        }
    }
    Ok(false)
}

fn describe_exit(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => format!("bridge {status}"),
        Err(e) => format!("bridge wait failed: {e}"),
    }
}

#[async_trait]
impl PlatformLink for BridgeLink {
    async fn connect(&self, session: &SessionConfig) -> Result<Box<dyn LinkConnection>, LinkError> {
        let adapter_json = serde_json::to_string(&session.adapter)
            .map_err(|e| LinkError::Io(std::io::Error::other(e)))?;

        let mut cmd = Command::new(&self.program);
        cmd.env(AGENT_NAME_ENV, &session.agent_name)
            .env(AGENT_ID_ENV, &session.credentials.agent_id)
            .env(API_KEY_ENV, &session.credentials.api_key)
            .env(REST_URL_ENV, &session.endpoints.rest_url)
            .env(WS_URL_ENV, &session.endpoints.ws_url)
            .env(ADAPTER_CONFIG_ENV, adapter_json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // The bridge must not outlive us even when we die without running
        // destructors (SIGKILL, a forced stop).
        #[cfg(target_os = "linux")]
        {
            let parent = std::process::id();
            // SAFETY: prctl and getppid are async-signal-safe and touch no
            // memory shared with the parent.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    // The parent may have exited before the request took effect.
                    if libc::getppid() as u32 != parent {
                        return Err(std::io::Error::other("parent exited during spawn"));
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().map_err(|source| LinkError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LinkError::Io(std::io::Error::other("bridge stdout not captured")))?;
        let mut lines = BufReader::new(stdout).lines();

        debug!(
            agent = %session.agent_name,
            pid = ?pid,
            adapter = %session.adapter.kind(),
            "bridge started"
        );

        let outcome = tokio::time::timeout(
            session.connect_timeout,
            await_connected(&mut lines, &session.agent_name),
        )
        .await;

        match outcome {
            Ok(Ok(true)) => {
                info!(agent = %session.agent_name, pid = ?pid, "connected to platform");
                Ok(Box::new(BridgeConnection {
                    child,
                    lines,
                    pid,
                    shutdown_timeout: session.shutdown_timeout,
                }))
            }
            Ok(Ok(false)) => Err(LinkError::Disconnected {
                reason: describe_exit(child.wait().await),
            }),
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(LinkError::Io(e))
            }
            Err(_) => {
                let _ = child.kill().await;
                Err(LinkError::ConnectTimeout {
                    timeout: session.connect_timeout,
                })
            }
        }
    }
}

/// A connected bridge process.
struct BridgeConnection {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    pid: Option<u32>,
    shutdown_timeout: Duration,
}

impl BridgeConnection {
    /// SIGTERM, wait up to the shutdown timeout, then SIGKILL.
    async fn terminate(mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        if let Err(e) = signal::send(pid, Signal::Terminate) {
            if !signal::is_already_gone(&e) {
                warn!(pid, error = %e, "failed to send SIGTERM to bridge");
            }
        }
        match tokio::time::timeout(self.shutdown_timeout, self.child.wait()).await {
            Ok(status) => debug!(pid, status = ?status, "bridge exited"),
            Err(_) => {
                warn!(
                    pid,
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "bridge ignored SIGTERM, killing"
                );
                if let Err(e) = self.child.kill().await {
                    warn!(pid, error = %e, "failed to kill bridge");
                }
            }
        }
    }
}

#[async_trait]
impl LinkConnection for BridgeConnection {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn run(
        mut self: Box<Self>,
        shutdown: CancellationToken,
        on_event: &mut (dyn FnMut(LinkEvent) + Send),
    ) -> Result<(), LinkError> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(pid = ?self.pid, "shutting down platform link");
                    self.terminate().await;
                    return Ok(());
                }
                line = self.lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_event_line(&line) {
                            on_event(event);
                        }
                    }
                    Ok(None) => {
                        let status = self.child.wait().await;
                        return match status {
                            Ok(status) if status.success() => {
                                info!(pid = ?self.pid, "bridge finished");
                                Ok(())
                            }
                            other => Err(LinkError::Disconnected {
                                reason: describe_exit(other),
                            }),
                        };
                    }
                    Err(e) => {
                        self.terminate().await;
                        return Err(LinkError::Io(e));
                    }
                },
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    use crate::adapter::{AdapterConfig, AdapterKind};
    use crate::credentials::Credentials;
    use crate::link::PlatformEndpoints;
    use thenvoi_test_utils::{SAMPLE_AGENT_ID, SAMPLE_API_KEY, Sandbox};

    fn session(connect_timeout: Duration, shutdown_timeout: Duration) -> SessionConfig {
        SessionConfig {
            agent_name: "test-agent".into(),
            credentials: Credentials {
                agent_id: SAMPLE_AGENT_ID.into(),
                api_key: SAMPLE_API_KEY.into(),
            },
            endpoints: PlatformEndpoints {
                rest_url: "https://rest.invalid/".into(),
                ws_url: "wss://ws.invalid/".into(),
            },
            adapter: AdapterConfig::build(AdapterKind::Passthrough, None, |_| None).unwrap(),
            connect_timeout,
            shutdown_timeout,
        }
    }

    fn quick() -> SessionConfig {
        session(Duration::from_secs(5), Duration::from_secs(5))
    }

    async fn collect(
        conn: Box<dyn LinkConnection>,
        shutdown: CancellationToken,
    ) -> (Result<(), LinkError>, Vec<LinkEvent>) {
        let mut events = Vec::new();
        let result = conn.run(shutdown, &mut |e| events.push(e)).await;
        (result, events)
    }

    #[tokio::test]
    async fn connect_then_stream_events_until_exit() {
        let sandbox = Sandbox::new();
        let bridge = sandbox.write_script(
            "bridge",
            r#"echo 'starting up'
echo '{"type":"connected","agent_id":"x"}'
echo '{"type":"message","room_id":"room-1","sender":"alice","content":"hello"}'
echo 'not json'
echo '{"type":"heartbeat"}'
echo '{"type":"error","message":"rate limited"}'
exit 0"#,
        );

        let conn = BridgeLink::new(bridge).connect(&quick()).await.unwrap();
        assert!(conn.pid().is_some());

        let (result, events) = collect(conn, CancellationToken::new()).await;
        result.unwrap();
        assert_eq!(
            events,
            vec![
                LinkEvent::Message {
                    room_id: Some("room-1".into()),
                    sender: Some("alice".into()),
                    content: "hello".into(),
                },
                LinkEvent::Error {
                    message: "rate limited".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn session_is_passed_through_environment() {
        let sandbox = Sandbox::new();
        let bridge = sandbox.write_script(
            "bridge",
            r#"echo '{"type":"connected"}'
printf '{"type":"message","content":"%s|%s|%s|%s"}\n' \
  "$THENVOI_AGENT_ID" "$THENVOI_REST_URL" "$THENVOI_WS_URL" "$THENVOI_AGENT_NAME"
printf '{"type":"message","content":"%s"}\n' "$(echo "$THENVOI_ADAPTER_CONFIG" | sed 's/"/#/g')""#,
        );

        let conn = BridgeLink::new(bridge).connect(&quick()).await.unwrap();
        let (result, events) = collect(conn, CancellationToken::new()).await;
        result.unwrap();

        let contents: Vec<_> = events
            .into_iter()
            .map(|e| match e {
                LinkEvent::Message { content, .. } => content,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(
            contents[0],
            format!("{SAMPLE_AGENT_ID}|https://rest.invalid/|wss://ws.invalid/|test-agent")
        );
        assert_eq!(contents[1], "{#adapter#:#passthrough#}");
    }

    #[tokio::test]
    async fn exit_before_connect_is_disconnected() {
        let sandbox = Sandbox::new();
        let bridge = sandbox.write_script("bridge", "echo 'auth failed' >&2\nexit 3");

        let err = BridgeLink::new(bridge).connect(&quick()).await.err().unwrap();
        match err {
            LinkError::Disconnected { reason } => assert!(reason.contains('3'), "{reason}"),
            other => panic!("expected Disconnected, got {other}"),
        }
    }

    #[tokio::test]
    async fn slow_handshake_times_out() {
        let sandbox = Sandbox::new();
        let bridge = sandbox.write_script("bridge", "exec sleep 30");

        let start = Instant::now();
        let err = BridgeLink::new(bridge)
            .connect(&session(Duration::from_millis(300), Duration::from_secs(1)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::ConnectTimeout { .. }), "{err}");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn missing_bridge_is_spawn_error() {
        let err = BridgeLink::new("/nonexistent/thenvoi-bridge")
            .connect(&quick())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, LinkError::Spawn { .. }));
        assert!(err.hint().unwrap().contains(BRIDGE_ENV));
    }

    #[tokio::test]
    async fn shutdown_terminates_bridge() {
        let sandbox = Sandbox::new();
        let bridge =
            sandbox.write_script("bridge", "echo '{\"type\":\"connected\"}'\nexec sleep 30");

        let conn = BridgeLink::new(bridge).connect(&quick()).await.unwrap();
        let pid = conn.pid().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let (result, _) = collect(conn, shutdown).await;
        result.unwrap();
        assert!(!signal::is_alive(pid));
    }

    #[tokio::test]
    async fn shutdown_escalates_when_term_is_ignored() {
        let sandbox = Sandbox::new();
        let bridge = sandbox.write_script(
            "bridge",
            "trap '' TERM\necho '{\"type\":\"connected\"}'\nwhile true; do sleep 1; done",
        );

        let conn = BridgeLink::new(bridge)
            .connect(&session(Duration::from_secs(5), Duration::from_millis(300)))
            .await
            .unwrap();
        let pid = conn.pid().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let start = Instant::now();
        let (result, _) = collect(conn, shutdown).await;
        result.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(!signal::is_alive(pid));
    }

    #[test]
    fn parse_skips_blank_and_unknown_lines() {
        assert_eq!(parse_event_line("   "), None);
        assert_eq!(parse_event_line("INFO booting"), None);
        assert_eq!(parse_event_line(r#"{"type":"typing"}"#), None);
        assert_eq!(
            parse_event_line(r#"{"type":"connected"}"#),
            Some(LinkEvent::Connected { agent_id: None })
        );
    }
}
