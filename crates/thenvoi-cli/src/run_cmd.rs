//! `thenvoi run`: connect an agent to the platform, in the foreground or
//! detached in the background.

use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thenvoi_core::adapter::{AdapterCatalog, AdapterConfig, AdapterKind};
use thenvoi_core::credentials::CredentialStore;
use thenvoi_core::link::{BridgeLink, LinkEvent, PlatformEndpoints, PlatformLink, SessionConfig};
use thenvoi_core::process::{self, ProcessRegistry};

use crate::error::CliError;

/// How long the platform gets to accept a new connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Arguments of `thenvoi run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub name: String,
    pub adapter: String,
    pub model: Option<String>,
    pub background: bool,
    pub shutdown_timeout: Duration,
    pub ws_url: Option<String>,
    pub rest_url: Option<String>,
}

fn env_var(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Run the run command.
///
/// Everything that can be checked locally is checked before anything is
/// started: credentials, endpoints, adapter readiness and whether the agent
/// is already running.
pub async fn run_agent(
    args: RunArgs,
    store: &CredentialStore,
    registry: &ProcessRegistry,
    catalog: &AdapterCatalog,
) -> Result<()> {
    let credentials = store.resolve(&args.name)?;
    let endpoints =
        PlatformEndpoints::resolve(args.rest_url.clone(), args.ws_url.clone(), env_var)?;

    let kind: AdapterKind = args.adapter.parse()?;
    catalog.ensure_ready(kind, env_var)?;
    let adapter = AdapterConfig::build(kind, args.model.as_deref(), env_var)?;

    // A background launch registers the child before the child checks this.
    if let Some(pid) = registry.get_pid(&args.name) {
        if pid != std::process::id() {
            return Err(CliError::usage(
                format!("Agent '{}' is already running (PID {pid})", args.name),
                format!("Use 'thenvoi stop {}' to stop it first", args.name),
            )
            .into());
        }
    }

    if args.background {
        return start_background(&args, &endpoints, store, registry, kind);
    }

    let session = SessionConfig {
        agent_name: args.name.clone(),
        credentials,
        endpoints,
        adapter,
        connect_timeout: CONNECT_TIMEOUT,
        shutdown_timeout: args.shutdown_timeout,
    };
    run_foreground(&session, registry, &BridgeLink::from_env()).await
}

/// Relaunch this executable detached as `thenvoi run NAME ...` and return.
fn start_background(
    args: &RunArgs,
    endpoints: &PlatformEndpoints,
    store: &CredentialStore,
    registry: &ProcessRegistry,
    kind: AdapterKind,
) -> Result<()> {
    let exe = std::env::current_exe().context("failed to locate the thenvoi executable")?;
    let child_args = background_args(args, endpoints, store.path(), registry.state_dir())?;
    let log_path = registry.log_path(&args.name);

    let pid = process::launch_detached(&exe, &child_args, &log_path)
        .with_context(|| format!("failed to start agent '{}' in the background", args.name))?;
    registry.register(&args.name, pid, Some(kind.as_str()))?;

    println!("Started agent '{}' in background (PID: {pid})", args.name);
    println!("Logs: {}", log_path.display());
    println!("Use 'thenvoi status' to check status");
    println!("Use 'thenvoi stop {}' to stop", args.name);
    Ok(())
}

/// Arguments for the detached child. Paths are made absolute because the
/// child may not share our working directory's meaning.
fn background_args(
    args: &RunArgs,
    endpoints: &PlatformEndpoints,
    config_path: &Path,
    state_dir: &Path,
) -> Result<Vec<OsString>> {
    let mut out: Vec<OsString> = vec![
        "-v".into(),
        "--config".into(),
        std::path::absolute(config_path)?.into(),
        "--state-dir".into(),
        std::path::absolute(state_dir)?.into(),
        "run".into(),
        args.name.clone().into(),
        "--adapter".into(),
        args.adapter.clone().into(),
        "--timeout".into(),
        args.shutdown_timeout.as_secs().to_string().into(),
        "--ws-url".into(),
        endpoints.ws_url.clone().into(),
        "--rest-url".into(),
        endpoints.rest_url.clone().into(),
    ];
    if let Some(model) = &args.model {
        out.push("--model".into());
        out.push(model.clone().into());
    }
    Ok(out)
}

/// Connect, register this process, and run until a shutdown signal or the
/// platform side ends. The registration is removed on every exit path.
///
/// Signals are watched from the start: a SIGTERM that lands while the
/// handshake is still pending abandons it, which kills the bridge.
pub async fn run_foreground(
    session: &SessionConfig,
    registry: &ProcessRegistry,
    link: &dyn PlatformLink,
) -> Result<()> {
    let name = session.agent_name.as_str();
    println!(
        "Starting agent '{name}' with {} adapter...",
        session.adapter.kind()
    );
    if let Some(model) = session.adapter.model() {
        println!("Model: {model}");
    }
    println!("Press Ctrl+C to stop");
    println!();

    let shutdown = CancellationToken::new();
    let watcher = spawn_signal_watcher(shutdown.clone());

    let connection = tokio::select! {
        connected = link.connect(session) => match connected {
            Ok(connection) => connection,
            Err(e) => {
                watcher.abort();
                return Err(e.into());
            }
        },
        _ = shutdown.cancelled() => {
            info!(agent = name, "interrupted before the platform accepted the connection");
            // A background launch is registered by its parent.
            if let Err(e) = registry.unregister(name) {
                warn!(agent = name, error = %e, "failed to unregister agent");
            }
            println!("Agent '{name}' stopped");
            return Err(CliError::Interrupted.into());
        }
    };

    registry.register(name, std::process::id(), Some(session.adapter.kind().as_str()))?;
    info!(agent = name, bridge_pid = ?connection.pid(), "agent registered");
    println!("Connected to Thenvoi platform");

    let mut on_event = |event: LinkEvent| print_event(name, event);
    let result = connection.run(shutdown.clone(), &mut on_event).await;

    watcher.abort();
    if let Err(e) = registry.unregister(name) {
        warn!(agent = name, error = %e, "failed to unregister agent");
    }
    println!("Agent '{name}' stopped");

    result?;
    Ok(())
}

fn print_event(agent: &str, event: LinkEvent) {
    match event {
        LinkEvent::Connected { agent_id } => {
            debug!(agent, ?agent_id, "platform re-confirmed connection");
        }
        LinkEvent::Message {
            room_id,
            sender,
            content,
        } => {
            let room = room_id.as_deref().unwrap_or("-");
            let sender = sender.as_deref().unwrap_or("unknown");
            println!("[{room}] {sender}: {content}");
        }
        LinkEvent::Error { message } => {
            warn!(agent, %message, "platform reported an error");
            eprintln!("Error: {message}");
        }
    }
}

/// Start listening for SIGINT and SIGTERM; the returned task cancels
/// `shutdown` on the first one.
///
/// The handlers are installed before this returns, so a signal that lands
/// before the task is first polled still counts.
fn spawn_signal_watcher(shutdown: CancellationToken) -> JoinHandle<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let listen = |kind: SignalKind, label: &'static str| {
            signal(kind)
                .inspect_err(|e| warn!(error = %e, "cannot listen for {label}"))
                .ok()
        };
        let mut int = listen(SignalKind::interrupt(), "SIGINT");
        let mut term = listen(SignalKind::terminate(), "SIGTERM");

        tokio::spawn(async move {
            tokio::select! {
                Some(()) = recv(&mut int) => {}
                Some(()) = recv(&mut term) => {}
                else => return,
            }
            eprintln!();
            eprintln!("Shutting down...");
            shutdown.cancel();
        })
    }
    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!();
                eprintln!("Shutting down...");
                shutdown.cancel();
            }
        })
    }
}

#[cfg(unix)]
async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(signal) => signal.recv().await,
        None => None,
    }
}
