//! Launching detached agent processes.
//!
//! A detached child runs in its own session, so it has no controlling
//! terminal and does not receive the terminal's job-control signals. Its
//! stdin is closed and stdout/stderr are appended to a log file. The caller
//! gets the PID back immediately and never waits on the child.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

/// Spawn `program args...` detached from the current terminal.
///
/// Output goes to `log_path` (created if missing, appended otherwise).
/// Returns the child's PID.
pub fn launch_detached<I, S>(program: &Path, args: I, log_path: &Path) -> io::Result<u32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(log_path)?;
    let log_err = log.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no parent memory.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = cmd.spawn()?;
    let pid = child.id();
    info!(
        pid,
        program = %program.display(),
        log = %log_path.display(),
        "launched detached process"
    );

    // Dropping the handle does not kill or wait on the child; once this
    // process exits the child is reparented.
    drop(child);
    Ok(pid)
}
