//! Thin wrappers over `kill(2)` for liveness checks and termination.

use std::io;

/// Signals the supervisor delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGTERM: ask the process to shut down.
    Terminate,
    /// SIGKILL: unconditional termination.
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
        }
    }
}

/// Convert to `pid_t`, refusing 0 and anything that would address a
/// process group instead of a single process.
#[cfg(unix)]
fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Zero-signal check: `true` if `pid` names a live process we may signal.
///
/// A process that exists but belongs to someone else reports `false`, as
/// does a PID that no longer exists. So does a zombie: an exited process
/// whose parent never reaps it still answers signal 0.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    let Some(raw_pid) = to_pid(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs permission and existence checks only.
    let exists = unsafe { libc::kill(raw_pid, 0) == 0 };
    exists && !is_zombie(pid)
}

/// Whether `pid` has exited but not been reaped.
#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name may contain spaces and parentheses; the state
    // field follows the last ')'.
    stat.rfind(')')
        .and_then(|end| stat[end + 1..].split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// The `kill(2)` target for `pid`: its whole process group when it leads
/// one (as detached agents do), otherwise the process alone.
///
/// A group that contains the caller is never addressed.
#[cfg(unix)]
fn kill_target(pid: libc::pid_t) -> libc::pid_t {
    // SAFETY: getpgid and getpgrp only read process attributes.
    let (group, own_group) = unsafe { (libc::getpgid(pid), libc::getpgrp()) };
    if group == pid && group != own_group {
        -group
    } else {
        pid
    }
}

/// Deliver `signal` to `pid`, and to the rest of its process group when
/// `pid` is the group leader.
///
/// Agents started in the background lead their own group, so children
/// they spawned (the platform bridge) receive the signal too and cannot
/// outlive a forced stop.
#[cfg(unix)]
pub fn send(pid: u32, signal: Signal) -> io::Result<()> {
    let Some(raw_pid) = to_pid(pid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {pid}"),
        ));
    };
    let target = kill_target(raw_pid);
    // SAFETY: target is a positive pid or the negated id of a group other
    // than ours; no memory is shared.
    let ret = unsafe { libc::kill(target, signal.as_raw()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Whether a delivery error means the target had already exited.
#[cfg(unix)]
pub fn is_already_gone(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn send(_pid: u32, _signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process signals are only supported on unix",
    ))
}

#[cfg(not(unix))]
pub fn is_already_gone(_err: &io::Error) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(std::process::id()));
    }

    #[test]
    fn zero_and_group_addresses_are_not_alive() {
        assert!(!is_alive(0));
        assert!(!is_alive(u32::MAX));
    }

    #[test]
    fn reaped_process_is_not_alive() {
        assert!(!is_alive(thenvoi_test_utils::dead_pid()));
    }

    #[test]
    fn send_to_dead_pid_is_already_gone() {
        let err = send(thenvoi_test_utils::dead_pid(), Signal::Terminate).unwrap_err();
        assert!(is_already_gone(&err), "unexpected error: {err}");
    }

    #[test]
    fn send_refuses_pid_zero() {
        let err = send(0, Signal::Kill).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(!is_already_gone(&err));
    }

    #[test]
    fn send_terminate_stops_sleeper() {
        let child = thenvoi_test_utils::spawn_sleeper();
        let pid = child.pid();
        assert!(is_alive(pid));
        send(pid, Signal::Terminate).unwrap();
        child.join();
        assert!(!is_alive(pid));
    }

    #[test]
    fn send_reaches_the_whole_group_of_a_leader() {
        let (leader, member) = thenvoi_test_utils::spawn_process_group();
        assert!(is_alive(leader.pid()));
        assert!(is_alive(member));

        send(leader.pid(), Signal::Kill).unwrap();
        leader.join();

        assert!(
            thenvoi_test_utils::wait_for(Duration::from_secs(5), || !is_alive(member)),
            "group member {member} survived SIGKILL to its leader"
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreaped_child_is_not_alive() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        // Not waited yet: the exited child lingers as a zombie.
        assert!(thenvoi_test_utils::wait_for(Duration::from_secs(5), || !is_alive(pid)));
        assert!(is_zombie(pid));
        child.wait().unwrap();
    }
}
