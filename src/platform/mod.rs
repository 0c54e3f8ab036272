//! Process-group and port-owner helpers that differ per OS.

use std::time::Duration;

use tokio::process::{Child, Command};

#[cfg(not(unix))]
mod portable;
#[cfg(unix)]
mod unix;

#[cfg(not(unix))]
use portable as os;
#[cfg(unix)]
use unix as os;

/// Spawn `cmd` as the leader of a fresh process group, so forked workers
/// are signalled together with it.
pub fn configure_process_group(cmd: &mut Command) {
    os::configure_process_group(cmd)
}

/// SIGTERM the group, then SIGKILL it if it outlives `grace`.
/// Returns `true` when the kill was needed.
pub async fn terminate_child(child: &mut Child, child_pid: Option<u32>, grace: Duration) -> bool {
    os::terminate_child(child, child_pid, grace).await
}

/// SIGKILL the group immediately and reap the leader.
pub async fn kill_child(child: &mut Child, child_pid: Option<u32>) {
    os::kill_child(child, child_pid).await
}

pub fn is_process_alive(pid: u32) -> bool {
    os::is_process_alive(pid)
}

/// Command line and pid of whoever listens on `port`, where the OS exposes it.
pub fn identify_port_owner(port: u16) -> Option<String> {
    os::identify_port_owner(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn current_process_is_alive() {
        assert!(is_process_alive(std::process::id()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_sleeping_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("60");
        configure_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id();

        let forced = terminate_child(&mut child, pid, Duration::from_secs(5)).await;
        assert!(!forced, "sleep should exit on SIGTERM");
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_escalates_when_term_is_ignored() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("trap '' TERM; while true; do sleep 1; done");
        configure_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let pid = child.id();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let forced = terminate_child(&mut child, pid, Duration::from_millis(300)).await;
        assert!(forced);
        assert!(child.try_wait().unwrap().is_some());
    }
}
