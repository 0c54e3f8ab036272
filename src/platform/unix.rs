use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Process group led by a spawned project server or build step.
#[derive(Debug, Clone, Copy)]
struct Group(Pid);

impl Group {
    fn of(leader: u32) -> Self {
        Group(Pid::from_raw(leader as i32))
    }

    fn signal(self, sig: Signal) -> Result<(), Errno> {
        killpg(self.0, sig)
    }
}

pub fn configure_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

pub async fn terminate_child(child: &mut Child, child_pid: Option<u32>, grace: Duration) -> bool {
    let Some(leader) = child_pid else {
        let _ = child.wait().await;
        return false;
    };
    let group = Group::of(leader);

    match group.signal(Signal::SIGTERM) {
        Ok(()) => debug!(pid = leader, "SIGTERM sent to project group"),
        Err(Errno::ESRCH) => {
            let _ = child.wait().await;
            return false;
        }
        Err(e) => {
            warn!(pid = leader, error = %e, "cannot signal project group, killing leader");
            kill_child(child, None).await;
            return true;
        }
    }

    if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
        debug!(pid = leader, %status, "project exited");
        // Workers that ignored the leader's exit.
        let _ = group.signal(Signal::SIGKILL);
        return false;
    }

    warn!(pid = leader, grace_ms = grace.as_millis() as u64, "grace period elapsed, sending SIGKILL");
    kill_child(child, child_pid).await;
    true
}

pub async fn kill_child(child: &mut Child, child_pid: Option<u32>) {
    if let Some(leader) = child_pid {
        let _ = Group::of(leader).signal(Signal::SIGKILL);
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

pub fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Socket inode listening on `port` in one `/proc/net/tcp{,6}` table.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn listening_inode(table: &str, port: u16) -> Option<u64> {
    const LISTEN: &str = "0A";
    let wanted = format!("{:04X}", port);
    table.lines().skip(1).find_map(|row| {
        let cols: Vec<&str> = row.split_whitespace().collect();
        let (local, state, inode) = (cols.get(1)?, cols.get(3)?, cols.get(9)?);
        let (_, local_port) = local.rsplit_once(':')?;
        if local_port != wanted || *state != LISTEN {
            return None;
        }
        inode.parse().ok().filter(|i| *i != 0)
    })
}

#[cfg(target_os = "linux")]
fn pid_holding_socket(inode: u64) -> Option<String> {
    let target = format!("socket:[{}]", inode);
    std::fs::read_dir("/proc")
        .ok()?
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.bytes().all(|b| b.is_ascii_digit()))
        .find(|pid| {
            std::fs::read_dir(format!("/proc/{}/fd", pid))
                .into_iter()
                .flatten()
                .flatten()
                .filter_map(|fd| std::fs::read_link(fd.path()).ok())
                .any(|link| link.as_os_str() == target.as_str())
        })
}

#[cfg(target_os = "linux")]
pub fn identify_port_owner(port: u16) -> Option<String> {
    let inode = ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|t| std::fs::read_to_string(t).ok())
        .find_map(|table| listening_inode(&table, port))?;
    let pid = pid_holding_socket(inode)?;

    let cmdline = std::fs::read(format!("/proc/{}/cmdline", pid)).unwrap_or_default();
    let command = String::from_utf8_lossy(&cmdline).replace('\0', " ");
    let command = command.trim();
    if command.is_empty() {
        return Some(format!("pid {}", pid));
    }
    let short: String = command.chars().take(60).collect();
    let ellipsis = if short.len() < command.len() { "..." } else { "" };
    Some(format!("{}{} (pid {})", short, ellipsis, pid))
}

#[cfg(not(target_os = "linux"))]
pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
