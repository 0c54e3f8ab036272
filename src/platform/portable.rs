use std::time::Duration;
use tokio::process::{Child, Command};

pub fn configure_process_group(_cmd: &mut Command) {}

pub async fn terminate_child(
    child: &mut Child,
    _child_pid: Option<u32>,
    grace: Duration,
) -> bool {
    let _ = child.start_kill();
    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return false;
    }
    let _ = child.kill().await;
    true
}

pub async fn kill_child(child: &mut Child, _child_pid: Option<u32>) {
    let _ = child.kill().await;
}

pub fn is_process_alive(_pid: u32) -> bool {
    false
}

pub fn identify_port_owner(_port: u16) -> Option<String> {
    None
}
