#![cfg(unix)]

use std::fs;
use std::process::Command;

use supervisor::cli::{DaemonController, DaemonStatus};
use supervisor::coordination::pid_file::{self, PidStatus};
use supervisor::coordination::PidFile;
use supervisor::error::SupervisorError;

fn reaped_pid() -> u32 {
    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn stale_pid_from_exited_child_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supervisor.pid");
    let stale = reaped_pid();
    fs::write(&path, format!("{stale}\n")).unwrap();

    assert_eq!(pid_file::probe(&path).unwrap(), PidStatus::Stale(stale));
    let claimed = PidFile::acquire(&path).unwrap();
    assert_eq!(
        fs::read_to_string(&path).unwrap().trim(),
        std::process::id().to_string()
    );
    claimed.release().unwrap();
    assert_eq!(pid_file::probe(&path).unwrap(), PidStatus::Missing);
}

#[test]
fn live_owner_blocks_a_second_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("supervisor.pid");

    let mut other = Command::new("sleep").arg("30").spawn().unwrap();
    fs::write(&path, format!("{}\n", other.id())).unwrap();

    let err = PidFile::acquire(&path).unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning { pid } if pid == other.id()));
    assert_eq!(err.to_string(), format!("already running (PID {})", other.id()));
    // The live owner's file is untouched
    assert_eq!(
        fs::read_to_string(&path).unwrap().trim(),
        other.id().to_string()
    );

    other.kill().unwrap();
    other.wait().unwrap();
}

#[tokio::test]
async fn status_distinguishes_running_from_stale() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("supervisor.pid");
    let config_path = dir.path().join("supervisor.toml");
    fs::write(
        &config_path,
        format!(
            "pid_file = \"{}\"\nstate_file = \"{}\"\n",
            pid_path.display(),
            dir.path().join("state.json").display()
        ),
    )
    .unwrap();
    let controller = DaemonController::new(&config_path);

    assert_eq!(controller.status().unwrap(), DaemonStatus::NotRunning);

    fs::write(&pid_path, format!("{}\n", std::process::id())).unwrap();
    assert_eq!(
        controller.status().unwrap(),
        DaemonStatus::Running(std::process::id())
    );

    fs::write(&pid_path, format!("{}\n", reaped_pid())).unwrap();
    assert_eq!(controller.status().unwrap(), DaemonStatus::NotRunning);

    fs::write(&pid_path, "garbage").unwrap();
    assert_eq!(controller.status().unwrap(), DaemonStatus::NotRunning);
}
