//! Supervisor behaviour against real `/bin/sh` children

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tunnelgate_agent::supervisor::{
    kill_orphans, reap_orphans, LaunchSpec, NpcClassifier, ProcessStatus, Supervisor, SupervisorError,
    SupervisorEvent, SupervisorOptions,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn sh(script: &str) -> LaunchSpec {
    LaunchSpec::new("/bin/sh", vec!["-c".into(), script.into()])
}

fn options() -> SupervisorOptions {
    SupervisorOptions {
        max_restarts: 3,
        reap_orphans: false,
    }
}

fn supervisor(spec: LaunchSpec) -> Supervisor {
    Supervisor::new(spec, Arc::new(NpcClassifier), options(), None)
}

/// Poll `condition` for up to ten seconds
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

// =============================================================================
// Restart Budget
// =============================================================================

#[tokio::test]
async fn test_failure_lines_exhaust_restart_budget() {
    let supervisor = supervisor(sh("echo 'Error: connection refused'; exec sleep 30"));
    supervisor.start(true).unwrap();

    assert!(
        eventually(|| supervisor.generation() == 4 && supervisor.status() == ProcessStatus::Stopped)
            .await
    );
    assert_eq!(supervisor.restart_count(), 3);

    // No fourth restart
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.generation(), 4);
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_unexpected_exit_uses_same_budget() {
    let supervisor = supervisor(sh("exit 1"));
    supervisor.start(true).unwrap();

    assert!(
        eventually(|| supervisor.generation() == 4 && supervisor.status() == ProcessStatus::Stopped)
            .await
    );
    assert_eq!(supervisor.restart_count(), 3);
}

#[tokio::test]
async fn test_healthy_run_resets_counter() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("runs");
    let script = format!(
        "n=$(cat {c} 2>/dev/null || echo 0); n=$((n+1)); echo $n > {c}; \
         if [ $n -lt 3 ]; then echo Error; else echo Successful; fi; exec sleep 30",
        c = counter.display()
    );
    let supervisor = supervisor(sh(&script));
    supervisor.start(true).unwrap();

    assert!(eventually(|| supervisor.status() == ProcessStatus::Running).await);
    assert_eq!(supervisor.generation(), 3);
    assert_eq!(supervisor.restart_count(), 0);

    supervisor.stop().await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_stop_is_final() {
    let supervisor = supervisor(sh("sleep 0.3; echo Error; exec sleep 30"));
    supervisor.start(true).unwrap();
    supervisor.stop().await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
    assert_eq!(supervisor.generation(), 1);

    // Stopping twice is a no-op
    supervisor.stop().await;
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_explicit_start_after_exhaustion() {
    let supervisor = supervisor(sh("exit 1"));
    supervisor.start(true).unwrap();
    assert!(
        eventually(|| supervisor.generation() == 4 && supervisor.status() == ProcessStatus::Stopped)
            .await
    );

    supervisor.start(true).unwrap();
    assert!(
        eventually(|| supervisor.generation() == 8 && supervisor.status() == ProcessStatus::Stopped)
            .await
    );
}

#[tokio::test]
async fn test_invalid_utf8_output_is_still_classified() {
    let supervisor = supervisor(sh(
        "printf '\\377\\n'; sleep 0.3; echo 'Successful connection'; exec sleep 30",
    ));
    supervisor.start(true).unwrap();

    assert!(eventually(|| supervisor.status() == ProcessStatus::Running).await);
    assert_eq!(supervisor.generation(), 1);
    assert_eq!(supervisor.restart_count(), 0);
    supervisor.stop().await;
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_stop_kills_whole_process_group() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("grandchild");
    let supervisor = supervisor(sh(&format!(
        "sleep 30 & echo $! > {}; exec sleep 30",
        pid_file.display()
    )));
    supervisor.start(true).unwrap();

    assert!(eventually(|| std::fs::read_to_string(&pid_file).is_ok_and(|s| s.ends_with('\n'))).await);
    let grandchild: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert!(is_alive(grandchild));

    supervisor.stop().await;
    assert!(eventually(|| !is_alive(grandchild)).await);
}

/// Running and not a zombie awaiting its reaper
#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        // State follows the parenthesized command name
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with(|c: char| c == 'Z' || c == 'X')),
        Err(_) => false,
    }
}

// =============================================================================
// Credential Rejection
// =============================================================================

#[tokio::test]
async fn test_rejection_is_reported_and_not_retried() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let supervisor = Supervisor::new(
        sh("echo 'Validation key incorrect'; exec sleep 30"),
        Arc::new(NpcClassifier),
        options(),
        Some(tx),
    );
    supervisor.start(true).unwrap();

    let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        SupervisorEvent::CredentialRejected {
            instance: supervisor.instance()
        }
    );
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(supervisor.generation(), 1);
}

// =============================================================================
// Spawning
// =============================================================================

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let supervisor = supervisor(LaunchSpec::new("/nonexistent/tunnelgate/npc", vec![]));
    let err = supervisor.start(true).unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }));
    assert_eq!(supervisor.status(), ProcessStatus::Stopped);
}

#[tokio::test]
async fn test_arguments_are_passed() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("args");
    let supervisor = supervisor(LaunchSpec::new(
        "/bin/sh",
        vec![
            "-c".into(),
            format!("echo \"$@\" > {}; exec sleep 30", out.display()),
            "npc".into(),
            "-server=bridge:8024".into(),
            "-vkey=k".into(),
        ],
    ));
    supervisor.start(true).unwrap();

    assert!(eventually(|| std::fs::read_to_string(&out).is_ok_and(|s| s.ends_with('\n'))).await);
    assert_eq!(
        std::fs::read_to_string(&out).unwrap().trim(),
        "-server=bridge:8024 -vkey=k"
    );
    supervisor.stop().await;
}

#[test]
fn test_orphan_sweep_kills_matching_program() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().canonicalize().unwrap().join("npc");
    std::fs::copy(Path::new("/bin/sleep"), &program).unwrap();

    let mut orphan = std::process::Command::new(&program).arg("30").spawn().unwrap();
    std::thread::sleep(Duration::from_millis(200));

    assert!(kill_orphans(&program) >= 1);
    let status = orphan.wait().unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_async_orphan_sweep_kills_matching_program() {
    let dir = tempfile::tempdir().unwrap();
    let program = dir.path().canonicalize().unwrap().join("npc");
    std::fs::copy(Path::new("/bin/sleep"), &program).unwrap();

    let mut orphan = std::process::Command::new(&program).arg("30").spawn().unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(reap_orphans(program).await >= 1);
    assert!(!orphan.wait().unwrap().success());
}
