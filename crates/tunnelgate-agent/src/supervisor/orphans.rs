//! Sweep for tunnel-client processes this supervisor does not own

use std::path::{Path, PathBuf};
use sysinfo::{Process, System};
use tracing::{debug, info, warn};

/// Run [`kill_orphans`] on the blocking pool
pub async fn reap_orphans(program: PathBuf) -> usize {
    match tokio::task::spawn_blocking(move || kill_orphans(&program)).await {
        Ok(killed) => killed,
        Err(e) => {
            warn!(error = %e, "Orphan sweep task failed");
            0
        }
    }
}

/// Kill every process running `program`, except this one
///
/// Returns the number of processes killed. Failures are logged. Scans the
/// process table, so call it off the async runtime.
pub fn kill_orphans(program: &Path) -> usize {
    let target = program
        .canonicalize()
        .unwrap_or_else(|_| program.to_path_buf());

    let mut system = System::new();
    system.refresh_processes();
    let own_pid = sysinfo::get_current_pid().ok();

    let mut killed = 0;
    for (pid, process) in system.processes() {
        if Some(*pid) == own_pid || !runs_program(process, &target) {
            continue;
        }
        if process.kill() {
            info!(pid = pid.as_u32(), program = %target.display(), "Killed orphaned process");
            killed += 1;
        } else {
            warn!(pid = pid.as_u32(), program = %target.display(), "Failed to kill orphaned process");
        }
    }

    debug!(program = %target.display(), killed = killed, "Orphan sweep done");
    killed
}

fn runs_program(process: &Process, program: &Path) -> bool {
    if process.exe().is_some_and(|exe| exe == program) {
        return true;
    }
    process
        .cmd()
        .first()
        .is_some_and(|arg0| Path::new(arg0) == program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_skips_unknown_program() {
        assert_eq!(kill_orphans(Path::new("/nonexistent/tunnelgate/npc")), 0);
    }

    #[tokio::test]
    async fn test_async_sweep_skips_unknown_program() {
        assert_eq!(reap_orphans(PathBuf::from("/nonexistent/tunnelgate/npc")).await, 0);
    }
}
