//! Tunnel-client process supervisor
//!
//! Runs one external executable, classifies every line it writes to stdout
//! and stderr, and restarts it under a bounded budget when it reports a
//! failure or exits on its own.
//!
//! ## Concurrency
//!
//! Two line readers and one exit waiter run per child. All of them, and the
//! public `start`/`stop` calls, go through one mutex around the
//! [`Lifecycle`]. Each spawn gets a generation number; events from an older
//! generation are ignored, and `stop` pushes the restart budget past its
//! bound, so a killed child can never trigger a restart.
//!
//! Children run in their own process group and are killed as a group.
//! Orphan sweeps scan the process table and run on the blocking pool,
//! never under the lifecycle lock.

pub mod classify;
pub mod lifecycle;
pub mod orphans;

pub use classify::{Classification, NpcClassifier, OutputClassifier};
pub use lifecycle::{Lifecycle, ProcessStatus, Transition};
pub use orphans::{kill_orphans, reap_orphans};

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Default automatic restart budget
pub const DEFAULT_MAX_RESTARTS: u32 = 3;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Executable and arguments to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Automatic restarts allowed between healthy runs
    pub max_restarts: u32,

    /// Kill stray processes running the same program before the first
    /// start and after every stop
    pub reap_orphans: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            reap_orphans: true,
        }
    }
}

/// Notifications a supervisor sends to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The child reported that its credential was refused
    CredentialRejected { instance: u64 },
}

/// Handle to one supervised process
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

struct Shared {
    instance: u64,
    spec: LaunchSpec,
    classifier: Arc<dyn OutputClassifier>,
    options: SupervisorOptions,
    events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    slot: Mutex<Slot>,
}

struct Slot {
    lifecycle: Lifecycle,
    kill_switch: Option<oneshot::Sender<()>>,
}

impl Slot {
    fn kill_child(&mut self) {
        if let Some(kill_switch) = self.kill_switch.take() {
            // The waiter is gone once the child has exited
            let _ = kill_switch.send(());
        }
    }
}

impl Supervisor {
    /// Create a stopped supervisor for `spec`
    ///
    /// Owners call [`Supervisor::sweep_orphans`] before the first start to
    /// clear leftovers of a previous run.
    pub fn new(
        spec: LaunchSpec,
        classifier: Arc<dyn OutputClassifier>,
        options: SupervisorOptions,
        events: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    ) -> Self {
        let shared = Shared {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            slot: Mutex::new(Slot {
                lifecycle: Lifecycle::new(options.max_restarts),
                kill_switch: None,
            }),
            spec,
            classifier,
            options,
            events,
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Process-unique id of this supervisor
    pub fn instance(&self) -> u64 {
        self.shared.instance
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.shared.spec
    }

    pub fn status(&self) -> ProcessStatus {
        self.shared.slot().lifecycle.status()
    }

    pub fn restart_count(&self) -> u32 {
        self.shared.slot().lifecycle.restart_count()
    }

    /// Number of children spawned so far
    pub fn generation(&self) -> u64 {
        self.shared.slot().lifecycle.generation()
    }

    /// Spawn the child unless one is already starting or running
    ///
    /// `reset_budget` zeroes the restart counter first.
    pub fn start(&self, reset_budget: bool) -> Result<(), SupervisorError> {
        let mut slot = self.shared.slot();
        self.shared.spawn_locked(&mut slot, reset_budget)
    }

    /// Kill the child and stay stopped, then sweep for orphans
    pub async fn stop(&self) {
        self.halt();
        self.sweep_orphans().await;
    }

    /// Kill the child and stay stopped, without the orphan sweep
    ///
    /// Returns whether a child was starting or running.
    pub fn halt(&self) -> bool {
        let mut slot = self.shared.slot();
        if !slot.lifecycle.stop() {
            debug!(instance = self.shared.instance, "Process is already stopped");
            return false;
        }
        slot.kill_child();
        info!(
            instance = self.shared.instance,
            generation = slot.lifecycle.generation(),
            "Process stopped"
        );
        true
    }

    /// Kill stray processes running this program, if enabled
    pub async fn sweep_orphans(&self) -> usize {
        if !self.shared.options.reap_orphans {
            return 0;
        }
        reap_orphans(self.shared.spec.program.clone()).await
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("instance", &self.shared.instance)
            .field("program", &self.shared.spec.program)
            .field("status", &self.status())
            .finish()
    }
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_locked(self: &Arc<Self>, slot: &mut Slot, reset_budget: bool) -> Result<(), SupervisorError> {
        let Some(generation) = slot.lifecycle.begin_start(reset_budget) else {
            warn!(
                instance = self.instance,
                status = ?slot.lifecycle.status(),
                "Start ignored, process is not stopped"
            );
            return Ok(());
        };

        match self.spawn(generation) {
            Ok(kill_switch) => {
                slot.kill_switch = Some(kill_switch);
                info!(
                    instance = self.instance,
                    generation = generation,
                    program = %self.spec.program.display(),
                    "Process starting"
                );
                Ok(())
            }
            Err(e) => {
                slot.lifecycle.spawn_failed(generation);
                error!(instance = self.instance, error = %e, "Failed to start process");
                Err(e)
            }
        }
    }

    fn spawn(self: &Arc<Self>, generation: u64) -> Result<oneshot::Sender<()>, SupervisorError> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: self.spec.program.display().to_string(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(SupervisorError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SupervisorError::MissingPipe("stderr"))?;

        tokio::spawn(Arc::clone(self).read_lines(stdout, "stdout", generation));
        tokio::spawn(Arc::clone(self).read_lines(stderr, "stderr", generation));

        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(Arc::clone(self).wait_exit(child, kill_rx, generation));
        Ok(kill_tx)
    }

    async fn read_lines<R>(self: Arc<Self>, pipe: R, stream: &'static str, generation: u64)
    where
        R: AsyncRead + Unpin,
    {
        // Raw bytes: the tunnel client does not promise UTF-8
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
                    info!(
                        instance = self.instance,
                        generation = generation,
                        stream = stream,
                        line = %line,
                        "Process output"
                    );
                    let classification = self.classifier.classify(line);
                    self.handle_output(generation, classification);
                }
                Err(e) => {
                    warn!(instance = self.instance, stream = stream, error = %e, "Failed to read process output");
                    break;
                }
            }
        }
    }

    async fn wait_exit(self: Arc<Self>, mut child: Child, kill: oneshot::Receiver<()>, generation: u64) {
        let pid = child.id();
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = kill => None,
        };

        match exited {
            Some(Ok(status)) => {
                warn!(instance = self.instance, generation = generation, status = %status, "Process exited unexpectedly");
                self.kill_group(pid, generation);
                self.handle_exit(generation);
            }
            Some(Err(e)) => {
                error!(instance = self.instance, generation = generation, error = %e, "Failed to wait for process");
                self.kill_group(pid, generation);
                self.handle_exit(generation);
            }
            None => {
                self.kill_group(pid, generation);
                if let Err(e) = child.kill().await {
                    warn!(instance = self.instance, generation = generation, error = %e, "Failed to kill process");
                }
                debug!(instance = self.instance, generation = generation, "Process killed");
            }
        }
    }

    /// SIGKILL the child's process group, which outlives the child itself
    #[cfg(unix)]
    fn kill_group(&self, pid: Option<u32>, generation: u64) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid else {
            return;
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                warn!(instance = self.instance, generation = generation, error = %e, "Failed to kill process group");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_group(&self, _pid: Option<u32>, _generation: u64) {}

    fn handle_output(self: &Arc<Self>, generation: u64, classification: Classification) {
        let mut slot = self.slot();
        let transition = slot.lifecycle.on_output(generation, classification);
        self.apply(&mut slot, transition);
    }

    fn handle_exit(self: &Arc<Self>, generation: u64) {
        let mut slot = self.slot();
        let transition = slot.lifecycle.on_exit(generation);
        self.apply(&mut slot, transition);
    }

    fn apply(self: &Arc<Self>, slot: &mut Slot, transition: Transition) {
        match transition {
            Transition::Ignore => {}
            Transition::Restart => {
                slot.kill_child();
                warn!(
                    instance = self.instance,
                    restart_count = slot.lifecycle.restart_count(),
                    max_restarts = slot.lifecycle.max_restarts(),
                    "Restarting process"
                );
                // A failed respawn is logged and leaves the process stopped
                let _ = self.spawn_locked(slot, false);
            }
            Transition::Exhausted => {
                slot.kill_child();
                error!(
                    instance = self.instance,
                    max_restarts = slot.lifecycle.max_restarts(),
                    "Max restart attempts reached, not restarting the process"
                );
            }
            Transition::Rejected => {
                slot.kill_child();
                warn!(instance = self.instance, "Tunnel client credential rejected");
                if let Some(events) = &self.events {
                    let _ = events.send(SupervisorEvent::CredentialRejected {
                        instance: self.instance,
                    });
                }
            }
        }
    }
}
