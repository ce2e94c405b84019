//! Supervisor state machine
//!
//! Pure bookkeeping for one supervised process: status, restart budget and
//! spawn generation. The driver in the parent module holds it under a lock
//! and acts on the [`Transition`] each event produces.

use serde::Serialize;

use super::classify::Classification;

/// Observable process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
}

/// What the driver must do after an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do
    Ignore,
    /// Kill the failed child and spawn a new one
    Restart,
    /// Kill the failed child and stay stopped
    Exhausted,
    /// Kill the child, stay stopped and report the rejected credential
    Rejected,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    status: ProcessStatus,
    restart_count: u32,
    max_restarts: u32,
    generation: u64,
}

impl Lifecycle {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            status: ProcessStatus::Stopped,
            restart_count: 0,
            max_restarts,
            generation: 0,
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn max_restarts(&self) -> u32 {
        self.max_restarts
    }

    /// Number of spawns attempted so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Enter `Starting` and hand out the generation for the new child
    ///
    /// Returns `None` unless the process is stopped.
    pub fn begin_start(&mut self, reset_budget: bool) -> Option<u64> {
        if self.status != ProcessStatus::Stopped {
            return None;
        }
        if reset_budget {
            self.restart_count = 0;
        }
        self.generation += 1;
        self.status = ProcessStatus::Starting;
        Some(self.generation)
    }

    /// Roll back a `begin_start` whose spawn failed
    pub fn spawn_failed(&mut self, generation: u64) {
        if generation == self.generation {
            self.status = ProcessStatus::Stopped;
        }
    }

    /// Apply a classified output line from `generation`
    pub fn on_output(&mut self, generation: u64, classification: Classification) -> Transition {
        if !self.is_live(generation) {
            return Transition::Ignore;
        }
        match classification {
            Classification::Unchanged => Transition::Ignore,
            Classification::Running => {
                self.status = ProcessStatus::Running;
                self.restart_count = 0;
                Transition::Ignore
            }
            Classification::Stopped => self.fail(),
            Classification::Rejected => {
                self.halt();
                Transition::Rejected
            }
        }
    }

    /// Apply the exit of the child from `generation`
    pub fn on_exit(&mut self, generation: u64) -> Transition {
        if !self.is_live(generation) {
            return Transition::Ignore;
        }
        self.fail()
    }

    /// Explicit stop; returns false if already stopped
    ///
    /// The budget is pushed past its bound so no event still in flight can
    /// restart the process.
    pub fn stop(&mut self) -> bool {
        if self.status == ProcessStatus::Stopped {
            return false;
        }
        self.halt();
        true
    }

    fn fail(&mut self) -> Transition {
        self.status = ProcessStatus::Stopped;
        if self.restart_count < self.max_restarts {
            self.restart_count += 1;
            Transition::Restart
        } else {
            Transition::Exhausted
        }
    }

    fn halt(&mut self) {
        self.status = ProcessStatus::Stopped;
        self.restart_count = self.max_restarts.saturating_add(1);
    }

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation && self.status != ProcessStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drive `lifecycle` through a failure of its current child, restarting
    /// when told to
    fn fail_current(lifecycle: &mut Lifecycle) -> Transition {
        let generation = lifecycle.generation();
        let transition = lifecycle.on_output(generation, Classification::Stopped);
        if transition == Transition::Restart {
            lifecycle.begin_start(false).unwrap();
        }
        transition
    }

    #[test]
    fn test_bounded_restarts() {
        let mut lifecycle = Lifecycle::new(3);
        assert_eq!(lifecycle.begin_start(true), Some(1));

        for expected in 1..=3 {
            assert_eq!(fail_current(&mut lifecycle), Transition::Restart);
            assert_eq!(lifecycle.restart_count(), expected);
            assert_eq!(lifecycle.status(), ProcessStatus::Starting);
        }

        assert_eq!(fail_current(&mut lifecycle), Transition::Exhausted);
        assert_eq!(lifecycle.status(), ProcessStatus::Stopped);
        assert_eq!(lifecycle.generation(), 4);
    }

    #[test]
    fn test_running_forgives_failures() {
        let mut lifecycle = Lifecycle::new(3);
        lifecycle.begin_start(true);
        fail_current(&mut lifecycle);
        fail_current(&mut lifecycle);
        assert_eq!(lifecycle.restart_count(), 2);

        let generation = lifecycle.generation();
        lifecycle.on_output(generation, Classification::Running);
        assert_eq!(lifecycle.status(), ProcessStatus::Running);
        assert_eq!(lifecycle.restart_count(), 0);

        for _ in 0..3 {
            assert_eq!(fail_current(&mut lifecycle), Transition::Restart);
        }
        assert_eq!(fail_current(&mut lifecycle), Transition::Exhausted);
    }

    #[test]
    fn test_stop_blocks_late_events() {
        let mut lifecycle = Lifecycle::new(3);
        let generation = lifecycle.begin_start(true).unwrap();
        assert!(lifecycle.stop());

        assert_eq!(lifecycle.on_output(generation, Classification::Stopped), Transition::Ignore);
        assert_eq!(lifecycle.on_exit(generation), Transition::Ignore);
        assert_eq!(lifecycle.status(), ProcessStatus::Stopped);
        assert!(lifecycle.restart_count() > lifecycle.max_restarts());
        assert!(!lifecycle.stop());
    }

    #[test]
    fn test_stale_generation_ignored() {
        let mut lifecycle = Lifecycle::new(3);
        let first = lifecycle.begin_start(true).unwrap();
        assert_eq!(lifecycle.on_output(first, Classification::Stopped), Transition::Restart);
        lifecycle.begin_start(false);

        // The first child exits after being replaced
        assert_eq!(lifecycle.on_exit(first), Transition::Ignore);
        assert_eq!(lifecycle.on_output(first, Classification::Running), Transition::Ignore);
        assert_eq!(lifecycle.status(), ProcessStatus::Starting);
        assert_eq!(lifecycle.restart_count(), 1);
    }

    #[test]
    fn test_start_is_noop_unless_stopped() {
        let mut lifecycle = Lifecycle::new(3);
        lifecycle.begin_start(true);
        assert_eq!(lifecycle.begin_start(true), None);
        assert_eq!(lifecycle.generation(), 1);
    }

    #[test]
    fn test_explicit_start_resets_budget() {
        let mut lifecycle = Lifecycle::new(1);
        lifecycle.begin_start(true);
        fail_current(&mut lifecycle);
        assert_eq!(fail_current(&mut lifecycle), Transition::Exhausted);

        assert!(lifecycle.begin_start(false).is_some());
        assert_eq!(lifecycle.on_exit(lifecycle.generation()), Transition::Exhausted);

        lifecycle.begin_start(true);
        assert_eq!(lifecycle.restart_count(), 0);
        assert_eq!(fail_current(&mut lifecycle), Transition::Restart);
    }

    #[test]
    fn test_rejection_is_terminal() {
        let mut lifecycle = Lifecycle::new(3);
        let generation = lifecycle.begin_start(true).unwrap();
        assert_eq!(
            lifecycle.on_output(generation, Classification::Rejected),
            Transition::Rejected
        );
        assert_eq!(lifecycle.status(), ProcessStatus::Stopped);
        assert_eq!(lifecycle.on_exit(generation), Transition::Ignore);
    }

    #[test]
    fn test_spawn_failure_rolls_back() {
        let mut lifecycle = Lifecycle::new(3);
        let generation = lifecycle.begin_start(true).unwrap();
        lifecycle.spawn_failed(generation);
        assert_eq!(lifecycle.status(), ProcessStatus::Stopped);
        assert_eq!(lifecycle.begin_start(true), Some(2));
    }
}
