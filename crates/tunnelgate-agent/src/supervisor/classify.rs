//! Output classification for the tunnel client

/// Meaning of one line of child output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No state change
    Unchanged,
    /// The child reports a healthy connection
    Running,
    /// The child reports a failure; restart under the budget
    Stopped,
    /// The broker refused the credential; never retry it
    Rejected,
}

/// Maps output lines to state changes
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Classification;
}

/// Classifier for the NPS tunnel client (`npc`)
#[derive(Debug, Clone, Copy, Default)]
pub struct NpcClassifier;

impl OutputClassifier for NpcClassifier {
    fn classify(&self, line: &str) -> Classification {
        if line.contains("Validation") {
            Classification::Rejected
        } else if line.contains("Error") {
            Classification::Stopped
        } else if line.contains("Successful") {
            Classification::Running
        } else {
            Classification::Unchanged
        }
    }
}

impl<F> OutputClassifier for F
where
    F: Fn(&str) -> Classification + Send + Sync,
{
    fn classify(&self, line: &str) -> Classification {
        self(line)
    }
}
