//! Blocking decision points that need a human (or a policy standing in for
//! one): trusting an unknown host key, retrying a rejected credential, and
//! confirming a resume.

/// Supplies answers when the search reaches a decision point.
///
/// Implementations may block (e.g. waiting on a terminal). The engine never
/// calls them while holding a lock.
pub trait DecisionProvider: Send + Sync {
    fn need_boolean(&self, question: &str) -> bool;

    /// Asks for a replacement credential. `None` means the user declined.
    fn need_password(&self, prompt: &str) -> Option<String>;
}

/// Answers every question with a fixed policy, for unattended runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDecisions {
    pub accept: bool,
}

impl FixedDecisions {
    pub fn accept_all() -> Self {
        Self { accept: true }
    }

    pub fn decline_all() -> Self {
        Self { accept: false }
    }
}

impl DecisionProvider for FixedDecisions {
    fn need_boolean(&self, _question: &str) -> bool {
        self.accept
    }

    fn need_password(&self, _prompt: &str) -> Option<String> {
        None
    }
}
