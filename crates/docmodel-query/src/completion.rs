//! Exactly-once execution guard.

use docmodel_core::{Error, UsageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum CompletionState {
    #[default]
    Pending,
    Completed,
}

/// Tracks whether a query chain has been executed.
///
/// The transition `Pending -> Completed` happens once; completing again is a
/// usage error the caller receives instead of a second execution.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    state: CompletionState,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to `Completed`, or fail if already there.
    pub fn complete(&mut self) -> Result<(), Error> {
        match self.state {
            CompletionState::Pending => {
                self.state = CompletionState::Completed;
                Ok(())
            }
            CompletionState::Completed => Err(Error::Usage(UsageError::already_executed())),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == CompletionState::Completed
    }
}
