//! job/state — copy job phases and their allowed transitions.
//!
//! INITIALIZED -> COPYING -> UPDATING_MAP -> PERSISTING -> COMPLETING
//!                   |            |               |
//!                   |            +-> COMPLETING  +-> ERROR   (bit already set / persist failed)
//!                   +-> COMPLETING, ERROR                    (already diverged / copy failed)
//!
//! Monotonic: no phase is ever revisited.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobState {
    Initialized,
    Copying,
    UpdatingMap,
    Persisting,
    Completing,
    Error,
}

impl JobState {
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Initialized, Copying)
                | (Copying, UpdatingMap)
                | (Copying, Completing)
                | (Copying, Error)
                | (UpdatingMap, Persisting)
                | (UpdatingMap, Completing)
                | (Persisting, Completing)
                | (Persisting, Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completing | JobState::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::JobState::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [Initialized, Copying, UpdatingMap, Persisting, Completing];
        for w in path.windows(2) {
            assert!(w[0].can_advance_to(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn no_state_is_revisited_and_error_is_final() {
        assert!(!Persisting.can_advance_to(UpdatingMap));
        assert!(!Completing.can_advance_to(Copying));
        assert!(!Error.can_advance_to(Completing));
        assert!(!UpdatingMap.can_advance_to(Error));
        assert!(!Initialized.can_advance_to(Completing));
        assert!(Error.is_terminal() && Completing.is_terminal());
        assert!(!Copying.is_terminal());
    }
}
