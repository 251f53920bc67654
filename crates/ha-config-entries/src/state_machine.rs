//! Lifecycle transitions of a config entry
//!
//! ```text
//! NotLoaded → SetupInProgress → Loaded
//!                            ↘ SetupError → SetupInProgress (retry)
//!
//! Loaded/SetupError → UnloadInProgress → NotLoaded
//!                                      ↘ FailedUnload (terminal)
//! ```

use crate::entry::ConfigEntryState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConfigEntryState,
    pub to: ConfigEntryState,
    pub reason: &'static str,
}

impl ConfigEntryState {
    pub fn try_transition(
        self,
        to: ConfigEntryState,
    ) -> Result<ConfigEntryState, InvalidTransition> {
        use ConfigEntryState::*;

        let reason = match (self, to) {
            (NotLoaded, SetupInProgress)
            | (SetupInProgress, Loaded)
            | (SetupInProgress, SetupError)
            | (SetupError, SetupInProgress)
            | (SetupError, UnloadInProgress)
            | (Loaded, UnloadInProgress)
            | (UnloadInProgress, NotLoaded)
            | (UnloadInProgress, FailedUnload) => return Ok(to),

            (FailedUnload, _) => "FailedUnload is terminal",
            (Loaded, SetupInProgress) => "already loaded, unload first",
            (SetupInProgress, _) => "setup must finish first",
            (UnloadInProgress, _) => "unload must finish first",
            (NotLoaded, _) => "setup has not started",
            _ => "not a lifecycle step",
        };

        Err(InvalidTransition {
            from: self,
            to,
            reason,
        })
    }

    pub fn can_transition_to(self, to: ConfigEntryState) -> bool {
        self.try_transition(to).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConfigEntryState::*;

    #[test]
    fn test_setup_and_unload_cycle() {
        let state = NotLoaded
            .try_transition(SetupInProgress)
            .and_then(|s| s.try_transition(Loaded))
            .and_then(|s| s.try_transition(UnloadInProgress))
            .and_then(|s| s.try_transition(NotLoaded))
            .unwrap();
        assert_eq!(state, NotLoaded);
    }

    #[test]
    fn test_setup_error_can_retry_or_unload() {
        assert!(SetupError.can_transition_to(SetupInProgress));
        assert!(SetupError.can_transition_to(UnloadInProgress));
        assert!(!SetupError.can_transition_to(Loaded));
    }

    #[test]
    fn test_shortcuts_rejected() {
        assert!(!NotLoaded.can_transition_to(Loaded));
        assert!(!Loaded.can_transition_to(NotLoaded));
        assert!(!Loaded.can_transition_to(SetupInProgress));
        assert!(!SetupInProgress.can_transition_to(NotLoaded));
        assert!(!UnloadInProgress.can_transition_to(Loaded));
    }

    #[test]
    fn test_failed_unload_is_terminal() {
        for to in [NotLoaded, SetupInProgress, Loaded, SetupError, UnloadInProgress] {
            let err = FailedUnload.try_transition(to).unwrap_err();
            assert!(err.reason.contains("terminal"));
        }
    }

    #[test]
    fn test_error_display() {
        let msg = NotLoaded.try_transition(Loaded).unwrap_err().to_string();
        assert!(msg.contains("NotLoaded"));
        assert!(msg.contains("setup has not started"));
    }
}
