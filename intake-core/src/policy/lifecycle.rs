use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LifecycleState {
    Created = 0,
    Running = 1,
    Ended = 2,
    Closed = 3,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LifecycleState::Created,
            1 => LifecycleState::Running,
            2 => LifecycleState::Ended,
            _ => LifecycleState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Ended => "ended",
            LifecycleState::Closed => "closed",
        }
    }

    /// `Ended` and `Closed` never go back.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Ended | LifecycleState::Closed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free lifecycle flag shared between a policy and its background tasks.
///
/// Transitions only move forward: `Created -> Running -> Ended -> Closed`,
/// with `Ended` and `Closed` reachable from any earlier state.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Created as u8),
        }
    }

    /// For policies whose background work starts at construction.
    pub fn running() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Running as u8),
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn has_ended(&self) -> bool {
        self.state().is_terminal()
    }

    /// `Created -> Running`. Fails once the policy ended.
    pub fn start(&self) -> Result<(), PolicyError> {
        self.advance(LifecycleState::Running)
            .map(|_| ())
            .map_err(|state| PolicyError::IllegalState { state })
    }

    /// Move to `Ended`; returns `true` for the call that performed the
    /// transition.
    pub fn end(&self) -> bool {
        self.advance(LifecycleState::Ended)
            .is_ok_and(|previous| previous != LifecycleState::Ended)
    }

    /// Move to `Closed`; returns `true` for the first call.
    pub fn close(&self) -> bool {
        let previous = self
            .state
            .swap(LifecycleState::Closed as u8, Ordering::AcqRel);
        previous != LifecycleState::Closed as u8
    }

    /// Error for operations that need a live policy.
    pub fn ensure_active(&self) -> Result<(), PolicyError> {
        let state = self.state();
        if state.is_terminal() {
            Err(PolicyError::IllegalState { state })
        } else {
            Ok(())
        }
    }

    pub fn illegal_state(&self) -> PolicyError {
        PolicyError::IllegalState {
            state: self.state(),
        }
    }

    // Stores `target` unless the current state is already past it (or
    // terminal when targeting `Running`). Returns the previous state.
    fn advance(&self, target: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                let current = LifecycleState::from_u8(raw);
                let allowed = match target {
                    LifecycleState::Running => !current.is_terminal(),
                    LifecycleState::Ended => current != LifecycleState::Closed,
                    _ => true,
                };
                allowed.then_some(target as u8)
            })
            .map(LifecycleState::from_u8)
            .map_err(LifecycleState::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_forward_only() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), LifecycleState::Created);
        lifecycle.start().unwrap();
        lifecycle.start().unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Running);

        assert!(lifecycle.end());
        assert!(!lifecycle.end());
        assert!(lifecycle.has_ended());
        assert!(lifecycle.start().unwrap_err().is_illegal_state());

        assert!(lifecycle.close());
        assert!(!lifecycle.close());
        assert!(!lifecycle.end());
        assert_eq!(lifecycle.state(), LifecycleState::Closed);
    }

    #[test]
    fn close_from_created() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.ensure_active().is_ok());
        assert!(lifecycle.close());
        assert!(matches!(
            lifecycle.ensure_active(),
            Err(PolicyError::IllegalState {
                state: LifecycleState::Closed
            })
        ));
    }
}
