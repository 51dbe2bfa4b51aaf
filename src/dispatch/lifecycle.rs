use parking_lot::Mutex;

/// Lifecycle of a [`Dispatcher`](super::Dispatcher).
///
/// Legal transitions: `Created -> Running`, `Created -> Stopping`,
/// `Running -> Stopping`, `Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl DispatcherState {
    pub fn can_transition_to(self, next: DispatcherState) -> bool {
        use DispatcherState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Stopping) | (Running, Stopping) | (Stopping, Stopped)
        )
    }
}

/// Single owner of the state transitions.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    state: Mutex<DispatcherState>,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(DispatcherState::Created),
        }
    }

    pub(crate) fn current(&self) -> DispatcherState {
        *self.state.lock()
    }

    /// Moves to `next` if legal from the current state. On refusal returns
    /// the state that was found.
    pub(crate) fn advance(&self, next: DispatcherState) -> Result<DispatcherState, DispatcherState> {
        let mut state = self.state.lock();
        let previous = *state;
        if previous.can_transition_to(next) {
            *state = next;
            Ok(previous)
        } else {
            Err(previous)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DispatcherState::*;

    #[test]
    fn only_forward_transitions_are_legal() {
        assert!(Created.can_transition_to(Running));
        assert!(Created.can_transition_to(Stopping));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));

        assert!(!Running.can_transition_to(Created));
        assert!(!Running.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopping));
        assert!(!Created.can_transition_to(Stopped));
    }

    #[test]
    fn advance_reports_the_blocking_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.advance(Running), Ok(Created));
        assert_eq!(lifecycle.advance(Running), Err(Running));
        assert_eq!(lifecycle.advance(Stopping), Ok(Running));
        assert_eq!(lifecycle.advance(Stopping), Err(Stopping));
        assert_eq!(lifecycle.advance(Stopped), Ok(Stopping));
        assert_eq!(lifecycle.current(), Stopped);
    }
}
