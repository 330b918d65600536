use std::fmt::Debug;

use tracing::trace;

/// Explicit state machine driver.
///
/// Holds the current state and whether it has just been entered. The owner's
/// dispatch function returns `Some(next)` to change state or `None` to stay;
/// `advance` reports whether another dispatch round is needed.
#[derive(Debug, Clone)]
pub struct Fsm<S> {
    name: &'static str,
    state: S,
    entry: bool,
}

impl<S: Copy + PartialEq + Debug> Fsm<S> {
    pub fn new(name: &'static str, initial: S) -> Self {
        Self { name, state: initial, entry: true }
    }

    pub fn current(&self) -> (S, bool) {
        (self.state, self.entry)
    }

    pub fn state(&self) -> S {
        self.state
    }

    /* true if the caller must dispatch again */
    pub fn advance(&mut self, next: Option<S>) -> bool {
        match next {
            None => {
                self.entry = false;
                false
            }
            Some(next) => {
                trace!("{}: {:?} -> {:?}", self.name, self.state, next);
                self.state = next;
                self.entry = true;
                true
            }
        }
    }

    pub fn reset(&mut self, initial: S) {
        self.state = initial;
        self.entry = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum St {
        A,
        B,
    }

    #[test]
    fn entry_flag_only_on_first_dispatch() {
        let mut fsm = Fsm::new("t", St::A);
        assert_eq!(fsm.current(), (St::A, true));
        assert!(!fsm.advance(None));
        assert_eq!(fsm.current(), (St::A, false));
        assert!(fsm.advance(Some(St::B)));
        assert_eq!(fsm.current(), (St::B, true));
    }

    #[test]
    fn self_transition_reenters() {
        let mut fsm = Fsm::new("t", St::A);
        fsm.advance(None);
        assert!(fsm.advance(Some(St::A)));
        assert_eq!(fsm.current(), (St::A, true));
        fsm.advance(None);
        fsm.reset(St::B);
        assert_eq!(fsm.current(), (St::B, true));
    }
}
