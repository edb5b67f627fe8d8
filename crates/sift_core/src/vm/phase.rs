use std::fmt;
use std::sync::Arc;

use crate::program::Phase;

/// Callback told about execution phases as a run progresses.
#[derive(Clone)]
pub struct PhaseListener(Arc<dyn Fn(Phase) + Send + Sync>);

impl PhaseListener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        PhaseListener(Arc::new(f))
    }
}

impl fmt::Debug for PhaseListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PhaseListener").finish_non_exhaustive()
    }
}

/// Tracks the current phase and which phases were reported.
///
/// Phases are only ever reported in increasing order. Going back to an
/// earlier phase, e.g. when the next materialized table starts, changes the
/// current phase without reporting it again.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTracker {
    current: Phase,
    reported: Option<Phase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        PhaseTracker {
            current: Phase::Begin,
            reported: None,
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn enter(&mut self, phase: Phase, listener: Option<&PhaseListener>) {
        self.current = phase;
        if self.reported.is_some_and(|r| r >= phase) {
            return;
        }
        self.reported = Some(phase);
        if let Some(listener) = listener {
            (listener.0)(phase);
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reports_each_phase_once_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listener = {
            let seen = seen.clone();
            PhaseListener::new(move |phase| seen.lock().push(phase))
        };

        let mut tracker = PhaseTracker::default();
        for phase in [
            Phase::Begin,
            Phase::From,
            Phase::Where,
            Phase::Select,
            Phase::From,
            Phase::Where,
            Phase::GroupBy,
            Phase::End,
        ] {
            tracker.enter(phase, Some(&listener));
        }

        assert_eq!(
            vec![
                Phase::Begin,
                Phase::From,
                Phase::Where,
                Phase::Select,
                Phase::End
            ],
            *seen.lock()
        );
        assert_eq!(Phase::End, tracker.current());
    }
}
