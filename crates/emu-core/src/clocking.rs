//! Clocking preference hints.
//!
//! A bus owner can run most components in arbitrary batches; some must be
//! ticked on every half cycle because they observe cycle-level edges, and
//! some need not be run at all until the next external event. Components
//! advertise which applies, and notify an observer when it changes so the
//! owner can re-batch its schedule.

/// How a component prefers to be clocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockingPreference {
    /// Safe to skip entirely until the next external event.
    None,
    /// May be run in arbitrary batches.
    JustInTime,
    /// Must be ticked on every half cycle.
    RealTime,
}

/// Receiver of clocking-preference changes.
///
/// A callback MUST NOT re-enter `run_for` of the component that fired it;
/// sources assume this for recursion safety.
pub trait ClockingObserver {
    fn clocking_preference_changed(&mut self, preference: ClockingPreference);
}

/// A component that publishes a clocking preference.
pub trait ClockingSource {
    /// The current preference. Stable until the next state change that the
    /// component reports through its observer.
    fn preferred_clocking(&self) -> ClockingPreference;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Vec<ClockingPreference>);

    impl ClockingObserver for Recorder {
        fn clocking_preference_changed(&mut self, preference: ClockingPreference) {
            self.0.push(preference);
        }
    }

    #[test]
    fn observer_records_preference_changes() {
        let mut recorder = Recorder(Vec::new());
        recorder.clocking_preference_changed(ClockingPreference::RealTime);
        recorder.clocking_preference_changed(ClockingPreference::None);
        assert_eq!(
            recorder.0,
            [ClockingPreference::RealTime, ClockingPreference::None]
        );
    }
}
