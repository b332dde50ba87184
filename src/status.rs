//! The Status snapshot and the sink abstraction that replaces a raw
//! function-pointer-plus-userdata callback.

use crate::geometry::{Location, State};

/// Lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unknown,
    Locating,
    Tracking,
}

/// Snapshot handed to [`StatusSink::on_status`] after every `put_beacons`
/// (and, in `ONESHOT` mode, after every reset). Owns its data rather than
/// borrowing from the filter, since a "valid until next call" borrowed-pointer
/// contract is awkward and unnecessary in Rust.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: LifecycleState,
    pub particle_states: Vec<State>,
    pub mean_location: Location,
    pub stdev_location: Location,
    pub timestamp: i64,
}

/// A sink for status updates. A single trait suffices in place of a
/// function-pointer-plus-userdata pair.
pub trait StatusSink {
    fn on_status(&mut self, status: &Status);
}

/// A `StatusSink` that just remembers the most recent status, for tests and
/// simple integrations that poll rather than push.
#[derive(Debug, Default)]
pub struct LatestStatus {
    latest: Option<Status>,
}

impl LatestStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&Status> {
        self.latest.as_ref()
    }
}

impl StatusSink for LatestStatus {
    fn on_status(&mut self, status: &Status) {
        self.latest = Some(status.clone());
    }
}

impl<F: FnMut(&Status)> StatusSink for F {
    fn on_status(&mut self, status: &Status) {
        self(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_status_remembers_most_recent() {
        let mut sink = LatestStatus::new();
        let a = Status {
            state: LifecycleState::Locating,
            particle_states: vec![],
            mean_location: Location::default(),
            stdev_location: Location::default(),
            timestamp: 1,
        };
        let mut b = a.clone();
        b.timestamp = 2;
        sink.on_status(&a);
        sink.on_status(&b);
        assert_eq!(sink.latest().unwrap().timestamp, 2);
    }

    #[test]
    fn closure_can_be_used_as_a_sink() {
        let mut seen = Vec::new();
        let mut sink = |status: &Status| seen.push(status.timestamp);
        sink.on_status(&Status {
            state: LifecycleState::Tracking,
            particle_states: vec![],
            mean_location: Location::default(),
            stdev_location: Location::default(),
            timestamp: 7,
        });
        assert_eq!(seen, vec![7]);
    }
}
