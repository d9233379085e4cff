//! Per-peer and per-client liveness timers, reset by heartbeats.
//!
//! The timer map is owned by a single [`FailureDetector`] guarded by its own
//! mutex (see the crate's locking discipline). Time is injected by the
//! caller (`now: Instant`) rather than read internally, so the monitoring
//! logic is deterministic and unit-testable.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::NodeId;

pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(2);
pub const FAILURE_THRESHOLD: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitoredKind {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitoredId {
    pub kind: MonitoredKind,
    pub id: NodeId,
}

impl MonitoredId {
    pub fn server(id: impl Into<NodeId>) -> Self {
        Self { kind: MonitoredKind::Server, id: id.into() }
    }

    pub fn client(id: impl Into<NodeId>) -> Self {
        Self { kind: MonitoredKind::Client, id: id.into() }
    }
}

#[derive(Debug, Default)]
pub struct FailureDetector {
    timers: HashMap<MonitoredId, Instant>,
}

impl FailureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins monitoring `id`, starting its timer at `now`. A no-op if
    /// already monitored (does not reset an existing timer).
    pub fn watch(&mut self, id: MonitoredId, now: Instant) {
        self.timers.entry(id).or_insert(now);
    }

    pub fn stop_watching(&mut self, id: &MonitoredId) {
        self.timers.remove(id);
    }

    pub fn is_watching(&self, id: &MonitoredId) -> bool {
        self.timers.contains_key(id)
    }

    pub fn watched(&self) -> impl Iterator<Item = &MonitoredId> {
        self.timers.keys()
    }

    /// Resets the timer for `id` (heartbeat received). If `id` is not
    /// currently monitored this is a no-op — a stray heartbeat from an
    /// unmonitored peer is not itself an error.
    pub fn reset(&mut self, id: &MonitoredId, now: Instant) {
        if let Some(t) = self.timers.get_mut(id) {
            *t = now;
        }
    }

    /// Returns every monitored id whose timer has exceeded
    /// [`FAILURE_THRESHOLD`] without a reset, removing them from the timer
    /// map (the caller is now responsible for repair/re-election).
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<MonitoredId> {
        let timed_out: Vec<MonitoredId> = self
            .timers
            .iter()
            .filter(|(_, &t)| now.saturating_duration_since(t) > FAILURE_THRESHOLD)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &timed_out {
            self.timers.remove(id);
        }
        timed_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_before_threshold_prevents_timeout() {
        let mut fd = FailureDetector::new();
        let t0 = Instant::now();
        let id = MonitoredId::server("A");
        fd.watch(id.clone(), t0);

        let t1 = t0 + Duration::from_secs(3);
        fd.reset(&id, t1);

        let t2 = t1 + Duration::from_secs(3);
        assert!(fd.check_timeouts(t2).is_empty());
    }

    #[test]
    fn exceeding_threshold_without_reset_times_out() {
        let mut fd = FailureDetector::new();
        let t0 = Instant::now();
        let id = MonitoredId::server("A");
        fd.watch(id.clone(), t0);

        let t1 = t0 + FAILURE_THRESHOLD + Duration::from_millis(1);
        let timed_out = fd.check_timeouts(t1);
        assert_eq!(timed_out, vec![id.clone()]);
        assert!(!fd.is_watching(&id));
    }
}
