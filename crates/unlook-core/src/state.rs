//! Runtime device state.
//!
//! A single [`DeviceState`] is owned by the control worker. It is reported
//! verbatim in status responses, with `uptime` computed on each snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::time::unix_timestamp;

/// Lifecycle of the device server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// Sockets are not bound yet.
    #[default]
    Idle,
    /// Serving requests.
    Running,
    /// Shutdown in progress.
    Stopping,
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Mutable runtime state.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    pub status: LifecycleStatus,
    pub cameras_connected: usize,
    pub clients_connected: usize,
    pub streaming: bool,
    /// Epoch seconds at which the server started.
    pub start_time: f64,
}

impl DeviceState {
    /// Creates an idle state stamped with the current time.
    pub fn new(cameras_connected: usize) -> Self {
        Self::started_at(cameras_connected, unix_timestamp())
    }

    /// Creates an idle state with an explicit start time.
    pub fn started_at(cameras_connected: usize, start_time: f64) -> Self {
        Self {
            status: LifecycleStatus::Idle,
            cameras_connected,
            clients_connected: 0,
            streaming: false,
            start_time,
        }
    }

    /// Seconds elapsed since `start_time`, never negative.
    pub fn uptime_at(&self, now: f64) -> f64 {
        (now - self.start_time).max(0.0)
    }

    /// Takes a snapshot for reporting, computing uptime at `now`.
    pub fn snapshot_at(&self, now: f64) -> StateSnapshot {
        StateSnapshot {
            status: self.status,
            cameras_connected: self.cameras_connected,
            clients_connected: self.clients_connected,
            streaming: self.streaming,
            uptime: self.uptime_at(now),
            start_time: self.start_time,
        }
    }

    /// Takes a snapshot using the current time.
    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot_at(unix_timestamp())
    }
}

/// Serializable view of [`DeviceState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub status: LifecycleStatus,
    pub cameras_connected: usize,
    pub clients_connected: usize,
    pub streaming: bool,
    pub uptime: f64,
    pub start_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_state_is_idle() {
        let state = DeviceState::started_at(2, 100.0);
        assert_eq!(state.status, LifecycleStatus::Idle);
        assert_eq!(state.clients_connected, 0);
        assert!(!state.streaming);
    }

    #[test]
    fn uptime_is_clamped() {
        let state = DeviceState::started_at(1, 100.0);
        assert_eq!(state.uptime_at(142.5), 42.5);
        assert_eq!(state.uptime_at(50.0), 0.0);
    }

    #[test]
    fn snapshot_serializes_status_lowercase() {
        let mut state = DeviceState::started_at(2, 1000.0);
        state.status = LifecycleStatus::Running;
        state.streaming = true;
        state.clients_connected = 1;

        let value = serde_json::to_value(state.snapshot_at(1010.0)).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "running",
                "cameras_connected": 2,
                "clients_connected": 1,
                "streaming": true,
                "uptime": 10.0,
                "start_time": 1000.0
            })
        );
    }
}
