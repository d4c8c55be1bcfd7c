//! Core status counters surfaced to the host.
//!
//! The host polls these to know where in a flow the device currently is;
//! they carry no semantics on-device beyond "monotonically describes
//! progress within the current flow".

use serde::{Deserialize, Serialize};

/// Coarse device state advertised in ready-state packets.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum DeviceIdleState {
    #[default]
    Idle = 0,
    WaitForCard = 1,
    WaitUserInput = 2,
    Busy = 3,
}

/// Whether the device has proven its authenticity to the host.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DeviceAuthState {
    #[default]
    NotAuthenticated,
    Authenticated,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CoreStatus {
    core_flow_status: u32,
    app_flow_status: u32,
    idle_state: DeviceIdleState,
}

impl CoreStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn core_flow_status(&self) -> u32 {
        self.core_flow_status
    }

    pub fn app_flow_status(&self) -> u32 {
        self.app_flow_status
    }

    pub fn idle_state(&self) -> DeviceIdleState {
        self.idle_state
    }

    pub fn set_core_flow_status(&mut self, status: u32) {
        self.core_flow_status = status;
    }

    pub fn set_app_flow_status(&mut self, status: u32) {
        self.app_flow_status = status;
    }

    pub fn set_idle_state(&mut self, state: DeviceIdleState) {
        self.idle_state = state;
    }

    /// Reset both flow counters, done when re-entering a menu.
    pub fn reset_flow(&mut self) {
        self.core_flow_status = 0;
        self.app_flow_status = 0;
    }
}
