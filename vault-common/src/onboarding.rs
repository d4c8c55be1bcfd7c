//! Onboarding milestones.
//!
//! The step is persisted as a single byte. Erased flash reads back 0xFF,
//! which is reported as [`OnboardingStep::Virgin`] rather than an error:
//! the "unwritten" sentinel a factory-fresh device starts with.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The raw byte value an erased flash cell reads back as.
pub const UNWRITTEN_SENTINEL: u8 = 0xff;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum OnboardingError {
    #[error("unknown onboarding step byte {0:#04x}")]
    UnknownStep(u8),
    #[error("onboarding step may only advance")]
    Regression,
    #[error("onboarding steps advance one milestone at a time")]
    SkippedMilestone,
}

/// Coarse onboarding milestones, in completion order.
#[derive(
    Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum OnboardingStep {
    Virgin = 0,
    DeviceAuth = 1,
    JoystickTraining = 2,
    CardCheckup = 3,
    CardAuth = 4,
    Complete = 5,
}

impl OnboardingStep {
    /// Decode the persisted byte; 0xFF means the cell was never written.
    pub fn from_flash_byte(byte: u8) -> Result<Self, OnboardingError> {
        match byte {
            UNWRITTEN_SENTINEL => Ok(Self::Virgin),
            0 => Ok(Self::Virgin),
            1 => Ok(Self::DeviceAuth),
            2 => Ok(Self::JoystickTraining),
            3 => Ok(Self::CardCheckup),
            4 => Ok(Self::CardAuth),
            5 => Ok(Self::Complete),
            other => Err(OnboardingError::UnknownStep(other)),
        }
    }

    pub fn to_flash_byte(self) -> u8 {
        self as u8
    }

    pub fn is_complete(self) -> bool {
        self == Self::Complete
    }

    /// Validate a transition from `self` to `next`.
    ///
    /// Steps are monotone and advance one milestone at a time, with one
    /// exception: `Complete` may be set directly from any step (in-field
    /// provisioning). Setting the current step again is a no-op.
    pub fn check_advance(self, next: Self) -> Result<(), OnboardingError> {
        if self == Self::Complete && next != Self::Complete {
            return Err(OnboardingError::Regression);
        }
        if next == Self::Complete || next == self {
            return Ok(());
        }
        if next < self {
            return Err(OnboardingError::Regression);
        }
        if next as u8 != self as u8 + 1 {
            return Err(OnboardingError::SkippedMilestone);
        }
        Ok(())
    }
}
