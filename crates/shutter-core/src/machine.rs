//! Pure telemetry → phase/condition derivation.
//!
//! Nothing here is stored between passes. Every pass recomputes phases and
//! conditions from the latest telemetry, so feeding the same telemetry twice
//! yields the same result.

use crate::driver::{MotionState, Telemetry};
use crate::types::{DevicePhase, RequestPhase};

impl DevicePhase {
    pub fn from_motion(state: MotionState) -> Self {
        match state {
            MotionState::Close => DevicePhase::Closing,
            MotionState::Open => DevicePhase::Opening,
            MotionState::Stop | MotionState::Unknown => DevicePhase::Idle,
        }
    }
}

/// Outcome of comparing telemetry against a target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Stopped and done.
    Reached,
    /// Still travelling.
    Moving,
    /// Stopped short of the target because of a fault.
    Halted {
        reason: &'static str,
        message: &'static str,
    },
}

impl Completion {
    pub fn evaluate(telemetry: &Telemetry, target: u8) -> Self {
        if telemetry.state != MotionState::Stop {
            return Completion::Moving;
        }
        match telemetry.stop_reason.fault() {
            Some((reason, message)) if telemetry.current_pos != i32::from(target) => {
                Completion::Halted { reason, message }
            }
            _ => Completion::Reached,
        }
    }

    pub fn is_reached(self) -> bool {
        self == Completion::Reached
    }

    pub fn reason(self) -> &'static str {
        match self {
            Completion::Reached => "AtPosition",
            Completion::Moving => "Moving",
            Completion::Halted { reason, .. } => reason,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Completion::Reached => "position reached",
            Completion::Moving => "moving shutter to position",
            Completion::Halted { message, .. } => message,
        }
    }

    pub fn request_phase(self) -> RequestPhase {
        if self.is_reached() {
            RequestPhase::Completed
        } else {
            RequestPhase::Moving
        }
    }
}
