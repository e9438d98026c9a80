//! Time-resolved acquisitions: impulse response and fluorescence decay.
//!
//! An acquisition borrows timeslot A, reprograms it for one optical channel
//! and steps the integration window across the LED pulse (TIA/SSI) or lets
//! the FIFO collect one burst per trigger (IMP). Every register it touches
//! goes through an [`undo::UndoLog`], so any exit path restores the
//! streaming configuration exactly.
//!
//! ```text
//! Idle ─► Configuring ─► Collecting ⇄ Reading ─► Completing ─► Idle
//!              └────────────┴───────────┴────────► Rollback ─► Idle
//! ```

pub mod params;
pub mod session;
pub mod undo;

pub use params::{AcquisitionPlan, AcquisitionRequest, Clamps, Method};
pub use session::{Completion, Progress, Session, SessionState};
pub use undo::{RegisterChange, UndoError, UndoLog};

/// Acquisition errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// Another acquisition or the stream owns the device.
    Busy,
    /// Front-end register or FIFO access failed.
    Device,
    /// Arguments could not be parsed.
    Parse,
    /// Arguments parsed but are out of range.
    Validation,
    /// More register changes than the undo log holds.
    UndoLogFull,
    /// Sample buffer too small for the plan.
    BufferFull,
    /// No acquisition in progress.
    NotActive,
}

impl SessionError {
    /// Short name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Busy => "busy",
            Self::Device => "device",
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::UndoLogFull => "undo log full",
            Self::BufferFull => "buffer full",
            Self::NotActive => "not active",
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SessionError {}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Busy => write!(f, "Device busy"),
            Self::Device => write!(f, "Front-end access failed"),
            Self::Parse => write!(f, "Malformed acquisition arguments"),
            Self::Validation => write!(f, "Acquisition arguments out of range"),
            Self::UndoLogFull => write!(f, "Undo log full"),
            Self::BufferFull => write!(f, "Sample buffer full"),
            Self::NotActive => write!(f, "No acquisition in progress"),
        }
    }
}

impl<E> From<UndoError<E>> for SessionError {
    fn from(err: UndoError<E>) -> Self {
        match err {
            UndoError::Full => Self::UndoLogFull,
            UndoError::Device(_) => Self::Device,
        }
    }
}
