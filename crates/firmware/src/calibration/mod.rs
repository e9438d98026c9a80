//! Flash-backed calibration store.
//!
//! Two fixed pages hold a [`CalibrationRecord`]: the manufacturer defaults
//! (MD, guarded by [`platform::config::MANUFACTURER_KEY`]) and the user
//! updates (UU). Boot loads and applies MD, then UU, so user settings win.
//! All editing goes through one in-RAM software buffer owned by
//! [`CalibrationStore`]; the `FL_*` commands load it, edit it, dump it,
//! apply it and program it back.
//!
//! Fluorescence reference curves live in a separate page-rotated region,
//! see [`fluo`].

pub mod factory;
pub mod fluo;
pub mod record;
pub mod store;

pub use record::{CalibrationRecord, PathField};
pub use store::{apply, ApplyReport, CalibrationStore, PageTarget};

use embedded_storage::nor_flash::NorFlashError;

/// Calibration store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Flash read, erase or program failed.
    Flash,
    /// Wrong key for the manufacturer page.
    AccessDenied,
    /// No free register slot left in the record.
    NoSpace,
    /// Register access on the front end failed.
    Device,
}

impl StoreError {
    /// Erase a driver-specific flash error, logging its kind.
    pub(crate) fn flash<E: NorFlashError>(err: &E) -> Self {
        let kind = err.kind();
        error!("calibration flash access failed: {}", flash_kind_name(kind));
        Self::Flash
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StoreError {}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Flash => write!(f, "Calibration flash access failed"),
            Self::AccessDenied => write!(f, "Manufacturer page is locked"),
            Self::NoSpace => write!(f, "No register slot left in the record"),
            Self::Device => write!(f, "Front-end register access failed"),
        }
    }
}

pub(crate) fn flash_kind_name(kind: embedded_storage::nor_flash::NorFlashErrorKind) -> &'static str {
    use embedded_storage::nor_flash::NorFlashErrorKind;
    match kind {
        NorFlashErrorKind::NotAligned => "not aligned",
        NorFlashErrorKind::OutOfBounds => "out of bounds",
        _ => "other",
    }
}
