//! Boot sequence for the CN0503 board.
//!
//! Initialization order (calibration must land on a configured device):
//!   1. Read and log the ADPD410x chip id
//!   2. Base configuration: 50 Hz sampling, timeslots A..D
//!   3. Write factory defaults to the MD page if it is blank
//!   4. Load and apply MD, then UU (user settings win)
//!   5. Clear the software buffer
//!   6. Read the timeslot layout back from the device
//!   7. Standby with an empty FIFO
//!
//! The hardware binary calls [`boot`] once, after the clocks, the I²C bus and
//! the interrupt line are up and before the first command is accepted.

use core::fmt;

use embedded_storage::nor_flash::NorFlash;
use platform::adpd410x::{CHIP_ID_MASK, REG_CHIP_ID};
use platform::config::{BOARD_TIMESLOTS, CODE_ODR_HZ};
use platform::{DataReadyIrq, OpticalFrontEnd};

use crate::calibration::{apply, ApplyReport, PageTarget, StoreError};
use crate::instrument::Instrument;

/// Ordered list of boot steps, for documentation and testing.
pub const BOOT_SEQUENCE_STEPS: &[&str] = &[
    "1. Chip id: read and log before any write",
    "2. Base config: 50 Hz sampling, last timeslot D",
    "3. MD page: write factory defaults when blank",
    "4. Calibration: load + apply MD, then load + apply UU",
    "5. Buffer: clear so FL_WRITE starts from an empty record",
    "6. Layout: read active slots and code widths back",
    "7. Idle: standby, FIFO flushed",
];

/// Boot failures. Calibration apply problems are reported, not fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootError {
    /// Front-end access failed.
    Device,
    /// Calibration flash access failed.
    Store(StoreError),
}

#[cfg(feature = "std")]
impl std::error::Error for BootError {}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "Front-end access failed during boot"),
            Self::Store(err) => write!(f, "Calibration store failed during boot: {err}"),
        }
    }
}

impl From<StoreError> for BootError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

/// What boot found and did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    /// Chip id register, masked.
    pub chip_id: u16,
    /// Factory defaults were written to a blank MD page.
    pub factory_written: bool,
    /// Result of applying the manufacturer page.
    pub manufacturer: ApplyReport,
    /// Result of applying the user page.
    pub user: ApplyReport,
}

/// Bring `inst` from power-on to an idle, calibrated instrument.
pub fn boot<D, F, I>(inst: &mut Instrument<'_, D, F, I>) -> Result<BootReport, BootError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
{
    let device = |_| BootError::Device;

    let chip_id = inst.device.read_reg(REG_CHIP_ID).map_err(device)? & CHIP_ID_MASK;
    info!("ADPD410x chip id {}", chip_id);

    inst.device.set_sampling_hz(CODE_ODR_HZ).map_err(device)?;
    inst.device.set_active_slots(BOARD_TIMESLOTS).map_err(device)?;

    let factory_written = inst.store.ensure_factory_defaults()?;

    let manufacturer = load_and_apply(inst, PageTarget::Manufacturer)?;
    let user = load_and_apply(inst, PageTarget::User)?;
    inst.store.clear_buffer();

    inst.update_layout().map_err(device)?;
    inst.standby().map_err(device)?;
    debug!("boot done: {} slots", inst.layout.active_slots());

    Ok(BootReport {
        chip_id,
        factory_written,
        manufacturer,
        user,
    })
}

fn load_and_apply<D, F, I>(inst: &mut Instrument<'_, D, F, I>, target: PageTarget) -> Result<ApplyReport, BootError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
{
    inst.store.load(target)?;
    let report = apply(inst.store.buffer(), &mut inst.device, &mut inst.engine, &mut inst.settings);
    if !report.is_clean() {
        warn!("calibration page {} applied with errors", target.name());
    }
    Ok(report)
}
