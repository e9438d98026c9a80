//! Register undo log.
//!
//! Every register an acquisition touches is written through
//! [`UndoLog::apply`], which records the previous value first. Reverting
//! replays the log newest-first, so overlapping writes to one register
//! restore the oldest value.

use heapless::Vec;
use platform::OpticalFrontEnd;

/// One recorded register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterChange {
    /// Register address.
    pub addr: u16,
    /// Value requested for the masked bits.
    pub value: u16,
    /// Bits the write touched.
    pub mask: u16,
    /// Full register value before the write.
    pub previous: u16,
}

/// Undo log errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UndoError<E> {
    /// No room for another entry; nothing was written.
    Full,
    /// The front end failed.
    Device(E),
}

/// Bounded log of register changes.
#[derive(Debug, Clone, Default)]
pub struct UndoLog<const N: usize> {
    entries: Vec<RegisterChange, N>,
}

impl<const N: usize> UndoLog<N> {
    /// Empty log.
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Recorded changes, oldest first.
    pub fn entries(&self) -> &[RegisterChange] {
        &self.entries
    }

    /// Number of recorded changes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `value` into the `mask` bits of `addr`, recording the old value.
    pub fn apply<D: OpticalFrontEnd>(
        &mut self,
        dev: &mut D,
        addr: u16,
        value: u16,
        mask: u16,
    ) -> Result<(), UndoError<D::Error>> {
        if self.entries.is_full() {
            return Err(UndoError::Full);
        }
        let previous = dev.read_reg(addr).map_err(UndoError::Device)?;
        let change = RegisterChange { addr, value, mask, previous };
        self.entries.push(change).map_err(|_| UndoError::Full)?;
        dev.write_reg(addr, (previous & !mask) | (value & mask))
            .map_err(UndoError::Device)
    }

    /// Write every recorded previous value back, newest first, and empty the log.
    ///
    /// Keeps going after a failed write; the first error is returned.
    pub fn revert<D: OpticalFrontEnd>(&mut self, dev: &mut D) -> Result<(), D::Error> {
        let mut first_error = None;
        while let Some(change) = self.entries.pop() {
            if let Err(err) = dev.write_reg(change.addr, change.previous) {
                error!("undo write failed at {}", change.addr);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
