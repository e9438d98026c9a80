//! Mock implementations for testing
//!
//! This module provides mock implementations of all platform contracts
//! for use in unit and integration tests of the dependent crates.

#![cfg(any(test, feature = "std"))]
// Mocks index their backing stores with addresses that were bounds-checked
// against `REGISTER_SPACE` / the flash window on entry, and count events in
// `usize` fields that cannot realistically overflow inside a test.
#![allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::collections::VecDeque;
use std::vec;
use std::vec::Vec;

use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use crate::adpd410x::{
    FIFO_BYTE_COUNT_MASK, FIFO_CLEAR, REGISTER_SPACE, REG_CHIP_ID, REG_FIFO_STATUS,
};
use crate::config::{CAL_REGION_END, CAL_REGION_START, FLASH_PAGE_SIZE};
use crate::front_end::{DataReadyIrq, OpticalFrontEnd};

/// Chip id reported by [`MockFrontEnd`] (ADPD4100).
pub const MOCK_CHIP_ID: u16 = 0x00C2;

/// Error raised by [`MockFrontEnd`] fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBusError {
    /// Read of the given address failed.
    Read(u16),
    /// Write of the given address failed.
    Write(u16),
    /// Address outside the modelled register space.
    Address(u16),
    /// FIFO read asked for more bytes than are queued.
    FifoUnderrun,
}

/// Mock ADPD410x: a flat register file, a write log and a FIFO byte queue.
///
/// `FIFO_STATUS` is synthesised from the queue length; writing its clear bit
/// flushes the queue. All other registers behave as plain storage.
pub struct MockFrontEnd {
    regs: Vec<u16>,
    writes: Vec<(u16, u16)>,
    fifo: VecDeque<u8>,
    fail_read_at: Option<u16>,
    fail_write_at: Option<u16>,
    writes_before_failure: Option<usize>,
}

impl MockFrontEnd {
    /// Create a mock with all registers zero except the chip id.
    pub fn new() -> Self {
        let mut regs = vec![0u16; usize::from(REGISTER_SPACE)];
        regs[usize::from(REG_CHIP_ID)] = MOCK_CHIP_ID;
        Self {
            regs,
            writes: Vec::new(),
            fifo: VecDeque::new(),
            fail_read_at: None,
            fail_write_at: None,
            writes_before_failure: None,
        }
    }

    /// Create a mock with the given registers preset (not logged as writes).
    pub fn with_registers(pairs: &[(u16, u16)]) -> Self {
        let mut dev = Self::new();
        for &(addr, value) in pairs {
            dev.set_reg(addr, value);
        }
        dev
    }

    /// Current value of a register, bypassing fault injection.
    pub fn reg(&self, addr: u16) -> u16 {
        self.regs.get(usize::from(addr)).copied().unwrap_or(0)
    }

    /// Preset a register without logging a write.
    pub fn set_reg(&mut self, addr: u16, value: u16) {
        if let Some(slot) = self.regs.get_mut(usize::from(addr)) {
            *slot = value;
        }
    }

    /// Snapshot of the whole register file.
    pub fn registers(&self) -> Vec<u16> {
        self.regs.clone()
    }

    /// Every successful write, in order.
    pub fn writes(&self) -> &[(u16, u16)] {
        &self.writes
    }

    /// Forget the write log.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    /// Queue raw bytes into the FIFO.
    pub fn push_fifo(&mut self, bytes: &[u8]) {
        self.fifo.extend(bytes.iter().copied());
    }

    /// Queue codes into the FIFO, big-endian, `size` bytes each.
    pub fn push_fifo_codes(&mut self, codes: &[u32], size: usize) {
        for code in codes {
            let bytes = code.to_be_bytes();
            let size = size.clamp(1, 4);
            self.push_fifo(&bytes[4 - size..]);
        }
    }

    /// Bytes waiting in the FIFO.
    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    /// Fail every read of `addr`.
    pub fn fail_reads_from(&mut self, addr: u16) {
        self.fail_read_at = Some(addr);
    }

    /// Fail every write to `addr`.
    pub fn fail_writes_to(&mut self, addr: u16) {
        self.fail_write_at = Some(addr);
    }

    /// Let `count` more writes succeed, then fail all writes.
    pub fn fail_after_writes(&mut self, count: usize) {
        self.writes_before_failure = Some(count);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&mut self) {
        self.fail_read_at = None;
        self.fail_write_at = None;
        self.writes_before_failure = None;
    }
}

impl Default for MockFrontEnd {
    fn default() -> Self {
        Self::new()
    }
}

impl OpticalFrontEnd for MockFrontEnd {
    type Error = MockBusError;

    fn read_reg(&mut self, addr: u16) -> Result<u16, Self::Error> {
        if self.fail_read_at == Some(addr) {
            return Err(MockBusError::Read(addr));
        }
        if addr >= REGISTER_SPACE {
            return Err(MockBusError::Address(addr));
        }
        if addr == REG_FIFO_STATUS {
            let queued = u16::try_from(self.fifo.len()).unwrap_or(u16::MAX);
            return Ok(queued.min(FIFO_BYTE_COUNT_MASK));
        }
        Ok(self.regs[usize::from(addr)])
    }

    fn write_reg(&mut self, addr: u16, value: u16) -> Result<(), Self::Error> {
        if self.fail_write_at == Some(addr) {
            return Err(MockBusError::Write(addr));
        }
        if let Some(left) = self.writes_before_failure.as_mut() {
            if *left == 0 {
                return Err(MockBusError::Write(addr));
            }
            *left -= 1;
        }
        if addr >= REGISTER_SPACE {
            return Err(MockBusError::Address(addr));
        }
        if addr == REG_FIFO_STATUS {
            if value & FIFO_CLEAR != 0 {
                self.fifo.clear();
            }
        } else {
            self.regs[usize::from(addr)] = value;
        }
        self.writes.push((addr, value));
        Ok(())
    }

    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        if self.fifo.len() < buf.len() {
            return Err(MockBusError::FifoUnderrun);
        }
        for byte in buf.iter_mut() {
            *byte = self.fifo.pop_front().unwrap_or(0);
        }
        Ok(())
    }
}

/// Mock NOR flash covering an address window with 0xFF erase semantics.
///
/// Writes can only clear bits, as on the real part; programming a page
/// without erasing it first ANDs the new data into the old.
pub struct MockFlash {
    origin: u32,
    data: Vec<u8>,
    erase_count: usize,
    write_count: usize,
    fail_writes: bool,
}

impl MockFlash {
    /// Create an erased flash window `[origin, origin + len)`.
    pub fn new(origin: u32, len: usize) -> Self {
        Self {
            origin,
            data: vec![0xFF; len],
            erase_count: 0,
            write_count: 0,
            fail_writes: false,
        }
    }

    /// The window that holds every calibration page of the board.
    pub fn calibration_region() -> Self {
        Self::new(CAL_REGION_START, (CAL_REGION_END - CAL_REGION_START) as usize)
    }

    /// Number of page erases performed.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    /// Number of write calls performed.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Make every subsequent write fail with `Other`.
    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Read one little-endian word at an absolute address.
    pub fn word(&self, addr: u32) -> Option<u32> {
        let start = self.index(addr, 4).ok()?;
        let bytes: [u8; 4] = self.data[start..start + 4].try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    fn index(&self, addr: u32, len: usize) -> Result<usize, NorFlashErrorKind> {
        let start = addr
            .checked_sub(self.origin)
            .ok_or(NorFlashErrorKind::OutOfBounds)? as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start),
            _ => Err(NorFlashErrorKind::OutOfBounds),
        }
    }
}

impl ErrorType for MockFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MockFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = self.index(offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.origin as usize + self.data.len()
    }
}

impl NorFlash for MockFlash {
    const WRITE_SIZE: usize = 8;
    const ERASE_SIZE: usize = FLASH_PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from % FLASH_PAGE_SIZE != 0 || to % FLASH_PAGE_SIZE != 0 || to < from {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let start = self.index(from, (to - from) as usize)?;
        for byte in &mut self.data[start..start + (to - from) as usize] {
            *byte = 0xFF;
        }
        self.erase_count += ((to - from) / FLASH_PAGE_SIZE) as usize;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        if offset as usize % Self::WRITE_SIZE != 0 || bytes.len() % Self::WRITE_SIZE != 0 {
            return Err(NorFlashErrorKind::NotAligned);
        }
        let start = self.index(offset, bytes.len())?;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        self.write_count += 1;
        Ok(())
    }
}

/// Mock interrupt line recording enable/disable calls.
#[derive(Debug, Default)]
pub struct MockIrq {
    enabled: bool,
    enable_count: usize,
    disable_count: usize,
}

impl MockIrq {
    /// Create a masked line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the line is currently unmasked.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of `enable` calls.
    pub fn enable_count(&self) -> usize {
        self.enable_count
    }

    /// Number of `disable` calls.
    pub fn disable_count(&self) -> usize {
        self.disable_count
    }
}

impl DataReadyIrq for MockIrq {
    type Error = core::convert::Infallible;

    fn enable(&mut self) -> Result<(), Self::Error> {
        self.enabled = true;
        self.enable_count += 1;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Self::Error> {
        self.enabled = false;
        self.disable_count += 1;
        Ok(())
    }
}
