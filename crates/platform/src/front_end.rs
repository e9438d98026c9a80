//! Front-end and interrupt-line contracts
//!
//! The pipeline only ever talks to the ADPD410x through [`OpticalFrontEnd`].
//! The hardware implementation lives in the firmware crate (I²C driver), the
//! host implementation in [`crate::mocks`].

use crate::adpd410x::{
    FIFO_BYTE_COUNT_MASK, FIFO_CLEAR, OPMODE_OP_MODE_MASK, OPMODE_TIMESLOT_EN_MASK,
    OPMODE_TIMESLOT_EN_SHIFT, REG_FIFO_STATUS, REG_OPMODE, REG_TS_FREQ, REG_TS_FREQH,
    TS_FREQH_MASK,
};
use crate::config::{LFOSC_HZ, TIMESLOT_COUNT};

/// Device operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpMode {
    /// Timeslots halted, registers writable.
    Standby,
    /// Timeslots running, FIFO filling.
    Go,
}

impl OpMode {
    const fn bits(self) -> u16 {
        match self {
            Self::Standby => 0,
            Self::Go => 1,
        }
    }
}

/// Register-level access to the optical front end.
///
/// Implementors provide the three bus primitives; everything else is built
/// on top of them as default methods.
pub trait OpticalFrontEnd {
    /// Bus or device error.
    type Error;

    /// Read one 16-bit register.
    fn read_reg(&mut self, addr: u16) -> Result<u16, Self::Error>;

    /// Write one 16-bit register.
    fn write_reg(&mut self, addr: u16, value: u16) -> Result<(), Self::Error>;

    /// Drain `buf.len()` bytes from the FIFO.
    fn read_fifo(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Read-modify-write the bits selected by `mask`.
    fn update_bits(&mut self, addr: u16, mask: u16, value: u16) -> Result<(), Self::Error> {
        let old = self.read_reg(addr)?;
        self.write_reg(addr, (old & !mask) | (value & mask))
    }

    /// Number of bytes currently queued in the FIFO.
    fn fifo_byte_count(&mut self) -> Result<u16, Self::Error> {
        Ok(self.read_reg(REG_FIFO_STATUS)? & FIFO_BYTE_COUNT_MASK)
    }

    /// Flush the FIFO.
    fn clear_fifo(&mut self) -> Result<(), Self::Error> {
        self.update_bits(REG_FIFO_STATUS, FIFO_CLEAR, FIFO_CLEAR)
    }

    /// Switch between standby and go.
    fn set_opmode(&mut self, mode: OpMode) -> Result<(), Self::Error> {
        self.update_bits(REG_OPMODE, OPMODE_OP_MODE_MASK, mode.bits())
    }

    /// Number of enabled timeslots (1..=12).
    fn active_slots(&mut self) -> Result<u8, Self::Error> {
        let field = (self.read_reg(REG_OPMODE)? & OPMODE_TIMESLOT_EN_MASK) >> OPMODE_TIMESLOT_EN_SHIFT;
        // Field is 4 bits wide, so the sum stays below 17.
        #[allow(clippy::cast_possible_truncation, clippy::arithmetic_side_effects)]
        let count = field as u8 + 1;
        Ok(count.min(TIMESLOT_COUNT as u8))
    }

    /// Enable timeslots `0..count`. `count` is clamped to 1..=12.
    fn set_active_slots(&mut self, count: u8) -> Result<(), Self::Error> {
        let last = u16::from(count.clamp(1, TIMESLOT_COUNT as u8).saturating_sub(1));
        self.update_bits(
            REG_OPMODE,
            OPMODE_TIMESLOT_EN_MASK,
            last << OPMODE_TIMESLOT_EN_SHIFT,
        )
    }

    /// Raw timeslot frequency divider (low-frequency oscillator ticks per frame).
    fn sampling_divider(&mut self) -> Result<u32, Self::Error> {
        let low = u32::from(self.read_reg(REG_TS_FREQ)?);
        let high = u32::from(self.read_reg(REG_TS_FREQH)? & TS_FREQH_MASK);
        Ok((high << 16) | low)
    }

    /// Program the raw timeslot frequency divider.
    fn set_sampling_divider(&mut self, divider: u32) -> Result<(), Self::Error> {
        #[allow(clippy::cast_possible_truncation)] // both halves masked to 16 bits
        let (low, high) = ((divider & 0xFFFF) as u16, ((divider >> 16) & 0xFFFF) as u16);
        self.write_reg(REG_TS_FREQ, low)?;
        self.update_bits(REG_TS_FREQH, TS_FREQH_MASK, high)
    }

    /// Program the frame rate in Hz. `hz == 0` is treated as 1 Hz.
    fn set_sampling_hz(&mut self, hz: u32) -> Result<(), Self::Error> {
        self.set_sampling_divider(LFOSC_HZ.checked_div(hz).unwrap_or(LFOSC_HZ))
    }
}

/// The FIFO-threshold interrupt line.
///
/// Its handler must do nothing but [`crate::ReadyFlag::set`].
pub trait DataReadyIrq {
    /// Error raised while (un)registering the line.
    type Error;

    /// Register the handler and unmask the edge interrupt.
    fn enable(&mut self) -> Result<(), Self::Error>;

    /// Mask the interrupt and unregister the handler.
    fn disable(&mut self) -> Result<(), Self::Error>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::adpd410x::REG_OPMODE;
    use crate::mocks::MockFrontEnd;
    use proptest::prelude::*;

    #[test]
    fn test_opmode_keeps_slot_field() {
        let mut dev = MockFrontEnd::with_registers(&[(REG_OPMODE, 0x0300)]);
        dev.set_opmode(OpMode::Go).unwrap();
        assert_eq!(dev.reg(REG_OPMODE), 0x0301);
        dev.set_opmode(OpMode::Standby).unwrap();
        assert_eq!(dev.reg(REG_OPMODE), 0x0300);
    }

    #[test]
    fn test_zero_hz_means_one_hz() {
        let mut dev = MockFrontEnd::new();
        dev.set_sampling_hz(0).unwrap();
        assert_eq!(dev.sampling_divider().unwrap(), LFOSC_HZ);
        dev.set_sampling_hz(50).unwrap();
        assert_eq!(dev.sampling_divider().unwrap(), 20_000);
    }

    #[test]
    fn test_clear_fifo_flushes_queue() {
        let mut dev = MockFrontEnd::new();
        dev.push_fifo(&[1, 2, 3, 4]);
        assert_eq!(dev.fifo_byte_count().unwrap(), 4);
        dev.clear_fifo().unwrap();
        assert_eq!(dev.fifo_byte_count().unwrap(), 0);
    }

    proptest! {
        /// `update_bits` never touches bits outside the mask.
        #[test]
        fn test_update_bits_respects_mask(old in any::<u16>(), mask in any::<u16>(), value in any::<u16>()) {
            let mut dev = MockFrontEnd::with_registers(&[(0x0105, old)]);
            dev.update_bits(0x0105, mask, value).unwrap();
            let new = dev.reg(0x0105);
            prop_assert_eq!(new & !mask, old & !mask);
            prop_assert_eq!(new & mask, value & mask);
        }

        /// Slot counts read back clamped to 1..=12.
        #[test]
        fn test_active_slots_round_trip(count in any::<u8>()) {
            let mut dev = MockFrontEnd::new();
            dev.set_active_slots(count).unwrap();
            let expected = count.clamp(1, TIMESLOT_COUNT as u8);
            prop_assert_eq!(dev.active_slots().unwrap(), expected);
        }

        /// Dividers up to 23 bits survive the split across TS_FREQ/TS_FREQH.
        #[test]
        fn test_sampling_divider_round_trip(divider in 0u32..(1 << 23)) {
            let mut dev = MockFrontEnd::new();
            dev.set_sampling_divider(divider).unwrap();
            prop_assert_eq!(dev.sampling_divider().unwrap(), divider);
        }
    }
}
