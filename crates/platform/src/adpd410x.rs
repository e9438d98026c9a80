//! ADPD410x multimodal sensor front end register map.
//!
//! Reference: Analog Devices ADPD4100/ADPD4101 datasheet (Rev. A)
//!
//! Global registers live below `0x0100`. Each of the twelve timeslots (A..L)
//! owns a 32-register block starting at `0x0100 + slot * 0x20`; use
//! [`ts_reg`] with one of the `TS_*` offsets to address them.

/// 7-bit I²C device address.
pub const ADPD410X_I2C_ADDR: u8 = 0x24;
/// Marker OR-ed into the high address byte for 15-bit register addressing.
pub const LONG_ADDRESS_FLAG: u16 = 0x8000;

// ── Global registers ────────────────────────────────────────────────────────

/// FIFO status: byte count and the self-clearing FIFO clear bit.
pub const REG_FIFO_STATUS: u16 = 0x0000;
/// Interrupt status for timeslot data.
pub const REG_INT_STATUS_DATA: u16 = 0x0001;
/// FIFO threshold in bytes.
pub const REG_FIFO_TH: u16 = 0x0006;
/// Chip identification.
pub const REG_CHIP_ID: u16 = 0x0008;
/// Timeslot frequency divider, low 16 bits.
pub const REG_TS_FREQ: u16 = 0x000D;
/// Timeslot frequency divider, high 7 bits.
pub const REG_TS_FREQH: u16 = 0x000E;
/// System control (oscillator selection, software reset).
pub const REG_SYS_CTL: u16 = 0x000F;
/// Operating mode and last enabled timeslot.
pub const REG_OPMODE: u16 = 0x0010;
/// Interrupt X enable for data events.
pub const REG_INT_ENABLE_XD: u16 = 0x0014;
/// FIFO read port.
pub const REG_FIFO_DATA: u16 = 0x002F;

/// Highest register address (exclusive) modelled by the mocks.
pub const REGISTER_SPACE: u16 = 0x0280;

// ── Global register fields ──────────────────────────────────────────────────

/// FIFO_STATUS: number of bytes waiting in the FIFO.
pub const FIFO_BYTE_COUNT_MASK: u16 = 0x07FF;
/// FIFO_STATUS: write 1 to flush the FIFO.
pub const FIFO_CLEAR: u16 = 0x8000;
/// FIFO_TH: threshold field.
pub const FIFO_TH_MASK: u16 = 0x03FF;
/// OPMODE: 0 = standby, 1 = go.
pub const OPMODE_OP_MODE_MASK: u16 = 0x0001;
/// OPMODE: index of the last enabled timeslot.
pub const OPMODE_TIMESLOT_EN_MASK: u16 = 0x0F00;
/// OPMODE: shift of the last-timeslot field.
pub const OPMODE_TIMESLOT_EN_SHIFT: u16 = 8;
/// TS_FREQH: meaningful bits of the high divider word.
pub const TS_FREQH_MASK: u16 = 0x007F;
/// INT_ENABLE_XD: raise interrupt X on FIFO threshold.
pub const INT_ENABLE_FIFO_TH: u16 = 0x8000;
/// CHIP_ID: product id byte.
pub const CHIP_ID_MASK: u16 = 0x00FF;

// ── Timeslot register offsets ───────────────────────────────────────────────

/// Base address of timeslot A.
pub const TS_BASE: u16 = 0x0100;
/// Address stride between timeslots.
pub const TS_STRIDE: u16 = 0x0020;
/// Timeslot control: channel 2 enable, sample type.
pub const TS_CTRL: u16 = 0x00;
/// Signal path (TIA, BPF, integrator) selection.
pub const TS_PATH: u16 = 0x01;
/// Input pair routing.
pub const TS_INPUTS: u16 = 0x02;
/// Cathode voltage and precondition.
pub const TS_CATHODE: u16 = 0x03;
/// AFE trim (TIA gain, VREF).
pub const TS_AFE_TRIM: u16 = 0x04;
/// LED 1/2 drive current.
pub const TS_LED_POW12: u16 = 0x05;
/// LED 3/4 drive current.
pub const TS_LED_POW34: u16 = 0x06;
/// Integration and repeat counts.
pub const TS_COUNTS: u16 = 0x07;
/// Pulse period.
pub const TS_PERIOD: u16 = 0x08;
/// LED pulse width and offset.
pub const TS_LED_PULSE: u16 = 0x09;
/// Integrator width.
pub const TS_INTEG_WIDTH: u16 = 0x0A;
/// Integrator offset (coarse µs + fine 1/32 µs).
pub const TS_INTEG_OFFSET: u16 = 0x0B;
/// Modulation pulse.
pub const TS_MOD_PULSE: u16 = 0x0C;
/// Pulse pattern.
pub const TS_PATTERN: u16 = 0x0D;
/// ADC offset, channel 1.
pub const TS_ADC_OFF1: u16 = 0x0E;
/// ADC offset, channel 2.
pub const TS_ADC_OFF2: u16 = 0x0F;
/// Data format: signal size in bytes.
pub const TS_DATA1: u16 = 0x10;
/// Data format: lit/dark sizes and shifts.
pub const TS_DATA2: u16 = 0x11;
/// Decimation factor.
pub const TS_DECIMATE: u16 = 0x12;

// ── Timeslot register fields ────────────────────────────────────────────────

/// TS_CTRL: enable the second channel.
pub const TS_CTRL_CH2_EN: u16 = 0x4000;
/// DATA1: signal size field (bytes per sample).
pub const DATA1_SIGNAL_SIZE_MASK: u16 = 0x000F;
/// LED_POWxy: LED current field of the lower LED.
pub const LED_CURRENT_LOW_MASK: u16 = 0x007F;
/// LED_POWxy: LED current field of the upper LED.
pub const LED_CURRENT_HIGH_MASK: u16 = 0x7F00;
/// LED_POWxy: both LED current fields.
pub const LED_CURRENT_MASK: u16 = LED_CURRENT_LOW_MASK | LED_CURRENT_HIGH_MASK;
/// LED_PULSE: width field (µs).
pub const LED_PULSE_WIDTH_MASK: u16 = 0xFF00;
/// LED_PULSE: offset field (µs).
pub const LED_PULSE_OFFSET_MASK: u16 = 0x00FF;
/// COUNTS: integrations per pulse.
pub const COUNTS_NUM_INT_MASK: u16 = 0xFF00;
/// COUNTS: shift of the integrations-per-pulse field.
pub const COUNTS_NUM_INT_SHIFT: u16 = 8;
/// COUNTS: pulse repeats per sample.
pub const COUNTS_NUM_REPEAT_MASK: u16 = 0x00FF;
/// INTEG_WIDTH: integrator width field (µs).
pub const INTEG_WIDTH_MASK: u16 = 0x001F;
/// INTEG_OFFSET: coarse (µs) and fine (1/32 µs) fields together.
pub const INTEG_OFFSET_MASK: u16 = 0x1FFF;
/// INTEG_OFFSET: shift of the coarse field.
pub const INTEG_OFFSET_COARSE_SHIFT: u16 = 5;
/// ADC_OFFx: zero-adjust field.
pub const ADC_OFF_MASK: u16 = 0x3FFF;
/// ADC_OFF2: channel codes are offset by half scale (2048 per pulse).
pub const ADC_OFF2_ZERO_ADJUST: u16 = 0x8000;
/// DECIMATE: decimation factor minus one.
pub const DECIMATE_FACTOR_MASK: u16 = 0x07F0;
/// DECIMATE: shift of the decimation factor field.
pub const DECIMATE_FACTOR_SHIFT: u16 = 4;
/// LED_POWxy: shift of the upper LED current field.
pub const LED_CURRENT_HIGH_SHIFT: u16 = 8;
/// Current of one LED driver step, in mA.
pub const LED_CURRENT_LSB_MA: f32 = 1.5;

/// Absolute address of `offset` inside the register block of `slot` (0 = A).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // Safety: slot < 12 keeps the sum below 0x0280
pub const fn ts_reg(slot: u8, offset: u16) -> u16 {
    TS_BASE + (slot as u16 % 12) * TS_STRIDE + offset
}

/// Timeslot letter for `slot` (0 = `A`).
#[inline]
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // Safety: slot % 12 keeps the sum inside 'A'..='L'
pub const fn slot_letter(slot: u8) -> char {
    (b'A' + slot % 12) as char
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeslot_blocks_are_strided() {
        assert_eq!(ts_reg(0, TS_CTRL), 0x0100);
        assert_eq!(ts_reg(1, TS_LED_POW12), 0x0125);
        assert_eq!(ts_reg(3, TS_DATA1), 0x0170);
        assert_eq!(ts_reg(11, TS_DECIMATE), 0x0272);
        assert!(ts_reg(11, TS_DECIMATE) < REGISTER_SPACE);
    }

    #[test]
    fn test_slot_letters() {
        assert_eq!(slot_letter(0), 'A');
        assert_eq!(slot_letter(3), 'D');
        assert_eq!(slot_letter(11), 'L');
    }
}
