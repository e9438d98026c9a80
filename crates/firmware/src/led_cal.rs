//! LED current auto-calibration (`PCB-LEDn target [max_mA]`).
//!
//! For every active timeslot that drives LED n, both current fields of the
//! slot's LED power register are raised one step per frame until the signal
//! exceeds `target` percent of ADC full scale, or the current would exceed
//! the limit. The last step is then undone.
//!
//! This blocks the command loop: the device runs in go mode and the FIFO is
//! polled in place, bounded by [`MAX_POLLS`] per frame.

use core::fmt::{self, Write};

use embedded_storage::nor_flash::NorFlash;
use optics::format::Fixed;
use optics::{ChannelFrame, TimeslotLayout};
use platform::adpd410x::{
    slot_letter, ts_reg, ADC_OFF2_ZERO_ADJUST, COUNTS_NUM_INT_MASK, COUNTS_NUM_INT_SHIFT, COUNTS_NUM_REPEAT_MASK,
    DECIMATE_FACTOR_MASK, DECIMATE_FACTOR_SHIFT, LED_CURRENT_HIGH_SHIFT, LED_CURRENT_LOW_MASK, LED_CURRENT_LSB_MA,
    LED_CURRENT_MASK, TS_ADC_OFF2, TS_COUNTS, TS_DECIMATE, TS_INPUTS, TS_LED_POW12, TS_LED_POW34,
};
use platform::config::{CHANNEL_COUNT, LED_CAL_MAX_CURRENT};
use platform::{DataReadyIrq, OpMode, OpticalFrontEnd};

use crate::cli::{ensure_no_session, parse_f32, split_index, CommandError};
use crate::instrument::Instrument;

/// FIFO polls per frame before giving up.
pub const MAX_POLLS: u32 = 100_000;

/// ADC full-scale code per pulse.
const ADC_FULL_SCALE: f32 = 8192.0;

/// Code offset added when the slot's zero adjust is enabled.
const ZERO_ADJUST_CODE: f32 = 2048.0;

/// LEDs on the board.
const LED_COUNT: usize = 4;

/// LED calibration errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LedCalError {
    /// Register or FIFO access failed.
    Device,
    /// No frame arrived within [`MAX_POLLS`] polls.
    Timeout,
}

#[cfg(feature = "std")]
impl std::error::Error for LedCalError {}

impl fmt::Display for LedCalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device => write!(f, "Front-end access failed"),
            Self::Timeout => write!(f, "No data from the front end"),
        }
    }
}

impl From<LedCalError> for CommandError {
    fn from(_: LedCalError) -> Self {
        Self::Device
    }
}

/// Result for one timeslot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotCalibration {
    /// Calibrated timeslot.
    pub slot: u8,
    /// LED power register that was changed.
    pub register: u16,
    /// Its final value.
    pub value: u16,
    /// Signal level at the final step, percent of full scale.
    pub landing: f32,
}

/// Register holding the current of LED `led` (0-based) in `slot`.
pub fn led_register(slot: u8, led: usize) -> u16 {
    if led % 2 == 0 {
        ts_reg(slot, TS_LED_POW12)
    } else {
        ts_reg(slot, TS_LED_POW34)
    }
}

/// Bits of `INPUTS` that route LED `led` (0-based).
pub fn led_input_mask(led: usize) -> u16 {
    u32::try_from(led)
        .ok()
        .and_then(|led| led.checked_mul(4))
        .and_then(|shift| 0xFu16.checked_shl(shift))
        .unwrap_or(0)
}

/// Step the LED current of `slot` up to `target` percent of full scale.
///
/// Leaves the device in standby with an empty FIFO, also on error.
pub fn calibrate_slot<D: OpticalFrontEnd>(
    dev: &mut D,
    layout: &TimeslotLayout,
    slot: u8,
    led: usize,
    target: f32,
    max_current_ma: f32,
) -> Result<SlotCalibration, LedCalError> {
    let result = step_current(dev, layout, slot, led, target, max_current_ma);
    let stopped = dev
        .set_opmode(OpMode::Standby)
        .and_then(|()| dev.clear_fifo())
        .map_err(|_| LedCalError::Device);
    let calibration = result?;
    stopped?;
    Ok(calibration)
}

fn step_current<D: OpticalFrontEnd>(
    dev: &mut D,
    layout: &TimeslotLayout,
    slot: u8,
    led: usize,
    target: f32,
    max_current_ma: f32,
) -> Result<SlotCalibration, LedCalError> {
    let device = |_| LedCalError::Device;

    let counts = dev.read_reg(ts_reg(slot, TS_COUNTS)).map_err(device)?;
    let decimate = dev.read_reg(ts_reg(slot, TS_DECIMATE)).map_err(device)?;
    #[allow(clippy::arithmetic_side_effects)] // Safety: constant shifts of masked fields, 255 * 255 fits u16
    let (pulses, averages) = (
        ((counts & COUNTS_NUM_INT_MASK) >> COUNTS_NUM_INT_SHIFT) * (counts & COUNTS_NUM_REPEAT_MASK),
        ((decimate & DECIMATE_FACTOR_MASK) >> DECIMATE_FACTOR_SHIFT) + 1,
    );
    let zero_adjust = dev.read_reg(ts_reg(slot, TS_ADC_OFF2)).map_err(device)? & ADC_OFF2_ZERO_ADJUST != 0;
    let full_scale = f32::from(pulses.max(1)) * ADC_FULL_SCALE;
    let zero = if zero_adjust { ZERO_ADJUST_CODE } else { 0.0 };

    let register = led_register(slot, led);
    let mut step: u16 = 1;
    let mut value = write_step(dev, register, step)?;
    let mut landing = 0.0;

    dev.set_opmode(OpMode::Go).map_err(device)?;
    loop {
        let frame = next_frame(dev, layout)?;
        let first = u16::from(slot).saturating_mul(2);
        let readback = frame.code(first as u8).max(frame.code(first.saturating_add(1) as u8));
        let comp = ((readback as f32 / f32::from(averages)) - zero) / full_scale * 100.0;
        let current = 2.0 * f32::from(step) * LED_CURRENT_LSB_MA;

        if comp > target || current > max_current_ma {
            step = step.saturating_sub(1);
            value = write_step(dev, register, step)?;
            break;
        }
        landing = comp;
        if step >= LED_CURRENT_LOW_MASK {
            break;
        }
        step = step.saturating_add(1);
        value = write_step(dev, register, step)?;
    }
    debug!("slot {} led current step {}", slot, step);

    Ok(SlotCalibration {
        slot,
        register,
        value,
        landing,
    })
}

/// Set both current fields of `register` to `step`, returning the written value.
fn write_step<D: OpticalFrontEnd>(dev: &mut D, register: u16, step: u16) -> Result<u16, LedCalError> {
    let step = step & LED_CURRENT_LOW_MASK;
    #[allow(clippy::arithmetic_side_effects)] // Safety: a 7-bit step shifted by 8 stays inside u16
    let fields = step | (step << LED_CURRENT_HIGH_SHIFT);
    let previous = dev.read_reg(register).map_err(|_| LedCalError::Device)?;
    let value = (previous & !LED_CURRENT_MASK) | fields;
    dev.write_reg(register, value).map_err(|_| LedCalError::Device)?;
    Ok(value)
}

fn next_frame<D: OpticalFrontEnd>(dev: &mut D, layout: &TimeslotLayout) -> Result<ChannelFrame, LedCalError> {
    let frame_bytes = layout.frame_bytes();
    let mut polls = 0u32;
    while usize::from(dev.fifo_byte_count().map_err(|_| LedCalError::Device)?) < frame_bytes {
        polls = polls.saturating_add(1);
        if polls >= MAX_POLLS {
            return Err(LedCalError::Timeout);
        }
    }
    let mut buf = [0u8; CHANNEL_COUNT * 4];
    let bytes = buf.get_mut(..frame_bytes).ok_or(LedCalError::Device)?;
    dev.read_fifo(bytes).map_err(|_| LedCalError::Device)?;
    ChannelFrame::decode(layout, bytes).map_err(|_| LedCalError::Device)
}

/// `PCB-LEDn target [max_mA]`.
pub(crate) fn command<D, F, I, W>(
    inst: &mut Instrument<'_, D, F, I>,
    tail: &str,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    ensure_no_session(inst)?;
    if !inst.settings.idle {
        return Err(CommandError::Busy);
    }
    let led = match split_index(tail) {
        Some((n, "")) if (1..=LED_COUNT).contains(&n) => n.saturating_sub(1),
        _ => return Err(CommandError::Arguments),
    };
    let mut tokens = args.split_whitespace();
    let target = tokens.next().and_then(parse_f32).ok_or(CommandError::Arguments)?;
    let max_current = tokens.next().and_then(parse_f32).unwrap_or(f32::from(LED_CAL_MAX_CURRENT));

    inst.update_layout().map_err(|_| CommandError::Device)?;
    let layout = inst.layout;
    let mask = led_input_mask(led);

    let mut letters: heapless::String<12> = heapless::String::new();
    let mut landing = None;
    for slot in 0..layout.active_slots() {
        let inputs = inst.device.read_reg(ts_reg(slot, TS_INPUTS)).map_err(|_| CommandError::Device)?;
        if inputs & mask == 0 {
            continue;
        }
        let calibration = calibrate_slot(&mut inst.device, &layout, slot, led, target, max_current)?;
        writeln!(out, "RESP: REG 0x{:04X} = 0x{:04X}", calibration.register, calibration.value)?;
        letters.push(slot_letter(slot)).map_err(|_| CommandError::Arguments)?;
        landing = Some(calibration.landing);
    }

    let n = led.saturating_add(1);
    match landing {
        Some(landing) => writeln!(out, "RESP: PCB-LED{n} {letters} {}%", Fixed::new(landing, 2))?,
        None => writeln!(out, "RESP: PCB-LED{n} NOT USED")?,
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects, clippy::float_cmp)]
mod tests {
    use super::*;
    use platform::adpd410x::REG_OPMODE;
    use platform::mocks::MockFrontEnd;

    fn device() -> MockFrontEnd {
        MockFrontEnd::with_registers(&[
            (REG_OPMODE, 0x0000),
            (ts_reg(0, TS_COUNTS), 0x0101),
            (ts_reg(0, TS_LED_POW12), 0x8000),
        ])
    }

    #[test]
    fn test_led_routing() {
        assert_eq!(led_register(2, 0), ts_reg(2, TS_LED_POW12));
        assert_eq!(led_register(2, 3), ts_reg(2, TS_LED_POW34));
        assert_eq!(led_input_mask(0), 0x000F);
        assert_eq!(led_input_mask(3), 0xF000);
    }

    #[test]
    fn test_steps_back_after_overshoot() {
        let mut dev = device();
        dev.push_fifo_codes(&[1000, 2000, 3000, 5000], 4);
        let layout = TimeslotLayout::uniform(1, 0, 4);

        let cal = calibrate_slot(&mut dev, &layout, 0, 0, 50.0, 338.0).unwrap();
        assert_eq!(cal.value, 0x8303);
        assert_eq!(dev.reg(ts_reg(0, TS_LED_POW12)), 0x8303);
        let expected = 3000.0 / 8192.0 * 100.0;
        assert!((cal.landing - expected).abs() < 1e-3);
        assert_eq!(dev.reg(REG_OPMODE) & 0x1, 0, "left in standby");
    }

    #[test]
    fn test_current_limit_stops_stepping() {
        let mut dev = device();
        dev.push_fifo_codes(&[10, 10, 10, 10], 4);
        let layout = TimeslotLayout::uniform(1, 0, 4);

        // 3 mA per step across both fields: step 2 reaches 6 mA > 5 mA.
        let cal = calibrate_slot(&mut dev, &layout, 0, 0, 99.0, 5.0).unwrap();
        assert_eq!(cal.value & LED_CURRENT_MASK, 0x0101);
    }

    #[test]
    fn test_times_out_without_data() {
        let mut dev = device();
        let layout = TimeslotLayout::uniform(1, 0, 4);
        assert_eq!(
            calibrate_slot(&mut dev, &layout, 0, 0, 50.0, 338.0),
            Err(LedCalError::Timeout)
        );
        assert_eq!(dev.reg(REG_OPMODE) & 0x1, 0);
    }
}
