//! Channel presets (`CHANNn COLO|FLUO|TURB`).
//!
//! A preset points optical path n−1 at the two photodiodes of timeslot n−1
//! and sets that slot's LED current for the measurement type.

use core::fmt::Write;

use embedded_storage::nor_flash::NorFlash;
use heapless::String;
use optics::format::Sci;
use optics::Expression;
use platform::adpd410x::{slot_letter, LED_CURRENT_MASK};
use platform::{DataReadyIrq, OpticalFrontEnd};

use crate::cli::{ensure_no_session, split_index, CommandError};
use crate::instrument::Instrument;
use crate::led_cal::led_register;

/// Channels on the board.
const CHANNEL_COUNT: usize = 4;

/// LED current fields for fluorescence: both LEDs at step 0x70.
const FLUORESCENCE_CURRENT: u16 = 0x7070;

/// LED current fields for absorbance and turbidity.
const DEFAULT_CURRENT: u16 = 0x0030;

/// Measurement type of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Preset {
    /// Colorimetry or absorbance: transmitted light over reference.
    Colorimetry,
    /// Fluorescence: high LED current, no subtraction.
    Fluorescence,
    /// Turbidity: scattered light over transmitted, no subtraction.
    Turbidity,
}

impl Preset {
    /// Match the first four characters of `option`, case-insensitively.
    pub fn from_option(option: &str) -> Option<Self> {
        let prefix = option.get(..4)?;
        [Self::Colorimetry, Self::Fluorescence, Self::Turbidity]
            .into_iter()
            .find(|preset| preset.option().eq_ignore_ascii_case(prefix))
    }

    /// Command option token.
    pub fn option(self) -> &'static str {
        match self {
            Self::Colorimetry => "COLO",
            Self::Fluorescence => "FLUO",
            Self::Turbidity => "TURB",
        }
    }

    /// Name printed in the final response line.
    pub fn description(self) -> &'static str {
        match self {
            Self::Colorimetry => "COLORIMETRY/ABSORBANCE",
            Self::Fluorescence => "FLUORESCENCE",
            Self::Turbidity => "TURBIDITY",
        }
    }

    /// Whether the relative ratio subtracts the baseline.
    pub fn subtract(self) -> bool {
        self == Self::Colorimetry
    }

    /// LED current fields written to the slot's power register.
    pub fn led_current(self) -> u16 {
        match self {
            Self::Fluorescence => FLUORESCENCE_CURRENT,
            Self::Colorimetry | Self::Turbidity => DEFAULT_CURRENT,
        }
    }

    /// Ratio expression for timeslot `slot`: channel 1 over channel 2,
    /// swapped for turbidity.
    pub fn expression(self, slot: u8) -> String<32> {
        let letter = slot_letter(slot);
        let (num, den) = match self {
            Self::Turbidity => ('2', '1'),
            Self::Colorimetry | Self::Fluorescence => ('1', '2'),
        };
        let mut text = String::new();
        // 17 characters always fit.
        let _ = write!(text, "{letter}{num}#2048-{letter}{den}#2048-/");
        text
    }
}

/// `CHANNn COLO|FLUO|TURB`.
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
    let channel = match split_index(tail) {
        Some((n, "")) if (1..=CHANNEL_COUNT).contains(&n) => n,
        _ => {
            writeln!(out, "ERROR: CHANNEL NUMBER")?;
            return Ok(());
        }
    };
    let Some(preset) = Preset::from_option(args.trim()) else {
        writeln!(out, "ERROR: OPTION")?;
        return Ok(());
    };
    if preset != Preset::Colorimetry && matches!(channel, 2 | 3) {
        writeln!(out, "ERROR: CHANNEL NUMBER AND OPTION COMBINATION IMPOSSIBLE")?;
        return Ok(());
    }
    ensure_no_session(inst)?;

    let path = channel.saturating_sub(1);
    let slot = path as u8;
    let optical = inst.engine.path_mut(path).ok_or(CommandError::Arguments)?;
    optical.set_subtract(preset.subtract());
    writeln!(out, "RESP: DEF{path}? SUBE={}", u8::from(preset.subtract()))?;
    optical.set_baseline(1.0);
    writeln!(out, "RESP: DEF{path}? RATB={}", Sci::new(1.0, 5))?;

    let text = preset.expression(slot);
    let expression = Expression::parse(&text).map_err(|_| CommandError::Arguments)?;
    inst.engine.set_expression(path, expression);
    writeln!(out, "RESP: DEF{path}? ARAT={text}")?;

    let register = led_register(slot, path);
    let previous = inst.device.read_reg(register).map_err(|_| CommandError::Device)?;
    let value = (previous & !LED_CURRENT_MASK) | preset.led_current();
    inst.device.write_reg(register, value).map_err(|_| CommandError::Device)?;
    writeln!(out, "RESP: REG 0x{register:04X}=0x{value:04X}")?;

    info!("channel {} preset to {}", channel, preset.option());
    writeln!(out, "RESP: CHANN{channel} {}", preset.description())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::adpd410x::{ts_reg, TS_LED_POW12, TS_LED_POW34};
    use platform::mocks::{MockFlash, MockFrontEnd, MockIrq};
    use platform::ReadyFlag;

    fn run(inst: &mut Instrument<'_, MockFrontEnd, MockFlash, MockIrq>, line: &str) -> std::string::String {
        let mut out = std::string::String::new();
        inst.execute(line, &mut out).unwrap();
        out
    }

    fn instrument(ready: &ReadyFlag) -> Instrument<'_, MockFrontEnd, MockFlash, MockIrq> {
        let dev = MockFrontEnd::with_registers(&[(ts_reg(0, TS_LED_POW12), 0x8080), (ts_reg(3, TS_LED_POW34), 0x0000)]);
        Instrument::new(dev, MockFlash::calibration_region(), MockIrq::new(), ready)
    }

    #[test]
    fn test_option_prefix() {
        assert_eq!(Preset::from_option("colorimetry"), Some(Preset::Colorimetry));
        assert_eq!(Preset::from_option("FLUO"), Some(Preset::Fluorescence));
        assert_eq!(Preset::from_option("TUR"), None);
        assert_eq!(Preset::from_option("ABSO"), None);
    }

    #[test]
    fn test_expressions() {
        assert_eq!(Preset::Colorimetry.expression(1).as_str(), "B1#2048-B2#2048-/");
        assert_eq!(Preset::Turbidity.expression(3).as_str(), "D2#2048-D1#2048-/");
    }

    #[test]
    fn test_fluorescence_preset_lines() {
        let ready = ReadyFlag::new();
        let mut inst = instrument(&ready);
        let out = run(&mut inst, "chann1 fluo");
        assert_eq!(
            out,
            "RESP: DEF0? SUBE=0\n\
             RESP: DEF0? RATB=1.00000E+00\n\
             RESP: DEF0? ARAT=A1#2048-A2#2048-/\n\
             RESP: REG 0x0105=0xF0F0\n\
             RESP: CHANN1 FLUORESCENCE\n"
        );
        assert_eq!(inst.device().reg(ts_reg(0, TS_LED_POW12)), 0xF0F0);
        assert_eq!(inst.engine().path(0).unwrap().config().expression.as_str(), "A1#2048-A2#2048-/");
        assert!(!inst.engine().path(0).unwrap().config().subtract);
    }

    #[test]
    fn test_turbidity_uses_odd_led_register() {
        let ready = ReadyFlag::new();
        let mut inst = instrument(&ready);
        let out = run(&mut inst, "CHANN4 TURB");
        assert!(out.contains("RESP: DEF3? ARAT=D2#2048-D1#2048-/\n"));
        assert!(out.contains("RESP: REG 0x0166=0x0030\n"));
        assert!(out.ends_with("RESP: CHANN4 TURBIDITY\n"));
    }

    #[test]
    fn test_rejected_combinations() {
        let ready = ReadyFlag::new();
        let mut inst = instrument(&ready);
        assert_eq!(run(&mut inst, "CHANN5 COLO"), "ERROR: CHANNEL NUMBER\n");
        assert_eq!(run(&mut inst, "CHANN1 ABS"), "ERROR: OPTION\n");
        assert_eq!(
            run(&mut inst, "CHANN2 FLUO"),
            "ERROR: CHANNEL NUMBER AND OPTION COMBINATION IMPOSSIBLE\n"
        );
        assert!(inst.device().writes().is_empty());
    }
}
