//! Register, stream and per-path parameter commands.

use core::fmt::Write;

use embedded_storage::nor_flash::NorFlash;
use heapless::String;
use optics::expression::CHANNEL_IDS;
use optics::format::{Fixed, Sci};
use optics::path::{DEFAULT_ALARM_HIGH, DEFAULT_ALARM_LOW};
use optics::{DisplayMode, Expression, OutputRate, PathConfig};
use platform::config::PATH_COUNT;
use platform::{DataReadyIrq, OpticalFrontEnd};

use super::{ensure_no_session, parse_f32, parse_hex, parse_hex_u16, parse_int_or_zero, split_index, CommandError};
use crate::instrument::{path_bit, Instrument};

/// Longest `DEFn` value text.
const VALUE_LEN: usize = 128;

/// Per-path variables reachable through `DEFn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DefVar {
    Arat,
    Rflt,
    Alrm,
    Ratb,
    Sube,
    Ins1,
    Ins2,
}

impl DefVar {
    pub(crate) const ALL: [Self; 7] = [Self::Arat, Self::Rflt, Self::Alrm, Self::Ratb, Self::Sube, Self::Ins1, Self::Ins2];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Arat => "ARAT",
            Self::Rflt => "RFLT",
            Self::Alrm => "ALRM",
            Self::Ratb => "RATB",
            Self::Sube => "SUBE",
            Self::Ins1 => "INS1",
            Self::Ins2 => "INS2",
        }
    }

    /// Whole-token match, used by the query forms.
    pub(crate) fn from_exact(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|var| var.name().eq_ignore_ascii_case(token))
    }

    /// Match on the first four characters, used by the set forms.
    pub(crate) fn from_prefix(token: &str) -> Option<Self> {
        let head = token.get(..4)?;
        Self::from_exact(head)
    }
}

/// Write the value part of `var` for a live path.
fn write_value<W: Write>(out: &mut W, config: &PathConfig, var: DefVar) -> core::fmt::Result {
    match var {
        DefVar::Arat => out.write_str(config.expression.as_str()),
        DefVar::Rflt => write!(out, "{}", Fixed::new(config.rflt, 5)),
        DefVar::Alrm => write!(
            out,
            "{} {}",
            Fixed::new(config.alarm_high, 6),
            Fixed::new(config.alarm_low, 6)
        ),
        DefVar::Ratb => write!(out, "{}", Fixed::new(config.baseline, 5)),
        DefVar::Sube => write!(out, "{}", u8::from(config.subtract)),
        DefVar::Ins1 => write_coefficients(out, &config.ins1.0),
        DefVar::Ins2 => write_coefficients(out, &config.ins2.0),
    }
}

pub(crate) fn write_coefficients<W: Write>(out: &mut W, coefficients: &[f32]) -> core::fmt::Result {
    for (k, p) in coefficients.iter().enumerate() {
        if k != 0 {
            out.write_char(' ')?;
        }
        write!(out, "{}", Sci::new(*p, 5))?;
    }
    Ok(())
}

/// Parse up to six coefficients; missing or unparsable ones become zero.
pub(crate) fn parse_coefficients(args: &str) -> [f32; 6] {
    let mut coefficients = [0.0; 6];
    for (slot, token) in coefficients.iter_mut().zip(args.split_whitespace()) {
        *slot = parse_f32(token).unwrap_or(0.0);
    }
    coefficients
}

/// Path index from an indexed command token, or the out-of-range message.
fn path_index<'a, W: Write>(tail: &'a str, out: &mut W) -> Result<Option<(usize, &'a str)>, CommandError> {
    let (path, suffix) = split_index(tail).ok_or(CommandError::Unknown)?;
    if path >= PATH_COUNT {
        writeln!(out, "ERROR invalid ration.")?;
        return Ok(None);
    }
    Ok(Some((path, suffix)))
}

// ─── Registers ───────────────────────────────────────────────────────────────

pub(crate) fn reg_read<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    W: Write,
{
    let addr = parse_hex_u16(args).ok_or(CommandError::Arguments)?;
    let value = inst.device.read_reg(addr).map_err(|_| CommandError::Device)?;
    writeln!(out, "RESP: REG? {args}={value:04x}")?;
    Ok(())
}

pub(crate) fn reg_write<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    W: Write,
{
    ensure_no_session(inst)?;
    let mut tokens = args.split_whitespace();
    let (Some(addr_text), Some(value_text)) = (tokens.next(), tokens.next()) else {
        return Err(CommandError::Arguments);
    };
    let addr = parse_hex_u16(addr_text).ok_or(CommandError::Arguments)?;
    let value = parse_hex_u16(value_text).ok_or(CommandError::Arguments)?;
    inst.device.write_reg(addr, value).map_err(|_| CommandError::Device)?;
    writeln!(out, "RESP: REG {addr_text} {value_text}")?;
    Ok(())
}

// ─── Display mode and stream ─────────────────────────────────────────────────

pub(crate) fn mode_get<D, F, I, W: Write>(inst: &Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError> {
    writeln!(out, "RESP: MODE?={}", inst.settings.mode.name())?;
    Ok(())
}

pub(crate) fn mode_set<D, F, I, W: Write>(
    inst: &mut Instrument<'_, D, F, I>,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let mode = DisplayMode::from_name(args).ok_or(CommandError::Arguments)?;
    inst.settings.mode = mode;
    inst.stream.odr_index = 0;
    writeln!(out, "RESP: MODE {}", mode.name())?;
    Ok(())
}

/// `STREAM [n]`: print `n` lines, or stream until `IDLE` without a count.
pub(crate) fn stream<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    ensure_no_session(inst)?;
    let (remaining, counting) = match args {
        "" | "0" => (1, false),
        count => match count.parse::<u32>() {
            Ok(n) if n != 0 => (n, true),
            _ => return Err(CommandError::Arguments),
        },
    };
    inst.go().map_err(|_| CommandError::Device)?;
    inst.stream.remaining = remaining;
    inst.stream.counting = counting;
    inst.stream.odr_index = 0;

    out.write_str("STREAM: ")?;
    if inst.settings.mode == DisplayMode::Code {
        for channel in inst.layout.channels() {
            if let Some(id) = CHANNEL_IDS.get(usize::from(channel)) {
                write!(out, "{id} ")?;
            }
        }
    } else {
        for path in (0..PATH_COUNT).filter(|&p| inst.settings.ratmask & path_bit(p) != 0) {
            write!(out, "RAT{path} ")?;
        }
    }
    out.write_char('\n')?;
    Ok(())
}

pub(crate) fn idle_get<D, F, I, W: Write>(inst: &Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError> {
    writeln!(out, "RESP: IDLE?={}", u8::from(inst.settings.idle))?;
    Ok(())
}

/// `IDLE 1` stops the device; `IDLE 0` runs it without printing.
pub(crate) fn idle_set<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    ensure_no_session(inst)?;
    let idle = match args {
        "" | "0" => false,
        "1" => true,
        _ => return Err(CommandError::Arguments),
    };
    if idle {
        inst.standby().map_err(|_| CommandError::Device)?;
    } else if inst.settings.idle {
        inst.go().map_err(|_| CommandError::Device)?;
    }
    inst.stream.remaining = 0;
    inst.stream.counting = false;
    writeln!(out, "RESP: IDLE {}", u8::from(idle))?;
    Ok(())
}

// ─── Output rate and mask ────────────────────────────────────────────────────

pub(crate) fn odr_get<D, F, I, W: Write>(inst: &Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError> {
    writeln!(out, "RESP: ODR?={}", Fixed::new(inst.settings.rate.hz(), 5))?;
    Ok(())
}

pub(crate) fn odr_set<D, F, I, W: Write>(
    inst: &mut Instrument<'_, D, F, I>,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let requested = parse_f32(args).ok_or(CommandError::Arguments)?;
    let (rate, clamped) = OutputRate::from_hz(requested).map_err(|_| CommandError::Arguments)?;
    if clamped {
        debug!("output rate clamped to divider {}", rate.divider());
    }
    inst.settings.rate = rate;
    inst.stream.odr_index = 0;
    writeln!(out, "RESP: ODR {}", Fixed::new(rate.hz(), 5))?;
    Ok(())
}

pub(crate) fn ratmask_get<D, F, I, W: Write>(inst: &Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError> {
    writeln!(out, "RESP: RATMASK?={:x}", inst.settings.ratmask)?;
    Ok(())
}

pub(crate) fn ratmask_set<D, F, I, W: Write>(
    inst: &mut Instrument<'_, D, F, I>,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let mask = parse_hex(args).ok_or(CommandError::Arguments)?;
    inst.settings.ratmask = (mask & 0xFF) as u8;
    writeln!(out, "RESP: RATMASK {args}")?;
    Ok(())
}

// ─── Path settings ───────────────────────────────────────────────────────────

/// `DEFn? VAR` and `DEFn VAR args`.
pub(crate) fn def<D, F, I, W: Write>(
    inst: &mut Instrument<'_, D, F, I>,
    tail: &str,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let Some((path, suffix)) = path_index(tail, out)? else {
        return Ok(());
    };
    match suffix {
        "?" => def_get(inst, path, args, out),
        "" => def_set(inst, path, args, out),
        _ => Err(CommandError::Unknown),
    }
}

fn def_get<D, F, I, W: Write>(
    inst: &Instrument<'_, D, F, I>,
    path: usize,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let var = DefVar::from_exact(args).ok_or(CommandError::Arguments)?;
    let config = inst.engine.path(path).ok_or(CommandError::Arguments)?.config();
    write!(out, "RESP: DEF{path}? {}=", var.name())?;
    write_value(out, config, var)?;
    out.write_char('\n')?;
    Ok(())
}

fn def_set<D, F, I, W: Write>(
    inst: &mut Instrument<'_, D, F, I>,
    path: usize,
    args: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let (var_token, value) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let var = DefVar::from_prefix(var_token).ok_or(CommandError::Arguments)?;
    let mut value_upper: String<VALUE_LEN> = String::new();
    value_upper.push_str(value.trim()).map_err(|_| CommandError::Arguments)?;
    value_upper.make_ascii_uppercase();
    let value = value_upper.as_str();

    match var {
        DefVar::Arat => {
            let expression = Expression::parse(value).map_err(|_| CommandError::Arguments)?;
            inst.engine.set_expression(path, expression);
        }
        DefVar::Rflt => {
            let hz = parse_f32(value).ok_or(CommandError::Arguments)?;
            path_mut(inst, path)?.set_bandwidth(hz);
        }
        DefVar::Alrm => {
            let mut tokens = value.split_whitespace();
            let high = match tokens.next().and_then(parse_f32) {
                Some(high) => high,
                None => {
                    writeln!(out, "ERROR invalid high argument. Defaulting.")?;
                    DEFAULT_ALARM_HIGH
                }
            };
            let low = match tokens.next().and_then(parse_f32) {
                Some(low) => low,
                None => {
                    writeln!(out, "ERROR invalid low argument. Defaulting.")?;
                    DEFAULT_ALARM_LOW
                }
            };
            path_mut(inst, path)?.set_alarm(high, low);
        }
        DefVar::Ratb => {
            let Some(baseline) = parse_f32(value) else {
                writeln!(out, "ERROR invalid ratio base.")?;
                return Ok(());
            };
            path_mut(inst, path)?.set_baseline(baseline);
        }
        DefVar::Sube => {
            // Anything but an explicit 0 enables subtraction.
            let subtract = parse_int_or_zero(value) != 0;
            path_mut(inst, path)?.set_subtract(subtract);
        }
        DefVar::Ins1 => {
            path_mut(inst, path)?.ins1_mut().0 = parse_coefficients(value);
        }
        DefVar::Ins2 => {
            path_mut(inst, path)?.ins2_mut().0 = parse_coefficients(value);
        }
    }

    let config = inst.engine.path(path).ok_or(CommandError::Arguments)?.config();
    write!(out, "RESP: DEF{path} {} ", var.name())?;
    write_value(out, config, var)?;
    out.write_char('\n')?;
    Ok(())
}

fn path_mut<'p, D, F, I>(inst: &'p mut Instrument<'_, D, F, I>, path: usize) -> Result<&'p mut optics::OpticalPath, CommandError> {
    inst.engine.path_mut(path).ok_or(CommandError::Arguments)
}

/// `ALRMn?`: alarm bits of path n.
pub(crate) fn alarm_get<D, F, I, W: Write>(inst: &Instrument<'_, D, F, I>, tail: &str, out: &mut W) -> Result<(), CommandError> {
    let Some((path, suffix)) = path_index(tail, out)? else {
        return Ok(());
    };
    if suffix != "?" {
        return Err(CommandError::Unknown);
    }
    writeln!(out, "RESP: ALRM{path}?={}", inst.engine.alarm(path).bits())?;
    Ok(())
}

/// `RZn?`: ratio base of path n.
pub(crate) fn baseline_get<D, F, I, W: Write>(
    inst: &Instrument<'_, D, F, I>,
    tail: &str,
    out: &mut W,
) -> Result<(), CommandError> {
    let Some((path, suffix)) = path_index(tail, out)? else {
        return Ok(());
    };
    if suffix != "?" {
        return Err(CommandError::Unknown);
    }
    let config = inst.engine.path(path).ok_or(CommandError::Arguments)?.config();
    writeln!(out, "RESP: RZ{path}?={}", Fixed::new(config.baseline, 5))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_def_var_lookup() {
        assert_eq!(DefVar::from_exact("arat"), Some(DefVar::Arat));
        assert_eq!(DefVar::from_exact("ARATX"), None);
        assert_eq!(DefVar::from_prefix("SUBEX"), Some(DefVar::Sube));
        assert_eq!(DefVar::from_prefix("INS"), None);
    }

    #[test]
    fn test_coefficients_fill_with_zero() {
        let c = parse_coefficients("1.5 -2 x");
        assert_eq!(c, [1.5, -2.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_coefficient_rendering() {
        let mut s: String<128> = String::new();
        write_coefficients(&mut s, &[0.0, 1.0]).ok();
        assert_eq!(s.as_str(), "0.00000E+00 1.00000E+00");
    }

    #[test]
    fn test_path_index_keeps_suffix_of_input() {
        let mut out: String<64> = String::new();
        let line = std::string::String::from("3? ARAT");
        let parsed = path_index(&line, &mut out).unwrap();
        assert_eq!(parsed, Some((3, "? ARAT")));
        assert!(out.is_empty());

        assert_eq!(path_index("8?", &mut out).unwrap(), None);
        assert_eq!(out.as_str(), "ERROR invalid ration.\n");
        assert_eq!(path_index("X?", &mut out), Err(CommandError::Unknown));
    }
}
