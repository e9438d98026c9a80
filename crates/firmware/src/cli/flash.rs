//! `FL_*` commands: edit, inspect and persist the calibration buffer.
//!
//! The buffer is a RAM copy of one calibration page. `FL_WRITE` edits it,
//! `FL_PROGRAM` commits it, `FL_APPLY` merges it into the running pipeline.
//! Nothing touches flash until `FL_PROGRAM` or `FL_ERASE`.

use core::fmt::{self, Write};

use embedded_storage::nor_flash::NorFlash;
use heapless::String;
use optics::format::{Fixed, Sci};
use optics::polynomial::COEFFICIENTS;
use optics::path::{DEFAULT_ALARM_HIGH, DEFAULT_ALARM_LOW};
use optics::{DisplayMode, OutputRate};
use platform::config::PATH_COUNT;
use platform::{DataReadyIrq, OpticalFrontEnd};

use super::params::{parse_coefficients, DefVar};
use super::{ensure_no_session, parse_f32, parse_hex, parse_hex_u16, split_index, CommandError};
use crate::calibration::record::PathField;
use crate::calibration::{store, CalibrationRecord, PageTarget, StoreError};
use crate::instrument::Instrument;

/// Longest `FL_WRITE` / `FL_READ` argument text.
const ARGS_LEN: usize = 160;

/// Rendered value of one record field.
type ValueText = String<ARGS_LEN>;

pub(crate) fn clear_buffer<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    inst.store.clear_buffer();
    writeln!(out, "RESP: FL_CLEARBUF")?;
    Ok(())
}

/// `FL_LOAD 0|1`: user or manufacturer page into the buffer.
pub(crate) fn load<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let Some((index, target)) = args
        .parse::<u32>()
        .ok()
        .and_then(|i| PageTarget::from_load_index(i).map(|t| (i, t)))
    else {
        writeln!(out, "Argument error.")?;
        return Ok(());
    };
    inst.store.load(target)?;
    writeln!(out, "RESP: FL_LOAD {index}")?;
    Ok(())
}

/// `FL_PROGRAM key`: buffer into the page the key unlocks.
pub(crate) fn program<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let Some((key, target)) = unlock(args, out)? else {
        return Ok(());
    };
    inst.store.program(target)?;
    info!("calibration page programmed");
    writeln!(out, "RESP: FL_PROGRAM {key}")?;
    Ok(())
}

/// `FL_ERASE key`: wipe the page the key unlocks.
pub(crate) fn erase<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let Some((key, target)) = unlock(args, out)? else {
        return Ok(());
    };
    inst.store.erase(target)?;
    info!("calibration page erased");
    match target {
        // Host tools match this exact line for the user page.
        PageTarget::User => writeln!(out, "RESP: FL_ERASE 1")?,
        PageTarget::Manufacturer => writeln!(out, "RESP: FL_ERASE {key}")?,
    }
    Ok(())
}

fn unlock<W: Write>(args: &str, out: &mut W) -> Result<Option<(u32, PageTarget)>, CommandError> {
    if args.is_empty() {
        writeln!(out, "Argument error.")?;
        return Ok(None);
    }
    let key = args.parse::<u32>().unwrap_or(u32::MAX);
    match PageTarget::from_key(key) {
        Ok(target) => Ok(Some((key, target))),
        Err(StoreError::AccessDenied) => {
            writeln!(out, "Access denied.")?;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// `FL_APPLY`: merge the buffer into the device and the ratio pipeline.
pub(crate) fn apply<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    ensure_no_session(inst)?;
    let report = store::apply(inst.store.buffer(), &mut inst.device, &mut inst.engine, &mut inst.settings);
    if report.register_failure.is_some() {
        return Err(CommandError::Device);
    }
    if !report.is_clean() {
        warn!("calibration buffer applied with {} bad expressions", report.bad_expressions);
    }
    writeln!(out, "RESP: FL_APPLY")?;
    Ok(())
}

// ─── FL_WRITE ────────────────────────────────────────────────────────────────

/// `FL_WRITE REG a v | DEFn VAR ... | MODE x | ODR x | RATMASK x`.
pub(crate) fn write<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let args = uppercase(args)?;
    let record = inst.store.buffer_mut();

    if let Some(rest) = args.strip_prefix("REG") {
        let mut tokens = rest.split_whitespace();
        let pair = tokens
            .next()
            .and_then(parse_hex_u16)
            .zip(tokens.next().and_then(parse_hex_u16));
        match pair.map(|(a, v)| (a, v, record.push_register(a, v))) {
            Some((addr, value, Ok(()))) => writeln!(out, "RESP: FL_WRITE REG {addr:x} {value:x}")?,
            _ => writeln!(out, "reg command arguments incorrect or no more space.")?,
        }
    } else if let Some(rest) = args.strip_prefix("DEF") {
        let mut text = ValueText::new();
        match write_def(record, rest, &mut text, out)? {
            Some((path, var)) => writeln!(out, "RESP: FL_WRITE DEF {path} {} {text}", var.name())?,
            None => writeln!(out, "def command arguments incorrect.")?,
        }
    } else if let Some(rest) = args.strip_prefix("MODE ") {
        match DisplayMode::from_name(rest.trim()) {
            Some(mode) => {
                record.set_mode(mode.to_word());
                writeln!(out, "RESP: FL_WRITE MODE {}", mode.name())?;
            }
            None => writeln!(out, "mode command arguments incorrect.")?,
        }
    } else if let Some(rest) = args.strip_prefix("ODR ") {
        match parse_f32(rest).and_then(|hz| OutputRate::from_hz(hz).ok()) {
            Some((rate, _)) => {
                record.set_odr(rate.hz());
                writeln!(out, "RESP: FL_WRITE ODR {}", Fixed::new(rate.hz(), 2))?;
            }
            None => writeln!(out, "odr command arguments incorrect.")?,
        }
    } else if let Some(rest) = args.strip_prefix("RATMASK ") {
        match parse_hex(rest) {
            Some(mask) => {
                let mask = mask & 0xFF;
                record.set_ratmask(mask);
                writeln!(out, "RESP: FL_WRITE RATMASK {mask:x}")?;
            }
            None => writeln!(out, "ratmask command arguments incorrect.")?,
        }
    } else {
        writeln!(out, "Error wrong command.")?;
    }
    Ok(())
}

/// Store one `DEFn VAR value` into `record`, rendering the stored value into `text`.
///
/// `None` when the path, variable or a mandatory value is malformed.
fn write_def<W: Write>(
    record: &mut CalibrationRecord,
    args: &str,
    text: &mut ValueText,
    out: &mut W,
) -> Result<Option<(usize, DefVar)>, CommandError> {
    let Some((path, rest)) = split_index(args).filter(|(path, _)| *path < PATH_COUNT) else {
        return Ok(None);
    };
    let rest = rest.trim_start();
    let (var_token, value) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let Some(var) = DefVar::from_prefix(var_token) else {
        return Ok(None);
    };
    let value = value.trim();

    match var {
        DefVar::Arat => {
            record.set_expression(path, value);
            text.push_str(value).map_err(|_| CommandError::Arguments)?;
        }
        DefVar::Rflt => {
            let Some(hz) = parse_f32(value) else {
                return Ok(None);
            };
            record.set_path_f32(path, PathField::Rflt, hz);
            write!(text, "{}", Fixed::new(hz, 2))?;
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
            record.set_path_f32(path, PathField::AlarmHigh, high);
            record.set_path_f32(path, PathField::AlarmLow, low);
            write!(text, "{} {}", Fixed::new(high, 6), Fixed::new(low, 6))?;
        }
        DefVar::Ratb => {
            let Some(baseline) = parse_f32(value) else {
                return Ok(None);
            };
            record.set_path_f32(path, PathField::Baseline, baseline);
            write!(text, "{}", Fixed::new(baseline, 5))?;
        }
        DefVar::Sube => {
            let Ok(raw) = value.parse::<i32>() else {
                return Ok(None);
            };
            record.set_subtract(path, raw);
            write!(text, "{raw}")?;
        }
        DefVar::Ins1 | DefVar::Ins2 => {
            let coefficients = parse_coefficients(value);
            for (k, p) in (0u8..).zip(coefficients) {
                record.set_path_f32(path, coefficient_field(var, k), p);
            }
            super::params::write_coefficients(text, &coefficients)?;
        }
    }
    Ok(Some((path, var)))
}

fn coefficient_field(var: DefVar, k: u8) -> PathField {
    if var == DefVar::Ins2 {
        PathField::Ins2(k)
    } else {
        PathField::Ins1(k)
    }
}

// ─── FL_READ / FL_DUMP ───────────────────────────────────────────────────────

/// `FL_READ REG? a | DEFn VAR | MODE? | ODR? | RATMASK?`.
pub(crate) fn read<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let args = uppercase(args)?;
    let record = inst.store.buffer();

    if let Some(rest) = args.strip_prefix("REG") {
        let text = rest.trim_start_matches('?').trim();
        let Some(addr) = parse_hex_u16(text) else {
            writeln!(out, "reg command arguments incorrect or no more space.")?;
            return Ok(());
        };
        write!(out, "RESP: FL_READ REG? {text}=")?;
        match record.find_register(addr) {
            Some(value) => writeln!(out, "{value:x}")?,
            None => writeln!(out, "N/A")?,
        }
    } else if let Some(rest) = args.strip_prefix("DEF") {
        let parsed = split_index(rest).filter(|(path, _)| *path < PATH_COUNT).and_then(|(path, rest)| {
            let var = rest.trim_start_matches('?').trim();
            DefVar::from_prefix(var).map(|var| (path, var))
        });
        let Some((path, var)) = parsed else {
            writeln!(out, "def command error.")?;
            return Ok(());
        };
        let mut text = ValueText::new();
        if !render_record_value(record, path, var, 5, &mut text)? {
            text.push_str("N/A").map_err(|_| CommandError::Sink)?;
        }
        writeln!(out, "RESP: FL_READ DEF{path} {}={text}", var.name())?;
    } else if args.starts_with("MODE?") {
        let name = record.mode().and_then(DisplayMode::from_word).map_or("N/A", DisplayMode::name);
        writeln!(out, "RESP: FL_READ MODE?={name}")?;
    } else if args.starts_with("ODR?") {
        match record.odr() {
            Some(hz) => writeln!(out, "RESP: FL_READ ODR?={}", Fixed::new(hz, 2))?,
            None => writeln!(out, "RESP: FL_READ ODR?=N/A")?,
        }
    } else if args.starts_with("RATMASK?") {
        match record.ratmask() {
            Some(mask) => writeln!(out, "RESP: FL_READ RATMASK?={mask:x}")?,
            None => writeln!(out, "RESP: FL_READ RATMASK?=N/A")?,
        }
    } else {
        writeln!(out, "Error wrong command.")?;
    }
    Ok(())
}

/// `FL_DUMP`: one line per set field of the buffer.
pub(crate) fn dump<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError>
where
    F: NorFlash,
    W: Write,
{
    let record = inst.store.buffer();
    for (addr, value) in record.register_pairs() {
        writeln!(out, "RESP: FL_DUMP {addr:x} {value:x}")?;
    }
    for path in 0..PATH_COUNT {
        for var in DefVar::ALL {
            let mut text = ValueText::new();
            if render_record_value(record, path, var, 2, &mut text)? {
                writeln!(out, "RESP: FL_DUMP DEF{path} {} {text}", var.name())?;
            }
        }
    }
    if let Some(mode) = record.mode().and_then(DisplayMode::from_word) {
        writeln!(out, "RESP: FL_DUMP MODE {}", mode.name())?;
    }
    if let Some(hz) = record.odr() {
        writeln!(out, "RESP: FL_DUMP ODR {}", Fixed::new(hz, 2))?;
    }
    if let Some(mask) = record.ratmask() {
        writeln!(out, "RESP: FL_DUMP RATMASK {mask:x}")?;
    }
    Ok(())
}

/// Render a stored path field. `false` when the field is unset.
fn render_record_value(
    record: &CalibrationRecord,
    path: usize,
    var: DefVar,
    rflt_precision: usize,
    text: &mut ValueText,
) -> Result<bool, fmt::Error> {
    let fixed = |field, precision| record.path_f32(path, field).map(|v| Fixed::new(v, precision));
    match var {
        DefVar::Arat => {
            let Some(expression) = record.expression(path) else {
                return Ok(false);
            };
            text.push_str(&expression).map_err(|_| fmt::Error)?;
        }
        DefVar::Rflt => {
            let Some(v) = fixed(PathField::Rflt, rflt_precision) else {
                return Ok(false);
            };
            write!(text, "{v}")?;
        }
        DefVar::Alrm => {
            let high = fixed(PathField::AlarmHigh, 6);
            let low = fixed(PathField::AlarmLow, 6);
            if high.is_none() && low.is_none() {
                return Ok(false);
            }
            write_or_na(text, high)?;
            text.write_char(' ')?;
            write_or_na(text, low)?;
        }
        DefVar::Ratb => {
            let Some(v) = fixed(PathField::Baseline, 5) else {
                return Ok(false);
            };
            write!(text, "{v}")?;
        }
        DefVar::Sube => {
            let Some(raw) = record.subtract_raw(path) else {
                return Ok(false);
            };
            write!(text, "{raw}")?;
        }
        DefVar::Ins1 | DefVar::Ins2 => {
            let mut any = false;
            for k in 0..COEFFICIENTS as u8 {
                let value = record.path_f32(path, coefficient_field(var, k));
                any |= value.is_some();
                if k != 0 {
                    text.write_char(' ')?;
                }
                write_or_na(text, value.map(|p| Sci::new(p, 5)))?;
            }
            if !any {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn write_or_na<T: fmt::Display>(text: &mut ValueText, value: Option<T>) -> fmt::Result {
    match value {
        Some(v) => write!(text, "{v}"),
        None => text.write_str("N/A"),
    }
}

fn uppercase(args: &str) -> Result<ValueText, CommandError> {
    let mut text = ValueText::new();
    text.push_str(args).map_err(|_| CommandError::Arguments)?;
    text.make_ascii_uppercase();
    Ok(text)
}
