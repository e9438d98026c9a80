//! Text command interpreter.
//!
//! One line in, zero or more response lines out. The first token selects the
//! command, case-insensitively; indexed commands (`DEF3?`, `ALRM0?`,
//! `FLUOCAL1`, `CHANN2`, ...) carry their index in that same token.
//!
//! Handlers write their own `RESP:` lines and the few command-specific
//! messages the host tools expect. Everything else surfaces as a
//! [`CommandError`], printed by [`crate::instrument::Instrument::execute`].

pub mod acquire;
pub mod flash;
pub mod params;

use core::fmt::{self, Write};

use embedded_storage::nor_flash::NorFlash;
use heapless::String;
use platform::{DataReadyIrq, OpticalFrontEnd};

use crate::calibration::StoreError;
use crate::instrument::Instrument;

/// Longest command token.
const HEAD_LEN: usize = 16;

/// Command failures that get the generic error line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// First token matches no command.
    Unknown,
    /// Arguments missing or malformed.
    Arguments,
    /// An acquisition or the stream owns the device.
    Busy,
    /// Front-end access failed.
    Device,
    /// Calibration flash access failed.
    Flash,
    /// The output sink refused a write.
    Sink,
}

impl CommandError {
    /// Short name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Arguments => "arguments",
            Self::Busy => "busy",
            Self::Device => "device",
            Self::Flash => "flash",
            Self::Sink => "sink",
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CommandError {}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "ERROR: unknown command."),
            Self::Arguments => write!(f, "ERROR invalid arguments."),
            Self::Busy => write!(f, "ERROR: device busy."),
            Self::Device => write!(f, "ERROR: device access."),
            Self::Flash => write!(f, "ERROR: flash access."),
            Self::Sink => write!(f, "ERROR: output."),
        }
    }
}

impl From<fmt::Error> for CommandError {
    fn from(_: fmt::Error) -> Self {
        Self::Sink
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Flash => Self::Flash,
            StoreError::Device => Self::Device,
            StoreError::AccessDenied | StoreError::NoSpace => Self::Arguments,
        }
    }
}

/// Run one command line against `inst`.
pub(crate) fn dispatch<D, F, I, W>(
    inst: &mut Instrument<'_, D, F, I>,
    line: &str,
    out: &mut W,
) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    if head.is_empty() {
        return Ok(());
    }
    let mut upper: String<HEAD_LEN> = String::new();
    upper.push_str(head).map_err(|_| CommandError::Unknown)?;
    upper.make_ascii_uppercase();

    match upper.as_str() {
        "REG?" => params::reg_read(inst, rest, out),
        "REG" => params::reg_write(inst, rest, out),
        "MODE?" => params::mode_get(inst, out),
        "MODE" => params::mode_set(inst, rest, out),
        "STREAM" => params::stream(inst, rest, out),
        "IDLE?" => params::idle_get(inst, out),
        "IDLE" => params::idle_set(inst, rest, out),
        "ODR?" => params::odr_get(inst, out),
        "ODR" => params::odr_set(inst, rest, out),
        "RATMASK?" => params::ratmask_get(inst, out),
        "RATMASK" => params::ratmask_set(inst, rest, out),
        "FL_CLEARBUF" => flash::clear_buffer(inst, out),
        "FL_LOAD" => flash::load(inst, rest, out),
        "FL_PROGRAM" => flash::program(inst, rest, out),
        "FL_ERASE" => flash::erase(inst, rest, out),
        "FL_APPLY" => flash::apply(inst, out),
        "FL_WRITE" => flash::write(inst, rest, out),
        "FL_READ" => flash::read(inst, rest, out),
        "FL_DUMP" => flash::dump(inst, out),
        "IMPRESP" => acquire::impresp(inst, rest, out),
        "ABORT" => acquire::abort(inst, out),
        "HELP" => help(out),
        indexed => dispatch_indexed(inst, indexed, rest, out),
    }
}

fn dispatch_indexed<D, F, I, W>(
    inst: &mut Instrument<'_, D, F, I>,
    head: &str,
    rest: &str,
    out: &mut W,
) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    if let Some(tail) = head.strip_prefix("DEF") {
        params::def(inst, tail, rest, out)
    } else if let Some(tail) = head.strip_prefix("ALRM") {
        params::alarm_get(inst, tail, out)
    } else if let Some(tail) = head.strip_prefix("RZ") {
        params::baseline_get(inst, tail, out)
    } else if let Some(tail) = head.strip_prefix("FLUOCAL") {
        acquire::fluocal(inst, tail, rest, out)
    } else if let Some(tail) = head.strip_prefix("FLUO") {
        acquire::fluo(inst, tail, rest, out)
    } else if let Some(tail) = head.strip_prefix("PCB-LED") {
        crate::led_cal::command(inst, tail, rest, out)
    } else if let Some(tail) = head.strip_prefix("CHANN") {
        crate::preset::command(inst, tail, rest, out)
    } else {
        Err(CommandError::Unknown)
    }
}

fn help<W: Write>(out: &mut W) -> Result<(), CommandError> {
    const LINES: [&str; 13] = [
        "\tCN0503 application.",
        "Type a command and press 'Enter'. The commands are not case sensitive.",
        " REG? a | REG a v                 - Read or write an ADPD register (hex).",
        " MODE? | MODE CODE|ARAT|RRAT|INS1|INS2 - Display mode.",
        " STREAM [n] | IDLE? | IDLE 0|1     - Start streaming, stop streaming.",
        " DEFn? VAR | DEFn VAR value       - Path settings: ARAT RFLT ALRM RATB INS1 INS2 SUBE.",
        " ALRMn? | RZn?                    - Alarm state, ratio base of path n.",
        " ODR? | ODR x | RATMASK? | RATMASK x - Ratio line rate and path mask.",
        " FL_CLEARBUF FL_LOAD FL_PROGRAM FL_ERASE FL_APPLY FL_WRITE FL_READ FL_DUMP",
        " CHANNn COLO|FLUO|TURB            - Channel presets.",
        " PCB-LEDn target [max]            - LED current auto-calibration.",
        " IMPRESP ch w acq per IMP|TIA|SSI [avg] [start] - Impulse response.",
        " FLUOCALs ... | FLUOs ... [NOCALIB] | ABORT - Fluorescence decay.",
    ];
    for line in LINES {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

// ─── Argument helpers ────────────────────────────────────────────────────────

/// Hex number with an optional `0x` prefix.
pub(crate) fn parse_hex(arg: &str) -> Option<u32> {
    let arg = arg.trim();
    let digits = arg
        .strip_prefix("0x")
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg);
    u32::from_str_radix(digits, 16).ok()
}

/// Hex register address or value.
pub(crate) fn parse_hex_u16(arg: &str) -> Option<u16> {
    parse_hex(arg).and_then(|v| u16::try_from(v).ok())
}

/// Decimal or exponent float.
pub(crate) fn parse_f32(arg: &str) -> Option<f32> {
    arg.trim().parse().ok()
}

/// Integer in the forgiving style of the host tools: anything unparsable is zero.
pub(crate) fn parse_int_or_zero(arg: &str) -> i32 {
    arg.trim().parse().unwrap_or(0)
}

/// Single decimal digit at the start of `tail`, plus what follows it.
pub(crate) fn split_index(tail: &str) -> Option<(usize, &str)> {
    let mut chars = tail.chars();
    let index = chars.next()?.to_digit(10)?;
    Some((index as usize, chars.as_str()))
}

/// Reject commands that need the device while an acquisition owns it.
pub(crate) fn ensure_no_session<D, F, I>(inst: &Instrument<'_, D, F, I>) -> Result<(), CommandError> {
    if inst.session.is_some() {
        return Err(CommandError::Busy);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_arguments() {
        assert_eq!(parse_hex_u16("0x10"), Some(0x10));
        assert_eq!(parse_hex_u16("1Ab"), Some(0x1AB));
        assert_eq!(parse_hex_u16("12345"), None);
        assert_eq!(parse_hex("zz"), None);
    }

    #[test]
    fn test_split_index() {
        assert_eq!(split_index("3?"), Some((3, "?")));
        assert_eq!(split_index("7"), Some((7, "")));
        assert_eq!(split_index("?"), None);
        assert_eq!(split_index(""), None);
    }

    #[test]
    fn test_error_lines() {
        assert_eq!(CommandError::Unknown.to_string(), "ERROR: unknown command.");
        assert_eq!(CommandError::Arguments.to_string(), "ERROR invalid arguments.");
        assert_eq!(CommandError::Busy.to_string(), "ERROR: device busy.");
    }
}
