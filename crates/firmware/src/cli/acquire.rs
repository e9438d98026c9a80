//! Acquisition commands: `IMPRESP`, `FLUOCALs`, `FLUOs` and `ABORT`.
//!
//! These only start or stop a [`Session`]; the cycles themselves run from
//! [`Instrument::process`](crate::instrument::Instrument::process).

use core::fmt::Write;

use embedded_storage::nor_flash::NorFlash;
use optics::format::Fixed;
use platform::config::FLUO_SLOTS;
use platform::{DataReadyIrq, OpticalFrontEnd};

use super::{ensure_no_session, split_index, CommandError};
use crate::acquisition::{AcquisitionPlan, AcquisitionRequest, Clamps, Completion, Session, SessionError};
use crate::instrument::Instrument;

impl From<SessionError> for CommandError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => Self::Busy,
            SessionError::Device | SessionError::UndoLogFull | SessionError::BufferFull => Self::Device,
            SessionError::Parse | SessionError::Validation | SessionError::NotActive => Self::Arguments,
        }
    }
}

/// `IMPRESP ch w acq per IMP|TIA|SSI [avg] [start]`.
pub(crate) fn impresp<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, args: &str, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    let request = AcquisitionRequest::parse(args)?;
    begin(inst, &request, Completion::Report, out)
}

/// `FLUOCALs ...`: record the reference curve of slot s.
pub(crate) fn fluocal<D, F, I, W>(
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
    let slot = fluo_slot(tail)?;
    let request = AcquisitionRequest::parse(args)?;
    begin(inst, &request, Completion::StoreReference { slot }, out)
}

/// `FLUOs ... [NOCALIB]`: acquire and fit a decay, subtracting slot s unless `NOCALIB`.
pub(crate) fn fluo<D, F, I, W>(
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
    let slot = fluo_slot(tail)?;
    let request = AcquisitionRequest::parse(args)?;
    let completion = Completion::Fit {
        slot,
        subtract: request.calibrated,
    };
    begin(inst, &request, completion, out)
}

/// `ABORT`: roll back the in-flight acquisition.
pub(crate) fn abort<D, F, I, W>(inst: &mut Instrument<'_, D, F, I>, out: &mut W) -> Result<(), CommandError>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
    W: Write,
{
    let Some(mut session) = inst.session.take() else {
        writeln!(out, "ERROR: no acquisition in progress.")?;
        return Ok(());
    };
    session.rollback(&mut inst.device, &mut inst.irq)?;
    info!("acquisition aborted");
    writeln!(out, "RESP: ABORT")?;
    Ok(())
}

fn fluo_slot(tail: &str) -> Result<u8, CommandError> {
    match split_index(tail) {
        Some((slot, "")) => u8::try_from(slot)
            .ok()
            .filter(|s| *s < FLUO_SLOTS)
            .ok_or(CommandError::Arguments),
        _ => Err(CommandError::Unknown),
    }
}

fn begin<D, F, I, W>(
    inst: &mut Instrument<'_, D, F, I>,
    request: &AcquisitionRequest,
    completion: Completion,
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
    let (plan, clamps) = AcquisitionPlan::from_request(request)?;

    write_label(out, completion)?;
    writeln!(
        out,
        " CH={} LED={} ACQ={} PER={} METHOD={} AVG={} START={} NB={}",
        plan.channel,
        plan.led_width,
        Fixed::new(request.acq_width, 5),
        Fixed::new(plan.period, 5),
        plan.method.name(),
        plan.avg_len,
        plan.start,
        plan.nb_samples,
    )?;
    write_clamps(out, &clamps)?;

    let session = Session::start(plan, completion, &mut inst.device, &mut inst.irq, inst.ready)?;
    info!("acquisition started: {} samples, method {}", plan.nb_samples, plan.method.name());
    inst.session = Some(session);
    Ok(())
}

fn write_label<W: Write>(out: &mut W, completion: Completion) -> core::fmt::Result {
    match completion {
        Completion::Report => out.write_str("RESP: IMPRESP"),
        Completion::StoreReference { slot } => write!(out, "RESP: FLUOCAL{slot}"),
        Completion::Fit { slot, .. } => write!(out, "RESP: FLUO{slot}"),
    }
}

fn write_clamps<W: Write>(out: &mut W, clamps: &Clamps) -> core::fmt::Result {
    if let Some(period) = clamps.period {
        writeln!(out, "INFO: period clamped to {}", Fixed::new(period, 5))?;
    }
    if let Some(nb) = clamps.nb_samples {
        writeln!(out, "INFO: samples clamped to {nb}")?;
    }
    if let Some(avg) = clamps.avg_len {
        writeln!(out, "INFO: average clamped to {avg}")?;
    }
    Ok(())
}
