//! The instrument: device, calibration store and ratio pipeline in one owner.
//!
//! The hardware binary builds one [`Instrument`] and then alternates between
//! feeding it command lines ([`Instrument::execute`]) and polling it
//! ([`Instrument::process`]). Both write their text output to any
//! [`core::fmt::Write`] sink, normally the UART.

use core::fmt::{self, Write};

use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;
use optics::decay_fit::{fit_uniform, subtract_reference, ReferenceCurve};
use optics::format::Sci;
use optics::{ChannelFrame, DisplayMode, OutputRate, RatioEngine, TimeslotLayout};
use platform::adpd410x::{ts_reg, DATA1_SIGNAL_SIZE_MASK, TS_CTRL, TS_CTRL_CH2_EN, TS_DATA1};
use platform::config::{ACQ_MAX_SAMPLES, CHANNEL_COUNT, PATH_COUNT, TIMESLOT_COUNT};
use platform::{DataReadyIrq, OpMode, OpticalFrontEnd, ReadyFlag};

use crate::acquisition::{Completion, Progress, Session};
use crate::calibration::fluo::{load_reference, store_reference, FluoError, FluoHeader};
use crate::calibration::CalibrationStore;
use crate::cli::{self, CommandError};

/// Largest frame the FIFO can hold: two 4-byte channels per timeslot.
const MAX_FRAME_BYTES: usize = CHANNEL_COUNT * 4;

/// Output settings that the calibration store can override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    /// What the stream shows.
    pub mode: DisplayMode,
    /// Ratio line rate.
    pub rate: OutputRate,
    /// Paths included in ratio lines, bit n for path n.
    pub ratmask: u8,
    /// Device in standby, no stream.
    pub idle: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: DisplayMode::Ins2,
            rate: OutputRate::default(),
            ratmask: 0x0F,
            idle: true,
        }
    }
}

/// Stream line budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Stream {
    /// Lines still to print; zero silences the stream.
    pub(crate) remaining: u32,
    /// Whether `remaining` counts down.
    pub(crate) counting: bool,
    /// Ratio updates since the last ratio line.
    pub(crate) odr_index: u16,
}

/// CN0503 measurement pipeline.
pub struct Instrument<'a, D, F, I> {
    pub(crate) device: D,
    pub(crate) store: CalibrationStore<F>,
    pub(crate) irq: I,
    pub(crate) ready: &'a ReadyFlag,
    pub(crate) engine: RatioEngine,
    pub(crate) settings: Settings,
    pub(crate) stream: Stream,
    pub(crate) layout: TimeslotLayout,
    pub(crate) session: Option<Session>,
    /// Stored reference curve, loaded while a fluorescence fit completes.
    reference: Vec<f32, ACQ_MAX_SAMPLES>,
}

impl<'a, D, F, I> Instrument<'a, D, F, I>
where
    D: OpticalFrontEnd,
    F: NorFlash,
    I: DataReadyIrq,
{
    /// Wrap the peripherals. Nothing is written; see [`crate::boot::boot`].
    pub fn new(device: D, flash: F, irq: I, ready: &'a ReadyFlag) -> Self {
        Self {
            device,
            store: CalibrationStore::new(flash),
            irq,
            ready,
            engine: RatioEngine::new(),
            settings: Settings::default(),
            stream: Stream::default(),
            layout: TimeslotLayout::uniform(1, 0, 4),
            session: None,
            reference: Vec::new(),
        }
    }

    /// The front end.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable front end.
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// The calibration store.
    pub fn store_mut(&mut self) -> &mut CalibrationStore<F> {
        &mut self.store
    }

    /// The ratio engine.
    pub fn engine(&self) -> &RatioEngine {
        &self.engine
    }

    /// Current output settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Frame layout read from the device at the last stream start.
    pub fn layout(&self) -> &TimeslotLayout {
        &self.layout
    }

    /// The in-flight acquisition, if any.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// The interrupt line.
    pub fn irq(&self) -> &I {
        &self.irq
    }

    /// Run one command line, writing its response to `out`.
    ///
    /// Command failures are reported on `out`; only a failing sink is an error.
    pub fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> fmt::Result {
        match cli::dispatch(self, line, out) {
            Ok(()) => Ok(()),
            Err(CommandError::Sink) => Err(fmt::Error),
            Err(err) => {
                debug!("command rejected: {}", err.name());
                writeln!(out, "{err}")
            }
        }
    }

    /// Poll the device once: advance an acquisition, or read one frame and
    /// print whatever stream lines it completes.
    pub fn process<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        if self.session.is_some() {
            return self.process_session(out);
        }
        if self.settings.idle {
            return Ok(());
        }

        let frame_bytes = self.layout.frame_bytes();
        let queued = self.device.fifo_byte_count().map_err(|_| CommandError::Device)?;
        if usize::from(queued) < frame_bytes {
            return Ok(());
        }
        let mut buf = [0u8; MAX_FRAME_BYTES];
        let bytes = buf.get_mut(..frame_bytes).ok_or(CommandError::Device)?;
        self.device.read_fifo(bytes).map_err(|_| CommandError::Device)?;
        let frame = ChannelFrame::decode(&self.layout, bytes).map_err(|_| CommandError::Device)?;

        let outcome = self.engine.push_frame(&frame);
        for path in 0..PATH_COUNT {
            if outcome.no_operator & path_bit(path) != 0 {
                writeln!(out, "ERROR: RAT{path} expression has no operator.")?;
            }
        }
        if outcome.ratios_ready {
            self.stream.odr_index = self.stream.odr_index.saturating_add(1);
        }

        if self.stream.remaining != 0 && self.settings.mode == DisplayMode::Code {
            self.write_code_line(&frame, out)?;
            self.count_line();
        }
        if self.stream.remaining != 0
            && self.settings.mode != DisplayMode::Code
            && outcome.ratios_ready
            && self.stream.odr_index >= self.settings.rate.divider()
        {
            self.write_ratio_line(out)?;
            self.count_line();
            self.stream.odr_index = 0;
        }
        Ok(())
    }

    /// Re-read the active timeslots, their channel count and code width.
    pub fn update_layout(&mut self) -> Result<(), D::Error> {
        let active = self.device.active_slots()?;
        let mut dual_mask = 0u16;
        let mut sizes = [0u8; TIMESLOT_COUNT];
        for (slot, size) in (0..active).zip(sizes.iter_mut()) {
            if self.device.read_reg(ts_reg(slot, TS_CTRL))? & TS_CTRL_CH2_EN != 0 {
                dual_mask |= 1u16.checked_shl(u32::from(slot)).unwrap_or(0);
            }
            let data1 = self.device.read_reg(ts_reg(slot, TS_DATA1))?;
            *size = (data1 & DATA1_SIGNAL_SIZE_MASK) as u8;
        }
        self.layout = TimeslotLayout::new(active, dual_mask, sizes);
        debug!("layout: {} slots, {} bytes per frame", active, self.layout.frame_bytes());
        Ok(())
    }

    /// Refresh the layout and start the timeslots.
    pub(crate) fn go(&mut self) -> Result<(), D::Error> {
        self.update_layout()?;
        self.device.set_opmode(OpMode::Go)?;
        self.settings.idle = false;
        Ok(())
    }

    /// Stop the timeslots and drop queued data.
    pub(crate) fn standby(&mut self) -> Result<(), D::Error> {
        self.device.set_opmode(OpMode::Standby)?;
        self.device.clear_fifo()?;
        self.settings.idle = true;
        Ok(())
    }

    fn count_line(&mut self) {
        if self.stream.counting {
            self.stream.remaining = self.stream.remaining.saturating_sub(1);
        }
    }

    fn write_code_line<W: Write>(&self, frame: &ChannelFrame, out: &mut W) -> fmt::Result {
        out.write_str("DATI: ")?;
        for channel in self.layout.channels() {
            write!(out, "{:X} ", frame.code(channel))?;
        }
        out.write_char('\n')
    }

    fn write_ratio_line<W: Write>(&self, out: &mut W) -> fmt::Result {
        out.write_str("DATF: ")?;
        for path in (0..PATH_COUNT).filter(|&p| self.settings.ratmask & path_bit(p) != 0) {
            let value = self.engine.value(self.settings.mode, path).unwrap_or(0.0);
            write!(out, "{} ", Sci::new(value, 4))?;
        }
        out.write_char('\n')
    }

    // ─── Acquisitions ────────────────────────────────────────────────────────

    fn process_session<W: Write>(&mut self, out: &mut W) -> Result<(), CommandError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        match session.advance(&mut self.device, &mut self.irq, self.ready) {
            Ok(Progress::Pending) => Ok(()),
            Ok(Progress::Done) => {
                let Some(mut session) = self.session.take() else {
                    return Ok(());
                };
                let written = self.complete(&mut session, out);
                let restored = session.rollback(&mut self.device, &mut self.irq);
                written?;
                restored.map_err(|_| CommandError::Device)
            }
            Err(err) => {
                // advance() already rolled back.
                self.session = None;
                warn!("acquisition aborted: {}", err.name());
                Err(CommandError::Device)
            }
        }
    }

    fn complete<W: Write>(&mut self, session: &mut Session, out: &mut W) -> Result<(), CommandError> {
        let plan = *session.plan();
        match session.completion() {
            Completion::Report => {
                write_samples(out, session.samples())?;
                writeln!(out, "RESP: IMPRESP DONE")?;
            }
            Completion::StoreReference { slot } => {
                let header = FluoHeader {
                    channel: plan.channel,
                    led_width: plan.led_width,
                    start: plan.start,
                    method: plan.method,
                    end: plan.end_time(),
                    period: plan.period,
                };
                match store_reference(self.store.flash_mut(), slot, &header, session.samples()) {
                    Ok(count) => writeln!(out, "RESP: FLUOCAL{slot} DONE N={count}")?,
                    Err(err) => writeln!(out, "ERROR: FLUOCAL{slot} {}.", fluo_message(err))?,
                }
            }
            Completion::Fit { slot, subtract } => {
                if subtract {
                    self.reference.clear();
                    // The length asked for is the capacity.
                    let _ = self.reference.resize(ACQ_MAX_SAMPLES, 0.0);
                    match load_reference(self.store.flash_mut(), slot, &mut self.reference) {
                        Ok((header, count)) => {
                            let curve = ReferenceCurve {
                                t0: header.t0(),
                                period: header.period,
                                samples: self.reference.get(..count).unwrap_or_default(),
                            };
                            subtract_reference(session.samples_mut(), plan.sample_time(0), plan.period, &curve);
                        }
                        Err(err) => {
                            writeln!(out, "ERROR: FLUO{slot} {}.", fluo_message(err))?;
                            return Ok(());
                        }
                    }
                }
                write_samples(out, session.samples())?;
                match fit_uniform(plan.sample_time(0), plan.period, session.samples()) {
                    Ok(fit) => writeln!(
                        out,
                        "RESP: FLUO{slot} TAU={} OFFSET={} SCALE={} ERR={}",
                        Sci::new(fit.tau, 5),
                        Sci::new(fit.offset, 5),
                        Sci::new(fit.scale, 5),
                        Sci::new(fit.residual, 5),
                    )?,
                    Err(_) => writeln!(out, "ERROR: FLUO{slot} fit failed.")?,
                }
            }
        }
        Ok(())
    }
}

fn write_samples<W: Write>(out: &mut W, samples: &[f32]) -> fmt::Result {
    out.write_str("DATF: ")?;
    for sample in samples {
        write!(out, "{} ", Sci::new(*sample, 4))?;
    }
    out.write_char('\n')
}

fn fluo_message(err: FluoError) -> &'static str {
    match err {
        FluoError::PageBoundExceeded => "curve too long",
        FluoError::NotCalibrated => "not calibrated",
        FluoError::Flash => "flash access failed",
        FluoError::SlotOutOfRange => "no such slot",
    }
}

pub(crate) fn path_bit(path: usize) -> u8 {
    u32::try_from(path)
        .ok()
        .and_then(|p| 1u8.checked_shl(p))
        .unwrap_or(0)
}
