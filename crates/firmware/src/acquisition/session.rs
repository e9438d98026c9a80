//! Acquisition session state machine.
//!
//! A [`Session`] is created by [`Session::start`], driven by
//! [`Session::advance`] from the foreground loop whenever it polls, and torn
//! down by [`Session::rollback`]. The FIFO-threshold interrupt only sets the
//! [`ReadyFlag`]; all device access happens here, in the foreground.
//!
//! # Usage Pattern
//!
//! ```rust,ignore
//! let mut session = Session::start(plan, Completion::Report, &mut dev, &mut irq, &READY)?;
//! loop {
//!     if session.advance(&mut dev, &mut irq, &READY)? == Progress::Done {
//!         report(session.samples());
//!         session.rollback(&mut dev, &mut irq)?;
//!         break;
//!     }
//! }
//! ```

use heapless::Vec;
use platform::adpd410x::{
    ts_reg, DATA1_SIGNAL_SIZE_MASK, FIFO_TH_MASK, INTEG_OFFSET_MASK, INTEG_WIDTH_MASK,
    INT_ENABLE_FIFO_TH, REG_FIFO_TH, REG_INT_ENABLE_XD, TS_COUNTS, TS_CTRL, TS_CTRL_CH2_EN,
    TS_DATA1, TS_INPUTS, TS_INTEG_OFFSET, TS_INTEG_WIDTH, TS_LED_POW12, TS_LED_POW34,
    TS_LED_PULSE, TS_PATH, TS_PERIOD,
};
use platform::config::{ACQ_DATA_SIZE, ACQ_MAX_SAMPLES, LED_OFFSET_DEFAULT_US};
use platform::{DataReadyIrq, OpMode, OpticalFrontEnd, ReadyFlag};

use super::params::{AcquisitionPlan, Method};
use super::undo::UndoLog;
use super::SessionError;

/// Register changes one session may record.
const UNDO_DEPTH: usize = 16;

/// Working timeslot (A).
const WORK_SLOT: u8 = 0;

/// Registers copied from the target path's timeslot onto the working slot.
const ROUTING: [u16; 4] = [TS_INPUTS, TS_LED_POW12, TS_LED_POW34, TS_PATH];

/// Samples moved per FIFO read.
const READ_CHUNK: usize = 8;

/// One LED integration and one repeat per sample.
const SINGLE_COUNT: u16 = 0x0101;

// ─── State ───────────────────────────────────────────────────────────────────

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    /// Not running; the device belongs to the stream.
    Idle,
    /// Saving and reprogramming the working slot.
    Configuring,
    /// Device running, waiting for the FIFO threshold.
    Collecting,
    /// Draining the FIFO into the accumulator.
    Reading,
    /// All cycles collected; samples hold the averages.
    Completing,
    /// Restoring the streaming configuration.
    Rollback,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Collecting => "collecting",
            Self::Reading => "reading",
            Self::Completing => "completing",
            Self::Rollback => "rollback",
        }
    }
}

/// What happens to the averaged samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Print them.
    Report,
    /// Store them as the reference curve of a fluorescence slot.
    StoreReference {
        /// Fluorescence slot.
        slot: u8,
    },
    /// Fit a decay, optionally after subtracting the slot's reference curve.
    Fit {
        /// Fluorescence slot.
        slot: u8,
        /// Whether the reference curve is subtracted first.
        subtract: bool,
    },
}

/// Result of one [`Session::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// More cycles to go.
    Pending,
    /// Samples hold the averaged result.
    Done,
}

// ─── Session ─────────────────────────────────────────────────────────────────

/// One in-flight acquisition.
pub struct Session {
    plan: AcquisitionPlan,
    completion: Completion,
    state: SessionState,
    cycle: u16,
    saved: Option<(u32, u8)>,
    undo: UndoLog<UNDO_DEPTH>,
    samples: Vec<f32, ACQ_MAX_SAMPLES>,
}

impl Session {
    /// Reprogram the working slot for `plan` and start the first cycle.
    ///
    /// On failure everything already changed is rolled back before the error
    /// is returned.
    pub fn start<D, I>(
        plan: AcquisitionPlan,
        completion: Completion,
        dev: &mut D,
        irq: &mut I,
        ready: &ReadyFlag,
    ) -> Result<Self, SessionError>
    where
        D: OpticalFrontEnd,
        I: DataReadyIrq,
    {
        let mut session = Self {
            plan,
            completion,
            state: SessionState::Idle,
            cycle: 0,
            saved: None,
            undo: UndoLog::new(),
            samples: Vec::new(),
        };
        session.set_state(SessionState::Configuring);

        let started = session
            .configure(dev, irq)
            .and_then(|()| session.collect(dev, ready));
        if let Err(err) = started {
            warn!("acquisition start failed, rolling back");
            // The start error is the one worth reporting.
            let _ = session.rollback(dev, irq);
            return Err(err);
        }
        Ok(session)
    }

    /// The plan being executed.
    pub fn plan(&self) -> &AcquisitionPlan {
        &self.plan
    }

    /// What to do with the result.
    pub fn completion(&self) -> Completion {
        self.completion
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Accumulated samples; averages once [`Progress::Done`] was returned.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Mutable samples, for reference subtraction before a fit.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Consume a data-ready event if there is one.
    ///
    /// Any device error rolls the session back before it is returned.
    pub fn advance<D, I>(
        &mut self,
        dev: &mut D,
        irq: &mut I,
        ready: &ReadyFlag,
    ) -> Result<Progress, SessionError>
    where
        D: OpticalFrontEnd,
        I: DataReadyIrq,
    {
        match self.state {
            SessionState::Collecting => {}
            SessionState::Completing => return Ok(Progress::Done),
            _ => return Err(SessionError::NotActive),
        }
        if !ready.take() {
            return Ok(Progress::Pending);
        }

        let progress = self.read(dev).and_then(|done| {
            if done {
                self.finish();
                Ok(Progress::Done)
            } else {
                self.collect(dev, ready).map(|()| Progress::Pending)
            }
        });
        if progress.is_err() {
            error!("acquisition failed in cycle {}, rolling back", self.cycle);
            let _ = self.rollback(dev, irq);
        }
        progress
    }

    /// Restore everything the session changed and return to idle.
    ///
    /// Every restore step is attempted; the first failure is returned.
    /// Calling it again is a no-op.
    pub fn rollback<D, I>(&mut self, dev: &mut D, irq: &mut I) -> Result<(), SessionError>
    where
        D: OpticalFrontEnd,
        I: DataReadyIrq,
    {
        if self.state == SessionState::Idle {
            return Ok(());
        }
        self.set_state(SessionState::Rollback);

        let mut result = Ok(());
        let mut note = |failed: bool| {
            if failed && result.is_ok() {
                result = Err(SessionError::Device);
            }
        };
        note(irq.disable().is_err());
        note(dev.set_opmode(OpMode::Standby).is_err());
        note(self.undo.revert(dev).is_err());
        if let Some((divider, slots)) = self.saved.take() {
            note(dev.set_sampling_divider(divider).is_err());
            note(dev.set_active_slots(slots).is_err());
        }
        note(dev.clear_fifo().is_err());

        self.samples.clear();
        self.cycle = 0;
        self.set_state(SessionState::Idle);
        match result {
            Ok(()) => info!("acquisition rolled back"),
            Err(_) => error!("acquisition rollback incomplete"),
        }
        result
    }

    fn set_state(&mut self, state: SessionState) {
        debug!("acquisition {} -> {}", self.state.name(), state.name());
        self.state = state;
    }

    fn configure<D, I>(&mut self, dev: &mut D, irq: &mut I) -> Result<(), SessionError>
    where
        D: OpticalFrontEnd,
        I: DataReadyIrq,
    {
        let plan = self.plan;
        self.samples
            .resize(usize::from(plan.nb_samples), 0.0)
            .map_err(|_| SessionError::BufferFull)?;

        let divider = dev.sampling_divider().map_err(|_| SessionError::Device)?;
        let slots = dev.active_slots().map_err(|_| SessionError::Device)?;
        self.saved = Some((divider, slots));
        dev.set_opmode(OpMode::Standby).map_err(|_| SessionError::Device)?;
        dev.set_active_slots(1).map_err(|_| SessionError::Device)?;

        let source = plan.channel.saturating_sub(1);
        if source != WORK_SLOT {
            for offset in ROUTING {
                let value = dev.read_reg(ts_reg(source, offset)).map_err(|_| SessionError::Device)?;
                self.undo.apply(dev, ts_reg(WORK_SLOT, offset), value, 0xFFFF)?;
            }
        }

        let reg = |offset| ts_reg(WORK_SLOT, offset);
        let pulse = (u16::from(plan.led_width) << 8) | u16::from(LED_OFFSET_DEFAULT_US);
        let threshold = plan
            .fifo_samples
            .saturating_mul(ACQ_DATA_SIZE as u16)
            .saturating_sub(1);
        self.undo.apply(dev, reg(TS_LED_PULSE), pulse, 0xFFFF)?;
        self.undo.apply(dev, reg(TS_COUNTS), SINGLE_COUNT, 0xFFFF)?;
        self.undo.apply(dev, reg(TS_INTEG_WIDTH), u16::from(plan.led_width.min(31)), INTEG_WIDTH_MASK)?;
        self.undo.apply(dev, reg(TS_DATA1), ACQ_DATA_SIZE as u16, DATA1_SIGNAL_SIZE_MASK)?;
        self.undo.apply(dev, reg(TS_CTRL), 0, TS_CTRL_CH2_EN)?;
        self.undo.apply(dev, REG_FIFO_TH, threshold, FIFO_TH_MASK)?;
        self.undo.apply(dev, REG_INT_ENABLE_XD, INT_ENABLE_FIFO_TH, INT_ENABLE_FIFO_TH)?;
        if plan.method == Method::Imp {
            self.undo.apply(dev, reg(TS_PERIOD), plan.period_upper, 0xFFFF)?;
        }
        self.undo.apply(dev, reg(TS_INTEG_OFFSET), plan.integ_offset_code(0), INTEG_OFFSET_MASK)?;

        irq.enable().map_err(|_| SessionError::Device)
    }

    fn collect<D: OpticalFrontEnd>(&mut self, dev: &mut D, ready: &ReadyFlag) -> Result<(), SessionError> {
        self.set_state(SessionState::Collecting);
        dev.clear_fifo().map_err(|_| SessionError::Device)?;
        if self.plan.method != Method::Imp {
            let code = self.plan.integ_offset_code(self.cycle);
            dev.update_bits(ts_reg(WORK_SLOT, TS_INTEG_OFFSET), INTEG_OFFSET_MASK, code)
                .map_err(|_| SessionError::Device)?;
        }
        ready.clear();
        dev.set_opmode(OpMode::Go).map_err(|_| SessionError::Device)
    }

    /// Drain one burst. Returns whether that was the last cycle.
    #[allow(clippy::cast_precision_loss)] // codes are at most 32 bits, f32 keeps 24
    fn read<D: OpticalFrontEnd>(&mut self, dev: &mut D) -> Result<bool, SessionError> {
        self.set_state(SessionState::Reading);
        dev.set_opmode(OpMode::Standby).map_err(|_| SessionError::Device)?;

        let mut buf = [0u8; READ_CHUNK * ACQ_DATA_SIZE];
        let mut remaining = usize::from(self.plan.fifo_samples);
        let mut index = 0usize;
        while remaining > 0 {
            let take = remaining.min(READ_CHUNK);
            let bytes = buf
                .get_mut(..take.saturating_mul(ACQ_DATA_SIZE))
                .ok_or(SessionError::BufferFull)?;
            dev.read_fifo(bytes).map_err(|_| SessionError::Device)?;
            for raw in bytes.chunks_exact(ACQ_DATA_SIZE) {
                let raw = <[u8; 4]>::try_from(raw).map_err(|_| SessionError::Device)?;
                let code = u32::from_be_bytes(raw);
                let position = match self.plan.method {
                    Method::Imp => index,
                    Method::Tia | Method::Ssi => usize::from(self.cycle),
                };
                if let Some(sample) = self.samples.get_mut(position) {
                    *sample += code as f32;
                }
                index = index.saturating_add(1);
            }
            remaining = remaining.saturating_sub(take);
        }

        self.cycle = self.cycle.saturating_add(1);
        Ok(self.cycle >= self.plan.data_cycles)
    }

    fn finish(&mut self) {
        let count = f32::from(self.plan.avg_len.max(1));
        for sample in &mut self.samples {
            *sample /= count;
        }
        self.set_state(SessionState::Completing);
        info!("acquisition complete: {} samples", self.samples.len());
    }
}
