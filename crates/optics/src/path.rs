//! One optical measurement path: expression, filter state and derived values.
//!
//! ## Derivation chain
//!
//! ```text
//! absolute ──► relative = subtract ? 1 - abs/base : abs/base
//!          ──► ins1 = INS1(relative)
//!          ──► ins2 = INS2(ins1)
//!          ──► alarm (bit0 low, bit1 high)
//! ```
//!
//! A zero baseline leaves `relative` and everything after it unchanged.

use crate::expression::Expression;
use crate::filter::{window_for_bandwidth, WindowRing, MAX_WINDOW};
use crate::polynomial::Polynomial;

/// Default low-pass bandwidth in Hz.
pub const DEFAULT_RFLT_HZ: f32 = 0.5;

/// Default high alarm threshold.
pub const DEFAULT_ALARM_HIGH: f32 = 25.0;

/// Default low alarm threshold.
pub const DEFAULT_ALARM_LOW: f32 = 15.0;

/// Alarm flags of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmState(u8);

impl AlarmState {
    /// INS2 below the low threshold.
    pub const LOW: u8 = 0x01;
    /// INS2 above the high threshold.
    pub const HIGH: u8 = 0x02;

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Low threshold crossed.
    pub fn is_low(self) -> bool {
        self.0 & Self::LOW != 0
    }

    /// High threshold crossed.
    pub fn is_high(self) -> bool {
        self.0 & Self::HIGH != 0
    }

    fn update(&mut self, value: f32, low: f32, high: f32) {
        if value < low {
            self.0 |= Self::LOW;
        } else {
            self.0 &= !Self::LOW;
        }
        if value > high {
            self.0 |= Self::HIGH;
        } else {
            self.0 &= !Self::HIGH;
        }
    }
}

/// Per-path configuration, as edited by `DEF` commands and calibration records.
#[derive(Debug, Clone, PartialEq)]
pub struct PathConfig {
    /// Ratio expression (ARAT).
    pub expression: Expression,
    /// Low-pass bandwidth in Hz (RFLT).
    pub rflt: f32,
    /// Window width derived from `rflt`.
    pub window: usize,
    /// Baseline ratio (RATB).
    pub baseline: f32,
    /// Report `1 - abs/base` instead of `abs/base` (SUBE).
    pub subtract: bool,
    /// High alarm threshold.
    pub alarm_high: f32,
    /// Low alarm threshold.
    pub alarm_low: f32,
    /// First instrument polynomial.
    pub ins1: Polynomial,
    /// Second instrument polynomial.
    pub ins2: Polynomial,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            expression: Expression::empty(),
            rflt: DEFAULT_RFLT_HZ,
            window: window_for_bandwidth(DEFAULT_RFLT_HZ),
            baseline: 1.0,
            subtract: true,
            alarm_high: DEFAULT_ALARM_HIGH,
            alarm_low: DEFAULT_ALARM_LOW,
            ins1: Polynomial::IDENTITY,
            ins2: Polynomial::IDENTITY,
        }
    }
}

/// Configuration plus running state of one path.
#[derive(Debug, Clone)]
pub struct OpticalPath {
    config: PathConfig,
    ring: WindowRing<MAX_WINDOW>,
    absolute: f32,
    relative: f32,
    ins1: f32,
    ins2: f32,
    alarm: AlarmState,
}

impl OpticalPath {
    /// Path with `config` and zeroed state.
    pub fn new(config: PathConfig) -> Self {
        let ring = WindowRing::new(config.window);
        Self {
            config,
            ring,
            absolute: 0.0,
            relative: 0.0,
            ins1: 0.0,
            ins2: 0.0,
            alarm: AlarmState::default(),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &PathConfig {
        &self.config
    }

    /// Replace the expression.
    pub fn set_expression(&mut self, expression: Expression) {
        self.config.expression = expression;
    }

    /// Set the low-pass bandwidth, recompute the window width and reset the ring.
    pub fn set_bandwidth(&mut self, hz: f32) {
        self.config.rflt = hz;
        self.config.window = window_for_bandwidth(hz);
        self.ring.set_width(self.config.window);
    }

    /// Set the baseline ratio.
    pub fn set_baseline(&mut self, baseline: f32) {
        self.config.baseline = baseline;
    }

    /// Choose between `1 - abs/base` (true) and `abs/base`.
    pub fn set_subtract(&mut self, subtract: bool) {
        self.config.subtract = subtract;
    }

    /// Set both alarm thresholds.
    pub fn set_alarm(&mut self, high: f32, low: f32) {
        self.config.alarm_high = high;
        self.config.alarm_low = low;
    }

    /// Mutable INS1 polynomial.
    pub fn ins1_mut(&mut self) -> &mut Polynomial {
        &mut self.config.ins1
    }

    /// Mutable INS2 polynomial.
    pub fn ins2_mut(&mut self) -> &mut Polynomial {
        &mut self.config.ins2
    }

    /// Feed one block mean through the window and re-derive.
    pub fn push_block(&mut self, mean: f32) {
        self.ring.push(mean);
        self.absolute = self.ring.mean();
        self.derive();
    }

    /// Recompute relative ratio, instrument values and alarm from `absolute`.
    ///
    /// A zero baseline keeps the previous relative ratio; the instrument
    /// values and the alarm are still re-evaluated from it.
    pub fn derive(&mut self) {
        let cfg = &self.config;
        if cfg.baseline != 0.0 {
            let ratio = self.absolute / cfg.baseline;
            self.relative = if cfg.subtract { 1.0 - ratio } else { ratio };
        }
        self.ins1 = cfg.ins1.eval(self.relative);
        self.ins2 = cfg.ins2.eval(self.ins1);
        self.alarm.update(self.ins2, cfg.alarm_low, cfg.alarm_high);
    }

    /// Filtered absolute ratio (ARAT).
    pub fn absolute(&self) -> f32 {
        self.absolute
    }

    /// Relative ratio (RRAT).
    pub fn relative(&self) -> f32 {
        self.relative
    }

    /// First instrument value.
    pub fn ins1(&self) -> f32 {
        self.ins1
    }

    /// Second instrument value.
    pub fn ins2(&self) -> f32 {
        self.ins2
    }

    /// Alarm flags.
    pub fn alarm(&self) -> AlarmState {
        self.alarm
    }

    /// Zero the window and derived values, keeping the configuration.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.absolute = 0.0;
        self.relative = 0.0;
        self.ins1 = 0.0;
        self.ins2 = 0.0;
        self.alarm = AlarmState::default();
    }
}

impl Default for OpticalPath {
    fn default() -> Self {
        Self::new(PathConfig::default())
    }
}
