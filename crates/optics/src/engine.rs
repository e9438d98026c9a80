//! The eight-path ratio engine fed one channel frame at a time.

use platform::config::PATH_COUNT;

use crate::expression::{ChannelSource, Evaluation, Expression};
use crate::filter::BlockAverager;
use crate::path::{AlarmState, OpticalPath};

/// What the output stream shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayMode {
    /// Raw channel codes per frame.
    Code,
    /// Filtered absolute ratios.
    Arat,
    /// Relative ratios.
    Rrat,
    /// First instrument polynomial output.
    Ins1,
    /// Second instrument polynomial output.
    Ins2,
}

impl DisplayMode {
    const ALL: [Self; 5] = [Self::Code, Self::Arat, Self::Rrat, Self::Ins1, Self::Ins2];

    /// Command-line name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Code => "CODE",
            Self::Arat => "ARAT",
            Self::Rrat => "RRAT",
            Self::Ins1 => "INS1",
            Self::Ins2 => "INS2",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.name().eq_ignore_ascii_case(name))
    }

    /// Value stored in a calibration record.
    pub fn to_word(self) -> u32 {
        match self {
            Self::Code => 0,
            Self::Arat => 1,
            Self::Rrat => 2,
            Self::Ins1 => 3,
            Self::Ins2 => 4,
        }
    }

    /// Inverse of [`DisplayMode::to_word`].
    pub fn from_word(word: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|mode| mode.to_word() == word)
    }
}

/// Result of [`RatioEngine::push_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameOutcome {
    /// A block completed and every path has fresh ratios.
    pub ratios_ready: bool,
    /// Paths whose expression lacks a final operator, reported for the first time.
    pub no_operator: u8,
}

/// Block averaging and per-path derivation for all paths.
#[derive(Debug, Clone)]
pub struct RatioEngine {
    paths: [OpticalPath; PATH_COUNT],
    block: BlockAverager<PATH_COUNT>,
    no_operator_latch: u8,
}

impl RatioEngine {
    /// Engine with default path configurations.
    pub fn new() -> Self {
        Self {
            paths: core::array::from_fn(|_| OpticalPath::default()),
            block: BlockAverager::new(),
            no_operator_latch: 0,
        }
    }

    /// Evaluate every path against `frame`. Every tenth frame the block
    /// means go through the windows and the derived values refresh.
    pub fn push_frame<S: ChannelSource + ?Sized>(&mut self, frame: &S) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        let mut samples = [0.0f32; PATH_COUNT];

        for (index, (path, sample)) in self.paths.iter().zip(samples.iter_mut()).enumerate() {
            let evaluation = path.config().expression.evaluate(frame);
            if evaluation == Evaluation::NoOperator {
                let bit = path_bit(index);
                if self.no_operator_latch & bit == 0 {
                    self.no_operator_latch |= bit;
                    outcome.no_operator |= bit;
                }
            }
            *sample = evaluation.value();
        }

        if let Some(means) = self.block.push(samples) {
            for (path, mean) in self.paths.iter_mut().zip(means) {
                path.push_block(mean);
            }
            outcome.ratios_ready = true;
        }
        outcome
    }

    /// Path `index`, if it exists.
    pub fn path(&self, index: usize) -> Option<&OpticalPath> {
        self.paths.get(index)
    }

    /// Mutable path `index`, if it exists.
    pub fn path_mut(&mut self, index: usize) -> Option<&mut OpticalPath> {
        self.paths.get_mut(index)
    }

    /// All paths.
    pub fn paths(&self) -> &[OpticalPath; PATH_COUNT] {
        &self.paths
    }

    /// Replace the expression of `index` and re-arm its missing-operator report.
    pub fn set_expression(&mut self, index: usize, expression: Expression) {
        if let Some(path) = self.paths.get_mut(index) {
            path.set_expression(expression);
            self.no_operator_latch &= !path_bit(index);
        }
    }

    /// Value shown for `index` in `mode`. `None` in CODE mode or for a bad index.
    pub fn value(&self, mode: DisplayMode, index: usize) -> Option<f32> {
        let path = self.paths.get(index)?;
        match mode {
            DisplayMode::Code => None,
            DisplayMode::Arat => Some(path.absolute()),
            DisplayMode::Rrat => Some(path.relative()),
            DisplayMode::Ins1 => Some(path.ins1()),
            DisplayMode::Ins2 => Some(path.ins2()),
        }
    }

    /// Alarm flags of `index`; clear for a bad index.
    pub fn alarm(&self, index: usize) -> AlarmState {
        self.paths.get(index).map(OpticalPath::alarm).unwrap_or_default()
    }

    /// Drop partial blocks and window history, keeping configuration.
    pub fn reset(&mut self) {
        self.block.reset();
        for path in &mut self.paths {
            path.reset();
        }
    }
}

impl Default for RatioEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn path_bit(index: usize) -> u8 {
    u32::try_from(index)
        .ok()
        .and_then(|i| 1u8.checked_shl(i))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flat(f32);

    impl ChannelSource for Flat {
        fn channel(&self, _index: u8) -> f32 {
            self.0
        }
    }

    #[test]
    fn test_mode_names_round_trip() {
        for mode in DisplayMode::ALL {
            assert_eq!(DisplayMode::from_name(&mode.name().to_lowercase()), Some(mode));
            assert_eq!(DisplayMode::from_word(mode.to_word()), Some(mode));
        }
        assert_eq!(DisplayMode::from_name("RAT"), None);
        assert_eq!(DisplayMode::from_word(5), None);
    }

    #[test]
    fn test_ratios_ready_every_tenth_frame() {
        let mut engine = RatioEngine::new();
        engine.set_expression(0, Expression::parse("A1A2/").unwrap());
        let frame = Flat(2.0);
        let ready: Vec<bool> = (0..20).map(|_| engine.push_frame(&frame).ratios_ready).collect();
        assert_eq!(ready.iter().filter(|r| **r).count(), 2);
        assert!(ready[9] && ready[19]);
        let expected = 2.0 / 6.0;
        assert!((engine.value(DisplayMode::Arat, 0).unwrap() - expected).abs() < 1e-6);
        assert_eq!(engine.value(DisplayMode::Code, 0), None);
    }

    #[test]
    fn test_missing_operator_reported_once_until_reset() {
        let mut engine = RatioEngine::new();
        engine.set_expression(2, Expression::parse("A1A2").unwrap());
        let frame = Flat(1.0);
        assert_eq!(engine.push_frame(&frame).no_operator, 0b100);
        assert_eq!(engine.push_frame(&frame).no_operator, 0, "latched");

        engine.set_expression(2, Expression::parse("A1").unwrap());
        assert_eq!(engine.push_frame(&frame).no_operator, 0b100, "re-armed by a new expression");
    }

    #[test]
    fn test_empty_expressions_stay_silent() {
        let mut engine = RatioEngine::new();
        for _ in 0..10 {
            let outcome = engine.push_frame(&Flat(3.0));
            assert_eq!(outcome.no_operator, 0);
        }
        assert_eq!(engine.value(DisplayMode::Arat, 7), Some(0.0));
        assert_eq!(engine.value(DisplayMode::Arat, 8), None);
    }
}
