//! Typed view over the 512-word calibration record.
//!
//! This is the only place that reinterprets raw flash words. Layout, in
//! 32-bit words from the record base:
//!
//! ```text
//! [0..256)    register pairs  addr << 16 | value, first top-nibble-set word ends the list
//! [256..480)  8 × 28 path slots
//!             +0..8   expression bytes, MSB first, 0xFF terminated
//!             +8      RFLT (f32)      +9  alarm high (f32)  +10 alarm low (f32)
//!             +11     RATB (f32)      +12 SUBE (i32)
//!             +16..22 INS1 p0..p5     +22..28 INS2 p0..p5  (f32)
//! 509         display mode (u32)
//! 510         output data rate (f32)
//! 511         ratmask (u32)
//! ```
//!
//! Every word reads [`ERASED_WORD`] until written, meaning "unset".

use heapless::String;
use optics::expression::MAX_EXPRESSION_LEN;
use optics::polynomial::COEFFICIENTS;
use platform::config::{
    CAL_MODE_WORD, CAL_ODR_WORD, CAL_PATH_WORDS, CAL_RATMASK_WORD, CAL_RECORD_WORDS,
    CAL_REGISTER_WORDS, ERASED_WORD, PATH_COUNT,
};

use super::StoreError;

/// Words holding the expression bytes of one path.
pub const EXPRESSION_WORDS: usize = MAX_EXPRESSION_LEN / 4;

/// Single-word fields of a path slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PathField {
    /// Low-pass bandwidth (Hz).
    Rflt,
    /// High alarm threshold.
    AlarmHigh,
    /// Low alarm threshold.
    AlarmLow,
    /// Baseline ratio.
    Baseline,
    /// Coefficient `k` of the first instrument polynomial.
    Ins1(u8),
    /// Coefficient `k` of the second instrument polynomial.
    Ins2(u8),
}

impl PathField {
    const SUBTRACT_OFFSET: usize = 12;

    /// Word offset inside the path slot, `None` for a coefficient index ≥ 6.
    pub fn offset(self) -> Option<usize> {
        let coefficient = |base: usize, k: u8| {
            let k = usize::from(k);
            (k < COEFFICIENTS).then(|| base.saturating_add(k))
        };
        match self {
            Self::Rflt => Some(8),
            Self::AlarmHigh => Some(9),
            Self::AlarmLow => Some(10),
            Self::Baseline => Some(11),
            Self::Ins1(k) => coefficient(16, k),
            Self::Ins2(k) => coefficient(22, k),
        }
    }
}

/// One calibration page worth of words.
#[derive(Clone, PartialEq, Eq)]
pub struct CalibrationRecord {
    words: [u32; CAL_RECORD_WORDS],
}

impl core::fmt::Debug for CalibrationRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let set = self.words.iter().filter(|w| **w != ERASED_WORD).count();
        f.debug_struct("CalibrationRecord").field("set_words", &set).finish()
    }
}

impl CalibrationRecord {
    /// All-erased record.
    #[allow(clippy::large_stack_arrays)] // moved straight into the owning store
    pub const fn erased() -> Self {
        Self {
            words: [ERASED_WORD; CAL_RECORD_WORDS],
        }
    }

    /// Wrap raw words.
    pub const fn from_words(words: [u32; CAL_RECORD_WORDS]) -> Self {
        Self { words }
    }

    /// Raw words.
    pub fn as_words(&self) -> &[u32; CAL_RECORD_WORDS] {
        &self.words
    }

    /// Mutable raw words (flash loads fill these directly).
    pub fn words_mut(&mut self) -> &mut [u32; CAL_RECORD_WORDS] {
        &mut self.words
    }

    /// Reset every word to the erased sentinel.
    pub fn clear(&mut self) {
        self.words.fill(ERASED_WORD);
    }

    /// Whether nothing has been written.
    pub fn is_erased(&self) -> bool {
        self.words.iter().all(|w| *w == ERASED_WORD)
    }

    fn word(&self, index: usize) -> Option<u32> {
        self.words.get(index).copied().filter(|w| *w != ERASED_WORD)
    }

    fn set_word(&mut self, index: usize, value: u32) {
        if let Some(word) = self.words.get_mut(index) {
            *word = value;
        }
    }

    // ── Registers ───────────────────────────────────────────────────────────

    /// Stored `(address, value)` pairs in write order.
    pub fn register_pairs(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.words
            .iter()
            .take(CAL_REGISTER_WORDS)
            .take_while(|w| **w & 0xF000_0000 == 0)
            .map(|w| split_pair(*w))
    }

    /// Append a pair in the first free slot.
    pub fn push_register(&mut self, addr: u16, value: u16) -> Result<(), StoreError> {
        let slot = self
            .words
            .iter_mut()
            .take(CAL_REGISTER_WORDS)
            .find(|w| **w & 0xFF00_0000 == 0xFF00_0000)
            .ok_or(StoreError::NoSpace)?;
        *slot = (u32::from(addr) << 16) | u32::from(value);
        Ok(())
    }

    /// Last value stored for `addr`.
    pub fn find_register(&self, addr: u16) -> Option<u16> {
        self.register_pairs()
            .filter(|(a, _)| *a == addr)
            .last()
            .map(|(_, v)| v)
    }

    // ── Paths ───────────────────────────────────────────────────────────────

    fn path_base(path: usize) -> Option<usize> {
        (path < PATH_COUNT).then(|| {
            #[allow(clippy::arithmetic_side_effects)] // Safety: path < 8 keeps this below 480
            let base = CAL_REGISTER_WORDS + path * CAL_PATH_WORDS;
            base
        })
    }

    /// Stored expression text of `path`, `None` when unset.
    pub fn expression(&self, path: usize) -> Option<String<MAX_EXPRESSION_LEN>> {
        let base = Self::path_base(path)?;
        let mut text = String::new();
        let bytes = self
            .words
            .iter()
            .skip(base)
            .take(EXPRESSION_WORDS)
            .flat_map(|w| w.to_be_bytes());
        for byte in bytes.take_while(|b| *b != 0xFF) {
            text.push(char::from(byte)).ok()?;
        }
        (!text.is_empty()).then_some(text)
    }

    /// Replace the expression of `path`. Text beyond 32 bytes is dropped.
    pub fn set_expression(&mut self, path: usize, text: &str) {
        let Some(base) = Self::path_base(path) else {
            return;
        };
        let mut bytes = text.bytes().take(MAX_EXPRESSION_LEN);
        for word in self.words.iter_mut().skip(base).take(EXPRESSION_WORDS) {
            let mut packed = [0xFFu8; 4];
            for slot in &mut packed {
                match bytes.next() {
                    Some(byte) => *slot = byte,
                    None => break,
                }
            }
            *word = u32::from_be_bytes(packed);
        }
    }

    /// Float field of `path`, `None` when unset.
    pub fn path_f32(&self, path: usize, field: PathField) -> Option<f32> {
        let index = Self::path_base(path)?.checked_add(field.offset()?)?;
        self.word(index).map(f32::from_bits)
    }

    /// Store a float field of `path`.
    pub fn set_path_f32(&mut self, path: usize, field: PathField, value: f32) {
        let index = Self::path_base(path).zip(field.offset()).and_then(|(b, o)| b.checked_add(o));
        if let Some(index) = index {
            self.set_word(index, value.to_bits());
        }
    }

    /// Raw SUBE word of `path`, `None` when unset.
    pub fn subtract_raw(&self, path: usize) -> Option<i32> {
        let index = Self::path_base(path)?.checked_add(PathField::SUBTRACT_OFFSET)?;
        self.word(index).map(|w| w as i32)
    }

    /// SUBE of `path`: only an explicit 0 disables subtraction.
    pub fn subtract(&self, path: usize) -> Option<bool> {
        self.subtract_raw(path).map(|raw| raw != 0)
    }

    /// Store the SUBE word of `path` as given.
    pub fn set_subtract(&mut self, path: usize, raw: i32) {
        if let Some(index) = Self::path_base(path).and_then(|b| b.checked_add(PathField::SUBTRACT_OFFSET)) {
            self.set_word(index, raw as u32);
        }
    }

    // ── Scalars ─────────────────────────────────────────────────────────────

    /// Display mode word.
    pub fn mode(&self) -> Option<u32> {
        self.word(CAL_MODE_WORD)
    }

    /// Store the display mode word.
    pub fn set_mode(&mut self, mode: u32) {
        self.set_word(CAL_MODE_WORD, mode);
    }

    /// Output data rate in Hz.
    pub fn odr(&self) -> Option<f32> {
        self.word(CAL_ODR_WORD).map(f32::from_bits)
    }

    /// Store the output data rate.
    pub fn set_odr(&mut self, hz: f32) {
        self.set_word(CAL_ODR_WORD, hz.to_bits());
    }

    /// Active-path mask.
    pub fn ratmask(&self) -> Option<u32> {
        self.word(CAL_RATMASK_WORD)
    }

    /// Store the active-path mask.
    pub fn set_ratmask(&mut self, mask: u32) {
        self.set_word(CAL_RATMASK_WORD, mask);
    }
}

impl Default for CalibrationRecord {
    fn default() -> Self {
        Self::erased()
    }
}

fn split_pair(word: u32) -> (u16, u16) {
    #[allow(clippy::cast_possible_truncation)] // each half masked to 16 bits
    let pair = ((word >> 16) as u16, (word & 0xFFFF) as u16);
    pair
}
