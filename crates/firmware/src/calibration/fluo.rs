//! Fluorescence reference curves.
//!
//! Each of the [`FLUO_SLOTS`] slots owns [`FLUO_MAX_PAGES`] flash pages. The
//! first page of slot `s` sits at `FLUO_CALIB_ADDR - s * 5 * 0x800`; words
//! fill a page from its base upward and then continue one page lower.
//!
//! ```text
//! word 0   channel << 24 | led_width << 16 | start << 8 | method
//! word 1   end time (f32, µs)
//! word 2   period (f32, µs)
//! word 3.. samples (f32)
//! ```

use embedded_storage::nor_flash::NorFlash;
use platform::config::{ERASED_WORD, FLASH_PAGE_SIZE, FLUO_CALIB_ADDR, FLUO_MAX_PAGES, FLUO_SLOTS};

use super::store::{read_words, write_words, CHUNK_WORDS};
use crate::acquisition::Method;

/// Words of the header in front of the samples.
pub const HEADER_WORDS: usize = 3;

/// Words per flash page.
const PAGE_WORDS: u32 = FLASH_PAGE_SIZE / 4;

/// Fluorescence store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FluoError {
    /// The curve does not fit the pages of one slot.
    PageBoundExceeded,
    /// The slot holds no reference curve.
    NotCalibrated,
    /// Flash access failed.
    Flash,
    /// No such slot.
    SlotOutOfRange,
}

#[cfg(feature = "std")]
impl std::error::Error for FluoError {}

impl core::fmt::Display for FluoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PageBoundExceeded => write!(f, "Reference curve exceeds its flash pages"),
            Self::NotCalibrated => write!(f, "No reference curve stored"),
            Self::Flash => write!(f, "Fluorescence flash access failed"),
            Self::SlotOutOfRange => write!(f, "Fluorescence slot out of range"),
        }
    }
}

impl From<super::StoreError> for FluoError {
    fn from(_: super::StoreError) -> Self {
        Self::Flash
    }
}

/// Acquisition settings a reference curve was captured with.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FluoHeader {
    /// Optical channel, 1-based.
    pub channel: u8,
    /// LED pulse width (µs).
    pub led_width: u8,
    /// Time of the first sample after the LED pulse (µs).
    pub start: u8,
    /// Acquisition method.
    pub method: Method,
    /// Time of the last sample (µs).
    pub end: f32,
    /// Sample spacing (µs).
    pub period: f32,
}

impl FluoHeader {
    /// Pack into the three header words.
    pub fn to_words(&self) -> [u32; HEADER_WORDS] {
        let word0 = (u32::from(self.channel) << 24)
            | (u32::from(self.led_width) << 16)
            | (u32::from(self.start) << 8)
            | u32::from(self.method.code());
        [word0, self.end.to_bits(), self.period.to_bits()]
    }

    /// Unpack header words; `None` for an erased or malformed header.
    pub fn from_words(words: [u32; HEADER_WORDS]) -> Option<Self> {
        let [word0, end, period] = words;
        if word0 == ERASED_WORD {
            return None;
        }
        let [channel, led_width, start, method] = word0.to_be_bytes();
        Some(Self {
            channel,
            led_width,
            start,
            method: Method::from_code(method)?,
            end: f32::from_bits(end),
            period: f32::from_bits(period),
        })
    }

    /// Time of the first sample.
    pub fn t0(&self) -> f32 {
        f32::from(self.start)
    }

    /// Samples between `t0` and `end` inclusive; zero for a bad period.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // rounded and checked non-negative first
    pub fn sample_count(&self) -> usize {
        if !(self.period > 0.0) {
            return 0;
        }
        let spans = libm::roundf((self.end - self.t0()) / self.period);
        if !(spans >= 0.0) {
            return 0;
        }
        (spans as usize).saturating_add(1)
    }
}

/// Flash address of the first page of `slot`.
pub fn slot_base(slot: u8) -> Result<u32, FluoError> {
    if slot >= FLUO_SLOTS {
        return Err(FluoError::SlotOutOfRange);
    }
    let span = u32::from(slot)
        .checked_mul(FLUO_MAX_PAGES)
        .and_then(|pages| pages.checked_mul(FLASH_PAGE_SIZE))
        .ok_or(FluoError::SlotOutOfRange)?;
    FLUO_CALIB_ADDR.checked_sub(span).ok_or(FluoError::SlotOutOfRange)
}

/// Address of word `index` in the rotated layout starting at `base`.
fn word_address(base: u32, index: u32) -> Result<u32, FluoError> {
    let page = index / PAGE_WORDS;
    if page >= FLUO_MAX_PAGES {
        return Err(FluoError::PageBoundExceeded);
    }
    #[allow(clippy::arithmetic_side_effects)] // Safety: page < 5 and the remainder < 512
    let offset = (index % PAGE_WORDS) * 4;
    page.checked_mul(FLASH_PAGE_SIZE)
        .and_then(|down| base.checked_sub(down))
        .and_then(|page_base| page_base.checked_add(offset))
        .ok_or(FluoError::PageBoundExceeded)
}

/// Sequential word writer over the rotated pages of one slot.
///
/// Pages are erased as the writer first enters them. Words are buffered
/// into flash-sized chunks; call [`FluoPageWriter::finish`] to flush the tail.
pub struct FluoPageWriter<'f, F> {
    flash: &'f mut F,
    base: u32,
    written: u32,
    chunk: [u32; CHUNK_WORDS],
    fill: usize,
}

impl<'f, F: NorFlash> FluoPageWriter<'f, F> {
    /// Start writing at the first word of `slot`.
    pub fn new(flash: &'f mut F, slot: u8) -> Result<Self, FluoError> {
        Ok(Self {
            flash,
            base: slot_base(slot)?,
            written: 0,
            chunk: [ERASED_WORD; CHUNK_WORDS],
            fill: 0,
        })
    }

    /// Words accepted so far.
    pub fn len(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)] // fill < 8
        let pending = self.fill as u32;
        self.written.saturating_add(pending)
    }

    /// Whether nothing was pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one word.
    pub fn push(&mut self, word: u32) -> Result<(), FluoError> {
        // Reject before buffering so a full slot never takes a partial chunk.
        word_address(self.base, self.len())?;
        if let Some(slot) = self.chunk.get_mut(self.fill) {
            *slot = word;
        }
        self.fill = self.fill.saturating_add(1);
        if self.fill == CHUNK_WORDS {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the buffered tail, padded with erased words.
    pub fn finish(mut self) -> Result<u32, FluoError> {
        if self.fill > 0 {
            self.flush()?;
        }
        Ok(self.written)
    }

    fn flush(&mut self) -> Result<(), FluoError> {
        let address = word_address(self.base, self.written)?;
        if self.written % PAGE_WORDS == 0 {
            let end = address.checked_add(FLASH_PAGE_SIZE).ok_or(FluoError::PageBoundExceeded)?;
            self.flash.erase(address, end).map_err(|e| super::StoreError::flash(&e))?;
        }
        write_words(self.flash, address, &self.chunk)?;
        #[allow(clippy::cast_possible_truncation)] // fill ≤ 8
        let flushed = self.fill as u32;
        self.written = self.written.saturating_add(flushed);
        self.chunk = [ERASED_WORD; CHUNK_WORDS];
        self.fill = 0;
        Ok(())
    }
}

/// Sequential word reader over the rotated pages of one slot.
pub struct FluoPageReader<'f, F> {
    flash: &'f mut F,
    base: u32,
    index: u32,
}

impl<'f, F: NorFlash> FluoPageReader<'f, F> {
    /// Start reading at the first word of `slot`.
    pub fn new(flash: &'f mut F, slot: u8) -> Result<Self, FluoError> {
        Ok(Self {
            flash,
            base: slot_base(slot)?,
            index: 0,
        })
    }

    /// Next word.
    pub fn next_word(&mut self) -> Result<u32, FluoError> {
        let address = word_address(self.base, self.index)?;
        let mut word = [0u32; 1];
        read_words(self.flash, address, &mut word)?;
        self.index = self.index.saturating_add(1);
        let [word] = word;
        Ok(word)
    }
}

/// Erase and write the reference curve of `slot`.
///
/// Checks the size before touching flash. Returns the number of samples stored.
pub fn store_reference<F: NorFlash>(
    flash: &mut F,
    slot: u8,
    header: &FluoHeader,
    samples: &[f32],
) -> Result<usize, FluoError> {
    let total = samples.len().saturating_add(HEADER_WORDS);
    let capacity = (PAGE_WORDS as usize).saturating_mul(FLUO_MAX_PAGES as usize);
    if total > capacity {
        return Err(FluoError::PageBoundExceeded);
    }

    let mut writer = FluoPageWriter::new(flash, slot)?;
    for word in header.to_words() {
        writer.push(word)?;
    }
    for sample in samples {
        writer.push(sample.to_bits())?;
    }
    writer.finish()?;
    info!("fluorescence reference stored in slot {}: {} samples", slot, samples.len());
    Ok(samples.len())
}

/// Read the reference curve of `slot` into `buf`.
///
/// Returns the header and the number of samples read, which is capped at
/// `buf.len()`.
pub fn load_reference<F: NorFlash>(
    flash: &mut F,
    slot: u8,
    buf: &mut [f32],
) -> Result<(FluoHeader, usize), FluoError> {
    let mut reader = FluoPageReader::new(flash, slot)?;
    let words = [reader.next_word()?, reader.next_word()?, reader.next_word()?];
    let header = FluoHeader::from_words(words).ok_or(FluoError::NotCalibrated)?;
    let count = header.sample_count();
    if count == 0 {
        return Err(FluoError::NotCalibrated);
    }
    let count = count.min(buf.len());
    for sample in buf.iter_mut().take(count) {
        *sample = f32::from_bits(reader.next_word()?);
    }
    Ok((header, count))
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use platform::mocks::MockFlash;

    fn header(samples: usize) -> FluoHeader {
        FluoHeader {
            channel: 1,
            led_width: 10,
            start: 4,
            method: Method::Tia,
            end: 4.0 + (samples - 1) as f32 * 0.5,
            period: 0.5,
        }
    }

    #[test]
    fn test_slot_bases_step_down() {
        assert_eq!(slot_base(0), Ok(0x3_D800));
        assert_eq!(slot_base(1), Ok(0x3_B000));
        assert_eq!(slot_base(2), Err(FluoError::SlotOutOfRange));
    }

    #[test]
    fn test_words_continue_one_page_lower() {
        assert_eq!(word_address(0x3_D800, 0), Ok(0x3_D800));
        assert_eq!(word_address(0x3_D800, 511), Ok(0x3_DFFC));
        assert_eq!(word_address(0x3_D800, 512), Ok(0x3_D000));
        assert_eq!(word_address(0x3_D800, 4 * 512), Ok(0x3_B800));
        assert_eq!(word_address(0x3_D800, 5 * 512 - 1), Ok(0x3_BFFC));
        // The last word of slot 0 sits just above slot 1's first page.
        assert!(0x3_BFFC > slot_base(1).unwrap() + 0x7FC);
        assert_eq!(word_address(0x3_D800, 5 * 512), Err(FluoError::PageBoundExceeded));
    }

    #[test]
    fn test_header_packing() {
        let h = header(3);
        let words = h.to_words();
        assert_eq!(words[0], 0x010A_0401);
        assert_eq!(FluoHeader::from_words(words), Some(h));
        assert_eq!(h.sample_count(), 3);
        assert_eq!(FluoHeader::from_words([ERASED_WORD; 3]), None);
    }

    #[test]
    fn test_reference_spanning_pages_round_trips() {
        let mut flash = MockFlash::calibration_region();
        let samples: Vec<f32> = (0..1200).map(|i| i as f32 * 0.25 - 7.0).collect();
        store_reference(&mut flash, 1, &header(samples.len()), &samples).unwrap();
        assert_eq!(flash.erase_count(), 3, "1203 words touch three pages");

        let mut buf = vec![0.0f32; 1950];
        let (h, count) = load_reference(&mut flash, 1, &mut buf).unwrap();
        assert_eq!(h, header(samples.len()));
        assert_eq!(count, samples.len());
        assert_eq!(&buf[..count], samples.as_slice());
        assert_eq!(flash.word(0x3_A800), Some(samples[509].to_bits()), "second page sits below");
    }

    #[test]
    fn test_empty_slot_is_not_calibrated() {
        let mut flash = MockFlash::calibration_region();
        let mut buf = [0.0f32; 8];
        assert_eq!(load_reference(&mut flash, 0, &mut buf), Err(FluoError::NotCalibrated));
    }

    #[test]
    fn test_oversized_curve_rejected_before_erase() {
        let mut flash = MockFlash::calibration_region();
        let samples = vec![1.0f32; 5 * 512];
        assert_eq!(
            store_reference(&mut flash, 0, &header(samples.len()), &samples),
            Err(FluoError::PageBoundExceeded)
        );
        assert_eq!(flash.erase_count(), 0);
    }

    #[test]
    fn test_writer_stops_at_page_bound() {
        let mut flash = MockFlash::calibration_region();
        let mut writer = FluoPageWriter::new(&mut flash, 0).unwrap();
        for i in 0..5 * 512 {
            writer.push(i).unwrap();
        }
        assert_eq!(writer.push(0), Err(FluoError::PageBoundExceeded));
        assert_eq!(writer.finish(), Ok(5 * 512));
    }
}
