//! Calibration pages and the software buffer.

use embedded_storage::nor_flash::NorFlash;
use optics::{DisplayMode, Expression, OutputRate, RatioEngine};
use platform::config::{
    CAL_RECORD_WORDS, ERASED_WORD, FLASH_PAGE_SIZE, MANUFACTURER_KEY, MD_PAGE_ADDR, PATH_COUNT,
    UU_PAGE_ADDR,
};
use platform::OpticalFrontEnd;

use super::factory::manufacturer_defaults;
use super::record::{CalibrationRecord, PathField};
use super::StoreError;
use crate::instrument::Settings;

/// Words moved per flash access.
pub(crate) const CHUNK_WORDS: usize = 8;

/// Bytes moved per flash access.
const CHUNK_BYTES: usize = CHUNK_WORDS * 4;

/// Which fixed calibration page a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageTarget {
    /// User updates (UU), writable by anyone.
    User,
    /// Manufacturer defaults (MD), writable with the key only.
    Manufacturer,
}

impl PageTarget {
    /// Page selected by a program/erase key: 0 for UU, the manufacturer key for MD.
    pub fn from_key(key: u32) -> Result<Self, StoreError> {
        match key {
            0 => Ok(Self::User),
            MANUFACTURER_KEY => Ok(Self::Manufacturer),
            _ => Err(StoreError::AccessDenied),
        }
    }

    /// Page selected by a load index: 0 for UU, 1 for MD.
    pub fn from_load_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::User),
            1 => Some(Self::Manufacturer),
            _ => None,
        }
    }

    /// Flash address of the page.
    pub fn address(self) -> u32 {
        match self {
            Self::User => UU_PAGE_ADDR,
            Self::Manufacturer => MD_PAGE_ADDR,
        }
    }

    /// Short page name for log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::User => "UU",
            Self::Manufacturer => "MD",
        }
    }
}

/// Owner of the calibration flash and the software buffer.
pub struct CalibrationStore<F> {
    flash: F,
    buffer: CalibrationRecord,
}

impl<F: NorFlash> CalibrationStore<F> {
    /// Wrap `flash` with an erased buffer.
    pub fn new(flash: F) -> Self {
        Self {
            flash,
            buffer: CalibrationRecord::erased(),
        }
    }

    /// The software buffer.
    pub fn buffer(&self) -> &CalibrationRecord {
        &self.buffer
    }

    /// Mutable software buffer.
    pub fn buffer_mut(&mut self) -> &mut CalibrationRecord {
        &mut self.buffer
    }

    /// Reset the software buffer to erased.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    /// Underlying flash, for the fluorescence pages.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Replace the buffer with the contents of `target`.
    pub fn load(&mut self, target: PageTarget) -> Result<(), StoreError> {
        read_record(&mut self.flash, target.address(), &mut self.buffer)
    }

    /// Erase `target` and write the buffer to it.
    pub fn program(&mut self, target: PageTarget) -> Result<(), StoreError> {
        info!("programming calibration page {}", target.name());
        erase_page(&mut self.flash, target.address())?;
        write_record(&mut self.flash, target.address(), &self.buffer)
    }

    /// Erase `target` and write an all-sentinel record to it.
    pub fn erase(&mut self, target: PageTarget) -> Result<(), StoreError> {
        info!("erasing calibration page {}", target.name());
        erase_page(&mut self.flash, target.address())?;
        let blank = [ERASED_WORD; CHUNK_WORDS];
        for chunk in 0..CAL_RECORD_WORDS / CHUNK_WORDS {
            write_words(&mut self.flash, chunk_address(target.address(), chunk), &blank)?;
        }
        Ok(())
    }

    /// Write the factory record to the manufacturer page if it was never programmed.
    ///
    /// Returns whether the page was written. The buffer is left erased.
    pub fn ensure_factory_defaults(&mut self) -> Result<bool, StoreError> {
        let mut first = [0u8; 4];
        self.flash
            .read(MD_PAGE_ADDR, &mut first)
            .map_err(|e| StoreError::flash(&e))?;
        let word = u32::from_le_bytes(first);
        if word != 0 && word != ERASED_WORD {
            return Ok(false);
        }

        warn!("manufacturer page blank, writing factory defaults");
        self.buffer = manufacturer_defaults();
        let result = self.program(PageTarget::Manufacturer);
        self.buffer.clear();
        result.map(|()| true)
    }
}

fn chunk_address(base: u32, chunk: usize) -> u32 {
    #[allow(clippy::arithmetic_side_effects)] // Safety: chunk < 64 keeps the offset inside one page
    let address = base + (chunk * CHUNK_BYTES) as u32;
    address
}

fn erase_page<F: NorFlash>(flash: &mut F, address: u32) -> Result<(), StoreError> {
    let end = address.checked_add(FLASH_PAGE_SIZE).ok_or(StoreError::Flash)?;
    flash.erase(address, end).map_err(|e| StoreError::flash(&e))
}

/// Program `words` (little-endian) at `address`.
pub(crate) fn write_words<F: NorFlash>(
    flash: &mut F,
    address: u32,
    words: &[u32; CHUNK_WORDS],
) -> Result<(), StoreError> {
    let mut bytes = [0u8; CHUNK_BYTES];
    for (dst, word) in bytes.chunks_exact_mut(4).zip(words) {
        dst.copy_from_slice(&word.to_le_bytes());
    }
    flash.write(address, &bytes).map_err(|e| StoreError::flash(&e))
}

/// Read `words.len()` little-endian words from `address`.
pub(crate) fn read_words<F: NorFlash>(
    flash: &mut F,
    address: u32,
    words: &mut [u32],
) -> Result<(), StoreError> {
    let mut bytes = [0u8; CHUNK_BYTES];
    let mut cursor = address;
    for chunk in words.chunks_mut(CHUNK_WORDS) {
        let len = chunk.len().saturating_mul(4);
        let window = bytes.get_mut(..len).ok_or(StoreError::Flash)?;
        flash.read(cursor, window).map_err(|e| StoreError::flash(&e))?;
        for (word, raw) in chunk.iter_mut().zip(window.chunks_exact(4)) {
            let raw = <[u8; 4]>::try_from(raw).map_err(|_| StoreError::Flash)?;
            *word = u32::from_le_bytes(raw);
        }
        cursor = cursor.checked_add(CHUNK_BYTES as u32).ok_or(StoreError::Flash)?;
    }
    Ok(())
}

/// Fill `record` from the page at `address`.
pub fn read_record<F: NorFlash>(
    flash: &mut F,
    address: u32,
    record: &mut CalibrationRecord,
) -> Result<(), StoreError> {
    read_words(flash, address, record.words_mut())
}

fn write_record<F: NorFlash>(
    flash: &mut F,
    address: u32,
    record: &CalibrationRecord,
) -> Result<(), StoreError> {
    for (chunk, words) in record.as_words().chunks_exact(CHUNK_WORDS).enumerate() {
        let mut block = [ERASED_WORD; CHUNK_WORDS];
        block.copy_from_slice(words);
        write_words(flash, chunk_address(address, chunk), &block)?;
    }
    Ok(())
}

/// What [`apply`] managed to merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ApplyReport {
    /// Register pairs written to the device.
    pub registers: u16,
    /// Address of the first register write that failed; later pairs are skipped.
    pub register_failure: Option<u16>,
    /// Paths whose stored expression did not parse.
    pub bad_expressions: u8,
    /// Stored display mode was out of range.
    pub bad_mode: bool,
    /// Stored output data rate was not positive.
    pub bad_odr: bool,
}

impl ApplyReport {
    /// Whether every set field was merged.
    pub fn is_clean(&self) -> bool {
        self.register_failure.is_none() && self.bad_expressions == 0 && !self.bad_mode && !self.bad_odr
    }
}

/// Merge every set field of `record` into the device and the pipeline.
///
/// Unset fields keep their current values. Failures are non-fatal: whatever
/// was applied before a failure stays applied, and the report says what was
/// skipped.
pub fn apply<D: OpticalFrontEnd>(
    record: &CalibrationRecord,
    device: &mut D,
    engine: &mut RatioEngine,
    settings: &mut Settings,
) -> ApplyReport {
    let mut report = ApplyReport::default();

    for (addr, value) in record.register_pairs() {
        if device.write_reg(addr, value).is_err() {
            error!("calibration register write failed at {}", addr);
            report.register_failure = Some(addr);
            break;
        }
        report.registers = report.registers.saturating_add(1);
    }

    for index in 0..PATH_COUNT {
        if let Some(text) = record.expression(index) {
            match Expression::parse(&text) {
                Ok(expression) => engine.set_expression(index, expression),
                Err(_) => {
                    warn!("stored expression of path {} does not parse", index);
                    if let Some(bit) = 1u8.checked_shl(index as u32) {
                        report.bad_expressions |= bit;
                    }
                }
            }
        }
        let Some(path) = engine.path_mut(index) else {
            continue;
        };
        if let Some(hz) = record.path_f32(index, PathField::Rflt) {
            path.set_bandwidth(hz);
        }
        let high = record.path_f32(index, PathField::AlarmHigh);
        let low = record.path_f32(index, PathField::AlarmLow);
        if high.is_some() || low.is_some() {
            let cfg = path.config();
            let (high, low) = (high.unwrap_or(cfg.alarm_high), low.unwrap_or(cfg.alarm_low));
            path.set_alarm(high, low);
        }
        if let Some(baseline) = record.path_f32(index, PathField::Baseline) {
            path.set_baseline(baseline);
        }
        if let Some(subtract) = record.subtract(index) {
            path.set_subtract(subtract);
        }
        for k in 0..optics::polynomial::COEFFICIENTS as u8 {
            if let Some(p) = record.path_f32(index, PathField::Ins1(k)) {
                path.ins1_mut().set_coefficient(usize::from(k), p);
            }
            if let Some(p) = record.path_f32(index, PathField::Ins2(k)) {
                path.ins2_mut().set_coefficient(usize::from(k), p);
            }
        }
    }

    if let Some(hz) = record.odr() {
        match OutputRate::from_stored_hz(hz) {
            Ok(rate) => settings.rate = rate,
            Err(_) => report.bad_odr = true,
        }
    }
    if let Some(word) = record.mode() {
        match DisplayMode::from_word(word) {
            Some(mode) => settings.mode = mode,
            None => report.bad_mode = true,
        }
    }
    if let Some(mask) = record.ratmask() {
        settings.ratmask = (mask & 0xFF) as u8;
    }

    debug!("calibration applied: {} registers", report.registers);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::mocks::{MockFlash, MockFrontEnd};

    fn store() -> CalibrationStore<MockFlash> {
        CalibrationStore::new(MockFlash::calibration_region())
    }

    #[test]
    fn test_page_target_keys() {
        assert_eq!(PageTarget::from_key(0), Ok(PageTarget::User));
        assert_eq!(PageTarget::from_key(15_091_994), Ok(PageTarget::Manufacturer));
        assert_eq!(PageTarget::from_key(1), Err(StoreError::AccessDenied));
        assert_eq!(PageTarget::from_load_index(1), Some(PageTarget::Manufacturer));
        assert_eq!(PageTarget::from_load_index(2), None);
    }

    #[test]
    fn test_program_then_load_round_trips() {
        let mut store = store();
        store.buffer_mut().push_register(0x0105, 0x7070).unwrap();
        store.buffer_mut().set_expression(0, "A1A2/");
        store.buffer_mut().set_odr(0.5);
        let written = store.buffer().clone();
        store.program(PageTarget::User).unwrap();

        store.clear_buffer();
        assert!(store.buffer().is_erased());
        store.load(PageTarget::User).unwrap();
        assert_eq!(store.buffer(), &written);
        assert_eq!(store.flash_mut().word(UU_PAGE_ADDR), Some(0x0105_7070), "words are little-endian");
    }

    #[test]
    fn test_program_erases_first() {
        let mut store = store();
        store.buffer_mut().set_ratmask(0x0F);
        store.program(PageTarget::User).unwrap();
        store.buffer_mut().set_ratmask(0xF0);
        store.program(PageTarget::User).unwrap();
        store.load(PageTarget::User).unwrap();
        assert_eq!(store.buffer().ratmask(), Some(0xF0), "no AND with the stale page");
        assert_eq!(store.flash_mut().erase_count(), 2);
    }

    #[test]
    fn test_erase_blanks_the_page() {
        let mut store = store();
        store.buffer_mut().set_mode(2);
        store.program(PageTarget::User).unwrap();
        store.erase(PageTarget::User).unwrap();
        store.load(PageTarget::User).unwrap();
        assert!(store.buffer().is_erased());
    }

    #[test]
    fn test_flash_write_failure_surfaces() {
        let mut store = store();
        store.flash_mut().fail_writes(true);
        assert_eq!(store.program(PageTarget::User), Err(StoreError::Flash));
    }

    #[test]
    fn test_factory_defaults_written_once() {
        let mut store = store();
        assert_eq!(store.ensure_factory_defaults(), Ok(true));
        assert!(store.buffer().is_erased(), "buffer left clean");
        assert_eq!(store.ensure_factory_defaults(), Ok(false));
        store.load(PageTarget::Manufacturer).unwrap();
        assert_eq!(store.buffer(), &manufacturer_defaults());
    }

    #[test]
    fn test_apply_merges_only_set_fields() {
        let mut record = CalibrationRecord::erased();
        record.push_register(0x0105, 0x0030).unwrap();
        record.set_expression(1, "b1b2/");
        record.set_path_f32(1, PathField::AlarmHigh, 40.0);
        record.set_path_f32(1, PathField::Ins1(0), 0.5);
        record.set_subtract(1, 0);
        record.set_ratmask(0x103);

        let mut dev = MockFrontEnd::new();
        let mut engine = RatioEngine::new();
        let mut settings = Settings::default();
        let report = apply(&record, &mut dev, &mut engine, &mut settings);

        assert!(report.is_clean());
        assert_eq!(report.registers, 1);
        assert_eq!(dev.reg(0x0105), 0x0030);
        let cfg = engine.path(1).unwrap().config();
        assert_eq!(cfg.expression.as_str(), "b1b2/");
        assert_eq!(cfg.alarm_high, 40.0);
        assert_eq!(cfg.alarm_low, 15.0, "unset low keeps its default");
        assert_eq!(cfg.ins1.0, [0.5, 1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!(!cfg.subtract);
        assert_eq!(cfg.rflt, 0.5, "unset bandwidth keeps its default");
        assert_eq!(settings.ratmask, 0x03, "mask truncated to eight paths");
        assert_eq!(settings.mode, DisplayMode::Ins2, "unset mode untouched");
    }

    #[test]
    fn test_apply_reports_first_register_failure() {
        let mut record = CalibrationRecord::erased();
        record.push_register(0x0105, 1).unwrap();
        record.push_register(0x0106, 2).unwrap();
        record.push_register(0x0107, 3).unwrap();
        record.set_mode(9);
        record.set_odr(-1.0);
        record.set_path_f32(0, PathField::Baseline, 2.0);

        let mut dev = MockFrontEnd::new();
        dev.fail_writes_to(0x0106);
        let mut engine = RatioEngine::new();
        let mut settings = Settings::default();
        let report = apply(&record, &mut dev, &mut engine, &mut settings);

        assert_eq!(report.registers, 1);
        assert_eq!(report.register_failure, Some(0x0106));
        assert!(report.bad_mode && report.bad_odr);
        assert_eq!(dev.reg(0x0107), 0, "pairs after the failure are skipped");
        assert_eq!(engine.path(0).unwrap().config().baseline, 2.0, "paths still merge");
    }
}
