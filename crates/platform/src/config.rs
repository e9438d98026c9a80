//! Board configuration and constants
//!
//! This module defines central configuration values used across the
//! workspace. Flash layout, acquisition limits and rate constants should
//! reference these rather than hardcoding values.

/// The application name
pub const APP_NAME: &str = "CN0503";

/// Application version (synchronized with Cargo.toml)
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ── Optical paths and channels ──────────────────────────────────────────────

/// Number of ratio paths (RAT0..RAT7).
pub const PATH_COUNT: usize = 8;

/// Number of hardware timeslots (A..L).
pub const TIMESLOT_COUNT: usize = 12;

/// Number of channel codes a frame can carry (two per timeslot).
pub const CHANNEL_COUNT: usize = TIMESLOT_COUNT * 2;

/// Timeslots wired to optical paths on the CN0503 (A..D).
pub const BOARD_TIMESLOTS: u8 = 4;

// ── Rates ───────────────────────────────────────────────────────────────────

/// Code rate the device runs at while streaming, in Hz.
pub const CODE_ODR_HZ: u32 = 50;

/// Number of frames averaged into one block before the window filter.
pub const BLOCK_FILTER_SIZE: usize = 10;

/// Rate at which the block filter produces samples, in Hz.
pub const BLOCK_RATE_HZ: f32 = 5.0;

/// Low-frequency oscillator the timeslot frequency divider counts, in Hz.
pub const LFOSC_HZ: u32 = 1_000_000;

// ── Device FIFO and acquisition limits ──────────────────────────────────────

/// Device FIFO depth in bytes.
pub const FIFO_DEPTH_BYTES: usize = 512;

/// Signal size programmed into the working timeslot during acquisitions.
pub const ACQ_DATA_SIZE: usize = 4;

/// Maximum sample count of a TIA/SSI acquisition.
pub const IMPRESP_MAX_SAMPLES: usize = 1950;

/// Largest buffer an acquisition ever averages into.
pub const ACQ_MAX_SAMPLES: usize = IMPRESP_MAX_SAMPLES;

/// Default LED pulse offset within a timeslot, in µs.
pub const LED_OFFSET_DEFAULT_US: u8 = 52;

/// Largest integration offset the device can express, in µs.
///
/// Eight coarse bits of 1 µs plus five fine bits of 1/32 µs.
pub const MAX_INTEG_OFFSET_US: f32 = 255.0 + 31.0 / 32.0;

/// Default upper bound for LED auto-calibration current codes.
pub const LED_CAL_MAX_CURRENT: u16 = 338;

// ── Flash layout ────────────────────────────────────────────────────────────

/// Flash page size in bytes.
pub const FLASH_PAGE_SIZE: u32 = 0x800;

/// Manufacturer-default calibration page.
pub const MD_PAGE_ADDR: u32 = 0x3_E000;

/// User-update calibration page.
pub const UU_PAGE_ADDR: u32 = 0x3_E800;

/// First page of fluorescence calibration slot 0.
pub const FLUO_CALIB_ADDR: u32 = 0x3_D800;

/// Pages reserved per fluorescence calibration slot.
pub const FLUO_MAX_PAGES: u32 = 5;

/// Number of fluorescence calibration slots.
pub const FLUO_SLOTS: u8 = 2;

/// Lowest flash address the calibration data can touch.
pub const CAL_REGION_START: u32 =
    FLUO_CALIB_ADDR - (FLUO_SLOTS as u32 * FLUO_MAX_PAGES - 1) * FLASH_PAGE_SIZE;

/// One past the highest flash address the calibration data can touch.
pub const CAL_REGION_END: u32 = UU_PAGE_ADDR + FLASH_PAGE_SIZE;

/// Words in one calibration record.
pub const CAL_RECORD_WORDS: usize = 512;

/// Words reserved for register `address:value` pairs.
pub const CAL_REGISTER_WORDS: usize = 256;

/// Words per optical path slot.
pub const CAL_PATH_WORDS: usize = 28;

/// Record word holding the display mode.
pub const CAL_MODE_WORD: usize = 509;

/// Record word holding the output data rate.
pub const CAL_ODR_WORD: usize = 510;

/// Record word holding the active-path mask.
pub const CAL_RATMASK_WORD: usize = 511;

/// Value of an erased flash word.
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

/// Key that unlocks writes to the manufacturer page.
pub const MANUFACTURER_KEY: u32 = 15_091_994;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_regions_do_not_overlap() {
        let path_end = CAL_REGISTER_WORDS + PATH_COUNT * CAL_PATH_WORDS;
        assert!(path_end <= CAL_MODE_WORD, "path region runs into scalar words");
        assert_eq!(CAL_RECORD_WORDS * 4, FLASH_PAGE_SIZE as usize);
    }

    #[test]
    fn test_calibration_region_spans_all_pages() {
        assert_eq!(CAL_REGION_START, 0x3_9000);
        assert_eq!(CAL_REGION_END, 0x3_F000);
    }
}
