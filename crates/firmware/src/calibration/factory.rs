//! Manufacturer default record.
//!
//! Written to the MD page on first boot, when its first word is blank.
//! Configures timeslots A..D for four colorimetry paths: LED/PD routing,
//! TIA gain, 32 pulses per sample with a 4-pulse chop, half-scale digital
//! offset and 4-byte samples.

use platform::adpd410x::{
    ts_reg, TS_ADC_OFF2, TS_AFE_TRIM, TS_CATHODE, TS_COUNTS, TS_CTRL, TS_DATA1, TS_INTEG_OFFSET,
    TS_INTEG_WIDTH, TS_LED_PULSE, TS_PATH, TS_PATTERN,
};
use platform::config::BOARD_TIMESLOTS;

use super::record::{CalibrationRecord, PathField};

/// Global registers, then per-path LED routing.
const GENERAL: [(u16, u16); 19] = [
    (0x000F, 0x8000),
    (0x000F, 0x0006),
    (0x0000, 0x0048),
    (0x0001, 0x000F),
    (0x000D, 0x4E20),
    (0x000E, 0x0000),
    (0x0010, 0x0300),
    // Path 1
    (0x0102, 0x0005),
    (0x0105, 0x7070),
    (0x0106, 0x0000),
    // Path 2
    (0x0122, 0x0050),
    (0x0125, 0x0000),
    (0x0126, 0x0030),
    // Path 3
    (0x0142, 0x0500),
    (0x0145, 0x80B0),
    (0x0146, 0x0000),
    // Path 4
    (0x0162, 0x5000),
    (0x0165, 0x0000),
    (0x0166, 0x80B0),
];

/// AFE path selection, identical for slots A..D.
const AFE_PATH: u16 = 0x40DA;

/// Per-slot settings written to every board slot, one pass per offset.
const PER_SLOT: [(u16, u16); 10] = [
    (TS_CTRL, 0x4000),          // channel 2 enabled
    (TS_CATHODE, 0x1000),       // precondition PDs to TIA_VREF
    (TS_AFE_TRIM, 0x2A92),      // AFE gain
    (TS_COUNTS, 0x0120),        // 1 integration per 32 pulses
    (TS_LED_PULSE, 0x0220),     // 2 µs pulse, 32 µs offset
    (TS_INTEG_WIDTH, 0x0003),   // 3 µs, double sided
    (TS_INTEG_OFFSET, 0x03FC),  // zero crossing of the BPF
    (TS_PATTERN, 0x00AA),       // 4 pulse chop
    (TS_ADC_OFF2, 0x8000),      // 2048 digital offset
    (TS_DATA1, 0x0004),         // 4 byte samples
];

const EXPRESSIONS: [&str; 4] = [
    "A1#2048-A2#2048-/",
    "B1#2048-B2#2048-/",
    "C1#2048-C2#2048-/",
    "D2#2048-D1#2048-/",
];

const SUBTRACT: [i32; 8] = [0, 1, 1, 0, 1, 1, 1, 1];

/// The factory record.
pub fn manufacturer_defaults() -> CalibrationRecord {
    let mut record = CalibrationRecord::erased();
    let afe = (0..BOARD_TIMESLOTS).map(|slot| (ts_reg(slot, TS_PATH), AFE_PATH));
    let per_slot = PER_SLOT.iter().flat_map(|&(offset, value)| {
        (0..BOARD_TIMESLOTS).map(move |slot| (ts_reg(slot, offset), value))
    });
    for (addr, value) in GENERAL.iter().copied().chain(afe).chain(per_slot) {
        // 63 pairs always fit the 256-word register area.
        let _ = record.push_register(addr, value);
    }

    for (path, text) in EXPRESSIONS.iter().enumerate() {
        record.set_expression(path, text);
    }
    for (path, raw) in SUBTRACT.iter().enumerate() {
        record.set_subtract(path, *raw);
    }
    record.set_odr(1.0);
    record.set_mode(optics::DisplayMode::Arat.to_word());
    record.set_ratmask(0xF);

    record.set_path_f32(0, PathField::Ins1(0), -0.028);
    record.set_path_f32(0, PathField::Ins1(1), 2017.3);
    record.set_path_f32(0, PathField::Ins2(0), 0.0);
    record.set_path_f32(0, PathField::Ins2(1), 1.2048);
    record
}
