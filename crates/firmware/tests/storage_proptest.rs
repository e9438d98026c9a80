//! Property tests for the flash-backed stores and the register undo log.
//!
//! Run with: cargo test -p firmware --test storage_proptest
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]

use firmware::acquisition::{Method, UndoLog};
use firmware::calibration::fluo::{load_reference, store_reference, FluoHeader};
use firmware::calibration::{CalibrationStore, PageTarget, PathField};
use platform::mocks::{MockFlash, MockFrontEnd};
use platform::OpticalFrontEnd;
use proptest::prelude::*;

/// Samples that fit one slot: five 512-word pages minus the header.
const MAX_SAMPLES: usize = 5 * 512 - 3;

fn header(count: usize) -> FluoHeader {
    FluoHeader {
        channel: 2,
        led_width: 10,
        start: 4,
        method: Method::Tia,
        end: 4.0 + (count - 1) as f32 * 0.5,
        period: 0.5,
    }
}

proptest! {
    /// Curves spanning several pages come back bit for bit.
    #[test]
    fn test_reference_curve_round_trip(
        slot in 0u8..2,
        words in prop::collection::vec(any::<u32>(), 1..1600),
    ) {
        let samples: Vec<f32> = words.iter().map(|w| f32::from_bits(*w)).collect();
        let mut flash = MockFlash::calibration_region();

        let stored = store_reference(&mut flash, slot, &header(samples.len()), &samples).unwrap();
        prop_assert_eq!(stored, samples.len());

        let mut back = vec![0.0f32; MAX_SAMPLES];
        let (read_header, count) = load_reference(&mut flash, slot, &mut back).unwrap();
        prop_assert_eq!(count, samples.len());
        prop_assert_eq!(read_header, header(samples.len()));
        for (a, b) in samples.iter().zip(&back) {
            prop_assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    /// Writing one slot never disturbs the other.
    #[test]
    fn test_reference_slots_are_independent(
        first in prop::collection::vec(-1.0e6f32..1.0e6, 1..1200),
        second in prop::collection::vec(-1.0e6f32..1.0e6, 1..1200),
    ) {
        let mut flash = MockFlash::calibration_region();
        store_reference(&mut flash, 0, &header(first.len()), &first).unwrap();
        store_reference(&mut flash, 1, &header(second.len()), &second).unwrap();

        let mut back = vec![0.0f32; MAX_SAMPLES];
        let (_, count) = load_reference(&mut flash, 0, &mut back).unwrap();
        prop_assert_eq!(&back[..count], &first[..]);
    }

    /// Reverting the log restores every register, whatever was written in between.
    #[test]
    fn test_undo_restores_registers(
        initial in prop::collection::vec(any::<u16>(), 8),
        changes in prop::collection::vec((0u16..8, any::<u16>(), any::<u16>()), 0..=16),
    ) {
        let pairs: Vec<(u16, u16)> = initial.iter().enumerate().map(|(i, v)| (0x0100 + i as u16, *v)).collect();
        let mut dev = MockFrontEnd::with_registers(&pairs);
        let before = dev.registers();

        let mut log = UndoLog::<16>::new();
        for (offset, value, mask) in changes {
            log.apply(&mut dev, 0x0100 + offset, value, mask).unwrap();
        }
        log.revert(&mut dev).unwrap();
        prop_assert_eq!(dev.registers(), before);
        prop_assert!(log.is_empty());

        // A second revert has nothing left to do.
        dev.clear_writes();
        log.revert(&mut dev).unwrap();
        prop_assert!(dev.writes().is_empty());
    }

    /// Path fields written to a page load back unchanged.
    #[test]
    fn test_record_program_load_round_trip(
        path in 0usize..8,
        baseline in -1.0e3f32..1.0e3,
        rflt in 0.01f32..5.0,
        addr in 0x0100u16..0x0280,
        value in any::<u16>(),
    ) {
        let mut store = CalibrationStore::new(MockFlash::calibration_region());
        let record = store.buffer_mut();
        record.set_path_f32(path, PathField::Baseline, baseline);
        record.set_path_f32(path, PathField::Rflt, rflt);
        record.push_register(addr, value).unwrap();
        let written = *store.buffer().as_words();
        store.program(PageTarget::User).unwrap();

        store.clear_buffer();
        store.load(PageTarget::User).unwrap();
        prop_assert_eq!(store.buffer().as_words(), &written);
        prop_assert_eq!(store.buffer().path_f32(path, PathField::Baseline), Some(baseline));
        prop_assert_eq!(store.buffer().find_register(addr), Some(value));
    }
}

#[test]
fn test_read_reg_sees_reverted_value() {
    let mut dev = MockFrontEnd::with_registers(&[(0x0109, 0x1234)]);
    let mut log = UndoLog::<2>::new();
    log.apply(&mut dev, 0x0109, 0x0000, 0xFFFF).unwrap();
    log.apply(&mut dev, 0x0109, 0x00FF, 0x00FF).unwrap();
    log.revert(&mut dev).unwrap();
    assert_eq!(dev.read_reg(0x0109).unwrap(), 0x1234);
}
