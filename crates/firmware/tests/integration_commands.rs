//! Command-line integration tests: boot on mocks, then drive the instrument
//! through `execute` and `process` the way the UART loop does.
//!
//! Run with: cargo test -p firmware --test integration_commands
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use firmware::boot::boot;
use firmware::Instrument;
use platform::adpd410x::{ts_reg, TS_LED_POW12};
use platform::config::ACQ_DATA_SIZE;
use platform::mocks::{MockFlash, MockFrontEnd, MockIrq};
use platform::ReadyFlag;

type TestInstrument<'a> = Instrument<'a, MockFrontEnd, MockFlash, MockIrq>;

fn booted(ready: &ReadyFlag) -> TestInstrument<'_> {
    let mut inst = Instrument::new(MockFrontEnd::new(), MockFlash::calibration_region(), MockIrq::new(), ready);
    boot(&mut inst).unwrap();
    inst
}

fn run(inst: &mut TestInstrument<'_>, line: &str) -> String {
    let mut out = String::new();
    inst.execute(line, &mut out).unwrap();
    out
}

fn poll(inst: &mut TestInstrument<'_>) -> String {
    let mut out = String::new();
    inst.process(&mut out).unwrap();
    out
}

// ─── Impulse response ────────────────────────────────────────────────────────

#[test]
fn test_impresp_collects_one_burst_and_restores_device() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    let before = inst.device().registers();

    let out = run(&mut inst, "IMPRESP 1 10 50 2 IMP");
    assert_eq!(
        out,
        "RESP: IMPRESP CH=1 LED=10 ACQ=50.00000 PER=2.00000 METHOD=IMP AVG=1 START=0 NB=26\n"
    );
    assert!(inst.session().is_some());
    assert!(inst.irq().is_enabled());

    // Nothing happens until the FIFO threshold interrupt fires.
    assert_eq!(poll(&mut inst), "");

    let codes: Vec<u32> = (0..26).map(|i| 1000 + i).collect();
    inst.device_mut().push_fifo_codes(&codes, ACQ_DATA_SIZE);
    ready.set();
    let out = poll(&mut inst);

    let mut lines = out.lines();
    let data = lines.next().unwrap();
    assert!(data.starts_with("DATF: "));
    let values: Vec<&str> = data["DATF: ".len()..].split_whitespace().collect();
    assert_eq!(values.len(), 26);
    assert_eq!(values[0], "1.0000E+03");
    assert_eq!(values[25], "1.0250E+03");
    assert_eq!(lines.next(), Some("RESP: IMPRESP DONE"));

    assert!(inst.session().is_none());
    assert!(!inst.irq().is_enabled());
    assert_eq!(inst.device().registers(), before, "streaming configuration restored");
}

#[test]
fn test_commands_rejected_while_acquiring() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    run(&mut inst, "IMPRESP 1 10 50 2 IMP");

    assert_eq!(run(&mut inst, "REG 0x105 0x0"), "ERROR: device busy.\n");
    assert_eq!(run(&mut inst, "STREAM"), "ERROR: device busy.\n");
    assert_eq!(run(&mut inst, "IMPRESP 1 10 50 2 IMP"), "ERROR: device busy.\n");

    assert_eq!(run(&mut inst, "ABORT"), "RESP: ABORT\n");
    assert!(inst.session().is_none());
    assert_eq!(run(&mut inst, "ABORT"), "ERROR: no acquisition in progress.\n");
}

#[test]
fn test_impresp_reports_clamps() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    let out = run(&mut inst, "IMPRESP 1 10 300 2 IMP");
    assert!(out.contains("NB=128\n"));
    assert!(out.ends_with("INFO: samples clamped to 128\n"));
    run(&mut inst, "ABORT");
}

#[test]
fn test_bad_acquisition_arguments() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    assert_eq!(run(&mut inst, "IMPRESP 1 10 50 2 XYZ"), "ERROR invalid arguments.\n");
    assert_eq!(run(&mut inst, "FLUO7 1 10 50 2 TIA"), "ERROR invalid arguments.\n");
    assert!(inst.session().is_none());
}

// ─── Fluorescence decay ──────────────────────────────────────────────────────

/// Feed one code per TIA cycle and collect everything the instrument prints.
fn run_cycles(inst: &mut TestInstrument<'_>, ready: &ReadyFlag, codes: &[u32]) -> String {
    let mut out = String::new();
    for code in codes {
        inst.device_mut().push_fifo_codes(&[*code], ACQ_DATA_SIZE);
        ready.set();
        out.push_str(&poll(inst));
    }
    out
}

fn decay_codes(offset: f32) -> Vec<u32> {
    (0..26)
        .map(|i| {
            let t = 2.0 * i as f32;
            (offset + 4000.0 * (-t / 8.0).exp()).round() as u32
        })
        .collect()
}

fn fit_field(line: &str, key: &str) -> f32 {
    let start = line.find(key).unwrap() + key.len();
    line[start..].split_whitespace().next().unwrap().parse().unwrap()
}

#[test]
fn test_fluorescence_reference_then_fit() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    let before = inst.device().registers();

    assert_eq!(
        run(&mut inst, "FLUOCAL0 FLUO TIA"),
        "RESP: FLUOCAL0 CH=1 LED=10 ACQ=50.00000 PER=2.00000 METHOD=TIA AVG=1 START=0 NB=26\n"
    );
    let out = run_cycles(&mut inst, &ready, &[100; 26]);
    assert_eq!(out, "RESP: FLUOCAL0 DONE N=26\n");
    assert!(inst.session().is_none());
    assert_eq!(inst.device().registers(), before);

    assert!(run(&mut inst, "FLUO0 FLUO TIA").starts_with("RESP: FLUO0 CH=1 "));
    let out = run_cycles(&mut inst, &ready, &decay_codes(150.0));
    let mut lines = out.lines();

    // The flat reference is subtracted before the samples are printed.
    let data = lines.next().unwrap();
    let values: Vec<f32> = data["DATF: ".len()..]
        .split_whitespace()
        .map(|v| v.parse().unwrap())
        .collect();
    assert_eq!(values.len(), 26);
    assert!((values[0] - 4050.0).abs() < 1.0);

    let fit = lines.next().unwrap();
    assert!(fit.starts_with("RESP: FLUO0 TAU="), "{fit}");
    assert!((fit_field(fit, "TAU=") - 8.0).abs() < 0.5);
    assert!((fit_field(fit, "OFFSET=") - 50.0).abs() < 15.0);
    assert!((fit_field(fit, "SCALE=") - 4000.0).abs() < 100.0);
    assert!(fit_field(fit, "ERR=") >= 0.0);
    assert_eq!(lines.next(), None);

    assert!(inst.session().is_none());
    assert!(!inst.irq().is_enabled());
    assert_eq!(inst.device().registers(), before);
}

#[test]
fn test_fluorescence_without_reference() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);

    run(&mut inst, "FLUO1 FLUO TIA");
    let out = run_cycles(&mut inst, &ready, &decay_codes(150.0));
    assert_eq!(out, "ERROR: FLUO1 not calibrated.\n");
    assert!(inst.session().is_none());

    // NOCALIB fits the raw curve, offset included.
    run(&mut inst, "FLUO1 FLUO TIA NOCALIB");
    let out = run_cycles(&mut inst, &ready, &decay_codes(150.0));
    let fit = out.lines().find(|l| l.starts_with("RESP: FLUO1 TAU=")).unwrap();
    assert!((fit_field(fit, "TAU=") - 8.0).abs() < 0.5);
    assert!((fit_field(fit, "OFFSET=") - 150.0).abs() < 15.0);
}

// ─── Streaming ───────────────────────────────────────────────────────────────

#[test]
fn test_ratmask_limits_ratio_line() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);

    assert_eq!(run(&mut inst, "MODE?"), "RESP: MODE?=ARAT\n");
    assert_eq!(run(&mut inst, "RATMASK 0x3"), "RESP: RATMASK 0x3\n");
    assert_eq!(run(&mut inst, "RATMASK?"), "RESP: RATMASK?=3\n");
    run(&mut inst, "ODR 5");
    assert_eq!(run(&mut inst, "STREAM"), "STREAM: RAT0 RAT1 \n");

    // Four dual slots: eight 4-byte codes per frame.
    let frame: Vec<u32> = [3000, 4000].repeat(4);
    let mut line = None;
    for _ in 0..200 {
        inst.device_mut().push_fifo_codes(&frame, 4);
        let out = poll(&mut inst);
        if let Some(found) = out.lines().find(|l| l.starts_with("DATF: ")) {
            line = Some(found.to_owned());
            break;
        }
    }
    let line = line.expect("a ratio line within 200 frames");
    assert_eq!(line["DATF: ".len()..].split_whitespace().count(), 2);

    assert_eq!(run(&mut inst, "IDLE 1"), "RESP: IDLE 1\n");
    assert_eq!(run(&mut inst, "IDLE?"), "RESP: IDLE?=1\n");
}

#[test]
fn test_code_stream_counts_down() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    run(&mut inst, "MODE CODE");
    assert_eq!(run(&mut inst, "STREAM 2"), "STREAM: A1 A2 B1 B2 C1 C2 D1 D2 \n");

    let frame: Vec<u32> = (1..=8).collect();
    let mut printed = 0;
    for _ in 0..4 {
        inst.device_mut().push_fifo_codes(&frame, 4);
        let out = poll(&mut inst);
        if out.starts_with("DATI: ") {
            assert_eq!(out, "DATI: 1 2 3 4 5 6 7 8 \n");
            printed += 1;
        }
    }
    assert_eq!(printed, 2);
}

// ─── Registers and presets ───────────────────────────────────────────────────

#[test]
fn test_register_access() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    assert_eq!(run(&mut inst, "REG 0x105 0x1234"), "RESP: REG 0x105 0x1234\n");
    assert_eq!(run(&mut inst, "reg? 0x105"), "RESP: REG? 0x105=1234\n");
    assert_eq!(inst.device().reg(ts_reg(0, TS_LED_POW12)), 0x1234);
    assert_eq!(run(&mut inst, "NOPE"), "ERROR: unknown command.\n");
}

#[test]
fn test_preset_then_define() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    let out = run(&mut inst, "CHANN1 COLO");
    assert!(out.ends_with("RESP: CHANN1 COLORIMETRY/ABSORBANCE\n"));
    assert_eq!(run(&mut inst, "DEF0? SUBE"), "RESP: DEF0? SUBE=1\n");
    assert_eq!(run(&mut inst, "DEF0? ARAT"), "RESP: DEF0? ARAT=A1#2048-A2#2048-/\n");
}

// ─── Calibration store ───────────────────────────────────────────────────────

#[test]
fn test_calibration_round_trip_through_flash() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);

    assert_eq!(run(&mut inst, "FL_CLEARBUF"), "RESP: FL_CLEARBUF\n");
    assert_eq!(run(&mut inst, "FL_WRITE DEF2 RATB 3.5"), "RESP: FL_WRITE DEF 2 RATB 3.50000\n");
    assert_eq!(run(&mut inst, "FL_WRITE REG 0x125 0x40"), "RESP: FL_WRITE REG 125 40\n");
    assert_eq!(run(&mut inst, "FL_WRITE MODE RRAT"), "RESP: FL_WRITE MODE RRAT\n");
    assert_eq!(run(&mut inst, "FL_PROGRAM 0"), "RESP: FL_PROGRAM 0\n");

    run(&mut inst, "FL_CLEARBUF");
    assert_eq!(run(&mut inst, "FL_READ DEF2 RATB"), "RESP: FL_READ DEF2 RATB=N/A\n");
    assert_eq!(run(&mut inst, "FL_LOAD 0"), "RESP: FL_LOAD 0\n");
    assert_eq!(run(&mut inst, "FL_READ DEF2 RATB"), "RESP: FL_READ DEF2 RATB=3.50000\n");
    assert_eq!(run(&mut inst, "FL_READ REG? 0x125"), "RESP: FL_READ REG? 0X125=40\n");

    assert_eq!(run(&mut inst, "FL_APPLY"), "RESP: FL_APPLY\n");
    assert_eq!(run(&mut inst, "RZ2?"), "RESP: RZ2?=3.50000\n");
    assert_eq!(run(&mut inst, "MODE?"), "RESP: MODE?=RRAT\n");
    assert_eq!(inst.device().reg(0x125), 0x40);

    // Survives a reboot: UU is applied after MD.
    boot(&mut inst).unwrap();
    assert_eq!(run(&mut inst, "RZ2?"), "RESP: RZ2?=3.50000\n");
}

#[test]
fn test_manufacturer_page_is_locked() {
    let ready = ReadyFlag::new();
    let mut inst = booted(&ready);
    assert_eq!(run(&mut inst, "FL_PROGRAM 1234"), "Access denied.\n");
    assert_eq!(run(&mut inst, "FL_ERASE"), "Argument error.\n");
    assert_eq!(run(&mut inst, "FL_LOAD 7"), "Argument error.\n");
}
