//! Architecture boundary tests.
//!
//! Each test names types from one layer only. If a lower crate accidentally
//! depended on a higher one, this integration test binary would fail to link
//! (circular dependency), so compiling these tests is itself the check.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

/// The board contracts are reachable without any firmware type.
#[test]
fn test_platform_contracts_are_independent() {
    fn _assert_front_end<T: platform::OpticalFrontEnd>() {}
    fn _assert_irq<T: platform::DataReadyIrq>() {}
    _assert_front_end::<platform::mocks::MockFrontEnd>();
    _assert_irq::<platform::mocks::MockIrq>();
}

/// The ratio math runs on plain values, with no device or flash in sight.
#[test]
fn test_optics_is_pure_computation() {
    use optics::{ChannelFrame, Evaluation, Expression};

    let expr = Expression::parse("A1#2048-A2#2048-/").unwrap();
    let mut codes = [0u32; platform::config::CHANNEL_COUNT];
    codes[0] = 4096;
    codes[1] = 3072;
    let frame = ChannelFrame::from_codes(codes);
    assert_eq!(expr.evaluate(&frame), Evaluation::Value(2.0));
}

/// Production manifests keep std-only crates behind features or dev-deps.
#[test]
fn test_no_std_only_dependencies_in_production_manifests() {
    let manifests = [
        ("platform", include_str!("../../platform/Cargo.toml")),
        ("optics", include_str!("../../optics/Cargo.toml")),
        ("firmware", include_str!("../Cargo.toml")),
    ];
    for (name, manifest) in manifests {
        let production = manifest.split("[dev-dependencies]").next().unwrap_or("");
        for forbidden in ["proptest", "embedded-hal-mock", "tracing-subscriber", "tokio"] {
            assert!(
                !production.contains(forbidden),
                "{name} must not pull {forbidden} into production builds"
            );
        }
    }
}

/// Lower layers never name the firmware crate.
#[test]
fn test_lower_layers_do_not_depend_on_firmware() {
    for manifest in [
        include_str!("../../platform/Cargo.toml"),
        include_str!("../../optics/Cargo.toml"),
    ] {
        assert!(!manifest.contains("firmware"));
    }
    assert!(!include_str!("../../platform/Cargo.toml").contains("optics"));
}

/// Every feature a manifest forwards must exist in the target crate.
#[test]
fn test_forwarded_features_exist() {
    let optics = include_str!("../../optics/Cargo.toml");
    let firmware = include_str!("../Cargo.toml");
    assert!(!optics.contains("\nstd ="), "optics has nothing to gate on std");
    assert!(!firmware.contains("optics/std"));
    assert!(firmware.contains("\"optics/defmt\""));
    assert!(optics.contains("\ndefmt ="));
}

/// clippy.toml must keep the stack-array threshold at 512 bytes.
#[test]
fn test_clippy_array_size_threshold_512() {
    let clippy_toml = include_str!("../../../clippy.toml");
    let line = clippy_toml
        .lines()
        .find(|l| l.starts_with("array-size-threshold"))
        .expect("clippy.toml sets array-size-threshold");
    assert!(line.contains("512"), "found: {line}");
}

/// Fluorescence completion keeps its reference scratch in the instrument,
/// not in a stack temporary.
#[test]
fn test_reference_scratch_not_on_stack() {
    let instrument_rs = include_str!("../src/instrument.rs");
    assert!(instrument_rs.contains("reference: Vec<f32, ACQ_MAX_SAMPLES>"));
    assert!(!instrument_rs.contains("[0.0f32; ACQ_MAX_SAMPLES]"));
}
