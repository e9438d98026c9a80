//! CN0503 optical instrument firmware
//!
//! Measurement and calibration pipeline for the CN0503 optical evaluation
//! board: ratio streaming, impulse-response and fluorescence-decay
//! acquisitions, and the flash-backed calibration store.
//!
//! # Architecture
//!
//! This firmware follows a layered architecture:
//!
//! ```text
//! Command line (cli: one text line in, response lines out)
//!         ↓
//! Instrument (pipeline state, stream output, session ownership)
//!         ↓
//! Calibration store / Acquisition session / LED calibration
//!         ↓
//! optics (pure ratio and fit math)   platform (register map, contracts)
//!         ↓
//! Drivers (ADPD410x over I²C), flash controller, GPIO interrupt
//! ```
//!
//! The hardware binary only wires concrete peripherals into
//! [`instrument::Instrument`], then loops over
//! [`Instrument::process`](instrument::Instrument::process) and
//! [`Instrument::execute`](instrument::Instrument::execute).
//!
//! # Features
//!
//! - `defmt` - Log through defmt (hardware builds)
//! - `std` - Log through tracing and enable the platform mocks (host builds)

#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
// Upgrade relevant warns to deny; keep pedantic as warn (too noisy for firmware)
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
// unsafe fn body is not implicitly unsafe block
// Logging discipline (allow println in tests via clippy.toml)
#![warn(clippy::print_stdout)] // prefer tracing/defmt over println! in lib code
#![warn(clippy::dbg_macro)] // dbg! should not be left in committed code
// Intentional allows for this codebase:
#![allow(clippy::module_name_repetitions)] // common in Rust crates; not a real issue
#![allow(clippy::missing_errors_doc)] // most errors are self-explanatory
// Pedantic lints too noisy for firmware application code:
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::similar_names)]

#[cfg(all(feature = "std", not(test)))]
extern crate std;

#[macro_use]
mod log;

pub mod acquisition;
pub mod boot;
pub mod calibration;
pub mod cli;
pub mod drivers;
pub mod instrument;
pub mod led_cal;
pub mod preset;

// Re-export key types
pub use acquisition::{AcquisitionPlan, AcquisitionRequest, Method, Session, SessionError};
pub use calibration::{CalibrationRecord, CalibrationStore, PageTarget, StoreError};
pub use cli::CommandError;
pub use drivers::adpd410x::Adpd410x;
pub use instrument::{Instrument, Settings};
