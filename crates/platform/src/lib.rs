//! Board abstraction layer for the CN0503 optical evaluation board
//!
//! This crate provides the hardware contracts the measurement pipeline is
//! written against, so the pipeline can be developed and tested without the
//! physical board.
//!
//! # Architecture Layers
//!
//! ```text
//! Application Layer (firmware crate: instrument, calibration, acquisition)
//!         ↓
//! Pure computation (optics crate: ratios, filters, decay fit)
//!         ↓
//! Board contracts (this crate: register map, traits, constants)
//!         ↓
//! Hardware Layer (ADPD410x over I²C, GPIO interrupt, on-chip flash)
//! ```
//!
//! # Contracts
//!
//! - [`OpticalFrontEnd`] - register and FIFO access to the photometric front end
//! - [`DataReadyIrq`] - the edge-triggered FIFO-threshold interrupt line
//! - [`ReadyFlag`] - the single-writer/single-reader flag the interrupt sets
//! - [`embedded_storage::nor_flash::NorFlash`] - calibration pages (re-used as is)
//!
//! # Features
//!
//! - `std`: Enable the host-side mocks in [`mocks`]
//! - `defmt`: Enable `defmt::Format` derives

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(clippy::unreachable)] // no unreachable!() that isn't documented
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)] // unsafe fn body is not implicitly unsafe block
#![warn(clippy::print_stdout)] // prefer defmt/tracing over println! in lib code
// Pedantic lints suppressed for this hardware crate:
#![allow(clippy::doc_markdown)] // hex addresses and register names in doc comments
#![allow(clippy::must_use_candidate)] // hardware accessors: callers decide
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

#[cfg(all(feature = "std", not(test)))]
extern crate std;

pub mod adpd410x;
pub mod config;
pub mod front_end;
pub mod mocks;
pub mod ready;

pub use front_end::{DataReadyIrq, OpMode, OpticalFrontEnd};
pub use ready::ReadyFlag;
