//! Ratiometric measurement math for the CN0503: expression evaluation,
//! two-stage filtering, instrument polynomials, alarms and decay fitting.
//!
//! Everything in this crate is pure computation over values handed in by
//! the firmware; nothing here touches the device or flash.
//!
//! ```text
//! ChannelFrame ──► Expression::evaluate ──► block mean ──► WindowRing mean  (ARAT)
//!                                                          │
//!                                      baseline / subtract ▼                (RRAT)
//!                                           Polynomial INS1 ▼               (INS1)
//!                                           Polynomial INS2 ▼ ──► alarm     (INS2)
//! ```
#![cfg_attr(not(test), no_std)]
#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)] // channel ids and hex words in docs

pub mod decay_fit;
pub mod engine;
pub mod expression;
pub mod filter;
pub mod format;
pub mod frame;
pub mod path;
pub mod polynomial;
pub mod rate;

pub use engine::{DisplayMode, FrameOutcome, RatioEngine};
pub use expression::{ChannelSource, Evaluation, Expression, ExpressionError};
pub use frame::{ChannelFrame, FrameError, TimeslotLayout};
pub use path::{AlarmState, OpticalPath, PathConfig};
pub use polynomial::Polynomial;
pub use rate::{OutputRate, RateError};
