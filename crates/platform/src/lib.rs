//! Hardware Abstraction Layer (HAL) for the PDM player
//!
//! This crate provides the trait seams between the portable playback core
//! and the board it runs on, so the storage driver and the streaming
//! scheduler can be developed and tested without physical hardware.
//!
//! # Architecture Layers
//!
//! ```text
//! Board bring-up (pins, clocks, ISR registration: integrator code)
//!         ↓
//! Feature Layers (sdcard, playback)
//!         ↓
//! Platform HAL (this crate - trait abstractions)
//!         ↓
//! Hardware Layer (embedded-hal implementation for the target MCU)
//! ```
//!
//! # Seams
//!
//! - [`ByteTransport`] - one-byte-for-one-byte SPI exchange plus chip select
//! - [`PeriodicInterrupt`] - the fixed-rate byte-emission interrupt source
//! - [`FatalSink`] - where unrecoverable I/O errors go (halts on hardware)
//! - [`RefillProbe`] - optional debug pin bracketing each sector refill
//!
//! # Features
//!
//! - `std`: Enable standard library support and [`mocks`] (for testing)
//! - `defmt`: Enable defmt logging derives

// ── Lint policy ─────────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)] // no .unwrap() in production code
#![deny(clippy::expect_used)] // no .expect() in production code
#![deny(clippy::panic)] // no panic!() in production code
#![deny(unused_must_use)]
// all Results must be handled
// ────────────────────────────────────────────────────────────────────────────
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod fatal;
pub mod interrupt;
pub mod mocks;
pub mod probe;
pub mod transport;

pub use config::{ConfigError, StreamConfig, SECTOR_SIZE};
pub use fatal::{FatalSink, Halt};
pub use interrupt::PeriodicInterrupt;
pub use probe::{PinProbe, RefillProbe};
pub use transport::{ByteTransport, SpiTransport, SpiTransportError, IDLE_BYTE};
