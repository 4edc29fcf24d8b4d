//! SPI-mode block storage driver
//!
//! Brings a card from power-up to ready and moves 512-byte sectors over any
//! [`platform::ByteTransport`]. Two error paths, kept apart on purpose:
//!
//! - bring-up failures come back from [`SdCard::init`] as an [`InitError`];
//! - steady-state sector I/O failures go to the injected
//!   [`platform::FatalSink`] from [`SdCard::read_sector`] and
//!   [`SdCard::write_sector`]. The `try_*` variants return them instead.
//!
//! With the `std` feature the [`sim`] module provides [`sim::SimCard`], a
//! byte-accurate simulated card for host-side tests.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]

pub mod command;
pub mod driver;
pub mod error;

#[cfg(any(test, feature = "std"))]
pub mod sim;

pub use command::Command;
pub use driver::{InitFailure, SdCard, Sector, CMD0_ATTEMPTS, COMMAND_GAP_BYTES, POWER_UP_IDLE_BYTES};
pub use error::{InitError, IoError};
