//! PCM to PDM encoding for the one-bit player
//!
//! - [`modulator`]: the second-order sigma-delta loop
//! - [`encoder`]: priming, sample holding and MSB-first bit packing
//! - [`plan`]: output size, sector count and baud divisor for the device
//!
//! Encoding is deterministic: the same samples, rate and ratio always give
//! the same bytes.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod encoder;
pub mod modulator;
pub mod plan;
pub mod rate;

#[cfg(any(test, feature = "std"))]
pub use encoder::{encode_to_vec, AllocationFailed};
pub use encoder::{encode_into, output_bytes, OutputTooSmall, PdmEncoder};
pub use modulator::SigmaDelta;
pub use plan::{baud_divisor, BaudError, OutputPlan, PlanError};
pub use rate::{Oversampling, SampleRate, ZeroOversampling};
