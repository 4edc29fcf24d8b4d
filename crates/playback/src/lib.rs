//! Double-buffered PDM streaming
//!
//! Moves a pre-encoded PDM stream from block storage to the serial output
//! one byte per interrupt, without ever letting a storage read stall the
//! output.
//!
//! - [`double_buffer`]: the two sector buffers and their interrupt-side and
//!   foreground-side handles
//! - [`source`]: raw-sector and file-system stream sources
//! - [`player`]: priming, refill scheduling and the terminal stop
//!
//! # Wiring
//!
//! ```ignore
//! static BUFFER: StaticCell<DoubleBuffer> = StaticCell::new();
//!
//! let card = SdCard::init(SpiTransport::new(spi, cs), Halt).map_err(|f| f.error())?;
//! let source = RawSectorSource::new(card, &STREAM);
//! let (player, drain) = Player::prime(BUFFER.init(DoubleBuffer::new()), source, uart_irq, ())?;
//! // hand `drain` to the interrupt handler, which writes `drain.drain_step()`
//! // to the data register on every byte-ready interrupt
//! let report = player.run();
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod double_buffer;
pub mod player;
pub mod source;

pub use double_buffer::{DoubleBuffer, Drain, Refill, Role};
pub use player::{PlaybackReport, Player, PlayerState, StopReason};
#[cfg(any(test, feature = "std"))]
pub use source::IoBlockFile;
pub use source::{BlockFile, FileSource, Flow, RawSectorSource, StreamSource};
