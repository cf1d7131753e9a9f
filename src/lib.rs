//! Bit-banged SPI master over synchronous byte-stream drivers
//!
//! This library implements the master side of the Serial Peripheral
//! Interface protocol by *bit banging*: instead of driving real clock and
//! data lines it encodes every SPI bit as two samples of a byte-wide line
//! word and hands the samples to a synchronous driver, typically a
//! USB-attached GPIO bridge such as an FT2232 in MPSSE-like mode.
//! Reception is the inverse: the driver returns a stream of line-word
//! samples and the master recovers data bytes by sampling the correct
//! clock edge.
//!
//! # Architecture
//!
//! - **[`SyncDriver`]**: the byte-stream contract: for every byte written,
//!   exactly one byte eventually becomes readable, in order
//! - **[`Mode`] / [`Config`]**: CPOL/CPHA/bit-order selection plus framing
//!   and inter-frame delay
//! - **[`Master`]**: the encoder, framing engine, and the bounded
//!   coordination channel that lets a writer thread run ahead of a
//!   concurrent reader thread
//! - **[`DebugDriver`]**: a diagnostic driver that pretty-prints line words
//!   instead of talking to hardware
//!
//! # Example
//!
//! ```no_run
//! use bitbang::{Config, Master, Mode, SyncDriver};
//!
//! # fn open_bridge() -> impl SyncDriver + Sync { bitbang::DebugDriver::new(std::io::sink()) }
//! let master = Master::new(open_bridge(), 0x01, 0x10, 0x08);
//! master.configure(Config { mode: Mode::M00, frame_len: 1, delay: 0 });
//!
//! // Read a JEDEC id: one command byte, three response bytes.
//! let mut reply = [0u8; 4];
//! master.write_read(&[0x9f, 0, 0, 0], &mut reply)?;
//! let id = &reply[1..];
//! # let _ = id;
//! # Ok::<(), bitbang::Error>(())
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;

pub mod debug;
pub mod driver;
pub mod spi;

pub use debug::DebugDriver;
pub use driver::SyncDriver;
pub use spi::master::{Master, Segment, Transaction, DEFAULT_CAPACITY, MAX_PRE_POST, SAMPLES_PER_BYTE};
pub use spi::mode::{BitOrder, Config, Mode, ParseModeError, MAX_DELAY};

/// Errors surfaced by transaction and read operations.
///
/// Misuse of the API (overlapping line masks, out-of-range configuration,
/// oversized pre/post sequences) is a programmer error and panics instead
/// of being returned.
///
/// The type is `Clone` because a write-side failure is latched and then
/// reported to every party that observes it: the failing write call, the
/// concurrent reader once it drains the coordination channel, and any
/// later attempt to open a transaction.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The underlying driver failed on `read`, `write`, or `flush`.
    #[error("driver I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The driver reported end-of-stream in the middle of a decode window
    /// or an overhead run.
    #[error("short read from driver (unexpected end of stream)")]
    UnexpectedEof,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
