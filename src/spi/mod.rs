//! SPI master built on line-word sample streams
//!
//! - **[`mode`]**: mode flags, master configuration, and the derived
//!   clock-level encoding state
//! - **`encode`**: per-byte line-word encoding and decoding
//! - **`coord`**: the bounded directive channel coordinating the writer
//!   and the reader
//! - **[`master`]**: the transaction API and the concurrent read path

pub(crate) mod coord;
pub(crate) mod encode;
pub mod master;
pub mod mode;

pub use master::{Master, Segment, Transaction};
pub use mode::{BitOrder, Config, Mode};
