//! Synchronous bit-banging driver contract
//!
//! A [`SyncDriver`] transports line-word samples to and from the physical
//! bridge. The only requirement beyond ordinary byte-stream semantics is
//! synchrony: for every byte written, exactly one byte eventually becomes
//! available to read, in order. A USB GPIO bridge in synchronous bit-bang
//! mode behaves exactly like this; every output sample it clocks out is
//! paired with one input sample it clocks in.

use std::io;

/// Byte-stream transport for a synchronous bit-banging bridge.
///
/// Methods take `&self` so one driver instance can serve the writer and
/// the reader concurrently; implementations are expected to use interior
/// mutability, the way USB bridge handles already do.
///
/// Implementations must propagate to `read` any error previously surfaced
/// by `write`, so a reader that lags behind a failed writer still learns
/// about the failure.
pub trait SyncDriver {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    ///
    /// May block until samples arrive. Returning `Ok(0)` means the stream
    /// has ended and is treated as a truncation error by callers expecting
    /// more samples.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes up to `buf.len()` bytes, returning how many were accepted.
    fn write(&self, buf: &[u8]) -> io::Result<usize>;

    /// Pushes any buffered written bytes out to the wire.
    fn flush(&self) -> io::Result<()>;

    /// Discards any bytes already waiting on the read side.
    fn purge_read_buffer(&self) -> io::Result<()> {
        Ok(())
    }
}
