//! Diagnostic driver that pretty-prints line words
//!
//! [`DebugDriver`] satisfies the [`SyncDriver`] contract without any
//! hardware behind it: every written byte is rendered as eight
//! tab-separated `0`/`1` bit glyphs (most significant bit first) followed
//! by the hex value, one line word per line. Reads return no data, so it
//! is only useful for inspecting the write side of a transaction.

use std::io::{self, Write};
use std::sync::Mutex;

use crate::driver::SyncDriver;

/// Write-side formatter implementing [`SyncDriver`].
///
/// The inner writer sits behind a mutex to satisfy the `&self` driver
/// contract.
pub struct DebugDriver<W> {
    out: Mutex<W>,
}

impl<W: Write> DebugDriver<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Consumes the driver and returns the inner writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap()
    }
}

impl<W: Write> SyncDriver for DebugDriver<W> {
    fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        let mut out = self.out.lock().unwrap();
        for &word in data {
            for bit in (0..8).rev() {
                write!(out, "{}\t", (word >> bit) & 1)?;
            }
            writeln!(out, "{:02x}", word)?;
        }
        Ok(data.len())
    }

    fn flush(&self) -> io::Result<()> {
        self.out.lock().unwrap().flush()
    }
}
