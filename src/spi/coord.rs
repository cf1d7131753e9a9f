//! Writer/reader coordination channel
//!
//! The driver is synchronous: every byte the writer hands it produces
//! exactly one byte on the read side. The writer therefore describes each
//! run of bytes it emits with a [`Directive`], queued on a bounded channel
//! in emission order. The reader consumes directives strictly in order and
//! advances the driver's read side in lock-step, so it can reconstruct the
//! exact boundary between encoded data windows and overhead bytes.
//!
//! Closing the channel (dropping the send side) is the sole end-of-stream
//! signal; the writer only does so after latching the error that caused
//! it, which the reader then reports.

use crossbeam_channel::Receiver;
use tracing::trace;

/// One instruction to the read side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Directive {
    /// The next 16 driver bytes are one encoded data byte; decode it.
    Decode,
    /// The next `n` driver bytes are overhead (pre/post sequences, idle
    /// bracketing, inter-frame delay); discard them.
    Skip(u8),
    /// Transaction boundary. Lets an empty read return after draining
    /// overhead.
    FlushMark,
}

/// Receive side of the coordination channel.
///
/// Wraps the channel with a one-slot putback buffer (an empty read that
/// runs into a data directive must leave it for the next real read) and
/// caches the closed state so every access after closure reports it
/// immediately.
pub(crate) struct DirectiveQueue {
    rx: Receiver<Directive>,
    pending: Option<Directive>,
    closed: bool,
}

impl DirectiveQueue {
    pub fn new(rx: Receiver<Directive>) -> Self {
        Self {
            rx,
            pending: None,
            closed: false,
        }
    }

    /// Blocking receive. Returns `None` once the write side has closed the
    /// channel after latching an error.
    pub fn next(&mut self) -> Option<Directive> {
        if let Some(d) = self.pending.take() {
            return Some(d);
        }
        if self.closed {
            return None;
        }
        match self.rx.recv() {
            Ok(d) => Some(d),
            Err(_) => {
                trace!("coordination channel closed");
                self.closed = true;
                None
            }
        }
    }

    /// Pushes a directive back so the next [`next`](Self::next) returns it.
    pub fn put_back(&mut self, d: Directive) {
        debug_assert!(self.pending.is_none(), "putback slot already occupied");
        self.pending = Some(d);
    }
}
