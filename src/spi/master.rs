//! Transaction API and concurrent read path
//!
//! A [`Master`] serializes data bytes into line-word samples for a
//! [`SyncDriver`] and recovers received bytes from the sample stream the
//! driver returns. Because the driver is synchronous (one readable byte
//! per written byte) the write and read sides must agree byte-for-byte on
//! which driver bytes are encoded data and which are overhead. That
//! agreement travels over a bounded directive channel (the `coord`
//! module), which also lets the writer run ahead of a reader on another
//! thread without unbounded buffering.
//!
//! Flow of one transaction:
//!   1. [`Master::begin`] takes the write-side mutex and emits the `pre`
//!      sequence plus, for CPHA1, one idle sample
//!   2. [`Transaction`] write calls encode data bytes and insert
//!      inter-frame delays
//!   3. [`Transaction::end`] emits the CPHA0 idle sample and the `post`
//!      sequence, marks the flush boundary, and flushes the driver
//!
//! [`Master::read`] and [`Master::read_n`] may run on a different thread
//! at any point during this; [`Master::write_read`] runs both halves
//! concurrently itself.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, trace};

use super::coord::{Directive, DirectiveQueue};
use super::encode::{decode_byte, encode_byte};
use super::mode::{BitOrder, Config, Encoding, MAX_DELAY};
use crate::driver::SyncDriver;
use crate::{Error, Result};

pub use super::encode::SAMPLES_PER_BYTE;

/// Maximum length of the `pre` and `post` byte sequences.
pub const MAX_PRE_POST: usize = 16;

/// Default capacity of the coordination channel, in directives.
///
/// Sized for a bridge with a 4 KiB write buffer: one directive covers one
/// 16-sample window, so the writer can fill the buffer before the reader
/// has to drain anything.
pub const DEFAULT_CAPACITY: usize = 256;

// ────────────────────────────────────────────────────────────────────────────
// Master
// ────────────────────────────────────────────────────────────────────────────

/// Write-side state, guarded by the transaction mutex.
struct WriteSide {
    /// Coordination send side; dropped (closing the channel) once a write
    /// error has been latched.
    tord: Option<Sender<Directive>>,
    enc: Encoding,
    frame_len: usize,
    delay: usize,
    /// Data bytes emitted in the current frame, in `[0, frame_len]`.
    fill: usize,
    pre: Vec<u8>,
    post: Vec<u8>,
    base: u8,
}

/// Read-side state, guarded by its own mutex so readers serialize without
/// touching the transaction mutex.
struct ReadSide {
    tord: DirectiveQueue,
    window: [u8; SAMPLES_PER_BYTE],
}

/// SPI master bit-banging over a [`SyncDriver`].
///
/// `sclk`, `mosi` and `miso` are the line-word bit masks of the three SPI
/// lines; any other bits of each sample hold the level configured with
/// [`set_base`](Master::set_base). Two threads may use a master
/// concurrently: one driving transactions, one consuming
/// [`read`](Master::read) / [`read_n`](Master::read_n).
pub struct Master<D> {
    drv: D,
    sclk: u8,
    mosi: u8,
    miso: u8,
    /// Bit order sampled by the reader. Updated by `configure`, which is
    /// barred while a transaction is active, so no transaction spans a
    /// reconfiguration.
    lsbf: AtomicBool,
    /// First write-side error; set once, read by the reader after it
    /// observes channel closure and by later `begin` calls.
    werr: Mutex<Option<Error>>,
    wr: Mutex<WriteSide>,
    rd: Mutex<ReadSide>,
}

impl<D: SyncDriver> Master<D> {
    /// Creates a master with the [`DEFAULT_CAPACITY`] coordination channel.
    ///
    /// # Panics
    ///
    /// Panics if the `sclk` and `mosi` masks overlap.
    pub fn new(drv: D, sclk: u8, mosi: u8, miso: u8) -> Self {
        Self::with_capacity(drv, sclk, mosi, miso, DEFAULT_CAPACITY)
    }

    /// Creates a master whose writer may run at most `capacity` directives
    /// ahead of the reader. A good value is the driver's write buffer size
    /// divided by [`SAMPLES_PER_BYTE`].
    ///
    /// # Panics
    ///
    /// Panics if the `sclk` and `mosi` masks overlap.
    pub fn with_capacity(drv: D, sclk: u8, mosi: u8, miso: u8, capacity: usize) -> Self {
        assert!(sclk & mosi == 0, "sclk and mosi masks overlap");
        let (tx, rx) = bounded(capacity);
        let cfg = Config::default();
        Self {
            drv,
            sclk,
            mosi,
            miso,
            lsbf: AtomicBool::new(false),
            werr: Mutex::new(None),
            wr: Mutex::new(WriteSide {
                tord: Some(tx),
                enc: Encoding::derive(cfg.mode, sclk),
                frame_len: cfg.frame_len,
                delay: cfg.delay,
                fill: 0,
                pre: Vec::new(),
                post: Vec::new(),
                base: 0,
            }),
            rd: Mutex::new(ReadSide {
                tord: DirectiveQueue::new(rx),
                window: [0; SAMPLES_PER_BYTE],
            }),
        }
    }

    /// Applies a new configuration. Typically called before talking to a
    /// slave device that needs a different mode or framing.
    ///
    /// Must not be called while a transaction is active; the call blocks
    /// until the transaction mutex is free (and deadlocks if the caller
    /// itself holds the transaction).
    ///
    /// # Panics
    ///
    /// Panics when `cfg.frame_len == 0` or `cfg.delay > `[`MAX_DELAY`].
    pub fn configure(&self, cfg: Config) {
        cfg.validate();
        let mut wr = self.wr.lock().unwrap();
        wr.enc = Encoding::derive(cfg.mode, self.sclk);
        wr.frame_len = cfg.frame_len;
        wr.delay = cfg.delay;
        self.lsbf
            .store(cfg.mode.order == BitOrder::LsbFirst, Ordering::Relaxed);
        debug!(
            "configured mode {} frame_len {} delay {}",
            cfg.mode, cfg.frame_len, cfg.delay
        );
    }

    /// Sets the byte sequences written verbatim at the start and end of
    /// every transaction, before the idle bracketing. Typically these are
    /// chip-select commands understood by the bridge.
    ///
    /// Must not be called while a transaction is active.
    ///
    /// # Panics
    ///
    /// Panics when either sequence exceeds [`MAX_PRE_POST`] bytes.
    pub fn set_pre_post(&self, pre: &[u8], post: &[u8]) {
        assert!(
            pre.len() <= MAX_PRE_POST,
            "pre sequence exceeds {} bytes",
            MAX_PRE_POST
        );
        assert!(
            post.len() <= MAX_PRE_POST,
            "post sequence exceeds {} bytes",
            MAX_PRE_POST
        );
        let mut wr = self.wr.lock().unwrap();
        wr.pre = pre.to_vec();
        wr.post = post.to_vec();
    }

    /// Sets the background byte OR-ed into every emitted line word, giving
    /// bits outside the sclk/mosi masks a caller-defined level.
    ///
    /// Must not be called while a transaction is active.
    pub fn set_base(&self, base: u8) {
        self.wr.lock().unwrap().base = base;
    }

    /// Opens a transaction, taking exclusive write access until
    /// [`Transaction::end`] (or the guard is dropped). Writes the `pre`
    /// sequence and, for CPHA1, one idle sample.
    ///
    /// Fails immediately when an earlier write error has been latched.
    pub fn begin(&self) -> Result<Transaction<'_, D>> {
        let wr = self.wr.lock().unwrap();
        if let Some(err) = self.werr.lock().unwrap().clone() {
            debug!("transaction rejected, write side already failed: {}", err);
            return Err(err);
        }
        let mut txn = Transaction { ma: self, wr };
        txn.wr.fill = 0;
        txn.open()?;
        debug!("transaction opened");
        Ok(txn)
    }

    // ── Read path ───────────────────────────────────────────────────────

    /// Reads decoded SPI bytes into `data`, in lock-step with the
    /// directive stream produced by the writer.
    ///
    /// With an empty `data` this instead drains overhead: it discards
    /// driver bytes up to the next encoded byte (left pending for the next
    /// read) or flush boundary, then returns `Ok(0)`.
    ///
    /// Blocks until the writer has produced enough bytes. If the write
    /// side fails mid-read, bytes decoded so far are returned as a short
    /// `Ok(n)` and the next call reports the latched error.
    pub fn read(&self, data: &mut [u8]) -> Result<usize> {
        let mut rd = self.rd.lock().unwrap();
        if data.is_empty() {
            self.drain_overhead(&mut rd)?;
            return Ok(0);
        }
        let lsbf = self.lsbf.load(Ordering::Relaxed);
        let mut filled = 0;
        while filled < data.len() {
            match rd.tord.next() {
                None => {
                    if filled > 0 {
                        return Ok(filled);
                    }
                    return Err(self.latched());
                }
                Some(Directive::FlushMark) => continue,
                Some(Directive::Skip(n)) => self.discard(&mut rd, n.into())?,
                Some(Directive::Decode) => {
                    let rd = &mut *rd;
                    read_full(&self.drv, &mut rd.window)?;
                    data[filled] = decode_byte(&rd.window, self.miso, lsbf);
                    trace!("decoded {:#04x}", data[filled]);
                    filled += 1;
                }
            }
        }
        Ok(filled)
    }

    /// Reads and discards `n` decoded bytes, still consuming their sample
    /// windows so the driver stream stays aligned.
    pub fn read_n(&self, n: usize) -> Result<usize> {
        let mut rd = self.rd.lock().unwrap();
        let mut done = 0;
        while done < n {
            match rd.tord.next() {
                None => {
                    if done > 0 {
                        return Ok(done);
                    }
                    return Err(self.latched());
                }
                Some(Directive::FlushMark) => continue,
                Some(Directive::Skip(k)) => self.discard(&mut rd, k.into())?,
                Some(Directive::Decode) => {
                    let rd = &mut *rd;
                    read_full(&self.drv, &mut rd.window)?;
                    done += 1;
                }
            }
        }
        Ok(done)
    }

    fn drain_overhead(&self, rd: &mut ReadSide) -> Result<()> {
        loop {
            match rd.tord.next() {
                None => return Err(self.latched()),
                Some(Directive::FlushMark) => return Ok(()),
                Some(Directive::Skip(n)) => self.discard(rd, n.into())?,
                Some(d @ Directive::Decode) => {
                    // Encoded data is pending; leave it for a real read.
                    rd.tord.put_back(d);
                    return Ok(());
                }
            }
        }
    }

    fn discard(&self, rd: &mut ReadSide, mut n: usize) -> Result<()> {
        trace!("discarding {} overhead bytes", n);
        while n > 0 {
            let take = n.min(rd.window.len());
            read_full(&self.drv, &mut rd.window[..take])?;
            n -= take;
        }
        Ok(())
    }

    /// The error the writer latched before closing the coordination
    /// channel.
    fn latched(&self) -> Error {
        self.werr
            .lock()
            .unwrap()
            .clone()
            .expect("coordination channel closed without a latched error - this is a bug")
    }

    // ── Full-duplex transfers ───────────────────────────────────────────

    /// Performs one full transaction that writes `write` while reading
    /// into `read`, concurrently.
    ///
    /// When `read` is longer than `write`, the transmission is extended by
    /// repeating the last byte of `write` (0 when `write` is empty). When
    /// it is shorter, the excess received bytes are discarded. Returns the
    /// number of bytes read, which on success equals `read.len()`.
    pub fn write_read(&self, write: &[u8], read: &mut [u8]) -> Result<usize>
    where
        D: Sync,
    {
        self.transfer(&mut [Segment { write, read }])
    }

    /// Generalized [`write_read`](Master::write_read) over several
    /// write/read pairings, allowing interleaved TX and RX runs within one
    /// transaction. The length reconciliation rule applies per segment.
    pub fn transfer(&self, segments: &mut [Segment<'_, '_>]) -> Result<usize>
    where
        D: Sync,
    {
        // Snapshot the write plan up front: the writer thread must not
        // borrow the segments while the reader fills them.
        let plan: Vec<(&[u8], usize)> = segments
            .iter()
            .map(|seg| (seg.write, seg.read.len()))
            .collect();
        thread::scope(|scope| {
            scope.spawn(|| self.write_half(&plan));
            self.read_half(segments)
        })
    }

    fn write_half(&self, plan: &[(&[u8], usize)]) {
        // Write errors are latched into the coordination channel and
        // reported by the read half.
        let Ok(mut txn) = self.begin() else {
            return;
        };
        for &(out, read_len) in plan {
            if !out.is_empty() && txn.write(out).is_err() {
                return;
            }
            let extend = read_len.saturating_sub(out.len());
            if extend > 0 {
                let fill = out.last().copied().unwrap_or(0);
                if txn.write_n(fill, extend).is_err() {
                    return;
                }
            }
        }
        let _ = txn.end();
    }

    fn read_half(&self, segments: &mut [Segment<'_, '_>]) -> Result<usize> {
        let mut total = 0;
        for seg in segments.iter_mut() {
            if !seg.read.is_empty() {
                total += self.read(seg.read)?;
            }
            let discard = seg.write.len().saturating_sub(seg.read.len());
            if discard > 0 {
                self.read_n(discard)?;
            }
        }
        // Consume the overhead produced by closing the transaction.
        self.read(&mut [])?;
        Ok(total)
    }
}

/// One write/read pairing of a [`Master::transfer`].
pub struct Segment<'w, 'r> {
    /// Bytes to transmit during this segment.
    pub write: &'w [u8],
    /// Buffer receiving the bytes clocked in during this segment.
    pub read: &'r mut [u8],
}

// ────────────────────────────────────────────────────────────────────────────
// Transaction
// ────────────────────────────────────────────────────────────────────────────

/// Exclusive write access to a [`Master`] between
/// [`begin`](Master::begin) and [`end`](Transaction::end).
///
/// Dropping the guard without calling `end` releases the master but leaves
/// the transaction unterminated on the wire: no trailing idle sample, no
/// `post` sequence, and no flush boundary for the reader.
pub struct Transaction<'a, D: SyncDriver> {
    ma: &'a Master<D>,
    wr: MutexGuard<'a, WriteSide>,
}

impl<D: SyncDriver> Transaction<'_, D> {
    fn open(&mut self) -> Result<()> {
        let overhead = self.wr.pre.len() + usize::from(self.wr.enc.cpha);
        self.enqueue_skip(overhead)?;
        if !self.wr.pre.is_empty() {
            let pre = self.wr.pre.clone();
            self.write_raw(&pre)?;
        }
        if self.wr.enc.cpha {
            let idle = self.wr.base | self.wr.enc.cidle;
            self.write_raw(&[idle])?;
        }
        Ok(())
    }

    /// Closes the transaction: writes the trailing idle sample (CPHA0) and
    /// the `post` sequence, marks the flush boundary, and flushes the
    /// driver. Releases the master on every path.
    pub fn end(mut self) -> Result<()> {
        if let Some(err) = self.ma.werr.lock().unwrap().clone() {
            return Err(err);
        }
        let overhead = self.wr.post.len() + usize::from(!self.wr.enc.cpha);
        self.enqueue_skip(overhead)?;
        if !self.wr.enc.cpha {
            let idle = self.wr.base | self.wr.enc.cidle;
            self.write_raw(&[idle])?;
        }
        if !self.wr.post.is_empty() {
            let post = self.wr.post.clone();
            self.write_raw(&post)?;
        }
        self.flush()?;
        debug!("transaction closed");
        Ok(())
    }

    /// Writes `data` as SPI bytes. Returns the byte count, which on
    /// success equals `data.len()`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        for &b in data {
            self.write_byte(b)?;
        }
        Ok(data.len())
    }

    /// Writes the bytes of `s`.
    pub fn write_str(&mut self, s: &str) -> Result<usize> {
        self.write(s.as_bytes())
    }

    /// Writes the byte `b` repeated `n` times.
    pub fn write_n(&mut self, b: u8, n: usize) -> Result<usize> {
        // The window is identical for every repetition; only the framing
        // bookkeeping advances.
        let window = encode_byte(b, self.wr.enc, self.ma.sclk, self.ma.mosi, self.wr.base);
        for _ in 0..n {
            self.frame_gap()?;
            self.enqueue(Directive::Decode)?;
            self.write_raw(&window)?;
            self.wr.fill += 1;
        }
        Ok(n)
    }

    /// Writes a single SPI byte.
    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.frame_gap()?;
        let window = encode_byte(b, self.wr.enc, self.ma.sclk, self.ma.mosi, self.wr.base);
        self.enqueue(Directive::Decode)?;
        self.write_raw(&window)?;
        self.wr.fill += 1;
        trace!("encoded {:#04x}", b);
        Ok(())
    }

    /// Marks a flush boundary for the reader and flushes the driver. An
    /// empty [`Master::read`] returns once it reaches the boundary.
    pub fn flush(&mut self) -> Result<()> {
        self.enqueue(Directive::FlushMark)?;
        if let Err(err) = self.ma.drv.flush() {
            return Err(self.fail(err.into()));
        }
        Ok(())
    }

    /// Resets the frame fill counter so the next write does not start with
    /// an inter-frame delay. Called mid-frame this shifts where later
    /// delays fall; keeping frames aligned is then the caller's concern.
    pub fn no_delay(&mut self) {
        self.wr.fill = 0;
    }

    /// Emits the inter-frame idle run when a frame boundary has been
    /// reached.
    fn frame_gap(&mut self) -> Result<()> {
        if self.wr.delay == 0 || self.wr.fill < self.wr.frame_len {
            return Ok(());
        }
        let idle = self.wr.base | self.wr.enc.cidle;
        let run = 2 * self.wr.delay;
        let gap = [idle; 2 * MAX_DELAY];
        self.enqueue_skip(run)?;
        self.write_raw(&gap[..run])?;
        self.wr.fill = 0;
        trace!("inserted inter-frame delay of {} samples", run);
        Ok(())
    }

    fn enqueue_skip(&mut self, n: usize) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        // pre/post <= 16 and delay <= 8 keep every skip run well within
        // the directive range.
        debug_assert!(n <= i8::MAX as usize);
        self.enqueue(Directive::Skip(n as u8))
    }

    fn enqueue(&mut self, d: Directive) -> Result<()> {
        match self.wr.tord.as_ref() {
            None => return Err(self.ma.latched()),
            Some(tx) => match tx.try_send(d) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => {
                    unreachable!("receive side lives as long as the master")
                }
            },
        }
        // The reader is a full channel behind; push buffered samples to
        // the wire so it can catch up, then wait for a slot.
        trace!("coordination channel full, flushing driver");
        if let Err(err) = self.ma.drv.flush() {
            return Err(self.fail(err.into()));
        }
        if let Some(tx) = self.wr.tord.as_ref() {
            let _ = tx.send(d);
        }
        Ok(())
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let mut off = 0;
        while off < bytes.len() {
            match self.ma.drv.write(&bytes[off..]) {
                Ok(0) => {
                    let err = io::Error::new(io::ErrorKind::WriteZero, "driver accepted no bytes");
                    return Err(self.fail(err.into()));
                }
                Ok(n) => off += n,
                Err(err) => return Err(self.fail(err.into())),
            }
        }
        Ok(())
    }

    /// Latches the first write-side error and closes the coordination
    /// channel, informing the concurrent reader and rejecting later
    /// transactions.
    fn fail(&mut self, err: Error) -> Error {
        debug!("write side failed, closing coordination channel: {}", err);
        {
            let mut werr = self.ma.werr.lock().unwrap();
            if werr.is_none() {
                *werr = Some(err.clone());
            }
        }
        self.wr.tord = None;
        err
    }
}

/// Reads exactly `buf.len()` bytes; a driver end-of-stream mid-buffer is a
/// truncation error.
fn read_full<D: SyncDriver>(drv: &D, buf: &mut [u8]) -> Result<()> {
    let mut off = 0;
    while off < buf.len() {
        match drv.read(&mut buf[off..]) {
            Ok(0) => return Err(Error::UnexpectedEof),
            Ok(n) => off += n,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spi::mode::Mode;
    use std::collections::VecDeque;
    use std::sync::{Arc, Condvar};

    // ── Test drivers ─────────────────────────────────────────────

    /// Captures written bytes for byte-exact write-path checks; reads
    /// report end-of-stream.
    #[derive(Default)]
    struct Capture {
        wire: Arc<Mutex<Vec<u8>>>,
    }

    impl SyncDriver for Capture {
        fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            self.wire.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Echoes every written byte back on the read side, blocking readers
    /// until samples arrive, like a real synchronous bridge.
    #[derive(Default, Clone)]
    struct Loopback(Arc<LoopbackInner>);

    #[derive(Default)]
    struct LoopbackInner {
        queue: Mutex<VecDeque<u8>>,
        ready: Condvar,
    }

    impl Loopback {
        fn backlog(&self) -> usize {
            self.0.queue.lock().unwrap().len()
        }
    }

    impl SyncDriver for Loopback {
        fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut queue = self.0.queue.lock().unwrap();
            while queue.is_empty() {
                queue = self.0.ready.wait(queue).unwrap();
            }
            let n = buf.len().min(queue.len());
            for slot in buf[..n].iter_mut() {
                *slot = queue.pop_front().unwrap();
            }
            Ok(n)
        }
        fn write(&self, buf: &[u8]) -> io::Result<usize> {
            self.0.queue.lock().unwrap().extend(buf);
            self.0.ready.notify_all();
            Ok(buf.len())
        }
        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Fails every operation, like a bridge that has been unplugged.
    struct Broken;

    impl SyncDriver for Broken {
        fn read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "bridge gone"))
        }
        fn write(&self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "bridge gone"))
        }
        fn flush(&self) -> io::Result<()> {
            Ok(())
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn cfg(mode: Mode, frame_len: usize, delay: usize) -> Config {
        Config {
            mode,
            frame_len,
            delay,
        }
    }

    fn capture_master(cfg: Config) -> (Master<Capture>, Arc<Mutex<Vec<u8>>>) {
        let drv = Capture::default();
        let wire = Arc::clone(&drv.wire);
        let ma = Master::new(drv, 0x01, 0x10, 0x00);
        ma.set_pre_post(&[0x80], &[0x80]);
        ma.configure(cfg);
        (ma, wire)
    }

    fn loopback_master(cfg: Config) -> (Master<Loopback>, Loopback) {
        let drv = Loopback::default();
        let handle = drv.clone();
        // miso aliased onto mosi: the loopback echo decodes back to the
        // transmitted data.
        let ma = Master::new(drv, 0x01, 0x10, 0x10);
        ma.set_pre_post(&[0x80], &[0x80]);
        ma.configure(cfg);
        (ma, handle)
    }

    /// 16-sample window built from a repeating half-cell pattern.
    fn win(cells: &[u8]) -> Vec<u8> {
        cells.iter().cycle().take(SAMPLES_PER_BYTE).copied().collect()
    }

    /// 16-sample window whose low and high nibbles use different cells.
    fn halves(first: [u8; 2], second: [u8; 2]) -> Vec<u8> {
        let mut out = win(&first);
        out.truncate(8);
        out.extend(win(&second).into_iter().take(8));
        out
    }

    // ── Write path, byte-exact ───────────────────────────────────

    #[test]
    fn test_write_scenarios() {
        let m55 = win(&[0x00, 0x01, 0x10, 0x11]);
        let maa = win(&[0x10, 0x11, 0x00, 0x01]);
        let mf0 = halves([0x10, 0x11], [0x00, 0x01]);
        let m0f = halves([0x00, 0x01], [0x10, 0x11]);
        // LSB-first windows for 0xf0/0x0f with cfirst low and high.
        let lf0 = halves([0x00, 0x01], [0x10, 0x11]);
        let l0f = halves([0x10, 0x11], [0x00, 0x01]);
        let hf0 = halves([0x01, 0x00], [0x11, 0x10]);
        let h0f = halves([0x11, 0x10], [0x01, 0x00]);

        let cases: Vec<(Config, &[u8], Vec<u8>)> = vec![
            (
                cfg(Mode::M00, 1, 0),
                &[0x55, 0xaa],
                [&[0x80][..], &m55[..], &maa[..], &[0x00, 0x80][..]].concat(),
            ),
            (
                cfg(Mode::M11, 1, 0),
                &[0x55, 0xaa],
                [&[0x80, 0x01][..], &m55[..], &maa[..], &[0x80][..]].concat(),
            ),
            (
                cfg(Mode::L00, 1, 0),
                &[0xf0, 0x0f],
                [&[0x80][..], &lf0[..], &l0f[..], &[0x00, 0x80][..]].concat(),
            ),
            (
                cfg(Mode::L10, 1, 0),
                &[0xf0, 0x0f],
                [&[0x80][..], &hf0[..], &h0f[..], &[0x01, 0x80][..]].concat(),
            ),
            (
                cfg(Mode::L01, 1, 0),
                &[0xf0, 0x0f],
                [&[0x80, 0x00][..], &hf0[..], &h0f[..], &[0x80][..]].concat(),
            ),
            (
                cfg(Mode::L11, 1, 0),
                &[0xf0, 0x0f],
                [&[0x80, 0x01][..], &lf0[..], &l0f[..], &[0x80][..]].concat(),
            ),
            (
                cfg(Mode::M00, 1, 1),
                &[0x55, 0xaa, 0xf0, 0x0f],
                [
                    &[0x80][..],
                    &m55[..],
                    &[0x00, 0x00][..],
                    &maa[..],
                    &[0x00, 0x00][..],
                    &mf0[..],
                    &[0x00, 0x00][..],
                    &m0f[..],
                    &[0x00, 0x80][..],
                ]
                .concat(),
            ),
            (
                cfg(Mode::M00, 2, 2),
                &[0x55, 0xaa, 0xf0, 0x0f],
                [
                    &[0x80][..],
                    &m55[..],
                    &maa[..],
                    &[0x00, 0x00, 0x00, 0x00][..],
                    &mf0[..],
                    &m0f[..],
                    &[0x00, 0x80][..],
                ]
                .concat(),
            ),
            (cfg(Mode::M00, 1, 0), &[], vec![0x80, 0x00, 0x80]),
        ];

        for (config, input, expected) in cases {
            let (ma, wire) = capture_master(config);
            let mut txn = ma.begin().unwrap();
            txn.write(input).unwrap();
            txn.end().unwrap();
            assert_eq!(
                *wire.lock().unwrap(),
                expected,
                "mode {} frame_len {} delay {} input {:02x?}",
                config.mode,
                config.frame_len,
                config.delay,
                input
            );
        }
    }

    #[test]
    fn test_write_n_scenarios() {
        let m55 = win(&[0x00, 0x01, 0x10, 0x11]);
        let maa = win(&[0x10, 0x11, 0x00, 0x01]);

        let cases: Vec<(Config, u8, usize, Vec<u8>)> = vec![
            (
                cfg(Mode::M00, 1, 0),
                0x55,
                2,
                [&[0x80][..], &m55[..], &m55[..], &[0x00, 0x80][..]].concat(),
            ),
            (
                cfg(Mode::M00, 1, 0),
                0xaa,
                2,
                [&[0x80][..], &maa[..], &maa[..], &[0x00, 0x80][..]].concat(),
            ),
            (
                cfg(Mode::M00, 1, 1),
                0xaa,
                2,
                [&[0x80][..], &maa[..], &[0x00, 0x00][..], &maa[..], &[0x00, 0x80][..]].concat(),
            ),
        ];

        for (config, b, n, expected) in cases {
            let (ma, wire) = capture_master(config);
            let mut txn = ma.begin().unwrap();
            assert_eq!(txn.write_n(b, n).unwrap(), n);
            txn.end().unwrap();
            assert_eq!(
                *wire.lock().unwrap(),
                expected,
                "byte {:#04x} n {} delay {}",
                b,
                n,
                config.delay
            );
        }
    }

    #[test]
    fn test_write_str_matches_bytes() {
        let (ma, wire) = capture_master(cfg(Mode::M00, 1, 0));
        let mut txn = ma.begin().unwrap();
        txn.write_str("AB").unwrap();
        txn.end().unwrap();

        let (mb, bytes_wire) = capture_master(cfg(Mode::M00, 1, 0));
        let mut txn = mb.begin().unwrap();
        txn.write(&[0x41, 0x42]).unwrap();
        txn.end().unwrap();

        assert_eq!(*wire.lock().unwrap(), *bytes_wire.lock().unwrap());
    }

    #[test]
    fn test_wire_length_formula() {
        for (n, frame_len, delay) in [(0, 1, 1), (1, 1, 1), (4, 1, 1), (4, 2, 2), (5, 3, 2), (8, 2, 0)]
        {
            let (ma, wire) = capture_master(cfg(Mode::M00, frame_len, delay));
            let data: Vec<u8> = (0..n as u8).collect();
            let mut txn = ma.begin().unwrap();
            txn.write(&data).unwrap();
            txn.end().unwrap();
            let gaps = if delay == 0 || n == 0 {
                0
            } else {
                (n - 1) / frame_len
            };
            // pre + idle + windows + inter-frame runs + post
            let expected = 1 + 1 + SAMPLES_PER_BYTE * n + 2 * delay * gaps + 1;
            assert_eq!(
                wire.lock().unwrap().len(),
                expected,
                "n {} frame_len {} delay {}",
                n,
                frame_len,
                delay
            );
        }
    }

    #[test]
    fn test_no_delay_suppresses_gap() {
        let m55 = win(&[0x00, 0x01, 0x10, 0x11]);
        let maa = win(&[0x10, 0x11, 0x00, 0x01]);
        let (ma, wire) = capture_master(cfg(Mode::M00, 1, 1));
        let mut txn = ma.begin().unwrap();
        txn.write(&[0x55]).unwrap();
        txn.no_delay();
        txn.write(&[0xaa]).unwrap();
        txn.end().unwrap();
        let expected = [&[0x80][..], &m55[..], &maa[..], &[0x00, 0x80][..]].concat();
        assert_eq!(*wire.lock().unwrap(), expected);
    }

    // ── Read path and full duplex ────────────────────────────────

    #[test]
    fn test_write_read_full_duplex() {
        for mode in [Mode::M00, Mode::M11, Mode::L00, Mode::L10] {
            let (ma, handle) = loopback_master(cfg(mode, 2, 1));
            let out = [0x55, 0xaa, 0xf0, 0x0f, 0x00, 0xff];
            let mut input = [0u8; 6];
            let n = ma.write_read(&out, &mut input).unwrap();
            assert_eq!(n, out.len());
            assert_eq!(input, out, "{mode}");
            assert_eq!(handle.backlog(), 0, "{mode} left samples unread");
        }
    }

    #[test]
    fn test_write_read_extends_with_last_byte() {
        let (ma, _) = loopback_master(cfg(Mode::M00, 1, 0));
        let mut input = [0u8; 4];
        assert_eq!(ma.write_read(&[0xa5], &mut input).unwrap(), 4);
        assert_eq!(input, [0xa5; 4]);
    }

    #[test]
    fn test_write_read_empty_out_sends_zeros() {
        let (ma, _) = loopback_master(cfg(Mode::M00, 1, 0));
        let mut input = [0xffu8; 3];
        assert_eq!(ma.write_read(&[], &mut input).unwrap(), 3);
        assert_eq!(input, [0; 3]);
    }

    #[test]
    fn test_write_read_discards_excess() {
        let drv = Loopback::default();
        let handle = drv.clone();
        let ma = Master::new(drv, 0x01, 0x10, 0x10);
        // Default configuration, no pre/post.
        let mut first = [0u8; 1];
        assert_eq!(ma.write_read(&[0x11, 0x22, 0x33], &mut first).unwrap(), 1);
        assert_eq!(first, [0x11]);
        // The stream stays aligned for the next transaction.
        let mut second = [0u8; 1];
        assert_eq!(ma.write_read(&[0x44], &mut second).unwrap(), 1);
        assert_eq!(second, [0x44]);
        assert_eq!(handle.backlog(), 0);
    }

    #[test]
    fn test_transfer_interleaved_segments() {
        let (ma, handle) = loopback_master(cfg(Mode::M00, 1, 0));
        let command = [0x0b, 0x07];
        let mut reply = [0xffu8; 3];
        let mut segments = [
            Segment {
                write: &command,
                read: &mut [],
            },
            Segment {
                write: &[],
                read: &mut reply,
            },
        ];
        assert_eq!(ma.transfer(&mut segments).unwrap(), 3);
        assert_eq!(reply, [0, 0, 0]);
        assert_eq!(handle.backlog(), 0);
    }

    #[test]
    fn test_concurrent_reader_thread() {
        let drv = Loopback::default();
        let handle = drv.clone();
        // A tiny channel forces the writer through the flush-on-full path.
        let ma = Master::with_capacity(drv, 0x01, 0x10, 0x10, 4);
        ma.set_pre_post(&[0x80], &[0x80]);
        ma.configure(cfg(Mode::M00, 2, 1));
        let data: Vec<u8> = (0..32).collect();
        thread::scope(|scope| {
            scope.spawn(|| {
                let mut txn = ma.begin().unwrap();
                txn.write(&data).unwrap();
                txn.end().unwrap();
            });
            let mut got = vec![0u8; data.len()];
            assert_eq!(ma.read(&mut got).unwrap(), data.len());
            assert_eq!(got, data);
            assert_eq!(ma.read(&mut []).unwrap(), 0);
        });
        assert_eq!(handle.backlog(), 0);
    }

    #[test]
    fn test_empty_read_stops_at_pending_data() {
        let (ma, handle) = loopback_master(cfg(Mode::M00, 1, 0));
        let txn_reads = {
            let mut txn = ma.begin().unwrap();
            txn.write(&[0x5a]).unwrap();
            txn.flush().unwrap();
            // Draining stops short of the encoded byte and leaves it
            // readable.
            assert_eq!(ma.read(&mut []).unwrap(), 0);
            let mut buf = [0u8; 1];
            assert_eq!(ma.read(&mut buf).unwrap(), 1);
            txn.end().unwrap();
            buf[0]
        };
        assert_eq!(txn_reads, 0x5a);
        // One drain consumes the stale flush mark, the next the closing
        // overhead.
        assert_eq!(ma.read(&mut []).unwrap(), 0);
        assert_eq!(ma.read(&mut []).unwrap(), 0);
        assert_eq!(handle.backlog(), 0);
    }

    #[test]
    fn test_read_n_keeps_stream_aligned() {
        let (ma, handle) = loopback_master(cfg(Mode::M00, 1, 0));
        let mut txn = ma.begin().unwrap();
        txn.write(&[0x01, 0x02, 0x03]).unwrap();
        txn.flush().unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(ma.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x01);
        assert_eq!(ma.read_n(1).unwrap(), 1);
        assert_eq!(ma.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 0x03);
        txn.end().unwrap();
        assert_eq!(ma.read(&mut []).unwrap(), 0);
        assert_eq!(ma.read(&mut []).unwrap(), 0);
        assert_eq!(handle.backlog(), 0);
    }

    // ── Errors ───────────────────────────────────────────────────

    #[test]
    fn test_write_error_latches_and_closes() {
        let ma = Master::new(Broken, 0x01, 0x10, 0x00);
        ma.set_pre_post(&[0x80], &[0x80]);
        let err = match ma.begin() {
            Ok(_) => panic!("begin should fail on a dead bridge"),
            Err(err) => err,
        };
        assert!(matches!(err, Error::Io(_)));
        // The latch rejects new transactions.
        assert!(ma.begin().is_err());
        // The reader hits the driver's propagated error on the queued
        // overhead, then the latched error once the channel is drained.
        let mut buf = [0u8; 1];
        assert!(matches!(ma.read(&mut buf), Err(Error::Io(_))));
        assert!(matches!(ma.read(&mut []), Err(Error::Io(_))));
    }

    #[test]
    fn test_short_read_is_unexpected_eof() {
        let drv = Capture::default();
        let ma = Master::new(drv, 0x01, 0x10, 0x00);
        ma.set_pre_post(&[0x80], &[]);
        let mut txn = ma.begin().unwrap();
        txn.write(&[0x55]).unwrap();
        txn.end().unwrap();
        let mut buf = [0u8; 1];
        assert!(matches!(ma.read(&mut buf), Err(Error::UnexpectedEof)));
    }

    #[test]
    #[should_panic(expected = "overlap")]
    fn test_overlapping_masks_rejected() {
        let _ = Master::new(Capture::default(), 0x11, 0x10, 0x00);
    }

    #[test]
    #[should_panic(expected = "pre sequence")]
    fn test_oversized_pre_rejected() {
        let ma = Master::new(Capture::default(), 0x01, 0x10, 0x00);
        ma.set_pre_post(&[0u8; 17], &[]);
    }
}
