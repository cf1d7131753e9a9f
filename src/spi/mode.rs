//! Mode flags, master configuration, and derived encoding state

use std::fmt;
use std::str::FromStr;

/// Largest allowed inter-frame delay, in idle sample pairs.
pub const MAX_DELAY: usize = 8;

/// Bit transmission order within a data byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BitOrder {
    /// Most significant bit first.
    #[default]
    MsbFirst,
    /// Least significant bit first.
    LsbFirst,
}

/// SPI transfer mode: bit order, clock polarity, and clock phase.
///
/// The eight combinations carry canonical tags `M00`..`L11`: the letter is
/// the bit order (`M` = MSB first, `L` = LSB first), the first digit is
/// CPOL and the second is CPHA. Tags round-trip through [`fmt::Display`]
/// and [`FromStr`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Mode {
    /// Which bit of a data byte is transmitted first.
    pub order: BitOrder,
    /// Clock polarity: `false` = idle low (CPOL0), `true` = idle high (CPOL1).
    pub cpol: bool,
    /// Clock phase: `false` = sample on the first edge (CPHA0), `true` = on
    /// the second (CPHA1).
    pub cpha: bool,
}

impl Mode {
    /// MSB first, CPOL0, CPHA0.
    pub const M00: Mode = Mode::new(BitOrder::MsbFirst, false, false);
    /// MSB first, CPOL0, CPHA1.
    pub const M01: Mode = Mode::new(BitOrder::MsbFirst, false, true);
    /// MSB first, CPOL1, CPHA0.
    pub const M10: Mode = Mode::new(BitOrder::MsbFirst, true, false);
    /// MSB first, CPOL1, CPHA1.
    pub const M11: Mode = Mode::new(BitOrder::MsbFirst, true, true);
    /// LSB first, CPOL0, CPHA0.
    pub const L00: Mode = Mode::new(BitOrder::LsbFirst, false, false);
    /// LSB first, CPOL0, CPHA1.
    pub const L01: Mode = Mode::new(BitOrder::LsbFirst, false, true);
    /// LSB first, CPOL1, CPHA0.
    pub const L10: Mode = Mode::new(BitOrder::LsbFirst, true, false);
    /// LSB first, CPOL1, CPHA1.
    pub const L11: Mode = Mode::new(BitOrder::LsbFirst, true, true);

    pub const fn new(order: BitOrder, cpol: bool, cpha: bool) -> Self {
        Self { order, cpol, cpha }
    }

    /// Canonical tag for this mode.
    pub fn tag(&self) -> &'static str {
        match (self.order, self.cpol, self.cpha) {
            (BitOrder::MsbFirst, false, false) => "M00",
            (BitOrder::MsbFirst, false, true) => "M01",
            (BitOrder::MsbFirst, true, false) => "M10",
            (BitOrder::MsbFirst, true, true) => "M11",
            (BitOrder::LsbFirst, false, false) => "L00",
            (BitOrder::LsbFirst, false, true) => "L01",
            (BitOrder::LsbFirst, true, false) => "L10",
            (BitOrder::LsbFirst, true, true) => "L11",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when parsing a [`Mode`] tag fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown SPI mode tag: {0:?}")]
pub struct ParseModeError(String);

impl FromStr for Mode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M00" => Ok(Mode::M00),
            "M01" => Ok(Mode::M01),
            "M10" => Ok(Mode::M10),
            "M11" => Ok(Mode::M11),
            "L00" => Ok(Mode::L00),
            "L01" => Ok(Mode::L01),
            "L10" => Ok(Mode::L10),
            "L11" => Ok(Mode::L11),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// Master configuration.
///
/// Different slave devices on the same bus may require different
/// configurations; [`crate::Master::configure`] applies one between
/// transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub mode: Mode,
    /// Number of data bytes between inter-frame delay insertions. Must be
    /// greater than zero.
    pub frame_len: usize,
    /// Inter-frame delay in idle sample pairs, `0..=`[`MAX_DELAY`]. With 0
    /// no delay samples are ever emitted.
    pub delay: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            frame_len: 1,
            delay: 0,
        }
    }
}

impl Config {
    /// Panics when the configuration is out of range. Misconfiguration is
    /// a programmer error, never a runtime one.
    pub(crate) fn validate(&self) {
        assert!(self.frame_len > 0, "frame_len must be greater than zero");
        assert!(
            self.delay <= MAX_DELAY,
            "delay {} exceeds the maximum of {} idle pairs",
            self.delay,
            MAX_DELAY
        );
    }
}

/// Clock levels derived from a [`Mode`] and the sclk line mask.
///
/// The two samples emitted per data bit are `cfirst` and `cfirst ^ sclk`;
/// the transition between them is the sampling edge, which CPOL/CPHA place
/// as follows:
///
/// | CPOL | CPHA | cidle | cfirst |
/// |------|------|-------|--------|
/// | 0    | 0    | 0     | 0      |
/// | 0    | 1    | 0     | sclk   |
/// | 1    | 0    | sclk  | sclk   |
/// | 1    | 1    | sclk  | 0      |
#[derive(Debug, Clone, Copy)]
pub(crate) struct Encoding {
    /// sclk level while the bus is idle.
    pub cidle: u8,
    /// sclk level during the first half of each bit cell.
    pub cfirst: u8,
    /// LSB-first transmission.
    pub lsbf: bool,
    /// CPHA1: the bracketing idle sample goes before the data instead of
    /// after it.
    pub cpha: bool,
}

impl Encoding {
    pub fn derive(mode: Mode, sclk: u8) -> Self {
        let cidle = if mode.cpol { sclk } else { 0 };
        let cfirst = if mode.cpol != mode.cpha { sclk } else { 0 };
        Self {
            cidle,
            cfirst,
            lsbf: mode.order == BitOrder::LsbFirst,
            cpha: mode.cpha,
        }
    }
}
