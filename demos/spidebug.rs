//! Example: render a transaction through the debug driver
//!
//! Encodes a few data bytes as line-word samples and prints each sample as
//! bit glyphs plus hex, so the clock/data waveform can be eyeballed.
//!
//! Usage:
//!   cargo run --example spidebug -- --bytes 55,aa
//!
//! Pick another mode or line mapping:
//!   cargo run --example spidebug -- --bytes f0,0f --mode L10 \
//!       --sclk 01 --mosi 10 --miso 08

use clap::Parser;

use bitbang::{Config, DebugDriver, Master, Mode};
use std::io;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Data bytes to transmit, comma-separated hex
    #[arg(long, default_value = "55,aa")]
    bytes: String,

    /// SPI mode tag (M00..M11, L00..L11)
    #[arg(long, default_value = "M00")]
    mode: String,

    /// sclk line mask (hex)
    #[arg(long, default_value = "80", value_parser = parse_hex)]
    sclk: u8,

    /// mosi line mask (hex)
    #[arg(long, default_value = "40", value_parser = parse_hex)]
    mosi: u8,

    /// miso line mask (hex)
    #[arg(long, default_value = "20", value_parser = parse_hex)]
    miso: u8,

    /// Data bytes per frame
    #[arg(long, default_value_t = 1)]
    frame_len: usize,

    /// Inter-frame delay in idle pairs (0..=8)
    #[arg(long, default_value_t = 0)]
    delay: usize,
}

fn parse_hex(s: &str) -> Result<u8, String> {
    u8::from_str_radix(s, 16).map_err(|e| format!("invalid hex byte {s:?}: {e}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let data = args
        .bytes
        .split(',')
        .map(parse_hex)
        .collect::<Result<Vec<u8>, _>>()?;
    let mode: Mode = args.mode.parse()?;

    info!(
        "mode {} sclk {:#04x} mosi {:#04x} miso {:#04x}",
        mode, args.sclk, args.mosi, args.miso
    );

    let master = Master::new(
        DebugDriver::new(io::stdout()),
        args.sclk,
        args.mosi,
        args.miso,
    );
    master.configure(Config {
        mode,
        frame_len: args.frame_len,
        delay: args.delay,
    });

    let mut txn = master.begin()?;
    let n = txn.write(&data)?;
    txn.end()?;

    info!("{} bytes written", n);
    Ok(())
}
