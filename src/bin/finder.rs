//! `finder` — sweep a target binary for gadgets and write a catalogue
//! cache.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use rop_compiler::ir::NullLifter;
use rop_compiler::reader::{BinaryReader, Segment, StaticBinary, WritableRegion};
use rop_compiler::{build_catalogue, Arch, RopError};

#[derive(Parser, Debug)]
#[command(name = "finder", about = "Sweep a target binary and catalogue its gadgets")]
struct Cli {
    /// Binary to sweep.
    #[arg(long = "target")]
    target: PathBuf,

    /// Where to write the gadget cache (stdout if omitted).
    #[arg(long = "gadgets_file")]
    gadgets_file: Option<PathBuf>,

    /// Load base address, hex or decimal.
    #[arg(long = "base_address", default_value = "0")]
    base_address: String,

    /// Target architecture name.
    #[arg(long = "arch", default_value = "AMD64")]
    arch: String,

    /// Output path (defaults to stdout).
    #[arg(long = "o")]
    output: Option<PathBuf>,

    /// Verbose (debug-level) logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn parse_addr(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn main() -> Result<(), RopError> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let arch = Arch::by_name(&cli.arch).ok_or_else(|| RopError::UnknownArch(cli.arch.clone()))?;
    let base = parse_addr(&cli.base_address).ok_or_else(|| RopError::CacheFormat(format!("bad base address: {}", cli.base_address)))?;

    let bytes = fs::read(&cli.target)?;
    // ELF/PE segment parsing is an external collaborator's job; the raw
    // file is treated as one executable, non-writable segment loaded at
    // `base`.
    let reader = StaticBinary {
        name: cli.target.display().to_string(),
        segments: vec![Segment { bytes, address: base, executable: true, writable: false }],
        writable: WritableRegion { address: base, size: 0 },
        pie: base == 0,
        base,
        physical_base: base,
        ..StaticBinary::default()
    };

    if reader.needs_base_address_warning() {
        tracing::warn!("target looks position-independent and no base address was supplied; addresses will be wrong");
    }

    let lifter = NullLifter;
    let catalogue = build_catalogue(&reader, &arch, &lifter);
    tracing::info!(count = catalogue.len(), "classified gadgets");

    let cache = catalogue.to_string_cached(base)?;
    match cli.gadgets_file.or(cli.output) {
        Some(path) => fs::write(path, cache)?,
        None => std::io::stdout().write_all(cache.as_bytes())?,
    }

    Ok(())
}
