//! `scheduler` — compile a goals file against a gadget cache into a raw
//! ROP payload.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;

use rop_compiler::reader::{BinaryReader, Segment, StaticBinary, WritableRegion};
use rop_compiler::{Arch, Catalogue, GoalFile, RopError, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "scheduler", about = "Compile a goal list into a ROP payload")]
struct Cli {
    /// Gadget cache produced by `finder`.
    #[arg(long = "gadgets_file")]
    gadgets_file: PathBuf,

    /// Goals JSON describing what the payload should do.
    #[arg(long = "goals_file")]
    goals_file: PathBuf,

    /// Target architecture name.
    #[arg(long = "arch", default_value = "AMD64")]
    arch: String,

    /// Writable region to draw the allocator from, `addr:size` in hex.
    #[arg(long = "writable_region")]
    writable_region: Option<String>,

    /// Output path (stdout if omitted).
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

fn parse_writable_region(s: &str) -> Result<WritableRegion, RopError> {
    let (addr, size) = s
        .split_once(':')
        .ok_or_else(|| RopError::CacheFormat(format!("writable region must be addr:size, got {s}")))?;
    let address = parse_addr(addr).ok_or_else(|| RopError::CacheFormat(format!("bad writable region address: {addr}")))?;
    let size = parse_addr(size).ok_or_else(|| RopError::CacheFormat(format!("bad writable region size: {size}")))?;
    Ok(WritableRegion { address, size })
}

fn main() -> Result<(), RopError> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_target(false).init();

    let arch = Arch::by_name(&cli.arch).ok_or_else(|| RopError::UnknownArch(cli.arch.clone()))?;

    let goal_file = GoalFile::parse(&fs::read_to_string(&cli.goals_file)?)?;
    let (file_path, base) = goal_file
        .files
        .first()
        .map(|f| (f.path.clone(), f.base_address))
        .unwrap_or_default();

    let cache_data = fs::read_to_string(&cli.gadgets_file)?;
    let catalogue = Catalogue::from_string(&cache_data, base)?;
    tracing::info!(count = catalogue.len(), "loaded gadget catalogue");

    let writable = match cli.writable_region {
        Some(spec) => parse_writable_region(&spec)?,
        None => WritableRegion { address: base, size: 0x10000 },
    };

    let mut symbols = std::collections::HashMap::new();
    let mut segments = Vec::new();
    if !file_path.is_empty() {
        let bytes = fs::read(&file_path)?;
        segments.push(Segment { bytes, address: base, executable: true, writable: false });
    }
    for goal in &goal_file.goals {
        if let rop_compiler::Goal::Function { name, address: Some(addr), .. } = goal {
            symbols.insert(name.clone(), *addr);
        }
    }

    let reader = StaticBinary {
        name: file_path,
        segments,
        writable,
        symbols,
        pie: base == 0,
        base,
        physical_base: base,
        ..StaticBinary::default()
    };

    if reader.needs_base_address_warning() {
        tracing::warn!("binary looks position-independent and no base address was supplied; symbol addresses will be wrong");
    }

    let mut scheduler = Scheduler::new(&catalogue, &arch, &reader);
    let payload = scheduler.compile(&goal_file.goals)?;
    tracing::info!(bytes = payload.len(), "compiled payload");

    match cli.output {
        Some(path) => fs::write(path, payload)?,
        None => std::io::stdout().write_all(&payload)?,
    }

    Ok(())
}
