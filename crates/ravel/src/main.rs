//! ravel - a trace-driven x86 disassembler
//!
//! Usage:
//!   ravel <binary>                 Analyze from the entry point
//!   ravel <binary> --linear        One-shot linear decode, no analysis
//!   ravel <binary> --functions     Also list discovered functions
//!   ravel <binary> --xrefs         Annotate inbound references

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ravel_core::Entity;
use ravel_decode::{DecodeListener, InstructionDecoder};
use ravel_image::{Image, RawImage};
use ravel_trace::Disassembler;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ravel")]
#[command(about = "A trace-driven x86 disassembler", long_about = None)]
struct Cli {
    /// Path to the flat binary image
    binary: PathBuf,

    /// Image base address
    #[arg(long, default_value = "0x400000", value_parser = parse_hex)]
    base: u64,

    /// Entry point address (defaults to the base)
    #[arg(long, value_parser = parse_hex)]
    entry: Option<u64>,

    /// One-shot linear decode from the entry point, without the
    /// analysis engine
    #[arg(long)]
    linear: bool,

    /// List discovered functions after analysis
    #[arg(long)]
    functions: bool,

    /// Annotate addresses with their inbound references
    #[arg(long)]
    xrefs: bool,

    /// List the image's sections and exit
    #[arg(long)]
    sections: bool,
}

fn parse_hex(s: &str) -> Result<u64, String> {
    let trimmed = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).map_err(|e| e.to_string())
}

struct Printer;

impl DecodeListener for Printer {
    fn on_decode(&mut self, address: u64, _length: u64, entity: &Entity) {
        println!("{:08X}: {}", address, entity);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let bytes = fs::read(&cli.binary)
        .with_context(|| format!("failed to read {}", cli.binary.display()))?;
    let entry = cli.entry.unwrap_or(cli.base);

    if cli.linear {
        let offset = entry
            .checked_sub(cli.base)
            .and_then(|o| (o as usize <= bytes.len()).then_some(o as usize))
            .context("entry point outside the image")?;
        let decoder = InstructionDecoder::with_builtin_table();
        decoder.decode_stream(&bytes[offset..], entry, &mut Printer);
        return Ok(());
    }

    let image = Arc::new(RawImage::new(cli.base, bytes).with_entry(entry));
    if cli.sections {
        for section in image.sections() {
            println!(
                "{:08x}  {:8} {:?}  {}",
                section.virtual_address, section.size, section.kind, section.name
            );
        }
        return Ok(());
    }

    let engine = Disassembler::with_builtin_decoder(image);
    engine.start()?;
    engine.wait();

    engine.with_data(|data| {
        for (&addr, entry) in data.entries() {
            if let Some(function) = data.function(addr) {
                println!();
                println!("{}:", function.name());
            }
            if let Some(entity) = entry.entity() {
                println!("{:08x}  {}", addr, entity);
            }
            if cli.xrefs && !entry.references().is_empty() {
                let refs: Vec<String> = entry
                    .references()
                    .iter()
                    .map(|r| format!("{:08x}", r))
                    .collect();
                println!("          ; referenced from {}", refs.join(", "));
            }
        }
    });

    if cli.functions {
        println!();
        for function in engine.functions() {
            println!(
                "{:08x}..{:08x}  {}",
                function.start(),
                function.end(),
                function.name()
            );
        }
    }

    Ok(())
}
