//! idxinfo — offline inspector for ribosift index descriptors
//!
//! Parses a `<prefix>.stats` file and prints the database summary and
//! shard layout. The binary format is re-declared here so the tool
//! stays independent of the main crate.
//!
//! .STATS FORMAT (little-endian)
//! ────────────────────────────────────────────────────────────────
//!  u64             size of the source FASTA
//!  u32             path length incl. NUL, then the path bytes
//!  4 × f64         ACGT background frequencies
//!  u64             total reference length
//!  u32             seed window L
//!  u64             sequence count
//!  u16             shard count
//!  per shard       u64 start_offset, u64 byte_span, u32 seq_count
//!  u32             num_sq, then (u32 id_len, id, u32 seq_len) each
//! ────────────────────────────────────────────────────────────────

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::process::exit;

use clap::Parser;

/// Inspect a ribosift index descriptor
#[derive(Parser, Debug)]
#[command(name = "idxinfo", version, about)]
struct Args {
    /// Path to the .stats file
    stats: PathBuf,

    /// Also list every reference sequence
    #[arg(short = 's', long)]
    sequences: bool,
}

fn u16_of(r: &mut impl Read) -> std::io::Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn u32_of(r: &mut impl Read) -> std::io::Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn u64_of(r: &mut impl Read) -> std::io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn f64_of(r: &mut impl Read) -> std::io::Result<f64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}

fn run(args: &Args) -> std::io::Result<()> {
    let mut r = BufReader::new(File::open(&args.stats)?);

    let src_size = u64_of(&mut r)?;
    let plen = u32_of(&mut r)? as usize;
    let mut pbuf = vec![0u8; plen];
    r.read_exact(&mut pbuf)?;
    pbuf.pop();
    let src_path = String::from_utf8_lossy(&pbuf).into_owned();

    let mut freqs = [0f64; 4];
    for f in freqs.iter_mut() {
        *f = f64_of(&mut r)?;
    }
    let full_len = u64_of(&mut r)?;
    let lnwin = u32_of(&mut r)?;
    let numseq = u64_of(&mut r)?;
    let nshards = u16_of(&mut r)?;

    println!("source FASTA:     {src_path}");
    println!("source size:      {src_size} bytes");
    println!("seed window L:    {lnwin}");
    println!("sequences:        {numseq}");
    println!("total length:     {full_len} nt");
    println!(
        "background ACGT:  {:.4} {:.4} {:.4} {:.4}",
        freqs[0], freqs[1], freqs[2], freqs[3]
    );
    println!("shards:           {nshards}");
    for i in 0..nshards {
        let start = u64_of(&mut r)?;
        let span = u64_of(&mut r)?;
        let count = u32_of(&mut r)?;
        println!("  shard {i}: offset {start}, {span} bytes, {count} sequences");
    }

    let num_sq = u32_of(&mut r)?;
    println!("reference ids:    {num_sq}");
    if args.sequences {
        for _ in 0..num_sq {
            let idlen = u32_of(&mut r)? as usize;
            let mut id = vec![0u8; idlen];
            r.read_exact(&mut id)?;
            let len = u32_of(&mut r)?;
            println!("  {}  {len} nt", String::from_utf8_lossy(&id));
        }
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("Error reading {}: {e}", args.stats.display());
        exit(1);
    }
}
