use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RibosiftError {
    // ── configuration ─────────────────────────────────────────────────
    #[error("Invalid option '{option}': {reason}")]
    Config { option: &'static str, reason: String },

    // ── input validation ──────────────────────────────────────────────
    #[error("Reference sequence #{seq} in {path} is {len} nt, shorter than the k-mer window {need}")]
    RefSeqTooShort { path: PathBuf, seq: u64, len: usize, need: usize },

    #[error("Reference header in {path} must begin with '>' (sequence #{seq})")]
    BadRefHeader { path: PathBuf, seq: u64 },

    #[error("Cannot define format for read file {0}: neither gzip nor printable FASTA/FASTQ")]
    FormatUndefined(PathBuf),

    #[error("Read feed descriptor is malformed: {0}")]
    Descriptor(String),

    #[error("Reference file {path} size {actual} does not match the size {expected} recorded at index time — rebuild the index")]
    RefFileChanged { path: PathBuf, expected: u64, actual: u64 },

    // ── resources ─────────────────────────────────────────────────────
    #[error("A single sequence needs an estimated {need_mb:.1} MB which exceeds the shard memory budget; rerun with at least '-m {need_mb:.0}'")]
    SeqExceedsBudget { need_mb: f64 },

    #[error("Index file {0} does not exist — build the index first (option '--index 1')")]
    IndexMissing(PathBuf),

    #[error("Index file {path} is corrupt: {reason}")]
    IndexCorrupt { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── state store ───────────────────────────────────────────────────
    #[error("Key-value store error: {0}")]
    Kvdb(#[from] sled::Error),

    #[error("Failed to (de)serialize read state: {0}")]
    State(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, RibosiftError>;
