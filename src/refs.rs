//! refs.rs — reference FASTA scanning and per-shard loading
//!
//! The builder scans the whole database once to learn sequence
//! offsets, lengths and background statistics; alignment and
//! reporting later load only the sequences of the active shard using
//! the byte span recorded in the `.stats` descriptor.

use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, RibosiftError};
use crate::index::stats::ShardSpan;
use crate::seq;

/// Location and shape of one reference sequence inside its FASTA.
#[derive(Debug, Clone)]
pub struct SeqMeta {
    pub offset: u64,
    pub span: u64,
    pub header: String, // without the leading '>'
    pub len: u64,       // bases
}

/// Scan a reference FASTA: offsets, header, base count per sequence.
/// Fails on a file not starting with '>'.
pub fn scan_fasta(path: &Path) -> Result<Vec<SeqMeta>> {
    let f = File::open(path)?;
    let mut r = BufReader::new(f);

    let mut metas: Vec<SeqMeta> = Vec::new();
    let mut offset = 0u64;
    let mut line = String::new();
    let mut first = true;

    loop {
        line.clear();
        let n = r.read_line(&mut line)?;
        if n == 0 {
            break;
        }
        let trimmed = line.trim_end();
        if trimmed.starts_with('>') {
            if let Some(last) = metas.last_mut() {
                last.span = offset - last.offset;
            }
            metas.push(SeqMeta {
                offset,
                span: 0,
                header: trimmed[1..].to_string(),
                len: 0,
            });
            first = false;
        } else if first {
            if !trimmed.is_empty() {
                return Err(RibosiftError::BadRefHeader { path: path.into(), seq: 0 });
            }
        } else if let Some(last) = metas.last_mut() {
            last.len += trimmed.chars().filter(|c| !c.is_whitespace()).count() as u64;
        }
        offset += n as u64;
    }
    if let Some(last) = metas.last_mut() {
        last.span = offset - last.offset;
    }
    if metas.is_empty() {
        return Err(RibosiftError::BadRefHeader { path: path.into(), seq: 0 });
    }
    Ok(metas)
}

/// Read the raw bases of one sequence (whitespace stripped, case kept).
pub fn read_bases(file: &mut File, meta: &SeqMeta) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(meta.offset))?;
    let mut buf = vec![0u8; meta.span as usize];
    file.read_exact(&mut buf)?;

    let mut bases = Vec::with_capacity(meta.len as usize);
    let mut in_header = true;
    for &b in &buf {
        if in_header {
            if b == b'\n' {
                in_header = false;
            }
            continue;
        }
        match b {
            b'>' => break,
            b'\n' | b'\r' | b' ' | b'\t' => {}
            _ => bases.push(b),
        }
    }
    Ok(bases)
}

/// One loaded reference sequence, numeric-encoded (ambiguous = 4).
pub struct RefSeq {
    pub id: String, // header up to the first whitespace
    pub header: String,
    pub seq: Vec<u8>,
}

/// The reference sequences of one index shard.
pub struct References {
    pub num: u16,
    pub part: u16,
    pub buffer: Vec<RefSeq>,
}

impl References {
    /// Load the sequences covered by `span` from the database FASTA.
    pub fn load(num: u16, part: u16, fasta: &Path, span: &ShardSpan) -> Result<References> {
        let mut f = File::open(fasta)?;
        f.seek(SeekFrom::Start(span.start_offset))?;
        let mut buf = vec![0u8; span.byte_span as usize];
        f.read_exact(&mut buf)?;

        let mut buffer = Vec::with_capacity(span.seq_count as usize);
        let mut r = BufReader::new(&buf[..]);
        let mut line = String::new();
        let mut header = String::new();
        let mut bases: Vec<u8> = Vec::new();

        loop {
            line.clear();
            let n = r.read_line(&mut line)?;
            let at_end = n == 0;
            let trimmed = line.trim_end();
            if at_end || trimmed.starts_with('>') {
                if !header.is_empty() {
                    let (encoded, _) = seq::encode_04(&bases);
                    let id = header.split_whitespace().next().unwrap_or("").to_string();
                    buffer.push(RefSeq { id, header: header.clone(), seq: encoded });
                }
                if at_end {
                    break;
                }
                header = trimmed[1..].to_string();
                bases.clear();
            } else {
                bases.extend(trimmed.bytes().filter(|b| !b.is_ascii_whitespace()));
            }
        }

        Ok(References { num, part, buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn fixture(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("refs.fa");
        let mut f = File::create(&path).unwrap();
        write!(
            f,
            ">seq_a first sequence\nACGTACGTACGT\nACGT\n>seq_b\nTTTTGGGGCCCCAAAA\n"
        )
        .unwrap();
        path
    }

    #[test]
    fn test_scan_fasta_offsets_and_lengths() {
        let dir = tempdir().unwrap();
        let path = fixture(dir.path());
        let metas = scan_fasta(&path).unwrap();
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].header, "seq_a first sequence");
        assert_eq!(metas[0].len, 16);
        assert_eq!(metas[0].offset, 0);
        assert_eq!(metas[1].header, "seq_b");
        assert_eq!(metas[1].len, 16);
        // spans tile the file
        assert_eq!(metas[0].span, metas[1].offset);
    }

    #[test]
    fn test_read_bases() {
        let dir = tempdir().unwrap();
        let path = fixture(dir.path());
        let metas = scan_fasta(&path).unwrap();
        let mut f = File::open(&path).unwrap();
        let bases = read_bases(&mut f, &metas[0]).unwrap();
        assert_eq!(bases, b"ACGTACGTACGTACGT".to_vec());
    }

    #[test]
    fn test_non_fasta_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.fa");
        std::fs::write(&path, "ACGT\n").unwrap();
        assert!(scan_fasta(&path).is_err());
    }

    #[test]
    fn test_references_load_shard() {
        let dir = tempdir().unwrap();
        let path = fixture(dir.path());
        let metas = scan_fasta(&path).unwrap();
        let span = ShardSpan {
            start_offset: metas[1].offset,
            byte_span: metas[1].span,
            seq_count: 1,
        };
        let refs = References::load(0, 1, &path, &span).unwrap();
        assert_eq!(refs.buffer.len(), 1);
        assert_eq!(refs.buffer[0].id, "seq_b");
        assert_eq!(refs.buffer[0].seq[0], 3); // T
    }
}
