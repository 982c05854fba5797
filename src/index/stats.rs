//! index/stats.rs — the per-database `.stats` descriptor and Refstats
//!
//! One `.stats` file per reference database, shared by all of its
//! shards. All integers little-endian.
//!
//! BINARY FORMAT (<pfx>.stats)
//! ─────────────────────────────────────────────────────────────────
//!  u64             size of the source FASTA (tamper detection)
//!  u32             length of the FASTA path, including a NUL
//!  bytes           the path, NUL-terminated
//!  4 × f64         ACGT background frequencies
//!  u64             total reference length (nt)
//!  u32             seed window L
//!  u64             sequence count
//!  u16             shard count
//!  per shard       u64 start_offset, u64 byte_span, u32 seq_count
//!  u32             num_sq
//!  per sequence    u32 id_len, id bytes, u32 seq_len
//! ─────────────────────────────────────────────────────────────────

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::align::gumbel;
use crate::cli::RunConfig;
use crate::error::{Result, RibosiftError};
use crate::reads::stats::Readstats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSpan {
    pub start_offset: u64,
    pub byte_span: u64,
    pub seq_count: u32,
}

#[derive(Debug, Clone)]
pub struct DbStats {
    pub src_size: u64,
    pub src_path: String,
    pub freqs: [f64; 4],
    pub full_len: u64,
    pub lnwin: u32,
    pub numseq: u64,
    pub shards: Vec<ShardSpan>,
    pub sam_sq: Vec<(String, u32)>,
}

impl DbStats {
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(&self.src_size.to_le_bytes())?;
        let path_bytes = self.src_path.as_bytes();
        w.write_all(&((path_bytes.len() + 1) as u32).to_le_bytes())?;
        w.write_all(path_bytes)?;
        w.write_all(&[0u8])?;
        for f in &self.freqs {
            w.write_all(&f.to_le_bytes())?;
        }
        w.write_all(&self.full_len.to_le_bytes())?;
        w.write_all(&self.lnwin.to_le_bytes())?;
        w.write_all(&self.numseq.to_le_bytes())?;
        w.write_all(&(self.shards.len() as u16).to_le_bytes())?;
        for s in &self.shards {
            w.write_all(&s.start_offset.to_le_bytes())?;
            w.write_all(&s.byte_span.to_le_bytes())?;
            w.write_all(&s.seq_count.to_le_bytes())?;
        }
        w.write_all(&(self.sam_sq.len() as u32).to_le_bytes())?;
        for (id, len) in &self.sam_sq {
            w.write_all(&(id.len() as u32).to_le_bytes())?;
            w.write_all(id.as_bytes())?;
            w.write_all(&len.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<DbStats> {
        let mut r = BufReader::new(
            File::open(path).map_err(|_| RibosiftError::IndexMissing(path.into()))?,
        );
        let corrupt = |reason: &str| RibosiftError::IndexCorrupt {
            path: path.into(),
            reason: reason.to_string(),
        };

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

        let src_size = u64_of(&mut r).map_err(|_| corrupt("missing source size"))?;
        let plen = u32_of(&mut r).map_err(|_| corrupt("missing path length"))? as usize;
        if plen == 0 || plen > 4096 {
            return Err(corrupt("implausible path length"));
        }
        let mut pbuf = vec![0u8; plen];
        r.read_exact(&mut pbuf).map_err(|_| corrupt("truncated path"))?;
        pbuf.pop(); // NUL
        let src_path = String::from_utf8_lossy(&pbuf).into_owned();

        let mut freqs = [0f64; 4];
        for f in freqs.iter_mut() {
            *f = f64_of(&mut r).map_err(|_| corrupt("truncated frequencies"))?;
        }
        let full_len = u64_of(&mut r).map_err(|_| corrupt("missing total length"))?;
        let lnwin = u32_of(&mut r).map_err(|_| corrupt("missing seed window"))?;
        let numseq = u64_of(&mut r).map_err(|_| corrupt("missing sequence count"))?;

        let nshards = u16_of(&mut r).map_err(|_| corrupt("missing shard count"))?;
        let mut shards = Vec::with_capacity(nshards as usize);
        for _ in 0..nshards {
            shards.push(ShardSpan {
                start_offset: u64_of(&mut r).map_err(|_| corrupt("truncated shard record"))?,
                byte_span: u64_of(&mut r).map_err(|_| corrupt("truncated shard record"))?,
                seq_count: u32_of(&mut r).map_err(|_| corrupt("truncated shard record"))?,
            });
        }

        let num_sq = u32_of(&mut r).map_err(|_| corrupt("missing @SQ count"))?;
        let mut sam_sq = Vec::with_capacity(num_sq as usize);
        for _ in 0..num_sq {
            let idlen = u32_of(&mut r).map_err(|_| corrupt("truncated @SQ record"))? as usize;
            let mut id = vec![0u8; idlen];
            r.read_exact(&mut id).map_err(|_| corrupt("truncated @SQ id"))?;
            let len = u32_of(&mut r).map_err(|_| corrupt("truncated @SQ length"))?;
            sam_sq.push((String::from_utf8_lossy(&id).into_owned(), len));
        }

        Ok(DbStats { src_size, src_path, freqs, full_len, lnwin, numseq, shards, sam_sq })
    }
}

/// Per-database statistics derived at run start: Gumbel parameters,
/// corrected search-space sizes and the minimal accepted SW score.
pub struct Refstats {
    pub num_index_parts: Vec<u16>,
    pub full_ref: Vec<u64>,
    pub full_read: Vec<u64>,
    pub lnwin: Vec<u32>,
    pub partialwin: Vec<u32>,
    pub minimal_score: Vec<u32>,
    pub gumbel: Vec<(f64, f64)>, // (lambda, K)
    pub numseq: Vec<u64>,
    pub shards: Vec<Vec<ShardSpan>>,
    pub sam_sq: Vec<Vec<(String, u32)>>,
    pub skiplengths: Vec<[u32; 3]>,
}

impl Refstats {
    pub fn new(cfg: &RunConfig, readstats: &Readstats) -> Result<Refstats> {
        let n = cfg.indexfiles.len();
        let mut rs = Refstats {
            num_index_parts: Vec::with_capacity(n),
            full_ref: Vec::with_capacity(n),
            full_read: Vec::with_capacity(n),
            lnwin: Vec::with_capacity(n),
            partialwin: Vec::with_capacity(n),
            minimal_score: Vec::with_capacity(n),
            gumbel: Vec::with_capacity(n),
            numseq: Vec::with_capacity(n),
            shards: Vec::with_capacity(n),
            sam_sq: Vec::with_capacity(n),
            skiplengths: cfg.skiplengths.clone(),
        };

        for (i, (fasta, idx_pfx)) in cfg.indexfiles.iter().enumerate() {
            let stats_path = stats_file(idx_pfx);
            let db = DbStats::load(&stats_path)?;

            let actual = std::fs::metadata(fasta)?.len();
            if actual != db.src_size {
                return Err(RibosiftError::RefFileChanged {
                    path: fasta.clone(),
                    expected: db.src_size,
                    actual,
                });
            }

            let (lambda, k) = gumbel::evd_params(cfg.match_score, cfg.mismatch, &db.freqs);

            // Shannon entropy of the background distribution (bits)
            let entropy: f64 = -db
                .freqs
                .iter()
                .filter(|&&f| f > 0.0)
                .map(|&f| f * f.log2())
                .sum::<f64>();

            let mut full_ref = db.full_len;
            let mut full_read = readstats.all_reads_len;

            // length correction for the E-value search space
            let expect_l = ((k * full_read as f64 * full_ref as f64).ln() / entropy) as u64;
            if full_ref > expect_l * db.numseq {
                full_ref -= expect_l * db.numseq;
            }
            full_read = full_read.saturating_sub(expect_l * readstats.all_reads_count);

            let minimal_score = ((cfg.evalue / (k * full_ref as f64 * full_read as f64)).ln()
                / -lambda) as u32;

            if rs.skiplengths[i] == [0, 0, 0]
                || rs.skiplengths[i].iter().any(|&s| s == 0)
            {
                rs.skiplengths[i] = [db.lnwin, db.lnwin / 2, 3];
            }

            rs.num_index_parts.push(db.shards.len() as u16);
            rs.full_ref.push(full_ref);
            rs.full_read.push(full_read);
            rs.lnwin.push(db.lnwin);
            rs.partialwin.push(db.lnwin / 2);
            rs.minimal_score.push(minimal_score);
            rs.gumbel.push((lambda, k));
            rs.numseq.push(db.numseq);
            rs.shards.push(db.shards);
            rs.sam_sq.push(db.sam_sq);
        }
        Ok(rs)
    }
}

pub fn stats_file(idx_pfx: &Path) -> PathBuf {
    let mut s = idx_pfx.as_os_str().to_os_string();
    s.push(".stats");
    PathBuf::from(s)
}

pub fn kmer_file(idx_pfx: &Path, part: u16) -> PathBuf {
    let mut s = idx_pfx.as_os_str().to_os_string();
    s.push(format!(".kmer_{part}.dat"));
    PathBuf::from(s)
}

pub fn trie_file(idx_pfx: &Path, part: u16) -> PathBuf {
    let mut s = idx_pfx.as_os_str().to_os_string();
    s.push(format!(".bursttrie_{part}.dat"));
    PathBuf::from(s)
}

pub fn pos_file(idx_pfx: &Path, part: u16) -> PathBuf {
    let mut s = idx_pfx.as_os_str().to_os_string();
    s.push(format!(".pos_{part}.dat"));
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stats_roundtrip() {
        let db = DbStats {
            src_size: 1234,
            src_path: "/data/refs/silva.fasta".into(),
            freqs: [0.25, 0.25, 0.3, 0.2],
            full_len: 55_000,
            lnwin: 18,
            numseq: 12,
            shards: vec![
                ShardSpan { start_offset: 0, byte_span: 30_000, seq_count: 7 },
                ShardSpan { start_offset: 30_000, byte_span: 26_100, seq_count: 5 },
            ],
            sam_sq: vec![("AF279106".into(), 1542), ("X83408.1".into(), 1489)],
        };

        let dir = tempdir().unwrap();
        let path = dir.path().join("db.stats");
        db.write(&path).unwrap();

        let loaded = DbStats::load(&path).unwrap();
        assert_eq!(loaded.src_size, db.src_size);
        assert_eq!(loaded.src_path, db.src_path);
        assert_eq!(loaded.freqs, db.freqs);
        assert_eq!(loaded.full_len, db.full_len);
        assert_eq!(loaded.lnwin, 18);
        assert_eq!(loaded.numseq, 12);
        assert_eq!(loaded.shards, db.shards);
        assert_eq!(loaded.sam_sq, db.sam_sq);
    }

    #[test]
    fn test_artifact_names() {
        let pfx = Path::new("/idx/db");
        assert_eq!(stats_file(pfx), Path::new("/idx/db.stats"));
        assert_eq!(kmer_file(pfx, 1), Path::new("/idx/db.kmer_1.dat"));
        assert_eq!(trie_file(pfx, 0), Path::new("/idx/db.bursttrie_0.dat"));
        assert_eq!(pos_file(pfx, 2), Path::new("/idx/db.pos_2.dat"));
    }
}
