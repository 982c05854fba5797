//! reads/mod.rs — the in-memory read record
//!
//! A read enters the aligner as a wire-framed record served by the
//! feed (`<stream>_<ordinal>`, header, sequence, optional quality)
//! and leaves each phase as a compact state blob in the KVDB.
//!
//! The numeric sequence exists in two encodings toggled by `flip34`:
//! the 03 form (ambiguous bases folded to 3) used while seed
//! scanning, and the 04 form (ambiguous = 4) addressing the 5x5
//! scoring matrix during Smith-Waterman and reporting.

pub mod feed;
pub mod kvdb;
pub mod stats;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RibosiftError};
use crate::reads::kvdb::Kvdb;
use crate::seq;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Fasta,
    Fastq,
}

/// One accepted alignment of a read against a reference sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Align {
    pub ref_num: u32,
    pub index_num: u16,
    pub part: u16,
    pub strand: bool, // true = aligned against the forward read
    pub ref_begin1: i32,
    pub ref_end1: i32,
    pub read_begin1: i32,
    pub read_end1: i32,
    pub score1: u16,
    pub cigar: Vec<u32>,
    pub readlen: u32,
}

/// The stored alignments plus the best/worst slot bookkeeping.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AlignState {
    pub min_index: u32, // lowest-scoring stored alignment
    pub max_index: u32, // first occurrence of the highest score
    pub alignv: Vec<Align>,
}

/// Alignment state carried across shards and phases via the KVDB.
#[derive(Serialize, Deserialize)]
struct StoredState {
    last_index: u16,
    last_part: u16,
    is_hit: bool,
    is_denovo: bool,
    is_id_cov: bool,
    c_yid_ycov: u32,
    max_sw_count: u32,
    num_alignments_left: i32,
    aln: AlignState,
}

/// A candidate seed: k-mer id and window position on the read.
#[derive(Debug, Clone, Copy)]
pub struct SeedHit {
    pub id: u32,
    pub win: u32,
}

pub struct Read {
    pub id: u64,
    pub read_num: u32,
    pub readfile_idx: u8, // 0 = forward sense, 1 = reverse sense
    pub header: String,   // includes the '>' / '@' marker
    pub sequence: String,
    pub quality: String,
    pub format: Format,

    pub isequence: Vec<u8>,
    ambiguous_nt: Vec<u32>,
    pub is03: bool,
    pub reversed: bool,

    pub hits: Vec<SeedHit>,
    pub aln: AlignState,

    pub is_hit: bool,
    pub is_denovo: bool,
    pub is_id_cov: bool,
    pub c_yid_ycov: u32,
    pub max_sw_count: u32,
    pub best_left: i32,
    pub num_alignments_left: i32,
    pub last_index: u16,
    pub last_part: u16,

    pub is_valid: bool,
    pub is_restored: bool,
}

impl Read {
    /// Parse one wire-framed record. The ordinal identity prefixed by
    /// the feed addresses the read in the KVDB without re-counting:
    /// id = ordinal * num_split_files + stream.
    pub fn from_wire(
        wire: &str,
        num_split_files: u32,
        num_senses: u32,
        min_lis: i32,
        num_alignments: i32,
    ) -> Result<Read> {
        let mut lines = wire.lines();
        let ident = lines.next().unwrap_or("");
        let (stream, ordinal) = ident
            .split_once('_')
            .and_then(|(s, n)| Some((s.parse::<u32>().ok()?, n.parse::<u32>().ok()?)))
            .ok_or_else(|| RibosiftError::Descriptor(format!("bad read identity '{ident}'")))?;

        let header = lines.next().unwrap_or("").to_string();
        let sequence = lines.next().unwrap_or("").to_string();
        let quality = lines.next().unwrap_or("").to_string();

        let format = if header.starts_with('@') { Format::Fastq } else { Format::Fasta };
        let is_valid = !sequence.is_empty()
            && (header.starts_with('>') || header.starts_with('@'));

        let (isequence, ambiguous_nt) = seq::encode_04(sequence.as_bytes());

        Ok(Read {
            id: ordinal as u64 * num_split_files as u64 + stream as u64,
            read_num: ordinal,
            readfile_idx: (stream % num_senses) as u8,
            header,
            sequence,
            quality,
            format,
            isequence,
            ambiguous_nt,
            is03: false,
            reversed: false,
            hits: Vec::new(),
            aln: AlignState::default(),
            is_hit: false,
            is_denovo: false,
            is_id_cov: false,
            c_yid_ycov: 0,
            max_sw_count: 0,
            best_left: min_lis.max(0),
            num_alignments_left: num_alignments,
            last_index: 0,
            last_part: 0,
            is_valid,
            is_restored: false,
        })
    }

    /// Toggle the ambiguous bases between the 03 and 04 encodings.
    pub fn flip34(&mut self) {
        let val = if self.is03 { 4 } else { 3 };
        for &pos in &self.ambiguous_nt {
            self.isequence[pos as usize] = val;
        }
        self.is03 = !self.is03;
    }

    /// Reverse-complement the numeric sequence in place.
    pub fn rev_int_str(&mut self) {
        let len = self.isequence.len() as u32;
        self.isequence = seq::revcomp(&self.isequence);
        for pos in self.ambiguous_nt.iter_mut() {
            *pos = len - 1 - *pos;
        }
        let val = if self.is03 { 3 } else { 4 };
        for &pos in &self.ambiguous_nt {
            self.isequence[pos as usize] = val;
        }
        self.reversed = !self.reversed;
    }

    /// The maximum attainable SW score for this read.
    pub fn max_sw_score(&self, match_score: i32) -> u32 {
        (match_score.max(0) as u32) * self.sequence.len() as u32
    }

    /// Read identity: the header up to the first whitespace, without
    /// the format marker.
    pub fn seq_id(&self) -> &str {
        self.header
            .trim_start_matches(['>', '@'])
            .split_whitespace()
            .next()
            .unwrap_or("")
    }

    pub fn state_bytes(&self) -> Result<Vec<u8>> {
        let state = StoredState {
            last_index: self.last_index,
            last_part: self.last_part,
            is_hit: self.is_hit,
            is_denovo: self.is_denovo,
            is_id_cov: self.is_id_cov,
            c_yid_ycov: self.c_yid_ycov,
            max_sw_count: self.max_sw_count,
            num_alignments_left: self.num_alignments_left,
            aln: self.aln.clone(),
        };
        Ok(bincode::serialize(&state)?)
    }

    /// Load the state persisted by an earlier shard or phase.
    pub fn restore(&mut self, kvdb: &Kvdb) -> Result<bool> {
        let bytes = match kvdb.get(self.id)? {
            Some(b) => b,
            None => {
                self.is_restored = false;
                return Ok(false);
            }
        };
        let state: StoredState = bincode::deserialize(&bytes)?;
        self.last_index = state.last_index;
        self.last_part = state.last_part;
        self.is_hit = state.is_hit;
        self.is_denovo = state.is_denovo;
        self.is_id_cov = state.is_id_cov;
        self.c_yid_ycov = state.c_yid_ycov;
        self.max_sw_count = state.max_sw_count;
        self.num_alignments_left = state.num_alignments_left;
        self.aln = state.aln;
        self.is_restored = true;
        Ok(true)
    }

    pub fn store(&self, kvdb: &Kvdb) -> Result<()> {
        kvdb.put(self.id, &self.state_bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn wire_fq() -> &'static str {
        "2_5\n@read5 comment\nACGTNACGT\nIIIIIIIII"
    }

    #[test]
    fn test_from_wire_identity() {
        let r = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        assert_eq!(r.id, 5 * 4 + 2);
        assert_eq!(r.read_num, 5);
        assert_eq!(r.readfile_idx, 0);
        assert_eq!(r.format, Format::Fastq);
        assert_eq!(r.seq_id(), "read5");
        assert!(r.is_valid);
        assert_eq!(r.isequence, vec![0, 1, 2, 3, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_bad_identity_rejected() {
        assert!(Read::from_wire("nonsense\n@h\nACGT\nIIII", 4, 2, 2, -1).is_err());
    }

    #[test]
    fn test_flip34_touches_only_ambiguous() {
        let mut r = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        assert!(!r.is03);
        r.flip34();
        assert!(r.is03);
        assert_eq!(r.isequence, vec![0, 1, 2, 3, 3, 0, 1, 2, 3]);
        r.flip34();
        assert_eq!(r.isequence, vec![0, 1, 2, 3, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_rev_int_str_tracks_ambiguous() {
        let mut r = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        r.rev_int_str();
        assert!(r.reversed);
        // revcomp of ACGTNACGT = ACGTNACGT
        assert_eq!(r.isequence, vec![0, 1, 2, 3, 4, 0, 1, 2, 3]);
        r.rev_int_str();
        assert!(!r.reversed);
        assert_eq!(r.isequence, vec![0, 1, 2, 3, 4, 0, 1, 2, 3]);
    }

    #[test]
    fn test_state_roundtrip_via_kvdb() {
        let dir = tempdir().unwrap();
        let kv = Kvdb::open(dir.path()).unwrap();

        let mut r = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        r.is_hit = true;
        r.aln.alignv.push(Align {
            ref_num: 3,
            index_num: 0,
            part: 1,
            strand: true,
            ref_begin1: 10,
            ref_end1: 27,
            read_begin1: 0,
            read_end1: 17,
            score1: 36,
            cigar: vec![(18 << 4), (2 << 4) | 1],
            readlen: 18,
        });
        r.aln.max_index = 0;
        r.store(&kv).unwrap();

        let mut fresh = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        assert!(fresh.restore(&kv).unwrap());
        assert!(fresh.is_hit);
        assert_eq!(fresh.aln.alignv.len(), 1);
        assert_eq!(fresh.aln.alignv[0].score1, 36);
        assert_eq!(fresh.aln.alignv[0].cigar.len(), 2);
    }

    #[test]
    fn test_max_sw_score() {
        let r = Read::from_wire(wire_fq(), 4, 2, 2, -1).unwrap();
        assert_eq!(r.max_sw_score(2), 18);
    }
}
