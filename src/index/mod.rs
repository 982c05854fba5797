//! index/mod.rs — the loaded reference index shard
//!
//! After `load` the shard is read-only; alignment threads share it by
//! reference without synchronization.

pub mod build;
pub mod lookup;
pub mod positions;
pub mod stats;
pub mod trie;

use std::path::Path;

use log::info;

use crate::error::Result;
use crate::index::lookup::LookupTable;
use crate::index::positions::PositionTable;

pub struct IndexShard {
    pub num: u16,
    pub part: u16,
    pub lookup: LookupTable,
    pub positions: PositionTable,
}

impl IndexShard {
    pub fn load(num: u16, part: u16, idx_pfx: &Path, lnwin: u32) -> Result<IndexShard> {
        let kmer = stats::kmer_file(idx_pfx, part);
        let btrie = stats::trie_file(idx_pfx, part);
        let pos = stats::pos_file(idx_pfx, part);

        let lookup = LookupTable::load(lnwin, &kmer, &btrie)?;
        let positions = PositionTable::load(&pos)?;
        info!(
            "loaded index {num} part {part}: {} slots, {} distinct k-mers",
            lookup.len(),
            positions.len()
        );
        Ok(IndexShard { num, part, lookup, positions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, RunConfig};
    use crate::index::trie::probe;
    use crate::seq;
    use clap::Parser;
    use std::fs;
    use tempfile::tempdir;

    fn test_cfg(fasta: &Path, pfx: &Path, workdir: &Path, extra: &[&str]) -> RunConfig {
        let refspec = format!("{},{}", fasta.display(), pfx.display());
        let mut args = vec![
            "ribosift".to_string(),
            "--ref".into(),
            refspec,
            "--reads".into(),
            "unused.fq".into(),
            "--workdir".into(),
            workdir.display().to_string(),
            "--tmpdir".into(),
            workdir.display().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        RunConfig::from_cli(Cli::parse_from(args)).unwrap()
    }

    fn write_ref(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("db.fa");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_build_load_roundtrip() {
        let dir = tempdir().unwrap();
        let refseq = "ACGTACGTACGTACGTACGTACGTGGCCTTAAGGCCTTAA";
        let fasta = write_ref(dir.path(), &format!(">r1 test\n{refseq}\n"));
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &["--max_pos", "0"]);

        build::build_all(&cfg).unwrap();
        assert!(build::is_ready(&cfg));

        let shard = IndexShard::load(0, 0, &pfx, cfg.seed_len).unwrap();
        let kbig = cfg.kbig() as usize;
        let pw = cfg.partialwin() as usize;
        let iseq = seq::encode_index(refseq.as_bytes());

        // every window k-mer resolves to an id whose position list
        // contains the window position
        for pos in 0..=refseq.len() - kbig {
            let kf = seq::pack(&iseq, pos, pw) as u32;
            let root = shard.lookup.slots[kf as usize]
                .trie_f
                .as_ref()
                .expect("forward trie missing");
            let id = probe(root, &iseq[pos + pw..pos + 2 * pw], pw as u32)
                .expect("window k-mer not found");
            assert!(
                shard.positions.entries[id as usize]
                    .iter()
                    .any(|sp| sp.seq == 0 && sp.pos == pos as u32),
                "position {pos} missing from id {id}"
            );
        }

        // forward and reverse tries agree on the id of the same window
        let pos = 3usize;
        let kf = seq::pack(&iseq, pos, pw) as u32;
        let kr = seq::pack(&iseq, pos + pw + 1, pw) as u32;
        let fwd_id = probe(
            shard.lookup.slots[kf as usize].trie_f.as_ref().unwrap(),
            &iseq[pos + pw..pos + 2 * pw],
            pw as u32,
        );
        let mut rev_suffix = vec![0u8; pw];
        for (i, b) in rev_suffix.iter_mut().enumerate() {
            *b = iseq[pos + pw - i];
        }
        let rev_id = probe(
            shard.lookup.slots[kr as usize].trie_r.as_ref().unwrap(),
            &rev_suffix,
            pw as u32,
        );
        assert!(fwd_id.is_some());
        assert_eq!(fwd_id, rev_id);
    }

    #[test]
    fn test_count_consistency() {
        let dir = tempdir().unwrap();
        let refseq = "ACGTACGTACGTACGTACGTACGT";
        let fasta = write_ref(dir.path(), &format!(">r1\n{refseq}\n"));
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &[]);
        build::build_all(&cfg).unwrap();

        let shard = IndexShard::load(0, 0, &pfx, cfg.seed_len).unwrap();
        let windows = refseq.len() - cfg.kbig() as usize + 1;
        let total: u64 = shard.lookup.slots.iter().map(|s| s.count as u64).sum();
        // forward windows always count; reverse only when the slot was
        // never marked by a forward window
        assert!(total >= windows as u64);
        assert!(total <= 2 * windows as u64);
    }

    #[test]
    fn test_idempotent_rebuild() {
        let dir = tempdir().unwrap();
        let fasta = write_ref(
            dir.path(),
            ">a\nACGTACGTACGTACGTACGTACGTAAAA\n>b\nTTTTGGGGCCCCAAAATTTTGGGGCCCC\n",
        );
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &[]);

        build::build_all(&cfg).unwrap();
        let first: Vec<Vec<u8>> = [
            stats::kmer_file(&pfx, 0),
            stats::trie_file(&pfx, 0),
            stats::pos_file(&pfx, 0),
        ]
        .iter()
        .map(|p| fs::read(p).unwrap())
        .collect();

        build::build_all(&cfg).unwrap();
        let second: Vec<Vec<u8>> = [
            stats::kmer_file(&pfx, 0),
            stats::trie_file(&pfx, 0),
            stats::pos_file(&pfx, 0),
        ]
        .iter()
        .map(|p| fs::read(p).unwrap())
        .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rebuild_after_artifact_loss() {
        let dir = tempdir().unwrap();
        let fasta = write_ref(dir.path(), ">a\nACGTACGTACGTACGTACGTACGTAAAA\n");
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &[]);

        build::build_all(&cfg).unwrap();
        assert!(build::is_ready(&cfg));

        fs::remove_file(stats::pos_file(&pfx, 0)).unwrap();
        assert!(!build::is_ready(&cfg));

        build::build_all(&cfg).unwrap();
        assert!(build::is_ready(&cfg));
        assert!(IndexShard::load(0, 0, &pfx, cfg.seed_len).is_ok());
    }

    #[test]
    fn test_short_reference_fatal() {
        let dir = tempdir().unwrap();
        let fasta = write_ref(dir.path(), ">tiny\nACGTACGT\n");
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &[]);
        assert!(build::build_all(&cfg).is_err());
    }

    #[test]
    fn test_multi_shard_split() {
        let dir = tempdir().unwrap();
        // two sequences; a tiny memory budget forces one shard each
        let s1 = "ACGT".repeat(100);
        let s2 = "TTGGCCAA".repeat(50);
        let fasta = write_ref(dir.path(), &format!(">a\n{s1}\n>b\n{s2}\n"));
        let pfx = dir.path().join("idx").join("db");
        let cfg = test_cfg(&fasta, &pfx, dir.path(), &["-m", "0.005"]);
        build::build_all(&cfg).unwrap();

        let db = stats::DbStats::load(&stats::stats_file(&pfx)).unwrap();
        assert_eq!(db.shards.len(), 2);
        assert_eq!(db.shards[0].seq_count, 1);
        assert_eq!(db.shards[1].seq_count, 1);
        assert!(IndexShard::load(0, 1, &pfx, cfg.seed_len).is_ok());
    }
}
