//! reads/stats.rs — run-wide read statistics
//!
//! Shared by every aligner thread. Counters are atomic with relaxed
//! ordering; exact values are needed at phase end, not in between.
//! `num_aligned` is bumped exactly once per read, guarded by the
//! per-read `is_hit` transition.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reads::kvdb::Kvdb;

const KV_KEY: &str = "readstats";

pub struct Readstats {
    pub all_reads_count: u64,
    pub all_reads_len: u64,
    pub min_read_len: u32,
    pub max_read_len: u32,

    pub num_aligned: AtomicU64,
    pub n_yid_ncov: AtomicU64,
    pub n_nid_ycov: AtomicU64,
    pub n_yid_ycov: AtomicU64,
    pub num_denovo: AtomicU64,
    pub num_skipped: AtomicU64,

    pub reads_matched_per_db: Vec<AtomicU64>,
    pub total_otu: AtomicU64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    all_reads_count: u64,
    all_reads_len: u64,
    min_read_len: u32,
    max_read_len: u32,
    num_aligned: u64,
    n_yid_ncov: u64,
    n_nid_ycov: u64,
    n_yid_ycov: u64,
    num_denovo: u64,
    num_skipped: u64,
    reads_matched_per_db: Vec<u64>,
    total_otu: u64,
}

impl Readstats {
    pub fn new(
        all_reads_count: u64,
        all_reads_len: u64,
        min_read_len: u32,
        max_read_len: u32,
        num_dbs: usize,
    ) -> Readstats {
        Readstats {
            all_reads_count,
            all_reads_len,
            min_read_len,
            max_read_len,
            num_aligned: AtomicU64::new(0),
            n_yid_ncov: AtomicU64::new(0),
            n_nid_ycov: AtomicU64::new(0),
            n_yid_ycov: AtomicU64::new(0),
            num_denovo: AtomicU64::new(0),
            num_skipped: AtomicU64::new(0),
            reads_matched_per_db: (0..num_dbs).map(|_| AtomicU64::new(0)).collect(),
            total_otu: AtomicU64::new(0),
        }
    }

    /// Persist the counters so a later task (or rerun) can pick up
    /// where the align phase left off.
    pub fn store(&self, kvdb: &Kvdb) -> Result<()> {
        let snap = Snapshot {
            all_reads_count: self.all_reads_count,
            all_reads_len: self.all_reads_len,
            min_read_len: self.min_read_len,
            max_read_len: self.max_read_len,
            num_aligned: self.num_aligned.load(Ordering::Relaxed),
            n_yid_ncov: self.n_yid_ncov.load(Ordering::Relaxed),
            n_nid_ycov: self.n_nid_ycov.load(Ordering::Relaxed),
            n_yid_ycov: self.n_yid_ycov.load(Ordering::Relaxed),
            num_denovo: self.num_denovo.load(Ordering::Relaxed),
            num_skipped: self.num_skipped.load(Ordering::Relaxed),
            reads_matched_per_db: self
                .reads_matched_per_db
                .iter()
                .map(|a| a.load(Ordering::Relaxed))
                .collect(),
            total_otu: self.total_otu.load(Ordering::Relaxed),
        };
        kvdb.put_named(KV_KEY, &bincode::serialize(&snap)?)?;
        Ok(())
    }

    /// Restore a snapshot persisted by an earlier task. Returns false
    /// when no snapshot exists.
    pub fn restore(&mut self, kvdb: &Kvdb) -> Result<bool> {
        let bytes = match kvdb.get_named(KV_KEY)? {
            Some(b) => b,
            None => return Ok(false),
        };
        let snap: Snapshot = bincode::deserialize(&bytes)?;
        self.all_reads_count = snap.all_reads_count;
        self.all_reads_len = snap.all_reads_len;
        self.min_read_len = snap.min_read_len;
        self.max_read_len = snap.max_read_len;
        self.num_aligned = AtomicU64::new(snap.num_aligned);
        self.n_yid_ncov = AtomicU64::new(snap.n_yid_ncov);
        self.n_nid_ycov = AtomicU64::new(snap.n_nid_ycov);
        self.n_yid_ycov = AtomicU64::new(snap.n_yid_ycov);
        self.num_denovo = AtomicU64::new(snap.num_denovo);
        self.num_skipped = AtomicU64::new(snap.num_skipped);
        self.reads_matched_per_db = snap.reads_matched_per_db.into_iter().map(AtomicU64::new).collect();
        self.total_otu = AtomicU64::new(snap.total_otu);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_restore() {
        let dir = tempdir().unwrap();
        let kv = Kvdb::open(dir.path()).unwrap();

        let stats = Readstats::new(100, 15_000, 80, 220, 2);
        stats.num_aligned.store(42, Ordering::Relaxed);
        stats.reads_matched_per_db[1].store(17, Ordering::Relaxed);
        stats.store(&kv).unwrap();

        let mut restored = Readstats::new(0, 0, 0, 0, 0);
        assert!(restored.restore(&kv).unwrap());
        assert_eq!(restored.all_reads_count, 100);
        assert_eq!(restored.num_aligned.load(Ordering::Relaxed), 42);
        assert_eq!(restored.reads_matched_per_db.len(), 2);
        assert_eq!(restored.reads_matched_per_db[1].load(Ordering::Relaxed), 17);
    }

    #[test]
    fn test_restore_without_snapshot() {
        let dir = tempdir().unwrap();
        let kv = Kvdb::open(dir.path()).unwrap();
        let mut stats = Readstats::new(1, 2, 3, 4, 1);
        assert!(!stats.restore(&kv).unwrap());
        assert_eq!(stats.all_reads_count, 1);
    }
}
