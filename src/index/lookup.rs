//! index/lookup.rs — the L/2-mer lookup table
//!
//! `1 << L` slots, one per possible L/2-mer value. Each slot carries
//! the occurrence count and the forward / reverse mini burst tries.
//! Serialized as two artifacts per shard:
//!
//!   <pfx>.kmer_<p>.dat      — 1<<L raw u32 counts
//!   <pfx>.bursttrie_<p>.dat — per slot: u32 size_fwd, u32 size_rev,
//!                             then the two breadth-first trie streams

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, RibosiftError};
use crate::index::trie::{self, TrieNode};

pub struct KmerSlot {
    pub count: u32,
    pub trie_f: Option<Box<TrieNode>>,
    pub trie_r: Option<Box<TrieNode>>,
}

pub struct LookupTable {
    pub slots: Vec<KmerSlot>,
}

impl LookupTable {
    pub fn new(lnwin: u32) -> LookupTable {
        let n = 1usize << lnwin;
        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            slots.push(KmerSlot { count: 0, trie_f: None, trie_r: None });
        }
        LookupTable { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Write the per-slot counts (kmer.dat).
    pub fn write_counts(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        for slot in &self.slots {
            w.write_all(&slot.count.to_le_bytes())?;
        }
        w.flush()?;
        Ok(())
    }

    /// Write both tries of every slot (bursttrie.dat).
    pub fn write_tries(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        for slot in &self.slots {
            let fwd = trie::serialize(slot.trie_f.as_deref());
            let rev = trie::serialize(slot.trie_r.as_deref());
            w.write_all(&(fwd.len() as u32).to_le_bytes())?;
            w.write_all(&(rev.len() as u32).to_le_bytes())?;
            w.write_all(&fwd)?;
            w.write_all(&rev)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Load counts and both tries for one shard.
    pub fn load(lnwin: u32, kmer_path: &Path, trie_path: &Path) -> Result<LookupTable> {
        let mut table = LookupTable::new(lnwin);

        let mut r = BufReader::new(
            File::open(kmer_path).map_err(|_| RibosiftError::IndexMissing(kmer_path.into()))?,
        );
        let mut word = [0u8; 4];
        for slot in table.slots.iter_mut() {
            r.read_exact(&mut word).map_err(|_| RibosiftError::IndexCorrupt {
                path: kmer_path.into(),
                reason: "truncated count table".into(),
            })?;
            slot.count = u32::from_le_bytes(word);
        }

        let mut r = BufReader::new(
            File::open(trie_path).map_err(|_| RibosiftError::IndexMissing(trie_path.into()))?,
        );
        for slot in table.slots.iter_mut() {
            let mut sizes = [0u8; 8];
            r.read_exact(&mut sizes).map_err(|_| RibosiftError::IndexCorrupt {
                path: trie_path.into(),
                reason: "truncated trie sizes".into(),
            })?;
            let size_f = u32::from_le_bytes([sizes[0], sizes[1], sizes[2], sizes[3]]) as usize;
            let size_r = u32::from_le_bytes([sizes[4], sizes[5], sizes[6], sizes[7]]) as usize;

            if size_f > 0 {
                let mut buf = vec![0u8; size_f];
                r.read_exact(&mut buf).map_err(|_| RibosiftError::IndexCorrupt {
                    path: trie_path.into(),
                    reason: "truncated forward trie".into(),
                })?;
                slot.trie_f = Some(trie::deserialize(&buf)?);
            }
            if size_r > 0 {
                let mut buf = vec![0u8; size_r];
                r.read_exact(&mut buf).map_err(|_| RibosiftError::IndexCorrupt {
                    path: trie_path.into(),
                    reason: "truncated reverse trie".into(),
                })?;
                slot.trie_r = Some(trie::deserialize(&buf)?);
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::trie::{insert, new_node, probe, set_id};
    use tempfile::tempdir;

    #[test]
    fn test_artifact_roundtrip() {
        let lnwin = 8; // small table for the test: 256 slots
        let pw = 4u32;
        let kbig = 9u32;
        let mut table = LookupTable::new(lnwin);

        let sfx = [0u8, 1, 2, 3, 0];
        table.slots[17].count = 3;
        let mut root = new_node();
        insert(&mut root, &sfx, kbig, pw);
        set_id(&mut root, &sfx, pw, 99);
        table.slots[17].trie_f = Some(root);

        let dir = tempdir().unwrap();
        let kmer = dir.path().join("t.kmer_0.dat");
        let btrie = dir.path().join("t.bursttrie_0.dat");
        table.write_counts(&kmer).unwrap();
        table.write_tries(&btrie).unwrap();

        let loaded = LookupTable::load(lnwin, &kmer, &btrie).unwrap();
        assert_eq!(loaded.slots[17].count, 3);
        assert_eq!(loaded.slots[16].count, 0);
        assert!(loaded.slots[16].trie_f.is_none());
        let root = loaded.slots[17].trie_f.as_ref().unwrap();
        assert_eq!(probe(root, &sfx[..pw as usize], pw), Some(99));
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempdir().unwrap();
        let miss = LookupTable::load(8, &dir.path().join("no.kmer"), &dir.path().join("no.trie"));
        assert!(miss.is_err());
    }
}
