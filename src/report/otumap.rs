//! report/otumap.rs — OTU clustering map
//!
//! Read ids grouped by the reference id of their max-scoring
//! alignment, restricted to reads passing both the %id and %coverage
//! thresholds. Each worker fills its own map; maps are merged under
//! exclusive ownership at the end of the phase.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;

use crate::error::Result;

pub struct OtuMap {
    pub maps: Vec<BTreeMap<String, Vec<String>>>,
}

impl OtuMap {
    pub fn new(num_threads: usize) -> OtuMap {
        OtuMap { maps: vec![BTreeMap::new(); num_threads] }
    }

    pub fn push(&mut self, idx: usize, ref_id: String, read_id: String) {
        self.maps[idx].entry(ref_id).or_default().push(read_id);
    }

    /// Fold every per-thread map into the first one.
    pub fn merge(&mut self) {
        let rest = self.maps.split_off(1);
        for map in rest {
            for (k, mut v) in map {
                self.maps[0].entry(k).or_default().append(&mut v);
            }
        }
    }

    pub fn count_otu(&self) -> u64 {
        self.maps.iter().map(|m| m.len() as u64).sum()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        let mut groups = 0u64;
        let mut reads = 0u64;
        for map in &self.maps {
            for (ref_id, members) in map {
                w.write_all(ref_id.as_bytes())?;
                for m in members {
                    w.write_all(b"\t")?;
                    w.write_all(m.as_bytes())?;
                    reads += 1;
                }
                w.write_all(b"\n")?;
                groups += 1;
            }
        }
        w.flush()?;
        info!("OTU map written: {groups} groups, {reads} reads");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_merge_and_write() {
        let mut otu = OtuMap::new(3);
        otu.push(0, "ref_7".into(), "read_1".into());
        otu.push(1, "ref_7".into(), "read_2".into());
        otu.push(2, "ref_9".into(), "read_3".into());
        otu.merge();
        assert_eq!(otu.maps.len(), 1);
        assert_eq!(otu.count_otu(), 2);

        let dir = tempdir().unwrap();
        let path = dir.path().join("otu_map.txt");
        otu.write(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert_eq!(body, "ref_7\tread_1\tread_2\nref_9\tread_3\n");
    }

    #[test]
    fn test_empty_map() {
        let mut otu = OtuMap::new(2);
        otu.merge();
        assert_eq!(otu.count_otu(), 0);
    }
}
