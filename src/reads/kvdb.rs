//! reads/kvdb.rs — persistent read-state store
//!
//! An ordered key→bytes store under `workdir/kvdb`. Keys are decimal
//! read ids; values carry the serialized alignment state between the
//! align, post-process and report phases. Point writes are thread
//! safe and each read id is written by at most one thread.

use std::path::Path;

use crate::error::Result;

#[derive(Clone)]
pub struct Kvdb {
    db: sled::Db,
}

impl Kvdb {
    pub fn open(dir: &Path) -> Result<Kvdb> {
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir)?;
        Ok(Kvdb { db })
    }

    pub fn put(&self, id: u64, bytes: &[u8]) -> Result<()> {
        self.db.insert(id.to_string().as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get(&self, id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(id.to_string().as_bytes())?.map(|v| v.to_vec()))
    }

    /// Named slots for run-wide state (e.g. the read statistics).
    pub fn put_named(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_named(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Durable on close; also called at phase boundaries.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let kv = Kvdb::open(dir.path()).unwrap();
        kv.put(42, b"state").unwrap();
        assert_eq!(kv.get(42).unwrap().unwrap(), b"state");
        assert!(kv.get(43).unwrap().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let kv = Kvdb::open(dir.path()).unwrap();
            kv.put(7, b"persisted").unwrap();
            kv.put_named("readstats", b"snapshot").unwrap();
            kv.flush().unwrap();
        }
        let kv = Kvdb::open(dir.path()).unwrap();
        assert_eq!(kv.get(7).unwrap().unwrap(), b"persisted");
        assert_eq!(kv.get_named("readstats").unwrap().unwrap(), b"snapshot");
    }
}
