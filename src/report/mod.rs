//! report/mod.rs — shared reporter plumbing
//!
//! Every reporter writes one file per read shard and, once all
//! workers finish, `merge` concatenates the shard files in shard
//! order and strips the split index from the final name. Output is
//! gzipped when the input was (or when forced by `zip-out`).

pub mod blast;
pub mod denovo;
pub mod fastx;
pub mod otumap;
pub mod sam;
pub mod summary;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;

use crate::cli::RunConfig;
use crate::error::Result;

/// One logical output family: `num_out` streams × `num_splits` shard
/// files named `<base>_<split>[_pid].<ext>[.gz]`.
pub struct Output {
    bases: Vec<PathBuf>, // directory + stem per out stream
    pid_sfx: String,
    ext: String,
    gz: bool,
    num_splits: usize,
}

impl Output {
    pub fn new(cfg: &RunConfig, bases: Vec<PathBuf>, ext: &str, gz: bool, num_splits: usize) -> Output {
        let pid_sfx = if cfg.is_pid {
            format!("_{}", std::process::id())
        } else {
            String::new()
        };
        Output { bases, pid_sfx, ext: ext.to_string(), gz, num_splits }
    }

    pub fn num_out(&self) -> usize {
        self.bases.len()
    }

    pub fn is_gz(&self) -> bool {
        self.gz
    }

    fn split_path(&self, split: usize, out: usize) -> PathBuf {
        let gz = if self.gz { ".gz" } else { "" };
        let base = &self.bases[out];
        PathBuf::from(format!(
            "{}_{}{}{}{}",
            base.display(),
            split,
            self.pid_sfx,
            self.ext,
            gz
        ))
    }

    fn final_path(&self, out: usize) -> PathBuf {
        let gz = if self.gz { ".gz" } else { "" };
        let base = &self.bases[out];
        PathBuf::from(format!("{}{}{}{}", base.display(), self.pid_sfx, self.ext, gz))
    }

    /// Create (truncate) the shard files of one split and return their
    /// writers, one per out stream.
    pub fn open_split(&self, split: usize) -> Result<Vec<OutWriter>> {
        let mut ws = Vec::with_capacity(self.bases.len());
        for out in 0..self.bases.len() {
            let path = self.split_path(split, out);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            let f = BufWriter::new(File::create(&path)?);
            ws.push(OutWriter {
                inner: if self.gz {
                    Some(WriterKind::Gz(GzEncoder::new(f, Compression::default())))
                } else {
                    Some(WriterKind::Plain(f))
                },
            });
        }
        Ok(ws)
    }

    /// Concatenate the shard files in split order into the final file
    /// and delete the shard pieces. Restores the original input order
    /// across shards.
    pub fn merge(&self) -> Result<Vec<PathBuf>> {
        let mut finals = Vec::with_capacity(self.bases.len());
        for out in 0..self.bases.len() {
            let target = self.final_path(out);
            let mut w = OpenOptions::new().create(true).write(true).truncate(true).open(&target)?;
            for split in 0..self.num_splits {
                let piece = self.split_path(split, out);
                if piece.exists() {
                    let mut r = File::open(&piece)?;
                    io::copy(&mut r, &mut w)?;
                    fs::remove_file(&piece)?;
                    info!("merged {} -> {}", piece.display(), target.display());
                }
            }
            w.flush()?;
            finals.push(target);
        }
        Ok(finals)
    }
}

enum WriterKind {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

pub struct OutWriter {
    inner: Option<WriterKind>,
}

impl OutWriter {
    pub fn write_str(&mut self, s: &str) -> Result<()> {
        match self.inner.as_mut().expect("writer already finished") {
            WriterKind::Plain(w) => w.write_all(s.as_bytes())?,
            WriterKind::Gz(w) => w.write_all(s.as_bytes())?,
        }
        Ok(())
    }

    /// Flush and, for gzip, close the member stream.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(kind) = self.inner.take() {
            match kind {
                WriterKind::Plain(mut w) => w.flush()?,
                WriterKind::Gz(w) => {
                    w.finish()?.flush()?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for OutWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

/// Whether report output is gzipped. An explicit `zip-out` value that
/// conflicts with the input compression falls back to the input's
/// format with a warning.
pub fn zip_out(cfg: &RunConfig, input_gz: bool) -> bool {
    let requested = match cfg.zip_out {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    };
    match requested {
        Some(r) if r != input_gz => {
            log::warn!("'zip-out' conflicts with the input compression; keeping the input's format");
            input_gz
        }
        Some(r) => r,
        None => input_gz,
    }
}

/// A file prefix with a suffix appended to the stem, e.g.
/// `out/aligned` + `_paired_fwd`.
pub fn with_suffix(pfx: &Path, suffix: &str) -> PathBuf {
    let mut s = pfx.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use tempfile::tempdir;

    fn cfg() -> RunConfig {
        RunConfig::from_cli(Cli::parse_from([
            "ribosift", "--ref", "db.fa,idx", "--reads", "r.fq",
        ]))
        .unwrap()
    }

    #[test]
    fn test_split_merge_restores_order() {
        let dir = tempdir().unwrap();
        let out = Output::new(
            &cfg(),
            vec![dir.path().join("aligned")],
            ".blast",
            false,
            3,
        );

        for split in 0..3 {
            let mut ws = out.open_split(split).unwrap();
            ws[0].write_str(&format!("row from split {split}\n")).unwrap();
            ws[0].finish().unwrap();
        }
        let finals = out.merge().unwrap();
        assert_eq!(finals, vec![dir.path().join("aligned.blast")]);
        let body = fs::read_to_string(&finals[0]).unwrap();
        assert_eq!(body, "row from split 0\nrow from split 1\nrow from split 2\n");
        assert!(!dir.path().join("aligned_0.blast").exists());
    }

    #[test]
    fn test_gz_members_concatenate() {
        use flate2::read::MultiGzDecoder;
        use std::io::Read as IoRead;

        let dir = tempdir().unwrap();
        let out = Output::new(&cfg(), vec![dir.path().join("x")], ".fq", true, 2);
        for split in 0..2 {
            let mut ws = out.open_split(split).unwrap();
            ws[0].write_str(&format!("part{split}\n")).unwrap();
            ws[0].finish().unwrap();
        }
        let finals = out.merge().unwrap();
        let mut body = String::new();
        MultiGzDecoder::new(File::open(&finals[0]).unwrap())
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "part0\npart1\n");
    }

    #[test]
    fn test_multiple_out_streams() {
        let dir = tempdir().unwrap();
        let out = Output::new(
            &cfg(),
            vec![dir.path().join("a_fwd"), dir.path().join("a_rev")],
            ".fq",
            false,
            2,
        );
        for split in 0..2 {
            let mut ws = out.open_split(split).unwrap();
            ws[0].write_str("F").unwrap();
            ws[1].write_str("R").unwrap();
        }
        let finals = out.merge().unwrap();
        assert_eq!(fs::read_to_string(&finals[0]).unwrap(), "FF");
        assert_eq!(fs::read_to_string(&finals[1]).unwrap(), "RR");
    }
}
