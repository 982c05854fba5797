//! report/denovo.rs — reads for de novo OTU clustering
//!
//! A read is de novo when it aligned (passed the E-value threshold)
//! but none of its alignments reached both the %id and %coverage
//! thresholds. Pair routing follows the paired_in / paired_out rules
//! of the FASTA/FASTQ writer.

use crate::cli::RunConfig;
use crate::error::Result;
use crate::reads::feed::Readfeed;
use crate::reads::{Format, Read};
use crate::report::fastx::record_of;
use crate::report::{with_suffix, zip_out, OutWriter, Output};

pub struct DenovoReporter {
    pub out: Output,
}

fn is_denovo(read: &Read) -> bool {
    read.is_hit && read.is_denovo
}

impl DenovoReporter {
    pub fn new(cfg: &RunConfig, feed: &Readfeed) -> DenovoReporter {
        let ext = match feed.orig[0].format {
            Format::Fasta => ".fa",
            Format::Fastq => ".fq",
        };
        let gz = zip_out(cfg, feed.orig[0].is_zip);
        let out = Output::new(
            cfg,
            vec![with_suffix(&cfg.aligned_pfx, "_denovo")],
            ext,
            gz,
            feed.num_splits,
        );
        DenovoReporter { out }
    }

    pub fn append(&self, cfg: &RunConfig, w: &mut OutWriter, reads: &[&Read]) -> Result<()> {
        if reads.len() == 2 {
            let d0 = is_denovo(reads[0]);
            let d1 = is_denovo(reads[1]);
            for (i, r) in reads.iter().enumerate() {
                let take = if cfg.is_paired_out {
                    d0 && d1
                } else if cfg.is_paired_in {
                    d0 || d1
                } else if i == 0 {
                    d0
                } else {
                    d1
                };
                if take {
                    w.write_str(&record_of(r))?;
                }
            }
        } else if is_denovo(reads[0]) {
            w.write_str(&record_of(reads[0]))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use tempfile::tempdir;

    fn read_with(hit: bool, denovo: bool) -> Read {
        let mut r = Read::from_wire("0_0\n@r\nACGT\nIIII", 2, 2, 2, -1).unwrap();
        r.is_hit = hit;
        r.is_denovo = denovo;
        r
    }

    #[test]
    fn test_only_denovo_reads_written() {
        let dir = tempdir().unwrap();
        let cfg = RunConfig::from_cli(Cli::parse_from([
            "ribosift",
            "--ref",
            "db.fa,idx",
            "--reads",
            "r.fq",
            "--fastx",
            "--de_novo_otu",
            "--workdir",
            &dir.path().display().to_string(),
        ]))
        .unwrap();

        let out = Output::new(&cfg, vec![dir.path().join("aligned_denovo")], ".fq", false, 1);
        let rep = DenovoReporter { out };

        let mut ws = rep.out.open_split(0).unwrap();
        let dn = read_with(true, true);
        let aligned_ok = read_with(true, false);
        let miss = read_with(false, false);
        rep.append(&cfg, &mut ws[0], &[&dn]).unwrap();
        rep.append(&cfg, &mut ws[0], &[&aligned_ok]).unwrap();
        rep.append(&cfg, &mut ws[0], &[&miss]).unwrap();
        ws[0].finish().unwrap();

        let finals = rep.out.merge().unwrap();
        let body = std::fs::read_to_string(&finals[0]).unwrap();
        assert_eq!(body.matches("@r\n").count(), 1);
    }
}
