//! report/fastx.rs — FASTA/FASTQ partition writer
//!
//! Routes each read (or read pair) into the aligned and other output
//! families. The aligned family fans out into 1, 2 or 4 streams
//! depending on `out2` / `sout`; the other family mirrors it.

use std::path::PathBuf;

use crate::cli::RunConfig;
use crate::error::Result;
use crate::reads::feed::Readfeed;
use crate::reads::{Format, Read};
use crate::report::{with_suffix, zip_out, OutWriter, Output};

/// Destination of one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dest {
    Aligned(usize),
    Other(usize),
}

pub struct FastxReporter {
    pub aligned: Output,
    pub other: Option<Output>,
    pub num_out: usize,
}

fn stream_suffixes(cfg: &RunConfig) -> Vec<&'static str> {
    if cfg.is_out2 && cfg.is_sout {
        vec!["_paired_fwd", "_paired_rev", "_singleton_fwd", "_singleton_rev"]
    } else if cfg.is_out2 {
        vec!["_fwd", "_rev"]
    } else if cfg.is_sout {
        vec!["_paired", "_singleton"]
    } else {
        vec![""]
    }
}

impl FastxReporter {
    pub fn new(cfg: &RunConfig, feed: &Readfeed) -> FastxReporter {
        let suffixes = stream_suffixes(cfg);
        let num_out = suffixes.len();
        let ext = match feed.orig[0].format {
            Format::Fasta => ".fa",
            Format::Fastq => ".fq",
        };
        let gz = zip_out(cfg, feed.orig[0].is_zip);

        let bases: Vec<PathBuf> =
            suffixes.iter().map(|s| with_suffix(&cfg.aligned_pfx, s)).collect();
        let aligned = Output::new(cfg, bases, ext, gz, feed.num_splits);

        let other = cfg.other_pfx.as_ref().map(|pfx| {
            let bases: Vec<PathBuf> = suffixes.iter().map(|s| with_suffix(pfx, s)).collect();
            Output::new(cfg, bases, ext, gz, feed.num_splits)
        });

        FastxReporter { aligned, other, num_out }
    }

    /// Decide the destination of every read in the (possibly paired)
    /// record group.
    pub fn classify(cfg: &RunConfig, num_out: usize, reads: &[&Read]) -> Vec<Dest> {
        if reads.len() == 2 {
            let hit0 = reads[0].is_hit;
            let hit1 = reads[1].is_hit;
            let both = hit0 && hit1;
            let either = hit0 || hit1;

            reads
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let sense = i; // 0 = fwd, 1 = rev
                    match num_out {
                        1 => {
                            if cfg.is_paired_out {
                                if both { Dest::Aligned(0) } else { Dest::Other(0) }
                            } else if cfg.is_paired_in {
                                if either { Dest::Aligned(0) } else { Dest::Other(0) }
                            } else if r.is_hit {
                                Dest::Aligned(0)
                            } else {
                                Dest::Other(0)
                            }
                        }
                        2 if cfg.is_out2 => {
                            if cfg.is_paired_out {
                                if both { Dest::Aligned(sense) } else { Dest::Other(sense) }
                            } else if cfg.is_paired_in {
                                if either { Dest::Aligned(sense) } else { Dest::Other(sense) }
                            } else if r.is_hit {
                                Dest::Aligned(sense)
                            } else {
                                Dest::Other(sense)
                            }
                        }
                        2 => {
                            // sout: paired stream 0, singleton stream 1
                            if both {
                                Dest::Aligned(0)
                            } else if either {
                                if r.is_hit { Dest::Aligned(1) } else { Dest::Other(1) }
                            } else {
                                Dest::Other(0)
                            }
                        }
                        _ => {
                            // out2 + sout: paired fwd/rev then singleton fwd/rev
                            if both {
                                Dest::Aligned(sense)
                            } else if either {
                                if r.is_hit {
                                    Dest::Aligned(2 + sense)
                                } else {
                                    Dest::Other(2 + sense)
                                }
                            } else {
                                Dest::Other(sense)
                            }
                        }
                    }
                })
                .collect()
        } else {
            let r = reads[0];
            vec![if r.is_hit { Dest::Aligned(0) } else { Dest::Other(0) }]
        }
    }

    /// Write one record group to the per-split writers.
    pub fn append(
        &self,
        cfg: &RunConfig,
        aligned_ws: &mut [OutWriter],
        other_ws: Option<&mut [OutWriter]>,
        reads: &[&Read],
    ) -> Result<()> {
        let dests = Self::classify(cfg, self.num_out, reads);
        let mut other_ws = other_ws;
        for (r, dest) in reads.iter().zip(dests) {
            match dest {
                Dest::Aligned(o) => aligned_ws[o].write_str(&record_of(r))?,
                Dest::Other(o) => {
                    if let Some(ws) = other_ws.as_deref_mut() {
                        ws[o].write_str(&record_of(r))?;
                    }
                }
            }
        }
        Ok(())
    }
}

pub fn record_of(read: &Read) -> String {
    match read.format {
        Format::Fastq => format!("{}\n{}\n+\n{}\n", read.header, read.sequence, read.quality),
        Format::Fasta => format!("{}\n{}\n", read.header, read.sequence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn cfg_with(extra: &[&str]) -> RunConfig {
        let mut args = vec![
            "ribosift", "--ref", "db.fa,idx", "--reads", "r1.fq", "--reads", "r2.fq", "--fastx",
        ];
        args.extend_from_slice(extra);
        RunConfig::from_cli(Cli::parse_from(args)).unwrap()
    }

    fn read_hit(hit: bool) -> Read {
        let mut r = Read::from_wire("0_0\n@r\nACGTACGT\nIIIIIIII", 2, 2, 2, -1).unwrap();
        r.is_hit = hit;
        r
    }

    #[test]
    fn test_paired_in_takes_both_on_one_hit() {
        let cfg = cfg_with(&["--paired_in"]);
        let a = read_hit(true);
        let b = read_hit(false);
        let dests = FastxReporter::classify(&cfg, 1, &[&a, &b]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Aligned(0)]);
    }

    #[test]
    fn test_paired_out_requires_both() {
        let cfg = cfg_with(&["--paired_out"]);
        let a = read_hit(true);
        let b = read_hit(false);
        let dests = FastxReporter::classify(&cfg, 1, &[&a, &b]);
        assert_eq!(dests, vec![Dest::Other(0), Dest::Other(0)]);

        let b2 = read_hit(true);
        let dests = FastxReporter::classify(&cfg, 1, &[&a, &b2]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Aligned(0)]);
    }

    #[test]
    fn test_default_routes_each_mate_alone() {
        let cfg = cfg_with(&[]);
        let a = read_hit(true);
        let b = read_hit(false);
        let dests = FastxReporter::classify(&cfg, 1, &[&a, &b]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Other(0)]);
    }

    #[test]
    fn test_sout_splits_paired_and_singleton() {
        let cfg = cfg_with(&["--sout"]);
        let hit = read_hit(true);
        let miss = read_hit(false);

        let dests = FastxReporter::classify(&cfg, 2, &[&hit, &hit]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Aligned(0)]);

        let dests = FastxReporter::classify(&cfg, 2, &[&hit, &miss]);
        assert_eq!(dests, vec![Dest::Aligned(1), Dest::Other(1)]);

        let dests = FastxReporter::classify(&cfg, 2, &[&miss, &miss]);
        assert_eq!(dests, vec![Dest::Other(0), Dest::Other(0)]);
    }

    #[test]
    fn test_out2_splits_by_sense() {
        let cfg = cfg_with(&["--out2"]);
        let a = read_hit(true);
        let b = read_hit(true);
        let dests = FastxReporter::classify(&cfg, 2, &[&a, &b]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Aligned(1)]);
    }

    #[test]
    fn test_out2_sout_four_streams() {
        let cfg = cfg_with(&["--out2", "--sout"]);
        let hit = read_hit(true);
        let miss = read_hit(false);

        let dests = FastxReporter::classify(&cfg, 4, &[&hit, &hit]);
        assert_eq!(dests, vec![Dest::Aligned(0), Dest::Aligned(1)]);

        let dests = FastxReporter::classify(&cfg, 4, &[&miss, &hit]);
        assert_eq!(dests, vec![Dest::Other(2), Dest::Aligned(3)]);
    }

    #[test]
    fn test_single_end() {
        let cfg = RunConfig::from_cli(Cli::parse_from([
            "ribosift", "--ref", "db.fa,idx", "--reads", "r.fq", "--fastx",
        ]))
        .unwrap();
        let hit = read_hit(true);
        let dests = FastxReporter::classify(&cfg, 1, &[&hit]);
        assert_eq!(dests, vec![Dest::Aligned(0)]);
    }

    #[test]
    fn test_record_of_formats() {
        let r = read_hit(true);
        assert_eq!(record_of(&r), "@r\nACGTACGT\n+\nIIIIIIII\n");
    }
}
