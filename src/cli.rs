//! cli.rs — ribosift command-line interface
//!
//! Raw clap options plus their validation into a `RunConfig`, the
//! resolved set of run parameters every other module consumes.

use clap::Parser;
use std::env;
use std::path::PathBuf;

use crate::error::{Result, RibosiftError};

/// ribosift — filter reads against reference sequence databases
///
/// Examples:
///   ribosift --ref silva.fasta,silva-idx --reads sample.fq.gz --fastx --aligned
///   ribosift --ref db.fa,db --reads r1.fq --reads r2.fq --paired-in --fastx --other
#[derive(Parser, Debug)]
#[command(name = "ribosift", version, about, long_about = None)]
pub struct Cli {
    /// Reference FASTA and index prefix as 'file.fasta,index-prefix'. Repeatable.
    #[arg(long = "ref", value_name = "FASTA,IDX", required = true)]
    pub refs: Vec<String>,

    /// Read file (FASTA/FASTQ, optionally gzipped). One or two occurrences.
    #[arg(long = "reads", value_name = "PATH", required = true)]
    pub reads: Vec<PathBuf>,

    /// Working directory (defaults to $HOME/ribosift/run)
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<PathBuf>,

    /// Directory for the key-value store (defaults to WORKDIR/kvdb)
    #[arg(long, value_name = "DIR")]
    pub kvdb: Option<PathBuf>,

    /// Directory for index files (defaults to WORKDIR/idx)
    #[arg(long = "idx-dir", value_name = "DIR")]
    pub idx_dir: Option<PathBuf>,

    /// Directory for temporary files (defaults to $TMPDIR)
    #[arg(long, value_name = "DIR")]
    pub tmpdir: Option<PathBuf>,

    // ── output ────────────────────────────────────────────────────────
    /// Output aligned reads; optional file prefix (defaults to WORKDIR/out/aligned)
    #[arg(long, value_name = "PFX", num_args = 0..=1, default_missing_value = "")]
    pub aligned: Option<String>,

    /// Output non-aligned reads; optional file prefix (defaults to WORKDIR/out/other)
    #[arg(long, value_name = "PFX", num_args = 0..=1, default_missing_value = "")]
    pub other: Option<String>,

    /// Write FASTA/FASTQ output
    #[arg(long)]
    pub fastx: bool,

    /// Write SAM output
    #[arg(long)]
    pub sam: bool,

    /// Add @SQ lines to the SAM header
    #[arg(long = "SQ")]
    pub sam_sq: bool,

    /// BLAST output: '0' pairwise, '1' tabular, '1 cigar qcov qstrand'
    #[arg(long, value_name = "SPEC")]
    pub blast: Option<String>,

    /// Write the OTU map
    #[arg(long = "otu_map")]
    pub otu_map: bool,

    /// Output reads for de novo clustering (aligned, failing both %id and %cov)
    #[arg(long = "de_novo_otu")]
    pub de_novo_otu: bool,

    /// Append the process id to output file names
    #[arg(long)]
    pub pid: bool,

    // ── alignment control ─────────────────────────────────────────────
    /// E-value threshold
    #[arg(short = 'e', long, value_name = "FLOAT", default_value_t = 1.0)]
    pub evalue: f64,

    /// Report first INT alignments per read (with --no-best)
    #[arg(long = "num_alignments", value_name = "INT")]
    pub num_alignments: Option<i32>,

    /// Disable best-alignment search
    #[arg(long = "no-best")]
    pub no_best: bool,

    /// Number of best alignments to report per read (0 = all)
    #[arg(long, value_name = "INT")]
    pub best: Option<u32>,

    /// Search depth for the best-alignment candidate list
    #[arg(long = "min_lis", value_name = "INT")]
    pub min_lis: Option<i32>,

    /// Number of seed hits required before alignment is attempted
    #[arg(long = "num_seeds", value_name = "INT", default_value_t = 2)]
    pub num_seeds: u32,

    /// Nucleotides to add to each end of the alignment region; 'N%' = percent of read length
    #[arg(long, value_name = "INT[%]", default_value = "4")]
    pub edges: String,

    /// Search all candidate references exhaustively
    #[arg(long = "full_search")]
    pub full_search: bool,

    /// Search only the forward strand
    #[arg(short = 'F', long = "fwd")]
    pub forward_only: bool,

    /// Search only the reverse-complement strand
    #[arg(short = 'R', long = "rev")]
    pub reverse_only: bool,

    /// SW score for an ambiguous base (defaults to the mismatch penalty)
    #[arg(short = 'N', long = "score-N", value_name = "INT", allow_hyphen_values = true)]
    pub score_n: Option<i32>,

    /// SW score for a match
    #[arg(long = "match", value_name = "INT", default_value_t = 2)]
    pub match_score: i32,

    /// SW penalty for a mismatch (negative)
    #[arg(long, value_name = "INT", default_value_t = -3, allow_hyphen_values = true)]
    pub mismatch: i32,

    /// SW gap open penalty (positive)
    #[arg(long = "gap_open", value_name = "INT", default_value_t = 5)]
    pub gap_open: i32,

    /// SW gap extension penalty (positive)
    #[arg(long = "gap_ext", value_name = "INT", default_value_t = 2)]
    pub gap_ext: i32,

    /// %id threshold for OTU grouping (0..1)
    #[arg(long, value_name = "FLOAT", default_value_t = 0.97)]
    pub id: f64,

    /// Query coverage threshold for OTU grouping (0..1)
    #[arg(long, value_name = "FLOAT", default_value_t = 0.97)]
    pub coverage: f64,

    /// Three seed-placement intervals, e.g. '18,9,3' (defaults to L,L/2,3)
    #[arg(long, value_name = "INT,INT,INT")]
    pub passes: Option<String>,

    // ── indexing ──────────────────────────────────────────────────────
    /// Seed length (even, 8..26)
    #[arg(short = 'L', value_name = "INT", default_value_t = 18)]
    pub seed_len: u32,

    /// Shard memory budget in MB for index construction
    #[arg(short = 'm', value_name = "MB", default_value_t = 3072.0)]
    pub mem_mb: f64,

    /// Maximum positions stored per unique k-mer (0 = all)
    #[arg(long = "max_pos", value_name = "INT", default_value_t = 10_000)]
    pub max_pos: u32,

    /// Index every INTth k-mer window
    #[arg(long, value_name = "INT", default_value_t = 1)]
    pub interval: u32,

    // ── runtime ───────────────────────────────────────────────────────
    /// Number of processing threads
    #[arg(long, value_name = "INT", default_value_t = 2)]
    pub threads: u32,

    /// Index handling: 0 = use existing only, 1 = build only, 2 = build if missing
    #[arg(long, value_name = "0|1|2", default_value_t = 2)]
    pub index: u8,

    /// Task: 0 align, 1 post-process, 2 report, 3 align+post, 4 all
    #[arg(long, value_name = "0..4", default_value_t = 4)]
    pub task: u8,

    /// Compress output: -1 = as input, 0 = flat, 1 = gzip
    #[arg(long = "zip-out", value_name = "-1|0|1", default_value_t = -1, allow_hyphen_values = true)]
    pub zip_out: i8,

    /// Paired reads (fwd/rev interleaved in one file, or two files)
    #[arg(long)]
    pub paired: bool,

    /// If either mate aligns, output both to the aligned file
    #[arg(long = "paired_in")]
    pub paired_in: bool,

    /// Output both mates to the aligned file only if both align
    #[arg(long = "paired_out")]
    pub paired_out: bool,

    /// Two output files per destination, split by sense (fwd/rev)
    #[arg(long)]
    pub out2: bool,

    /// Separate paired and singleton aligned reads
    #[arg(long)]
    pub sout: bool,

    /// Debug verbosity 0..2
    #[arg(long = "dbg-level", value_name = "0|1|2", default_value_t = 0)]
    pub dbg_level: u8,

    /// Maximum accepted read length
    #[arg(long = "max_read_len", value_name = "INT", default_value_t = 30_000)]
    pub max_read_len: u32,
}

/// Which phases to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Align,
    Postproc,
    Report,
    AlignPost,
    All,
}

/// Blast output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlastFormat {
    Regular,
    Tabular,
}

/// Resolved, validated run parameters.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub indexfiles: Vec<(PathBuf, PathBuf)>, // (fasta, index prefix)
    pub readfiles: Vec<PathBuf>,
    pub workdir: PathBuf,
    pub kvdbdir: PathBuf,
    pub idxdir: PathBuf,
    pub readb: PathBuf,
    pub outdir: PathBuf,
    pub tmpdir: PathBuf,

    pub aligned_pfx: PathBuf,
    pub other_pfx: Option<PathBuf>,
    pub is_fastx: bool,
    pub is_sam: bool,
    pub is_sam_sq: bool,
    pub blast_format: Option<BlastFormat>,
    pub blast_cols: Vec<String>,
    pub is_otu_map: bool,
    pub is_denovo: bool,
    pub is_pid: bool,

    pub evalue: f64,
    pub num_alignments: i32, // -1 = best-policy mode
    pub num_best_hits: u32,  // 0 = unbounded
    pub min_lis: i32,        // -1 = first-N mode
    pub seed_hits: u32,
    pub edges: u32,
    pub edges_percent: bool,
    pub full_search: bool,
    pub forward: bool,
    pub reverse: bool,
    pub match_score: i32,
    pub mismatch: i32,
    pub gap_open: i32,
    pub gap_ext: i32,
    pub score_n: i32,
    pub min_id: f64,
    pub min_cov: f64,
    pub skiplengths: Vec<[u32; 3]>, // one triple per database

    pub seed_len: u32,
    pub mem_mb: f64,
    pub max_pos: u32,
    pub interval: u32,

    pub threads: u32,
    pub findex: u8,
    pub task: Task,
    pub zip_out: i8,
    pub is_paired: bool,
    pub is_paired_in: bool,
    pub is_paired_out: bool,
    pub is_out2: bool,
    pub is_sout: bool,
    pub dbg_level: u8,
    pub max_read_len: u32,

    pub cmdline: String,
}

impl RunConfig {
    pub fn from_cli(cli: Cli) -> Result<RunConfig> {
        let cmdline = env::args().collect::<Vec<_>>().join(" ");

        if cli.reads.is_empty() || cli.reads.len() > 2 {
            return Err(RibosiftError::Config {
                option: "reads",
                reason: format!("expected 1 or 2 read files, got {}", cli.reads.len()),
            });
        }

        if cli.seed_len % 2 != 0 || !(8..=26).contains(&cli.seed_len) {
            return Err(RibosiftError::Config {
                option: "L",
                reason: format!("seed length must be even and within [8, 26], got {}", cli.seed_len),
            });
        }

        if !(0.0..=1.0).contains(&cli.id) {
            return Err(RibosiftError::Config {
                option: "id",
                reason: "threshold must be within [0, 1]".into(),
            });
        }
        if !(0.0..=1.0).contains(&cli.coverage) {
            return Err(RibosiftError::Config {
                option: "coverage",
                reason: "threshold must be within [0, 1]".into(),
            });
        }

        // reference / index pairs
        let mut indexfiles = Vec::new();
        for spec in &cli.refs {
            let (fasta, idx) = match spec.split_once(',') {
                Some((f, i)) if !f.is_empty() => (f.to_string(), i.to_string()),
                _ => {
                    return Err(RibosiftError::Config {
                        option: "ref",
                        reason: format!("expected 'fasta,index-prefix', got '{spec}'"),
                    })
                }
            };
            if indexfiles.iter().any(|(f, _): &(PathBuf, PathBuf)| *f == PathBuf::from(&fasta)) {
                log::warn!("duplicate reference file in --ref list: {fasta}");
            }
            if !idx.is_empty() && indexfiles.iter().any(|(_, i): &(PathBuf, PathBuf)| *i == PathBuf::from(&idx)) {
                log::warn!("duplicate index name in --ref list: {idx} (will be searched redundantly)");
            }
            indexfiles.push((PathBuf::from(fasta), PathBuf::from(idx)));
        }

        // directories
        let workdir = cli.workdir.unwrap_or_else(|| {
            let home = env::var("HOME")
                .or_else(|_| env::var("USERPROFILE"))
                .unwrap_or_else(|_| ".".into());
            PathBuf::from(home).join("ribosift").join("run")
        });
        let kvdbdir = cli.kvdb.unwrap_or_else(|| workdir.join("kvdb"));
        let idxdir = cli.idx_dir.unwrap_or_else(|| workdir.join("idx"));
        let readb = workdir.join("readb");
        let outdir = workdir.join("out");
        let tmpdir = cli
            .tmpdir
            .or_else(|| env::var_os("TMPDIR").map(PathBuf::from))
            .or_else(|| env::var_os("TMP").map(PathBuf::from))
            .unwrap_or_else(env::temp_dir);

        // index prefixes default into idxdir, named after the reference file
        for (fasta, idx) in indexfiles.iter_mut() {
            if idx.as_os_str().is_empty() {
                let base = fasta.file_stem().unwrap_or(fasta.as_os_str());
                *idx = idxdir.join(base);
            }
        }

        // output prefixes
        let aligned_pfx = match &cli.aligned {
            Some(p) if !p.is_empty() => PathBuf::from(p),
            _ => outdir.join("aligned"),
        };
        let other_pfx = match &cli.other {
            Some(p) if !p.is_empty() => Some(PathBuf::from(p)),
            Some(_) => Some(outdir.join("other")),
            None => None,
        };

        // paired output combination rules
        let is_paired = cli.paired || cli.paired_in || cli.paired_out || cli.reads.len() == 2;
        if cli.paired_in && cli.paired_out {
            return Err(RibosiftError::Config {
                option: "paired_in",
                reason: "'paired_in' and 'paired_out' cannot be used together".into(),
            });
        }
        if cli.sout && (cli.paired_in || cli.paired_out) {
            return Err(RibosiftError::Config {
                option: "sout",
                reason: "'sout' cannot be used with 'paired_in' or 'paired_out'".into(),
            });
        }
        if (cli.out2 || cli.sout) && !is_paired {
            return Err(RibosiftError::Config {
                option: "out2",
                reason: "'out2' and 'sout' require paired reads".into(),
            });
        }
        if other_pfx.is_some() && !cli.fastx {
            return Err(RibosiftError::Config {
                option: "other",
                reason: "'other' requires 'fastx'".into(),
            });
        }

        // blast spec
        let (blast_format, blast_cols) = match &cli.blast {
            None => (None, Vec::new()),
            Some(spec) => {
                let mut it = spec.split_whitespace();
                let fmt = match it.next() {
                    Some("0") => BlastFormat::Regular,
                    Some("1") => BlastFormat::Tabular,
                    other => {
                        return Err(RibosiftError::Config {
                            option: "blast",
                            reason: format!("format must start with '0' or '1', got {other:?}"),
                        })
                    }
                };
                let cols: Vec<String> = it.map(|s| s.to_string()).collect();
                if fmt == BlastFormat::Regular && !cols.is_empty() {
                    return Err(RibosiftError::Config {
                        option: "blast",
                        reason: "pairwise format '0' accepts no extra fields".into(),
                    });
                }
                for c in &cols {
                    if c != "cigar" && c != "qcov" && c != "qstrand" {
                        return Err(RibosiftError::Config {
                            option: "blast",
                            reason: format!("unknown field '{c}'"),
                        });
                    }
                }
                (Some(fmt), cols)
            }
        };

        // best / first-N policies
        let (num_alignments, num_best_hits, min_lis) = if cli.no_best {
            if cli.best.is_some() || cli.min_lis.is_some() {
                return Err(RibosiftError::Config {
                    option: "no-best",
                    reason: "'best' and 'min_lis' cannot be combined with 'no-best'".into(),
                });
            }
            (cli.num_alignments.unwrap_or(1), 0, -1)
        } else {
            if cli.num_alignments.is_some() {
                return Err(RibosiftError::Config {
                    option: "num_alignments",
                    reason: "requires 'no-best'".into(),
                });
            }
            (-1, cli.best.unwrap_or(1), cli.min_lis.unwrap_or(2))
        };
        if cli.de_novo_otu && cli.no_best {
            return Err(RibosiftError::Config {
                option: "de_novo_otu",
                reason: "cannot be used with 'no-best' (grouping is done around the best alignment)".into(),
            });
        }

        // edges: literal count or percent of read length
        let (edges, edges_percent) = match cli.edges.strip_suffix('%') {
            Some(v) => (parse_u32("edges", v)?, true),
            None => (parse_u32("edges", &cli.edges)?, false),
        };

        // seed placement passes
        let skip = match &cli.passes {
            None => [0u32; 3],
            Some(s) => {
                let parts: Vec<&str> = s.split(',').collect();
                if parts.len() != 3 {
                    return Err(RibosiftError::Config {
                        option: "passes",
                        reason: "expected three comma-separated intervals".into(),
                    });
                }
                [
                    parse_u32("passes", parts[0])?,
                    parse_u32("passes", parts[1])?,
                    parse_u32("passes", parts[2])?,
                ]
            }
        };
        let skiplengths = vec![skip; indexfiles.len()];

        let task = match cli.task {
            0 => Task::Align,
            1 => Task::Postproc,
            2 => Task::Report,
            3 => Task::AlignPost,
            4 => Task::All,
            t => {
                return Err(RibosiftError::Config {
                    option: "task",
                    reason: format!("must be within 0..4, got {t}"),
                })
            }
        };

        if cli.forward_only && cli.reverse_only {
            return Err(RibosiftError::Config {
                option: "fwd",
                reason: "'-F' and '-R' cannot be combined; omit both to search both strands".into(),
            });
        }
        let (forward, reverse) = match (cli.forward_only, cli.reverse_only) {
            (true, false) => (true, false),
            (false, true) => (false, true),
            _ => (true, true),
        };

        if cli.mismatch > 0 {
            return Err(RibosiftError::Config {
                option: "mismatch",
                reason: "penalty must not be positive".into(),
            });
        }

        Ok(RunConfig {
            indexfiles,
            readfiles: cli.reads,
            workdir,
            kvdbdir,
            idxdir,
            readb,
            outdir,
            tmpdir,
            aligned_pfx,
            other_pfx,
            is_fastx: cli.fastx,
            is_sam: cli.sam,
            is_sam_sq: cli.sam_sq,
            blast_format,
            blast_cols,
            is_otu_map: cli.otu_map,
            is_denovo: cli.de_novo_otu,
            is_pid: cli.pid,
            evalue: cli.evalue,
            num_alignments,
            num_best_hits,
            min_lis,
            seed_hits: cli.num_seeds,
            edges,
            edges_percent,
            full_search: cli.full_search,
            forward,
            reverse,
            match_score: cli.match_score,
            mismatch: cli.mismatch,
            gap_open: cli.gap_open,
            gap_ext: cli.gap_ext,
            score_n: cli.score_n.unwrap_or(cli.mismatch),
            min_id: cli.id,
            min_cov: cli.coverage,
            skiplengths,
            seed_len: cli.seed_len,
            mem_mb: cli.mem_mb,
            max_pos: cli.max_pos,
            interval: cli.interval.max(1),
            threads: cli.threads.max(1),
            findex: cli.index,
            task,
            zip_out: cli.zip_out,
            is_paired,
            is_paired_in: cli.paired_in,
            is_paired_out: cli.paired_out,
            is_out2: cli.out2,
            is_sout: cli.sout,
            dbg_level: cli.dbg_level,
            max_read_len: cli.max_read_len,
            cmdline,
        })
    }

    /// K = L + 1, the full k-mer window.
    pub fn kbig(&self) -> u32 {
        self.seed_len + 1
    }

    /// P = L / 2, the partial window.
    pub fn partialwin(&self) -> u32 {
        self.seed_len / 2
    }

    /// The 5x5 row-major Smith-Waterman substitution matrix, N row and
    /// column set to the ambiguous score.
    pub fn scoring_matrix(&self) -> [i8; 25] {
        let mut m = [0i8; 25];
        for l in 0..4 {
            for c in 0..4 {
                m[l * 5 + c] = if l == c { self.match_score as i8 } else { self.mismatch as i8 };
            }
            m[l * 5 + 4] = self.score_n as i8;
        }
        for c in 0..5 {
            m[20 + c] = self.score_n as i8;
        }
        m
    }
}

fn parse_u32(option: &'static str, v: &str) -> Result<u32> {
    v.trim().parse().map_err(|_| RibosiftError::Config {
        option,
        reason: format!("not a number: '{v}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec!["ribosift", "--ref", "db.fa,dbidx", "--reads", "r.fq"]
    }

    fn cfg_from(mut extra: Vec<&'static str>) -> Result<RunConfig> {
        let mut args = base_args();
        args.append(&mut extra);
        RunConfig::from_cli(Cli::parse_from(args))
    }

    #[test]
    fn test_defaults() {
        let cfg = cfg_from(vec![]).unwrap();
        assert_eq!(cfg.seed_len, 18);
        assert_eq!(cfg.kbig(), 19);
        assert_eq!(cfg.partialwin(), 9);
        assert_eq!(cfg.num_best_hits, 1);
        assert_eq!(cfg.min_lis, 2);
        assert_eq!(cfg.num_alignments, -1);
        assert_eq!(cfg.seed_hits, 2);
        assert_eq!(cfg.edges, 4);
        assert!(!cfg.edges_percent);
        assert_eq!(cfg.score_n, -3);
        assert!(cfg.forward && cfg.reverse);
    }

    #[test]
    fn test_no_best_enables_first_n() {
        let cfg = cfg_from(vec!["--no-best", "--num_alignments", "3"]).unwrap();
        assert_eq!(cfg.num_alignments, 3);
        assert_eq!(cfg.min_lis, -1);
    }

    #[test]
    fn test_paired_in_out_conflict() {
        assert!(cfg_from(vec!["--paired_in", "--paired_out"]).is_err());
    }

    #[test]
    fn test_sout_conflicts_with_paired_in() {
        assert!(cfg_from(vec!["--paired_in", "--sout"]).is_err());
    }

    #[test]
    fn test_blast_spec() {
        let cfg = cfg_from(vec!["--blast", "1 cigar qcov"]).unwrap();
        assert_eq!(cfg.blast_format, Some(BlastFormat::Tabular));
        assert_eq!(cfg.blast_cols, vec!["cigar", "qcov"]);
        assert!(cfg_from(vec!["--blast", "0 cigar"]).is_err());
        assert!(cfg_from(vec!["--blast", "1 nope"]).is_err());
    }

    #[test]
    fn test_edges_percent() {
        let cfg = cfg_from(vec!["--edges", "10%"]).unwrap();
        assert_eq!(cfg.edges, 10);
        assert!(cfg.edges_percent);
    }

    #[test]
    fn test_odd_seed_len_rejected() {
        assert!(cfg_from(vec!["-L", "17"]).is_err());
        assert!(cfg_from(vec!["-L", "28"]).is_err());
    }

    #[test]
    fn test_scoring_matrix_layout() {
        let cfg = cfg_from(vec![]).unwrap();
        let m = cfg.scoring_matrix();
        assert_eq!(m[0], 2); // A-A
        assert_eq!(m[1], -3); // A-C
        assert_eq!(m[4], -3); // A-N
        assert_eq!(m[24], -3); // N-N
    }
}
