//! report/summary.rs — the human-readable run log

use std::fs::File;
use std::io::Write;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::cli::RunConfig;
use crate::error::Result;
use crate::index::stats::Refstats;
use crate::reads::stats::Readstats;
use crate::report::with_suffix;

pub fn write(cfg: &RunConfig, refstats: &Refstats, readstats: &Readstats) -> Result<()> {
    let pid_sfx = if cfg.is_pid {
        format!("_{}", std::process::id())
    } else {
        String::new()
    };
    let path = with_suffix(&cfg.aligned_pfx, &format!("{pid_sfx}.log"));
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    info!("using summary file {}", path.display());
    let mut f = File::create(&path)?;
    f.write_all(to_string(cfg, refstats, readstats).as_bytes())?;
    Ok(())
}

pub fn to_string(cfg: &RunConfig, refstats: &Refstats, readstats: &Readstats) -> String {
    let mut s = String::new();
    let total = readstats.all_reads_count.max(1);
    let mapped = readstats.num_aligned.load(Ordering::Relaxed);

    s.push_str(&format!(" Command:\n    {}\n\n", cfg.cmdline));
    s.push_str(&format!(" Process pid = {}\n\n", std::process::id()));
    s.push_str(" Parameters summary:\n");
    for (i, (fasta, _)) in cfg.indexfiles.iter().enumerate() {
        s.push_str(&format!("    Reference file: {}\n", fasta.display()));
        s.push_str(&format!("        Seed length = {}\n", refstats.lnwin[i]));
        s.push_str(&format!(
            "        Pass 1 = {}, Pass 2 = {}, Pass 3 = {}\n",
            refstats.skiplengths[i][0], refstats.skiplengths[i][1], refstats.skiplengths[i][2]
        ));
        s.push_str(&format!("        Gumbel lambda = {:.6}\n", refstats.gumbel[i].0));
        s.push_str(&format!("        Gumbel K = {:.6}\n", refstats.gumbel[i].1));
        s.push_str(&format!(
            "        Minimal SW score based on E-value = {}\n",
            refstats.minimal_score[i]
        ));
    }
    s.push_str(&format!("    Number of seeds = {}\n", cfg.seed_hits));
    s.push_str(&format!("    Edges = {}{}\n", cfg.edges, if cfg.edges_percent { "%" } else { "" }));
    s.push_str(&format!("    SW match = {}\n", cfg.match_score));
    s.push_str(&format!("    SW mismatch = {}\n", cfg.mismatch));
    s.push_str(&format!("    SW gap open penalty = {}\n", cfg.gap_open));
    s.push_str(&format!("    SW gap extend penalty = {}\n", cfg.gap_ext));
    s.push_str(&format!("    SW ambiguous nucleotide = {}\n", cfg.score_n));
    s.push_str(&format!(
        "    SQ tags are {}output\n",
        if cfg.is_sam_sq { "" } else { "not " }
    ));
    s.push_str(&format!(
        "    Number of alignment processing threads = {}\n",
        cfg.threads
    ));
    for rf in &cfg.readfiles {
        s.push_str(&format!("    Reads file: {}\n", rf.display()));
    }
    s.push_str(&format!("    Total reads = {}\n\n", readstats.all_reads_count));

    s.push_str(" Results:\n");
    if cfg.is_denovo {
        s.push_str(&format!(
            "    Total reads for de novo clustering = {}\n",
            readstats.num_denovo.load(Ordering::Relaxed)
        ));
    }
    let ratio = mapped as f64 / total as f64;
    s.push_str(&format!(
        "    Total reads passing E-value threshold = {} ({:.2})\n",
        mapped,
        ratio * 100.0
    ));
    s.push_str(&format!(
        "    Total reads failing E-value threshold = {} ({:.2})\n",
        readstats.all_reads_count.saturating_sub(mapped),
        (1.0 - ratio) * 100.0
    ));
    if cfg.is_otu_map {
        let idcov = readstats.n_yid_ycov.load(Ordering::Relaxed);
        s.push_str(&format!(
            "    Total reads passing %id and %coverage thresholds = {} ({:.2})\n",
            idcov,
            idcov as f64 / total as f64 * 100.0
        ));
        s.push_str(&format!(
            "    Total OTUs = {}\n",
            readstats.total_otu.load(Ordering::Relaxed)
        ));
    }
    s.push_str(&format!("    Minimum read length = {}\n", readstats.min_read_len));
    s.push_str(&format!("    Maximum read length = {}\n", readstats.max_read_len));
    s.push_str(&format!(
        "    Mean read length    = {}\n\n",
        readstats.all_reads_len / total
    ));

    s.push_str(" Coverage by database:\n");
    for (i, (fasta, _)) in cfg.indexfiles.iter().enumerate() {
        let pcn = readstats.reads_matched_per_db[i].load(Ordering::Relaxed) as f64
            / total as f64
            * 100.0;
        s.push_str(&format!("    {}\t\t{:.2}\n", fasta.display(), pcn));
    }

    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    s.push_str(&format!("\n {ts}\n"));
    s
}
