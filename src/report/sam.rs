//! report/sam.rs — SAM output writer
//!
//! One record per stored alignment; the unaligned read prefix and
//! suffix become soft clips. The header is written once into the
//! first shard file so the merged output starts with it.

use crate::align::sw;
use crate::cli::RunConfig;
use crate::error::Result;
use crate::index::stats::Refstats;
use crate::reads::{Format, Read};
use crate::refs::References;
use crate::report::OutWriter;

pub fn header(cfg: &RunConfig, refstats: &Refstats) -> String {
    let mut h = String::from("@HD\tVN:1.0\tSO:unsorted\n");
    if cfg.is_sam_sq {
        for db in &refstats.sam_sq {
            for (id, len) in db {
                h.push_str(&format!("@SQ\tSN:{id}\tLN:{len}\n"));
            }
        }
    }
    h.push_str(&format!(
        "@PG\tID:ribosift\tPN:ribosift\tVN:{}\n",
        env!("CARGO_PKG_VERSION")
    ));
    h
}

fn revcomp_text(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| match b {
            b'A' | b'a' => 'T',
            b'C' | b'c' => 'G',
            b'G' | b'g' => 'C',
            b'T' | b't' | b'U' | b'u' => 'A',
            _ => 'N',
        })
        .collect()
}

pub fn append(
    w: &mut OutWriter,
    read: &Read,
    refs: &References,
) -> Result<()> {
    let mut out = String::new();
    for a in &read.aln.alignv {
        if a.index_num != refs.num || a.part != refs.part {
            continue;
        }
        let flag = if a.strand { 0 } else { 16 };
        let rname = &refs.buffer[a.ref_num as usize].id;
        let cigar = sw::cigar_string(&a.cigar, a.read_begin1, a.read_end1, a.readlen);
        let (seq, qual) = if a.strand {
            (read.sequence.clone(), read.quality.clone())
        } else {
            (
                revcomp_text(&read.sequence),
                read.quality.chars().rev().collect(),
            )
        };
        let qual = if read.format == Format::Fastq && !qual.is_empty() {
            qual
        } else {
            "*".to_string()
        };

        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t255\t{}\t*\t0\t0\t{}\t{}\tAS:i:{}\n",
            read.seq_id(),
            flag,
            rname,
            a.ref_begin1 + 1,
            cigar,
            seq,
            qual,
            a.score1
        ));
    }
    w.write_str(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revcomp_text() {
        assert_eq!(revcomp_text("ACGTN"), "NACGT");
        assert_eq!(revcomp_text("aacg"), "CGTT");
    }

    #[test]
    fn test_header_contains_sq_when_enabled() {
        use crate::cli::Cli;
        use clap::Parser;

        let cfg = RunConfig::from_cli(Cli::parse_from([
            "ribosift", "--ref", "db.fa,idx", "--reads", "r.fq", "--sam", "--SQ",
        ]))
        .unwrap();
        let rs = Refstats {
            num_index_parts: vec![1],
            full_ref: vec![100],
            full_read: vec![100],
            lnwin: vec![18],
            partialwin: vec![9],
            minimal_score: vec![0],
            gumbel: vec![(1.0, 0.5)],
            numseq: vec![1],
            shards: vec![vec![]],
            sam_sq: vec![vec![("chr_a".into(), 1542)]],
            skiplengths: vec![[18, 9, 3]],
        };
        let h = header(&cfg, &rs);
        assert!(h.starts_with("@HD"));
        assert!(h.contains("@SQ\tSN:chr_a\tLN:1542"));
        assert!(h.contains("@PG"));
    }
}
