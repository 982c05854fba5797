//! report/blast.rs — BLAST output writer
//!
//! Format 0: blast-like pairwise blocks wrapped at 60 columns.
//! Format 1: tabular m8 rows with optional cigar / qcov / qstrand
//! columns. One record per stored alignment of the active shard.

use crate::align::sw;
use crate::cli::{BlastFormat, RunConfig};
use crate::error::Result;
use crate::index::stats::Refstats;
use crate::reads::Read;
use crate::refs::References;
use crate::report::OutWriter;
use crate::seq::NT_MAP;

const WRAP: usize = 60;

/// E = K·m·n·exp(−λ·S)
pub fn evalue(refstats: &Refstats, idx: usize, score: u16) -> f64 {
    let (lambda, k) = refstats.gumbel[idx];
    k * refstats.full_ref[idx] as f64
        * refstats.full_read[idx] as f64
        * (-lambda * score as f64).exp()
}

/// S' = (λ·S − ln K) / ln 2
pub fn bitscore(refstats: &Refstats, idx: usize, score: u16) -> u32 {
    let (lambda, k) = refstats.gumbel[idx];
    ((lambda * score as f64 - k.ln()) / std::f64::consts::LN_2) as u32
}

fn fmt_evalue(e: f64) -> String {
    if e < 0.01 {
        format!("{e:.2e}")
    } else {
        format!("{e:.3}")
    }
}

/// Append every alignment of this read that belongs to the loaded
/// reference shard.
pub fn append(
    w: &mut OutWriter,
    cfg: &RunConfig,
    read: &mut Read,
    refs: &References,
    refstats: &Refstats,
) -> Result<()> {
    if read.is03 {
        read.flip34();
    }
    let mut out = String::new();

    for i in 0..read.aln.alignv.len() {
        let a = read.aln.alignv[i].clone();
        if a.index_num != refs.num || a.part != refs.part {
            continue;
        }
        let idx = refs.num as usize;
        // present the read in the orientation it aligned in
        if a.strand == read.reversed {
            read.rev_int_str();
        }

        let ev = evalue(refstats, idx, a.score1);
        let bits = bitscore(refstats, idx, a.score1);
        let refseq = &refs.buffer[a.ref_num as usize];
        let strandmark = if a.strand { '+' } else { '-' };

        match cfg.blast_format {
            Some(BlastFormat::Regular) => {
                out.push_str(&pairwise_block(
                    read, &a, &refseq.id, &refseq.seq, ev, bits, strandmark,
                ));
            }
            Some(BlastFormat::Tabular) => {
                let (mismatches, gaps, matches) = sw::cigar_stats(
                    &a.cigar,
                    &refseq.seq,
                    a.ref_begin1,
                    &read.isequence,
                    a.read_begin1,
                );
                let total = (mismatches + gaps + matches) as f64;
                let pid = matches as f64 / total * 100.0;
                let aln_len = a.read_end1 - a.read_begin1 + 1;

                out.push_str(&format!(
                    "{}\t{}\t{:.2}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    read.seq_id(),
                    refseq.id,
                    pid,
                    aln_len,
                    mismatches,
                    gaps,
                    a.read_begin1 + 1,
                    a.read_end1 + 1,
                    a.ref_begin1 + 1,
                    a.ref_end1 + 1,
                    fmt_evalue(ev),
                    bits
                ));
                for col in &cfg.blast_cols {
                    match col.as_str() {
                        "cigar" => {
                            out.push('\t');
                            out.push_str(&sw::cigar_string(
                                &a.cigar,
                                a.read_begin1,
                                a.read_end1,
                                a.readlen,
                            ));
                        }
                        "qcov" => {
                            let cov = (a.read_end1 - a.read_begin1 + 1).unsigned_abs() as f64
                                / a.readlen as f64;
                            out.push_str(&format!("\t{:.2}", cov * 100.0));
                        }
                        "qstrand" => {
                            out.push('\t');
                            out.push(strandmark);
                        }
                        _ => {}
                    }
                }
                out.push('\n');
            }
            None => {}
        }
    }
    w.write_str(&out)
}

/// Render one pairwise block: target / marker / query rows expanded
/// column by column, wrapped at 60.
fn pairwise_block(
    read: &Read,
    a: &crate::reads::Align,
    ref_id: &str,
    refseq: &[u8],
    ev: f64,
    bits: u32,
    strandmark: char,
) -> String {
    let mut target = String::new();
    let mut marker = String::new();
    let mut query = String::new();
    let mut tpos: Vec<usize> = Vec::new(); // target coordinate per column
    let mut qpos: Vec<usize> = Vec::new();

    let mut q = a.ref_begin1 as usize;
    let mut p = a.read_begin1 as usize;
    for &word in &a.cigar {
        let len = sw::len_of(word);
        let op = sw::op_of(word);
        for _ in 0..len {
            match op {
                sw::CIGAR_M => {
                    let rc = NT_MAP[refseq[q] as usize] as char;
                    let pc = NT_MAP[read.isequence[p] as usize] as char;
                    target.push(rc);
                    query.push(pc);
                    marker.push(if rc == pc { '|' } else { '*' });
                    q += 1;
                    p += 1;
                }
                sw::CIGAR_I => {
                    target.push('-');
                    query.push(NT_MAP[read.isequence[p] as usize] as char);
                    marker.push(' ');
                    p += 1;
                }
                _ => {
                    target.push(NT_MAP[refseq[q] as usize] as char);
                    query.push('-');
                    marker.push(' ');
                    q += 1;
                }
            }
            tpos.push(q);
            qpos.push(p);
        }
    }

    let mut block = String::new();
    block.push_str(&format!("Sequence ID: {ref_id}\n"));
    block.push_str(&format!("Query ID: {}\n", read.seq_id()));
    block.push_str(&format!(
        "Score: {} bits ({})\tExpect: {}\tstrand: {}\n\n",
        a.score1,
        bits,
        fmt_evalue(ev),
        strandmark
    ));

    let ncols = target.len();
    let mut col = 0usize;
    let mut tstart = a.ref_begin1 as usize + 1;
    let mut pstart = a.read_begin1 as usize + 1;
    while col < ncols {
        let end = (col + WRAP).min(ncols);
        block.push_str(&format!("Target: {:>8}    {}    {}\n", tstart, &target[col..end], tpos[end - 1]));
        block.push_str(&format!("{:20}{}\n", "", &marker[col..end]));
        block.push_str(&format!("Query: {:>9}    {}    {}\n\n", pstart, &query[col..end], qpos[end - 1]));
        tstart = tpos[end - 1] + 1;
        pstart = qpos[end - 1] + 1;
        col = end;
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reads::Align;

    fn refstats_fixture() -> Refstats {
        Refstats {
            num_index_parts: vec![1],
            full_ref: vec![1000],
            full_read: vec![10_000],
            lnwin: vec![18],
            partialwin: vec![9],
            minimal_score: vec![5],
            gumbel: vec![(1.28, 0.5)],
            numseq: vec![1],
            shards: vec![vec![]],
            sam_sq: vec![vec![]],
            skiplengths: vec![[18, 9, 3]],
        }
    }

    #[test]
    fn test_evalue_decreases_with_score() {
        let rs = refstats_fixture();
        assert!(evalue(&rs, 0, 40) > evalue(&rs, 0, 60));
    }

    #[test]
    fn test_bitscore_grows_with_score() {
        let rs = refstats_fixture();
        assert!(bitscore(&rs, 0, 60) > bitscore(&rs, 0, 40));
    }

    #[test]
    fn test_fmt_evalue() {
        assert_eq!(fmt_evalue(0.5), "0.500");
        assert!(fmt_evalue(1e-30).contains('e'));
    }

    #[test]
    fn test_pairwise_block_shape() {
        let read = Read::from_wire("0_0\n@q\nACGTACGTAC\nIIIIIIIIII", 1, 1, 2, -1).unwrap();
        let (refseq, _) = crate::seq::encode_04(b"ACGTACGTAC");
        let a = Align {
            ref_num: 0,
            index_num: 0,
            part: 0,
            strand: true,
            ref_begin1: 0,
            ref_end1: 9,
            read_begin1: 0,
            read_end1: 9,
            score1: 20,
            cigar: vec![(10 << 4)],
            readlen: 10,
        };
        let block = pairwise_block(&read, &a, "ref1", &refseq, 1e-5, 30, '+');
        assert!(block.contains("Sequence ID: ref1"));
        assert!(block.contains("Query ID: q"));
        assert!(block.contains("ACGTACGTAC"));
        assert!(block.contains("||||||||||"));
    }
}
