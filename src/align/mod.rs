//! align/mod.rs — seed-and-extend alignment of one read
//!
//! Per (shard, read, strand): slide seed windows over the read and
//! probe the lookup table, group candidate hits by reference, locate
//! colinear runs with an LIS filter, then finish with banded local
//! Smith-Waterman against a reference window widened by `edges`.

pub mod gumbel;
pub mod lis;
pub mod sw;

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;

use log::debug;

use crate::cli::RunConfig;
use crate::index::stats::Refstats;
use crate::index::trie;
use crate::index::IndexShard;
use crate::reads::stats::Readstats;
use crate::reads::{Align, Read, SeedHit};
use crate::refs::References;

pub struct Aligner<'a> {
    pub cfg: &'a RunConfig,
    pub refstats: &'a Refstats,
    pub matrix: [i8; 25],
    /// Enumerate every sub-LIS of a window instead of accepting the
    /// first alignment per window.
    pub full_sub_lis: bool,
}

/// Round half-up to three decimal places.
pub fn round3(x: f64) -> f64 {
    ((x * 1000.0) + 0.5).floor() * 0.001
}

impl<'a> Aligner<'a> {
    pub fn new(cfg: &'a RunConfig, refstats: &'a Refstats) -> Aligner<'a> {
        Aligner { cfg, refstats, matrix: cfg.scoring_matrix(), full_sub_lis: false }
    }

    /// Align one read against the loaded shard, both strands unless
    /// restricted. The read's stored state is updated in place.
    pub fn align_read(
        &self,
        read: &mut Read,
        index: &IndexShard,
        refs: &References,
        rstats: &Readstats,
    ) {
        if !read.is_valid {
            rstats.num_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let lnwin = self.refstats.lnwin[index.num as usize] as usize;
        if read.sequence.len() < lnwin {
            debug!("read {} shorter than the seed window, skipped", read.id);
            rstats.num_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if read.sequence.len() as u32 > self.cfg.max_read_len {
            debug!("read {} longer than max_read_len, skipped", read.id);
            rstats.num_skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut read_to_count = !read.is_id_cov;
        if self.cfg.forward {
            self.search_strand(read, index, refs, rstats, &mut read_to_count);
        }
        if self.cfg.reverse {
            read.rev_int_str();
            self.search_strand(read, index, refs, rstats, &mut read_to_count);
            read.rev_int_str();
        }
        read.last_index = index.num;
        read.last_part = index.part;
    }

    /// Seed passes at the configured skip lengths, each followed by
    /// the LIS + SW stage when enough candidates accumulated.
    fn search_strand(
        &self,
        read: &mut Read,
        index: &IndexShard,
        refs: &References,
        rstats: &Readstats,
        read_to_count: &mut bool,
    ) {
        let idx = index.num as usize;
        let lnwin = self.refstats.lnwin[idx] as usize;
        let partialwin = self.refstats.partialwin[idx];
        let max_sw_score = read.max_sw_score(self.cfg.match_score);
        let last = read.isequence.len() - lnwin;

        let mut search = true;
        for pass in 0..3 {
            if !search && !self.cfg.full_search {
                break;
            }
            if !read.is03 {
                read.flip34();
            }
            let step = (self.refstats.skiplengths[idx][pass] as usize).max(1);

            read.hits.clear();
            let mut pos = 0usize;
            loop {
                let kf = crate::seq::pack(&read.isequence, pos, partialwin as usize) as u32;
                if let Some(root) = index.lookup.slots[kf as usize].trie_f.as_ref() {
                    let suffix = &read.isequence[pos + partialwin as usize..pos + lnwin];
                    if let Some(id) = trie::probe(root, suffix, partialwin) {
                        read.hits.push(SeedHit { id, win: pos as u32 });
                    }
                }
                if pos == last {
                    break;
                }
                pos = (pos + step).min(last);
            }

            if (read.hits.len() as u32) >= self.cfg.seed_hits {
                self.compute_lis_alignment(
                    read,
                    index,
                    refs,
                    rstats,
                    &mut search,
                    max_sw_score,
                    read_to_count,
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_lis_alignment(
        &self,
        read: &mut Read,
        index: &IndexShard,
        refs: &References,
        rstats: &Readstats,
        search: &mut bool,
        max_sw_score: u32,
        read_to_count: &mut bool,
    ) {
        let cfg = self.cfg;
        let idx = index.num as usize;
        let mut aligned = false;

        if (read.hits.len() as u32) < cfg.seed_hits {
            return;
        }

        // candidate references ranked by shared-seed frequency
        let mut freq_map: BTreeMap<u32, u32> = BTreeMap::new();
        for hit in &read.hits {
            for sp in &index.positions.entries[hit.id as usize] {
                *freq_map.entry(sp.seq).or_insert(0) += 1;
            }
        }
        let mut freq_vec: Vec<(u32, u32)> = freq_map
            .into_iter()
            .filter(|&(_, c)| c >= cfg.seed_hits)
            .collect();
        // count descending, reference ascending on ties
        freq_vec.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        'candidates: for k in 0..freq_vec.len() {
            if cfg.num_best_hits != 0 && read.max_sw_count == cfg.num_best_hits {
                break;
            }
            let (max_seq, max_occur) = freq_vec[k];
            if max_occur < cfg.seed_hits {
                break;
            }
            if cfg.min_lis > 0 && aligned && k > 0 && max_occur < freq_vec[k - 1].1 {
                read.best_left -= 1;
                if read.best_left < 1 {
                    break;
                }
            }
            if cfg.num_alignments > 0 && read.num_alignments_left <= 0 {
                break;
            }

            // all (ref_pos, read_pos) pairs on this reference
            let mut hits_on_genome: Vec<(u32, u32)> = Vec::new();
            for hit in &read.hits {
                for sp in &index.positions.entries[hit.id as usize] {
                    if sp.seq == max_seq {
                        hits_on_genome.push((sp.pos, hit.win));
                    }
                }
            }
            hits_on_genome.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
            if hits_on_genome.is_empty() {
                continue;
            }

            let readlen = read.isequence.len() as u32;
            let lnwin = self.refstats.lnwin[idx];

            let mut i3 = 0usize;
            let mut deq: VecDeque<(u32, u32)> = VecDeque::new();
            let mut begin = hits_on_genome[0].0;

            // sliding window of read length across the reference
            while i3 < hits_on_genome.len() {
                let stop = begin + readlen - lnwin + 1;
                let mut push = false;
                while i3 < hits_on_genome.len() && hits_on_genome[i3].0 <= stop {
                    deq.push_back(hits_on_genome[i3]);
                    push = true;
                    i3 += 1;
                }

                // a window that gained no new hit repeats the previous
                // alignment for nearly every sub-LIS; skip it
                let skip_window = !self.full_sub_lis && !push && aligned;
                if !skip_window {
                    aligned = false;

                    if (deq.len() as u32) >= cfg.seed_hits {
                        let list = lis::find_lis(&deq);
                        let mut list_n = 0usize;
                        loop {
                            if (list.len() as u32) >= cfg.seed_hits {
                                let (lcs_ref_start, lcs_que_start) = deq[list[list_n] as usize];
                                let outcome = self.extend_and_store(
                                    read,
                                    index,
                                    refs,
                                    rstats,
                                    max_seq,
                                    lcs_ref_start,
                                    lcs_que_start,
                                    max_sw_score,
                                    read_to_count,
                                );
                                if outcome.accepted {
                                    aligned = true;
                                    *search = false;
                                    if outcome.stop_read {
                                        break 'candidates;
                                    }
                                }
                            }
                            list_n += 1;
                            let more = self.full_sub_lis
                                && i3 >= hits_on_genome.len()
                                && list_n < list.len();
                            if !more {
                                break;
                            }
                        }
                    }
                }

                // advance: drop the leading hit and re-anchor
                deq.pop_front();
                match deq.front() {
                    Some(&(p, _)) => begin = p,
                    None => {
                        if i3 < hits_on_genome.len() {
                            begin = hits_on_genome[i3].0;
                        } else {
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Compute the SW window around one LIS anchor, run the kernel and
    /// store the alignment under the active policy.
    #[allow(clippy::too_many_arguments)]
    fn extend_and_store(
        &self,
        read: &mut Read,
        index: &IndexShard,
        refs: &References,
        rstats: &Readstats,
        max_seq: u32,
        lcs_ref_start: u32,
        lcs_que_start: u32,
        max_sw_score: u32,
        read_to_count: &mut bool,
    ) -> ExtendOutcome {
        let cfg = self.cfg;
        let idx = index.num as usize;
        let refseq = &refs.buffer[max_seq as usize].seq;
        let reflen = refseq.len() as u32;
        let readlen = read.isequence.len() as u32;

        let edges = if cfg.edges_percent {
            (cfg.edges as f64 / 100.0 * readlen as f64) as u32
        } else {
            cfg.edges
        };

        let mut head = 0u32;
        let mut tail = 0u32;
        let align_ref_start;
        let align_que_start;
        let align_length;

        if lcs_ref_start < lcs_que_start {
            // the read hangs off the reference's left end
            align_ref_start = 0;
            align_que_start = lcs_que_start - lcs_ref_start;
            if reflen < readlen {
                align_length = if align_que_start > readlen - reflen {
                    reflen - (align_que_start - (readlen - reflen))
                } else {
                    reflen
                };
            } else {
                tail = (reflen - align_ref_start - readlen).min(edges);
                align_length = readlen + head + tail - align_que_start;
            }
        } else {
            align_ref_start = lcs_ref_start - lcs_que_start;
            align_que_start = 0;
            head = align_ref_start.min(edges);
            if align_ref_start + readlen > reflen {
                // the read hangs off the reference's right end
                align_length = reflen - (align_ref_start - head);
            } else {
                tail = (reflen - align_ref_start - readlen).min(edges);
                align_length = readlen + head + tail;
            }
        }

        // 04 form addresses the 5x5 matrix during SW
        if read.is03 {
            read.flip34();
        }

        let que_from = align_que_start as usize;
        let que_to = (align_que_start + align_length.saturating_sub(head + tail))
            .min(readlen) as usize;
        let ref_from = (align_ref_start - head) as usize;
        let ref_to = (align_ref_start - head + align_length).min(reflen) as usize;
        if que_from >= que_to || ref_from >= ref_to {
            return ExtendOutcome { accepted: false, stop_read: false };
        }

        let hit = match sw::local_align(
            &read.isequence[que_from..que_to],
            &refseq[ref_from..ref_to],
            &self.matrix,
            cfg.gap_open,
            cfg.gap_ext,
        ) {
            Some(h) => h,
            None => return ExtendOutcome { accepted: false, stop_read: false },
        };
        if (hit.score as u32) <= self.refstats.minimal_score[idx] {
            return ExtendOutcome { accepted: false, stop_read: false };
        }

        // first success for this read bumps the global counters once
        if !read.is_hit {
            read.is_hit = true;
            read.is_denovo = true;
            rstats.num_aligned.fetch_add(1, Ordering::Relaxed);
            rstats.reads_matched_per_db[idx].fetch_add(1, Ordering::Relaxed);
        }

        let align = Align {
            ref_num: max_seq,
            index_num: index.num,
            part: index.part,
            strand: !read.reversed,
            ref_begin1: hit.ref_begin1 + ref_from as i32,
            ref_end1: hit.ref_end1 + ref_from as i32,
            read_begin1: hit.read_begin1 + align_que_start as i32,
            read_end1: hit.read_end1 + align_que_start as i32,
            score1: hit.score,
            cigar: hit.cigar,
            readlen,
        };
        let is_max = (hit.score as u32) == max_sw_score;

        let mut stop_read = false;
        if cfg.min_lis > -1 {
            // best-hits policy
            if !read.aln.alignv.is_empty() {
                let smallest = read.aln.min_index as usize;
                let highest = read.aln.max_index as usize;
                let size = read.aln.alignv.len() as u32;

                if cfg.num_best_hits == 0 || size < cfg.num_best_hits {
                    let beats_highest = align.score1 > read.aln.alignv[highest].score1;
                    read.aln.alignv.push(align);
                    if read.aln.alignv.len() as u32 == cfg.num_best_hits {
                        read.aln.min_index = find_min_index(read);
                    }
                    if beats_highest {
                        read.aln.max_index = (read.aln.alignv.len() - 1) as u32;
                    }
                    if is_max {
                        read.max_sw_count += 1;
                    }
                } else if align.score1 > read.aln.alignv[smallest].score1 {
                    if align.score1 > read.aln.alignv[highest].score1 {
                        read.aln.max_index = smallest as u32;
                    }
                    // rebalance the per-database tally for the displaced slot
                    let displaced_db = read.aln.alignv[smallest].index_num as usize;
                    rstats.reads_matched_per_db[displaced_db].fetch_sub(1, Ordering::Relaxed);
                    rstats.reads_matched_per_db[idx].fetch_add(1, Ordering::Relaxed);
                    read.aln.alignv[smallest] = align;
                    read.aln.min_index = find_min_index(read);
                    if is_max {
                        read.max_sw_count += 1;
                    }
                }
                // lower score than every stored alignment: dropped
            } else {
                read.aln.alignv.push(align);
                if is_max {
                    read.max_sw_count += 1;
                }
            }
            if cfg.num_best_hits != 0 && read.max_sw_count == cfg.num_best_hits {
                stop_read = true;
            }
        } else {
            // first-N policy
            let (mismatches, gaps, matches) = sw::cigar_stats(
                &align.cigar,
                refseq,
                align.ref_begin1,
                &read.isequence,
                align.read_begin1,
            );
            let align_len = (align.read_end1 + 1 - align.read_begin1).unsigned_abs();
            let total = (mismatches + gaps + matches) as f64;
            let id_r = round3(matches as f64 / total);
            let cov_r = round3(align_len as f64 / readlen as f64);
            let passes = id_r >= cfg.min_id && cov_r >= cfg.min_cov;

            read.aln.alignv.push(align);
            if is_max {
                read.max_sw_count += 1;
            }
            if cfg.num_alignments > 0 {
                read.num_alignments_left -= 1;
            }
            if passes {
                read.c_yid_ycov += 1;
                if *read_to_count {
                    rstats.n_yid_ycov.fetch_add(1, Ordering::Relaxed);
                    *read_to_count = false;
                    read.is_id_cov = true;
                }
                if cfg.is_denovo {
                    read.is_denovo = false;
                }
            }
            if cfg.num_alignments > 0 && read.num_alignments_left <= 0 {
                stop_read = true;
            }
        }

        ExtendOutcome { accepted: true, stop_read }
    }
}

struct ExtendOutcome {
    accepted: bool,
    stop_read: bool,
}

/// Index of the first lowest-scoring stored alignment.
fn find_min_index(read: &Read) -> u32 {
    let mut smallest = read.aln.alignv[0].score1;
    let mut index = 0u32;
    for (i, a) in read.aln.alignv.iter().enumerate() {
        if a.score1 < smallest {
            smallest = a.score1;
            index = i as u32;
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, RunConfig};
    use crate::index::{build, stats as istats, IndexShard};
    use crate::reads::stats::Readstats;
    use clap::Parser;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const REF_A: &str = "ACGTACGTACGTACGTACGTACGTGGCCTTAAGGCCTTAA"; // 40 nt

    fn cfg_for(fasta: &Path, pfx: &Path, workdir: &Path, extra: &[&str]) -> RunConfig {
        let refspec = format!("{},{}", fasta.display(), pfx.display());
        let mut args = vec![
            "ribosift".to_string(),
            "--ref".into(),
            refspec,
            "--reads".into(),
            "unused.fq".into(),
            "--workdir".into(),
            workdir.display().to_string(),
            "--tmpdir".into(),
            workdir.display().to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        RunConfig::from_cli(Cli::parse_from(args)).unwrap()
    }

    struct Fixture {
        cfg: RunConfig,
        refstats: Refstats,
        index: IndexShard,
        refs: References,
        rstats: Readstats,
        _dir: tempfile::TempDir,
    }

    fn fixture(ref_body: &str, extra: &[&str]) -> Fixture {
        let dir = tempdir().unwrap();
        let fasta = dir.path().join("db.fa");
        fs::write(&fasta, ref_body).unwrap();
        let pfx = dir.path().join("idx").join("db");
        let cfg = cfg_for(&fasta, &pfx, dir.path(), extra);

        build::build_all(&cfg).unwrap();
        let rstats = Readstats::new(10, 400, 40, 40, cfg.indexfiles.len());
        let refstats = Refstats::new(&cfg, &rstats).unwrap();
        let index = IndexShard::load(0, 0, &pfx, cfg.seed_len).unwrap();
        let db = istats::DbStats::load(&istats::stats_file(&pfx)).unwrap();
        let refs = References::load(0, 0, &fasta, &db.shards[0]).unwrap();

        Fixture { cfg, refstats, index, refs, rstats, _dir: dir }
    }

    fn read_of(seq: &str) -> Read {
        let wire = format!("0_0\n@q1\n{seq}\n{}", "I".repeat(seq.len()));
        Read::from_wire(&wire, 1, 1, 2, -1).unwrap()
    }

    use crate::index::stats::Refstats;

    #[test]
    fn test_perfect_alignment() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        let mut read = read_of(REF_A);
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert!(read.is_hit);
        assert_eq!(read.aln.alignv.len(), 1);
        let a = &read.aln.alignv[0];
        assert_eq!(a.score1, 80); // 2 * 40
        assert_eq!(a.cigar, vec![(40 << 4)]);
        assert_eq!(a.ref_begin1, 0);
        assert_eq!(a.ref_end1, 39);
        assert_eq!(a.read_begin1, 0);
        assert_eq!(a.read_end1, 39);
        assert!(a.strand);
        assert_eq!(fx.rstats.num_aligned.load(Ordering::Relaxed), 1);
        assert_eq!(fx.rstats.reads_matched_per_db[0].load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_substituted_read_scores_lower() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        // substitution at position 9 (C -> A within the ACGT run)
        let mut mutated: Vec<u8> = REF_A.bytes().collect();
        mutated[9] = b'A';
        let mutated = String::from_utf8(mutated).unwrap();
        let mut read = read_of(&mutated);
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert!(read.is_hit);
        let a = &read.aln.alignv[0];
        assert_eq!(a.score1, 2 * 39 - 3); // one mismatch
        assert_eq!(a.cigar, vec![(40 << 4)]);
        let (mm, gaps, m) = sw::cigar_stats(
            &a.cigar,
            &fx.refs.buffer[0].seq,
            a.ref_begin1,
            &read.isequence,
            a.read_begin1,
        );
        assert_eq!((mm, gaps, m), (1, 0, 39));
    }

    #[test]
    fn test_offset_read_aligns_inside_reference() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        let mut read = read_of(&REF_A[8..38]); // 30 nt, ref offset 8
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert!(read.is_hit);
        let a = &read.aln.alignv[0];
        assert_eq!(a.score1, 60);
        assert_eq!(a.ref_begin1, 8);
        assert_eq!(a.ref_end1, 37);
        assert_eq!(a.read_begin1, 0);
        assert_eq!(a.read_end1, 29);
    }

    #[test]
    fn test_reverse_complement_read() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        let rc: String = REF_A
            .bytes()
            .rev()
            .map(|b| match b {
                b'A' => 'T',
                b'C' => 'G',
                b'G' => 'C',
                _ => 'A',
            })
            .collect();
        let mut read = read_of(&rc);
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert!(read.is_hit);
        let a = &read.aln.alignv[0];
        assert_eq!(a.score1, 80);
        assert!(!a.strand, "a reverse-complement match reports the reverse strand");
    }

    #[test]
    fn test_best_policy_keeps_single_best() {
        // two references, the second differs in its tail so the read
        // scores higher on the first
        let ref_b = "ACGTACGTACGTACGTACGTACGTGGCCTTAATTTTGGGG";
        let fx = fixture(&format!(">r1\n{REF_A}\n>r2\n{ref_b}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        let mut read = read_of(REF_A);
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert_eq!(read.aln.alignv.len(), 1);
        assert_eq!(read.aln.alignv[0].ref_num, 0);
        assert_eq!(read.aln.alignv[0].score1, 80);
    }

    #[test]
    fn test_first_n_policy_caps_alignments_by_ascending_ref() {
        // three identical references; first-N keeps the first two by
        // ascending reference number (the candidate tie-break)
        let body = format!(">a\n{REF_A}\n>b\n{REF_A}\n>c\n{REF_A}\n");
        let fx = fixture(&body, &["--no-best", "--num_alignments", "2"]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);

        let mut read = read_of(REF_A);
        read.num_alignments_left = fx.cfg.num_alignments;
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);

        assert_eq!(read.aln.alignv.len(), 2);
        assert_eq!(read.aln.alignv[0].ref_num, 0);
        assert_eq!(read.aln.alignv[1].ref_num, 1);
        // id/cov both 100%: the read was counted once
        assert!(read.is_id_cov);
        assert_eq!(read.c_yid_ycov, 2);
        assert_eq!(fx.rstats.n_yid_ycov.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_acceptance_respects_minimal_score() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);
        let mut read = read_of(REF_A);
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);
        for a in &read.aln.alignv {
            assert!((a.score1 as u32) > fx.refstats.minimal_score[0]);
        }
    }

    #[test]
    fn test_short_read_skipped() {
        let fx = fixture(&format!(">r1\n{REF_A}\n"), &[]);
        let aligner = Aligner::new(&fx.cfg, &fx.refstats);
        let mut read = read_of("ACGTACGT"); // shorter than L
        aligner.align_read(&mut read, &fx.index, &fx.refs, &fx.rstats);
        assert!(!read.is_hit);
        assert_eq!(fx.rstats.num_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_round3_half_up() {
        assert_eq!(round3(0.9995), 1.0);
        assert_eq!(round3(0.9994), 0.999);
        assert_eq!(round3(0.97), 0.97);
    }
}
