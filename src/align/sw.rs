//! align/sw.rs — Smith-Waterman kernel wrapper and CIGAR arithmetic
//!
//! Local alignment of the numeric read slice against a reference
//! window, scored with the 5x5 substitution matrix. The kernel
//! result is converted into packed 32-bit CIGAR words (low 4 bits:
//! 0 = M, 1 = I consuming read, 2 = D consuming reference; high 28
//! bits: run length) and 0-based inclusive begin/end coordinates.

use bio::alignment::pairwise::Aligner;
use bio::alignment::AlignmentOperation;

#[derive(Debug, Clone)]
pub struct SwHit {
    pub score: u16,
    pub ref_begin1: i32,
    pub ref_end1: i32,
    pub read_begin1: i32,
    pub read_end1: i32,
    pub cigar: Vec<u32>,
}

pub const CIGAR_M: u32 = 0;
pub const CIGAR_I: u32 = 1;
pub const CIGAR_D: u32 = 2;

pub fn pack_op(op: u32, len: u32) -> u32 {
    (len << 4) | op
}

pub fn op_of(word: u32) -> u32 {
    word & 0xf
}

pub fn len_of(word: u32) -> u32 {
    word >> 4
}

/// Align `read` (numeric, 04 form) against `refwin` locally.
/// Returns None when no positive-scoring alignment exists.
pub fn local_align(
    read: &[u8],
    refwin: &[u8],
    matrix: &[i8; 25],
    gap_open: i32,
    gap_ext: i32,
) -> Option<SwHit> {
    if read.is_empty() || refwin.is_empty() {
        return None;
    }
    let score = |a: u8, b: u8| matrix[(a as usize) * 5 + b as usize] as i32;
    let mut aligner =
        Aligner::with_capacity(read.len(), refwin.len(), -gap_open, -gap_ext, &score);
    let aln = aligner.local(read, refwin);
    if aln.score <= 0 || aln.operations.is_empty() {
        return None;
    }

    let mut cigar: Vec<u32> = Vec::new();
    let mut run_op = u32::MAX;
    let mut run_len = 0u32;
    for op in &aln.operations {
        let code = match op {
            AlignmentOperation::Match | AlignmentOperation::Subst => CIGAR_M,
            AlignmentOperation::Ins => CIGAR_I,
            AlignmentOperation::Del => CIGAR_D,
            AlignmentOperation::Xclip(_) | AlignmentOperation::Yclip(_) => continue,
        };
        if code == run_op {
            run_len += 1;
        } else {
            if run_len > 0 {
                cigar.push(pack_op(run_op, run_len));
            }
            run_op = code;
            run_len = 1;
        }
    }
    if run_len > 0 {
        cigar.push(pack_op(run_op, run_len));
    }

    Some(SwHit {
        score: aln.score.clamp(0, u16::MAX as i32) as u16,
        ref_begin1: aln.ystart as i32,
        ref_end1: aln.yend as i32 - 1,
        read_begin1: aln.xstart as i32,
        read_end1: aln.xend as i32 - 1,
        cigar,
    })
}

/// Walk a CIGAR over the aligned slices: counts of mismatched,
/// gapped and matched columns.
pub fn cigar_stats(
    cigar: &[u32],
    refseq: &[u8],
    ref_begin1: i32,
    iseq: &[u8],
    read_begin1: i32,
) -> (u32, u32, u32) {
    let mut mismatches = 0u32;
    let mut gaps = 0u32;
    let mut matches = 0u32;
    let mut qb = ref_begin1 as usize;
    let mut pb = read_begin1 as usize;

    for &word in cigar {
        let len = len_of(word);
        match op_of(word) {
            CIGAR_M => {
                for _ in 0..len {
                    if refseq[qb] != iseq[pb] {
                        mismatches += 1;
                    } else {
                        matches += 1;
                    }
                    qb += 1;
                    pb += 1;
                }
            }
            CIGAR_I => {
                pb += len as usize;
                gaps += len;
            }
            _ => {
                qb += len as usize;
                gaps += len;
            }
        }
    }
    (mismatches, gaps, matches)
}

/// Render a packed CIGAR as text, with optional soft-clip flanks for
/// the unaligned read prefix/suffix.
pub fn cigar_string(cigar: &[u32], read_begin1: i32, read_end1: i32, readlen: u32) -> String {
    let mut s = String::new();
    if read_begin1 > 0 {
        s.push_str(&format!("{}S", read_begin1));
    }
    for &word in cigar {
        let c = match op_of(word) {
            CIGAR_M => 'M',
            CIGAR_I => 'I',
            _ => 'D',
        };
        s.push_str(&format!("{}{}", len_of(word), c));
    }
    let end_mask = readlen as i64 - read_end1 as i64 - 1;
    if end_mask > 0 {
        s.push_str(&format!("{}S", end_mask));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seq;

    fn matrix(mat: i8, mis: i8, n: i8) -> [i8; 25] {
        let mut m = [0i8; 25];
        for l in 0..4 {
            for c in 0..4 {
                m[l * 5 + c] = if l == c { mat } else { mis };
            }
            m[l * 5 + 4] = n;
        }
        for c in 0..5 {
            m[20 + c] = n;
        }
        m
    }

    #[test]
    fn test_perfect_match() {
        let (read, _) = seq::encode_04(b"ACGTACGTACGTACGTAC");
        let hit = local_align(&read, &read, &matrix(2, -3, -3), 5, 2).unwrap();
        assert_eq!(hit.score, 36);
        assert_eq!(hit.cigar, vec![pack_op(CIGAR_M, 18)]);
        assert_eq!(hit.read_begin1, 0);
        assert_eq!(hit.read_end1, 17);
        assert_eq!(hit.ref_begin1, 0);
        assert_eq!(hit.ref_end1, 17);
    }

    #[test]
    fn test_one_substitution() {
        let (refw, _) = seq::encode_04(b"ACGTACGTACGTACGTAC");
        let (read, _) = seq::encode_04(b"ACGTACGTAAGTACGTAC");
        let hit = local_align(&read, &refw, &matrix(2, -3, -3), 5, 2).unwrap();
        // 17 matches, 1 mismatch: 2*17 - 3 = 31
        assert_eq!(hit.score, 31);
        assert_eq!(hit.cigar, vec![pack_op(CIGAR_M, 18)]);
        let (mm, gaps, m) = cigar_stats(&hit.cigar, &refw, hit.ref_begin1, &read, hit.read_begin1);
        assert_eq!((mm, gaps, m), (1, 0, 17));
    }

    #[test]
    fn test_read_insertion() {
        let (refw, _) = seq::encode_04(b"ACGTACGTACGTACGTACGT");
        let (read, _) = seq::encode_04(b"ACGTACGTACTTACGTACGTACGT");
        let hit = local_align(&read, &refw, &matrix(2, -3, -3), 5, 2);
        assert!(hit.is_some());
    }

    #[test]
    fn test_cigar_conservation() {
        // M + D spans the reference, M + I spans the read
        let (refw, _) = seq::encode_04(b"AACCGGTTAACCGGTTAACC");
        let (read, _) = seq::encode_04(b"AACCGGTTACCGGTTAACC"); // one A deleted
        let hit = local_align(&read, &refw, &matrix(2, -3, -3), 5, 2).unwrap();
        let ref_span: u32 = hit
            .cigar
            .iter()
            .filter(|w| op_of(**w) != CIGAR_I)
            .map(|w| len_of(*w))
            .sum();
        let read_span: u32 = hit
            .cigar
            .iter()
            .filter(|w| op_of(**w) != CIGAR_D)
            .map(|w| len_of(*w))
            .sum();
        assert_eq!(ref_span as i32, hit.ref_end1 - hit.ref_begin1 + 1);
        assert_eq!(read_span as i32, hit.read_end1 - hit.read_begin1 + 1);
    }

    #[test]
    fn test_cigar_string_soft_clips() {
        let cigar = vec![pack_op(CIGAR_M, 10)];
        assert_eq!(cigar_string(&cigar, 2, 11, 15), "2S10M3S");
        assert_eq!(cigar_string(&cigar, 0, 9, 10), "10M");
    }
}
