//! align/lis.rs — longest increasing subsequence over seed hits
//!
//! Patience-sort LIS over (ref_pos, read_pos) pairs keyed by
//! read_pos. Returns the indices of one maximal strictly-increasing
//! chain, in increasing order.

use std::collections::VecDeque;

pub fn find_lis(a: &VecDeque<(u32, u32)>) -> Vec<u32> {
    let mut b: Vec<u32> = Vec::new();
    if a.is_empty() {
        return b;
    }
    let mut p = vec![0u32; a.len()];
    b.push(0);

    for i in 1..a.len() as u32 {
        // extend the current longest chain
        if a[*b.last().expect("b is non-empty") as usize].1 < a[i as usize].1 {
            p[i as usize] = *b.last().expect("b is non-empty");
            b.push(i);
            continue;
        }

        // binary search the smallest tail element >= a[i]
        let (mut u, mut v) = (0usize, b.len() - 1);
        while u < v {
            let c = (u + v) / 2;
            if a[b[c] as usize].1 < a[i as usize].1 {
                u = c + 1;
            } else {
                v = c;
            }
        }

        if a[i as usize].1 < a[b[u] as usize].1 {
            if u > 0 {
                p[i as usize] = b[u - 1];
            }
            b[u] = i;
        }
    }

    // walk the predecessors back from the last tail
    let mut u = b.len();
    let mut v = *b.last().expect("b is non-empty");
    while u > 0 {
        u -= 1;
        b[u] = v;
        v = p[v as usize];
    }
    b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dq(pairs: &[(u32, u32)]) -> VecDeque<(u32, u32)> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_empty() {
        assert!(find_lis(&dq(&[])).is_empty());
    }

    #[test]
    fn test_single() {
        assert_eq!(find_lis(&dq(&[(5, 7)])), vec![0]);
    }

    #[test]
    fn test_increasing_run() {
        let a = dq(&[(0, 1), (10, 2), (20, 3), (30, 4)]);
        assert_eq!(find_lis(&a), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_permutation_max_length() {
        // read positions 2,8,9,5,6,7,1,3,4 → LIS 2,5,6,7 or 2,3,4...
        let a = dq(&[
            (0, 2),
            (1, 8),
            (2, 9),
            (3, 5),
            (4, 6),
            (5, 7),
            (6, 1),
            (7, 3),
            (8, 4),
        ]);
        let lis = find_lis(&a);
        assert_eq!(lis.len(), 4);
        // strictly increasing in read_pos, increasing indices
        for w in lis.windows(2) {
            assert!(w[0] < w[1]);
            assert!(a[w[0] as usize].1 < a[w[1] as usize].1);
        }
    }

    #[test]
    fn test_decreasing_gives_single() {
        let a = dq(&[(0, 9), (1, 7), (2, 5), (3, 3)]);
        assert_eq!(find_lis(&a).len(), 1);
    }
}
