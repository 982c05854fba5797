//! index/trie.rs — the mini burst trie
//!
//! One trie per (9-mer slot, direction). A trie node is an array of
//! four arms, one per nucleotide; each arm is Empty, a child node, or
//! a bucket of packed entries. A bucket entry is two little-endian
//! u32 words:
//!
//!   word 0 — the remaining suffix of the (L+1)-mer, 2 bits per base,
//!            base i at bit 2i (the arm bases consumed on the way down
//!            are not part of the word)
//!   word 1 — the k-mer id assigned by the minimal perfect hash
//!            (0 at build time, patched in the position pass)
//!
//! ON-DISK LAYOUT (one trie, breadth-first)
//! ─────────────────────────────────────────────────────────────────
//!  [4 × u8]  root arm flags (0 empty, 1 trie, 2 bucket)
//!  then, in FIFO order over all arms:
//!    flag 1 → 4 × u8 child arm flags (children join the queue)
//!    flag 2 → u32 bucket size, then the raw bucket bytes
//! ─────────────────────────────────────────────────────────────────

use std::collections::VecDeque;

use crate::error::{Result, RibosiftError};
use crate::seq::{ENTRYSIZE, THRESHOLD};

#[derive(Debug)]
pub enum NodeElement {
    Empty,
    Trie(Box<TrieNode>),
    Bucket(Vec<u8>),
}

pub type TrieNode = [NodeElement; 4];

pub fn new_node() -> Box<TrieNode> {
    Box::new([
        NodeElement::Empty,
        NodeElement::Empty,
        NodeElement::Empty,
        NodeElement::Empty,
    ])
}

/// Encode the `s` bases at `suffix[from..]` into one bucket word.
fn encode_tail(suffix: &[u8], from: usize, s: usize) -> u32 {
    let mut word = 0u32;
    for i in 0..s {
        word |= (suffix[from + i] as u32) << (2 * i);
    }
    word
}

/// Insert the (P+1)-base suffix of a k-mer window. The first bases
/// select trie arms; the remainder is appended to the terminal bucket.
/// Bursts the bucket when it outgrows THRESHOLD and the depth guard
/// still leaves suffixes of length >= 3.
pub fn insert(root: &mut TrieNode, suffix: &[u8], kbig: u32, partialwin: u32) {
    let mut node: &mut TrieNode = root;
    let mut depth = 0usize;

    // find the terminal arm
    loop {
        let arm = suffix[depth] as usize;
        depth += 1;
        if matches!(node[arm], NodeElement::Trie(_)) {
            node = match &mut node[arm] {
                NodeElement::Trie(child) => child.as_mut(),
                _ => unreachable!(),
            };
            continue;
        }

        let slot = &mut node[arm];
        if matches!(slot, NodeElement::Empty) {
            *slot = NodeElement::Bucket(Vec::with_capacity(ENTRYSIZE));
        }

        let bucket = match slot {
            NodeElement::Bucket(b) => b,
            _ => unreachable!(),
        };

        let s = partialwin as usize + 1 - depth;
        let word = encode_tail(suffix, depth, s);
        bucket.extend_from_slice(&word.to_le_bytes());
        bucket.extend_from_slice(&0u32.to_le_bytes());

        // smallest bucket must keep suffixes of at least 3 bases
        if (depth as u32) < kbig - partialwin - 3 && bucket.len() > THRESHOLD {
            burst(slot);
        }
        return;
    }
}

/// Split an oversized bucket: the leading base of every entry becomes
/// a trie arm, the rest of the entry shifts right by one base.
fn burst(slot: &mut NodeElement) {
    let bucket = match std::mem::replace(slot, NodeElement::Empty) {
        NodeElement::Bucket(b) => b,
        other => {
            *slot = other;
            return;
        }
    };

    let mut child = new_node();
    for entry in bucket.chunks_exact(ENTRYSIZE) {
        let word = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let arm = (word & 3) as usize;
        let shifted = word >> 2;

        if matches!(child[arm], NodeElement::Empty) {
            child[arm] = NodeElement::Bucket(Vec::with_capacity(ENTRYSIZE));
        }
        if let NodeElement::Bucket(b) = &mut child[arm] {
            b.extend_from_slice(&shifted.to_le_bytes());
            b.extend_from_slice(&entry[4..8]);
        }
    }
    *slot = NodeElement::Trie(child);
}

/// Search for the full (P+1)-base suffix of a k-mer window.
/// Returns true when the (L+1)-mer is present; clears `new_position`
/// as soon as any entry shares the L-mer prefix (all bases but the
/// last).
pub fn search(root: &TrieNode, suffix: &[u8], partialwin: u32, new_position: &mut bool) -> bool {
    let mut node: &TrieNode = root;
    let mut depth = 0usize;

    loop {
        let arm = suffix[depth] as usize;
        depth += 1;
        match &node[arm] {
            NodeElement::Trie(child) => node = child.as_ref(),
            NodeElement::Empty => return false,
            NodeElement::Bucket(bucket) => {
                let s = partialwin as usize + 1 - depth;
                let word = encode_tail(suffix, depth, s);
                let msk = (1u32 << (2 * (s - 1))) - 1;
                for entry in bucket.chunks_exact(ENTRYSIZE) {
                    let stored = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                    if (word & msk) == (stored & msk) {
                        *new_position = false;
                        if word == stored {
                            return true;
                        }
                    }
                }
                return false;
            }
        }
    }
}

/// Patch the k-mer id into the entry matching the full suffix.
pub fn set_id(root: &mut TrieNode, suffix: &[u8], partialwin: u32, id: u32) {
    let mut node: &mut TrieNode = root;
    let mut depth = 0usize;

    loop {
        let arm = suffix[depth] as usize;
        depth += 1;
        if matches!(node[arm], NodeElement::Trie(_)) {
            node = match &mut node[arm] {
                NodeElement::Trie(child) => child.as_mut(),
                _ => unreachable!(),
            };
            continue;
        }
        if let NodeElement::Bucket(bucket) = &mut node[arm] {
            let s = partialwin as usize + 1 - depth;
            let word = encode_tail(suffix, depth, s);
            for entry in bucket.chunks_exact_mut(ENTRYSIZE) {
                let stored = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                if word == stored {
                    entry[4..8].copy_from_slice(&id.to_le_bytes());
                }
            }
        }
        return;
    }
}

/// Probe with the P-base suffix of a read window (one base shorter
/// than the stored entries). Any entry sharing the L-mer prefix
/// matches; its id is returned.
pub fn probe(root: &TrieNode, suffix: &[u8], partialwin: u32) -> Option<u32> {
    let mut node: &TrieNode = root;
    let mut depth = 0usize;

    loop {
        if depth >= suffix.len() {
            return None;
        }
        let arm = suffix[depth] as usize;
        depth += 1;
        match &node[arm] {
            NodeElement::Trie(child) => node = child.as_ref(),
            NodeElement::Empty => return None,
            NodeElement::Bucket(bucket) => {
                let s = partialwin as usize - depth; // probe is one base short
                let word = encode_tail(suffix, depth, s);
                let msk = if s == 0 { 0 } else { (1u32 << (2 * s)) - 1 };
                for entry in bucket.chunks_exact(ENTRYSIZE) {
                    let stored = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                    if word == (stored & msk) {
                        return Some(u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]));
                    }
                }
                return None;
            }
        }
    }
}

/// Breadth-first serialization of one trie; `None` serializes to an
/// empty stream (size 0 on disk).
pub fn serialize(root: Option<&TrieNode>) -> Vec<u8> {
    let mut out = Vec::new();
    let root = match root {
        Some(r) => r,
        None => return out,
    };

    let mut queue: VecDeque<&NodeElement> = VecDeque::new();
    for arm in root.iter() {
        out.push(flag_of(arm));
        queue.push_back(arm);
    }

    while let Some(elem) = queue.pop_front() {
        match elem {
            NodeElement::Empty => {}
            NodeElement::Trie(child) => {
                for arm in child.iter() {
                    out.push(flag_of(arm));
                    queue.push_back(arm);
                }
            }
            NodeElement::Bucket(bucket) => {
                out.extend_from_slice(&(bucket.len() as u32).to_le_bytes());
                out.extend_from_slice(bucket);
            }
        }
    }
    out
}

fn flag_of(e: &NodeElement) -> u8 {
    match e {
        NodeElement::Empty => 0,
        NodeElement::Trie(_) => 1,
        NodeElement::Bucket(_) => 2,
    }
}

/// Rebuild one trie from its breadth-first stream. `buf` must hold
/// exactly the bytes `serialize` produced.
pub fn deserialize(buf: &[u8]) -> Result<Box<TrieNode>> {
    let corrupt = |reason: &str| RibosiftError::IndexCorrupt {
        path: "bursttrie".into(),
        reason: reason.to_string(),
    };

    enum Tmp {
        Empty,
        Child(usize),
        Bucket(Vec<u8>),
    }

    fn take<'a>(buf: &'a [u8], cur: &mut usize, n: usize) -> Option<&'a [u8]> {
        if *cur + n > buf.len() {
            return None;
        }
        let s = &buf[*cur..*cur + n];
        *cur += n;
        Some(s)
    }

    let mut cur = 0usize;

    let mut nodes: Vec<[Tmp; 4]> = Vec::new();
    let mut flags: VecDeque<u8> = VecDeque::new();
    let mut order: VecDeque<(usize, usize)> = VecDeque::new();

    for &f in take(buf, &mut cur, 4).ok_or_else(|| corrupt("truncated trie stream"))? {
        flags.push_back(f);
    }
    nodes.push([Tmp::Empty, Tmp::Empty, Tmp::Empty, Tmp::Empty]);
    for arm in 0..4 {
        order.push_back((0, arm));
    }

    while let Some((n, arm)) = order.pop_front() {
        let flag = flags.pop_front().ok_or_else(|| corrupt("flag queue drained early"))?;
        match flag {
            0 => {}
            1 => {
                for &f in take(buf, &mut cur, 4).ok_or_else(|| corrupt("truncated trie stream"))? {
                    flags.push_back(f);
                }
                let idx = nodes.len();
                nodes.push([Tmp::Empty, Tmp::Empty, Tmp::Empty, Tmp::Empty]);
                for a in 0..4 {
                    order.push_back((idx, a));
                }
                nodes[n][arm] = Tmp::Child(idx);
            }
            2 => {
                let sz = take(buf, &mut cur, 4).ok_or_else(|| corrupt("truncated trie stream"))?;
                let sz = u32::from_le_bytes([sz[0], sz[1], sz[2], sz[3]]) as usize;
                if sz % ENTRYSIZE != 0 {
                    return Err(corrupt("bucket size not a multiple of the entry size"));
                }
                let payload = take(buf, &mut cur, sz)
                    .ok_or_else(|| corrupt("truncated trie stream"))?
                    .to_vec();
                nodes[n][arm] = Tmp::Bucket(payload);
            }
            f => return Err(corrupt(&format!("unknown node flag {f}"))),
        }
    }
    if cur != buf.len() {
        return Err(corrupt("trailing bytes after trie stream"));
    }

    fn convert(nodes: &mut Vec<[Tmp; 4]>, idx: usize) -> Box<TrieNode> {
        let slots = std::mem::replace(
            &mut nodes[idx],
            [Tmp::Empty, Tmp::Empty, Tmp::Empty, Tmp::Empty],
        );
        let mut out = new_node();
        for (i, slot) in slots.into_iter().enumerate() {
            out[i] = match slot {
                Tmp::Empty => NodeElement::Empty,
                Tmp::Bucket(b) => NodeElement::Bucket(b),
                Tmp::Child(c) => NodeElement::Trie(convert(nodes, c)),
            };
        }
        out
    }

    Ok(convert(&mut nodes, 0))
}

/// Walk a trie and yield every bucket with the number of arm bases
/// consumed to reach it (used by the structural tests and counters).
pub fn visit_buckets<'a>(root: &'a TrieNode, mut f: impl FnMut(usize, &'a [u8])) {
    fn walk<'a>(node: &'a TrieNode, depth: usize, f: &mut impl FnMut(usize, &'a [u8])) {
        for arm in node.iter() {
            match arm {
                NodeElement::Empty => {}
                NodeElement::Bucket(b) => f(depth + 1, b),
                NodeElement::Trie(child) => walk(child, depth + 1, f),
            }
        }
    }
    walk(root, 0, &mut f);
}

#[cfg(test)]
mod tests {
    use super::*;

    const KBIG: u32 = 19;
    const PW: u32 = 9;

    fn suffix_of(bases: &[u8]) -> Vec<u8> {
        assert_eq!(bases.len(), PW as usize + 1);
        bases.to_vec()
    }

    #[test]
    fn test_insert_then_search() {
        let mut root = new_node();
        let sfx = suffix_of(&[0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
        let mut newpos = true;
        assert!(!search(&root, &sfx, PW, &mut newpos));
        insert(&mut root, &sfx, KBIG, PW);
        newpos = true;
        assert!(search(&root, &sfx, PW, &mut newpos));
        assert!(!newpos);
    }

    #[test]
    fn test_lmer_prefix_clears_new_position() {
        let mut root = new_node();
        let a = suffix_of(&[0, 1, 2, 3, 0, 1, 2, 3, 0, 1]);
        // same first 9 bases, different final base
        let b = suffix_of(&[0, 1, 2, 3, 0, 1, 2, 3, 0, 2]);
        insert(&mut root, &a, KBIG, PW);
        let mut newpos = true;
        assert!(!search(&root, &b, PW, &mut newpos));
        assert!(!newpos, "shared L-mer prefix must clear new_position");
    }

    #[test]
    fn test_set_id_and_probe() {
        let mut root = new_node();
        let sfx = suffix_of(&[3, 3, 1, 0, 2, 2, 0, 1, 3, 0]);
        insert(&mut root, &sfx, KBIG, PW);
        set_id(&mut root, &sfx, PW, 4242);
        // read probe uses only the first P bases of the suffix
        assert_eq!(probe(&root, &sfx[..PW as usize], PW), Some(4242));
        let other = [3, 3, 1, 0, 2, 2, 0, 1, 2];
        assert_eq!(probe(&root, &other, PW), None);
    }

    #[test]
    fn test_burst_keeps_min_suffix_len() {
        let mut root = new_node();
        // enough distinct suffixes to force bursts at every level allowed
        for a in 0..4u8 {
            for b in 0..4u8 {
                for c in 0..4u8 {
                    for d in 0..4u8 {
                        let sfx = [a, b, c, d, 0, 1, 2, 3, 0, 1];
                        insert(&mut root, &sfx, KBIG, PW);
                    }
                }
            }
        }
        // every reachable bucket holds entries of at least 3 bases:
        // depth is bounded by K - P - 3 so s = P + 1 - depth >= 3
        visit_buckets(&root, |depth, bucket| {
            assert!(depth as u32 <= KBIG - PW - 3);
            let s = PW as usize + 1 - depth;
            assert!(s >= 3);
            assert_eq!(bucket.len() % ENTRYSIZE, 0);
        });
    }

    #[test]
    fn test_serialize_roundtrip() {
        let mut root = new_node();
        let suffixes: Vec<Vec<u8>> = vec![
            vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1],
            vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 2],
            vec![1, 1, 1, 1, 2, 2, 2, 2, 3, 3],
            vec![3, 0, 3, 0, 3, 0, 3, 0, 3, 0],
        ];
        for s in &suffixes {
            insert(&mut root, s, KBIG, PW);
            set_id(&mut root, s, PW, 7);
        }
        let bytes = serialize(Some(&root));
        let rebuilt = deserialize(&bytes).unwrap();
        for s in &suffixes {
            let mut np = true;
            assert!(search(&rebuilt, s, PW, &mut np));
            assert_eq!(probe(&rebuilt, &s[..PW as usize], PW), Some(7));
        }
        // byte stream is stable
        assert_eq!(serialize(Some(&rebuilt)), bytes);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(deserialize(&[1, 2, 3]).is_err());
        assert!(deserialize(&[9, 0, 0, 0]).is_err());
    }
}
