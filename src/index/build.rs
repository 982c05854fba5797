//! index/build.rs — reference index construction
//!
//! One pass over the database collects background statistics and the
//! shard partition; each shard is then built in two passes:
//!
//!   scan pass     — count L/2-mers, grow the burst tries, stream each
//!                   distinct L-mer key to a scratch file
//!   position pass — build the minimal perfect hash over the keys,
//!                   patch ids into the tries and fill the position
//!                   table
//!
//! Artifacts are written to `<name>.tmp` and renamed on success, so a
//! failed build never leaves a half-open index behind.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use boomphf::Mphf;
use log::{debug, info, warn};

use crate::cli::RunConfig;
use crate::error::{Result, RibosiftError};
use crate::index::lookup::LookupTable;
use crate::index::positions::PositionTable;
use crate::index::stats::{self, DbStats, ShardSpan};
use crate::index::trie;
use crate::refs::{self, SeqMeta};
use crate::seq;

/// Estimated index memory for one sequence, in MB.
fn estimated_seq_mem(len: u64, kbig: u32) -> f64 {
    (len.saturating_sub(kbig as u64) + 1) as f64 * 9.5e-6
}

/// True when every artifact of every database exists and is non-empty.
pub fn is_ready(cfg: &RunConfig) -> bool {
    let mut found = 0usize;
    let mut total = 0usize;
    for (_, pfx) in &cfg.indexfiles {
        for path in [
            stats::kmer_file(pfx, 0),
            stats::trie_file(pfx, 0),
            stats::pos_file(pfx, 0),
            stats::stats_file(pfx),
        ] {
            total += 1;
            if fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
                found += 1;
            }
        }
    }
    if found == total {
        info!("found {found} non-empty index files, skipping indexing");
        true
    } else {
        if found > 0 {
            info!("found {found}/{total} index files, going to re-build");
        }
        false
    }
}

/// Build the index for every `(fasta, index-prefix)` pair.
pub fn build_all(cfg: &RunConfig) -> Result<()> {
    for (fasta, pfx) in &cfg.indexfiles {
        if let Some(dir) = pfx.parent() {
            fs::create_dir_all(dir)?;
        }
        build_db(cfg, fasta, pfx)?;
    }
    Ok(())
}

fn build_db(cfg: &RunConfig, fasta: &Path, pfx: &Path) -> Result<()> {
    let kbig = cfg.kbig();
    info!(
        "indexing {} under {} (K = {}, interval = {}, max_pos = {})",
        fasta.display(),
        pfx.display(),
        kbig,
        cfg.interval,
        cfg.max_pos
    );

    // database-wide statistics pass
    let metas = refs::scan_fasta(fasta)?;
    let src_size = fs::metadata(fasta)?.len();
    let mut freqs_n = [0u64; 4];
    let mut full_len = 0u64;
    let mut sam_sq = Vec::with_capacity(metas.len());
    {
        let mut f = File::open(fasta)?;
        for (i, meta) in metas.iter().enumerate() {
            if meta.len < kbig as u64 {
                return Err(RibosiftError::RefSeqTooShort {
                    path: fasta.into(),
                    seq: i as u64,
                    len: meta.len as usize,
                    need: kbig as usize,
                });
            }
            let bases = refs::read_bases(&mut f, meta)?;
            for &b in &bases {
                if b != b'N' && b != b'n' {
                    freqs_n[seq::MAP_NT[(b as usize) & 0x7f] as usize] += 1;
                }
            }
            full_len += meta.len;
            let id = meta.header.split_whitespace().next().unwrap_or("").to_string();
            sam_sq.push((id, meta.len as u32));
        }
    }
    let total_nt: u64 = freqs_n.iter().sum();
    let freqs = if total_nt > 0 {
        [
            freqs_n[0] as f64 / total_nt as f64,
            freqs_n[1] as f64 / total_nt as f64,
            freqs_n[2] as f64 / total_nt as f64,
            freqs_n[3] as f64 / total_nt as f64,
        ]
    } else {
        [0.25; 4]
    };

    // partition sequences into memory-bounded shards
    let mut shards: Vec<(Vec<usize>, ShardSpan)> = Vec::new();
    let mut cur: Vec<usize> = Vec::new();
    let mut cur_mem = 0f64;
    for (i, meta) in metas.iter().enumerate() {
        let est = estimated_seq_mem(meta.len, kbig);
        if est > cfg.mem_mb {
            return Err(RibosiftError::SeqExceedsBudget { need_mb: est });
        }
        if !cur.is_empty() && cur_mem + est > cfg.mem_mb {
            shards.push(finish_shard(&metas, std::mem::take(&mut cur)));
            cur_mem = 0.0;
        }
        cur.push(i);
        cur_mem += est;
    }
    if !cur.is_empty() {
        shards.push(finish_shard(&metas, cur));
    }
    info!("database {} split into {} index shard(s)", fasta.display(), shards.len());

    for (part, (seq_ids, _span)) in shards.iter().enumerate() {
        build_shard(cfg, fasta, pfx, part as u16, &metas, seq_ids)?;
    }

    let db = DbStats {
        src_size,
        src_path: fasta.to_string_lossy().into_owned(),
        freqs,
        full_len,
        lnwin: cfg.seed_len,
        numseq: metas.len() as u64,
        shards: shards.iter().map(|(_, s)| *s).collect(),
        sam_sq,
    };
    let stats_path = stats::stats_file(pfx);
    let tmp = tmp_name(&stats_path);
    db.write(&tmp)?;
    fs::rename(&tmp, &stats_path)?;
    info!("wrote database statistics to {}", stats_path.display());
    Ok(())
}

fn finish_shard(metas: &[SeqMeta], ids: Vec<usize>) -> (Vec<usize>, ShardSpan) {
    let first = &metas[ids[0]];
    let last = &metas[ids[ids.len() - 1]];
    let span = ShardSpan {
        start_offset: first.offset,
        byte_span: last.offset + last.span - first.offset,
        seq_count: ids.len() as u32,
    };
    (ids, span)
}

fn build_shard(
    cfg: &RunConfig,
    fasta: &Path,
    pfx: &Path,
    part: u16,
    metas: &[SeqMeta],
    seq_ids: &[usize],
) -> Result<()> {
    let kbig = cfg.kbig();
    let partialwin = cfg.partialwin();
    let lnwin = cfg.seed_len;
    info!("building index shard {part} ({} sequences)", seq_ids.len());

    let mut lookup = LookupTable::new(lnwin);
    let mut incremented_by_forward = vec![false; 1usize << lnwin];
    let mut number_elements = 0u32;

    let keys_path = cfg.tmpdir.join(format!("ribosift_keys_{}.txt", std::process::id()));
    let mut keys_out = BufWriter::new(File::create(&keys_path)?);

    let mut f = File::open(fasta)?;
    let mut rev_suffix = vec![0u8; partialwin as usize + 1];

    // scan pass: counts, tries, distinct L-mer keys
    for &si in seq_ids {
        let bases = refs::read_bases(&mut f, &metas[si])?;
        let iseq = seq::encode_index(&bases);

        for (pos, kf, kr, kmer) in seq::windows(&iseq, kbig, partialwin, cfg.interval) {
            let fwd_suffix = &iseq[pos + partialwin as usize..pos + kbig as usize];
            for (i, b) in rev_suffix.iter_mut().enumerate() {
                *b = iseq[pos + partialwin as usize - i];
            }

            lookup.slots[kf as usize].count += 1;
            incremented_by_forward[kf as usize] = true;
            if !incremented_by_forward[kr as usize] {
                lookup.slots[kr as usize].count += 1;
            }

            // forward k-mer
            let mut new_position = true;
            let fwd_root = lookup.slots[kf as usize].trie_f.get_or_insert_with(trie::new_node);
            if !trie::search(fwd_root, fwd_suffix, partialwin, &mut new_position) {
                trie::insert(fwd_root, fwd_suffix, kbig, partialwin);
            }
            if new_position {
                number_elements += 1;
                writeln!(keys_out, "{}", kmer >> 2)?;
            }

            // reverse k-mer
            let mut rev_new = true;
            let rev_root = lookup.slots[kr as usize].trie_r.get_or_insert_with(trie::new_node);
            if !trie::search(rev_root, &rev_suffix, partialwin, &mut rev_new) {
                trie::insert(rev_root, &rev_suffix, kbig, partialwin);
            }
        }
    }
    keys_out.flush()?;
    drop(keys_out);

    if log::log_enabled!(log::Level::Debug) {
        let mut n_buckets = 0u64;
        let mut bucket_bytes = 0u64;
        for slot in &lookup.slots {
            for root in [slot.trie_f.as_deref(), slot.trie_r.as_deref()].into_iter().flatten() {
                trie::visit_buckets(root, |_, b| {
                    n_buckets += 1;
                    bucket_bytes += b.len() as u64;
                });
            }
        }
        debug!("shard {part}: {n_buckets} buckets holding {bucket_bytes} bytes");
    }

    // minimal perfect hash over the distinct keys
    let keys = read_keys(&keys_path)?;
    if keys.len() != number_elements as usize {
        return Err(RibosiftError::IndexCorrupt {
            path: keys_path.clone(),
            reason: format!("key count {} != distinct count {}", keys.len(), number_elements),
        });
    }
    info!("shard {part}: {number_elements} distinct {}-mers", kbig - 1);
    let mph = if keys.is_empty() { None } else { Some(Mphf::new(1.7, &keys)) };
    if let Err(e) = fs::remove_file(&keys_path) {
        warn!("could not delete scratch file {}: {e}", keys_path.display());
    }

    // position pass: patch ids, fill the position table
    let mut positions = PositionTable::new(number_elements);
    for (seq_i, &si) in seq_ids.iter().enumerate() {
        let bases = refs::read_bases(&mut f, &metas[si])?;
        let iseq = seq::encode_index(&bases);

        for (pos, kf, kr, kmer) in seq::windows(&iseq, kbig, partialwin, cfg.interval) {
            let fwd_suffix = &iseq[pos + partialwin as usize..pos + kbig as usize];
            for (i, b) in rev_suffix.iter_mut().enumerate() {
                *b = iseq[pos + partialwin as usize - i];
            }

            let id = match &mph {
                Some(m) => m.hash(&(kmer >> 2)) as u32,
                None => continue,
            };

            if let Some(root) = lookup.slots[kf as usize].trie_f.as_mut() {
                trie::set_id(root, fwd_suffix, partialwin, id);
            }
            if let Some(root) = lookup.slots[kr as usize].trie_r.as_mut() {
                trie::set_id(root, &rev_suffix, partialwin, id);
            }
            positions.add(id, seq_i as u32, pos as u32, cfg.max_pos);
        }
    }

    // emit artifacts
    let kmer_path = stats::kmer_file(pfx, part);
    let trie_path = stats::trie_file(pfx, part);
    let pos_path = stats::pos_file(pfx, part);

    let tmp = tmp_name(&kmer_path);
    lookup.write_counts(&tmp)?;
    fs::rename(&tmp, &kmer_path)?;

    let tmp = tmp_name(&trie_path);
    lookup.write_tries(&tmp)?;
    fs::rename(&tmp, &trie_path)?;

    let tmp = tmp_name(&pos_path);
    positions.write(&tmp)?;
    fs::rename(&tmp, &pos_path)?;

    info!("shard {part} written: {}, {}, {}", kmer_path.display(), trie_path.display(), pos_path.display());
    Ok(())
}

fn read_keys(path: &Path) -> Result<Vec<u64>> {
    let mut keys = Vec::new();
    let r = BufReader::new(File::open(path)?);
    for line in r.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let key = line.parse::<u64>().map_err(|_| RibosiftError::IndexCorrupt {
            path: path.into(),
            reason: format!("bad key line '{line}'"),
        })?;
        keys.push(key);
    }
    Ok(keys)
}

fn tmp_name(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}
