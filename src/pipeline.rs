//! pipeline.rs — task orchestration
//!
//! Drives the phases over `shard × index part × reads`: the reference
//! and index shard are loaded once per part, every worker thread then
//! consumes its private read shard without synchronization, carrying
//! per-read state through the KVDB. Post-processing derives the OTU
//! map and the de novo set; reporting writes and merges the outputs.

use std::collections::BTreeMap;
use std::fs;
use std::sync::atomic::Ordering;
use std::thread;

use log::{info, warn};

use crate::align::{round3, sw, Aligner};
use crate::cli::{RunConfig, Task};
use crate::error::{Result, RibosiftError};
use crate::index::stats::{stats_file, Refstats};
use crate::index::{build, IndexShard};
use crate::reads::feed::{FeedType, Readfeed};
use crate::reads::kvdb::Kvdb;
use crate::reads::stats::Readstats;
use crate::reads::Read;
use crate::refs::References;
use crate::report::denovo::DenovoReporter;
use crate::report::fastx::FastxReporter;
use crate::report::otumap::OtuMap;
use crate::report::{blast, sam, summary, zip_out, OutWriter, Output};

pub fn run(cfg: &RunConfig) -> Result<()> {
    fs::create_dir_all(&cfg.workdir)?;
    fs::create_dir_all(&cfg.outdir)?;

    match cfg.findex {
        0 => {
            if !build::is_ready(cfg) {
                return Err(RibosiftError::IndexMissing(stats_file(&cfg.indexfiles[0].1)));
            }
        }
        1 => {
            if !build::is_ready(cfg) {
                build::build_all(cfg)?;
            }
            info!("index build requested ('--index 1'), nothing else to do");
            return Ok(());
        }
        _ => {
            if !build::is_ready(cfg) {
                build::build_all(cfg)?;
            }
        }
    }

    let feed = Readfeed::new(
        FeedType::SplitReads,
        &cfg.readfiles,
        cfg.threads as usize,
        &cfg.readb,
        cfg.is_paired,
    )?;
    let kvdb = Kvdb::open(&cfg.kvdbdir)?;

    let mut readstats = Readstats::new(
        feed.num_reads_tot,
        feed.length_all,
        feed.min_read_len,
        feed.max_read_len,
        cfg.indexfiles.len(),
    );
    if matches!(cfg.task, Task::Postproc | Task::Report) && !readstats.restore(&kvdb)? {
        warn!("no persisted read statistics found; counters start at zero");
    }
    let refstats = Refstats::new(cfg, &readstats)?;

    match cfg.task {
        Task::Align => {
            align_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
        }
        Task::Postproc => {
            postproc_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
        }
        Task::Report => {
            report_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
        }
        Task::AlignPost => {
            align_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
            postproc_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
        }
        Task::All => {
            align_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
            postproc_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
            report_task(cfg, &feed, &kvdb, &readstats, &refstats)?;
        }
    }

    readstats.store(&kvdb)?;
    kvdb.flush()?;
    Ok(())
}

/// Align every read against every index shard of every database.
fn align_task(
    cfg: &RunConfig,
    feed: &Readfeed,
    kvdb: &Kvdb,
    readstats: &Readstats,
    refstats: &Refstats,
) -> Result<()> {
    info!("==== alignment started ====");
    let nsf = feed.num_split_files() as u32;
    let ns = feed.num_senses as u32;

    for idx in 0..cfg.indexfiles.len() as u16 {
        for part in 0..refstats.num_index_parts[idx as usize] {
            let (fasta, pfx) = &cfg.indexfiles[idx as usize];
            info!("loading reference {idx} part {part}");
            let refs = References::load(
                idx,
                part,
                fasta,
                &refstats.shards[idx as usize][part as usize],
            )?;
            let index = IndexShard::load(idx, part, pfx, refstats.lnwin[idx as usize])?;

            let results: Vec<Result<u64>> = thread::scope(|s| {
                let mut handles = Vec::new();
                for split in 0..feed.num_splits {
                    let kvdb = kvdb.clone();
                    let refs = &refs;
                    let index = &index;
                    handles.push(s.spawn(move || -> Result<u64> {
                        let aligner = Aligner::new(cfg, refstats);
                        let mut reader = feed.shard_reader(split)?;
                        let mut n = 0u64;
                        while let Some(wire) = reader.next_wire()? {
                            let mut read = Read::from_wire(
                                &wire,
                                nsf,
                                ns,
                                cfg.min_lis,
                                cfg.num_alignments,
                            )?;
                            read.restore(&kvdb)?;
                            aligner.align_read(&mut read, index, refs, readstats);
                            if read.is_valid {
                                read.store(&kvdb)?;
                            }
                            n += 1;
                        }
                        Ok(n)
                    }));
                }
                handles
                    .into_iter()
                    .map(|h| h.join().expect("alignment worker panicked"))
                    .collect()
            });
            let mut total = 0u64;
            for r in results {
                total += r?;
            }
            info!("done reference {idx} part {part}: {total} reads processed");
        }
    }
    readstats.store(kvdb)?;
    kvdb.flush()?;
    info!("==== alignment done ====");
    Ok(())
}

/// Classify aligned reads against their max-scoring alignment,
/// deriving the id+cov set, the de novo set and the OTU map.
fn postproc_task(
    cfg: &RunConfig,
    feed: &Readfeed,
    kvdb: &Kvdb,
    readstats: &Readstats,
    refstats: &Refstats,
) -> Result<()> {
    info!("==== post-processing started ====");
    let nsf = feed.num_split_files() as u32;
    let ns = feed.num_senses as u32;
    let mut all_maps: Vec<BTreeMap<String, Vec<String>>> = Vec::new();

    // paired_in pulls the non-aligned mate of a hit pair into the
    // aligned set; account for it once per pair
    if cfg.is_paired_in && feed.num_senses == 2 {
        let results: Vec<Result<u64>> = thread::scope(|s| {
            let mut handles = Vec::new();
            for split in 0..feed.num_splits {
                let kvdb = kvdb.clone();
                handles.push(s.spawn(move || -> Result<u64> {
                    let mut dragged = 0u64;
                    let mut reader = feed.shard_reader(split)?;
                    loop {
                        let w0 = reader.next_wire()?;
                        let w1 = reader.next_wire()?;
                        let (w0, w1) = match (w0, w1) {
                            (Some(a), Some(b)) => (a, b),
                            _ => break,
                        };
                        let mut r0 =
                            Read::from_wire(&w0, nsf, ns, cfg.min_lis, cfg.num_alignments)?;
                        let mut r1 =
                            Read::from_wire(&w1, nsf, ns, cfg.min_lis, cfg.num_alignments)?;
                        r0.restore(&kvdb)?;
                        r1.restore(&kvdb)?;
                        if r0.is_hit != r1.is_hit {
                            dragged += 1;
                        }
                    }
                    Ok(dragged)
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("post-process worker panicked"))
                .collect()
        });
        for r in results {
            readstats.num_aligned.fetch_add(r?, Ordering::Relaxed);
        }
    }

    for idx in 0..cfg.indexfiles.len() as u16 {
        for part in 0..refstats.num_index_parts[idx as usize] {
            let (fasta, _) = &cfg.indexfiles[idx as usize];
            let refs = References::load(
                idx,
                part,
                fasta,
                &refstats.shards[idx as usize][part as usize],
            )?;

            let results: Vec<Result<BTreeMap<String, Vec<String>>>> = thread::scope(|s| {
                let mut handles = Vec::new();
                for split in 0..feed.num_splits {
                    let kvdb = kvdb.clone();
                    let refs = &refs;
                    handles.push(s.spawn(move || -> Result<BTreeMap<String, Vec<String>>> {
                        let mut otu: BTreeMap<String, Vec<String>> = BTreeMap::new();
                        let mut reader = feed.shard_reader(split)?;
                        while let Some(wire) = reader.next_wire()? {
                            let mut read = Read::from_wire(
                                &wire,
                                nsf,
                                ns,
                                cfg.min_lis,
                                cfg.num_alignments,
                            )?;
                            if !read.restore(&kvdb)? || !read.is_hit || read.aln.alignv.is_empty()
                            {
                                continue;
                            }
                            let best = read.aln.alignv[read.aln.max_index as usize].clone();
                            if best.index_num != idx || best.part != part {
                                continue;
                            }
                            if !best.strand {
                                read.rev_int_str();
                            }
                            let refseq = &refs.buffer[best.ref_num as usize];
                            let (mismatches, gaps, matches) = sw::cigar_stats(
                                &best.cigar,
                                &refseq.seq,
                                best.ref_begin1,
                                &read.isequence,
                                best.read_begin1,
                            );
                            let total = (mismatches + gaps + matches) as f64;
                            let idr = round3(matches as f64 / total);
                            let covr = round3(
                                (best.read_end1 - best.read_begin1 + 1).unsigned_abs() as f64
                                    / best.readlen as f64,
                            );
                            let is_id = idr >= cfg.min_id;
                            let is_cov = covr >= cfg.min_cov;

                            if is_id && is_cov {
                                if !read.is_id_cov {
                                    readstats.n_yid_ycov.fetch_add(1, Ordering::Relaxed);
                                    read.is_id_cov = true;
                                }
                                read.is_denovo = false;
                                otu.entry(refseq.id.clone())
                                    .or_default()
                                    .push(read.seq_id().to_string());
                            } else if is_id {
                                readstats.n_yid_ncov.fetch_add(1, Ordering::Relaxed);
                            } else if is_cov {
                                readstats.n_nid_ycov.fetch_add(1, Ordering::Relaxed);
                            } else {
                                readstats.num_denovo.fetch_add(1, Ordering::Relaxed);
                            }
                            read.store(&kvdb)?;
                        }
                        Ok(otu)
                    }));
                }
                handles
                    .into_iter()
                    .map(|h| h.join().expect("post-process worker panicked"))
                    .collect()
            });
            for r in results {
                all_maps.push(r?);
            }
        }
    }

    let mut otumap = OtuMap { maps: all_maps };
    otumap.merge();
    readstats
        .total_otu
        .store(otumap.count_otu(), Ordering::Relaxed);
    if cfg.is_otu_map {
        let dir = cfg
            .aligned_pfx
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| cfg.outdir.clone());
        fs::create_dir_all(&dir)?;
        let pid_sfx = if cfg.is_pid {
            format!("_{}", std::process::id())
        } else {
            String::new()
        };
        otumap.write(&dir.join(format!("otu_map{pid_sfx}.txt")))?;
    }
    readstats.store(kvdb)?;
    kvdb.flush()?;
    info!("==== post-processing done ====");
    Ok(())
}

/// Write the configured reports and merge the per-shard pieces.
fn report_task(
    cfg: &RunConfig,
    feed: &Readfeed,
    kvdb: &Kvdb,
    readstats: &Readstats,
    refstats: &Refstats,
) -> Result<()> {
    info!("==== reporting started ====");
    let nsf = feed.num_split_files() as u32;
    let ns = feed.num_senses as u32;
    let group = if cfg.is_paired && feed.num_senses == 2 { 2 } else { 1 };

    // FASTA/FASTQ partition and the de novo set need no references
    if cfg.is_fastx || cfg.is_denovo {
        let fastx = if cfg.is_fastx { Some(FastxReporter::new(cfg, feed)) } else { None };
        let dn = if cfg.is_denovo { Some(DenovoReporter::new(cfg, feed)) } else { None };

        let results: Vec<Result<()>> = thread::scope(|s| {
            let mut handles = Vec::new();
            for split in 0..feed.num_splits {
                let kvdb = kvdb.clone();
                let fastx = fastx.as_ref();
                let dn = dn.as_ref();
                handles.push(s.spawn(move || -> Result<()> {
                    let mut aligned_ws = match fastx {
                        Some(f) => f.aligned.open_split(split)?,
                        None => Vec::new(),
                    };
                    let mut other_ws = match fastx.and_then(|f| f.other.as_ref()) {
                        Some(o) => Some(o.open_split(split)?),
                        None => None,
                    };
                    let mut dn_ws = match dn {
                        Some(d) => Some(d.out.open_split(split)?),
                        None => None,
                    };

                    let mut reader = feed.shard_reader(split)?;
                    loop {
                        let mut reads = Vec::with_capacity(group);
                        for _ in 0..group {
                            match reader.next_wire()? {
                                Some(wire) => {
                                    let mut r = Read::from_wire(
                                        &wire,
                                        nsf,
                                        ns,
                                        cfg.min_lis,
                                        cfg.num_alignments,
                                    )?;
                                    r.restore(&kvdb)?;
                                    reads.push(r);
                                }
                                None => break,
                            }
                        }
                        if reads.is_empty() {
                            break;
                        }
                        let refs: Vec<&Read> = reads.iter().collect();
                        if let Some(f) = fastx {
                            f.append(cfg, &mut aligned_ws, other_ws.as_deref_mut(), &refs)?;
                        }
                        if let (Some(d), Some(ws)) = (dn, dn_ws.as_deref_mut()) {
                            d.append(cfg, &mut ws[0], &refs)?;
                        }
                    }
                    for w in aligned_ws.iter_mut() {
                        w.finish()?;
                    }
                    if let Some(ws) = other_ws.as_deref_mut() {
                        for w in ws.iter_mut() {
                            w.finish()?;
                        }
                    }
                    if let Some(ws) = dn_ws.as_deref_mut() {
                        for w in ws.iter_mut() {
                            w.finish()?;
                        }
                    }
                    Ok(())
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().expect("report worker panicked"))
                .collect()
        });
        for r in results {
            r?;
        }
        if let Some(f) = &fastx {
            f.aligned.merge()?;
            if let Some(o) = &f.other {
                o.merge()?;
            }
        }
        if let Some(d) = &dn {
            d.out.merge()?;
        }
    }

    // BLAST and SAM need the reference sequences, shard by shard
    if cfg.blast_format.is_some() || cfg.is_sam {
        let input_gz = feed.orig[0].is_zip;
        let blast_out = cfg.blast_format.map(|_| {
            Output::new(
                cfg,
                vec![cfg.aligned_pfx.clone()],
                ".blast",
                zip_out(cfg, input_gz),
                feed.num_splits,
            )
        });
        let sam_out = if cfg.is_sam {
            Some(Output::new(
                cfg,
                vec![cfg.aligned_pfx.clone()],
                ".sam",
                zip_out(cfg, input_gz),
                feed.num_splits,
            ))
        } else {
            None
        };

        // writers stay open across index parts so records append in
        // read order per shard
        let mut blast_ws: Vec<Vec<OutWriter>> = Vec::new();
        let mut sam_ws: Vec<Vec<OutWriter>> = Vec::new();
        for split in 0..feed.num_splits {
            if let Some(out) = &blast_out {
                blast_ws.push(out.open_split(split)?);
            }
            if let Some(out) = &sam_out {
                let mut ws = out.open_split(split)?;
                if split == 0 {
                    ws[0].write_str(&sam::header(cfg, refstats))?;
                }
                sam_ws.push(ws);
            }
        }

        for idx in 0..cfg.indexfiles.len() as u16 {
            for part in 0..refstats.num_index_parts[idx as usize] {
                let (fasta, _) = &cfg.indexfiles[idx as usize];
                let refs = References::load(
                    idx,
                    part,
                    fasta,
                    &refstats.shards[idx as usize][part as usize],
                )?;

                // a single pass per shard, workers own their split
                let mut blast_iter = blast_ws.iter_mut();
                let mut sam_iter = sam_ws.iter_mut();
                let results: Vec<Result<()>> = thread::scope(|s| {
                    let mut handles = Vec::new();
                    for split in 0..feed.num_splits {
                        let kvdb = kvdb.clone();
                        let refs = &refs;
                        let bw = blast_iter.next();
                        let sw_ = sam_iter.next();
                        handles.push(s.spawn(move || -> Result<()> {
                            let mut bw = bw;
                            let mut sw_ = sw_;
                            let mut reader = feed.shard_reader(split)?;
                            while let Some(wire) = reader.next_wire()? {
                                let mut read = Read::from_wire(
                                    &wire,
                                    nsf,
                                    ns,
                                    cfg.min_lis,
                                    cfg.num_alignments,
                                )?;
                                if !read.restore(&kvdb)? || read.aln.alignv.is_empty() {
                                    continue;
                                }
                                if let Some(ws) = bw.as_deref_mut() {
                                    blast::append(&mut ws[0], cfg, &mut read, refs, refstats)?;
                                }
                                if let Some(ws) = sw_.as_deref_mut() {
                                    sam::append(&mut ws[0], &read, refs)?;
                                }
                            }
                            Ok(())
                        }));
                    }
                    handles
                        .into_iter()
                        .map(|h| h.join().expect("report worker panicked"))
                        .collect()
                });
                for r in results {
                    r?;
                }
            }
        }

        for ws in blast_ws.iter_mut().chain(sam_ws.iter_mut()) {
            for w in ws.iter_mut() {
                w.finish()?;
            }
        }
        if let Some(out) = &blast_out {
            out.merge()?;
        }
        if let Some(out) = &sam_out {
            out.merge()?;
        }
    }

    summary::write(cfg, refstats, readstats)?;
    info!("==== reporting done ====");
    Ok(())
}
