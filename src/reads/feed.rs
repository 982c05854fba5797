//! reads/feed.rs — pre-split, order-preserving read feed
//!
//! Input read files (flat or gzipped FASTA/FASTQ) are split once into
//! `num_splits * num_senses` shard files under the `readb` directory,
//! one shard per worker thread. A text descriptor records the split
//! so a rerun with identical inputs reuses it.
//!
//! DESCRIPTOR (readb/readfeed)
//! ─────────────────────────────────────────────────────────────────
//!  # comment block
//!  timestamp
//!  num_orig_files
//!  num_senses            1 or 2
//!  num_splits
//!  num_reads_tot
//!  then, for every original and every shard file:
//!    path
//!    size_bytes
//!    num_reads
//!    is_zip              0 | 1
//!    fastq | fasta
//! ─────────────────────────────────────────────────────────────────

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read as IoRead, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, RibosiftError};
use crate::reads::Format;

pub const DESCRIPTOR: &str = "readfeed";

/// SPLIT_READS is the supported mode; LOCKLESS is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedType {
    SplitReads,
    Lockless,
}

#[derive(Debug, Clone)]
pub struct ReadFile {
    pub path: PathBuf,
    pub size: u64,
    pub numreads: u64,
    pub is_zip: bool,
    pub format: Format,
}

/// One FASTA/FASTQ record in original form.
#[derive(Debug, Clone)]
pub struct Record {
    pub header: String,
    pub seq: String,
    pub qual: Option<String>,
}

fn open_lines(path: &Path, is_zip: bool) -> Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    Ok(if is_zip {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Detect compression and bio-format of a read file: a non-ASCII byte
/// in the first 100 bytes means gzip; the first record line decides
/// FASTA vs FASTQ.
pub fn detect_format(path: &Path) -> Result<(bool, Format)> {
    let mut f = File::open(path)?;
    let mut head = [0u8; 100];
    let n = f.read(&mut head)?;
    let is_zip = head[..n].iter().any(|&b| b > 0x7f);

    let mut lines = open_lines(path, is_zip)?;
    let mut line = String::new();
    loop {
        line.clear();
        if lines.read_line(&mut line)? == 0 {
            return Err(RibosiftError::FormatUndefined(path.into()));
        }
        let t = line.trim();
        if t.is_empty() {
            continue;
        }
        return match t.as_bytes()[0] {
            b'>' => Ok((is_zip, Format::Fasta)),
            b'@' => Ok((is_zip, Format::Fastq)),
            _ => Err(RibosiftError::FormatUndefined(path.into())),
        };
    }
}

/// Streaming record reader over one flat or gzipped file.
pub struct RecordReader {
    input: Box<dyn BufRead>,
    format: Format,
    pending_header: Option<String>,
    pub read_count: u64,
    done: bool,
}

impl RecordReader {
    pub fn open(path: &Path, is_zip: bool, format: Format) -> Result<RecordReader> {
        Ok(RecordReader {
            input: open_lines(path, is_zip)?,
            format,
            pending_header: None,
            read_count: 0,
            done: false,
        })
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let t = line.trim_end();
            if !t.is_empty() {
                return Ok(Some(t.to_string()));
            }
        }
    }

    /// The next record, multi-line FASTA sequence joined. Returns
    /// None at end of stream.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.done && self.pending_header.is_none() {
            return Ok(None);
        }
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match self.next_line()? {
                Some(l) => l,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            },
        };

        match self.format {
            Format::Fastq => {
                let seq = self.next_line()?.unwrap_or_default();
                let _plus = self.next_line()?.unwrap_or_default();
                let qual = self.next_line()?.unwrap_or_default();
                self.read_count += 1;
                Ok(Some(Record { header, seq, qual: Some(qual) }))
            }
            Format::Fasta => {
                let mut seq = String::new();
                loop {
                    match self.next_line()? {
                        None => {
                            self.done = true;
                            break;
                        }
                        Some(l) if l.starts_with('>') => {
                            self.pending_header = Some(l);
                            break;
                        }
                        Some(l) => seq.push_str(&l),
                    }
                }
                self.read_count += 1;
                Ok(Some(Record { header, seq, qual: None }))
            }
        }
    }
}

/// Buffered, optionally gzipped record writer for one shard file.
struct RecordWriter {
    out: WriterKind,
    written: u64,
}

enum WriterKind {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl RecordWriter {
    fn create(path: &Path, is_zip: bool) -> Result<RecordWriter> {
        let f = BufWriter::new(File::create(path)?);
        let out = if is_zip {
            WriterKind::Gz(GzEncoder::new(f, Compression::default()))
        } else {
            WriterKind::Plain(f)
        };
        Ok(RecordWriter { out, written: 0 })
    }

    fn write_record(&mut self, rec: &Record) -> Result<()> {
        let mut body = String::with_capacity(rec.header.len() + rec.seq.len() + 8);
        body.push_str(&rec.header);
        body.push('\n');
        body.push_str(&rec.seq);
        body.push('\n');
        if let Some(q) = &rec.qual {
            body.push_str("+\n");
            body.push_str(q);
            body.push('\n');
        }
        match &mut self.out {
            WriterKind::Plain(w) => w.write_all(body.as_bytes())?,
            WriterKind::Gz(w) => w.write_all(body.as_bytes())?,
        }
        self.written += 1;
        Ok(())
    }

    fn finish(self) -> Result<()> {
        match self.out {
            WriterKind::Plain(mut w) => w.flush()?,
            WriterKind::Gz(w) => {
                w.finish()?.flush()?;
            }
        }
        Ok(())
    }
}

pub struct Readfeed {
    pub basedir: PathBuf,
    pub num_orig_files: usize,
    pub num_senses: usize,
    pub num_splits: usize,
    pub num_reads_tot: u64,
    pub length_all: u64,
    pub min_read_len: u32,
    pub max_read_len: u32,
    pub orig: Vec<ReadFile>,
    pub splits: Vec<ReadFile>,
    pub is_ready: bool,
    pub is_paired: bool,
    pub is_two_files: bool,
}

impl Readfeed {
    pub fn new(
        feed_type: FeedType,
        readfiles: &[PathBuf],
        num_splits: usize,
        basedir: &Path,
        is_paired: bool,
    ) -> Result<Readfeed> {
        if feed_type != FeedType::SplitReads {
            return Err(RibosiftError::Config {
                option: "task",
                reason: "the LOCKLESS read feed is reserved and cannot be selected".into(),
            });
        }
        fs::create_dir_all(basedir)?;

        let mut orig = Vec::with_capacity(readfiles.len());
        for path in readfiles {
            let (is_zip, format) = detect_format(path)?;
            info!(
                "read file {} is {} {}",
                path.display(),
                match format {
                    Format::Fasta => "FASTA",
                    Format::Fastq => "FASTQ",
                },
                if is_zip { "gzipped" } else { "flat ASCII" }
            );
            orig.push(ReadFile {
                path: path.clone(),
                size: fs::metadata(path)?.len(),
                numreads: 0,
                is_zip,
                format,
            });
        }

        let mut feed = Readfeed {
            basedir: basedir.to_path_buf(),
            num_orig_files: orig.len(),
            num_senses: if is_paired { 2 } else { 1 },
            num_splits,
            num_reads_tot: 0,
            length_all: 0,
            min_read_len: 0,
            max_read_len: 0,
            orig,
            splits: Vec::new(),
            is_ready: false,
            is_paired,
            is_two_files: readfiles.len() > 1,
        };

        feed.count_reads()?;
        feed.init_split_files();

        feed.is_ready = feed.is_split_ready();
        if feed.is_ready {
            info!("read feed split is ready, reusing it");
        } else {
            feed.clean();
            feed.split()?;
            feed.write_descriptor()?;
            feed.is_ready = true;
        }
        Ok(feed)
    }

    pub fn num_split_files(&self) -> usize {
        self.num_splits * self.num_senses
    }

    /// Streaming pre-pass: read counts and length statistics.
    fn count_reads(&mut self) -> Result<()> {
        for file in self.orig.iter_mut() {
            let mut r = RecordReader::open(&file.path, file.is_zip, file.format)?;
            while let Some(rec) = r.next_record()? {
                let len = rec.seq.len() as u64;
                self.num_reads_tot += 1;
                file.numreads += 1;
                self.length_all += len;
                if self.max_read_len < len as u32 {
                    self.max_read_len = len as u32;
                }
                if self.min_read_len > len as u32 || self.min_read_len == 0 {
                    self.min_read_len = len as u32;
                }
            }
        }
        if self.is_paired && self.num_reads_tot % 2 != 0 {
            warn!("paired input holds an odd number of reads ({})", self.num_reads_tot);
        }
        info!(
            "counted {} reads, total length {}, min {} max {}",
            self.num_reads_tot, self.length_all, self.min_read_len, self.max_read_len
        );
        Ok(())
    }

    /// Shard names, formats and read quotas.
    fn init_split_files(&mut self) {
        self.splits.clear();
        let nreads = self.num_reads_tot / self.num_senses as u64;
        let minr = nreads / self.num_splits as u64;
        let surplus = nreads - minr * self.num_splits as u64;

        for i in 0..self.num_splits {
            let quota = if (i as u64) < surplus { minr + 1 } else { minr };
            for j in 0..self.num_senses {
                let stem = if j == 0 { "fwd" } else { "rev" };
                let jj = if self.is_two_files { j } else { 0 };
                let ext = match self.orig[jj].format {
                    Format::Fasta => "fa",
                    Format::Fastq => "fq",
                };
                let gz = if self.orig[jj].is_zip { ".gz" } else { "" };
                self.splits.push(ReadFile {
                    path: self.basedir.join(format!("{stem}_{i}.{ext}{gz}")),
                    size: 0,
                    numreads: quota,
                    is_zip: self.orig[jj].is_zip,
                    format: self.orig[jj].format,
                });
            }
        }
    }

    /// Distribute the reads over the shard files, preserving order and
    /// the fwd/rev pairing of the i-th record.
    fn split(&mut self) -> Result<()> {
        info!("splitting reads into {} shard files", self.num_split_files());

        let mut writers = Vec::with_capacity(self.splits.len());
        for sf in &self.splits {
            writers.push(RecordWriter::create(&sf.path, sf.is_zip)?);
        }

        let mut readers = Vec::with_capacity(self.orig.len());
        for of in &self.orig {
            readers.push(RecordReader::open(&of.path, of.is_zip, of.format)?);
        }

        let mut split_i = 0usize;
        let mut sense = 0usize;
        let mut inext = 0usize;
        loop {
            let rec = match readers[inext].next_record()? {
                Some(r) => r,
                None => break,
            };
            let target = split_i * self.num_senses + sense;
            writers[target].write_record(&rec)?;

            // advance sense, then the shard once its pair quota fills
            if self.num_senses == 2 {
                sense ^= 1;
            }
            if self.is_two_files {
                inext ^= 1;
            }
            if sense == 0 {
                let fwd = split_i * self.num_senses;
                if writers[fwd].written == self.splits[fwd].numreads
                    && split_i + 1 < self.num_splits
                {
                    split_i += 1;
                }
            }
        }

        for w in writers {
            w.finish()?;
        }
        for sf in self.splits.iter_mut() {
            sf.size = fs::metadata(&sf.path)?.len();
        }
        info!("done splitting {} reads", self.num_reads_tot);
        Ok(())
    }

    fn descriptor_path(&self) -> PathBuf {
        self.basedir.join(DESCRIPTOR)
    }

    fn write_descriptor(&self) -> Result<()> {
        let mut w = BufWriter::new(File::create(self.descriptor_path())?);
        writeln!(
            w,
            "# format of this file:\n\
             #   timestamp\n\
             #   num_orig_files\n\
             #   num_senses\n\
             #   num_splits\n\
             #   num_reads_tot\n\
             #   [ path / size / reads / zip / fastq|fasta ] per file, originals then shards"
        )?;
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        writeln!(w, "{ts}")?;
        writeln!(w, "{}", self.num_orig_files)?;
        writeln!(w, "{}", self.num_senses)?;
        writeln!(w, "{}", self.num_splits)?;
        writeln!(w, "{}", self.num_reads_tot)?;
        for f in self.orig.iter().chain(self.splits.iter()) {
            writeln!(w, "{}", f.path.display())?;
            writeln!(w, "{}", f.size)?;
            writeln!(w, "{}", f.numreads)?;
            writeln!(w, "{}", if f.is_zip { 1 } else { 0 })?;
            writeln!(w, "{}", match f.format { Format::Fastq => "fastq", Format::Fasta => "fasta" })?;
        }
        w.flush()?;
        info!("wrote read feed descriptor {}", self.descriptor_path().display());
        Ok(())
    }

    /// The split is reusable iff the descriptor matches the original
    /// files bit-for-bit and every shard file is present with the
    /// recorded metadata.
    fn is_split_ready(&mut self) -> bool {
        let path = self.descriptor_path();
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        info!("found existing read feed descriptor {}", path.display());

        let mut values: Vec<String> = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => return false,
            };
            let t = line.trim();
            if t.is_empty() || t.starts_with('#') {
                continue;
            }
            values.push(t.to_string());
        }

        let expect = 5 + 5 * (self.num_orig_files + self.num_split_files());
        if values.len() != expect {
            return false;
        }
        // values[0] is the timestamp
        let ok_header = values[1].parse() == Ok(self.num_orig_files)
            && values[2].parse() == Ok(self.num_senses)
            && values[3].parse() == Ok(self.num_splits)
            && values[4].parse() == Ok(self.num_reads_tot);
        if !ok_header {
            return false;
        }

        let all: Vec<&ReadFile> = self.orig.iter().chain(self.splits.iter()).collect();
        for (fi, f) in all.iter().enumerate() {
            let base = 5 + fi * 5;
            let rec_path = &values[base];
            let rec_size: u64 = match values[base + 1].parse() {
                Ok(v) => v,
                Err(_) => return false,
            };
            let rec_reads: u64 = match values[base + 2].parse() {
                Ok(v) => v,
                Err(_) => return false,
            };
            let rec_zip = values[base + 3] == "1";
            let rec_fq = values[base + 4] == "fastq";

            let same_meta = *rec_path == f.path.display().to_string()
                && rec_reads == f.numreads
                && rec_zip == f.is_zip
                && rec_fq == (f.format == Format::Fastq);
            if !same_meta {
                return false;
            }
            let is_orig = fi < self.num_orig_files;
            if is_orig {
                if rec_size != f.size {
                    return false;
                }
            } else {
                // shard file must exist with the recorded size
                match fs::metadata(&f.path) {
                    Ok(m) if m.len() == rec_size => {}
                    _ => return false,
                }
            }
        }
        // adopt recorded shard sizes
        for (i, sf) in self.splits.iter_mut().enumerate() {
            let base = 5 + (self.num_orig_files + i) * 5;
            if let Ok(sz) = values[base + 1].parse() {
                sf.size = sz;
            }
        }
        true
    }

    /// Remove shard files listed by the descriptor (never the original
    /// read files), then sweep the readb directory for strays.
    pub fn clean(&self) -> usize {
        let mut n_del = 0usize;
        let path = self.descriptor_path();
        if let Ok(file) = File::open(&path) {
            let mut values = Vec::new();
            for line in BufReader::new(file).lines().map_while(|l| l.ok()) {
                let t = line.trim().to_string();
                if !t.is_empty() && !t.starts_with('#') {
                    values.push(t);
                }
            }
            let n_orig: usize = values.get(1).and_then(|v| v.parse().ok()).unwrap_or(0);
            for (fi, chunk) in values.iter().skip(5).step_by(5).enumerate() {
                if fi < n_orig {
                    continue;
                }
                let sf = PathBuf::from(chunk);
                if sf.parent() == Some(self.basedir.as_path()) && sf.exists() {
                    info!("removing split file {}", sf.display());
                    if fs::remove_file(&sf).is_ok() {
                        n_del += 1;
                    }
                }
            }
            let _ = fs::remove_file(&path);
        }

        for entry in WalkDir::new(&self.basedir).max_depth(1).into_iter().flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_stray = entry.file_type().is_file()
                && (name.starts_with("fwd_") || name.starts_with("rev_"));
            if is_stray && fs::remove_file(entry.path()).is_ok() {
                n_del += 1;
            }
        }
        n_del
    }

    /// A reader over the two (or one) shard streams of one split,
    /// yielding wire-framed records in fwd/rev alternation.
    pub fn shard_reader(&self, split: usize) -> Result<ShardReader> {
        let mut streams = Vec::with_capacity(self.num_senses);
        for j in 0..self.num_senses {
            let global = split * self.num_senses + j;
            let sf = &self.splits[global];
            streams.push(ShardStream {
                global,
                format: sf.format,
                reader: RecordReader::open(&sf.path, sf.is_zip, sf.format)?,
                done: false,
            });
        }
        Ok(ShardReader { streams, cur: 0 })
    }
}

struct ShardStream {
    global: usize,
    format: Format,
    reader: RecordReader,
    done: bool,
}

pub struct ShardReader {
    streams: Vec<ShardStream>,
    cur: usize,
}

impl ShardReader {
    /// The next read in wire form:
    /// `<stream>_<ordinal>\n<header>\n<sequence>[\n<quality>]`.
    pub fn next_wire(&mut self) -> Result<Option<String>> {
        for _ in 0..self.streams.len() {
            let s = &mut self.streams[self.cur];
            if s.done {
                self.cur = (self.cur + 1) % self.streams.len();
                continue;
            }
            let ordinal = s.reader.read_count;
            match s.reader.next_record()? {
                None => {
                    s.done = true;
                    self.cur = (self.cur + 1) % self.streams.len();
                }
                Some(rec) => {
                    let mut wire = format!("{}_{}\n{}\n{}", s.global, ordinal, rec.header, rec.seq);
                    if s.format == Format::Fastq {
                        wire.push('\n');
                        wire.push_str(rec.qual.as_deref().unwrap_or(""));
                    }
                    self.cur = (self.cur + 1) % self.streams.len();
                    return Ok(Some(wire));
                }
            }
        }
        Ok(None)
    }
}
