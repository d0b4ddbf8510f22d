//! Segmented, append-only post archive.
//!
//! One archive per normalized query. Posts live in newline-delimited JSON
//! segment files: `tweets-<uuid>.taj` finished segments hold posts
//! oldest-first and are immutable once sealed at the size bound;
//! `new-tweets-<uuid>.taj` is the single mutable newest-first tail. The
//! `.arx` index describes the ID/timestamp range of every segment and is
//! rewritten atomically on each commit.
//!
//! ## Collection protocol
//!
//! 1. Open the archive, call [`Archive::bounds`] for the gap to fill.
//! 2. Collect posts inside that gap, newest first.
//! 3. Commit with [`Archive::append`], passing `exhausted = true` once the
//!    upstream has nothing more inside the gap.
//! 4. Repeat from 1.
//!
//! `exhausted` means the well ran dry. It is *not* a rate-limit signal.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{ArchiveError, ArchiveResult};
use crate::post::{PostAdapter, PostFormat};
use crate::query::Query;

mod graphs;
mod index;
pub mod reverse;

pub use index::{ArchiveIndex, Bounds, SegmentEntry};
pub use reverse::ReverseLineReader;

/// Size bound after which a finished segment seals and a fresh one opens.
pub const SEGMENT_SIZE_LIMIT: u64 = 400 * 1024 * 1024;

/// Lines buffered between writes when streaming into a segment.
const WRITE_BUFFER_LINES: usize = 1000;

/// Iteration direction for [`Archive::iter_posts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending post ID (oldest first).
    Forward,
    /// Descending post ID (newest first).
    Reverse,
}

/// A per-query segmented post store.
pub struct Archive {
    dir: PathBuf,
    index_path: PathBuf,
    index: ArchiveIndex,
    format: PostFormat,
    size_limit: u64,
}

impl Archive {
    /// Open (or create) the archive for a query under the given root.
    pub fn open(
        root: impl AsRef<Path>,
        query: &Query,
        filters: Option<BTreeMap<String, String>>,
        format: Option<PostFormat>,
    ) -> ArchiveResult<Self> {
        let dir = root.as_ref().join(query.as_str());
        fs::create_dir_all(&dir)?;
        let index_path = dir.join(ArchiveIndex::index_filename(filters.as_ref()));
        let index = ArchiveIndex::load_or_create(&index_path, query.as_str(), filters)?;
        Ok(Archive {
            dir,
            index_path,
            index,
            format: PostFormat::for_query(query, format),
            size_limit: SEGMENT_SIZE_LIMIT,
        })
    }

    /// Override the segment size bound. Exists so tests can exercise
    /// rollover without writing hundreds of mebibytes.
    pub fn with_size_limit(mut self, limit: u64) -> Self {
        self.size_limit = limit;
        self
    }

    pub fn query(&self) -> &str {
        &self.index.query
    }

    pub fn filters(&self) -> Option<&BTreeMap<String, String>> {
        self.index.filters.as_ref()
    }

    pub fn format(&self) -> PostFormat {
        self.format
    }

    pub fn adapter(&self) -> &'static dyn PostAdapter {
        self.format.adapter()
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    /// The gap the caller should try to fill next. All-open bounds mean
    /// "collect the newest available posts".
    pub fn bounds(&self) -> Bounds {
        self.index.bounds()
    }

    pub(crate) fn segment_path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    pub(crate) fn graphs_dir(&self, file: &str) -> PathBuf {
        let base = file.strip_suffix(".taj").unwrap_or(file);
        self.dir.join("graphs").join(base)
    }

    fn commit(&self) -> ArchiveResult<()> {
        self.index.validate()?;
        self.index.commit(&self.index_path)
    }

    // -----------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------

    /// Integrate a batch of posts, newest first, collected inside the
    /// current gap.
    ///
    /// With `exhausted = false` the batch is parked in the newest-first
    /// unfinished tail (more posts remain below it). With
    /// `exhausted = true` the batch is flushed oldest-first into the
    /// finished chain, and if the filled gap was interior, the unfinished
    /// tail is migrated down into the chain behind it.
    pub fn append(&mut self, posts: &[Value], exhausted: bool) -> ArchiveResult<()> {
        if posts.is_empty() && !exhausted {
            return Ok(());
        }

        let gap = self.bounds();
        let recent = gap.is_recent();

        // Posts already inside a committed segment range are dropped here
        // rather than deduplicated retroactively.
        let adapter = self.adapter();
        let fresh: Vec<&Value> = posts
            .iter()
            .filter(|p| match adapter.id(p) {
                Some(id) => {
                    gap.min_id.map_or(true, |min| id > min)
                        && gap.max_id.map_or(true, |max| id < max)
                }
                // Records with no parseable ID are kept; they cannot be
                // range-checked but cost nothing.
                None => true,
            })
            .collect();

        if exhausted {
            if !fresh.is_empty() {
                self.append_finished(&fresh, &gap)?;
            }
            // The gap ran dry against the unfinished tail: fold the tail
            // down into the finished chain.
            if !recent && self.index.unfinished.is_some() {
                self.finalize_unfinished()?;
            }
        } else if !fresh.is_empty() {
            self.append_unfinished(&fresh, recent)?;
        } else {
            return Ok(());
        }

        self.commit()
    }

    /// Flush a batch oldest-first into the latest finished segment,
    /// opening a fresh one when the current segment is over the size bound
    /// or absent.
    fn append_finished(&mut self, fresh: &[&Value], gap: &Bounds) -> ArchiveResult<()> {
        let adapter = self.adapter();

        let full = match self.index.finished.last() {
            Some(entry) => {
                let path = self.segment_path(&entry.file);
                path.exists() && fs::metadata(&path)?.len() > self.size_limit
            }
            None => true,
        };

        if full {
            // Seal the previous tail: its artifacts are precomputed now,
            // while it is still the freshest thing on disk.
            if let Some(prev) = self.index.finished.last().cloned() {
                self.generate_artifacts(&prev.file)?;
            }
            let name = SegmentEntry::fresh_finished_name();
            self.index
                .finished
                .push(SegmentEntry::opened_at(name, gap.min_id, gap.min_ts));
        }

        let entry_file = self
            .index
            .finished
            .last()
            .map(|e| e.file.clone())
            .expect("finished entry exists");
        let path = self.segment_path(&entry_file);

        // Newest post first in the batch; its ID/timestamp become the new
        // max bounds.
        let mut max_id = None;
        let mut max_ts = None;
        for post in fresh {
            if max_id.is_none() {
                max_id = adapter.id(post);
            }
            if max_ts.is_none() {
                max_ts = adapter.timestamp(post);
            }
            if max_id.is_some() && max_ts.is_some() {
                break;
            }
        }

        let mut min_id = gap.min_id;
        let mut min_ts = gap.min_ts;
        let mut written = 0u64;
        {
            let mut out = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut buf = String::new();
            for post in fresh.iter().rev() {
                if min_id.is_none() {
                    min_id = adapter.id(post);
                }
                if min_ts.is_none() {
                    min_ts = adapter.timestamp(post);
                }
                buf.push_str(&serde_json::to_string(post)?);
                buf.push('\n');
                written += 1;
                if written as usize % WRITE_BUFFER_LINES == 0 {
                    out.write_all(buf.as_bytes())?;
                    buf.clear();
                }
            }
            out.write_all(buf.as_bytes())?;
        }

        let entry = self.index.finished.last_mut().expect("finished entry");
        if entry.min_id.is_none() {
            entry.min_id = min_id;
        }
        if entry.min_ts.is_none() {
            entry.min_ts = min_ts;
        }
        if max_id.is_some() {
            entry.max_id = max_id;
            entry.max_ts = max_ts;
        }
        entry.count += written;
        Ok(())
    }

    /// Park a batch newest-first in the unfinished tail, creating it when
    /// the batch is the newest-ward edge of the archive.
    fn append_unfinished(&mut self, fresh: &[&Value], recent: bool) -> ArchiveResult<()> {
        let adapter = self.adapter();

        if recent {
            if self.index.unfinished.is_some() {
                return Err(ArchiveError::UnfinishedExists);
            }
            let name = SegmentEntry::fresh_unfinished_name();
            self.index.unfinished = Some(SegmentEntry::new(name));
        }

        let entry_file = self
            .index
            .unfinished
            .as_ref()
            .map(|e| e.file.clone())
            .expect("unfinished entry exists");
        let path = self.segment_path(&entry_file);

        // Oldest post in the batch carries the new min bounds; the max
        // bounds only move when the tail is brand new.
        let mut min_id = None;
        let mut min_ts = None;
        for post in fresh.iter().rev() {
            if min_id.is_none() {
                min_id = adapter.id(post);
            }
            if min_ts.is_none() {
                min_ts = adapter.timestamp(post);
            }
            if min_id.is_some() && min_ts.is_some() {
                break;
            }
        }
        let mut max_id = None;
        let mut max_ts = None;
        for post in fresh {
            if max_id.is_none() {
                max_id = adapter.id(post);
            }
            if max_ts.is_none() {
                max_ts = adapter.timestamp(post);
            }
            if max_id.is_some() && max_ts.is_some() {
                break;
            }
        }

        let mut written = 0u64;
        {
            let mut out = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut buf = String::new();
            for post in fresh {
                buf.push_str(&serde_json::to_string(post)?);
                buf.push('\n');
                written += 1;
                if written as usize % WRITE_BUFFER_LINES == 0 {
                    out.write_all(buf.as_bytes())?;
                    buf.clear();
                }
            }
            out.write_all(buf.as_bytes())?;
        }

        let entry = self.index.unfinished.as_mut().expect("unfinished entry");
        if min_id.is_some() {
            entry.min_id = min_id;
            entry.min_ts = min_ts;
        }
        if entry.max_id.is_none() {
            entry.max_id = max_id;
            entry.max_ts = max_ts;
        }
        entry.count += written;
        Ok(())
    }

    /// Migrate the unfinished tail down into the finished chain,
    /// oldest-first, splitting on the size bound, then delete it.
    fn finalize_unfinished(&mut self) -> ArchiveResult<()> {
        let unfin = self
            .index
            .unfinished
            .clone()
            .ok_or(ArchiveError::NoUnfinished)?;
        let src_path = self.segment_path(&unfin.file);

        if self.index.finished.is_empty() {
            let name = SegmentEntry::fresh_finished_name();
            self.index
                .finished
                .push(SegmentEntry::opened_at(name, None, None));
        }

        let adapter = self.adapter();
        let mut dst_file = self
            .index
            .finished
            .last()
            .map(|e| e.file.clone())
            .expect("finished entry");
        let mut dst_path = self.segment_path(&dst_file);
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&dst_path)?;
        let mut dst_size = fs::metadata(&dst_path)?.len();

        // Bounds of what lands in the current destination segment, read
        // straight off the migrated lines.
        let mut seg_first: Option<(u64, Option<DateTime<Utc>>)> = None;
        let mut seg_last: Option<(u64, Option<DateTime<Utc>>)> = None;
        let mut seg_count = 0u64;
        let mut buffered = 0usize;
        let mut buf = String::new();

        // The unfinished file is newest-first on disk; reading it backward
        // yields oldest-first, the order finished segments require.
        for line in ReverseLineReader::open(&src_path)? {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(post) = serde_json::from_str::<Value>(&line) {
                if let Some(id) = adapter.id(&post) {
                    let ts = adapter.timestamp(&post);
                    if seg_first.is_none() {
                        seg_first = Some((id, ts));
                    }
                    seg_last = Some((id, ts));
                }
            }
            buf.push_str(&line);
            buf.push('\n');
            seg_count += 1;
            buffered += 1;

            let pending_size = dst_size + buf.len() as u64;
            if buffered >= WRITE_BUFFER_LINES || pending_size > self.size_limit {
                out.write_all(buf.as_bytes())?;
                dst_size = pending_size;
                buf.clear();
                buffered = 0;

                if dst_size > self.size_limit {
                    // Seal the destination and roll to a fresh segment
                    // starting at its end bounds.
                    let (last_id, last_ts) = seg_last.map(|(i, t)| (Some(i), t)).unwrap_or_default();
                    {
                        let entry = self.index.finished.last_mut().expect("finished entry");
                        if entry.min_id.is_none() {
                            if let Some((first_id, first_ts)) = seg_first {
                                entry.min_id = Some(first_id);
                                entry.min_ts = first_ts;
                            }
                        }
                        if last_id.is_some() {
                            entry.max_id = last_id;
                            entry.max_ts = last_ts;
                        }
                        entry.count += seg_count;
                    }
                    self.generate_artifacts(&dst_file)?;

                    let name = SegmentEntry::fresh_finished_name();
                    self.index
                        .finished
                        .push(SegmentEntry::opened_at(name.clone(), last_id, last_ts));
                    dst_file = name;
                    dst_path = self.segment_path(&dst_file);
                    out = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(&dst_path)?;
                    dst_size = 0;
                    seg_first = None;
                    seg_last = None;
                    seg_count = 0;
                }
            }
        }
        out.write_all(buf.as_bytes())?;
        drop(out);

        {
            let entry = self.index.finished.last_mut().expect("finished entry");
            if entry.min_id.is_none() {
                if let Some((first_id, first_ts)) = seg_first {
                    entry.min_id = Some(first_id);
                    entry.min_ts = first_ts;
                }
            }
            if let Some((last_id, last_ts)) = seg_last {
                entry.max_id = Some(last_id);
                entry.max_ts = last_ts;
            }
            entry.count += seg_count;
        }

        // Commit the index without the tail before deleting its file; a
        // crash in between leaves only an orphaned segment on disk.
        self.index.unfinished = None;
        self.commit()?;
        fs::remove_file(&src_path)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Repair
    // -----------------------------------------------------------------

    /// Recover `(min_id, max_id, min_ts, max_ts)` for any index entry with
    /// a missing bound by scanning its segment, then rewrite the index.
    pub fn verify_index(&mut self) -> ArchiveResult<()> {
        let mut repaired = false;

        if let Some(entry) = self.index.unfinished.clone() {
            if entry.is_damaged() {
                let bounds = self.scan_segment_bounds(&entry.file, false)?;
                let slot = self.index.unfinished.as_mut().expect("unfinished entry");
                (slot.min_id, slot.max_id, slot.min_ts, slot.max_ts) = bounds;
                repaired = true;
            }
        }

        for i in 0..self.index.finished.len() {
            if self.index.finished[i].is_damaged() {
                let file = self.index.finished[i].file.clone();
                let bounds = self.scan_segment_bounds(&file, true)?;
                let slot = &mut self.index.finished[i];
                (slot.min_id, slot.max_id, slot.min_ts, slot.max_ts) = bounds;
                repaired = true;
            }
        }

        if repaired {
            tracing::warn!(query = %self.index.query, "repaired damaged index entries");
            self.commit()?;
        }
        Ok(())
    }

    /// First and last valid (ID, timestamp) of a segment file. Finished
    /// files are oldest-first, so the forward scan finds the min bounds;
    /// unfinished files are the mirror image.
    fn scan_segment_bounds(
        &self,
        file: &str,
        oldest_first: bool,
    ) -> ArchiveResult<(Option<u64>, Option<u64>, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>
    {
        let adapter = self.adapter();
        let path = self.segment_path(file);

        let head = {
            let reader = BufReader::new(File::open(&path)?);
            first_valid(reader.lines(), adapter)?
        };
        let tail = first_valid(ReverseLineReader::open(&path)?, adapter)?;

        let ((min_id, min_ts), (max_id, max_ts)) = if oldest_first {
            (head, tail)
        } else {
            (tail, head)
        };
        Ok((min_id, max_id, min_ts, max_ts))
    }

    // -----------------------------------------------------------------
    // Range queries
    // -----------------------------------------------------------------

    /// Minimal covering set of index entries for an ID range.
    fn select_entries(&self, min_bound: u64, max_bound: u64) -> Vec<SegmentEntry> {
        let entries = self.index.entries();
        let mut min_ptr = None;
        let mut max_ptr = None;

        for (n, entry) in entries.iter().enumerate() {
            let (Some(emin), Some(emax)) = (entry.min_id, entry.max_id) else {
                continue;
            };
            if min_ptr.is_none() {
                if min_bound < emin || min_bound < emax {
                    min_ptr = Some(n);
                }
            }
            if max_ptr.is_none() {
                if max_bound < emin {
                    if n == 0 {
                        return Vec::new();
                    }
                    max_ptr = Some(n);
                } else if max_bound <= emax {
                    max_ptr = Some(n + 1);
                }
            }
            if min_ptr.is_some() && max_ptr.is_some() {
                break;
            }
        }

        let lo = min_ptr.unwrap_or(0);
        let hi = max_ptr.unwrap_or(entries.len());
        entries[lo..hi].iter().map(|e| (*e).clone()).collect()
    }

    /// Lazily iterate posts with IDs inside `[min_id, max_id]`, in the
    /// requested direction.
    pub fn iter_posts(
        &self,
        min_id: Option<u64>,
        max_id: Option<u64>,
        direction: Direction,
    ) -> ArchiveResult<PostIter> {
        let min = min_id.unwrap_or(0);
        let max = max_id.unwrap_or(u64::MAX);
        if min > max {
            return Err(ArchiveError::InvalidRange { min, max });
        }

        let mut files: Vec<(PathBuf, bool)> = self
            .select_entries(min, max)
            .into_iter()
            .map(|e| (self.segment_path(&e.file), e.is_unfinished()))
            .collect();
        if direction == Direction::Reverse {
            files.reverse();
        }

        Ok(PostIter {
            files: files.into(),
            current: None,
            adapter: self.adapter(),
            min,
            max,
            direction,
        })
    }

    /// Iterate posts whose timestamps fall inside `[min_date, max_date]`.
    pub fn iter_posts_by_date(
        &self,
        min_date: DateTime<Utc>,
        max_date: DateTime<Utc>,
        direction: Direction,
    ) -> ArchiveResult<PostIter> {
        match self.resolve_date_range(min_date, max_date)? {
            Some((lo, hi)) => self.iter_posts(Some(lo), Some(hi), direction),
            None => Ok(PostIter::empty(self.adapter())),
        }
    }

    /// The index entry for the segment holding posts around a timestamp.
    pub fn segment_for_timestamp(&self, ts: DateTime<Utc>) -> ArchiveResult<SegmentEntry> {
        let entries: Vec<&SegmentEntry> = self
            .index
            .entries()
            .into_iter()
            .filter(|e| !e.is_damaged())
            .collect();
        if entries.is_empty() {
            return Err(ArchiveError::Empty);
        }

        let first_ts = entries
            .iter()
            .filter_map(|e| e.min_ts)
            .min()
            .ok_or(ArchiveError::Empty)?;
        let last_ts = entries
            .iter()
            .filter_map(|e| e.max_ts)
            .max()
            .ok_or(ArchiveError::Empty)?;
        if ts < first_ts {
            return Err(ArchiveError::BeforeFirstPost(first_ts));
        }
        if ts > last_ts {
            return Err(ArchiveError::AfterLastPost(last_ts));
        }

        // The segment that starts latest while still starting at or before
        // the timestamp.
        let entry = entries
            .iter()
            .filter(|e| e.min_ts.map_or(false, |t| t <= ts))
            .max_by_key(|e| e.min_ts)
            .ok_or(ArchiveError::BeforeFirstPost(first_ts))?;
        Ok((*entry).clone())
    }

    /// Finished entries covering `[id_start, id_stop]`; open ends extend
    /// to the corresponding edge of the chain.
    pub fn covering_segments(
        &self,
        id_start: Option<u64>,
        id_stop: Option<u64>,
    ) -> Vec<SegmentEntry> {
        let finished: Vec<&SegmentEntry> = self
            .index
            .finished
            .iter()
            .filter(|e| !e.is_damaged())
            .collect();
        if finished.is_empty() {
            return Vec::new();
        }

        let lo = match id_start {
            None => 0,
            Some(start) => finished
                .iter()
                .enumerate()
                .filter(|(_, e)| e.min_id.map_or(false, |m| m < start))
                .map(|(i, _)| i)
                .max()
                .unwrap_or(0),
        };
        let hi = match id_stop {
            None => finished.len() - 1,
            Some(stop) => finished
                .iter()
                .enumerate()
                .filter(|(_, e)| e.max_id.map_or(false, |m| m >= stop))
                .map(|(i, _)| i)
                .min()
                .unwrap_or(finished.len() - 1),
        };
        finished[lo..=hi].iter().map(|e| (*e).clone()).collect()
    }

    /// Number of posts with `min_date ≤ timestamp < max_date`. Interior
    /// segments contribute their counts; boundary segments are scanned.
    pub fn count_posts(
        &self,
        min_date: DateTime<Utc>,
        max_date: DateTime<Utc>,
    ) -> ArchiveResult<u64> {
        let entries: Vec<SegmentEntry> = self
            .index
            .entries()
            .into_iter()
            .filter(|e| !e.is_damaged())
            .cloned()
            .collect();
        if entries.is_empty() {
            return Ok(0);
        }

        let (first, min_date) = match self.segment_for_timestamp(min_date) {
            Ok(entry) => (entry, min_date),
            Err(ArchiveError::BeforeFirstPost(_)) => {
                let entry = entries[0].clone();
                let clamp = entry.min_ts.unwrap_or(min_date);
                (entry, clamp)
            }
            Err(ArchiveError::AfterLastPost(_)) => return Ok(0),
            Err(e) => return Err(e),
        };
        let (last, max_date) = match self.segment_for_timestamp(max_date) {
            Ok(entry) => (entry, max_date),
            Err(ArchiveError::AfterLastPost(_)) => {
                let entry = entries[entries.len() - 1].clone();
                let clamp = entry.max_ts.unwrap_or(max_date);
                (entry, clamp)
            }
            Err(ArchiveError::BeforeFirstPost(_)) => return Ok(0),
            Err(e) => return Err(e),
        };

        let first_idx = entries.iter().position(|e| e.file == first.file);
        let last_idx = entries.iter().position(|e| e.file == last.file);
        let (Some(first_idx), Some(last_idx)) = (first_idx, last_idx) else {
            return Ok(0);
        };

        let interior: u64 = if last_idx > first_idx + 1 {
            entries[first_idx + 1..last_idx].iter().map(|e| e.count).sum()
        } else {
            0
        };

        let mut boundary_files = vec![first.file.clone()];
        if last.file != first.file {
            boundary_files.push(last.file.clone());
        }
        let mut boundary = 0u64;
        let adapter = self.adapter();
        for file in boundary_files {
            let reader = BufReader::new(File::open(self.segment_path(&file))?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(post) = serde_json::from_str::<Value>(&line) else {
                    continue;
                };
                if let Some(ts) = adapter.timestamp(&post) {
                    if ts >= min_date && ts < max_date {
                        boundary += 1;
                    }
                }
            }
        }
        Ok(boundary + interior)
    }

    /// Translate a timestamp range to the covered ID range by scanning the
    /// boundary segments. `None` means no posts fall inside the range.
    pub(crate) fn resolve_date_range(
        &self,
        mut min_date: DateTime<Utc>,
        mut max_date: DateTime<Utc>,
    ) -> ArchiveResult<Option<(u64, u64)>> {
        let entries = self.index.entries();
        if entries.is_empty() {
            return Ok(None);
        }

        let first = match self.segment_for_timestamp(min_date) {
            Ok(entry) => entry,
            Err(ArchiveError::BeforeFirstPost(first_ts)) => {
                min_date = first_ts;
                entries[0].clone()
            }
            Err(ArchiveError::AfterLastPost(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let last = match self.segment_for_timestamp(max_date) {
            Ok(entry) => entry,
            Err(ArchiveError::AfterLastPost(last_ts)) => {
                max_date = last_ts;
                entries[entries.len() - 1].clone()
            }
            Err(ArchiveError::BeforeFirstPost(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut pairs = self.id_timestamp_pairs(&first.file)?;
        if last.file != first.file {
            pairs.extend(self.id_timestamp_pairs(&last.file)?);
        }
        if pairs.is_empty() {
            return Ok(None);
        }

        let ts_min = *pairs.values().min().expect("nonempty");
        let ts_max = *pairs.values().max().expect("nonempty");

        let lo = if min_date <= ts_min {
            *pairs.keys().min().expect("nonempty")
        } else {
            match pairs
                .iter()
                .filter(|(_, ts)| **ts >= min_date)
                .map(|(id, _)| *id)
                .min()
            {
                Some(id) => id,
                None => return Ok(None),
            }
        };
        let hi = if max_date >= ts_max {
            *pairs.keys().max().expect("nonempty")
        } else {
            match pairs
                .iter()
                .filter(|(_, ts)| **ts <= max_date)
                .map(|(id, _)| *id)
                .max()
            {
                Some(id) => id,
                None => return Ok(None),
            }
        };
        if lo > hi {
            return Ok(None);
        }
        Ok(Some((lo, hi)))
    }

    /// All (ID, timestamp) pairs in one segment file.
    fn id_timestamp_pairs(&self, file: &str) -> ArchiveResult<BTreeMap<u64, DateTime<Utc>>> {
        let adapter = self.adapter();
        let mut pairs = BTreeMap::new();
        let reader = BufReader::new(File::open(self.segment_path(file))?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(post) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            if let (Some(id), Some(ts)) = (adapter.id(&post), adapter.timestamp(&post)) {
                pairs.insert(id, ts);
            }
        }
        Ok(pairs)
    }
}

/// First line of an iterator that yields a parseable (ID, timestamp).
fn first_valid(
    lines: impl Iterator<Item = Result<String, std::io::Error>>,
    adapter: &dyn PostAdapter,
) -> ArchiveResult<(Option<u64>, Option<DateTime<Utc>>)> {
    let mut id = None;
    let mut ts = None;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(post) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if id.is_none() {
            id = adapter.id(&post);
        }
        if ts.is_none() {
            ts = adapter.timestamp(&post);
        }
        if id.is_some() && ts.is_some() {
            break;
        }
    }
    Ok((id, ts))
}

/// Lazy post iterator over a covering set of segment files.
pub struct PostIter {
    files: std::collections::VecDeque<(PathBuf, bool)>,
    current: Option<Box<dyn Iterator<Item = std::io::Result<String>> + Send>>,
    adapter: &'static dyn PostAdapter,
    min: u64,
    max: u64,
    direction: Direction,
}

impl PostIter {
    fn empty(adapter: &'static dyn PostAdapter) -> Self {
        PostIter {
            files: std::collections::VecDeque::new(),
            current: None,
            adapter,
            min: 0,
            max: 0,
            direction: Direction::Forward,
        }
    }

    /// Open the next file in the direction-appropriate order: a file whose
    /// storage order opposes the emission order is read backward.
    fn open_next(&mut self) -> ArchiveResult<bool> {
        let Some((path, newest_first)) = self.files.pop_front() else {
            return Ok(false);
        };
        let backward = match self.direction {
            Direction::Forward => newest_first,
            Direction::Reverse => !newest_first,
        };
        let iter: Box<dyn Iterator<Item = std::io::Result<String>> + Send> = if backward {
            Box::new(ReverseLineReader::open(&path)?)
        } else {
            Box::new(BufReader::new(File::open(&path)?).lines())
        };
        self.current = Some(iter);
        Ok(true)
    }
}

impl Iterator for PostIter {
    type Item = ArchiveResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                match self.open_next() {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => return Some(Err(e)),
                }
            }
            let line = match self.current.as_mut().and_then(|lines| lines.next()) {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.current = None;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let Ok(post) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            let Some(id) = self.adapter.id(&post) else {
                continue;
            };
            match self.direction {
                Direction::Forward => {
                    // Ascending IDs: everything below the floor is behind
                    // us, anything above the ceiling ends this file.
                    if id < self.min {
                        continue;
                    }
                    if id > self.max {
                        self.current = None;
                        continue;
                    }
                }
                Direction::Reverse => {
                    if id > self.max {
                        continue;
                    }
                    if id < self.min {
                        self.current = None;
                        continue;
                    }
                }
            }
            return Some(Ok(post));
        }
    }
}
