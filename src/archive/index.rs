//! The `.arx` archive index.
//!
//! One index per query/filter combination. It records, per segment file,
//! the ID and timestamp range held inside, with the convention
//! `min_id < id ≤ max_id` for finished segments. The index is the only
//! mutable metadata in an archive and is always rewritten whole, via a
//! temp-file rename, so a torn write can never leave a half-updated view.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};

/// Filename prefix distinguishing newest-first (unfinished) segments.
pub const UNFINISHED_PREFIX: &str = "new-";

/// One segment file's registration in the index.
///
/// `None` bounds mark a damaged entry; `verify_index` repairs them by
/// scanning the segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentEntry {
    pub file: String,
    pub min_id: Option<u64>,
    pub max_id: Option<u64>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub count: u64,
}

impl SegmentEntry {
    pub fn new(file: String) -> Self {
        SegmentEntry {
            file,
            min_id: None,
            max_id: None,
            min_ts: None,
            max_ts: None,
            count: 0,
        }
    }

    /// Fresh finished segment opened at the previous chain end.
    pub fn opened_at(file: String, bound: Option<u64>, ts: Option<DateTime<Utc>>) -> Self {
        SegmentEntry {
            file,
            min_id: bound,
            max_id: bound,
            min_ts: ts,
            max_ts: ts,
            count: 0,
        }
    }

    /// Whether the segment stores posts newest-first.
    pub fn is_unfinished(&self) -> bool {
        self.file.starts_with(UNFINISHED_PREFIX)
    }

    pub fn is_damaged(&self) -> bool {
        self.min_id.is_none()
            || self.max_id.is_none()
            || self.min_ts.is_none()
            || self.max_ts.is_none()
    }

    /// Fresh finished segment name.
    pub fn fresh_finished_name() -> String {
        format!("tweets-{}.taj", uuid::Uuid::new_v4())
    }

    /// Fresh unfinished segment name; the `new` prefix is the sole in-file
    /// hint of write order.
    pub fn fresh_unfinished_name() -> String {
        format!("new-tweets-{}.taj", uuid::Uuid::new_v4())
    }
}

/// Root of the `.arx` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveIndex {
    pub query: String,
    pub filters: Option<BTreeMap<String, String>>,
    pub unfinished: Option<SegmentEntry>,
    pub finished: Vec<SegmentEntry>,
}

impl ArchiveIndex {
    pub fn new(query: String, filters: Option<BTreeMap<String, String>>) -> Self {
        ArchiveIndex {
            query,
            filters,
            unfinished: None,
            finished: Vec::new(),
        }
    }

    /// Filename-safe suffix encoding the filter set, so multiple indexes
    /// can coexist in one query directory.
    pub fn filter_suffix(filters: Option<&BTreeMap<String, String>>) -> String {
        match filters {
            None => String::new(),
            Some(map) => map
                .iter()
                .map(|(k, v)| format!("-{k}-{v}"))
                .collect::<String>(),
        }
    }

    pub fn index_filename(filters: Option<&BTreeMap<String, String>>) -> String {
        format!("index{}.arx", Self::filter_suffix(filters))
    }

    /// Load an existing index, or create and persist a fresh one.
    pub fn load_or_create(
        path: &Path,
        query: &str,
        filters: Option<BTreeMap<String, String>>,
    ) -> ArchiveResult<Self> {
        if path.exists() {
            let data = fs::read_to_string(path)?;
            if !data.trim().is_empty() {
                return Ok(serde_json::from_str(&data)?);
            }
        }
        let index = ArchiveIndex::new(query.to_string(), filters);
        index.commit(path)?;
        Ok(index)
    }

    /// Persist atomically: serialize to a temp file beside the target, then
    /// rename over it.
    pub fn commit(&self, path: &Path) -> ArchiveResult<()> {
        let tmp = path.with_extension("arx.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            out.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
            out.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// The gap to collect next: low end at the sealed chain's top, high end
    /// at the bottom of the unfinished tail.
    pub fn bounds(&self) -> Bounds {
        let (min_id, min_ts) = match self.finished.last() {
            Some(entry) => (entry.max_id, entry.max_ts),
            None => (None, None),
        };
        let (max_id, max_ts) = match &self.unfinished {
            Some(entry) => (entry.min_id, entry.min_ts),
            None => (None, None),
        };
        Bounds {
            min_id,
            max_id,
            min_ts,
            max_ts,
        }
    }

    /// All entries in chain order, finished first, unfinished last.
    pub fn entries(&self) -> Vec<&SegmentEntry> {
        self.finished
            .iter()
            .chain(self.unfinished.iter())
            .collect()
    }

    /// Enforce the index invariants: finished entries sorted by `min_id`
    /// and non-overlapping, with the unfinished tail above them all.
    pub fn validate(&self) -> ArchiveResult<()> {
        for pair in self.finished.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if let (Some(a_max), Some(b_min)) = (a.max_id, b.min_id) {
                if a_max > b_min {
                    return Err(ArchiveError::BoundsOverlap(format!(
                        "{} max {} exceeds {} min {}",
                        a.file, a_max, b.file, b_min
                    )));
                }
            }
        }
        if let (Some(unfin), Some(last)) = (&self.unfinished, self.finished.last()) {
            if let (Some(u_min), Some(f_max)) = (unfin.min_id, last.max_id) {
                if u_min < f_max {
                    return Err(ArchiveError::BoundsOverlap(format!(
                        "unfinished {} min {} underruns finished {} max {}",
                        unfin.file, u_min, last.file, f_max
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The `(min_id, max_id, min_ts, max_ts)` gap descriptor. Open ends are
/// `None`; a fully open descriptor means "collect the newest available".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub min_id: Option<u64>,
    pub max_id: Option<u64>,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
}

impl Bounds {
    /// Whether the high end is open, i.e. the gap reaches the newest posts.
    pub fn is_recent(&self) -> bool {
        self.max_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(file: &str, min: u64, max: u64) -> SegmentEntry {
        SegmentEntry {
            file: file.to_string(),
            min_id: Some(min),
            max_id: Some(max),
            min_ts: Some(Utc::now()),
            max_ts: Some(Utc::now()),
            count: max - min,
        }
    }

    #[test]
    fn test_filter_suffix() {
        assert_eq!(ArchiveIndex::filter_suffix(None), "");
        let filters = BTreeMap::from([("lang".to_string(), "en".to_string())]);
        assert_eq!(ArchiveIndex::filter_suffix(Some(&filters)), "-lang-en");
        assert_eq!(ArchiveIndex::index_filename(Some(&filters)), "index-lang-en.arx");
    }

    #[test]
    fn test_bounds_from_chain() {
        let mut index = ArchiveIndex::new("q".into(), None);
        assert_eq!(index.bounds(), Bounds::default());
        assert!(index.bounds().is_recent());

        index.finished.push(entry("tweets-a.taj", 1, 100));
        index.unfinished = Some(entry("new-tweets-b.taj", 101, 150));
        let bounds = index.bounds();
        assert_eq!(bounds.min_id, Some(100));
        assert_eq!(bounds.max_id, Some(101));
        assert!(!bounds.is_recent());
    }

    #[test]
    fn test_validate_rejects_overlap() {
        let mut index = ArchiveIndex::new("q".into(), None);
        index.finished.push(entry("tweets-a.taj", 1, 100));
        index.finished.push(entry("tweets-b.taj", 90, 200));
        assert!(index.validate().is_err());

        index.finished[1] = entry("tweets-b.taj", 100, 200);
        assert!(index.validate().is_ok());

        index.unfinished = Some(entry("new-tweets-c.taj", 150, 300));
        assert!(index.validate().is_err());
    }

    #[test]
    fn test_commit_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.arx");
        let mut index = ArchiveIndex::new("q".into(), None);
        index.finished.push(entry("tweets-a.taj", 1, 100));
        index.commit(&path).unwrap();

        let reloaded = ArchiveIndex::load_or_create(&path, "q", None).unwrap();
        assert_eq!(reloaded.finished, index.finished);
        assert!(!path.with_extension("arx.tmp").exists());
    }

    #[test]
    fn test_damaged_entry_detection() {
        let mut e = entry("tweets-a.taj", 1, 100);
        assert!(!e.is_damaged());
        e.max_ts = None;
        assert!(e.is_damaged());
    }

    #[test]
    fn test_segment_naming() {
        let fin = SegmentEntry::fresh_finished_name();
        let unfin = SegmentEntry::fresh_unfinished_name();
        assert!(fin.starts_with("tweets-") && fin.ends_with(".taj"));
        assert!(unfin.starts_with("new-tweets-") && unfin.ends_with(".taj"));
        assert!(SegmentEntry::new(unfin).is_unfinished());
        assert!(!SegmentEntry::new(fin).is_unfinished());
    }
}
