//! The staging index: the binary structure reconciling a working tree
//! against committed history.
//!
//! Every tracked path is recorded with its blob id, mode, cached stat
//! data, and a merge stage. Entries stay sorted by `(path, stage)`; a
//! path holds either a single resolved (stage 0) entry or conflict
//! entries at stages 1-3, never both.

pub mod entry;
mod read;
mod write;

use std::collections::BTreeMap;
use std::path::Path;

use bstr::{BStr, BString};
use quarry_hash::{Hasher, ObjectId, ID_LEN};
use quarry_object::EntryMode;
use quarry_odb::Odb;

pub use entry::{Stage, StageEntry, Stat};

/// Errors from staging index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid index header: {0}")]
    InvalidHeader(String),

    #[error("unsupported index version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid index entry at offset {offset}: {reason}")]
    InvalidEntry { offset: usize, reason: String },

    #[error("index checksum mismatch")]
    ChecksumMismatch,

    #[error("no entry for path {path} at stage {stage}")]
    NotFound { path: BString, stage: u8 },

    #[error("failed to lock index at {path}")]
    LockFailed { path: std::path::PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Odb(#[from] quarry_odb::OdbError),
}

/// The three sides of an unresolved conflict for one path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conflict<'a> {
    pub base: Option<&'a StageEntry>,
    pub ours: Option<&'a StageEntry>,
    pub theirs: Option<&'a StageEntry>,
}

/// The staging index.
pub struct Index {
    version: u32,
    /// Sorted by `(path, stage)`.
    entries: Vec<StageEntry>,
    /// Trailing hash from the file this was read from.
    checksum: ObjectId,
}

impl Index {
    /// An empty index.
    pub fn new() -> Self {
        Self {
            version: 2,
            entries: Vec::new(),
            checksum: ObjectId::NULL,
        }
    }

    /// Read from a file. The trailing hash is recorded, not enforced;
    /// see [`verify_checksum`](Self::verify_checksum).
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let file = std::fs::File::open(path.as_ref())?;
        let data = unsafe { memmap2::Mmap::map(&file) }?;
        read::parse_index(&data)
    }

    /// Check a file's trailing hash against its content.
    pub fn verify_checksum(path: impl AsRef<Path>) -> Result<(), IndexError> {
        let data = std::fs::read(path.as_ref())?;
        if data.len() < ID_LEN {
            return Err(IndexError::ChecksumMismatch);
        }
        let (content, stored) = data.split_at(data.len() - ID_LEN);
        let computed =
            Hasher::digest(content).map_err(|_| IndexError::ChecksumMismatch)?;
        if computed.as_bytes() != stored {
            return Err(IndexError::ChecksumMismatch);
        }
        Ok(())
    }

    /// Write to a file atomically (lock file + rename), always in the
    /// version 2 layout, with a trailing hash over everything written.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        write::write_index(self, path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Format version this index was read with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Trailing hash of the file this index was read from.
    pub fn checksum(&self) -> ObjectId {
        self.checksum
    }

    /// Iterate entries in `(path, stage)` order.
    pub fn iter(&self) -> impl Iterator<Item = &StageEntry> {
        self.entries.iter()
    }

    /// Entry at an exact `(path, stage)`.
    pub fn get(&self, path: &BStr, stage: Stage) -> Option<&StageEntry> {
        self.find(path.as_ref(), stage.as_u8())
            .ok()
            .map(|i| &self.entries[i])
    }

    /// All entries for a path, any stage.
    pub fn entries_for_path(&self, path: &BStr) -> Vec<&StageEntry> {
        let path: &[u8] = path.as_ref();
        self.entries.iter().filter(|e| e.path == path).collect()
    }

    /// Insert or replace an entry, keeping the sort invariant and the
    /// stage exclusivity invariant: a resolved entry evicts conflict
    /// entries for its path, and a conflict entry evicts the resolved one.
    pub fn upsert(&mut self, entry: StageEntry) {
        if entry.stage == Stage::Merged {
            self.entries
                .retain(|e| !(e.path == entry.path && e.stage.is_unmerged()));
        } else {
            self.entries
                .retain(|e| !(e.path == entry.path && e.stage == Stage::Merged));
        }

        match self.find(&entry.path, entry.stage.as_u8()) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    /// Stage content for a path.
    ///
    /// An existing `(path, stage)` entry is updated in place; otherwise a
    /// new entry is appended only when `create_if_missing`, else the call
    /// fails with [`NotFound`](IndexError::NotFound). Staging a resolved
    /// entry removes any conflict entries for the path.
    #[allow(clippy::too_many_arguments)]
    pub fn add_stage(
        &mut self,
        path: &BStr,
        mode: EntryMode,
        id: ObjectId,
        stage: Stage,
        size: u32,
        mtime_sec: u32,
        create_if_missing: bool,
    ) -> Result<(), IndexError> {
        let path: &[u8] = path.as_ref();
        if let Ok(i) = self.find(path, stage.as_u8()) {
            let entry = &mut self.entries[i];
            entry.id = id;
            entry.mode = mode;
            entry.stat.size = size;
            entry.stat.mtime_sec = mtime_sec;
            if stage == Stage::Merged {
                self.entries
                    .retain(|e| !(e.path == path && e.stage.is_unmerged()));
            }
            return Ok(());
        }

        if !create_if_missing {
            return Err(IndexError::NotFound {
                path: BString::from(path),
                stage: stage.as_u8(),
            });
        }

        self.upsert(StageEntry {
            path: BString::from(path),
            id,
            mode,
            stage,
            stat: Stat {
                size,
                mtime_sec,
                ..Stat::default()
            },
            assume_valid: false,
            intent_to_add: false,
            skip_worktree: false,
        });
        Ok(())
    }

    /// Remove the entry at an exact `(path, stage)`.
    pub fn remove(&mut self, path: &BStr, stage: Stage) -> bool {
        match self.find(path.as_ref(), stage.as_u8()) {
            Ok(i) => {
                self.entries.remove(i);
                true
            }
            Err(_) => false,
        }
    }

    /// Drop every conflict-stage entry for a path, leaving a resolved
    /// entry (if any) untouched.
    pub fn remove_unmerged(&mut self, path: &BStr) -> bool {
        let path: &[u8] = path.as_ref();
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.path == path && e.stage.is_unmerged()));
        self.entries.len() < before
    }

    /// Whether a path has conflict entries.
    pub fn has_conflicts(&self, path: &BStr) -> bool {
        let path: &[u8] = path.as_ref();
        self.entries
            .iter()
            .any(|e| e.path == path && e.stage.is_unmerged())
    }

    /// Map of path → entry. For conflicted paths the highest stage wins.
    pub fn by_path(&self) -> BTreeMap<&BStr, &StageEntry> {
        let mut map = BTreeMap::new();
        for entry in &self.entries {
            map.insert(BStr::new(&entry.path), entry);
        }
        map
    }

    /// Map of `(path, stage)` → entry.
    pub fn by_path_stage(&self) -> BTreeMap<(&BStr, u8), &StageEntry> {
        self.entries
            .iter()
            .map(|e| ((BStr::new(&e.path), e.stage.as_u8()), e))
            .collect()
    }

    /// Unmerged paths grouped into their three conflict sides.
    pub fn unmerged(&self) -> BTreeMap<&BStr, Conflict<'_>> {
        let mut map: BTreeMap<&BStr, Conflict<'_>> = BTreeMap::new();
        for entry in &self.entries {
            let slot = match entry.stage {
                Stage::Merged => continue,
                Stage::Base => 0,
                Stage::Ours => 1,
                Stage::Theirs => 2,
            };
            let conflict = map.entry(BStr::new(&entry.path)).or_default();
            match slot {
                0 => conflict.base = Some(entry),
                1 => conflict.ours = Some(entry),
                _ => conflict.theirs = Some(entry),
            }
        }
        map
    }

    /// Build tree objects from the resolved entries; returns the root id.
    pub fn write_tree(&self, odb: &Odb) -> Result<ObjectId, IndexError> {
        write::write_tree_from_index(self, odb)
    }

    fn find(&self, path: &[u8], stage: u8) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.key().cmp(&(path, stage)))
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob_id(n: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = n;
        ObjectId::new(bytes)
    }

    fn add(index: &mut Index, path: &str, stage: Stage) {
        index
            .add_stage(
                BStr::new(path),
                EntryMode::Regular,
                blob_id(1),
                stage,
                10,
                1_700_000_000,
                true,
            )
            .unwrap();
    }

    #[test]
    fn entries_stay_sorted_by_path_then_stage() {
        let mut index = Index::new();
        add(&mut index, "zebra", Stage::Merged);
        add(&mut index, "apple", Stage::Theirs);
        add(&mut index, "apple", Stage::Base);
        add(&mut index, "mango", Stage::Merged);
        add(&mut index, "apple", Stage::Ours);

        let keys: Vec<(String, u8)> = index
            .iter()
            .map(|e| (e.path.to_string(), e.stage.as_u8()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("apple".into(), 1),
                ("apple".into(), 2),
                ("apple".into(), 3),
                ("mango".into(), 0),
                ("zebra".into(), 0),
            ]
        );
    }

    #[test]
    fn resolved_entry_evicts_conflict_stages() {
        let mut index = Index::new();
        add(&mut index, "file", Stage::Base);
        add(&mut index, "file", Stage::Ours);
        add(&mut index, "file", Stage::Theirs);
        assert!(index.has_conflicts(BStr::new("file")));

        add(&mut index, "file", Stage::Merged);
        assert!(!index.has_conflicts(BStr::new("file")));
        assert_eq!(index.entries_for_path(BStr::new("file")).len(), 1);
        assert_eq!(
            index.get(BStr::new("file"), Stage::Merged).unwrap().stage,
            Stage::Merged
        );
    }

    #[test]
    fn conflict_entry_evicts_resolved_one() {
        let mut index = Index::new();
        add(&mut index, "file", Stage::Merged);
        add(&mut index, "file", Stage::Ours);

        let stages: Vec<u8> = index
            .entries_for_path(BStr::new("file"))
            .iter()
            .map(|e| e.stage.as_u8())
            .collect();
        assert_eq!(stages, vec![2]);
    }

    #[test]
    fn add_stage_without_create_fails_on_missing_entry() {
        let mut index = Index::new();
        let err = index
            .add_stage(
                BStr::new("absent"),
                EntryMode::Regular,
                blob_id(1),
                Stage::Merged,
                1,
                0,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
    }

    #[test]
    fn add_stage_updates_in_place() {
        let mut index = Index::new();
        add(&mut index, "file", Stage::Merged);
        index
            .add_stage(
                BStr::new("file"),
                EntryMode::Executable,
                blob_id(9),
                Stage::Merged,
                99,
                1_700_000_123,
                false,
            )
            .unwrap();

        assert_eq!(index.len(), 1);
        let entry = index.get(BStr::new("file"), Stage::Merged).unwrap();
        assert_eq!(entry.id, blob_id(9));
        assert_eq!(entry.mode, EntryMode::Executable);
        assert_eq!(entry.stat.size, 99);
        assert_eq!(entry.stat.mtime_sec, 1_700_000_123);
    }

    #[test]
    fn remove_unmerged_keeps_resolved() {
        let mut index = Index::new();
        add(&mut index, "a", Stage::Merged);
        add(&mut index, "b", Stage::Base);
        add(&mut index, "b", Stage::Ours);

        assert!(index.remove_unmerged(BStr::new("b")));
        assert!(!index.remove_unmerged(BStr::new("b")));
        assert!(index.get(BStr::new("a"), Stage::Merged).is_some());
        assert!(index.entries_for_path(BStr::new("b")).is_empty());
    }

    #[test]
    fn unmerged_view_groups_three_sides() {
        let mut index = Index::new();
        add(&mut index, "ok", Stage::Merged);
        add(&mut index, "clash", Stage::Base);
        add(&mut index, "clash", Stage::Theirs);

        let unmerged = index.unmerged();
        assert_eq!(unmerged.len(), 1);
        let conflict = &unmerged[BStr::new("clash")];
        assert!(conflict.base.is_some());
        assert!(conflict.ours.is_none());
        assert!(conflict.theirs.is_some());
    }

    #[test]
    fn by_path_prefers_highest_stage() {
        let mut index = Index::new();
        add(&mut index, "clash", Stage::Base);
        add(&mut index, "clash", Stage::Theirs);

        let by_path = index.by_path();
        assert_eq!(by_path[BStr::new("clash")].stage, Stage::Theirs);
    }

    #[test]
    fn by_path_stage_is_exact() {
        let mut index = Index::new();
        add(&mut index, "clash", Stage::Base);
        add(&mut index, "clash", Stage::Ours);

        let map = index.by_path_stage();
        assert!(map.contains_key(&(BStr::new("clash"), 1)));
        assert!(map.contains_key(&(BStr::new("clash"), 2)));
        assert!(!map.contains_key(&(BStr::new("clash"), 3)));
    }
}
