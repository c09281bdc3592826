//! Staging entry types.

use bstr::BString;
use quarry_hash::ObjectId;
use quarry_object::EntryMode;

use crate::IndexError;

/// Merge stage of a staging entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Resolved entry (stage 0).
    Merged,
    /// Common ancestor version in a conflict (stage 1).
    Base,
    /// Our version in a conflict (stage 2).
    Ours,
    /// Their version in a conflict (stage 3).
    Theirs,
}

impl Stage {
    pub fn as_u8(&self) -> u8 {
        match self {
            Stage::Merged => 0,
            Stage::Base => 1,
            Stage::Ours => 2,
            Stage::Theirs => 3,
        }
    }

    pub fn from_u8(n: u8) -> Result<Self, IndexError> {
        match n {
            0 => Ok(Stage::Merged),
            1 => Ok(Stage::Base),
            2 => Ok(Stage::Ours),
            3 => Ok(Stage::Theirs),
            _ => Err(IndexError::InvalidEntry {
                offset: 0,
                reason: format!("invalid stage: {n}"),
            }),
        }
    }

    /// Whether this stage marks an unresolved conflict.
    pub fn is_unmerged(&self) -> bool {
        !matches!(self, Stage::Merged)
    }
}

/// Filesystem metadata cached with an entry, used by working-tree
/// reconciliation to skip unchanged files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stat {
    pub ctime_sec: u32,
    pub ctime_nsec: u32,
    pub mtime_sec: u32,
    pub mtime_nsec: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

/// One staging entry: a tracked path at one merge stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageEntry {
    /// Path relative to the working-tree root.
    pub path: BString,
    /// Blob id of the staged content.
    pub id: ObjectId,
    pub mode: EntryMode,
    pub stage: Stage,
    pub stat: Stat,
    /// CE_VALID: assume the working-tree file is unchanged.
    pub assume_valid: bool,
    /// Extended flag (v3): placeholder entry from add-with-intent.
    pub intent_to_add: bool,
    /// Extended flag (v3): do not materialize in the working tree.
    pub skip_worktree: bool,
}

/// Fixed on-disk bytes before the path: ctime(8) + mtime(8) + dev(4) +
/// ino(4) + mode(4) + uid(4) + gid(4) + size(4) + id(20) + flags(2).
pub(crate) const FIXED_ENTRY_LEN: usize = 62;

/// Name length sentinel: paths at or past 0xFFF store this and rely on
/// the nul terminator instead.
pub(crate) const NAME_LEN_MASK: u16 = 0x0fff;

impl StageEntry {
    /// The 16-bit flags word: 1-bit assume-valid, 1-bit extended, 2-bit
    /// stage, 12-bit name length.
    pub(crate) fn flags_word(&self) -> u16 {
        let name_len = self.path.len().min(NAME_LEN_MASK as usize) as u16;
        let mut flags = name_len;
        flags |= (self.stage.as_u8() as u16) << 12;
        if self.assume_valid {
            flags |= 0x8000;
        }
        flags
    }

    /// Whether this entry needs the v3 extended flags word.
    pub fn has_extended_flags(&self) -> bool {
        self.intent_to_add || self.skip_worktree
    }

    /// Total record length on disk for a v2/v3 entry: fixed fields plus
    /// path, nul, and 1-8 padding bytes to the next multiple of eight
    /// measured from the record start.
    pub(crate) fn ondisk_len(name_len: usize, extended: bool) -> usize {
        let fixed = FIXED_ENTRY_LEN + if extended { 2 } else { 0 };
        (fixed + name_len + 8) & !7
    }

    /// Sort key: path, then stage.
    pub(crate) fn key(&self) -> (&[u8], u8) {
        (self.path.as_slice(), self.stage.as_u8())
    }
}
