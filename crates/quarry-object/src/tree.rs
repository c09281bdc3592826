use std::cmp::Ordering;

use bstr::BString;
use quarry_hash::{ObjectId, ID_LEN};

use crate::ObjectError;

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// Regular file (100644)
    Regular,
    /// Executable file (100755)
    Executable,
    /// Symbolic link (120000)
    Symlink,
    /// Submodule link (160000)
    Gitlink,
    /// Subdirectory (040000)
    Tree,
    /// Unrecognized mode, preserved for round-trip.
    Unknown(u32),
}

impl EntryMode {
    /// Parse from octal ASCII bytes (e.g. `b"100644"`).
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        let raw = parse_octal(s)
            .ok_or_else(|| ObjectError::InvalidEntryMode(String::from_utf8_lossy(s).into()))?;
        Ok(Self::from_raw(raw))
    }

    /// Create from the raw numeric value.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0o100644 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Tree,
            other => Self::Unknown(other),
        }
    }

    /// Raw numeric value.
    pub fn raw(&self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Tree => 0o40000,
            Self::Unknown(v) => *v,
        }
    }

    /// Octal rendering as written in tree content (no leading zero for trees).
    pub fn as_bytes(&self) -> BString {
        BString::from(format!("{:o}", self.raw()))
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, Self::Tree)
    }

    pub fn is_blob(&self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }
}

/// Parse an octal ASCII string to u32.
fn parse_octal(s: &[u8]) -> Option<u32> {
    if s.is_empty() {
        return None;
    }
    let mut val: u32 = 0;
    for &b in s {
        if !(b'0'..=b'7').contains(&b) {
            return None;
        }
        val = val.checked_mul(8)?.checked_add(u32::from(b - b'0'))?;
    }
    Some(val)
}

/// One `(mode, name, id)` triple inside a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: BString,
    pub id: ObjectId,
}

impl TreeEntry {
    /// Canonical tree ordering: directories compare as if their name had a
    /// trailing `/`, so "sub" (dir) sorts after "sub-x" but before "sub0".
    pub fn cmp_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
        base_name_compare(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree())
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::cmp_entries(self, other)
    }
}

fn base_name_compare(name1: &[u8], is_dir1: bool, name2: &[u8], is_dir2: bool) -> Ordering {
    let min_len = name1.len().min(name2.len());
    let cmp = name1[..min_len].cmp(&name2[..min_len]);
    if cmp != Ordering::Equal {
        return cmp;
    }
    let c1 = next_name_byte(name1, min_len, is_dir1);
    let c2 = next_name_byte(name2, min_len, is_dir2);
    c1.cmp(&c2)
}

fn next_name_byte(name: &[u8], at: usize, is_dir: bool) -> u8 {
    if name.len() > at {
        name[at]
    } else if is_dir {
        b'/'
    } else {
        0
    }
}

/// A tree object: an ordered list of `(mode, name, id)` triples.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse tree content: repeated `"{octal mode} {name}\0"` + 20 raw id bytes.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let space = content[pos..]
                .iter()
                .position(|&b| b == b' ')
                .map(|p| p + pos)
                .ok_or_else(|| ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing space after mode".into(),
                })?;
            let mode = EntryMode::from_bytes(&content[pos..space])?;

            let null = content[space + 1..]
                .iter()
                .position(|&b| b == 0)
                .map(|p| p + space + 1)
                .ok_or_else(|| ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "missing null after name".into(),
                })?;
            let name = BString::from(&content[space + 1..null]);
            if name.is_empty() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "empty entry name".into(),
                });
            }

            let id_start = null + 1;
            let id_end = id_start + ID_LEN;
            if id_end > content.len() {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "truncated entry id".into(),
                });
            }
            let id = ObjectId::from_bytes(&content[id_start..id_end])?;

            entries.push(TreeEntry { mode, name, id });
            pos = id_end;
        }

        Ok(Self { entries })
    }

    /// Serialize to canonical tree content.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(&entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.id.as_bytes());
        }
        out
    }

    /// Sort entries into canonical order.
    pub fn sort(&mut self) {
        self.entries.sort();
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &[u8]) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}
