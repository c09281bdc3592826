//! Object model for the quarry storage engine.
//!
//! Objects come in four kinds (blob, tree, commit, tag), identified by the
//! digest of their framed content. This crate owns the kind enum, the
//! `"{kind} {size}\0"` framing, parsing and serialization for each kind,
//! and a small LRU cache of parsed objects.

mod blob;
pub mod cache;
mod commit;
pub mod frame;
mod tag;
mod tree;

pub use blob::Blob;
pub use commit::Commit;
pub use tag::Tag;
pub use tree::{EntryMode, Tree, TreeEntry};

use bstr::BString;
use quarry_hash::{HashError, ObjectId};

/// Errors produced by object parsing and serialization.
#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object kind: {0}")]
    InvalidKind(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("truncated object: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: String },

    #[error("invalid commit: missing '{field}' header")]
    MissingCommitField { field: &'static str },

    #[error("invalid tag: missing '{field}' header")]
    MissingTagField { field: &'static str },

    #[error("invalid entry mode: {0}")]
    InvalidEntryMode(String),

    #[error(transparent)]
    Hash(#[from] HashError),
}

/// The closed set of object kinds.
///
/// This is the single dispatch point for kind-specific behavior; nothing
/// else in the engine compares kind strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Parse from the kind name used in framing headers.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"commit" => Ok(Self::Commit),
            b"tree" => Ok(Self::Tree),
            b"blob" => Ok(Self::Blob),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidKind(BString::from(s))),
        }
    }

    /// Canonical name as written in framing headers.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::Commit => b"commit",
            Self::Tree => b"tree",
            Self::Blob => b"blob",
            Self::Tag => b"tag",
        }
    }

    /// Canonical name as a `str`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Type number used in packfile entry headers.
    pub fn pack_type(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Inverse of [`pack_type`](Self::pack_type); `None` for delta or
    /// reserved type numbers.
    pub fn from_pack_type(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = ObjectError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// A parsed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    /// Parse from framed bytes (`"{kind} {size}\0"` + content).
    ///
    /// The declared size must be covered by the available content; a short
    /// buffer is a [`Truncated`](ObjectError::Truncated) store, never a
    /// silently shorter object.
    pub fn parse(data: &[u8]) -> Result<Self, ObjectError> {
        let (kind, size, header_len) = frame::parse_header(data)?;
        let content = &data[header_len..];
        if content.len() < size {
            return Err(ObjectError::Truncated {
                expected: size,
                actual: content.len(),
            });
        }
        Self::parse_content(kind, &content[..size])
    }

    /// Parse bare content with a known kind.
    pub fn parse_content(kind: ObjectKind, content: &[u8]) -> Result<Self, ObjectError> {
        match kind {
            ObjectKind::Blob => Ok(Self::Blob(Blob::new(content.to_vec()))),
            ObjectKind::Tree => Ok(Self::Tree(Tree::parse(content)?)),
            ObjectKind::Commit => Ok(Self::Commit(Commit::parse(content)?)),
            ObjectKind::Tag => Ok(Self::Tag(Tag::parse(content)?)),
        }
    }

    /// Serialize to the framed form (header + content).
    pub fn serialize(&self) -> Vec<u8> {
        let content = self.serialize_content();
        let header = frame::write_header(self.kind(), content.len());
        let mut out = Vec::with_capacity(header.len() + content.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&content);
        out
    }

    /// Serialize bare content (no framing header).
    pub fn serialize_content(&self) -> Vec<u8> {
        match self {
            Self::Blob(b) => b.data.clone(),
            Self::Tree(t) => t.serialize_content(),
            Self::Commit(c) => c.serialize_content(),
            Self::Tag(t) => t.serialize_content(),
        }
    }

    /// The object's kind.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Blob(_) => ObjectKind::Blob,
            Self::Tree(_) => ObjectKind::Tree,
            Self::Commit(_) => ObjectKind::Commit,
            Self::Tag(_) => ObjectKind::Tag,
        }
    }

    /// Compute the id by hashing the framed form.
    pub fn compute_id(&self) -> Result<ObjectId, HashError> {
        frame::hash_object(self.kind(), &self.serialize_content())
    }

    /// Size of the bare content in bytes.
    pub fn content_size(&self) -> usize {
        match self {
            Self::Blob(b) => b.data.len(),
            other => other.serialize_content().len(),
        }
    }
}
