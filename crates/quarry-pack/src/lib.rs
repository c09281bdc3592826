//! Packfile reading, writing, delta compression, and index support.
//!
//! A packfile stores many objects in one container, some of them as deltas
//! against other objects in the same stream. The pack index provides
//! random access over the container. This crate owns all of it: the delta
//! codec, the entry header codecs, the mmap'd readers, the writer, and the
//! streaming index builder.

pub mod delta;
pub mod entry;
pub mod index;
pub mod indexer;
pub mod reader;
pub mod writer;

use quarry_hash::ObjectId;
use quarry_object::ObjectKind;

/// Errors from pack operations.
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("invalid pack data at offset {offset}: {reason}")]
    InvalidFormat { offset: u64, reason: String },

    #[error("unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("invalid pack index: {0}")]
    InvalidIndex(String),

    #[error("invalid delta at offset {offset}: {reason}")]
    InvalidDelta { offset: u64, reason: String },

    #[error("unresolved delta at offset {offset}: base {base} never appears in the stream")]
    UnresolvedDelta { offset: u64, base: String },

    #[error("delta chain deeper than {max_depth} at offset {offset}")]
    DeltaChainTooDeep { offset: u64, max_depth: usize },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ObjectId,
        actual: ObjectId,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Object(#[from] quarry_object::ObjectError),

    #[error(transparent)]
    Hash(#[from] quarry_hash::HashError),
}

/// How a packed entry stores its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackEntryKind {
    /// A complete object of the given kind.
    Object(ObjectKind),
    /// Delta whose base lives at an earlier absolute offset in this pack.
    OfsDelta { base_offset: u64 },
    /// Delta whose base is named by id (may live outside this pack).
    RefDelta { base_id: ObjectId },
}

impl PackEntryKind {
    /// The object kind, for non-delta entries.
    pub fn object_kind(&self) -> Option<ObjectKind> {
        match self {
            Self::Object(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Whether this entry is stored as a delta.
    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Object(_))
    }

    /// Type number as written in entry headers.
    pub fn type_number(&self) -> u8 {
        match self {
            Self::Object(kind) => kind.pack_type(),
            Self::OfsDelta { .. } => 6,
            Self::RefDelta { .. } => 7,
        }
    }
}

/// A fully resolved object read out of a pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedObject {
    pub kind: ObjectKind,
    pub data: Vec<u8>,
}

/// Container format constants.
pub const PACK_MAGIC: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_LEN: usize = 12;

/// Index format constants.
pub const INDEX_MAGIC: [u8; 4] = [0xff, 0x74, 0x4f, 0x63]; // "\377tOc"
pub const INDEX_VERSION: u32 = 2;

/// Upper bound on delta chain depth before resolution bails out.
pub const MAX_DELTA_CHAIN: usize = 512;
