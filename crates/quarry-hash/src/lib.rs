//! Object identity for the quarry storage engine.
//!
//! Provides the fixed 20-byte [`ObjectId`], hex encoding/decoding, the
//! streaming [`Hasher`](hasher::Hasher), and the pack-index
//! [`FanoutTable`](fanout::FanoutTable).

mod error;
pub mod fanout;
pub mod hasher;
pub mod hex;
mod oid;

pub use error::HashError;
pub use fanout::FanoutTable;
pub use hasher::Hasher;
pub use oid::ObjectId;

/// Length of a raw object id in bytes.
pub const ID_LEN: usize = 20;

/// Length of an object id rendered as hex.
pub const HEX_LEN: usize = ID_LEN * 2;
