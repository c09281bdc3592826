//! Unified object store.
//!
//! One interface over loose files and packfiles. Reads search loose
//! storage first, then packs newest-first; writes always land loose.
//! Packs received from a peer enter through [`Odb::index_incoming_pack`]
//! (queryable in place) or [`Odb::unpack`] (exploded into loose objects).

mod unpack;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use quarry_hash::ObjectId;
use quarry_loose::{LooseStore, WriteOutcome};
use quarry_object::cache::ObjectCache;
use quarry_object::{Object, ObjectKind};
use quarry_pack::reader::PackReader;

/// Errors from the unified store.
#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object not found: {0}")]
    NotFound(ObjectId),

    #[error("corrupt object {id}: {reason}")]
    Corrupt { id: ObjectId, reason: String },

    #[error(transparent)]
    Loose(#[from] quarry_loose::LooseError),

    #[error(transparent)]
    Pack(#[from] quarry_pack::PackError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where an object lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Stored as an individual loose file.
    Loose,
    /// Stored inside the given packfile.
    Packed { pack: PathBuf },
}

/// Header-only object info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub kind: ObjectKind,
    pub size: usize,
}

/// The unified object store.
pub struct Odb {
    loose: LooseStore,
    packs: RwLock<Vec<PackReader>>,
    cache: Mutex<ObjectCache>,
    objects_dir: PathBuf,
}

impl Odb {
    /// Open the store rooted at an objects directory.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<Self, OdbError> {
        let objects_dir = objects_dir.as_ref().to_path_buf();
        let loose = LooseStore::open(&objects_dir);
        let packs = discover_packs(&objects_dir)?;
        Ok(Self {
            loose,
            packs: RwLock::new(packs),
            cache: Mutex::new(ObjectCache::new(1024)),
            objects_dir,
        })
    }

    /// Read an object, searching loose storage first, then packs.
    pub fn read(&self, id: &ObjectId) -> Result<Option<Object>, OdbError> {
        if let Some(obj) = self.loose.read(id)? {
            return Ok(Some(obj));
        }

        let packs = self.packs.read().unwrap();
        for pack in packs.iter() {
            // Ref-delta bases may live loose or in a sibling pack.
            let resolve_base = |base_id: &ObjectId| -> Option<(ObjectKind, Vec<u8>)> {
                if let Ok(Some(obj)) = self.loose.read(base_id) {
                    return Some((obj.kind(), obj.serialize_content()));
                }
                for other in packs.iter() {
                    if std::ptr::eq(other, pack) {
                        continue;
                    }
                    if let Ok(Some(packed)) = other.read_object(base_id) {
                        return Some((packed.kind, packed.data));
                    }
                }
                None
            };
            if let Some(packed) = pack.read_object_with(id, resolve_base)? {
                let obj = Object::parse_content(packed.kind, &packed.data).map_err(|e| {
                    OdbError::Corrupt {
                        id: *id,
                        reason: e.to_string(),
                    }
                })?;
                return Ok(Some(obj));
            }
        }

        Ok(None)
    }

    /// Read through the LRU cache.
    pub fn read_cached(&self, id: &ObjectId) -> Result<Option<Object>, OdbError> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(obj) = cache.get(id) {
                return Ok(Some(obj.clone()));
            }
        }
        let obj = self.read(id)?;
        if let Some(ref obj) = obj {
            self.cache.lock().unwrap().insert(*id, obj.clone());
        }
        Ok(obj)
    }

    /// Read an object that must exist.
    pub fn require(&self, id: &ObjectId) -> Result<Object, OdbError> {
        self.read(id)?.ok_or(OdbError::NotFound(*id))
    }

    /// Header `(kind, size)` without materializing packed content more
    /// than necessary.
    pub fn read_header(&self, id: &ObjectId) -> Result<Option<ObjectInfo>, OdbError> {
        if let Some((kind, size)) = self.loose.read_header(id)? {
            return Ok(Some(ObjectInfo { kind, size }));
        }
        let packs = self.packs.read().unwrap();
        for pack in packs.iter() {
            if let Some(packed) = pack.read_object(id)? {
                return Ok(Some(ObjectInfo {
                    kind: packed.kind,
                    size: packed.data.len(),
                }));
            }
        }
        Ok(None)
    }

    /// Where the object lives, if anywhere. Existence without content;
    /// for packed objects this names the packfile holding them.
    pub fn locate(&self, id: &ObjectId) -> Option<Location> {
        if self.loose.contains(id) {
            return Some(Location::Loose);
        }
        let packs = self.packs.read().unwrap();
        for pack in packs.iter() {
            if pack.contains(id) {
                return Some(Location::Packed {
                    pack: pack.path().to_path_buf(),
                });
            }
        }
        None
    }

    /// Whether the object exists anywhere.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.locate(id).is_some()
    }

    /// Write a parsed object to loose storage.
    pub fn write(&self, obj: &Object) -> Result<WriteOutcome, OdbError> {
        Ok(self.loose.write(obj)?)
    }

    /// Write raw content of a known kind to loose storage.
    pub fn write_raw(&self, kind: ObjectKind, content: &[u8]) -> Result<WriteOutcome, OdbError> {
        Ok(self.loose.write_raw(kind, content)?)
    }

    /// Re-discover packs (after indexing a received pack, or a repack).
    pub fn refresh(&self) -> Result<(), OdbError> {
        let new_packs = discover_packs(&self.objects_dir)?;
        *self.packs.write().unwrap() = new_packs;
        Ok(())
    }

    /// The loose store.
    pub fn loose(&self) -> &LooseStore {
        &self.loose
    }

    /// Root objects directory.
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Directory where packs live.
    pub fn pack_dir(&self) -> PathBuf {
        self.objects_dir.join("pack")
    }
}

/// Find `.pack` files with usable indexes, newest first.
fn discover_packs(objects_dir: &Path) -> Result<Vec<PackReader>, OdbError> {
    let pack_dir = objects_dir.join("pack");
    if !pack_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut found: Vec<_> = std::fs::read_dir(&pack_dir)?
        .filter_map(|e| e.ok())
        .collect();
    found.sort_by(|a, b| {
        let a_time = a.metadata().and_then(|m| m.modified()).ok();
        let b_time = b.metadata().and_then(|m| m.modified()).ok();
        b_time.cmp(&a_time)
    });

    let mut packs = Vec::new();
    for entry in found {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "pack") {
            // A pack without a readable index is skipped, not fatal; it
            // becomes usable after indexing.
            if let Ok(pack) = PackReader::open(&path) {
                packs.push(pack);
            }
        }
    }
    Ok(packs)
}
