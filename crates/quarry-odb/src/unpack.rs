//! Ingesting received packs: index in place, or explode into loose objects.

use std::path::Path;

use quarry_pack::indexer::{index_pack, IndexOutcome, IndexerOptions};
use quarry_pack::reader::PackReader;
use quarry_utils::progress::ProgressReporter;

use crate::{Odb, OdbError};

impl Odb {
    /// Index a pack received from a transport layer so its objects become
    /// queryable without unpacking. The `.idx` is written next to the
    /// `.pack`, and the store's pack list is refreshed.
    pub fn index_incoming_pack(
        &self,
        pack_path: &Path,
        opts: &IndexerOptions,
        progress: &mut ProgressReporter,
    ) -> Result<IndexOutcome, OdbError> {
        let idx_path = pack_path.with_extension("idx");
        let outcome = index_pack(pack_path, &idx_path, opts, progress)?;
        self.refresh()?;
        Ok(outcome)
    }

    /// Explode every object in a pack into loose storage.
    ///
    /// Objects that already exist are skipped (the duplicate write is the
    /// recognized `AlreadyExists` outcome, not an error). Returns how many
    /// objects were newly written.
    pub fn unpack(
        &self,
        pack_path: &Path,
        progress: &mut ProgressReporter,
    ) -> Result<u32, OdbError> {
        // Random access requires an index; build one if it is missing.
        let idx_path = pack_path.with_extension("idx");
        if !idx_path.is_file() {
            index_pack(
                pack_path,
                &idx_path,
                &IndexerOptions::default(),
                &mut ProgressReporter::hidden(),
            )?;
        }

        let pack = PackReader::open(pack_path)?;
        progress.restart("Unpacking objects", Some(pack.object_count() as u64));

        let mut created = 0u32;
        for item in pack.iter() {
            let (_, obj) = item?;
            let outcome = self.loose().write_raw(obj.kind, &obj.data)?;
            if outcome.is_created() {
                created += 1;
            }
            progress.tick();
        }
        progress.finish();

        Ok(created)
    }
}
