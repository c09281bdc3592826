//! Streaming pack index construction.
//!
//! One pass over a received pack: a single coordinating reader advances
//! the byte cursor entry by entry (entries are back-to-back, so boundaries
//! only exist in order), while a worker pool computes entry CRC32s and
//! hashes full objects. Deltas register in a pending map keyed by base
//! location; once the stream is exhausted they resolve against a memoized
//! arena of reconstructed content, iterated to a fixpoint so ref-deltas
//! may point at bases in either direction.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::bufread::ZlibDecoder;
use memmap2::Mmap;
use quarry_hash::{Hasher, ObjectId, ID_LEN};
use quarry_object::{frame, ObjectKind};
use quarry_utils::progress::ProgressReporter;

use crate::entry::parse_entry_header;
use crate::reader::validate_header;
use crate::writer::write_pack_index;
use crate::{PackEntryKind, PackError, MAX_DELTA_CHAIN, PACK_HEADER_LEN};

/// Indexing options.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    /// Abort the whole pack on the first corrupt entry, hash mismatch, or
    /// unresolved delta. When false, such entries are reported and
    /// everything else is still indexed.
    pub strict: bool,
    /// Worker pool size; 0 means one worker per available core.
    pub threads: usize,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            strict: true,
            threads: 0,
        }
    }
}

/// One entry a lenient run could not process.
#[derive(Debug, Clone)]
pub struct CorruptEntry {
    pub offset: u64,
    pub reason: String,
}

/// Result of an indexing run.
#[derive(Debug)]
pub struct IndexOutcome {
    pub index_path: PathBuf,
    /// Objects that made it into the index.
    pub object_count: u32,
    /// How many entries arrived as deltas.
    pub delta_count: u32,
    pub pack_checksum: ObjectId,
    pub index_checksum: ObjectId,
    /// Per-entry failures; always empty in strict mode.
    pub corrupt: Vec<CorruptEntry>,
}

/// Everything the scan learns about one entry.
struct ScanEntry {
    offset: u64,
    data_offset: u64,
    kind: PackEntryKind,
    declared_size: u64,
    compressed_len: u64,
}

impl ScanEntry {
    fn crc_range(&self) -> std::ops::Range<usize> {
        self.offset as usize..(self.data_offset + self.compressed_len) as usize
    }
}

/// Pending deltas keyed by base location, with waiter counts.
#[derive(Default)]
struct PendingDeltas {
    by_offset: HashMap<u64, u32>,
    by_id: HashMap<ObjectId, u32>,
}

impl PendingDeltas {
    fn register(&mut self, kind: &PackEntryKind) {
        match kind {
            PackEntryKind::OfsDelta { base_offset } => {
                *self.by_offset.entry(*base_offset).or_insert(0) += 1;
            }
            PackEntryKind::RefDelta { base_id } => {
                *self.by_id.entry(*base_id).or_insert(0) += 1;
            }
            PackEntryKind::Object(_) => {}
        }
    }

    fn total(&self) -> u64 {
        self.by_offset.values().map(|&n| n as u64).sum::<u64>()
            + self.by_id.values().map(|&n| n as u64).sum::<u64>()
    }
}

/// Build a v2 index for the pack at `pack_path`, writing it to `idx_path`.
pub fn index_pack(
    pack_path: &Path,
    idx_path: &Path,
    opts: &IndexerOptions,
    progress: &mut ProgressReporter,
) -> Result<IndexOutcome, PackError> {
    let file = std::fs::File::open(pack_path)?;
    let data = unsafe { Mmap::map(&file)? };

    let entry_count = validate_header(&data)? as usize;
    let mut corrupt: Vec<CorruptEntry> = Vec::new();

    // Phase 1+2: sequential scan, parallel CRC/hash.
    progress.restart("Indexing objects", Some(entry_count as u64));
    let scan = scan_pack(&data, entry_count, opts, progress)?;
    let ScanResult {
        entries,
        mut ids,
        crcs,
        pending,
        mut dead,
        mut scan_corrupt,
    } = scan;
    corrupt.append(&mut scan_corrupt);
    if opts.strict {
        if let Some(first) = corrupt.first() {
            return Err(PackError::InvalidFormat {
                offset: first.offset,
                reason: first.reason.clone(),
            });
        }
    }

    // Pack trailer: recompute the stream hash and compare.
    let stored_checksum = ObjectId::from_bytes(&data[data.len() - ID_LEN..])
        .expect("validate_header guarantees a trailer");
    let computed_checksum = {
        let mut h = Hasher::new();
        h.update(&data[..data.len() - ID_LEN]);
        h.finalize()?
    };
    if computed_checksum != stored_checksum {
        if opts.strict {
            return Err(PackError::HashMismatch {
                expected: stored_checksum,
                actual: computed_checksum,
            });
        }
        corrupt.push(CorruptEntry {
            offset: 0,
            reason: format!(
                "pack checksum mismatch: trailer {stored_checksum}, stream hashes to {computed_checksum}"
            ),
        });
    }

    // Phase 3: resolve delta chains to a fixpoint.
    let delta_count = pending.total() as u32;
    progress.restart("Resolving deltas", Some(delta_count as u64));
    resolve_deltas(
        &data,
        &entries,
        &mut ids,
        &mut dead,
        &mut corrupt,
        opts,
        progress,
    )?;
    progress.finish();

    // Phase 4+5: sort, fan out, and write the index atomically.
    let mut index_entries: Vec<(ObjectId, u64, u32)> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        if let Some(id) = ids[i] {
            index_entries.push((id, entry.offset, crcs[i]));
        }
    }
    let index_checksum = write_pack_index(idx_path, &mut index_entries, &stored_checksum)?;

    Ok(IndexOutcome {
        index_path: idx_path.to_path_buf(),
        object_count: index_entries.len() as u32,
        delta_count,
        pack_checksum: stored_checksum,
        index_checksum,
        corrupt,
    })
}

struct ScanResult {
    entries: Vec<ScanEntry>,
    ids: Vec<Option<ObjectId>>,
    crcs: Vec<u32>,
    pending: PendingDeltas,
    dead: Vec<bool>,
    scan_corrupt: Vec<CorruptEntry>,
}

/// Job handed to the worker pool: CRC the raw bytes, and for full objects
/// hash the frame. No entry's own work holds a shared lock.
struct HashJob {
    index: usize,
    kind: PackEntryKind,
    payload: Option<Vec<u8>>,
}

fn scan_pack(
    data: &Mmap,
    entry_count: usize,
    opts: &IndexerOptions,
    progress: &mut ProgressReporter,
) -> Result<ScanResult, PackError> {
    let worker_count = if opts.threads == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    } else {
        opts.threads
    };

    let entries = Mutex::new(Vec::<ScanEntry>::with_capacity(entry_count));
    let ids = Mutex::new(vec![None::<ObjectId>; entry_count]);
    let crcs = Mutex::new(vec![0u32; entry_count]);
    let pending = Mutex::new(PendingDeltas::default());
    let failures = Mutex::new(Vec::<CorruptEntry>::new());
    let mut dead = vec![false; entry_count];
    let mut scan_corrupt = Vec::new();

    let payload_end = data.len() - ID_LEN;

    std::thread::scope(|scope| -> Result<(), PackError> {
        let (tx, rx) = crossbeam::channel::bounded::<HashJob>(worker_count * 2);

        for _ in 0..worker_count {
            let rx = rx.clone();
            let entries = &entries;
            let ids = &ids;
            let crcs = &crcs;
            let pending = &pending;
            let failures = &failures;
            scope.spawn(move || {
                while let Ok(job) = rx.recv() {
                    let range = {
                        let entries = entries.lock().unwrap();
                        entries[job.index].crc_range()
                    };
                    let mut crc = crc32fast::Hasher::new();
                    crc.update(&data[range]);
                    {
                        let mut crcs = crcs.lock().unwrap();
                        crcs[job.index] = crc.finalize();
                    }

                    match (&job.kind, job.payload) {
                        (PackEntryKind::Object(kind), Some(payload)) => {
                            match frame::hash_object(*kind, &payload) {
                                Ok(id) => {
                                    let mut ids = ids.lock().unwrap();
                                    ids[job.index] = Some(id);
                                }
                                Err(e) => {
                                    let offset = {
                                        let entries = entries.lock().unwrap();
                                        entries[job.index].offset
                                    };
                                    failures.lock().unwrap().push(CorruptEntry {
                                        offset,
                                        reason: e.to_string(),
                                    });
                                }
                            }
                        }
                        (delta_kind, _) => {
                            pending.lock().unwrap().register(delta_kind);
                        }
                    }
                }
            });
        }

        // The coordinating reader: the only cursor into the stream.
        let mut cursor = PACK_HEADER_LEN as u64;
        for index in 0..entry_count {
            if cursor as usize >= payload_end {
                return Err(PackError::InvalidFormat {
                    offset: cursor,
                    reason: format!(
                        "pack ends after {index} of {entry_count} declared entries"
                    ),
                });
            }

            let header = parse_entry_header(&data[cursor as usize..payload_end], cursor)?;

            // Inflating is what reveals the entry boundary; an entry that
            // fails to inflate loses the stream position and is fatal even
            // to a lenient run.
            let compressed = &data[header.data_offset as usize..payload_end];
            let mut decoder = ZlibDecoder::new(compressed);
            let mut payload = Vec::with_capacity(header.declared_size as usize);
            decoder
                .read_to_end(&mut payload)
                .map_err(|e| PackError::InvalidFormat {
                    offset: cursor,
                    reason: format!("inflate failed: {e}"),
                })?;
            let compressed_len = decoder.total_in();

            let entry = ScanEntry {
                offset: cursor,
                data_offset: header.data_offset,
                kind: header.kind,
                declared_size: header.declared_size,
                compressed_len,
            };
            cursor = header.data_offset + compressed_len;
            entries.lock().unwrap().push(entry);

            if payload.len() as u64 != header.declared_size {
                let report = CorruptEntry {
                    offset: header.data_offset - header.header_len as u64,
                    reason: format!(
                        "declared size {} but payload inflated to {}",
                        header.declared_size,
                        payload.len()
                    ),
                };
                if opts.strict {
                    return Err(PackError::InvalidFormat {
                        offset: report.offset,
                        reason: report.reason,
                    });
                }
                dead[index] = true;
                scan_corrupt.push(report);
                progress.tick();
                continue;
            }

            let job = HashJob {
                index,
                kind: header.kind,
                payload: matches!(header.kind, PackEntryKind::Object(_)).then_some(payload),
            };
            tx.send(job).expect("workers outlive the scan");
            progress.tick();
        }
        drop(tx);

        if cursor as usize != payload_end {
            return Err(PackError::InvalidFormat {
                offset: cursor,
                reason: "trailing bytes between last entry and checksum".into(),
            });
        }
        Ok(())
    })?;

    scan_corrupt.extend(failures.into_inner().unwrap());
    for report in &scan_corrupt {
        // Hash failures from workers also kill their entries.
        if let Some(i) = entries
            .lock()
            .unwrap()
            .iter()
            .position(|e| e.offset == report.offset)
        {
            dead[i] = true;
        }
    }

    Ok(ScanResult {
        entries: entries.into_inner().unwrap(),
        ids: ids.into_inner().unwrap(),
        crcs: crcs.into_inner().unwrap(),
        pending: pending.into_inner().unwrap(),
        dead,
        scan_corrupt,
    })
}

/// Outcome of one attempt to resolve a delta entry.
enum Attempt {
    Resolved,
    /// Ref base id not known yet; retry after other entries resolve.
    Waiting,
    Failed(PackError),
}

#[allow(clippy::too_many_arguments)]
fn resolve_deltas(
    data: &Mmap,
    entries: &[ScanEntry],
    ids: &mut [Option<ObjectId>],
    dead: &mut [bool],
    corrupt: &mut Vec<CorruptEntry>,
    opts: &IndexerOptions,
    progress: &mut ProgressReporter,
) -> Result<(), PackError> {
    let by_offset: HashMap<u64, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.offset, i))
        .collect();
    let mut id_to_index: HashMap<ObjectId, usize> = ids
        .iter()
        .enumerate()
        .filter_map(|(i, id)| id.map(|id| (id, i)))
        .collect();

    // Memoized arena of resolved content, keyed by entry index.
    let mut arena: HashMap<usize, (ObjectKind, Arc<Vec<u8>>)> = HashMap::new();

    loop {
        let mut progressed = false;
        for i in 0..entries.len() {
            if ids[i].is_some() || dead[i] || !entries[i].kind.is_delta() {
                continue;
            }
            match resolve_one(
                data,
                entries,
                i,
                &by_offset,
                &mut id_to_index,
                &mut arena,
                ids,
                dead,
                progress,
            ) {
                Attempt::Resolved => progressed = true,
                Attempt::Waiting => {}
                Attempt::Failed(e) => {
                    if opts.strict {
                        return Err(e);
                    }
                    dead[i] = true;
                    corrupt.push(CorruptEntry {
                        offset: entries[i].offset,
                        reason: e.to_string(),
                    });
                    progressed = true;
                }
            }
        }
        if !progressed {
            break;
        }
    }

    // Whatever is left has a base that never appears (or a dead one).
    for (i, entry) in entries.iter().enumerate() {
        if ids[i].is_some() || dead[i] || !entry.kind.is_delta() {
            continue;
        }
        let err = unresolved_error(entry);
        if opts.strict {
            return Err(err);
        }
        dead[i] = true;
        corrupt.push(CorruptEntry {
            offset: entry.offset,
            reason: err.to_string(),
        });
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn resolve_one(
    data: &Mmap,
    entries: &[ScanEntry],
    start: usize,
    by_offset: &HashMap<u64, usize>,
    id_to_index: &mut HashMap<ObjectId, usize>,
    arena: &mut HashMap<usize, (ObjectKind, Arc<Vec<u8>>)>,
    ids: &mut [Option<ObjectId>],
    dead: &[bool],
    progress: &mut ProgressReporter,
) -> Attempt {
    // Walk base links until cached or full content, collecting the chain.
    let mut chain: Vec<usize> = Vec::new();
    let mut cursor = start;

    let (kind, mut content): (ObjectKind, Arc<Vec<u8>>) = loop {
        if chain.len() > MAX_DELTA_CHAIN {
            return Attempt::Failed(PackError::DeltaChainTooDeep {
                offset: entries[start].offset,
                max_depth: MAX_DELTA_CHAIN,
            });
        }
        if dead[cursor] {
            return Attempt::Failed(unresolved_error(&entries[start]));
        }
        if let Some((kind, content)) = arena.get(&cursor) {
            break (*kind, Arc::clone(content));
        }
        match entries[cursor].kind {
            PackEntryKind::Object(object_kind) => {
                let payload = match inflate_entry(data, &entries[cursor]) {
                    Ok(p) => Arc::new(p),
                    Err(e) => return Attempt::Failed(e),
                };
                arena.insert(cursor, (object_kind, Arc::clone(&payload)));
                break (object_kind, payload);
            }
            PackEntryKind::OfsDelta { base_offset } => {
                chain.push(cursor);
                cursor = match by_offset.get(&base_offset) {
                    Some(&i) => i,
                    None => {
                        return Attempt::Failed(PackError::InvalidFormat {
                            offset: entries[cursor].offset,
                            reason: format!(
                                "ofs-delta base offset {base_offset} is not an entry boundary"
                            ),
                        })
                    }
                };
            }
            PackEntryKind::RefDelta { base_id } => {
                chain.push(cursor);
                cursor = match id_to_index.get(&base_id) {
                    Some(&i) => i,
                    // The base may be a delta that has not resolved yet,
                    // or may never appear at all; the fixpoint decides.
                    None => return Attempt::Waiting,
                };
            }
        }
    };

    // Apply the chain back out, memoizing and naming every link.
    for &link in chain.iter().rev() {
        let delta = match inflate_entry(data, &entries[link]) {
            Ok(d) => d,
            Err(e) => return Attempt::Failed(e),
        };
        let next = match crate::delta::apply_delta(&content, &delta) {
            Ok(n) => Arc::new(n),
            Err(e) => return Attempt::Failed(e),
        };
        content = next;

        let id = match frame::hash_object(kind, &content) {
            Ok(id) => id,
            Err(e) => return Attempt::Failed(e.into()),
        };
        arena.insert(link, (kind, Arc::clone(&content)));
        ids[link] = Some(id);
        id_to_index.insert(id, link);
        progress.tick();
    }

    Attempt::Resolved
}

fn inflate_entry(data: &Mmap, entry: &ScanEntry) -> Result<Vec<u8>, PackError> {
    let start = entry.data_offset as usize;
    let end = start + entry.compressed_len as usize;
    let mut decoder = ZlibDecoder::new(&data[start..end]);
    let mut out = Vec::with_capacity(entry.declared_size as usize);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PackError::InvalidFormat {
            offset: entry.offset,
            reason: format!("inflate failed: {e}"),
        })?;
    Ok(out)
}

fn unresolved_error(entry: &ScanEntry) -> PackError {
    let base = match entry.kind {
        PackEntryKind::RefDelta { base_id } => base_id.to_hex(),
        PackEntryKind::OfsDelta { base_offset } => format!("at offset {base_offset}"),
        PackEntryKind::Object(_) => unreachable!("full objects have no base"),
    };
    PackError::UnresolvedDelta {
        offset: entry.offset,
        base,
    }
}
