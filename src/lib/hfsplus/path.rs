//! Pathname resolution and the resolved-record cache.

use std::sync::{PoisonError, RwLock};

use crate::catalog::{CatalogBody, CatalogRecord};
use crate::error::{Error, Result};
use crate::ondisk::{ForkKind, CNID_ROOT_FOLDER};
use crate::unicode::name_from_unix;
use crate::volume::Volume;

/// Trailing path element selecting a file's resource fork.
pub const RSRC_SUFFIX: &str = "rsrc";

pub const RECORD_CACHE_CAPACITY: usize = 1024;

struct CacheEntry {
    path: String,
    record: CatalogRecord,
}

struct Ring {
    entries: Vec<CacheEntry>,
    next: usize,
}

/// Fixed-capacity ring of resolved paths under a reader-writer lock.
/// Lookups scan concurrently; an insert replaces the oldest slot in
/// place. The cache is a pure accelerator: nothing is invalidated
/// before the volume closes, which is sound because nothing on a
/// read-only volume ever changes.
pub struct RecordCache {
    ring: RwLock<Ring>,
    capacity: usize,
}

impl RecordCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RwLock::new(Ring {
                entries: Vec::new(),
                next: 0,
            }),
            capacity,
        }
    }

    pub fn lookup(&self, path: &str) -> Option<CatalogRecord> {
        let ring = self.ring.read().unwrap_or_else(PoisonError::into_inner);
        ring.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| entry.record.clone())
    }

    pub fn insert(&self, path: &str, record: &CatalogRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut ring = self.ring.write().unwrap_or_else(PoisonError::into_inner);
        let entry = CacheEntry {
            path: path.to_owned(),
            record: record.clone(),
        };
        if ring.entries.len() < self.capacity {
            ring.entries.push(entry);
        } else {
            let slot = ring.next;
            ring.entries[slot] = entry;
            ring.next = (slot + 1) % self.capacity;
        }
    }
}

impl Default for RecordCache {
    fn default() -> Self {
        Self::new(RECORD_CACHE_CAPACITY)
    }
}

impl Volume {
    /// Resolve a UNIX path to its catalog record, following directory
    /// hard links mid-walk and a file hard link at the end. A single
    /// trailing `rsrc` element past a file selects its resource fork.
    pub fn lookup(&self, path: &str) -> Result<(CatalogRecord, ForkKind)> {
        let elements: Vec<&str> = path.split('/').filter(|e| !e.is_empty()).collect();
        // Paths whose final element is the fork suffix are never
        // cached or served from cache, whether or not the suffix ends
        // up meaning a real file by that name.
        let cacheable = elements.last() != Some(&RSRC_SUFFIX);

        if cacheable {
            if let Some(record) = self.cache.lookup(path) {
                return Ok((record, ForkKind::Data));
            }
        }

        let mut record = self.catalog.find_by_cnid(CNID_ROOT_FOLDER)?;
        let mut fork = ForkKind::Data;
        let mut index = 0;
        while index < elements.len() {
            match &record.body {
                CatalogBody::Folder(folder) => {
                    let name = name_from_unix(elements[index])?;
                    record = self.catalog.find_by_key(folder.cnid, &name)?;
                    if let Some(file) = record.as_file() {
                        if file.is_dir_hard_link() {
                            record = self
                                .catalog
                                .resolve_dir_hardlink(file.permissions.inode_num())?;
                        }
                    }
                    index += 1;
                }
                CatalogBody::File(_) => {
                    // A file consumes the rest of the path only as a
                    // fork suffix.
                    if elements.len() - index == 1 && elements[index] == RSRC_SUFFIX {
                        fork = ForkKind::Rsrc;
                        index += 1;
                    } else if elements.len() - index == 1 {
                        return Err(Error::NotFound);
                    } else {
                        return Err(Error::NotADirectory);
                    }
                }
                _ => return Err(Error::Corrupt("path walk reached a thread record")),
            }
        }

        if let Some(file) = record.as_file() {
            if file.is_hard_link() {
                record = self
                    .catalog
                    .resolve_file_hardlink(file.permissions.inode_num())?;
            }
        }

        if cacheable {
            self.cache.insert(path, &record);
        }
        Ok((record, fork))
    }
}
