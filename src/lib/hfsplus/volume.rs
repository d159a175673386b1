//! Volume loading and the mount-side API surface.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use log::{debug, warn};

use crate::attr::AttrTree;
use crate::catalog::{Catalog, CatalogRecord};
use crate::device::{CacheConfig, CachedDevice, DeviceRead, FileDevice};
use crate::error::{Error, Result};
use crate::fork::{ExtentsTree, Fork, Geometry};
use crate::ondisk::{
    hfs_time_to_unix, Cnid, FileRecord, ForkKind, VolumeHeader, WrapperBlock, CNID_ATTRIBUTES_FILE,
    CNID_CATALOG_FILE, CNID_EXTENTS_FILE, CNID_ROOT_FOLDER, DATA_FORK, SIG_HFS, SIG_HFSPLUS,
    SIG_HFSX, S_IFDIR, VOL_INCONSISTENT, VOL_JOURNALED, VOL_UNMOUNTED,
};
use crate::path::RecordCache;
use crate::unicode::{name_to_unix, utf16_to_utf8_lossy, HfsStringLike};

/// How to open a volume. `offset` positions the volume inside a
/// partitioned container; `cache` enables the read-coalescing layer.
#[derive(Debug, Copy, Clone)]
pub struct VolumeOptions {
    pub offset: u64,
    pub cache: Option<CacheConfig>,
}

impl Default for VolumeOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            cache: Some(CacheConfig::default()),
        }
    }
}

/// POSIX-shaped attributes synthesized from a catalog record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stat {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub rdev: u32,
    pub size: u64,
    pub blocks: u32,
    pub blksize: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    pub birthtime: i64,
    pub bsd_flags: u32,
}

/// An open, read-only HFS+ volume. Owns its device capability, both
/// eagerly-opened trees and the record cache; everything it hands out
/// (listings, extent arrays, resolved paths) is owned by the caller.
pub struct Volume {
    pub(crate) geometry: Geometry,
    pub(crate) header: VolumeHeader,
    pub(crate) catalog: Catalog,
    pub(crate) extents: ExtentsTree,
    pub(crate) attributes: OnceLock<Option<AttrTree>>,
    pub(crate) cache: RecordCache,
    name: OnceLock<String>,
}

impl Volume {
    pub fn open(path: impl AsRef<Path>) -> Result<Volume> {
        Self::open_with(path, VolumeOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: VolumeOptions) -> Result<Volume> {
        let device = FileDevice::open(path)?;
        match options.cache {
            Some(config) => {
                Self::open_device(Arc::new(CachedDevice::new(device, config)), options.offset)
            }
            None => Self::open_device(Arc::new(device), options.offset),
        }
    }

    /// Open from an already-constructed device capability. `offset`
    /// is where the volume (or its classic-HFS wrapper) starts.
    pub fn open_device(device: Arc<dyn DeviceRead>, offset: u64) -> Result<Volume> {
        let mut block = [0u8; 512];
        device.read_at(&mut block, offset + 1024)?;

        let probe = u16::from_be_bytes([block[0], block[1]]);
        let start = if probe == SIG_HFS {
            // Classic HFS wrapper: the real volume lives inside the
            // wrapper's allocation area.
            let wrapper = WrapperBlock::parse(&block);
            if wrapper.embed_signature != SIG_HFSPLUS {
                return Err(Error::NotHfs);
            }
            let inner = offset + wrapper.embedded_offset();
            debug!("HFS wrapper detected, embedded volume at byte {inner}");
            device.read_at(&mut block, inner + 1024)?;
            inner
        } else {
            offset
        };

        let header = VolumeHeader::import(&mut Cursor::new(&block[..]))?;
        if header.signature != SIG_HFSPLUS && header.signature != SIG_HFSX {
            return Err(Error::NotHfs);
        }
        if !header.block_size.is_power_of_two()
            || header.block_size < 512
            || header.block_size > (1 << 20)
        {
            return Err(Error::Corrupt("unreasonable allocation block size"));
        }

        if !header.attribute(VOL_UNMOUNTED) || header.attribute(VOL_INCONSISTENT) {
            warn!("volume was not cleanly unmounted; reading without journal replay");
        }
        if header.attribute(VOL_JOURNALED) {
            debug!(
                "journaled volume, journal info block {}",
                header.journal_info_block
            );
        }

        let geometry = Geometry {
            device,
            start,
            block_size: header.block_size,
            total_blocks: header.total_blocks,
        };

        // The extents file's own extents must fit its inline record,
        // so it bootstraps without an overflow tree.
        let extents_fork = Fork::new(
            geometry.clone(),
            CNID_EXTENTS_FILE,
            DATA_FORK,
            &header.extents_file,
            None,
        )?;
        let extents = ExtentsTree::open(extents_fork)?;

        let catalog_fork = Fork::new(
            geometry.clone(),
            CNID_CATALOG_FILE,
            DATA_FORK,
            &header.catalog_file,
            Some(&extents),
        )?;
        let catalog = Catalog::open(catalog_fork)?;

        Ok(Volume {
            geometry,
            header,
            catalog,
            extents,
            attributes: OnceLock::new(),
            cache: RecordCache::default(),
            name: OnceLock::new(),
        })
    }

    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Byte offset of the volume on its device.
    pub fn start_offset(&self) -> u64 {
        self.geometry.start
    }

    pub fn journaled(&self) -> bool {
        self.header.attribute(VOL_JOURNALED)
    }

    /// True when the volume was not cleanly unmounted. Reads still
    /// work; the journal is never replayed.
    pub fn dirty(&self) -> bool {
        !self.header.attribute(VOL_UNMOUNTED) || self.header.attribute(VOL_INCONSISTENT)
    }

    /// Volume name, from the root folder's thread record.
    pub fn name(&self) -> Result<String> {
        if let Some(name) = self.name.get() {
            return Ok(name.clone());
        }
        let thread = self.catalog.thread(CNID_ROOT_FOLDER)?;
        let name = utf16_to_utf8_lossy(thread.name.units());
        let _ = self.name.set(name.clone());
        Ok(name)
    }

    /// The lazily-opened attributes tree, or `None` when the volume
    /// has no attributes file.
    pub(crate) fn attributes_tree(&self) -> Result<Option<&AttrTree>> {
        if self.attributes.get().is_none() {
            let tree = if self.header.attributes_file.logical_size == 0 {
                None
            } else {
                let fork = Fork::new(
                    self.geometry.clone(),
                    CNID_ATTRIBUTES_FILE,
                    DATA_FORK,
                    &self.header.attributes_file,
                    Some(&self.extents),
                )?;
                Some(AttrTree::open(fork)?)
            };
            let _ = self.attributes.set(tree);
        }
        Ok(self.attributes.get().and_then(|tree| tree.as_ref()))
    }

    /// A fork reader for one of a file's two byte streams.
    pub fn fork_reader(&self, file: &FileRecord, fork: ForkKind) -> Result<Fork> {
        Fork::new(
            self.geometry.clone(),
            file.cnid,
            fork.as_raw(),
            file.fork(fork),
            Some(&self.extents),
        )
    }

    /// Positioned read from a file's fork. Returns the bytes
    /// delivered; reads past the fork's logical size are clamped.
    pub fn read(
        &self,
        file: &FileRecord,
        fork: ForkKind,
        buf: &mut [u8],
        offset: u64,
    ) -> Result<usize> {
        self.fork_reader(file, fork)?.read_at(buf, offset)
    }

    /// Children of a folder in catalog order, names mapped to their
    /// UNIX form.
    pub fn readdir(&self, folder: Cnid) -> Result<Vec<(String, CatalogRecord)>> {
        self.catalog.list_directory(folder)
    }

    /// Synthesize POSIX attributes for a file or folder record.
    pub fn stat(&self, record: &CatalogRecord, fork: ForkKind) -> Result<Stat> {
        if let Some(file) = record.as_file() {
            let bsd = &file.permissions;
            let fork_data = file.fork(fork);
            let (nlink, rdev) = if bsd.is_device() {
                (1, bsd.raw_device())
            } else {
                (bsd.link_count().max(1), 0)
            };
            Ok(Stat {
                mode: bsd.file_mode,
                uid: bsd.owner_id,
                gid: bsd.group_id,
                nlink,
                rdev,
                size: fork_data.logical_size,
                blocks: fork_data.total_blocks,
                blksize: if fork_data.clump_size != 0 {
                    fork_data.clump_size
                } else {
                    self.header.block_size
                },
                atime: hfs_time_to_unix(file.date_accessed),
                mtime: hfs_time_to_unix(file.date_content_mod),
                ctime: hfs_time_to_unix(file.date_attrib_mod),
                birthtime: hfs_time_to_unix(file.date_created),
                bsd_flags: (bsd.admin_flags as u32) << 16 | bsd.owner_flags as u32,
            })
        } else if let Some(folder) = record.as_folder() {
            let bsd = &folder.permissions;
            Ok(Stat {
                mode: bsd.file_mode | S_IFDIR,
                uid: bsd.owner_id,
                gid: bsd.group_id,
                // Self plus dot-dot, then one per child as POSIX counts
                // directories.
                nlink: folder.valence + 2,
                rdev: 0,
                size: self.header.block_size as u64,
                blocks: 0,
                blksize: self.header.block_size,
                atime: hfs_time_to_unix(folder.date_accessed),
                mtime: hfs_time_to_unix(folder.date_content_mod),
                ctime: hfs_time_to_unix(folder.date_attrib_mod),
                birthtime: hfs_time_to_unix(folder.date_created),
                bsd_flags: (bsd.admin_flags as u32) << 16 | bsd.owner_flags as u32,
            })
        } else {
            Err(Error::Corrupt("thread records carry no attributes"))
        }
    }

    /// Rebuild the absolute UNIX path of a CNID by walking parent
    /// threads up to the root folder.
    pub fn path_of(&self, cnid: Cnid) -> Result<String> {
        if cnid == CNID_ROOT_FOLDER {
            return Ok(String::from("/"));
        }
        let mut elements = Vec::new();
        let mut current = cnid;
        // HFS+ limits folder nesting well below this; anything deeper
        // means the thread records loop.
        for _ in 0..512 {
            let thread = self.catalog.thread(current)?;
            elements.push(name_to_unix(thread.name.units())?);
            current = thread.parent;
            if current == CNID_ROOT_FOLDER {
                elements.reverse();
                let mut path = String::new();
                for element in &elements {
                    path.push('/');
                    path.push_str(element);
                }
                return Ok(path);
            }
        }
        Err(Error::Corrupt("parent thread records form a cycle"))
    }
}
