//! On-disk record layouts.
//!
//! Everything HFS+ stores is big-endian and fixed-layout; each record
//! decodes itself from a byte stream with an `import` constructor.
//! Layouts follow TN1150.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::Result;

/// Catalog node id: the per-volume file/folder identifier.
pub type Cnid = u32;

pub const CNID_ROOT_PARENT: Cnid = 1;
pub const CNID_ROOT_FOLDER: Cnid = 2;
pub const CNID_EXTENTS_FILE: Cnid = 3;
pub const CNID_CATALOG_FILE: Cnid = 4;
pub const CNID_BAD_BLOCK_FILE: Cnid = 5;
pub const CNID_ALLOCATION_FILE: Cnid = 6;
pub const CNID_STARTUP_FILE: Cnid = 7;
pub const CNID_ATTRIBUTES_FILE: Cnid = 8;
/// CNIDs below this are reserved for the volume's own bookkeeping.
pub const CNID_FIRST_USER: Cnid = 16;

/// "H+", case-insensitive HFS+.
pub const SIG_HFSPLUS: u16 = 0x482B;
/// "HX", case-sensitive HFSX.
pub const SIG_HFSX: u16 = 0x4858;
/// "BD", classic HFS. Only recognized as a possible wrapper around an
/// embedded HFS+ volume.
pub const SIG_HFS: u16 = 0x4244;

// Volume header attribute bits.
pub const VOL_HWLOCK: u32 = 7;
pub const VOL_UNMOUNTED: u32 = 8;
pub const VOL_BADBLOCKS: u32 = 9;
pub const VOL_NOCACHE: u32 = 10;
pub const VOL_INCONSISTENT: u32 = 11;
pub const VOL_CNIDS_RECYCLED: u32 = 12;
pub const VOL_JOURNALED: u32 = 13;
pub const VOL_SWLOCK: u32 = 15;

/// Data fork selector in extent and attribute keys.
pub const DATA_FORK: u8 = 0x00;
/// Resource fork selector.
pub const RSRC_FORK: u8 = 0xFF;

// Catalog leaf record types.
pub const REC_FOLDER: i16 = 0x0001;
pub const REC_FILE: i16 = 0x0002;
pub const REC_FOLDER_THREAD: i16 = 0x0003;
pub const REC_FILE_THREAD: i16 = 0x0004;

// Finder type/creator codes marking hard-link stubs.
pub const CREATOR_HFSPLUS: u32 = u32::from_be_bytes(*b"hfs+");
pub const TYPE_HARD_LINK: u32 = u32::from_be_bytes(*b"hlnk");
pub const CREATOR_MACS: u32 = u32::from_be_bytes(*b"MACS");
pub const TYPE_DIR_HARD_LINK: u32 = u32::from_be_bytes(*b"fdrp");

// File mode bits, as stored in `Permissions::file_mode`.
pub const S_IFMT: u16 = 0o170000;
pub const S_IFIFO: u16 = 0o010000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IFSOCK: u16 = 0o140000;
pub const S_IFWHT: u16 = 0o160000;

/// Seconds between the HFS+ epoch (1904-01-01) and the POSIX epoch.
pub const HFS_EPOCH_OFFSET: i64 = 2_082_844_800;

/// Convert an on-disk timestamp to POSIX seconds.
pub fn hfs_time_to_unix(t: u32) -> i64 {
    t as i64 - HFS_EPOCH_OFFSET
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtentDescriptor {
    pub start_block: u32,
    pub block_count: u32,
}

impl ExtentDescriptor {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            start_block: source.read_u32::<BigEndian>()?,
            block_count: source.read_u32::<BigEndian>()?,
        })
    }

    /// An all-zero descriptor terminates an extent record.
    pub fn is_empty(&self) -> bool {
        self.start_block == 0 && self.block_count == 0
    }
}

/// Eight inline extent descriptors; overflow lives in the Extents tree.
pub type ExtentArray = [ExtentDescriptor; 8];

pub fn import_extent_array(source: &mut dyn Read) -> Result<ExtentArray> {
    Ok([
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
        ExtentDescriptor::import(source)?,
    ])
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ForkData {
    pub logical_size: u64,
    pub clump_size: u32,
    pub total_blocks: u32,
    pub extents: ExtentArray,
}

impl ForkData {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            logical_size: source.read_u64::<BigEndian>()?,
            clump_size: source.read_u32::<BigEndian>()?,
            total_blocks: source.read_u32::<BigEndian>()?,
            extents: import_extent_array(source)?,
        })
    }
}

/// The 512-byte volume header at offset 1024.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHeader {
    pub signature: u16,
    pub version: u16,
    pub attributes: u32,
    pub last_mounted_version: u32,
    pub journal_info_block: u32,
    pub date_created: u32,
    pub date_modified: u32,
    pub date_backedup: u32,
    pub date_checked: u32,
    pub file_count: u32,
    pub folder_count: u32,
    pub block_size: u32,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub next_alloc_block: u32,
    pub rsrc_clump_size: u32,
    pub data_clump_size: u32,
    pub next_cnid: Cnid,
    pub write_count: u32,
    pub encodings: u64,
    pub finder_info: [u32; 8],
    pub allocation_file: ForkData,
    pub extents_file: ForkData,
    pub catalog_file: ForkData,
    pub attributes_file: ForkData,
    pub startup_file: ForkData,
}

impl VolumeHeader {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        let signature = source.read_u16::<BigEndian>()?;
        let version = source.read_u16::<BigEndian>()?;
        let attributes = source.read_u32::<BigEndian>()?;
        let last_mounted_version = source.read_u32::<BigEndian>()?;
        let journal_info_block = source.read_u32::<BigEndian>()?;
        let date_created = source.read_u32::<BigEndian>()?;
        let date_modified = source.read_u32::<BigEndian>()?;
        let date_backedup = source.read_u32::<BigEndian>()?;
        let date_checked = source.read_u32::<BigEndian>()?;
        let file_count = source.read_u32::<BigEndian>()?;
        let folder_count = source.read_u32::<BigEndian>()?;
        let block_size = source.read_u32::<BigEndian>()?;
        let total_blocks = source.read_u32::<BigEndian>()?;
        let free_blocks = source.read_u32::<BigEndian>()?;
        let next_alloc_block = source.read_u32::<BigEndian>()?;
        let rsrc_clump_size = source.read_u32::<BigEndian>()?;
        let data_clump_size = source.read_u32::<BigEndian>()?;
        let next_cnid = source.read_u32::<BigEndian>()?;
        let write_count = source.read_u32::<BigEndian>()?;
        let encodings = source.read_u64::<BigEndian>()?;
        let mut finder_info = [0u32; 8];
        for word in &mut finder_info {
            *word = source.read_u32::<BigEndian>()?;
        }
        Ok(Self {
            signature,
            version,
            attributes,
            last_mounted_version,
            journal_info_block,
            date_created,
            date_modified,
            date_backedup,
            date_checked,
            file_count,
            folder_count,
            block_size,
            total_blocks,
            free_blocks,
            next_alloc_block,
            rsrc_clump_size,
            data_clump_size,
            next_cnid,
            write_count,
            encodings,
            finder_info,
            allocation_file: ForkData::import(source)?,
            extents_file: ForkData::import(source)?,
            catalog_file: ForkData::import(source)?,
            attributes_file: ForkData::import(source)?,
            startup_file: ForkData::import(source)?,
        })
    }

    pub fn attribute(&self, bit: u32) -> bool {
        self.attributes & (1 << bit) != 0
    }
}

/// BSD-style ownership and mode block carried by every catalog record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub owner_id: u32,
    pub group_id: u32,
    pub admin_flags: u8,
    pub owner_flags: u8,
    pub file_mode: u16,
    /// Interpreted by mode: raw device for char/block nodes, link
    /// count otherwise, indirect-node number for hard-link stubs.
    pub special: u32,
}

impl Permissions {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            owner_id: source.read_u32::<BigEndian>()?,
            group_id: source.read_u32::<BigEndian>()?,
            admin_flags: source.read_u8()?,
            owner_flags: source.read_u8()?,
            file_mode: source.read_u16::<BigEndian>()?,
            special: source.read_u32::<BigEndian>()?,
        })
    }

    pub fn is_device(&self) -> bool {
        matches!(self.file_mode & S_IFMT, S_IFCHR | S_IFBLK)
    }

    pub fn raw_device(&self) -> u32 {
        self.special
    }

    pub fn link_count(&self) -> u32 {
        self.special
    }

    pub fn inode_num(&self) -> u32 {
        self.special
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Point {
    pub v: i16,
    pub h: i16,
}

impl Point {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            v: source.read_i16::<BigEndian>()?,
            h: source.read_i16::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rect {
    pub top: i16,
    pub left: i16,
    pub bottom: i16,
    pub right: i16,
}

impl Rect {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            top: source.read_i16::<BigEndian>()?,
            left: source.read_i16::<BigEndian>()?,
            bottom: source.read_i16::<BigEndian>()?,
            right: source.read_i16::<BigEndian>()?,
        })
    }
}

/// Finder metadata for files; `file_type`/`file_creator` double as the
/// hard-link sentinel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub file_type: u32,
    pub file_creator: u32,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

impl FileInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            file_type: source.read_u32::<BigEndian>()?,
            file_creator: source.read_u32::<BigEndian>()?,
            finder_flags: source.read_u16::<BigEndian>()?,
            location: Point::import(source)?,
            reserved: source.read_u16::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtendedFileInfo {
    pub reserved1: [i16; 4],
    pub extended_finder_flags: u16,
    pub reserved2: i16,
    pub put_away_folder_cnid: u32,
}

impl ExtendedFileInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            reserved1: [
                source.read_i16::<BigEndian>()?,
                source.read_i16::<BigEndian>()?,
                source.read_i16::<BigEndian>()?,
                source.read_i16::<BigEndian>()?,
            ],
            extended_finder_flags: source.read_u16::<BigEndian>()?,
            reserved2: source.read_i16::<BigEndian>()?,
            put_away_folder_cnid: source.read_u32::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FolderInfo {
    pub window_bounds: Rect,
    pub finder_flags: u16,
    pub location: Point,
    pub reserved: u16,
}

impl FolderInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            window_bounds: Rect::import(source)?,
            finder_flags: source.read_u16::<BigEndian>()?,
            location: Point::import(source)?,
            reserved: source.read_u16::<BigEndian>()?,
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtendedFolderInfo {
    pub scroll_position: Point,
    pub reserved1: i32,
    pub extended_finder_flags: u16,
    pub reserved2: i16,
    pub put_away_folder_cnid: u32,
}

impl ExtendedFolderInfo {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            scroll_position: Point::import(source)?,
            reserved1: source.read_i32::<BigEndian>()?,
            extended_finder_flags: source.read_u16::<BigEndian>()?,
            reserved2: source.read_i16::<BigEndian>()?,
            put_away_folder_cnid: source.read_u32::<BigEndian>()?,
        })
    }
}

/// Catalog folder record, minus the record type consumed by the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub flags: u16,
    pub valence: u32,
    pub cnid: Cnid,
    pub date_created: u32,
    pub date_content_mod: u32,
    pub date_attrib_mod: u32,
    pub date_accessed: u32,
    pub date_backedup: u32,
    pub permissions: Permissions,
    pub user_info: FolderInfo,
    pub finder_info: ExtendedFolderInfo,
    pub text_encoding: u32,
    pub reserved: u32,
}

impl FolderRecord {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16::<BigEndian>()?,
            valence: source.read_u32::<BigEndian>()?,
            cnid: source.read_u32::<BigEndian>()?,
            date_created: source.read_u32::<BigEndian>()?,
            date_content_mod: source.read_u32::<BigEndian>()?,
            date_attrib_mod: source.read_u32::<BigEndian>()?,
            date_accessed: source.read_u32::<BigEndian>()?,
            date_backedup: source.read_u32::<BigEndian>()?,
            permissions: Permissions::import(source)?,
            user_info: FolderInfo::import(source)?,
            finder_info: ExtendedFolderInfo::import(source)?,
            text_encoding: source.read_u32::<BigEndian>()?,
            reserved: source.read_u32::<BigEndian>()?,
        })
    }
}

/// Catalog file record, minus the record type consumed by the caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub flags: u16,
    pub reserved1: u32,
    pub cnid: Cnid,
    pub date_created: u32,
    pub date_content_mod: u32,
    pub date_attrib_mod: u32,
    pub date_accessed: u32,
    pub date_backedup: u32,
    pub permissions: Permissions,
    pub user_info: FileInfo,
    pub finder_info: ExtendedFileInfo,
    pub text_encoding: u32,
    pub reserved2: u32,
    pub data_fork: ForkData,
    pub rsrc_fork: ForkData,
}

impl FileRecord {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            flags: source.read_u16::<BigEndian>()?,
            reserved1: source.read_u32::<BigEndian>()?,
            cnid: source.read_u32::<BigEndian>()?,
            date_created: source.read_u32::<BigEndian>()?,
            date_content_mod: source.read_u32::<BigEndian>()?,
            date_attrib_mod: source.read_u32::<BigEndian>()?,
            date_accessed: source.read_u32::<BigEndian>()?,
            date_backedup: source.read_u32::<BigEndian>()?,
            permissions: Permissions::import(source)?,
            user_info: FileInfo::import(source)?,
            finder_info: ExtendedFileInfo::import(source)?,
            text_encoding: source.read_u32::<BigEndian>()?,
            reserved2: source.read_u32::<BigEndian>()?,
            data_fork: ForkData::import(source)?,
            rsrc_fork: ForkData::import(source)?,
        })
    }

    /// Indirect file hard link, stored under the HFS+ private data
    /// directory and referenced by `permissions.inode_num()`.
    pub fn is_hard_link(&self) -> bool {
        self.user_info.file_creator == CREATOR_HFSPLUS && self.user_info.file_type == TYPE_HARD_LINK
    }

    /// Directory hard link, the Time Machine sharing mechanism.
    pub fn is_dir_hard_link(&self) -> bool {
        self.user_info.file_creator == CREATOR_MACS
            && self.user_info.file_type == TYPE_DIR_HARD_LINK
    }

    pub fn fork(&self, kind: ForkKind) -> &ForkData {
        match kind {
            ForkKind::Data => &self.data_fork,
            ForkKind::Rsrc => &self.rsrc_fork,
        }
    }
}

/// Which of a file's two byte streams an operation addresses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ForkKind {
    #[default]
    Data,
    Rsrc,
}

impl ForkKind {
    pub fn as_raw(self) -> u8 {
        match self {
            ForkKind::Data => DATA_FORK,
            ForkKind::Rsrc => RSRC_FORK,
        }
    }
}

// B-tree node kinds.
pub const NODE_LEAF: i8 = -1;
pub const NODE_INDEX: i8 = 0;
pub const NODE_HEADER: i8 = 1;
pub const NODE_MAP: i8 = 2;

/// 14-byte descriptor at the front of every tree node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub forward_link: u32,
    pub backward_link: u32,
    pub kind: i8,
    pub height: u8,
    pub num_records: u16,
    pub reserved: u16,
}

impl NodeDescriptor {
    pub const SIZE: usize = 14;

    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            forward_link: source.read_u32::<BigEndian>()?,
            backward_link: source.read_u32::<BigEndian>()?,
            kind: source.read_i8()?,
            height: source.read_u8()?,
            num_records: source.read_u16::<BigEndian>()?,
            reserved: source.read_u16::<BigEndian>()?,
        })
    }
}

// Tree header attribute masks.
pub const TREE_BIG_KEYS: u32 = 0x0000_0002;
pub const TREE_VARIABLE_INDEX_KEYS: u32 = 0x0000_0004;

// Key comparison selectors stored in the catalog tree header.
pub const KEY_COMPARE_CASE_FOLDING: u8 = 0xCF;
pub const KEY_COMPARE_BINARY: u8 = 0xBC;

/// First record of a tree's header node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TreeHeader {
    pub tree_depth: u16,
    pub root_node: u32,
    pub leaf_records: u32,
    pub first_leaf_node: u32,
    pub last_leaf_node: u32,
    pub node_size: u16,
    pub max_key_length: u16,
    pub total_nodes: u32,
    pub free_nodes: u32,
    pub reserved1: u16,
    pub clump_size: u32,
    pub btree_type: u8,
    pub key_compare_type: u8,
    pub attributes: u32,
}

impl TreeHeader {
    pub fn import(source: &mut dyn Read) -> Result<Self> {
        Ok(Self {
            tree_depth: source.read_u16::<BigEndian>()?,
            root_node: source.read_u32::<BigEndian>()?,
            leaf_records: source.read_u32::<BigEndian>()?,
            first_leaf_node: source.read_u32::<BigEndian>()?,
            last_leaf_node: source.read_u32::<BigEndian>()?,
            node_size: source.read_u16::<BigEndian>()?,
            max_key_length: source.read_u16::<BigEndian>()?,
            total_nodes: source.read_u32::<BigEndian>()?,
            free_nodes: source.read_u32::<BigEndian>()?,
            reserved1: source.read_u16::<BigEndian>()?,
            clump_size: source.read_u32::<BigEndian>()?,
            btree_type: source.read_u8()?,
            key_compare_type: source.read_u8()?,
            attributes: source.read_u32::<BigEndian>()?,
        })
    }
}

/// The handful of classic-HFS Master Directory Block fields needed to
/// find an embedded HFS+ volume inside a wrapper.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WrapperBlock {
    pub alloc_block_size: u32,
    pub alloc_start: u16,
    pub embed_signature: u16,
    pub embed_start_block: u16,
    pub embed_block_count: u16,
}

impl WrapperBlock {
    /// `block` is the 512 bytes at volume offset 1024 whose signature
    /// already read as classic HFS.
    pub fn parse(block: &[u8; 512]) -> Self {
        Self {
            alloc_block_size: u32::from_be_bytes([block[20], block[21], block[22], block[23]]),
            alloc_start: u16::from_be_bytes([block[28], block[29]]),
            embed_signature: u16::from_be_bytes([block[124], block[125]]),
            embed_start_block: u16::from_be_bytes([block[126], block[127]]),
            embed_block_count: u16::from_be_bytes([block[128], block[129]]),
        }
    }

    /// Byte offset of the embedded HFS+ volume, relative to the
    /// wrapper's own start.
    pub fn embedded_offset(&self) -> u64 {
        self.alloc_start as u64 * 512 + self.embed_start_block as u64 * self.alloc_block_size as u64
    }
}
