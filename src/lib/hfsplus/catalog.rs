//! Catalog tree records and lookups.
//!
//! Catalog keys order by parent CNID, then by name under the volume's
//! comparison rule. "H+" volumes case-fold; "HX" volumes compare code
//! units, so the tree is instantiated with one of two name types and
//! the difference stays out of every caller's way.

use std::io::Read;
use std::sync::OnceLock;

use byteorder::{BigEndian, ReadBytesExt};

use crate::btree::{BTree, Key, Record};
use crate::error::{Error, Result};
use crate::fork::Fork;
use crate::ondisk::{
    Cnid, FileRecord, FolderRecord, CNID_ROOT_FOLDER, KEY_COMPARE_BINARY, REC_FILE,
    REC_FILE_THREAD, REC_FOLDER, REC_FOLDER_THREAD,
};
use crate::unicode::{name_to_unix_lossy, HfsString, HfsStringBinary, HfsStringLike};

/// Root-level folder holding the backing files of file hard links.
/// The four leading nulls sort it past every user-visible name.
pub const FILE_LINK_DIR: &str = "\u{0}\u{0}\u{0}\u{0}HFS+ Private Data";
/// Root-level folder holding the backing directories of directory
/// hard links (the Time Machine sharing directory).
pub const DIR_LINK_DIR: &str = ".HFS+ Private Directory Data\u{D}";

pub const CATALOG_KEY_MIN_LENGTH: u16 = 6;

#[derive(Debug, Clone)]
pub struct CatalogKey<S> {
    pub parent: Cnid,
    pub name: S,
}

impl<S: HfsStringLike> CatalogKey<S> {
    pub fn new(parent: Cnid, name: Vec<u16>) -> Self {
        Self {
            parent,
            name: S::from_units(name),
        }
    }

    /// The key of a CNID's thread record: empty name under the CNID
    /// itself.
    pub fn thread(cnid: Cnid) -> Self {
        Self::new(cnid, Vec::new())
    }
}

impl<S: HfsStringLike> Key for CatalogKey<S> {
    fn import(source: &mut dyn Read) -> Result<Self> {
        let key_length = source.read_u16::<BigEndian>()?;
        if key_length < CATALOG_KEY_MIN_LENGTH {
            return Err(Error::Corrupt("catalog key shorter than its fixed fields"));
        }
        let parent = source.read_u32::<BigEndian>()?;
        let count = source.read_u16::<BigEndian>()?;
        let mut units = Vec::with_capacity(count as usize);
        for _ in 0..count {
            units.push(source.read_u16::<BigEndian>()?);
        }
        Ok(Self {
            parent,
            name: S::from_units(units),
        })
    }
}

impl<S: Ord> PartialOrd for CatalogKey<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: Ord> Ord for CatalogKey<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parent
            .cmp(&other.parent)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl<S: Ord> PartialEq for CatalogKey<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl<S: Ord> Eq for CatalogKey<S> {}

#[derive(Debug, Clone)]
pub enum CatalogBody<S> {
    Folder(FolderRecord),
    File(FileRecord),
    FolderThread(CatalogKey<S>),
    FileThread(CatalogKey<S>),
}

#[derive(Debug, Clone)]
pub struct CatalogRecord<S = HfsString> {
    pub key: CatalogKey<S>,
    pub body: CatalogBody<S>,
}

impl<S> CatalogRecord<S> {
    pub fn as_folder(&self) -> Option<&FolderRecord> {
        match &self.body {
            CatalogBody::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileRecord> {
        match &self.body {
            CatalogBody::File(file) => Some(file),
            _ => None,
        }
    }

    /// CNID of the file or folder this record describes.
    pub fn cnid(&self) -> Option<Cnid> {
        match &self.body {
            CatalogBody::Folder(folder) => Some(folder.cnid),
            CatalogBody::File(file) => Some(file.cnid),
            _ => None,
        }
    }
}

fn import_thread_key<S: HfsStringLike>(source: &mut dyn Read) -> Result<CatalogKey<S>> {
    let _reserved = source.read_i16::<BigEndian>()?;
    let parent = source.read_u32::<BigEndian>()?;
    let count = source.read_u16::<BigEndian>()?;
    let mut units = Vec::with_capacity(count as usize);
    for _ in 0..count {
        units.push(source.read_u16::<BigEndian>()?);
    }
    Ok(CatalogKey {
        parent,
        name: S::from_units(units),
    })
}

impl<S: HfsStringLike> Record<CatalogKey<S>> for CatalogRecord<S> {
    fn import(source: &mut dyn Read, key: CatalogKey<S>) -> Result<Self> {
        let record_type = source.read_i16::<BigEndian>()?;
        let body = match record_type {
            REC_FOLDER => CatalogBody::Folder(FolderRecord::import(source)?),
            REC_FILE => CatalogBody::File(FileRecord::import(source)?),
            REC_FOLDER_THREAD => CatalogBody::FolderThread(import_thread_key(source)?),
            REC_FILE_THREAD => CatalogBody::FileThread(import_thread_key(source)?),
            _ => return Err(Error::Corrupt("unknown catalog record type")),
        };
        Ok(CatalogRecord { key, body })
    }

    fn key(&self) -> &CatalogKey<S> {
        &self.key
    }
}

type CaseFoldingTree = BTree<CatalogKey<HfsString>, CatalogRecord<HfsString>>;
type BinaryTree = BTree<CatalogKey<HfsStringBinary>, CatalogRecord<HfsStringBinary>>;

enum CatalogTree {
    CaseFolding(CaseFoldingTree),
    Binary(BinaryTree),
}

fn convert_key(key: CatalogKey<HfsStringBinary>) -> CatalogKey<HfsString> {
    CatalogKey {
        parent: key.parent,
        name: HfsString(key.name.0),
    }
}

fn convert_record(record: CatalogRecord<HfsStringBinary>) -> CatalogRecord<HfsString> {
    CatalogRecord {
        key: convert_key(record.key),
        body: match record.body {
            CatalogBody::Folder(folder) => CatalogBody::Folder(folder),
            CatalogBody::File(file) => CatalogBody::File(file),
            CatalogBody::FolderThread(key) => CatalogBody::FolderThread(convert_key(key)),
            CatalogBody::FileThread(key) => CatalogBody::FileThread(convert_key(key)),
        },
    }
}

pub struct Catalog {
    tree: CatalogTree,
    file_link_parent: OnceLock<Cnid>,
    dir_link_parent: OnceLock<Cnid>,
}

impl Catalog {
    /// The tree header says which comparison rule the volume was
    /// formatted with; instantiate the matching key order.
    pub fn open(fork: Fork) -> Result<Catalog> {
        let folding = CaseFoldingTree::open(fork.clone())?;
        let tree = if folding.header().key_compare_type == KEY_COMPARE_BINARY {
            CatalogTree::Binary(BinaryTree::open(fork)?)
        } else {
            CatalogTree::CaseFolding(folding)
        };
        Ok(Catalog {
            tree,
            file_link_parent: OnceLock::new(),
            dir_link_parent: OnceLock::new(),
        })
    }

    pub fn case_sensitive(&self) -> bool {
        matches!(self.tree, CatalogTree::Binary(_))
    }

    /// Direct leaf lookup by (parent, name). The name is on-disk
    /// UTF-16, already normalized by the caller.
    pub fn find_by_key(&self, parent: Cnid, name: &[u16]) -> Result<CatalogRecord> {
        match &self.tree {
            CatalogTree::CaseFolding(tree) => {
                let key = CatalogKey::<HfsString>::new(parent, name.to_vec());
                Ok((*tree.find(&key)?).clone())
            }
            CatalogTree::Binary(tree) => {
                let key = CatalogKey::<HfsStringBinary>::new(parent, name.to_vec());
                Ok(convert_record((*tree.find(&key)?).clone()))
            }
        }
    }

    /// A CNID's thread record: the (parent, name) back-pointer.
    pub fn thread(&self, cnid: Cnid) -> Result<CatalogKey<HfsString>> {
        let record = self.find_by_key(cnid, &[])?;
        match record.body {
            CatalogBody::FolderThread(key) | CatalogBody::FileThread(key) => Ok(key),
            _ => Err(Error::Corrupt("expected a thread record")),
        }
    }

    /// Two-step lookup: thread record first, then the record it names.
    pub fn find_by_cnid(&self, cnid: Cnid) -> Result<CatalogRecord> {
        let thread = self.thread(cnid)?;
        self.find_by_key(thread.parent, thread.name.units())
    }

    /// Every child of a folder, in catalog (name) order. Thread
    /// records are bookkeeping and are not listed. Undecodable names
    /// are surfaced with replacement characters rather than dropped.
    pub fn list_directory(&self, folder: Cnid) -> Result<Vec<(String, CatalogRecord)>> {
        match &self.tree {
            CatalogTree::CaseFolding(tree) => list_directory_in(tree, folder),
            CatalogTree::Binary(tree) => Ok(list_directory_in(tree, folder)?
                .into_iter()
                .map(|(name, record)| (name, convert_record(record)))
                .collect()),
        }
    }

    fn link_parent(&self, slot: &OnceLock<Cnid>, dir_name: &str) -> Result<Cnid> {
        if let Some(&cnid) = slot.get() {
            return Ok(cnid);
        }
        let name: Vec<u16> = dir_name.encode_utf16().collect();
        let record = self
            .find_by_key(CNID_ROOT_FOLDER, &name)
            .map_err(|err| match err {
                Error::NotFound => Error::Corrupt("private link directory missing"),
                other => other,
            })?;
        let folder = record
            .as_folder()
            .ok_or(Error::Corrupt("private link directory is not a folder"))?;
        let _ = slot.set(folder.cnid);
        Ok(folder.cnid)
    }

    /// Chase a file hard link to its backing record under the private
    /// data directory.
    pub fn resolve_file_hardlink(&self, inode_num: u32) -> Result<CatalogRecord> {
        let parent = self.link_parent(&self.file_link_parent, FILE_LINK_DIR)?;
        let name: Vec<u16> = format!("iNode{inode_num}").encode_utf16().collect();
        self.find_by_key(parent, &name).map_err(|err| match err {
            Error::NotFound => Error::Corrupt("dangling file hard link"),
            other => other,
        })
    }

    /// Chase a directory hard link to its backing folder.
    pub fn resolve_dir_hardlink(&self, inode_num: u32) -> Result<CatalogRecord> {
        let parent = self.link_parent(&self.dir_link_parent, DIR_LINK_DIR)?;
        let name: Vec<u16> = format!("dir_{inode_num}").encode_utf16().collect();
        self.find_by_key(parent, &name).map_err(|err| match err {
            Error::NotFound => Error::Corrupt("dangling directory hard link"),
            other => other,
        })
    }
}

fn list_directory_in<S: HfsStringLike>(
    tree: &BTree<CatalogKey<S>, CatalogRecord<S>>,
    folder: Cnid,
) -> Result<Vec<(String, CatalogRecord<S>)>> {
    let start = CatalogKey::<S>::thread(folder);
    let mut entries = Vec::new();
    for record in tree.cursor_at(&start)? {
        let record = (*record?).clone();
        if record.key.parent != folder {
            break;
        }
        match record.body {
            CatalogBody::FolderThread(_) | CatalogBody::FileThread(_) => continue,
            _ => {
                let name = name_to_unix_lossy(record.key.name.units());
                entries.push((name, record));
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn key_bytes(parent: Cnid, name: &str) -> Vec<u8> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let mut raw = Vec::new();
        raw.extend_from_slice(&((6 + 2 * units.len()) as u16).to_be_bytes());
        raw.extend_from_slice(&parent.to_be_bytes());
        raw.extend_from_slice(&(units.len() as u16).to_be_bytes());
        for unit in units {
            raw.extend_from_slice(&unit.to_be_bytes());
        }
        raw
    }

    #[test]
    fn key_round_trip() {
        let raw = key_bytes(2, "Documents");
        let key = CatalogKey::<HfsString>::import(&mut Cursor::new(&raw)).unwrap();
        assert_eq!(key.parent, 2);
        assert_eq!(key.name.units(), "Documents".encode_utf16().collect::<Vec<_>>());
    }

    #[test]
    fn short_key_is_corrupt() {
        let raw = 4u16.to_be_bytes().to_vec();
        assert!(matches!(
            CatalogKey::<HfsString>::import(&mut Cursor::new(&raw)),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn key_order_folds_case_on_hfsplus() {
        let a = CatalogKey::<HfsString>::new(2, "readme".encode_utf16().collect());
        let b = CatalogKey::<HfsString>::new(2, "README".encode_utf16().collect());
        assert_eq!(a, b);
        let c = CatalogKey::<HfsStringBinary>::new(2, "readme".encode_utf16().collect());
        let d = CatalogKey::<HfsStringBinary>::new(2, "README".encode_utf16().collect());
        assert_ne!(c, d);
    }

    #[test]
    fn parent_dominates_name_order() {
        let a = CatalogKey::<HfsString>::new(2, "zzz".encode_utf16().collect());
        let b = CatalogKey::<HfsString>::new(3, "aaa".encode_utf16().collect());
        assert!(a < b);
    }

    #[test]
    fn private_dir_names() {
        assert!(FILE_LINK_DIR.starts_with('\u{0}'));
        assert!(DIR_LINK_DIR.ends_with('\u{D}'));
    }
}
