//! Extended attributes: the synthesized Apple names plus the
//! attributes B-tree for everything stored on disk.
//!
//! `com.apple.FinderInfo`, `com.apple.ResourceFork` and the creation
//! date are views of the catalog record itself; named attributes come
//! from inline-data records in the attributes tree. All writes fail
//! `ReadOnly`.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::btree::{BTree, Key, Record};
use crate::catalog::CatalogRecord;
use crate::error::{Error, Result};
use crate::ondisk::{hfs_time_to_unix, Cnid, ForkKind};
use crate::unicode::utf16_to_utf8_lossy;
use crate::volume::Volume;

pub const XATTR_FINDER_INFO: &str = "com.apple.FinderInfo";
pub const XATTR_RESOURCE_FORK: &str = "com.apple.ResourceFork";
pub const XATTR_CREATION_DATE: &str = "com.apple.metadata:kMDItemFSCreationDate";

// Attribute record types.
const ATTR_INLINE_DATA: u32 = 0x10;
const ATTR_FORK_DATA: u32 = 0x20;
const ATTR_EXTENTS: u32 = 0x30;

/// Attributes tree key: (cnid, name, start_block), name in strict
/// code-unit order regardless of the catalog's folding rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttrKey {
    pub cnid: Cnid,
    pub name: Vec<u16>,
    pub start_block: u32,
}

impl AttrKey {
    pub fn named(cnid: Cnid, name: &str) -> Self {
        Self {
            cnid,
            name: name.encode_utf16().collect(),
            start_block: 0,
        }
    }
}

impl Key for AttrKey {
    fn import(source: &mut dyn Read) -> Result<Self> {
        let key_length = source.read_u16::<BigEndian>()?;
        if key_length < 12 {
            return Err(Error::Corrupt("attribute key shorter than its fixed fields"));
        }
        let _pad = source.read_u16::<BigEndian>()?;
        let cnid = source.read_u32::<BigEndian>()?;
        let start_block = source.read_u32::<BigEndian>()?;
        let count = source.read_u16::<BigEndian>()?;
        let mut name = Vec::with_capacity(count as usize);
        for _ in 0..count {
            name.push(source.read_u16::<BigEndian>()?);
        }
        Ok(Self {
            cnid,
            name,
            start_block,
        })
    }
}

#[derive(Debug, Clone)]
pub enum AttrBody {
    Inline(Vec<u8>),
    /// Fork-based attribute data; present on disk but never produced
    /// by common tooling. Recorded so `getxattr` can reject it
    /// explicitly instead of misreading it.
    ForkData,
    Extents,
}

#[derive(Debug, Clone)]
pub struct AttrRecord {
    pub key: AttrKey,
    pub body: AttrBody,
}

impl Record<AttrKey> for AttrRecord {
    fn import(source: &mut dyn Read, key: AttrKey) -> Result<Self> {
        let record_type = source.read_u32::<BigEndian>()?;
        let body = match record_type {
            ATTR_INLINE_DATA => {
                let _reserved = source.read_u64::<BigEndian>()?;
                let size = source.read_u32::<BigEndian>()?;
                let mut data = vec![0u8; size as usize];
                source.read_exact(&mut data)?;
                AttrBody::Inline(data)
            }
            ATTR_FORK_DATA => AttrBody::ForkData,
            ATTR_EXTENTS => AttrBody::Extents,
            _ => return Err(Error::Corrupt("unknown attribute record type")),
        };
        Ok(Self { key, body })
    }

    fn key(&self) -> &AttrKey {
        &self.key
    }
}

pub type AttrTree = BTree<AttrKey, AttrRecord>;

/// The 32-byte big-endian FinderInfo blob, field for field in the
/// declared order. File and folder layouts differ.
pub fn serialize_finder_info(record: &CatalogRecord) -> Option<[u8; 32]> {
    let mut buf = [0u8; 32];
    if let Some(file) = record.as_file() {
        let user = &file.user_info;
        let finder = &file.finder_info;
        buf[0..4].copy_from_slice(&user.file_type.to_be_bytes());
        buf[4..8].copy_from_slice(&user.file_creator.to_be_bytes());
        buf[8..10].copy_from_slice(&user.finder_flags.to_be_bytes());
        buf[10..12].copy_from_slice(&user.location.v.to_be_bytes());
        buf[12..14].copy_from_slice(&user.location.h.to_be_bytes());
        buf[14..16].copy_from_slice(&user.reserved.to_be_bytes());
        for (slot, word) in finder.reserved1.iter().enumerate() {
            buf[16 + slot * 2..18 + slot * 2].copy_from_slice(&word.to_be_bytes());
        }
        buf[24..26].copy_from_slice(&finder.extended_finder_flags.to_be_bytes());
        buf[26..28].copy_from_slice(&finder.reserved2.to_be_bytes());
        buf[28..32].copy_from_slice(&finder.put_away_folder_cnid.to_be_bytes());
        Some(buf)
    } else if let Some(folder) = record.as_folder() {
        let user = &folder.user_info;
        let finder = &folder.finder_info;
        buf[0..2].copy_from_slice(&user.window_bounds.top.to_be_bytes());
        buf[2..4].copy_from_slice(&user.window_bounds.left.to_be_bytes());
        buf[4..6].copy_from_slice(&user.window_bounds.bottom.to_be_bytes());
        buf[6..8].copy_from_slice(&user.window_bounds.right.to_be_bytes());
        buf[8..10].copy_from_slice(&user.finder_flags.to_be_bytes());
        buf[10..12].copy_from_slice(&user.location.v.to_be_bytes());
        buf[12..14].copy_from_slice(&user.location.h.to_be_bytes());
        buf[14..16].copy_from_slice(&user.reserved.to_be_bytes());
        buf[16..18].copy_from_slice(&finder.scroll_position.v.to_be_bytes());
        buf[18..20].copy_from_slice(&finder.scroll_position.h.to_be_bytes());
        buf[20..24].copy_from_slice(&finder.reserved1.to_be_bytes());
        buf[24..26].copy_from_slice(&finder.extended_finder_flags.to_be_bytes());
        buf[26..28].copy_from_slice(&finder.reserved2.to_be_bytes());
        buf[28..32].copy_from_slice(&finder.put_away_folder_cnid.to_be_bytes());
        Some(buf)
    } else {
        None
    }
}

impl Volume {
    /// Read one extended attribute: the synthesized Apple names first,
    /// then the attributes tree.
    pub fn getxattr(&self, record: &CatalogRecord, name: &str) -> Result<Vec<u8>> {
        match name {
            XATTR_FINDER_INFO => serialize_finder_info(record)
                .map(|buf| buf.to_vec())
                .ok_or(Error::NotFound),
            XATTR_RESOURCE_FORK => {
                let file = record.as_file().ok_or(Error::NotFound)?;
                if file.rsrc_fork.logical_size == 0 {
                    return Err(Error::NotFound);
                }
                let fork = self.fork_reader(file, ForkKind::Rsrc)?;
                let mut data = vec![0u8; fork.logical_size() as usize];
                fork.read_at(&mut data, 0)?;
                Ok(data)
            }
            XATTR_CREATION_DATE => {
                let created = match (record.as_file(), record.as_folder()) {
                    (Some(file), _) => file.date_created,
                    (_, Some(folder)) => folder.date_created,
                    _ => return Err(Error::NotFound),
                };
                Ok(hfs_time_to_unix(created).to_be_bytes().to_vec())
            }
            _ => {
                let cnid = record.cnid().ok_or(Error::NotFound)?;
                let tree = self.attributes_tree()?.ok_or(Error::NotFound)?;
                let attr = tree.find(&AttrKey::named(cnid, name))?;
                match &attr.body {
                    AttrBody::Inline(data) => Ok(data.clone()),
                    _ => Err(Error::Corrupt("attribute data is not inline")),
                }
            }
        }
    }

    /// Names `getxattr` would answer for this record: the synthesized
    /// set plus any on-disk attributes.
    pub fn listxattr(&self, record: &CatalogRecord) -> Result<Vec<String>> {
        let mut names = vec![
            XATTR_FINDER_INFO.to_owned(),
            XATTR_CREATION_DATE.to_owned(),
        ];
        if record
            .as_file()
            .is_some_and(|file| file.rsrc_fork.logical_size > 0)
        {
            names.push(XATTR_RESOURCE_FORK.to_owned());
        }
        let Some(cnid) = record.cnid() else {
            return Ok(names);
        };
        if let Some(tree) = self.attributes_tree()? {
            let start = AttrKey {
                cnid,
                name: Vec::new(),
                start_block: 0,
            };
            for attr in tree.cursor_at(&start)? {
                let attr = attr?;
                if attr.key.cnid != cnid {
                    break;
                }
                if attr.key.start_block == 0 {
                    names.push(utf16_to_utf8_lossy(&attr.key.name));
                }
            }
        }
        Ok(names)
    }

    pub fn setxattr(&self, _record: &CatalogRecord, _name: &str, _value: &[u8]) -> Result<()> {
        Err(Error::ReadOnly)
    }

    pub fn removexattr(&self, _record: &CatalogRecord, _name: &str) -> Result<()> {
        Err(Error::ReadOnly)
    }
}
