//! Read-only user-space driver for HFS+ ("Mac OS Extended") volumes,
//! including journaled volumes and the directory-hard-link layout
//! Time Machine backups use.
//!
//! The entry point is [`Volume`]: open a raw device or disk image,
//! then look paths up, list directories, stat records and read forks
//! through it. Nothing on disk is ever modified and the journal is
//! only inspected to warn about dirty volumes.
//!
//! ```no_run
//! use hfsplus_read::{ForkKind, Volume};
//!
//! # fn main() -> hfsplus_read::Result<()> {
//! let volume = Volume::open("/dev/disk2s1")?;
//! let (record, fork) = volume.lookup("/Users/shared/notes.txt")?;
//! let stat = volume.stat(&record, fork)?;
//! let mut data = vec![0u8; stat.size as usize];
//! if let Some(file) = record.as_file() {
//!     volume.read(file, fork, &mut data, 0)?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod attr;
pub mod btree;
pub mod catalog;
pub mod device;
mod error;
pub mod fork;
pub mod ondisk;
pub mod path;
pub mod unicode;
pub mod volume;

pub use attr::{AttrKey, AttrRecord, XATTR_CREATION_DATE, XATTR_FINDER_INFO, XATTR_RESOURCE_FORK};
pub use catalog::{Catalog, CatalogBody, CatalogKey, CatalogRecord};
pub use device::{CacheConfig, CachedDevice, DeviceRead, FileDevice, MemDevice};
pub use error::{Error, Result};
pub use fork::{ExtentKey, Fork, Geometry};
pub use ondisk::{Cnid, FileRecord, FolderRecord, ForkKind, VolumeHeader};
pub use path::RecordCache;
pub use unicode::{fast_unicode_compare, hfs_nfd, HfsString, HfsStringBinary};
pub use volume::{Stat, Volume, VolumeOptions};
