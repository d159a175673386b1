//! Fork readers: mapping a file's logical bytes onto device blocks.
//!
//! A fork starts with the eight extent descriptors embedded in its
//! catalog (or volume header) record; once those are exhausted the
//! Extents Overflow tree continues the list, keyed by the number of
//! blocks already covered.

use std::io::Read;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};

use crate::btree::{BTree, Key, Record};
use crate::device::DeviceRead;
use crate::error::{Error, Result};
use crate::ondisk::{import_extent_array, Cnid, ExtentArray, ForkData};

/// Extents Overflow tree key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExtentKey {
    pub fork_type: u8,
    pub cnid: Cnid,
    pub start_block: u32,
}

impl ExtentKey {
    pub fn new(cnid: Cnid, fork_type: u8, start_block: u32) -> Self {
        Self {
            fork_type,
            cnid,
            start_block,
        }
    }
}

impl Key for ExtentKey {
    fn import(source: &mut dyn Read) -> Result<Self> {
        let key_length = source.read_u16::<BigEndian>()?;
        if key_length != 10 {
            return Err(Error::Corrupt("extent key with unexpected length"));
        }
        let fork_type = source.read_u8()?;
        let _pad = source.read_u8()?;
        Ok(Self {
            fork_type,
            cnid: source.read_u32::<BigEndian>()?,
            start_block: source.read_u32::<BigEndian>()?,
        })
    }
}

impl PartialOrd for ExtentKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExtentKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.cnid
            .cmp(&other.cnid)
            .then(self.fork_type.cmp(&other.fork_type))
            .then(self.start_block.cmp(&other.start_block))
    }
}

/// Leaf payload of the Extents Overflow tree: eight more descriptors.
pub struct ExtentOverflowRecord {
    pub key: ExtentKey,
    pub extents: ExtentArray,
}

impl Record<ExtentKey> for ExtentOverflowRecord {
    fn import(source: &mut dyn Read, key: ExtentKey) -> Result<Self> {
        Ok(Self {
            key,
            extents: import_extent_array(source)?,
        })
    }

    fn key(&self) -> &ExtentKey {
        &self.key
    }
}

pub type ExtentsTree = BTree<ExtentKey, ExtentOverflowRecord>;

/// Where a volume sits on its device. Shared by every fork reader the
/// volume creates.
#[derive(Clone)]
pub struct Geometry {
    pub device: Arc<dyn DeviceRead>,
    /// Byte offset of the volume inside the device (non-zero for
    /// partitioned containers and wrapped volumes).
    pub start: u64,
    pub block_size: u32,
    pub total_blocks: u32,
}

/// One extent's slice of the fork's logical byte range.
#[derive(Debug, Clone, Copy)]
struct Span {
    start_block: u32,
    begin: u64,
    end: u64,
}

/// Read-only view of one fork. Immutable after construction, so reads
/// are `&self` and freely concurrent.
#[derive(Clone)]
pub struct Fork {
    geometry: Geometry,
    cnid: Cnid,
    fork_type: u8,
    logical_size: u64,
    spans: Vec<Span>,
}

impl Fork {
    /// Assemble the complete extent list for a fork, consulting the
    /// overflow tree when the inline descriptors stop short of
    /// `total_blocks`. Verifies on the way that every extent stays
    /// inside the volume and that coverage reaches the declared size.
    pub fn new(
        geometry: Geometry,
        cnid: Cnid,
        fork_type: u8,
        fork: &ForkData,
        overflow: Option<&ExtentsTree>,
    ) -> Result<Fork> {
        let block_size = geometry.block_size as u64;
        let mut spans = Vec::with_capacity(8);
        let mut covered: u32 = 0;
        let mut terminated = false;
        let mut pending = Some(fork.extents);

        while let Some(extents) = pending.take() {
            for extent in extents.iter() {
                if extent.is_empty() {
                    terminated = true;
                    break;
                }
                let end_block = extent
                    .start_block
                    .checked_add(extent.block_count)
                    .ok_or(Error::Corrupt("extent wraps the block space"))?;
                if end_block > geometry.total_blocks {
                    return Err(Error::Corrupt("extent beyond volume end"));
                }
                let begin = covered as u64 * block_size;
                covered = covered
                    .checked_add(extent.block_count)
                    .ok_or(Error::Corrupt("fork block count overflow"))?;
                spans.push(Span {
                    start_block: extent.start_block,
                    begin,
                    end: covered as u64 * block_size,
                });
                if covered >= fork.total_blocks {
                    terminated = true;
                    break;
                }
            }
            if terminated || covered >= fork.total_blocks {
                break;
            }
            let tree = overflow.ok_or(Error::Corrupt("fork overflows without an extents tree"))?;
            let record = tree
                .find(&ExtentKey::new(cnid, fork_type, covered))
                .map_err(|err| match err {
                    Error::NotFound => Error::Corrupt("extent records do not cover fork"),
                    other => other,
                })?;
            if record.extents[0].is_empty() {
                return Err(Error::Corrupt("extent records do not cover fork"));
            }
            pending = Some(record.extents);
        }

        if covered < fork.total_blocks {
            return Err(Error::Corrupt("extent records do not cover fork"));
        }
        if (covered as u64) * block_size < fork.logical_size {
            return Err(Error::Corrupt("fork size exceeds its extents"));
        }

        Ok(Fork {
            geometry,
            cnid,
            fork_type,
            logical_size: fork.logical_size,
            spans,
        })
    }

    pub fn cnid(&self) -> Cnid {
        self.cnid
    }

    pub fn fork_type(&self) -> u8 {
        self.fork_type
    }

    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    /// The fork's extents as `(start_block, block_count)` pairs, in
    /// logical order. The returned list is the caller's.
    pub fn extents(&self) -> Vec<(u32, u32)> {
        let block_size = self.geometry.block_size as u64;
        self.spans
            .iter()
            .map(|span| {
                (
                    span.start_block,
                    ((span.end - span.begin) / block_size) as u32,
                )
            })
            .collect()
    }

    /// Positioned read. Returns the byte count actually delivered,
    /// which falls short of `buf.len()` only at `logical_size`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if offset >= self.logical_size || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.logical_size - offset) as usize;
        let block_size = self.geometry.block_size as u64;
        let mut done = 0usize;
        for span in &self.spans {
            if done == want {
                break;
            }
            let pos = offset + done as u64;
            if pos >= span.end {
                continue;
            }
            if pos < span.begin {
                return Err(Error::Corrupt("extent spans out of order"));
            }
            let span_offset = pos - span.begin;
            let count = ((span.end - pos) as usize).min(want - done);
            let device_offset =
                self.geometry.start + span.start_block as u64 * block_size + span_offset;
            self.geometry
                .device
                .read_at(&mut buf[done..done + count], device_offset)?;
            done += count;
        }
        if done < want {
            return Err(Error::Corrupt("fork data ends before its logical size"));
        }
        Ok(want)
    }

    /// Whole-buffer read; a tail short of `buf.len()` is an I/O error
    /// here, used by the tree engine for fixed-size node fetches.
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let got = self.read_at(buf, offset)?;
        if got < buf.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "read past end of fork",
            )));
        }
        Ok(())
    }
}
