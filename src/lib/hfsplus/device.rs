//! Byte-addressable read access to the backing store.
//!
//! The volume holds a `DeviceRead` capability and everything above it
//! (trees, forks) reads through that handle. Offsets here are device
//! offsets; the volume applies its own start offset before calling
//! down.

use std::fs::File;
use std::io;
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::error::{Error, Result};

pub trait DeviceRead: Send + Sync {
    /// Fill `buf` from `offset`. Either every byte is delivered or the
    /// call fails; short reads surface as `Io`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// Total device size in bytes.
    fn size(&self) -> u64;

    /// Preferred I/O granularity in bytes.
    fn io_block_size(&self) -> u32 {
        512
    }
}

fn short_read() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "read past end of device",
    ))
}

/// Read-only positioned access to a regular file or block device.
pub struct FileDevice {
    file: File,
    size: u64,
    io_block_size: u32,
}

impl FileDevice {
    /// Opens read-only. Regular files take the filesystem's preferred
    /// block size; character and block devices fall back to 512 (the
    /// descriptor ioctls for the physical size are not portable and
    /// the coalescer only needs a working granularity).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(Error::Io)?;
        let meta = file.metadata().map_err(Error::Io)?;
        let file_type = meta.file_type();
        let (size, io_block_size) = if file_type.is_block_device() || file_type.is_char_device() {
            (device_len(&file)?, 512)
        } else if file_type.is_file() {
            (meta.len(), meta.blksize() as u32)
        } else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a file or device",
            )));
        };
        Ok(Self {
            file,
            size,
            io_block_size: io_block_size.max(512),
        })
    }
}

/// `Metadata::len` is zero for block devices; seeking to the end is
/// the portable way to size them.
fn device_len(file: &File) -> Result<u64> {
    use std::io::Seek;
    let mut clone = file.try_clone().map_err(Error::Io)?;
    clone.seek(io::SeekFrom::End(0)).map_err(Error::Io)
}

impl DeviceRead for FileDevice {
    fn read_at(&self, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
        while !buf.is_empty() {
            match self.file.read_at(buf, offset) {
                Ok(0) => return Err(short_read()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn io_block_size(&self) -> u32 {
        self.io_block_size
    }
}

/// An in-memory image. Used by fixtures and by callers that already
/// hold the volume bytes (extracted partitions, decompressed images).
pub struct MemDevice {
    data: Vec<u8>,
}

impl MemDevice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl DeviceRead for MemDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| short_read())?;
        let end = start.checked_add(buf.len()).ok_or_else(short_read)?;
        if end > self.data.len() {
            return Err(short_read());
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Tuning for the read-coalescing cache: how many small blocks to
/// retain and how many blocks of read-ahead to fetch past a miss.
#[derive(Debug, Copy, Clone)]
pub struct CacheConfig {
    pub items: usize,
    pub grace: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            items: 64,
            grace: 32,
        }
    }
}

struct CacheBlock {
    base: u64,
    data: Vec<u8>,
}

/// Coalescing read cache in front of a device. Serializes concurrent
/// readers behind one mutex and keeps a last-N ring of
/// `io_block_size` blocks, reading ahead `grace` blocks on a miss.
/// The contract is strict transparency: callers observe a
/// byte-for-byte view of the underlying device.
pub struct CachedDevice<D> {
    inner: D,
    config: CacheConfig,
    blocks: Mutex<Vec<CacheBlock>>,
}

impl<D: DeviceRead> CachedDevice<D> {
    pub fn new(inner: D, config: CacheConfig) -> Self {
        Self {
            inner,
            config,
            blocks: Mutex::new(Vec::with_capacity(config.items)),
        }
    }

    fn block_size(&self) -> u64 {
        u64::from(self.inner.io_block_size())
    }
}

impl<D: DeviceRead> DeviceRead for CachedDevice<D> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let size = self.inner.size();
        let end = offset
            .checked_add(buf.len() as u64)
            .filter(|&e| e <= size)
            .ok_or_else(short_read)?;

        let bs = self.block_size();
        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut pos = offset;
        while pos < end {
            let base = pos - pos % bs;
            let hit = blocks.iter().position(|b| b.base == base);
            let idx = match hit {
                Some(i) => {
                    // Touch for the last-N replacement order.
                    let block = blocks.remove(i);
                    blocks.push(block);
                    blocks.len() - 1
                }
                None => {
                    // Miss: fetch this block plus up to `grace` blocks
                    // of read-ahead, clamped to the device tail.
                    let want = bs * (1 + u64::from(self.config.grace));
                    let fetch_len = want.min(size - base) as usize;
                    let mut data = vec![0u8; fetch_len];
                    self.inner.read_at(&mut data, base)?;
                    let mut chunk_base = base;
                    for chunk in data.chunks(bs as usize) {
                        if let Some(i) = blocks.iter().position(|b| b.base == chunk_base) {
                            blocks.remove(i);
                        }
                        blocks.push(CacheBlock {
                            base: chunk_base,
                            data: chunk.to_vec(),
                        });
                        chunk_base += bs;
                    }
                    while blocks.len() > self.config.items {
                        blocks.remove(0);
                    }
                    match blocks.iter().position(|b| b.base == base) {
                        Some(i) => i,
                        // Read-ahead longer than the ring; the block we
                        // just fetched was evicted with it.
                        None => {
                            let skip = (pos - base) as usize;
                            let take = (end - pos) as usize;
                            let have = data.len().saturating_sub(skip);
                            if have == 0 {
                                return Err(short_read());
                            }
                            let n = take.min(have);
                            let at = (pos - offset) as usize;
                            buf[at..at + n].copy_from_slice(&data[skip..skip + n]);
                            pos += n as u64;
                            continue;
                        }
                    }
                }
            };
            let block = &blocks[idx];
            let skip = (pos - block.base) as usize;
            if skip >= block.data.len() {
                return Err(short_read());
            }
            let n = ((end - pos) as usize).min(block.data.len() - skip);
            let at = (pos - offset) as usize;
            buf[at..at + n].copy_from_slice(&block.data[skip..skip + n]);
            pos += n as u64;
        }
        Ok(())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn io_block_size(&self) -> u32 {
        self.inner.io_block_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn mem_device_bounds() {
        let dev = MemDevice::new(patterned(1000));
        let mut buf = [0u8; 10];
        dev.read_at(&mut buf, 990).unwrap();
        assert_eq!(buf[0], (990 % 251) as u8);
        assert!(matches!(dev.read_at(&mut buf, 995), Err(Error::Io(_))));
    }

    #[test]
    fn cached_matches_uncached() {
        let data = patterned(8192 + 100);
        let plain = MemDevice::new(data.clone());
        let cached = CachedDevice::new(MemDevice::new(data), CacheConfig { items: 4, grace: 2 });

        // Sweep a mix of aligned, unaligned and repeated reads.
        for &(off, len) in &[
            (0u64, 512usize),
            (100, 700),
            (511, 2),
            (8192, 100),
            (8000, 292),
            (0, 512),
            (4096, 1024),
        ] {
            let mut a = vec![0u8; len];
            let mut b = vec![0u8; len];
            plain.read_at(&mut a, off).unwrap();
            cached.read_at(&mut b, off).unwrap();
            assert_eq!(a, b, "mismatch at offset {off} len {len}");
        }
    }

    #[test]
    fn cached_partial_tail() {
        // Device ends mid-block; the partial tail must still be served.
        let data = patterned(512 + 100);
        let cached = CachedDevice::new(MemDevice::new(data.clone()), CacheConfig::default());
        let mut buf = vec![0u8; 100];
        cached.read_at(&mut buf, 512).unwrap();
        assert_eq!(&buf[..], &data[512..]);
        let mut over = vec![0u8; 101];
        assert!(cached.read_at(&mut over, 512).is_err());
    }

    #[test]
    fn cache_eviction_keeps_view_consistent() {
        let data = patterned(512 * 64);
        let cached = CachedDevice::new(MemDevice::new(data.clone()), CacheConfig { items: 2, grace: 0 });
        for block in 0..64u64 {
            let mut buf = vec![0u8; 512];
            cached.read_at(&mut buf, block * 512).unwrap();
            assert_eq!(&buf[..], &data[(block * 512) as usize..][..512]);
        }
        // Re-read an evicted block.
        let mut buf = vec![0u8; 512];
        cached.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..], &data[..512]);
    }
}
