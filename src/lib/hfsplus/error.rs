use thiserror::Error;

/// Everything this library can fail with.
#[derive(Debug, Error)]
pub enum Error {
    /// Device read failure or short read.
    #[error("device I/O error: {0}")]
    Io(std::io::Error),
    /// The signature at offset 1024 is not an HFS+ volume header.
    #[error("not an HFS+ volume")]
    NotHfs,
    /// A structural invariant of the on-disk format is violated.
    #[error("corrupt volume structure: {0}")]
    Corrupt(&'static str),
    /// Catalog or attribute key absent.
    #[error("record not found")]
    NotFound,
    /// An intermediate path element is not a folder.
    #[error("not a directory")]
    NotADirectory,
    /// Unpaired surrogate, over-long name, or otherwise undecodable input.
    #[error("invalid name")]
    InvalidName,
    /// Any mutating request; this driver never writes.
    #[error("volume is read-only")]
    ReadOnly,
    /// Allocation failure reported by the underlying system.
    #[error("out of memory")]
    NoMemory,
}

/// A record decode that runs off the end of its slice means the record
/// itself lied about its size, so `UnexpectedEof` is structural
/// corruption, not an I/O failure. The device layer builds its `Io`
/// values explicitly and never routes short reads through here.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::Corrupt("truncated on-disk record"),
            std::io::ErrorKind::OutOfMemory => Error::NoMemory,
            _ => Error::Io(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
