//! Flat firmware image streaming.
//!
//! The image is a raw binary with no header. It is read sequentially in
//! [`CHUNK_SIZE`] pieces, each destined for `load address + offset` in the
//! controller's memory.

use {
    crate::error::{Error, Result},
    log::trace,
    std::{
        fs::File,
        io::Read,
        path::{Path, PathBuf},
    },
};

/// Largest chunk sent in one write-memory command.
pub const CHUNK_SIZE: usize = 4096;

/// Controller address the image is loaded at.
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x8000_0000;

/// One slice of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareChunk {
    /// Offset of the first byte within the image.
    pub offset: u64,
    /// Controller address the chunk is written to.
    pub address: u32,
    /// Chunk contents, at most [`CHUNK_SIZE`] bytes.
    pub data: Vec<u8>,
}

impl FirmwareChunk {
    /// Chunk length in bytes.
    pub fn len(&self) -> usize {
        self.data
            .len()
    }

    /// Whether the chunk carries no data.
    pub fn is_empty(&self) -> bool {
        self.data
            .is_empty()
    }
}

/// An open firmware image being transferred.
#[derive(Debug)]
pub struct FirmwareImage<R = File> {
    reader: R,
    path: PathBuf,
    size: u64,
    offset: u64,
    base: u32,
}

impl FirmwareImage<File> {
    /// Open an image file and record its size.
    pub fn open<P: AsRef<Path>>(path: P, base: u32) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |source| Error::FileUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unavailable)?;
        let size = file
            .metadata()
            .map_err(unavailable)?
            .len();

        Self::with_path(file, size, base, path.to_path_buf())
    }
}

impl<R: Read> FirmwareImage<R> {
    /// Stream an image from any reader that promises `declared_size` bytes.
    pub fn from_reader(reader: R, declared_size: u64, base: u32) -> Result<Self> {
        Self::with_path(reader, declared_size, base, PathBuf::from("<stream>"))
    }

    fn with_path(reader: R, size: u64, base: u32, path: PathBuf) -> Result<Self> {
        if size == 0 {
            return Err(Error::EmptyImage(path));
        }
        Ok(Self {
            reader,
            path,
            size,
            offset: 0,
            base,
        })
    }

    /// Source path, or `<stream>` for reader-backed images.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Declared image size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes handed out so far.
    pub fn transferred(&self) -> u64 {
        self.offset
    }

    /// Load address of the first byte.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Read the next chunk, or `None` once the reader is exhausted.
    ///
    /// Reading past the declared size is an error straight away, so
    /// [`transferred`](Self::transferred) never exceeds [`size`](Self::size).
    pub fn next_chunk(&mut self) -> Result<Option<FirmwareChunk>> {
        let mut data = Vec::with_capacity(CHUNK_SIZE);
        self.reader
            .by_ref()
            .take(CHUNK_SIZE as u64)
            .read_to_end(&mut data)?;

        if data.is_empty() {
            return Ok(None);
        }

        let offset = self.offset;
        let end = offset + data.len() as u64;
        if end > self.size {
            return Err(Error::TransferSizeMismatch {
                transferred: end,
                expected: self.size,
            });
        }

        let address = u32::try_from(offset)
            .ok()
            .and_then(|off| {
                self.base
                    .checked_add(off)
            })
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "offset {offset:#x} from {:#010x} exceeds the address space",
                    self.base
                ))
            })?;

        trace!(
            "Chunk at offset {offset}: {} bytes -> {address:#010x}",
            data.len()
        );
        self.offset = end;

        Ok(Some(FirmwareChunk {
            offset,
            address,
            data,
        }))
    }

    /// Check that everything declared was transferred.
    pub fn verify_complete(&self) -> Result<()> {
        if self.offset == self.size {
            Ok(())
        } else {
            Err(Error::TransferSizeMismatch {
                transferred: self.offset,
                expected: self.size,
            })
        }
    }
}
