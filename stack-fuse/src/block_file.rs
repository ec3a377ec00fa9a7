use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use block_dev::{BLOCK_SIZE, Block, BlockStore, Error, Result};
use send_wrapper::SendWrapper;

/// A host file seen as a block store with a single inode, `0`.
///
/// The inode's size is the file length in whole blocks.
#[derive(Debug)]
pub struct BlockFile {
    inner: SendWrapper<RefCell<File>>,
}

impl BlockFile {
    pub fn new(fd: File) -> Self {
        Self {
            inner: SendWrapper::new(RefCell::new(fd)),
        }
    }

    fn check_ino(ino: u32) -> Result<()> {
        if ino == 0 {
            Ok(())
        } else {
            Err(Error::InodeOutOfRange { ino, ninodes: 1 })
        }
    }

    fn nblocks(file: &File) -> Result<u32> {
        let len = file.metadata().map_err(io_error)?.len();
        Ok((len / BLOCK_SIZE as u64) as u32)
    }

    #[inline]
    fn position(offset: u32) -> SeekFrom {
        SeekFrom::Start(offset as u64 * BLOCK_SIZE as u64)
    }
}

fn io_error(e: io::Error) -> Error {
    log::error!("image I/O failed: {e}");
    Error::Io
}

impl BlockStore for BlockFile {
    fn get_ninodes(&self) -> Result<u32> {
        Ok(1)
    }

    fn get_size(&self, ino: u32) -> Result<u32> {
        Self::check_ino(ino)?;
        Self::nblocks(&self.inner.borrow())
    }

    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32> {
        Self::check_ino(ino)?;
        let file = self.inner.borrow_mut();
        let old = Self::nblocks(&file)?;
        file.set_len(nblocks as u64 * BLOCK_SIZE as u64)
            .map_err(io_error)?;
        Ok(old)
    }

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()> {
        Self::check_ino(ino)?;
        let mut file = self.inner.borrow_mut();
        let size = Self::nblocks(&file)?;
        if offset >= size {
            return Err(Error::OffsetOutOfRange { ino, offset, size });
        }
        file.seek(Self::position(offset)).map_err(io_error)?;
        file.read_exact(buf).map_err(io_error)
    }

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()> {
        Self::check_ino(ino)?;
        let mut file = self.inner.borrow_mut();
        file.seek(Self::position(offset)).map_err(io_error)?;
        file.write_all(buf).map_err(io_error)
    }

    fn sync(&self, ino: u32) -> Result<()> {
        Self::check_ino(ino)?;
        self.inner.borrow_mut().sync_data().map_err(io_error)
    }
}
