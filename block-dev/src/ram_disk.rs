//! 内存中的块存储，充当整个栈最底层的“裸设备”。
//!
//! 带有简单的故障注入：[`RamDisk::kill`]之后所有调用都返回[`Error::Io`]，
//! [`RamDisk::calls`]记录被调用的次数（包括失败的调用）。

use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::{Block, BlockStore, Error, Result, zeroed};

#[derive(Debug)]
pub struct RamDisk {
    inodes: Mutex<Vec<Vec<Block>>>,
    dead: AtomicBool,
    calls: AtomicUsize,
}

impl RamDisk {
    /// 创建拥有`ninodes`个空 inode 的内存盘
    pub fn new(ninodes: u32) -> Self {
        Self {
            inodes: Mutex::new(vec![Vec::new(); ninodes as usize]),
            dead: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// 让之后的每次调用都失败
    pub fn kill(&self) {
        log::debug!("ramdisk killed");
        self.dead.store(true, Ordering::Relaxed);
    }

    pub fn revive(&self) {
        self.dead.store(false, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// 记录一次调用，并检查设备是否还活着
    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.dead.load(Ordering::Relaxed) {
            Err(Error::Io)
        } else {
            Ok(())
        }
    }

    fn with_inode<V>(&self, ino: u32, f: impl FnOnce(&mut Vec<Block>) -> V) -> Result<V> {
        let mut inodes = self.inodes.lock();
        let ninodes = inodes.len() as u32;
        inodes
            .get_mut(ino as usize)
            .map(f)
            .ok_or(Error::InodeOutOfRange { ino, ninodes })
    }
}

impl BlockStore for RamDisk {
    fn get_ninodes(&self) -> Result<u32> {
        self.enter()?;
        Ok(self.inodes.lock().len() as u32)
    }

    fn get_size(&self, ino: u32) -> Result<u32> {
        self.enter()?;
        self.with_inode(ino, |blocks| blocks.len() as u32)
    }

    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32> {
        self.enter()?;
        self.with_inode(ino, |blocks| {
            let old = blocks.len() as u32;
            blocks.resize(nblocks as usize, zeroed());
            old
        })
    }

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()> {
        self.enter()?;
        self.with_inode(ino, |blocks| match blocks.get(offset as usize) {
            Some(block) => {
                buf.copy_from_slice(block);
                Ok(())
            }
            None => Err(Error::OffsetOutOfRange {
                ino,
                offset,
                size: blocks.len() as u32,
            }),
        })?
    }

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()> {
        self.enter()?;
        self.with_inode(ino, |blocks| {
            let offset = offset as usize;
            if offset >= blocks.len() {
                blocks.resize(offset + 1, zeroed());
            }
            blocks[offset].copy_from_slice(buf);
        })
    }

    fn sync(&self, ino: u32) -> Result<()> {
        self.enter()?;
        self.with_inode(ino, |_| ())
    }
}
