//! # 块存储接口层
//!
//! 块存储以**块**为单位读写数据，每个块存储管理若干个 inode，
//! 每个 inode 是一串可增长的定长块。
//! [`BlockStore`] 就是对这种能力的抽象：缓存、FAT、RAID1 等层
//! 既实现它，也通过它访问下一层，因此可以任意堆叠。

#![no_std]

extern crate alloc;

mod error;
mod ram_disk;

use alloc::sync::Arc;
use core::any::Any;

pub use self::{
    error::{Error, Result},
    ram_disk::RamDisk,
};

pub const BLOCK_SIZE: usize = 512;

/// 读写的最小单位，不存在读写半个块的情况
pub type Block = [u8; BLOCK_SIZE];

/// 块存储特质
///
/// 所有方法都以`&self`调用，各层自行管理内部可变状态。
/// inode 编号、块偏移与块数量均为`u32`。
pub trait BlockStore: Send + Sync + Any {
    /// inode 的容量
    fn get_ninodes(&self) -> Result<u32>;

    /// `ino`当前占有的块数
    fn get_size(&self, ino: u32) -> Result<u32>;

    /// 设置`ino`的块数，返回原先的块数
    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32>;

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()>;

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()>;

    /// 把`ino`上尚未落盘的修改推向下层
    fn sync(&self, ino: u32) -> Result<()>;

    /// 释放本层持有的状态。
    ///
    /// 下层只在没有其它持有者时才会随之释放。
    fn release(self: Arc<Self>) {
        drop(self);
    }
}

#[inline]
pub const fn zeroed() -> Block {
    [0; BLOCK_SIZE]
}
