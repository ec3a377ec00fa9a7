//! # RAID1 镜像层
//!
//! 把每个操作复制到所有成员上。成员一旦在写、同步或查询大小时失败，
//! 就被标记为损坏，此后不再访问；读失败只换下一个成员，不标记损坏。
//!
//! 只要还有一个成员成功，操作就算成功。部分成员失败后各成员的内容
//! 可能不再一致，本层不负责重新同步。

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use block_dev::{Block, BlockStore, Error, Result};

pub struct Raid1Disk {
    members: Vec<Arc<dyn BlockStore>>,
    /// 与`members`一一对应，只会由假变真
    broken: Vec<AtomicBool>,
}

impl Raid1Disk {
    /// # Panics
    ///
    /// `members`为空时。
    pub fn new(members: Vec<Arc<dyn BlockStore>>) -> Self {
        assert!(!members.is_empty(), "RAID1 needs at least one member");
        let broken = members.iter().map(|_| AtomicBool::new(false)).collect();
        Self { members, broken }
    }

    /// 各成员是否已损坏
    pub fn broken(&self) -> Vec<bool> {
        self.broken
            .iter()
            .map(|flag| flag.load(Ordering::Relaxed))
            .collect()
    }

    pub fn live_members(&self) -> usize {
        self.broken
            .iter()
            .filter(|flag| !flag.load(Ordering::Relaxed))
            .count()
    }

    /// 尚未损坏的成员
    fn live(&self) -> impl Iterator<Item = (usize, &Arc<dyn BlockStore>)> {
        self.members
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.broken[*i].load(Ordering::Relaxed))
    }

    fn mark_broken(&self, index: usize, err: &Error) {
        if !self.broken[index].swap(true, Ordering::Relaxed) {
            log::warn!("mirror member {index} marked broken: {err}");
        }
    }

    /// 依次询问存活成员，失败的标记为损坏，返回第一个成功的结果
    fn probe<T>(&self, f: impl Fn(&dyn BlockStore) -> Result<T>) -> Result<T> {
        let mut last = None;
        for (i, member) in self.live() {
            match f(&**member) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    self.mark_broken(i, &e);
                    last = Some(e);
                }
            }
        }
        Err(exhausted(last))
    }

    /// 在所有存活成员上执行，失败的标记为损坏，返回最后一个成功的结果
    fn fan_out<T>(&self, f: impl Fn(&dyn BlockStore) -> Result<T>) -> Result<T> {
        let mut result = None;
        let mut last = None;
        for (i, member) in self.live() {
            match f(&**member) {
                Ok(value) => result = Some(value),
                Err(e) => {
                    self.mark_broken(i, &e);
                    last = Some(e);
                }
            }
        }
        result.ok_or_else(|| exhausted(last))
    }
}

/// 没有成员成功时的错误：有成员失败就带上最后一个错误
fn exhausted(last: Option<Error>) -> Error {
    match last {
        Some(e) => Error::AllMembersFailed(Box::new(e)),
        None => Error::NoLiveMembers,
    }
}

impl BlockStore for Raid1Disk {
    fn get_ninodes(&self) -> Result<u32> {
        self.probe(|member| member.get_ninodes())
    }

    fn get_size(&self, ino: u32) -> Result<u32> {
        self.probe(|member| member.get_size(ino))
    }

    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32> {
        self.fan_out(|member| member.set_size(ino, nblocks))
    }

    /// 读失败不代表成员损坏
    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()> {
        let mut last = None;
        for (i, member) in self.live() {
            match member.read(ino, offset, buf) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::debug!("read ino={ino} offset={offset} failed on member {i}: {e}");
                    last = Some(e);
                }
            }
        }
        Err(exhausted(last))
    }

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()> {
        self.fan_out(|member| member.write(ino, offset, buf))
    }

    fn sync(&self, ino: u32) -> Result<()> {
        self.fan_out(|member| member.sync(ino))
    }
}
