//! # 时钟缓存层
//!
//! 在下层块存储前面放一块固定容量的块缓存，用时钟算法近似 LRU 进行置换。
//! 写策略分为两种：
//!
//! - 写回：写操作只修改缓存并标记脏块，直到被置换或`sync`时才写到下层；
//! - 写穿：写操作同步地写到下层。
//!
//! 不论块是否驻留在缓存中，读到的总是最近一次写入的内容。

#![no_std]

extern crate alloc;

mod clock;
mod stats;

use alloc::string::ToString;
use alloc::sync::Arc;

use block_dev::{Block, BlockStore, Result, zeroed};
use spin::Mutex;

use self::clock::Clock;
pub use self::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    WriteBack,
    WriteThrough,
}

pub struct ClockDisk {
    /// 下层块存储
    below: Arc<dyn BlockStore>,
    policy: WritePolicy,
    inner: Mutex<Inner>,
}

struct Inner {
    clock: Clock,
    stats: Stats,
}

impl ClockDisk {
    /// 在`below`之上创建容量为`capacity`个块的缓存。
    ///
    /// # Panics
    ///
    /// `capacity`为 0 时。
    pub fn new(below: Arc<dyn BlockStore>, capacity: usize, policy: WritePolicy) -> Self {
        Self {
            below,
            policy,
            inner: Mutex::new(Inner {
                clock: Clock::new(capacity),
                stats: Stats::default(),
            }),
        }
    }

    pub fn write_back(below: Arc<dyn BlockStore>, capacity: usize) -> Self {
        Self::new(below, capacity, WritePolicy::WriteBack)
    }

    pub fn write_through(below: Arc<dyn BlockStore>, capacity: usize) -> Self {
        Self::new(below, capacity, WritePolicy::WriteThrough)
    }

    pub fn policy(&self) -> WritePolicy {
        self.policy
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().clock.capacity()
    }

    /// 当前驻留的块数，不会超过容量
    pub fn resident(&self) -> usize {
        self.inner.lock().clock.resident()
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().stats
    }

    pub fn dump_stats(&self) {
        for line in self.stats().to_string().lines() {
            log::info!("CLOCK: {line}");
        }
    }

    #[inline]
    fn is_write_back(&self) -> bool {
        self.policy == WritePolicy::WriteBack
    }
}

impl Inner {
    /// 为`(ino, offset)`腾出槽位并装入`data`，返回槽位下标。
    ///
    /// 被置换的脏块先写回下层；写回失败则放弃装入，原槽位保持不变。
    fn admit(
        &mut self,
        below: &dyn BlockStore,
        ino: u32,
        offset: u32,
        data: &Block,
    ) -> Result<usize> {
        let victim = self.clock.select_victim();
        let slot = self.clock.slot_mut(victim);

        if let Some((old_ino, old_offset)) = slot.key {
            if slot.dirty {
                log::debug!("flush victim ino={old_ino} offset={old_offset}");
                below.write(old_ino, old_offset, &slot.data)?;
            }
            log::debug!("evict ino={old_ino} offset={old_offset} slot={victim}");
        }

        slot.key = Some((ino, offset));
        slot.data = *data;
        slot.referenced = true;
        slot.dirty = false;

        Ok(victim)
    }
}

impl BlockStore for ClockDisk {
    fn get_ninodes(&self) -> Result<u32> {
        self.below.get_ninodes()
    }

    fn get_size(&self, ino: u32) -> Result<u32> {
        self.below.get_size(ino)
    }

    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32> {
        let mut inner = self.inner.lock();
        let old = self.below.set_size(ino, nblocks)?;
        let dropped = inner.clock.invalidate(ino, nblocks);
        log::debug!("set_size ino={ino} {old} -> {nblocks}, invalidated {dropped} slots");
        Ok(old)
    }

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()> {
        let mut inner = self.inner.lock();

        if let Some(index) = inner.clock.find(ino, offset) {
            inner.stats.read_hit += 1;
            let slot = inner.clock.slot_mut(index);
            slot.referenced = true;
            buf.copy_from_slice(&slot.data);
            log::trace!("read hit ino={ino} offset={offset}");
            return Ok(());
        }

        inner.stats.read_miss += 1;
        log::trace!("read miss ino={ino} offset={offset}");

        let mut data = zeroed();
        self.below.read(ino, offset, &mut data)?;
        inner.admit(&*self.below, ino, offset, &data)?;
        *buf = data;

        Ok(())
    }

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()> {
        let mut inner = self.inner.lock();

        let found = inner.clock.find(ino, offset);
        if found.is_some() {
            inner.stats.write_hit += 1;
        } else {
            inner.stats.write_miss += 1;
        }

        // 写穿：先写下层，失败时缓存保持与下层一致
        if !self.is_write_back() {
            self.below.write(ino, offset, buf)?;
        }

        let index = match found {
            Some(index) => index,
            None => inner.admit(&*self.below, ino, offset, buf)?,
        };
        let slot = inner.clock.slot_mut(index);
        slot.data = *buf;
        slot.referenced = true;
        slot.dirty = self.is_write_back();

        Ok(())
    }

    fn sync(&self, ino: u32) -> Result<()> {
        if self.is_write_back() {
            let mut inner = self.inner.lock();
            for slot in inner.clock.slots_mut().filter(|slot| slot.dirty && slot.maps(ino)) {
                if let Some((_, offset)) = slot.key {
                    self.below.write(ino, offset, &slot.data)?;
                    slot.dirty = false;
                }
            }
        }

        self.below.sync(ino)
    }
}

impl Drop for ClockDisk {
    fn drop(&mut self) {
        if !self.is_write_back() {
            return;
        }

        let inner = self.inner.get_mut();
        for slot in inner.clock.slots_mut().filter(|slot| slot.dirty) {
            if let Some((ino, offset)) = slot.key {
                match self.below.write(ino, offset, &slot.data) {
                    Ok(()) => slot.dirty = false,
                    Err(e) => log::warn!("lost dirty block ino={ino} offset={offset}: {e}"),
                }
            }
        }
    }
}
