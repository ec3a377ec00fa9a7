//! FAT 表的访问游标
//!
//! 读到的 FAT 块暂存在内存里，修改只落在暂存的副本上，
//! 直到[`FatTable::flush`]才写回后备 inode。
//! 中途出错时直接丢弃游标，磁盘上的 FAT 不受影响。

use alloc::collections::BTreeMap;

use block_dev::{BlockStore, Error, Result, zeroed};

use crate::layout::{EntryId, FatBlock, SuperBlock};

pub struct FatTable<'a> {
    below: &'a dyn BlockStore,
    below_ino: u32,
    /// FAT 表的起始块
    start: u32,
    capacity: u32,
    /// 块号（相对 FAT 表起点） -> (块内容, 是否被修改)
    loaded: BTreeMap<u32, (FatBlock, bool)>,
}

impl<'a> FatTable<'a> {
    pub fn new(below: &'a dyn BlockStore, below_ino: u32, sb: &SuperBlock) -> Self {
        Self {
            below,
            below_ino,
            start: sb.fat_start(),
            capacity: sb.fat_capacity(),
            loaded: BTreeMap::new(),
        }
    }

    fn validate(&self, id: EntryId) -> Result<EntryId> {
        if id.is_eoc() || u32::from(id) >= self.capacity {
            log::error!("dangling FAT link {id} (capacity {})", self.capacity);
            return Err(Error::Corrupted("dangling FAT link"));
        }
        Ok(id)
    }

    fn load(&mut self, id: EntryId) -> Result<(&mut (FatBlock, bool), usize)> {
        let (index, slot) = self.validate(id)?.position();
        if !self.loaded.contains_key(&index) {
            let mut block = zeroed();
            self.below
                .read(self.below_ino, self.start + index, &mut block)?;
            self.loaded.insert(index, (FatBlock(block), false));
        }

        let entry = self
            .loaded
            .get_mut(&index)
            .ok_or(Error::Corrupted("FAT block vanished"))?;
        Ok((entry, slot))
    }

    /// 表项`id`的后继
    pub fn next(&mut self, id: EntryId) -> Result<EntryId> {
        let ((block, _), slot) = self.load(id)?;
        Ok(block.next(slot))
    }

    pub fn set_next(&mut self, id: EntryId, next: EntryId) -> Result<()> {
        let ((block, modified), slot) = self.load(id)?;
        block.set_next(slot, next);
        *modified = true;
        Ok(())
    }

    /// 从`head`出发沿链表走`steps`步。
    ///
    /// 链表提前结束说明元数据已损坏。
    pub fn walk(&mut self, head: EntryId, steps: u32) -> Result<EntryId> {
        let mut id = self.validate(head)?;
        for _ in 0..steps {
            id = self.next(id)?;
            if id.is_eoc() {
                log::error!("chain from {head} ended before {steps} steps");
                return Err(Error::Corrupted("chain shorter than file"));
            }
        }
        Ok(id)
    }

    /// 按块号顺序写回被修改的 FAT 块
    pub fn flush(&mut self) -> Result<()> {
        for (index, (block, modified)) in self.loaded.iter_mut() {
            if *modified {
                self.below.write(self.below_ino, self.start + index, &block.0)?;
                *modified = false;
            }
        }
        Ok(())
    }
}
