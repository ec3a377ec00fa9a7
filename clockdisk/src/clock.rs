//! 时钟置换算法（second chance）
//!
//! 槽位排成一圈，指针扫过时若引用位为 1 则清零并前进，
//! 遇到引用位为 0 的槽位就选它作为牺牲者。
//! 每扫过一个槽位都会清掉它的引用位，所以最多两圈必然停下。

use alloc::vec::Vec;

use block_dev::{Block, zeroed};

/// 缓存槽位
#[derive(Debug, Clone)]
pub struct Slot {
    /// 映射的`(ino, offset)`，`None`表示空槽
    pub key: Option<(u32, u32)>,
    /// 引用位
    pub referenced: bool,
    /// 是否为脏块，仅写回策略使用
    pub dirty: bool,
    pub data: Block,
}

impl Slot {
    const EMPTY: Self = Self {
        key: None,
        referenced: false,
        dirty: false,
        data: zeroed(),
    };

    #[inline]
    pub fn maps(&self, ino: u32) -> bool {
        self.key.is_some_and(|(i, _)| i == ino)
    }

    /// 使槽位失效，不写回
    pub fn invalidate(&mut self) {
        self.key = None;
        self.referenced = false;
        self.dirty = false;
    }
}

#[derive(Debug)]
pub struct Clock {
    slots: Vec<Slot>,
    hand: usize,
}

impl Clock {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        Self {
            slots: alloc::vec![Slot::EMPTY; capacity],
            hand: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 线性查找`(ino, offset)`所在的槽位
    pub fn find(&self, ino: u32, offset: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.key == Some((ino, offset)))
    }

    /// 转动指针选出牺牲槽位，指针停在被选中的槽位上。
    pub fn select_victim(&mut self) -> usize {
        let mut steps = 0;
        while self.slots[self.hand].referenced {
            self.slots[self.hand].referenced = false;
            self.hand = (self.hand + 1) % self.slots.len();
            steps += 1;
            debug_assert!(steps <= 2 * self.slots.len());
        }
        self.hand
    }

    /// 使`ino`中偏移不小于`from`的所有槽位失效，返回失效的个数
    pub fn invalidate(&mut self, ino: u32, from: u32) -> usize {
        let mut count = 0;
        for slot in self
            .slots
            .iter_mut()
            .filter(|slot| slot.key.is_some_and(|(i, off)| i == ino && off >= from))
        {
            slot.invalidate();
            count += 1;
        }
        count
    }

    /// 已映射的槽位个数
    pub fn resident(&self) -> usize {
        self.slots.iter().filter(|slot| slot.key.is_some()).count()
    }

    #[cfg(test)]
    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    #[inline]
    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index]
    }

    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }
}
