//! 后备 inode 内的布局
//!
//! 超级块 | inode 表 | FAT 表 | 数据区
//!
//! 所有整数均以小端序存放。

use block_dev::{BLOCK_SIZE, Block, Error, Result, zeroed};
use derive_more::{From, Into};

const WORD: usize = core::mem::size_of::<u32>();

/// 一个块能容纳的 inode 记录数
pub const INODES_PER_BLOCK: u32 = (BLOCK_SIZE / InodeRecord::SIZE) as u32;

/// 一个块能容纳的 FAT 表项数
pub const ENTRIES_PER_BLOCK: u32 = (BLOCK_SIZE / WORD) as u32;

/// FAT 表项编号，同时也是数据区内的块编号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
#[repr(transparent)]
pub struct EntryId(u32);

impl EntryId {
    /// 链表结尾
    pub const EOC: Self = Self(u32::MAX);

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn is_eoc(self) -> bool {
        self.0 == u32::MAX
    }

    /// 所在的 FAT 块（相对 FAT 表起点）与块内下标
    #[inline]
    pub const fn position(self) -> (u32, usize) {
        (
            self.0 / ENTRIES_PER_BLOCK,
            (self.0 % ENTRIES_PER_BLOCK) as usize,
        )
    }
}

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_eoc() {
            f.write_str("EOC")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[inline]
fn get_word(block: &Block, index: usize) -> u32 {
    let mut raw = [0; WORD];
    raw.copy_from_slice(&block[index * WORD..(index + 1) * WORD]);
    u32::from_le_bytes(raw)
}

#[inline]
fn set_word(block: &mut Block, index: usize, value: u32) {
    block[index * WORD..(index + 1) * WORD].copy_from_slice(&value.to_le_bytes());
}

/// # 超级块
///
/// 位于后备 inode 的 0 号块。
/// `n_inode_blocks`为 0 表示尚未格式化。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub n_inode_blocks: u32,
    pub n_fat_blocks: u32,
    /// 空闲链表头
    pub free_head: EntryId,
}

impl SuperBlock {
    pub fn decode(block: &Block) -> Self {
        Self {
            n_inode_blocks: get_word(block, 0),
            n_fat_blocks: get_word(block, 1),
            free_head: EntryId(get_word(block, 2)),
        }
    }

    pub fn encode(&self) -> Block {
        let mut block = zeroed();
        set_word(&mut block, 0, self.n_inode_blocks);
        set_word(&mut block, 1, self.n_fat_blocks);
        set_word(&mut block, 2, self.free_head.into());
        block
    }

    #[inline]
    pub fn is_formatted(&self) -> bool {
        self.n_inode_blocks != 0
    }

    #[inline]
    pub fn ninodes(&self) -> u32 {
        self.n_inode_blocks * INODES_PER_BLOCK
    }

    /// FAT 表的起始块
    #[inline]
    pub fn fat_start(&self) -> u32 {
        1 + self.n_inode_blocks
    }

    /// 数据区的起始块
    #[inline]
    pub fn data_start(&self) -> u32 {
        self.fat_start() + self.n_fat_blocks
    }

    /// FAT 表能容纳的表项数（含末尾的填充项）
    #[inline]
    pub fn fat_capacity(&self) -> u32 {
        self.n_fat_blocks * ENTRIES_PER_BLOCK
    }

    /// inode 记录所在的块与块内下标
    #[inline]
    pub fn inode_position(ino: u32) -> (u32, usize) {
        (
            1 + ino / INODES_PER_BLOCK,
            (ino % INODES_PER_BLOCK) as usize,
        )
    }
}

/// inode 记录：簇链表头与块数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRecord {
    pub head: EntryId,
    pub nblocks: u32,
}

impl InodeRecord {
    const SIZE: usize = 2 * WORD;

    pub const EMPTY: Self = Self {
        head: EntryId::EOC,
        nblocks: 0,
    };
}

/// 装满 inode 记录的块
#[derive(Debug, Clone)]
pub struct InodeBlock(pub Block);

impl InodeBlock {
    /// 所有记录均为空文件的块
    pub fn empty() -> Self {
        let mut block = Self(zeroed());
        for slot in 0..INODES_PER_BLOCK as usize {
            block.set(slot, InodeRecord::EMPTY);
        }
        block
    }

    pub fn get(&self, slot: usize) -> InodeRecord {
        InodeRecord {
            head: EntryId(get_word(&self.0, 2 * slot)),
            nblocks: get_word(&self.0, 2 * slot + 1),
        }
    }

    pub fn set(&mut self, slot: usize, record: InodeRecord) {
        set_word(&mut self.0, 2 * slot, record.head.into());
        set_word(&mut self.0, 2 * slot + 1, record.nblocks);
    }
}

/// 装满 FAT 表项的块
#[derive(Debug, Clone)]
pub struct FatBlock(pub Block);

impl FatBlock {
    #[inline]
    pub fn next(&self, slot: usize) -> EntryId {
        EntryId(get_word(&self.0, slot))
    }

    #[inline]
    pub fn set_next(&mut self, slot: usize, next: EntryId) {
        set_word(&mut self.0, slot, next.into());
    }
}

/// 格式化时算出的各区大小
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub n_inode_blocks: u32,
    pub n_fat_blocks: u32,
    /// 实际可用的表项数，等于数据区的块数
    pub n_entries: u32,
}

impl Geometry {
    /// 在`total_blocks`个块上容纳至少`ninodes`个 inode。
    ///
    /// 每个 FAT 块连同它描述的`ENTRIES_PER_BLOCK`个数据块作为一组分配，
    /// 不满一组的余数也占一个 FAT 块。
    pub fn compute(total_blocks: u32, ninodes: u32) -> Result<Self> {
        if ninodes == 0 {
            return Err(Error::Unsupported("file system without inodes"));
        }

        let n_inode_blocks = ninodes.div_ceil(INODES_PER_BLOCK);
        let rest = total_blocks
            .checked_sub(1 + n_inode_blocks)
            .ok_or(Error::NoSpace)?;

        let group = 1 + ENTRIES_PER_BLOCK;
        let n_fat_blocks = rest.div_ceil(group);
        let n_entries = rest - n_fat_blocks;
        if n_entries == 0 {
            return Err(Error::NoSpace);
        }

        Ok(Self {
            n_inode_blocks,
            n_fat_blocks,
            n_entries,
        })
    }

    /// 对应的初始超级块，整个 FAT 表都在空闲链表上
    pub fn superblock(&self) -> SuperBlock {
        SuperBlock {
            n_inode_blocks: self.n_inode_blocks,
            n_fat_blocks: self.n_fat_blocks,
            free_head: EntryId(0),
        }
    }

    /// 第`index`个 FAT 块的初始内容：表项`i`指向`i + 1`，最后一项与填充项为结尾
    pub fn initial_fat_block(&self, index: u32) -> FatBlock {
        let mut block = FatBlock(zeroed());
        for slot in 0..ENTRIES_PER_BLOCK {
            let id = index * ENTRIES_PER_BLOCK + slot;
            let next = if id + 1 < self.n_entries {
                EntryId(id + 1)
            } else {
                EntryId::EOC
            };
            block.set_next(slot as usize, next);
        }
        block
    }
}
