//! # FAT 分配层
//!
//! 把下层的一个后备 inode 切分成许多可以各自增长的文件。
//! 每个文件是 FAT 表上的一条单向链表，空闲表项也串成一条链表，
//! 两者共用表项中的`next`字段。
//!
//! 本层不缓存任何元数据，每次操作都从后备 inode 读取超级块与 inode 记录。

#![no_std]

extern crate alloc;

pub mod layout;
mod table;
mod usage;

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::{Block, BlockStore, Error, Result, zeroed};

use self::layout::{EntryId, Geometry, InodeBlock, InodeRecord, SuperBlock};
use self::table::FatTable;
pub use self::usage::Usage;

#[derive(Clone)]
pub struct FatDisk {
    below: Arc<dyn BlockStore>,
    /// 下层用作后备的 inode
    below_ino: u32,
}

/// 一次操作开始时读到的超级块与目标 inode 记录
struct Snapshot {
    sb: SuperBlock,
    inode_blockno: u32,
    inode_block: InodeBlock,
    slot: usize,
    inode: InodeRecord,
}

impl FatDisk {
    /// 打开`below`的`below_ino`上的 FAT 文件系统
    pub fn new(below: Arc<dyn BlockStore>, below_ino: u32) -> Self {
        Self { below, below_ino }
    }

    /// 在`below`的`below_ino`上创建容纳`ninodes`个 inode 的 FAT 文件系统。
    ///
    /// 后备 inode 的大小决定了文件系统的大小。
    /// 已经格式化过的后备 inode 保持不变。
    pub fn format(below: &dyn BlockStore, below_ino: u32, ninodes: u32) -> Result<()> {
        let total_blocks = below.get_size(below_ino)?;
        if total_blocks == 0 {
            return Err(Error::NoSpace);
        }

        let mut block = zeroed();
        below.read(below_ino, 0, &mut block)?;
        if SuperBlock::decode(&block).is_formatted() {
            log::info!("inode {below_ino} already holds a FAT file system");
            return Ok(());
        }

        let geo = Geometry::compute(total_blocks, ninodes)?;
        let sb = geo.superblock();

        let inode_block = InodeBlock::empty();
        for blockno in 1..sb.fat_start() {
            below.write(below_ino, blockno, &inode_block.0)?;
        }
        for index in 0..geo.n_fat_blocks {
            let fat = geo.initial_fat_block(index);
            below.write(below_ino, sb.fat_start() + index, &fat.0)?;
        }
        // 超级块最后写，写成功才算格式化完成
        below.write(below_ino, 0, &sb.encode())?;

        log::info!(
            "formatted inode {below_ino}: {total_blocks} blocks, {} inodes, {} FAT blocks, {} data blocks",
            sb.ninodes(),
            geo.n_fat_blocks,
            geo.n_entries
        );
        Ok(())
    }

    fn superblock(&self) -> Result<SuperBlock> {
        let mut block = zeroed();
        self.below.read(self.below_ino, 0, &mut block)?;
        let sb = SuperBlock::decode(&block);
        if sb.is_formatted() {
            Ok(sb)
        } else {
            Err(Error::Unformatted)
        }
    }

    fn snapshot(&self, ino: u32) -> Result<Snapshot> {
        let sb = self.superblock()?;
        if ino >= sb.ninodes() {
            return Err(Error::InodeOutOfRange {
                ino,
                ninodes: sb.ninodes(),
            });
        }

        let (inode_blockno, slot) = SuperBlock::inode_position(ino);
        let mut block = zeroed();
        self.below.read(self.below_ino, inode_blockno, &mut block)?;
        let inode_block = InodeBlock(block);
        let inode = inode_block.get(slot);

        Ok(Snapshot {
            sb,
            inode_blockno,
            inode_block,
            slot,
            inode,
        })
    }

    fn write_superblock(&self, sb: &SuperBlock) -> Result<()> {
        self.below.write(self.below_ino, 0, &sb.encode())
    }

    fn write_inode(&self, snapshot: &mut Snapshot) -> Result<()> {
        snapshot.inode_block.set(snapshot.slot, snapshot.inode);
        self.below
            .write(self.below_ino, snapshot.inode_blockno, &snapshot.inode_block.0)
    }

    #[inline]
    fn data_blockno(sb: &SuperBlock, id: EntryId) -> u32 {
        sb.data_start() + u32::from(id)
    }

    /// 从空闲链表头部摘下表项，接到文件末尾，使文件长到`nblocks`个块。
    ///
    /// 返回摘下的表项。落盘顺序为超级块、FAT 表、inode 记录，
    /// 中途失败时摘下的表项不属于任何链表，但不会被两条链表共用。
    fn extend(&self, snapshot: &mut Snapshot, nblocks: u32) -> Result<Vec<EntryId>> {
        let below = &*self.below;
        let mut fat = FatTable::new(below, self.below_ino, &snapshot.sb);
        let need = nblocks - snapshot.inode.nblocks;

        let mut run = Vec::new();
        let mut cursor = snapshot.sb.free_head;
        for _ in 0..need {
            if cursor.is_eoc() {
                log::debug!("free list exhausted, wanted {need} entries");
                return Err(Error::NoSpace);
            }
            run.push(cursor);
            cursor = fat.next(cursor)?;
        }
        let (Some(&first), Some(&last)) = (run.first(), run.last()) else {
            return Ok(run);
        };

        let tail = match snapshot.inode.nblocks {
            0 => None,
            n => Some(fat.walk(snapshot.inode.head, n - 1)?),
        };

        snapshot.sb.free_head = cursor;
        self.write_superblock(&snapshot.sb)?;

        // 先截断摘下的一段，再接到文件末尾
        fat.set_next(last, EntryId::EOC)?;
        fat.flush()?;
        match tail {
            Some(tail) => {
                fat.set_next(tail, first)?;
                fat.flush()?;
            }
            None => snapshot.inode.head = first,
        }
        log::debug!(
            "extend chain {} by {need} entries ({first}..={last}), free head now {cursor}",
            snapshot.inode.head
        );

        snapshot.inode.nblocks = nblocks;
        self.write_inode(snapshot)?;
        Ok(run)
    }

    /// 把整条链表归还给空闲链表。
    ///
    /// 落盘顺序为 inode 记录、FAT 表、超级块，中途失败只会泄漏整条链表。
    fn free_chain(&self, snapshot: &mut Snapshot) -> Result<()> {
        let below = &*self.below;
        let mut fat = FatTable::new(below, self.below_ino, &snapshot.sb);

        let mut free = snapshot.sb.free_head;
        let mut cursor = snapshot.inode.head;
        for _ in 0..snapshot.inode.nblocks {
            if cursor.is_eoc() {
                return Err(Error::Corrupted("chain shorter than file"));
            }
            let next = fat.next(cursor)?;
            fat.set_next(cursor, free)?;
            free = cursor;
            cursor = next;
        }
        if !cursor.is_eoc() {
            log::error!("chain of {} blocks continues at {cursor}", snapshot.inode.nblocks);
            return Err(Error::Corrupted("chain longer than file"));
        }

        log::debug!(
            "free chain {} of {} blocks",
            snapshot.inode.head,
            snapshot.inode.nblocks
        );
        snapshot.inode = InodeRecord::EMPTY;
        self.write_inode(snapshot)?;
        fat.flush()?;
        snapshot.sb.free_head = free;
        self.write_superblock(&snapshot.sb)
    }

    /// 统计空闲表项与已分配表项，同时检查链表的一致性
    pub fn usage(&self) -> Result<Usage> {
        let sb = self.superblock()?;
        let total_blocks = self.below.get_size(self.below_ino)?;
        usage::scan(&*self.below, self.below_ino, &sb, total_blocks)
    }
}

impl BlockStore for FatDisk {
    fn get_ninodes(&self) -> Result<u32> {
        Ok(self.superblock()?.ninodes())
    }

    fn get_size(&self, ino: u32) -> Result<u32> {
        Ok(self.snapshot(ino)?.inode.nblocks)
    }

    /// 只支持保持原大小与截断为 0
    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32> {
        let mut snapshot = self.snapshot(ino)?;
        let old = snapshot.inode.nblocks;

        if nblocks == old {
            return Ok(old);
        }
        if nblocks > old {
            return Err(Error::Unsupported("growing a file without writing it"));
        }
        if nblocks > 0 {
            return Err(Error::Unsupported("shrinking a file to a non-zero size"));
        }

        self.free_chain(&mut snapshot)?;
        Ok(old)
    }

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<()> {
        let snapshot = self.snapshot(ino)?;
        if offset >= snapshot.inode.nblocks {
            return Err(Error::OffsetOutOfRange {
                ino,
                offset,
                size: snapshot.inode.nblocks,
            });
        }

        let id = FatTable::new(&*self.below, self.below_ino, &snapshot.sb)
            .walk(snapshot.inode.head, offset)?;
        self.below
            .read(self.below_ino, Self::data_blockno(&snapshot.sb, id), buf)
    }

    /// 写到文件末尾之后时先扩展文件，中间跳过的块读出来全为 0
    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<()> {
        let mut snapshot = self.snapshot(ino)?;

        let id = if offset < snapshot.inode.nblocks {
            FatTable::new(&*self.below, self.below_ino, &snapshot.sb)
                .walk(snapshot.inode.head, offset)?
        } else {
            let nblocks = offset.checked_add(1).ok_or(Error::NoSpace)?;
            let run = self.extend(&mut snapshot, nblocks)?;
            let (&last, gap) = run
                .split_last()
                .ok_or(Error::Corrupted("empty allocation"))?;
            let zero = zeroed();
            for &id in gap {
                self.below
                    .write(self.below_ino, Self::data_blockno(&snapshot.sb, id), &zero)?;
            }
            last
        };

        self.below
            .write(self.below_ino, Self::data_blockno(&snapshot.sb, id), buf)
    }

    fn sync(&self, _ino: u32) -> Result<()> {
        self.below.sync(self.below_ino)
    }
}
