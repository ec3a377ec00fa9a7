//! 空间统计与一致性检查
//!
//! 每个表项要么在某个文件的链表上，要么在空闲链表上，二者必居其一。

use alloc::vec;

use block_dev::{BlockStore, Error, Result, zeroed};

use crate::layout::{EntryId, INODES_PER_BLOCK, InodeBlock, SuperBlock};
use crate::table::FatTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Usage {
    /// 可用表项总数，即数据区块数
    pub total: u32,
    pub free: u32,
    pub used: u32,
}

pub(crate) fn scan(
    below: &dyn BlockStore,
    below_ino: u32,
    sb: &SuperBlock,
    total_blocks: u32,
) -> Result<Usage> {
    let total = total_blocks
        .checked_sub(sb.data_start())
        .ok_or(Error::Corrupted("backing inode smaller than metadata"))?;

    let mut fat = FatTable::new(below, below_ino, sb);
    let mut owned = vec![false; total as usize];

    let free = mark_chain(&mut fat, &mut owned, sb.free_head)?;

    let mut used = 0;
    for blockno in 1..sb.fat_start() {
        let mut block = zeroed();
        below.read(below_ino, blockno, &mut block)?;
        let inodes = InodeBlock(block);

        for slot in 0..INODES_PER_BLOCK as usize {
            let record = inodes.get(slot);
            let len = mark_chain(&mut fat, &mut owned, record.head)?;
            if len != record.nblocks {
                log::error!(
                    "inode {} claims {} blocks but its chain has {len}",
                    (blockno - 1) * INODES_PER_BLOCK + slot as u32,
                    record.nblocks
                );
                return Err(Error::Corrupted("chain length mismatch"));
            }
            used += len;
        }
    }

    if free + used != total {
        log::error!("{} of {total} entries are on no chain", total - free - used);
        return Err(Error::Corrupted("entry owned by no chain"));
    }

    Ok(Usage { total, free, used })
}

/// 沿链表标记表项，返回链表长度；重复标记即说明有环或交叉
fn mark_chain(fat: &mut FatTable, owned: &mut [bool], head: EntryId) -> Result<u32> {
    let mut len = 0;
    let mut cursor = head;
    while !cursor.is_eoc() {
        let seen = owned
            .get_mut(u32::from(cursor) as usize)
            .ok_or(Error::Corrupted("entry beyond data area"))?;
        if *seen {
            log::error!("FAT entry {cursor} is claimed twice");
            return Err(Error::Corrupted("entry claimed twice"));
        }
        *seen = true;
        len += 1;
        cursor = fat.next(cursor)?;
    }
    Ok(len)
}
