use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use block_dev::{BLOCK_SIZE, Block, BlockStore, Error, RamDisk};
use fatdisk::layout::{EntryId, SuperBlock};
use fatdisk::{FatDisk, Usage};
use proptest::prelude::*;

fn block(byte: u8) -> Block {
    [byte; BLOCK_SIZE]
}

/// 每个块的内容由`(ino, offset)`决定
fn pattern(ino: u32, offset: u32) -> Block {
    let mut buf = [0; BLOCK_SIZE];
    buf[..4].copy_from_slice(&ino.to_le_bytes());
    buf[4..8].copy_from_slice(&offset.to_le_bytes());
    buf[8..].fill((ino * 31 + offset) as u8);
    buf
}

fn read(store: &dyn BlockStore, ino: u32, offset: u32) -> Block {
    let mut buf = [0; BLOCK_SIZE];
    store.read(ino, offset, &mut buf).unwrap();
    buf
}

/// 在内存盘的 0 号 inode 上建立`nblocks`个块的文件系统
fn fat_on_ramdisk(nblocks: u32, ninodes: u32) -> (Arc<RamDisk>, FatDisk) {
    let disk = Arc::new(RamDisk::new(1));
    disk.set_size(0, nblocks).unwrap();
    FatDisk::format(&*disk, 0, ninodes).unwrap();
    let fat = FatDisk::new(disk.clone(), 0);
    (disk, fat)
}

/// 还能成功写`budget`次，之后所有写操作都失败
struct FlakyDisk {
    inner: RamDisk,
    budget: AtomicUsize,
}

impl FlakyDisk {
    fn new() -> Self {
        Self {
            inner: RamDisk::new(1),
            budget: AtomicUsize::new(usize::MAX),
        }
    }

    fn fail_after(&self, writes: usize) {
        self.budget.store(writes, Ordering::Relaxed);
    }

    fn heal(&self) {
        self.budget.store(usize::MAX, Ordering::Relaxed);
    }
}

impl BlockStore for FlakyDisk {
    fn get_ninodes(&self) -> Result<u32, Error> {
        self.inner.get_ninodes()
    }

    fn get_size(&self, ino: u32) -> Result<u32, Error> {
        self.inner.get_size(ino)
    }

    fn set_size(&self, ino: u32, nblocks: u32) -> Result<u32, Error> {
        self.inner.set_size(ino, nblocks)
    }

    fn read(&self, ino: u32, offset: u32, buf: &mut Block) -> Result<(), Error> {
        self.inner.read(ino, offset, buf)
    }

    fn write(&self, ino: u32, offset: u32, buf: &Block) -> Result<(), Error> {
        match self.budget.load(Ordering::Relaxed) {
            0 => return Err(Error::Io),
            usize::MAX => {}
            _ => {
                self.budget.fetch_sub(1, Ordering::Relaxed);
            }
        }
        self.inner.write(ino, offset, buf)
    }

    fn sync(&self, ino: u32) -> Result<(), Error> {
        self.inner.sync(ino)
    }
}

fn fat_on_flaky(nblocks: u32, ninodes: u32) -> (Arc<FlakyDisk>, FatDisk) {
    let disk = Arc::new(FlakyDisk::new());
    disk.set_size(0, nblocks).unwrap();
    FatDisk::format(&*disk, 0, ninodes).unwrap();
    let fat = FatDisk::new(disk.clone(), 0);
    (disk, fat)
}

/// 逐块追加到`ino`直到空间耗尽，返回追加的块数
fn fill(fat: &FatDisk, ino: u32) -> u32 {
    let start = fat.get_size(ino).unwrap();
    let mut offset = start;
    loop {
        match fat.write(ino, offset, &pattern(ino, offset)) {
            Ok(()) => offset += 1,
            Err(Error::NoSpace) => return offset - start,
            Err(e) => panic!("write {offset} of inode {ino}: {e}"),
        }
    }
}

#[test]
fn fresh_file_system() {
    let (_disk, fat) = fat_on_ramdisk(64, 100);

    assert_eq!(128, fat.get_ninodes().unwrap());
    assert_eq!(0, fat.get_size(5).unwrap());
    assert_eq!(
        Usage {
            total: 60,
            free: 60,
            used: 0
        },
        fat.usage().unwrap()
    );
}

#[test]
fn superblock_on_disk() {
    let (disk, _fat) = fat_on_ramdisk(300, 64);
    let sb = SuperBlock::decode(&read(&*disk, 0, 0));
    assert_eq!(1, sb.n_inode_blocks);
    assert_eq!(3, sb.n_fat_blocks);
    assert_eq!(0, u32::from(sb.free_head));
}

#[test]
fn format_is_idempotent() {
    let (disk, fat) = fat_on_ramdisk(64, 64);
    fat.write(2, 0, &block(9)).unwrap();

    FatDisk::format(&*disk, 0, 64).unwrap();
    assert_eq!(1, fat.get_size(2).unwrap());
    assert_eq!(block(9), read(&fat, 2, 0));
}

#[test]
fn format_needs_space() {
    let disk = RamDisk::new(1);
    assert_eq!(Err(Error::NoSpace), FatDisk::format(&disk, 0, 1));
    disk.set_size(0, 3).unwrap();
    assert_eq!(Err(Error::NoSpace), FatDisk::format(&disk, 0, 1));
}

#[test]
fn unformatted_store() {
    let disk = Arc::new(RamDisk::new(1));
    disk.set_size(0, 16).unwrap();
    let fat = FatDisk::new(disk, 0);
    assert_eq!(Err(Error::Unformatted), fat.get_ninodes());
    assert_eq!(Err(Error::Unformatted), fat.get_size(0));
}

#[test]
fn sequential_growth_round_trip() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    let k = 20;

    for offset in 0..k {
        fat.write(7, offset, &pattern(7, offset)).unwrap();
    }
    assert_eq!(k, fat.get_size(7).unwrap());
    for offset in (0..k).rev() {
        assert_eq!(pattern(7, offset), read(&fat, 7, offset));
    }

    let usage = fat.usage().unwrap();
    assert_eq!(k, usage.used);
    assert_eq!(usage.total, usage.free + usage.used);
}

#[test]
fn chains_span_fat_blocks() {
    let (_disk, fat) = fat_on_ramdisk(400, 64);
    for offset in 0..200 {
        fat.write(0, offset, &pattern(0, offset)).unwrap();
    }
    for offset in [0, 127, 128, 129, 199] {
        assert_eq!(pattern(0, offset), read(&fat, 0, offset));
    }
    assert_eq!(200, fat.usage().unwrap().used);
}

#[test]
fn overwrite_keeps_size() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    fat.write(1, 0, &block(1)).unwrap();
    fat.write(1, 1, &block(2)).unwrap();
    fat.write(1, 0, &block(3)).unwrap();

    assert_eq!(2, fat.get_size(1).unwrap());
    assert_eq!(block(3), read(&fat, 1, 0));
    assert_eq!(block(2), read(&fat, 1, 1));
    assert_eq!(2, fat.usage().unwrap().used);
}

#[test]
fn sparse_write_allocates_gap() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    fat.write(0, 3, &block(4)).unwrap();

    assert_eq!(4, fat.get_size(0).unwrap());
    assert_eq!(block(4), read(&fat, 0, 3));
    for offset in 0..3 {
        assert_eq!(block(0), read(&fat, 0, offset));
    }
    assert_eq!(4, fat.usage().unwrap().used);
}

#[test]
fn gap_does_not_expose_freed_data() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    for offset in 0..4 {
        fat.write(0, offset, &block(0xEE)).unwrap();
    }
    fat.set_size(0, 0).unwrap();

    // 1 号文件拿到的正是刚释放的表项
    fat.write(1, 3, &block(1)).unwrap();
    for offset in 0..3 {
        assert_eq!(block(0), read(&fat, 1, offset));
    }
    assert_eq!(block(1), read(&fat, 1, 3));
}

#[test]
fn out_of_range() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    fat.write(0, 0, &block(1)).unwrap();

    assert_eq!(
        Err(Error::OffsetOutOfRange {
            ino: 0,
            offset: 1,
            size: 1
        }),
        fat.read(0, 1, &mut block(0))
    );
    assert_eq!(
        Err(Error::InodeOutOfRange {
            ino: 64,
            ninodes: 64
        }),
        fat.get_size(64)
    );
    assert!(matches!(
        fat.write(64, 0, &block(0)),
        Err(Error::InodeOutOfRange { .. })
    ));
}

#[test]
fn set_size_rules() {
    let (_disk, fat) = fat_on_ramdisk(64, 64);
    for offset in 0..3 {
        fat.write(0, offset, &block(offset as u8)).unwrap();
    }

    assert_eq!(Ok(3), fat.set_size(0, 3));
    assert!(matches!(fat.set_size(0, 5), Err(Error::Unsupported(_))));
    assert!(matches!(fat.set_size(0, 1), Err(Error::Unsupported(_))));
    assert_eq!(3, fat.get_size(0).unwrap());

    assert_eq!(Ok(3), fat.set_size(0, 0));
    assert_eq!(0, fat.get_size(0).unwrap());
    assert_eq!(0, fat.usage().unwrap().used);
    assert_eq!(Ok(0), fat.set_size(0, 0));
}

#[test]
fn freed_entries_are_reused() {
    let (_disk, fat) = fat_on_ramdisk(16, 64);
    let total = fat.usage().unwrap().total;

    for offset in 0..total {
        fat.write(0, offset, &pattern(0, offset)).unwrap();
    }
    assert_eq!(Err(Error::NoSpace), fat.write(1, 0, &block(1)));

    fat.set_size(0, 0).unwrap();
    for offset in 0..total {
        fat.write(1, offset, &pattern(1, offset)).unwrap();
    }
    for offset in 0..total {
        assert_eq!(pattern(1, offset), read(&fat, 1, offset));
    }
}

#[test]
fn exhausted_free_list_changes_nothing() {
    let (_disk, fat) = fat_on_ramdisk(10, 1);
    let before = fat.usage().unwrap();
    assert_eq!(7, before.total);

    assert_eq!(Err(Error::NoSpace), fat.write(0, 9, &block(1)));
    assert_eq!(0, fat.get_size(0).unwrap());
    assert_eq!(before, fat.usage().unwrap());

    fat.write(0, 6, &block(1)).unwrap();
    assert_eq!(0, fat.usage().unwrap().free);
}

#[test]
fn interleaved_files() {
    let (_disk, fat) = fat_on_ramdisk(128, 64);
    for offset in 0..10 {
        for ino in [3, 5, 9] {
            fat.write(ino, offset, &pattern(ino, offset)).unwrap();
        }
    }

    fat.set_size(5, 0).unwrap();
    for offset in 0..10 {
        assert_eq!(pattern(3, offset), read(&fat, 3, offset));
        assert_eq!(pattern(9, offset), read(&fat, 9, offset));
    }
    assert_eq!(20, fat.usage().unwrap().used);
}

#[test]
fn sync_reaches_backing_store() {
    let (disk, fat) = fat_on_ramdisk(64, 64);
    let calls = disk.calls();
    fat.sync(4).unwrap();
    assert_eq!(calls + 1, disk.calls());

    disk.kill();
    assert_eq!(Err(Error::Io), fat.sync(4));
    assert_eq!(Err(Error::Io), fat.read(0, 0, &mut block(0)));
}

#[test]
fn detects_shared_entry() {
    let (disk, fat) = fat_on_ramdisk(64, 64);
    fat.write(0, 0, &block(1)).unwrap();

    // 让空闲链表头指向文件占用的表项
    let mut sb = SuperBlock::decode(&read(&*disk, 0, 0));
    sb.free_head = EntryId::new(0);
    disk.write(0, 0, &sb.encode()).unwrap();

    assert!(matches!(fat.usage(), Err(Error::Corrupted(_))));
}

#[test]
fn detects_leaked_entry() {
    let (disk, fat) = fat_on_ramdisk(64, 64);

    // 空闲链表丢失，所有表项都不属于任何链表
    let mut sb = SuperBlock::decode(&read(&*disk, 0, 0));
    sb.free_head = EntryId::EOC;
    disk.write(0, 0, &sb.encode()).unwrap();

    assert_eq!(
        Err(Error::Corrupted("entry owned by no chain")),
        fat.usage()
    );
}

/// 依次为：超级块、截断摘下的一段、接到文件末尾、inode 记录、清零跳过的块、数据块
const EXTEND_WRITES: usize = 6;

#[test]
fn interrupted_extend_never_shares_entries() {
    for allowed in 0..EXTEND_WRITES {
        let (disk, fat) = fat_on_flaky(64, 64);
        fat.write(0, 0, &pattern(0, 0)).unwrap();
        let total = fat.usage().unwrap().total;

        disk.fail_after(allowed);
        assert_eq!(Err(Error::Io), fat.write(0, 2, &pattern(0, 2)));
        disk.heal();

        let metadata_done = allowed >= 4;
        let leaked = if allowed == 0 || metadata_done { 0 } else { 2 };
        assert_eq!(leaked == 0, fat.usage().is_ok(), "allowed {allowed}");

        let size = fat.get_size(0).unwrap();
        assert_eq!(if metadata_done { 3 } else { 1 }, size);
        assert_eq!(pattern(0, 0), read(&fat, 0, 0));

        let filled = fill(&fat, 1);
        assert_eq!(total, size + filled + leaked, "allowed {allowed}");
        for offset in 0..filled {
            assert_eq!(pattern(1, offset), read(&fat, 1, offset));
        }
        assert_eq!(pattern(0, 0), read(&fat, 0, 0));
    }
}

#[test]
fn interrupted_truncate_never_shares_entries() {
    // inode 记录、FAT 表、超级块
    for allowed in 0..3 {
        let (disk, fat) = fat_on_flaky(64, 64);
        for offset in 0..3 {
            fat.write(0, offset, &pattern(0, offset)).unwrap();
        }
        let total = fat.usage().unwrap().total;

        disk.fail_after(allowed);
        assert_eq!(Err(Error::Io), fat.set_size(0, 0));
        disk.heal();

        let leaked = if allowed == 0 {
            assert_eq!(3, fat.get_size(0).unwrap());
            assert!(fat.usage().is_ok());
            for offset in 0..3 {
                assert_eq!(pattern(0, offset), read(&fat, 0, offset));
            }
            assert_eq!(Ok(3), fat.set_size(0, 0));
            0
        } else {
            assert_eq!(0, fat.get_size(0).unwrap());
            assert!(matches!(fat.usage(), Err(Error::Corrupted(_))));
            assert_eq!(Ok(0), fat.set_size(0, 0));
            3
        };

        let filled = fill(&fat, 1);
        assert_eq!(total, filled + leaked, "allowed {allowed}");
        for offset in 0..filled {
            assert_eq!(pattern(1, offset), read(&fat, 1, offset));
        }
    }
}

#[test]
fn fat_inside_fat_file() {
    let (_disk, inner) = fat_on_ramdisk(256, 64);
    let inner = Arc::new(inner);

    // 写最后一个块把 3 号文件撑到 64 块，再在其上建立文件系统
    inner.write(3, 63, &block(0)).unwrap();
    FatDisk::format(&*inner, 3, 64).unwrap();
    let outer = FatDisk::new(inner.clone(), 3);

    for offset in 0..5 {
        outer.write(1, offset, &pattern(1, offset)).unwrap();
    }
    for offset in 0..5 {
        assert_eq!(pattern(1, offset), read(&outer, 1, offset));
    }
    assert_eq!(64, inner.get_size(3).unwrap());
    assert_eq!(5, outer.usage().unwrap().used);
}

#[derive(Debug, Clone)]
enum Op {
    Grow { ino: u32, by: u32 },
    Truncate { ino: u32 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0_u32..4, 1_u32..24).prop_map(|(ino, by)| Op::Grow { ino, by }),
        1 => (0_u32..4).prop_map(|ino| Op::Truncate { ino }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn entries_are_conserved(ops in proptest::collection::vec(op(), 1..40)) {
        let (_disk, fat) = fat_on_ramdisk(96, 64);
        let total = fat.usage().unwrap().total;
        let mut sizes = [0_u32; 4];

        for op in ops {
            match op {
                Op::Grow { ino, by } => {
                    let size = sizes[ino as usize];
                    let last = size + by - 1;
                    match fat.write(ino, last, &pattern(ino, last)) {
                        Ok(()) => {
                            for offset in size..last {
                                fat.write(ino, offset, &pattern(ino, offset)).unwrap();
                            }
                            sizes[ino as usize] = last + 1;
                        }
                        Err(e) => prop_assert_eq!(Error::NoSpace, e),
                    }
                }
                Op::Truncate { ino } => {
                    prop_assert_eq!(Ok(sizes[ino as usize]), fat.set_size(ino, 0));
                    sizes[ino as usize] = 0;
                }
            }

            let usage = fat.usage().unwrap();
            prop_assert_eq!(total, usage.total);
            prop_assert_eq!(total, usage.free + usage.used);
            prop_assert_eq!(sizes.iter().sum::<u32>(), usage.used);
        }

        for (ino, size) in sizes.iter().enumerate() {
            let ino = ino as u32;
            prop_assert_eq!(*size, fat.get_size(ino).unwrap());
            for offset in 0..*size {
                prop_assert_eq!(pattern(ino, offset), read(&fat, ino, offset));
            }
        }
    }
}
