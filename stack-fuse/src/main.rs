mod block_file;
mod cli;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;

use block_dev::{BLOCK_SIZE, BlockStore, zeroed};
use clap::Parser;
use clockdisk::{ClockDisk, WritePolicy};
use fatdisk::FatDisk;
use raid1disk::Raid1Disk;
use typed_bytesize::ByteSizeIec;

pub use self::{block_file::BlockFile, cli::Cli};

fn main() -> io::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let policy = if cli.write_through {
        WritePolicy::WriteThrough
    } else {
        WritePolicy::WriteBack
    };

    let mut caches = Vec::new();
    for image in &cli.images {
        let fat = open_image(image, ByteSizeIec::mib(cli.size_mib).0, cli.inodes)?;
        caches.push(Arc::new(ClockDisk::new(fat, cli.cache_blocks, policy)));
    }
    let members = caches
        .iter()
        .map(|cache| cache.clone() as Arc<dyn BlockStore>)
        .collect();
    let raid = Raid1Disk::new(members);

    let data = fs::read(&cli.input)?;
    let nblocks = copy_in(&raid, cli.ino, &data).map_err(io::Error::other)?;
    println!(
        "copied {:?} into inode {} ({} bytes, {nblocks} blocks)",
        cli.input,
        cli.ino,
        data.len()
    );

    verify(&raid, cli.ino, &data).map_err(io::Error::other)?;

    for (image, cache) in cli.images.iter().zip(&caches) {
        log::info!("cache over {image:?}");
        cache.dump_stats();
    }
    let broken = raid.broken();
    if broken.contains(&true) {
        log::warn!("broken mirror members: {broken:?}");
    }

    Ok(())
}

/// Opens an image, creating it with `size` bytes when it is new,
/// and makes sure its inode `0` holds a FAT file system.
fn open_image(path: &Path, size: u64, ninodes: u32) -> io::Result<Arc<FatDisk>> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    if fd.metadata()?.len() == 0 {
        fd.set_len(size)?;
    }

    let file = Arc::new(BlockFile::new(fd));
    FatDisk::format(&*file, 0, ninodes).map_err(io::Error::other)?;
    Ok(Arc::new(FatDisk::new(file, 0)))
}

/// Replaces the content of `ino` with `data`, padding the last block with zeros.
fn copy_in(store: &dyn BlockStore, ino: u32, data: &[u8]) -> block_dev::Result<u32> {
    store.set_size(ino, 0)?;

    let mut nblocks = 0;
    for chunk in data.chunks(BLOCK_SIZE) {
        let mut block = zeroed();
        block[..chunk.len()].copy_from_slice(chunk);
        store.write(ino, nblocks, &block)?;
        nblocks += 1;
    }
    store.sync(ino)?;
    Ok(nblocks)
}

fn verify(store: &dyn BlockStore, ino: u32, data: &[u8]) -> block_dev::Result<()> {
    let mut block = zeroed();
    for (offset, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
        store.read(ino, offset as u32, &mut block)?;
        if block[..chunk.len()] != *chunk {
            log::error!("block {offset} of inode {ino} differs from the input");
            return Err(block_dev::Error::Corrupted("read back differs from input"));
        }
    }
    Ok(())
}
