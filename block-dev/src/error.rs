use alloc::boxed::Box;

use thiserror::Error;

/// 各层共用的错误类型。
///
/// 每一层要么在本地恢复（如 RAID1 换一块盘重试），
/// 要么原样向上传递，从不吞掉错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// 设备层面的读写失败
    #[error("device I/O failure")]
    Io,

    #[error("inode {ino} out of range (capacity {ninodes})")]
    InodeOutOfRange { ino: u32, ninodes: u32 },

    #[error("block {offset} beyond end of inode {ino} ({size} blocks)")]
    OffsetOutOfRange { ino: u32, offset: u32, size: u32 },

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("no space left on store")]
    NoSpace,

    #[error("store is not formatted")]
    Unformatted,

    #[error("corrupted metadata: {0}")]
    Corrupted(&'static str),

    /// RAID1 所有存活成员都无法完成请求，附带最后一个成员的错误
    #[error("all mirror members failed, last error: {0}")]
    AllMembersFailed(Box<Error>),

    /// RAID1 已没有存活的成员
    #[error("no live mirror member")]
    NoLiveMembers,
}

pub type Result<T> = core::result::Result<T, Error>;
