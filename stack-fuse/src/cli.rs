use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Image file backing one mirror member, repeat for more members
    #[arg(long = "image", short, required = true)]
    pub images: Vec<PathBuf>,

    /// Size of newly created images in MiB
    #[arg(long, default_value_t = 4)]
    pub size_mib: u64,

    /// Number of inodes to format each image with
    #[arg(long, default_value_t = 64)]
    pub inodes: u32,

    /// Cache capacity in blocks, per member
    #[arg(long, default_value_t = 64)]
    pub cache_blocks: usize,

    /// Write every block through to the image instead of deferring until sync
    #[arg(long)]
    pub write_through: bool,

    /// Inode receiving the input file
    #[arg(long, default_value_t = 0)]
    pub ino: u32,

    /// Host file to copy in
    #[arg(long)]
    pub input: PathBuf,
}
