pub mod bitmap;
pub mod blk_dev; // block devices
pub mod block_cache; // buffer cache
pub mod buf; // pages and frames
pub mod common;
pub mod dir;
pub mod disk; // mkfs
pub mod error;
pub mod file; // open-file table entries
pub mod fs; // super block
pub mod inode;
pub mod process;
pub mod stat;
pub mod trace;
pub mod vfs; // syscalls

pub use block_cache::{BufferCache, SyncBufferCache};
pub use common::Config;
pub use error::{CacheError, DeviceError, FsError, VfsError};
pub use file::{OpenFlag, OpenFlags, Whence};
pub use vfs::Vfs;
