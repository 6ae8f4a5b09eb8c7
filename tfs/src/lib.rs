//! TinyFS: 单挂载点, 扁平命名空间的块式文件系统
//!
//! 设备被切成 256 字节的块, 0号块是超级块, 保存空闲链表的表头;
//! 每个文件由一个inode块和一条数据块链组成

pub mod block_dev;
pub mod block_io;
pub mod config;
pub mod constant;
pub mod disk;
pub mod error;
pub mod fd;
pub mod free_list;
pub mod layout;
pub mod logging;
pub mod session;
pub mod tfs;
pub mod vnode;

pub use block_dev::BlockDevice;
pub use config::Config;
pub use disk::{FileDisk, RamDisk};
pub use error::{Error, Result};
pub use fd::Fd;
pub use session::Session;
pub use tfs::{format, mkfs, Stat};
