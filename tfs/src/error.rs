use thiserror::Error;

use crate::constant::BlockAddr;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("no file system is mounted")]
    NotMounted,
    #[error("a file system is already mounted")]
    AlreadyMounted,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("too many open files")]
    TooManyFiles,
    #[error("no free blocks left on the device")]
    NoFreeBlocks,
    #[error("not enough free blocks: {needed} needed, {available} available")]
    InsufficientSpace { needed: usize, available: usize },
    #[error("out of bounds")]
    OutOfBounds,
    #[error("device i/o error: {0}")]
    DeviceIO(#[from] std::io::Error),
    #[error("corrupt file system at block {addr}: {reason}")]
    CorruptFormat { addr: BlockAddr, reason: &'static str },
}

impl Error {
    pub(crate) fn corrupt(addr: BlockAddr, reason: &'static str) -> Self {
        log::warn!("block {addr}: {reason}");
        Error::CorruptFormat { addr, reason }
    }
}

pub type Result<T> = core::result::Result<T, Error>;
