//! 磁盘上的块格式
//!
//! 每个块的前4个字节是统一的块头:
//!
//! | 偏移 | 含义 |
//! |------|------|
//! | 0    | 块类型 |
//! | 1    | 格式魔数 |
//! | 2..4 | 16位链接地址(小端) |
//!
//! 之后是各类型自己的负载, 由 [`Record`] 的实现负责编解码

use core::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::{
    constant::{Block, BlockAddr, BLOCK_SIZE, HEADER_SIZE, MAGIC, NAME_LEN_LIMIT, PAYLOAD_SIZE},
    error::{Error, Result},
};

const TYPE_POS: usize = 0;
const MAGIC_POS: usize = 1;
const LINK_POS: usize = 2;

const SIZE_POS: usize = HEADER_SIZE;
const NAME_POS: usize = SIZE_POS + 2;
// 名字之后留一个字节的结束符
const NAME_FIELD: usize = NAME_LEN_LIMIT + 1;
const CTIME_POS: usize = NAME_POS + NAME_FIELD;
const ATIME_POS: usize = CTIME_POS + 8;
const MTIME_POS: usize = ATIME_POS + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    Super = 1,
    Inode = 2,
    Data = 3,
    Free = 4,
}

impl BlockType {
    pub fn of(block: &Block) -> Option<Self> {
        match block[TYPE_POS] {
            1 => Some(Self::Super),
            2 => Some(Self::Inode),
            3 => Some(Self::Data),
            4 => Some(Self::Free),
            _ => None,
        }
    }
}

pub fn has_magic(block: &Block) -> bool {
    block[MAGIC_POS] == MAGIC
}

pub fn link(block: &Block) -> BlockAddr {
    u16::from_le_bytes([block[LINK_POS], block[LINK_POS + 1]])
}

fn write_header(block: &mut Block, ty: BlockType, link: BlockAddr) {
    block[TYPE_POS] = ty as u8;
    block[MAGIC_POS] = MAGIC;
    block[LINK_POS..LINK_POS + 2].copy_from_slice(&link.to_le_bytes());
}

fn read_u64(block: &Block, pos: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&block[pos..pos + 8]);
    u64::from_le_bytes(bytes)
}

/// 一种有类型的块记录
pub trait Record: Sized {
    const TYPE: BlockType;

    /// 块头已经校验过类型和魔数
    fn decode(block: &Block) -> Self;
    fn encode(&self) -> Block;

    fn check(addr: BlockAddr, block: &Block) -> Result<()> {
        if !has_magic(block) {
            Err(Error::corrupt(addr, "bad magic"))
        } else if BlockType::of(block) != Some(Self::TYPE) {
            Err(Error::corrupt(addr, Self::MISMATCH))
        } else {
            Ok(())
        }
    }

    const MISMATCH: &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperBlock {
    pub free_head: BlockAddr,
}

impl Record for SuperBlock {
    const TYPE: BlockType = BlockType::Super;
    const MISMATCH: &'static str = "block is not the superblock";

    fn decode(block: &Block) -> Self {
        Self {
            free_head: link(block),
        }
    }

    fn encode(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        write_header(&mut block, Self::TYPE, self.free_head);
        block
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    pub next: BlockAddr,
}

impl Record for FreeBlock {
    const TYPE: BlockType = BlockType::Free;
    const MISMATCH: &'static str = "block on the free list is not free";

    fn decode(block: &Block) -> Self {
        Self { next: link(block) }
    }

    fn encode(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        write_header(&mut block, Self::TYPE, self.next);
        block
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct DataBlock {
    pub next: BlockAddr,
    pub payload: [u8; PAYLOAD_SIZE],
}

impl DataBlock {
    /// `chunk` 不足一整块时剩余部分补零
    pub fn new(next: BlockAddr, chunk: &[u8]) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[..chunk.len()].copy_from_slice(chunk);
        Self { next, payload }
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock").field("next", &self.next).finish()
    }
}

impl Record for DataBlock {
    const TYPE: BlockType = BlockType::Data;
    const MISMATCH: &'static str = "block in a file chain is not a data block";

    fn decode(block: &Block) -> Self {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&block[HEADER_SIZE..]);
        Self {
            next: link(block),
            payload,
        }
    }

    fn encode(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        write_header(&mut block, Self::TYPE, self.next);
        block[HEADER_SIZE..].copy_from_slice(&self.payload);
        block
    }
}

/// 文件名, 1到8个字节, 不含 `\0`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Name {
    bytes: [u8; NAME_LEN_LIMIT],
    len: u8,
}

impl Name {
    pub fn new(name: &str) -> Result<Self> {
        let raw = name.as_bytes();
        if raw.is_empty() {
            return Err(Error::InvalidArgument("file name is empty"));
        }
        if raw.len() > NAME_LEN_LIMIT {
            return Err(Error::InvalidArgument("file name is longer than 8 bytes"));
        }
        if raw.contains(&0) {
            return Err(Error::InvalidArgument("file name contains a NUL byte"));
        }
        let mut bytes = [0u8; NAME_LEN_LIMIT];
        bytes[..raw.len()].copy_from_slice(raw);
        Ok(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    fn from_field(field: &[u8]) -> Self {
        let len = field
            .iter()
            .take(NAME_LEN_LIMIT)
            .position(|&byte| byte == 0)
            .unwrap_or(NAME_LEN_LIMIT);
        let mut bytes = [0u8; NAME_LEN_LIMIT];
        bytes[..len].copy_from_slice(&field[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

/// 在给定的原始块上比较文件名, 不需要完整解码
pub fn name_matches(block: &Block, name: &Name) -> bool {
    let field = &block[NAME_POS..NAME_POS + NAME_FIELD];
    let len = name.len as usize;
    &field[..len] == name.as_bytes() && field[len] == 0
}

bitflags! {
    /// 要刷新的时间戳
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Touch: u8 {
        const CREATE = 1 << 0;
        const ACCESS = 1 << 1;
        const MODIFY = 1 << 2;
    }
}

/// 当前的 Unix 时间(秒)
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeBlock {
    pub first: BlockAddr,
    pub size: u16,
    pub name: Name,
    pub ctime: u64,
    pub atime: u64,
    pub mtime: u64,
}

impl InodeBlock {
    pub fn new(name: Name) -> Self {
        let mut inode = Self {
            first: 0,
            size: 0,
            name,
            ctime: 0,
            atime: 0,
            mtime: 0,
        };
        inode.touch(Touch::all(), now());
        inode
    }

    pub fn touch(&mut self, which: Touch, at: u64) {
        if which.contains(Touch::CREATE) {
            self.ctime = at;
        }
        if which.contains(Touch::ACCESS) {
            self.atime = at;
        }
        if which.contains(Touch::MODIFY) {
            self.mtime = at;
        }
    }

    /// 回收inode块: 清空除文件名以外的负载, 改为空闲块并链到 `next`
    pub fn retire(block: &mut Block, next: BlockAddr) {
        let name = Name::from_field(&block[NAME_POS..NAME_POS + NAME_FIELD]);
        block[HEADER_SIZE..].fill(0);
        block[NAME_POS..NAME_POS + name.len as usize].copy_from_slice(name.as_bytes());
        write_header(block, BlockType::Free, next);
    }
}

impl Record for InodeBlock {
    const TYPE: BlockType = BlockType::Inode;
    const MISMATCH: &'static str = "block is not an inode";

    fn decode(block: &Block) -> Self {
        Self {
            first: link(block),
            size: u16::from_le_bytes([block[SIZE_POS], block[SIZE_POS + 1]]),
            name: Name::from_field(&block[NAME_POS..NAME_POS + NAME_FIELD]),
            ctime: read_u64(block, CTIME_POS),
            atime: read_u64(block, ATIME_POS),
            mtime: read_u64(block, MTIME_POS),
        }
    }

    fn encode(&self) -> Block {
        let mut block = [0u8; BLOCK_SIZE];
        write_header(&mut block, Self::TYPE, self.first);
        block[SIZE_POS..SIZE_POS + 2].copy_from_slice(&self.size.to_le_bytes());
        block[NAME_POS..NAME_POS + self.name.len as usize].copy_from_slice(self.name.as_bytes());
        block[CTIME_POS..CTIME_POS + 8].copy_from_slice(&self.ctime.to_le_bytes());
        block[ATIME_POS..ATIME_POS + 8].copy_from_slice(&self.atime.to_le_bytes());
        block[MTIME_POS..MTIME_POS + 8].copy_from_slice(&self.mtime.to_le_bytes());
        block
    }
}
