pub type BlockAddr = u16;
pub type Block = [u8; BLOCK_SIZE];

pub const NULL: BlockAddr = 0;
pub const SUPER: BlockAddr = 0;
pub const BLOCK_SIZE: usize = 256;
pub const MAGIC: u8 = 0x44;

pub const HEADER_SIZE: usize = 4;
// 每个数据块能容纳的文件字节数
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - HEADER_SIZE;

pub const NAME_LEN_LIMIT: usize = 8;
pub const MAX_FILE_SIZE: usize = u16::MAX as usize;
// 链接字段只有16位
pub const MAX_BLOCKS: u64 = 1 << 16;

pub const DEFAULT_DISK_SIZE: u64 = 10240;
pub const DEFAULT_DISK_NAME: &str = "tinyFSDisk";
