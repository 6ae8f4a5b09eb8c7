use crate::constant::{Block, BlockAddr};
use crate::error::Result;
use core::any::Any;

/// 按逻辑块号寻址的定长块设备
///
/// 块号 `n` 对应设备上的字节偏移 `n * BLOCK_SIZE`, 越过设备末尾的访问返回 `OutOfBounds`
pub trait BlockDevice: Send + Sync + Any {
    fn block_count(&self) -> u64;
    fn read_block(&self, block_addr: BlockAddr, buf: &mut Block) -> Result<()>;
    fn write_block(&self, block_addr: BlockAddr, buf: &Block) -> Result<()>;
    /// 把缓冲的写入落盘, 卸载时调用
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
