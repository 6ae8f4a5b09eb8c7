use std::sync::Arc;

use crate::{
    block_dev::BlockDevice,
    constant::{Block, BlockAddr, BLOCK_SIZE, MAX_BLOCKS},
    error::Result,
    layout::Record,
};

/// 块设备之上的有类型读写
///
/// 没有缓存, 每次 `read`/`modify` 都直接访问设备; `modify` 在闭包返回后立即写回
#[derive(Clone)]
pub struct BlockIo {
    device: Arc<dyn BlockDevice>,
    blocks: u64,
}

impl BlockIo {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let blocks = device.block_count().min(MAX_BLOCKS);
        Self { device, blocks }
    }

    /// 可寻址的块数, 同时也是任何一条链的最大长度
    pub fn block_count(&self) -> u64 {
        self.blocks
    }

    pub fn addrs(&self) -> impl Iterator<Item = BlockAddr> {
        (0..self.blocks).map(|addr| addr as BlockAddr)
    }

    pub fn raw(&self, addr: BlockAddr) -> Result<Block> {
        let mut block = [0u8; BLOCK_SIZE];
        self.device.read_block(addr, &mut block)?;
        Ok(block)
    }

    pub fn write_raw(&self, addr: BlockAddr, block: &Block) -> Result<()> {
        self.device.write_block(addr, block)
    }

    pub fn read<T: Record>(&self, addr: BlockAddr) -> Result<T> {
        let block = self.raw(addr)?;
        T::check(addr, &block)?;
        Ok(T::decode(&block))
    }

    pub fn write<T: Record>(&self, addr: BlockAddr, record: &T) -> Result<()> {
        self.write_raw(addr, &record.encode())
    }

    pub fn modify<T: Record, V>(&self, addr: BlockAddr, f: impl FnOnce(&mut T) -> V) -> Result<V> {
        let mut record = self.read::<T>(addr)?;
        let v = f(&mut record);
        self.write(addr, &record)?;
        Ok(v)
    }

    pub fn sync(&self) -> Result<()> {
        self.device.sync()
    }
}
