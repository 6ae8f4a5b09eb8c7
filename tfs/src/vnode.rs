use log::debug;

use crate::{
    block_io::BlockIo,
    constant::{BlockAddr, NULL, PAYLOAD_SIZE},
    error::{Error, Result},
    free_list::FreeListAllocator,
    layout::{now, DataBlock, FreeBlock, InodeBlock, Record, Touch},
};

/// 按 `P` 字节一块切分 `len` 字节的内容: 返回 (满块数, 尾块字节数)
///
/// 长度恰好是 `P` 的整数倍时, 最后一个满块作为尾块, 尾块永远不为空
pub fn split_blocks(len: usize) -> (usize, usize) {
    let full = len / PAYLOAD_SIZE;
    let tail = len % PAYLOAD_SIZE;
    if tail == 0 && len > 0 {
        (full - 1, PAYLOAD_SIZE)
    } else {
        (full, tail)
    }
}

/// 存放 `len` 字节需要的数据块数
pub fn needed_blocks(len: usize) -> usize {
    match split_blocks(len) {
        (_, 0) => 0,
        (full, _) => full + 1,
    }
}

/// 对磁盘上一个inode块的引用
pub struct Vnode<'a> {
    addr: BlockAddr,
    io: &'a BlockIo,
}

impl<'a> Vnode<'a> {
    pub fn new(addr: BlockAddr, io: &'a BlockIo) -> Self {
        Self { addr, io }
    }

    pub fn read_inode(&self) -> Result<InodeBlock> {
        self.io.read(self.addr)
    }

    pub fn modify_inode<V>(&self, f: impl FnOnce(&mut InodeBlock) -> V) -> Result<V> {
        self.io.modify(self.addr, f)
    }

    /// 从 `first` 开始的整条数据块链, 每一块都必须是数据块
    pub fn chain(&self, first: BlockAddr) -> Result<Vec<BlockAddr>> {
        let bound = self.io.block_count() as usize;
        let mut chain = Vec::new();
        let mut current = first;
        while current != NULL {
            if chain.len() >= bound {
                return Err(Error::corrupt(current, "file chain does not terminate"));
            }
            chain.push(current);
            current = self.io.read::<DataBlock>(current)?.next;
        }
        Ok(chain)
    }

    /// 从第一个数据块向后走 `n` 步, 链在此之前结束时返回 `None`
    pub fn nth_block(&self, n: usize) -> Result<Option<BlockAddr>> {
        let mut current = self.read_inode()?.first;
        let bound = self.io.block_count() as usize;
        for step in 0..n {
            if current == NULL {
                break;
            }
            if step >= bound {
                return Err(Error::corrupt(current, "file chain does not terminate"));
            }
            current = self.io.read::<DataBlock>(current)?.next;
        }
        Ok(if current == NULL { None } else { Some(current) })
    }

    /// 回收所有数据块和inode块本身
    ///
    /// 数据块链整体接到空闲链表前面, inode块再接到数据块链前面成为新的表头
    pub fn release(&self) -> Result<()> {
        let mut raw = self.io.raw(self.addr)?;
        InodeBlock::check(self.addr, &raw)?;
        let inode = InodeBlock::decode(&raw);
        let chain = self.chain(inode.first)?;

        let allocator = FreeListAllocator::new(self.io);
        let old_head = allocator.head()?;
        for (idx, &addr) in chain.iter().enumerate() {
            let next = chain.get(idx + 1).copied().unwrap_or(old_head);
            self.io.write(addr, &FreeBlock { next })?;
        }

        let next = chain.first().copied().unwrap_or(old_head);
        InodeBlock::retire(&mut raw, next);
        self.io.write_raw(self.addr, &raw)?;
        allocator.set_head(self.addr)?;
        debug!(
            "release `{}`: inode {} and data blocks {:?}",
            inode.name, self.addr, chain
        );
        Ok(())
    }

    /// 把 `data` 写进新分配的数据块链并挂到inode上
    ///
    /// inode必须是空的; 数据块和超级块先落盘, 最后才更新inode
    pub fn fill(&self, data: &[u8], ctime: Option<u64>) -> Result<BlockAddr> {
        let allocator = FreeListAllocator::new(self.io);
        let reservation = allocator.reserve(needed_blocks(data.len()))?;
        for (idx, (&addr, chunk)) in reservation
            .addrs
            .iter()
            .zip(data.chunks(PAYLOAD_SIZE))
            .enumerate()
        {
            let next = reservation.addrs.get(idx + 1).copied().unwrap_or(NULL);
            self.io.write(addr, &DataBlock::new(next, chunk))?;
        }
        allocator.commit(&reservation)?;

        let first = reservation.addrs.first().copied().unwrap_or(NULL);
        self.modify_inode(|inode| {
            inode.first = first;
            inode.size = data.len() as u16;
            if let Some(ctime) = ctime {
                inode.ctime = ctime;
            }
            inode.touch(Touch::ACCESS | Touch::MODIFY, now());
        })?;
        debug!(
            "fill inode {} with {} bytes in blocks {:?}",
            self.addr,
            data.len(),
            reservation.addrs
        );
        Ok(first)
    }
}
