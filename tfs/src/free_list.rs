use log::debug;

use crate::{
    block_io::BlockIo,
    constant::{BlockAddr, NULL, SUPER},
    error::{Error, Result},
    layout::{FreeBlock, SuperBlock},
};

/// 从空闲链表头部预留的一段连续节点, 提交前磁盘不会被修改
#[derive(Debug)]
pub struct Reservation {
    pub addrs: Vec<BlockAddr>,
    pub next_head: BlockAddr,
}

/// 以超级块为根的单向空闲链表
pub struct FreeListAllocator<'a> {
    io: &'a BlockIo,
}

impl<'a> FreeListAllocator<'a> {
    pub fn new(io: &'a BlockIo) -> Self {
        Self { io }
    }

    pub fn head(&self) -> Result<BlockAddr> {
        Ok(self.io.read::<SuperBlock>(SUPER)?.free_head)
    }

    pub fn set_head(&self, free_head: BlockAddr) -> Result<()> {
        self.io.modify(SUPER, |block: &mut SuperBlock| {
            block.free_head = free_head;
        })
    }

    /// 沿着空闲链表最多走 `limit` 步, 返回经过的节点和之后的节点
    fn walk(&self, limit: usize) -> Result<(Vec<BlockAddr>, BlockAddr)> {
        let bound = self.io.block_count() as usize;
        let mut addrs = Vec::new();
        let mut current = self.head()?;
        while current != NULL && addrs.len() < limit {
            if addrs.len() >= bound {
                return Err(Error::corrupt(current, "free list does not terminate"));
            }
            let free = self.io.read::<FreeBlock>(current)?;
            addrs.push(current);
            current = free.next;
        }
        Ok((addrs, current))
    }

    pub fn count(&self) -> Result<usize> {
        self.walk(usize::MAX).map(|(addrs, _)| addrs.len())
    }

    /// 只读地数空闲块, 数到 `limit` 为止
    pub fn count_up_to(&self, limit: usize) -> Result<usize> {
        self.walk(limit).map(|(addrs, _)| addrs.len())
    }

    /// 弹出链表头的一个空闲块并立即更新超级块
    pub fn pop(&self) -> Result<BlockAddr> {
        let head = self.head()?;
        if head == NULL {
            return Err(Error::NoFreeBlocks);
        }
        let free = self.io.read::<FreeBlock>(head)?;
        self.set_head(free.next)?;
        debug!("alloc block {head}, free list head -> {}", free.next);
        Ok(head)
    }

    pub fn reserve(&self, count: usize) -> Result<Reservation> {
        let (addrs, next_head) = self.walk(count)?;
        if addrs.is_empty() && count > 0 {
            Err(Error::NoFreeBlocks)
        } else if addrs.len() < count {
            Err(Error::InsufficientSpace {
                needed: count,
                available: addrs.len(),
            })
        } else {
            Ok(Reservation { addrs, next_head })
        }
    }

    pub fn commit(&self, reservation: &Reservation) -> Result<()> {
        debug!(
            "alloc blocks {:?}, free list head -> {}",
            reservation.addrs, reservation.next_head
        );
        self.set_head(reservation.next_head)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{constant::BLOCK_SIZE, disk::RamDisk, tfs::format};

    fn formatted(blocks: u64) -> BlockIo {
        let disk = Arc::new(RamDisk::new(BLOCK_SIZE as u64 * blocks).unwrap());
        format(disk.as_ref()).unwrap();
        BlockIo::new(disk)
    }

    #[test]
    fn pop_follows_the_chain() {
        let io = formatted(4);
        let allocator = FreeListAllocator::new(&io);
        assert_eq!(allocator.count().unwrap(), 3);
        assert_eq!(allocator.pop().unwrap(), 1);
        assert_eq!(allocator.pop().unwrap(), 2);
        assert_eq!(allocator.pop().unwrap(), 3);
        assert!(matches!(allocator.pop(), Err(Error::NoFreeBlocks)));
        assert_eq!(allocator.count().unwrap(), 0);
    }

    #[test]
    fn reserve_does_not_touch_the_disk() {
        let io = formatted(8);
        let allocator = FreeListAllocator::new(&io);
        let reservation = allocator.reserve(3).unwrap();
        assert_eq!(reservation.addrs, vec![1, 2, 3]);
        assert_eq!(reservation.next_head, 4);
        assert_eq!(allocator.head().unwrap(), 1);
        allocator.commit(&reservation).unwrap();
        assert_eq!(allocator.head().unwrap(), 4);
        assert_eq!(allocator.count().unwrap(), 4);
    }

    #[test]
    fn reserve_reports_shortage() {
        let io = formatted(3);
        let allocator = FreeListAllocator::new(&io);
        assert!(matches!(
            allocator.reserve(5),
            Err(Error::InsufficientSpace { needed: 5, available: 2 })
        ));
        allocator.set_head(NULL).unwrap();
        assert!(matches!(allocator.reserve(1), Err(Error::NoFreeBlocks)));
    }

    #[test]
    fn cyclic_free_list_is_corrupt() {
        let io = formatted(4);
        io.write(3, &FreeBlock { next: 1 }).unwrap();
        let allocator = FreeListAllocator::new(&io);
        assert!(matches!(allocator.count(), Err(Error::CorruptFormat { .. })));
    }

    #[test]
    fn non_free_block_on_list_is_corrupt() {
        let io = formatted(4);
        io.write_raw(2, &[0u8; BLOCK_SIZE]).unwrap();
        let allocator = FreeListAllocator::new(&io);
        assert!(matches!(
            allocator.count(),
            Err(Error::CorruptFormat { addr: 2, .. })
        ));
    }
}
