use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::{debug, info};

use crate::{
    block_dev::BlockDevice,
    block_io::BlockIo,
    constant::{Block, BlockAddr, MAX_BLOCKS, MAX_FILE_SIZE, NULL, PAYLOAD_SIZE, SUPER},
    disk::FileDisk,
    error::{Error, Result},
    fd::{FilePtr, OpenFile},
    free_list::FreeListAllocator,
    layout::{
        has_magic, name_matches, now, BlockType, DataBlock, FreeBlock, InodeBlock, Name, Record,
        SuperBlock, Touch,
    },
    vnode::{needed_blocks, Vnode},
};

/// 把设备格式化成一个空的文件系统: 所有块空闲并串成链表, 0号块是超级块
pub fn format(device: &dyn BlockDevice) -> Result<()> {
    let total = device.block_count();
    if total == 0 {
        return Err(Error::InvalidArgument("device is smaller than one block"));
    }
    if total > MAX_BLOCKS {
        return Err(Error::InvalidArgument(
            "device has more blocks than a link can address",
        ));
    }
    for addr in 1..total {
        let next = if addr + 1 == total {
            NULL
        } else {
            (addr + 1) as BlockAddr
        };
        device.write_block(addr as BlockAddr, &FreeBlock { next }.encode())?;
    }
    let free_head = if total > 1 { 1 } else { NULL };
    device.write_block(SUPER, &SuperBlock { free_head }.encode())?;
    device.sync()?;
    info!("format {total} blocks, {} free", total - 1);
    Ok(())
}

/// 在 `path` 上创建一个 `size` 字节(向下取整到整块)的镜像并格式化
pub fn mkfs(path: impl AsRef<Path>, size: u64) -> Result<()> {
    if size == 0 {
        return Err(Error::InvalidArgument("mkfs needs a non-zero size"));
    }
    let disk = FileDisk::open(path, size)?;
    format(&disk)
}

/// `stat` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub size: u16,
    pub name: String,
    pub ctime: u64,
    pub atime: u64,
    pub mtime: u64,
}

/// 已挂载的文件系统
pub struct TinyFs {
    io: BlockIo,
    /// 每次创建, 改写或删除文件都加一; 句柄记下的值落后时要先和磁盘对齐
    epoch: AtomicU64,
}

impl TinyFs {
    /// 校验超级块, 不修改设备
    pub fn load(device: Arc<dyn BlockDevice>) -> Result<Self> {
        if device.block_count() == 0 {
            return Err(Error::corrupt(SUPER, "device holds no blocks"));
        }
        let io = BlockIo::new(device);
        let block = io.raw(SUPER)?;
        if BlockType::of(&block) != Some(BlockType::Super) {
            return Err(Error::corrupt(SUPER, "block 0 is not a superblock"));
        }
        if !has_magic(&block) {
            return Err(Error::corrupt(SUPER, "bad magic"));
        }
        info!("load file system with {} blocks", io.block_count());
        Ok(Self {
            io,
            epoch: AtomicU64::new(0),
        })
    }

    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    fn allocator(&self) -> FreeListAllocator<'_> {
        FreeListAllocator::new(&self.io)
    }

    fn vnode(&self, addr: BlockAddr) -> Vnode<'_> {
        Vnode::new(addr, &self.io)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    fn bump(&self) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }

    pub fn free_block_count(&self) -> Result<usize> {
        self.allocator().count()
    }

    pub fn block(&self, addr: BlockAddr) -> Result<Block> {
        if addr as u64 >= self.io.block_count() {
            return Err(Error::OutOfBounds);
        }
        self.io.raw(addr)
    }

    /// `addr` 上是否是名为 `name` 的inode
    fn holds(&self, addr: BlockAddr, name: &Name) -> Result<bool> {
        let block = self.io.raw(addr)?;
        Ok(BlockType::of(&block) == Some(BlockType::Inode)
            && has_magic(&block)
            && name_matches(&block, name))
    }

    /// 从0号块开始线性扫描, 找名字完全相同的inode
    pub fn find(&self, name: &Name) -> Result<Option<BlockAddr>> {
        for addr in self.io.addrs() {
            if self.holds(addr, name)? {
                return Ok(Some(addr));
            }
        }
        Ok(None)
    }

    pub fn list(&self) -> Result<Vec<(BlockAddr, InodeBlock)>> {
        let mut inodes = Vec::new();
        for addr in self.io.addrs() {
            let block = self.io.raw(addr)?;
            if BlockType::of(&block) == Some(BlockType::Inode) && has_magic(&block) {
                inodes.push((addr, InodeBlock::decode(&block)));
            }
        }
        Ok(inodes)
    }

    fn create(&self, name: Name) -> Result<BlockAddr> {
        let addr = self.allocator().pop()?;
        self.bump();
        self.io.write(addr, &InodeBlock::new(name))?;
        debug!("create `{name}` at inode {addr}");
        Ok(addr)
    }

    /// 按名字打开文件, 不存在时新建一个空文件
    pub fn open(&self, name: &str) -> Result<OpenFile> {
        let name = Name::new(name)?;
        let mut file = match self.find(&name)? {
            Some(addr) => {
                let inode = self.vnode(addr).read_inode()?;
                debug!("open `{name}` at inode {addr}, {} bytes", inode.size);
                OpenFile::new(name, addr, inode.size, inode.first)
            }
            None => {
                let addr = self.create(name)?;
                OpenFile::new(name, addr, 0, NULL)
            }
        };
        file.epoch = self.epoch();
        Ok(file)
    }

    /// 别的句柄改动过文件之后, 按磁盘上的inode重新确定大小和指针
    ///
    /// inode块已经不是这个名字的inode时按名字重新查找, 找不到就当作已删除
    fn revalidate(&self, file: &mut OpenFile) -> Result<()> {
        let epoch = self.epoch();
        if file.epoch == epoch {
            return Ok(());
        }
        if !file.is_deleted() && !self.holds(file.inode, &file.name)? {
            debug!("inode {} no longer holds `{}`", file.inode, file.name);
            file.reset();
        }
        if file.is_deleted() {
            match self.find(&file.name)? {
                Some(addr) => file.inode = addr,
                None => {
                    file.reset();
                    file.epoch = epoch;
                    return Ok(());
                }
            }
        }
        file.size = self.vnode(file.inode).read_inode()?.size;
        self.place(file, file.pos)?;
        file.epoch = epoch;
        Ok(())
    }

    /// 用 `data` 整体替换文件内容, 保留创建时间, 指针回到文件开头
    pub fn write(&self, file: &mut OpenFile, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FILE_SIZE {
            return Err(Error::InvalidArgument(
                "file content is larger than 65535 bytes",
            ));
        }
        self.revalidate(file)?;

        let (ctime, old_first, old_blocks) = if file.is_deleted() {
            (None, NULL, 0)
        } else {
            let vnode = self.vnode(file.inode);
            let inode = vnode.read_inode()?;
            let chain = vnode.chain(inode.first)?;
            (Some(inode.ctime), inode.first, chain.len())
        };

        // 旧内容释放之前先确认空间足够, 失败时文件保持原样
        let inode_cost = usize::from(file.is_deleted());
        let needed = needed_blocks(data.len()) + inode_cost;
        if needed > old_blocks {
            let shortfall = needed - old_blocks;
            let free = self.allocator().count_up_to(shortfall)?;
            if free < shortfall {
                let available = free + old_blocks;
                return Err(if available == 0 {
                    Error::NoFreeBlocks
                } else {
                    Error::InsufficientSpace { needed, available }
                });
            }
        }

        self.bump();
        if old_first != NULL {
            self.vnode(file.inode).release()?;
            file.reset();
        }
        if file.is_deleted() {
            file.inode = self.create(file.name)?;
        }

        let first = self.vnode(file.inode).fill(data, ctime)?;
        file.size = data.len() as u16;
        file.rewind(first);
        file.epoch = self.epoch();
        Ok(())
    }

    /// 删除文件, 句柄保留名字以便之后再写
    pub fn delete(&self, file: &mut OpenFile) -> Result<()> {
        self.revalidate(file)?;
        if file.is_deleted() {
            return Ok(());
        }
        self.bump();
        self.vnode(file.inode).release()?;
        file.reset();
        file.epoch = self.epoch();
        Ok(())
    }

    pub fn read_byte(&self, file: &mut OpenFile) -> Result<u8> {
        self.revalidate(file)?;
        if file.at_eof() {
            return Err(Error::OutOfBounds);
        }
        let block = self.io.read::<DataBlock>(file.ptr.block)?;
        self.vnode(file.inode)
            .modify_inode(|inode| inode.touch(Touch::ACCESS, now()))?;

        let byte = block.payload[file.ptr.offset];
        file.pos += 1;
        if file.ptr.offset + 1 < PAYLOAD_SIZE {
            file.ptr.offset += 1;
        } else {
            file.ptr = FilePtr {
                block: if block.next == NULL {
                    file.inode
                } else {
                    block.next
                },
                offset: 0,
            };
        }
        Ok(byte)
    }

    /// 绝对定位, 不检查文件大小; 越过末尾的位置在下一次读时报 `OutOfBounds`
    pub fn seek(&self, file: &mut OpenFile, offset: u32) -> Result<()> {
        self.revalidate(file)?;
        self.place(file, offset)
    }

    fn place(&self, file: &mut OpenFile, offset: u32) -> Result<()> {
        let ordinal = offset as usize / PAYLOAD_SIZE;
        let within = offset as usize % PAYLOAD_SIZE;
        let block = if file.is_deleted() {
            NULL
        } else {
            self.vnode(file.inode)
                .nth_block(ordinal)?
                .unwrap_or(file.inode)
        };
        file.ptr = FilePtr {
            block,
            offset: within,
        };
        file.pos = offset;
        Ok(())
    }

    pub fn stat(&self, file: &mut OpenFile) -> Result<Stat> {
        self.revalidate(file)?;
        if file.is_deleted() {
            return Err(Error::InvalidArgument("file has been deleted"));
        }
        let inode = self.vnode(file.inode).read_inode()?;
        Ok(Stat {
            size: inode.size,
            name: file.name.to_string(),
            ctime: inode.ctime,
            atime: inode.atime,
            mtime: inode.mtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constant::{BLOCK_SIZE, HEADER_SIZE, MAGIC},
        disk::RamDisk,
        layout::link,
    };

    fn mounted(bytes: u64) -> (Arc<RamDisk>, TinyFs) {
        let disk = Arc::new(RamDisk::new(bytes).unwrap());
        format(disk.as_ref()).unwrap();
        let fs = TinyFs::load(disk.clone()).unwrap();
        (disk, fs)
    }

    fn read_all(fs: &TinyFs, file: &mut OpenFile) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(byte) = fs.read_byte(file) {
            out.push(byte);
        }
        out
    }

    #[test]
    fn format_layout() {
        let (disk, fs) = mounted(1024);
        let image = disk.image();
        assert_eq!(image[0], BlockType::Super as u8);
        for (idx, block) in image.chunks(BLOCK_SIZE).enumerate() {
            assert_eq!(block[1], MAGIC, "block {idx} has no magic");
            assert!(block[HEADER_SIZE..].iter().all(|&byte| byte == 0));
            if idx > 0 {
                assert_eq!(block[0], BlockType::Free as u8);
            }
        }
        assert_eq!(fs.free_block_count().unwrap(), 3);
    }

    #[test]
    fn format_single_block_has_no_space() {
        let (disk, fs) = mounted(BLOCK_SIZE as u64);
        let block: Block = disk.image().try_into().unwrap();
        assert_eq!(link(&block), NULL);
        assert_eq!(fs.free_block_count().unwrap(), 0);
        assert!(matches!(fs.open("f"), Err(Error::NoFreeBlocks)));
    }

    #[test]
    fn load_rejects_unformatted_device() {
        let disk = Arc::new(RamDisk::new(1024).unwrap());
        assert!(matches!(
            TinyFs::load(disk.clone()),
            Err(Error::CorruptFormat { addr: 0, .. })
        ));
        let mut block = SuperBlock { free_head: 1 }.encode();
        block[1] = 0;
        disk.write_block(0, &block).unwrap();
        assert!(matches!(
            TinyFs::load(disk),
            Err(Error::CorruptFormat { addr: 0, reason: "bad magic" })
        ));
    }

    #[test]
    fn four_block_walkthrough() {
        let (_disk, fs) = mounted(1024);
        let mut file = fs.open("f").unwrap();
        assert_eq!(file.inode, 1);
        assert_eq!(fs.allocator().head().unwrap(), 2);

        let data: Vec<u8> = (0..300).map(|i| i as u8).collect();
        fs.write(&mut file, &data).unwrap();
        let inode = fs.vnode(1).read_inode().unwrap();
        assert_eq!(inode.first, 2);
        assert_eq!(inode.size, 300);
        assert_eq!(fs.vnode(1).chain(2).unwrap(), vec![2, 3]);
        assert_eq!(fs.allocator().head().unwrap(), NULL);
        let tail = fs.io.read::<DataBlock>(3).unwrap();
        assert_eq!(&tail.payload[..48], &data[PAYLOAD_SIZE..]);

        assert!(matches!(fs.open("g"), Err(Error::NoFreeBlocks)));
    }

    #[test]
    fn read_back_stops_at_size() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();
        fs.write(&mut file, &data).unwrap();
        assert_eq!(read_all(&fs, &mut file), data);
        assert!(matches!(fs.read_byte(&mut file), Err(Error::OutOfBounds)));
        fs.seek(&mut file, 0).unwrap();
        assert_eq!(read_all(&fs, &mut file), data);
    }

    #[test]
    fn exact_multiple_of_payload() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        let data = vec![0xab; PAYLOAD_SIZE * 2];
        let before = fs.free_block_count().unwrap();
        fs.write(&mut file, &data).unwrap();
        assert_eq!(fs.free_block_count().unwrap(), before - 2);
        assert_eq!(read_all(&fs, &mut file), data);
        assert_eq!(file.ptr.block, file.inode);
    }

    #[test]
    fn seek_lands_on_block_boundaries() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        let data: Vec<u8> = (0..PAYLOAD_SIZE * 3 + 10)
            .map(|i| (i / PAYLOAD_SIZE) as u8 + 1)
            .collect();
        fs.write(&mut file, &data).unwrap();
        for k in 0..4 {
            fs.seek(&mut file, (k * PAYLOAD_SIZE) as u32).unwrap();
            assert_eq!(fs.read_byte(&mut file).unwrap(), k as u8 + 1);
        }
        fs.seek(&mut file, 5).unwrap();
        assert_eq!(fs.read_byte(&mut file).unwrap(), data[5]);
    }

    #[test]
    fn seek_past_end_fails_on_read() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        fs.write(&mut file, b"hello").unwrap();
        fs.seek(&mut file, 5).unwrap();
        assert!(matches!(fs.read_byte(&mut file), Err(Error::OutOfBounds)));
        fs.seek(&mut file, 10_000).unwrap();
        assert_eq!(file.ptr.block, file.inode);
        assert!(matches!(fs.read_byte(&mut file), Err(Error::OutOfBounds)));
        fs.seek(&mut file, 4).unwrap();
        assert_eq!(fs.read_byte(&mut file).unwrap(), b'o');
    }

    #[test]
    fn rewrite_preserves_ctime_and_reuses_blocks() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        let inode = file.inode;
        fs.write(&mut file, &[1; 700]).unwrap();
        fs.vnode(inode)
            .modify_inode(|inode| inode.ctime = 42)
            .unwrap();
        let free = fs.free_block_count().unwrap();

        fs.write(&mut file, &[2; 10]).unwrap();
        assert_eq!(file.inode, inode);
        assert_eq!(fs.free_block_count().unwrap(), free + 2);
        let stat = fs.stat(&mut file).unwrap();
        assert_eq!(stat.ctime, 42);
        assert_eq!(stat.size, 10);
        assert!(stat.mtime >= stat.ctime);
        assert_eq!(read_all(&fs, &mut file), vec![2; 10]);
    }

    #[test]
    fn failed_write_keeps_old_content() {
        let (_disk, fs) = mounted(1024);
        let mut file = fs.open("f").unwrap();
        fs.write(&mut file, b"keep me").unwrap();
        let result = fs.write(&mut file, &[0; PAYLOAD_SIZE * 3]);
        assert!(matches!(
            result,
            Err(Error::InsufficientSpace { needed: 3, available: 2 })
        ));
        assert_eq!(read_all(&fs, &mut file), b"keep me");
        assert_eq!(fs.free_block_count().unwrap(), 1);
    }

    #[test]
    fn write_with_an_empty_free_list() {
        let (_disk, fs) = mounted(1024);
        let mut f = fs.open("f").unwrap();
        let mut g = fs.open("g").unwrap();
        fs.write(&mut f, &[5; PAYLOAD_SIZE]).unwrap();
        assert_eq!(fs.free_block_count().unwrap(), 0);

        assert!(matches!(fs.write(&mut g, b"x"), Err(Error::NoFreeBlocks)));
        assert_eq!(g.inode, 2);
        let stat = fs.stat(&mut g).unwrap();
        assert_eq!((stat.name.as_str(), stat.size), ("g", 0));
        assert_eq!(fs.vnode(2).read_inode().unwrap().first, NULL);
        assert_eq!(read_all(&fs, &mut f), vec![5; PAYLOAD_SIZE]);
    }

    #[test]
    fn zero_length_write() {
        let (_disk, fs) = mounted(2048);
        let mut file = fs.open("f").unwrap();
        fs.write(&mut file, b"abc").unwrap();
        let free = fs.free_block_count().unwrap();
        fs.write(&mut file, b"").unwrap();
        let inode = fs.vnode(file.inode).read_inode().unwrap();
        assert_eq!(inode.first, NULL);
        assert_eq!(inode.size, 0);
        assert_eq!(fs.free_block_count().unwrap(), free + 1);
        assert!(matches!(fs.read_byte(&mut file), Err(Error::OutOfBounds)));
    }

    #[test]
    fn oversized_write_is_rejected() {
        let (_disk, fs) = mounted(2048);
        let mut file = fs.open("f").unwrap();
        assert!(matches!(
            fs.write(&mut file, &vec![0; MAX_FILE_SIZE + 1]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn delete_returns_every_block() {
        let (_disk, fs) = mounted(4096);
        let total = fs.free_block_count().unwrap();
        let mut file = fs.open("f").unwrap();
        let inode = file.inode;
        fs.write(&mut file, &[9; 600]).unwrap();
        fs.delete(&mut file).unwrap();
        assert_eq!(fs.free_block_count().unwrap(), total);
        assert_eq!(fs.allocator().head().unwrap(), inode);
        assert!(file.is_deleted());
        assert!(fs.find(&Name::new("f").unwrap()).unwrap().is_none());
        assert!(matches!(fs.read_byte(&mut file), Err(Error::OutOfBounds)));
        fs.delete(&mut file).unwrap();
    }

    #[test]
    fn write_after_delete_recreates_the_file() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("a").unwrap();
        let before = fs.free_block_count().unwrap();
        fs.write(&mut file, &[1; 500]).unwrap();
        fs.delete(&mut file).unwrap();
        fs.write(&mut file, &[2; 300]).unwrap();
        assert_eq!(
            fs.free_block_count().unwrap(),
            before - needed_blocks(300)
        );
        assert!(fs.find(&Name::new("a").unwrap()).unwrap().is_some());
        assert_eq!(read_all(&fs, &mut file), vec![2; 300]);
    }

    #[test]
    fn corrupt_chain_is_reported() {
        let (_disk, fs) = mounted(4096);
        let mut file = fs.open("f").unwrap();
        fs.write(&mut file, &[3; 600]).unwrap();
        let second = fs.vnode(file.inode).nth_block(1).unwrap().unwrap();
        fs.io.write(second, &FreeBlock { next: 0 }).unwrap();
        assert!(matches!(
            fs.delete(&mut file),
            Err(Error::CorruptFormat { .. })
        ));
    }

    #[test]
    fn files_do_not_share_blocks() {
        let (_disk, fs) = mounted(8192);
        let mut a = fs.open("a").unwrap();
        let mut b = fs.open("b").unwrap();
        let data_a = vec![b'a'; 700];
        let data_b = vec![b'b'; 400];
        fs.write(&mut a, &data_a).unwrap();
        fs.write(&mut b, &data_b).unwrap();
        fs.write(&mut a, &data_a[..260]).unwrap();
        assert_eq!(read_all(&fs, &mut a), &data_a[..260]);
        assert_eq!(read_all(&fs, &mut b), data_b);
        let names: Vec<String> = fs
            .list()
            .unwrap()
            .into_iter()
            .map(|(_, inode)| inode.name.to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_owned()) && names.contains(&"b".to_owned()));
    }

    #[test]
    fn read_updates_access_time_only() {
        let (_disk, fs) = mounted(2048);
        let mut file = fs.open("f").unwrap();
        fs.write(&mut file, b"xy").unwrap();
        fs.vnode(file.inode)
            .modify_inode(|inode| inode.touch(Touch::all(), 1))
            .unwrap();
        assert_eq!(fs.stat(&mut file).unwrap().atime, 1);
        fs.read_byte(&mut file).unwrap();
        let stat = fs.stat(&mut file).unwrap();
        assert!(stat.atime > 1);
        assert_eq!(stat.ctime, 1);
        assert_eq!(stat.mtime, 1);
    }
}
