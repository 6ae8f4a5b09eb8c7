use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use log::{debug, trace};
use spin::Mutex;

use crate::{
    block_dev::BlockDevice,
    constant::{Block, BlockAddr, BLOCK_SIZE},
    error::{Error, Result},
};

/// 把请求的字节数换算成整块数, 0 表示打开已有的镜像
fn whole_blocks(size: u64) -> Result<Option<u64>> {
    match size {
        0 => Ok(None),
        size if size < BLOCK_SIZE as u64 => Err(Error::InvalidArgument(
            "device size is smaller than one block",
        )),
        size => Ok(Some(size / BLOCK_SIZE as u64)),
    }
}

fn offset_of(block_addr: BlockAddr) -> u64 {
    block_addr as u64 * BLOCK_SIZE as u64
}

/// 宿主机上的一个普通文件, 作为磁盘镜像
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    blocks: u64,
}

impl FileDisk {
    /// `size == 0` 打开已有镜像且不做任何修改, 否则创建或截断到 `size` 向下取整的整块大小
    pub fn open(path: impl AsRef<Path>, size: u64) -> Result<Self> {
        let path = path.as_ref();
        let (file, blocks) = match whole_blocks(size)? {
            None => {
                let file = OpenOptions::new().read(true).write(true).open(path)?;
                let blocks = file.metadata()?.len() / BLOCK_SIZE as u64;
                (file, blocks)
            }
            Some(blocks) => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                file.set_len(blocks * BLOCK_SIZE as u64)?;
                (file, blocks)
            }
        };
        debug!("open disk image {} ({blocks} blocks)", path.display());
        Ok(Self {
            file: Mutex::new(file),
            blocks,
        })
    }

    fn check(&self, block_addr: BlockAddr) -> Result<()> {
        if block_addr as u64 >= self.blocks {
            Err(Error::OutOfBounds)
        } else {
            Ok(())
        }
    }
}

impl BlockDevice for FileDisk {
    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_block(&self, block_addr: BlockAddr, buf: &mut Block) -> Result<()> {
        self.check(block_addr)?;
        trace!("read block {block_addr}");
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset_of(block_addr)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_block(&self, block_addr: BlockAddr, buf: &Block) -> Result<()> {
        self.check(block_addr)?;
        trace!("write block {block_addr}");
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset_of(block_addr)))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

/// 内存中的磁盘, 主要给测试用
#[derive(Debug)]
pub struct RamDisk(Mutex<Vec<u8>>);

impl RamDisk {
    pub fn new(size: u64) -> Result<Self> {
        let blocks = whole_blocks(size)?
            .ok_or(Error::InvalidArgument("a ram disk cannot be reopened"))?;
        Ok(Self(Mutex::new(vec![0; blocks as usize * BLOCK_SIZE])))
    }

    /// 整个设备的原始字节
    pub fn image(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    fn range(&self, block_addr: BlockAddr) -> Result<core::ops::Range<usize>> {
        let start = offset_of(block_addr) as usize;
        if block_addr as u64 >= self.block_count() {
            Err(Error::OutOfBounds)
        } else {
            Ok(start..start + BLOCK_SIZE)
        }
    }
}

impl BlockDevice for RamDisk {
    fn block_count(&self) -> u64 {
        (self.0.lock().len() / BLOCK_SIZE) as u64
    }

    fn read_block(&self, block_addr: BlockAddr, buf: &mut Block) -> Result<()> {
        let range = self.range(block_addr)?;
        buf.copy_from_slice(&self.0.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_addr: BlockAddr, buf: &Block) -> Result<()> {
        let range = self.range(block_addr)?;
        self.0.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
