use std::{path::Path, sync::Arc};

use log::info;

use crate::{
    block_dev::BlockDevice,
    config::Config,
    constant::{Block, BlockAddr},
    disk::FileDisk,
    error::{Error, Result},
    fd::{Fd, OpenFileTable},
    tfs::{Stat, TinyFs},
};

struct Mounted {
    fs: TinyFs,
    files: OpenFileTable,
}

/// 一次挂载的生命周期: 最多同时挂载一个文件系统, 打开文件表随挂载创建和销毁
pub struct Session {
    config: Config,
    mounted: Option<Mounted>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            mounted: None,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// 以只读方式打开已有镜像并挂载
    pub fn mount(&mut self, path: impl AsRef<Path>) -> Result<()> {
        if self.is_mounted() {
            return Err(Error::AlreadyMounted);
        }
        let path = path.as_ref();
        let disk = FileDisk::open(path, 0)?;
        self.mount_device(Arc::new(disk))?;
        info!("mount {}", path.display());
        Ok(())
    }

    pub fn mount_device(&mut self, device: Arc<dyn BlockDevice>) -> Result<()> {
        if self.is_mounted() {
            return Err(Error::AlreadyMounted);
        }
        let fs = TinyFs::load(device)?;
        self.mounted = Some(Mounted {
            fs,
            files: OpenFileTable::new(self.config.max_open_files),
        });
        Ok(())
    }

    /// 刷盘后卸载, 所有描述符随之失效
    pub fn unmount(&mut self) -> Result<()> {
        let mounted = self.mounted.take().ok_or(Error::NotMounted)?;
        info!("unmount, {} files left open", mounted.files.len());
        mounted.fs.sync()
    }

    fn mounted(&self) -> Result<&Mounted> {
        self.mounted.as_ref().ok_or(Error::NotMounted)
    }

    fn mounted_mut(&mut self) -> Result<&mut Mounted> {
        self.mounted.as_mut().ok_or(Error::NotMounted)
    }

    pub fn open_file(&mut self, name: &str) -> Result<Fd> {
        let Mounted { fs, files } = self.mounted_mut()?;
        if files.is_full() {
            return Err(Error::TooManyFiles);
        }
        let file = fs.open(name)?;
        files.insert(file)
    }

    pub fn close_file(&mut self, fd: Fd) -> Result<()> {
        self.mounted_mut()?.files.close(fd).map(|_| ())
    }

    pub fn write_file(&mut self, fd: Fd, data: &[u8]) -> Result<()> {
        let Mounted { fs, files } = self.mounted_mut()?;
        fs.write(files.get_mut(fd)?, data)
    }

    pub fn delete_file(&mut self, fd: Fd) -> Result<()> {
        let Mounted { fs, files } = self.mounted_mut()?;
        fs.delete(files.get_mut(fd)?)
    }

    pub fn read_byte(&mut self, fd: Fd) -> Result<u8> {
        let Mounted { fs, files } = self.mounted_mut()?;
        fs.read_byte(files.get_mut(fd)?)
    }

    pub fn seek(&mut self, fd: Fd, offset: u32) -> Result<()> {
        let Mounted { fs, files } = self.mounted_mut()?;
        fs.seek(files.get_mut(fd)?, offset)
    }

    pub fn stat_file(&mut self, fd: Fd) -> Result<Stat> {
        let Mounted { fs, files } = self.mounted_mut()?;
        fs.stat(files.get_mut(fd)?)
    }

    pub fn free_block_count(&self) -> Result<usize> {
        self.mounted()?.fs.free_block_count()
    }

    /// 磁盘上所有文件, 按inode块号排序
    pub fn list_files(&self) -> Result<Vec<Stat>> {
        let inodes = self.mounted()?.fs.list()?;
        Ok(inodes
            .into_iter()
            .map(|(_, inode)| Stat {
                size: inode.size,
                name: inode.name.to_string(),
                ctime: inode.ctime,
                atime: inode.atime,
                mtime: inode.mtime,
            })
            .collect())
    }

    pub fn dump_block(&self, addr: BlockAddr) -> Result<Block> {
        self.mounted()?.fs.block(addr)
    }

    /// 当前打开的描述符和对应的文件名
    pub fn open_files(&self) -> Result<Vec<(Fd, String)>> {
        Ok(self
            .mounted()?
            .files
            .iter()
            .map(|(fd, file)| (fd, file.name.to_string()))
            .collect())
    }
}
