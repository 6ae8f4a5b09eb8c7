use core::{fmt, str::FromStr};

use log::debug;

use crate::{
    constant::{BlockAddr, NULL},
    error::{Error, Result},
    layout::Name,
};

/// 文件描述符: 槽位号加上槽位的代数
///
/// 槽位被关闭后代数加一, 之前发出的描述符随即失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd {
    slot: u32,
    generation: u32,
}

impl Fd {
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.generation)
    }
}

impl FromStr for Fd {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (slot, generation) = s.split_once('.').ok_or(Error::InvalidArgument(
            "descriptor must look like <slot>.<generation>",
        ))?;
        let parse = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| Error::InvalidArgument("descriptor is not a number"))
        };
        Ok(Self {
            slot: parse(slot)?,
            generation: parse(generation)?,
        })
    }
}

/// 文件指针: 所在块和块内负载偏移
///
/// `block` 等于文件自己的inode块号时表示已经到达文件末尾
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePtr {
    pub block: BlockAddr,
    pub offset: usize,
}

/// 一个打开的文件
#[derive(Debug, Clone)]
pub struct OpenFile {
    pub name: Name,
    /// 文件被删除后为 `NULL`
    pub inode: BlockAddr,
    pub size: u16,
    pub ptr: FilePtr,
    /// 指针对应的文件内字节偏移
    pub pos: u32,
    /// 上次和磁盘对齐时文件系统的修改计数
    pub epoch: u64,
}

impl OpenFile {
    pub fn new(name: Name, inode: BlockAddr, size: u16, first: BlockAddr) -> Self {
        let mut file = Self {
            name,
            inode,
            size,
            ptr: FilePtr {
                block: inode,
                offset: 0,
            },
            pos: 0,
            epoch: 0,
        };
        file.rewind(first);
        file
    }

    /// 把指针放回文件开头, 空文件直接指向末尾
    pub fn rewind(&mut self, first: BlockAddr) {
        self.ptr = FilePtr {
            block: if self.size == 0 || first == NULL {
                self.inode
            } else {
                first
            },
            offset: 0,
        };
        self.pos = 0;
    }

    pub fn at_eof(&self) -> bool {
        self.ptr.block == self.inode || self.pos >= self.size as u32
    }

    pub fn is_deleted(&self) -> bool {
        self.inode == NULL
    }

    /// 删除之后只保留名字
    pub fn reset(&mut self) {
        self.inode = NULL;
        self.size = 0;
        self.ptr = FilePtr {
            block: NULL,
            offset: 0,
        };
        self.pos = 0;
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    file: Option<OpenFile>,
}

/// 容量有限的打开文件表
#[derive(Debug)]
pub struct OpenFileTable {
    slots: Vec<Slot>,
    recycle_pool: Vec<u32>,
    live: usize,
    limit: usize,
}

impl OpenFileTable {
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            recycle_pool: Vec::new(),
            live: 0,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_full(&self) -> bool {
        self.live >= self.limit
    }

    pub fn insert(&mut self, file: OpenFile) -> Result<Fd> {
        if self.is_full() {
            return Err(Error::TooManyFiles);
        }
        let slot = match self.recycle_pool.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u32
            }
        };
        let entry = &mut self.slots[slot as usize];
        entry.file = Some(file);
        self.live += 1;
        let fd = Fd {
            slot,
            generation: entry.generation,
        };
        debug!("fd {fd} -> {:?}", entry.file.as_ref().map(|file| file.name));
        Ok(fd)
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(fd.slot as usize)
            .filter(|slot| slot.generation == fd.generation)
            .and_then(|slot| slot.file.as_mut())
            .ok_or(Error::BadDescriptor)
    }

    pub fn close(&mut self, fd: Fd) -> Result<OpenFile> {
        let slot = self
            .slots
            .get_mut(fd.slot as usize)
            .filter(|slot| slot.generation == fd.generation)
            .ok_or(Error::BadDescriptor)?;
        let file = slot.file.take().ok_or(Error::BadDescriptor)?;
        slot.generation = slot.generation.wrapping_add(1);
        self.recycle_pool.push(fd.slot);
        self.live -= 1;
        debug!("close fd {fd}");
        Ok(file)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Fd, &OpenFile)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry.file.as_ref().map(|file| {
                (
                    Fd {
                        slot: slot as u32,
                        generation: entry.generation,
                    },
                    file,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> OpenFile {
        OpenFile::new(Name::new(name).unwrap(), 1, 0, NULL)
    }

    #[test]
    fn empty_file_starts_at_eof() {
        let file = file("a");
        assert_eq!(file.ptr.block, file.inode);
        assert!(file.at_eof());

        let full = OpenFile::new(Name::new("b").unwrap(), 4, 10, 5);
        assert_eq!(full.ptr, FilePtr { block: 5, offset: 0 });
        assert!(!full.at_eof());
    }

    #[test]
    fn table_is_bounded() {
        let mut table = OpenFileTable::new(2);
        let a = table.insert(file("a")).unwrap();
        table.insert(file("b")).unwrap();
        assert!(matches!(table.insert(file("c")), Err(Error::TooManyFiles)));
        table.close(a).unwrap();
        assert!(table.insert(file("c")).is_ok());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn double_close_is_bad_descriptor() {
        let mut table = OpenFileTable::new(4);
        let fd = table.insert(file("a")).unwrap();
        table.close(fd).unwrap();
        assert!(matches!(table.close(fd), Err(Error::BadDescriptor)));
        assert!(matches!(table.get_mut(fd), Err(Error::BadDescriptor)));
    }

    #[test]
    fn stale_descriptor_is_rejected_after_reuse() {
        let mut table = OpenFileTable::new(4);
        let old = table.insert(file("a")).unwrap();
        table.close(old).unwrap();
        let new = table.insert(file("b")).unwrap();
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
        assert!(matches!(table.get_mut(old), Err(Error::BadDescriptor)));
        assert_eq!(table.get_mut(new).unwrap().name, Name::new("b").unwrap());
    }

    #[test]
    fn descriptor_text_form() {
        let mut table = OpenFileTable::new(4);
        let fd = table.insert(file("a")).unwrap();
        assert_eq!(fd.to_string().parse::<Fd>().unwrap(), fd);
        assert!(matches!("3".parse::<Fd>(), Err(Error::InvalidArgument(_))));
        assert!(matches!("x.1".parse::<Fd>(), Err(Error::InvalidArgument(_))));
    }
}
