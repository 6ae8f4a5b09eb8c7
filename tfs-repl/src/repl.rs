use std::path::Path;
use std::process::exit;

use crate::error::Result;
use anyhow::anyhow;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tfs::{
    constant::{BlockAddr, DEFAULT_DISK_NAME, DEFAULT_DISK_SIZE},
    mkfs, Error, Fd, Session,
};

pub struct Repl {
    rl: DefaultEditor,
    session: Session,
    promot: String,
}

impl Repl {
    pub fn new() -> Result<Self> {
        println!("welcome to the TinyFS repl!");
        let mut rl = DefaultEditor::new()?;
        let mut session = Session::new();
        Self::load_fs(&mut rl, &mut session)?;
        Ok(Self {
            rl,
            session,
            promot: "tfs > ".to_owned(),
        })
    }

    fn load_fs(rl: &mut DefaultEditor, session: &mut Session) -> Result<()> {
        let path = match rl.readline(&format!(
            "input the path where the disk image is located (default {DEFAULT_DISK_NAME})> "
        )) {
            Ok(path) if path.trim().is_empty() => DEFAULT_DISK_NAME.to_owned(),
            Ok(path) => path.trim().to_owned(),
            Err(err) => return Err(anyhow!("readline error: {}", err)),
        };
        println!("loading file system from {path}...");
        match session.mount(&path) {
            Ok(()) => {
                println!("file system loaded!");
                Ok(())
            }
            Err(err @ (Error::CorruptFormat { .. } | Error::DeviceIO(_))) => {
                println!("cannot load `{path}`: {err}");
                match rl.readline("unvalid file system! format it or exit? (y/n)> ") {
                    Ok(input) if input.trim() == "y" => {
                        Self::format(&path)?;
                        session.mount(&path)?;
                        println!("file system loaded!");
                        Ok(())
                    }
                    Ok(_) => {
                        println!("bye!");
                        exit(0);
                    }
                    Err(err) => Err(anyhow!("readline error: {}", err)),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn format(path: impl AsRef<Path>) -> Result<()> {
        println!("formatting...");
        mkfs(path, DEFAULT_DISK_SIZE)?;
        Ok(())
    }

    pub fn run(&mut self) {
        loop {
            match self.rl.readline(&self.promot) {
                Ok(line) => {
                    if let Err(err) = self.exec(&line) {
                        println!("error: {}", err);
                    }
                }
                Err(ReadlineError::Eof | ReadlineError::Interrupted) => {
                    self.exit();
                }
                Err(err) => {
                    println!("readline error: {}", err);
                    exit(1);
                }
            }
        }
    }

    fn exec(&mut self, line: &str) -> Result<()> {
        fn matched<'a>(line: &'a str, command: &str) -> Option<&'a str> {
            let mut split = line.splitn(2, char::is_whitespace);
            if split.next() == Some(command) {
                Some(split.next().unwrap_or("").trim())
            } else {
                None
            }
        }

        fn matched_noarg(line: &str, command: &str) -> Result<bool> {
            match matched(line, command) {
                Some("") => Ok(true),
                Some(_) => Err(anyhow!("too many arguments")),
                None => Ok(false),
            }
        }

        let line = line.trim();
        if line.is_empty() {
            Ok(())
        } else if let Some(leftover) = matched(line, "open") {
            let name = Self::parse_one(leftover, "name")?;
            self.open(name)
        } else if let Some(leftover) = matched(line, "close") {
            let fd = Self::parse_fd(leftover)?;
            self.close(fd)
        } else if let Some(leftover) = matched(line, "write") {
            let fd = Self::parse_fd(leftover)?;
            self.write(fd)
        } else if let Some(leftover) = matched(line, "read") {
            let (fd, size) = self.parse_read(leftover)?;
            self.read(fd, size)
        } else if let Some(leftover) = matched(line, "seek") {
            let (fd, offset) = self.parse_seek(leftover)?;
            self.seek(fd, offset)
        } else if let Some(leftover) = matched(line, "rm") {
            let fd = Self::parse_fd(leftover)?;
            self.rm(fd)
        } else if let Some(leftover) = matched(line, "stat") {
            let fd = Self::parse_fd(leftover)?;
            self.stat(fd)
        } else if let Some(leftover) = matched(line, "hexdump") {
            let addr = Self::parse_one(leftover, "block")?.parse::<BlockAddr>()?;
            self.hexdump(addr)
        } else if matched_noarg(line, "ls")? {
            self.ls()
        } else if matched_noarg(line, "free")? {
            self.free()
        } else if matched_noarg(line, "exit")? {
            self.exit()
        } else {
            Err(anyhow!("unknown command"))
        }
    }

    fn parse_one<'a>(leftover: &'a str, what: &str) -> Result<&'a str> {
        let mut split = leftover.split_whitespace();
        let arg = split.next().ok_or_else(|| anyhow!("missing {what}"))?;
        if split.next().is_some() {
            Err(anyhow!("too many arguments"))
        } else {
            Ok(arg)
        }
    }

    fn parse_fd(leftover: &str) -> Result<Fd> {
        Ok(Self::parse_one(leftover, "fd")?.parse()?)
    }

    fn open(&mut self, name: &str) -> Result<()> {
        let fd = self.session.open_file(name)?;
        println!("open `{name}` with fd {fd}");
        Ok(())
    }

    fn close(&mut self, fd: Fd) -> Result<()> {
        self.session.close_file(fd)?;
        println!("close fd {fd}");
        Ok(())
    }

    fn write(&mut self, fd: Fd) -> Result<()> {
        let mut buf = String::new();
        while let Ok(line) = self.rl.readline("here you write> ") {
            buf.push_str(&line);
            buf.push('\n');
        }
        self.session.write_file(fd, buf.as_bytes())?;
        println!("write {} bytes to fd {fd}", buf.len());
        Ok(())
    }

    fn parse_read(&mut self, leftover: &str) -> Result<(Fd, Option<usize>)> {
        let mut split = leftover.split_whitespace();
        let fd: Fd = split
            .next()
            .map(|fd| fd.parse())
            .ok_or_else(|| anyhow!("missing fd"))??;
        let size = split.next().map(|size| size.parse()).transpose()?;

        if split.next().is_some() {
            Err(anyhow!("too many arguments"))
        } else {
            Ok((fd, size))
        }
    }

    // 不给长度时一直读到文件末尾
    fn read(&mut self, fd: Fd, size: Option<usize>) -> Result<()> {
        let mut buf = Vec::new();
        while size.map_or(true, |size| buf.len() < size) {
            match self.session.read_byte(fd) {
                Ok(byte) => buf.push(byte),
                Err(Error::OutOfBounds) => break,
                Err(err) => return Err(err.into()),
            }
        }
        println!("{}", String::from_utf8_lossy(&buf));
        println!("read {} bytes from fd {fd}", buf.len());
        Ok(())
    }

    fn parse_seek(&mut self, leftover: &str) -> Result<(Fd, u32)> {
        let mut split = leftover.split_whitespace();
        let fd = split
            .next()
            .ok_or_else(|| anyhow!("missing fd"))?
            .parse::<Fd>()?;
        let offset = split
            .next()
            .ok_or_else(|| anyhow!("missing offset"))?
            .parse::<u32>()?;
        if split.next().is_some() {
            Err(anyhow!("too many arguments"))
        } else {
            Ok((fd, offset))
        }
    }

    fn seek(&mut self, fd: Fd, offset: u32) -> Result<()> {
        self.session.seek(fd, offset)?;
        println!("seek fd {fd} to {offset}");
        Ok(())
    }

    fn rm(&mut self, fd: Fd) -> Result<()> {
        self.session.delete_file(fd)?;
        println!("remove the file behind fd {fd}");
        Ok(())
    }

    fn stat(&mut self, fd: Fd) -> Result<()> {
        let stat = self.session.stat_file(fd)?;
        println!("name:  {}", stat.name);
        println!("size:  {}", stat.size);
        println!("ctime: {}", stat.ctime);
        println!("atime: {}", stat.atime);
        println!("mtime: {}", stat.mtime);
        Ok(())
    }

    fn ls(&mut self) -> Result<()> {
        for stat in self.session.list_files()? {
            println!("{:<8} {:>6}", stat.name, stat.size);
        }
        for (fd, name) in self.session.open_files()? {
            println!("fd {fd} -> `{name}`");
        }
        Ok(())
    }

    fn free(&mut self) -> Result<()> {
        println!("{} free blocks", self.session.free_block_count()?);
        Ok(())
    }

    fn hexdump(&mut self, addr: BlockAddr) -> Result<()> {
        let block = self.session.dump_block(addr)?;
        for (row, chunk) in block.chunks(16).enumerate() {
            let hex: Vec<String> = chunk
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect();
            let text: String = chunk
                .iter()
                .map(|&byte| {
                    if byte.is_ascii_graphic() {
                        byte as char
                    } else {
                        '.'
                    }
                })
                .collect();
            println!("{:04x}  {}  {}", row * 16, hex.join(" "), text);
        }
        Ok(())
    }

    fn exit(&mut self) -> ! {
        if let Err(err) = self.session.unmount() {
            println!("error: {}", err);
        }
        println!("bye!");
        exit(0);
    }
}
