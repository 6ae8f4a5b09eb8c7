use std::{fs::read_dir, path::Path};

use anyhow::{anyhow, Context, Result};
use clap::{App, Arg};
use log::{info, warn};
use tfs::{
    constant::{DEFAULT_DISK_NAME, DEFAULT_DISK_SIZE, MAX_FILE_SIZE, NAME_LEN_LIMIT},
    mkfs, Session,
};

/// 把 `source` 目录下名字不超过8字节的普通文件逐个写进镜像
fn import(session: &mut Session, source: &Path) -> Result<usize> {
    let mut imported = 0;
    let entries =
        read_dir(source).with_context(|| format!("cannot read {}", source.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = match entry.file_name().into_string() {
            Ok(name) if !name.is_empty() && name.len() <= NAME_LEN_LIMIT => name,
            Ok(name) => {
                warn!("skip `{name}`: name must be 1 to {NAME_LEN_LIMIT} bytes");
                continue;
            }
            Err(name) => {
                warn!("skip {name:?}: name is not utf-8");
                continue;
            }
        };
        let data = std::fs::read(entry.path())?;
        if data.len() > MAX_FILE_SIZE {
            warn!("skip `{name}`: {} bytes is too large", data.len());
            continue;
        }
        let fd = session.open_file(&name)?;
        session.write_file(fd, &data)?;
        session.close_file(fd)?;
        info!("import `{name}` ({} bytes)", data.len());
        imported += 1;
    }
    Ok(imported)
}

fn main() -> Result<()> {
    tfs::logging::init();
    let matches = App::new("TinyFS mkfs")
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .default_value(DEFAULT_DISK_NAME)
                .help("Disk image to create"),
        )
        .arg(
            Arg::with_name("size")
                .short("s")
                .long("size")
                .takes_value(true)
                .help("Image size in bytes, rounded down to whole blocks"),
        )
        .arg(
            Arg::with_name("source")
                .short("d")
                .long("source")
                .takes_value(true)
                .help("Directory whose files are copied into the new image"),
        )
        .get_matches();
    let image = matches
        .value_of("image")
        .ok_or_else(|| anyhow!("missing image path"))?;
    let size = match matches.value_of("size") {
        Some(size) => size
            .parse::<u64>()
            .with_context(|| format!("bad size `{size}`"))?,
        None => DEFAULT_DISK_SIZE,
    };

    mkfs(image, size)?;
    let mut session = Session::new();
    session.mount(image)?;
    if let Some(source) = matches.value_of("source") {
        let imported = import(&mut session, Path::new(source))?;
        println!("imported {imported} files from {source}");
    }
    for stat in session.list_files()? {
        println!("name = {}, size = {}", stat.name, stat.size);
    }
    println!("{image}: {} free blocks", session.free_block_count()?);
    session.unmount()?;
    Ok(())
}
