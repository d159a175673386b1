//! hfsdump - inspect the contents of an HFS+ volume.
//!
//! `hfsdump <device>` prints the volume header, `hfsdump <device>
//! stat <path|cnid>` prints a catalog record, `hfsdump <device>
//! read <path|cnid>` writes file bytes (or a directory listing) to
//! stdout.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hfsplus_read::ondisk::{
    hfs_time_to_unix, VOL_BADBLOCKS, VOL_CNIDS_RECYCLED, VOL_HWLOCK, VOL_INCONSISTENT,
    VOL_JOURNALED, VOL_NOCACHE, VOL_SWLOCK, VOL_UNMOUNTED,
};
use hfsplus_read::{CatalogBody, CatalogRecord, Cnid, ForkKind, Volume, VolumeOptions};

#[derive(Parser)]
#[command(name = "hfsdump", version, about = "Inspect the contents of an HFS+ volume")]
struct Args {
    /// Device or disk image holding the volume
    device: PathBuf,

    /// What to do with the target
    #[arg(value_enum, requires = "target")]
    command: Option<Command>,

    /// Path inside the volume, or a bare CNID
    target: Option<String>,

    /// Byte offset of the volume inside the device
    #[arg(long, default_value_t = 0)]
    offset: u64,
}

#[derive(Copy, Clone, ValueEnum)]
enum Command {
    Stat,
    Read,
}

fn fourcc(value: u32) -> String {
    value
        .to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}

fn print_volume(volume: &Volume) -> Result<()> {
    let vh = volume.header();
    println!("Volume name: {}", volume.name()?);
    println!("Journaled? {}", volume.journaled() as u8);
    println!("Dirty? {}", volume.dirty() as u8);
    println!("Offset: {}", volume.start_offset());
    println!("volume header:");
    println!(
        "signature: {}",
        String::from_utf8_lossy(&vh.signature.to_be_bytes())
    );
    println!("version: {}", vh.version);
    println!(
        "attributes: hwlock {} unmounted {} badblocks {} nocache {} dirty {} cnids recycled {} journaled {} swlock {}",
        vh.attribute(VOL_HWLOCK) as u8,
        vh.attribute(VOL_UNMOUNTED) as u8,
        vh.attribute(VOL_BADBLOCKS) as u8,
        vh.attribute(VOL_NOCACHE) as u8,
        vh.attribute(VOL_INCONSISTENT) as u8,
        vh.attribute(VOL_CNIDS_RECYCLED) as u8,
        vh.attribute(VOL_JOURNALED) as u8,
        vh.attribute(VOL_SWLOCK) as u8,
    );
    println!("last_mounting_version: {}", fourcc(vh.last_mounted_version));
    println!("journal_info_block: {}", vh.journal_info_block);
    println!("date_created: {}", hfs_time_to_unix(vh.date_created));
    println!("date_modified: {}", hfs_time_to_unix(vh.date_modified));
    println!("date_backedup: {}", hfs_time_to_unix(vh.date_backedup));
    println!("date_checked: {}", hfs_time_to_unix(vh.date_checked));
    println!("file_count: {}", vh.file_count);
    println!("folder_count: {}", vh.folder_count);
    println!("block_size: {}", vh.block_size);
    println!("total_blocks: {}", vh.total_blocks);
    println!("free_blocks: {}", vh.free_blocks);
    println!("next_alloc_block: {}", vh.next_alloc_block);
    println!("rsrc_clump_size: {}", vh.rsrc_clump_size);
    println!("data_clump_size: {}", vh.data_clump_size);
    println!("next_cnid: {}", vh.next_cnid);
    println!("write_count: {}", vh.write_count);
    println!("encodings: {}", vh.encodings);
    println!("finderinfo:");
    println!("\tBoot directory ID: {}", vh.finder_info[0]);
    println!("\tStartup parent directory ID: {}", vh.finder_info[1]);
    println!("\tDisplay directory ID: {}", vh.finder_info[2]);
    println!("\tOS classic system directory ID: {}", vh.finder_info[3]);
    println!("\tOS X system directory ID: {}", vh.finder_info[5]);
    println!(
        "\tVolume unique ID: {:x}",
        ((vh.finder_info[6] as u64) << 32) | vh.finder_info[7] as u64
    );
    Ok(())
}

fn print_record(volume: &Volume, record: &CatalogRecord) -> Result<()> {
    if let Some(cnid) = record.cnid() {
        println!("path: {}", volume.path_of(cnid)?);
    }
    match &record.body {
        CatalogBody::Folder(folder) => {
            println!("type: folder");
            println!("flags: {}", folder.flags);
            println!("cnid: {}", folder.cnid);
            println!("date_created: {}", hfs_time_to_unix(folder.date_created));
            println!(
                "date_content_mod: {}",
                hfs_time_to_unix(folder.date_content_mod)
            );
            println!(
                "date_attrib_mod: {}",
                hfs_time_to_unix(folder.date_attrib_mod)
            );
            println!("date_accessed: {}", hfs_time_to_unix(folder.date_accessed));
            println!("date_backedup: {}", hfs_time_to_unix(folder.date_backedup));
            println!("encoding: {}", folder.text_encoding);
            println!("permissions.owner_id: {}", folder.permissions.owner_id);
            println!("permissions.group_id: {}", folder.permissions.group_id);
            println!("permissions.admin_flags: {}", folder.permissions.admin_flags);
            println!("permissions.owner_flags: {}", folder.permissions.owner_flags);
            println!("permissions.file_mode: {:o}", folder.permissions.file_mode);
            println!("permissions.special: {}", folder.permissions.special);
            println!("valence: {}", folder.valence);
        }
        CatalogBody::File(file) => {
            println!("type: file");
            println!("flags: {}", file.flags);
            println!("cnid: {}", file.cnid);
            println!("date_created: {}", hfs_time_to_unix(file.date_created));
            println!(
                "date_content_mod: {}",
                hfs_time_to_unix(file.date_content_mod)
            );
            println!("date_attrib_mod: {}", hfs_time_to_unix(file.date_attrib_mod));
            println!("date_accessed: {}", hfs_time_to_unix(file.date_accessed));
            println!("date_backedup: {}", hfs_time_to_unix(file.date_backedup));
            println!("encoding: {}", file.text_encoding);
            println!("permissions.owner_id: {}", file.permissions.owner_id);
            println!("permissions.group_id: {}", file.permissions.group_id);
            println!("permissions.admin_flags: {}", file.permissions.admin_flags);
            println!("permissions.owner_flags: {}", file.permissions.owner_flags);
            println!("permissions.file_mode: {:o}", file.permissions.file_mode);
            println!("permissions.special: {}", file.permissions.special);
            println!("user_info.file_type: {}", fourcc(file.user_info.file_type));
            println!(
                "user_info.file_creator: {}",
                fourcc(file.user_info.file_creator)
            );
            println!("user_info.finder_flags: {}", file.user_info.finder_flags);
            println!("data_fork.logical_size: {}", file.data_fork.logical_size);
            println!("rsrc_fork.logical_size: {}", file.rsrc_fork.logical_size);
        }
        _ => println!("type: thread"),
    }
    Ok(())
}

fn resolve(volume: &Volume, target: &str) -> Result<(CatalogRecord, ForkKind)> {
    if let Ok(cnid) = target.parse::<Cnid>() {
        let record = volume
            .catalog()
            .find_by_cnid(cnid)
            .with_context(|| format!("CNID lookup failure: {cnid}"))?;
        return Ok((record, ForkKind::Data));
    }
    volume
        .lookup(target)
        .with_context(|| format!("path lookup failure: {target}"))
}

fn dump(volume: &Volume, record: &CatalogRecord, fork: ForkKind) -> Result<()> {
    match &record.body {
        CatalogBody::Folder(folder) => {
            for (name, _) in volume.readdir(folder.cnid)? {
                println!("{name}");
            }
        }
        CatalogBody::File(file) => {
            let reader = volume.fork_reader(file, fork)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            let mut buf = [0u8; 4096];
            let mut offset = 0u64;
            loop {
                let got = reader.read_at(&mut buf, offset)?;
                if got == 0 {
                    break;
                }
                out.write_all(&buf[..got])?;
                offset += got as u64;
            }
        }
        _ => anyhow::bail!("target has no readable content"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let volume = Volume::open_with(
        &args.device,
        VolumeOptions {
            offset: args.offset,
            ..VolumeOptions::default()
        },
    )
    .with_context(|| format!("couldn't open volume {}", args.device.display()))?;

    let Some(command) = args.command else {
        return print_volume(&volume);
    };
    let target = args.target.as_deref().unwrap_or("/");
    let (record, fork) = resolve(&volume, target)?;
    match command {
        Command::Stat => print_record(&volume, &record),
        Command::Read => dump(&volume, &record, fork),
    }
}
