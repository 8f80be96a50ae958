use crate::disk::{BlockDevice, RamDisk};
use crate::error::{Error::*, Result};
use crate::fs::{DInode, DirEnt, SuperBlock, BPB, BSIZE, FSMAGIC, IPB, ROOTINO};
use crate::param::LOGSIZE;
use crate::stat::FileType;
use log::debug;
use std::mem::size_of;
use std::sync::Arc;
use zerocopy::AsBytes;

// Disk layout:
// [ boot block | sb block | log | inode blocks | free bit map | data blocks ]
//
// The log holds a header block plus LOGSIZE blocks. The root directory
// gets inode ROOTINO and the first data block.

// Write an empty file system holding only the root directory.
pub fn mkfs(disk: &dyn BlockDevice, ninodes: usize) -> Result<SuperBlock> {
    let fssize = disk.size() as usize;
    let nbitmap = fssize / (BSIZE * 8) + 1;
    let ninodeblocks = ninodes / IPB + 1;
    let nlog = LOGSIZE + 1;
    let nmeta = 2 + nlog + ninodeblocks + nbitmap;

    if ninodes < 2 || ninodes > u16::MAX as usize || fssize <= nmeta {
        return Err(InvalidArgument);
    }

    let sb = SuperBlock {
        magic: FSMAGIC,
        size: fssize as u32,
        nblocks: (fssize - nmeta) as u32,
        ninodes: ninodes as u32,
        nlog: nlog as u32,
        logstart: 2,
        inodestart: (2 + nlog) as u32,
        bmapstart: (2 + nlog + ninodeblocks) as u32,
    };
    debug!(
        "mkfs: nmeta {} (boot, super, log blocks {} inode blocks {}, bitmap blocks {}) blocks {} total {}",
        nmeta, nlog, ninodeblocks, nbitmap, sb.nblocks, fssize
    );

    let zeroes = [0u8; BSIZE];
    for b in 0..fssize as u32 {
        disk.write(b, &zeroes);
    }

    let mut buf = [0u8; BSIZE];
    buf[..size_of::<SuperBlock>()].copy_from_slice(sb.as_bytes());
    disk.write(1, &buf);

    // root directory: "." and "..", both itself.
    let rootblock = nmeta as u32;
    let mut buf = [0u8; BSIZE];
    let entries = [DirEnt::new(".", ROOTINO), DirEnt::new("..", ROOTINO)];
    for (i, de) in entries.iter().enumerate() {
        let off = i * size_of::<DirEnt>();
        buf[off..off + size_of::<DirEnt>()].copy_from_slice(de.as_bytes());
    }
    disk.write(rootblock, &buf);

    let mut root = DInode {
        itype: FileType::Dir as u16,
        nlink: 1,
        size: (entries.len() * size_of::<DirEnt>()) as u32,
        ..Default::default()
    };
    root.addrs[0] = rootblock;
    let mut buf = [0u8; BSIZE];
    root.store(&mut buf, ROOTINO);
    disk.write(sb.iblock(ROOTINO), &buf);

    // every metadata block and the root's block are in use.
    let used = nmeta as u32 + 1;
    for start in (0..used).step_by(BPB as usize) {
        let mut buf = [0u8; BSIZE];
        for b in start..core::cmp::min(used, start + BPB) {
            let bi = b % BPB;
            buf[(bi / 8) as usize] |= 1 << (bi % 8);
        }
        disk.write(sb.bblock(start), &buf);
    }

    Ok(sb)
}

// A freshly formatted in-memory disk of nblocks blocks.
pub fn ramdisk(nblocks: usize, ninodes: usize) -> Result<Arc<RamDisk>> {
    let disk = Arc::new(RamDisk::new(nblocks));
    mkfs(disk.as_ref(), ninodes)?;
    Ok(disk)
}
