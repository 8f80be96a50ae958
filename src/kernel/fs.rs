use crate::disk::BlockDevice;
use crate::error::{Error::*, Result};
use crate::param::{MAXPATH, NINODE, ROOTDEV};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::Mutex;
use crate::start::Kernel;
use crate::stat::{FileType, Stat};
use log::{debug, warn};
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use zerocopy::{AsBytes, FromBytes};

// File system implementation. Five layers:
//   - Blocks: allocator for raw disk blocks.
//   - Log: crash recovery for multi-step updates.
//   - Files: inode allocator, reading, writing, metadata.
//   - Directories: inode with special contents (list of other inodes!)
//   - Names: paths like /octox/src/kernel/fs.rs for convenient naming.
//
// This file contains the low-level file system manipulation
// routines and the naming operations built on them (create, link,
// unlink, symlink). The process-facing calls that wrap them in
// transactions are in syscall.rs

pub const ROOTINO: u32 = 1; // root i-number
pub const BSIZE: usize = 1024; // block size

// Disk layout:
// [ boot block | super block | log | inode blocks |
//                                          free bit map | data blocks ]
//
// mkfs computes the super block and builds an initial file system. The
// super block describes the disk layout:
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct SuperBlock {
    pub magic: u32,      // Must be FSMAGIC
    pub size: u32,       // Size of file system image (blocks)
    pub nblocks: u32,    // Number of data blocks
    pub ninodes: u32,    // Number of inodes.
    pub nlog: u32,       // Number of log blocks
    pub logstart: u32,   // Block number of first log block
    pub inodestart: u32, // Block number of first inode block
    pub bmapstart: u32,  // Block number of first free map block
}

pub const FSMAGIC: u32 = 0x10203040;

pub const NDIRECT: usize = 11;
pub const NINDIRECT: usize = BSIZE / size_of::<u32>();
pub const NDINDIRECT: usize = NINDIRECT * NINDIRECT;
pub const MAXFILE: usize = NDIRECT + NINDIRECT + NDINDIRECT;

// On-disk inode structure
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct DInode {
    pub itype: u16,                // File type
    pub major: u16,                // Major Device Number (T_DEVICE only)
    pub minor: u16,                // Minor Device Number (T_DEVICE only)
    pub nlink: u16,                // Number of links to inode in file system
    pub size: u32,                 // Size of data (bytes)
    pub addrs: [u32; NDIRECT + 2], // Data block address
}

// Inodes per block
pub const IPB: usize = BSIZE / size_of::<DInode>();

// Bitmap bits per block
pub const BPB: u32 = (BSIZE * 8) as u32;

// Directory is a file containing a sequence of dirent structures.
pub const DIRSIZ: usize = 14;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, AsBytes, FromBytes)]
pub struct DirEnt {
    pub inum: u16,
    pub name: [u8; DIRSIZ],
}

const DESZ: usize = size_of::<DirEnt>();

impl SuperBlock {
    // Read the super block straight from a device that is not
    // attached to the buffer cache yet.
    pub fn load(disk: &dyn BlockDevice) -> Result<Self> {
        let mut buf = [0u8; BSIZE];
        disk.read(1, &mut buf);
        match SuperBlock::read_from(&buf[..size_of::<SuperBlock>()]) {
            Some(sb) if sb.magic == FSMAGIC => Ok(sb),
            _ => Err(InvalidArgument),
        }
    }

    // Block containing inode i
    pub fn iblock(&self, i: u32) -> u32 {
        i / IPB as u32 + self.inodestart
    }

    // Block of free map containing bit for block b
    pub fn bblock(&self, b: u32) -> u32 {
        b / BPB + self.bmapstart
    }
}

impl DInode {
    pub fn load(block: &[u8], inum: u32) -> Self {
        let off = (inum as usize % IPB) * size_of::<DInode>();
        DInode::read_from(&block[off..off + size_of::<DInode>()]).unwrap_or_default()
    }

    pub fn store(&self, block: &mut [u8], inum: u32) {
        let off = (inum as usize % IPB) * size_of::<DInode>();
        block[off..off + size_of::<DInode>()].copy_from_slice(self.as_bytes());
    }
}

impl DirEnt {
    pub fn new(name: &str, inum: u32) -> Self {
        let mut de = DirEnt {
            inum: inum as u16,
            ..Default::default()
        };
        let len = core::cmp::min(name.len(), DIRSIZ);
        de.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        de
    }

    pub fn name(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(DIRSIZ);
        &self.name[..len]
    }
}

fn entry(block: &[u8], i: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&block[i * 4..i * 4 + 4]);
    u32::from_ne_bytes(raw)
}

fn set_entry(block: &mut [u8], i: usize, addr: u32) {
    block[i * 4..i * 4 + 4].copy_from_slice(&addr.to_ne_bytes());
}

// Blocks.

// Zero a block
fn bzero(kernel: &Kernel, dev: u32, bno: u32) {
    let mut bp = kernel.bcache.read(dev, bno);
    bp.fill(0);
    kernel.log.write(&bp);
}

// Allocate a zeroed disk block.
fn balloc(kernel: &Kernel, dev: u32) -> Result<u32> {
    let sb = kernel.sb(dev);

    for b in (0..sb.size).step_by(BPB as usize) {
        let mut bp = kernel.bcache.read(dev, sb.bblock(b));

        let mut bi = 0;
        while bi < BPB && b + bi < sb.size {
            let m = 1 << (bi % 8);
            if bp[(bi / 8) as usize] & m == 0 {
                // Is block free?
                bp[(bi / 8) as usize] |= m; // Mark block in use.
                kernel.log.write(&bp);
                drop(bp);
                bzero(kernel, dev, b + bi);
                return Ok(b + bi);
            }
            bi += 1;
        }
    }
    warn!("balloc: out of blocks on dev {}", dev);
    Err(StorageFull)
}

// Free a disk block
fn bfree(kernel: &Kernel, dev: u32, b: u32) {
    let sb = kernel.sb(dev);
    let mut bp = kernel.bcache.read(dev, sb.bblock(b));
    let bi = b % BPB;
    let m = 1 << (bi % 8);
    if bp[(bi / 8) as usize] & m == 0 {
        panic!("freeing free block");
    }
    bp[(bi / 8) as usize] &= !m;
    kernel.log.write(&bp);
}

// Inodes.
//
// An inode describes a single unnamed file.
// The inode disk structure holds metadata such as the type of file,
// its size, the number of links that reference that file, and a list
// of blocks that hold the contents of the file.
//
// The inodes are placed sequentially at sb.inodestart on the disk.
// Each inode has a number indicating its location on the disk.
//
// The kernel keeps a table of in-use inodes in memory to provide a
// place to synchronize access to inodes used by multiple processes.
// The in-memory inodes represented Arc<MInode> has book-keeping info
// that is not stored on disk: atomic ref count and ip.valid.
//
// * Allocation: ialloc() allocates an inode if inode's type (on disk)
//   is zero. iput() frees if the Arc::strong_count<Arc<MInode>>
//   have fallen to 2 and link counts have fallen to zero.
//
// * Referencing in table: an entry in the inode table is free if
//   Arc::strong_count(&Arc<MInode>) is 2 (what is in the table and
//   what is being put at the time). Otherwise the count tracks the
//   number of in-memory pointers to the entry (open files and current
//   directories). iget() finds or creates a table entry; dropping an
//   Inode hands its Arc to iput().
//
// * Valid: the type and size in an inode table entry is only correct
//   when ip.valid is true. Inode.lock() reads the inode from the disk
//   and sets valid, iput() clears valid when it frees the inode.
//
// * Locked: file system code may only examine and modify the
//   information in an inode and its property if it has first locked
//   the inode.
//
// Thus a typical sequence is:
//   ip = kernel.iget(dev, inum);  // get inode
//   guard = ip.lock();            // return IGuard
//   .. examine and modify inode contents
//   // drop(guard)
//   // drop(ip)
//
// The itable lock protects the allocation of itable entries and is
// held whenever a reference count decides an inode's fate. An MInode
// sleep lock protects all IData fields.

pub type ITable = Mutex<[Option<Arc<MInode>>; NINODE]>;

// Inode passed from the inode table.
// Wrapper for in-memory inode i.e. MInode
pub struct Inode {
    ip: Option<Arc<MInode>>,
    kernel: Arc<Kernel>,
}

// in-memory copy of an inode
#[derive(Debug)]
pub struct MInode {
    dev: u32,
    inum: u32,
    data: SleepLock<IData>,
}

#[derive(Debug, Default)]
pub struct IData {
    dev: u32,
    inum: u32,
    valid: bool,
    itype: FileType,
    major: u16,
    minor: u16,
    nlink: u16,
    size: u32,
    addrs: [u32; NDIRECT + 2],
}

// A locked inode. Dropping it (or calling unlock) releases the sleep lock.
pub struct IGuard<'a> {
    kernel: &'a Arc<Kernel>,
    data: SleepLockGuard<'a, IData>,
}

pub enum LinkOp {
    Plus,
    Minus,
    Init(u16),
}

impl IData {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            ..Default::default()
        }
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn itype(&self) -> FileType {
        self.itype
    }

    pub fn major(&self) -> u16 {
        self.major
    }

    pub fn minor(&self) -> u16 {
        self.minor
    }

    pub fn nlink(&self) -> u16 {
        self.nlink
    }

    // Copy stat information from inode.
    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.dev,
            ino: self.inum,
            ftype: self.itype,
            nlink: self.nlink,
            size: self.size as usize,
        }
    }
}

impl Deref for IGuard<'_> {
    type Target = IData;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for IGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl<'a> IGuard<'a> {
    pub fn unlock(self) {}

    // Copy a modified in-memory inode to disk.
    // Must be called after every change to an inode field
    // that lives on disk.
    pub fn update(&self) {
        let sb = self.kernel.sb(self.dev);
        let mut bp = self.kernel.bcache.read(self.dev, sb.iblock(self.inum));
        let dip = DInode {
            itype: self.itype as u16,
            major: self.major,
            minor: self.minor,
            nlink: self.nlink,
            size: self.size,
            addrs: self.addrs,
        };
        dip.store(&mut bp, self.inum);
        self.kernel.log.write(&bp);
    }

    // inode is write through, so change about IData is also written into disk.
    pub fn set_major_minor(&mut self, major: u16, minor: u16) {
        self.major = major;
        self.minor = minor;
        self.update();
    }

    // inode is write through, so change about IData is also written into disk.
    pub fn set_nlink(&mut self, op: LinkOp) {
        match op {
            LinkOp::Plus => self.nlink += 1,
            LinkOp::Minus if self.nlink == 0 => panic!("nlink underflow"),
            LinkOp::Minus => self.nlink -= 1,
            LinkOp::Init(num) => self.nlink = num,
        }
        self.update();
    }

    // Truncate inode (discard contents).
    pub fn trunc(&mut self) {
        let kernel = self.kernel;
        let dev = self.dev;

        for i in 0..NDIRECT {
            if self.addrs[i] > 0 {
                bfree(kernel, dev, self.addrs[i]);
                self.addrs[i] = 0;
            }
        }

        if self.addrs[NDIRECT] > 0 {
            for addr in Self::entries(kernel, dev, self.addrs[NDIRECT]) {
                bfree(kernel, dev, addr);
            }
            bfree(kernel, dev, self.addrs[NDIRECT]);
            self.addrs[NDIRECT] = 0;
        }

        if self.addrs[NDIRECT + 1] > 0 {
            for a_addr in Self::entries(kernel, dev, self.addrs[NDIRECT + 1]) {
                for b_addr in Self::entries(kernel, dev, a_addr) {
                    bfree(kernel, dev, b_addr);
                }
                bfree(kernel, dev, a_addr);
            }
            bfree(kernel, dev, self.addrs[NDIRECT + 1]);
            self.addrs[NDIRECT + 1] = 0;
        }

        self.size = 0;
        // update is needed, because size and addrs are updated.
        self.update();
    }

    // Non-zero block addresses held in an indirect block.
    fn entries(kernel: &Kernel, dev: u32, addr: u32) -> Vec<u32> {
        let bp = kernel.bcache.read(dev, addr);
        (0..NINDIRECT)
            .map(|i| entry(&bp, i))
            .filter(|&a| a > 0)
            .collect()
    }

    // Inode content
    //
    // The content (data) associated with each inode is stored
    // in blocks on the disk. The first NDIRECT block numbers
    // are listed in idata.addrs[]. The next NINDIRECT blocks
    // are listed in block idata.addrs[NDIRECT].
    // The next NDINDIRECT blocks are listed in block
    // idata.addrs[NDIRECT + 1].
    //
    // Return the disk block address of the nth block in inode ip.
    // If there is no such block, bmap allocates one when alloc is set
    // and returns 0 otherwise. Callers persist addrs with update().
    pub fn bmap(&mut self, bn: u32, alloc: bool) -> Result<u32> {
        let kernel = self.kernel;
        let dev = self.dev;
        let mut bn = bn as usize;

        if bn < NDIRECT {
            if self.addrs[bn] == 0 && alloc {
                self.addrs[bn] = balloc(kernel, dev)?;
            }
            return Ok(self.addrs[bn]);
        }
        bn -= NDIRECT;

        if bn < NINDIRECT {
            // Load indirect block, allocating if necessary.
            if self.addrs[NDIRECT] == 0 {
                if !alloc {
                    return Ok(0);
                }
                self.addrs[NDIRECT] = balloc(kernel, dev)?;
            }
            return Self::walk(kernel, dev, self.addrs[NDIRECT], bn, alloc);
        }
        bn -= NINDIRECT;

        if bn < NDINDIRECT {
            // Load double indirect block, allocating if necessary.
            if self.addrs[NDIRECT + 1] == 0 {
                if !alloc {
                    return Ok(0);
                }
                self.addrs[NDIRECT + 1] = balloc(kernel, dev)?;
            }
            // Load 2nd layer block.
            let addr = Self::walk(kernel, dev, self.addrs[NDIRECT + 1], bn / NINDIRECT, alloc)?;
            if addr == 0 {
                return Ok(0);
            }
            // now find disk block
            return Self::walk(kernel, dev, addr, bn % NINDIRECT, alloc);
        }

        Err(FileTooLarge)
    }

    // Look up slot i of indirect block `block`, allocating a block for it if asked.
    fn walk(kernel: &Kernel, dev: u32, block: u32, i: usize, alloc: bool) -> Result<u32> {
        let mut bp = kernel.bcache.read(dev, block);
        let mut addr = entry(&bp, i);
        if addr == 0 && alloc {
            addr = balloc(kernel, dev)?;
            set_entry(&mut bp, i, addr);
            kernel.log.write(&bp);
        }
        Ok(addr)
    }

    // Read data from inode.
    pub fn read(&mut self, dst: &mut [u8], off: u32) -> Result<usize> {
        let mut tot = 0;
        let mut off = off as usize;
        let size = self.size as usize;

        if off > size {
            return Ok(0);
        }
        let n = core::cmp::min(dst.len(), size - off);

        while tot < n {
            let addr = self.bmap((off / BSIZE) as u32, false)?;
            let bp = self.kernel.bcache.read(self.dev, addr);
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            dst[tot..tot + m].copy_from_slice(&bp[(off % BSIZE)..(off % BSIZE + m)]);
            tot += m;
            off += m;
        }
        Ok(tot)
    }

    // Write data to inode.
    // Returns the number of bytes successfully written.
    // If the return value is less than src.len(), the disk
    // filled up part way.
    pub fn write(&mut self, src: &[u8], off: u32) -> Result<usize> {
        let mut tot = 0;
        let mut off = off as usize;
        let n = src.len();

        if off > self.size as usize || off + n > MAXFILE * BSIZE {
            return Err(FileTooLarge);
        }

        while tot < n {
            let addr = match self.bmap((off / BSIZE) as u32, true) {
                Ok(addr) => addr,
                Err(err) if tot == 0 => {
                    self.update();
                    return Err(err);
                }
                Err(_) => break,
            };
            let mut bp = self.kernel.bcache.read(self.dev, addr);
            let m = core::cmp::min(n - tot, BSIZE - off % BSIZE);
            bp[(off % BSIZE)..(off % BSIZE + m)].copy_from_slice(&src[tot..tot + m]);
            self.kernel.log.write(&bp);
            tot += m;
            off += m;
        }

        if off > self.size as usize {
            self.size = off as u32;
        }
        // write the i-node back to disk even if the size didn't change
        // because the loop above might have called bmap() and added a new
        // block to addrs[].
        self.update();

        Ok(tot)
    }

    // The path a symbolic link points at.
    pub fn readlink(&mut self) -> Result<String> {
        let mut buf = vec![0u8; core::cmp::min(self.size as usize, MAXPATH)];
        let n = self.read(&mut buf, 0)?;
        buf.truncate(n);
        String::from_utf8(buf).map_err(|_| Utf8Error)
    }

    // Directories

    // Look for a directory entry in a directory.
    // Returns the inode and the byte offset of its entry.
    pub fn dirlookup(&mut self, name: &str) -> Result<(Inode, u32)> {
        let mut buf = [0u8; DESZ];
        if self.itype != FileType::Dir {
            return Err(NotADirectory);
        }

        for off in (0..self.size).step_by(DESZ) {
            if self.read(&mut buf, off)? != DESZ {
                panic!("dirlookup: read");
            }
            let de = DirEnt::read_from(&buf[..]).unwrap_or_default();
            if de.inum == 0 {
                continue;
            }
            if de.name() == name.as_bytes() {
                // entry matches path element
                return Ok((self.kernel.iget(self.dev, de.inum as u32)?, off));
            }
        }
        Err(NotFound)
    }

    // Write a new directory entry (name, inum) into the directory.
    pub fn dirlink(&mut self, name: &str, inum: u32) -> Result<()> {
        let mut buf = [0u8; DESZ];

        // check that name is not present.
        match self.dirlookup(name) {
            Ok(_) => return Err(AlreadyExists),
            Err(NotFound) => (),
            Err(err) => return Err(err),
        }

        // Look for an empty dirent
        let mut off = 0;
        while off < self.size {
            self.read(&mut buf, off)?;
            if DirEnt::read_from(&buf[..]).unwrap_or_default().inum == 0 {
                break;
            }
            off += DESZ as u32;
        }

        let de = DirEnt::new(name, inum);
        if self.write(de.as_bytes(), off)? != DESZ {
            return Err(StorageFull);
        }
        Ok(())
    }

    // Is the directory empty except for "." and ".." ?
    pub fn is_dir_empty(&mut self) -> bool {
        let mut buf = [0u8; DESZ];
        for off in ((2 * DESZ as u32)..self.size).step_by(DESZ) {
            if !matches!(self.read(&mut buf, off), Ok(DESZ)) {
                panic!("isdirempty: inode read");
            }
            if DirEnt::read_from(&buf[..]).unwrap_or_default().inum != 0 {
                return false;
            }
        }
        true
    }
}

impl MInode {
    fn new(dev: u32, inum: u32) -> Self {
        Self {
            dev,
            inum,
            data: SleepLock::new(IData::new(dev, inum), "inode"),
        }
    }
}

impl Inode {
    fn new(ip: Arc<MInode>, kernel: Arc<Kernel>) -> Self {
        Self {
            ip: Some(ip),
            kernel,
        }
    }

    fn minode(&self) -> &Arc<MInode> {
        match self.ip.as_ref() {
            Some(ip) => ip,
            None => unreachable!("inode already put"),
        }
    }

    // Increments reference count for Inode.
    // Return cloned Inode to enable ip = ip1.dup() idiom.
    pub fn dup(&self) -> Self {
        Self {
            ip: self.ip.clone(),
            kernel: Arc::clone(&self.kernel),
        }
    }

    pub fn dev(&self) -> u32 {
        self.minode().dev
    }

    pub fn inum(&self) -> u32 {
        self.minode().inum
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    // Lock the inode.
    // Reads the inode from disk if necessary.
    pub fn lock(&self) -> IGuard<'_> {
        let mip = self.minode();
        let mut data = mip.data.lock();
        if !data.valid {
            let sb = self.kernel.sb(mip.dev);
            let dip = {
                let bp = self.kernel.bcache.read(mip.dev, sb.iblock(mip.inum));
                DInode::load(&bp, mip.inum)
            };
            data.itype = FileType::from_u16(dip.itype);
            data.major = dip.major;
            data.minor = dip.minor;
            data.nlink = dip.nlink;
            data.size = dip.size;
            data.addrs = dip.addrs;
            data.valid = true;
            if data.itype == FileType::Empty {
                panic!("ilock: no type");
            }
        }
        IGuard {
            kernel: &self.kernel,
            data,
        }
    }
}

impl Drop for Inode {
    fn drop(&mut self) {
        if let Some(ip) = self.ip.take() {
            self.kernel.iput(ip);
        }
    }
}

impl core::fmt::Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.dev())
            .field("inum", &self.inum())
            .finish()
    }
}

impl Kernel {
    // Allocate an inode on device dev.
    // Mark it as allocated by giving it type.
    // Returns an unlocked but allocated and referenced inode.
    pub(crate) fn ialloc(self: &Arc<Self>, dev: u32, itype: FileType) -> Result<Inode> {
        let sb = self.sb(dev);
        for inum in 1..sb.ninodes {
            let mut bp = self.bcache.read(dev, sb.iblock(inum));
            if DInode::load(&bp, inum).itype == FileType::Empty as u16 {
                // a free inode
                let dip = DInode {
                    itype: itype as u16,
                    ..Default::default()
                };
                dip.store(&mut bp, inum);
                self.log.write(&bp);
                drop(bp);
                debug!("ialloc: dev {} inum {} {:?}", dev, inum, itype);
                return self.iget(dev, inum);
            }
        }
        warn!("ialloc: no inodes on dev {}", dev);
        Err(StorageFull) // no inodes
    }

    // Find the inode with number inum on device dev
    // and return the in-memory copy. Does not lock
    // the inode and does not read it from disk.
    pub(crate) fn iget(self: &Arc<Self>, dev: u32, inum: u32) -> Result<Inode> {
        let mut guard = self.itable.lock();

        // Is the inode already in the table?
        let mut empty: Option<&mut Option<Arc<MInode>>> = None;
        for ip in guard.iter_mut() {
            match ip {
                Some(mip) if mip.dev == dev && mip.inum == inum => {
                    return Ok(Inode::new(Arc::clone(mip), Arc::clone(self)));
                }
                None if empty.is_none() => {
                    empty = Some(ip);
                }
                _ => (),
            }
        }

        // Recycle an inode entry
        let empty = empty.ok_or(FileTableOverflow)?;
        let ip = Arc::new(MInode::new(dev, inum));
        empty.replace(Arc::clone(&ip));
        Ok(Inode::new(ip, Arc::clone(self)))
    }

    // Drop a reference to an in-memory inode.
    // If that was the last reference, the inode table entry can
    // be recycled.
    // If that was the last reference and the inode has no links
    // to it, free the inode (and its content) on disk.
    // All calls to iput() must be inside a transaction in
    // case it has to free the inode.
    fn iput(self: &Arc<Self>, inode: Arc<MInode>) {
        let mut guard = self.itable.lock();

        if Arc::strong_count(&inode) == 2 {
            // strong_count == 2 means no other process can have inode sleeplocked,
            // so this sleeplock won't block (or dead lock).
            let mut ip = IGuard {
                kernel: self,
                data: inode.data.lock(),
            };

            if ip.valid && ip.nlink == 0 {
                // inode has no links and no other references: truncate and free.
                // nobody can find it by name, so the table may be released.
                let itable = Mutex::unlock(guard);
                ip.trunc();
                ip.itype = FileType::Empty;
                ip.update();
                ip.valid = false;
                debug!("iput: freed dev {} inum {}", inode.dev, inode.inum);
                drop(ip);
                guard = itable.lock();
            } else {
                drop(ip);
            }

            // drop in-memory inode, unless ialloc picked the freed
            // inum up again while the table was released.
            if Arc::strong_count(&inode) == 2 {
                for mip in guard.iter_mut() {
                    if matches!(mip, Some(ip) if Arc::ptr_eq(&inode, ip)) {
                        mip.take();
                    }
                }
            }
        }
        // release our reference while the table is still locked.
        drop(inode);
    }
}

// Naming.
//
// Every function below must be called inside a transaction.

fn link_new(
    ip: &mut IGuard<'_>,
    dp: &mut IGuard<'_>,
    name: &str,
    init: impl FnOnce(&mut IGuard<'_>) -> Result<()>,
) -> Result<()> {
    if ip.itype() == FileType::Dir {
        // Create . and .. entries.
        // No ip.nlink++ for ".": avoid cyclic ref count.
        let inum = ip.inum();
        ip.dirlink(".", inum)?;
        ip.dirlink("..", dp.inum())?;
    }
    init(ip)?;
    dp.dirlink(name, ip.inum())
}

pub fn create(cwd: &Inode, path: &Path, itype: FileType, major: u16, minor: u16) -> Result<Inode> {
    create_with(cwd, path, itype, major, minor, |_| Ok(()))
}

// create() that runs `init` on the locked inode before it is returned.
// For a fresh inode `init` runs before the name is linked into the
// parent, so a failing `init` leaves nothing reachable.
pub fn create_with<F>(
    cwd: &Inode,
    path: &Path,
    itype: FileType,
    major: u16,
    minor: u16,
    init: F,
) -> Result<Inode>
where
    F: FnOnce(&mut IGuard<'_>) -> Result<()>,
{
    let (name, dp) = path.nameiparent(cwd)?;
    let kernel = Arc::clone(dp.kernel());
    let mut dp_guard = dp.lock();
    // an unlinked directory takes no new entries.
    if dp_guard.nlink() == 0 {
        return Err(NotFound);
    }

    match dp_guard.dirlookup(name) {
        Ok((ip, _)) => {
            // parent first, then child: never hold both.
            dp_guard.unlock();
            let mut ip_guard = ip.lock();
            let compatible = match itype {
                FileType::File => matches!(ip_guard.itype(), FileType::File | FileType::Device),
                FileType::Symlink => {
                    matches!(ip_guard.itype(), FileType::Symlink | FileType::Device)
                }
                _ => false,
            };
            if !compatible {
                return Err(AlreadyExists);
            }
            init(&mut ip_guard)?;
            ip_guard.unlock();
            return Ok(ip);
        }
        Err(NotFound) => (),
        Err(err) => return Err(err),
    }

    // the new inode is unreachable until dirlink, so locking it
    // under the parent cannot deadlock.
    let ip = kernel.ialloc(dp.dev(), itype)?;
    let mut ip_guard = ip.lock();
    ip_guard.major = major;
    ip_guard.minor = minor;
    ip_guard.set_nlink(LinkOp::Init(1));

    if let Err(err) = link_new(&mut ip_guard, &mut dp_guard, name, init) {
        // something went wrong. de-allocate ip.
        warn!("create: {} failed ({}), releasing inode {}", name, err, ip.inum());
        ip_guard.set_nlink(LinkOp::Init(0));
        ip_guard.unlock();
        return Err(err);
    }

    if itype == FileType::Dir {
        // now that success is guaranteed
        dp_guard.set_nlink(LinkOp::Plus); // for ".."
    }
    ip_guard.unlock();
    dp_guard.unlock();

    Ok(ip)
}

// Create the path new as a link to the same inode as old.
pub fn link(cwd: &Inode, old: &Path, new: &Path) -> Result<()> {
    let (_, ip) = old.namei(cwd)?;
    {
        let mut ip_guard = ip.lock();
        if ip_guard.itype() == FileType::Dir {
            return Err(IsADirectory);
        }
        // speculative; undone below if the new name cannot be made.
        ip_guard.set_nlink(LinkOp::Plus);
    }

    let linked = (|| -> Result<()> {
        let (name, dp) = new.nameiparent(cwd)?;
        let mut dp_guard = dp.lock();
        if dp.dev() != ip.dev() {
            return Err(CrossesDevices);
        }
        if dp_guard.nlink() == 0 {
            return Err(NotFound);
        }
        dp_guard.dirlink(name, ip.inum())
    })();

    if let Err(err) = linked {
        warn!("link: rolling back nlink of inode {} ({})", ip.inum(), err);
        ip.lock().set_nlink(LinkOp::Minus);
        return Err(err);
    }
    Ok(())
}

pub fn unlink(cwd: &Inode, path: &Path) -> Result<()> {
    let (name, dp) = path.nameiparent(cwd)?;
    let mut dp_guard = dp.lock();

    // Cannot unlink "." or ".."
    if name == "." || name == ".." {
        return Err(PermissionDenied);
    }

    let (ip, off) = dp_guard.dirlookup(name)?;
    if dp.kernel().mounted_on(ip.dev(), ip.inum()).is_some() {
        return Err(ResourceBusy);
    }
    let mut ip_guard = ip.lock();

    if ip_guard.nlink() < 1 {
        panic!("unlink: nlink < 1");
    }
    if ip_guard.itype() == FileType::Dir && !ip_guard.is_dir_empty() {
        return Err(DirectoryNotEmpty);
    }

    if dp_guard.write(DirEnt::default().as_bytes(), off) != Ok(DESZ) {
        panic!("unlink: writei");
    }
    if ip_guard.itype() == FileType::Dir {
        dp_guard.set_nlink(LinkOp::Minus);
    }
    dp_guard.unlock();

    ip_guard.set_nlink(LinkOp::Minus);
    Ok(())
}

// Create linkpath as a symbolic link whose content is target.
pub fn symlink(cwd: &Inode, target: &str, linkpath: &Path) -> Result<()> {
    if target.is_empty() {
        return Err(InvalidArgument);
    }
    create_with(cwd, linkpath, FileType::Symlink, 0, 0, |ip| {
        // an existing device keeps its node; only a symlink is rewritten.
        if ip.itype() != FileType::Symlink {
            return Err(AlreadyExists);
        }
        if ip.size() > 0 {
            ip.trunc();
        }
        match ip.write(target.as_bytes(), 0)? {
            n if n == target.len() => Ok(()),
            _ => Err(StorageFull),
        }
    })
    .and(Ok(()))
}

// Paths
// A slice of a path (akin to str)
#[derive(Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Path {
    inner: str,
}

impl AsRef<Path> for str {
    fn as_ref(&self) -> &Path {
        Path::new(self)
    }
}

impl Path {
    pub fn new<S: AsRef<str> + ?Sized>(s: &S) -> &Path {
        unsafe { &*(s.as_ref() as *const str as *const Path) }
    }

    pub fn as_str(&self) -> &str {
        &self.inner
    }

    // Get next path element from path as name &str,
    // the element following the name as &Path
    //
    // Examples:
    //   skip_elem("a/bb/c") = (Some("a"), Some("bb/c")),
    //   skip_elem("///a//bb") = (Some("a"), Some("bb")),
    //   skip_elem("a") = (Some("a"), None)
    //   skip_elem("") = skip_elem("////") = (None, None)
    //   if name: &str > DIRSIZ return (None, None)
    pub fn skip_elem(&self) -> (Option<&str>, Option<&Path>) {
        let trimmed = self.inner.trim_start_matches('/');
        if trimmed.is_empty() {
            return (None, None);
        }
        let (name, rest) = match trimmed.split_once('/') {
            Some((name, rest)) => (name, Some(rest.trim_start_matches('/'))),
            None => (trimmed, None),
        };
        if name.len() > DIRSIZ {
            return (None, None);
        }
        (Some(name), rest.filter(|r| !r.is_empty()).map(Path::new))
    }

    // Look up and return the inode for a path name, relative to cwd
    // unless it starts with '/'.
    // If `parent` is true, return the inode for the parent and the
    // final path element.
    // Must be called inside a transaction since it drops inodes.
    pub fn namex(&self, cwd: &Inode, parent: bool) -> Result<(&str, Inode)> {
        if self.inner.is_empty() {
            return Err(NotFound);
        }
        let kernel = cwd.kernel();
        let mut ip = match self.inner.get(0..1) {
            Some("/") => kernel.iget(ROOTDEV, ROOTINO)?,
            _ => cwd.dup(),
        };

        let mut path = self;
        loop {
            let (name, next) = match path.skip_elem() {
                (Some(name), next) => (name, next),
                // only slashes: the root itself has no parent entry.
                (None, _) if path.inner.trim_start_matches('/').is_empty() && !parent => {
                    break Ok(("/", ip));
                }
                _ => break Err(NotFound),
            };

            let nip = {
                let mut guard = ip.lock();
                if guard.itype() != FileType::Dir {
                    return Err(NotADirectory);
                }
                if parent && next.is_none() {
                    guard.unlock();
                    break Ok((name, ip));
                }
                match kernel.covered_by(guard.dev()) {
                    // ".." at the root of a mounted device leaves the device.
                    Some((dev, inum)) if name == ".." && guard.inum() == ROOTINO => {
                        guard.unlock();
                        let cip = kernel.iget(dev, inum)?;
                        let (nip, _) = cip.lock().dirlookup("..")?;
                        nip
                    }
                    _ => guard.dirlookup(name)?.0,
                }
            };
            // entering a mount point lands on the mounted root.
            ip = match kernel.mounted_on(nip.dev(), nip.inum()) {
                Some(dev) => kernel.iget(dev, ROOTINO)?,
                None => nip,
            };

            match next {
                Some(npath) => path = npath,
                None => break Ok((name, ip)),
            }
        }
    }

    pub fn namei(&self, cwd: &Inode) -> Result<(&str, Inode)> {
        self.namex(cwd, false)
    }

    pub fn nameiparent(&self, cwd: &Inode) -> Result<(&str, Inode)> {
        self.namex(cwd, true)
    }
}
