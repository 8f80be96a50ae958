use crate::error::{Error::*, Result};
use crate::fcntl::OMode;
use crate::fs::{create, Inode, Path, BSIZE};
use crate::param::{MAXOPBLOCKS, MAXSYMLINKS, NDEV, NFILE};
use crate::pipe::Pipe;
use crate::spinlock::Mutex;
use crate::start::Kernel;
use crate::stat::{FileType, Stat};
use array_macro::array;
use log::{debug, warn};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

pub type FTable = Mutex<[Option<Arc<VFile>>; NFILE]>;

// A reference to an open file handle. Cloning is dup; the handle
// is released when the last File referring to it is dropped.
#[derive(Clone)]
pub struct File {
    f: Option<Arc<VFile>>,
    readable: bool,
    writable: bool,
    kernel: Arc<Kernel>,
}

#[derive(Debug)]
pub enum VFile {
    Device(DNod),
    Inode(FNod),
    Pipe(Pipe),
    None,
}

// Device Node
#[derive(Debug)]
pub struct DNod {
    driver: Arc<dyn Device>,
    ip: Inode,
}

// Device functions, map this trait using dyn
pub trait Device: Send + Sync {
    fn read(&self, dst: &mut [u8]) -> Result<usize>;
    fn write(&self, src: &[u8]) -> Result<usize>;
    fn major(&self) -> Major;
}

impl core::fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Device fn {:?}", self.major())
    }
}

impl Deref for DNod {
    type Target = dyn Device;
    fn deref(&self) -> &Self::Target {
        self.driver.as_ref()
    }
}

// File & directory Node
#[derive(Debug)]
pub struct FNod {
    off: AtomicU32, // only moved while the inode is locked
    ip: Inode,
}

impl FNod {
    pub fn new(ip: Inode, offset: u32) -> Self {
        Self {
            off: AtomicU32::new(offset),
            ip,
        }
    }

    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut ip = self.ip.lock();
        let off = self.off.load(Ordering::Relaxed);

        let r = ip.read(dst, off)?;
        self.off.store(off + r as u32, Ordering::Relaxed);
        Ok(r)
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        // write a few blocks at a time to avoid exceeding the maximum
        // log transaction size, including i-node, indirect block,
        // allocation blocks, and 2 blocks of slop for non-aligned
        // writes.
        let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * BSIZE;
        let log = &self.ip.kernel().log;
        let mut i: usize = 0;

        while i < src.len() {
            let n1 = core::cmp::min(src.len() - i, max);

            let r = log.do_op(|| -> Result<usize> {
                let mut guard = self.ip.lock();
                let off = self.off.load(Ordering::Relaxed);
                let r = guard.write(&src[i..i + n1], off)?;
                self.off.store(off + r as u32, Ordering::Relaxed);
                Ok(r)
            });
            match r {
                Ok(r) if r == n1 => i += r,
                // the disk filled up part way.
                Ok(r) => return Ok(i + r),
                Err(err) if i == 0 => return Err(err),
                Err(_) => break,
            }
        }
        Ok(i)
    }
}

impl VFile {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        match self {
            VFile::Device(d) => d.read(dst),
            VFile::Inode(f) => f.read(dst),
            VFile::Pipe(p) => p.read(dst),
            VFile::None => Err(BadFileDescriptor),
        }
    }

    fn write(&self, src: &[u8]) -> Result<usize> {
        match self {
            VFile::Device(d) => d.write(src),
            VFile::Inode(f) => f.write(src),
            VFile::Pipe(p) => p.write(src),
            VFile::None => Err(BadFileDescriptor),
        }
    }

    // Get metadata about file.
    pub fn stat(&self) -> Result<Stat> {
        match self {
            VFile::Device(DNod { ref ip, .. }) | VFile::Inode(FNod { ref ip, .. }) => {
                Ok(ip.lock().stat())
            }
            _ => Err(BadFileDescriptor),
        }
    }
}

impl File {
    // Read from file.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        if !self.readable {
            return Err(InvalidArgument);
        }
        self.vfile().read(dst)
    }

    // Write to file.
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        if !self.writable {
            return Err(InvalidArgument);
        }
        self.vfile().write(src)
    }

    fn vfile(&self) -> &Arc<VFile> {
        match self.f.as_ref() {
            Some(f) => f,
            None => unreachable!("file already closed"),
        }
    }
}

impl Deref for File {
    type Target = Arc<VFile>;
    fn deref(&self) -> &Self::Target {
        self.vfile()
    }
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("f", &self.f)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish()
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let f = match self.f.take() {
            Some(f) => f,
            None => return,
        };

        let last = {
            let mut guard = self.kernel.ftable.lock();
            if Arc::strong_count(&f) < 2 {
                panic!("file drop");
            }
            if Arc::strong_count(&f) == 2 {
                // drop arc<vfile> in table
                for ff in guard.iter_mut() {
                    if matches!(ff, Some(vff) if Arc::ptr_eq(&f, vff)) {
                        ff.take(); // ref count = 1
                    }
                }
                Some(f)
            } else {
                // another File still refers to it; let go under the lock.
                drop(f);
                None
            }
        };

        match last.map(Arc::try_unwrap) {
            Some(Ok(VFile::Inode(FNod { ip, .. }) | VFile::Device(DNod { ip, .. }))) => {
                self.kernel.log.do_op(|| drop(ip));
            }
            // a pipe end closes when its channel half is dropped.
            Some(Ok(_)) | None => (),
            Some(Err(_)) => panic!("file drop: shared handle"),
        }
    }
}

// File Allocation Type Source
pub enum FType<'a> {
    Node(&'a Path, &'a Inode),
    Pipe(Pipe),
}

impl Kernel {
    // Allocate a file structure
    // Must be called inside transaction if FType == FType::Node.
    // Following a symbolic link ends the caller's transaction and
    // starts a new one.
    pub fn filealloc(self: &Arc<Self>, opts: OMode, ftype: FType<'_>) -> Result<File> {
        let inner: Arc<VFile> = Arc::new(match ftype {
            FType::Node(path, cwd) => self.open_node(path, cwd, &opts)?,
            FType::Pipe(pi) => VFile::Pipe(pi),
        });

        {
            let mut guard = self.ftable.lock();
            let empty = guard.iter_mut().find(|f| f.is_none()).ok_or(FileTableOverflow)?;
            empty.replace(Arc::clone(&inner)); // ref count = 2
        }

        // the handle is ours now, the last step may change the file.
        if let VFile::Inode(FNod { ref ip, .. }) = *inner {
            if opts.is_trunc() {
                let mut ip_guard = ip.lock();
                if ip_guard.itype() == FileType::File {
                    ip_guard.trunc();
                }
            }
        }

        Ok(File {
            f: Some(inner),
            readable: opts.is_read(),
            writable: opts.is_write(),
            kernel: Arc::clone(self),
        })
    }

    fn open_node(self: &Arc<Self>, path: &Path, cwd: &Inode, opts: &OMode) -> Result<VFile> {
        let mut ip = if opts.is_create() {
            create(cwd, path, FileType::File, 0, 0)?
        } else {
            path.namei(cwd)?.1
        };

        // follow symbolic links
        let mut depth = 0;
        loop {
            let target = {
                let mut ip_guard = ip.lock();
                if ip_guard.itype() != FileType::Symlink || opts.is_nofollow() {
                    break;
                }
                ip_guard.readlink()?
            };
            if depth >= MAXSYMLINKS {
                warn!("open: {} exceeds {} symbolic links", path.as_str(), MAXSYMLINKS);
                return Err(FilesystemLoop);
            }
            depth += 1;
            debug!("open: {} -> {}", path.as_str(), target);

            // release the link inside the transaction that used it,
            // then resolve the target in a fresh one.
            drop(ip);
            self.log.end_op();
            self.log.begin_op();
            ip = Path::new(&target).namei(cwd)?.1;
        }

        let ip_guard = ip.lock();
        let itype = ip_guard.itype();
        if itype == FileType::Dir && !opts.is_rdonly() {
            return Err(IsADirectory);
        }

        match itype {
            FileType::Device => {
                let driver = self.devsw.get(Major::from_u16(ip_guard.major())).ok_or(NoSuchDevice)?;
                ip_guard.unlock();
                Ok(VFile::Device(DNod { driver, ip }))
            }
            FileType::Dir | FileType::File | FileType::Symlink => {
                let offset = if opts.is_append() && !opts.is_trunc() && itype == FileType::File {
                    ip_guard.size()
                } else {
                    0
                };
                ip_guard.unlock();
                Ok(VFile::Inode(FNod::new(ip, offset)))
            }
            FileType::Empty => Err(NoSuchNode),
        }
    }
}

pub struct DevSW {
    table: [OnceLock<Arc<dyn Device>>; NDEV],
}

impl core::fmt::Debug for DevSW {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[")?;
        for (count, v) in self.table.iter().enumerate() {
            if count != 0 {
                write!(f, ", ")?;
            }
            if let Some(v) = v.get() {
                write!(f, "{:?}", v)?;
            } else {
                write!(f, "None")?;
            }
        }
        write!(f, "]")
    }
}

impl DevSW {
    pub fn new() -> Self {
        Self {
            table: array![OnceLock::new(); NDEV],
        }
    }

    // Register the driver for devnum. A major is bound at most once.
    pub fn set(&self, devnum: Major, dev: Arc<dyn Device>) -> Result<()> {
        match self.table.get(devnum as usize) {
            Some(slot) if devnum != Major::Invalid => slot.set(dev).map_err(|_| ResourceBusy),
            _ => Err(NoSuchDevice),
        }
    }

    pub fn get(&self, devnum: Major) -> Option<Arc<dyn Device>> {
        if devnum == Major::Invalid {
            return None;
        }
        self.table.get(devnum as usize)?.get().cloned()
    }
}

impl Default for DevSW {
    fn default() -> Self {
        Self::new()
    }
}

// Device Major Number
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Major {
    Null = 0,
    Console = 1,
    #[default]
    Invalid,
}

impl Major {
    pub fn from_u16(bits: u16) -> Major {
        match bits {
            0 => Major::Null,
            1 => Major::Console,
            _ => Major::Invalid,
        }
    }
}
