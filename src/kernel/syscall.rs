use crate::error::{Error::*, Result};
use crate::fcntl::OMode;
use crate::file::FType;
use crate::fs::{self, Path};
use crate::param::MAXPATH;
use crate::pipe::Pipe;
use crate::proc::Proc;
use crate::stat::{FileType, Stat};
use std::sync::Arc;

// Raw return value of a system call: the result on success,
// -1 on any failure.
pub trait SysRet {
    fn into_raw(self) -> isize;
}

impl SysRet for Result<()> {
    fn into_raw(self) -> isize {
        self.map_or(-1, |()| 0)
    }
}

impl SysRet for Result<usize> {
    fn into_raw(self) -> isize {
        self.map_or(-1, |n| n as isize)
    }
}

impl SysRet for Result<(usize, usize)> {
    fn into_raw(self) -> isize {
        self.map_or(-1, |_| 0)
    }
}

impl Path {
    // A path argument must fit in MAXPATH bytes, NUL included.
    pub fn from_arg(path: &str) -> Result<&Path> {
        if path.len() >= MAXPATH {
            return Err(InvalidArgument);
        }
        Ok(Path::new(path))
    }
}

// System Calls related to File operations
impl Proc {
    pub fn dup(&mut self, fd: usize) -> Result<usize> {
        let f = self.file(fd)?.clone();
        self.fdalloc(f)
    }

    pub fn read(&self, fd: usize, dst: &mut [u8]) -> Result<usize> {
        self.file(fd)?.read(dst)
    }

    pub fn write(&self, fd: usize, src: &[u8]) -> Result<usize> {
        self.file(fd)?.write(src)
    }

    pub fn close(&mut self, fd: usize) -> Result<()> {
        self.file(fd)?;
        let _f = self.ofile[fd].take();
        Ok(())
    }

    pub fn fstat(&self, fd: usize) -> Result<Stat> {
        self.file(fd)?.stat()
    }

    pub fn link(&mut self, old: &str, new: &str) -> Result<()> {
        let old_path = Path::from_arg(old)?;
        let new_path = Path::from_arg(new)?;
        let log = &self.kernel().log;

        let res;
        {
            log.begin_op();
            res = fs::link(self.cwd(), old_path, new_path);
            log.end_op();
        }
        res
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let path = Path::from_arg(path)?;
        let log = &self.kernel().log;

        let res;
        {
            log.begin_op();
            res = fs::unlink(self.cwd(), path);
            log.end_op();
        }
        res
    }

    pub fn symlink(&mut self, target: &str, linkpath: &str) -> Result<()> {
        let linkpath = Path::from_arg(linkpath)?;
        if target.len() >= MAXPATH {
            return Err(InvalidArgument);
        }
        let log = &self.kernel().log;

        let res;
        {
            log.begin_op();
            res = fs::symlink(self.cwd(), target, linkpath);
            log.end_op();
        }
        res
    }

    pub fn open(&mut self, path: &str, omode: usize) -> Result<usize> {
        let path = Path::from_arg(path)?;
        let opts = OMode::from_usize(omode);
        // a full descriptor table must fail before anything changes.
        let fd = self.free_fd()?;
        let kernel = Arc::clone(self.kernel());

        let file;
        {
            kernel.log.begin_op();
            file = kernel.filealloc(opts, FType::Node(path, self.cwd()));
            kernel.log.end_op();
        }
        self.ofile[fd].replace(file?);
        Ok(fd)
    }

    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        let path = Path::from_arg(path)?;
        let log = &self.kernel().log;

        let res;
        {
            log.begin_op();
            res = fs::create(self.cwd(), path, FileType::Dir, 0, 0).and(Ok(()));
            log.end_op();
        }
        res
    }

    pub fn mknod(&mut self, path: &str, major: u16, minor: u16) -> Result<()> {
        let path = Path::from_arg(path)?;
        let log = &self.kernel().log;

        let res;
        {
            log.begin_op();
            res = fs::create(self.cwd(), path, FileType::Device, major, minor).and(Ok(()));
            log.end_op();
        }
        res
    }

    #[allow(clippy::redundant_closure_call)]
    pub fn chdir(&mut self, path: &str) -> Result<()> {
        let path = Path::from_arg(path)?;
        let kernel = Arc::clone(self.kernel());

        let res;
        {
            kernel.log.begin_op();
            let mut chdir = || -> Result<()> {
                let (_, ip) = path.namei(self.cwd())?;
                {
                    let ip_guard = ip.lock();
                    if ip_guard.itype() != FileType::Dir {
                        return Err(NotADirectory);
                    }
                }
                let _old = self.set_cwd(ip);
                Ok(())
            };
            res = chdir();
            kernel.log.end_op();
        }
        res
    }

    // Returns (read end, write end).
    pub fn pipe(&mut self) -> Result<(usize, usize)> {
        let (rf, wf) = Pipe::alloc(self.kernel())?;
        let fd0 = self.fdalloc(rf)?;
        let fd1 = match self.fdalloc(wf) {
            Ok(fd) => fd,
            Err(err) => {
                self.ofile[fd0].take();
                return Err(err);
            }
        };
        Ok((fd0, fd1))
    }
}
