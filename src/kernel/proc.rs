use crate::error::{Error::*, Result};
use crate::file::File;
use crate::fs::Inode;
use crate::param::NOFILE;
use crate::start::Kernel;
use array_macro::array;
use std::sync::Arc;

// Per-process file system state: the open file table and the
// current directory. Everything in syscall.rs runs on behalf of
// one Proc.
pub struct Proc {
    kernel: Arc<Kernel>,
    pub ofile: [Option<File>; NOFILE], // Open files
    cwd: Option<Inode>,                // Current directory
}

impl Proc {
    // A process whose current directory is the root.
    pub fn new(kernel: &Arc<Kernel>) -> Result<Self> {
        let cwd = kernel.root()?;
        Ok(Self {
            kernel: Arc::clone(kernel),
            ofile: array![None; NOFILE],
            cwd: Some(cwd),
        })
    }

    // A child sharing every open file and the current directory.
    pub fn fork(&self) -> Self {
        let mut ofile: [Option<File>; NOFILE] = array![None; NOFILE];
        ofile.clone_from_slice(&self.ofile);
        Self {
            kernel: Arc::clone(&self.kernel),
            ofile,
            cwd: self.cwd.as_ref().map(Inode::dup),
        }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn cwd(&self) -> &Inode {
        match self.cwd.as_ref() {
            Some(cwd) => cwd,
            None => unreachable!("proc: no cwd"),
        }
    }

    // Swap in a new current directory, handing back the old one so
    // the caller can release it inside its transaction.
    pub(crate) fn set_cwd(&mut self, ip: Inode) -> Option<Inode> {
        self.cwd.replace(ip)
    }

    // Allocate a file descriptor for the given file.
    // Takes over file reference from caller on success.
    pub(crate) fn fdalloc(&mut self, file: File) -> Result<usize> {
        let fd = self.free_fd()?;
        self.ofile[fd].replace(file);
        Ok(fd)
    }

    // Lowest unused descriptor.
    pub(crate) fn free_fd(&self) -> Result<usize> {
        self.ofile
            .iter()
            .position(|f| f.is_none())
            .ok_or(FileDescriptorTooLarge)
    }

    pub(crate) fn file(&self, fd: usize) -> Result<&File> {
        self.ofile
            .get(fd)
            .and_then(|f| f.as_ref())
            .ok_or(BadFileDescriptor)
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        // Close all open files
        for fd in self.ofile.iter_mut() {
            let _file = fd.take();
        }

        self.kernel.log.begin_op();
        {
            let _ip = self.cwd.take();
        }
        self.kernel.log.end_op();
    }
}
