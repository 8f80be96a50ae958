#![allow(dead_code)]

use kernel::disk::{BlockDevice, RamDisk};
use kernel::error::Result;
use kernel::fcntl::OFlag;
use kernel::file::{DevSW, Device, Major};
use kernel::fs::BSIZE;
use kernel::mkfs;
use kernel::null;
use kernel::param::{FSSIZE, NINODES};
use kernel::proc::Proc;
use kernel::start::Kernel;
use kernel::stat::Stat;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// Console stand-in: remembers what was written, serves queued input.
#[derive(Default)]
pub struct Console {
    pub out: Mutex<Vec<u8>>,
    pub input: Mutex<Vec<u8>>,
}

impl Device for Console {
    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut input = self.input.lock().unwrap();
        let n = dst.len().min(input.len());
        dst[..n].copy_from_slice(&input[..n]);
        input.drain(..n);
        Ok(n)
    }
    fn write(&self, src: &[u8]) -> Result<usize> {
        self.out.lock().unwrap().extend_from_slice(src);
        Ok(src.len())
    }
    fn major(&self) -> Major {
        Major::Console
    }
}

pub struct Fs {
    pub kernel: Arc<Kernel>,
    pub disk: Arc<RamDisk>,
    pub console: Arc<Console>,
}

impl Fs {
    pub fn proc(&self) -> Proc {
        Proc::new(&self.kernel).unwrap()
    }
}

pub fn devsw(console: &Arc<Console>) -> DevSW {
    let devsw = DevSW::new();
    null::init(&devsw).unwrap();
    devsw.set(Major::Console, console.clone()).unwrap();
    devsw
}

// A formatted FSSIZE-block disk with the null and console devices.
pub fn boot() -> Fs {
    init_logger();
    let disk = mkfs::ramdisk(FSSIZE, NINODES).unwrap();
    let console = Arc::new(Console::default());
    let kernel = Kernel::boot(disk.clone(), devsw(&console)).unwrap();
    Fs {
        kernel,
        disk,
        console,
    }
}

// Boot again from whatever reached the disk.
pub fn reboot(image: &[u8]) -> (Arc<Kernel>, Arc<RamDisk>) {
    let disk = Arc::new(RamDisk::from_image(image).unwrap());
    let kernel = Kernel::boot(disk.clone(), DevSW::new()).unwrap();
    (kernel, disk)
}

// A disk that silently stops persisting writes once its budget is
// spent, as if power failed at that moment.
pub struct CrashDisk {
    inner: RamDisk,
    budget: Mutex<Option<usize>>,
    writes: AtomicUsize,
}

impl CrashDisk {
    pub fn formatted() -> Arc<CrashDisk> {
        let inner = RamDisk::new(FSSIZE);
        mkfs::mkfs(&inner, NINODES).unwrap();
        Arc::new(CrashDisk {
            inner,
            budget: Mutex::new(None),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn cut_power_after(&self, writes: usize) {
        *self.budget.lock().unwrap() = Some(writes);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn image(&self) -> Vec<u8> {
        self.inner.image()
    }
}

impl BlockDevice for CrashDisk {
    fn read(&self, blockno: u32, buf: &mut [u8; BSIZE]) {
        self.inner.read(blockno, buf)
    }

    fn write(&self, blockno: u32, buf: &[u8; BSIZE]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut budget = self.budget.lock().unwrap();
        match *budget {
            Some(0) => (),
            Some(ref mut left) => {
                *left -= 1;
                self.inner.write(blockno, buf);
            }
            None => self.inner.write(blockno, buf),
        }
    }

    fn size(&self) -> u32 {
        self.inner.size()
    }
}

pub fn rw_create() -> usize {
    (OFlag::CREATE | OFlag::RDWR).bits()
}

pub fn rdonly() -> usize {
    OFlag::RDONLY.bits()
}

// stat of the node at path itself, symbolic links not followed.
pub fn stat(p: &mut Proc, path: &str) -> Result<Stat> {
    let fd = p.open(path, (OFlag::RDONLY | OFlag::NOFOLLOW).bits())?;
    let st = p.fstat(fd);
    p.close(fd)?;
    st
}

pub fn write_file(p: &mut Proc, path: &str, data: &[u8]) {
    let fd = p.open(path, rw_create()).unwrap();
    assert_eq!(p.write(fd, data).unwrap(), data.len());
    p.close(fd).unwrap();
}

pub fn read_file(p: &mut Proc, path: &str) -> Result<Vec<u8>> {
    let fd = p.open(path, rdonly())?;
    let mut out = Vec::new();
    let mut buf = [0u8; 512];
    loop {
        match p.read(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) => {
                p.close(fd)?;
                return Err(err);
            }
        }
    }
    p.close(fd)?;
    Ok(out)
}

// Every begin_op so far has been matched by an end_op.
pub fn assert_balanced(kernel: &Kernel) {
    let (begun, ended) = kernel.op_counts();
    assert_eq!(begun, ended, "unbalanced transactions");
}
