use crate::bio::BCache;
use crate::disk::BlockDevice;
use crate::error::{Error::*, Result};
use crate::file::{DevSW, FTable};
use crate::fs::{ITable, Inode, Path, SuperBlock, ROOTINO};
use crate::log::Log;
use crate::param::{NFILE, NINODE, ROOTDEV};
use crate::spinlock::Mutex;
use crate::stat::FileType;
use array_macro::array;
use log::info;
use std::sync::Arc;

// Everything the file system shares between processes: the buffer
// cache, the log, the inode and file tables, the device switch and
// the attached devices.
pub struct Kernel {
    pub(crate) bcache: Arc<BCache>,
    pub(crate) log: Log,
    pub(crate) itable: ITable,
    pub(crate) ftable: FTable,
    pub(crate) devsw: DevSW,
    sbs: Mutex<Vec<SuperBlock>>, // indexed by dev - 1
    mounts: Mutex<Vec<Mount>>,
}

// dev is mounted on directory (on_dev, on_inum).
#[derive(Debug, Clone, Copy)]
struct Mount {
    dev: u32,
    on_dev: u32,
    on_inum: u32,
}

impl Kernel {
    // Bring up the file system on a formatted root device and
    // recover whatever the log committed before the last shutdown.
    pub fn boot(disk: Arc<dyn BlockDevice>, devsw: DevSW) -> Result<Arc<Kernel>> {
        let sb = SuperBlock::load(disk.as_ref())?;
        let bcache = Arc::new(BCache::new()); // buffer cache
        let dev = bcache.attach(disk)?;
        assert_eq!(dev, ROOTDEV, "boot: root is not the first device");
        info!(
            "fs: size {} nblocks {} ninodes {} nlog {} logstart {} inodestart {} bmapstart {}",
            sb.size, sb.nblocks, sb.ninodes, sb.nlog, sb.logstart, sb.inodestart, sb.bmapstart
        );

        let log = Log::new(Arc::clone(&bcache), dev, &sb);
        Ok(Arc::new(Kernel {
            bcache,
            log,
            itable: Mutex::new(array![None; NINODE], "itable"),
            ftable: Mutex::new(array![None; NFILE], "ftable"),
            devsw,
            sbs: Mutex::new(vec![sb], "superblocks"),
            mounts: Mutex::new(Vec::new(), "mounts"),
        }))
    }

    pub fn root(self: &Arc<Self>) -> Result<Inode> {
        self.iget(ROOTDEV, ROOTINO)
    }

    pub fn devsw(&self) -> &DevSW {
        &self.devsw
    }

    pub fn sb(&self, dev: u32) -> SuperBlock {
        let sbs = self.sbs.lock();
        match (dev as usize).checked_sub(1).and_then(|i| sbs.get(i)) {
            Some(sb) => *sb,
            None => panic!("fs: no superblock for dev {}", dev),
        }
    }

    // (begin_op calls, end_op calls) so far.
    pub fn op_counts(&self) -> (usize, usize) {
        self.log.op_counts()
    }

    // Attach a formatted device and graft its root onto the directory
    // at path. Returns the new device number.
    pub fn mount(self: &Arc<Self>, path: &str, disk: Arc<dyn BlockDevice>) -> Result<u32> {
        let sb = SuperBlock::load(disk.as_ref())?;

        let res;
        {
            self.log.begin_op();
            res = self.graft(path, sb, disk);
            self.log.end_op();
        }
        res
    }

    fn graft(self: &Arc<Self>, path: &str, sb: SuperBlock, disk: Arc<dyn BlockDevice>) -> Result<u32> {
        let root = self.root()?;
        let (_, ip) = Path::new(path).namei(&root)?;
        if ip.lock().itype() != FileType::Dir {
            return Err(NotADirectory);
        }
        if ip.inum() == ROOTINO {
            // the root of a device, including one mounted already.
            return Err(ResourceBusy);
        }

        let mut mounts = self.mounts.lock();
        if mounts
            .iter()
            .any(|m| m.on_dev == ip.dev() && m.on_inum == ip.inum())
        {
            return Err(ResourceBusy);
        }
        let dev = {
            let mut sbs = self.sbs.lock();
            let dev = self.bcache.attach(disk)?;
            sbs.push(sb);
            dev
        };
        mounts.push(Mount {
            dev,
            on_dev: ip.dev(),
            on_inum: ip.inum(),
        });
        info!("mount: dev {} on {} ({} blocks)", dev, path, sb.size);
        Ok(dev)
    }

    // The device mounted on directory (dev, inum), if any.
    pub(crate) fn mounted_on(&self, dev: u32, inum: u32) -> Option<u32> {
        self.mounts
            .lock()
            .iter()
            .find(|m| m.on_dev == dev && m.on_inum == inum)
            .map(|m| m.dev)
    }

    // The directory device dev is mounted on, if any.
    pub(crate) fn covered_by(&self, dev: u32) -> Option<(u32, u32)> {
        self.mounts
            .lock()
            .iter()
            .find(|m| m.dev == dev)
            .map(|m| (m.on_dev, m.on_inum))
    }
}
