// Buffer cache.
//
// The buffer cache is a fixed set of sleep-locked buffers holding
// cached copies of disk block contents. Caching disk blocks
// in memory reduces the number of disk reads and also provides a
// synchronization point for disk blocks used by multiple processes.
//
// Interface:
// * To get a buffer for a particular disk block, call bcache.read() and get BufGuard.
// * After changing buffer data, call BufGuard.write to write it to disk.
// * When done with the buffer, drop(BufGuard) with relse.
// * Only one process at a time can use a buffer,
//     so do not keep them longer than necessary.
use crate::{
    disk::BlockDevice,
    error::{Error::*, Result},
    fs::BSIZE,
    param::{NBUF, NMOUNT},
    sleeplock::{SleepLock, SleepLockGuard},
    spinlock::Mutex,
};
use array_macro::array;
use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::Arc,
};

pub struct BCache {
    buf: [SleepLock<Data>; NBUF],
    lru: Mutex<Lru>,
    disks: Mutex<Vec<Arc<dyn BlockDevice>>>,
}

#[derive(Debug)]
pub struct Data {
    data: [u8; BSIZE],
}

#[derive(Debug, Clone, Copy)]
struct Meta {
    dev: u32,
    blockno: u32,
    refcnt: usize,
    valid: bool, // has data been read from disk?
}

// Buffers sorted by how recently they were released.
// front is the most recently used.
#[derive(Debug)]
struct Lru {
    meta: [Meta; NBUF],
    order: VecDeque<usize>,
}

impl Meta {
    const EMPTY: Meta = Meta {
        dev: 0,
        blockno: 0,
        refcnt: 0,
        valid: false,
    };
}

impl Lru {
    fn new() -> Self {
        Self {
            meta: [Meta::EMPTY; NBUF],
            order: (0..NBUF).collect(),
        }
    }

    // Returns (recycled, index) with the reference taken.
    fn get(&mut self, dev: u32, blockno: u32) -> (bool, usize) {
        // Is the block already cached?
        if let Some(&i) = self
            .order
            .iter()
            .find(|&&i| self.meta[i].dev == dev && self.meta[i].blockno == blockno)
        {
            self.meta[i].refcnt += 1;
            return (false, i);
        }

        // Not cached.
        // Recycle the least recently used unused buffer.
        if let Some(&i) = self.order.iter().rev().find(|&&i| self.meta[i].refcnt == 0) {
            self.meta[i] = Meta {
                dev,
                blockno,
                refcnt: 1,
                valid: false,
            };
            return (true, i);
        }
        panic!("bget: no buffers");
    }

    fn relse(&mut self, i: usize) {
        let meta = &mut self.meta[i];
        if meta.refcnt == 0 {
            panic!("brelse: refcnt");
        }
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            // no one is waiting for it; make it the most recently used.
            if let Some(pos) = self.order.iter().position(|&j| j == i) {
                self.order.remove(pos);
            }
            self.order.push_front(i);
        }
    }
}

pub struct BufGuard<'a> {
    bcache: &'a BCache,
    idx: usize,
    dev: u32,
    blockno: u32,
    data_guard: Option<SleepLockGuard<'a, Data>>,
}

impl Deref for BufGuard<'_> {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        match self.data_guard.as_ref() {
            Some(guard) => &guard.data,
            None => unreachable!("buffer released"),
        }
    }
}

impl DerefMut for BufGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.data_guard.as_mut() {
            Some(guard) => &mut guard.data,
            None => unreachable!("buffer released"),
        }
    }
}

impl<'a> BufGuard<'a> {
    // Write buf's content to disk. Must be locked.
    pub fn write(&mut self) {
        let disk = self.bcache.disk(self.dev);
        match self.data_guard.as_ref() {
            Some(guard) if guard.holding() => disk.write(self.blockno, &guard.data),
            _ => panic!("bwrite"),
        }
    }

    // Keep the block cached until unpin() even after the guard is gone.
    pub fn pin(&self) {
        self.bcache.lru.lock().meta[self.idx].refcnt += 1;
    }

    pub fn unpin(&self) {
        self.bcache.lru.lock().relse(self.idx);
    }

    pub fn blockno(&self) -> u32 {
        self.blockno
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }
}

impl Drop for BufGuard<'_> {
    fn drop(&mut self) {
        self.data_guard.take(); // unlock sleep
        self.bcache.lru.lock().relse(self.idx);
    }
}

impl Data {
    const fn new() -> Self {
        Self { data: [0; BSIZE] }
    }
}

impl BCache {
    pub fn new() -> Self {
        Self {
            buf: array![_ => SleepLock::new(Data::new(), "buffer"); NBUF],
            lru: Mutex::new(Lru::new(), "bcache"),
            disks: Mutex::new(Vec::new(), "disks"),
        }
    }

    // Attach a block device and return its device number.
    pub fn attach(&self, disk: Arc<dyn BlockDevice>) -> Result<u32> {
        let mut disks = self.disks.lock();
        if disks.len() >= NMOUNT {
            return Err(StorageFull);
        }
        disks.push(disk);
        Ok(disks.len() as u32)
    }

    pub fn is_attached(&self, dev: u32) -> bool {
        dev >= 1 && (dev as usize) <= self.disks.lock().len()
    }

    pub fn disk(&self, dev: u32) -> Arc<dyn BlockDevice> {
        let disks = self.disks.lock();
        match (dev as usize).checked_sub(1).and_then(|i| disks.get(i)) {
            Some(disk) => Arc::clone(disk),
            None => panic!("bio: no device {}", dev),
        }
    }

    fn get(&self, dev: u32, blockno: u32) -> (bool, BufGuard<'_>) {
        let (recycle, idx) = self.lru.lock().get(dev, blockno);
        let data_guard = self.buf[idx].lock();
        (
            recycle,
            BufGuard {
                bcache: self,
                idx,
                dev,
                blockno,
                data_guard: Some(data_guard),
            },
        )
    }

    // Return a locked buf with the contents of the indicated block.
    pub fn read(&self, dev: u32, blockno: u32) -> BufGuard<'_> {
        let (_, mut b) = self.get(dev, blockno);
        let valid = self.lru.lock().meta[b.idx].valid;
        if !valid {
            let disk = self.disk(dev);
            match b.data_guard.as_mut() {
                Some(guard) => disk.read(blockno, &mut guard.data),
                None => unreachable!("buffer released"),
            }
            self.lru.lock().meta[b.idx].valid = true;
        }
        b
    }
}

impl Default for BCache {
    fn default() -> Self {
        Self::new()
    }
}
