use crate::{
    bio::{BCache, BufGuard},
    fs::{SuperBlock, BSIZE},
    param::{LOGSIZE, MAXOPBLOCKS},
};
use log::{debug, info, warn};
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use zerocopy::{AsBytes, FromBytes};

// Simple logging that allows concurrent FS system calls.
//
// A log transaction contains the updates of multiple FS system
// calls. The logging system only commits when there are
// no FS system calls active. Thus there is never
// any reasoning required about whether a commit might
// write an uncommitted system call's updates to disk.
//
// A system call should call begin_op()/end_op() to mark
// its start and end. Usually begin_op() just increments
// the count of in-progress FS system calls and returns.
// But if it thinks the log is close to running out, it
// sleeps until the last outstanding end_op() commits.
//
// The log is a physical re-do log containing disk blocks.
// It lives on the root device but records (dev, block) pairs,
// so one transaction may cover every attached device.
// The on-disk log format:
//   header block, containing (dev, block #) for block A, B, C, ...
//   block A
//   block B
//   block C
//   ...
// Log appends are synchronous.

// Contents of the header block, used for both the on-disk header block
// and to keep track in memory of logged block# before commit.
#[repr(C)]
#[derive(Debug, Clone, Copy, AsBytes, FromBytes)]
struct LogHeader {
    n: u32,
    dev: [u32; LOGSIZE],
    block: [u32; LOGSIZE],
}

impl LogHeader {
    const EMPTY: LogHeader = LogHeader {
        n: 0,
        dev: [0; LOGSIZE],
        block: [0; LOGSIZE],
    };
}

#[derive(Debug)]
struct LogState {
    start: u32,
    size: u32,
    dev: u32,
    outstanding: u32,
    committing: bool,
    lh: LogHeader,
}

pub struct Log {
    bcache: Arc<BCache>,
    state: Mutex<LogState>,
    cv: Condvar,
    begun: AtomicUsize,
    ended: AtomicUsize,
}

impl Log {
    // Open the log of device dev and replay whatever committed
    // transaction it still holds.
    pub fn new(bcache: Arc<BCache>, dev: u32, sb: &SuperBlock) -> Self {
        assert!(
            size_of::<LogHeader>() < BSIZE,
            "initlog: too big log header"
        );
        let log = Self {
            bcache,
            state: Mutex::new(LogState {
                start: sb.logstart,
                size: sb.nlog,
                dev,
                outstanding: 0,
                committing: false,
                lh: LogHeader::EMPTY,
            }),
            cv: Condvar::new(),
            begun: AtomicUsize::new(0),
            ended: AtomicUsize::new(0),
        };
        log.recover();
        log
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Read the log header from disk.
    fn read_head(&self, dev: u32, start: u32) -> LogHeader {
        let buf = self.bcache.read(dev, start);
        LogHeader::read_from(&buf[..size_of::<LogHeader>()]).unwrap_or(LogHeader::EMPTY)
    }

    // Write a log header to disk.
    // Writing a non-empty header is the true point at which the
    // current transaction commits.
    fn write_head(&self, dev: u32, start: u32, lh: &LogHeader) {
        let mut buf = self.bcache.read(dev, start);
        buf[..size_of::<LogHeader>()].copy_from_slice(lh.as_bytes());
        buf.write();
    }

    fn recover(&self) {
        let (dev, start) = {
            let guard = self.state();
            (guard.dev, guard.start)
        };
        let mut lh = self.read_head(dev, start);
        if lh.n > 0 {
            info!("log: recovering {} blocks", lh.n);
        }
        lh.n = self.retain_attached(&mut lh);
        self.install_trans(dev, start, &lh, true); // if committed, copy from log to disk
        self.write_head(dev, start, &LogHeader::EMPTY); // clear the log
    }

    // Only the root device is attached while recovering; blocks logged
    // for other devices cannot be put back.
    fn retain_attached(&self, lh: &mut LogHeader) -> u32 {
        let mut kept = 0;
        for tail in 0..lh.n as usize {
            if self.bcache.is_attached(lh.dev[tail]) {
                lh.dev[kept] = lh.dev[tail];
                lh.block[kept] = lh.block[tail];
                kept += 1;
            } else {
                warn!(
                    "log: dropping block {} of detached dev {}",
                    lh.block[tail], lh.dev[tail]
                );
            }
        }
        kept as u32
    }

    // Copy committed blocks from log to their home location
    fn install_trans(&self, dev: u32, start: u32, lh: &LogHeader, recovering: bool) {
        for tail in 0..lh.n as usize {
            let lbuf = self.bcache.read(dev, start + tail as u32 + 1); // read log block
            let mut dbuf = self.bcache.read(lh.dev[tail], lh.block[tail]); // read dst
            dbuf.copy_from_slice(&lbuf); // copy block to dst
            dbuf.write(); // write dst to disk
            if !recovering {
                dbuf.unpin();
            }
        }
    }

    // Copy modified blocks from cache to log.
    fn write_log(&self, dev: u32, start: u32, lh: &LogHeader) {
        for tail in 0..lh.n as usize {
            let mut to = self.bcache.read(dev, start + tail as u32 + 1); // log block
            let from = self.bcache.read(lh.dev[tail], lh.block[tail]); // cache block
            to.copy_from_slice(&from);
            to.write(); // write the log
        }
    }

    fn commit(&self, dev: u32, start: u32, lh: &LogHeader) {
        if lh.n > 0 {
            self.write_log(dev, start, lh); // Write modified blocks from cache to log
            self.write_head(dev, start, lh); // Write header to disk -- the real commit
            self.install_trans(dev, start, lh, false); // Now install writes to home locations
            self.write_head(dev, start, &LogHeader::EMPTY); // Erase the transaction from the log
            debug!("log: committed {} blocks", lh.n);
        }
    }

    // called at the start of each FS system call.
    pub fn begin_op(&self) {
        let mut guard = self.state();
        loop {
            if guard.committing
                || (guard.lh.n as usize + (guard.outstanding + 1) as usize * MAXOPBLOCKS) > LOGSIZE
            // this op might exhaust log space; wait for commit.
            {
                guard = self.cv.wait(guard).unwrap_or_else(PoisonError::into_inner);
            } else {
                guard.outstanding += 1;
                break;
            }
        }
        self.begun.fetch_add(1, Ordering::SeqCst);
    }

    // called at the end of each FS system call.
    // commits if this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut pending = None;

        {
            let mut guard = self.state();
            if guard.outstanding == 0 {
                panic!("end_op: no outstanding operation");
            }
            guard.outstanding -= 1;
            if guard.committing {
                panic!("log.committing");
            }
            if guard.outstanding == 0 {
                // nobody can touch the header until committing is cleared.
                pending = Some((guard.dev, guard.start, guard.lh));
                guard.committing = true;
            } else {
                // begin_op() may be waiting for log space,
                // and decrementing log.outstanding has decreased
                // the amount of reserved space.
                self.cv.notify_all();
            }
        }
        self.ended.fetch_add(1, Ordering::SeqCst);

        if let Some((dev, start, lh)) = pending {
            // call commit w/o holding locks, since not allowed
            // to sleep with locks.
            self.commit(dev, start, &lh);
            let mut guard = self.state();
            guard.lh.n = 0;
            guard.committing = false;
            self.cv.notify_all();
        }
    }

    // Run f as one FS operation.
    pub fn do_op<T>(&self, f: impl FnOnce() -> T) -> T {
        self.begin_op();
        let ret = f();
        self.end_op();
        ret
    }

    // (begin_op calls, end_op calls) so far.
    pub fn op_counts(&self) -> (usize, usize) {
        (
            self.begun.load(Ordering::SeqCst),
            self.ended.load(Ordering::SeqCst),
        )
    }

    // Caller has modified b.data and is done with the buffer.
    // Record the block number and pin in the cache by increasing refcnt.
    // commit()/write() will do the disk write.
    //
    // log.write() replaces BufGuard.write(); a typical use is:
    // bp = bcache.read();
    // modify bp.data[]
    // log.write(&bp)
    pub fn write(&self, b: &BufGuard<'_>) {
        let mut guard = self.state();
        if guard.lh.n as usize >= LOGSIZE || guard.lh.n + 1 >= guard.size {
            panic!("too big a transaction");
        }
        if guard.outstanding < 1 {
            panic!("log.write outside of trans");
        }

        let n = guard.lh.n as usize;
        for i in 0..n {
            if guard.lh.block[i] == b.blockno() && guard.lh.dev[i] == b.dev() {
                // log absorption
                return;
            }
        }
        guard.lh.dev[n] = b.dev();
        guard.lh.block[n] = b.blockno();
        b.pin();
        guard.lh.n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{BlockDevice, RamDisk};
    use crate::mkfs::mkfs;
    use crate::param::{FSSIZE, NINODES};

    fn setup() -> (Arc<BCache>, Arc<RamDisk>, SuperBlock) {
        let disk = Arc::new(RamDisk::new(FSSIZE));
        let sb = mkfs(&*disk, NINODES).unwrap();
        let bcache = Arc::new(BCache::new());
        bcache.attach(disk.clone()).unwrap();
        (bcache, disk, sb)
    }

    fn raw(disk: &RamDisk, blockno: u32) -> [u8; BSIZE] {
        let mut buf = [0u8; BSIZE];
        disk.read(blockno, &mut buf);
        buf
    }

    #[test]
    fn commit_installs_blocks_and_clears_header() {
        let (bcache, disk, sb) = setup();
        let log = Log::new(Arc::clone(&bcache), 1, &sb);
        let target = sb.size - 1;

        log.do_op(|| {
            let mut bp = bcache.read(1, target);
            bp[0] = 0xab;
            log.write(&bp);
            // absorbed: logging the same block twice takes one slot.
            log.write(&bp);
            assert_eq!(log.state().lh.n, 1);
        });

        assert_eq!(raw(&disk, target)[0], 0xab);
        let head = raw(&disk, sb.logstart);
        assert_eq!(LogHeader::read_from(&head[..size_of::<LogHeader>()]).unwrap().n, 0);
        assert_eq!(log.op_counts(), (1, 1));
    }

    #[test]
    fn nothing_reaches_home_before_end_op() {
        let (bcache, disk, sb) = setup();
        let log = Log::new(Arc::clone(&bcache), 1, &sb);
        let target = sb.size - 2;

        log.begin_op();
        {
            let mut bp = bcache.read(1, target);
            bp[5] = 1;
            log.write(&bp);
        }
        assert_eq!(raw(&disk, target)[5], 0);
        log.end_op();
        assert_eq!(raw(&disk, target)[5], 1);
    }

    #[test]
    fn recovery_replays_a_committed_header() {
        let (bcache, disk, sb) = setup();
        let target = sb.size - 3;

        // a commit that reached the header but not the home location.
        let mut lh = LogHeader::EMPTY;
        lh.n = 1;
        lh.dev[0] = 1;
        lh.block[0] = target;
        let mut data = [0u8; BSIZE];
        data[100] = 0x5a;
        disk.write(sb.logstart + 1, &data);
        let mut head = [0u8; BSIZE];
        head[..size_of::<LogHeader>()].copy_from_slice(lh.as_bytes());
        disk.write(sb.logstart, &head);

        let _log = Log::new(bcache, 1, &sb);
        assert_eq!(raw(&disk, target)[100], 0x5a);
        let head = raw(&disk, sb.logstart);
        assert_eq!(LogHeader::read_from(&head[..size_of::<LogHeader>()]).unwrap().n, 0);
    }

    #[test]
    #[should_panic(expected = "outside of trans")]
    fn write_outside_transaction_panics() {
        let (bcache, _disk, sb) = setup();
        let log = Log::new(Arc::clone(&bcache), 1, &sb);
        let bp = bcache.read(1, sb.size - 1);
        log.write(&bp);
    }
}
