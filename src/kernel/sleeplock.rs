use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

// Sleeping locks

// Long-term locks for inodes and buffers. A waiter blocks on the
// condition variable instead of spinning, so holders may do disk I/O.
#[derive(Debug)]
pub struct SleepLock<T> {
    lk: Mutex<SleepLockInfo>, // protects this sleep lock
    cv: Condvar,
    data: UnsafeCell<T>,
    name: &'static str, // Name of lock
}
unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

#[derive(Debug)]
struct SleepLockInfo {
    locked: bool,
    holder: Option<ThreadId>,
}

#[derive(Debug)]
pub struct SleepLockGuard<'a, T> {
    sleep_lock: &'a SleepLock<T>,
}

impl SleepLockInfo {
    const fn new() -> Self {
        SleepLockInfo {
            locked: false,
            holder: None,
        }
    }
}

impl<T> SleepLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            lk: Mutex::new(SleepLockInfo::new()),
            cv: Condvar::new(),
            data: UnsafeCell::new(data),
            name,
        }
    }

    fn info(&self) -> MutexGuard<'_, SleepLockInfo> {
        self.lk.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let mut lk = self.info();
        while lk.locked {
            lk = self.cv.wait(lk).unwrap_or_else(PoisonError::into_inner);
        }
        lk.locked = true;
        lk.holder = Some(thread::current().id());
        SleepLockGuard { sleep_lock: self }
    }

    pub fn holding(&self) -> bool {
        let lk = self.info();
        lk.locked && lk.holder == Some(thread::current().id())
    }

    pub fn is_locked(&self) -> bool {
        self.info().locked
    }

    pub fn unlock(guard: SleepLockGuard<'_, T>) -> &'_ SleepLock<T> {
        guard.sleep_lock()
    }
}

impl<'a, T: 'a> SleepLockGuard<'a, T> {
    // Returns a reference to the original 'SleepLock' object.
    pub fn sleep_lock(&self) -> &'a SleepLock<T> {
        self.sleep_lock
    }

    pub fn holding(&self) -> bool {
        self.sleep_lock.holding()
    }
}

impl<'a, T: 'a> Deref for SleepLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> DerefMut for SleepLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.sleep_lock.data.get() }
    }
}

impl<'a, T: 'a> Drop for SleepLockGuard<'a, T> {
    fn drop(&mut self) {
        let mut lk = self.sleep_lock.info();
        assert!(
            lk.locked && lk.holder == Some(thread::current().id()),
            "release {}",
            self.sleep_lock.name
        );
        lk.locked = false;
        lk.holder = None;
        self.sleep_lock.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unlock_hands_back_the_lock() {
        let lock = SleepLock::new(5u32, "test");
        let mut guard = lock.lock();
        *guard += 1;
        assert!(guard.holding());
        let lock = SleepLock::unlock(guard);
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn waiters_are_serialized() {
        let lock = Arc::new(SleepLock::new(0usize, "counter"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut guard = lock.lock();
                        let v = *guard;
                        thread::yield_now();
                        *guard = v + 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
