use crate::{
    error::{Error::*, Result},
    fcntl::OMode,
    file::{FType, File},
    start::Kernel,
};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct Pipe {
    rx: Option<Mutex<Receiver<u8>>>,
    tx: Option<Mutex<SyncSender<u8>>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Pipe {
    const PIPESIZE: usize = 512;

    pub fn new(rx: Option<Receiver<u8>>, tx: Option<SyncSender<u8>>) -> Self {
        Self {
            rx: rx.map(Mutex::new),
            tx: tx.map(Mutex::new),
        }
    }

    pub fn get_mode(&self) -> OMode {
        let mut omode = OMode::new();
        omode.read(self.rx.is_some()).write(self.tx.is_some());
        omode
    }

    // A connected (read end, write end) pair.
    pub fn alloc(kernel: &Arc<Kernel>) -> Result<(File, File)> {
        let (tx, rx) = sync_channel::<u8>(Self::PIPESIZE);

        let p0 = Self::new(Some(rx), None);
        let p1 = Self::new(None, Some(tx));
        let f0 = kernel.filealloc(p0.get_mode(), FType::Pipe(p0))?;
        let f1 = kernel.filealloc(p1.get_mode(), FType::Pipe(p1))?;

        Ok((f0, f1))
    }

    // Blocks while the pipe is full. Fails only if the read end is
    // gone before anything was written.
    pub fn write(&self, src: &[u8]) -> Result<usize> {
        let tx = locked(self.tx.as_ref().ok_or(BrokenPipe)?);

        let mut i = 0;
        for &ch in src {
            if tx.send(ch).is_err() {
                break;
            }
            i += 1;
        }
        if i == 0 && !src.is_empty() {
            return Err(BrokenPipe);
        }
        Ok(i)
    }

    // Blocks until at least one byte is available, then takes what
    // is buffered. Returns 0 once every write end is closed.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let rx = locked(self.rx.as_ref().ok_or(BrokenPipe)?);
        if dst.is_empty() {
            return Ok(0);
        }

        let Ok(ch) = rx.recv() else {
            return Ok(0);
        };
        dst[0] = ch;
        let mut i = 1;
        while i < dst.len() {
            let Ok(ch) = rx.try_recv() else {
                break;
            };
            dst[i] = ch;
            i += 1;
        }
        Ok(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn pair() -> (Pipe, Pipe) {
        let (tx, rx) = sync_channel::<u8>(Pipe::PIPESIZE);
        (Pipe::new(Some(rx), None), Pipe::new(None, Some(tx)))
    }

    #[test]
    fn bytes_arrive_in_order() {
        let (r, w) = pair();
        assert_eq!(w.write(b"hello"), Ok(5));
        let mut buf = [0u8; 16];
        assert_eq!(r.read(&mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn closed_writer_reads_as_eof() {
        let (r, w) = pair();
        w.write(b"x").unwrap();
        drop(w);
        let mut buf = [0u8; 4];
        assert_eq!(r.read(&mut buf), Ok(1));
        assert_eq!(r.read(&mut buf), Ok(0));
    }

    #[test]
    fn closed_reader_breaks_the_pipe() {
        let (r, w) = pair();
        drop(r);
        assert_eq!(w.write(b"x"), Err(BrokenPipe));
    }

    #[test]
    fn writer_blocks_until_reader_drains() {
        let (r, w) = pair();
        let data = vec![7u8; Pipe::PIPESIZE * 3];
        let writer = thread::spawn(move || w.write(&data));
        let mut total = 0;
        let mut buf = [0u8; 100];
        while total < Pipe::PIPESIZE * 3 {
            total += r.read(&mut buf).unwrap();
        }
        assert_eq!(writer.join().unwrap(), Ok(Pipe::PIPESIZE * 3));
    }

    #[test]
    fn ends_have_one_direction() {
        let (r, w) = pair();
        assert!(r.get_mode().is_read() && !r.get_mode().is_write());
        assert!(w.get_mode().is_write() && !w.get_mode().is_read());
        assert_eq!(r.write(b"x"), Err(BrokenPipe));
    }
}
