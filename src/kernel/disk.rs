// Block devices backing the buffer cache.
//
// The kernel only ever moves whole BSIZE blocks. A RamDisk keeps
// the image in memory, which is what mkfs and the tests use; its
// image() snapshot is what a power cut at that instant would leave.

use crate::error::{Error::*, Result};
use crate::fs::BSIZE;
use crate::spinlock::Mutex;

pub trait BlockDevice: Send + Sync {
    fn read(&self, blockno: u32, buf: &mut [u8; BSIZE]);
    fn write(&self, blockno: u32, buf: &[u8; BSIZE]);
    // number of blocks on the device
    fn size(&self) -> u32;
}

#[derive(Debug)]
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BSIZE]>>,
}

impl RamDisk {
    pub fn new(nblocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![[0; BSIZE]; nblocks], "ramdisk"),
        }
    }

    pub fn from_image(image: &[u8]) -> Result<Self> {
        if image.is_empty() || image.len() % BSIZE != 0 {
            return Err(InvalidArgument);
        }
        let blocks = image
            .chunks_exact(BSIZE)
            .map(|chunk| {
                let mut b = [0u8; BSIZE];
                b.copy_from_slice(chunk);
                b
            })
            .collect();
        Ok(Self {
            blocks: Mutex::new(blocks, "ramdisk"),
        })
    }

    // Copy of everything that has reached the device so far.
    pub fn image(&self) -> Vec<u8> {
        self.blocks.lock().iter().flatten().copied().collect()
    }
}

impl BlockDevice for RamDisk {
    fn read(&self, blockno: u32, buf: &mut [u8; BSIZE]) {
        let blocks = self.blocks.lock();
        match blocks.get(blockno as usize) {
            Some(b) => buf.copy_from_slice(b),
            None => panic!("ramdisk: read past end, block {}", blockno),
        }
    }

    fn write(&self, blockno: u32, buf: &[u8; BSIZE]) {
        let mut blocks = self.blocks.lock();
        match blocks.get_mut(blockno as usize) {
            Some(b) => b.copy_from_slice(buf),
            None => panic!("ramdisk: write past end, block {}", blockno),
        }
    }

    fn size(&self) -> u32 {
        self.blocks.lock().len() as u32
    }
}
