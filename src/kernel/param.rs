pub const NOFILE: usize = 16; // open files per process
pub const NFILE: usize = 100; // open files per system
pub const NINODE: usize = 50; // maximum number of active i-nodes
pub const NDEV: usize = 10; // maximum major device number
pub const ROOTDEV: u32 = 1; // device number of file system root disk
pub const NMOUNT: usize = 4; // maximum number of attached disks
pub const MAXOPBLOCKS: usize = 10; // max # of blocks any FS op writes
pub const LOGSIZE: usize = MAXOPBLOCKS * 3; // max data blocks in on-disk log
pub const NBUF: usize = MAXOPBLOCKS * 6; // size of disk block cache
pub const FSSIZE: usize = 2000; // size of file system in blocks
pub const NINODES: usize = 200; // inodes created by mkfs
pub const MAXPATH: usize = 128; // maximum file path name
pub const MAXSYMLINKS: usize = 10; // maximum symlink hops in open()
