// octofs: an xv6-style file system hosted as a library.
//
// Layers, bottom up: disk, bio (buffer cache), log (crash-safe
// transactions), fs (inodes, directories, names), file (open file
// handles, devices, pipes) and syscall (the process-facing calls on
// proc::Proc). start::Kernel ties the shared tables together.

pub mod bio;
pub mod disk;
pub mod error;
pub mod fcntl;
pub mod file;
pub mod fs;
pub mod log;
pub mod mkfs;
pub mod null;
pub mod param;
pub mod pipe;
pub mod proc;
pub mod sleeplock;
pub mod spinlock;
pub mod start;
pub mod stat;
pub mod syscall;
