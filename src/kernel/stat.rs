#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    #[default]
    Empty = 0,
    Dir = 1,
    File = 2,
    Device = 3,
    Symlink = 4,
}

impl FileType {
    pub fn from_u16(bits: u16) -> FileType {
        match bits {
            1 => FileType::Dir,
            2 => FileType::File,
            3 => FileType::Device,
            4 => FileType::Symlink,
            _ => FileType::Empty,
        }
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Stat {
    pub dev: u32,        // File system's disk device
    pub ino: u32,        // Inode number
    pub ftype: FileType, // Type of file
    pub nlink: u16,      // Number of links to file
    pub size: usize,     // Size of file in bytes
}
