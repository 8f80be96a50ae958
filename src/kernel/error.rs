use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

#[repr(isize)]
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Error {
    Uncategorized,
    ResourceBusy = -2,
    NotFound = -3,
    StorageFull = -6,
    BadFileDescriptor = -13,
    FileDescriptorTooLarge = -14,
    FileTooLarge = -15,
    AlreadyExists = -16,
    IsADirectory = -17,
    NotADirectory = -18,
    CrossesDevices = -19,
    PermissionDenied = -20,
    DirectoryNotEmpty = -21,
    FileTableOverflow = -22,
    InvalidArgument = -23,
    NoSuchNode = -24,
    BrokenPipe = -25,
    Utf8Error = -28,
    FilesystemLoop = -31,
    NoSuchDevice = -32,
}

impl Error {
    pub fn as_str(&self) -> &'static str {
        use Error::*;
        match *self {
            ResourceBusy => "resource busy",
            NotFound => "entry not found",
            StorageFull => "no storage space",
            BadFileDescriptor => "bad file descriptor",
            FileDescriptorTooLarge => "file descriptor value too large",
            FileTooLarge => "file too large",
            AlreadyExists => "entity already exists",
            IsADirectory => "is a directory",
            NotADirectory => "not a directory",
            CrossesDevices => "cross-device link or rename",
            PermissionDenied => "permission denied",
            DirectoryNotEmpty => "directory not empty",
            FileTableOverflow => "inode or file table overflow in system",
            InvalidArgument => "invalid argument",
            NoSuchNode => "no such node or address",
            BrokenPipe => "broken pipe",
            Utf8Error => "slice is not utf8",
            FilesystemLoop => "too many levels of symbolic links",
            NoSuchDevice => "no such device",
            Uncategorized => "uncategorized error",
        }
    }

    pub fn from_isize(code: isize) -> Self {
        use Error::*;
        match code {
            -2 => ResourceBusy,
            -3 => NotFound,
            -6 => StorageFull,
            -13 => BadFileDescriptor,
            -14 => FileDescriptorTooLarge,
            -15 => FileTooLarge,
            -16 => AlreadyExists,
            -17 => IsADirectory,
            -18 => NotADirectory,
            -19 => CrossesDevices,
            -20 => PermissionDenied,
            -21 => DirectoryNotEmpty,
            -22 => FileTableOverflow,
            -23 => InvalidArgument,
            -24 => NoSuchNode,
            -25 => BrokenPipe,
            -28 => Utf8Error,
            -31 => FilesystemLoop,
            -32 => NoSuchDevice,
            _ => Uncategorized,
        }
    }

    // no free inode, handle, descriptor slot or directory space.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            Error::StorageFull | Error::FileTableOverflow | Error::FileDescriptorTooLarge
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for Error {}
