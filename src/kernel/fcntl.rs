use bitflags::bitflags;

bitflags! {
    // open(2) mode bits as passed across the process boundary.
    pub struct OFlag: usize {
        const RDONLY = 0x000;
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const NOFOLLOW = 0x004;
        const CREATE = 0x200;
        const TRUNC = 0x400;
        const APPEND = 0x800;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OMode {
    read: bool,
    write: bool,
    truncate: bool,
    create: bool,
    append: bool,
    nofollow: bool,
}

impl Default for OMode {
    fn default() -> Self {
        Self::new()
    }
}

impl OMode {
    pub fn new() -> Self {
        Self {
            read: false,
            write: false,
            truncate: false,
            create: false,
            append: false,
            nofollow: false,
        }
    }

    pub fn read(&mut self, read: bool) -> &mut Self {
        self.read = read;
        self
    }
    pub fn write(&mut self, write: bool) -> &mut Self {
        self.write = write;
        self
    }
    pub fn append(&mut self, append: bool) -> &mut Self {
        self.append = append;
        self
    }
    pub fn nofollow(&mut self, nofollow: bool) -> &mut Self {
        self.nofollow = nofollow;
        self
    }
    fn truncate(&mut self, truncate: bool) -> &mut Self {
        self.truncate = truncate;
        self
    }
    fn create(&mut self, create: bool) -> &mut Self {
        self.create = create;
        self
    }

    pub fn from_usize(bits: usize) -> Self {
        let flags = OFlag::from_bits_truncate(bits);
        let mut mode = Self::new();
        mode.read(!flags.contains(OFlag::WRONLY))
            .write(flags.intersects(OFlag::WRONLY | OFlag::RDWR))
            .create(flags.contains(OFlag::CREATE))
            .truncate(flags.contains(OFlag::TRUNC))
            .append(flags.contains(OFlag::APPEND))
            .nofollow(flags.contains(OFlag::NOFOLLOW));
        mode
    }

    pub fn is_read(&self) -> bool {
        self.read
    }

    pub fn is_write(&self) -> bool {
        self.write
    }

    pub fn is_create(&self) -> bool {
        self.create
    }

    pub fn is_trunc(&self) -> bool {
        self.truncate
    }

    pub fn is_rdonly(&self) -> bool {
        self.read && !self.write
    }

    pub fn is_append(&self) -> bool {
        self.append
    }

    pub fn is_nofollow(&self) -> bool {
        self.nofollow
    }
}

impl From<OFlag> for OMode {
    fn from(flags: OFlag) -> Self {
        Self::from_usize(flags.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdonly_is_the_zero_mode() {
        let mode = OMode::from_usize(0);
        assert!(mode.is_read());
        assert!(!mode.is_write());
        assert!(mode.is_rdonly());
    }

    #[test]
    fn wronly_clears_read() {
        let mode = OMode::from(OFlag::WRONLY | OFlag::CREATE);
        assert!(!mode.is_read());
        assert!(mode.is_write());
        assert!(mode.is_create());
        assert!(!mode.is_rdonly());
    }

    #[test]
    fn rdwr_with_trunc_and_nofollow() {
        let mode = OMode::from(OFlag::RDWR | OFlag::TRUNC | OFlag::NOFOLLOW);
        assert!(mode.is_read());
        assert!(mode.is_write());
        assert!(mode.is_trunc());
        assert!(mode.is_nofollow());
        assert!(!mode.is_append());
    }

    #[test]
    fn unknown_bits_are_ignored() {
        let mode = OMode::from_usize(0x8000_0000 | OFlag::APPEND.bits());
        assert!(mode.is_append());
        assert!(mode.is_rdonly());
    }
}
