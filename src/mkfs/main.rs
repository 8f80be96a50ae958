use kernel::{
    fcntl::OFlag,
    file::{DevSW, Major},
    mkfs,
    param::{FSSIZE, NINODES},
    proc::Proc,
    start::Kernel,
};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::{env, process};

// mkfs fs.img files...
//
// Formats an image, creates /dev, /bin, /lib and /etc plus the
// /dev/null node, then copies each host file in. Files under a
// host directory named bin, lib or etc land in the same directory
// of the image; everything else lands in the root.

fn main() -> io::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: mkfs fs.img files...");
        process::exit(1);
    }

    let disk = mkfs::ramdisk(FSSIZE, NINODES).map_err(to_io)?;
    let kernel = Kernel::boot(disk.clone(), DevSW::new()).map_err(to_io)?;
    {
        let mut p = Proc::new(&kernel).map_err(to_io)?;
        for dir in ["/dev", "/bin", "/lib", "/etc"] {
            p.mkdir(dir).map_err(to_io)?;
        }
        p.mknod("/dev/null", Major::Null as u16, 0).map_err(to_io)?;

        for path in args[2..].iter().map(Path::new).filter(|p| p.exists()) {
            // Skip leading _ in name when writing to file system.
            // The binaries are named _rm, _cat, etc. to keep the
            // build operating system from trying to execute them
            // in place of system binaries like rm and cat.
            let shortname = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.trim_start_matches('_'),
                None => continue,
            };
            let parent = match path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
                Some(dir @ ("bin" | "lib" | "etc")) => dir,
                _ => "",
            };
            let target = if parent.is_empty() {
                format!("/{}", shortname)
            } else {
                format!("/{}/{}", parent, shortname)
            };

            let mut data = Vec::new();
            File::open(path)?.read_to_end(&mut data)?;

            let fd = p
                .open(&target, (OFlag::CREATE | OFlag::WRONLY | OFlag::TRUNC).bits())
                .map_err(to_io)?;
            if p.write(fd, &data).map_err(to_io)? != data.len() {
                die(&format!("mkfs: {}: file system full", target));
            }
            p.close(fd).map_err(to_io)?;
            println!("mkfs: {} ({} bytes)", target, data.len());
        }
    }

    std::fs::write(&args[1], disk.image())
}

fn to_io(err: kernel::error::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err)
}

fn die(str: &str) -> ! {
    eprintln!("{}", str);
    process::exit(1);
}
