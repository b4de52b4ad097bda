use std::io;

use oufs::{self, Oufs};

pub fn main() -> Result<(), oufs::OufsError> {
    let tmp = tempfile::tempfile()?;

    // Format a new image on the device and build a small tree.
    let mut fs = Oufs::create(tmp)?;
    fs.mkdir("/", "home")?;
    fs.mkdir("/home", "alice")?;
    fs.create_file("/home/alice", "todo")?;
    fs.create_file("/home", "README")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    fs.list("/", "/home", &mut out)?;
    fs.list("/home", "alice/todo", &mut out)?;

    // Not empty: prints the diagnostic instead.
    if let Err(e) = fs.rmdir("/", "/home/alice") {
        eprintln!("rmdir: {}", e);
    }
    Ok(())
}
