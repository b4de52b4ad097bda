//! OUFS: a small UNIX-like file system kept inside one flat file.
//!
//! The image is 128 blocks of 256 bytes. Block 0 holds the inode and block
//! allocation bitmaps, blocks 1 to 8 the inode table, and block 9 the root
//! directory. Directories are a single block of sixteen name to inode entries.
//!
//! ```no_run
//! use oufs::Oufs;
//!
//! let disk = std::fs::OpenOptions::new()
//!     .read(true)
//!     .write(true)
//!     .create(true)
//!     .open("vdisk1")?;
//! let mut fs = Oufs::create(disk)?;
//! fs.mkdir("/", "docs")?;
//! fs.create_file("/docs", "notes")?;
//! fs.list("/", "docs", &mut std::io::stdout())?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod alloc;
pub mod dir;
mod error;
mod fs;
pub mod io;
pub mod layout;
pub mod master;
pub mod node;
pub mod path;

pub use crate::error::{OufsError, Result};
pub use crate::fs::Oufs;
pub use crate::path::Resolution;
