use crate::alloc::{self, Unit};
use crate::dir::{self, DirectoryBlock};
use crate::error::{OufsError, Result};
use crate::io::{BlockStorage, FileBlockEmulator, FileBlockEmulatorBuilder};
use crate::layout::{
    BlockCodec, BlockRef, InodeRef, BLOCK_SIZE, N_BLOCKS, N_INODE_BLOCKS, RESERVED_BLOCKS,
    ROOT_DIRECTORY_BLOCK, ROOT_INODE, SEPARATOR,
};
use crate::master::MasterBlock;
use crate::node::{self, Inode, InodeBlock, InodeKind};
use crate::path::{self, Resolution};

use log::{debug, info, warn};
use std::fs::File;
use std::io::Write;

/// A 128 block, 256 byte block file system with one master block, eight inode
/// table blocks, a fixed root directory block, and the rest for data.
///
/// Every operation takes `&mut self`, so the read, modify, write cycle on the
/// master block of one call never interleaves with another.
pub struct Oufs<T: BlockStorage> {
    dev: T,
}

impl Oufs<FileBlockEmulator> {
    /// Formats a new image into `file`, replacing whatever it held.
    pub fn create(file: File) -> Result<Self> {
        let dev = FileBlockEmulatorBuilder::from(file)
            .with_block_count(N_BLOCKS)
            .build()?;
        Oufs::format(dev)
    }

    /// Attaches to an image previously written by `create`.
    pub fn from_file(file: File) -> Result<Self> {
        let dev = FileBlockEmulatorBuilder::from(file)
            .with_block_count(N_BLOCKS)
            .clear_medium(false)
            .build()?;
        Oufs::open(dev)
    }
}

impl<T: BlockStorage> Oufs<T> {
    /// Initializes the file system onto owned block storage.
    ///
    /// # Layout
    /// ===========================================================================
    /// | Master | Inode table (8 blocks) | Root directory | Data region (118)  |
    /// ===========================================================================
    pub fn format(mut dev: T) -> Result<Self> {
        check_capacity(&dev)?;

        let zeroes = [0; BLOCK_SIZE];
        for blocknr in 0..N_BLOCKS {
            dev.write_block(blocknr, &zeroes)?;
        }

        MasterBlock::formatted().store(&mut dev)?;

        let table = InodeBlock::free().encode();
        for blocknr in 1..=N_INODE_BLOCKS {
            dev.write_block(blocknr, &table)?;
        }
        node::write_inode(&mut dev, ROOT_INODE, &Inode::new_directory(ROOT_DIRECTORY_BLOCK))?;

        // The root is its own parent.
        let root = DirectoryBlock::initialized(ROOT_INODE, ROOT_INODE);
        dir::write_directory(&mut dev, ROOT_DIRECTORY_BLOCK, &root)?;
        dev.sync_disk()?;

        info!("formatted {} block image", N_BLOCKS);
        Ok(Oufs { dev })
    }

    /// Mounts an already formatted device, checking the master block and root
    /// inode first.
    pub fn open(mut dev: T) -> Result<Self> {
        check_capacity(&dev)?;

        let master = MasterBlock::load(&mut dev)?;
        if !master.has_reserved_units() {
            return Err(OufsError::InvalidLayout(
                "master block does not reserve the root inode and system blocks".to_string(),
            ));
        }

        let root = node::read_inode(&mut dev, ROOT_INODE)?;
        if !root.is_directory() || root.block(0) != Some(ROOT_DIRECTORY_BLOCK) {
            return Err(OufsError::InvalidLayout(
                "inode 0 is not the root directory".to_string(),
            ));
        }

        info!("opened image, root directory holds {} entries", root.size());
        Ok(Oufs { dev })
    }

    /// Returns ownership of the underlying device to the caller.
    pub fn into_device(self) -> T {
        self.dev
    }

    pub fn device_mut(&mut self) -> &mut T {
        &mut self.dev
    }

    pub fn resolve(&mut self, cwd: &str, path: &str) -> Result<Resolution> {
        path::resolve(&mut self.dev, cwd, path)
    }

    pub fn read_inode(&mut self, inode: InodeRef) -> Result<Inode> {
        node::read_inode(&mut self.dev, inode)
    }

    pub fn write_inode(&mut self, inode: InodeRef, node: &Inode) -> Result<()> {
        node::write_inode(&mut self.dev, inode, node)
    }

    pub fn read_directory(&mut self, block: BlockRef) -> Result<DirectoryBlock> {
        dir::read_directory(&mut self.dev, block)
    }

    pub fn write_directory(&mut self, block: BlockRef, entries: &DirectoryBlock) -> Result<()> {
        dir::write_directory(&mut self.dev, block, entries)
    }

    pub fn is_inode_allocated(&mut self, inode: InodeRef) -> Result<bool> {
        alloc::is_allocated(&mut self.dev, Unit::Inode, inode as usize)
    }

    pub fn is_block_allocated(&mut self, block: BlockRef) -> Result<bool> {
        alloc::is_allocated(&mut self.dev, Unit::Block, block as usize)
    }

    /// Creates an empty directory at `path`, returning its inode.
    pub fn mkdir(&mut self, cwd: &str, path: &str) -> Result<InodeRef> {
        let (parent_ref, name) = self.vacant(cwd, path)?;
        let (parent, dir_block, entries) = self.open_directory(parent_ref)?;
        if entries.free_slot().is_none() {
            return Err(OufsError::DirectoryFull(dir_block));
        }

        let child_ref = alloc::allocate_inode(&mut self.dev)?;
        let child_block = match alloc::allocate_block(&mut self.dev) {
            Ok(block) => block,
            Err(e) => {
                alloc::free_inode(&mut self.dev, child_ref)?;
                return Err(e);
            }
        };

        let contents = DirectoryBlock::initialized(child_ref, parent_ref);
        dir::write_directory(&mut self.dev, child_block, &contents)?;
        node::write_inode(&mut self.dev, child_ref, &Inode::new_directory(child_block))?;
        self.link(parent_ref, parent, dir_block, entries, &name, child_ref)?;

        info!("mkdir {}: inode {} block {}", path, child_ref, child_block);
        Ok(child_ref)
    }

    /// Creates an empty file at `path`, returning its inode. No data block is
    /// claimed.
    pub fn create_file(&mut self, cwd: &str, path: &str) -> Result<InodeRef> {
        let (parent_ref, name) = self.vacant(cwd, path)?;
        let (parent, dir_block, entries) = self.open_directory(parent_ref)?;
        if entries.free_slot().is_none() {
            return Err(OufsError::DirectoryFull(dir_block));
        }

        let child_ref = alloc::allocate_inode(&mut self.dev)?;
        node::write_inode(&mut self.dev, child_ref, &Inode::new_file())?;
        self.link(parent_ref, parent, dir_block, entries, &name, child_ref)?;

        info!("touch {}: inode {}", path, child_ref);
        Ok(child_ref)
    }

    /// Removes the empty directory at `path`.
    pub fn rmdir(&mut self, cwd: &str, path: &str) -> Result<()> {
        let (parent_ref, child_ref, name) = match self.resolve(cwd, path)? {
            Resolution::Found {
                parent,
                child,
                name,
            } => (parent, child, name),
            _ => return Err(OufsError::NotFound(path.to_string())),
        };
        if child_ref == ROOT_INODE {
            return Err(OufsError::InvalidArgument(
                "cannot remove the root directory".to_string(),
            ));
        }
        if name == "." || name == ".." {
            return Err(OufsError::InvalidArgument(format!("cannot remove {:?}", name)));
        }

        let child = self.read_live_inode(child_ref, path)?;
        if !child.is_directory() {
            return Err(OufsError::NotADirectory(path.to_string()));
        }
        if child.size() > 2 {
            return Err(OufsError::NotEmpty(path.to_string()));
        }

        // Take the block reference now: the inode record is wiped below.
        let data_block = child.block(0);
        if let Some(block) = data_block {
            let index = block as usize;
            if index < RESERVED_BLOCKS || index >= N_BLOCKS {
                return Err(OufsError::InvalidLayout(format!(
                    "inode {} claims block {}",
                    child_ref, block
                )));
            }
        }
        let (mut parent, dir_block, mut entries) = self.open_directory(parent_ref)?;

        if let Some(block) = data_block {
            self.dev.write_block(block as usize, &[0; BLOCK_SIZE])?;
        }
        node::write_inode(&mut self.dev, child_ref, &Inode::free())?;

        if entries.remove(&name).is_none() {
            warn!("inode {} has no entry {:?} to clear", parent_ref, name);
        }
        dir::write_directory(&mut self.dev, dir_block, &entries)?;
        parent.set_size(parent.size().saturating_sub(1));
        node::write_inode(&mut self.dev, parent_ref, &parent)?;

        alloc::free_inode(&mut self.dev, child_ref)?;
        if let Some(block) = data_block {
            alloc::free_block(&mut self.dev, block)?;
        }

        info!("rmdir {}: released inode {}", path, child_ref);
        Ok(())
    }

    /// Writes the names in the directory at `path`, one per line, sorted by
    /// byte value. Directories carry a trailing `/`. The `.` and `..` entries
    /// are left out; a file lists as its own name.
    pub fn list<W: Write>(&mut self, cwd: &str, path: &str, out: &mut W) -> Result<()> {
        let names = self.list_names(cwd, path)?;
        write_lines(out, &names)
    }

    /// Like `list`, including `./` and `../`.
    pub fn list_all<W: Write>(&mut self, cwd: &str, path: &str, out: &mut W) -> Result<()> {
        let names = self.list_all_names(cwd, path)?;
        write_lines(out, &names)
    }

    pub fn list_names(&mut self, cwd: &str, path: &str) -> Result<Vec<String>> {
        self.listing(cwd, path, false)
    }

    pub fn list_all_names(&mut self, cwd: &str, path: &str) -> Result<Vec<String>> {
        self.listing(cwd, path, true)
    }

    fn listing(&mut self, cwd: &str, path: &str, all: bool) -> Result<Vec<String>> {
        let (target_ref, name) = match self.resolve(cwd, path)? {
            Resolution::Found { child, name, .. } => (child, name),
            _ => return Err(OufsError::NotFound(path.to_string())),
        };
        let target = self.read_live_inode(target_ref, path)?;
        match target.kind() {
            InodeKind::Directory => (),
            InodeKind::File => return Ok(vec![name]),
            InodeKind::None => {
                return Err(OufsError::InvalidLayout(format!(
                    "inode {} is allocated but has no kind",
                    target_ref
                )))
            }
        }

        let block = directory_block(target_ref, &target)?;
        let entries = dir::read_directory(&mut self.dev, block)?;
        let mut names: Vec<&[u8]> = entries
            .live_entries()
            .map(|e| e.name_bytes())
            .filter(|n| all || !is_dot_entry(n))
            .collect();
        names.sort_unstable();

        let master = MasterBlock::load(&mut self.dev)?;
        let mut lines = Vec::with_capacity(names.len());
        for name in names {
            let inode_ref = match entries.find(name) {
                Some(inode) => inode,
                None => continue,
            };
            if !master.is_allocated(Unit::Inode, inode_ref as usize) {
                warn!(
                    "entry {:?} refers to free inode {}, skipping",
                    String::from_utf8_lossy(name),
                    inode_ref
                );
                continue;
            }
            let inode = node::read_inode(&mut self.dev, inode_ref)?;
            let mut line = String::from_utf8_lossy(name).into_owned();
            if inode.is_directory() {
                line.push(SEPARATOR);
            }
            lines.push(line);
        }
        debug!("list {}: {} entries", path, lines.len());
        Ok(lines)
    }

    /// Parent directory and leaf name for a path that must not exist yet.
    fn vacant(&mut self, cwd: &str, path: &str) -> Result<(InodeRef, String)> {
        match self.resolve(cwd, path)? {
            Resolution::Missing { parent, name } => Ok((parent, name)),
            Resolution::Found { .. } => Err(OufsError::AlreadyExists(path.to_string())),
            Resolution::Dangling { .. } => Err(OufsError::NotFound(path.to_string())),
        }
    }

    fn open_directory(&mut self, inode: InodeRef) -> Result<(Inode, BlockRef, DirectoryBlock)> {
        let node = node::read_inode(&mut self.dev, inode)?;
        if !node.is_directory() {
            return Err(OufsError::NotADirectory(format!("inode {}", inode)));
        }
        let block = directory_block(inode, &node)?;
        let entries = dir::read_directory(&mut self.dev, block)?;
        Ok((node, block, entries))
    }

    /// Adds `name` to a directory already known to have a free slot and counts
    /// it in the directory's size.
    fn link(
        &mut self,
        parent_ref: InodeRef,
        mut parent: Inode,
        dir_block: BlockRef,
        mut entries: DirectoryBlock,
        name: &str,
        child: InodeRef,
    ) -> Result<()> {
        let slot = entries
            .insert(name, child)
            .map_err(|_| OufsError::DirectoryFull(dir_block))?;
        dir::write_directory(&mut self.dev, dir_block, &entries)?;
        parent.set_size(parent.size() + 1);
        node::write_inode(&mut self.dev, parent_ref, &parent)?;
        debug!("linked {:?} -> inode {} at slot {} of inode {}", name, child, slot, parent_ref);
        Ok(())
    }

    /// Reads an inode only after the master block confirms it is live.
    fn read_live_inode(&mut self, inode: InodeRef, path: &str) -> Result<Inode> {
        if !alloc::is_allocated(&mut self.dev, Unit::Inode, inode as usize)? {
            warn!("{} resolves to free inode {}", path, inode);
            return Err(OufsError::NotFound(path.to_string()));
        }
        node::read_inode(&mut self.dev, inode)
    }
}

fn check_capacity<T: BlockStorage>(dev: &T) -> Result<()> {
    if dev.block_count() < N_BLOCKS {
        return Err(OufsError::InvalidArgument(format!(
            "device holds {} blocks, an image needs {}",
            dev.block_count(),
            N_BLOCKS
        )));
    }
    Ok(())
}

fn directory_block(inode: InodeRef, node: &Inode) -> Result<BlockRef> {
    node.block(0).ok_or_else(|| {
        OufsError::InvalidLayout(format!("directory inode {} owns no block", inode))
    })
}

fn is_dot_entry(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> Result<()> {
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_fs() -> Oufs<FileBlockEmulator> {
        Oufs::create(tempfile::tempfile().unwrap()).expect("Could not format test image.")
    }

    #[test]
    fn root_dir_resolves_to_root_inode() {
        let mut fs = create_test_fs();
        assert_eq!(
            fs.resolve("/", "/").unwrap(),
            Resolution::Found {
                parent: ROOT_INODE,
                child: ROOT_INODE,
                name: String::new(),
            }
        );
    }

    #[test]
    fn format_writes_root_directory() {
        let mut fs = create_test_fs();

        let root = fs.read_inode(ROOT_INODE).unwrap();
        assert_eq!(root.kind(), InodeKind::Directory);
        assert_eq!(root.size(), 2);
        assert_eq!(root.reference_count(), 1);
        assert_eq!(root.block(0), Some(ROOT_DIRECTORY_BLOCK));

        let entries = fs.read_directory(ROOT_DIRECTORY_BLOCK).unwrap();
        assert_eq!(entries, DirectoryBlock::initialized(ROOT_INODE, ROOT_INODE));

        assert!(fs.is_inode_allocated(ROOT_INODE).unwrap());
        assert!(!fs.is_inode_allocated(1).unwrap());
        assert!(fs.is_block_allocated(ROOT_DIRECTORY_BLOCK).unwrap());
        assert!(!fs.is_block_allocated(ROOT_DIRECTORY_BLOCK + 1).unwrap());
        assert_eq!(fs.read_inode(1).unwrap(), Inode::free());
    }

    #[test]
    fn file_not_found_returns_error() {
        let mut fs = create_test_fs();

        match fs.list_names("/", "/foo") {
            Err(OufsError::NotFound(path)) => assert_eq!(path, "/foo"),
            other => panic!("Unexpected result: {:?}", other),
        }
    }

    #[test]
    fn first_created_file_takes_inode_one() {
        let mut fs = create_test_fs();

        assert_eq!(fs.create_file("/", "/foo").unwrap(), 1);
        assert_eq!(fs.list_names("/", "/").unwrap(), vec!["foo"]);
    }

    #[test]
    fn mkdir_links_child_back_to_parent() {
        let mut fs = create_test_fs();
        let a = fs.mkdir("/", "a").unwrap();
        let b = fs.mkdir("/a", "b").unwrap();

        let node = fs.read_inode(b).unwrap();
        let entries = fs.read_directory(node.block(0).unwrap()).unwrap();
        assert_eq!(entries.find("."), Some(b));
        assert_eq!(entries.find(".."), Some(a));
        assert_eq!(fs.read_inode(a).unwrap().size(), 3);
    }

    #[test]
    fn mkdir_in_full_directory_changes_nothing() {
        let mut fs = create_test_fs();
        // `.` and `..` take two of the sixteen slots.
        for i in 0..14 {
            fs.create_file("/", &format!("f{}", i)).unwrap();
        }
        let master = MasterBlock::load(fs.device_mut()).unwrap();

        assert!(matches!(
            fs.mkdir("/", "full"),
            Err(OufsError::DirectoryFull(ROOT_DIRECTORY_BLOCK))
        ));
        assert!(matches!(
            fs.create_file("/", "full"),
            Err(OufsError::DirectoryFull(_))
        ));
        assert_eq!(MasterBlock::load(fs.device_mut()).unwrap(), master);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size(), 16);
    }

    #[test]
    fn mkdir_without_blocks_releases_its_inode() {
        let mut fs = create_test_fs();
        while alloc::allocate_block(fs.device_mut()).is_ok() {}
        let master = MasterBlock::load(fs.device_mut()).unwrap();

        assert!(matches!(
            fs.mkdir("/", "d"),
            Err(OufsError::Exhausted("block"))
        ));
        assert_eq!(MasterBlock::load(fs.device_mut()).unwrap(), master);
        assert!(fs.resolve("/", "d").unwrap().child().is_none());
        // Files need no block.
        assert!(fs.create_file("/", "f").is_ok());
    }

    #[test]
    fn rmdir_rejects_files_root_and_dot_entries() {
        let mut fs = create_test_fs();
        fs.create_file("/", "f").unwrap();
        fs.mkdir("/", "d").unwrap();

        assert!(matches!(fs.rmdir("/", "f"), Err(OufsError::NotADirectory(_))));
        assert!(matches!(fs.rmdir("/", "/"), Err(OufsError::InvalidArgument(_))));
        assert!(matches!(fs.rmdir("/d", "."), Err(OufsError::InvalidArgument(_))));
        assert!(matches!(fs.rmdir("/d", ".."), Err(OufsError::InvalidArgument(_))));
        assert!(matches!(fs.rmdir("/", "nope"), Err(OufsError::NotFound(_))));
        assert_eq!(fs.list_names("/", "/").unwrap(), vec!["d/", "f"]);
    }

    #[test]
    fn list_skips_entries_of_freed_inodes() {
        let mut fs = create_test_fs();
        let ghost = fs.create_file("/", "ghost").unwrap();
        fs.create_file("/", "real").unwrap();
        alloc::free_inode(fs.device_mut(), ghost).unwrap();

        assert_eq!(fs.list_names("/", "/").unwrap(), vec!["real"]);
    }

    #[test]
    fn list_all_includes_dot_entries() {
        let mut fs = create_test_fs();
        fs.mkdir("/", "d").unwrap();

        let mut out = Vec::new();
        fs.list_all("/", "/", &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "./\n../\nd/\n");
    }

    #[test]
    fn open_rejects_unformatted_device() {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .build()
            .unwrap();
        assert!(matches!(Oufs::open(dev), Err(OufsError::InvalidLayout(_))));
    }

    #[test]
    fn format_rejects_undersized_device() {
        let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_block_count(N_BLOCKS - 1)
            .build()
            .unwrap();
        assert!(matches!(Oufs::format(dev), Err(OufsError::InvalidArgument(_))));
    }

    #[test]
    fn can_create_and_reopen_initialized_filesystem() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        {
            let mut fs = Oufs::create(disk.reopen().unwrap()).unwrap();
            fs.mkdir("/", "kept").unwrap();
            fs.into_device().sync_disk().unwrap();
        }

        let mut fs = Oufs::from_file(disk.reopen().unwrap()).unwrap();
        assert_eq!(fs.list_names("/", "/").unwrap(), vec!["kept/"]);
        assert_eq!(fs.read_inode(ROOT_INODE).unwrap().size(), 3);
    }
}
