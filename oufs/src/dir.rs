use crate::error::{OufsError, Result};
use crate::io::BlockStorage;
use crate::layout::{
    allocated, region_of, BlockCodec, BlockRef, InodeRef, Region, BLOCK_SIZE,
    DIRECTORY_ENTRIES_PER_BLOCK, FILE_NAME_SIZE, MAX_NAME_LEN, UNALLOCATED,
};
use crate::node::Inode;

use log::warn;
use std::borrow::Cow;
use std::mem;
use zerocopy::byteorder::{LittleEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

/// A name to inode binding. A slot is unused when its inode reference is
/// `UNALLOCATED`; its name is then empty.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// NUL terminated unless all `FILE_NAME_SIZE` bytes are used.
    name: [u8; FILE_NAME_SIZE],
    inode_reference: U16<LittleEndian>,
}

impl DirectoryEntry {
    pub fn empty() -> Self {
        Self {
            name: [0; FILE_NAME_SIZE],
            inode_reference: U16::new(UNALLOCATED),
        }
    }

    /// Names longer than `MAX_NAME_LEN` bytes are cut short.
    pub fn new(name: &str, inode: InodeRef) -> Self {
        let mut entry = Self::empty();
        let len = name.len().min(MAX_NAME_LEN);
        entry.name[..len].copy_from_slice(&name.as_bytes()[..len]);
        entry.inode_reference = U16::new(inode);
        entry
    }

    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(FILE_NAME_SIZE);
        &self.name[..end]
    }

    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    pub fn inode(&self) -> Option<InodeRef> {
        allocated(self.inode_reference.get())
    }

    pub fn is_free(&self) -> bool {
        self.inode().is_none()
    }
}

/// A data block read as a fixed array of entries.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectoryBlock {
    entries: [DirectoryEntry; DIRECTORY_ENTRIES_PER_BLOCK],
}

const _: () = assert!(mem::size_of::<DirectoryBlock>() == BLOCK_SIZE);

impl BlockCodec for DirectoryBlock {}

impl DirectoryBlock {
    /// A fresh directory: `.` in slot 0, `..` in slot 1, every other slot unused.
    pub fn initialized(this: InodeRef, parent: InodeRef) -> Self {
        let mut block = Self {
            entries: [DirectoryEntry::empty(); DIRECTORY_ENTRIES_PER_BLOCK],
        };
        block.entries[0] = DirectoryEntry::new(".", this);
        block.entries[1] = DirectoryEntry::new("..", parent);
        block
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Entries that reference an inode.
    pub fn live_entries(&self) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.entries.iter().filter(|e| !e.is_free())
    }

    /// First entry whose name equals `name` byte for byte. Entries are matched
    /// by value, never by slot.
    pub fn find<N: AsRef<[u8]>>(&self, name: N) -> Option<InodeRef> {
        let name = name.as_ref();
        self.entries
            .iter()
            .find(|e| e.name_bytes() == name)
            .and_then(DirectoryEntry::inode)
    }

    pub fn free_slot(&self) -> Option<usize> {
        self.entries.iter().position(DirectoryEntry::is_free)
    }

    /// Binds `name` to `inode` in the first unused slot and returns that slot.
    /// Slot 0 is as valid a result as any other.
    pub fn insert(&mut self, name: &str, inode: InodeRef) -> std::result::Result<usize, Full> {
        let slot = self.free_slot().ok_or(Full)?;
        self.entries[slot] = DirectoryEntry::new(name, inode);
        Ok(slot)
    }

    /// Clears the first entry named `name`, returning the inode it referenced.
    pub fn remove(&mut self, name: &str) -> Option<InodeRef> {
        let slot = self
            .entries
            .iter()
            .position(|e| !e.is_free() && e.name_bytes() == name.as_bytes())?;
        let inode = self.entries[slot].inode();
        self.entries[slot] = DirectoryEntry::empty();
        inode
    }
}

/// Every slot of a directory block is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Full;

fn check_data_block(block: BlockRef) -> Result<()> {
    match region_of(block as usize) {
        Region::Data => Ok(()),
        region => Err(OufsError::InvalidLayout(format!(
            "block {} lies in the {:?} region and cannot hold a directory",
            block, region
        ))),
    }
}

pub fn read_directory<T: BlockStorage>(dev: &mut T, block: BlockRef) -> Result<DirectoryBlock> {
    check_data_block(block)?;
    let mut buf = [0; BLOCK_SIZE];
    dev.read_block(block as usize, &mut buf)?;
    Ok(DirectoryBlock::decode(&buf))
}

pub fn write_directory<T: BlockStorage>(
    dev: &mut T,
    block: BlockRef,
    entries: &DirectoryBlock,
) -> Result<()> {
    check_data_block(block)?;
    dev.write_block(block as usize, &entries.encode())?;
    Ok(())
}

/// Looks `name` up in the directory described by `dir`.
///
/// A directory block that cannot be read is reported the same way as a name
/// that is not there.
pub fn find_entry<T: BlockStorage>(dev: &mut T, dir: &Inode, name: &str) -> Option<InodeRef> {
    let block = dir.block(0)?;
    match read_directory(dev, block) {
        Ok(entries) => entries.find(name),
        Err(e) => {
            warn!("directory block {} unreadable, treating {:?} as missing: {}", block, name, e);
            None
        }
    }
}
