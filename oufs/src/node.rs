use crate::error::Result;
use crate::io::BlockStorage;
use crate::layout::{
  allocated, BlockCodec, BlockRef, InodeRef, BLOCKS_PER_INODE, BLOCK_SIZE, INODES_PER_BLOCK,
  INODE_SIZE, UNALLOCATED,
};

use log::debug;
use std::mem;
use zerocopy::byteorder::{LittleEndian, U16};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

const KIND_DIRECTORY: u8 = b'D';
const KIND_FILE: u8 = b'F';
const KIND_NONE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
  File,
  Directory,
  /// Not in use. Any byte other than the file and directory tags decodes to this.
  None,
}

#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Copy, Clone, Debug, PartialEq, Eq)]
/// This structure __must be exactly `INODE_SIZE` bytes.__
pub struct Inode {
  /// 'D' for directories, 'F' for files.
  kind: u8,
  /// The number of directory entries referring to this inode.
  n_references: u8,
  /// Bytes for a file, entries for a directory.
  size: U16<LittleEndian>,
  /// Data blocks owned by this inode. Unused slots hold `UNALLOCATED`.
  data: [U16<LittleEndian>; BLOCKS_PER_INODE],
}

const _: () = assert!(mem::size_of::<Inode>() == INODE_SIZE);

impl Inode {
  /// The record an unused table slot carries.
  pub fn free() -> Self {
    Self {
      kind: KIND_NONE,
      n_references: 0,
      size: U16::new(0),
      data: [U16::new(UNALLOCATED); BLOCKS_PER_INODE],
    }
  }

  /// A directory holding only `.` and `..` in `block`.
  pub fn new_directory(block: BlockRef) -> Self {
    let mut node = Self::free();
    node.kind = KIND_DIRECTORY;
    node.n_references = 1;
    node.size = U16::new(2);
    node.data[0] = U16::new(block);
    node
  }

  /// An empty file. No data block is claimed until content is written.
  pub fn new_file() -> Self {
    let mut node = Self::free();
    node.kind = KIND_FILE;
    node.n_references = 1;
    node
  }

  pub fn kind(&self) -> InodeKind {
    match self.kind {
      KIND_DIRECTORY => InodeKind::Directory,
      KIND_FILE => InodeKind::File,
      _ => InodeKind::None,
    }
  }

  pub fn is_directory(&self) -> bool {
    self.kind() == InodeKind::Directory
  }

  pub fn reference_count(&self) -> u8 {
    self.n_references
  }

  pub fn size(&self) -> u16 {
    self.size.get()
  }

  pub fn set_size(&mut self, size: u16) {
    self.size.set(size);
  }

  /// The block in slot `slot`, if one is assigned.
  pub fn block(&self, slot: usize) -> Option<BlockRef> {
    self.data.get(slot).and_then(|b| allocated(b.get()))
  }

  /// Every assigned block, in slot order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockRef> + '_ {
    self.data.iter().filter_map(|b| allocated(b.get()))
  }
}

/// One block of the inode table.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Copy, Clone, Debug, PartialEq, Eq)]
pub struct InodeBlock {
  inodes: [Inode; INODES_PER_BLOCK],
}

const _: () = assert!(mem::size_of::<InodeBlock>() == BLOCK_SIZE);

impl BlockCodec for InodeBlock {}

impl InodeBlock {
  /// A table block in which every slot is unused.
  pub fn free() -> Self {
    Self {
      inodes: [Inode::free(); INODES_PER_BLOCK],
    }
  }
}

/// Table block and slot holding inode `inode`.
pub fn locate(inode: InodeRef) -> (usize, usize) {
  let i = inode as usize;
  (i / INODES_PER_BLOCK + 1, i % INODES_PER_BLOCK)
}

/// Reads an inode record. Neither range nor liveness is checked: a freed inode
/// comes back with whatever its slot still holds.
pub fn read_inode<T: BlockStorage>(dev: &mut T, inode: InodeRef) -> Result<Inode> {
  let (blocknr, slot) = locate(inode);
  debug!("reading inode {} from block {} slot {}", inode, blocknr, slot);
  let mut block = [0; BLOCK_SIZE];
  dev.read_block(blocknr, &mut block)?;
  Ok(InodeBlock::decode(&block).inodes[slot])
}

/// Replaces one inode record, leaving the others in its table block untouched.
pub fn write_inode<T: BlockStorage>(dev: &mut T, inode: InodeRef, node: &Inode) -> Result<()> {
  let (blocknr, slot) = locate(inode);
  debug!("writing inode {} to block {} slot {}", inode, blocknr, slot);
  let mut block = [0; BLOCK_SIZE];
  dev.read_block(blocknr, &mut block)?;
  let mut table = InodeBlock::decode(&block);
  table.inodes[slot] = *node;
  dev.write_block(blocknr, &table.encode())?;
  Ok(())
}
