//! On-disk geometry of an OUFS image.
//!
//! # Layout
//! ==========================================================================
//! | Master (0) | Inode table (1..=8) | Root directory (9) | Data (10..128) |
//! ==========================================================================
//!
//! A block carries no type tag. What a block means is decided by where it sits:
//! see [`region_of`]. Every interpretation has its own [`BlockCodec`].

use zerocopy::{AsBytes, FromBytes, FromZeroes};

pub const BLOCK_SIZE: usize = 256;
pub const N_BLOCKS: usize = 128;
pub const N_INODES: usize = 64;

pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;
pub const N_INODE_BLOCKS: usize = (N_INODES + INODES_PER_BLOCK - 1) / INODES_PER_BLOCK;
/// Block slots carried inline by every inode. There is no indirection.
pub const BLOCKS_PER_INODE: usize = 14;

pub const DIRECTORY_ENTRIES_PER_BLOCK: usize = 16;
/// Bytes reserved for a name, including the terminating NUL.
pub const FILE_NAME_SIZE: usize = 14;
/// Longest name that can be stored.
pub const MAX_NAME_LEN: usize = FILE_NAME_SIZE - 1;

/// Index of an inode in the inode table.
pub type InodeRef = u16;
/// Index of a block on the device.
pub type BlockRef = u16;

/// On-disk marker for "no inode" / "no block".
pub const UNALLOCATED: u16 = 0xFFFF;

pub const MASTER_BLOCK: BlockRef = 0;
pub const ROOT_INODE: InodeRef = 0;
pub const ROOT_DIRECTORY_BLOCK: BlockRef = 1 + N_INODE_BLOCKS as BlockRef;
/// Blocks `0..RESERVED_BLOCKS` are owned by the format and never freed.
pub const RESERVED_BLOCKS: usize = ROOT_DIRECTORY_BLOCK as usize + 1;

pub const SEPARATOR: char = '/';

pub type Block = [u8; BLOCK_SIZE];

/// Which interpretation a block index carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Master,
    InodeTable,
    /// Directory or raw file data, depending on the inode that owns it.
    Data,
    OutOfRange,
}

pub fn region_of(index: usize) -> Region {
    match index {
        0 => Region::Master,
        i if i <= N_INODE_BLOCKS => Region::InodeTable,
        i if i < N_BLOCKS => Region::Data,
        _ => Region::OutOfRange,
    }
}

/// Encodes and decodes one fixed-layout interpretation of a block.
///
/// Implementors must be exactly `BLOCK_SIZE` bytes; each one asserts this at
/// compile time next to its definition.
pub trait BlockCodec: AsBytes + FromBytes + Sized {
    fn decode(block: &Block) -> Self {
        let mut value = <Self as FromZeroes>::new_zeroed();
        value.as_bytes_mut().copy_from_slice(&block[..]);
        value
    }

    fn encode(&self) -> Block {
        let mut block = [0; BLOCK_SIZE];
        block.copy_from_slice(self.as_bytes());
        block
    }
}

/// Maps the on-disk sentinel to `None`.
pub(crate) fn allocated(raw: u16) -> Option<u16> {
    if raw == UNALLOCATED {
        None
    } else {
        Some(raw)
    }
}
