use crate::alloc::{self, State, Unit};
use crate::error::Result;
use crate::io::BlockStorage;
use crate::layout::{
    BlockCodec, BLOCK_SIZE, MASTER_BLOCK, N_BLOCKS, N_INODES, RESERVED_BLOCKS, ROOT_INODE,
};

use std::mem;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

const INODE_BITMAP_LEN: usize = N_INODES / 8;
const BLOCK_BITMAP_LEN: usize = N_BLOCKS / 8;

/// The first block of the file system. It holds nothing but the two allocation
/// bitmaps, which are the only record of which inodes and blocks are live.
///
/// A set bit means allocated. Bit `i % 8` of byte `i / 8` tracks unit `i`.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterBlock {
    inode_allocated: [u8; INODE_BITMAP_LEN],
    block_allocated: [u8; BLOCK_BITMAP_LEN],
    unused: [u8; BLOCK_SIZE - INODE_BITMAP_LEN - BLOCK_BITMAP_LEN],
}

const _: () = assert!(mem::size_of::<MasterBlock>() == BLOCK_SIZE);

impl BlockCodec for MasterBlock {}

impl MasterBlock {
    /// Bitmaps of a freshly formatted image: the root inode and every block up to
    /// and including the root directory block are taken.
    pub fn formatted() -> Self {
        let mut master = Self::new_zeroed();
        alloc::set_reserved(master.bitmap_mut(Unit::Inode), ROOT_INODE as usize);
        for block in 0..RESERVED_BLOCKS {
            alloc::set_reserved(master.bitmap_mut(Unit::Block), block);
        }
        master
    }

    pub fn bitmap(&self, unit: Unit) -> &[u8] {
        match unit {
            Unit::Inode => &self.inode_allocated,
            Unit::Block => &self.block_allocated,
        }
    }

    pub fn bitmap_mut(&mut self, unit: Unit) -> &mut [u8] {
        match unit {
            Unit::Inode => &mut self.inode_allocated,
            Unit::Block => &mut self.block_allocated,
        }
    }

    pub fn state(&self, unit: Unit, index: usize) -> State {
        alloc::get(self.bitmap(unit), index)
    }

    /// Like `state`, but indices beyond the bitmap are simply not allocated.
    pub fn is_allocated(&self, unit: Unit, index: usize) -> bool {
        index < unit.capacity() && self.state(unit, index) == State::Used
    }

    /// True when every unit the format reserves is still marked allocated.
    pub fn has_reserved_units(&self) -> bool {
        (0..Unit::Inode.reserved()).all(|i| self.state(Unit::Inode, i) == State::Used)
            && (0..Unit::Block.reserved()).all(|i| self.state(Unit::Block, i) == State::Used)
    }

    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self> {
        let mut block = [0; BLOCK_SIZE];
        dev.read_block(MASTER_BLOCK as usize, &mut block)?;
        Ok(Self::decode(&block))
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        dev.write_block(MASTER_BLOCK as usize, &self.encode())?;
        Ok(())
    }
}
