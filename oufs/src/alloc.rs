use crate::error::{OufsError, Result};
use crate::io::BlockStorage;
use crate::layout::{BlockRef, InodeRef, N_BLOCKS, N_INODES, RESERVED_BLOCKS};
use crate::master::MasterBlock;

use log::{debug, warn};
use std::fmt;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// The two kinds of unit tracked by the master block.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Unit {
    Inode,
    Block,
}

impl Unit {
    pub fn capacity(self) -> usize {
        match self {
            Unit::Inode => N_INODES,
            Unit::Block => N_BLOCKS,
        }
    }

    /// Units `0..reserved()` belong to the format and are never freed.
    pub fn reserved(self) -> usize {
        match self {
            Unit::Inode => 1,
            Unit::Block => RESERVED_BLOCKS,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Unit::Inode => "inode",
            Unit::Block => "block",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn get(bitmap: &[u8], index: usize) -> State {
    if bitmap[index / 8] & (1 << (index % 8)) == 0 {
        State::Free
    } else {
        State::Used
    }
}

pub fn set_reserved(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] |= 1 << (index % 8);
}

pub fn set_free(bitmap: &mut [u8], index: usize) {
    bitmap[index / 8] &= !(1 << (index % 8));
}

/// Position of the least significant zero bit, if the byte has one.
pub fn lowest_free_bit(byte: u8) -> Option<u32> {
    if byte == 0xFF {
        None
    } else {
        Some((!byte).trailing_zeros())
    }
}

/// Index of the first free unit: bytes are scanned in ascending order and bits
/// within a byte from least to most significant.
pub fn first_free(bitmap: &[u8]) -> Option<usize> {
    bitmap
        .iter()
        .enumerate()
        .find_map(|(i, &byte)| lowest_free_bit(byte).map(|bit| i * 8 + bit as usize))
}

/// Claims the lowest free unit and persists the master block.
///
/// The load, update and store happen back to back on `dev`; callers hold the
/// device mutably for the whole cycle so no second allocation can interleave.
pub fn allocate<T: BlockStorage>(dev: &mut T, unit: Unit) -> Result<usize> {
    let mut master = MasterBlock::load(dev)?;
    let index = first_free(master.bitmap(unit))
        .filter(|&i| i < unit.capacity())
        .ok_or(OufsError::Exhausted(unit.name()))?;
    set_reserved(master.bitmap_mut(unit), index);
    master.store(dev)?;
    debug!("allocated {} {}", unit, index);
    Ok(index)
}

/// Releases one unit. Only the bit is cleared; the payload is left for the
/// caller to reset.
pub fn free<T: BlockStorage>(dev: &mut T, unit: Unit, index: usize) -> Result<()> {
    if index < unit.reserved() || index >= unit.capacity() {
        return Err(OufsError::InvalidArgument(format!(
            "{} {} cannot be freed",
            unit, index
        )));
    }
    let mut master = MasterBlock::load(dev)?;
    if get(master.bitmap(unit), index) == State::Free {
        warn!("{} {} is already free", unit, index);
        return Ok(());
    }
    set_free(master.bitmap_mut(unit), index);
    master.store(dev)?;
    debug!("freed {} {}", unit, index);
    Ok(())
}

pub fn is_allocated<T: BlockStorage>(dev: &mut T, unit: Unit, index: usize) -> Result<bool> {
    let master = MasterBlock::load(dev)?;
    Ok(master.is_allocated(unit, index))
}

pub fn allocate_inode<T: BlockStorage>(dev: &mut T) -> Result<InodeRef> {
    allocate(dev, Unit::Inode).map(|i| i as InodeRef)
}

pub fn allocate_block<T: BlockStorage>(dev: &mut T) -> Result<BlockRef> {
    allocate(dev, Unit::Block).map(|i| i as BlockRef)
}

pub fn free_inode<T: BlockStorage>(dev: &mut T, inode: InodeRef) -> Result<()> {
    free(dev, Unit::Inode, inode as usize)
}

pub fn free_block<T: BlockStorage>(dev: &mut T, block: BlockRef) -> Result<()> {
    free(dev, Unit::Block, block as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::layout::ROOT_DIRECTORY_BLOCK;

    fn formatted_device() -> FileBlockEmulator {
        let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .build()
            .unwrap();
        MasterBlock::formatted().store(&mut dev).unwrap();
        dev
    }

    #[test]
    fn can_read_and_write_values_to_bitmap() {
        let mut bmp = [0u8; 16];

        set_reserved(&mut bmp, 2);

        assert_eq!(get(&bmp, 0), State::Free);
        assert_eq!(get(&bmp, 2), State::Used);
        assert_eq!(bmp[0], 0b0000_0100);
    }

    #[test]
    fn can_set_values_at_ends_of_bitmap() {
        let mut bmp = [0u8; 16];

        set_reserved(&mut bmp, 0);
        set_reserved(&mut bmp, 127);

        assert_eq!(get(&bmp, 0), State::Used);
        assert_eq!(get(&bmp, 127), State::Used);
        assert_eq!(bmp[15], 0x80);
    }

    #[test]
    fn can_toggle_block_between_free_and_used() {
        let mut bmp = [0u8; 16];

        set_reserved(&mut bmp, 10);
        set_reserved(&mut bmp, 11);
        assert_eq!(get(&bmp, 10), State::Used);

        set_free(&mut bmp, 10);
        assert_eq!(get(&bmp, 10), State::Free);
        // Clearing one bit leaves its neighbours alone.
        assert_eq!(get(&bmp, 11), State::Used);
    }

    #[test]
    fn free_bit_search_is_least_significant_first() {
        assert_eq!(lowest_free_bit(0b0101_0111), Some(3));
        assert_eq!(lowest_free_bit(0x00), Some(0));
        assert_eq!(lowest_free_bit(0x7F), Some(7));
        assert_eq!(lowest_free_bit(0xFF), None);
    }

    #[test]
    fn first_free_skips_full_bytes() {
        assert_eq!(first_free(&[0xFF, 0xFF, 0b0101_0111]), Some(19));
        assert_eq!(first_free(&[0xFF, 0x03]), Some(10));
        assert_eq!(first_free(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn allocations_return_lowest_free_units_in_order() {
        let mut dev = formatted_device();

        let blocks: Vec<BlockRef> = (0..5).map(|_| allocate_block(&mut dev).unwrap()).collect();
        assert_eq!(blocks, vec![10, 11, 12, 13, 14]);

        let inodes: Vec<InodeRef> = (0..3).map(|_| allocate_inode(&mut dev).unwrap()).collect();
        assert_eq!(inodes, vec![1, 2, 3]);

        assert!(is_allocated(&mut dev, Unit::Block, 14).unwrap());
        assert!(!is_allocated(&mut dev, Unit::Block, 15).unwrap());
    }

    #[test]
    fn exhausting_every_unit_reports_exhaustion() {
        let mut dev = formatted_device();

        for expected in 1..N_INODES {
            assert_eq!(allocate_inode(&mut dev).unwrap() as usize, expected);
        }
        match allocate_inode(&mut dev) {
            Err(OufsError::Exhausted("inode")) => (),
            other => panic!("expected inode exhaustion, got {:?}", other),
        }

        for expected in RESERVED_BLOCKS..N_BLOCKS {
            assert_eq!(allocate_block(&mut dev).unwrap() as usize, expected);
        }
        match allocate_block(&mut dev) {
            Err(OufsError::Exhausted("block")) => (),
            other => panic!("expected block exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn freed_unit_is_the_next_one_allocated() {
        let mut dev = formatted_device();
        for _ in 0..6 {
            allocate_block(&mut dev).unwrap();
        }

        free_block(&mut dev, 12).unwrap();
        assert!(!is_allocated(&mut dev, Unit::Block, 12).unwrap());
        assert_eq!(allocate_block(&mut dev).unwrap(), 12);

        let inode = allocate_inode(&mut dev).unwrap();
        free_inode(&mut dev, inode).unwrap();
        assert_eq!(allocate_inode(&mut dev).unwrap(), inode);
    }

    #[test]
    fn reserved_units_cannot_be_freed() {
        let mut dev = formatted_device();

        assert!(matches!(
            free_inode(&mut dev, 0),
            Err(OufsError::InvalidArgument(_))
        ));
        assert!(matches!(
            free_block(&mut dev, ROOT_DIRECTORY_BLOCK),
            Err(OufsError::InvalidArgument(_))
        ));
        assert!(matches!(
            free_block(&mut dev, N_BLOCKS as BlockRef),
            Err(OufsError::InvalidArgument(_))
        ));
        assert!(MasterBlock::load(&mut dev).unwrap().has_reserved_units());
    }

    #[test]
    fn freeing_a_free_unit_changes_nothing() {
        let mut dev = formatted_device();
        let before = MasterBlock::load(&mut dev).unwrap();

        free_inode(&mut dev, 5).unwrap();

        assert_eq!(MasterBlock::load(&mut dev).unwrap(), before);
    }
}
