//! Free block list
//!
//! Blocks vacated by deletes or relocating updates are remembered here so a later
//! write can reuse them. A reused block is always consumed whole, and neighbouring
//! free blocks are never merged.

/// A reclaimed region of the data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FreeBlock {
    /// Offset within file
    pub offset: u32,
    /// Size of the block in bytes, header included
    pub size: usize,
}

#[derive(Debug, Default)]
pub(crate) struct FreeList {
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    pub(crate) fn push(&mut self, offset: u32, size: usize) {
        self.blocks.push(FreeBlock { offset, size });
    }

    /// Position of the block wasting the fewest bytes when holding `size` bytes.
    ///
    /// Ties go to the block that was freed first.
    pub(crate) fn best_fit(&self, size: usize) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.size >= size)
            .min_by_key(|(pos, block)| (block.size - size, *pos))
            .map(|(pos, _)| pos)
    }

    pub(crate) fn get(&self, pos: usize) -> Option<&FreeBlock> {
        self.blocks.get(pos)
    }

    pub(crate) fn take(&mut self, pos: usize) -> FreeBlock {
        self.blocks.remove(pos)
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes held by free blocks.
    pub(crate) fn total(&self) -> usize {
        self.blocks.iter().map(|block| block.size).sum()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &FreeBlock> + '_ {
        self.blocks.iter()
    }

    pub(crate) fn contains(&self, offset: u32, size: usize) -> bool {
        self.blocks
            .iter()
            .any(|block| block.offset == offset && block.size == size)
    }
}
