//! In-memory [`FlashDevice`] used by this crate's own tests, grounded on
//! `embedded-nand::test::VirtualNandFlash`: a byte array standing in for the
//! device, with injectable failures for crash/wear tests. Program semantics
//! mirror real NAND — a write can only clear bits, never set them — by
//! AND-ing new bytes into the existing page content, same as the teacher's
//! `write()`.

use crate::address::{BlockIndex, PageIndex};
use crate::config::StorageAttrs;
use crate::driver::{FlashDevice, ReadStatus};
use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    OutOfBounds,
    BlockFailed,
}

/// A fully in-memory NAND-shaped device for tests. Every block starts in
/// the erased (all-ones) state.
#[derive(Clone)]
pub struct VirtualFlash {
    attrs: StorageAttrs,
    data: Vec<Vec<u8>>,
    spare: Vec<Vec<u8>>,
    bad: Vec<bool>,
    ecc_fail: Vec<bool>,
    write_fail: Vec<bool>,
    erase_fail: Vec<bool>,
    pub erase_count: Vec<u32>,
}

impl VirtualFlash {
    pub fn new(attrs: StorageAttrs) -> Self {
        let total_pages = (attrs.total_blocks * attrs.pages_per_block) as usize;
        let page_len = attrs.page_data_size as usize;
        let spare_len = attrs.spare_size() as usize;
        VirtualFlash {
            attrs,
            data: (0..total_pages).map(|_| vec![0xFFu8; page_len]).collect(),
            spare: (0..total_pages).map(|_| vec![0xFFu8; spare_len]).collect(),
            bad: vec![false; attrs.total_blocks as usize],
            ecc_fail: vec![false; total_pages],
            write_fail: vec![false; attrs.total_blocks as usize],
            erase_fail: vec![false; attrs.total_blocks as usize],
            erase_count: vec![0; attrs.total_blocks as usize],
        }
    }

    fn page_index(&self, block: BlockIndex, page: PageIndex) -> usize {
        (block.as_u32() * self.attrs.pages_per_block + page.as_u32()) as usize
    }

    /// Mark a factory-bad block, bypassing `mark_bad` (which a driver would
    /// normally reject post-format).
    pub fn seed_bad_block(&mut self, block: BlockIndex) {
        self.bad[block.as_u32() as usize] = true;
    }

    pub fn inject_ecc_failure(&mut self, block: BlockIndex, page: PageIndex) {
        let i = self.page_index(block, page);
        self.ecc_fail[i] = true;
    }

    pub fn inject_write_failure(&mut self, block: BlockIndex) {
        self.write_fail[block.as_u32() as usize] = true;
    }

    pub fn inject_erase_failure(&mut self, block: BlockIndex) {
        self.erase_fail[block.as_u32() as usize] = true;
    }
}

impl FlashDevice for VirtualFlash {
    type Error = SimError;

    fn read_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &mut [u8],
        spare: &mut [u8],
    ) -> Result<ReadStatus, Self::Error> {
        if block.as_u32() >= self.attrs.total_blocks || page.as_u32() >= self.attrs.pages_per_block {
            return Err(SimError::OutOfBounds);
        }
        let i = self.page_index(block, page);
        data.copy_from_slice(&self.data[i]);
        spare.copy_from_slice(&self.spare[i]);
        if self.ecc_fail[i] {
            Ok(ReadStatus::Unrecoverable)
        } else {
            Ok(ReadStatus::Ok)
        }
    }

    fn write_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &[u8],
        spare: &[u8],
    ) -> Result<(), Self::Error> {
        if block.as_u32() >= self.attrs.total_blocks || page.as_u32() >= self.attrs.pages_per_block {
            return Err(SimError::OutOfBounds);
        }
        if self.write_fail[block.as_u32() as usize] {
            // One-shot: a transient program failure, not a permanently
            // broken block, so the retried write against the same target
            // (after the flush engine's ERASE_TARGET step) succeeds.
            self.write_fail[block.as_u32() as usize] = false;
            return Err(SimError::BlockFailed);
        }
        let i = self.page_index(block, page);
        for (dst, src) in self.data[i].iter_mut().zip(data.iter()) {
            *dst &= *src;
        }
        for (dst, src) in self.spare[i].iter_mut().zip(spare.iter()) {
            *dst &= *src;
        }
        Ok(())
    }

    fn erase_block(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if block.as_u32() >= self.attrs.total_blocks {
            return Err(SimError::OutOfBounds);
        }
        if self.erase_fail[block.as_u32() as usize] {
            return Err(SimError::BlockFailed);
        }
        let start = (block.as_u32() * self.attrs.pages_per_block) as usize;
        let end = start + self.attrs.pages_per_block as usize;
        for i in start..end {
            self.data[i].iter_mut().for_each(|b| *b = 0xFF);
            self.spare[i].iter_mut().for_each(|b| *b = 0xFF);
            self.ecc_fail[i] = false;
        }
        self.erase_count[block.as_u32() as usize] += 1;
        Ok(())
    }

    fn supports_bad_block_query(&self) -> bool {
        true
    }

    fn is_bad(&mut self, block: BlockIndex) -> Result<bool, Self::Error> {
        if block.as_u32() >= self.attrs.total_blocks {
            return Err(SimError::OutOfBounds);
        }
        Ok(self.bad[block.as_u32() as usize])
    }

    fn mark_bad(&mut self, block: BlockIndex) -> Result<(), Self::Error> {
        if block.as_u32() >= self.attrs.total_blocks {
            return Err(SimError::OutOfBounds);
        }
        self.bad[block.as_u32() as usize] = true;
        Ok(())
    }
}
