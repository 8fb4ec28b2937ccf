//! The driver contract (spec.md §6), expressed as a Rust trait in the shape
//! of `embedded-nand::NandFlash`. Concrete chip drivers are external
//! collaborators; this crate only consumes the trait.

use crate::address::{BlockIndex, PageIndex};
use core::fmt::Debug;

/// Outcome of reading a page: whether ECC corrected, failed, or the page was
/// clean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadStatus {
    Ok,
    Corrected,
    Unrecoverable,
}

/// A single NAND/NOR device (or a partition/window onto one), presenting
/// page-granular read/program and block-granular erase with a bad-block
/// predicate.
///
/// Mirrors `embedded-nand::NandFlash`: associated `Error`, page/block
/// geometry as methods (not associated consts) because a partition's
/// `start_block..end_block` window is a runtime value, not known at the
/// trait-impl site.
pub trait FlashDevice {
    type Error: Debug;

    /// Read a page's data and spare area. Returns the ECC outcome alongside
    /// the data; `Unrecoverable` is still returned as `Ok` at this layer —
    /// the flash I/O wrapper (src/flash.rs) is what turns it into an error.
    fn read_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &mut [u8],
        spare: &mut [u8],
    ) -> Result<ReadStatus, Self::Error>;

    /// Program a page's data and spare area. Pages within a block must be
    /// programmed in increasing order and never reprogrammed.
    fn write_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &[u8],
        spare: &[u8],
    ) -> Result<(), Self::Error>;

    /// Erase a block, leaving every byte in the erased pattern (all-ones for
    /// NAND).
    fn erase_block(&mut self, block: BlockIndex) -> Result<(), Self::Error>;

    /// True if the driver can answer bad-block queries itself. When false,
    /// the flash I/O wrapper synthesizes the answer from the block-status
    /// byte at a fixed spare offset (spec.md §6).
    fn supports_bad_block_query(&self) -> bool {
        false
    }

    /// Query whether a block is bad, when `supports_bad_block_query` is
    /// true. The default panics; implementations that return `true` above
    /// must override this.
    fn is_bad(&mut self, _block: BlockIndex) -> Result<bool, Self::Error> {
        Ok(false)
    }

    /// Ask the driver to mark a block bad, if it maintains its own bad-block
    /// table. Best-effort: failures here are not fatal to the caller.
    fn mark_bad(&mut self, _block: BlockIndex) -> Result<(), Self::Error> {
        Ok(())
    }
}
