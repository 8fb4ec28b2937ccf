//! Block-info cache (spec.md §4.2): a bounded set of decoded per-block page
//! tag arrays, evicted least-recently-used, excluding blocks pinned by an
//! active flush.

use crate::address::{BlockIndex, PageIndex};
use crate::config::StorageAttrs;
use crate::driver::FlashDevice;
use crate::error::DeviceError;
use crate::flash::FlashIo;
use crate::tag::{BlockSummary, PageTag};
use alloc::vec;
use alloc::vec::Vec;

struct Entry {
    block: BlockIndex,
    summary: BlockSummary,
    clock: u32,
    pinned: bool,
}

/// Bounded LRU cache of [`BlockSummary`] entries, keyed by physical block.
pub struct BlockInfoCache {
    entries: Vec<Entry>,
    capacity: usize,
    clock: u32,
}

impl BlockInfoCache {
    pub fn new(capacity: usize) -> Self {
        BlockInfoCache {
            entries: Vec::with_capacity(capacity),
            capacity,
            clock: 0,
        }
    }

    /// Pin a block's entry (if cached) so it cannot be evicted while a flush
    /// holds a reference to it.
    pub fn pin(&mut self, block: BlockIndex) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.block == block) {
            e.pinned = true;
        }
    }

    pub fn unpin(&mut self, block: BlockIndex) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.block == block) {
            e.pinned = false;
        }
    }

    /// Drop a cached entry outright (the block was erased or reprogrammed
    /// out from under the cache).
    pub fn invalidate(&mut self, block: BlockIndex) {
        self.entries.retain(|e| e.block != block);
    }

    /// Fetch the summary for `block`, scanning the device on a cache miss.
    pub fn get<D: FlashDevice>(
        &mut self,
        block: BlockIndex,
        flash: &mut FlashIo<D>,
        attrs: &StorageAttrs,
    ) -> Result<BlockSummary, DeviceError<D::Error>> {
        self.clock += 1;
        let clock = self.clock;
        if let Some(e) = self.entries.iter_mut().find(|e| e.block == block) {
            e.clock = clock;
            return Ok(e.summary.clone());
        }

        let summary = scan_block(block, flash, attrs)?;

        if self.entries.len() >= self.capacity {
            self.evict_one();
        }
        self.entries.push(Entry {
            block,
            summary: summary.clone(),
            clock,
            pinned: false,
        });
        Ok(summary)
    }

    fn evict_one(&mut self) {
        let victim = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.pinned)
            .min_by_key(|(_, e)| e.clock)
            .map(|(i, _)| i);
        if let Some(i) = victim {
            self.entries.remove(i);
        }
        // If every entry is pinned, the cache is allowed to temporarily
        // exceed capacity by one rather than evict a pinned block.
    }
}

/// Scan every page of `block`, decoding its tag and validating the tag ECC.
/// Unreadable tags mark just that page invalid; they do not condemn the
/// block (spec.md §4.2).
pub(crate) fn scan_block<D: FlashDevice>(
    block: BlockIndex,
    flash: &mut FlashIo<D>,
    attrs: &StorageAttrs,
) -> Result<BlockSummary, DeviceError<D::Error>> {
    let mut summary = BlockSummary::new(attrs.pages_per_block as usize);
    let mut data = vec![0u8; attrs.page_data_size as usize];
    let mut spare = vec![0u8; attrs.spare_size() as usize];
    let mut first = true;

    for page in 0..attrs.pages_per_block {
        let page_idx = PageIndex::new(page);
        let read = flash.read_page(block, page_idx, &mut data, &mut spare);
        let spare_bytes = match read {
            Ok(_) => &spare,
            Err(DeviceError::EccUnrecoverable) => {
                summary.page_valid[page as usize] = false;
                continue;
            }
            Err(e) => return Err(e),
        };
        let Some(tag) = PageTag::decode(spare_bytes) else {
            summary.page_valid[page as usize] = false;
            continue;
        };
        if first {
            summary.serial = tag.serial;
            summary.node_type = tag.node_type;
            summary.block_ts = tag.block_ts;
            summary.first_page_id = Some(tag.page_id);
            first = false;
        }
        summary.page_valid[page as usize] = true;
        summary.valid_count += 1;
    }
    Ok(summary)
}
