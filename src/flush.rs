//! Flush / commit engine (spec.md §4.5) — the heart of crash consistency.
//!
//! Flushes all dirty pages belonging to one group (a single physical
//! block's worth of pages for one `serial`) into a freshly erased block,
//! then atomically swaps the tree pointer, then reclaims the old block.
//! A crash at any point before the pointer swap leaves the old block as the
//! authoritative copy; a crash after leaves the new one — never a mixture.

use crate::address::{BlockIndex, LogicalBlockIndex, LogicalPageIndex, PageIndex, Serial};
use crate::block_cache::BlockInfoCache;
use crate::buffer_pool::PageBufferPool;
use crate::config::Config;
use crate::driver::FlashDevice;
use crate::error::{DeviceError, FsError};
use crate::flash::FlashIo;
use crate::fmt::{debug, warn};
use crate::tag::{BlockTs, NodeType, PageTag, TAG_BYTES};
use crate::tree::{NodeKind, Tree};
use alloc::vec;
use alloc::vec::Vec;

/// Sentinel page-id used for a node's header page in the buffer pool, kept
/// disjoint from real (0-based) data page ids so a header write and a data
/// write for the same serial are still recognized as one "group" (spec.md
/// §4.3: "a group is identified by the owning serial").
pub const HEADER_PAGE_ID: LogicalPageIndex = LogicalPageIndex(u32::MAX);

/// What kind of group is being flushed — determines the tag written and
/// where the tree is updated.
pub enum FlushTarget {
    Header,
    Data(LogicalBlockIndex),
}

pub struct FlushEngine<'a, D: FlashDevice> {
    pub flash: &'a mut FlashIo<D>,
    pub cache: &'a mut BlockInfoCache,
    pub tree: &'a mut Tree,
    pub buffers: &'a mut PageBufferPool,
    pub config: &'a Config,
}

impl<'a, D: FlashDevice> FlushEngine<'a, D> {
    /// Flush every dirty page in the group owned by `serial`, for the
    /// logical unit described by `target`. No-op if the group has no dirty
    /// pages.
    pub fn flush_group(&mut self, serial: Serial, target: FlushTarget) -> Result<(), FsError> {
        let dirty = match &target {
            FlushTarget::Header => self
                .buffers
                .dirty_pages_in_group(serial)
                .into_iter()
                .filter(|(pid, _)| *pid == HEADER_PAGE_ID)
                .collect::<Vec<_>>(),
            FlushTarget::Data(idx) => self
                .buffers
                .dirty_pages_in_group(serial)
                .into_iter()
                .filter(|(pid, _)| {
                    *pid != HEADER_PAGE_ID
                        && LogicalBlockIndex(pid.0 / self.flash.attrs().pages_per_block) == *idx
                })
                .collect::<Vec<_>>(),
        };

        if dirty.is_empty() {
            return Ok(());
        }

        let old_block = match &target {
            FlushTarget::Header => self.tree.node(serial).and_then(|n| n.header_block),
            FlushTarget::Data(idx) => self.tree.data_block(serial, *idx),
        };

        let pages_per_block = self.flash.attrs().pages_per_block;
        let node_type = match &target {
            FlushTarget::Header => match self.tree.node(serial).map(|n| n.kind) {
                Some(NodeKind::Directory) => NodeType::DirectoryHeader,
                _ => NodeType::FileHeader,
            },
            FlushTarget::Data(_) => NodeType::Data,
        };

        let base_page_id: u32 = match &target {
            FlushTarget::Header => 0,
            FlushTarget::Data(idx) => idx.0 * pages_per_block,
        };
        let is_header = matches!(target, FlushTarget::Header);

        loop {
            match self.attempt_copy_forward(
                serial, node_type, old_block, base_page_id, pages_per_block, is_header, &dirty,
            )
            {
                Ok(new_block) => {
                    // Commit point: repoint the tree.
                    match &target {
                        FlushTarget::Header => {
                            if let Some(n) = self.tree.node_mut(serial) {
                                n.header_block = Some(new_block);
                            }
                        }
                        FlushTarget::Data(idx) => {
                            self.tree.set_data_block(serial, *idx, new_block);
                        }
                    }
                    for (_, buf) in &dirty {
                        self.buffers.mark_clean(*buf);
                        self.buffers.retire(*buf);
                    }
                    if let Some(old) = old_block {
                        self.reclaim_old(old);
                    }
                    return Ok(());
                }
                Err(FlushFail::NoSpace) => return Err(FsError::NoSpace),
            }
        }
    }

    /// One pass of PICK_TARGET -> COPY_FORWARD (spec.md §4.5 state machine),
    /// looping internally on write failure by erasing/condemning the target
    /// and picking another.
    fn attempt_copy_forward(
        &mut self,
        serial: Serial,
        node_type: NodeType,
        old_block: Option<BlockIndex>,
        base_page_id: u32,
        pages_per_block: u32,
        is_header: bool,
        dirty: &[(LogicalPageIndex, crate::buffer_pool::BufferId)],
    ) -> Result<BlockIndex, FlushFail> {
        loop {
            if (self.tree.erased_count() as u32) < self.config.min_erased.saturating_add(1) {
                return Err(FlushFail::NoSpace);
            }
            let Some(target) = self.tree.take_erased() else {
                return Err(FlushFail::NoSpace);
            };
            self.cache.pin(target);

            let new_ts = match old_block {
                Some(b) => self
                    .cache
                    .get(b, self.flash, self.flash.attrs())
                    .map(|s| s.block_ts)
                    .unwrap_or_default()
                    .succ(),
                None => BlockTs::new(0),
            };

            match self.copy_forward_into(
                target, serial, node_type, old_block, base_page_id, pages_per_block, is_header, new_ts, dirty,
            ) {
                Ok(()) => {
                    self.cache.unpin(target);
                    return Ok(target);
                }
                Err(_write_err) => {
                    warn!("copy-forward into block {} failed, retrying", target.as_u32());
                    self.cache.unpin(target);
                    self.cache.invalidate(target);
                    match self.flash.erase_block(target) {
                        Ok(()) => {
                            self.tree.push_erased(target);
                        }
                        Err(_) => {
                            let _ = self.flash.mark_bad(target);
                            self.tree.push_bad(target);
                        }
                    }
                    // PICK_TARGET again.
                }
            }
        }
    }

    fn copy_forward_into(
        &mut self,
        target: BlockIndex,
        serial: Serial,
        node_type: NodeType,
        old_block: Option<BlockIndex>,
        base_page_id: u32,
        pages_per_block: u32,
        is_header: bool,
        new_ts: BlockTs,
        dirty: &[(LogicalPageIndex, crate::buffer_pool::BufferId)],
    ) -> Result<(), DeviceError<D::Error>> {
        let page_size = self.flash.attrs().page_data_size as usize;
        let spare_size = self.flash.attrs().spare_size() as usize;

        for offset in 0..pages_per_block {
            let page_id = base_page_id + offset;
            let dest_page = PageIndex::new(offset);

            // A header's single dirty buffer is keyed with the sentinel
            // HEADER_PAGE_ID rather than a 0-based page_id; it always lands
            // at offset 0 of its block.
            let dirty_match = if is_header {
                if offset == 0 {
                    dirty.iter().find(|(pid, _)| *pid == HEADER_PAGE_ID)
                } else {
                    None
                }
            } else {
                dirty.iter().find(|(pid, _)| pid.0 == page_id)
            };

            if let Some((_, buf_id)) = dirty_match {
                let data = self.buffers.data(*buf_id).to_vec();
                let mut spare = vec![0u8; spare_size];
                let tag = PageTag {
                    serial,
                    node_type,
                    page_id,
                    block_ts: new_ts,
                    data_len: data.len() as u32,
                };
                tag.encode(&mut spare[..TAG_BYTES.min(spare.len())]);
                self.flash
                    .write_page(target, dest_page, &data, &mut spare, self.config)?;
                self.buffers.set_physical(*buf_id, (target, dest_page));
            } else if let Some(old) = old_block {
                let mut data = vec![0u8; page_size];
                let mut spare = vec![0u8; spare_size];
                match self.flash.read_page(old, PageIndex::new(offset), &mut data, &mut spare) {
                    Ok(_) => {
                        if PageTag::decode(&spare).is_none() {
                            // Nothing valid to copy at this slot.
                            continue;
                        }
                        let mut new_spare = spare.clone();
                        let tag = PageTag {
                            serial,
                            node_type,
                            page_id,
                            block_ts: new_ts,
                            data_len: data.len() as u32,
                        };
                        tag.encode(&mut new_spare[..TAG_BYTES.min(new_spare.len())]);
                        self.flash
                            .write_page(target, dest_page, &data, &mut new_spare, self.config)?;
                    }
                    Err(DeviceError::EccUnrecoverable) => {
                        // Source page unreadable: skip, can't carry it forward.
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            // else: nothing dirty and nothing old at this slot — leave erased.
        }
        Ok(())
    }

    fn reclaim_old(&mut self, old: BlockIndex) {
        self.cache.invalidate(old);
        match self.flash.erase_block(old) {
            Ok(()) => {
                debug!("reclaimed block {}", old.as_u32());
                self.tree.push_erased(old);
            }
            Err(_) => {
                let _ = self.flash.mark_bad(old);
                self.tree.push_bad(old);
            }
        }
    }
}

enum FlushFail {
    NoSpace,
}

/// Recovery rule applied by mount when two blocks both claim the same
/// `(serial, logical index)` (spec.md §4.5): prefer the circularly-newer
/// `block_ts`; on a tie prefer more valid pages; on a further tie prefer the
/// lower physical block number.
pub fn pick_authoritative(
    a: (BlockIndex, BlockTs, u32),
    b: (BlockIndex, BlockTs, u32),
) -> BlockIndex {
    let (a_block, a_ts, a_valid) = a;
    let (b_block, b_ts, b_valid) = b;
    if a_ts.is_newer_than(b_ts) {
        return a_block;
    }
    if b_ts.is_newer_than(a_ts) {
        return b_block;
    }
    if a_valid != b_valid {
        return if a_valid > b_valid { a_block } else { b_block };
    }
    if a_block.as_u32() <= b_block.as_u32() {
        a_block
    } else {
        b_block
    }
}
