//! Page buffer pool (spec.md §4.3): a fixed pool of page-sized buffers,
//! grouped into at most `max_dirty_buf_groups` dirty groups (one per owning
//! serial), with a reserved clone allowance for the flush engine.

use crate::address::{BlockIndex, LogicalPageIndex, PageIndex, Serial};
use crate::config::Config;
use crate::error::FsError;
use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferId(pub usize);

struct PageBuffer {
    owner: Option<(Serial, LogicalPageIndex)>,
    physical: Option<(BlockIndex, PageIndex)>,
    dirty: bool,
    ref_count: u32,
    touch: u32,
    data: Vec<u8>,
}

impl PageBuffer {
    fn empty(page_size: usize) -> Self {
        PageBuffer {
            owner: None,
            physical: None,
            dirty: false,
            ref_count: 0,
            touch: 0,
            data: vec![0u8; page_size],
        }
    }
}

/// Pool of `max_page_buffers` page-sized buffers. `clone_buffers_threshold`
/// of them are never handed out to ordinary `acquire` calls — they are
/// reserved so the flush engine can always clone a source page forward.
pub struct PageBufferPool {
    buffers: Vec<PageBuffer>,
    page_size: usize,
    clone_reserved: usize,
    max_dirty_buf_groups: usize,
    max_dirty_pages_in_a_block: usize,
    touch_clock: u32,
}

impl PageBufferPool {
    pub fn new(config: &Config, page_size: usize) -> Self {
        let buffers = (0..config.max_page_buffers)
            .map(|_| PageBuffer::empty(page_size))
            .collect();
        PageBufferPool {
            buffers,
            page_size,
            clone_reserved: config.clone_buffers_threshold,
            max_dirty_buf_groups: config.max_dirty_buf_groups,
            max_dirty_pages_in_a_block: config.max_dirty_pages_in_a_block,
            touch_clock: 0,
        }
    }

    fn tick(&mut self) -> u32 {
        self.touch_clock += 1;
        self.touch_clock
    }

    pub fn find(&self, serial: Serial, page_id: LogicalPageIndex) -> Option<BufferId> {
        self.buffers
            .iter()
            .position(|b| b.owner == Some((serial, page_id)))
            .map(BufferId)
    }

    pub fn data(&self, id: BufferId) -> &[u8] {
        &self.buffers[id.0].data
    }

    pub fn data_mut(&mut self, id: BufferId) -> &mut [u8] {
        &mut self.buffers[id.0].data
    }

    pub fn is_dirty(&self, id: BufferId) -> bool {
        self.buffers[id.0].dirty
    }

    pub fn physical(&self, id: BufferId) -> Option<(BlockIndex, PageIndex)> {
        self.buffers[id.0].physical
    }

    pub fn set_physical(&mut self, id: BufferId, phys: (BlockIndex, PageIndex)) {
        self.buffers[id.0].physical = Some(phys);
    }

    pub fn owner(&self, id: BufferId) -> Option<(Serial, LogicalPageIndex)> {
        self.buffers[id.0].owner
    }

    /// Find or allocate a buffer for `(serial, page_id)`. Never evicts a
    /// dirty buffer: if no clean candidate is free, returns `Busy` so the
    /// caller flushes a group first (spec.md §4.3 lookup semantics).
    pub fn acquire(
        &mut self,
        serial: Serial,
        page_id: LogicalPageIndex,
        allow_clone_reserve: bool,
    ) -> Result<BufferId, FsError> {
        if let Some(id) = self.find(serial, page_id) {
            let touch = self.tick();
            self.buffers[id.0].touch = touch;
            self.buffers[id.0].ref_count += 1;
            return Ok(id);
        }

        let usable_end = if allow_clone_reserve {
            self.buffers.len()
        } else {
            self.buffers.len().saturating_sub(self.clone_reserved)
        };

        // Prefer a genuinely free buffer.
        if let Some(i) = self.buffers[..usable_end]
            .iter()
            .position(|b| b.owner.is_none())
        {
            return Ok(self.claim(i, serial, page_id));
        }

        // Otherwise evict the least-recently-touched clean, unreferenced
        // buffer.
        let victim = self.buffers[..usable_end]
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.dirty && b.ref_count == 0)
            .min_by_key(|(_, b)| b.touch)
            .map(|(i, _)| i);

        match victim {
            Some(i) => Ok(self.claim(i, serial, page_id)),
            None => Err(FsError::Busy),
        }
    }

    fn claim(&mut self, i: usize, serial: Serial, page_id: LogicalPageIndex) -> BufferId {
        let touch = self.tick();
        let b = &mut self.buffers[i];
        b.owner = Some((serial, page_id));
        b.physical = None;
        b.dirty = false;
        b.ref_count = 1;
        b.touch = touch;
        b.data.iter_mut().for_each(|x| *x = 0);
        BufferId(i)
    }

    /// Acquire a scratch buffer from the clone reserve, for the flush
    /// engine's copy-forward of a page with no dirty buffer of its own.
    pub fn acquire_clone_scratch(&mut self) -> Result<BufferId, FsError> {
        let i = self
            .buffers
            .iter()
            .position(|b| b.owner.is_none() && !b.dirty && b.ref_count == 0)
            .ok_or(FsError::Busy)?;
        let touch = self.tick();
        let b = &mut self.buffers[i];
        b.ref_count = 1;
        b.touch = touch;
        Ok(BufferId(i))
    }

    /// Mark a buffer dirty, enforcing the per-group cap. Returns `Ok(true)`
    /// if the group just hit its cap and must be flushed by the caller
    /// before further writes to it proceed.
    pub fn mark_dirty(&mut self, id: BufferId) -> Result<bool, FsError> {
        self.buffers[id.0].dirty = true;
        let Some((serial, _)) = self.buffers[id.0].owner else {
            return Ok(false);
        };
        let count = self.group_page_count(serial);
        Ok(count >= self.max_dirty_pages_in_a_block)
    }

    pub fn mark_clean(&mut self, id: BufferId) {
        self.buffers[id.0].dirty = false;
    }

    pub fn release(&mut self, id: BufferId) {
        let b = &mut self.buffers[id.0];
        if b.ref_count > 0 {
            b.ref_count -= 1;
        }
        if b.ref_count == 0 && !b.dirty {
            b.owner = None;
            b.physical = None;
        }
    }

    /// Evict a buffer outright after it has been flushed (clean, owner
    /// cleared, contents irrelevant until reclaimed).
    pub fn retire(&mut self, id: BufferId) {
        let b = &mut self.buffers[id.0];
        b.dirty = false;
        if b.ref_count == 0 {
            b.owner = None;
            b.physical = None;
        }
    }

    pub fn group_page_count(&self, serial: Serial) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.dirty && b.owner.map(|(s, _)| s) == Some(serial))
            .count()
    }

    pub fn dirty_pages_in_group(&self, serial: Serial) -> Vec<(LogicalPageIndex, BufferId)> {
        self.buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.dirty && b.owner.map(|(s, _)| s) == Some(serial))
            .map(|(i, b)| (b.owner.unwrap().1, BufferId(i)))
            .collect()
    }

    /// Distinct serials currently holding at least one dirty page.
    pub fn dirty_groups(&self) -> Vec<Serial> {
        let mut groups: Vec<(Serial, u32)> = Vec::new();
        for b in &self.buffers {
            if b.dirty {
                if let Some((s, _)) = b.owner {
                    match groups.iter_mut().find(|(g, _)| *g == s) {
                        Some((_, touch)) => *touch = (*touch).max(b.touch),
                        None => groups.push((s, b.touch)),
                    }
                }
            }
        }
        groups.sort_by_key(|(_, touch)| *touch);
        groups.into_iter().map(|(s, _)| s).collect()
    }

    pub fn dirty_group_count(&self) -> usize {
        self.dirty_groups().len()
    }

    pub fn max_dirty_buf_groups(&self) -> usize {
        self.max_dirty_buf_groups
    }

    /// The dirty group touched least recently, if any. Used to decide which
    /// group to flush first when a 4th distinct dirty group would otherwise
    /// be opened (spec.md §4.3).
    pub fn least_recently_touched_group(&self) -> Option<Serial> {
        self.dirty_groups().into_iter().next()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }
}
