//! Object layer (spec.md §4.7): path resolution and
//! open/create/read/write/seek/truncate/close/rename/delete/stat, built
//! directly on the tree and buffer pool. No fd-number indirection table —
//! that belongs to the POSIX façade, which is out of scope here.

use crate::address::{LogicalBlockIndex, LogicalPageIndex, PageIndex, Serial};
use crate::block_cache::BlockInfoCache;
use crate::buffer_pool::PageBufferPool;
use crate::config::{Config, StorageAttrs};
use crate::driver::FlashDevice;
use crate::error::{FsError, FsResult};
use crate::flash::FlashIo;
use crate::flush::{FlushEngine, FlushTarget, HEADER_PAGE_ID};
use crate::mount::{format, mount};
use crate::tree::{
    HeaderPayload, Node, NodeKind, Tree, ATTR_DIR, ATTR_WRITE, HEADER_PAYLOAD_BYTES, MAX_NAME_LEN,
};
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

/// A page must be large enough to hold one full header payload; otherwise
/// `HeaderPayload::encode`/`decode` would silently truncate/reject every
/// node's metadata.
fn validate_attrs(attrs: &StorageAttrs) -> FsResult<()> {
    if (attrs.page_data_size as usize) < HEADER_PAYLOAD_BYTES {
        return Err(FsError::InvalidArg);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    fn writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// An open file handle: `(serial, cursor, mode)`. Every I/O call takes the
/// owning [`Filesystem`] mutably alongside it (spec.md §5: coarse external
/// lock, no reentrancy).
pub struct Object {
    serial: Serial,
    cursor: u64,
    mode: OpenMode,
}

impl Object {
    pub fn tell(&self) -> u64 {
        self.cursor
    }
}

/// Snapshot of a node's metadata (spec.md §4.7 `stat`).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Stat {
    pub serial: u32,
    pub is_dir: bool,
    pub size: u64,
    pub create_time: u32,
    pub last_modify: u32,
    pub attr: u8,
}

pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// Block-level census of the partition, for checking the conservation
/// invariant of spec.md §8 (P1): every block is in exactly one of these
/// five categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCensus {
    pub file_headers: usize,
    pub dir_headers: usize,
    pub data_blocks: usize,
    pub erased: usize,
    pub bad: usize,
}

impl BlockCensus {
    pub fn total(&self) -> usize {
        self.file_headers + self.dir_headers + self.data_blocks + self.erased + self.bad
    }
}

/// Ties the flash I/O wrapper, caches, tree and buffer pool together behind
/// the path-named operations of spec.md §4.7.
pub struct Filesystem<D: FlashDevice> {
    flash: FlashIo<D>,
    cache: BlockInfoCache,
    tree: Tree,
    buffers: PageBufferPool,
    config: Config,
    last_error: Option<FsError>,
}

impl<D: FlashDevice> Filesystem<D> {
    pub fn mount(device: D, attrs: StorageAttrs, config: Config) -> FsResult<Self> {
        config.validate().map_err(|_| FsError::InvalidArg)?;
        validate_attrs(&attrs)?;
        let mut flash = FlashIo::new(device, attrs);
        let (tree, cache) = mount(&mut flash, &config)?;
        let buffers = PageBufferPool::new(&config, attrs.page_data_size as usize);
        Ok(Filesystem { flash, cache, tree, buffers, config, last_error: None })
    }

    pub fn format(device: D, attrs: StorageAttrs, config: Config) -> FsResult<Self> {
        config.validate().map_err(|_| FsError::InvalidArg)?;
        validate_attrs(&attrs)?;
        let mut flash = FlashIo::new(device, attrs);
        let (tree, cache) = format(&mut flash, &config)?;
        let buffers = PageBufferPool::new(&config, attrs.page_data_size as usize);
        Ok(Filesystem { flash, cache, tree, buffers, config, last_error: None })
    }

    /// Per-process last error, updated on every public entry point (spec.md §7).
    pub fn last_error(&self) -> Option<FsError> {
        self.last_error
    }

    /// Borrow the underlying device. Lets test harnesses snapshot the media
    /// state (e.g. by cloning) to simulate a crash that drops this
    /// [`Filesystem`] and everything it had buffered in memory, then remount
    /// from the snapshot to check what survived.
    pub fn device(&self) -> &D {
        &self.flash.device
    }

    /// Census of every block's current category, for the P1 partition
    /// conservation check: `census.total() == attrs.total_blocks`.
    pub fn block_census(&self) -> BlockCensus {
        BlockCensus {
            file_headers: self.tree.file_count(),
            dir_headers: self.tree.dir_count(),
            data_blocks: self.tree.data_count(),
            erased: self.tree.erased_count(),
            bad: self.tree.bad_count(),
        }
    }

    fn engine(&mut self) -> FlushEngine<'_, D> {
        FlushEngine {
            flash: &mut self.flash,
            cache: &mut self.cache,
            tree: &mut self.tree,
            buffers: &mut self.buffers,
            config: &self.config,
        }
    }

    // -- path resolution ------------------------------------------------

    fn resolve(&self, path: &str) -> Option<Serial> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Some(Serial::ROOT);
        }
        let mut current = Serial::ROOT;
        for part in trimmed.split('/') {
            current = self.tree.find_child_by_name(current, part)?.serial;
        }
        Some(current)
    }

    fn split_parent<'p>(&self, path: &'p str) -> FsResult<(Serial, &'p str)> {
        let trimmed = path.trim_end_matches('/');
        let trimmed = trimmed.trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(FsError::InvalidArg);
        }
        let (parent_path, name) = match trimmed.rfind('/') {
            Some(i) => (&trimmed[..i], &trimmed[i + 1..]),
            None => ("", trimmed),
        };
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(FsError::InvalidArg);
        }
        let parent = self.resolve(parent_path).ok_or(FsError::NoEntry)?;
        if !self.tree.node(parent).map(|n| n.is_dir()).unwrap_or(false) && parent != Serial::ROOT {
            return Err(FsError::NoEntry);
        }
        Ok((parent, name))
    }

    // -- create / open ----------------------------------------------------

    pub fn create(&mut self, path: &str, now: u32) -> FsResult<Object> {
        let result = self.create_inner(path, now);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn create_inner(&mut self, path: &str, now: u32) -> FsResult<Object> {
        let is_dir = path.ends_with('/');
        let (parent, name) = self.split_parent(path)?;
        if self.tree.find_child_by_name(parent, name).is_some() {
            return Err(FsError::Exists);
        }
        if (self.tree.erased_count() as u32) < self.config.min_erased.saturating_add(1) {
            return Err(FsError::NoSpace);
        }

        let serial = self.tree.alloc_serial()?;
        let kind = if is_dir { NodeKind::Directory } else { NodeKind::File };
        let attr = if is_dir { ATTR_DIR } else { ATTR_WRITE };
        self.tree.insert_node(Node {
            serial,
            parent,
            kind,
            name: name.to_string(),
            header_block: None,
            block_ts: crate::tag::BlockTs::new(0),
            create_time: now,
            last_modify: now,
            attr,
            size: 0,
        });

        self.stage_header(serial)?;
        self.engine().flush_group(serial, FlushTarget::Header)?;

        Ok(Object { serial, cursor: 0, mode: OpenMode::ReadWrite })
    }

    pub fn open(&mut self, path: &str, mode: OpenMode) -> FsResult<Object> {
        let result = self.open_inner(path, mode);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn open_inner(&mut self, path: &str, mode: OpenMode) -> FsResult<Object> {
        let serial = self.resolve(path).ok_or(FsError::NoEntry)?;
        let is_dir = self.tree.node(serial).map(|n| n.is_dir()).ok_or(FsError::NoEntry)?;
        if is_dir && mode.writable() {
            return Err(FsError::InvalidArg);
        }
        Ok(Object { serial, cursor: 0, mode })
    }

    // -- read / write -------------------------------------------------------

    pub fn read(&mut self, obj: &mut Object, buf: &mut [u8]) -> FsResult<usize> {
        let result = self.read_inner(obj, buf);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn read_inner(&mut self, obj: &mut Object, buf: &mut [u8]) -> FsResult<usize> {
        let size = self.tree.node(obj.serial).map(|n| n.size).ok_or(FsError::NoEntry)?;
        let page_size = self.flash.attrs().page_data_size as usize;
        let pages_per_block = self.flash.attrs().pages_per_block;
        let mut written = 0usize;

        while written < buf.len() && obj.cursor < size {
            let page_id = (obj.cursor / page_size as u64) as u32;
            let offset_in_page = (obj.cursor % page_size as u64) as usize;
            let remaining_in_file = (size - obj.cursor).min((buf.len() - written) as u64) as usize;
            let to_copy = remaining_in_file.min(page_size - offset_in_page);

            if let Some(id) = self.buffers.find(obj.serial, LogicalPageIndex(page_id)) {
                let data = self.buffers.data(id);
                buf[written..written + to_copy]
                    .copy_from_slice(&data[offset_in_page..offset_in_page + to_copy]);
            } else {
                let idx = LogicalBlockIndex(page_id / pages_per_block);
                match self.tree.data_block(obj.serial, idx) {
                    Some(block) => {
                        let local_page = page_id % pages_per_block;
                        let mut data = vec![0u8; page_size];
                        let mut spare = vec![0u8; self.flash.attrs().spare_size() as usize];
                        self.flash.read_page(block, PageIndex::new(local_page), &mut data, &mut spare)?;
                        buf[written..written + to_copy]
                            .copy_from_slice(&data[offset_in_page..offset_in_page + to_copy]);
                    }
                    None => {
                        buf[written..written + to_copy].fill(0);
                    }
                }
            }

            written += to_copy;
            obj.cursor += to_copy as u64;
        }
        Ok(written)
    }

    pub fn write(&mut self, obj: &mut Object, buf: &[u8], now: u32) -> FsResult<usize> {
        let result = self.write_inner(obj, buf, now);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn write_inner(&mut self, obj: &mut Object, buf: &[u8], now: u32) -> FsResult<usize> {
        if !obj.mode.writable() {
            return Err(FsError::ReadOnly);
        }
        if (self.tree.erased_count() as u32) < self.config.min_erased.saturating_add(1) {
            return Err(FsError::NoSpace);
        }
        let page_size = self.flash.attrs().page_data_size as usize;
        let pages_per_block = self.flash.attrs().pages_per_block;
        let mut consumed = 0usize;

        while consumed < buf.len() {
            let page_id = (obj.cursor / page_size as u64) as u32;
            let offset_in_page = (obj.cursor % page_size as u64) as usize;
            let to_copy = (buf.len() - consumed).min(page_size - offset_in_page);
            let idx = LogicalBlockIndex(page_id / pages_per_block);

            // Opening a 4th distinct dirty group is not allowed: flush the
            // least-recently-touched one first (spec.md §4.3).
            let opens_new_group = !self.buffers.dirty_groups().contains(&obj.serial);
            if opens_new_group && self.buffers.dirty_group_count() >= self.buffers.max_dirty_buf_groups() {
                if let Some(victim) = self.buffers.least_recently_touched_group() {
                    self.flush_group_for(victim)?;
                }
            }

            let id = match self.buffers.acquire(obj.serial, LogicalPageIndex(page_id), false) {
                Ok(id) => id,
                Err(FsError::Busy) => {
                    if let Some(victim) = self.buffers.least_recently_touched_group() {
                        self.flush_group_for(victim)?;
                    }
                    self.buffers.acquire(obj.serial, LogicalPageIndex(page_id), false)?
                }
                Err(e) => return Err(e),
            };

            let is_partial_page = offset_in_page != 0 || to_copy < page_size;
            if self.buffers.physical(id).is_none() && !self.buffers.is_dirty(id) && is_partial_page {
                self.preload_page(obj.serial, idx, page_id, id)?;
            }

            self.buffers.data_mut(id)[offset_in_page..offset_in_page + to_copy]
                .copy_from_slice(&buf[consumed..consumed + to_copy]);
            let hit_cap = self.buffers.mark_dirty(id)?;
            self.buffers.release(id);

            consumed += to_copy;
            obj.cursor += to_copy as u64;

            if hit_cap {
                self.flush_data_group(obj.serial, idx)?;
            }
        }

        if let Some(node) = self.tree.node_mut(obj.serial) {
            if obj.cursor > node.size {
                node.size = obj.cursor;
            }
            node.last_modify = now;
        }
        self.stage_header(obj.serial)?;

        if self.config.flush_after_write {
            self.flush_all_groups_of(obj.serial)?;
        }
        Ok(consumed)
    }

    fn preload_page(
        &mut self,
        serial: Serial,
        idx: LogicalBlockIndex,
        page_id: u32,
        id: crate::buffer_pool::BufferId,
    ) -> FsResult<()> {
        let pages_per_block = self.flash.attrs().pages_per_block;
        if let Some(block) = self.tree.data_block(serial, idx) {
            let local_page = page_id % pages_per_block;
            let page_size = self.flash.attrs().page_data_size as usize;
            let spare_size = self.flash.attrs().spare_size() as usize;
            let mut data = vec![0u8; page_size];
            let mut spare = vec![0u8; spare_size];
            self.flash.read_page(block, PageIndex::new(local_page), &mut data, &mut spare)?;
            self.buffers.data_mut(id).copy_from_slice(&data);
        }
        Ok(())
    }

    // -- seek / tell / eof --------------------------------------------------

    pub fn seek(&mut self, obj: &mut Object, from: SeekFrom) -> FsResult<u64> {
        let size = self.tree.node(obj.serial).map(|n| n.size).ok_or(FsError::NoEntry)?;
        let new_cursor = match from {
            SeekFrom::Start(off) => off as i64,
            SeekFrom::Current(off) => obj.cursor as i64 + off,
            SeekFrom::End(off) => size as i64 + off,
        };
        if new_cursor < 0 {
            self.last_error = Some(FsError::InvalidArg);
            return Err(FsError::InvalidArg);
        }
        obj.cursor = new_cursor as u64;
        self.last_error = None;
        Ok(obj.cursor)
    }

    pub fn tell(&self, obj: &Object) -> u64 {
        obj.cursor
    }

    pub fn eof(&mut self, obj: &Object) -> FsResult<bool> {
        let size = self.tree.node(obj.serial).map(|n| n.size).ok_or(FsError::NoEntry);
        self.last_error = size.as_ref().err().copied();
        size.map(|size| obj.cursor >= size)
    }

    // -- flush / truncate / close -------------------------------------------

    fn flush_group_for(&mut self, serial: Serial) -> FsResult<()> {
        self.flush_all_groups_of(serial)
    }

    fn flush_data_group(&mut self, serial: Serial, idx: LogicalBlockIndex) -> FsResult<()> {
        self.engine().flush_group(serial, FlushTarget::Data(idx))
    }

    fn flush_all_groups_of(&mut self, serial: Serial) -> FsResult<()> {
        let dirty = self.buffers.dirty_pages_in_group(serial);
        let mut targets: Vec<LogicalBlockIndex> = Vec::new();
        let mut header_dirty = false;
        let pages_per_block = self.flash.attrs().pages_per_block;
        for (pid, _) in dirty {
            if pid == HEADER_PAGE_ID {
                header_dirty = true;
            } else {
                let idx = LogicalBlockIndex(pid.0 / pages_per_block);
                if !targets.contains(&idx) {
                    targets.push(idx);
                }
            }
        }
        for idx in targets {
            self.flush_data_group(serial, idx)?;
        }
        if header_dirty {
            self.engine().flush_group(serial, FlushTarget::Header)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, obj: &Object) -> FsResult<()> {
        let result = self.flush_all_groups_of(obj.serial);
        self.last_error = result.as_ref().err().copied();
        result
    }

    pub fn close(&mut self, obj: Object) -> FsResult<()> {
        self.flush(&obj)
    }

    pub fn truncate(&mut self, obj: &mut Object, len: u64, now: u32) -> FsResult<()> {
        let result = self.truncate_inner(obj, len, now);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn truncate_inner(&mut self, obj: &mut Object, len: u64, now: u32) -> FsResult<()> {
        if !obj.mode.writable() {
            return Err(FsError::ReadOnly);
        }
        let pages_per_block = self.flash.attrs().pages_per_block;
        let page_size = self.flash.attrs().page_data_size as u64;
        let keep_blocks = (len.div_ceil(page_size * pages_per_block as u64)) as u32;

        let blocks = self.tree.blocks_of(obj.serial);
        for (idx, block) in blocks {
            if idx.0 >= keep_blocks {
                self.tree.remove_data_block(obj.serial, idx);
                self.cache.invalidate(block);
                match self.flash.erase_block(block) {
                    Ok(()) => self.tree.push_erased(block),
                    Err(_) => {
                        let _ = self.flash.mark_bad(block);
                        self.tree.push_bad(block);
                    }
                }
            }
        }

        if let Some(node) = self.tree.node_mut(obj.serial) {
            node.size = len;
            node.last_modify = now;
        }
        if obj.cursor > len {
            obj.cursor = len;
        }
        self.stage_header(obj.serial)?;
        self.engine().flush_group(obj.serial, FlushTarget::Header)
    }

    // -- rename / delete / stat ----------------------------------------------

    pub fn rename(&mut self, old: &str, new: &str, now: u32) -> FsResult<()> {
        let result = self.rename_inner(old, new, now);
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn rename_inner(&mut self, old: &str, new: &str, now: u32) -> FsResult<()> {
        let serial = self.resolve(old).ok_or(FsError::NoEntry)?;
        let (new_parent, new_name) = self.split_parent(new)?;

        if self.tree.is_self_or_descendant(serial, new_parent) {
            return Err(FsError::InvalidArg);
        }

        if let Some(existing) = self.tree.find_child_by_name(new_parent, new_name) {
            let existing_serial = existing.serial;
            if existing_serial != serial {
                self.delete_serial(existing_serial)?;
            }
        }

        if let Some(node) = self.tree.node_mut(serial) {
            node.parent = new_parent;
            node.name = new_name.to_string();
            node.last_modify = now;
        }
        self.stage_header(serial)?;
        self.engine().flush_group(serial, FlushTarget::Header)
    }

    pub fn delete(&mut self, path: &str) -> FsResult<()> {
        let result = self.resolve(path).ok_or(FsError::NoEntry).and_then(|s| self.delete_serial(s));
        self.last_error = result.as_ref().err().copied();
        result
    }

    fn delete_serial(&mut self, serial: Serial) -> FsResult<()> {
        if serial == Serial::ROOT {
            return Err(FsError::InvalidArg);
        }
        let node = self.tree.node(serial).ok_or(FsError::NoEntry)?;
        if node.is_dir() && self.tree.has_children(serial) {
            return Err(FsError::NotEmpty);
        }

        let blocks = self.tree.remove_all_blocks_of(serial);
        for block in blocks {
            self.cache.invalidate(block);
            match self.flash.erase_block(block) {
                Ok(()) => self.tree.push_erased(block),
                Err(_) => {
                    let _ = self.flash.mark_bad(block);
                    self.tree.push_bad(block);
                }
            }
        }

        if let Some(node) = self.tree.remove_node(serial) {
            if let Some(block) = node.header_block {
                self.cache.invalidate(block);
                match self.flash.erase_block(block) {
                    Ok(()) => self.tree.push_erased(block),
                    Err(_) => {
                        let _ = self.flash.mark_bad(block);
                        self.tree.push_bad(block);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stat(&mut self, path: &str) -> FsResult<Stat> {
        let result = self.resolve(path).ok_or(FsError::NoEntry).and_then(|serial| {
            self.tree.node(serial).map(|n| Stat {
                serial: n.serial.0,
                is_dir: n.is_dir(),
                size: n.size,
                create_time: n.create_time,
                last_modify: n.last_modify,
                attr: n.attr,
            }).ok_or(FsError::NoEntry)
        });
        self.last_error = result.as_ref().err().copied();
        result
    }

    /// Directory membership, by name, for listing helpers layered above
    /// this crate.
    pub fn list_dir(&self, path: &str) -> FsResult<Vec<String>> {
        let serial = self.resolve(path).ok_or(FsError::NoEntry)?;
        if !self.tree.node(serial).map(|n| n.is_dir()).unwrap_or(false) {
            return Err(FsError::InvalidArg);
        }
        Ok(self.tree.children_of(serial).map(|n| n.name.clone()).collect())
    }

    // -- header staging -------------------------------------------------------

    /// Serialize the node's current metadata into its header buffer and mark
    /// it dirty, ready for [`FlushEngine::flush_group`] with
    /// [`FlushTarget::Header`].
    fn stage_header(&mut self, serial: Serial) -> FsResult<()> {
        let payload = {
            let node = self.tree.node(serial).ok_or(FsError::NoEntry)?;
            HeaderPayload {
                parent: node.parent,
                kind: node.kind,
                name: node.name.clone(),
                create_time: node.create_time,
                last_modify: node.last_modify,
                attr: node.attr,
                size: node.size,
            }
        };
        let id = self.buffers.acquire(serial, HEADER_PAGE_ID, true)?;
        let page_len = self.buffers.page_size();
        payload.encode(&mut self.buffers.data_mut(id)[..HEADER_PAYLOAD_BYTES.min(page_len)]);
        self.buffers.mark_dirty(id)?;
        self.buffers.release(id);
        Ok(())
    }
}
