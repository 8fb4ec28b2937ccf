//! Runtime configuration. Every conditional feature the original C
//! implementation expressed as a compile-time `#define` is a field here
//! instead, per the Design Note in spec.md §9.

/// ECC handling mode for page I/O (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EccOption {
    /// No ECC; the medium is trusted to never corrupt data.
    None,
    /// ECC computed in the flash I/O wrapper itself.
    Soft,
    /// ECC handled by the driver/controller.
    Hardware,
}

/// Which layer owns the spare-area byte layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LayoutOption {
    /// This crate chooses which spare bytes hold the page tag vs. ECC.
    Core,
    /// The driver already splits/merges ECC and tag bytes.
    Driver,
}

/// Policy applied to nodes discovered during mount whose parent does not
/// exist (spec.md §4.6, resolved Open Question — see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OrphanPolicy {
    /// Orphaned nodes are deleted during mount.
    Delete,
    /// Orphaned nodes are re-parented to the root directory.
    ReparentToRoot,
}

/// Storage attributes supplied at mount time (spec.md §6, read-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StorageAttrs {
    pub total_blocks: u32,
    pub pages_per_block: u32,
    pub page_data_size: u32,
    pub block_status_offs: u32,
    pub ecc_option: EccOption,
    pub layout_option: LayoutOption,
}

impl StorageAttrs {
    /// Spare area size in bytes: `(page_size / 256) * 8`, capped at 64, but
    /// never smaller than the page tag plus whatever the configured ECC mode
    /// needs of its own (the core layout places the page tag first, then
    /// ECC) — otherwise a small enough page size would let the soft-ECC
    /// checksum clobber the tag's own trailing bytes.
    pub fn spare_size(&self) -> u32 {
        let base = ((self.page_data_size / 256) * 8).min(64);
        let min_needed = match self.ecc_option {
            EccOption::Soft => crate::tag::TAG_BYTES as u32 + 2,
            EccOption::None | EccOption::Hardware => crate::tag::TAG_BYTES as u32,
        };
        base.max(min_needed)
    }
}

/// A single mount-table entry (spec.md §6). Registration of many of these
/// into a system-wide mount table is external to this crate.
#[derive(Debug, Clone, Copy)]
pub struct MountEntry {
    pub start_block: u32,
    pub end_block: u32,
}

/// Runtime-tunable configuration record (spec.md §9 Design Note).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Verify every page program by reading it back (spec.md §4.1).
    pub write_verify: bool,
    /// Erase and verify blocks marked bad when formatting (spec.md §4.6).
    pub bad_block_verify_on_format: bool,
    /// Update a file's modify time when a writable object is closed.
    pub change_modify_time: bool,
    /// Flush every dirty page to flash immediately after each write.
    pub flush_after_write: bool,
    /// What to do with orphaned nodes discovered on mount.
    pub orphan_policy: OrphanPolicy,
    /// Erased-block floor below which creation/append is rejected (I3).
    pub min_erased: u32,
    /// Bounded size of the block-info cache (spec.md §4.2).
    pub block_info_cache_size: usize,
    /// Total number of page buffers in the pool (spec.md §4.3).
    pub max_page_buffers: usize,
    /// Maximum number of distinct dirty groups open at once.
    pub max_dirty_buf_groups: usize,
    /// Maximum dirty pages within a single group before it is forced to flush.
    pub max_dirty_pages_in_a_block: usize,
    /// Buffers reserved so the flush engine can always clone a page forward.
    pub clone_buffers_threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            write_verify: true,
            bad_block_verify_on_format: false,
            change_modify_time: false,
            flush_after_write: false,
            orphan_policy: OrphanPolicy::Delete,
            min_erased: 2,
            block_info_cache_size: 10,
            max_page_buffers: 10,
            max_dirty_buf_groups: 3,
            max_dirty_pages_in_a_block: 7,
            clone_buffers_threshold: 2,
        }
    }
}

impl Config {
    /// Validate the cross-field constraints spelled out in spec.md §4.3 and
    /// mirrored by the `#if` checks in the original `uffs_config.h`.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_page_buffers < self.clone_buffers_threshold + 3 {
            return Err("max_page_buffers is too small");
        }
        if self.max_dirty_pages_in_a_block < 2 {
            return Err("max_dirty_pages_in_a_block must be >= 2");
        }
        if self.max_dirty_pages_in_a_block
            > self.max_page_buffers - self.clone_buffers_threshold - 1
        {
            return Err(
                "max_dirty_pages_in_a_block must be < max_page_buffers - clone_buffers_threshold",
            );
        }
        if self.write_verify && self.clone_buffers_threshold < 2 {
            return Err("clone_buffers_threshold must be >= 2 when write_verify is enabled");
        }
        Ok(())
    }
}
