use microfs::{Config, EccOption, Filesystem, LayoutOption, StorageAttrs, VirtualFlash};

/// Small partition geometry used throughout the integration tests: 4 pages
/// per block, 1KB pages, giving a 32-byte spare area (room for the 16-byte
/// page tag plus the soft-ECC checksum with no overlap).
pub fn attrs(total_blocks: u32) -> StorageAttrs {
    StorageAttrs {
        total_blocks,
        pages_per_block: 4,
        page_data_size: 1024,
        block_status_offs: 0,
        ecc_option: EccOption::Soft,
        layout_option: LayoutOption::Core,
    }
}

pub fn fresh(total_blocks: u32) -> Filesystem<VirtualFlash> {
    let a = attrs(total_blocks);
    let device = VirtualFlash::new(a);
    Filesystem::format(device, a, Config::default()).expect("format")
}

pub fn fresh_with_config(total_blocks: u32, config: Config) -> Filesystem<VirtualFlash> {
    let a = attrs(total_blocks);
    let device = VirtualFlash::new(a);
    Filesystem::format(device, a, config).expect("format")
}

pub fn remount(total_blocks: u32, device: VirtualFlash) -> Filesystem<VirtualFlash> {
    Filesystem::mount(device, attrs(total_blocks), Config::default()).expect("mount")
}

pub fn remount_with_config(total_blocks: u32, device: VirtualFlash, config: Config) -> Filesystem<VirtualFlash> {
    Filesystem::mount(device, attrs(total_blocks), config).expect("mount")
}
