#![no_std]

extern crate alloc;

mod address;
mod block_cache;
mod buffer_pool;
mod config;
mod driver;
mod error;
mod flash;
mod flush;
mod fmt;
mod mount;
mod object;
mod sim;
mod tag;
mod tree;

pub use address::{BlockIndex, LogicalBlockIndex, LogicalPageIndex, PageIndex, Serial};
pub use config::{Config, EccOption, LayoutOption, MountEntry, OrphanPolicy, StorageAttrs};
pub use driver::{FlashDevice, ReadStatus};
pub use error::{DeviceError, FsError, FsResult};
pub use object::{BlockCensus, Filesystem, Object, OpenMode, SeekFrom, Stat};
pub use sim::{SimError, VirtualFlash};
pub use tag::{BlockTs, NodeType};
pub use tree::NodeKind;
