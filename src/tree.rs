//! The tree (spec.md §4.4): the in-memory index of files, directories, data
//! blocks, erased blocks, and bad blocks reconstructed on mount.
//!
//! Directory membership is not stored as an explicit child list — it is
//! computed on demand by scanning nodes whose `parent` matches, per the
//! spec's note that fan-out is expected to be small on embedded devices.

use crate::address::{BlockIndex, LogicalBlockIndex, Serial};
use crate::error::FsError;
use crate::tag::BlockTs;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

pub const ATTR_WRITE: u8 = 0x01;
pub const ATTR_DIR: u8 = 0x02;

/// Longest name storable in a header payload (bytes, UTF-8).
pub const MAX_NAME_LEN: usize = 64;

/// Fixed-layout header page payload (spec.md §4.4 NEW): the fields a node
/// carries beyond its page tag, written into the header page's data region.
/// `parent:4 | kind:1 | name_len:1 | name:64 | create_time:4 | last_modify:4 | attr:1 | size:8`.
pub const HEADER_PAYLOAD_BYTES: usize = 4 + 1 + 1 + MAX_NAME_LEN + 4 + 4 + 1 + 8;

pub struct HeaderPayload {
    pub parent: Serial,
    pub kind: NodeKind,
    pub name: String,
    pub create_time: u32,
    pub last_modify: u32,
    pub attr: u8,
    /// Byte length of a file's data; always 0 for a directory.
    pub size: u64,
}

impl HeaderPayload {
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= HEADER_PAYLOAD_BYTES);
        let name_bytes = self.name.as_bytes();
        let n = name_bytes.len().min(MAX_NAME_LEN);
        out[0..4].copy_from_slice(&self.parent.0.to_le_bytes());
        out[4] = match self.kind {
            NodeKind::File => 0,
            NodeKind::Directory => 1,
        };
        out[5] = n as u8;
        out[6..6 + MAX_NAME_LEN].fill(0);
        out[6..6 + n].copy_from_slice(&name_bytes[..n]);
        let off = 6 + MAX_NAME_LEN;
        out[off..off + 4].copy_from_slice(&self.create_time.to_le_bytes());
        out[off + 4..off + 8].copy_from_slice(&self.last_modify.to_le_bytes());
        out[off + 8] = self.attr;
        out[off + 9..off + 17].copy_from_slice(&self.size.to_le_bytes());
    }

    /// Decode a header payload. Returns `None` on a malformed name length or
    /// invalid UTF-8 — the caller treats the node as unreadable, per the
    /// "unreadable tags mark just that page invalid" tolerance of §4.2.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < HEADER_PAYLOAD_BYTES {
            return None;
        }
        let parent = Serial(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
        let kind = match raw[4] {
            0 => NodeKind::File,
            1 => NodeKind::Directory,
            _ => return None,
        };
        let n = raw[5] as usize;
        if n > MAX_NAME_LEN {
            return None;
        }
        let name = core::str::from_utf8(&raw[6..6 + n]).ok()?.into();
        let off = 6 + MAX_NAME_LEN;
        let create_time = u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]]);
        let last_modify = u32::from_le_bytes([
            raw[off + 4],
            raw[off + 5],
            raw[off + 6],
            raw[off + 7],
        ]);
        let attr = raw[off + 8];
        let size = u64::from_le_bytes(raw[off + 9..off + 17].try_into().ok()?);
        Some(HeaderPayload {
            parent,
            kind,
            name,
            create_time,
            last_modify,
            attr,
            size,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeKind {
    File,
    Directory,
}

/// A file or directory node (spec.md §3 "File node" / "Directory node").
#[derive(Debug, Clone)]
pub struct Node {
    pub serial: Serial,
    pub parent: Serial,
    pub kind: NodeKind,
    pub name: String,
    /// Physical block currently carrying this node's header page, or `None`
    /// for a node allocated but not yet flushed for the first time.
    pub header_block: Option<BlockIndex>,
    pub block_ts: BlockTs,
    pub create_time: u32,
    pub last_modify: u32,
    pub attr: u8,
    pub size: u64,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        self.kind == NodeKind::Directory
    }
}

/// The in-memory tree: four categorized lists (file, directory, data,
/// erased) plus bad (spec.md §4.4).
pub struct Tree {
    nodes: BTreeMap<Serial, Node>,
    data_blocks: BTreeMap<(Serial, LogicalBlockIndex), BlockIndex>,
    erased: Vec<BlockIndex>,
    bad: Vec<BlockIndex>,
    next_serial: Serial,
}

impl Tree {
    pub fn new() -> Self {
        Tree {
            nodes: BTreeMap::new(),
            data_blocks: BTreeMap::new(),
            erased: Vec::new(),
            bad: Vec::new(),
            next_serial: Serial::ROOT.next(),
        }
    }

    // -- node (file/directory) list -------------------------------------

    pub fn insert_node(&mut self, node: Node) {
        if node.serial.0 >= self.next_serial.0 {
            self.next_serial = node.serial.next();
        }
        self.nodes.insert(node.serial, node);
    }

    pub fn remove_node(&mut self, serial: Serial) -> Option<Node> {
        self.nodes.remove(&serial)
    }

    pub fn node(&self, serial: Serial) -> Option<&Node> {
        self.nodes.get(&serial)
    }

    pub fn node_mut(&mut self, serial: Serial) -> Option<&mut Node> {
        self.nodes.get_mut(&serial)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes whose parent is `parent` (directory membership, computed on
    /// demand per spec.md §4.4).
    pub fn children_of(&self, parent: Serial) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.parent == parent)
    }

    pub fn find_child_by_name(&self, parent: Serial, name: &str) -> Option<&Node> {
        self.children_of(parent).find(|n| n.name == name)
    }

    pub fn has_children(&self, parent: Serial) -> bool {
        self.children_of(parent).next().is_some()
    }

    /// True if `candidate` is `ancestor` itself or a descendant of it, walking
    /// up `parent` links. Used to reject a rename/move that would nest a
    /// directory inside its own subtree and orphan it from root forever.
    pub fn is_self_or_descendant(&self, ancestor: Serial, candidate: Serial) -> bool {
        let mut cur = candidate;
        loop {
            if cur == ancestor {
                return true;
            }
            match self.node(cur) {
                Some(n) if cur != Serial::ROOT => cur = n.parent,
                _ => return false,
            }
        }
    }

    // -- serial allocation ------------------------------------------------

    pub fn alloc_serial(&mut self) -> Result<Serial, FsError> {
        if self.next_serial.0 == u32::MAX {
            return Err(FsError::NoMemory);
        }
        let s = self.next_serial;
        self.next_serial = self.next_serial.next();
        Ok(s)
    }

    // -- data blocks -------------------------------------------------------

    pub fn data_block(&self, serial: Serial, index: LogicalBlockIndex) -> Option<BlockIndex> {
        self.data_blocks.get(&(serial, index)).copied()
    }

    pub fn set_data_block(&mut self, serial: Serial, index: LogicalBlockIndex, block: BlockIndex) {
        self.data_blocks.insert((serial, index), block);
    }

    pub fn remove_data_block(&mut self, serial: Serial, index: LogicalBlockIndex) -> Option<BlockIndex> {
        self.data_blocks.remove(&(serial, index))
    }

    /// All of a file's data blocks, ordered by logical block index.
    pub fn blocks_of(&self, serial: Serial) -> Vec<(LogicalBlockIndex, BlockIndex)> {
        self.data_blocks
            .iter()
            .filter(|((s, _), _)| *s == serial)
            .map(|((_, idx), block)| (*idx, *block))
            .collect()
    }

    pub fn remove_all_blocks_of(&mut self, serial: Serial) -> Vec<BlockIndex> {
        let keys: Vec<_> = self
            .data_blocks
            .keys()
            .filter(|(s, _)| *s == serial)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.data_blocks.remove(&k))
            .collect()
    }

    // -- erased / bad lists -------------------------------------------------

    pub fn push_erased(&mut self, block: BlockIndex) {
        if !self.erased.contains(&block) {
            self.erased.push(block);
        }
    }

    /// Take the lowest-numbered erased block (arbitrary but deterministic
    /// selection policy; wear-leveling quality comes from every block
    /// cycling through this list equally over time, not from the pick
    /// order within one call).
    pub fn take_erased(&mut self) -> Option<BlockIndex> {
        if self.erased.is_empty() {
            return None;
        }
        let (i, _) = self
            .erased
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.as_u32())?;
        Some(self.erased.remove(i))
    }

    pub fn erased_count(&self) -> usize {
        self.erased.len()
    }

    pub fn push_bad(&mut self, block: BlockIndex) {
        if !self.bad.contains(&block) {
            self.bad.push(block);
        }
    }

    pub fn is_bad(&self, block: BlockIndex) -> bool {
        self.bad.contains(&block)
    }

    pub fn bad_count(&self) -> usize {
        self.bad.len()
    }

    pub fn file_count(&self) -> usize {
        self.nodes.values().filter(|n| n.kind == NodeKind::File).count()
    }

    pub fn dir_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|n| n.kind == NodeKind::Directory)
            .count()
    }

    pub fn data_count(&self) -> usize {
        self.data_blocks.len()
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
