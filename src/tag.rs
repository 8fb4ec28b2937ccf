//! On-flash page tag codec and in-memory block summary (spec.md §3).

use crate::address::Serial;
use alloc::vec::Vec;

/// What kind of node a header page belongs to, or whether the page is a data
/// page (spec.md §3 "type").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeType {
    FileHeader,
    DirectoryHeader,
    Data,
}

impl NodeType {
    fn to_byte(self) -> u8 {
        match self {
            NodeType::FileHeader => 0,
            NodeType::DirectoryHeader => 1,
            NodeType::Data => 2,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(NodeType::FileHeader),
            1 => Some(NodeType::DirectoryHeader),
            2 => Some(NodeType::Data),
            _ => None,
        }
    }
}

/// A 2-bit wrap-safe counter used to order competing copies of the same
/// `(serial, page_id)` (spec.md §3 "block_ts").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockTs(pub u8);

impl BlockTs {
    pub fn new(v: u8) -> Self {
        BlockTs(v & 0x3)
    }

    pub fn succ(self) -> Self {
        BlockTs((self.0 + 1) & 0x3)
    }

    /// True iff `self` is strictly circularly-newer than `other`: the
    /// unambiguous case of the 3-way circular order described in spec.md §3
    /// (`(a - b) mod 4 == 1`). Distance-2 ("opposite corners") is ambiguous
    /// and is not considered newer by this function — callers fall back to
    /// the recovery rule's valid-page-count / physical-block tiebreak.
    pub fn is_newer_than(self, other: Self) -> bool {
        (self.0.wrapping_sub(other.0) & 0x3) == 1
    }
}

/// Decoded per-page tag, read from the spare area (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PageTag {
    pub serial: Serial,
    pub node_type: NodeType,
    pub page_id: u32,
    pub block_ts: BlockTs,
    pub data_len: u32,
}

/// Fixed on-flash byte layout of a page tag within the spare area:
/// `serial:4 | type:1 | page_id:4 | block_ts:1 | data_len:4 | tag_ecc:2`.
pub const TAG_BYTES: usize = 16;

impl PageTag {
    pub fn encode(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= TAG_BYTES);
        out[0..4].copy_from_slice(&self.serial.0.to_le_bytes());
        out[4] = self.node_type.to_byte();
        out[5..9].copy_from_slice(&self.page_id.to_le_bytes());
        out[9] = self.block_ts.0;
        out[10..14].copy_from_slice(&self.data_len.to_le_bytes());
        let ecc = tag_checksum(&out[0..14]);
        out[14..16].copy_from_slice(&ecc.to_le_bytes());
    }

    /// Decode and validate the tag's own checksum. Returns `None` if the
    /// tag is unreadable/corrupt — the caller marks just this page invalid,
    /// it does not by itself condemn the block (spec.md §4.2).
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < TAG_BYTES {
            return None;
        }
        let ecc = u16::from_le_bytes([raw[14], raw[15]]);
        if tag_checksum(&raw[0..14]) != ecc {
            return None;
        }
        let serial = Serial(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
        let node_type = NodeType::from_byte(raw[4])?;
        let page_id = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]);
        let block_ts = BlockTs::new(raw[9]);
        let data_len = u32::from_le_bytes([raw[10], raw[11], raw[12], raw[13]]);
        Some(PageTag {
            serial,
            node_type,
            page_id,
            block_ts,
            data_len,
        })
    }
}

/// Checksum over the tag fields, independent of any data-region ECC, so tag
/// corruption can be detected even when data ECC is disabled (spec.md §3).
fn tag_checksum(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= b as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// In-memory summary of one physical block, reconstructed by the block-info
/// cache from a page-by-page scan (spec.md §3 "Block summary").
#[derive(Debug, Clone)]
pub struct BlockSummary {
    pub serial: Serial,
    pub node_type: NodeType,
    pub block_ts: BlockTs,
    /// One bit per page: true if that page carries a validly-tagged page.
    pub page_valid: Vec<bool>,
    pub valid_count: u32,
    /// `page_id` of the first validly-tagged page, used by mount to derive
    /// a data block's logical block index.
    pub first_page_id: Option<u32>,
}

impl BlockSummary {
    pub fn new(pages_per_block: usize) -> Self {
        BlockSummary {
            serial: Serial::NONE,
            node_type: NodeType::Data,
            block_ts: BlockTs::default(),
            page_valid: alloc::vec![false; pages_per_block],
            valid_count: 0,
            first_page_id: None,
        }
    }
}
