//! Mount, scan and format (spec.md §4.6): rebuilds the in-memory tree and
//! block-info cache from what is actually on the device, and seeds a fresh
//! partition from scratch.

use crate::address::{BlockIndex, LogicalBlockIndex, PageIndex, Serial};
use crate::block_cache::{scan_block, BlockInfoCache};
use crate::config::{Config, OrphanPolicy};
use crate::driver::FlashDevice;
use crate::error::{DeviceError, FsError};
use crate::flash::FlashIo;
use crate::flush::pick_authoritative;
use crate::fmt::{debug, info, warn};
use crate::tag::{BlockTs, NodeType, PageTag, TAG_BYTES};
use crate::tree::{HeaderPayload, Node, Tree, ATTR_DIR, HEADER_PAYLOAD_BYTES};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

type HeaderCandidate = (BlockIndex, BlockTs, u32, NodeType);
type DataCandidate = (BlockIndex, BlockTs, u32);

/// Enumerate every block, rebuild the tree, and enforce the orphan policy
/// (spec.md §4.6).
pub fn mount<D: FlashDevice>(
    flash: &mut FlashIo<D>,
    config: &Config,
) -> Result<(Tree, BlockInfoCache), FsError> {
    let attrs = *flash.attrs();
    let mut tree = Tree::new();
    let cache = BlockInfoCache::new(config.block_info_cache_size);

    let mut headers: BTreeMap<Serial, Vec<HeaderCandidate>> = BTreeMap::new();
    let mut payloads: BTreeMap<BlockIndex, HeaderPayload> = BTreeMap::new();
    let mut data: BTreeMap<(Serial, LogicalBlockIndex), Vec<DataCandidate>> = BTreeMap::new();

    for i in 0..attrs.total_blocks {
        let block = BlockIndex::new(i);
        if flash.is_bad(block)? {
            tree.push_bad(block);
            continue;
        }

        let summary = scan_block(block, flash, &attrs)?;
        if summary.valid_count == 0 {
            if erased_pattern(flash, block, &attrs)? {
                tree.push_erased(block);
            } else {
                warn!("block {} has no valid tag and is not erased, marking bad", block.as_u32());
                let _ = flash.mark_bad(block);
                tree.push_bad(block);
            }
            continue;
        }

        match summary.node_type {
            NodeType::FileHeader | NodeType::DirectoryHeader => {
                headers.entry(summary.serial).or_default().push((
                    block,
                    summary.block_ts,
                    summary.valid_count,
                    summary.node_type,
                ));
                if let Some(payload) = read_header_payload(flash, block, &attrs)? {
                    payloads.insert(block, payload);
                }
            }
            NodeType::Data => {
                let idx = LogicalBlockIndex(summary.first_page_id.unwrap_or(0) / attrs.pages_per_block);
                data.entry((summary.serial, idx)).or_default().push((
                    block,
                    summary.block_ts,
                    summary.valid_count,
                ));
            }
        }
    }

    for (serial, candidates) in headers {
        let winner = resolve_header_candidates(&candidates);
        let Some(payload) = payloads.get(&winner) else {
            // Tag present but payload undecodable: treat like any other
            // unrecoverable node and drop it, matching the tolerance in §4.2.
            warn!("header block {} for serial {} has no readable payload, dropping", winner.as_u32(), serial.0);
            continue;
        };
        let block_ts = candidates
            .iter()
            .find(|(b, ..)| *b == winner)
            .map(|(_, ts, ..)| *ts)
            .unwrap_or_default();
        tree.insert_node(Node {
            serial,
            parent: payload.parent,
            kind: payload.kind,
            name: payload.name.clone(),
            header_block: Some(winner),
            block_ts,
            create_time: payload.create_time,
            last_modify: payload.last_modify,
            attr: payload.attr,
            size: payload.size,
        });
    }

    for ((serial, idx), candidates) in data {
        let winner = resolve_data_candidates(&candidates);
        tree.set_data_block(serial, idx, winner);
    }

    enforce_orphan_policy(&mut tree, flash, config)?;

    info!(
        "mount complete: {} files, {} dirs, {} data blocks, {} erased, {} bad",
        tree.file_count(),
        tree.dir_count(),
        tree.data_count(),
        tree.erased_count(),
        tree.bad_count()
    );

    Ok((tree, cache))
}

fn resolve_header_candidates(candidates: &[HeaderCandidate]) -> BlockIndex {
    candidates
        .iter()
        .map(|(b, ts, valid, _)| (*b, *ts, *valid))
        .reduce(pick_pair)
        .map(|(b, ..)| b)
        .expect("candidate list is never empty")
}

fn resolve_data_candidates(candidates: &[DataCandidate]) -> BlockIndex {
    candidates
        .iter()
        .copied()
        .reduce(pick_pair)
        .map(|(b, ..)| b)
        .expect("candidate list is never empty")
}

fn pick_pair(a: (BlockIndex, BlockTs, u32), b: (BlockIndex, BlockTs, u32)) -> (BlockIndex, BlockTs, u32) {
    let winner = pick_authoritative(a, b);
    if winner == a.0 {
        a
    } else {
        b
    }
}

fn erased_pattern<D: FlashDevice>(
    flash: &mut FlashIo<D>,
    block: BlockIndex,
    attrs: &crate::config::StorageAttrs,
) -> Result<bool, DeviceError<D::Error>> {
    let mut data = vec![0u8; attrs.page_data_size as usize];
    let mut spare = vec![0u8; attrs.spare_size() as usize];
    match flash.read_page(block, PageIndex::new(0), &mut data, &mut spare) {
        Ok(_) => Ok(data.iter().all(|&b| b == 0xFF)),
        Err(DeviceError::EccUnrecoverable) => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_header_payload<D: FlashDevice>(
    flash: &mut FlashIo<D>,
    block: BlockIndex,
    attrs: &crate::config::StorageAttrs,
) -> Result<Option<HeaderPayload>, DeviceError<D::Error>> {
    let mut data = vec![0u8; attrs.page_data_size as usize];
    let mut spare = vec![0u8; attrs.spare_size() as usize];
    match flash.read_page(block, PageIndex::new(0), &mut data, &mut spare) {
        Ok(_) => Ok(HeaderPayload::decode(&data)),
        Err(DeviceError::EccUnrecoverable) => Ok(None),
        Err(e) => Err(e),
    }
}

fn enforce_orphan_policy<D: FlashDevice>(
    tree: &mut Tree,
    flash: &mut FlashIo<D>,
    config: &Config,
) -> Result<(), FsError> {
    let orphans: Vec<Serial> = tree
        .nodes()
        .filter(|n| n.serial != Serial::ROOT && tree.node(n.parent).is_none())
        .map(|n| n.serial)
        .collect();

    for serial in orphans {
        match config.orphan_policy {
            OrphanPolicy::ReparentToRoot => {
                if let Some(node) = tree.node_mut(serial) {
                    node.parent = Serial::ROOT;
                }
            }
            OrphanPolicy::Delete => {
                debug!("deleting orphaned node {}", serial.0);
                let blocks = tree.remove_all_blocks_of(serial);
                for b in blocks {
                    reclaim(tree, flash, b)?;
                }
                if let Some(node) = tree.remove_node(serial) {
                    if let Some(block) = node.header_block {
                        reclaim(tree, flash, block)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn reclaim<D: FlashDevice>(tree: &mut Tree, flash: &mut FlashIo<D>, block: BlockIndex) -> Result<(), FsError> {
    match flash.erase_block(block) {
        Ok(()) => tree.push_erased(block),
        Err(_) => {
            let _ = flash.mark_bad(block);
            tree.push_bad(block);
        }
    }
    Ok(())
}

/// Erase every non-bad block and seed a root directory header (spec.md
/// §4.6). Leaves the partition in the state a subsequent [`mount`] would
/// reconstruct to a single empty root directory.
pub fn format<D: FlashDevice>(
    flash: &mut FlashIo<D>,
    config: &Config,
) -> Result<(Tree, BlockInfoCache), FsError> {
    let attrs = *flash.attrs();
    let mut tree = Tree::new();
    let cache = BlockInfoCache::new(config.block_info_cache_size);

    for i in 0..attrs.total_blocks {
        let block = BlockIndex::new(i);
        if flash.is_bad(block)? {
            tree.push_bad(block);
            continue;
        }
        match flash.erase_block(block) {
            Ok(()) => tree.push_erased(block),
            Err(_) => {
                if config.bad_block_verify_on_format {
                    let _ = flash.mark_bad(block);
                    tree.push_bad(block);
                }
            }
        }
    }

    let root_block = tree.take_erased().ok_or(FsError::NoSpace)?;

    let payload = HeaderPayload {
        parent: Serial::NONE,
        kind: crate::tree::NodeKind::Directory,
        name: "".into(),
        create_time: 0,
        last_modify: 0,
        attr: ATTR_DIR,
        size: 0,
    };
    let mut page_data = vec![0u8; attrs.page_data_size as usize];
    payload.encode(&mut page_data[..HEADER_PAYLOAD_BYTES.min(page_data.len())]);

    let tag = PageTag {
        serial: Serial::ROOT,
        node_type: NodeType::DirectoryHeader,
        page_id: 0,
        block_ts: BlockTs::new(0),
        data_len: HEADER_PAYLOAD_BYTES as u32,
    };
    let mut spare = vec![0u8; attrs.spare_size() as usize];
    tag.encode(&mut spare[..TAG_BYTES.min(spare.len())]);

    flash
        .write_page(root_block, PageIndex::new(0), &page_data, &mut spare, config)?;

    tree.insert_node(Node {
        serial: Serial::ROOT,
        parent: Serial::NONE,
        kind: crate::tree::NodeKind::Directory,
        name: "".into(),
        header_block: Some(root_block),
        block_ts: BlockTs::new(0),
        create_time: 0,
        last_modify: 0,
        attr: ATTR_DIR,
        size: 0,
    });

    info!("format complete: {} blocks erased", tree.erased_count() + 1);
    Ok((tree, cache))
}
