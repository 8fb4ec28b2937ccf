//! Flash I/O wrapper (spec.md §4.1): ECC handling, write-verify, and
//! bad-block routing layered over a raw [`FlashDevice`].

use crate::address::{BlockIndex, PageIndex};
use crate::config::{Config, EccOption, StorageAttrs};
use crate::driver::{FlashDevice, ReadStatus};
use crate::error::DeviceError;
use crate::fmt::{trace, warn};
use alloc::vec;

/// Status of a page read after ECC has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Clean,
    Corrected,
}

pub struct FlashIo<D: FlashDevice> {
    pub(crate) device: D,
    attrs: StorageAttrs,
}

impl<D: FlashDevice> FlashIo<D> {
    pub fn new(device: D, attrs: StorageAttrs) -> Self {
        FlashIo { device, attrs }
    }

    pub fn attrs(&self) -> &StorageAttrs {
        &self.attrs
    }

    /// Read a page's data and spare area, applying the configured ECC mode.
    /// `data` must be `page_data_size` long, `spare` must be `spare_size`
    /// long.
    pub fn read_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &mut [u8],
        spare: &mut [u8],
    ) -> Result<PageStatus, DeviceError<D::Error>> {
        let status = self
            .device
            .read_page(block, page, data, spare)
            .map_err(DeviceError::Driver)?;

        match self.attrs.ecc_option {
            EccOption::None => Ok(PageStatus::Clean),
            EccOption::Hardware => match status {
                ReadStatus::Ok => Ok(PageStatus::Clean),
                ReadStatus::Corrected => Ok(PageStatus::Corrected),
                ReadStatus::Unrecoverable => Err(DeviceError::EccUnrecoverable),
            },
            EccOption::Soft => {
                // Soft ECC: a checksum over the data region, stored in the
                // last two spare bytes not used by the page tag. Detects
                // corruption; does not attempt bit-level correction.
                if spare.len() < 2 {
                    return Ok(PageStatus::Clean);
                }
                let stored = u16::from_le_bytes([spare[spare.len() - 2], spare[spare.len() - 1]]);
                if stored == 0xFFFF {
                    // Erased spare reads all-ones; no ECC was ever written here.
                    return Ok(PageStatus::Clean);
                }
                let computed = soft_checksum(data);
                if computed == stored {
                    Ok(PageStatus::Clean)
                } else {
                    warn!("soft ECC mismatch on block {} page {}", block.as_u32(), page.as_u32());
                    Err(DeviceError::EccUnrecoverable)
                }
            }
        }
    }

    /// Program a page, optionally verifying by reading it back. On verify
    /// failure the caller is responsible for marking the block bad and
    /// retrying on a different block (spec.md §4.1/§4.5).
    pub fn write_page(
        &mut self,
        block: BlockIndex,
        page: PageIndex,
        data: &[u8],
        spare: &mut [u8],
        config: &Config,
    ) -> Result<(), DeviceError<D::Error>> {
        if self.attrs.ecc_option == EccOption::Soft && spare.len() >= 2 {
            let checksum = soft_checksum(data);
            let n = spare.len();
            spare[n - 2..n].copy_from_slice(&checksum.to_le_bytes());
        }

        self.device
            .write_page(block, page, data, spare)
            .map_err(DeviceError::Driver)?;

        if config.write_verify {
            let mut rdata = vec![0u8; data.len()];
            let mut rspare = vec![0u8; spare.len()];
            let status = self.read_page(block, page, &mut rdata, &mut rspare)?;
            if status == PageStatus::Corrected || rdata != data {
                return Err(DeviceError::VerifyFailed);
            }
        }
        Ok(())
    }

    pub fn erase_block(&mut self, block: BlockIndex) -> Result<(), DeviceError<D::Error>> {
        trace!("erasing block {}", block.as_u32());
        self.device.erase_block(block).map_err(DeviceError::Driver)
    }

    /// Query bad-block status, routing to the driver when it supports it,
    /// otherwise synthesizing from the block-status byte at
    /// `attrs.block_status_offs` in page 0's spare (spec.md §6).
    pub fn is_bad(&mut self, block: BlockIndex) -> Result<bool, DeviceError<D::Error>> {
        if self.device.supports_bad_block_query() {
            return self.device.is_bad(block).map_err(DeviceError::Driver);
        }
        let mut data = vec![0u8; self.attrs.page_data_size as usize];
        let mut spare = vec![0u8; self.attrs.spare_size() as usize];
        self.device
            .read_page(block, PageIndex::new(0), &mut data, &mut spare)
            .map_err(DeviceError::Driver)?;
        let offs = self.attrs.block_status_offs as usize;
        if offs >= spare.len() {
            return Ok(false);
        }
        Ok(spare[offs] != 0xFF)
    }

    pub fn mark_bad(&mut self, block: BlockIndex) -> Result<(), DeviceError<D::Error>> {
        warn!("marking block {} bad", block.as_u32());
        let _ = self.device.mark_bad(block);
        Ok(())
    }
}

fn soft_checksum(data: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for &b in data {
        sum = sum.wrapping_add(b as u16).rotate_left(1);
    }
    // Never collide with the erased-page "no ECC written" sentinel.
    if sum == 0xFFFF {
        0
    } else {
        sum
    }
}
