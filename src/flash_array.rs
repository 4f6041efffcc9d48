//! Raw record storage in the Pico's internal flash.
//!
//! Flash is treated as an array of erase blocks counted from the end of memory backwards.
//! [`FlashArray::new`] hands out a contiguous prefix of that array; each [`FlashBlock`] holds
//! one record framed as `magic | length | payload | crc32`. An erased or foreign block reads
//! as empty. A block with the right magic but a bad length or checksum is corrupted.
//!
//! ⚠️ **Warning**: Firmware and user data share the same flash device. Only reserve as many
//! blocks as the firmware image leaves free at the top of flash.

use core::array;
use core::cell::RefCell;

use crc32fast::Hasher;
use embassy_rp::Peri;
use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash as EmbassyFlash};
use embassy_rp::peripherals::FLASH;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use portable_atomic::{AtomicU32, Ordering};
use static_cell::StaticCell;

use crate::settings::Storage;
use crate::{Error, Result};

#[cfg(feature = "pico2")]
const INTERNAL_FLASH_SIZE: usize = 4 * 1024 * 1024;

#[cfg(not(feature = "pico2"))]
const INTERNAL_FLASH_SIZE: usize = 2 * 1024 * 1024;

const MAGIC: u32 = 0x414E_4F44; // 'ANOD'
const HEADER_SIZE: usize = 4 + 2; // Magic + PayloadLen
const CRC_SIZE: usize = 4;
const MAX_PAYLOAD_SIZE: usize = ERASE_SIZE - HEADER_SIZE - CRC_SIZE;
const TOTAL_BLOCKS: u32 = (INTERNAL_FLASH_SIZE / ERASE_SIZE) as u32;

type Driver = EmbassyFlash<'static, FLASH, Blocking, INTERNAL_FLASH_SIZE>;

/// Owns the flash driver and the block allocation cursor.
struct FlashManager {
    flash: Mutex<CriticalSectionRawMutex, RefCell<Driver>>,
    next_block: AtomicU32,
}

impl FlashManager {
    fn new(peripheral: Peri<'static, FLASH>) -> Self {
        Self {
            flash: Mutex::new(RefCell::new(EmbassyFlash::new_blocking(peripheral))),
            next_block: AtomicU32::new(0),
        }
    }

    fn with_flash<R>(&self, f: impl FnOnce(&mut Driver) -> Result<R>) -> Result<R> {
        self.flash.lock(|flash| f(&mut flash.borrow_mut()))
    }

    fn reserve<const N: usize>(&'static self) -> Result<[FlashBlock; N]> {
        let count = u32::try_from(N).map_err(|_| Error::CapacityExceeded)?;
        let start = self.next_block.fetch_add(count, Ordering::SeqCst);
        let end = start.checked_add(count).ok_or(Error::CapacityExceeded)?;
        if end > TOTAL_BLOCKS {
            self.next_block.fetch_sub(count, Ordering::SeqCst);
            return Err(Error::CapacityExceeded);
        }
        Ok(array::from_fn(|idx| FlashBlock {
            manager: self,
            block: start.saturating_add(idx as u32),
        }))
    }
}

/// Handle to a single flash erase block.
pub struct FlashBlock {
    manager: &'static FlashManager,
    block: u32,
}

impl FlashBlock {
    /// Absolute block index, counted from the end of flash.
    #[must_use]
    pub const fn block_id(&self) -> u32 {
        self.block
    }

    /// The board's 64-bit unique id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Flash`] when the id cannot be read.
    pub fn unique_id(&self) -> Result<[u8; 8]> {
        read_unique_id(self.manager)
    }

    fn offset(&self) -> u32 {
        let end = (self.block.saturating_add(1)).saturating_mul(ERASE_SIZE as u32);
        (INTERNAL_FLASH_SIZE as u32).saturating_sub(end)
    }
}

impl Storage for FlashBlock {
    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>> {
        let offset = self.offset();
        let mut block = [0u8; ERASE_SIZE];
        self.manager
            .with_flash(|flash| flash.blocking_read(offset, &mut block).map_err(Error::Flash))
            .map_err(storage_error)?;
        decode_record(&block, buffer, self.block)
    }

    fn write(&mut self, record: &[u8]) -> Result<()> {
        let block = encode_record(record)?;
        let offset = self.offset();
        self.manager
            .with_flash(|flash| {
                flash
                    .blocking_erase(offset, offset.saturating_add(ERASE_SIZE as u32))
                    .map_err(Error::Flash)?;
                flash.blocking_write(offset, &block).map_err(Error::Flash)
            })
            .map_err(storage_error)?;
        info!("Flash: Saved {} bytes to block {}", record.len(), self.block);
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        let offset = self.offset();
        self.manager
            .with_flash(|flash| {
                flash
                    .blocking_erase(offset, offset.saturating_add(ERASE_SIZE as u32))
                    .map_err(Error::Flash)
            })
            .map_err(storage_error)?;
        info!("Flash: Cleared block {}", self.block);
        Ok(())
    }
}

/// Static resources for [`FlashArray`].
pub struct FlashArrayStatic {
    manager_cell: StaticCell<FlashManager>,
    manager_ref: Mutex<CriticalSectionRawMutex, RefCell<Option<&'static FlashManager>>>,
}

impl FlashArrayStatic {
    #[must_use]
    pub const fn new_static() -> Self {
        Self {
            manager_cell: StaticCell::new(),
            manager_ref: Mutex::new(RefCell::new(None)),
        }
    }

    fn manager(&'static self, peripheral: Peri<'static, FLASH>) -> &'static FlashManager {
        self.manager_ref.lock(|slot| {
            *slot
                .borrow_mut()
                .get_or_insert_with(|| &*self.manager_cell.init(FlashManager::new(peripheral)))
        })
    }
}

/// Namespace for reserving `N` flash blocks.
///
/// ```no_run
/// # #![no_std]
/// # #![no_main]
/// # use panic_probe as _;
/// use ambient_node::flash_array::{FlashArray, FlashArrayStatic};
/// use ambient_node::settings::Storage;
///
/// fn example(p: embassy_rp::Peripherals) -> ambient_node::Result<()> {
///     static FLASH_STATIC: FlashArrayStatic = FlashArray::<1>::new_static();
///     let [mut settings_block] = FlashArray::new(&FLASH_STATIC, p.FLASH)?;
///     settings_block.write(br#"{"pico_id":"kitchen"}"#)?;
///     Ok(())
/// }
/// ```
pub struct FlashArray<const N: usize>;

impl<const N: usize> FlashArray<N> {
    #[must_use]
    pub const fn new_static() -> FlashArrayStatic {
        FlashArrayStatic::new_static()
    }

    /// Reserve the next `N` blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityExceeded`] when flash has fewer free blocks than requested.
    pub fn new(
        flash_static: &'static FlashArrayStatic,
        peripheral: Peri<'static, FLASH>,
    ) -> Result<[FlashBlock; N]> {
        flash_static.manager(peripheral).reserve::<N>()
    }
}

fn encode_record(record: &[u8]) -> Result<[u8; ERASE_SIZE]> {
    if record.len() > MAX_PAYLOAD_SIZE {
        error!(
            "Flash: Record too large ({} > {} bytes)",
            record.len(),
            MAX_PAYLOAD_SIZE
        );
        return Err(Error::CapacityExceeded);
    }
    let payload_len = u16::try_from(record.len()).map_err(|_| Error::CapacityExceeded)?;

    let mut block = [0xFFu8; ERASE_SIZE];
    let (header, rest) = block.split_at_mut(HEADER_SIZE);
    header[..4].copy_from_slice(&MAGIC.to_le_bytes());
    header[4..].copy_from_slice(&payload_len.to_le_bytes());
    rest[..record.len()].copy_from_slice(record);

    let crc_offset = HEADER_SIZE + record.len();
    let crc = compute_crc(&block[..crc_offset]);
    block[crc_offset..crc_offset + CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
    Ok(block)
}

fn decode_record(block: &[u8; ERASE_SIZE], buffer: &mut [u8], block_id: u32) -> Result<Option<usize>> {
    let [m0, m1, m2, m3, l0, l1, ..] = *block;
    if u32::from_le_bytes([m0, m1, m2, m3]) != MAGIC {
        info!("Flash: No record in block {}", block_id);
        return Ok(None);
    }

    let payload_len = usize::from(u16::from_le_bytes([l0, l1]));
    if payload_len > MAX_PAYLOAD_SIZE {
        error!("Flash: Invalid record length {} in block {}", payload_len, block_id);
        return Err(Error::StorageCorrupted);
    }

    let crc_offset = HEADER_SIZE + payload_len;
    let (framed, tail) = block.split_at(crc_offset);
    let mut stored_crc = [0u8; CRC_SIZE];
    stored_crc.copy_from_slice(&tail[..CRC_SIZE]);
    if u32::from_le_bytes(stored_crc) != compute_crc(framed) {
        error!("Flash: CRC mismatch in block {}", block_id);
        return Err(Error::StorageCorrupted);
    }

    let payload = &framed[HEADER_SIZE..];
    let target = buffer
        .get_mut(..payload.len())
        .ok_or(Error::CapacityExceeded)?;
    target.copy_from_slice(payload);
    Ok(Some(payload.len()))
}

/// Driver failures are I/O errors; anything else is passed through.
fn storage_error(err: Error) -> Error {
    match err {
        Error::Flash(flash_err) => {
            warn!("Flash: {}", Error::Flash(flash_err));
            Error::Storage
        }
        other => other,
    }
}

#[cfg(feature = "pico1")]
fn read_unique_id(manager: &FlashManager) -> Result<[u8; 8]> {
    let mut id = [0u8; 8];
    manager.with_flash(|flash| flash.blocking_unique_id(&mut id).map_err(Error::Flash))?;
    Ok(id)
}

#[cfg(not(feature = "pico1"))]
fn read_unique_id(_manager: &FlashManager) -> Result<[u8; 8]> {
    embassy_rp::otp::get_chipid()
        .map(u64::to_be_bytes)
        .map_err(|_| Error::Storage)
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
