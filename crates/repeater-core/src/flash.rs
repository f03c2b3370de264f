//! Raw flash access.
//!
//! The store only needs three primitives: erase a sector, read bytes and
//! program bytes into erased flash. Implementations exist for the in-memory
//! image used in tests and, in the host binary, a file-backed image.

use thiserror::Error;

pub const SECTOR_SIZE: u32 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    #[error("address {addr:#x} (+{len}) outside flash of {capacity} bytes")]
    OutOfRange { addr: u32, len: usize, capacity: usize },

    #[error("sector {0} is not erasable")]
    EraseFailed(u32),

    #[error("flash I/O failed: {0}")]
    Io(String),
}

/// NOR-style flash: erased bytes read as `0xFF`, programming can only clear bits.
pub trait Flash {
    fn capacity(&self) -> usize;

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError>;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;
}

/// Flash image held in memory.
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    data: Vec<u8>,
    fail_writes: bool,
}

impl MemoryFlash {
    /// A fully erased image of `sectors` sectors.
    pub fn new(sectors: u32) -> Self {
        Self {
            data: vec![0xFF; (sectors * SECTOR_SIZE) as usize],
            fail_writes: false,
        }
    }

    pub fn from_image(data: Vec<u8>) -> Self {
        Self {
            data,
            fail_writes: false,
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.data
    }

    /// Make every later erase/write fail, to exercise the single-attempt path.
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    /// Overwrite bytes directly, bypassing NOR semantics.
    pub fn poke(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, FlashError> {
        let start = addr as usize;
        let end = start.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => Ok(start..end),
            None => Err(FlashError::OutOfRange {
                addr,
                len,
                capacity: self.data.len(),
            }),
        }
    }
}

impl Flash for MemoryFlash {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        if self.fail_writes {
            return Err(FlashError::EraseFailed(sector));
        }
        let range = self.range(sector * SECTOR_SIZE, SECTOR_SIZE as usize)?;
        self.data[range].fill(0xFF);
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        if self.fail_writes {
            return Err(FlashError::Io("write rejected".into()));
        }
        let range = self.range(addr, data.len())?;
        for (cell, byte) in self.data[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_without_erase_only_clears_bits() {
        let mut flash = MemoryFlash::new(1);
        flash.write(0, &[0x0F]).unwrap();
        flash.write(0, &[0xF0]).unwrap();
        let mut buf = [0u8; 1];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0x00]);

        flash.erase_sector(0).unwrap();
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF]);
    }

    #[test]
    fn test_out_of_range() {
        let mut flash = MemoryFlash::new(1);
        let mut buf = [0u8; 8];
        assert!(matches!(
            flash.read(SECTOR_SIZE - 4, &mut buf),
            Err(FlashError::OutOfRange { .. })
        ));
        assert!(flash.erase_sector(1).is_err());
    }
}
