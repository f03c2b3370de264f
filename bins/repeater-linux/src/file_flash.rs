//! Flash image backed by a file.

use std::path::{Path, PathBuf};

use repeater_core::flash::{Flash, FlashError, MemoryFlash};
use repeater_core::store::REQUIRED_SECTORS;
use tracing::{info, warn};

/// Keeps the image in memory and writes it back after every change.
pub struct FileFlash {
    path: PathBuf,
    image: MemoryFlash,
}

impl FileFlash {
    /// Open `path`, starting from an erased image when it is missing or of
    /// the wrong size.
    pub fn open(path: &Path) -> Self {
        let blank = MemoryFlash::new(REQUIRED_SECTORS);
        let image = match std::fs::read(path) {
            Ok(data) if data.len() == blank.capacity() => {
                info!("Flash image loaded from {}", path.display());
                MemoryFlash::from_image(data)
            }
            Ok(data) => {
                warn!(
                    "Flash image {} has {} bytes, expected {}; starting erased",
                    path.display(),
                    data.len(),
                    blank.capacity()
                );
                blank
            }
            Err(e) => {
                info!("No flash image at {} ({e}), starting erased", path.display());
                blank
            }
        };
        Self {
            path: path.to_path_buf(),
            image,
        }
    }

    fn sync(&self) -> Result<(), FlashError> {
        std::fs::write(&self.path, self.image.image()).map_err(|e| FlashError::Io(e.to_string()))
    }
}

impl Flash for FileFlash {
    fn capacity(&self) -> usize {
        self.image.capacity()
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), FlashError> {
        self.image.erase_sector(sector)?;
        self.sync()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.image.read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.image.write(addr, data)?;
        self.sync()
    }
}
