//! The flash backend contract and the two stock implementations.
//!
//! The backend only understands pages: read, program, erase. Everything
//! transactional lives a layer up in [`crate::page`]. An erased page reads
//! back as `None` (all-0xFF on the real part).

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;

/// Logical flash regions.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Region {
    Normal,
    /// Hardware write-protected region holding secrets.
    Secure,
}

impl Region {
    pub const ALL: [Region; 2] = [Region::Normal, Region::Secure];

    fn name(self) -> &'static str {
        match self {
            Region::Normal => "normal",
            Region::Secure => "secure",
        }
    }
}

/// Each region is a two-page ping-pong.
pub const PAGES_PER_REGION: usize = 2;

#[derive(Clone, Debug, Error)]
pub enum FlashError {
    #[error("flash page io failed: {0}")]
    Io(String),
    #[error("simulated power loss")]
    PowerLoss,
}

impl From<io::Error> for FlashError {
    fn from(err: io::Error) -> Self {
        FlashError::Io(err.to_string())
    }
}

/// Page-level access to persistent storage.
pub trait FlashBackend {
    /// Read a page; `None` if the page is erased or was never written.
    fn read_page(
        &self,
        region: Region,
        page: usize,
    ) -> Result<Option<Vec<u8>>, FlashError>;

    /// Program a page. The caller erases before reprogramming.
    fn write_page(
        &mut self,
        region: Region,
        page: usize,
        bytes: &[u8],
    ) -> Result<(), FlashError>;

    /// Erase a page back to the unwritten state.
    fn erase_page(&mut self, region: Region, page: usize)
        -> Result<(), FlashError>;
}

impl<T: FlashBackend + ?Sized> FlashBackend for Box<T> {
    fn read_page(
        &self,
        region: Region,
        page: usize,
    ) -> Result<Option<Vec<u8>>, FlashError> {
        (**self).read_page(region, page)
    }

    fn write_page(
        &mut self,
        region: Region,
        page: usize,
        bytes: &[u8],
    ) -> Result<(), FlashError> {
        (**self).write_page(region, page, bytes)
    }

    fn erase_page(
        &mut self,
        region: Region,
        page: usize,
    ) -> Result<(), FlashError> {
        (**self).erase_page(region, page)
    }
}

/// In-memory flash for tests and the simulator.
#[derive(Clone, Debug, Default)]
pub struct MemFlash {
    pages: [[Option<Vec<u8>>; PAGES_PER_REGION]; 2],
    /// When `Some(n)`, the n-th subsequent mutation "loses power": a write
    /// is torn (half-programmed), an erase never starts, and every later
    /// mutation fails outright.
    #[cfg(any(test, feature = "test-utils"))]
    fail_after: Option<u32>,
}

impl MemFlash {
    pub fn new() -> Self {
        Self::default()
    }

    fn region_index(region: Region) -> usize {
        match region {
            Region::Normal => 0,
            Region::Secure => 1,
        }
    }

    /// Arrange for a simulated power loss after `n` more mutations.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_after(&mut self, n: u32) {
        self.fail_after = Some(n);
    }

    /// Clear the power-loss injection, e.g. to "reboot" the device.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn power_restore(&mut self) {
        self.fail_after = None;
    }

    #[cfg(any(test, feature = "test-utils"))]
    fn check_power(&mut self) -> Result<bool, FlashError> {
        match self.fail_after.as_mut() {
            Some(0) => Err(FlashError::PowerLoss),
            Some(n) => {
                *n -= 1;
                // The mutation that hits zero is itself lost.
                Ok(*n == 0)
            }
            None => Ok(false),
        }
    }

    #[cfg(not(any(test, feature = "test-utils")))]
    fn check_power(&mut self) -> Result<bool, FlashError> {
        Ok(false)
    }
}

impl FlashBackend for MemFlash {
    fn read_page(
        &self,
        region: Region,
        page: usize,
    ) -> Result<Option<Vec<u8>>, FlashError> {
        Ok(self.pages[Self::region_index(region)][page].clone())
    }

    fn write_page(
        &mut self,
        region: Region,
        page: usize,
        bytes: &[u8],
    ) -> Result<(), FlashError> {
        let lost = self.check_power()?;
        if lost {
            // Torn write: the page ends up garbage, modeled as a
            // truncated image that will fail its CRC.
            let torn = bytes[..bytes.len() / 2].to_vec();
            self.pages[Self::region_index(region)][page] = Some(torn);
            return Ok(());
        }
        self.pages[Self::region_index(region)][page] = Some(bytes.to_vec());
        Ok(())
    }

    fn erase_page(
        &mut self,
        region: Region,
        page: usize,
    ) -> Result<(), FlashError> {
        let lost = self.check_power()?;
        if lost {
            // Power died before the erase started; the page is untouched.
            return Ok(());
        }
        self.pages[Self::region_index(region)][page] = None;
        Ok(())
    }
}

/// File-backed flash for the device simulator: one file per page under a
/// data directory.
#[derive(Debug)]
pub struct FileFlash {
    dir: PathBuf,
}

impl FileFlash {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, FlashError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(Self {
            dir: dir.as_ref().to_owned(),
        })
    }

    fn page_path(&self, region: Region, page: usize) -> PathBuf {
        self.dir.join(format!("{}-{page}.bin", region.name()))
    }
}

impl FlashBackend for FileFlash {
    fn read_page(
        &self,
        region: Region,
        page: usize,
    ) -> Result<Option<Vec<u8>>, FlashError> {
        match fs::read(self.page_path(region, page)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_page(
        &mut self,
        region: Region,
        page: usize,
        bytes: &[u8],
    ) -> Result<(), FlashError> {
        Ok(fs::write(self.page_path(region, page), bytes)?)
    }

    fn erase_page(
        &mut self,
        region: Region,
        page: usize,
    ) -> Result<(), FlashError> {
        match fs::remove_file(self.page_path(region, page)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_flash_roundtrip() {
        let mut flash = MemFlash::new();
        assert_eq!(flash.read_page(Region::Normal, 0).unwrap(), None);

        flash.write_page(Region::Normal, 0, b"abc").unwrap();
        assert_eq!(
            flash.read_page(Region::Normal, 0).unwrap().as_deref(),
            Some(b"abc".as_slice())
        );

        flash.erase_page(Region::Normal, 0).unwrap();
        assert_eq!(flash.read_page(Region::Normal, 0).unwrap(), None);
    }

    #[test]
    fn regions_are_independent() {
        let mut flash = MemFlash::new();
        flash.write_page(Region::Normal, 1, b"normal").unwrap();
        flash.write_page(Region::Secure, 1, b"secure").unwrap();
        assert_eq!(
            flash.read_page(Region::Normal, 1).unwrap().as_deref(),
            Some(b"normal".as_slice())
        );
        assert_eq!(
            flash.read_page(Region::Secure, 1).unwrap().as_deref(),
            Some(b"secure".as_slice())
        );
    }

    #[test]
    fn file_flash_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::new(dir.path()).unwrap();

        assert_eq!(flash.read_page(Region::Secure, 0).unwrap(), None);
        flash.write_page(Region::Secure, 0, b"xyz").unwrap();
        assert_eq!(
            flash.read_page(Region::Secure, 0).unwrap().as_deref(),
            Some(b"xyz".as_slice())
        );
        flash.erase_page(Region::Secure, 0).unwrap();
        assert_eq!(flash.read_page(Region::Secure, 0).unwrap(), None);
    }
}
