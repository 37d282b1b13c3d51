use crate::{PatcherError, Platform, Result};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::Path;

pub(crate) mod psp;
pub(crate) mod psx;

pub use psp::{PspFile, PspImage};
pub use psx::{PsxFile, PsxImage, SectorMode};

/// Logical address of a byte container inside a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// A named file on a PSX sector stream.
    Psx(PsxFile),
    /// A named file on a PSP image.
    Psp(PspFile),
    /// A package inside the PSP sub-archive (`fftpack.bin`).
    Pack(u32),
    /// A named entry of an archive or in-memory blob set.
    Entry(String),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Psx(file) => f.write_str(file.name()),
            Location::Psp(file) => f.write_str(file.name()),
            Location::Pack(index) => write!(f, "fftpack[{index}]"),
            Location::Entry(name) => write!(f, "entry '{name}'"),
        }
    }
}

/// Uniform byte-range access over every container kind.
///
/// Reads are all-or-nothing: a span that does not fit the location's extent fails
/// with [`PatcherError::OutOfRange`] and nothing is returned.
pub trait AddressableSource {
    /// Total size in bytes of the container at `location`.
    fn extent(&mut self, location: &Location) -> Result<u64>;

    fn read(&mut self, location: &Location, offset: u64, size: usize) -> Result<Vec<u8>>;

    fn write(&mut self, location: &Location, offset: u64, bytes: &[u8]) -> Result<()>;
}

pub(crate) fn check_span(location: &Location, offset: u64, size: u64, limit: u64) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(PatcherError::OutOfRange {
            what: location.to_string(),
            offset,
            size,
            limit,
        }),
    }
}

/// Whole logical files held in memory, keyed by their location.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    blobs: HashMap<Location, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, location: Location, bytes: Vec<u8>) {
        self.blobs.insert(location, bytes);
    }

    pub fn get(&self, location: &Location) -> Option<&[u8]> {
        self.blobs.get(location).map(Vec::as_slice)
    }

    fn blob(&self, location: &Location) -> Result<&Vec<u8>> {
        self.blobs
            .get(location)
            .ok_or_else(|| PatcherError::Format(format!("{location} is not present")))
    }
}

impl AddressableSource for MemorySource {
    fn extent(&mut self, location: &Location) -> Result<u64> {
        Ok(self.blob(location)?.len() as u64)
    }

    fn read(&mut self, location: &Location, offset: u64, size: usize) -> Result<Vec<u8>> {
        let blob = self.blob(location)?;
        check_span(location, offset, size as u64, blob.len() as u64)?;
        let start = offset as usize;
        Ok(blob[start..start + size].to_vec())
    }

    fn write(&mut self, location: &Location, offset: u64, bytes: &[u8]) -> Result<()> {
        let blob = self
            .blobs
            .get_mut(location)
            .ok_or_else(|| PatcherError::Format(format!("{location} is not present")))?;
        check_span(location, offset, bytes.len() as u64, blob.len() as u64)?;
        let start = offset as usize;
        blob[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// An opened disc image of either platform.
pub enum DiscImage<F> {
    Psx(PsxImage<F>),
    Psp(PspImage<F>),
}

impl<F: Read + Write + Seek> DiscImage<F> {
    /// Detects the image geometry and runs its bootstrap step once.
    pub fn open(mut file: F) -> Result<Self> {
        if psp::looks_like_psp(&mut file)? {
            log::debug!("image contains PSP_GAME, opening as PSP");
            Ok(DiscImage::Psp(PspImage::open(file)?))
        } else {
            Ok(DiscImage::Psx(PsxImage::open(file)?))
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            DiscImage::Psx(_) => Platform::Psx,
            DiscImage::Psp(_) => Platform::Psp,
        }
    }

    pub fn into_inner(self) -> F {
        match self {
            DiscImage::Psx(image) => image.into_inner(),
            DiscImage::Psp(image) => image.into_inner(),
        }
    }
}

impl DiscImage<File> {
    pub fn open_path(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        Self::open(file)
    }
}

impl<F: Read + Write + Seek> AddressableSource for DiscImage<F> {
    fn extent(&mut self, location: &Location) -> Result<u64> {
        match self {
            DiscImage::Psx(image) => image.extent(location),
            DiscImage::Psp(image) => image.extent(location),
        }
    }

    fn read(&mut self, location: &Location, offset: u64, size: usize) -> Result<Vec<u8>> {
        match self {
            DiscImage::Psx(image) => image.read(location, offset, size),
            DiscImage::Psp(image) => image.read(location, offset, size),
        }
    }

    fn write(&mut self, location: &Location, offset: u64, bytes: &[u8]) -> Result<()> {
        match self {
            DiscImage::Psx(image) => image.write(location, offset, bytes),
            DiscImage::Psp(image) => image.write(location, offset, bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reads_and_writes_in_range() {
        let mut source = MemorySource::new();
        let loc = Location::Entry("blob".to_string());
        source.insert(loc.clone(), vec![1, 2, 3, 4, 5]);

        assert_eq!(source.read(&loc, 1, 3).unwrap(), vec![2, 3, 4]);
        source.write(&loc, 3, &[9, 9]).unwrap();
        assert_eq!(source.get(&loc).unwrap(), &[1, 2, 3, 9, 9]);
    }

    #[test]
    fn memory_source_rejects_partial_reads() {
        let mut source = MemorySource::new();
        let loc = Location::Pack(3);
        source.insert(loc.clone(), vec![0; 8]);

        let err = source.read(&loc, 6, 4).unwrap_err();
        assert!(matches!(err, PatcherError::OutOfRange { limit: 8, .. }));
        assert!(source.write(&loc, 8, &[1]).is_err());
        assert!(source.read(&Location::Pack(4), 0, 1).is_err());
    }
}
