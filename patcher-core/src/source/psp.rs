use super::{check_span, AddressableSource, Location};
use crate::{PatcherError, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom, Write};

const SECTOR_SIZE: u64 = 2048;
const PVD_SECTOR: u64 = 16;
const ROOT_RECORD_OFFSET: usize = 156;
const MAX_DIRECTORY_SIZE: u32 = 1 << 20;
const FLAG_DIRECTORY: u8 = 0x02;

/// Files on the PSP image located by walking the ISO9660 tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PspFile {
    BootBin,
    EbootBin,
    FftPackBin,
}

impl PspFile {
    pub const ALL: [PspFile; 3] = [PspFile::BootBin, PspFile::EbootBin, PspFile::FftPackBin];

    pub fn name(self) -> &'static str {
        match self {
            PspFile::BootBin => "PSP_GAME_SYSDIR_BOOT_BIN",
            PspFile::EbootBin => "PSP_GAME_SYSDIR_EBOOT_BIN",
            PspFile::FftPackBin => "PSP_GAME_USRDIR_FFTPACK_BIN",
        }
    }

    fn path(self) -> &'static [&'static str] {
        match self {
            PspFile::BootBin => &["PSP_GAME", "SYSDIR", "BOOT.BIN"],
            PspFile::EbootBin => &["PSP_GAME", "SYSDIR", "EBOOT.BIN"],
            PspFile::FftPackBin => &["PSP_GAME", "USRDIR", "FFTPACK.BIN"],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Extent {
    lba: u64,
    size: u64,
}

impl Extent {
    fn byte_offset(&self) -> u64 {
        self.lba * SECTOR_SIZE
    }
}

struct DirEntry {
    name: String,
    extent: Extent,
    is_dir: bool,
}

fn read_exact_at<F: Read + Seek>(file: &mut F, pos: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn parse_record(data: &[u8]) -> Result<DirEntry> {
    if data.len() < 34 || data[0] < 34 || data[0] as usize > data.len() {
        return Err(PatcherError::Format(
            "ISO9660 directory record is truncated".to_string(),
        ));
    }
    let name_len = data[32] as usize;
    if 33 + name_len > data[0] as usize {
        return Err(PatcherError::Format(
            "ISO9660 directory record name runs past the record".to_string(),
        ));
    }
    let raw_name = &data[33..33 + name_len];
    let name = String::from_utf8_lossy(raw_name);
    let name = name.split(';').next().unwrap_or_default().to_ascii_uppercase();

    Ok(DirEntry {
        name,
        extent: Extent {
            lba: LittleEndian::read_u32(&data[2..6]) as u64,
            size: LittleEndian::read_u32(&data[10..14]) as u64,
        },
        is_dir: data[25] & FLAG_DIRECTORY != 0,
    })
}

fn read_root<F: Read + Seek>(file: &mut F) -> Result<Extent> {
    let pvd = read_exact_at(file, PVD_SECTOR * SECTOR_SIZE, SECTOR_SIZE as usize)?;
    if pvd[0] != 1 || &pvd[1..6] != b"CD001" {
        return Err(PatcherError::Format(
            "image has no ISO9660 primary volume descriptor".to_string(),
        ));
    }
    Ok(parse_record(&pvd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34])?.extent)
}

fn list_directory<F: Read + Seek>(file: &mut F, dir: Extent) -> Result<Vec<DirEntry>> {
    if dir.size > MAX_DIRECTORY_SIZE as u64 {
        return Err(PatcherError::Format(format!(
            "directory at sector {} claims {} bytes",
            dir.lba, dir.size
        )));
    }
    let data = read_exact_at(file, dir.byte_offset(), dir.size as usize)?;
    let mut entries = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let len = data[offset] as usize;
        if len == 0 {
            // Records never straddle sectors; zero length pads to the next one.
            offset = (offset / SECTOR_SIZE as usize + 1) * SECTOR_SIZE as usize;
            continue;
        }
        let entry = parse_record(&data[offset..])?;
        offset += len;
        if entry.name == "\0" || entry.name == "\u{1}" {
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn lookup<F: Read + Seek>(file: &mut F, root: Extent, path: &[&str]) -> Result<Option<DirEntry>> {
    let mut current = root;
    for (depth, part) in path.iter().enumerate() {
        let found = list_directory(file, current)?
            .into_iter()
            .find(|e| e.name.eq_ignore_ascii_case(part));
        match found {
            Some(entry) if depth + 1 == path.len() => return Ok(Some(entry)),
            Some(entry) if entry.is_dir => current = entry.extent,
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// True when the image carries an ISO9660 tree with a `PSP_GAME` directory.
pub(crate) fn looks_like_psp<F: Read + Seek>(file: &mut F) -> Result<bool> {
    let found = read_root(file).and_then(|root| lookup(file, root, &["PSP_GAME"]));
    match found {
        Ok(found) => Ok(found.map_or(false, |e| e.is_dir)),
        Err(PatcherError::Io(e)) if e.kind() != std::io::ErrorKind::UnexpectedEof => {
            Err(PatcherError::Io(e))
        }
        Err(_) => Ok(false),
    }
}

pub struct PspImage<F> {
    file: F,
    files: HashMap<PspFile, Extent>,
    pack_index: Option<Vec<(u64, u64)>>,
}

impl<F: Read + Write + Seek> PspImage<F> {
    /// Walks the directory tree once to locate the firmware blocks and package archive.
    pub fn open(mut file: F) -> Result<Self> {
        let root = read_root(&mut file)?;
        let mut files = HashMap::new();
        for kind in PspFile::ALL {
            let entry = lookup(&mut file, root, kind.path())?.ok_or_else(|| {
                PatcherError::Format(format!("{} not found on PSP image", kind.path().join("/")))
            })?;
            log::debug!(
                "{} at sector {} ({} bytes)",
                kind.name(),
                entry.extent.lba,
                entry.extent.size
            );
            files.insert(kind, entry.extent);
        }
        Ok(Self {
            file,
            files,
            pack_index: None,
        })
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    fn file_extent(&self, kind: PspFile) -> Result<Extent> {
        self.files
            .get(&kind)
            .copied()
            .ok_or_else(|| PatcherError::Format(format!("{} was not located", kind.name())))
    }

    fn read_pack_index(&mut self) -> Result<Vec<(u64, u64)>> {
        let pack = self.file_extent(PspFile::FftPackBin)?;
        if pack.size < 8 {
            return Err(PatcherError::Format(
                "fftpack.bin is too small to contain a valid header".to_string(),
            ));
        }
        let head = read_exact_at(&mut self.file, pack.byte_offset(), 4)?;
        let count = LittleEndian::read_u32(&head) as u64;
        let table_len = count * 4;
        if 8 + table_len > pack.size {
            return Err(PatcherError::Format(
                "fftpack.bin index extends beyond end of file".to_string(),
            ));
        }
        let table = read_exact_at(&mut self.file, pack.byte_offset() + 8, table_len as usize)?;
        let starts: Vec<u64> = table
            .chunks_exact(4)
            .map(|c| LittleEndian::read_u32(c) as u64)
            .collect();

        let mut entries = Vec::with_capacity(starts.len());
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(pack.size);
            if start > end || end > pack.size {
                return Err(PatcherError::Format(format!(
                    "fftpack.bin entry {i} has an invalid extent"
                )));
            }
            entries.push((start, end - start));
        }
        log::debug!("fftpack.bin holds {} entries", entries.len());
        Ok(entries)
    }

    /// Package table of `fftpack.bin` as (start, size) pairs, read on first use and
    /// kept for the handle's lifetime.
    fn pack_index(&mut self) -> Result<&[(u64, u64)]> {
        if self.pack_index.is_none() {
            let index = self.read_pack_index()?;
            self.pack_index = Some(index);
        }
        Ok(self.pack_index.as_deref().unwrap_or(&[]))
    }

    /// Absolute byte offset and size of `location` on the image.
    fn resolve(&mut self, location: &Location) -> Result<(u64, u64)> {
        match location {
            Location::Psp(kind) => {
                let extent = self.file_extent(*kind)?;
                Ok((extent.byte_offset(), extent.size))
            }
            Location::Pack(index) => {
                let base = self.file_extent(PspFile::FftPackBin)?.byte_offset();
                let packs = self.pack_index()?;
                let (start, size) = packs.get(*index as usize).copied().ok_or_else(|| {
                    PatcherError::OutOfRange {
                        what: "fftpack.bin index".to_string(),
                        offset: *index as u64,
                        size: 1,
                        limit: packs.len() as u64,
                    }
                })?;
                Ok((base + start, size))
            }
            other => Err(PatcherError::Unsupported(format!(
                "{other} cannot be addressed on a PSP image"
            ))),
        }
    }
}

impl<F: Read + Write + Seek> AddressableSource for PspImage<F> {
    fn extent(&mut self, location: &Location) -> Result<u64> {
        Ok(self.resolve(location)?.1)
    }

    fn read(&mut self, location: &Location, offset: u64, size: usize) -> Result<Vec<u8>> {
        let (base, limit) = self.resolve(location)?;
        check_span(location, offset, size as u64, limit)?;
        read_exact_at(&mut self.file, base + offset, size)
    }

    fn write(&mut self, location: &Location, offset: u64, bytes: &[u8]) -> Result<()> {
        let (base, limit) = self.resolve(location)?;
        check_span(location, offset, bytes.len() as u64, limit)?;
        self.file.seek(SeekFrom::Start(base + offset))?;
        self.file.write_all(bytes)?;
        self.file.flush()?;
        Ok(())
    }
}
