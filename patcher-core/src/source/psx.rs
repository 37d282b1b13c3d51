use super::{check_span, AddressableSource, Location};
use crate::{PatcherError, Result};
use std::io::{Read, Seek, SeekFrom, Write};

pub(crate) const USER_DATA_SIZE: u64 = 2048;
pub(crate) const RAW_SECTOR_SIZE: u64 = 2352;
const RAW_DATA_OFFSET: u64 = 24;
const SYNC_PATTERN: [u8; 12] = [
    0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
];

/// Named files on the PSX disc with their fixed start sector and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PsxFile {
    Scus94221,
    BattleBin,
    WorldWldcoreBin,
    WorldWorldBin,
    WorldWldmesBin,
    EventAttackOut,
    EventTestEvt,
    EventEntd1Ent,
    EventEntd2Ent,
    EventEntd3Ent,
    EventEntd4Ent,
}

impl PsxFile {
    pub const ALL: [PsxFile; 11] = [
        PsxFile::Scus94221,
        PsxFile::BattleBin,
        PsxFile::WorldWldcoreBin,
        PsxFile::WorldWorldBin,
        PsxFile::WorldWldmesBin,
        PsxFile::EventAttackOut,
        PsxFile::EventTestEvt,
        PsxFile::EventEntd1Ent,
        PsxFile::EventEntd2Ent,
        PsxFile::EventEntd3Ent,
        PsxFile::EventEntd4Ent,
    ];

    /// Name used by `<Sector filename=..>` in layout manifests.
    pub fn name(self) -> &'static str {
        match self {
            PsxFile::Scus94221 => "SCUS_942_21",
            PsxFile::BattleBin => "BATTLE_BIN",
            PsxFile::WorldWldcoreBin => "WORLD_WLDCORE_BIN",
            PsxFile::WorldWorldBin => "WORLD_WORLD_BIN",
            PsxFile::WorldWldmesBin => "WORLD_WLDMES_BIN",
            PsxFile::EventAttackOut => "EVENT_ATTACK_OUT",
            PsxFile::EventTestEvt => "EVENT_TEST_EVT",
            PsxFile::EventEntd1Ent => "EVENT_ENTD1_ENT",
            PsxFile::EventEntd2Ent => "EVENT_ENTD2_ENT",
            PsxFile::EventEntd3Ent => "EVENT_ENTD3_ENT",
            PsxFile::EventEntd4Ent => "EVENT_ENTD4_ENT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        PsxFile::ALL.into_iter().find(|f| f.name() == name)
    }

    /// First sector of the file.
    pub fn lba(self) -> u64 {
        match self {
            PsxFile::Scus94221 => 24,
            PsxFile::BattleBin => 1000,
            PsxFile::WorldWldcoreBin => 1100,
            PsxFile::WorldWorldBin => 1140,
            PsxFile::WorldWldmesBin => 1180,
            PsxFile::EventAttackOut => 1200,
            PsxFile::EventTestEvt => 1240,
            PsxFile::EventEntd1Ent => 1300,
            PsxFile::EventEntd2Ent => 1340,
            PsxFile::EventEntd3Ent => 1380,
            PsxFile::EventEntd4Ent => 1420,
        }
    }

    pub fn size(self) -> u64 {
        match self {
            PsxFile::Scus94221 => 0x60000,
            PsxFile::BattleBin => 0x10000,
            PsxFile::WorldWldcoreBin => 0x4000,
            PsxFile::WorldWorldBin => 0x10000,
            PsxFile::WorldWldmesBin => 0x8000,
            PsxFile::EventAttackOut => 0x10000,
            PsxFile::EventTestEvt => 0x20000,
            PsxFile::EventEntd1Ent
            | PsxFile::EventEntd2Ent
            | PsxFile::EventEntd3Ent
            | PsxFile::EventEntd4Ent => 0x14000,
        }
    }
}

/// Physical sector format of a PSX image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorMode {
    /// 2352-byte Mode 2 Form 1 sectors, user data at +24.
    Raw,
    /// 2048-byte user-data-only sectors.
    Cooked,
}

impl SectorMode {
    fn sector_size(self) -> u64 {
        match self {
            SectorMode::Raw => RAW_SECTOR_SIZE,
            SectorMode::Cooked => USER_DATA_SIZE,
        }
    }

    fn data_offset(self) -> u64 {
        match self {
            SectorMode::Raw => RAW_DATA_OFFSET,
            SectorMode::Cooked => 0,
        }
    }
}

pub struct PsxImage<F> {
    file: F,
    mode: SectorMode,
}

fn read_at<F: Read + Seek>(file: &mut F, pos: u64, buf: &mut [u8]) -> Result<bool> {
    file.seek(SeekFrom::Start(pos))?;
    match file.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl<F: Read + Write + Seek> PsxImage<F> {
    /// Detects raw or cooked sectors from the volume descriptor at sector 16.
    pub fn open(mut file: F) -> Result<Self> {
        let mut head = [0u8; 30];
        if read_at(&mut file, 16 * RAW_SECTOR_SIZE, &mut head)?
            && head[..12] == SYNC_PATTERN
            && &head[25..30] == b"CD001"
        {
            log::debug!("PSX image uses raw 2352-byte sectors");
            return Ok(Self {
                file,
                mode: SectorMode::Raw,
            });
        }

        let mut id = [0u8; 6];
        if read_at(&mut file, 16 * USER_DATA_SIZE, &mut id)? && &id[1..6] == b"CD001" {
            log::debug!("PSX image uses cooked 2048-byte sectors");
            return Ok(Self {
                file,
                mode: SectorMode::Cooked,
            });
        }

        Err(PatcherError::Format(
            "image has no ISO9660 volume descriptor in raw or cooked form".to_string(),
        ))
    }

    pub fn mode(&self) -> SectorMode {
        self.mode
    }

    pub fn into_inner(self) -> F {
        self.file
    }

    fn resolve(location: &Location) -> Result<PsxFile> {
        match location {
            Location::Psx(file) => Ok(*file),
            other => Err(PatcherError::Unsupported(format!(
                "{other} cannot be addressed on a PSX image"
            ))),
        }
    }

    /// Splits a file-relative span into per-sector (physical position, chunk range) pairs.
    fn chunks(&self, file: PsxFile, offset: u64, len: usize) -> Vec<(u64, std::ops::Range<usize>)> {
        let mut out = Vec::new();
        let mut done = 0usize;
        while done < len {
            let pos = offset + done as u64;
            let sector = file.lba() + pos / USER_DATA_SIZE;
            let within = pos % USER_DATA_SIZE;
            let chunk = ((USER_DATA_SIZE - within) as usize).min(len - done);
            let physical =
                sector * self.mode.sector_size() + self.mode.data_offset() + within;
            out.push((physical, done..done + chunk));
            done += chunk;
        }
        out
    }
}

impl<F: Read + Write + Seek> AddressableSource for PsxImage<F> {
    fn extent(&mut self, location: &Location) -> Result<u64> {
        Ok(Self::resolve(location)?.size())
    }

    fn read(&mut self, location: &Location, offset: u64, size: usize) -> Result<Vec<u8>> {
        let file = Self::resolve(location)?;
        check_span(location, offset, size as u64, file.size())?;

        let mut buf = vec![0u8; size];
        for (physical, range) in self.chunks(file, offset, size) {
            let start = range.start as u64;
            if !read_at(&mut self.file, physical, &mut buf[range])? {
                // Truncated image: the file table promises more than the medium holds.
                let medium = self.file.seek(SeekFrom::End(0))?;
                return Err(PatcherError::OutOfRange {
                    what: format!("{location} on a {medium}-byte image"),
                    offset: offset + start,
                    size: size as u64 - start,
                    limit: medium,
                });
            }
        }
        Ok(buf)
    }

    fn write(&mut self, location: &Location, offset: u64, bytes: &[u8]) -> Result<()> {
        let file = Self::resolve(location)?;
        check_span(location, offset, bytes.len() as u64, file.size())?;

        for (physical, range) in self.chunks(file, offset, bytes.len()) {
            self.file.seek(SeekFrom::Start(physical))?;
            self.file.write_all(&bytes[range])?;
        }
        self.file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Builds an image covering every named file, filling user data with a
    /// position-derived pattern so reads can be checked.
    pub(crate) fn build_image(mode: SectorMode) -> Vec<u8> {
        let sectors = PsxFile::ALL
            .iter()
            .map(|f| f.lba() + f.size() / USER_DATA_SIZE)
            .max()
            .unwrap_or(0);
        let mut image = vec![0u8; (sectors * mode.sector_size()) as usize];
        for sector in 0..sectors {
            let base = (sector * mode.sector_size()) as usize;
            if mode == SectorMode::Raw {
                image[base..base + 12].copy_from_slice(&SYNC_PATTERN);
            }
            let data = base + mode.data_offset() as usize;
            for i in 0..USER_DATA_SIZE as usize {
                image[data + i] = pattern(sector * USER_DATA_SIZE + i as u64);
            }
        }
        let pvd = (16 * mode.sector_size() + mode.data_offset()) as usize;
        image[pvd] = 1;
        image[pvd + 1..pvd + 6].copy_from_slice(b"CD001");
        image
    }

    pub(crate) fn pattern(logical: u64) -> u8 {
        (logical % 251) as u8
    }

    #[test]
    fn detects_sector_modes() {
        for mode in [SectorMode::Raw, SectorMode::Cooked] {
            let image = PsxImage::open(Cursor::new(build_image(mode))).unwrap();
            assert_eq!(image.mode(), mode);
        }
        assert!(PsxImage::open(Cursor::new(vec![0u8; 64 * 2048])).is_err());
    }

    #[test]
    fn raw_and_cooked_reads_agree_across_sector_boundaries() {
        let loc = Location::Psx(PsxFile::BattleBin);
        let base = PsxFile::BattleBin.lba() * USER_DATA_SIZE;
        for mode in [SectorMode::Raw, SectorMode::Cooked] {
            let mut image = PsxImage::open(Cursor::new(build_image(mode))).unwrap();
            let bytes = image.read(&loc, 2040, 20).unwrap();
            let expected: Vec<u8> = (0..20).map(|i| pattern(base + 2040 + i)).collect();
            assert_eq!(bytes, expected);
        }
    }

    #[test]
    fn raw_writes_leave_sync_and_headers_alone() {
        let loc = Location::Psx(PsxFile::WorldWldcoreBin);
        let mut image = PsxImage::open(Cursor::new(build_image(SectorMode::Raw))).unwrap();
        image.write(&loc, 2046, &[0xAA; 4]).unwrap();
        assert_eq!(image.read(&loc, 2046, 4).unwrap(), vec![0xAA; 4]);

        let raw = image.into_inner().into_inner();
        let next = ((PsxFile::WorldWldcoreBin.lba() + 1) * RAW_SECTOR_SIZE) as usize;
        assert_eq!(&raw[next..next + 12], &SYNC_PATTERN);
        assert_eq!(&raw[next + 24..next + 26], &[0xAA, 0xAA]);
    }

    #[test]
    fn out_of_range_and_foreign_locations_fail() {
        let mut image = PsxImage::open(Cursor::new(build_image(SectorMode::Cooked))).unwrap();
        let loc = Location::Psx(PsxFile::WorldWldcoreBin);
        assert!(matches!(
            image.read(&loc, 0x3FFF, 2),
            Err(PatcherError::OutOfRange { .. })
        ));
        assert!(image.read(&Location::Pack(1), 0, 1).is_err());
    }

    #[test]
    fn reads_past_a_truncated_image_are_out_of_range() {
        let mut bytes = build_image(SectorMode::Cooked);
        let cut = PsxFile::BattleBin.lba() * USER_DATA_SIZE + 100;
        bytes.truncate(cut as usize);
        let mut image = PsxImage::open(Cursor::new(bytes)).unwrap();
        let loc = Location::Psx(PsxFile::BattleBin);

        assert_eq!(image.read(&loc, 0, 100).unwrap().len(), 100);
        assert!(matches!(
            image.read(&loc, 0, 200),
            Err(PatcherError::OutOfRange { offset: 0, limit, .. }) if limit == cut
        ));
    }
}
