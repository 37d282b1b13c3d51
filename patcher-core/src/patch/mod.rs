//! The patch container: every element's bytes for one platform, with loading
//! from patch files or disc images, saving and conversion.

mod archive;
mod convert;
mod disc;
pub mod records;

pub use convert::convert_archive_to_psp;

use crate::defaults::element_len;
use crate::source::{AddressableSource, DiscImage};
use crate::{default_bytes, Element, PatcherError, Platform, Result};
use records::{AbilityTable, ItemAttributeTable, ItemTable, JobLevels, JobTable, SkillSets};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Seek, Write};
use std::path::Path;

/// Version written into every saved archive.
pub const FORMAT_VERSION: &str = "1.0";

/// Structured form of the record-shaped elements, checked as a whole.
#[derive(Debug, Clone)]
struct Assembled {
    abilities: AbilityTable,
    items: ItemTable,
    item_attributes: ItemAttributeTable,
    jobs: JobTable,
    job_levels: JobLevels,
    skill_sets: SkillSets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchContainer {
    platform: Platform,
    version: String,
    data: BTreeMap<Element, Vec<u8>>,
}

impl PatchContainer {
    /// A container holding the platform defaults for every element.
    pub fn new(platform: Platform) -> Result<Self> {
        let data = platform
            .elements()
            .map(|e| default_bytes(platform, e).map(|b| (e, b.to_vec())))
            .collect::<Result<_>>()?;
        Ok(Self {
            platform,
            version: FORMAT_VERSION.to_string(),
            data,
        })
    }

    fn from_entries(
        platform: Platform,
        version: String,
        mut read: impl FnMut(Element) -> Option<Vec<u8>>,
    ) -> Result<Self> {
        let mut data = BTreeMap::new();
        for element in platform.elements() {
            let bytes = match read(element) {
                Some(bytes) => bytes,
                None => {
                    log::info!("{element} not present, using the {platform} default");
                    default_bytes(platform, element)?.to_vec()
                }
            };
            data.insert(element, bytes);
        }
        let container = Self {
            platform,
            version,
            data,
        };
        container.assemble()?;
        Ok(container)
    }

    /// Loads a patch file in either format. Missing elements fall back to the
    /// defaults one by one.
    pub fn load_bytes(raw: &[u8]) -> Result<Self> {
        let mut patch = archive::read_patch(raw)?;
        log::debug!(
            "patch version {} for {} with {} entries",
            patch.version,
            patch.platform,
            patch.entries.len()
        );
        let platform = patch.platform;
        Self::from_entries(platform, patch.version, |e| patch.entries.remove(e.name()))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        log::info!("loading patch {}", path.display());
        Self::load_bytes(&fs::read(path)?)
    }

    /// Reads every element straight from its location on a disc image.
    pub fn from_disc<S: AddressableSource + ?Sized>(
        source: &mut S,
        platform: Platform,
    ) -> Result<Self> {
        let mut data = BTreeMap::new();
        for element in platform.elements() {
            let (location, offset) = disc::element_locations(platform, element)
                .into_iter()
                .next()
                .ok_or_else(|| {
                    PatcherError::Unsupported(format!("{element} has no {platform} disc location"))
                })?;
            let len = element_len(platform, element)?;
            data.insert(element, source.read(&location, offset, len)?);
        }
        log::info!("read {} elements from a {platform} disc", data.len());
        let container = Self {
            platform,
            version: FORMAT_VERSION.to_string(),
            data,
        };
        container.assemble()?;
        Ok(container)
    }

    pub fn from_disc_path(path: &Path) -> Result<Self> {
        let mut image = DiscImage::open_path(path, false)?;
        let platform = image.platform();
        Self::from_disc(&mut image, platform)
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Version read from the source patch, or the current one for new containers.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bytes(&self, element: Element) -> Option<&[u8]> {
        self.data.get(&element).map(Vec::as_slice)
    }

    /// Replaces an element's bytes. The length must match the platform's table.
    pub fn set_bytes(&mut self, element: Element, bytes: Vec<u8>) -> Result<()> {
        if !element.exists_on(self.platform) {
            return Err(PatcherError::Unsupported(format!(
                "{element} does not exist on {}",
                self.platform
            )));
        }
        let expected = element_len(self.platform, element)?;
        if bytes.len() != expected {
            return Err(PatcherError::Format(format!(
                "{element} needs {expected} bytes, got {}",
                bytes.len()
            )));
        }
        self.data.insert(element, bytes);
        Ok(())
    }

    fn element(&self, element: Element) -> Result<&[u8]> {
        self.bytes(element)
            .ok_or_else(|| PatcherError::Format(format!("{element} is not loaded")))
    }

    fn check_lengths(&self) -> Result<()> {
        for (element, bytes) in &self.data {
            let expected = element_len(self.platform, *element)?;
            if bytes.len() != expected {
                return Err(PatcherError::Format(format!(
                    "{element} is {} bytes, {} expects {expected}",
                    bytes.len(),
                    self.platform
                )));
            }
        }
        Ok(())
    }

    fn assemble_parts(&self) -> Result<Assembled> {
        self.check_lengths()?;
        let p = self.platform;
        let psp_only = |e: Element| (p == Platform::Psp).then(|| self.bytes(e)).flatten();
        Ok(Assembled {
            abilities: AbilityTable::from_bytes(
                p,
                self.element(Element::Abilities)?,
                self.element(Element::AbilityEffects)?,
            )?,
            items: ItemTable::from_bytes(
                p,
                self.element(Element::Items)?,
                psp_only(Element::PspItems),
            )?,
            item_attributes: ItemAttributeTable::from_bytes(
                p,
                self.element(Element::ItemAttributes)?,
                psp_only(Element::PspItemAttributes),
            )?,
            jobs: JobTable::from_bytes(p, self.element(Element::Jobs)?)?,
            job_levels: JobLevels::from_bytes(p, self.element(Element::JobLevels)?)?,
            skill_sets: SkillSets::from_bytes(p, self.element(Element::SkillSets)?)?,
        })
    }

    /// Builds the structured records; any failure is reported as one load failure.
    fn assemble(&self) -> Result<Assembled> {
        self.assemble_parts()
            .map_err(|e| PatcherError::LoadFailure(Box::new(e)))
    }

    pub fn abilities(&self) -> Result<AbilityTable> {
        Ok(self.assemble()?.abilities)
    }

    pub fn set_abilities(&mut self, table: &AbilityTable) -> Result<()> {
        self.set_bytes(Element::Abilities, table.to_bytes())?;
        self.set_bytes(Element::AbilityEffects, table.effects_to_bytes())
    }

    pub fn jobs(&self) -> Result<JobTable> {
        Ok(self.assemble()?.jobs)
    }

    pub fn set_jobs(&mut self, table: &JobTable) -> Result<()> {
        let bytes = table.to_bytes(self.platform)?;
        self.set_bytes(Element::Jobs, bytes)
    }

    pub fn job_levels(&self) -> Result<JobLevels> {
        Ok(self.assemble()?.job_levels)
    }

    pub fn set_job_levels(&mut self, levels: &JobLevels) -> Result<()> {
        let bytes = levels.to_bytes(self.platform);
        self.set_bytes(Element::JobLevels, bytes)
    }

    pub fn skill_sets(&self) -> Result<SkillSets> {
        Ok(self.assemble()?.skill_sets)
    }

    pub fn items(&self) -> Result<ItemTable> {
        Ok(self.assemble()?.items)
    }

    pub fn item_attributes(&self) -> Result<ItemAttributeTable> {
        Ok(self.assemble()?.item_attributes)
    }

    /// Entries for an archive targeting `destination`, re-derived from the
    /// structured records.
    fn archive_entries(&self, destination: Platform) -> Result<Vec<(String, Vec<u8>)>> {
        let parts = self.assemble()?;
        let mut out = Vec::new();
        for element in destination.elements() {
            let bytes = match element {
                Element::Abilities => parts.abilities.to_bytes(),
                Element::AbilityEffects => parts.abilities.effects_to_bytes(),
                Element::Items => parts.items.first_to_bytes(),
                Element::ItemAttributes => parts.item_attributes.first_to_bytes(),
                Element::PspItems => match parts.items.second_to_bytes() {
                    Some(bytes) => bytes,
                    None => continue,
                },
                Element::PspItemAttributes => match parts.item_attributes.second_to_bytes() {
                    Some(bytes) => bytes,
                    None => continue,
                },
                Element::Jobs => parts.jobs.to_bytes(destination)?,
                Element::JobLevels => parts.job_levels.to_bytes(destination),
                Element::SkillSets => parts.skill_sets.to_bytes(destination)?,
                Element::ActionMenus => {
                    let menus = self.element(element)?;
                    let len = element_len(destination, element)?.min(menus.len());
                    menus[..len].to_vec()
                }
                other => match self.bytes(other) {
                    Some(bytes) => bytes.to_vec(),
                    None => continue,
                },
            };
            out.push((element.name().to_string(), bytes));
        }
        Ok(out)
    }

    /// Writes the archive format for `destination`.
    ///
    /// Saving a PSP container for PSX writes only what PSX knows about; saving a
    /// PSX container for PSP converts a copy first.
    pub fn save<W: Write + Seek>(&self, writer: W, destination: Platform) -> Result<W> {
        if self.platform == Platform::Psx && destination == Platform::Psp {
            let mut converted = self.clone();
            converted.convert(Platform::Psp)?;
            return converted.save(writer, destination);
        }
        let entries = self.archive_entries(destination)?;
        log::info!(
            "saving {} patch with {} elements",
            destination,
            entries.len()
        );
        archive::write_archive(writer, FORMAT_VERSION, destination, &entries)
    }

    pub fn save_file(&self, path: &Path, destination: Platform) -> Result<()> {
        let file = File::create(path)?;
        self.save(file, destination)?;
        Ok(())
    }

    /// Converts the container in place. Only PSX to PSP is offered.
    pub fn convert(&mut self, target: Platform) -> Result<()> {
        match (self.platform, target) {
            (from, to) if from == to => Ok(()),
            (Platform::Psx, Platform::Psp) => {
                let updates = {
                    let data = &self.data;
                    convert::converted_elements(|e| {
                        data.get(&e).map(Vec::as_slice).ok_or_else(|| {
                            PatcherError::Format(format!("{e} is not loaded"))
                        })
                    })
                    .map_err(|e| PatcherError::LoadFailure(Box::new(e)))?
                };
                self.data.extend(updates);
                self.platform = Platform::Psp;
                log::info!("converted patch to {}", self.platform);
                Ok(())
            }
            (from, to) => Err(PatcherError::Unsupported(format!(
                "converting {from} patches to {to}"
            ))),
        }
    }

    /// Writes every element to each of its disc locations. Returns the number of
    /// writes made.
    pub fn apply_to_disc<S: AddressableSource + ?Sized>(&self, source: &mut S) -> Result<usize> {
        self.assemble()?;
        let mut writes = 0;
        for (element, bytes) in &self.data {
            for (location, offset) in disc::element_locations(self.platform, *element) {
                source.write(&location, offset, bytes)?;
                writes += 1;
            }
        }
        log::info!("patched {writes} {} disc locations", self.platform);
        Ok(writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::psx::tests::build_image as build_psx_image;
    use crate::source::psp::tests::{build_fftpack, build_image as build_psp_image};
    use crate::source::{Location, MemorySource, PspFile, PsxFile, SectorMode};
    use std::io::Cursor;

    fn archive_with(platform: Platform, skip: &[Element]) -> Vec<u8> {
        let entries: Vec<(String, Vec<u8>)> = platform
            .elements()
            .filter(|e| !skip.contains(e))
            .map(|e| {
                let mut bytes = default_bytes(platform, e).unwrap().to_vec();
                bytes[0] ^= 0xFF;
                (e.name().to_string(), bytes)
            })
            .collect();
        archive::write_archive(Cursor::new(Vec::new()), FORMAT_VERSION, platform, &entries)
            .unwrap()
            .into_inner()
    }

    #[test]
    fn new_containers_hold_every_default() {
        for platform in Platform::ALL {
            let patch = PatchContainer::new(platform).unwrap();
            for element in Element::ALL {
                assert_eq!(patch.bytes(element).is_some(), element.exists_on(platform));
            }
        }
    }

    #[test]
    fn each_missing_element_falls_back_to_its_default() {
        for platform in Platform::ALL {
            for element in platform.elements() {
                let patch = PatchContainer::load_bytes(&archive_with(platform, &[element])).unwrap();
                assert_eq!(patch.bytes(element).unwrap(), default_bytes(platform, element).unwrap());
            }
        }
    }

    #[test]
    fn psp_archive_without_job_levels_loads_defaults() {
        let patch =
            PatchContainer::load_bytes(&archive_with(Platform::Psp, &[Element::JobLevels])).unwrap();
        assert_eq!(patch.platform(), Platform::Psp);
        assert_eq!(
            patch.bytes(Element::JobLevels).unwrap(),
            default_bytes(Platform::Psp, Element::JobLevels).unwrap()
        );
        assert_ne!(
            patch.bytes(Element::Jobs).unwrap(),
            default_bytes(Platform::Psp, Element::Jobs).unwrap()
        );
    }

    #[test]
    fn legacy_psx_document_without_entd5_loads() {
        let poach = vec![0x42u8; 96];
        let xml = archive::tests::legacy_document(
            Platform::Psx,
            &[("poaching", &poach), ("entd5", &[1, 2, 3])],
        );
        let patch = PatchContainer::load_bytes(xml.as_bytes()).unwrap();
        assert_eq!(patch.platform(), Platform::Psx);
        assert_eq!(patch.bytes(Element::Poaching).unwrap(), poach.as_slice());
        assert_eq!(patch.bytes(Element::Entd5), None);
        assert_eq!(
            patch.bytes(Element::Entd1).unwrap(),
            default_bytes(Platform::Psx, Element::Entd1).unwrap()
        );
    }

    #[test]
    fn malformed_blocks_are_one_load_failure() {
        let mut entries = vec![("jobs".to_string(), vec![0u8; 12])];
        entries.push(("poaching".to_string(), vec![0u8; 96]));
        let raw = archive::write_archive(Cursor::new(Vec::new()), "1.0", Platform::Psx, &entries)
            .unwrap()
            .into_inner();
        assert!(matches!(
            PatchContainer::load_bytes(&raw),
            Err(PatcherError::LoadFailure(_))
        ));
    }

    #[test]
    fn plain_elements_of_the_wrong_length_fail_to_load() {
        let cases = [
            (Element::Poaching, 3),
            (Element::Entd1, 81921),
            (Element::ActionMenus, 227),
        ];
        for (element, len) in cases {
            let entries = vec![(element.name().to_string(), vec![0u8; len])];
            let raw = archive::write_archive(Cursor::new(Vec::new()), "1.0", Platform::Psx, &entries)
                .unwrap()
                .into_inner();
            match PatchContainer::load_bytes(&raw) {
                Err(PatcherError::LoadFailure(inner)) => {
                    assert!(matches!(*inner, PatcherError::Format(_)), "{element}")
                }
                other => panic!("{element}: {other:?}"),
            }
        }

        let xml = archive::tests::legacy_document(Platform::Psp, &[("entd5", &[1, 2, 3])]);
        assert!(matches!(
            PatchContainer::load_bytes(xml.as_bytes()),
            Err(PatcherError::LoadFailure(_))
        ));
    }

    #[test]
    fn save_round_trips_and_psp_downgrade_drops_exclusive_elements() {
        let original = PatchContainer::load_bytes(&archive_with(Platform::Psp, &[])).unwrap();
        let same = original.save(Cursor::new(Vec::new()), Platform::Psp).unwrap();
        assert_eq!(PatchContainer::load_bytes(&same.into_inner()).unwrap(), original);

        let down = original.save(Cursor::new(Vec::new()), Platform::Psx).unwrap();
        let raw = archive::read_patch(&down.into_inner()).unwrap();
        assert_eq!(raw.platform, Platform::Psx);
        for name in ["entd5", "pspItems", "pspItemAttributes"] {
            assert!(!raw.entries.contains_key(name));
        }
        assert_eq!(raw.entries["jobs"].len(), 160 * 48);
        assert_eq!(raw.entries["actionMenus"].len(), 224);
        assert!(PatchContainer::load_bytes(&archive::write_archive(
            Cursor::new(Vec::new()),
            "1.0",
            raw.platform,
            &raw.entries.into_iter().collect::<Vec<_>>()
        )
        .unwrap()
        .into_inner())
        .is_ok());
    }

    #[test]
    fn typed_edits_survive_a_save() {
        let mut patch = PatchContainer::new(Platform::Psx).unwrap();
        let mut jobs = patch.jobs().unwrap();
        jobs.jobs[3].head[0] = 0x77;
        patch.set_jobs(&jobs).unwrap();
        let mut abilities = patch.abilities().unwrap();
        abilities.effects[10] = 0x1234;
        patch.set_abilities(&abilities).unwrap();

        let saved = patch.save(Cursor::new(Vec::new()), Platform::Psx).unwrap();
        let reloaded = PatchContainer::load_bytes(&saved.into_inner()).unwrap();
        assert_eq!(reloaded.jobs().unwrap().jobs[3].head[0], 0x77);
        assert_eq!(reloaded.abilities().unwrap().effects[10], 0x1234);
        assert!(patch.set_bytes(Element::Entd5, vec![0; 81920]).is_err());
        assert!(patch.set_bytes(Element::Poaching, vec![0; 3]).is_err());
    }

    #[test]
    fn conversion_touches_only_listed_elements() {
        let mut patch = PatchContainer::new(Platform::Psx).unwrap();
        patch.set_bytes(Element::Poaching, vec![9; 96]).unwrap();
        let before = patch.clone();
        patch.convert(Platform::Psp).unwrap();

        assert_eq!(patch.platform(), Platform::Psp);
        let changed = [
            Element::ActionMenus,
            Element::Jobs,
            Element::JobLevels,
            Element::SkillSets,
        ];
        for element in Platform::Psx.elements().filter(|e| !changed.contains(e)) {
            assert_eq!(patch.bytes(element), before.bytes(element), "{element}");
        }
        for element in [Element::Entd5, Element::PspItems, Element::PspItemAttributes] {
            assert_eq!(
                patch.bytes(element).unwrap(),
                default_bytes(Platform::Psp, element).unwrap()
            );
        }
        assert!(patch.jobs().is_ok());
        assert!(matches!(
            patch.convert(Platform::Psx),
            Err(PatcherError::Unsupported(_))
        ));
    }

    #[test]
    fn reads_and_writes_psx_discs() {
        for mode in [SectorMode::Raw, SectorMode::Cooked] {
            let mut disc = DiscImage::open(Cursor::new(build_psx_image(mode))).unwrap();
            assert_eq!(disc.platform(), Platform::Psx);
            let patch = PatchContainer::from_disc(&mut disc, Platform::Psx).unwrap();
            let jobs = disc.read(&Location::Psx(PsxFile::Scus94221), 0x51400, 7680).unwrap();
            assert_eq!(patch.bytes(Element::Jobs).unwrap(), jobs.as_slice());

            let defaults = PatchContainer::new(Platform::Psx).unwrap();
            assert_eq!(defaults.apply_to_disc(&mut disc).unwrap(), 19);
            assert_eq!(PatchContainer::from_disc(&mut disc, Platform::Psx).unwrap(), defaults);
        }
    }

    #[test]
    fn reads_and_writes_psp_discs_through_both_firmware_copies() {
        let mut packs = vec![Vec::new(); disc::PSP_ENTD_PACK as usize];
        packs.extend((0..5).map(|i| vec![i as u8; 81920]));
        let image = build_psp_image(&vec![0xB0; 0x18000], &vec![0xE0; 0x18000], &build_fftpack(&packs));
        let mut disc = DiscImage::open(Cursor::new(image)).unwrap();
        assert_eq!(disc.platform(), Platform::Psp);

        let read = PatchContainer::from_disc(&mut disc, Platform::Psp).unwrap();
        assert_eq!(read.bytes(Element::Entd3).unwrap(), vec![2u8; 81920].as_slice());
        assert!(read.bytes(Element::Jobs).unwrap().iter().all(|&b| b == 0xB0));

        let defaults = PatchContainer::new(Platform::Psp).unwrap();
        defaults.apply_to_disc(&mut disc).unwrap();
        let eboot = disc.read(&Location::Psp(PspFile::EbootBin), 0x13400, 8281).unwrap();
        assert_eq!(eboot, default_bytes(Platform::Psp, Element::Jobs).unwrap());
        assert_eq!(PatchContainer::from_disc(&mut disc, Platform::Psp).unwrap(), defaults);

        let mut memory = MemorySource::new();
        assert!(PatchContainer::from_disc(&mut memory, Platform::Psp).is_err());
    }
}
