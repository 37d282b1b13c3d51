use crate::source::{Location, PspFile, PsxFile};
use crate::{Element, Platform};

/// Where `element` lives on a `platform` disc, as (file, byte offset) pairs.
///
/// PSP firmware tables exist in both BOOT.BIN and EBOOT.BIN; the first pair is
/// the one read from.
pub(crate) fn element_locations(platform: Platform, element: Element) -> Vec<(Location, u64)> {
    match platform {
        Platform::Psx => psx_location(element).into_iter().collect(),
        Platform::Psp => psp_locations(element),
    }
}

fn psx_location(element: Element) -> Option<(Location, u64)> {
    use Element::*;
    let (file, offset) = match element {
        Abilities => (PsxFile::Scus94221, 0x4F3F0),
        Items => (PsxFile::Scus94221, 0x50400),
        ItemAttributes => (PsxFile::Scus94221, 0x51000),
        Jobs => (PsxFile::Scus94221, 0x51400),
        JobLevels => (PsxFile::Scus94221, 0x53400),
        SkillSets => (PsxFile::Scus94221, 0x53600),
        MonsterSkills => (PsxFile::Scus94221, 0x54800),
        ActionMenus => (PsxFile::Scus94221, 0x54900),
        StatusAttributes => (PsxFile::Scus94221, 0x54A00),
        InflictStatuses => (PsxFile::Scus94221, 0x54D00),
        Poaching => (PsxFile::Scus94221, 0x55000),
        AbilityEffects => (PsxFile::BattleBin, 0x2000),
        AbilityAnimations => (PsxFile::BattleBin, 0x3000),
        MoveFindItems => (PsxFile::WorldWldcoreBin, 0),
        StoreInventories => (PsxFile::WorldWldcoreBin, 0x1000),
        Entd1 => (PsxFile::EventEntd1Ent, 0),
        Entd2 => (PsxFile::EventEntd2Ent, 0),
        Entd3 => (PsxFile::EventEntd3Ent, 0),
        Entd4 => (PsxFile::EventEntd4Ent, 0),
        PspItems | PspItemAttributes | Entd5 => return None,
    };
    Some((Location::Psx(file), offset))
}

/// First fftpack.bin entry holding ENTD data.
pub(crate) const PSP_ENTD_PACK: u32 = 80;

fn psp_locations(element: Element) -> Vec<(Location, u64)> {
    use Element::*;
    let boot = |offset: u64| {
        vec![
            (Location::Psp(PspFile::BootBin), offset),
            (Location::Psp(PspFile::EbootBin), offset),
        ]
    };
    let pack = |n: u32| vec![(Location::Pack(PSP_ENTD_PACK + n), 0)];
    match element {
        Abilities => boot(0x10000),
        AbilityEffects => boot(0x11000),
        AbilityAnimations => boot(0x11400),
        Items => boot(0x12000),
        PspItems => boot(0x12C00),
        ItemAttributes => boot(0x13000),
        PspItemAttributes => boot(0x13240),
        Jobs => boot(0x13400),
        JobLevels => boot(0x15500),
        SkillSets => boot(0x15700),
        MonsterSkills => boot(0x16900),
        ActionMenus => boot(0x16A00),
        StatusAttributes => boot(0x16B00),
        InflictStatuses => boot(0x16E00),
        Poaching => boot(0x17100),
        MoveFindItems => boot(0x17200),
        StoreInventories => boot(0x17C00),
        Entd1 => pack(0),
        Entd2 => pack(1),
        Entd3 => pack(2),
        Entd4 => pack(3),
        Entd5 => pack(4),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::element_len;
    use std::collections::BTreeMap;

    #[test]
    fn every_element_has_a_home_and_nothing_overlaps() {
        for platform in Platform::ALL {
            let mut spans: BTreeMap<Location, Vec<(u64, u64)>> = BTreeMap::new();
            for element in platform.elements() {
                let len = element_len(platform, element).unwrap() as u64;
                let locations = element_locations(platform, element);
                assert!(!locations.is_empty(), "{element} on {platform}");
                for (location, offset) in locations {
                    spans.entry(location).or_default().push((offset, offset + len));
                }
            }
            for (location, mut list) in spans {
                list.sort();
                for pair in list.windows(2) {
                    assert!(pair[0].1 <= pair[1].0, "{location}: {pair:?}");
                }
            }
        }
    }

    #[test]
    fn psx_tables_fit_their_files() {
        for element in Platform::Psx.elements() {
            let len = element_len(Platform::Psx, element).unwrap() as u64;
            for (location, offset) in element_locations(Platform::Psx, element) {
                let Location::Psx(file) = location else {
                    panic!("{element} is not on a PSX file");
                };
                assert!(offset + len <= file.size(), "{element}");
            }
        }
        assert!(element_locations(Platform::Psx, Element::Entd5).is_empty());
    }
}
