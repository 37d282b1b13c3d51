use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two supported game releases. Every defaulting and addressing decision
/// branches on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "US_PSX")]
    Psx,
    #[serde(rename = "US_PSP")]
    Psp,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Psx, Platform::Psp];

    /// Tag stored in archive `type` entries, legacy documents and text exports.
    pub fn tag(self) -> &'static str {
        match self {
            Platform::Psx => "US_PSX",
            Platform::Psp => "US_PSP",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "US_PSX" => Some(Platform::Psx),
            "US_PSP" => Some(Platform::Psp),
            _ => None,
        }
    }

    /// Elements carried by a patch for this platform, in archive order.
    pub fn elements(self) -> impl Iterator<Item = Element> {
        Element::ALL.into_iter().filter(move |e| e.exists_on(self))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(p) = Platform::from_tag(s) {
            return Ok(p);
        }
        match s.trim().to_ascii_lowercase().as_str() {
            "psx" => Ok(Platform::Psx),
            "psp" => Ok(Platform::Psp),
            other => Err(format!("unknown platform '{other}' (expected psx or psp)")),
        }
    }
}

/// Named data blocks owned by a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Element {
    Abilities,
    AbilityEffects,
    AbilityAnimations,
    Items,
    ItemAttributes,
    PspItems,
    PspItemAttributes,
    Jobs,
    JobLevels,
    SkillSets,
    MonsterSkills,
    ActionMenus,
    InflictStatuses,
    StatusAttributes,
    Poaching,
    Entd1,
    Entd2,
    Entd3,
    Entd4,
    Entd5,
    MoveFindItems,
    StoreInventories,
}

impl Element {
    pub const ALL: [Element; 22] = [
        Element::Abilities,
        Element::AbilityEffects,
        Element::AbilityAnimations,
        Element::Items,
        Element::ItemAttributes,
        Element::PspItems,
        Element::PspItemAttributes,
        Element::Jobs,
        Element::JobLevels,
        Element::SkillSets,
        Element::MonsterSkills,
        Element::ActionMenus,
        Element::InflictStatuses,
        Element::StatusAttributes,
        Element::Poaching,
        Element::Entd1,
        Element::Entd2,
        Element::Entd3,
        Element::Entd4,
        Element::Entd5,
        Element::MoveFindItems,
        Element::StoreInventories,
    ];

    /// Entry name used in archive patches and legacy documents.
    pub fn name(self) -> &'static str {
        match self {
            Element::Abilities => "abilities",
            Element::AbilityEffects => "abilityEffects",
            Element::AbilityAnimations => "abilityAnimations",
            Element::Items => "items",
            Element::ItemAttributes => "itemAttributes",
            Element::PspItems => "pspItems",
            Element::PspItemAttributes => "pspItemAttributes",
            Element::Jobs => "jobs",
            Element::JobLevels => "jobLevels",
            Element::SkillSets => "skillSets",
            Element::MonsterSkills => "monsterSkills",
            Element::ActionMenus => "actionMenus",
            Element::InflictStatuses => "inflictStatuses",
            Element::StatusAttributes => "statusAttributes",
            Element::Poaching => "poaching",
            Element::Entd1 => "entd1",
            Element::Entd2 => "entd2",
            Element::Entd3 => "entd3",
            Element::Entd4 => "entd4",
            Element::Entd5 => "entd5",
            Element::MoveFindItems => "moveFindItems",
            Element::StoreInventories => "storeInventories",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Element::ALL.into_iter().find(|e| e.name() == name)
    }

    /// The platform this element is exclusive to, if any.
    pub fn exclusive_to(self) -> Option<Platform> {
        match self {
            Element::PspItems | Element::PspItemAttributes | Element::Entd5 => Some(Platform::Psp),
            _ => None,
        }
    }

    pub fn exists_on(self, platform: Platform) -> bool {
        self.exclusive_to().map_or(true, |p| p == platform)
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_names_round_trip() {
        for element in Element::ALL {
            assert_eq!(Element::from_name(element.name()), Some(element));
        }
        assert_eq!(Element::from_name("nope"), None);
    }

    #[test]
    fn psx_has_no_psp_exclusive_elements() {
        let psx: Vec<Element> = Platform::Psx.elements().collect();
        assert_eq!(psx.len(), 19);
        assert!(!psx.contains(&Element::Entd5));
        assert!(!psx.contains(&Element::PspItems));
        assert_eq!(Platform::Psp.elements().count(), 22);
    }

    #[test]
    fn parses_tags_and_short_names() {
        assert_eq!("US_PSP".parse::<Platform>().unwrap(), Platform::Psp);
        assert_eq!("psx".parse::<Platform>().unwrap(), Platform::Psx);
        assert!("gba".parse::<Platform>().is_err());
    }
}
