//! Structured views over the record-shaped elements.
//!
//! Every table checks its exact byte length on the way in and reproduces the
//! same bytes on the way out when nothing was edited.

use crate::defaults::element_len;
use crate::{Element, PatcherError, Platform, Result};
use byteorder::{ByteOrder, LittleEndian};

pub const ABILITY_COUNT: usize = 512;
pub const ABILITY_SIZE: usize = 8;
pub const ITEM_SIZE: usize = 12;
pub const ITEM_ATTRIBUTE_SIZE: usize = 7;
pub const PSX_JOB_SIZE: usize = 48;
pub const PSP_JOB_SIZE: usize = 49;
pub const SKILL_SET_SIZE: usize = 25;
pub const REQUIREMENTS_SIZE: usize = 12;
/// Jobs with a requirement record on both platforms.
pub const NAMED_REQUIREMENTS: usize = 19;
pub const JP_ENTRIES: usize = 8;

const JOB_HEAD: usize = 9;
const JOB_EQUIPMENT: usize = 4;
const JOB_TAIL: usize = 35;

fn check_len(platform: Platform, element: Element, bytes: &[u8]) -> Result<()> {
    let expected = element_len(platform, element)?;
    if bytes.len() != expected {
        return Err(PatcherError::Format(format!(
            "{element} holds {} bytes, {platform} expects {expected}",
            bytes.len()
        )));
    }
    Ok(())
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Ability records plus the effect id of each ability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbilityTable {
    pub records: Vec<[u8; ABILITY_SIZE]>,
    pub effects: Vec<u16>,
}

impl AbilityTable {
    pub fn from_bytes(platform: Platform, abilities: &[u8], effects: &[u8]) -> Result<Self> {
        check_len(platform, Element::Abilities, abilities)?;
        check_len(platform, Element::AbilityEffects, effects)?;
        Ok(Self {
            records: abilities.chunks_exact(ABILITY_SIZE).map(fixed).collect(),
            effects: effects.chunks_exact(2).map(LittleEndian::read_u16).collect(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.records.concat()
    }

    pub fn effects_to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.effects.len() * 2];
        LittleEndian::write_u16_into(&self.effects, &mut out);
        out
    }
}

/// A record table split over a shared first block and a PSP-only second block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitTable<const N: usize> {
    pub first: Vec<[u8; N]>,
    pub second: Option<Vec<[u8; N]>>,
}

pub type ItemTable = SplitTable<ITEM_SIZE>;
pub type ItemAttributeTable = SplitTable<ITEM_ATTRIBUTE_SIZE>;

impl<const N: usize> SplitTable<N> {
    fn from_parts(
        platform: Platform,
        first: (Element, &[u8]),
        second: (Element, Option<&[u8]>),
    ) -> Result<Self> {
        check_len(platform, first.0, first.1)?;
        let second = match (platform, second.1) {
            (Platform::Psp, Some(bytes)) => {
                check_len(platform, second.0, bytes)?;
                Some(bytes.chunks_exact(N).map(fixed).collect())
            }
            (Platform::Psp, None) => {
                return Err(PatcherError::Format(format!("{} is missing", second.0)));
            }
            (Platform::Psx, _) => None,
        };
        Ok(Self {
            first: first.1.chunks_exact(N).map(fixed).collect(),
            second,
        })
    }

    pub fn first_to_bytes(&self) -> Vec<u8> {
        self.first.concat()
    }

    pub fn second_to_bytes(&self) -> Option<Vec<u8>> {
        self.second.as_ref().map(|s| s.concat())
    }

    pub fn len(&self) -> usize {
        self.first.len() + self.second.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ItemTable {
    pub fn from_bytes(platform: Platform, items: &[u8], psp_items: Option<&[u8]>) -> Result<Self> {
        Self::from_parts(
            platform,
            (Element::Items, items),
            (Element::PspItems, psp_items),
        )
    }
}

impl ItemAttributeTable {
    pub fn from_bytes(
        platform: Platform,
        attributes: &[u8],
        psp_attributes: Option<&[u8]>,
    ) -> Result<Self> {
        Self::from_parts(
            platform,
            (Element::ItemAttributes, attributes),
            (Element::PspItemAttributes, psp_attributes),
        )
    }
}

/// Equipment flags that only exist in the PSP job record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PspEquipment {
    pub unknown1: bool,
    pub unknown2: bool,
    pub unknown3: bool,
    pub fell_sword: bool,
    pub lip_rouge: bool,
    pub unknown6: bool,
    pub unknown7: bool,
    pub unknown8: bool,
}

impl PspEquipment {
    pub fn from_byte(b: u8) -> Self {
        let bit = |n: u8| b & (0x80 >> n) != 0;
        Self {
            unknown1: bit(0),
            unknown2: bit(1),
            unknown3: bit(2),
            fell_sword: bit(3),
            lip_rouge: bit(4),
            unknown6: bit(5),
            unknown7: bit(6),
            unknown8: bit(7),
        }
    }

    pub fn to_byte(self) -> u8 {
        [
            self.unknown1,
            self.unknown2,
            self.unknown3,
            self.fell_sword,
            self.lip_rouge,
            self.unknown6,
            self.unknown7,
            self.unknown8,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &set)| if set { acc | (0x80 >> i) } else { acc })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Equipment {
    pub base: [u8; JOB_EQUIPMENT],
    pub psp: Option<PspEquipment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub head: [u8; JOB_HEAD],
    pub equipment: Equipment,
    pub tail: [u8; JOB_TAIL],
}

impl Job {
    fn parse(platform: Platform, raw: &[u8]) -> Self {
        let (psp, tail_at) = match platform {
            Platform::Psx => (None, JOB_HEAD + JOB_EQUIPMENT),
            Platform::Psp => (
                Some(PspEquipment::from_byte(raw[JOB_HEAD + JOB_EQUIPMENT])),
                JOB_HEAD + JOB_EQUIPMENT + 1,
            ),
        };
        Self {
            head: fixed(raw),
            equipment: Equipment {
                base: fixed(&raw[JOB_HEAD..]),
                psp,
            },
            tail: fixed(&raw[tail_at..]),
        }
    }

    /// Record bytes in `destination`'s shape; the PSP flag byte is dropped for PSX.
    fn write(&self, destination: Platform, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.head);
        out.extend_from_slice(&self.equipment.base);
        if destination == Platform::Psp {
            out.push(self.equipment.psp.unwrap_or_default().to_byte());
        }
        out.extend_from_slice(&self.tail);
    }
}

pub fn job_size(platform: Platform) -> usize {
    match platform {
        Platform::Psx => PSX_JOB_SIZE,
        Platform::Psp => PSP_JOB_SIZE,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTable {
    pub jobs: Vec<Job>,
}

impl JobTable {
    pub fn from_bytes(platform: Platform, bytes: &[u8]) -> Result<Self> {
        check_len(platform, Element::Jobs, bytes)?;
        Ok(Self {
            jobs: bytes
                .chunks_exact(job_size(platform))
                .map(|raw| Job::parse(platform, raw))
                .collect(),
        })
    }

    /// Encodes the jobs `destination` knows about.
    pub fn to_bytes(&self, destination: Platform) -> Result<Vec<u8>> {
        let count = element_len(destination, Element::Jobs)? / job_size(destination);
        if self.jobs.len() < count {
            return Err(PatcherError::Format(format!(
                "{} jobs cannot fill a {destination} table of {count}",
                self.jobs.len()
            )));
        }
        let mut out = Vec::with_capacity(count * job_size(destination));
        for job in &self.jobs[..count] {
            job.write(destination, &mut out);
        }
        Ok(out)
    }
}

/// Level requirements of one job: a nibble per prerequisite job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    /// Squire through Mime.
    pub jobs: [u8; 20],
    pub unknown1: u8,
    pub unknown2: u8,
    pub dark_knight: u8,
    pub onion_knight: u8,
}

impl Requirements {
    fn nibbles(raw: &[u8]) -> [u8; 24] {
        let mut out = [0u8; 24];
        for (i, b) in raw.iter().take(REQUIREMENTS_SIZE).enumerate() {
            out[i * 2] = b >> 4;
            out[i * 2 + 1] = b & 0x0F;
        }
        out
    }

    pub fn from_bytes(raw: &[u8]) -> Self {
        let n = Self::nibbles(raw);
        Self {
            jobs: fixed(&n),
            unknown1: n[20],
            unknown2: n[21],
            dark_knight: n[22],
            onion_knight: n[23],
        }
    }

    pub fn to_bytes(&self) -> [u8; REQUIREMENTS_SIZE] {
        let mut n = [0u8; 24];
        n[..20].copy_from_slice(&self.jobs);
        n[20] = self.unknown1;
        n[21] = self.unknown2;
        n[22] = self.dark_knight;
        n[23] = self.onion_knight;
        let mut out = [0u8; REQUIREMENTS_SIZE];
        for (i, pair) in n.chunks_exact(2).enumerate() {
            out[i] = (pair[0] & 0x0F) << 4 | (pair[1] & 0x0F);
        }
        out
    }
}

/// Requirement records that only the PSP table carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PspRequirements {
    pub dark_knight: Requirements,
    pub onion_knight: Requirements,
    pub unknown: Requirements,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLevels {
    pub named: Vec<Requirements>,
    pub psp: Option<PspRequirements>,
    pub jp: [u16; JP_ENTRIES],
}

impl JobLevels {
    pub fn from_bytes(platform: Platform, bytes: &[u8]) -> Result<Self> {
        check_len(platform, Element::JobLevels, bytes)?;
        let mut records = bytes.chunks_exact(REQUIREMENTS_SIZE);
        let named = records
            .by_ref()
            .take(NAMED_REQUIREMENTS)
            .map(Requirements::from_bytes)
            .collect();
        let psp = match platform {
            Platform::Psx => None,
            Platform::Psp => {
                let mut next = || records.next().map(Requirements::from_bytes).unwrap_or_default();
                Some(PspRequirements {
                    dark_knight: next(),
                    onion_knight: next(),
                    unknown: next(),
                })
            }
        };
        let mut jp = [0u16; JP_ENTRIES];
        LittleEndian::read_u16_into(&bytes[bytes.len() - JP_ENTRIES * 2..], &mut jp);
        Ok(Self { named, psp, jp })
    }

    pub fn to_bytes(&self, destination: Platform) -> Vec<u8> {
        let mut out = Vec::new();
        for req in &self.named {
            out.extend_from_slice(&req.to_bytes());
        }
        if destination == Platform::Psp {
            let extra = self.psp.unwrap_or_default();
            for req in [extra.dark_knight, extra.onion_knight, extra.unknown] {
                out.extend_from_slice(&req.to_bytes());
            }
        }
        let mut jp = [0u8; JP_ENTRIES * 2];
        LittleEndian::write_u16_into(&self.jp, &mut jp);
        out.extend_from_slice(&jp);
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillSets {
    pub sets: Vec<[u8; SKILL_SET_SIZE]>,
}

impl SkillSets {
    pub fn from_bytes(platform: Platform, bytes: &[u8]) -> Result<Self> {
        check_len(platform, Element::SkillSets, bytes)?;
        Ok(Self {
            sets: bytes.chunks_exact(SKILL_SET_SIZE).map(fixed).collect(),
        })
    }

    pub fn to_bytes(&self, destination: Platform) -> Result<Vec<u8>> {
        let count = element_len(destination, Element::SkillSets)? / SKILL_SET_SIZE;
        if self.sets.len() < count {
            return Err(PatcherError::Format(format!(
                "{} skill sets cannot fill a {destination} table of {count}",
                self.sets.len()
            )));
        }
        Ok(self.sets[..count].concat())
    }
}
