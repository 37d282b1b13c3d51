//! PSX to PSP conversion of patch data.
//!
//! Only a fixed list of fields is touched: the PSP-only equipment flags of each
//! job, the PSP-only nibbles of each requirement record, the records and table
//! tails the PSP release appends, and the PSP-only elements.

use super::archive::{self, RawPatch};
use super::records::{JobLevels, JobTable, PspRequirements};
use crate::{default_bytes, Element, PatcherError, Platform, Result};
use std::collections::BTreeMap;
use std::io::Cursor;

fn psp_default(element: Element) -> Result<&'static [u8]> {
    default_bytes(Platform::Psp, element)
}

/// Appends the PSP default bytes past the end of `psx`.
fn extend_from_default(element: Element, psx: &[u8]) -> Result<Vec<u8>> {
    let target = psp_default(element)?;
    if psx.len() > target.len() {
        return Err(PatcherError::Format(format!(
            "{element} is longer than its PSP counterpart"
        )));
    }
    let mut out = psx.to_vec();
    out.extend_from_slice(&target[psx.len()..]);
    Ok(out)
}

fn convert_jobs(psx: &[u8]) -> Result<Vec<u8>> {
    let mut jobs = JobTable::from_bytes(Platform::Psx, psx)?;
    let defaults = JobTable::from_bytes(Platform::Psp, psp_default(Element::Jobs)?)?;
    for (job, default) in jobs.jobs.iter_mut().zip(&defaults.jobs) {
        job.equipment.psp = default.equipment.psp;
    }
    let shared = jobs.jobs.len();
    jobs.jobs.extend(defaults.jobs.into_iter().skip(shared));
    jobs.to_bytes(Platform::Psp)
}

fn convert_job_levels(psx: &[u8]) -> Result<Vec<u8>> {
    let mut levels = JobLevels::from_bytes(Platform::Psx, psx)?;
    let defaults = JobLevels::from_bytes(Platform::Psp, psp_default(Element::JobLevels)?)?;
    for (req, default) in levels.named.iter_mut().zip(&defaults.named) {
        req.unknown1 = default.unknown1;
        req.unknown2 = default.unknown2;
        req.dark_knight = default.dark_knight;
        req.onion_knight = default.onion_knight;
    }
    levels.psp = Some(defaults.psp.unwrap_or_else(PspRequirements::default));
    Ok(levels.to_bytes(Platform::Psp))
}

/// New bytes for every element the conversion changes, given a lookup of the
/// PSX bytes.
pub(crate) fn converted_elements<'a, F>(psx: F) -> Result<Vec<(Element, Vec<u8>)>>
where
    F: Fn(Element) -> Result<&'a [u8]>,
{
    Ok(vec![
        (
            Element::ActionMenus,
            extend_from_default(Element::ActionMenus, psx(Element::ActionMenus)?)?,
        ),
        (Element::Jobs, convert_jobs(psx(Element::Jobs)?)?),
        (Element::JobLevels, convert_job_levels(psx(Element::JobLevels)?)?),
        (
            Element::SkillSets,
            extend_from_default(Element::SkillSets, psx(Element::SkillSets)?)?,
        ),
        (Element::Entd5, psp_default(Element::Entd5)?.to_vec()),
        (Element::PspItems, psp_default(Element::PspItems)?.to_vec()),
        (
            Element::PspItemAttributes,
            psp_default(Element::PspItemAttributes)?.to_vec(),
        ),
    ])
}

/// Converts a PSX patch file into a PSP one without loading it into a container.
///
/// Entries the conversion does not name, known or not, are carried over as-is.
pub fn convert_archive_to_psp(raw: &[u8]) -> Result<Vec<u8>> {
    let RawPatch {
        platform,
        version,
        mut entries,
    } = archive::read_patch(raw)?;
    if platform != Platform::Psx {
        return Err(PatcherError::Unsupported(format!(
            "only {} patches can be converted, this one is {platform}",
            Platform::Psx
        )));
    }

    let updates = {
        let lookup = |element: Element| match entries.get(element.name()) {
            Some(bytes) => Ok(bytes.as_slice()),
            None => default_bytes(Platform::Psx, element),
        };
        converted_elements(lookup).map_err(|e| PatcherError::LoadFailure(Box::new(e)))?
    };
    for (element, bytes) in updates {
        entries.insert(element.name().to_string(), bytes);
    }

    let ordered = order_entries(entries);
    let out = archive::write_archive(Cursor::new(Vec::new()), &version, Platform::Psp, &ordered)?;
    log::info!("converted {} archive to {}", Platform::Psx, Platform::Psp);
    Ok(out.into_inner())
}

/// Known elements in archive order, then anything else by name.
fn order_entries(mut entries: BTreeMap<String, Vec<u8>>) -> Vec<(String, Vec<u8>)> {
    let mut ordered = Vec::with_capacity(entries.len());
    for element in Element::ALL {
        if let Some(bytes) = entries.remove(element.name()) {
            ordered.push((element.name().to_string(), bytes));
        }
    }
    ordered.extend(entries);
    ordered
}
