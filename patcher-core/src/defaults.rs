use crate::{Element, PatcherError, Platform, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io::{Cursor, Read};

static DEFAULTS_ZIP: &[u8] = include_bytes!("../resources/defaults.zip");

type DefaultTables = HashMap<(Platform, Element), Vec<u8>>;

static DEFAULTS: Lazy<std::result::Result<DefaultTables, String>> =
    Lazy::new(|| load_tables(DEFAULTS_ZIP).map_err(|e| e.to_string()));

fn platform_dir(platform: Platform) -> &'static str {
    match platform {
        Platform::Psx => "psx",
        Platform::Psp => "psp",
    }
}

fn load_tables(raw: &[u8]) -> Result<DefaultTables> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw))?;
    let mut tables = HashMap::new();

    for platform in Platform::ALL {
        for element in platform.elements() {
            let name = format!("{}/{}.bin", platform_dir(platform), element.name());
            let mut file = archive.by_name(&name).map_err(|_| {
                PatcherError::Format(format!("default table {name} is missing"))
            })?;
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            tables.insert((platform, element), buf);
        }
    }

    log::debug!("loaded {} default tables", tables.len());
    Ok(tables)
}

/// Compiled-in default bytes for `element` on `platform`.
///
/// Platform-exclusive elements requested for the other platform are an error.
pub fn default_bytes(platform: Platform, element: Element) -> Result<&'static [u8]> {
    let tables = DEFAULTS
        .as_ref()
        .map_err(|e| PatcherError::Format(format!("default tables unavailable: {e}")))?;
    tables
        .get(&(platform, element))
        .map(Vec::as_slice)
        .ok_or_else(|| {
            PatcherError::Unsupported(format!("{element} does not exist on {platform}"))
        })
}

/// Expected byte length of `element` on `platform`, taken from the defaults.
pub(crate) fn element_len(platform: Platform, element: Element) -> Result<usize> {
    default_bytes(platform, element).map(<[u8]>::len)
}
