//! On-disk patch formats: the zip archive of named entries and the older
//! single XML document with base64 payloads.

use crate::{PatcherError, Platform, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, Write};
use zip::write::FileOptions;
use zip::CompressionMethod;

pub(crate) const VERSION_ENTRY: &str = "version";
pub(crate) const TYPE_ENTRY: &str = "type";
const LEGACY_ROOT: &str = "patch";

/// Entries of a patch as read from disk, before defaults are applied.
#[derive(Debug, Clone)]
pub(crate) struct RawPatch {
    pub platform: Platform,
    pub version: String,
    pub entries: BTreeMap<String, Vec<u8>>,
}

fn parse_platform(tag: &str) -> Result<Platform> {
    Platform::from_tag(tag)
        .ok_or_else(|| PatcherError::Format(format!("unknown patch type '{}'", tag.trim())))
}

/// Parses the legacy document. `None` when `raw` is not an XML document at all.
pub(crate) fn read_legacy(raw: &[u8]) -> Option<Result<RawPatch>> {
    let text = std::str::from_utf8(raw).ok()?;
    let doc = roxmltree::Document::parse(text).ok()?;
    Some(legacy_entries(&doc))
}

fn legacy_entries(doc: &roxmltree::Document) -> Result<RawPatch> {
    let root = doc.root_element();
    if root.tag_name().name() != LEGACY_ROOT {
        return Err(PatcherError::Format(format!(
            "XML patch root is <{}>, expected <{LEGACY_ROOT}>",
            root.tag_name().name()
        )));
    }
    let platform = parse_platform(
        root.attribute(TYPE_ENTRY)
            .ok_or_else(|| PatcherError::Format("XML patch has no type attribute".to_string()))?,
    )?;

    let mut entries = BTreeMap::new();
    for node in root.children().filter(|n| n.is_element()) {
        let name = node.tag_name().name();
        let text: String = node
            .text()
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        match STANDARD.decode(text.as_bytes()) {
            Ok(bytes) => {
                entries.insert(name.to_string(), bytes);
            }
            Err(e) => log::warn!("XML patch element {name} is not valid base64 ({e}); using the default"),
        }
    }

    Ok(RawPatch {
        platform,
        version: "legacy".to_string(),
        entries,
    })
}

fn read_text_entry<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, name: &str) -> Result<String> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| PatcherError::Format(format!("patch archive has no '{name}' entry")))?;
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(text.trim().to_string())
}

/// Reads every entry of a zip patch. `version` and `type` are mandatory.
pub(crate) fn read_archive(raw: &[u8]) -> Result<RawPatch> {
    let mut archive = zip::ZipArchive::new(Cursor::new(raw))?;
    let version = read_text_entry(&mut archive, VERSION_ENTRY)?;
    let platform = parse_platform(&read_text_entry(&mut archive, TYPE_ENTRY)?)?;

    let mut entries = BTreeMap::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();
        if name == VERSION_ENTRY || name == TYPE_ENTRY || file.is_dir() {
            continue;
        }
        let mut buf = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut buf)?;
        entries.insert(name, buf);
    }
    Ok(RawPatch {
        platform,
        version,
        entries,
    })
}

/// Detects the format structurally: an XML document first, then a zip archive.
pub(crate) fn read_patch(raw: &[u8]) -> Result<RawPatch> {
    if let Some(legacy) = read_legacy(raw) {
        log::debug!("patch is a legacy XML document");
        return legacy;
    }
    read_archive(raw)
}

/// Writes `version`, `type` and then `entries` in order.
pub(crate) fn write_archive<W: Write + Seek>(
    writer: W,
    version: &str,
    platform: Platform,
    entries: &[(String, Vec<u8>)],
) -> Result<W> {
    let mut zip = zip::ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(VERSION_ENTRY, options)?;
    zip.write_all(version.as_bytes())?;
    zip.start_file(TYPE_ENTRY, options)?;
    zip.write_all(platform.tag().as_bytes())?;
    for (name, bytes) in entries {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?)
}
