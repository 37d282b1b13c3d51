use crate::charmap::CharMap;
use crate::compression::{compress, decompress_entries};
use crate::layout::{FileLayout, SectionLayout, VariantKind};
use crate::source::AddressableSource;
use crate::{PatcherError, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantState {
    Decoded,
    Dirty,
    Encoded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Editable,
    /// Always shows the literal; bytes are carried through untouched.
    Static(String),
    /// Read-only; bytes are carried through untouched.
    Disallowed,
}

#[derive(Debug, Clone)]
struct Entry {
    /// Terminator-free bytes, or the whole slot for fixed-width sections.
    raw: Vec<u8>,
    text: String,
    kind: EntryKind,
}

#[derive(Debug, Clone)]
struct Section {
    entries: Vec<Entry>,
    /// Bytes of the region as read: content followed by padding.
    region: Vec<u8>,
    content_len: usize,
    edited: bool,
    /// Built from text without captured bytes, so there is no length to preserve.
    fresh: bool,
}

#[derive(Debug, Clone)]
pub struct RawFile {
    layout: Arc<FileLayout>,
    bytes: Vec<u8>,
}

impl RawFile {
    pub fn new(layout: Arc<FileLayout>, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != layout.size {
            return Err(PatcherError::Format(format!(
                "{} is {} bytes, expected {}",
                layout.display_name,
                bytes.len(),
                layout.size
            )));
        }
        Ok(Self { layout, bytes })
    }

    pub fn read<S: AddressableSource + ?Sized>(source: &mut S, layout: Arc<FileLayout>) -> Result<Self> {
        let primary = &layout.primary;
        let bytes = source.read(&primary.location, primary.offset, layout.size)?;
        Self::new(layout, bytes)
    }

    pub fn layout(&self) -> &Arc<FileLayout> {
        &self.layout
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn decode(self, charmap: Arc<dyn CharMap>) -> Result<FileVariant> {
        let regions = section_regions(&self.layout, &self.bytes)?;
        let lead = match regions.first() {
            Some(first) if self.layout.kind.has_header() => {
                self.bytes[self.layout.sections.len() * 4..first.start].to_vec()
            }
            _ => Vec::new(),
        };
        let mut sections = Vec::with_capacity(regions.len());
        for (index, (section, range)) in self.layout.sections.iter().zip(regions).enumerate() {
            let region = &self.bytes[range];
            sections.push(decode_section(&self.layout, index, section, region, charmap.as_ref())?);
        }
        log::trace!("decoded {} ({} sections)", self.layout.display_name, sections.len());
        Ok(FileVariant {
            layout: self.layout,
            charmap,
            sections,
            lead,
            bytes: self.bytes,
            state: VariantState::Decoded,
        })
    }
}

fn section_regions(layout: &FileLayout, bytes: &[u8]) -> Result<Vec<Range<usize>>> {
    let count = layout.sections.len();
    let size = bytes.len();
    if layout.kind.has_header() {
        let header = count * 4;
        if header > size {
            return Err(PatcherError::Format(format!(
                "{} is too small to contain its section header",
                layout.display_name
            )));
        }
        let starts: Vec<usize> = bytes[..header]
            .chunks_exact(4)
            .map(|c| header + LittleEndian::read_u32(c) as usize)
            .collect();
        let mut regions = Vec::with_capacity(count);
        for (i, &start) in starts.iter().enumerate() {
            let end = starts.get(i + 1).copied().unwrap_or(size);
            if start > end || end > size {
                return Err(PatcherError::Format(format!(
                    "{}: section {i} starts at {start:#X}, past {end:#X}",
                    layout.display_name
                )));
            }
            regions.push(start..end);
        }
        Ok(regions)
    } else if layout.kind.allows_compression() || count == 1 {
        Ok(vec![0..size])
    } else {
        let part = size / count;
        Ok((0..count).map(|i| i * part..(i + 1) * part).collect())
    }
}

fn entry_kind(section: &SectionLayout, index: usize) -> EntryKind {
    if !section.is_disallowed(index) {
        EntryKind::Editable
    } else if let Some(literal) = section.static_text(index) {
        EntryKind::Static(literal.to_string())
    } else {
        EntryKind::Disallowed
    }
}

fn until_terminator(raw: &[u8], terminator: u8) -> &[u8] {
    let end = raw.iter().position(|&b| b == terminator).unwrap_or(raw.len());
    &raw[..end]
}

fn make_entry(section: &SectionLayout, index: usize, raw: Vec<u8>, charmap: &dyn CharMap) -> Entry {
    let kind = entry_kind(section, index);
    let text = match &kind {
        EntryKind::Static(literal) => literal.clone(),
        _ => charmap.decode(until_terminator(&raw, charmap.terminator())),
    };
    Entry { raw, text, kind }
}

fn split_entries(
    section: &SectionLayout,
    literal: &[u8],
    charmap: &dyn CharMap,
) -> (Vec<Entry>, usize) {
    let terminator = charmap.terminator();
    let mut entries = Vec::with_capacity(section.entries);
    let mut pos = 0usize;
    for index in 0..section.entries {
        let raw = match literal[pos..].iter().position(|&b| b == terminator) {
            Some(len) => {
                let raw = literal[pos..pos + len].to_vec();
                pos += len + 1;
                raw
            }
            None => Vec::new(),
        };
        entries.push(make_entry(section, index, raw, charmap));
    }
    (entries, pos)
}

fn decode_section(
    layout: &FileLayout,
    index: usize,
    section: &SectionLayout,
    region: &[u8],
    charmap: &dyn CharMap,
) -> Result<Section> {
    let (entries, content_len) = if section.compressible {
        let (literal, consumed) =
            decompress_entries(region, section.entries, charmap.terminator())?;
        let (entries, _) = split_entries(section, &literal, charmap);
        (entries, consumed)
    } else if let Some(width) = section.width {
        let content_len = width * section.entries;
        if content_len > region.len() {
            return Err(PatcherError::Format(format!(
                "{}: section {index} holds {} bytes, {} entries of {width} need {content_len}",
                layout.display_name,
                region.len(),
                section.entries
            )));
        }
        let entries = region[..content_len]
            .chunks_exact(width)
            .enumerate()
            .map(|(i, slot)| make_entry(section, i, slot.to_vec(), charmap))
            .collect();
        (entries, content_len)
    } else {
        split_entries(section, region, charmap)
    };

    Ok(Section {
        entries,
        region: region.to_vec(),
        content_len,
        edited: false,
        fresh: false,
    })
}

pub struct FileVariant {
    layout: Arc<FileLayout>,
    charmap: Arc<dyn CharMap>,
    sections: Vec<Section>,
    /// Bytes between the offset header and the first section.
    lead: Vec<u8>,
    bytes: Vec<u8>,
    state: VariantState,
}

impl fmt::Debug for FileVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileVariant")
            .field("file", &self.layout.display_name)
            .field("sections", &self.sections.len())
            .field("state", &self.state)
            .finish()
    }
}

impl FileVariant {
    /// Builds a variant from decoded text alone. Static entries take their
    /// manifest literal whatever text was supplied.
    pub fn from_text(
        layout: Arc<FileLayout>,
        charmap: Arc<dyn CharMap>,
        texts: &[Vec<String>],
    ) -> Result<Self> {
        check_shape(&layout, texts)?;
        let mut sections = Vec::with_capacity(texts.len());
        for (index, (section, section_texts)) in layout.sections.iter().zip(texts).enumerate() {
            let mut entries = Vec::with_capacity(section.entries);
            for (i, text) in section_texts.iter().enumerate() {
                let kind = entry_kind(section, i);
                let text = match &kind {
                    EntryKind::Static(literal) => literal.as_str(),
                    _ => text.as_str(),
                };
                let content = encode_text(charmap.as_ref(), section, text)?;
                let raw = slot_bytes(&layout, index, section, &content, charmap.terminator())?;
                entries.push(Entry {
                    raw,
                    text: text.to_string(),
                    kind,
                });
            }
            sections.push(Section {
                entries,
                region: Vec::new(),
                content_len: 0,
                edited: true,
                fresh: true,
            });
        }

        let mut variant = Self {
            lead: Vec::new(),
            bytes: Vec::new(),
            layout,
            charmap,
            sections,
            state: VariantState::Dirty,
        };
        variant.encode()?;
        // Nothing on any medium holds these bytes yet.
        variant.state = VariantState::Dirty;
        Ok(variant)
    }

    pub fn layout(&self) -> &Arc<FileLayout> {
        &self.layout
    }

    pub fn state(&self) -> VariantState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == VariantState::Dirty
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn entry(&self, section: usize, index: usize) -> Result<&Entry> {
        self.sections
            .get(section)
            .and_then(|s| s.entries.get(index))
            .ok_or_else(|| self.missing_entry(section, index))
    }

    fn missing_entry(&self, section: usize, index: usize) -> PatcherError {
        let limit = self.sections.get(section).map_or(0, |s| s.entries.len());
        PatcherError::OutOfRange {
            what: format!("{} section {section}", self.layout.display_name),
            offset: index as u64,
            size: 1,
            limit: limit as u64,
        }
    }

    pub fn text(&self, section: usize, index: usize) -> Result<&str> {
        Ok(&self.entry(section, index)?.text)
    }

    pub fn kind(&self, section: usize, index: usize) -> Result<&EntryKind> {
        Ok(&self.entry(section, index)?.kind)
    }

    pub fn entries(&self) -> Vec<Vec<String>> {
        self.sections
            .iter()
            .map(|s| s.entries.iter().map(|e| e.text.clone()).collect())
            .collect()
    }

    /// Encoded bytes of an entry without terminator or slot padding.
    pub fn entry_bytes(&self, section: usize, index: usize) -> Result<Vec<u8>> {
        let entry = self.entry(section, index)?;
        Ok(until_terminator(&entry.raw, self.charmap.terminator()).to_vec())
    }

    pub fn set_entry(&mut self, section: usize, index: usize, text: &str) -> Result<()> {
        let layout = self
            .layout
            .sections
            .get(section)
            .ok_or_else(|| self.missing_entry(section, index))?;
        let content = encode_text(self.charmap.as_ref(), layout, text)?;
        self.set_raw_entry(section, index, &content)
    }

    /// Replaces an editable entry's encoded bytes (terminator excluded).
    pub fn set_raw_entry(&mut self, section: usize, index: usize, content: &[u8]) -> Result<()> {
        let raw = self.stored_form(section, index, content)?;
        let text = self.charmap.decode(content);

        let target = &mut self.sections[section];
        let entry = &mut target.entries[index];
        if entry.raw != raw {
            entry.raw = raw;
            entry.text = text;
            target.edited = true;
            self.state = VariantState::Dirty;
        }
        Ok(())
    }

    /// Fails exactly when `set_raw_entry` would, without changing anything.
    pub fn check_raw_entry(&self, section: usize, index: usize, content: &[u8]) -> Result<()> {
        self.stored_form(section, index, content).map(|_| ())
    }

    fn stored_form(&self, section: usize, index: usize, content: &[u8]) -> Result<Vec<u8>> {
        if *self.kind(section, index)? != EntryKind::Editable {
            return Err(PatcherError::ReadOnlyEntry { section, index });
        }
        let terminator = self.charmap.terminator();
        if content.contains(&terminator) {
            return Err(PatcherError::Codec(format!(
                "entry {index} of section {section} contains the terminator byte"
            )));
        }
        let layout = &self.layout.sections[section];
        slot_bytes(&self.layout, section, layout, content, terminator)
    }

    /// Applies decoded text to every editable entry that differs; returns how
    /// many entries changed. Static and disallowed entries are left alone.
    pub fn apply_text(&mut self, texts: &[Vec<String>]) -> Result<usize> {
        check_shape(&self.layout, texts)?;
        let mut changed = 0;
        for (section, section_texts) in texts.iter().enumerate() {
            for (index, text) in section_texts.iter().enumerate() {
                let entry = &self.sections[section].entries[index];
                if entry.kind == EntryKind::Editable && entry.text != *text {
                    self.set_entry(section, index, text)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Serializes the current entries without changing state.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.sections.iter().all(|s| !s.edited) {
            return Ok(self.bytes.clone());
        }

        let terminator = self.charmap.terminator();
        // (region bytes, trailing padding length)
        let mut regions = Vec::with_capacity(self.sections.len());
        for (index, (section, layout)) in self.sections.iter().zip(&self.layout.sections).enumerate() {
            let padding = &section.region[section.content_len.min(section.region.len())..];
            if !section.edited {
                regions.push((section.region.clone(), padding.len()));
                continue;
            }

            let mut literal = Vec::new();
            for entry in &section.entries {
                literal.extend_from_slice(&entry.raw);
                if layout.width.is_none() {
                    literal.push(terminator);
                }
            }
            let content = if layout.compressible {
                compress(&literal)?
            } else {
                literal
            };
            if !layout.compressible && !section.fresh && content.len() != section.content_len {
                return Err(PatcherError::Overflow {
                    file: self.layout.display_name.clone(),
                    section: index,
                    expected: section.content_len,
                    actual: content.len(),
                });
            }
            let mut region = content;
            region.extend_from_slice(padding);
            regions.push((region, padding.len()));
        }

        self.assemble(regions)
    }

    fn assemble(&self, mut regions: Vec<(Vec<u8>, usize)>) -> Result<Vec<u8>> {
        let size = self.layout.size;
        let mut out = Vec::with_capacity(size);

        if self.layout.kind == VariantKind::Partitioned {
            let part = size / regions.len().max(1);
            for (index, (region, padding)) in regions.iter_mut().enumerate() {
                if region.len() > part {
                    return Err(PatcherError::Overflow {
                        file: self.layout.display_name.clone(),
                        section: index,
                        expected: part,
                        actual: region.len(),
                    });
                }
                *padding += part - region.len();
                region.resize(part, 0);
            }
        }

        if self.layout.kind.has_header() {
            let mut offset = self.lead.len() as u32;
            let mut header = vec![0u8; regions.len() * 4];
            for (slot, (region, _)) in header.chunks_exact_mut(4).zip(&regions) {
                LittleEndian::write_u32(slot, offset);
                offset += region.len() as u32;
            }
            out.extend_from_slice(&header);
            out.extend_from_slice(&self.lead);
        }

        let last_padding = regions.last().map_or(0, |(_, padding)| *padding);
        for (region, _) in &regions {
            out.extend_from_slice(region);
        }

        if out.len() > size {
            let excess = out.len() - size;
            if excess > last_padding {
                return Err(PatcherError::FileOverflow {
                    file: self.layout.display_name.clone(),
                    limit: size,
                    actual: out.len() - last_padding,
                });
            }
            out.truncate(size);
        } else {
            out.resize(size, 0);
        }
        Ok(out)
    }

    /// The file as it reads back after encoding, leaving `self` untouched.
    pub(crate) fn reencoded(&self) -> Result<FileVariant> {
        let bytes = self.to_bytes()?;
        let mut fresh =
            RawFile::new(Arc::clone(&self.layout), bytes)?.decode(Arc::clone(&self.charmap))?;
        fresh.state = VariantState::Encoded;
        Ok(fresh)
    }

    pub fn encode(&mut self) -> Result<Vec<u8>> {
        *self = self.reencoded()?;
        Ok(self.bytes.clone())
    }

    pub(crate) fn write_locations<S: AddressableSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<()> {
        let mut written = 0;
        for physical in self.layout.all_locations() {
            source.write(&physical.location, physical.offset, &self.bytes)?;
            written += 1;
        }
        log::debug!("wrote {} to {written} locations", self.layout.display_name);
        Ok(())
    }

    /// Encodes and writes the file. Edits stay pending if either step fails.
    pub fn write_to<S: AddressableSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        let fresh = self.reencoded()?;
        fresh.write_locations(source)?;
        *self = fresh;
        Ok(())
    }
}

fn check_shape(layout: &FileLayout, texts: &[Vec<String>]) -> Result<()> {
    if texts.len() != layout.sections.len() {
        return Err(PatcherError::Format(format!(
            "{}: {} sections supplied, layout has {}",
            layout.display_name,
            texts.len(),
            layout.sections.len()
        )));
    }
    for (i, (section, supplied)) in layout.sections.iter().zip(texts).enumerate() {
        if supplied.len() != section.entries {
            return Err(PatcherError::Format(format!(
                "{}: section {i} has {} entries supplied, layout has {}",
                layout.display_name,
                supplied.len(),
                section.entries
            )));
        }
    }
    Ok(())
}

fn encode_text(charmap: &dyn CharMap, section: &SectionLayout, text: &str) -> Result<Vec<u8>> {
    charmap.encode(text, section.dte)
}

/// Formats entry content for storage: as-is for delimited sections, terminated
/// and zero-padded for fixed-width slots.
fn slot_bytes(
    layout: &FileLayout,
    index: usize,
    section: &SectionLayout,
    content: &[u8],
    terminator: u8,
) -> Result<Vec<u8>> {
    match section.width {
        None => Ok(content.to_vec()),
        Some(width) => {
            if content.len() + 1 > width {
                return Err(PatcherError::Overflow {
                    file: layout.display_name.clone(),
                    section: index,
                    expected: width,
                    actual: content.len() + 1,
                });
            }
            let mut slot = content.to_vec();
            slot.push(terminator);
            slot.resize(width, 0);
            Ok(slot)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charmap::TableCharMap;
    use crate::layout::LayoutManifest;
    use crate::source::{Location, MemorySource, PsxFile};
    use crate::Platform;

    const TERM: u8 = 0xFE;

    fn manifest(kind: &str, sections: &str, size: usize, disallowed: &str) -> Arc<FileLayout> {
        let xml = format!(
            r#"<Layout><Files><{kind}>
                <DisplayName>TEST.BIN</DisplayName>
                <Guid>01234567-89ab-cdef-0123-456789abcdef</Guid>
                <Size>{size}</Size>
                {sections}
                <Sectors><Sector filename="WORLD_WORLD_BIN" offset="0"/></Sectors>
                <DisallowedEntries>{disallowed}</DisallowedEntries>
            </{kind}></Files></Layout>"#
        );
        let manifest = LayoutManifest::parse(Platform::Psx, &xml).unwrap();
        Arc::clone(&manifest.files()[0])
    }

    fn charmap() -> Arc<dyn CharMap> {
        Arc::new(TableCharMap::builtin(Platform::Psx))
    }

    fn encode(text: &str) -> Vec<u8> {
        TableCharMap::builtin(Platform::Psx).encode(text, false).unwrap()
    }

    /// Sectioned file: section 0 holds three names, section 1 two lines.
    fn sectioned() -> (Arc<FileLayout>, Vec<u8>) {
        let layout = manifest(
            "SectionedFile",
            r#"<Sections count="2">
                 <Section value="0" entries="3" dte="false"/>
                 <Section value="1" entries="2" dte="false"/>
               </Sections>"#,
            64,
            r#"<Section value="1"><entry staticValue="Locked">0</entry><entry>1</entry></Section>"#,
        );
        let mut s0 = Vec::new();
        for name in ["Ramza", "Delita", "Alma"] {
            s0.extend(encode(name));
            s0.push(TERM);
        }
        let mut s1 = Vec::new();
        for line in ["Hidden", "Raw"] {
            s1.extend(encode(line));
            s1.push(TERM);
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(s0.len() as u32).to_le_bytes());
        bytes.extend(s0);
        bytes.extend(s1);
        bytes.resize(64, 0);
        (layout, bytes)
    }

    #[test]
    fn unedited_files_round_trip_byte_for_byte() {
        let (layout, bytes) = sectioned();
        let mut variant = RawFile::new(layout, bytes.clone()).unwrap().decode(charmap()).unwrap();
        assert_eq!(variant.state(), VariantState::Decoded);
        assert_eq!(variant.text(0, 1).unwrap(), "Delita");
        assert_eq!(variant.encode().unwrap(), bytes);
        assert_eq!(variant.state(), VariantState::Encoded);
    }

    #[test]
    fn same_length_edits_encode_and_decode_back() {
        let (layout, bytes) = sectioned();
        let mut variant = RawFile::new(layout, bytes).unwrap().decode(charmap()).unwrap();
        variant.set_entry(0, 0, "Zalbg").unwrap();
        assert!(variant.is_dirty());

        let out = variant.encode().unwrap();
        let again = RawFile::new(Arc::clone(variant.layout()), out)
            .unwrap()
            .decode(charmap())
            .unwrap();
        assert_eq!(again.text(0, 0).unwrap(), "Zalbg");
        assert_eq!(again.text(0, 2).unwrap(), "Alma");
    }

    #[test]
    fn fixed_sections_refuse_length_changes() {
        let (layout, bytes) = sectioned();
        let mut variant = RawFile::new(layout, bytes).unwrap().decode(charmap()).unwrap();
        variant.set_entry(0, 2, "Almaa").unwrap();
        assert!(matches!(
            variant.to_bytes(),
            Err(PatcherError::Overflow { section: 0, expected: 18, actual: 19, .. })
        ));
    }

    #[test]
    fn static_and_disallowed_entries_are_read_only() {
        let (layout, mut bytes) = sectioned();
        // Scribble over the static entry's bytes; the literal still wins.
        let s1 = 8 + 18;
        bytes[s1] = encode("Q")[0];
        let mut variant = RawFile::new(layout, bytes.clone()).unwrap().decode(charmap()).unwrap();

        assert_eq!(variant.text(1, 0).unwrap(), "Locked");
        assert_eq!(variant.kind(1, 0).unwrap(), &EntryKind::Static("Locked".to_string()));
        assert_eq!(variant.text(1, 1).unwrap(), "Raw");
        assert_eq!(variant.kind(1, 1).unwrap(), &EntryKind::Disallowed);

        assert!(matches!(
            variant.set_entry(1, 0, "x"),
            Err(PatcherError::ReadOnlyEntry { section: 1, index: 0 })
        ));
        assert!(variant.set_entry(1, 1, "x").is_err());

        variant.set_entry(0, 0, "Zalbg").unwrap();
        let out = variant.encode().unwrap();
        assert_eq!(&out[s1..], &bytes[s1..]);
    }

    fn compressed_layout(size: usize) -> Arc<FileLayout> {
        manifest(
            "CompressedFile",
            r#"<Sections count="2">
                 <Section value="0" entries="4" dte="true" compressible="true"/>
                 <Section value="1" entries="1" dte="false" compressible="false"/>
               </Sections>"#,
            size,
            "",
        )
    }

    fn compressed_bytes(size: usize) -> Vec<u8> {
        let mut literal = Vec::new();
        for _ in 0..4 {
            literal.extend(encode("Knight"));
            literal.push(TERM);
        }
        let s0 = compress(&literal).unwrap();
        let mut s1 = encode("End");
        s1.push(TERM);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&(s0.len() as u32).to_le_bytes());
        bytes.extend(s0);
        bytes.extend(s1);
        bytes.resize(size, 0);
        bytes
    }

    #[test]
    fn compressible_sections_may_grow() {
        let layout = compressed_layout(96);
        let variant = RawFile::new(Arc::clone(&layout), compressed_bytes(96))
            .unwrap()
            .decode(charmap())
            .unwrap();
        assert_eq!(variant.text(0, 3).unwrap(), "Knight");

        let mut variant = variant;
        variant.set_entry(0, 1, "Holy Knight of the realm").unwrap();
        let out = variant.encode().unwrap();
        assert_eq!(out.len(), 96);

        let again = RawFile::new(layout, out).unwrap().decode(charmap()).unwrap();
        assert_eq!(again.text(0, 1).unwrap(), "Holy Knight of the realm");
        assert_eq!(again.text(1, 0).unwrap(), "End");
    }

    #[test]
    fn growth_past_the_file_size_overflows() {
        let layout = compressed_layout(40);
        let mut variant = RawFile::new(layout, compressed_bytes(40))
            .unwrap()
            .decode(charmap())
            .unwrap();
        variant
            .set_entry(0, 0, "Zodiac braves gather in the church at Orbonne")
            .unwrap();
        assert!(matches!(variant.to_bytes(), Err(PatcherError::FileOverflow { limit: 40, .. })));
    }

    #[test]
    fn fixed_width_slots_are_padded() {
        let layout = manifest(
            "PartitionedFile",
            r#"<Sections count="2">
                 <Section value="0" entries="2" dte="false" width="8"/>
                 <Section value="1" entries="2" dte="false" width="8"/>
               </Sections>"#,
            32,
            "",
        );
        // "Mustadio" plus its terminator does not fit an 8-byte slot.
        let too_long = FileVariant::from_text(
            Arc::clone(&layout),
            charmap(),
            &[
                vec!["Mustadio".into(), "Agrias".into()],
                vec!["Alma".into(), "Rad".into()],
            ],
        );
        assert!(matches!(too_long, Err(PatcherError::Overflow { expected: 8, actual: 9, .. })));

        let mut variant = FileVariant::from_text(
            layout,
            charmap(),
            &[vec!["Agrias".into(), "Ovelia".into()], vec!["Alma".into(), "Rad".into()]],
        )
        .unwrap();
        assert!(variant.is_dirty());
        let bytes = variant.to_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(bytes[6], TERM);
        assert_eq!(bytes[7], 0);

        variant.set_entry(1, 1, "Rafa").unwrap();
        let out = variant.encode().unwrap();
        assert_eq!(variant.text(1, 1).unwrap(), "Rafa");
        assert_eq!(&out[..16], &bytes[..16]);
    }

    #[test]
    fn failed_writes_keep_edits_pending() {
        let (layout, bytes) = sectioned();
        let mut variant = RawFile::new(layout, bytes).unwrap().decode(charmap()).unwrap();
        variant.set_entry(0, 0, "Zalbg").unwrap();

        let mut source = MemorySource::new();
        assert!(variant.write_to(&mut source).is_err());
        assert!(variant.is_dirty());

        let world = Location::Psx(PsxFile::WorldWorldBin);
        source.insert(world.clone(), vec![0; 64]);
        variant.write_to(&mut source).unwrap();
        assert_eq!(variant.state(), VariantState::Encoded);
        let stored = source.get(&world).unwrap().to_vec();
        let again = RawFile::new(Arc::clone(variant.layout()), stored)
            .unwrap()
            .decode(charmap())
            .unwrap();
        assert_eq!(again.text(0, 0).unwrap(), "Zalbg");
    }

    #[test]
    fn apply_text_skips_read_only_entries() {
        let (layout, bytes) = sectioned();
        let mut variant = RawFile::new(layout, bytes).unwrap().decode(charmap()).unwrap();
        let mut texts = variant.entries();
        texts[0][1] = "Dyceda".to_string();
        texts[1][0] = "Ignored".to_string();

        assert_eq!(variant.apply_text(&texts).unwrap(), 1);
        assert_eq!(variant.text(0, 1).unwrap(), "Dyceda");
        assert_eq!(variant.text(1, 0).unwrap(), "Locked");
        assert!(variant.apply_text(&texts[..1]).is_err());
    }

    #[test]
    fn missing_entries_decode_as_empty() {
        let layout = manifest(
            "OneShotFile",
            r#"<Sections count="1"><Section value="0" entries="3" dte="false"/></Sections>"#,
            8,
            "",
        );
        let mut bytes = encode("Gaff");
        bytes.push(TERM);
        bytes.extend(encode("Ed"));
        bytes.resize(8, 0x01);
        let variant = RawFile::new(layout, bytes.clone()).unwrap().decode(charmap()).unwrap();
        assert_eq!(variant.text(0, 0).unwrap(), "Gaff");
        assert_eq!(variant.text(0, 1).unwrap(), "");
        assert_eq!(variant.text(0, 2).unwrap(), "");
        assert_eq!(variant.to_bytes().unwrap(), bytes);
    }
}
