use crate::charmap::CharMap;
use crate::layout::LayoutManifest;
use crate::source::AddressableSource;
use crate::variant::{FileVariant, RawFile};
use crate::{Cancellation, Outcome, PatcherError, Platform, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use roxmltree::Node;
use std::io::Write;
use std::sync::Arc;
use uuid::Uuid;

const DOCUMENT_ROOT: &str = "TextDocument";

#[derive(Debug)]
pub struct TextSet {
    platform: Platform,
    manifest: Arc<LayoutManifest>,
    charmap: Arc<dyn CharMap>,
    files: Vec<FileVariant>,
}

struct DocumentFile {
    id: Uuid,
    sections: Vec<Vec<String>>,
}

fn xml_err<E: std::fmt::Display>(err: E) -> PatcherError {
    PatcherError::Format(format!("text document: {err}"))
}

fn named<'a, 'input>(
    node: Node<'a, 'input>,
    tag: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == tag)
}

fn parse_document(xml: &str) -> Result<(Platform, Vec<DocumentFile>)> {
    let doc = roxmltree::Document::parse(xml).map_err(xml_err)?;
    let root = doc.root_element();
    if root.tag_name().name() != DOCUMENT_ROOT {
        return Err(xml_err(format!(
            "root element is <{}>, expected <{DOCUMENT_ROOT}>",
            root.tag_name().name()
        )));
    }
    let context = root
        .attribute("context")
        .ok_or_else(|| xml_err("missing context attribute"))?;
    let platform = Platform::from_tag(context)
        .ok_or_else(|| xml_err(format!("unknown context '{context}'")))?;

    let mut files = Vec::new();
    for file in named(root, "File") {
        let guid = named(file, "Guid")
            .next()
            .and_then(|n| n.text())
            .ok_or_else(|| xml_err("<File> without <Guid>"))?;
        let id = Uuid::parse_str(guid.trim()).map_err(xml_err)?;
        let mut sections = Vec::new();
        if let Some(sections_node) = named(file, "Sections").next() {
            for section in named(sections_node, "Section") {
                sections.push(
                    named(section, "Entry")
                        .map(|e| e.text().unwrap_or_default().to_string())
                        .collect(),
                );
            }
        }
        files.push(DocumentFile { id, sections });
    }
    Ok((platform, files))
}

impl TextSet {
    /// Cancellation is checked before each file and after each read and decode;
    /// a cancelled load hands back nothing.
    pub fn load<S, C>(
        source: &mut S,
        manifest: Arc<LayoutManifest>,
        charmap: Arc<dyn CharMap>,
        cancel: &C,
    ) -> Result<Outcome<TextSet>>
    where
        S: AddressableSource + ?Sized,
        C: Cancellation + ?Sized,
    {
        let mut files = Vec::with_capacity(manifest.files().len());
        for layout in manifest.files() {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let raw = RawFile::read(source, Arc::clone(layout))?;
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let variant = raw.decode(Arc::clone(&charmap))?;
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            files.push(variant);
        }
        log::info!("loaded {} {} text files", files.len(), manifest.platform);

        Ok(Outcome::Completed(TextSet {
            platform: manifest.platform,
            manifest,
            charmap,
            files,
        }))
    }

    pub fn from_export<C: Cancellation + ?Sized>(
        xml: &str,
        manifest: Arc<LayoutManifest>,
        charmap: Arc<dyn CharMap>,
        cancel: &C,
    ) -> Result<Outcome<TextSet>> {
        let (platform, documented) = parse_document(xml)?;
        if platform != manifest.platform {
            return Err(PatcherError::Format(format!(
                "document is for {platform}, layout is for {}",
                manifest.platform
            )));
        }

        let mut files = Vec::with_capacity(documented.len());
        for file in documented {
            if cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let layout = manifest.file(&file.id).ok_or_else(|| {
                PatcherError::Format(format!("document file {} is not in the layout", file.id))
            })?;
            files.push(FileVariant::from_text(
                Arc::clone(layout),
                Arc::clone(&charmap),
                &file.sections,
            )?);
        }
        if cancel.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        Ok(Outcome::Completed(TextSet {
            platform,
            manifest,
            charmap,
            files,
        }))
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn manifest(&self) -> &Arc<LayoutManifest> {
        &self.manifest
    }

    pub fn charmap(&self) -> &Arc<dyn CharMap> {
        &self.charmap
    }

    pub fn files(&self) -> &[FileVariant] {
        &self.files
    }

    pub fn file(&self, id: &Uuid) -> Option<&FileVariant> {
        self.files.iter().find(|f| f.layout().id == *id)
    }

    pub fn file_mut(&mut self, id: &Uuid) -> Option<&mut FileVariant> {
        self.files.iter_mut().find(|f| f.layout().id == *id)
    }

    fn loaded(&self, id: &Uuid) -> Result<&FileVariant> {
        self.file(id)
            .ok_or_else(|| PatcherError::Format(format!("file {id} is not loaded")))
    }

    fn loaded_mut(&mut self, id: &Uuid) -> Result<&mut FileVariant> {
        self.file_mut(id)
            .ok_or_else(|| PatcherError::Format(format!("file {id} is not loaded")))
    }

    /// Writes every file with pending edits to all of its locations.
    ///
    /// All files are encoded before the first write, so an encoding failure
    /// leaves the medium untouched. Edits stay pending until every write lands.
    pub fn save<S: AddressableSource + ?Sized>(&mut self, source: &mut S) -> Result<usize> {
        let mut encoded = Vec::new();
        for (i, file) in self.files.iter().enumerate().filter(|(_, f)| f.is_dirty()) {
            encoded.push((i, file.reencoded()?));
        }
        for (_, file) in &encoded {
            file.write_locations(source)?;
        }
        let written = encoded.len();
        for (i, file) in encoded {
            self.files[i] = file;
        }
        log::info!("saved {written} modified text files");
        Ok(written)
    }

    pub fn export<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = Writer::new_with_indent(out, b' ', 3);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        let mut root = BytesStart::new(DOCUMENT_ROOT);
        root.push_attribute(("context", self.platform.tag()));
        writer.write_event(Event::Start(root)).map_err(xml_err)?;

        for file in &self.files {
            writer
                .write_event(Event::Start(BytesStart::new("File")))
                .map_err(xml_err)?;
            write_text_element(&mut writer, "Guid", &file.layout().id_string())?;
            writer
                .write_event(Event::Start(BytesStart::new("Sections")))
                .map_err(xml_err)?;
            for section in file.entries() {
                writer
                    .write_event(Event::Start(BytesStart::new("Section")))
                    .map_err(xml_err)?;
                for entry in &section {
                    write_text_element(&mut writer, "Entry", entry)?;
                }
                writer
                    .write_event(Event::End(BytesEnd::new("Section")))
                    .map_err(xml_err)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("Sections")))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("File")))
                .map_err(xml_err)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new(DOCUMENT_ROOT)))
            .map_err(xml_err)?;
        Ok(())
    }

    pub fn export_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.export(&mut buf)?;
        String::from_utf8(buf).map_err(xml_err)
    }

    /// Applies an exported document onto the loaded files. Only editable
    /// entries change; returns how many did.
    pub fn apply_export(&mut self, xml: &str) -> Result<usize> {
        let (platform, documented) = parse_document(xml)?;
        if platform != self.platform {
            return Err(PatcherError::Format(format!(
                "document is for {platform}, text set is for {}",
                self.platform
            )));
        }
        let mut changed = 0;
        for file in documented {
            changed += self.loaded_mut(&file.id)?.apply_text(&file.sections)?;
        }
        log::info!("applied {changed} changed entries");
        Ok(changed)
    }

    pub fn quick_edit_len(&self, name: &str) -> Result<usize> {
        Ok(self.manifest.quick_edit().main(name)?.1)
    }

    pub fn quick_edit_get(&self, name: &str, index: usize) -> Result<&str> {
        let (main, length) = self.manifest.quick_edit().main(name)?;
        check_quick_index(name, index, length)?;
        self.loaded(&main.file)?.text(main.section, main.offset + index)
    }

    /// Sets entry `index` of a quick-edit field: the main occurrence is encoded
    /// and its bytes are copied verbatim into every mirror. Nothing changes
    /// unless every occurrence accepts the bytes.
    pub fn quick_edit_set(&mut self, name: &str, index: usize, text: &str) -> Result<()> {
        let manifest = Arc::clone(&self.manifest);
        let (main, length) = manifest.quick_edit().main(name)?;
        check_quick_index(name, index, length)?;
        let occurrences = manifest.quick_edit().lookup(name)?;

        let dte = self
            .loaded(&main.file)?
            .layout()
            .sections
            .get(main.section)
            .map_or(false, |s| s.dte);
        let bytes = self.charmap.encode(text, dte)?;
        for entry in occurrences {
            self.loaded(&entry.file)?
                .check_raw_entry(entry.section, entry.offset + index, &bytes)?;
        }
        for entry in occurrences {
            self.loaded_mut(&entry.file)?
                .set_raw_entry(entry.section, entry.offset + index, &bytes)?;
        }
        Ok(())
    }
}

fn check_quick_index(name: &str, index: usize, length: usize) -> Result<()> {
    if index < length {
        Ok(())
    } else {
        Err(PatcherError::OutOfRange {
            what: format!("quick-edit field {name}"),
            offset: index as u64,
            size: 1,
            limit: length as u64,
        })
    }
}

fn write_text_element<W: Write>(writer: &mut Writer<W>, tag: &str, text: &str) -> Result<()> {
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(xml_err)?;
    Ok(())
}
