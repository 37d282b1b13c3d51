use crate::quick_edit::{QuickEditEntry, QuickEditIndex};
use crate::source::{Location, PspFile, PsxFile};
use crate::{PatcherError, Platform, Result};
use roxmltree::Node;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

static PSX_LAYOUT: &str = include_str!("../resources/psx_layout.xml");
static PSP_LAYOUT: &str = include_str!("../resources/psp_layout.xml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Sectioned,
    Compressed,
    Partitioned,
    OneShot,
    CompressibleOneShot,
}

impl VariantKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "SectionedFile" => Some(VariantKind::Sectioned),
            "CompressedFile" => Some(VariantKind::Compressed),
            "PartitionedFile" => Some(VariantKind::Partitioned),
            "OneShotFile" => Some(VariantKind::OneShot),
            "CompressibleOneShotFile" => Some(VariantKind::CompressibleOneShot),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            VariantKind::Sectioned => "SectionedFile",
            VariantKind::Compressed => "CompressedFile",
            VariantKind::Partitioned => "PartitionedFile",
            VariantKind::OneShot => "OneShotFile",
            VariantKind::CompressibleOneShot => "CompressibleOneShotFile",
        }
    }

    pub fn has_header(self) -> bool {
        matches!(self, VariantKind::Sectioned | VariantKind::Compressed)
    }

    pub fn allows_compression(self) -> bool {
        matches!(self, VariantKind::Compressed | VariantKind::CompressibleOneShot)
    }

    fn is_single_section(self) -> bool {
        matches!(self, VariantKind::OneShot | VariantKind::CompressibleOneShot)
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocationKind {
    Sector,
    BootBin,
    FftPack,
}

impl LocationKind {
    fn platform(self) -> Platform {
        match self {
            LocationKind::Sector => Platform::Psx,
            LocationKind::BootBin | LocationKind::FftPack => Platform::Psp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalLocation {
    pub location: Location,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionLayout {
    pub entries: usize,
    pub dte: bool,
    pub compressible: bool,
    /// Fixed byte width per entry, when entries are not terminator-delimited.
    pub width: Option<usize>,
    pub name: String,
    pub entry_names: Vec<Option<String>>,
    pub disallowed: BTreeSet<usize>,
    /// Display literal of every disallowed entry; empty when none was given.
    pub statics: BTreeMap<usize, String>,
}

impl SectionLayout {
    pub fn is_disallowed(&self, index: usize) -> bool {
        self.disallowed.contains(&index)
    }

    /// Non-empty replacement literal for a static entry.
    pub fn static_text(&self, index: usize) -> Option<&str> {
        self.statics
            .get(&index)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLayout {
    pub id: Uuid,
    pub display_name: String,
    pub kind: VariantKind,
    pub size: usize,
    pub sections: Vec<SectionLayout>,
    pub locations: BTreeMap<LocationKind, Vec<PhysicalLocation>>,
    pub primary: PhysicalLocation,
}

impl FileLayout {
    pub fn section_lengths(&self) -> Vec<usize> {
        self.sections.iter().map(|s| s.entries).collect()
    }

    pub fn all_locations(&self) -> impl Iterator<Item = &PhysicalLocation> {
        self.locations.values().flatten()
    }

    /// Numbered section caption, e.g. `2: Ability names`.
    pub fn section_label(&self, section: usize) -> String {
        let name = self
            .sections
            .get(section)
            .map(|s| s.name.as_str())
            .unwrap_or_default();
        format!("{}: {}", section + 1, name)
    }

    /// Braced upper-case identity as written in text documents.
    pub fn id_string(&self) -> String {
        format!("{{{}}}", self.id.hyphenated()).to_ascii_uppercase()
    }
}

#[derive(Debug)]
pub struct LayoutManifest {
    pub platform: Platform,
    files: Vec<Arc<FileLayout>>,
    by_id: HashMap<Uuid, usize>,
    quick_edit: QuickEditIndex,
}

fn manifest_err(msg: impl Into<String>) -> PatcherError {
    PatcherError::Manifest(msg.into())
}

fn parse_num<T: TryFrom<i64>>(text: &str, what: &str) -> Result<T> {
    let t = text.trim();
    let value = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else {
        t.parse::<i64>()
    }
    .map_err(|_| manifest_err(format!("{what}: '{t}' is not a number")))?;
    T::try_from(value).map_err(|_| manifest_err(format!("{what}: {value} is out of range")))
}

fn parse_bool(text: &str, what: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(manifest_err(format!("{what}: '{other}' is not a boolean"))),
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Option<Node<'a, 'input>> {
    elements(node).find(|n| n.tag_name().name() == tag)
}

fn child_text<'a>(node: Node<'a, '_>, tag: &str, context: &str) -> Result<&'a str> {
    child(node, tag)
        .and_then(|n| n.text())
        .map(str::trim)
        .ok_or_else(|| manifest_err(format!("{context}: missing <{tag}>")))
}

fn attr<'a>(node: Node<'a, '_>, name: &str, context: &str) -> Result<&'a str> {
    node.attribute(name).ok_or_else(|| {
        manifest_err(format!(
            "{context}: <{}> is missing attribute '{name}'",
            node.tag_name().name()
        ))
    })
}

fn parse_uuid(text: &str, context: &str) -> Result<Uuid> {
    Uuid::parse_str(text.trim())
        .map_err(|e| manifest_err(format!("{context}: bad identity '{text}': {e}")))
}

type Templates = HashMap<String, BTreeMap<i64, String>>;

fn parse_templates(root: Node) -> Result<Templates> {
    let mut templates = Templates::new();
    if let Some(node) = child(root, "Templates") {
        for template in elements(node) {
            let name = template.tag_name().name().to_string();
            let mut names = BTreeMap::new();
            for entry in elements(template) {
                let index: i64 = parse_num(attr(entry, "value", &name)?, &name)?;
                names.insert(index, attr(entry, "name", &name)?.to_string());
            }
            templates.insert(name, names);
        }
    }
    Ok(templates)
}

fn parse_section(
    node: Node,
    kind: VariantKind,
    templates: &Templates,
    context: &str,
) -> Result<SectionLayout> {
    let entries: usize = parse_num(attr(node, "entries", context)?, context)?;
    let dte = parse_bool(attr(node, "dte", context)?, context)?;
    let compressible = match node.attribute("compressible") {
        Some(v) => parse_bool(v, context)?,
        None => kind == VariantKind::CompressibleOneShot,
    };
    if compressible && !kind.allows_compression() {
        return Err(manifest_err(format!(
            "{context}: compressible section in a {kind}"
        )));
    }
    let width = node
        .attribute("width")
        .map(|w| parse_num::<usize>(w, context))
        .transpose()?;
    if width == Some(0) || (width.is_some() && compressible) {
        return Err(manifest_err(format!(
            "{context}: fixed-width sections need a non-zero width and no compression"
        )));
    }
    let empty = node
        .attribute("empty")
        .map(|v| parse_bool(v, context))
        .transpose()?
        .unwrap_or(false);

    let mut entry_names = vec![None; entries];
    if !empty {
        for entry in elements(node).filter(|n| n.tag_name().name() == "entry") {
            let index: usize = parse_num(attr(entry, "value", context)?, context)?;
            let slot = entry_names.get_mut(index).ok_or_else(|| {
                manifest_err(format!("{context}: entry name {index} past {entries} entries"))
            })?;
            *slot = Some(attr(entry, "name", context)?.to_string());
        }
        for include in elements(node).filter(|n| n.tag_name().name() == "include") {
            let name = attr(include, "name", context)?;
            let template = templates
                .get(name)
                .ok_or_else(|| manifest_err(format!("{context}: unknown template '{name}'")))?;
            let start: i64 = parse_num(attr(include, "start", context)?, context)?;
            let end: i64 = parse_num(attr(include, "end", context)?, context)?;
            let offset: i64 = parse_num(attr(include, "offset", context)?, context)?;
            for j in start..=end {
                let text = template.get(&j).ok_or_else(|| {
                    manifest_err(format!("{context}: template '{name}' has no entry {j}"))
                })?;
                let target = usize::try_from(j + offset)
                    .ok()
                    .filter(|&t| t < entries)
                    .ok_or_else(|| {
                        manifest_err(format!(
                            "{context}: include of '{name}' {start}..={end} shifted by {offset} leaves the section"
                        ))
                    })?;
                entry_names[target] = Some(text.clone());
            }
        }
    }

    Ok(SectionLayout {
        entries,
        dte,
        compressible,
        width,
        name: node.attribute("name").unwrap_or_default().to_string(),
        entry_names,
        disallowed: BTreeSet::new(),
        statics: BTreeMap::new(),
    })
}

fn parse_locations(
    node: Node,
    platform: Platform,
    context: &str,
) -> Result<(BTreeMap<LocationKind, Vec<PhysicalLocation>>, PhysicalLocation)> {
    let sectors = child(node, "Sectors")
        .ok_or_else(|| manifest_err(format!("{context}: missing <Sectors>")))?;
    let mut locations: BTreeMap<LocationKind, Vec<PhysicalLocation>> = BTreeMap::new();
    let mut primary = None;

    for sector in elements(sectors) {
        let tag = sector.tag_name().name();
        let kind = match tag {
            "Sector" => LocationKind::Sector,
            "BootBin" => LocationKind::BootBin,
            "FFTPack" => LocationKind::FftPack,
            other => return Err(manifest_err(format!("{context}: unknown location <{other}>"))),
        };
        if kind.platform() != platform {
            return Err(manifest_err(format!(
                "{context}: <{tag}> is not valid in a {platform} manifest"
            )));
        }
        let offset: u64 = parse_num(attr(sector, "offset", context)?, context)?;
        let targets = match kind {
            LocationKind::Sector => {
                let name = attr(sector, "filename", context)?;
                let file = PsxFile::from_name(name)
                    .ok_or_else(|| manifest_err(format!("{context}: unknown PSX file '{name}'")))?;
                vec![Location::Psx(file)]
            }
            LocationKind::BootBin => vec![
                Location::Psp(PspFile::BootBin),
                Location::Psp(PspFile::EbootBin),
            ],
            LocationKind::FftPack => {
                vec![Location::Pack(parse_num(attr(sector, "index", context)?, context)?)]
            }
        };

        let list = locations.entry(kind).or_default();
        for location in targets {
            let physical = PhysicalLocation { location, offset };
            if primary.is_none() {
                primary = Some(physical.clone());
            }
            list.push(physical);
        }
    }

    let primary = primary.ok_or_else(|| manifest_err(format!("{context}: no locations")))?;
    Ok((locations, primary))
}

fn parse_disallowed(node: Node, sections: &mut [SectionLayout], context: &str) -> Result<()> {
    let Some(disallowed) = child(node, "DisallowedEntries") else {
        return Ok(());
    };
    for section_node in elements(disallowed) {
        let section: usize = parse_num(attr(section_node, "value", context)?, context)?;
        let count = sections.len();
        let layout = sections.get_mut(section).ok_or_else(|| {
            manifest_err(format!("{context}: disallowed section {section} of {count}"))
        })?;
        for entry in elements(section_node) {
            let index: usize = parse_num(entry.text().unwrap_or_default(), context)?;
            if index >= layout.entries {
                return Err(manifest_err(format!(
                    "{context}: disallowed entry {index} past {} entries",
                    layout.entries
                )));
            }
            layout.disallowed.insert(index);
            let literal = entry.attribute("staticValue").unwrap_or_default();
            layout.statics.insert(index, literal.to_string());
        }
    }
    Ok(())
}

fn parse_file(
    node: Node,
    platform: Platform,
    templates: &Templates,
) -> Result<FileLayout> {
    let tag = node.tag_name().name();
    let kind = VariantKind::from_tag(tag)
        .ok_or_else(|| manifest_err(format!("unknown file kind <{tag}>")))?;
    let display_name = child_text(node, "DisplayName", tag)?.to_string();
    let context = display_name.as_str();
    let id = parse_uuid(child_text(node, "Guid", context)?, context)?;
    let size: usize = parse_num(child_text(node, "Size", context)?, context)?;

    let sections_node = child(node, "Sections")
        .ok_or_else(|| manifest_err(format!("{context}: missing <Sections>")))?;
    let count: usize = parse_num(attr(sections_node, "count", context)?, context)?;
    let section_nodes: Vec<Node> = elements(sections_node)
        .filter(|n| n.tag_name().name() == "Section")
        .collect();
    if section_nodes.len() != count {
        return Err(manifest_err(format!(
            "{context}: declares {count} sections but lists {}",
            section_nodes.len()
        )));
    }
    let mut sections = Vec::with_capacity(count);
    for i in 0..count {
        let section_node = section_nodes
            .iter()
            .find(|n| n.attribute("value").and_then(|v| v.trim().parse::<usize>().ok()) == Some(i))
            .ok_or_else(|| manifest_err(format!("{context}: section {i} is missing")))?;
        let section_context = format!("{context} section {i}");
        sections.push(parse_section(*section_node, kind, templates, &section_context)?);
    }

    if count == 0 {
        return Err(manifest_err(format!("{context}: a file needs at least one section")));
    }
    if kind.is_single_section() && count != 1 {
        return Err(manifest_err(format!(
            "{context}: a {kind} has exactly one section, found {count}"
        )));
    }
    if kind == VariantKind::Partitioned && size % count != 0 {
        return Err(manifest_err(format!(
            "{context}: size {size} does not split into {count} partitions"
        )));
    }
    if kind.has_header() && count * 4 > size {
        return Err(manifest_err(format!(
            "{context}: {count} section offsets do not fit in {size} bytes"
        )));
    }

    parse_disallowed(node, &mut sections, context)?;
    let (locations, primary) = parse_locations(node, platform, context)?;

    Ok(FileLayout {
        id,
        display_name,
        kind,
        size,
        sections,
        locations,
        primary,
    })
}

fn parse_quick_edit(root: Node, files: &HashMap<Uuid, Arc<FileLayout>>) -> Result<QuickEditIndex> {
    let mut index = QuickEditIndex::default();
    let Some(quick_edit) = child(root, "QuickEdit") else {
        return Ok(index);
    };

    for field in elements(quick_edit) {
        let name = field.tag_name().name().to_string();
        let mut main_length = None;
        let mut group = Vec::new();

        for occurrence in elements(field) {
            let main = match occurrence.tag_name().name() {
                "MainFile" => true,
                "File" => false,
                other => {
                    return Err(manifest_err(format!("{name}: unexpected <{other}>")));
                }
            };
            let file = parse_uuid(child_text(occurrence, "Guid", &name)?, &name)?;
            let section: usize = parse_num(child_text(occurrence, "Section", &name)?, &name)?;
            let offset: usize = parse_num(child_text(occurrence, "Offset", &name)?, &name)?;
            let length = if main {
                let length: usize = parse_num(child_text(occurrence, "Length", &name)?, &name)?;
                if main_length.replace(length).is_some() {
                    return Err(manifest_err(format!("{name}: more than one <MainFile>")));
                }
                Some(length)
            } else {
                None
            };
            group.push(QuickEditEntry {
                file,
                section,
                offset,
                length,
                main,
            });
        }

        let length = main_length.ok_or_else(|| manifest_err(format!("{name}: no <MainFile>")))?;
        for entry in &group {
            let layout = files
                .get(&entry.file)
                .ok_or_else(|| manifest_err(format!("{name}: unknown file {}", entry.file)))?;
            let section = layout.sections.get(entry.section).ok_or_else(|| {
                manifest_err(format!(
                    "{name}: {} has no section {}",
                    layout.display_name, entry.section
                ))
            })?;
            let range = entry.offset..entry.offset + length;
            if range.end > section.entries {
                return Err(manifest_err(format!(
                    "{name}: entries {range:?} leave section {} of {}",
                    entry.section, layout.display_name
                )));
            }
            if range.clone().any(|i| section.is_disallowed(i)) {
                return Err(manifest_err(format!(
                    "{name}: entries {range:?} of {} cover disallowed entries",
                    layout.display_name
                )));
            }
        }
        index.insert(name, group);
    }
    Ok(index)
}

impl LayoutManifest {
    pub fn parse(platform: Platform, xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| manifest_err(format!("layout document: {e}")))?;
        let root = doc.root_element();
        let templates = parse_templates(root)?;

        let mut files = Vec::new();
        let mut by_id = HashMap::new();
        if let Some(files_node) = child(root, "Files") {
            for node in elements(files_node) {
                let layout = parse_file(node, platform, &templates)?;
                if by_id.insert(layout.id, files.len()).is_some() {
                    return Err(manifest_err(format!(
                        "{}: identity {} is used twice",
                        layout.display_name, layout.id
                    )));
                }
                files.push(Arc::new(layout));
            }
        }

        let lookup: HashMap<Uuid, Arc<FileLayout>> =
            files.iter().map(|f| (f.id, Arc::clone(f))).collect();
        let quick_edit = parse_quick_edit(root, &lookup)?;

        log::debug!(
            "{platform} manifest: {} files, {} quick-edit fields",
            files.len(),
            quick_edit.len()
        );
        Ok(Self {
            platform,
            files,
            by_id,
            quick_edit,
        })
    }

    pub fn builtin(platform: Platform) -> Result<Self> {
        match platform {
            Platform::Psx => Self::parse(platform, PSX_LAYOUT),
            Platform::Psp => Self::parse(platform, PSP_LAYOUT),
        }
    }

    pub fn files(&self) -> &[Arc<FileLayout>] {
        &self.files
    }

    pub fn file(&self, id: &Uuid) -> Option<&Arc<FileLayout>> {
        self.by_id.get(id).map(|&i| &self.files[i])
    }

    pub fn quick_edit(&self) -> &QuickEditIndex {
        &self.quick_edit
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r#"
<Layout>
  <Templates>
    <JobNames>
      <entry value="0" name="Squire"/>
      <entry value="1" name="Chemist"/>
      <entry value="2" name="Knight"/>
    </JobNames>
  </Templates>
  <Files>
    <SectionedFile>
      <DisplayName>WORLD.BIN</DisplayName>
      <Guid>{11111111-2222-3333-4444-555555555555}</Guid>
      <Size>64</Size>
      <Sections count="2">
        <Section value="0" entries="3" dte="false" name="Jobs">
          <include name="JobNames" start="0" end="2" offset="0"/>
        </Section>
        <Section value="1" entries="2" dte="true" empty="true"/>
      </Sections>
      <Sectors>
        <Sector filename="WORLD_WORLD_BIN" offset="0"/>
        <Sector filename="WORLD_WORLD_BIN" offset="0x100"/>
      </Sectors>
      <DisallowedEntries>
        <Section value="1"><entry staticValue="Locked">1</entry></Section>
      </DisallowedEntries>
    </SectionedFile>
    <PartitionedFile>
      <DisplayName>WLDMES.BIN</DisplayName>
      <Guid>aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</Guid>
      <Size>32</Size>
      <Sections count="2">
        <Section value="0" entries="2" dte="false"><entry value="1" name="Second"/></Section>
        <Section value="1" entries="2" dte="false"/>
      </Sections>
      <Sectors><Sector filename="WORLD_WLDMES_BIN" offset="0"/></Sectors>
      <DisallowedEntries>
        <Section value="0"><entry>0</entry></Section>
      </DisallowedEntries>
    </PartitionedFile>
  </Files>
  <QuickEdit>
    <JobNames>
      <MainFile><Guid>{11111111-2222-3333-4444-555555555555}</Guid><Section>0</Section><Offset>0</Offset><Length>2</Length></MainFile>
      <File><Guid>aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee</Guid><Section>1</Section><Offset>0</Offset></File>
    </JobNames>
  </QuickEdit>
</Layout>"#;

    #[test]
    fn parses_sample_manifest() {
        let manifest = LayoutManifest::parse(Platform::Psx, SAMPLE).unwrap();
        assert_eq!(manifest.files().len(), 2);

        let world = &manifest.files()[0];
        assert_eq!(world.kind, VariantKind::Sectioned);
        assert_eq!(world.section_lengths(), vec![3, 2]);
        assert_eq!(world.sections[0].entry_names[2].as_deref(), Some("Knight"));
        assert_eq!(world.sections[1].entry_names, vec![None, None]);
        assert_eq!(world.sections[1].static_text(1), Some("Locked"));
        assert_eq!(world.section_label(0), "1: Jobs");
        assert_eq!(world.all_locations().count(), 2);
        assert_eq!(world.primary.offset, 0);
        assert_eq!(world.id_string(), "{11111111-2222-3333-4444-555555555555}");

        let mes = &manifest.files()[1];
        assert!(mes.sections[0].is_disallowed(0));
        assert_eq!(mes.sections[0].static_text(0), None);
        assert_eq!(mes.sections[0].statics.get(&0).map(String::as_str), Some(""));

        assert_eq!(manifest.quick_edit().lookup("JobNames").unwrap().len(), 2);
    }

    #[test]
    fn include_outside_the_template_is_rejected() {
        let bad = SAMPLE.replace(r#"end="2" offset="0""#, r#"end="3" offset="0""#);
        assert!(matches!(
            LayoutManifest::parse(Platform::Psx, &bad),
            Err(PatcherError::Manifest(_))
        ));
        let shifted = SAMPLE.replace(r#"end="2" offset="0""#, r#"end="2" offset="1""#);
        assert!(LayoutManifest::parse(Platform::Psx, &shifted).is_err());
    }

    #[test]
    fn inconsistent_counts_and_attributes_are_rejected() {
        let count = SAMPLE.replacen(r#"<Sections count="2">"#, r#"<Sections count="3">"#, 1);
        assert!(LayoutManifest::parse(Platform::Psx, &count).is_err());

        let no_dte = SAMPLE.replacen(r#"entries="3" dte="false""#, r#"entries="3""#, 1);
        assert!(LayoutManifest::parse(Platform::Psx, &no_dte).is_err());

        let uneven = SAMPLE.replace("<Size>32</Size>", "<Size>33</Size>");
        assert!(LayoutManifest::parse(Platform::Psx, &uneven).is_err());
    }

    #[test]
    fn location_kinds_follow_the_platform() {
        assert!(LayoutManifest::parse(Platform::Psp, SAMPLE).is_err());
    }

    #[test]
    fn quick_edit_must_avoid_disallowed_entries() {
        let bad = SAMPLE.replace(
            "<Section>1</Section><Offset>0</Offset></File>",
            "<Section>0</Section><Offset>0</Offset></File>",
        );
        assert!(LayoutManifest::parse(Platform::Psx, &bad).is_err());
    }

    #[test]
    fn builtin_manifests_parse() {
        for platform in Platform::ALL {
            let manifest = LayoutManifest::builtin(platform).unwrap();
            assert!(!manifest.files().is_empty());
            assert!(!manifest.quick_edit().is_empty());
        }
    }
}
