use crate::{PatcherError, Result};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One occurrence of a quick-edit field inside a file section.
///
/// `offset` is the first entry index of the occurrence. Only the main occurrence
/// carries a `length`; mirrors span the same number of entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuickEditEntry {
    pub file: Uuid,
    pub section: usize,
    pub offset: usize,
    pub length: Option<usize>,
    pub main: bool,
}

/// Semantic field name to every occurrence of that field.
#[derive(Debug, Clone, Default)]
pub struct QuickEditIndex {
    groups: BTreeMap<String, Vec<QuickEditEntry>>,
}

impl QuickEditIndex {
    /// Registers a group. Callers guarantee it holds exactly one main entry.
    pub(crate) fn insert(&mut self, name: String, mut entries: Vec<QuickEditEntry>) {
        // Main first, mirrors in manifest order.
        entries.sort_by_key(|e| !e.main);
        self.groups.insert(name, entries);
    }

    pub fn lookup(&self, name: &str) -> Result<&[QuickEditEntry]> {
        self.groups
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| PatcherError::UnknownField(name.to_string()))
    }

    /// The main occurrence and its length.
    pub fn main(&self, name: &str) -> Result<(&QuickEditEntry, usize)> {
        let entries = self.lookup(name)?;
        entries
            .iter()
            .find_map(|e| e.length.filter(|_| e.main).map(|len| (e, len)))
            .ok_or_else(|| PatcherError::UnknownField(name.to_string()))
    }

    pub fn mirrors<'a>(&'a self, name: &str) -> Result<impl Iterator<Item = &'a QuickEditEntry>> {
        Ok(self.lookup(name)?.iter().filter(|e| !e.main))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(main: bool, offset: usize) -> QuickEditEntry {
        QuickEditEntry {
            file: Uuid::nil(),
            section: 0,
            offset,
            length: main.then_some(4),
            main,
        }
    }

    #[test]
    fn lookup_orders_main_first() {
        let mut index = QuickEditIndex::default();
        index.insert("ItemNames".to_string(), vec![entry(false, 8), entry(true, 0)]);

        let found = index.lookup("ItemNames").unwrap();
        assert!(found[0].main);
        let (main, len) = index.main("ItemNames").unwrap();
        assert_eq!((main.offset, len), (0, 4));
        assert_eq!(index.mirrors("ItemNames").unwrap().count(), 1);
    }

    #[test]
    fn unknown_names_fail() {
        let index = QuickEditIndex::default();
        assert!(matches!(
            index.lookup("JobNames"),
            Err(PatcherError::UnknownField(name)) if name == "JobNames"
        ));
    }
}
