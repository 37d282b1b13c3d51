use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

pub mod charmap;
pub mod compression;
mod defaults;
pub mod layout;
pub mod patch;
mod platform;
pub mod quick_edit;
pub mod settings;
pub mod source;
pub mod text;
pub mod variant;

pub use charmap::{CharMap, TableCharMap};
pub use defaults::default_bytes;
pub use layout::{FileLayout, LayoutManifest, LocationKind, PhysicalLocation, VariantKind};
pub use patch::{convert_archive_to_psp, PatchContainer, FORMAT_VERSION};
pub use platform::{Element, Platform};
pub use quick_edit::{QuickEditEntry, QuickEditIndex};
pub use settings::PatcherSettings;
pub use source::{
    AddressableSource, DiscImage, Location, MemorySource, PspFile, PspImage, PsxFile, PsxImage,
    SectorMode,
};
pub use text::TextSet;
pub use variant::{EntryKind, FileVariant, RawFile, VariantState};

#[derive(Debug, Error)]
pub enum PatcherError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("format error: {0}")]
    Format(String),
    #[error("{what}: offset {offset:#X} + size {size:#X} runs past {limit:#X}")]
    OutOfRange {
        what: String,
        offset: u64,
        size: u64,
        limit: u64,
    },
    #[error("manifest error: {0}")]
    Manifest(String),
    #[error("section {section} of {file} encodes to {actual} bytes, expected {expected}")]
    Overflow {
        file: String,
        section: usize,
        expected: usize,
        actual: usize,
    },
    #[error("{file} encodes to {actual} bytes, which exceeds its size of {limit}")]
    FileOverflow {
        file: String,
        limit: usize,
        actual: usize,
    },
    #[error("unknown quick-edit field '{0}'")]
    UnknownField(String),
    #[error("could not load patch data")]
    LoadFailure(#[source] Box<PatcherError>),
    #[error("entry {index} of section {section} cannot be edited")]
    ReadOnlyEntry { section: usize, index: usize },
    #[error("text codec error: {0}")]
    Codec(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<zip::result::ZipError> for PatcherError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => PatcherError::Io(io),
            other => PatcherError::Format(format!("archive: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, PatcherError>;

/// Result of a long-running load that honours cancellation.
///
/// A cancelled load never hands back partially assembled state.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

/// Cooperative cancellation check polled between files and decode steps.
pub trait Cancellation {
    fn is_cancelled(&self) -> bool;
}

/// Shareable flag a worker can poll while another thread requests cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

impl Cancellation for CancelFlag {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl<F: Fn() -> bool> Cancellation for F {
    fn is_cancelled(&self) -> bool {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NeverCancel;

impl Cancellation for NeverCancel {
    fn is_cancelled(&self) -> bool {
        false
    }
}
