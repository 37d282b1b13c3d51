use crate::charmap::{CharMap, TableCharMap, DEFAULT_TERMINATOR};
use crate::layout::LayoutManifest;
use crate::{PatcherError, Platform, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// User settings, stored as JSON. Relative paths are taken from the directory
/// holding the settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatcherSettings {
    pub default_platform: Option<Platform>,
    /// `HEX=text` character table replacing the built-in one.
    pub charmap_table: Option<PathBuf>,
    pub charmap_terminator: Option<u8>,
    pub psx_layout: Option<PathBuf>,
    pub psp_layout: Option<PathBuf>,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl PatcherSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut settings: PatcherSettings = serde_json::from_str(&data)
            .map_err(|e| PatcherError::Config(format!("{}: {e}", path.display())))?;
        settings.base_dir = path.parent().map(Path::to_path_buf);
        Ok(settings)
    }

    /// Defaults when `path` does not exist; a file that exists must parse.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("no settings at {}, using defaults", path.display());
            return Ok(Self {
                base_dir: path.parent().map(Path::to_path_buf),
                ..Self::default()
            });
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| PatcherError::Config(e.to_string()))?;
        fs::write(path, data)?;
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_config_file(&self, path: &Path) -> Result<String> {
        let full = self.resolve(path);
        fs::read_to_string(&full)
            .map_err(|e| PatcherError::Config(format!("{}: {e}", full.display())))
    }

    /// The explicit platform, else the configured default.
    pub fn platform_or_default(&self, explicit: Option<Platform>) -> Option<Platform> {
        explicit.or(self.default_platform)
    }

    pub fn charmap(&self, platform: Platform) -> Result<Arc<dyn CharMap>> {
        match &self.charmap_table {
            Some(path) => {
                let table = self.read_config_file(path)?;
                let terminator = self.charmap_terminator.unwrap_or(DEFAULT_TERMINATOR);
                Ok(Arc::new(TableCharMap::parse_table(&table, terminator)?))
            }
            None => Ok(Arc::new(TableCharMap::builtin(platform))),
        }
    }

    pub fn layout(&self, platform: Platform) -> Result<Arc<LayoutManifest>> {
        let custom = match platform {
            Platform::Psx => &self.psx_layout,
            Platform::Psp => &self.psp_layout,
        };
        let manifest = match custom {
            Some(path) => LayoutManifest::parse(platform, &self.read_config_file(path)?)?,
            None => LayoutManifest::builtin(platform)?,
        };
        Ok(Arc::new(manifest))
    }
}
