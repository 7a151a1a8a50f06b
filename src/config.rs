//! Runtime configuration for [`ShadowMapArray`](crate::gfx::rendering::ShadowMapArray)
//!
//! Debug behaviour is opt-in. Set `UMBRA_DEBUG` to a comma separated list of
//! categories (`dump`, `textures`, `all`) and optionally `UMBRA_DUMP_DIR` to
//! redirect depth dumps away from the system temp directory.

use std::path::{Path, PathBuf};

bitflags::bitflags! {
    /// Debug categories that can be switched on at runtime
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugFlags: u32 {
        /// Read back and write every captured depth buffer to disk
        const DUMP_TEXTURES = 1 << 0;
        /// Log every shadow texture allocation
        const TEXTURES = 1 << 1;
    }
}

impl DebugFlags {
    /// Parses a comma separated category list, ignoring unknown names
    pub fn parse(list: &str) -> Self {
        let mut flags = DebugFlags::empty();
        for name in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "dump" | "dump_textures" => flags |= DebugFlags::DUMP_TEXTURES,
                "textures" => flags |= DebugFlags::TEXTURES,
                "all" => flags = DebugFlags::all(),
                other => log::warn!("Unknown shadow debug category '{}'", other),
            }
        }
        flags
    }
}

/// Configuration for a shadow map array
#[derive(Debug, Clone, PartialEq)]
pub struct ShadowArrayConfig {
    pub debug: DebugFlags,
    /// Directory that receives `ShadowMapArray.index_<slot>.tif` dumps
    pub dump_dir: PathBuf,
}

impl Default for ShadowArrayConfig {
    fn default() -> Self {
        Self {
            debug: DebugFlags::empty(),
            dump_dir: std::env::temp_dir(),
        }
    }
}

impl ShadowArrayConfig {
    pub const DEBUG_ENV: &'static str = "UMBRA_DEBUG";
    pub const DUMP_DIR_ENV: &'static str = "UMBRA_DUMP_DIR";

    /// Builds a config from the process environment, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var(Self::DEBUG_ENV).ok().as_deref(),
            std::env::var_os(Self::DUMP_DIR_ENV).map(PathBuf::from),
        )
    }

    fn from_vars(debug: Option<&str>, dump_dir: Option<PathBuf>) -> Self {
        let mut config = Self::default();
        if let Some(list) = debug {
            config.debug = DebugFlags::parse(list);
        }
        if let Some(dir) = dump_dir {
            config.dump_dir = dir;
        }
        config
    }

    pub fn with_debug(mut self, flags: DebugFlags) -> Self {
        self.debug = flags;
        self
    }

    pub fn with_dump_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dump_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn dump_textures(&self) -> bool {
        self.debug.contains(DebugFlags::DUMP_TEXTURES)
    }

    pub fn trace_textures(&self) -> bool {
        self.debug.contains(DebugFlags::TEXTURES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_categories() {
        assert_eq!(DebugFlags::parse(""), DebugFlags::empty());
        assert_eq!(DebugFlags::parse("dump"), DebugFlags::DUMP_TEXTURES);
        assert_eq!(
            DebugFlags::parse(" Dump , textures "),
            DebugFlags::DUMP_TEXTURES | DebugFlags::TEXTURES
        );
        assert_eq!(DebugFlags::parse("all"), DebugFlags::all());
        assert_eq!(DebugFlags::parse("bogus,textures"), DebugFlags::TEXTURES);
    }

    #[test]
    fn test_from_vars() {
        let config = ShadowArrayConfig::from_vars(Some("dump"), Some(PathBuf::from("/var/shadows")));
        assert!(config.dump_textures());
        assert!(!config.trace_textures());
        assert_eq!(config.dump_dir, PathBuf::from("/var/shadows"));

        let config = ShadowArrayConfig::from_vars(None, None);
        assert_eq!(config, ShadowArrayConfig::default());
    }

    #[test]
    fn test_builder() {
        let config = ShadowArrayConfig::default()
            .with_debug(DebugFlags::TEXTURES)
            .with_dump_dir("/somewhere");
        assert!(config.trace_textures());
        assert_eq!(config.dump_dir, PathBuf::from("/somewhere"));
    }
}
