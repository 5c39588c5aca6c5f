//! Resource config file naming
//!
//! Every resource has exactly one config file, `<dir>/<name>.res`.

use std::path::{Path, PathBuf};

/// Directory the engine reads resource configs from
pub const DEFAULT_CONFIG_DIR: &str = "/etc/drbd.d";

/// Extension of resource config files
pub const CONFIG_EXTENSION: &str = "res";

const TEMP_SUFFIX: &str = "tmp";

/// Config path of a resource in the default directory
pub fn resolve_config_path(resource_name: &str) -> PathBuf {
    config_path_in(Path::new(DEFAULT_CONFIG_DIR), resource_name)
}

/// Resource name encoded in a config file path
///
/// Returns `None` for anything that is not a resource config file.
pub fn parse_resource_name(path: impl AsRef<Path>) -> Option<String> {
    let file_name = path.as_ref().file_name()?.to_str()?;
    let name = file_name.strip_suffix(CONFIG_EXTENSION)?.strip_suffix('.')?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

fn config_path_in(dir: &Path, resource_name: &str) -> PathBuf {
    dir.join(format!("{}.{}", resource_name, CONFIG_EXTENSION))
}

/// Layout of a resource config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    dir: PathBuf,
}

impl Default for ConfigLayout {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

impl ConfigLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Config path of a resource
    pub fn resolve(&self, resource_name: &str) -> PathBuf {
        config_path_in(&self.dir, resource_name)
    }

    /// Scratch file used while atomically replacing a resource config
    pub fn temp_path(&self, resource_name: &str) -> PathBuf {
        self.dir.join(format!(
            ".{}.{}.{}",
            resource_name, CONFIG_EXTENSION, TEMP_SUFFIX
        ))
    }

    /// Names of all resources with a config file in the directory
    pub async fn list_resources(&self) -> std::io::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = parse_resource_name(entry.path()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
