use std::path::{Path, PathBuf};

use directories::ProjectDirs;

/// Directory name, relative to the working tree, where captured sessions go
pub const REPLAY_DIR: &str = ".replay";

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn replay_dir(base: &Path) -> PathBuf {
        base.join(REPLAY_DIR)
    }

    /// `<base>/.replay/<id>.json`
    pub fn session_path(base: &Path, id: &str) -> PathBuf {
        Self::replay_dir(base).join(format!("{id}.json"))
    }

    /// Where `FileConfigStore::new` reads from, when the platform has one
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "retype").map(|dirs| dirs.config_dir().join("config.json"))
    }
}
