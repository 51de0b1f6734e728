use std::path::{Path, PathBuf};

pub const STORE_DIR: &str = ".shutter";
pub const CONFIG_FILE: &str = "config.yaml";

/// Where the CLI keeps its records and reads its config from.
pub struct Paths {
    pub store: PathBuf,
    pub config: PathBuf,
}

/// Resolve the store directory and config file.
///
/// Store priority:
/// 1. `--store` flag / `SHUTTER_STORE`
/// 2. nearest `.shutter/` walking upward from the current directory
/// 3. `./.shutter`
///
/// The config defaults to `config.yaml` inside the store directory.
pub fn resolve(store: Option<&Path>, config: Option<&Path>) -> Paths {
    let store = match store {
        Some(p) => p.to_path_buf(),
        None => discover_store(),
    };
    let config = config
        .map(Path::to_path_buf)
        .unwrap_or_else(|| store.join(CONFIG_FILE));
    Paths { store, config }
}

fn discover_store() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    cwd.ancestors()
        .map(|dir| dir.join(STORE_DIR))
        .find(|candidate| candidate.is_dir())
        .unwrap_or_else(|| cwd.join(STORE_DIR))
}
