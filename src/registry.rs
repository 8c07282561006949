use crate::{
    error::{ModError, ModResult},
    game::GameId,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process,
};
use tracing::{debug, warn};

pub const LOCAL_SOURCE: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntry {
    pub name: String,
    pub path: PathBuf,
    pub active: bool,
    #[serde(rename = "sourceModID", default = "local_source")]
    pub source_mod_id: String,
    #[serde(rename = "sourceFileID", default = "local_source")]
    pub source_file_id: String,
    pub game: GameId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<i64>,
}

impl ModEntry {
    pub fn is_local(&self) -> bool {
        self.source_mod_id == LOCAL_SOURCE
    }

    pub fn same_source(&self, mod_id: &str) -> bool {
        !self.is_local() && self.source_mod_id == mod_id
    }
}

fn local_source() -> String {
    LOCAL_SOURCE.to_string()
}

/// Per-game mod lists stored as `<root>/<game>.json`.
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, game: GameId) -> PathBuf {
        self.root.join(format!("{}.json", game.as_str()))
    }

    pub fn load(&self, game: GameId) -> ModResult<Vec<ModEntry>> {
        let path = self.path_for(game);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(ModError::io("read registry", path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mods: Vec<ModEntry> =
            serde_json::from_str(&raw).map_err(|source| ModError::Decode {
                path: path.clone(),
                source,
            })?;
        Ok(mods)
    }

    pub fn save(&self, game: GameId, mods: &[ModEntry]) -> ModResult<()> {
        fs::create_dir_all(&self.root)
            .map_err(|err| ModError::io("create registry dir", &self.root, err))?;
        let path = self.path_for(game);
        let raw = serde_json::to_string_pretty(mods).map_err(|source| ModError::Encode {
            what: "registry",
            source,
        })?;
        write_atomic(&path, raw.as_bytes())?;
        debug!(game = %game, count = mods.len(), "saved registry");
        Ok(())
    }

    /// Takes the advisory lock guarding a load-mutate-save cycle.
    pub fn lock(&self, game: GameId) -> ModResult<RegistryLock> {
        fs::create_dir_all(&self.root)
            .map_err(|err| ModError::io("create registry dir", &self.root, err))?;
        let path = self.root.join(format!("{}.lock", game.as_str()));
        RegistryLock::acquire(path)
    }
}

pub fn position(mods: &[ModEntry], name: &str) -> ModResult<usize> {
    mods.iter()
        .position(|entry| entry.name == name)
        .ok_or_else(|| ModError::NotRegistered {
            name: name.to_string(),
        })
}

pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> ModResult<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    let mut temp_name = file_name;
    temp_name.push(".tmp");
    let temp = path.with_file_name(temp_name);
    fs::write(&temp, contents).map_err(|err| ModError::io("write temp file", &temp, err))?;
    fs::rename(&temp, path).map_err(|err| {
        let _ = fs::remove_file(&temp);
        ModError::io("finalize", path, err)
    })?;
    Ok(())
}

pub struct RegistryLock {
    path: PathBuf,
}

impl RegistryLock {
    fn acquire(path: PathBuf) -> ModResult<Self> {
        for _ in 0..2 {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let written = write!(file, "{}", process::id()).and_then(|()| file.sync_all());
                    if let Err(err) = written {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(ModError::io("write lock", path, err));
                    }
                    return Ok(Self { path });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(&path)
                        .ok()
                        .and_then(|raw| raw.trim().parse::<u32>().ok());
                    match holder {
                        Some(pid) if pid_alive(pid) => {
                            return Err(ModError::RegistryLocked { path, pid });
                        }
                        _ => {
                            warn!(path = ?path, "removing stale registry lock");
                            fs::remove_file(&path)
                                .map_err(|err| ModError::io("remove stale lock", &path, err))?;
                        }
                    }
                }
                Err(err) => return Err(ModError::io("create lock", path, err)),
            }
        }
        Err(ModError::RegistryLocked {
            path,
            pid: process::id(),
        })
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn pid_alive(pid: u32) -> bool {
    if pid == process::id() {
        return true;
    }
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str, root: &Path) -> ModEntry {
        ModEntry {
            name: name.to_string(),
            path: root.join(name),
            active: false,
            source_mod_id: LOCAL_SOURCE.to_string(),
            source_file_id: LOCAL_SOURCE.to_string(),
            game: GameId::Fallout76,
            installed_at: None,
        }
    }

    #[test]
    fn missing_registry_loads_empty() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path().join("registry"));
        assert!(registry.load(GameId::Fallout76).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_preserves_order() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path().join("registry"));
        let mods = vec![entry("Zeta", dir.path()), entry("Alpha", dir.path())];
        registry.save(GameId::Fallout76, &mods).unwrap();

        let loaded = registry.load(GameId::Fallout76).unwrap();
        assert_eq!(loaded, mods);
        let raw = fs::read_to_string(registry.path_for(GameId::Fallout76)).unwrap();
        assert!(raw.contains("\"sourceModID\": \"local\""));
        assert!(registry.load(GameId::Fallout4).unwrap().is_empty());
        assert!(!registry
            .path_for(GameId::Fallout76)
            .with_file_name("fallout76.json.tmp")
            .exists());
    }

    #[test]
    fn malformed_registry_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        fs::write(registry.path_for(GameId::Fallout76), "{ not json").unwrap();
        assert!(matches!(
            registry.load(GameId::Fallout76),
            Err(ModError::Decode { .. })
        ));
    }

    #[test]
    fn reads_entries_without_optional_fields() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let raw = r#"[{"name":"Bar","path":"/mods/Bar","active":true,
            "sourceModID":"10","sourceFileID":"1","game":"fallout76"}]"#;
        fs::write(registry.path_for(GameId::Fallout76), raw).unwrap();

        let loaded = registry.load(GameId::Fallout76).unwrap();
        assert_eq!(loaded[0].source_mod_id, "10");
        assert_eq!(loaded[0].source_file_id, "1");
        assert!(loaded[0].same_source("10"));
        assert_eq!(loaded[0].installed_at, None);
    }

    #[test]
    fn lock_is_exclusive_and_released_on_drop() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let guard = registry.lock(GameId::Fallout76).unwrap();
        assert!(matches!(
            registry.lock(GameId::Fallout76),
            Err(ModError::RegistryLocked { .. })
        ));
        drop(guard);
        assert!(registry.lock(GameId::Fallout76).is_ok());
    }

    #[test]
    fn lock_file_records_the_holder_pid() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        let _guard = registry.lock(GameId::Fallout76).unwrap();
        let raw = fs::read_to_string(dir.path().join("fallout76.lock")).unwrap();
        assert_eq!(raw.trim().parse::<u32>().unwrap(), process::id());
    }

    #[test]
    fn stale_lock_is_reclaimed() {
        let dir = tempdir().unwrap();
        let registry = Registry::new(dir.path());
        fs::write(dir.path().join("fallout76.lock"), "not-a-pid").unwrap();
        assert!(registry.lock(GameId::Fallout76).is_ok());
    }

    #[test]
    fn position_reports_unregistered_names() {
        let dir = tempdir().unwrap();
        let mods = vec![entry("Zeta", dir.path()), entry("Foo", dir.path())];
        assert_eq!(position(&mods, "Foo").unwrap(), 1);
        assert!(matches!(
            position(&mods, "Bar"),
            Err(ModError::NotRegistered { .. })
        ));
    }
}
