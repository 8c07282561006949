use crate::{
    archive_list,
    error::{ModError, ModResult},
    game::GameId,
    locator::GamePaths,
    registry::{self, ModEntry, Registry, LOCAL_SOURCE},
    vfs::{self, SyncReport},
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Where a new mod's payload comes from.
#[derive(Debug, Clone)]
pub enum InstallSource {
    /// A single archive copied into a fresh mod directory.
    File { path: PathBuf, name: Option<String> },
    /// A directory copied into the store; the original is left alone.
    Directory { path: PathBuf, name: Option<String> },
    /// An extracted download, moved into the store.
    Staged {
        dir: PathBuf,
        name: String,
        mod_id: String,
        file_id: String,
    },
}

impl InstallSource {
    fn origin(&self) -> (String, String) {
        match self {
            InstallSource::Staged {
                mod_id, file_id, ..
            } => (mod_id.clone(), file_id.clone()),
            _ => (LOCAL_SOURCE.to_string(), LOCAL_SOURCE.to_string()),
        }
    }

    fn mod_name(&self) -> ModResult<String> {
        let (explicit, path) = match self {
            InstallSource::File { path, name } | InstallSource::Directory { path, name } => {
                (name.clone(), path)
            }
            InstallSource::Staged { name, dir, .. } => (Some(name.clone()), dir),
        };
        let name = match explicit {
            Some(name) => name,
            None => {
                let stem = match self {
                    InstallSource::File { .. } => path.file_stem(),
                    _ => path.file_name(),
                };
                stem.map(|value| value.to_string_lossy().to_string())
                    .unwrap_or_default()
            }
        };
        let name = name.trim().to_string();
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(ModError::InvalidName { name });
        }
        Ok(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityCheck {
    New,
    AlreadyInstalled(ModEntry),
    Conflict(ModEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Drives install/activate/deactivate/update/uninstall across the registry,
/// the archive list and the data-directory overlay.
#[derive(Debug, Clone)]
pub struct ModLifecycle {
    registry: Registry,
    game: GameId,
    data_dir: PathBuf,
    custom_ini: PathBuf,
    mods_dir: PathBuf,
}

impl ModLifecycle {
    pub fn new(registry: Registry, game: GameId, paths: &GamePaths, mods_dir: PathBuf) -> Self {
        Self {
            registry,
            game,
            data_dir: paths.data_dir.clone(),
            custom_ini: paths.custom_ini.clone(),
            mods_dir,
        }
    }

    fn archive_ext(&self) -> &'static str {
        self.game.spec().archive_ext
    }

    pub fn list(&self) -> ModResult<Vec<ModEntry>> {
        self.registry.load(self.game)
    }

    pub fn check_identity(&self, mod_id: &str, file_id: &str) -> ModResult<IdentityCheck> {
        let mods = self.registry.load(self.game)?;
        Ok(identity_of(&mods, mod_id, file_id))
    }

    /// absent -> inactive. Never touches the archive list or the overlay.
    pub fn install(&self, source: InstallSource) -> ModResult<ModEntry> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        let (mod_id, file_id) = source.origin();
        if mod_id != LOCAL_SOURCE {
            match identity_of(&mods, &mod_id, &file_id) {
                IdentityCheck::New => {}
                IdentityCheck::AlreadyInstalled(existing) => {
                    return Err(ModError::AlreadyInstalled {
                        name: existing.name,
                        mod_id,
                        file_id,
                    });
                }
                IdentityCheck::Conflict(existing) => {
                    return Err(ModError::IdentityConflict {
                        existing: existing.name,
                        mod_id,
                        installed_file: existing.source_file_id,
                        requested_file: file_id,
                    });
                }
            }
        }
        self.install_in(&mut mods, source)
    }

    /// inactive -> active. The registry flag is persisted before the archive
    /// list and overlay are touched; re-running repairs a partial activation.
    pub fn activate(&self, name: &str) -> ModResult<SyncReport> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        self.activate_in(&mut mods, name)
    }

    /// active -> inactive, mirroring `activate`.
    pub fn deactivate(&self, name: &str) -> ModResult<SyncReport> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        self.deactivate_in(&mut mods, name)
    }

    /// Replaces `name` with a new version after the caller confirmed the
    /// identity conflict. The new entry starts inactive.
    pub fn update(&self, name: &str, source: InstallSource) -> ModResult<ModEntry> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        let index = registry::position(&mods, name)?;
        self.installable_name(&mods, &source, Some(&mods[index]))?;
        self.remove_in(&mut mods, name)?;
        let entry = self.install_in(&mut mods, source)?;
        info!(old = name, new = %entry.name, "updated mod");
        Ok(entry)
    }

    pub fn uninstall(&self, name: &str) -> ModResult<()> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        self.remove_in(&mut mods, name)?;
        info!(name, "uninstalled mod");
        Ok(())
    }

    /// Moves a mod one slot in the load order and rewrites both projections.
    pub fn move_mod(&self, name: &str, direction: Direction) -> ModResult<bool> {
        let _lock = self.registry.lock(self.game)?;
        let mut mods = self.registry.load(self.game)?;
        let index = registry::position(&mods, name)?;
        let other = match direction {
            Direction::Up if index > 0 => index - 1,
            Direction::Down if index + 1 < mods.len() => index + 1,
            _ => return Ok(false),
        };
        mods.swap(index, other);
        self.registry.save(self.game, &mods)?;
        self.rebuild_projections(&mods)?;
        Ok(true)
    }

    /// Re-derives the archive list and overlay from the registry alone.
    pub fn rebuild(&self) -> ModResult<SyncReport> {
        let _lock = self.registry.lock(self.game)?;
        let mods = self.registry.load(self.game)?;
        self.rebuild_projections(&mods)
    }

    fn rebuild_projections(&self, mods: &[ModEntry]) -> ModResult<SyncReport> {
        let mut archives = Vec::new();
        for mod_entry in mods.iter().filter(|mod_entry| mod_entry.active) {
            archives.extend(vfs::archive_names(&mod_entry.path, self.archive_ext())?);
        }
        archive_list::set_archive_list(&self.custom_ini, &archives)?;
        vfs::sync(&self.data_dir, mods, self.archive_ext())
    }

    fn activate_in(&self, mods: &mut [ModEntry], name: &str) -> ModResult<SyncReport> {
        let index = registry::position(mods, name)?;
        mods[index].active = true;
        self.registry.save(self.game, mods)?;

        for archive in vfs::archive_names(&mods[index].path, self.archive_ext())? {
            archive_list::add_archive(&self.custom_ini, &archive)?;
        }
        let report = vfs::sync(&self.data_dir, mods, self.archive_ext())?;
        info!(name, links = report.created, "activated mod");
        Ok(report)
    }

    fn deactivate_in(&self, mods: &mut [ModEntry], name: &str) -> ModResult<SyncReport> {
        let index = registry::position(mods, name)?;
        mods[index].active = false;
        self.registry.save(self.game, mods)?;

        for archive in self.unshared_archives(mods, index)? {
            archive_list::remove_archive(&self.custom_ini, &archive)?;
        }
        let report = vfs::sync(&self.data_dir, mods, self.archive_ext())?;
        info!(name, links = report.created, "deactivated mod");
        Ok(report)
    }

    /// Archive names of `mods[index]` that no other active mod provides.
    fn unshared_archives(&self, mods: &[ModEntry], index: usize) -> ModResult<Vec<String>> {
        let mut kept = Vec::new();
        for (other, mod_entry) in mods.iter().enumerate() {
            if other != index && mod_entry.active {
                kept.extend(vfs::archive_names(&mod_entry.path, self.archive_ext())?);
            }
        }
        Ok(vfs::archive_names(&mods[index].path, self.archive_ext())?
            .into_iter()
            .filter(|archive| !kept.contains(archive))
            .collect())
    }

    /// The overlay and archive list are cleaned before the payload is
    /// deleted, even when an earlier deactivation stopped halfway and left
    /// the entry flagged inactive.
    fn remove_in(&self, mods: &mut Vec<ModEntry>, name: &str) -> ModResult<()> {
        let index = registry::position(mods, name)?;
        if mods[index].active {
            self.deactivate_in(mods, name)?;
        } else {
            if self.custom_ini.exists() && mods[index].path.is_dir() {
                for archive in self.unshared_archives(mods, index)? {
                    archive_list::remove_archive(&self.custom_ini, &archive)?;
                }
            }
            vfs::sync(&self.data_dir, mods, self.archive_ext())?;
        }
        let path = mods[index].path.clone();
        if path.starts_with(&self.mods_dir) {
            remove_dir(&path)?;
        } else {
            warn!(name, path = ?path, "mod lives outside the mod store; leaving files in place");
        }
        mods.remove(index);
        self.registry.save(self.game, mods)
    }

    /// Validates the name and target directory of `source`. `replacing` is
    /// the entry an update is about to remove, so its name and directory
    /// count as free.
    fn installable_name(
        &self,
        mods: &[ModEntry],
        source: &InstallSource,
        replacing: Option<&ModEntry>,
    ) -> ModResult<String> {
        let name = source.mod_name()?;
        let taken = mods.iter().any(|entry| {
            entry.name == name && replacing.map_or(true, |old| old.name != entry.name)
        });
        if taken {
            return Err(ModError::AlreadyRegistered { name });
        }
        let dest = self.mods_dir.join(&name);
        let freed = replacing.map_or(false, |old| {
            old.path == dest && old.path.starts_with(&self.mods_dir)
        });
        if !freed && fs::symlink_metadata(&dest).is_ok() {
            return Err(ModError::io(
                "install into",
                &dest,
                io::Error::from(io::ErrorKind::AlreadyExists),
            ));
        }
        Ok(name)
    }

    fn install_in(&self, mods: &mut Vec<ModEntry>, source: InstallSource) -> ModResult<ModEntry> {
        let name = self.installable_name(mods, &source, None)?;
        let dest = self.mods_dir.join(&name);
        fs::create_dir_all(&self.mods_dir)
            .map_err(|err| ModError::io("create mod store", &self.mods_dir, err))?;

        let (source_mod_id, source_file_id) = source.origin();
        if let Err(err) = place_payload(&source, &dest) {
            let _ = fs::remove_dir_all(&dest);
            return Err(err);
        }

        let entry = ModEntry {
            name,
            path: dest.clone(),
            active: false,
            source_mod_id,
            source_file_id,
            game: self.game,
            installed_at: Some(OffsetDateTime::now_utc().unix_timestamp()),
        };
        mods.push(entry.clone());
        if let Err(err) = self.registry.save(self.game, mods) {
            mods.pop();
            let _ = fs::remove_dir_all(&dest);
            return Err(err);
        }
        info!(name = %entry.name, path = ?entry.path, "installed mod");
        Ok(entry)
    }
}

fn identity_of(mods: &[ModEntry], mod_id: &str, file_id: &str) -> IdentityCheck {
    match mods.iter().find(|entry| entry.same_source(mod_id)) {
        Some(existing) if existing.source_file_id == file_id => {
            IdentityCheck::AlreadyInstalled(existing.clone())
        }
        Some(existing) => IdentityCheck::Conflict(existing.clone()),
        None => IdentityCheck::New,
    }
}

fn place_payload(source: &InstallSource, dest: &Path) -> ModResult<()> {
    match source {
        InstallSource::File { path, .. } => {
            let file_name = path.file_name().ok_or_else(|| ModError::InvalidName {
                name: path.display().to_string(),
            })?;
            fs::create_dir_all(dest).map_err(|err| ModError::io("create mod dir", dest, err))?;
            let target = dest.join(file_name);
            fs::copy(path, &target).map_err(|err| ModError::io("copy", path, err))?;
            Ok(())
        }
        InstallSource::Directory { path, .. } => copy_dir(path, dest),
        InstallSource::Staged { dir, .. } => match fs::rename(dir, dest) {
            Ok(()) => Ok(()),
            Err(_) => {
                copy_dir(dir, dest)?;
                fs::remove_dir_all(dir).map_err(|err| ModError::io("remove staging", dir, err))
            }
        },
    }
}

fn copy_dir(source: &Path, dest: &Path) -> ModResult<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|err| ModError::Walk {
            path: source.to_path_buf(),
            source: err,
        })?;
        let rel = entry.path().strip_prefix(source).unwrap_or(Path::new(""));
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|err| ModError::io("create dir", &target, err))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .map_err(|err| ModError::io("copy", entry.path(), err))?;
        }
    }
    Ok(())
}

fn remove_dir(path: &Path) -> ModResult<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ModError::io("remove mod dir", path, err)),
    }
}
