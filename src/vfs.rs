use crate::{
    error::{ModError, ModResult},
    registry::ModEntry,
};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub removed: usize,
    pub created: usize,
    pub replaced: Vec<String>,
}

/// Rebuilds the overlay: every symlink directly inside `data_dir` is removed,
/// then one link per archive of each active mod is created, in registry order.
pub fn sync(data_dir: &Path, mods: &[ModEntry], archive_ext: &str) -> ModResult<SyncReport> {
    let mut report = SyncReport {
        removed: remove_links(data_dir)?,
        ..SyncReport::default()
    };

    for mod_entry in mods.iter().filter(|mod_entry| mod_entry.active) {
        for source in find_archive_files(&mod_entry.path, archive_ext)? {
            let Some(file_name) = source.file_name() else {
                continue;
            };
            let dest = data_dir.join(file_name);
            if replace_existing_link(&dest)? {
                let name = file_name.to_string_lossy().to_string();
                warn!(archive = %name, winner = %mod_entry.name, "archive provided by more than one active mod");
                report.replaced.push(name);
            }
            let target = absolute(&source)?;
            create_symlink(&target, &dest)
                .map_err(|err| ModError::io("symlink", dest.clone(), err))?;
            debug!(link = ?dest, target = ?target, "linked archive");
            report.created += 1;
        }
    }

    info!(
        removed = report.removed,
        created = report.created,
        data_dir = ?data_dir,
        "overlay synced"
    );
    Ok(report)
}

/// Archive files under `dir`, walked in file-name order so repeated syncs agree.
pub fn find_archive_files(dir: &Path, archive_ext: &str) -> ModResult<Vec<PathBuf>> {
    let wanted = archive_ext.trim_start_matches('.');
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|source| ModError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(wanted))
            .unwrap_or(false);
        if matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

pub fn archive_names(dir: &Path, archive_ext: &str) -> ModResult<Vec<String>> {
    Ok(find_archive_files(dir, archive_ext)?
        .iter()
        .filter_map(|path| path.file_name())
        .map(|name| name.to_string_lossy().to_string())
        .collect())
}

/// Symlinks directly inside `data_dir`, sorted by name.
pub fn list_links(data_dir: &Path) -> ModResult<Vec<(String, PathBuf)>> {
    let mut links = Vec::new();
    for entry in read_dir(data_dir)? {
        let entry = entry.map_err(|err| ModError::io("read data dir", data_dir, err))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).map_err(|err| ModError::io("stat", &path, err))?;
        if !meta.file_type().is_symlink() {
            continue;
        }
        let target = fs::read_link(&path).map_err(|err| ModError::io("read link", &path, err))?;
        links.push((entry.file_name().to_string_lossy().to_string(), target));
    }
    links.sort();
    Ok(links)
}

fn remove_links(data_dir: &Path) -> ModResult<usize> {
    let mut removed = 0;
    for entry in read_dir(data_dir)? {
        let entry = entry.map_err(|err| ModError::io("read data dir", data_dir, err))?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path).map_err(|err| ModError::io("stat", &path, err))?;
        if meta.file_type().is_symlink() {
            fs::remove_file(&path).map_err(|err| ModError::io("remove link", &path, err))?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn replace_existing_link(dest: &Path) -> ModResult<bool> {
    match fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(dest).map_err(|err| ModError::io("remove link", dest, err))?;
            Ok(true)
        }
        Ok(_) => Err(ModError::ShadowsGameFile {
            path: dest.to_path_buf(),
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(ModError::io("stat", dest, err)),
    }
}

fn read_dir(dir: &Path) -> ModResult<fs::ReadDir> {
    fs::read_dir(dir).map_err(|err| ModError::io("read data dir", dir, err))
}

fn absolute(path: &Path) -> ModResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| ModError::io("resolve", path, err))
}

#[cfg(unix)]
fn create_symlink(source: &Path, dest: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, dest)
}

#[cfg(not(unix))]
fn create_symlink(_source: &Path, _dest: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "symlink unavailable on this platform",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{game::GameId, registry::LOCAL_SOURCE};
    use tempfile::tempdir;

    fn mod_with(root: &Path, name: &str, files: &[&str], active: bool) -> ModEntry {
        let path = root.join("mods").join(name);
        for file in files {
            let file_path = path.join(file);
            fs::create_dir_all(file_path.parent().unwrap()).unwrap();
            fs::write(&file_path, name).unwrap();
        }
        fs::create_dir_all(&path).unwrap();
        ModEntry {
            name: name.to_string(),
            path,
            active,
            source_mod_id: LOCAL_SOURCE.to_string(),
            source_file_id: LOCAL_SOURCE.to_string(),
            game: GameId::Fallout76,
            installed_at: None,
        }
    }

    fn data_dir(root: &Path) -> PathBuf {
        let data = root.join("Data");
        fs::create_dir_all(&data).unwrap();
        data
    }

    #[test]
    fn links_exactly_the_active_archives() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        let mods = vec![
            mod_with(dir.path(), "Foo", &["a.ba2", "nested/b.BA2", "readme.txt"], true),
            mod_with(dir.path(), "Idle", &["c.ba2"], false),
        ];

        let report = sync(&data, &mods, ".ba2").unwrap();
        assert_eq!(report.created, 2);

        let links = list_links(&data).unwrap();
        assert_eq!(
            links,
            vec![
                ("a.ba2".to_string(), mods[0].path.join("a.ba2")),
                ("b.BA2".to_string(), mods[0].path.join("nested/b.BA2")),
            ]
        );
    }

    #[test]
    fn sync_is_idempotent() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        let mods = vec![
            mod_with(dir.path(), "Foo", &["a.ba2", "b.ba2"], true),
            mod_with(dir.path(), "Bar", &["c.ba2"], true),
        ];

        sync(&data, &mods, "ba2").unwrap();
        let first = list_links(&data).unwrap();
        let report = sync(&data, &mods, "ba2").unwrap();
        assert_eq!(report.removed, 3);
        assert_eq!(list_links(&data).unwrap(), first);
    }

    #[test]
    fn stale_and_foreign_links_are_cleared() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        fs::write(data.join("SeventySix - Textures01.ba2"), "game").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.ba2"), data.join("gone.ba2")).unwrap();
        let mut mods = vec![mod_with(dir.path(), "Foo", &["a.ba2"], true)];
        sync(&data, &mods, "ba2").unwrap();

        mods[0].active = false;
        sync(&data, &mods, "ba2").unwrap();

        assert!(list_links(&data).unwrap().is_empty());
        assert!(data.join("SeventySix - Textures01.ba2").is_file());
    }

    #[test]
    fn overlapping_archive_names_keep_the_last_mod() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        let mods = vec![
            mod_with(dir.path(), "First", &["shared.ba2"], true),
            mod_with(dir.path(), "Second", &["shared.ba2"], true),
        ];

        let report = sync(&data, &mods, "ba2").unwrap();
        assert_eq!(report.replaced, vec!["shared.ba2".to_string()]);
        let links = list_links(&data).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].1, mods[1].path.join("shared.ba2"));
    }

    #[test]
    fn refuses_to_replace_game_files() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        fs::write(data.join("a.ba2"), "game").unwrap();
        let mods = vec![mod_with(dir.path(), "Foo", &["a.ba2"], true)];
        assert!(matches!(
            sync(&data, &mods, "ba2"),
            Err(ModError::ShadowsGameFile { .. })
        ));
        assert_eq!(fs::read_to_string(data.join("a.ba2")).unwrap(), "game");
    }

    #[test]
    fn missing_mod_directory_fails_the_sync() {
        let dir = tempdir().unwrap();
        let data = data_dir(dir.path());
        let mut entry = mod_with(dir.path(), "Foo", &["a.ba2"], true);
        entry.path = dir.path().join("nowhere");
        assert!(matches!(
            sync(&data, &[entry], "ba2"),
            Err(ModError::Walk { .. })
        ));
    }

    #[test]
    fn missing_data_directory_is_reported() {
        let dir = tempdir().unwrap();
        let err = sync(&dir.path().join("Data"), &[], "ba2").unwrap_err();
        assert!(matches!(err, ModError::Io { .. }));
    }
}
