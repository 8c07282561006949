use crate::{
    error::{ModError, ModResult},
    registry::write_atomic,
};
use ini::Ini;
use std::{fs, io, path::Path};
use tracing::debug;

pub const ARCHIVE_SECTION: &str = "Archive";
pub const ARCHIVE_KEY: &str = "sResourceArchive2List";
const SEPARATOR: &str = ", ";

/// Reads the archive list; a missing config file is an empty list.
pub fn read_archive_list(config_path: &Path) -> ModResult<Vec<String>> {
    let ini = load_or_empty(config_path)?;
    Ok(current_list(&ini))
}

pub fn add_archive(config_path: &Path, archive_name: &str) -> ModResult<()> {
    let mut ini = load_or_empty(config_path)?;
    let mut list = current_list(&ini);
    if list.iter().any(|name| name == archive_name) {
        debug!(archive = archive_name, "archive already listed");
        return Ok(());
    }
    list.push(archive_name.to_string());
    store_list(&mut ini, &list);
    save(config_path, &ini)?;
    debug!(archive = archive_name, "added archive to load order");
    Ok(())
}

/// Strips one archive from the list; the config file must already exist.
pub fn remove_archive(config_path: &Path, archive_name: &str) -> ModResult<()> {
    let mut ini = load(config_path)?;
    let before = current_list(&ini);
    let list: Vec<String> = before
        .iter()
        .filter(|name| name.as_str() != archive_name)
        .cloned()
        .collect();
    if list.len() == before.len() {
        return Ok(());
    }
    store_list(&mut ini, &list);
    save(config_path, &ini)?;
    debug!(archive = archive_name, "removed archive from load order");
    Ok(())
}

/// Replaces the whole list, dropping duplicates while keeping first occurrence order.
pub fn set_archive_list(config_path: &Path, archives: &[String]) -> ModResult<()> {
    let mut ini = load_or_empty(config_path)?;
    let mut list: Vec<String> = Vec::with_capacity(archives.len());
    for name in archives {
        if !list.contains(name) {
            list.push(name.clone());
        }
    }
    store_list(&mut ini, &list);
    save(config_path, &ini)?;
    debug!(count = list.len(), "rewrote archive load order");
    Ok(())
}

pub fn parse_list(raw: &str) -> Vec<String> {
    let mut list: Vec<String> = Vec::new();
    for part in raw.split(',') {
        let name = part.trim();
        if name.is_empty() || list.iter().any(|existing| existing == name) {
            continue;
        }
        list.push(name.to_string());
    }
    list
}

pub fn render_list(list: &[String]) -> String {
    list.join(SEPARATOR)
}

fn current_list(ini: &Ini) -> Vec<String> {
    ini.get_from(Some(ARCHIVE_SECTION), ARCHIVE_KEY)
        .map(parse_list)
        .unwrap_or_default()
}

fn store_list(ini: &mut Ini, list: &[String]) {
    ini.with_section(Some(ARCHIVE_SECTION))
        .set(ARCHIVE_KEY, render_list(list));
}

fn load(path: &Path) -> ModResult<Ini> {
    Ini::load_from_file(path).map_err(|err| match err {
        ini::Error::Io(source) => ModError::io("read game config", path, source),
        ini::Error::Parse(source) => ModError::Ini {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn load_or_empty(path: &Path) -> ModResult<Ini> {
    match load(path) {
        Ok(ini) => Ok(ini),
        Err(ModError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Ok(Ini::new())
        }
        Err(err) => Err(err),
    }
}

fn save(path: &Path, ini: &Ini) -> ModResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| ModError::io("create config dir", parent, err))?;
    }
    let mut raw = Vec::new();
    ini.write_to(&mut raw)
        .map_err(|err| ModError::io("render game config", path, err))?;
    write_atomic(path, &raw)
}
