use crate::{
    error::{ModError, ModResult},
    registry::write_atomic,
};
use std::{fs, io, path::Path};
use tracing::debug;

pub fn read_plugins(path: &Path) -> ModResult<Vec<String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ModError::io("read plugins.txt", path, err)),
    };
    Ok(raw
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

pub fn write_plugins(path: &Path, plugins: &[String]) -> ModResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ModError::io("create plugins dir", parent, err))?;
    }
    let mut raw = String::new();
    for plugin in plugins {
        raw.push_str(plugin);
        raw.push('\n');
    }
    write_atomic(path, raw.as_bytes())
}

pub fn add_plugin(path: &Path, plugin: &str) -> ModResult<bool> {
    let mut plugins = read_plugins(path)?;
    if plugins.iter().any(|existing| existing == plugin) {
        return Ok(false);
    }
    plugins.push(plugin.to_string());
    write_plugins(path, &plugins)?;
    debug!(plugin, "added plugin");
    Ok(true)
}

pub fn remove_plugin(path: &Path, plugin: &str) -> ModResult<bool> {
    let mut plugins = read_plugins(path)?;
    let before = plugins.len();
    plugins.retain(|existing| existing != plugin);
    if plugins.len() == before {
        return Ok(false);
    }
    write_plugins(path, &plugins)?;
    debug!(plugin, "removed plugin");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_plugins(&dir.path().join("plugins.txt"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn add_skips_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Fallout76").join("plugins.txt");
        assert!(add_plugin(&path, "TestMod1.esp").unwrap());
        assert!(add_plugin(&path, "TestMod2.esl").unwrap());
        assert!(!add_plugin(&path, "TestMod1.esp").unwrap());
        assert_eq!(
            read_plugins(&path).unwrap(),
            vec!["TestMod1.esp".to_string(), "TestMod2.esl".to_string()]
        );
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.txt");
        fs::write(&path, "# This is a comment\n\nTestMod1.esp\r\nTestMod2.esl\n").unwrap();
        assert_eq!(
            read_plugins(&path).unwrap(),
            vec!["TestMod1.esp".to_string(), "TestMod2.esl".to_string()]
        );
    }

    #[test]
    fn remove_reports_whether_anything_changed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plugins.txt");
        add_plugin(&path, "A.esp").unwrap();
        assert!(!remove_plugin(&path, "B.esp").unwrap());
        assert!(remove_plugin(&path, "A.esp").unwrap());
        assert!(read_plugins(&path).unwrap().is_empty());
    }
}
