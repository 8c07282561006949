use anyhow::{Context, Result};
use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use tracing::{debug, info};

/// Removes its directory on drop.
#[derive(Debug)]
struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// An extracted payload waiting to be moved into the mod store.
#[derive(Debug)]
pub struct StagedPayload {
    pub dir: PathBuf,
    pub name: String,
    _guard: StagingGuard,
}

/// Unpacks `archive` into a fresh directory under `staging_root`, named after
/// the archive's stem. Loose game archives are staged as-is.
pub fn stage_archive(archive: &Path, staging_root: &Path, game_ext: &str) -> Result<StagedPayload> {
    let name = archive
        .file_stem()
        .map(|stem| stem.to_string_lossy().trim().to_string())
        .filter(|stem| !stem.is_empty())
        .with_context(|| format!("archive has no usable name: {archive:?}"))?;
    let temp_dir = make_temp_dir(staging_root, "extract")?;
    let guard = StagingGuard::new(temp_dir.clone());
    let dir = temp_dir.join(&name);
    fs::create_dir_all(&dir).context("create staging dir")?;

    let ext = archive
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => extract_zip(archive, &dir)?,
        "7z" => extract_7z(archive, &dir)?,
        ext if ext == game_ext.trim_start_matches('.') => {
            let file_name = archive.file_name().context("archive file name")?;
            fs::copy(archive, dir.join(file_name))
                .with_context(|| format!("copy {archive:?}"))?;
        }
        _ => {
            if extract_with_7z(archive, &dir)?.is_none() {
                anyhow::bail!("unsupported archive format: {archive:?} (install 7z to unpack it)");
            }
        }
    }
    info!(archive = ?archive, dir = ?dir, "staged archive");
    Ok(StagedPayload {
        dir,
        name,
        _guard: guard,
    })
}

fn extract_zip(path: &Path, dest: &Path) -> Result<()> {
    match extract_with_7z(path, dest) {
        Ok(Some(())) => return Ok(()),
        Ok(None) => {}
        Err(err) => return Err(err),
    }

    let file = fs::File::open(path).context("open zip")?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("zip entry")?;
        let Some(out_path) = file.enclosed_name() else {
            debug!(entry = file.name(), "skipping zip entry outside the archive root");
            continue;
        };

        let out_path = dest.join(out_path);
        if file.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }

        let mut out_file = fs::File::create(&out_path).context("write zip entry")?;
        io::copy(&mut file, &mut out_file).context("extract zip entry")?;
        if let Some(mtime) = file.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
    }

    Ok(())
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

fn extract_7z(path: &Path, dest: &Path) -> Result<()> {
    match extract_with_7z(path, dest) {
        Ok(Some(())) => Ok(()),
        Ok(None) => sevenz_rust::decompress_file(path, dest)
            .with_context(|| format!("extract 7z archive {path:?}")),
        Err(err) => Err(err),
    }
}

/// `Ok(None)` when no 7z binary is installed.
fn extract_with_7z(path: &Path, dest: &Path) -> Result<Option<()>> {
    let output = Command::new("7z")
        .arg("x")
        .arg("-y")
        .arg("-mmt=on")
        .arg(format!("-o{}", dest.display()))
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let output = match output {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("launch 7z"),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("7z extraction failed: {}", stderr.trim());
    }

    Ok(Some(()))
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn make_temp_dir(root: &Path, suffix: &str) -> Result<PathBuf> {
    fs::create_dir_all(root).context("create staging root")?;
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_dir = root.join(format!("{suffix}-{nanos}-{counter}"));
    fs::create_dir_all(&temp_dir).context("create temp dir")?;
    Ok(temp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, body) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn zip_is_staged_under_its_stem() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Better Lights-123-1-0.zip");
        write_zip(&archive, &[("lights.ba2", "x"), ("docs/readme.txt", "y")]);

        let staged = stage_archive(&archive, &dir.path().join("staging"), "ba2").unwrap();
        assert_eq!(staged.name, "Better Lights-123-1-0");
        assert!(staged.dir.ends_with("Better Lights-123-1-0"));
        assert_eq!(fs::read_to_string(staged.dir.join("lights.ba2")).unwrap(), "x");
        assert!(staged.dir.join("docs/readme.txt").is_file());
    }

    #[test]
    fn loose_game_archive_is_copied() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Armor.BA2");
        fs::write(&archive, "payload").unwrap();

        let staged = stage_archive(&archive, &dir.path().join("staging"), ".ba2").unwrap();
        assert_eq!(staged.name, "Armor");
        assert!(staged.dir.join("Armor.BA2").is_file());
        assert!(archive.is_file());
    }

    #[test]
    fn staging_is_removed_when_dropped() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Mod.zip");
        write_zip(&archive, &[("m.ba2", "x")]);
        let staging = dir.path().join("staging");

        let staged = stage_archive(&archive, &staging, "ba2").unwrap();
        assert!(staged.dir.exists());
        drop(staged);
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }

    #[test]
    fn corrupt_zip_leaves_no_staging_behind() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("Broken.zip");
        fs::write(&archive, "not a zip").unwrap();
        let staging = dir.path().join("staging");

        assert!(stage_archive(&archive, &staging, "ba2").is_err());
        assert_eq!(fs::read_dir(&staging).unwrap().count(), 0);
    }
}
