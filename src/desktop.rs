use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::info;

const DESKTOP_FILE: &str = "vaultlink.desktop";
const NXM_MIME: &str = "x-scheme-handler/nxm";

/// Installs a desktop entry for the running binary and makes it the default
/// handler for `nxm://` links.
pub fn register_protocol_handler() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locate executable")?;
    let base = BaseDirs::new().context("resolve home dir")?;
    let path = write_desktop_entry(&base.data_dir().join("applications"), &exe)?;

    let status = Command::new("xdg-mime")
        .arg("default")
        .arg(DESKTOP_FILE)
        .arg(NXM_MIME)
        .status()
        .context("run xdg-mime")?;
    if !status.success() {
        bail!("xdg-mime exited with {status}");
    }
    info!(path = ?path, "registered nxm protocol handler");
    Ok(path)
}

fn write_desktop_entry(applications_dir: &Path, exe: &Path) -> Result<PathBuf> {
    fs::create_dir_all(applications_dir).context("create applications dir")?;
    let path = applications_dir.join(DESKTOP_FILE);
    fs::write(&path, desktop_entry(exe)).context("write desktop file")?;
    Ok(path)
}

fn desktop_entry(exe: &Path) -> String {
    let exe = exe.display().to_string();
    let exec = if exe.contains(char::is_whitespace) {
        format!("\"{}\"", exe.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        exe
    };
    format!(
        "[Desktop Entry]\n\
         Name=Vaultlink\n\
         Comment=Mod manager for Bethesda games on Proton\n\
         Exec={exec} %U\n\
         Type=Application\n\
         Terminal=true\n\
         NoDisplay=true\n\
         MimeType={NXM_MIME};\n"
    )
}
