use crate::{
    error::{ModError, ModResult},
    game::GameSpec,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_dir: PathBuf,
    pub data_dir: PathBuf,
    pub prefix_dir: PathBuf,
    pub custom_ini: PathBuf,
    pub plugins_txt: PathBuf,
}

/// Resolves install and Proton prefix locations for a game.
#[derive(Debug, Clone)]
pub struct GameLocator {
    steam_roots: Vec<PathBuf>,
}

impl GameLocator {
    pub fn new() -> Self {
        let mut steam_roots = Vec::new();
        if let Some(home) = dirs_home() {
            steam_roots.push(home.join(".steam/steam"));
            steam_roots.push(home.join(".local/share/Steam"));
        }
        Self { steam_roots }
    }

    pub fn with_steam_roots(steam_roots: Vec<PathBuf>) -> Self {
        Self { steam_roots }
    }

    pub fn find_game_dir(&self, game: &GameSpec, custom: Option<&Path>) -> ModResult<PathBuf> {
        if let Some(path) = checked_override(custom, "game directory")? {
            return Ok(path);
        }
        for library in self.libraries() {
            let candidate = library.join("steamapps/common").join(game.steam_dir);
            if candidate.is_dir() {
                debug!(game = game.name, path = ?candidate, "found game directory");
                return Ok(candidate);
            }
        }
        Err(ModError::GameDirNotFound { game: game.name })
    }

    pub fn find_data_dir(&self, game: &GameSpec, custom: Option<&Path>) -> ModResult<PathBuf> {
        let game_dir = self.find_game_dir(game, custom)?;
        let data_dir = game_dir.join(game.data_subdir);
        if data_dir.is_dir() {
            Ok(data_dir)
        } else {
            Err(ModError::DataDirNotFound {
                game: game.name,
                path: data_dir,
            })
        }
    }

    pub fn find_compat_prefix(&self, game: &GameSpec, custom: Option<&Path>) -> ModResult<PathBuf> {
        if let Some(path) = checked_override(custom, "compatdata directory")? {
            return Ok(path);
        }
        for library in self.libraries() {
            let candidate = library.join("steamapps/compatdata").join(game.steam_app_id);
            if candidate.is_dir() {
                debug!(game = game.name, path = ?candidate, "found compatdata");
                return Ok(candidate);
            }
        }
        Err(ModError::PrefixNotFound { game: game.name })
    }

    pub fn detect_paths(
        &self,
        game: &GameSpec,
        game_override: Option<&Path>,
        prefix_override: Option<&Path>,
    ) -> ModResult<GamePaths> {
        let game_dir = self.find_game_dir(game, game_override)?;
        let data_dir = self.find_data_dir(game, Some(&game_dir))?;
        let prefix_dir = self.find_compat_prefix(game, prefix_override)?;
        Ok(GamePaths {
            custom_ini: custom_ini_path(game, &prefix_dir),
            plugins_txt: plugins_txt_path(game, &prefix_dir),
            game_dir,
            data_dir,
            prefix_dir,
        })
    }

    fn libraries(&self) -> Vec<PathBuf> {
        let mut libraries = Vec::new();
        for base in &self.steam_roots {
            if !base.exists() {
                continue;
            }
            let vdf = base.join("steamapps/libraryfolders.vdf");
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                for path in paths {
                    if !libraries.contains(&path) {
                        libraries.push(path);
                    }
                }
            }
            if !libraries.contains(base) {
                libraries.push(base.clone());
            }
        }
        libraries
    }
}

impl Default for GameLocator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn custom_ini_path(game: &GameSpec, prefix_dir: &Path) -> PathBuf {
    steamuser_dir(prefix_dir)
        .join("Documents/My Games")
        .join(game.my_games_dir)
        .join(game.config_file)
}

pub fn plugins_txt_path(game: &GameSpec, prefix_dir: &Path) -> PathBuf {
    steamuser_dir(prefix_dir)
        .join("AppData/Local")
        .join(game.app_data_dir)
        .join("plugins.txt")
}

fn steamuser_dir(prefix_dir: &Path) -> PathBuf {
    prefix_dir.join("pfx/drive_c/users/steamuser")
}

fn checked_override(custom: Option<&Path>, what: &'static str) -> ModResult<Option<PathBuf>> {
    match custom {
        Some(path) if path.as_os_str().is_empty() => Ok(None),
        Some(path) if path.exists() => Ok(Some(path.to_path_buf())),
        Some(path) => Err(ModError::OverrideMissing {
            what,
            path: path.to_path_buf(),
        }),
        None => Ok(None),
    }
}

fn parse_steam_library_paths(path: &Path) -> ModResult<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).map_err(|err| ModError::io("read", path, err))?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::GameId;
    use tempfile::tempdir;

    #[test]
    fn override_wins_over_discovery() {
        let dir = tempdir().unwrap();
        let custom = dir.path().join("custom");
        fs::create_dir_all(custom.join("Data")).unwrap();
        let locator = GameLocator::with_steam_roots(Vec::new());
        let spec = GameId::Fallout76.spec();

        assert_eq!(
            locator.find_game_dir(spec, Some(&custom)).unwrap(),
            custom
        );
        assert_eq!(
            locator.find_data_dir(spec, Some(&custom)).unwrap(),
            custom.join("Data")
        );
    }

    #[test]
    fn missing_override_is_an_error_not_a_fallback() {
        let dir = tempdir().unwrap();
        let steam = dir.path().join("steam");
        fs::create_dir_all(steam.join("steamapps/compatdata/1151340")).unwrap();
        let locator = GameLocator::with_steam_roots(vec![steam]);
        let spec = GameId::Fallout76.spec();

        let err = locator
            .find_compat_prefix(spec, Some(&dir.path().join("missing")))
            .unwrap_err();
        assert!(matches!(err, ModError::OverrideMissing { .. }));
    }

    #[test]
    fn discovers_games_in_secondary_libraries() {
        let dir = tempdir().unwrap();
        let steam = dir.path().join("steam");
        let library = dir.path().join("library");
        fs::create_dir_all(steam.join("steamapps")).unwrap();
        fs::create_dir_all(library.join("steamapps/common/Fallout 4/Data")).unwrap();
        fs::create_dir_all(steam.join("steamapps/compatdata/377160")).unwrap();
        fs::write(
            steam.join("steamapps/libraryfolders.vdf"),
            format!(
                "\"libraryfolders\"\n{{\n  \"1\"\n  {{\n    \"path\"  \"{}\"\n  }}\n}}\n",
                library.display()
            ),
        )
        .unwrap();
        let locator = GameLocator::with_steam_roots(vec![steam.clone()]);

        let paths = locator
            .detect_paths(GameId::Fallout4.spec(), None, None)
            .unwrap();
        assert_eq!(paths.data_dir, library.join("steamapps/common/Fallout 4/Data"));
        assert_eq!(paths.prefix_dir, steam.join("steamapps/compatdata/377160"));
        assert!(paths
            .custom_ini
            .ends_with("Documents/My Games/Fallout4/Fallout4Custom.ini"));
        assert!(paths.plugins_txt.ends_with("AppData/Local/Fallout4/plugins.txt"));
    }

    #[test]
    fn reports_not_found_without_steam() {
        let locator = GameLocator::with_steam_roots(Vec::new());
        let spec = GameId::SkyrimSe.spec();
        assert!(matches!(
            locator.find_game_dir(spec, None),
            Err(ModError::GameDirNotFound { .. })
        ));
        assert!(matches!(
            locator.find_compat_prefix(spec, None),
            Err(ModError::PrefixNotFound { .. })
        ));
    }

    #[test]
    fn data_dir_must_exist_under_game_dir() {
        let dir = tempdir().unwrap();
        let locator = GameLocator::with_steam_roots(Vec::new());
        let err = locator
            .find_data_dir(GameId::Skyrim.spec(), Some(dir.path()))
            .unwrap_err();
        assert!(matches!(err, ModError::DataDirNotFound { .. }));
    }
}
