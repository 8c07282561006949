use crate::{
    error::{ModError, ModResult},
    game::GameId,
    registry::write_atomic,
};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

const APP_DIR: &str = "vaultlink";
pub const API_KEY_ENV: &str = "NEXUS_API_KEY";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub current_game: GameId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub game_paths: BTreeMap<GameId, PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub compatdata_paths: BTreeMap<GameId, PathBuf>,
}

impl AppConfig {
    /// Missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> ModResult<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ModError::io("read config", path, err)),
        };
        serde_json::from_str(&raw).map_err(|source| ModError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> ModResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ModError::io("create config dir", parent, err))?;
        }
        let raw = serde_json::to_string_pretty(self).map_err(|source| ModError::Encode {
            what: "config",
            source,
        })?;
        write_atomic(path, raw.as_bytes())
    }

    pub fn game_override(&self, game: GameId) -> Option<&Path> {
        self.game_paths.get(&game).map(PathBuf::as_path)
    }

    pub fn prefix_override(&self, game: GameId) -> Option<&Path> {
        self.compatdata_paths.get(&game).map(PathBuf::as_path)
    }

    /// The stored key unless the environment provides one.
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| Some(self.api_key.clone()).filter(|value| !value.trim().is_empty()))
    }
}

/// Where vaultlink keeps its own files.
#[derive(Debug, Clone)]
pub struct AppDirs {
    pub config_file: PathBuf,
    pub data_root: PathBuf,
}

impl AppDirs {
    pub fn resolve() -> Result<Self> {
        let base = BaseDirs::new().context("resolve home dir")?;
        Ok(Self {
            config_file: base.config_dir().join(APP_DIR).join("config.json"),
            data_root: base.data_local_dir().join(APP_DIR),
        })
    }

    pub fn registry_dir(&self) -> PathBuf {
        self.data_root.join("registry")
    }

    pub fn mods_dir(&self, game: GameId) -> PathBuf {
        self.data_root.join("mods").join(game.as_str())
    }

    pub fn downloads_dir(&self, game: GameId) -> PathBuf {
        self.data_root.join("downloads").join(game.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_config_defaults_to_fallout76() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(config.current_game, GameId::Fallout76);
        assert!(config.api_key.is_empty());
        assert!(config.game_paths.is_empty());
    }

    #[test]
    fn overrides_survive_a_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = AppConfig {
            api_key: "secret".to_string(),
            current_game: GameId::Fallout4,
            ..AppConfig::default()
        };
        config
            .game_paths
            .insert(GameId::Fallout4, PathBuf::from("/games/Fallout 4"));
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.game_override(GameId::Fallout4),
            Some(Path::new("/games/Fallout 4"))
        );
        assert_eq!(loaded.prefix_override(GameId::Fallout4), None);
    }

    #[test]
    fn reads_partial_documents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"api_key":"k","compatdata_paths":{"skyrimse":"/pfx"}}"#,
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.current_game, GameId::Fallout76);
        assert_eq!(
            config.prefix_override(GameId::SkyrimSe),
            Some(Path::new("/pfx"))
        );
    }

    #[test]
    fn malformed_config_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ModError::Decode { .. })
        ));
    }
}
