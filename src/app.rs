use crate::{
    config::{AppConfig, AppDirs},
    extract,
    game::GameId,
    lifecycle::{IdentityCheck, InstallSource, ModLifecycle},
    locator::{GameLocator, GamePaths},
    nexus::{NexusClient, NxmLink},
    registry::{ModEntry, Registry, LOCAL_SOURCE},
};
use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// What happened to a handled nxm link.
#[derive(Debug)]
pub enum NxmOutcome {
    Installed(ModEntry),
    Updated { replaced: String, entry: ModEntry },
    AlreadyInstalled(ModEntry),
    Declined,
}

pub struct App {
    pub dirs: AppDirs,
    pub config: AppConfig,
    pub game_id: GameId,
    locator: GameLocator,
}

impl App {
    pub fn initialize() -> Result<Self> {
        let dirs = AppDirs::resolve()?;
        Self::from_parts(dirs, GameLocator::new())
    }

    pub fn from_parts(dirs: AppDirs, locator: GameLocator) -> Result<Self> {
        let config = AppConfig::load(&dirs.config_file)
            .with_context(|| format!("load config {:?}", dirs.config_file))?;
        Ok(Self {
            game_id: config.current_game,
            dirs,
            config,
            locator,
        })
    }

    pub fn save_config(&self) -> Result<()> {
        self.config
            .save(&self.dirs.config_file)
            .context("save config")
    }

    pub fn registry(&self) -> Registry {
        Registry::new(self.dirs.registry_dir())
    }

    pub fn game_paths(&self) -> Result<GamePaths> {
        let paths = self.locator.detect_paths(
            self.game_id.spec(),
            self.config.game_override(self.game_id),
            self.config.prefix_override(self.game_id),
        )?;
        Ok(paths)
    }

    pub fn lifecycle(&self) -> Result<ModLifecycle> {
        let paths = self.game_paths()?;
        Ok(ModLifecycle::new(
            self.registry(),
            self.game_id,
            &paths,
            self.dirs.mods_dir(self.game_id),
        ))
    }

    pub fn set_game(&mut self, game: GameId) -> Result<()> {
        self.config.current_game = game;
        self.game_id = game;
        self.save_config()?;
        info!(game = %game, "switched current game");
        Ok(())
    }

    pub fn set_game_path(&mut self, game: GameId, path: PathBuf) -> Result<()> {
        if path.as_os_str().is_empty() {
            self.config.game_paths.remove(&game);
        } else {
            self.config.game_paths.insert(game, path);
        }
        self.save_config()
    }

    pub fn set_prefix_path(&mut self, game: GameId, path: PathBuf) -> Result<()> {
        if path.as_os_str().is_empty() {
            self.config.compatdata_paths.remove(&game);
        } else {
            self.config.compatdata_paths.insert(game, path);
        }
        self.save_config()
    }

    /// Validates `api_key` against Nexus and stores it. Returns the user name.
    pub fn login(&mut self, api_key: &str) -> Result<String> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            bail!("API key is empty");
        }
        let user = NexusClient::new(api_key).validate_api_key()?;
        self.config.api_key = api_key.to_string();
        self.save_config()?;
        info!(user = %user, "stored nexus api key");
        Ok(user)
    }

    /// Installs a local archive, game archive or directory as an inactive mod.
    pub fn install_local(&self, path: &Path, name: Option<String>) -> Result<ModEntry> {
        let lifecycle = self.lifecycle()?;
        let meta = fs::metadata(path).with_context(|| format!("read {path:?}"))?;
        if meta.is_dir() {
            return Ok(lifecycle.install(InstallSource::Directory {
                path: path.to_path_buf(),
                name,
            })?);
        }

        let archive_ext = self.game_id.spec().archive_ext;
        let is_game_archive = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(archive_ext))
            .unwrap_or(false);
        if is_game_archive {
            return Ok(lifecycle.install(InstallSource::File {
                path: path.to_path_buf(),
                name,
            })?);
        }

        let staged = extract::stage_archive(path, &self.staging_dir(), archive_ext)?;
        let entry = lifecycle.install(InstallSource::Staged {
            dir: staged.dir.clone(),
            name: name.unwrap_or_else(|| staged.name.clone()),
            mod_id: LOCAL_SOURCE.to_string(),
            file_id: LOCAL_SOURCE.to_string(),
        })?;
        Ok(entry)
    }

    /// Resolves, downloads and installs the file an nxm link points at.
    /// `confirm_update` decides whether a different installed version of the
    /// same mod is replaced.
    pub fn handle_nxm(
        &self,
        raw: &str,
        mut confirm_update: impl FnMut(&ModEntry, &NxmLink) -> bool,
        on_progress: impl FnMut(u64, Option<u64>),
    ) -> Result<NxmOutcome> {
        let link = NxmLink::parse(raw)?;
        let game = link.game_id()?;
        if game != self.game_id {
            bail!(
                "link is for {} but the current game is {}; run `vaultlink game {}` first",
                game.display_name(),
                self.game_id.display_name(),
                game
            );
        }

        let lifecycle = self.lifecycle()?;
        let replaced = match lifecycle.check_identity(&link.mod_id, &link.file_id)? {
            IdentityCheck::AlreadyInstalled(existing) => {
                info!(name = %existing.name, "link already installed");
                return Ok(NxmOutcome::AlreadyInstalled(existing));
            }
            IdentityCheck::Conflict(existing) => {
                if !confirm_update(&existing, &link) {
                    return Ok(NxmOutcome::Declined);
                }
                Some(existing.name)
            }
            IdentityCheck::New => None,
        };

        let api_key = self
            .config
            .effective_api_key()
            .context("no Nexus API key configured; run `vaultlink login <key>`")?;
        let client = NexusClient::new(api_key);
        let url = client.download_link(&link)?;
        let archive = client.download_file(&url, &self.dirs.downloads_dir(game), on_progress)?;

        let staged = extract::stage_archive(&archive, &self.staging_dir(), game.spec().archive_ext);
        if let Err(err) = fs::remove_file(&archive) {
            warn!(path = ?archive, error = %err, "failed to remove downloaded archive");
        }
        let staged = staged?;
        let source = InstallSource::Staged {
            dir: staged.dir.clone(),
            name: staged.name.clone(),
            mod_id: link.mod_id.clone(),
            file_id: link.file_id.clone(),
        };

        Ok(match replaced {
            Some(old) => {
                let entry = lifecycle.update(&old, source)?;
                NxmOutcome::Updated {
                    replaced: old,
                    entry,
                }
            }
            None => NxmOutcome::Installed(lifecycle.install(source)?),
        })
    }

    fn staging_dir(&self) -> PathBuf {
        self.dirs.data_root.join("staging")
    }
}
