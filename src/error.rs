use std::{io, path::PathBuf};
use thiserror::Error;

pub type ModResult<T> = Result<T, ModError>;

/// Failures surfaced by the registry, load-order files, overlay and lifecycle.
#[derive(Debug, Error)]
pub enum ModError {
    #[error("{action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("walk {path:?}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("parse {path:?}: {source}")]
    Ini {
        path: PathBuf,
        #[source]
        source: ini::ParseError,
    },

    #[error("mod not found: {name}")]
    NotRegistered { name: String },

    #[error("invalid mod name: {name:?}")]
    InvalidName { name: String },

    #[error("a mod named {name} is already installed")]
    AlreadyRegistered { name: String },

    #[error("{name} is already installed (mod {mod_id}, file {file_id})")]
    AlreadyInstalled {
        name: String,
        mod_id: String,
        file_id: String,
    },

    #[error(
        "a different version of {existing} is installed (mod {mod_id}: file {installed_file}, requested {requested_file})"
    )]
    IdentityConflict {
        existing: String,
        mod_id: String,
        installed_file: String,
        requested_file: String,
    },

    #[error("game not found: {id}")]
    UnknownGame { id: String },

    #[error("{game} game directory not found; set the game path in the config")]
    GameDirNotFound { game: &'static str },

    #[error("{game} data directory not found at {path:?}")]
    DataDirNotFound { game: &'static str, path: PathBuf },

    #[error("compatdata directory not found for {game}; set the prefix path in the config")]
    PrefixNotFound { game: &'static str },

    #[error("{what} not found at configured path: {path:?}")]
    OverrideMissing { what: &'static str, path: PathBuf },

    #[error("refusing to replace game file with a link: {path:?}")]
    ShadowsGameFile { path: PathBuf },

    #[error("registry {path:?} is locked by process {pid}")]
    RegistryLocked { path: PathBuf, pid: u32 },
}

impl ModError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ModError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
