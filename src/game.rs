use crate::error::{ModError, ModResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameId {
    Fallout76,
    Fallout4,
    Fallout3,
    FalloutNv,
    Skyrim,
    SkyrimSe,
}

impl Default for GameId {
    fn default() -> Self {
        GameId::Fallout76
    }
}

/// Static facts about a supported title.
#[derive(Debug, Clone, Copy)]
pub struct GameSpec {
    pub id: GameId,
    pub name: &'static str,
    pub steam_app_id: &'static str,
    pub nexus_name: &'static str,
    pub steam_dir: &'static str,
    pub data_subdir: &'static str,
    pub config_file: &'static str,
    pub my_games_dir: &'static str,
    pub app_data_dir: &'static str,
    pub archive_ext: &'static str,
}

const FALLOUT76: GameSpec = GameSpec {
    id: GameId::Fallout76,
    name: "Fallout 76",
    steam_app_id: "1151340",
    nexus_name: "fallout76",
    steam_dir: "Fallout76",
    data_subdir: "Data",
    config_file: "Fallout76Custom.ini",
    my_games_dir: "Fallout 76",
    app_data_dir: "Fallout76",
    archive_ext: "ba2",
};

const FALLOUT4: GameSpec = GameSpec {
    id: GameId::Fallout4,
    name: "Fallout 4",
    steam_app_id: "377160",
    nexus_name: "fallout4",
    steam_dir: "Fallout 4",
    data_subdir: "Data",
    config_file: "Fallout4Custom.ini",
    my_games_dir: "Fallout4",
    app_data_dir: "Fallout4",
    archive_ext: "ba2",
};

const FALLOUT3: GameSpec = GameSpec {
    id: GameId::Fallout3,
    name: "Fallout 3",
    steam_app_id: "22300",
    nexus_name: "fallout3",
    steam_dir: "Fallout 3 goty",
    data_subdir: "Data",
    config_file: "Fallout.ini",
    my_games_dir: "Fallout3",
    app_data_dir: "Fallout3",
    archive_ext: "bsa",
};

const FALLOUT_NV: GameSpec = GameSpec {
    id: GameId::FalloutNv,
    name: "Fallout: New Vegas",
    steam_app_id: "22380",
    nexus_name: "newvegas",
    steam_dir: "Fallout New Vegas",
    data_subdir: "Data",
    config_file: "Fallout.ini",
    my_games_dir: "FalloutNV",
    app_data_dir: "FalloutNV",
    archive_ext: "bsa",
};

const SKYRIM: GameSpec = GameSpec {
    id: GameId::Skyrim,
    name: "The Elder Scrolls V: Skyrim",
    steam_app_id: "72850",
    nexus_name: "skyrim",
    steam_dir: "Skyrim",
    data_subdir: "Data",
    config_file: "Skyrim.ini",
    my_games_dir: "Skyrim",
    app_data_dir: "Skyrim",
    archive_ext: "bsa",
};

const SKYRIM_SE: GameSpec = GameSpec {
    id: GameId::SkyrimSe,
    name: "The Elder Scrolls V: Skyrim Special Edition",
    steam_app_id: "489830",
    nexus_name: "skyrimspecialedition",
    steam_dir: "Skyrim Special Edition",
    data_subdir: "Data",
    config_file: "Skyrim.ini",
    my_games_dir: "Skyrim Special Edition",
    app_data_dir: "Skyrim Special Edition",
    archive_ext: "bsa",
};

const GAMES: &[GameSpec] = &[FALLOUT76, FALLOUT4, FALLOUT3, FALLOUT_NV, SKYRIM, SKYRIM_SE];

impl GameId {
    pub fn spec(self) -> &'static GameSpec {
        match self {
            GameId::Fallout76 => &FALLOUT76,
            GameId::Fallout4 => &FALLOUT4,
            GameId::Fallout3 => &FALLOUT3,
            GameId::FalloutNv => &FALLOUT_NV,
            GameId::Skyrim => &SKYRIM,
            GameId::SkyrimSe => &SKYRIM_SE,
        }
    }

    pub fn display_name(self) -> &'static str {
        self.spec().name
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameId::Fallout76 => "fallout76",
            GameId::Fallout4 => "fallout4",
            GameId::Fallout3 => "fallout3",
            GameId::FalloutNv => "falloutnv",
            GameId::Skyrim => "skyrim",
            GameId::SkyrimSe => "skyrimse",
        }
    }

    pub fn parse(value: &str) -> ModResult<Self> {
        supported_games()
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| ModError::UnknownGame {
                id: value.to_string(),
            })
    }

    pub fn from_nexus_name(value: &str) -> ModResult<Self> {
        GAMES
            .iter()
            .find(|spec| spec.nexus_name.eq_ignore_ascii_case(value))
            .map(|spec| spec.id)
            .ok_or_else(|| ModError::UnknownGame {
                id: value.to_string(),
            })
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn supported_games() -> Vec<GameId> {
    GAMES.iter().map(|spec| spec.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_game_has_a_spec_entry() {
        for id in supported_games() {
            assert_eq!(id.spec().id, id);
        }
    }

    #[test]
    fn parse_accepts_ids_and_rejects_unknown() {
        assert_eq!(GameId::parse("Fallout4").unwrap(), GameId::Fallout4);
        assert_eq!(GameId::parse("skyrimse").unwrap(), GameId::SkyrimSe);
        assert!(matches!(
            GameId::parse("morrowind"),
            Err(ModError::UnknownGame { .. })
        ));
    }

    #[test]
    fn nexus_names_map_back_to_games() {
        assert_eq!(
            GameId::from_nexus_name("newvegas").unwrap(),
            GameId::FalloutNv
        );
        assert_eq!(GameId::Fallout76.spec().archive_ext, "ba2");
        assert_eq!(GameId::Skyrim.spec().archive_ext, "bsa");
    }

    #[test]
    fn serialized_ids_match_config_names() {
        for id in supported_games() {
            let raw = serde_json::to_string(&id).unwrap();
            assert_eq!(raw, format!("\"{}\"", id.as_str()));
        }
    }
}
