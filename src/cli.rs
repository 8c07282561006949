use crate::{
    app::{App, NxmOutcome},
    archive_list, desktop,
    game::{supported_games, GameId},
    instance::{self, InstanceServer},
    lifecycle::Direction,
    nexus::NxmLink,
    plugins,
    registry::ModEntry,
    vfs::SyncReport,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct GlobalOptions {
    format: OutputFormat,
    game: Option<String>,
    verbosity: u8,
}

#[derive(Debug, PartialEq, Eq)]
enum PathKind {
    Game,
    Prefix,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    ModsList,
    Install { path: PathBuf, name: Option<String> },
    Activate(String),
    Deactivate(String),
    Uninstall(String),
    Move { name: String, direction: Direction },
    Sync,
    Archives,
    PluginsList,
    PluginsAdd(String),
    PluginsRemove(String),
    Paths,
    Game(Option<String>),
    SetPath { kind: PathKind, game: String, path: PathBuf },
    Login(String),
    Listen,
    RegisterHandler,
    Nxm(String),
    Help,
    Version,
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, tokens) = parse_global_options(&args)?;
    crate::init_logging(global.verbosity);
    let command = parse_command(&tokens)?;

    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("vaultlink v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::RegisterHandler => {
            let path = desktop::register_protocol_handler()?;
            println!("Registered nxm:// handler ({})", path.display());
            Ok(())
        }
        CliCommand::Nxm(url) if instance::forward(&url) => {
            println!("Sent link to the running vaultlink instance");
            Ok(())
        }
        command => {
            let mut app = App::initialize()?;
            if let Some(game) = &global.game {
                app.game_id = GameId::parse(game)?;
            }
            run_command(&mut app, command, global.format)
        }
    }
}

fn parse_global_options(args: &[String]) -> Result<(GlobalOptions, Vec<String>)> {
    let mut format = OutputFormat::Text;
    let mut game = None;
    let mut verbosity = 0;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if arg == "--format" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow::anyhow!("--format requires a value"))?;
            format = OutputFormat::parse(value)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {value}"))?;
            continue;
        }
        if let Some(value) = arg.strip_prefix("--game=") {
            game = Some(value.to_string());
            continue;
        }
        if arg == "--game" {
            let value = iter
                .next()
                .ok_or_else(|| anyhow::anyhow!("--game requires a value"))?;
            game = Some(value.to_string());
            continue;
        }
        if arg == "--verbose" {
            verbosity = verbosity.max(1);
            continue;
        }
        if let Some(flags) = arg.strip_prefix('-') {
            if !flags.is_empty() && flags.chars().all(|ch| ch == 'v') {
                verbosity = flags.len().min(2) as u8;
                continue;
            }
        }
        tokens.push(arg.to_string());
    }
    Ok((
        GlobalOptions {
            format,
            game,
            verbosity,
        },
        tokens,
    ))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let arg = |index: usize, what: &str| -> Result<String> {
        tokens
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{head} requires {what}"))
    };

    let command = match head.as_str() {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "mods" => match tokens.get(1).map(String::as_str).unwrap_or("list") {
            "list" => CliCommand::ModsList,
            other => bail!("Unknown mods command: {other} (use 'list')"),
        },
        "install" => {
            let path = PathBuf::from(arg(1, "a file or directory")?);
            let mut name = None;
            let mut iter = tokens.iter().skip(2);
            while let Some(value) = iter.next() {
                if let Some(value) = value.strip_prefix("--name=") {
                    name = Some(value.to_string());
                } else if value == "--name" {
                    name = Some(
                        iter.next()
                            .cloned()
                            .ok_or_else(|| anyhow::anyhow!("--name requires a value"))?,
                    );
                } else {
                    bail!("Unexpected argument: {value}");
                }
            }
            CliCommand::Install { path, name }
        }
        "activate" => CliCommand::Activate(arg(1, "a mod name")?),
        "deactivate" => CliCommand::Deactivate(arg(1, "a mod name")?),
        "uninstall" => CliCommand::Uninstall(arg(1, "a mod name")?),
        "move" => {
            let name = arg(1, "a mod name")?;
            let direction = match arg(2, "a direction (up|down)")?.as_str() {
                "up" => Direction::Up,
                "down" => Direction::Down,
                other => bail!("Unknown direction: {other} (use 'up' or 'down')"),
            };
            CliCommand::Move { name, direction }
        }
        "sync" => CliCommand::Sync,
        "archives" => CliCommand::Archives,
        "plugins" => match tokens.get(1).map(String::as_str).unwrap_or("list") {
            "list" => CliCommand::PluginsList,
            "add" => CliCommand::PluginsAdd(arg(2, "a plugin name")?),
            "remove" => CliCommand::PluginsRemove(arg(2, "a plugin name")?),
            other => bail!("Unknown plugins command: {other} (use 'list', 'add', or 'remove')"),
        },
        "paths" => CliCommand::Paths,
        "game" => CliCommand::Game(tokens.get(1).cloned()),
        "set-path" => {
            let kind = match arg(1, "'game' or 'prefix'")?.as_str() {
                "game" => PathKind::Game,
                "prefix" => PathKind::Prefix,
                other => bail!("Unknown path kind: {other} (use 'game' or 'prefix')"),
            };
            CliCommand::SetPath {
                kind,
                game: arg(2, "a game id")?,
                path: PathBuf::from(tokens.get(3).cloned().unwrap_or_default()),
            }
        }
        "login" => CliCommand::Login(arg(1, "an API key")?),
        "listen" => CliCommand::Listen,
        "register-handler" => CliCommand::RegisterHandler,
        value if NxmLink::is_nxm(value) => CliCommand::Nxm(value.to_string()),
        other => bail!("Unknown command: {other} (see 'vaultlink help')"),
    };
    Ok(command)
}

fn run_command(app: &mut App, command: CliCommand, format: OutputFormat) -> Result<()> {
    match command {
        CliCommand::ModsList => list_mods(app, format),
        CliCommand::Install { path, name } => {
            let entry = app.install_local(&path, name)?;
            println!("Installed {} (inactive)", entry.name);
            Ok(())
        }
        CliCommand::Activate(name) => {
            let report = app.lifecycle()?.activate(&name)?;
            println!("Activated {name}");
            print_sync_warnings(&report);
            Ok(())
        }
        CliCommand::Deactivate(name) => {
            app.lifecycle()?.deactivate(&name)?;
            println!("Deactivated {name}");
            Ok(())
        }
        CliCommand::Uninstall(name) => {
            app.lifecycle()?.uninstall(&name)?;
            println!("Uninstalled {name}");
            Ok(())
        }
        CliCommand::Move { name, direction } => {
            if app.lifecycle()?.move_mod(&name, direction)? {
                println!("Moved {name}");
            } else {
                println!("{name} is already at the edge of the load order");
            }
            Ok(())
        }
        CliCommand::Sync => {
            let report = app.lifecycle()?.rebuild()?;
            println!(
                "Synced: removed {} link(s), created {}",
                report.removed, report.created
            );
            print_sync_warnings(&report);
            Ok(())
        }
        CliCommand::Archives => {
            let paths = app.game_paths()?;
            let archives = archive_list::read_archive_list(&paths.custom_ini)?;
            print_list(&archives, format)
        }
        CliCommand::PluginsList => {
            let paths = app.game_paths()?;
            print_list(&plugins::read_plugins(&paths.plugins_txt)?, format)
        }
        CliCommand::PluginsAdd(plugin) => {
            let paths = app.game_paths()?;
            if plugins::add_plugin(&paths.plugins_txt, &plugin)? {
                println!("Added {plugin}");
            } else {
                println!("{plugin} is already listed");
            }
            Ok(())
        }
        CliCommand::PluginsRemove(plugin) => {
            let paths = app.game_paths()?;
            if plugins::remove_plugin(&paths.plugins_txt, &plugin)? {
                println!("Removed {plugin}");
            } else {
                println!("{plugin} was not listed");
            }
            Ok(())
        }
        CliCommand::Paths => list_paths(app, format),
        CliCommand::Game(None) => list_games(app, format),
        CliCommand::Game(Some(id)) => {
            let game = GameId::parse(&id)?;
            app.set_game(game)?;
            println!("Current game: {}", game.display_name());
            Ok(())
        }
        CliCommand::SetPath { kind, game, path } => {
            let game = GameId::parse(&game)?;
            let cleared = path.as_os_str().is_empty();
            match kind {
                PathKind::Game => app.set_game_path(game, path)?,
                PathKind::Prefix => app.set_prefix_path(game, path)?,
            }
            if cleared {
                println!("Cleared override; {game} paths will be auto-detected");
            } else {
                println!("Saved override for {game}");
            }
            Ok(())
        }
        CliCommand::Login(key) => {
            let user = app.login(&key)?;
            println!("Logged in as {user}");
            Ok(())
        }
        CliCommand::Listen => listen(app),
        CliCommand::Nxm(url) => handle_link(app, &url),
        CliCommand::RegisterHandler | CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

fn listen(app: &App) -> Result<()> {
    let (server, links) = InstanceServer::bind()?;
    println!(
        "Listening for nxm links on {} (Ctrl+C to stop)",
        server.path().display()
    );
    for url in links {
        if let Err(err) = handle_link(app, &url) {
            warn!(url = %url, error = %err, "failed to handle forwarded link");
            eprintln!("Error: {err:#}");
        }
    }
    Ok(())
}

fn handle_link(app: &App, url: &str) -> Result<()> {
    let mut stderr = io::stderr();
    let outcome = app.handle_nxm(url, confirm_update, |written, total| {
        let line = match total {
            Some(total) if total > 0 => {
                format!("\rDownloading... {:>3}%", written.saturating_mul(100) / total)
            }
            _ => format!("\rDownloading... {} KiB", written / 1024),
        };
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    });
    eprintln!();
    match outcome? {
        NxmOutcome::Installed(entry) => println!("Installed {} (inactive)", entry.name),
        NxmOutcome::Updated { replaced, entry } => {
            println!("Replaced {replaced} with {} (inactive)", entry.name)
        }
        NxmOutcome::AlreadyInstalled(entry) => {
            println!("{} is already installed", entry.name)
        }
        NxmOutcome::Declined => println!("Kept the installed version"),
    }
    Ok(())
}

fn confirm_update(existing: &ModEntry, link: &NxmLink) -> bool {
    print!(
        "{} (file {}) is installed. Replace it with file {}? [y/N] ",
        existing.name, existing.source_file_id, link.file_id
    );
    let _ = io::stdout().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_sync_warnings(report: &SyncReport) {
    for name in &report.replaced {
        eprintln!("Warning: {name} is provided by more than one active mod; the later one wins");
    }
}

fn print_list(items: &[String], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Text => {
            for item in items {
                println!("{item}");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ModListItem {
    order: usize,
    name: String,
    active: bool,
    mod_id: String,
    file_id: String,
    path: String,
    installed_at: Option<i64>,
}

fn list_mods(app: &App, format: OutputFormat) -> Result<()> {
    let mods = app
        .registry()
        .load(app.game_id)
        .context("load mod registry")?;
    let items: Vec<ModListItem> = mods
        .into_iter()
        .enumerate()
        .map(|(index, entry)| ModListItem {
            order: index + 1,
            active: entry.active,
            path: entry.path.display().to_string(),
            mod_id: entry.source_mod_id,
            file_id: entry.source_file_id,
            installed_at: entry.installed_at,
            name: entry.name,
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed for {}", app.game_id.display_name());
            }
            for item in items {
                let active = if item.active { "x" } else { " " };
                let installed = format_date_cell(item.installed_at);
                let source = if item.mod_id == crate::registry::LOCAL_SOURCE {
                    "local".to_string()
                } else {
                    format!("{}/{}", item.mod_id, item.file_id)
                };
                println!(
                    "{order:>3} [{active}] {installed} {source:<14} {name}",
                    order = item.order,
                    name = item.name
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct GameListItem {
    id: &'static str,
    name: &'static str,
    current: bool,
}

fn list_games(app: &App, format: OutputFormat) -> Result<()> {
    let items: Vec<GameListItem> = supported_games()
        .into_iter()
        .map(|game| GameListItem {
            id: game.as_str(),
            name: game.display_name(),
            current: game == app.game_id,
        })
        .collect();
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&items)?),
        OutputFormat::Text => {
            for item in items {
                let marker = if item.current { "*" } else { " " };
                println!("{marker} {:<10} {}", item.id, item.name);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    game: String,
    game_dir: Option<String>,
    data_dir: Option<String>,
    prefix_dir: Option<String>,
    custom_ini: Option<String>,
    plugins_txt: Option<String>,
    registry: String,
    mods_dir: String,
    config: String,
    error: Option<String>,
}

fn list_paths(app: &App, format: OutputFormat) -> Result<()> {
    let show = |path: &std::path::Path| Some(path.display().to_string());
    let mut output = PathsOutput {
        game: app.game_id.to_string(),
        game_dir: None,
        data_dir: None,
        prefix_dir: None,
        custom_ini: None,
        plugins_txt: None,
        registry: app.registry().path_for(app.game_id).display().to_string(),
        mods_dir: app.dirs.mods_dir(app.game_id).display().to_string(),
        config: app.dirs.config_file.display().to_string(),
        error: None,
    };
    match app.game_paths() {
        Ok(paths) => {
            output.game_dir = show(&paths.game_dir);
            output.data_dir = show(&paths.data_dir);
            output.prefix_dir = show(&paths.prefix_dir);
            output.custom_ini = show(&paths.custom_ini);
            output.plugins_txt = show(&paths.plugins_txt);
        }
        Err(err) => output.error = Some(err.to_string()),
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            let cell = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
            println!("Game: {}", output.game);
            println!("Game dir: {}", cell(&output.game_dir));
            println!("Data dir: {}", cell(&output.data_dir));
            println!("Prefix: {}", cell(&output.prefix_dir));
            println!("Custom INI: {}", cell(&output.custom_ini));
            println!("Plugins: {}", cell(&output.plugins_txt));
            println!("Registry: {}", output.registry);
            println!("Mods: {}", output.mods_dir);
            println!("Config: {}", output.config);
            if let Some(error) = output.error {
                println!("Warning: {error}");
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!("vaultlink v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  vaultlink mods list                     List installed mods in load order");
    println!("  vaultlink install <file|dir> [--name N]  Install a local mod (inactive)");
    println!("  vaultlink activate <name>               Activate a mod");
    println!("  vaultlink deactivate <name>             Deactivate a mod");
    println!("  vaultlink uninstall <name>              Remove a mod and its files");
    println!("  vaultlink move <name> up|down           Change load order");
    println!("  vaultlink sync                          Rebuild archive list and links");
    println!("  vaultlink archives                      Show the archive list");
    println!("  vaultlink plugins list|add|remove [p]   Manage plugins.txt");
    println!("  vaultlink paths                         Show detected paths");
    println!("  vaultlink game [id]                     Show or switch the current game");
    println!("  vaultlink set-path game|prefix <game> [path]");
    println!("                                          Override (or clear) a detected path");
    println!("  vaultlink login <api-key>               Store a Nexus API key");
    println!("  vaultlink listen                        Handle nxm links from other invocations");
    println!("  vaultlink register-handler              Register as the nxm:// handler");
    println!("  vaultlink nxm://...                     Download and install a Nexus file");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                    Output format for list commands");
    println!("  --game <id>                             Use another game for this command");
    println!("  -v, -vv                                 More log output (or set VAULTLINK_LOG)");
    println!("  -h, --help                              Show help");
    println!("  -V, --version                           Show version");
}

fn format_date_cell(value: Option<i64>) -> String {
    if let Some(value) = value {
        if let Some(formatted) = format_short_date(value) {
            return formatted;
        }
    }
    format_blank_date()
}

fn format_short_date(timestamp: i64) -> Option<String> {
    if timestamp <= 0 {
        return None;
    }
    let date = time::OffsetDateTime::from_unix_timestamp(timestamp).ok()?;
    let year = date.year();
    let month = date.month() as u8;
    let day = date.day();
    let locale = locale_hint();
    let formatted = if prefers_mdy(&locale) {
        format!("{month:02}-{day:02}-{year:04}")
    } else if prefers_ymd(&locale) {
        format!("{year:04}-{month:02}-{day:02}")
    } else {
        format!("{day:02}-{month:02}-{year:04}")
    };
    Some(formatted)
}

fn format_blank_date() -> String {
    if prefers_ymd(&locale_hint()) {
        "---- -- --".to_string()
    } else {
        "-- -- ----".to_string()
    }
}

fn locale_hint() -> String {
    std::env::var("LC_TIME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| std::env::var("LANG").ok())
        .unwrap_or_default()
        .to_ascii_uppercase()
}

fn prefers_mdy(locale: &str) -> bool {
    locale.contains("US") || locale.contains("PH")
}

fn prefers_ymd(locale: &str) -> bool {
    locale.contains("CN") || locale.contains("JP") || locale.contains("KR") || locale.contains("TW")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|value| value.to_string()).collect()
    }

    fn command(raw: &[&str]) -> Result<CliCommand> {
        let (_, tokens) = parse_global_options(&args(raw))?;
        parse_command(&tokens)
    }

    #[test]
    fn global_options_are_stripped_anywhere() {
        let (global, tokens) = parse_global_options(&args(&[
            "mods",
            "--format",
            "json",
            "list",
            "-vv",
            "--game=fallout4",
        ]))
        .unwrap();
        assert_eq!(global.format, OutputFormat::Json);
        assert_eq!(global.verbosity, 2);
        assert_eq!(global.game.as_deref(), Some("fallout4"));
        assert_eq!(tokens, args(&["mods", "list"]));
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(parse_global_options(&args(&["--format=yaml"])).is_err());
    }

    #[test]
    fn parses_lifecycle_commands() {
        assert_eq!(
            command(&["install", "/tmp/Foo.zip", "--name", "Foo"]).unwrap(),
            CliCommand::Install {
                path: PathBuf::from("/tmp/Foo.zip"),
                name: Some("Foo".to_string()),
            }
        );
        assert_eq!(
            command(&["activate", "Foo"]).unwrap(),
            CliCommand::Activate("Foo".to_string())
        );
        assert_eq!(
            command(&["move", "Foo", "down"]).unwrap(),
            CliCommand::Move {
                name: "Foo".to_string(),
                direction: Direction::Down,
            }
        );
        assert!(command(&["move", "Foo", "sideways"]).is_err());
        assert!(command(&["uninstall"]).is_err());
    }

    #[test]
    fn parses_configuration_commands() {
        assert_eq!(
            command(&["set-path", "prefix", "fallout76", "/pfx"]).unwrap(),
            CliCommand::SetPath {
                kind: PathKind::Prefix,
                game: "fallout76".to_string(),
                path: PathBuf::from("/pfx"),
            }
        );
        assert_eq!(
            command(&["set-path", "game", "skyrim"]).unwrap(),
            CliCommand::SetPath {
                kind: PathKind::Game,
                game: "skyrim".to_string(),
                path: PathBuf::new(),
            }
        );
        assert_eq!(command(&["game"]).unwrap(), CliCommand::Game(None));
        assert_eq!(command(&["plugins"]).unwrap(), CliCommand::PluginsList);
        assert_eq!(
            command(&["plugins", "remove", "Foo.esp"]).unwrap(),
            CliCommand::PluginsRemove("Foo.esp".to_string())
        );
    }

    #[test]
    fn bare_nxm_links_are_commands() {
        let link = "nxm://fallout76/mods/1/files/2?key=k&expires=1";
        assert_eq!(command(&[link]).unwrap(), CliCommand::Nxm(link.to_string()));
        assert_eq!(command(&[]).unwrap(), CliCommand::Help);
        assert!(command(&["frobnicate"]).is_err());
    }

    #[test]
    fn blank_dates_keep_the_column_width() {
        assert_eq!(format_date_cell(None).len(), 10);
        assert_eq!(format_date_cell(Some(1_700_000_000)).len(), 10);
    }
}
