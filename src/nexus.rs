use crate::{error::ModResult, game::GameId};
use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, info};
use url::Url;

const API_BASE: &str = "https://api.nexusmods.com/v1";
const USER_AGENT: &str = concat!("vaultlink/", env!("CARGO_PKG_VERSION"));

/// A parsed `nxm://<game>/mods/<mod>/files/<file>?key=..&expires=..` link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NxmLink {
    pub game: String,
    pub mod_id: String,
    pub file_id: String,
    pub key: Option<String>,
    pub expires: Option<String>,
}

impl NxmLink {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim()).with_context(|| format!("parse nxm link {raw:?}"))?;
        if url.scheme() != "nxm" {
            bail!("invalid link scheme: expected nxm, got {}", url.scheme());
        }
        let game = url
            .host_str()
            .filter(|host| !host.is_empty())
            .with_context(|| format!("nxm link has no game: {raw}"))?
            .to_ascii_lowercase();

        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|part| !part.is_empty()).collect())
            .unwrap_or_default();
        let (mod_id, file_id) = match segments.as_slice() {
            ["mods", mod_id, "files", file_id, ..] => (mod_id.to_string(), file_id.to_string()),
            _ => bail!("invalid nxm link path: {}", url.path()),
        };

        let mut key = None;
        let mut expires = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "key" => key = Some(value.into_owned()),
                "expires" => expires = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(Self {
            game,
            mod_id,
            file_id,
            key,
            expires,
        })
    }

    pub fn game_id(&self) -> ModResult<GameId> {
        GameId::from_nexus_name(&self.game)
    }

    pub fn is_nxm(raw: &str) -> bool {
        raw.trim_start().to_ascii_lowercase().starts_with("nxm://")
    }
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}

pub struct NexusClient {
    agent: ureq::Agent,
    api_key: String,
}

impl NexusClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(10))
            .build();
        Self {
            agent,
            api_key: api_key.into(),
        }
    }

    /// Returns the account name the key belongs to.
    pub fn validate_api_key(&self) -> Result<String> {
        let response: ValidateResponse = self
            .get_json(&format!("{API_BASE}/users/validate.json"))
            .context("validate api key")?;
        Ok(response.name)
    }

    pub fn download_link(&self, link: &NxmLink) -> Result<String> {
        let base = format!(
            "{API_BASE}/games/{}/mods/{}/files/{}/download_link.json",
            link.game, link.mod_id, link.file_id
        );
        let mut params = Vec::new();
        if let Some(key) = &link.key {
            params.push(("key", key.as_str()));
        }
        if let Some(expires) = &link.expires {
            params.push(("expires", expires.as_str()));
        }
        let url = Url::parse_with_params(&base, &params).context("build download link url")?;
        let links: Vec<DownloadLink> = self
            .get_json(url.as_str())
            .context("request download link")?;
        links
            .into_iter()
            .next()
            .map(|link| link.uri)
            .context("no download links returned")
    }

    /// Streams `url` into `dest_dir`, reporting `(written, total)` as it goes.
    pub fn download_file(
        &self,
        url: &str,
        dest_dir: &Path,
        mut on_progress: impl FnMut(u64, Option<u64>),
    ) -> Result<PathBuf> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .context("download mod file")?;
        let total = response
            .header("Content-Length")
            .and_then(|value| value.trim().parse::<u64>().ok());
        let file_name = response
            .header("Content-Disposition")
            .and_then(filename_from_disposition)
            .or_else(|| filename_from_url(url))
            .context("cannot determine download file name")?;

        fs::create_dir_all(dest_dir).context("create download dir")?;
        let dest = dest_dir.join(&file_name);
        let partial = dest_dir.join(format!("{file_name}.part"));
        let mut reader = response.into_reader();
        let mut file = File::create(&partial).context("create download file")?;
        let written = match copy_with_progress(&mut reader, &mut file, total, &mut on_progress) {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&partial);
                return Err(err).context("write download file");
            }
        };
        drop(file);
        fs::rename(&partial, &dest).context("finalize download")?;
        info!(path = ?dest, bytes = written, "downloaded mod file");
        Ok(dest)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!(url, "nexus api request");
        let response = match self
            .agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .set("apikey", &self.api_key)
            .set("accept", "application/json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                bail!("nexus api returned {code} {}", response.status_text())
            }
            Err(err) => return Err(err).context("nexus api request"),
        };
        response.into_json().context("decode nexus api response")
    }
}

fn copy_with_progress(
    reader: &mut impl Read,
    writer: &mut impl Write,
    total: Option<u64>,
    on_progress: &mut impl FnMut(u64, Option<u64>),
) -> io::Result<u64> {
    let mut buffer = [0u8; 64 * 1024];
    let mut written = 0u64;
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        writer.write_all(&buffer[..read])?;
        written += read as u64;
        on_progress(written, total);
    }
    writer.flush()?;
    Ok(written)
}

fn filename_from_disposition(header: &str) -> Option<String> {
    header
        .split(';')
        .map(str::trim)
        .find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("filename")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .and_then(|name| sanitize_file_name(&name))
}

fn filename_from_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    let last = url.path_segments()?.filter(|part| !part.is_empty()).last()?;
    sanitize_file_name(last)
}

fn sanitize_file_name(name: &str) -> Option<String> {
    let name = name.split('?').next().unwrap_or_default();
    Path::new(name)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.is_empty() && name != "." && name != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_link() {
        let link = NxmLink::parse(
            "nxm://fallout4/mods/12345/files/67890?key=my-secret-key&expires=1234567890",
        )
        .unwrap();
        assert_eq!(
            link,
            NxmLink {
                game: "fallout4".to_string(),
                mod_id: "12345".to_string(),
                file_id: "67890".to_string(),
                key: Some("my-secret-key".to_string()),
                expires: Some("1234567890".to_string()),
            }
        );
        assert_eq!(link.game_id().unwrap(), GameId::Fallout4);
    }

    #[test]
    fn key_and_expiry_are_optional() {
        let link = NxmLink::parse("nxm://Fallout76/mods/1/files/2").unwrap();
        assert_eq!(link.game, "fallout76");
        assert_eq!(link.key, None);
        assert_eq!(link.expires, None);
    }

    #[test]
    fn rejects_other_schemes_and_paths() {
        assert!(NxmLink::parse("https://fallout4/mods/1/files/2").is_err());
        assert!(NxmLink::parse("nxm://fallout4/collections/abc").is_err());
        assert!(NxmLink::parse("nxm://fallout4/mods/1").is_err());
        assert!(NxmLink::parse("not a url").is_err());
    }

    #[test]
    fn recognises_nxm_arguments() {
        assert!(NxmLink::is_nxm("nxm://fallout76/mods/1/files/2"));
        assert!(NxmLink::is_nxm("NXM://x"));
        assert!(!NxmLink::is_nxm("install"));
    }

    #[test]
    fn filename_prefers_content_disposition() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="Better Lights-1-0.zip""#),
            Some("Better Lights-1-0.zip".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=../../evil.7z"),
            Some("evil.7z".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn filename_falls_back_to_url_basename() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/files/mod-1-2.7z?md5=abc&expires=9"),
            Some("mod-1-2.7z".to_string())
        );
        assert_eq!(filename_from_url("https://cdn.example.com/"), None);
    }

    #[test]
    fn progress_reports_running_totals() {
        let payload = vec![7u8; 150 * 1024];
        let mut out = Vec::new();
        let mut seen = Vec::new();
        let written = copy_with_progress(
            &mut payload.as_slice(),
            &mut out,
            Some(payload.len() as u64),
            &mut |done, total| seen.push((done, total)),
        )
        .unwrap();
        assert_eq!(written, payload.len() as u64);
        assert_eq!(out, payload);
        assert_eq!(seen.last(), Some(&(payload.len() as u64, Some(payload.len() as u64))));
        assert!(seen.windows(2).all(|pair| pair[0].0 < pair[1].0));
    }
}
