//! Bundle download: the source-fetch boundary and its GitHub implementation.
//!
//! Each skill lives in its own `<owner>/skill_<Name>` repository; the
//! configured update channel is the branch or tag the tarball is taken from.

use std::path::{Component, Path, PathBuf};

use {
    alder_config::AlderConfig,
    async_trait::async_trait,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, info, warn},
};

use crate::error::{Error, Result};

const USER_AGENT: &str = concat!("alder-skills/", env!("CARGO_PKG_VERSION"));

/// Downloads a skill bundle into a directory.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch `skill` and unpack it into `dest`, which is created if missing.
    async fn fetch(&self, skill: &str, dest: &Path) -> Result<()>;
}

/// Map a non-success HTTP status to the fetch error taxonomy.
pub fn status_error(skill: &str, status: StatusCode) -> Option<Error> {
    if status.is_success() {
        return None;
    }
    let skill = skill.to_string();
    Some(match status {
        StatusCode::UNAUTHORIZED => Error::FetchAuthFailed { skill },
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => Error::FetchRateLimited { skill },
        StatusCode::NOT_FOUND => Error::FetchNotFound { skill },
        other => Error::message(format!("fetching '{skill}' failed: HTTP {other}")),
    })
}

/// HTTP access to the skill repositories.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
    raw_base: String,
    owner: String,
    channel: String,
    auth: Option<(String, Secret<String>)>,
}

impl GithubClient {
    pub fn new(owner: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: "https://api.github.com".into(),
            raw_base: "https://raw.githubusercontent.com".into(),
            owner: owner.into(),
            channel: channel.into(),
            auth: None,
        }
    }

    pub fn from_config(config: &AlderConfig) -> Self {
        let client = Self::new(
            config.skills.catalog_owner.clone(),
            config.skills.update_channel.clone(),
        );
        match config.github.basic_auth() {
            Some((user, token)) => client.with_auth(user, Secret::new(token.to_string())),
            None => client,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, token: Secret<String>) -> Self {
        self.auth = Some((username.into(), token));
        self
    }

    /// Point at a different API and raw-content host (enterprise installs, tests).
    pub fn with_base_urls(mut self, api: impl Into<String>, raw: impl Into<String>) -> Self {
        self.api_base = api.into().trim_end_matches('/').to_string();
        self.raw_base = raw.into().trim_end_matches('/').to_string();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn repository(&self, skill: &str) -> String {
        format!("{}/skill_{skill}", self.owner)
    }

    pub fn tarball_url(&self, skill: &str) -> String {
        format!(
            "{}/repos/{}/tarball/{}",
            self.api_base,
            self.repository(skill),
            self.channel
        )
    }

    pub fn raw_url(&self, skill: &str, file: &str) -> String {
        format!(
            "{}/{}/{}/{file}",
            self.raw_base,
            self.repository(skill),
            self.channel
        )
    }

    /// GET `url`, mapping error statuses to fetch errors for `skill`.
    pub async fn get(&self, skill: &str, url: &str) -> Result<reqwest::Response> {
        let mut request = self.http.get(url).header("User-Agent", USER_AGENT);
        if let Some((user, token)) = &self.auth {
            request = request.basic_auth(user, Some(token.expose_secret()));
        }
        debug!(skill, url, "requesting skill source");
        let response = request.send().await?;
        if let Some(err) = status_error(skill, response.status()) {
            return Err(err);
        }
        Ok(response)
    }
}

/// Fetches repository tarballs from GitHub.
pub struct GithubFetcher {
    client: GithubClient,
}

impl GithubFetcher {
    pub fn new(client: GithubClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for GithubFetcher {
    async fn fetch(&self, skill: &str, dest: &Path) -> Result<()> {
        let url = self.client.tarball_url(skill);
        let bytes = self.client.get(skill, &url).await?.bytes().await?;
        extract_tarball(bytes.to_vec(), dest.to_path_buf()).await?;
        info!(skill, channel = self.client.channel(), "fetched skill bundle");
        Ok(())
    }
}

/// Unpack a gzip tarball into `target`, dropping the archive's top-level directory.
pub async fn extract_tarball(bytes: Vec<u8>, target: PathBuf) -> Result<()> {
    tokio::fs::create_dir_all(&target).await?;
    tokio::task::spawn_blocking(move || unpack(&bytes, &target))
        .await
        .map_err(|e| Error::external("archive extraction task failed", e))?
}

fn unpack(bytes: &[u8], target: &Path) -> Result<()> {
    let canonical_target = std::fs::canonicalize(target)?;
    let decoder = flate2::read::GzDecoder::new(bytes);
    let mut archive = tar::Archive::new(decoder);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            warn!(target = %target.display(), "skipping symlink/hardlink archive entry");
            continue;
        }

        let path = entry.path()?.into_owned();
        let Some(stripped) = sanitize_archive_path(&path)? else {
            continue;
        };

        let dest = target.join(&stripped);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
            if !std::fs::canonicalize(parent)?.starts_with(&canonical_target) {
                return Err(Error::message("archive entry escaped bundle directory"));
            }
        }

        if dest.exists() && std::fs::symlink_metadata(&dest)?.file_type().is_symlink() {
            return Err(Error::message("archive entry resolves to symlink destination"));
        }

        if kind.is_dir() {
            std::fs::create_dir_all(&dest)?;
            continue;
        }
        entry.unpack(&dest)?;
    }
    Ok(())
}

fn sanitize_archive_path(path: &Path) -> Result<Option<PathBuf>> {
    let stripped: PathBuf = path.components().skip(1).collect();
    if stripped.as_os_str().is_empty() {
        return Ok(None);
    }

    for component in stripped.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::message(format!(
                    "archive contains unsafe path component: {}",
                    path.display()
                )));
            },
        }
    }

    Ok(Some(stripped))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, flate2::write::GzEncoder, rstest::rstest};

    fn tarball(files: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), flate2::Compression::fast()));
        for (path, body) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(body.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, body.as_bytes()).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[rstest]
    #[case(StatusCode::UNAUTHORIZED, "fetch_auth_failed")]
    #[case(StatusCode::FORBIDDEN, "fetch_rate_limited")]
    #[case(StatusCode::TOO_MANY_REQUESTS, "fetch_rate_limited")]
    #[case(StatusCode::NOT_FOUND, "fetch_not_found")]
    #[case(StatusCode::BAD_GATEWAY, "message")]
    fn maps_http_statuses(#[case] status: StatusCode, #[case] kind: &str) {
        assert_eq!(status_error("Lights", status).unwrap().kind(), kind);
    }

    #[test]
    fn success_is_not_an_error() {
        assert!(status_error("Lights", StatusCode::OK).is_none());
    }

    #[test]
    fn urls_follow_repository_convention() {
        let client = GithubClient::new("alder-skills", "1.0")
            .with_base_urls("http://api.local/", "http://raw.local");
        assert_eq!(
            client.tarball_url("Lights"),
            "http://api.local/repos/alder-skills/skill_Lights/tarball/1.0"
        );
        assert_eq!(
            client.raw_url("Lights", "Lights.install"),
            "http://raw.local/alder-skills/skill_Lights/1.0/Lights.install"
        );
    }

    #[test]
    fn sanitize_rejects_parent_dir() {
        assert!(sanitize_archive_path(Path::new("root/../../etc/passwd")).is_err());
    }

    #[test]
    fn sanitize_strips_top_level_dir() {
        let sanitized = sanitize_archive_path(Path::new("root/dialogTemplate/en.json"))
            .unwrap()
            .unwrap();
        assert_eq!(sanitized, PathBuf::from("dialogTemplate/en.json"));
        assert!(sanitize_archive_path(Path::new("root")).unwrap().is_none());
    }

    #[tokio::test]
    async fn extracts_bundle_without_top_level_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = tarball(&[
            ("skill_Lights-abc/Lights.install", "{}"),
            ("skill_Lights-abc/talks/en.json", "{\"hi\": []}"),
        ]);
        let target = tmp.path().join("Lights");
        extract_tarball(bytes, target.clone()).await.unwrap();
        assert!(target.join("Lights.install").is_file());
        assert!(target.join("talks/en.json").is_file());
    }
}
