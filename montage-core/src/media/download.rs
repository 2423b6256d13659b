use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};
use url::Url;

use crate::config::{LimitsSection, MediaSection};

use super::probe::SourceKind;
use super::tool::{run_tool, status_error};
use super::{MediaError, MediaResult};

/// One way of fetching a source video. Strategies are tried in order;
/// the first success wins and the last failure is reported.
#[derive(Debug, Clone)]
pub enum DownloadStrategy {
    /// yt-dlp with a capped format, for video-platform URLs.
    YtDlp { format: String },
    /// curl -L -f, the workhorse for direct and cloud-storage links.
    Curl,
    /// In-process streaming fetch, kept as the last resort when the
    /// external tools are unavailable.
    Http,
}

impl DownloadStrategy {
    fn applies_to(&self, kind: SourceKind) -> bool {
        match self {
            DownloadStrategy::YtDlp { .. } => kind == SourceKind::VideoPlatform,
            DownloadStrategy::Curl | DownloadStrategy::Http => kind != SourceKind::VideoPlatform,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            DownloadStrategy::YtDlp { .. } => "yt-dlp",
            DownloadStrategy::Curl => "curl",
            DownloadStrategy::Http => "http",
        }
    }
}

pub fn default_strategies() -> Vec<DownloadStrategy> {
    vec![
        DownloadStrategy::YtDlp {
            format: "best[height<=720]".into(),
        },
        DownloadStrategy::Curl,
        DownloadStrategy::Http,
    ]
}

/// Seam for the pipeline: production code uses [`Downloader`], tests
/// substitute a fake that writes fixture bytes.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> MediaResult<()>;
}

pub struct Downloader {
    strategies: Vec<DownloadStrategy>,
    ytdlp: String,
    curl: String,
    client: Client,
    timeout: Duration,
}

impl Downloader {
    pub fn new(media: &MediaSection, limits: &LimitsSection) -> MediaResult<Self> {
        let client = Client::builder()
            .user_agent("montage-downloader/1.0")
            .build()
            .map_err(|err| MediaError::Download {
                url: String::new(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            strategies: default_strategies(),
            ytdlp: media.ytdlp_binary.clone(),
            curl: media.curl_binary.clone(),
            client,
            timeout: Duration::from_secs(limits.download_timeout_seconds),
        })
    }

    pub fn with_strategies(mut self, strategies: Vec<DownloadStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    /// Fetches a source to a local path, trying each applicable strategy
    /// in order until one succeeds.
    pub async fn fetch(&self, url: &str, dest: &Path) -> MediaResult<()> {
        let url = normalize_source_url(url);
        let kind = SourceKind::classify(&url);
        let mut last_error = MediaError::Download {
            url: url.clone(),
            reason: "no applicable download strategy".into(),
        };
        for strategy in self
            .strategies
            .iter()
            .filter(|strategy| strategy.applies_to(kind))
        {
            match self.attempt(strategy, &url, dest).await {
                Ok(()) if downloaded_something(dest).await => {
                    info!(
                        target: "downloader",
                        url = %url,
                        strategy = strategy.name(),
                        "source downloaded"
                    );
                    return Ok(());
                }
                Ok(()) => {
                    last_error = MediaError::Download {
                        url: url.clone(),
                        reason: format!("{} produced an empty file", strategy.name()),
                    };
                    warn!(target: "downloader", url = %url, strategy = strategy.name(), "empty download, trying next strategy");
                }
                Err(err) => {
                    warn!(
                        target: "downloader",
                        url = %url,
                        strategy = strategy.name(),
                        "download attempt failed: {err}"
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    async fn attempt(
        &self,
        strategy: &DownloadStrategy,
        url: &str,
        dest: &Path,
    ) -> MediaResult<()> {
        match strategy {
            DownloadStrategy::YtDlp { format } => {
                let mut command = Command::new(&self.ytdlp);
                command.args(["-f", format, "-o"]).arg(dest).arg(url);
                let output = run_tool("yt-dlp", &mut command, self.timeout).await?;
                if !output.status.success() {
                    return Err(MediaError::Download {
                        url: url.to_string(),
                        reason: status_error("yt-dlp", &output),
                    });
                }
                Ok(())
            }
            DownloadStrategy::Curl => {
                let mut command = Command::new(&self.curl);
                command.args(["-L", "-f", url, "-o"]).arg(dest);
                let output = run_tool("curl", &mut command, self.timeout).await?;
                if !output.status.success() {
                    return Err(MediaError::Download {
                        url: url.to_string(),
                        reason: status_error("curl", &output),
                    });
                }
                Ok(())
            }
            DownloadStrategy::Http => self.fetch_to_file(url, dest).await,
        }
    }

    async fn fetch_to_file(&self, url: &str, dest: &Path) -> MediaResult<()> {
        let send = self.client.get(url).send();
        let response = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| MediaError::Timeout {
                tool: "http".into(),
                seconds: self.timeout.as_secs(),
            })?
            .and_then(|response| response.error_for_status())
            .map_err(|err| MediaError::Download {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| MediaError::io(dest, source))?;
        let mut response = response;
        while let Some(chunk) = response.chunk().await.map_err(|err| MediaError::Download {
            url: url.to_string(),
            reason: err.to_string(),
        })? {
            file.write_all(&chunk)
                .await
                .map_err(|source| MediaError::io(dest, source))?;
        }
        file.flush()
            .await
            .map_err(|source| MediaError::io(dest, source))?;
        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for Downloader {
    async fn fetch(&self, url: &str, dest: &Path) -> MediaResult<()> {
        Downloader::fetch(self, url, dest).await
    }
}

async fn downloaded_something(dest: &Path) -> bool {
    tokio::fs::metadata(dest)
        .await
        .map(|meta| meta.len() > 0)
        .unwrap_or(false)
}

/// Rewrites share links into directly fetchable URLs and expands bare
/// video ids into full watch URLs.
pub fn normalize_source_url(raw: &str) -> String {
    if !raw.starts_with("http") && raw.len() > 10 && !raw.contains('/') {
        return format!("https://www.youtube.com/watch?v={raw}");
    }
    if let Ok(mut url) = Url::parse(raw) {
        if url
            .host_str()
            .map(|host| host.ends_with("dropbox.com"))
            .unwrap_or(false)
        {
            let rewritten: Vec<(String, String)> = url
                .query_pairs()
                .map(|(key, value)| {
                    if key == "dl" && value == "0" {
                        ("raw".to_string(), "1".to_string())
                    } else {
                        (key.into_owned(), value.into_owned())
                    }
                })
                .collect();
            url.query_pairs_mut().clear().extend_pairs(rewritten);
            return url.to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropbox_share_links_become_raw() {
        let normalized =
            normalize_source_url("https://www.dropbox.com/s/abc/testclip.mp4?dl=0");
        assert!(normalized.contains("raw=1"));
        assert!(!normalized.contains("dl=0"));
    }

    #[test]
    fn bare_video_ids_expand_to_watch_urls() {
        assert_eq!(
            normalize_source_url("dQw4w9WgXcQ5"),
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ5"
        );
    }

    #[test]
    fn regular_urls_pass_through() {
        assert_eq!(
            normalize_source_url("https://cdn.example.com/a.mp4"),
            "https://cdn.example.com/a.mp4"
        );
    }

    #[test]
    fn strategies_filter_by_source_kind() {
        let strategies = default_strategies();
        let platform: Vec<&'static str> = strategies
            .iter()
            .filter(|s| s.applies_to(SourceKind::VideoPlatform))
            .map(|s| s.name())
            .collect();
        assert_eq!(platform, vec!["yt-dlp"]);
        let direct: Vec<&'static str> = strategies
            .iter()
            .filter(|s| s.applies_to(SourceKind::Direct))
            .map(|s| s.name())
            .collect();
        assert_eq!(direct, vec!["curl", "http"]);
    }
}
