use crate::client::{ensure_success, require, ClientError};
use crate::config::OneDriveConfig;
use crate::traits::FileSource;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

const SERVICE: &str = "onedrive";

/// A file fetched from the source folder into the local download directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    /// File name as listed by OneDrive, extension included
    pub name: String,
    /// Where the bytes were written locally
    pub path: PathBuf,
}

/// One page of a Graph `children` listing
#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveItem {
    name: String,
    /// Pre-authenticated download URL; absent for folders
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

/// Downloads the assets of one OneDrive folder through Microsoft Graph
pub struct OneDriveSource {
    http: Client,
    config: OneDriveConfig,
}

impl OneDriveSource {
    pub fn new(http: Client, config: OneDriveConfig) -> Self {
        info!(
            download_dir = %config.download_dir,
            "OneDrive source initialized"
        );

        Self { http, config }
    }

    /// List every downloadable item of the folder, following `@odata.nextLink`
    async fn list_items(&self, base_url: &str, token: &str) -> Result<Vec<DriveItem>, ClientError> {
        let mut items = Vec::new();
        let mut next = Some(base_url.to_string());

        while let Some(url) = next {
            let response = self
                .http
                .get(&url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(ClientError::http(SERVICE))?;

            let page: ChildrenPage = ensure_success(SERVICE, response)
                .await?
                .json()
                .await
                .map_err(ClientError::http(SERVICE))?;

            debug!(url = %url, items = page.value.len(), "Fetched OneDrive listing page");

            items.extend(page.value);
            next = page.next_link;
        }

        Ok(items)
    }

    /// Fetch one item to `path`.
    ///
    /// Bytes land in a sibling `.part` file that is renamed over `path` only
    /// once the body is complete, so an interrupted transfer never leaves a
    /// truncated file under the final name.
    async fn fetch_to(&self, download_url: &str, path: &Path) -> Result<u64, ClientError> {
        let partial = partial_path(path);

        match self.stream_into(download_url, &partial).await {
            Ok(written) => {
                tokio::fs::rename(&partial, path)
                    .await
                    .map_err(ClientError::io(path))?;
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(
                            path = %partial.display(),
                            error = %cleanup,
                            "Failed to remove partial download"
                        );
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_into(&self, download_url: &str, path: &Path) -> Result<u64, ClientError> {
        let response = self
            .http
            .get(download_url)
            .send()
            .await
            .map_err(ClientError::http(SERVICE))?;
        let response = ensure_success(SERVICE, response).await?;

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(ClientError::io(path))?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(ClientError::http(SERVICE))?;
            file.write_all(&chunk).await.map_err(ClientError::io(path))?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(ClientError::io(path))?;
        Ok(written)
    }
}

#[async_trait]
impl FileSource for OneDriveSource {
    fn has_credentials(&self) -> bool {
        self.config
            .access_token
            .as_deref()
            .is_some_and(|token| !token.is_empty())
    }

    #[instrument(skip(self))]
    async fn download_all(&self) -> Result<Vec<DownloadedFile>, ClientError> {
        let token = require(&self.config.access_token, "ONEDRIVE_ACCESS_TOKEN")?;
        let base_url = require(&self.config.base_url, "ONEDRIVE_BASE_URL")?;

        let items = self.list_items(base_url, token).await?;

        let download_dir = PathBuf::from(&self.config.download_dir);
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(ClientError::io(&download_dir))?;

        let mut downloaded = Vec::with_capacity(items.len());
        for item in items {
            let Some(download_url) = item.download_url else {
                debug!(name = %item.name, "Skipping folder entry without download URL");
                continue;
            };

            let Some(local_name) = local_file_name(&item.name) else {
                debug!(name = %item.name, "Skipping entry with unusable file name");
                continue;
            };
            let path = download_dir.join(local_name);

            if already_downloaded(&path).await {
                debug!(name = %item.name, path = %path.display(), "Already present locally, not fetching");
            } else {
                let bytes = self.fetch_to(&download_url, &path).await?;
                info!(name = %item.name, size_bytes = bytes, "Downloaded file from OneDrive");
            }

            downloaded.push(DownloadedFile {
                name: item.name,
                path,
            });
        }

        Ok(downloaded)
    }
}

/// Final path component of a listed name, so a name can never escape the
/// download directory
fn local_file_name(name: &str) -> Option<&str> {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
}

/// `promo.mp4` -> `promo.mp4.part`, in the same directory
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

async fn already_downloaded(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}
