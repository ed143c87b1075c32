//! The five-step sync run.
//!
//! ```text
//! OneDrive ──▶ Azure Blob ──▶ Vusion devices ──▶ backgrounds ──▶ KORONA tags
//!  (fatal)       (fatal)         (fatal)        (recoverable)   (recoverable)
//! ```
//!
//! Every step returns its outcome as a value. `SyncPipeline::run` looks up
//! the step's [`StepPolicy`] and either aborts the run with a [`RunError`]
//! or records the failure in the [`RunReport`] and moves on.

use crate::azure_blob::AzureBlobPublisher;
use crate::client::{build_http_client, ClientError};
use crate::config::Config;
use crate::korona::{KoronaClient, Tag};
use crate::onedrive::{DownloadedFile, OneDriveSource};
use crate::rate_limit::MinIntervalGate;
use crate::targeting::{DeviceTargeting, TargetingError};
use crate::traits::{BackgroundPublisher, BlobPublisher, DeviceDirectory, FileSource, TagRegistrar};
use crate::vusion::VusionRailClient;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum RunError {
    #[error("No OneDrive access token provided")]
    MissingAccessToken,

    #[error("Failed to download files from OneDrive: {0}")]
    Download(#[source] ClientError),

    #[error("No files were downloaded from OneDrive")]
    NoFiles,

    #[error("Failed to read downloaded file {file}: {source}")]
    ReadFile {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to upload file {file} to Azure Blob Storage: {source}")]
    Upload {
        file: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to fetch devices from Vusion Rail: {0}")]
    Devices(#[source] ClientError),

    #[error("No devices found in Vusion Rail")]
    NoDevices,

    #[error("Failed to update background for device {device_id} with {cache_id}: {source}")]
    Publish {
        device_id: String,
        cache_id: String,
        #[source]
        source: ClientError,
    },

    #[error("Failed to add {count} tag(s) to KORONA: {source}")]
    Tags {
        count: usize,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Targeting(#[from] TargetingError),
}

/// What happens to the run when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    /// Abort the whole run
    Fatal,
    /// Log, record in the report and continue
    Recoverable,
}

/// The steps of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Authenticate,
    Download,
    Upload,
    ListDevices,
    PublishBackgrounds,
    RegisterTags,
}

impl Step {
    pub fn policy(&self) -> StepPolicy {
        match self {
            Step::Authenticate | Step::Download | Step::Upload | Step::ListDevices => {
                StepPolicy::Fatal
            }
            Step::PublishBackgrounds | Step::RegisterTags => StepPolicy::Recoverable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Authenticate => "authenticate",
            Step::Download => "download",
            Step::Upload => "upload",
            Step::ListDevices => "list_devices",
            Step::PublishBackgrounds => "publish_backgrounds",
            Step::RegisterTags => "register_tags",
        }
    }
}

/// An asset that has been published to blob storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// File name as listed by the source, extension included
    pub file_name: String,
    /// Public blob URL
    pub url: String,
}

impl Asset {
    /// File name without its extension; the display cache key and the
    /// string scanned for device identifiers
    pub fn cache_id(&self) -> &str {
        cache_id_of(&self.file_name)
    }
}

/// Strip the last extension from a file name
pub fn cache_id_of(file_name: &str) -> &str {
    Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or(file_name)
}

/// A recoverable failure recorded during a run
#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: &'static str,
    pub message: String,
}

/// Summary of one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub files_downloaded: usize,
    pub assets_uploaded: usize,
    pub devices_found: usize,
    pub publishes_attempted: usize,
    pub publishes_succeeded: usize,
    pub tags_registered: usize,
    pub failures: Vec<StepFailure>,
}

impl RunReport {
    /// True when no recoverable step failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The external services a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn FileSource>,
    pub blobs: Arc<dyn BlobPublisher>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub backgrounds: Arc<dyn BackgroundPublisher>,
    pub tags: Arc<dyn TagRegistrar>,
}

/// Drives one sync run over the collaborators
pub struct SyncPipeline {
    services: Collaborators,
    targeting: DeviceTargeting,
    publish_interval: Duration,
}

impl SyncPipeline {
    pub fn new(
        services: Collaborators,
        targeting: DeviceTargeting,
        publish_interval: Duration,
    ) -> Self {
        Self {
            services,
            targeting,
            publish_interval,
        }
    }

    /// Build a pipeline backed by the real HTTP services
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let http = build_http_client(&config.http)?;
        let vusion = Arc::new(VusionRailClient::new(http.clone(), config.vusion.clone()));

        let services = Collaborators {
            source: Arc::new(OneDriveSource::new(http.clone(), config.onedrive.clone())),
            blobs: Arc::new(AzureBlobPublisher::new(http.clone(), config.azure.clone())),
            directory: vusion.clone(),
            backgrounds: vusion,
            tags: Arc::new(KoronaClient::new(http, config.korona.clone())),
        };

        Ok(Self::new(
            services,
            DeviceTargeting::new(config.targeting.clone()),
            config.publish_interval(),
        ))
    }

    /// Run all steps once
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        self.run_steps()
            .instrument(info_span!("sync_run", run_id = %run_id))
            .await
    }

    async fn run_steps(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::default();

        info!("Step 0: Checking OneDrive access token");
        settle(Step::Authenticate, self.authenticate(), &mut report)?;

        info!("Step 1: Downloading files from OneDrive");
        let files = settle(Step::Download, self.download().await, &mut report)?
            .unwrap_or_default();
        report.files_downloaded = files.len();
        metrics::counter!("signage.files.downloaded").increment(files.len() as u64);
        info!(count = files.len(), "Downloaded files from OneDrive");

        info!("Step 2: Uploading files to Azure Blob Storage");
        let assets = settle(Step::Upload, self.upload_all(&files).await, &mut report)?
            .unwrap_or_default();
        report.assets_uploaded = assets.len();

        info!("Step 3: Fetching devices from Vusion Rail");
        let devices = settle(Step::ListDevices, self.list_devices().await, &mut report)?
            .unwrap_or_default();
        report.devices_found = devices.len();
        info!(count = devices.len(), "Retrieved devices from Vusion Rail");

        info!("Step 4: Updating device backgrounds");
        self.publish_backgrounds(&assets, &devices, &mut report).await?;

        info!("Step 5: Adding tags to KORONA");
        let tags = self.collect_tags(&assets, &devices)?;
        if tags.is_empty() {
            warn!("No tags to register");
        } else {
            let count = tags.len();
            let sent = self.register_tags(&tags).await.map(|()| count);
            let registered = settle(Step::RegisterTags, sent, &mut report)?;
            report.tags_registered = registered.unwrap_or(0);
            metrics::counter!("signage.tags.registered").increment(report.tags_registered as u64);
        }

        info!(
            publishes_succeeded = report.publishes_succeeded,
            publishes_attempted = report.publishes_attempted,
            tags_registered = report.tags_registered,
            failures = report.failures.len(),
            "All steps completed"
        );

        Ok(report)
    }

    fn authenticate(&self) -> Result<(), RunError> {
        if self.services.source.has_credentials() {
            Ok(())
        } else {
            Err(RunError::MissingAccessToken)
        }
    }

    async fn download(&self) -> Result<Vec<DownloadedFile>, RunError> {
        let files = self.services.source.download_all().await.map_err(RunError::Download)?;
        if files.is_empty() {
            return Err(RunError::NoFiles);
        }
        Ok(files)
    }

    /// Upload every file; the first failure aborts the step
    async fn upload_all(&self, files: &[DownloadedFile]) -> Result<Vec<Asset>, RunError> {
        let mut assets = Vec::with_capacity(files.len());

        for file in files {
            let data = tokio::fs::read(&file.path)
                .await
                .map_err(|source| RunError::ReadFile {
                    file: file.name.clone(),
                    source,
                })?;

            let size = data.len() as u64;
            let started = Instant::now();
            let url = self
                .services
                .blobs
                .upload(&file.name, data)
                .await
                .map_err(|source| RunError::Upload {
                    file: file.name.clone(),
                    source,
                })?;

            metrics::histogram!("signage.upload.duration_seconds")
                .record(started.elapsed().as_secs_f64());
            metrics::counter!("signage.assets.uploaded").increment(1);
            metrics::counter!("signage.bytes.uploaded").increment(size);
            info!(file = %file.name, url = %url, "Uploaded file to Azure Blob Storage");
            assets.push(Asset {
                file_name: file.name.clone(),
                url,
            });
        }

        Ok(assets)
    }

    async fn list_devices(&self) -> Result<Vec<String>, RunError> {
        let devices = self.services.directory.list_devices().await.map_err(RunError::Devices)?;
        if devices.is_empty() {
            return Err(RunError::NoDevices);
        }
        Ok(devices.into_iter().map(|device| device.id).collect())
    }

    /// One background update per (asset, resolved device), spaced by the
    /// publish gate. Individual failures are recorded, not fatal.
    async fn publish_backgrounds(
        &self,
        assets: &[Asset],
        devices: &[String],
        report: &mut RunReport,
    ) -> Result<(), RunError> {
        let mut gate = MinIntervalGate::new(self.publish_interval);
        debug!(
            min_interval_ms = gate.interval().as_millis() as u64,
            "Background publishes are rate limited"
        );

        for asset in assets {
            let cache_id = asset.cache_id();
            let decision = self.targeting.resolve(cache_id, devices)?;
            info!(
                file = %asset.file_name,
                cache_id,
                rule = decision.rule.as_str(),
                devices = decision.devices.len(),
                "Resolved background targets"
            );

            for device_id in &decision.devices {
                gate.wait().await;
                report.publishes_attempted += 1;

                let result = self
                    .services
                    .backgrounds
                    .publish_background(device_id, &asset.url, cache_id)
                    .await
                    .map_err(|source| RunError::Publish {
                        device_id: device_id.clone(),
                        cache_id: cache_id.to_string(),
                        source,
                    });

                if settle(Step::PublishBackgrounds, result, report)?.is_some() {
                    report.publishes_succeeded += 1;
                    metrics::counter!("signage.publishes.succeeded").increment(1);
                    info!(device_id = %device_id, file = %asset.file_name, "Background updated");
                }
            }
        }

        Ok(())
    }

    /// Tags for every (asset, device) pair, resolved exactly as for publishing
    fn collect_tags(&self, assets: &[Asset], devices: &[String]) -> Result<Vec<Tag>, RunError> {
        let mut tags = Vec::new();
        for asset in assets {
            let decision = self.targeting.resolve(asset.cache_id(), devices)?;
            tags.extend(
                decision
                    .devices
                    .into_iter()
                    .map(|device_id| Tag::new(device_id, asset.cache_id())),
            );
        }
        Ok(tags)
    }

    async fn register_tags(&self, tags: &[Tag]) -> Result<(), RunError> {
        info!(count = tags.len(), "Sending tags to KORONA");
        self.services
            .tags
            .add_tags(tags)
            .await
            .map_err(|source| RunError::Tags {
                count: tags.len(),
                source,
            })
    }
}

/// Apply `step`'s failure policy to `result`.
///
/// Fatal failures are logged and returned; recoverable ones are logged,
/// recorded in `report` and turned into `Ok(None)`.
fn settle<T>(
    step: Step,
    result: Result<T, RunError>,
    report: &mut RunReport,
) -> Result<Option<T>, RunError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) => {
            metrics::counter!("signage.steps.failed", "step" => step.as_str()).increment(1);
            match step.policy() {
                StepPolicy::Fatal => {
                    error!(step = step.as_str(), error = %err, "Step failed, aborting run");
                    Err(err)
                }
                StepPolicy::Recoverable => {
                    error!(step = step.as_str(), error = %err, "Step failed, skipping");
                    report.failures.push(StepFailure {
                        step: step.as_str(),
                        message: err.to_string(),
                    });
                    Ok(None)
                }
            }
        }
    }
}
