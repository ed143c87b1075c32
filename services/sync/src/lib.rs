//! Signage Sync
//!
//! Moves digital-signage video assets from a OneDrive folder onto Vusion
//! Rail display devices and records which asset went to which device as
//! tags in KORONA.cloud.
//!
//! ## Features
//!
//! - **Device Targeting**: a filename naming a device goes to that device,
//!   `left_line_` / `right_line_` files go to configured device groups,
//!   everything else is broadcast to the whole store
//! - **Blob Publishing**: assets are uploaded to Azure Blob Storage and
//!   referenced by their public URL
//! - **Rate-Limited Publishing**: background updates are spaced by a
//!   configurable minimum interval
//! - **Explicit Failure Policy**: source, upload and directory failures end
//!   the run; per-device publish and tag failures are logged and skipped
//!
//! ## Architecture
//!
//! ```text
//!  OneDrive            Azure Blob           Vusion Rail           KORONA
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ File Source  │───▶│ Blob         │    │ Device       │    │ Tag          │
//! │ (download)   │    │ Publisher    │    │ Directory    │    │ Registrar    │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!                            │                   │                   ▲
//!                            ▼                   ▼                   │
//!                     ┌──────────────────────────────────┐           │
//!                     │ Device Targeting Resolver        │───────────┘
//!                     └──────────────────────────────────┘
//!                                    │
//!                                    ▼
//!                     ┌──────────────────────────────────┐
//!                     │ Background Publisher (rate gate) │
//!                     └──────────────────────────────────┘
//! ```

pub mod azure_blob;
pub mod client;
pub mod config;
pub mod korona;
pub mod onedrive;
pub mod pipeline;
pub mod rate_limit;
pub mod targeting;
pub mod traits;
pub mod vusion;

pub use azure_blob::{sanitize_blob_name, AzureBlobPublisher};
pub use client::ClientError;
pub use config::{Config, TagFormat, TargetingConfig};
pub use korona::{KoronaClient, Tag};
pub use onedrive::{DownloadedFile, OneDriveSource};
pub use pipeline::{Asset, Collaborators, RunError, RunReport, Step, StepPolicy, SyncPipeline};
pub use rate_limit::MinIntervalGate;
pub use targeting::{DeviceTargeting, DeviceTargetingBuilder, TargetDecision, TargetRule, TargetingError};
pub use traits::{BackgroundPublisher, BlobPublisher, DeviceDirectory, FileSource, TagRegistrar};
pub use vusion::{Device, VusionRailClient};
