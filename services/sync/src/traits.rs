//! Interfaces of the external services the sync pipeline drives.

use async_trait::async_trait;

use crate::client::ClientError;
use crate::korona::Tag;
use crate::onedrive::DownloadedFile;
use crate::vusion::Device;

/// Cloud folder the assets are pulled from.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Whether an access token is available at all.
    fn has_credentials(&self) -> bool;

    /// List the folder and make every file available locally, in listing order.
    async fn download_all(&self) -> Result<Vec<DownloadedFile>, ClientError>;
}

/// Blob storage that turns asset bytes into a public URL.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobPublisher: Send + Sync {
    /// Upload `data` under a sanitized form of `name`, overwriting any
    /// existing blob, and return its URL.
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, ClientError>;
}

/// Registry of the store's display devices.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn list_devices(&self) -> Result<Vec<Device>, ClientError>;
}

/// Pushes a video background to one device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackgroundPublisher: Send + Sync {
    async fn publish_background(
        &self,
        device_id: &str,
        url: &str,
        cache_id: &str,
    ) -> Result<(), ClientError>;
}

/// Records which asset went to which device.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TagRegistrar: Send + Sync {
    /// Register all `tags` in one request.
    async fn add_tags(&self, tags: &[Tag]) -> Result<(), ClientError>;
}
