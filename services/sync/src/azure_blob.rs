use crate::client::{endpoint_url, ensure_success, require, ClientError};
use crate::config::AzureConfig;
use crate::traits::BlobPublisher;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use sha2::Sha256;
use tracing::{debug, info, instrument};

const SERVICE: &str = "azure-blob";

/// Uploads assets to an Azure Blob Storage container with SharedKey auth
pub struct AzureBlobPublisher {
    http: Client,
    config: AzureConfig,
}

impl AzureBlobPublisher {
    pub fn new(http: Client, config: AzureConfig) -> Self {
        info!(
            account = config.account.as_deref().unwrap_or("<unset>"),
            container = %config.container,
            "Azure blob publisher initialized"
        );

        Self { http, config }
    }

    /// Public URL of `blob_name` in the configured container
    ///
    /// Format: {endpoint}/{container}/{blob_name}, where the endpoint is
    /// `https://{account}.blob.core.windows.net` unless overridden.
    pub fn blob_url(&self, account: &str, blob_name: &str) -> Result<Url, ClientError> {
        let endpoint = match &self.config.endpoint_url {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.blob.core.windows.net", account),
        };

        endpoint_url(
            "azure.endpoint_url",
            &endpoint,
            &[self.config.container.as_str(), blob_name],
        )
    }
}

#[async_trait]
impl BlobPublisher for AzureBlobPublisher {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<String, ClientError> {
        let account = require(&self.config.account, "AZURE_STORAGE_ACCOUNT")?;
        let key = require(&self.config.key, "AZURE_STORAGE_KEY")?;

        let blob_name = sanitize_blob_name(name);
        let url = self.blob_url(account, &blob_name)?;
        let content_type = get_content_type(&blob_name);
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let string_to_sign = put_blob_string_to_sign(&PutBlobRequest {
            account,
            path: url.path(),
            content_length: data.len(),
            content_type,
            date: &date,
            api_version: &self.config.api_version,
        });
        let signature = sign(key, &string_to_sign)?;

        debug!(url = %url, blob_name = %blob_name, "Uploading blob");

        let response = self
            .http
            .put(url.clone())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", &self.config.api_version)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("SharedKey {}:{}", account, signature),
            )
            .body(data)
            .send()
            .await
            .map_err(ClientError::http(SERVICE))?;
        ensure_success(SERVICE, response).await?;

        info!(blob_name = %blob_name, url = %url, "Blob uploaded successfully");

        Ok(url.to_string())
    }
}

/// Inputs of the Put Blob signature
struct PutBlobRequest<'a> {
    account: &'a str,
    /// Already percent-encoded URL path
    path: &'a str,
    content_length: usize,
    content_type: &'a str,
    date: &'a str,
    api_version: &'a str,
}

/// SharedKey string-to-sign for a Put Blob request.
///
/// Standard headers appear in a fixed order with empty lines for the ones
/// not sent; Content-Length is left empty for zero-length bodies.
fn put_blob_string_to_sign(req: &PutBlobRequest<'_>) -> String {
    let content_length = if req.content_length == 0 {
        String::new()
    } else {
        req.content_length.to_string()
    };

    let lines = [
        "PUT",
        "", // Content-Encoding
        "", // Content-Language
        content_length.as_str(),
        "", // Content-MD5
        req.content_type,
        "", // Date, carried by x-ms-date
        "", // If-Modified-Since
        "", // If-Match
        "", // If-None-Match
        "", // If-Unmodified-Since
        "", // Range
    ];

    format!(
        "{}\nx-ms-blob-type:BlockBlob\nx-ms-date:{}\nx-ms-version:{}\n/{}{}",
        lines.join("\n"),
        req.date,
        req.api_version,
        req.account,
        req.path
    )
}

/// HMAC-SHA256 of `string_to_sign` keyed with the base64 account key
fn sign(account_key: &str, string_to_sign: &str) -> Result<String, ClientError> {
    let key = STANDARD
        .decode(account_key.trim())
        .map_err(|e| ClientError::InvalidSetting {
            setting: "AZURE_STORAGE_KEY",
            message: format!("not valid base64: {}", e),
        })?;

    let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|e| ClientError::InvalidSetting {
        setting: "AZURE_STORAGE_KEY",
        message: e.to_string(),
    })?;
    mac.update(string_to_sign.as_bytes());

    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Make a logical asset name safe to use as a blob name.
///
/// Backslash, slash, `#` and `?` become `-`, surrounding whitespace is trimmed.
pub fn sanitize_blob_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | '#' | '?' => '-',
            _ => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Get content type for an asset file name
fn get_content_type(name: &str) -> &'static str {
    let extension = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
