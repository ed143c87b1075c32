//! Shared HTTP plumbing for the external service clients.

use crate::config::HttpConfig;
use reqwest::{Client, Response, Url};
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by the external service clients
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    #[error("Invalid {setting}: {message}")]
    InvalidSetting {
        setting: &'static str,
        message: String,
    },

    #[error("{service} payload could not be encoded: {source}")]
    Encode {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    /// Adapter for `map_err` on reqwest results
    pub fn http(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| ClientError::Http { service, source }
    }

    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| ClientError::Io { path, source }
    }
}

/// Build the HTTP client shared by every service client
pub fn build_http_client(config: &HttpConfig) -> Result<Client, ClientError> {
    let mut builder = Client::builder().user_agent(concat!(
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    ));

    if let Some(timeout) = config.timeout() {
        builder = builder.timeout(timeout);
    }

    builder.build().map_err(ClientError::http("http-client"))
}

/// Turn a non-2xx response into `ClientError::Status`, keeping the body
/// for the log line
pub async fn ensure_success(
    service: &'static str,
    response: Response,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}

/// Append `segments` to the path of `base`, percent-encoding each one so
/// opaque ids cannot change the route
pub fn endpoint_url(
    setting: &'static str,
    base: &str,
    segments: &[&str],
) -> Result<Url, ClientError> {
    let mut url = Url::parse(base).map_err(|e| ClientError::InvalidSetting {
        setting,
        message: e.to_string(),
    })?;

    url.path_segments_mut()
        .map_err(|_| ClientError::InvalidSetting {
            setting,
            message: format!("'{}' cannot carry a path", base),
        })?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}

/// Unwrap an optional setting or report it by its environment name
pub fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ClientError> {
    value.as_deref().ok_or(ClientError::MissingSetting(name))
}
