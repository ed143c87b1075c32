use crate::client::{endpoint_url, ensure_success, require, ClientError};
use crate::config::VusionConfig;
use crate::traits::{BackgroundPublisher, DeviceDirectory};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const SERVICE: &str = "vusion-rail";
const SUBSCRIPTION_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// A display device registered in the store
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    /// Device identifier, matched against asset cache ids
    pub id: String,
    /// Remaining directory fields, carried along but not inspected
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Device {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

/// Body of a background update
#[derive(Debug, Serialize)]
struct BackgroundRequest<'a> {
    layers: Vec<BackgroundLayer<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundLayer<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    width: u32,
    height: u32,
    url: &'a str,
    cache_id: &'a str,
    visible: bool,
}

/// Client for the Vusion Rail store API
pub struct VusionRailClient {
    http: Client,
    config: VusionConfig,
}

impl VusionRailClient {
    pub fn new(http: Client, config: VusionConfig) -> Self {
        info!(
            base_url = %config.base_url,
            store_id = config.store_id.as_deref().unwrap_or("<unset>"),
            "Vusion Rail client initialized"
        );

        Self { http, config }
    }

    /// `{base}/v1/stores/{store_id}/{rest...}` with every segment encoded
    fn store_url(&self, store_id: &str, rest: &[&str]) -> Result<Url, ClientError> {
        let mut segments = vec!["v1", "stores", store_id];
        segments.extend_from_slice(rest);
        endpoint_url("vusion.base_url", &self.config.base_url, &segments)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let key = require(&self.config.subscription_key, "VUSION_SUBSCRIPTION_KEY")?;
        Ok(request.header(SUBSCRIPTION_HEADER, key))
    }

    fn background_request<'a>(&self, url: &'a str, cache_id: &'a str) -> BackgroundRequest<'a> {
        BackgroundRequest {
            layers: vec![BackgroundLayer {
                id: "layer-1",
                kind: "video",
                width: self.config.layer_width,
                height: self.config.layer_height,
                url,
                cache_id,
                visible: true,
            }],
        }
    }
}

#[async_trait]
impl DeviceDirectory for VusionRailClient {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> Result<Vec<Device>, ClientError> {
        let store_id = require(&self.config.store_id, "VUSION_STORE_ID")?;
        let url = self.store_url(store_id, &["devices"])?;

        let response = self
            .authorized(self.http.get(url))?
            .send()
            .await
            .map_err(ClientError::http(SERVICE))?;

        let devices: Vec<Device> = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(ClientError::http(SERVICE))?;

        debug!(store_id, count = devices.len(), "Fetched device directory");

        Ok(devices)
    }
}

#[async_trait]
impl BackgroundPublisher for VusionRailClient {
    #[instrument(skip(self, url))]
    async fn publish_background(
        &self,
        device_id: &str,
        url: &str,
        cache_id: &str,
    ) -> Result<(), ClientError> {
        let store_id = require(&self.config.store_id, "VUSION_STORE_ID")?;
        let endpoint = self.store_url(store_id, &["devices", device_id, "background"])?;
        debug!(endpoint = %endpoint, "Updating device background");

        let response = self
            .authorized(self.http.post(endpoint))?
            .json(&self.background_request(url, cache_id))
            .send()
            .await
            .map_err(ClientError::http(SERVICE))?;
        ensure_success(SERVICE, response).await?;

        Ok(())
    }
}
