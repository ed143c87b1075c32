use crate::client::{endpoint_url, ensure_success, require, ClientError};
use crate::config::{KoronaConfig, TagFormat};
use crate::traits::TagRegistrar;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

const SERVICE: &str = "korona-cloud";

/// Record that an asset was sent to a device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub device_id: String,
    pub cache_id: String,
}

impl Tag {
    pub fn new(device_id: impl Into<String>, cache_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            cache_id: cache_id.into(),
        }
    }

    /// Render the tag the way the KORONA tag endpoint expects it
    pub fn to_payload(&self, format: TagFormat) -> Result<Value, serde_json::Error> {
        let payload = match format {
            TagFormat::JsonName => {
                let name = serde_json::to_string(&TagName {
                    device_id: &self.device_id,
                    cache_id: &self.cache_id,
                })?;
                json!({ "name": name })
            }
            TagFormat::NameNumber => json!({
                "name": self.cache_id,
                "number": self.device_id,
            }),
        };
        Ok(payload)
    }
}

/// Tag name carried as an embedded JSON string, deviceId first
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TagName<'a> {
    device_id: &'a str,
    cache_id: &'a str,
}

/// Client for the KORONA.cloud tag API
pub struct KoronaClient {
    http: Client,
    config: KoronaConfig,
}

impl KoronaClient {
    pub fn new(http: Client, config: KoronaConfig) -> Self {
        info!(
            base_url = %config.base_url,
            tag_format = ?config.tag_format,
            "KORONA client initialized"
        );

        Self { http, config }
    }

    fn tags_url(&self, account_id: &str) -> Result<Url, ClientError> {
        endpoint_url(
            "korona.base_url",
            &self.config.base_url,
            &["web", "api", "v3", "accounts", account_id, "tags"],
        )
    }
}

#[async_trait]
impl TagRegistrar for KoronaClient {
    #[instrument(skip(self, tags), fields(count = tags.len()))]
    async fn add_tags(&self, tags: &[Tag]) -> Result<(), ClientError> {
        let account_id = require(&self.config.account_id, "KORONA_ACCOUNT_ID")?;
        let username = require(&self.config.username, "KORONA_USERNAME")?;
        let password = require(&self.config.password, "KORONA_PASSWORD")?;

        let payload = tags
            .iter()
            .map(|tag| tag.to_payload(self.config.tag_format))
            .collect::<Result<Vec<Value>, _>>()
            .map_err(|source| ClientError::Encode {
                service: SERVICE,
                source,
            })?;

        debug!(payload = ?payload, "Sending tags to KORONA");

        let response = self
            .http
            .post(self.tags_url(account_id)?)
            .basic_auth(username, Some(password))
            .json(&payload)
            .send()
            .await
            .map_err(ClientError::http(SERVICE))?;
        let response = ensure_success(SERVICE, response).await?;

        debug!(status = response.status().as_u16(), "KORONA accepted tags");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_name_payload_embeds_json_string() {
        let payload = Tag::new("00001", "promo_00001")
            .to_payload(TagFormat::JsonName)
            .unwrap();

        let name = payload["name"].as_str().unwrap();
        assert_eq!(name, r#"{"deviceId":"00001","cacheId":"promo_00001"}"#);
        let inner: Value = serde_json::from_str(name).unwrap();
        assert_eq!(inner, json!({"deviceId": "00001", "cacheId": "promo_00001"}));
        assert_eq!(payload.as_object().unwrap().len(), 1);
    }

    #[test]
    fn test_name_number_payload() {
        let payload = Tag::new("00001", "promo_00001")
            .to_payload(TagFormat::NameNumber)
            .unwrap();

        assert_eq!(payload, json!({"name": "promo_00001", "number": "00001"}));
    }

    #[test]
    fn test_tags_url() {
        let client = KoronaClient::new(
            Client::new(),
            KoronaConfig {
                base_url: "https://196.koronacloud.com/".to_string(),
                ..KoronaConfig::default()
            },
        );
        assert_eq!(
            client.tags_url("acc-1").unwrap().as_str(),
            "https://196.koronacloud.com/web/api/v3/accounts/acc-1/tags"
        );
        assert_eq!(
            client.tags_url("acc/1").unwrap().as_str(),
            "https://196.koronacloud.com/web/api/v3/accounts/acc%2F1/tags"
        );
    }

    #[test]
    fn test_json_name_escapes_quotes_in_ids() {
        let payload = Tag::new("rail \"7\"", "promo")
            .to_payload(TagFormat::JsonName)
            .unwrap();

        let inner: Value = serde_json::from_str(payload["name"].as_str().unwrap()).unwrap();
        assert_eq!(inner["deviceId"], "rail \"7\"");
        assert_eq!(inner["cacheId"], "promo");
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_request() {
        let client = KoronaClient::new(Client::new(), KoronaConfig::default());
        let result = client.add_tags(&[Tag::new("00001", "promo")]).await;

        assert!(matches!(
            result,
            Err(ClientError::MissingSetting("KORONA_ACCOUNT_ID"))
        ));
    }
}
