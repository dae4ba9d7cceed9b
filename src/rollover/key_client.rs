//! Key-Management API Client
//!
//! Requests key creation, (de)activation and deletion from the DNS server.
//! Key material never passes through this process; the server generates,
//! stores and signs with it.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ApiClientConfig, KeyAlgorithm, KeyType, RolloverError};

const API_KEY_HEADER: &str = "x-api-key";
const ERROR_BODY_EXCERPT: usize = 200;

/// Body of a create-key request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateKeyRequest {
    pub keytype: KeyType,
    pub active: bool,
    pub algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bits: Option<u32>,
}

impl CreateKeyRequest {
    /// Build an active-key request; `bits` is only sent for RSA algorithms
    pub fn new(keytype: KeyType, algorithm: &KeyAlgorithm, rsa_bits: u32) -> Self {
        Self {
            keytype,
            active: true,
            algorithm: algorithm.name(),
            bits: algorithm.is_rsa().then_some(rsa_bits),
        }
    }
}

/// Key as described by the server after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub id: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub keytype: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
}

#[derive(Debug, Serialize)]
struct SetActiveRequest {
    active: bool,
}

/// Operations the rollover engine needs from the DNS server
#[async_trait]
pub trait KeyManagementClient: Send + Sync {
    async fn create_key(
        &self,
        zone: &str,
        request: &CreateKeyRequest,
    ) -> Result<KeyDescriptor, RolloverError>;

    async fn set_key_active(&self, zone: &str, key_id: i64, active: bool)
        -> Result<(), RolloverError>;

    async fn delete_key(&self, zone: &str, key_id: i64) -> Result<(), RolloverError>;
}

/// Zone name in canonical (trailing dot) form
pub fn canonical_zone(zone: &str) -> String {
    let zone = zone.trim();
    if zone.ends_with('.') {
        zone.to_string()
    } else {
        format!("{}.", zone)
    }
}

/// HTTP implementation against the server's cryptokey endpoints
pub struct HttpKeyClient {
    client: Client,
    base_url: String,
    server_id: String,
}

impl HttpKeyClient {
    /// Build the client. Any failure here is fatal for the invocation.
    pub fn new(config: &ApiClientConfig) -> Result<Self, RolloverError> {
        let raw_url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| RolloverError::ConfigError("API URL is not configured".to_string()))?;

        let parsed = Url::parse(raw_url)
            .map_err(|e| RolloverError::ConfigError(format!("Invalid API URL {}: {}", raw_url, e)))?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RolloverError::ConfigError(format!(
                "API URL must be http or https, got {}",
                parsed.scheme()
            )));
        }

        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RolloverError::ConfigError("API key is not configured".to_string()))?;

        let mut header_value = HeaderValue::from_str(api_key)
            .map_err(|_| RolloverError::ConfigError("API key contains invalid characters".to_string()))?;
        header_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, header_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RolloverError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            server_id: config.server_id.clone(),
        })
    }

    fn cryptokeys_url(&self, zone: &str) -> String {
        format!(
            "{}/api/v1/servers/{}/zones/{}/cryptokeys",
            self.base_url,
            self.server_id,
            canonical_zone(zone)
        )
    }

    fn cryptokey_url(&self, zone: &str, key_id: i64) -> String {
        format!("{}/{}", self.cryptokeys_url(zone), key_id)
    }

    async fn check(operation: &str, resp: Response) -> Result<Response, RolloverError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_EXCERPT).collect();
        Err(RolloverError::ClientError(format!(
            "{} failed with HTTP {}: {}",
            operation,
            status,
            excerpt.trim()
        )))
    }
}

fn transport_err(operation: &str) -> impl Fn(reqwest::Error) -> RolloverError + '_ {
    move |e| RolloverError::ClientError(format!("{} request failed: {}", operation, e))
}

#[async_trait]
impl KeyManagementClient for HttpKeyClient {
    async fn create_key(
        &self,
        zone: &str,
        request: &CreateKeyRequest,
    ) -> Result<KeyDescriptor, RolloverError> {
        let url = self.cryptokeys_url(zone);
        debug!("POST {} {:?}", url, request);

        let resp = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport_err("create key"))?;

        Self::check("create key", resp)
            .await?
            .json::<KeyDescriptor>()
            .await
            .map_err(|e| RolloverError::ClientError(format!("Invalid create key response: {}", e)))
    }

    async fn set_key_active(
        &self,
        zone: &str,
        key_id: i64,
        active: bool,
    ) -> Result<(), RolloverError> {
        let url = self.cryptokey_url(zone, key_id);
        debug!("PUT {} active={}", url, active);

        let resp = self
            .client
            .put(&url)
            .json(&SetActiveRequest { active })
            .send()
            .await
            .map_err(transport_err("set key active"))?;

        Self::check("set key active", resp).await?;
        Ok(())
    }

    async fn delete_key(&self, zone: &str, key_id: i64) -> Result<(), RolloverError> {
        let url = self.cryptokey_url(zone, key_id);
        debug!("DELETE {}", url);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(transport_err("delete key"))?;

        Self::check("delete key", resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollover::DnssecAlgorithm;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ZONE_KEYS_PATH: &str = "/api/v1/servers/localhost/zones/example.com./cryptokeys";

    fn config(url: &str) -> ApiClientConfig {
        ApiClientConfig {
            url: Some(url.to_string()),
            api_key: Some("secret".to_string()),
            ..ApiClientConfig::default()
        }
    }

    #[test]
    fn test_canonical_zone() {
        assert_eq!(canonical_zone("example.com"), "example.com.");
        assert_eq!(canonical_zone("example.com."), "example.com.");
    }

    #[test]
    fn test_create_request_bits_only_for_rsa() {
        let rsa = KeyAlgorithm::Known(DnssecAlgorithm::RsaSha256);
        let req = CreateKeyRequest::new(KeyType::Ksk, &rsa, 2048);
        assert_eq!(req.bits, Some(2048));
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["keytype"], "ksk");
        assert_eq!(json["algorithm"], "RSASHA256");
        assert_eq!(json["bits"], 2048);
        assert_eq!(json["active"], true);

        let ec = KeyAlgorithm::Known(DnssecAlgorithm::EcdsaP256Sha256);
        let req = CreateKeyRequest::new(KeyType::Csk, &ec, 2048);
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("bits").is_none());
    }

    #[test]
    fn test_client_requires_url_and_key() {
        let missing_url = ApiClientConfig::default();
        assert!(matches!(
            HttpKeyClient::new(&missing_url),
            Err(RolloverError::ConfigError(_))
        ));

        let mut missing_key = config("http://127.0.0.1:8081");
        missing_key.api_key = Some("   ".to_string());
        assert!(matches!(
            HttpKeyClient::new(&missing_key),
            Err(RolloverError::ConfigError(_))
        ));

        assert!(HttpKeyClient::new(&config("not a url")).is_err());
        assert!(HttpKeyClient::new(&config("ftp://dns.internal")).is_err());
        assert!(HttpKeyClient::new(&config("http://127.0.0.1:8081")).is_ok());
    }

    #[test]
    fn test_cryptokey_urls() {
        let client = HttpKeyClient::new(&config("http://127.0.0.1:8081/")).unwrap();
        assert_eq!(
            client.cryptokeys_url("example.com"),
            "http://127.0.0.1:8081/api/v1/servers/localhost/zones/example.com./cryptokeys"
        );
        assert_eq!(
            client.cryptokey_url("example.com.", 7),
            "http://127.0.0.1:8081/api/v1/servers/localhost/zones/example.com./cryptokeys/7"
        );
    }

    #[tokio::test]
    async fn test_create_key_parses_descriptor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ZONE_KEYS_PATH))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({
                "keytype": "csk",
                "active": true,
                "algorithm": "ECDSAP256SHA256",
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 42,
                "active": true,
                "keytype": "csk",
                "algorithm": "ECDSAP256SHA256",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        let alg = KeyAlgorithm::Known(DnssecAlgorithm::EcdsaP256Sha256);
        let descriptor = client
            .create_key("example.com", &CreateKeyRequest::new(KeyType::Csk, &alg, 2048))
            .await
            .unwrap();

        assert_eq!(descriptor.id, 42);
        assert!(descriptor.active);
        assert_eq!(descriptor.keytype.as_deref(), Some("csk"));
    }

    #[tokio::test]
    async fn test_create_rsa_key_sends_bits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ZONE_KEYS_PATH))
            .and(body_json(json!({
                "keytype": "ksk",
                "active": true,
                "algorithm": "RSASHA256",
                "bits": 2048,
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": 5 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        let alg = KeyAlgorithm::Known(DnssecAlgorithm::RsaSha256);
        let descriptor = client
            .create_key("example.com.", &CreateKeyRequest::new(KeyType::Ksk, &alg, 2048))
            .await
            .unwrap();

        assert_eq!(descriptor.id, 5);
        assert!(!descriptor.active);
        assert!(descriptor.algorithm.is_none());
    }

    #[tokio::test]
    async fn test_deactivate_sends_put_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("{}/7", ZONE_KEYS_PATH)))
            .and(header("x-api-key", "secret"))
            .and(body_json(json!({ "active": false })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        client.set_key_active("example.com", 7, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_hits_key_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/9", ZONE_KEYS_PATH)))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        client.delete_key("example.com", 9).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_becomes_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path(format!("{}/9", ZONE_KEYS_PATH)))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({ "error": "Key not found" })),
            )
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        let err = client.delete_key("example.com", 9).await.unwrap_err();

        assert!(err.is_transient());
        assert!(err.to_string().contains("422"));
        assert!(err.to_string().contains("Key not found"));
    }

    #[tokio::test]
    async fn test_unparseable_create_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ZONE_KEYS_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let client = HttpKeyClient::new(&config(&server.uri())).unwrap();
        let alg = KeyAlgorithm::Known(DnssecAlgorithm::Ed25519);
        let err = client
            .create_key("example.com", &CreateKeyRequest::new(KeyType::Csk, &alg, 2048))
            .await
            .unwrap_err();
        assert!(matches!(err, RolloverError::ClientError(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transient() {
        // Bind then drop to get a port nobody listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpKeyClient::new(&config(&format!("http://{}", addr))).unwrap();
        let err = client.set_key_active("example.com", 1, false).await.unwrap_err();
        assert!(matches!(err, RolloverError::ClientError(_)));
        assert!(err.is_transient());
    }
}
