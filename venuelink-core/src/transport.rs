//! REST transport client

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::errors::{ConnectorError, ConnectorResult};
use crate::signer::{build_query_string, RequestSigner};
use crate::types::now_millis;

/// Authentication a request must carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthLevel {
    /// No credentials attached.
    Public,
    /// Credential header only (e.g. listen-key handshakes).
    ApiKey,
    /// Credential header plus timestamp + signature parameters.
    Signed,
}

/// Outbound request/response boundary. Mocked in tests to instrument call
/// counts and serve canned payloads.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn get_json(&self, path: &str, query: &[(String, String)], auth: AuthLevel)
        -> ConnectorResult<Value>;

    async fn post_json(&self, path: &str, query: &[(String, String)], auth: AuthLevel)
        -> ConnectorResult<Value>;
}

/// HTTP implementation over reqwest with a per-request timeout.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    timeout: Duration,
    signer: Option<Arc<dyn RequestSigner>>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        signer: Option<Arc<dyn RequestSigner>>,
    ) -> ConnectorResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ConnectorError::Transport {
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
            signer,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        auth: AuthLevel,
    ) -> ConnectorResult<Value> {
        let (url, header) = assemble_request(
            &self.base_url,
            path,
            query,
            auth,
            self.signer.as_deref(),
            now_millis(),
        )?;

        debug!("{} {}", method, url);
        let mut request = self.client.request(method.clone(), &url).timeout(self.timeout);
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ConnectorError::Timeout {
                    millis: self.timeout.as_millis() as u64,
                }
            } else {
                ConnectorError::Transport {
                    message: format!("{} {} failed: {}", method, url, e),
                }
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.map_err(|e| ConnectorError::Transport {
            message: format!("{} {} body read failed: {}", method, url, e),
        })?;
        debug!("{} {} #{}", method, url, status.as_u16());

        if status.is_success() && content_type.contains("application/json") {
            serde_json::from_str(&body).map_err(|e| ConnectorError::Transport {
                message: format!("{} {} returned invalid JSON: {}", method, url, e),
            })
        } else {
            error!("{} {} failed #{}: {}", method, url, status.as_u16(), truncate(&body));
            Err(ConnectorError::Transport {
                message: format!("{} {} #{}: {}", method, url, status.as_u16(), truncate(&body)),
            })
        }
    }
}

#[async_trait]
impl RestTransport for HttpTransport {
    async fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
        auth: AuthLevel,
    ) -> ConnectorResult<Value> {
        self.request(Method::GET, path, query, auth).await
    }

    async fn post_json(
        &self,
        path: &str,
        query: &[(String, String)],
        auth: AuthLevel,
    ) -> ConnectorResult<Value> {
        self.request(Method::POST, path, query, auth).await
    }
}

/// Assemble the final URL and credential header for a request.
///
/// The query string is built once and signed as-is; the signature and
/// timestamp are appended raw so the signed bytes and the sent bytes are
/// identical.
fn assemble_request(
    base_url: &str,
    path: &str,
    query: &[(String, String)],
    auth: AuthLevel,
    signer: Option<&dyn RequestSigner>,
    timestamp: u64,
) -> ConnectorResult<(String, Option<(String, String)>)> {
    let mut query_string = build_query_string(query);
    let mut header = None;

    if auth != AuthLevel::Public {
        let signer = signer.ok_or_else(|| ConnectorError::Configuration {
            message: "credentials required for authenticated request".to_string(),
        })?;
        if auth == AuthLevel::Signed {
            if !query_string.is_empty() {
                query_string.push('&');
            }
            query_string.push_str(&format!("timestamp={}", timestamp));
            let signature = signer.signature(&query_string);
            query_string.push_str(&format!("&signature={}", signature));
        }
        header = Some((
            signer.api_key_header().to_string(),
            signer.api_key().to_string(),
        ));
    }

    let url = if query_string.is_empty() {
        format!("{}{}", base_url, path)
    } else {
        format!("{}{}?{}", base_url, path, query_string)
    };
    Ok((url, header))
}

fn truncate(body: &str) -> &str {
    let end = body
        .char_indices()
        .nth(256)
        .map(|(i, _)| i)
        .unwrap_or(body.len());
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::HmacSha256Signer;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_public_request_has_no_header() {
        let (url, header) = assemble_request(
            "https://api.example.com",
            "/api/v3/depth",
            &params(&[("symbol", "BTCUSDT"), ("limit", "20")]),
            AuthLevel::Public,
            None,
            1_000,
        )
        .unwrap();
        assert_eq!(url, "https://api.example.com/api/v3/depth?symbol=BTCUSDT&limit=20");
        assert!(header.is_none());
    }

    #[test]
    fn test_signed_request_appends_timestamp_then_signature() {
        let signer = HmacSha256Signer::new("ak", "sk", "X-MBX-APIKEY");
        let (url, header) = assemble_request(
            "https://api.example.com",
            "/api/v3/account",
            &[],
            AuthLevel::Signed,
            Some(&signer),
            1_499_827_319_559,
        )
        .unwrap();
        let expected_sig = signer.signature("timestamp=1499827319559");
        assert_eq!(
            url,
            format!(
                "https://api.example.com/api/v3/account?timestamp=1499827319559&signature={}",
                expected_sig
            )
        );
        assert_eq!(header, Some(("X-MBX-APIKEY".to_string(), "ak".to_string())));
    }

    #[test]
    fn test_authenticated_request_without_signer_is_configuration_error() {
        let result = assemble_request(
            "https://api.example.com",
            "/api/v3/account",
            &[],
            AuthLevel::Signed,
            None,
            0,
        );
        assert!(matches!(result, Err(ConnectorError::Configuration { .. })));
    }

    #[test]
    fn test_api_key_level_attaches_header_without_signature() {
        let signer = HmacSha256Signer::new("ak", "sk", "X-MBX-APIKEY");
        let (url, header) = assemble_request(
            "https://api.example.com",
            "/api/v3/userDataStream",
            &[],
            AuthLevel::ApiKey,
            Some(&signer),
            1_000,
        )
        .unwrap();
        assert_eq!(url, "https://api.example.com/api/v3/userDataStream");
        assert_eq!(header, Some(("X-MBX-APIKEY".to_string(), "ak".to_string())));
    }
}
