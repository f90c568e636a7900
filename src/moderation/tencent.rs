// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Tencent Cloud text moderation (TMS TextModeration, API 2020-12-29)
//
// Requests are signed with TC3-HMAC-SHA256. The text is sent base64
// encoded; the response `Suggestion` field becomes the verdict.

use super::{ModerationError, Moderator, Verdict};
use crate::config::TencentConfig;
use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

const SERVICE: &str = "tms";
const ACTION: &str = "TextModeration";
const API_VERSION: &str = "2020-12-29";
const ALGORITHM: &str = "TC3-HMAC-SHA256";
const CONTENT_TYPE: &str = "application/json; charset=utf-8";
const SIGNED_HEADERS: &str = "content-type;host";

type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Envelope {
    response: TmsResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TmsResponse {
    suggestion: Option<String>,
    error: Option<TmsError>,
    request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TmsError {
    code: String,
    message: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Classifier backed by the Tencent Cloud TMS API.
pub struct TencentModerator {
    client: reqwest::Client,
    config: TencentConfig,
    timeout: Duration,
}

impl TencentModerator {
    pub fn new(client: reqwest::Client, config: TencentConfig, timeout: Duration) -> Self {
        Self {
            client,
            config,
            timeout,
        }
    }

    /// `endpoint` may be a bare host (production) or a full URL (tests,
    /// private gateways).
    fn url_and_host(&self) -> (String, String) {
        let endpoint = self.config.endpoint.trim_end_matches('/');
        match endpoint
            .strip_prefix("https://")
            .or_else(|| endpoint.strip_prefix("http://"))
        {
            Some(host) => (format!("{endpoint}/"), host.to_string()),
            None => (format!("https://{endpoint}/"), endpoint.to_string()),
        }
    }
}

#[async_trait]
impl Moderator for TencentModerator {
    async fn moderate(&self, text: &str) -> Result<Verdict, ModerationError> {
        let content = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        let payload = serde_json::json!({ "Content": content }).to_string();

        let (url, host) = self.url_and_host();
        let timestamp = chrono::Utc::now().timestamp();
        let authorization = sign(
            &self.config.secret_id,
            &self.config.secret_key,
            &host,
            &payload,
            timestamp,
        );

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", authorization)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-TC-Action", ACTION)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", API_VERSION)
            .header("X-TC-Region", &self.config.region)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModerationError::Timeout(e.to_string())
                } else {
                    ModerationError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| ModerationError::Transport(e.to_string()))?;

        let envelope: Envelope = serde_json::from_slice(&body).map_err(|e| {
            ModerationError::InvalidResponse(format!("status {status}: {e}"))
        })?;
        let response = envelope.response;

        if let Some(err) = response.error {
            return Err(ModerationError::Api {
                code: err.code,
                message: err.message,
            });
        }

        match response.suggestion {
            Some(s) => {
                tracing::debug!(
                    tms_request_id = response.request_id.as_deref().unwrap_or(""),
                    suggestion = %s,
                    "tms response"
                );
                Ok(Verdict::from_suggestion(&s))
            }
            None => Err(ModerationError::InvalidResponse(
                "response has neither Suggestion nor Error".to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// TC3-HMAC-SHA256 signing
// ---------------------------------------------------------------------------

/// Build the `Authorization` header value for a POST of `payload` to `host`.
pub fn sign(secret_id: &str, secret_key: &str, host: &str, payload: &str, timestamp: i64) -> String {
    let date = chrono::DateTime::from_timestamp(timestamp, 0)
        .unwrap_or_default()
        .format("%Y-%m-%d")
        .to_string();

    let canonical_request = format!(
        "POST\n/\n\ncontent-type:{CONTENT_TYPE}\nhost:{host}\n\n{SIGNED_HEADERS}\n{}",
        sha256_hex(payload.as_bytes())
    );

    let credential_scope = format!("{date}/{SERVICE}/tc3_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{timestamp}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let secret_date = hmac_sha256(format!("TC3{secret_key}").as_bytes(), date.as_bytes());
    let secret_service = hmac_sha256(&secret_date, SERVICE.as_bytes());
    let secret_signing = hmac_sha256(&secret_service, b"tc3_request");
    let signature = hex::encode(hmac_sha256(&secret_signing, string_to_sign.as_bytes()));

    format!(
        "{ALGORITHM} Credential={secret_id}/{credential_scope}, SignedHeaders={SIGNED_HEADERS}, Signature={signature}"
    )
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> TencentConfig {
        TencentConfig {
            secret_id: "AKIDexample".to_string(),
            secret_key: "secret".to_string(),
            region: "ap-singapore".to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    fn moderator(endpoint: &str) -> TencentModerator {
        TencentModerator::new(
            reqwest::Client::new(),
            config(endpoint),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn signature_header_shape() {
        // 2024-01-02T00:00:00Z
        let auth = sign("AKIDexample", "secret", "tms.tencentcloudapi.com", "{}", 1_704_153_600);

        assert!(auth.starts_with(
            "TC3-HMAC-SHA256 Credential=AKIDexample/2024-01-02/tms/tc3_request, SignedHeaders=content-type;host, Signature="
        ));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_depends_on_payload_and_key() {
        let a = sign("id", "k1", "h", "{\"Content\":\"YQ==\"}", 1_700_000_000);
        let b = sign("id", "k1", "h", "{\"Content\":\"Yg==\"}", 1_700_000_000);
        let c = sign("id", "k2", "h", "{\"Content\":\"YQ==\"}", 1_700_000_000);
        assert_eq!(a, sign("id", "k1", "h", "{\"Content\":\"YQ==\"}", 1_700_000_000));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn bare_endpoint_uses_https() {
        let m = moderator("tms.tencentcloudapi.com");
        let (url, host) = m.url_and_host();
        assert_eq!(url, "https://tms.tencentcloudapi.com/");
        assert_eq!(host, "tms.tencentcloudapi.com");
    }

    #[tokio::test]
    async fn suggestion_mapped_to_verdict() {
        let server = MockServer::start().await;
        let expected = base64::engine::general_purpose::STANDARD.encode("你好。".as_bytes());

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-TC-Action", "TextModeration"))
            .and(header("X-TC-Version", "2020-12-29"))
            .and(wiremock::matchers::body_json(serde_json::json!({ "Content": expected })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": { "Suggestion": "Review", "Label": "Polity", "RequestId": "r-1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let verdict = moderator(&server.uri()).moderate("你好。").await.unwrap();
        assert_eq!(verdict, Verdict::Review);
    }

    #[tokio::test]
    async fn api_error_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {
                    "Error": { "Code": "AuthFailure.SignatureFailure", "Message": "bad signature" },
                    "RequestId": "r-2"
                }
            })))
            .mount(&server)
            .await;

        let err = moderator(&server.uri()).moderate("text").await.unwrap_err();
        match err {
            ModerationError::Api { code, .. } => assert_eq!(code, "AuthFailure.SignatureFailure"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_response_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = moderator(&server.uri()).moderate("text").await.unwrap_err();
        assert!(matches!(err, ModerationError::InvalidResponse(_)));
    }
}
