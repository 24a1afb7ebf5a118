//! Client for the Remote Scan Gateway. All real scanning and analysis happens
//! behind these endpoints; this side only sends requests and reads JSON back.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::{DashboardError, Result};
use crate::models::{DashboardSnapshot, Period};
use crate::normalize::ScanSource;

const USER_HEADER: &str = "X-User-Id";
const MAX_ERROR_BODY: usize = 200;

/// Body of the platform scan endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformScanRequest {
    pub company_name: String,
    pub website: Option<String>,
    pub prompts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_area: Option<String>,
}

/// Body of the per-prompt ChatGPT + Perplexity probe
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityCheckRequest {
    pub company_name: String,
    pub query: String,
    pub category: Option<String>,
}

/// `{success, error}` acknowledgement most write endpoints return
#[derive(Debug, Default, Deserialize)]
pub struct ScanAck {
    pub success: Option<bool>,
    pub error: Option<String>,
}

impl ScanAck {
    pub fn into_result(self) -> Result<()> {
        match self.success {
            Some(false) => Err(DashboardError::Rejected(
                self.error.unwrap_or_else(|| "request failed".to_string()),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ClaimResponse {
    #[serde(default)]
    claimed: Option<ClaimCount>,
}

#[derive(Debug, Default, Deserialize)]
struct ClaimCount {
    #[serde(default)]
    total: u32,
}

#[async_trait]
pub trait ScanGateway: Send + Sync {
    async fn fetch_dashboard(
        &self,
        user_id: &str,
        period: Period,
        company: Option<&str>,
    ) -> Result<DashboardSnapshot>;

    async fn delete_company(&self, user_id: &str, company: &str) -> Result<()>;

    /// Runs a one-off page audit; the payload is returned as-is.
    async fn geo_audit(&self, user_id: &str, url: &str, locale: &str) -> Result<Value>;

    async fn scan_google_ai(&self, user_id: &str, request: &PlatformScanRequest) -> Result<()>;

    async fn scan_google_ai_overview(
        &self,
        user_id: &str,
        request: &PlatformScanRequest,
    ) -> Result<()>;

    async fn scan_chatgpt(&self, user_id: &str, request: &PlatformScanRequest) -> Result<()>;

    async fn visibility_check(&self, user_id: &str, request: &VisibilityCheckRequest)
        -> Result<()>;

    async fn delete_rank_check(&self, user_id: &str, id: &str) -> Result<()>;

    async fn update_prompts(&self, user_id: &str, scan_id: &str, prompts: &[String]) -> Result<()>;

    /// Returns how many anonymous scans were attached to the account.
    async fn claim_session(&self, user_id: &str) -> Result<u32>;

    /// Raw rows of one backing scan table, newest first.
    async fn fetch_source(&self, source: ScanSource, user_id: &str) -> Result<Vec<Value>>;
}

pub struct HttpGateway {
    client: Client,
    timeout: std::time::Duration,
    base_url: String,
    token: Option<String>,
    supabase: Option<(String, String)>,
}

fn normalize_base(raw: &str, key: &str) -> Result<String> {
    let parsed = Url::parse(raw).map_err(|e| DashboardError::Config(format!("invalid {key} '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        other => Err(DashboardError::Config(format!(
            "unsupported scheme '{other}' in {key}"
        ))),
    }
}

/// Picks the `error` field of a JSON body, else a trimmed slice of the raw text.
fn error_message(body: &str, status: reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return status.canonical_reason().unwrap_or("request failed").to_string();
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

impl HttpGateway {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.scan.request_timeout())
            .build()?;

        let supabase = match (&config.supabase_url, &config.supabase_key) {
            (Some(url), Some(key)) => Some((normalize_base(url, "supabase_url")?, key.clone())),
            (Some(_), None) | (None, Some(_)) => {
                warn!("Supabase is only half configured; raw scan tables will be unavailable");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            client,
            timeout: config.scan.request_timeout(),
            base_url: normalize_base(&config.gateway_url, "gateway_url")?,
            token: config.gateway_token.clone(),
            supabase,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder, user_id: &str) -> RequestBuilder {
        let builder = builder.header(USER_HEADER, user_id);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let response = builder.send().await.map_err(|e| {
            warn!("{} request failed: {}", what, e);
            if e.is_timeout() {
                DashboardError::Timeout(self.timeout)
            } else {
                DashboardError::from(e)
            }
        })?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = error_message(&body, status);
            warn!(status = status.as_u16(), "{} failed: {}", what, message);
            return Err(DashboardError::Gateway {
                status: status.as_u16(),
                message,
            });
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        Ok(serde_json::from_str(body)?)
    }

    async fn post_ack<B: Serialize + Sync>(
        &self,
        path: &str,
        user_id: &str,
        body: &B,
    ) -> Result<()> {
        let builder = self.authorized(self.client.post(self.endpoint(path)), user_id).json(body);
        let ack: ScanAck = self.send(builder, path).await?;
        ack.into_result()
    }
}

#[async_trait]
impl ScanGateway for HttpGateway {
    async fn fetch_dashboard(
        &self,
        user_id: &str,
        period: Period,
        company: Option<&str>,
    ) -> Result<DashboardSnapshot> {
        let mut query = vec![("period", period.as_str())];
        if let Some(company) = company {
            query.push(("company", company));
        }
        debug!(user_id, period = period.as_str(), "Fetching dashboard summary");
        let builder = self
            .authorized(self.client.get(self.endpoint("/api/dashboard")), user_id)
            .query(&query);
        self.send(builder, "/api/dashboard").await
    }

    async fn delete_company(&self, user_id: &str, company: &str) -> Result<()> {
        info!(user_id, company, "Deleting company");
        let builder = self
            .authorized(self.client.delete(self.endpoint("/api/dashboard")), user_id)
            .json(&json!({ "company": company }));
        let ack: ScanAck = self.send(builder, "DELETE /api/dashboard").await?;
        ack.into_result()
    }

    async fn geo_audit(&self, user_id: &str, url: &str, locale: &str) -> Result<Value> {
        info!(user_id, url, "Running page audit");
        let builder = self
            .authorized(self.client.post(self.endpoint("/api/geo-audit")), user_id)
            .json(&json!({ "url": url, "locale": locale }));
        let payload: Value = self.send(builder, "/api/geo-audit").await?;
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("Scan failed");
            return Err(DashboardError::Rejected(message.to_string()));
        }
        Ok(payload)
    }

    async fn scan_google_ai(&self, user_id: &str, request: &PlatformScanRequest) -> Result<()> {
        info!(user_id, company = %request.company_name, prompts = request.prompts.len(), "Scanning Google AI Mode");
        self.post_ack("/api/scan-google-ai", user_id, request).await
    }

    async fn scan_google_ai_overview(
        &self,
        user_id: &str,
        request: &PlatformScanRequest,
    ) -> Result<()> {
        info!(user_id, company = %request.company_name, prompts = request.prompts.len(), "Scanning Google AI Overviews");
        self.post_ack("/api/scan-google-ai-overview", user_id, request).await
    }

    async fn scan_chatgpt(&self, user_id: &str, request: &PlatformScanRequest) -> Result<()> {
        info!(user_id, company = %request.company_name, prompts = request.prompts.len(), "Scanning ChatGPT");
        self.post_ack("/api/scan-chatgpt", user_id, request).await
    }

    async fn visibility_check(
        &self,
        user_id: &str,
        request: &VisibilityCheckRequest,
    ) -> Result<()> {
        debug!(user_id, query = %request.query, "Checking prompt visibility");
        self.post_ack("/api/ai-visibility-check", user_id, request).await
    }

    async fn delete_rank_check(&self, user_id: &str, id: &str) -> Result<()> {
        info!(user_id, id, "Deleting rank check");
        let builder = self
            .authorized(self.client.delete(self.endpoint("/api/rank-check")), user_id)
            .query(&[("id", id)]);
        let ack: ScanAck = self.send(builder, "DELETE /api/rank-check").await?;
        ack.into_result()
    }

    async fn update_prompts(&self, user_id: &str, scan_id: &str, prompts: &[String]) -> Result<()> {
        info!(user_id, scan_id, prompts = prompts.len(), "Saving prompts");
        let body = json!({ "scanId": scan_id, "prompts": prompts });
        self.post_ack("/api/prompts/update", user_id, &body).await
    }

    async fn claim_session(&self, user_id: &str) -> Result<u32> {
        let builder = self.authorized(self.client.post(self.endpoint("/api/auth/claim-session")), user_id);
        let response: ClaimResponse = self.send(builder, "/api/auth/claim-session").await?;
        let total = response.claimed.map(|c| c.total).unwrap_or(0);
        if total > 0 {
            info!(user_id, total, "Claimed earlier anonymous scans");
        }
        Ok(total)
    }

    async fn fetch_source(&self, source: ScanSource, user_id: &str) -> Result<Vec<Value>> {
        let (base, key) = self
            .supabase
            .as_ref()
            .ok_or_else(|| DashboardError::Config("supabase_url / supabase_key not set".to_string()))?;

        let owner = format!("eq.{user_id}");
        let builder = self
            .client
            .get(format!("{}/rest/v1/{}", base, source.table()))
            .header("apikey", key)
            .bearer_auth(key)
            .query(&[
                ("select", source.select()),
                ("user_id", owner.as_str()),
                ("order", "created_at.desc"),
            ]);

        let rows: Value = self.send(builder, source.table()).await?;
        match rows {
            Value::Array(rows) => {
                debug!(table = source.table(), rows = rows.len(), "Loaded scan rows");
                Ok(rows)
            }
            other => Err(DashboardError::Gateway {
                status: 200,
                message: format!("expected an array from {}, got {}", source.table(), other),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_false_is_rejected() {
        let ack: ScanAck = serde_json::from_str(r#"{"success": false, "error": "quota"}"#).unwrap();
        match ack.into_result() {
            Err(DashboardError::Rejected(message)) => assert_eq!(message, "quota"),
            other => panic!("unexpected {other:?}"),
        }

        let missing: ScanAck = serde_json::from_str("{}").unwrap();
        assert!(missing.into_result().is_ok());
    }

    #[test]
    fn error_message_prefers_json_error_field() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(error_message(r#"{"error":"bad url"}"#, status), "bad url");
        assert_eq!(error_message("", status), "Bad Request");
        assert_eq!(error_message(&"x".repeat(500), status).len(), MAX_ERROR_BODY);
    }

    #[test]
    fn scan_request_uses_camel_case() {
        let request = PlatformScanRequest {
            company_name: "Acme".to_string(),
            website: Some("https://acme.nl".to_string()),
            prompts: vec!["best agency".to_string()],
            service_area: None,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["companyName"], "Acme");
        assert!(body.get("serviceArea").is_none());
    }

    #[test]
    fn rejects_non_http_base_urls() {
        let mut config = AppConfig::default();
        config.gateway_url = "ftp://example.com".to_string();
        assert!(matches!(HttpGateway::new(&config), Err(DashboardError::Config(_))));

        config.gateway_url = "https://example.com/".to_string();
        let gateway = HttpGateway::new(&config).unwrap();
        assert_eq!(gateway.endpoint("/api/dashboard"), "https://example.com/api/dashboard");
    }
}
