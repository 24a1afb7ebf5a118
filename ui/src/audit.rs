//! Ad-hoc page audit: quota check, the gateway call with a step display
//! running beside it, and the cached history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::db::LocalStore;
use crate::error::{DashboardError, Result};
use crate::gateway::ScanGateway;
use crate::jobs::{JobHandle, JobState};
use crate::models::HistoryEntry;
use crate::normalize::bare_domain;
use crate::progress::{audit_steps, ProgressModel, StepSimulator};
use crate::state::UserContext;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditOutcome {
    pub payload: Value,
    pub history: Vec<HistoryEntry>,
    pub remaining: Option<u32>,
}

/// Adds `https://` when no scheme is given and checks a host is present.
pub fn normalize_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DashboardError::Validation("Enter a URL to audit".to_string()));
    }
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    match Url::parse(&candidate) {
        Ok(url) if url.host_str().map(|h| !h.is_empty()).unwrap_or(false) => Ok(candidate),
        _ => Err(DashboardError::Validation(format!("'{trimmed}' is not a valid URL"))),
    }
}

/// Audits left today; `None` for admins.
pub fn remaining_audits(
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    today: NaiveDate,
) -> Result<Option<u32>> {
    if user.is_admin {
        return Ok(None);
    }
    let used = store.audit_count(&user.user_id, today)?;
    Ok(Some(config.limits.audit_daily_limit.saturating_sub(used)))
}

/// URL and quota checks, run before anything is sent.
pub fn prepare_audit(
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    raw_url: &str,
    today: NaiveDate,
) -> Result<String> {
    let url = normalize_url(raw_url)?;
    if remaining_audits(store, config, user, today)? == Some(0) {
        return Err(DashboardError::AuditLimit(config.limits.audit_daily_limit));
    }
    Ok(url)
}

pub fn history_entry(payload: &Value, requested_url: &str, now: DateTime<Utc>) -> HistoryEntry {
    let url = payload
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or(requested_url)
        .to_string();
    let domain = payload
        .get("domain")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| bare_domain(&url));
    let analysis = payload.get("analysis");
    let score = analysis
        .and_then(|a| a.get("overallScore"))
        .and_then(Value::as_f64)
        .map(|s| s.clamp(0.0, 100.0).round() as u32)
        .unwrap_or(0);
    let mentioned = payload
        .pointer("/liveTest/mentioned")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let company_name = analysis
        .and_then(|a| a.get("companyName"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| domain.clone());

    HistoryEntry {
        url,
        domain,
        score,
        mentioned,
        company_name,
        timestamp: now,
        data: payload.clone(),
    }
}

/// Runs one audit. Returns `None` when the job was cancelled first; history is
/// only touched after a successful response.
pub async fn run_audit(
    gateway: &dyn ScanGateway,
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    raw_url: &str,
    locale: &str,
    job: &JobHandle,
) -> Result<Option<AuditOutcome>> {
    let today = Utc::now().date_naive();
    let url = match prepare_audit(store, config, user, raw_url, today) {
        Ok(url) => url,
        Err(e) => {
            job.finish(JobState::Failed, Some(e.to_string()));
            return Err(e);
        }
    };
    info!(user_id = %user.user_id, url = %url, "Starting page audit");

    let mut steps = StepSimulator::new(audit_steps());
    steps.start();
    job.apply_view(&steps.view());

    let tick = config.scan.display_tick().max(Duration::from_millis(100));
    let mut ticker = interval_at(Instant::now() + tick, tick);
    let token = job.token();
    let call = gateway.geo_audit(&user.user_id, &url, locale);
    tokio::pin!(call);

    let result = loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!(url = %url, "Audit cancelled");
                return Ok(None);
            }
            result = &mut call => break result,
            _ = ticker.tick() => {
                steps.tick(tick);
                job.apply_view(&steps.view());
            }
        }
    };

    let payload = match result {
        Ok(payload) => payload,
        Err(e) => {
            warn!(url = %url, "Audit failed: {}", e);
            steps.time_out();
            job.finish(JobState::Failed, Some(e.to_string()));
            return Err(e);
        }
    };

    let entry = history_entry(&payload, &url, Utc::now());
    let history = store.push_history(&user.user_id, entry, config.limits.history_cap)?;
    if !user.is_admin {
        store.increment_audit_count(&user.user_id, today)?;
    }
    let remaining = remaining_audits(store, config, user, today)?;

    steps.complete();
    job.apply_view(&steps.view());
    job.finish_with(payload.clone(), Some("Audit complete".to_string()));

    Ok(Some(AuditOutcome {
        payload,
        history,
        remaining,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use crate::jobs::JobKind;
    use serde_json::json;

    fn setup() -> (tempfile::TempDir, LocalStore, AppConfig, UserContext) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path().join("cache.db")).unwrap();
        let user = UserContext {
            user_id: "u1".to_string(),
            email: None,
            is_admin: false,
        };
        (dir, store, AppConfig::default(), user)
    }

    fn payload(url: &str, score: f64) -> Value {
        json!({
            "success": true,
            "url": url,
            "domain": "acme.nl",
            "analysis": { "overallScore": score, "companyName": "Acme" },
            "liveTest": { "mentioned": true }
        })
    }

    fn job() -> JobHandle {
        JobHandle::detached(JobKind::Audit, "acme.nl")
    }

    #[test]
    fn urls_get_a_scheme() {
        assert_eq!(normalize_url(" acme.nl ").unwrap(), "https://acme.nl");
        assert_eq!(normalize_url("http://acme.nl/page").unwrap(), "http://acme.nl/page");
        assert!(normalize_url("").is_err());
        assert!(normalize_url("https://").is_err());
    }

    #[test]
    fn history_entry_reads_payload() {
        let entry = history_entry(&payload("https://acme.nl", 72.4), "https://acme.nl", Utc::now());
        assert_eq!(entry.score, 72);
        assert!(entry.mentioned);
        assert_eq!(entry.company_name, "Acme");
        assert_eq!(entry.domain, "acme.nl");

        let bare = history_entry(&json!({ "success": true }), "https://www.beta.nl", Utc::now());
        assert_eq!(bare.url, "https://www.beta.nl");
        assert_eq!(bare.score, 0);
        assert!(!bare.mentioned);
        assert_eq!(bare.company_name, bare.domain);
    }

    #[tokio::test(start_paused = true)]
    async fn success_updates_history_and_quota() {
        let (_dir, store, config, user) = setup();
        let fake = FakeGateway::new().with_audit(payload("https://acme.nl", 80.0));
        let job = job();

        let outcome = run_audit(&fake, &store, &config, &user, "acme.nl", "en", &job)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fake.calls(), vec!["geo_audit:https://acme.nl"]);
        assert_eq!(outcome.history.len(), 1);
        assert_eq!(outcome.remaining, Some(1));
        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.percent, 100);
        assert!(snapshot.result.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn daily_limit_blocks_before_any_call() {
        let (_dir, store, config, mut user) = setup();
        let today = Utc::now().date_naive();
        store.increment_audit_count("u1", today).unwrap();
        store.increment_audit_count("u1", today).unwrap();
        let fake = FakeGateway::new().with_audit(payload("https://acme.nl", 80.0));

        let blocked = run_audit(&fake, &store, &config, &user, "acme.nl", "en", &job()).await;
        assert!(matches!(blocked, Err(DashboardError::AuditLimit(2))));
        assert!(fake.calls().is_empty());

        user.is_admin = true;
        let outcome = run_audit(&fake, &store, &config, &user, "acme.nl", "en", &job())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.remaining, None);
        assert_eq!(store.audit_count("u1", today).unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_leaves_history_untouched() {
        let (_dir, store, config, user) = setup();
        let fake = FakeGateway::new().fail("geo_audit");
        let job = job();

        let result = run_audit(&fake, &store, &config, &user, "acme.nl", "en", &job).await;
        assert!(result.is_err());
        assert!(store.load_history("u1").unwrap().is_empty());
        assert_eq!(store.audit_count("u1", Utc::now().date_naive()).unwrap(), 0);
        assert_eq!(job.snapshot().state, JobState::Failed);
    }
}
