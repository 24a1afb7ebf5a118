use chrono::Utc;
use rocket::response::status::Accepted;
use rocket::serde::json::Json;
use rocket::{Route, State};
use rocket_dyn_templates::{context, Template};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::aggregate::{build_overview, company_detail, WebsiteFilter};
use crate::audit::{prepare_audit, remaining_audits, run_audit};
use crate::completion::run_platform_scan;
use crate::error::{DashboardError, Result};
use crate::gateway::PlatformScanRequest;
use crate::jobs::{JobKey, JobKind, JobSnapshot, JobState};
use crate::models::*;
use crate::rescan::{prepare_rescan, run_rescan, save_prompts, scan_google_both, validate_prompts, RescanRequest};
use crate::state::{AppState, UserContext};

#[derive(Debug, Deserialize)]
pub struct DeleteCompanyRequest {
    pub company: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePromptsRequest {
    pub scan_id: String,
    pub prompts: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStartRequest {
    pub company_name: String,
    #[serde(default)]
    pub website: Option<String>,
    pub prompts: Vec<String>,
    #[serde(default)]
    pub service_area: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub url: String,
    #[serde(default)]
    pub locale: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Ack {
    pub success: bool,
}

const OK: Ack = Ack { success: true };

fn parse_job_key(user: &UserContext, kind: &str, subject: &str) -> Result<JobKey> {
    JobKind::parse(kind)
        .map(|kind| JobKey::new(kind, &user.user_id, subject))
        .ok_or_else(|| DashboardError::NotFound(format!("job kind '{kind}'")))
}

fn scan_outcome(result: &Result<()>) -> Value {
    match result {
        Ok(()) => json!({ "success": true }),
        Err(e) => json!({ "success": false, "error": e.to_string() }),
    }
}

// =====================
// HTML Page Routes
// =====================

#[get("/?<filter>")]
pub async fn index(state: &State<AppState>, user: UserContext, filter: Option<&str>) -> Template {
    let filter = WebsiteFilter::parse(filter);
    let (inputs, _) = state.load_inputs(&user.user_id).await;
    let overview = build_overview(&inputs, filter, Utc::now());

    Template::render("index", context! {
        title: "Dashboard",
        stats: &overview.stats,
        websites: &overview.websites,
        failed_sources: &overview.failed_sources,
        filter: match filter {
            WebsiteFilter::All => "all",
            WebsiteFilter::Best => "best",
            WebsiteFilter::Recent => "recent",
        },
    })
}

#[get("/website/<key>?<tab>&<period>")]
pub async fn website_page(
    state: &State<AppState>,
    user: UserContext,
    key: &str,
    tab: Option<&str>,
    period: Option<&str>,
) -> Result<Template> {
    let period = Period::parse(period);
    let (inputs, failed) = state.load_inputs(&user.user_id).await;
    let detail = company_detail(&inputs, key, period, Utc::now())
        .ok_or_else(|| DashboardError::NotFound(format!("website '{key}'")))?;

    let rank_checks = match state
        .gateway
        .fetch_dashboard(&user.user_id, period, Some(&detail.company.name))
        .await
    {
        Ok(snapshot) => snapshot.rank_checks,
        Err(e) => {
            warn!("Rank checks unavailable: {}", e);
            Vec::new()
        }
    };
    let can_edit = user.is_admin || !state.store.prompts_edited(&user.user_id).unwrap_or(false);
    let tab = match tab {
        Some(t @ ("overview" | "prompts" | "competitors" | "rank-checks")) => t,
        _ => "overview",
    };
    // Scan buttons read the tracked prompts from here on every tab.
    let texts: Vec<&str> = detail.prompts.iter().map(|p| p.text.as_str()).collect();
    let prompt_list = serde_json::to_string(&texts)?;

    Ok(Template::render("website", context! {
        title: &detail.company.name,
        threat_label: detail.threat.level.label(),
        prompt_list: prompt_list,
        detail: &detail,
        rank_checks: rank_checks,
        failed_sources: failed,
        can_edit: can_edit,
        max_prompts: state.config.limits.max_prompts,
        extension_id: &state.config.extension_id,
        tab: tab,
        period: period.as_str(),
    }))
}

#[get("/audit")]
pub fn audit_page(state: &State<AppState>, user: UserContext) -> Template {
    let history = state.store.load_history(&user.user_id).unwrap_or_default();
    let remaining = remaining_audits(&state.store, &state.config, &user, Utc::now().date_naive())
        .unwrap_or(Some(0));

    Template::render("audit", context! {
        title: "Page Audit",
        history: history,
        remaining: remaining,
        daily_limit: state.config.limits.audit_daily_limit,
        failed_sources: Vec::<String>::new(),
    })
}

// =====================
// JSON API Routes
// =====================

#[get("/overview?<filter>")]
pub async fn api_overview(state: &State<AppState>, user: UserContext, filter: Option<&str>) -> Json<DashboardOverview> {
    let (inputs, _) = state.load_inputs(&user.user_id).await;
    Json(build_overview(&inputs, WebsiteFilter::parse(filter), Utc::now()))
}

#[get("/websites/<key>?<period>")]
pub async fn api_website(
    state: &State<AppState>,
    user: UserContext,
    key: &str,
    period: Option<&str>,
) -> Result<Json<CompanyDetail>> {
    let (inputs, _) = state.load_inputs(&user.user_id).await;
    company_detail(&inputs, key, Period::parse(period), Utc::now())
        .map(Json)
        .ok_or_else(|| DashboardError::NotFound(format!("website '{key}'")))
}

/// Tracked prompts of one company, as the prompt editor loads them.
#[get("/websites/<key>/prompts")]
pub async fn api_prompts(state: &State<AppState>, user: UserContext, key: &str) -> Result<Json<PromptSet>> {
    let (inputs, _) = state.load_inputs(&user.user_id).await;
    let detail = company_detail(&inputs, key, Period::Quarter, Utc::now())
        .ok_or_else(|| DashboardError::NotFound(format!("website '{key}'")))?;
    Ok(Json(PromptSet {
        prompts: detail.prompts.into_iter().map(|p| p.text).collect(),
        company: detail.company,
        scan_id: detail.scan_id,
    }))
}

#[delete("/companies", data = "<body>")]
pub async fn api_delete_company(
    state: &State<AppState>,
    user: UserContext,
    body: Json<DeleteCompanyRequest>,
) -> Result<Json<Ack>> {
    state.gateway.delete_company(&user.user_id, &body.company).await?;
    Ok(Json(OK))
}

#[delete("/rank-checks/<id>")]
pub async fn api_delete_rank_check(state: &State<AppState>, user: UserContext, id: &str) -> Result<Json<Ack>> {
    state.gateway.delete_rank_check(&user.user_id, id).await?;
    Ok(Json(OK))
}

#[post("/prompts", data = "<body>")]
pub async fn api_save_prompts(
    state: &State<AppState>,
    user: UserContext,
    body: Json<SavePromptsRequest>,
) -> Result<Json<Value>> {
    let prompts = save_prompts(
        state.gateway.as_ref(),
        &state.store,
        &state.config,
        &user,
        &body.scan_id,
        &body.prompts,
    )
    .await?;
    Ok(Json(json!({ "success": true, "prompts": prompts })))
}

#[post("/prompts/rescan", data = "<body>")]
pub fn api_rescan(
    state: &State<AppState>,
    user: UserContext,
    body: Json<RescanRequest>,
) -> Result<Accepted<Json<JobSnapshot>>> {
    let request = body.into_inner();
    prepare_rescan(&state.store, &state.config, &user, &request.prompts)?;

    let key = JobKey::new(JobKind::Rescan, &user.user_id, &request.company.name);
    let job = state.jobs.start(key, "Saving prompts...");
    let snapshot = job.snapshot();
    let (gateway, store, config) = (state.gateway.clone(), state.store.clone(), state.config.clone());

    tokio::spawn(async move {
        if let Err(e) = run_rescan(gateway.as_ref(), &store, &config, &user, &request, &job).await {
            warn!("Rescan aborted: {}", e);
            job.finish(JobState::Failed, Some(e.to_string()));
        }
    });
    Ok(Accepted(Json(snapshot)))
}

#[post("/scans", data = "<body>")]
pub fn api_start_scan(
    state: &State<AppState>,
    user: UserContext,
    body: Json<ScanStartRequest>,
) -> Result<Accepted<Json<JobSnapshot>>> {
    let body = body.into_inner();
    let request = PlatformScanRequest {
        prompts: validate_prompts(&body.prompts, state.config.limits.max_prompts)?,
        company_name: body.company_name,
        website: body.website,
        service_area: body.service_area,
    };

    let key = JobKey::new(JobKind::Scan, &user.user_id, &request.company_name);
    let job = state.jobs.start(key, "Preparing prompts...");
    let snapshot = job.snapshot();
    let (gateway, config) = (state.gateway.clone(), state.config.clone());
    info!(user_id = %user.user_id, company = %request.company_name, "Scan started");

    tokio::spawn(async move {
        run_platform_scan(gateway, &config.scan, &user.user_id, &request, &job).await;
    });
    Ok(Accepted(Json(snapshot)))
}

#[post("/google-scans", data = "<body>")]
pub async fn api_google_scans(
    state: &State<AppState>,
    user: UserContext,
    body: Json<ScanStartRequest>,
) -> Result<Json<Value>> {
    let body = body.into_inner();
    let request = PlatformScanRequest {
        prompts: validate_prompts(&body.prompts, state.config.limits.max_prompts)?,
        company_name: body.company_name,
        website: body.website,
        service_area: None,
    };
    let (mode, overview) = scan_google_both(state.gateway.as_ref(), &user.user_id, &request).await;
    Ok(Json(json!({
        "googleAiMode": scan_outcome(&mode),
        "googleAiOverview": scan_outcome(&overview),
    })))
}

#[get("/jobs/<kind>/<subject>")]
pub fn api_job(state: &State<AppState>, user: UserContext, kind: &str, subject: &str) -> Result<Json<JobSnapshot>> {
    let key = parse_job_key(&user, kind, subject)?;
    state
        .jobs
        .get(&key)
        .map(Json)
        .ok_or_else(|| DashboardError::NotFound(format!("{kind} job for '{subject}'")))
}

#[delete("/jobs/<kind>/<subject>")]
pub fn api_cancel_job(state: &State<AppState>, user: UserContext, kind: &str, subject: &str) -> Result<Json<Value>> {
    let key = parse_job_key(&user, kind, subject)?;
    Ok(Json(json!({ "cancelled": state.jobs.cancel(&key) })))
}

#[post("/audit", data = "<body>")]
pub fn api_audit(
    state: &State<AppState>,
    user: UserContext,
    body: Json<AuditRequest>,
) -> Result<Accepted<Json<JobSnapshot>>> {
    let body = body.into_inner();
    let url = prepare_audit(&state.store, &state.config, &user, &body.url, Utc::now().date_naive())?;
    let locale = body.locale.unwrap_or_else(|| "en".to_string());

    let job = state.jobs.start(JobKey::new(JobKind::Audit, &user.user_id, &url), "Starting audit");
    let snapshot = job.snapshot();
    let (gateway, store, config) = (state.gateway.clone(), state.store.clone(), state.config.clone());

    tokio::spawn(async move {
        if let Err(e) = run_audit(gateway.as_ref(), &store, &config, &user, &url, &locale, &job).await {
            warn!("Audit of {} failed: {}", url, e);
        }
    });
    Ok(Accepted(Json(snapshot)))
}

#[get("/audit/history")]
pub fn api_audit_history(state: &State<AppState>, user: UserContext) -> Result<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.store.load_history(&user.user_id)?))
}

#[delete("/audit/history/<index>")]
pub fn api_delete_history(state: &State<AppState>, user: UserContext, index: usize) -> Result<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.store.delete_history(&user.user_id, index)?))
}

#[post("/claim-session")]
pub async fn api_claim_session(state: &State<AppState>, user: UserContext) -> Json<Value> {
    let claimed = match state.gateway.claim_session(&user.user_id).await {
        Ok(total) => total,
        Err(e) => {
            warn!("Session claim failed: {}", e);
            0
        }
    };
    Json(json!({ "claimed": { "total": claimed } }))
}

// =====================
// Route Collections
// =====================

pub fn index_routes() -> Vec<Route> {
    routes![index, website_page, audit_page]
}

pub fn api_routes() -> Vec<Route> {
    routes![
        api_overview,
        api_website,
        api_prompts,
        api_delete_company,
        api_delete_rank_check,
        api_save_prompts,
        api_rescan,
        api_start_scan,
        api_google_scans,
        api_job,
        api_cancel_job,
        api_audit,
        api_audit_history,
        api_delete_history,
        api_claim_session,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::gateway::testing::FakeGateway;
    use crate::normalize::ScanSource;
    use rocket::http::{ContentType, Header, Status};
    use rocket::local::blocking::Client;
    use std::sync::Arc;

    struct Harness {
        _dir: tempfile::TempDir,
        fake: Arc<FakeGateway>,
        client: Client,
    }

    fn harness(fake: FakeGateway) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.db_path = dir.path().join("cache.db").to_string_lossy().into_owned();
        config.admin_emails = vec!["owner@example.com".to_string()];
        let fake = Arc::new(fake);
        let state = AppState::new(config, fake.clone()).unwrap();
        let client = Client::tracked(crate::build_rocket(state)).unwrap();
        Harness {
            _dir: dir,
            fake,
            client,
        }
    }

    fn acme() -> FakeGateway {
        FakeGateway::new().with_source(
            ScanSource::ToolIntegrations,
            Some(vec![json!({
                "id": "t1",
                "company_name": "Acme",
                "website": "https://acme.nl",
                "created_at": "2026-10-01T10:00:00Z",
                "commercial_prompts": ["best agency", "top studio"],
                "results": {
                    "perplexity": [
                        { "company_mentioned": true, "competitors_mentioned": ["Beta"] },
                        { "company_mentioned": false }
                    ]
                }
            })]),
        )
    }

    #[test]
    fn overview_lists_websites() {
        let h = harness(acme().with_source(ScanSource::GoogleAiMode, None));
        let response = h.client.get("/api/overview").dispatch();
        assert_eq!(response.status(), Status::Ok);

        let body: Value = response.into_json().unwrap();
        assert_eq!(body["websites"].as_array().unwrap().len(), 1);
        assert_eq!(body["websites"][0]["key"], "acme");
        assert_eq!(body["failedSources"], json!(["Google AI Mode"]));
    }

    #[test]
    fn pages_render() {
        let h = harness(acme());

        let index = h.client.get("/").dispatch();
        assert_eq!(index.status(), Status::Ok);
        assert!(index.into_string().unwrap().contains("Acme"));

        let website = h.client.get("/website/acme?tab=prompts&period=7d").dispatch();
        assert_eq!(website.status(), Status::Ok);
        assert!(website.into_string().unwrap().contains("best agency"));

        let audit = h.client.get("/audit").dispatch();
        assert_eq!(audit.status(), Status::Ok);

        assert_eq!(h.client.get("/website/nobody").dispatch().status(), Status::NotFound);
    }

    #[test]
    fn keys_with_slashes_link_to_a_working_page() {
        let h = harness(FakeGateway::new().with_source(
            ScanSource::ToolIntegrations,
            Some(vec![json!({
                "id": "t9",
                "company_name": "Acme/Partners",
                "commercial_prompts": ["best agency"],
                "results": { "perplexity": [{ "company_mentioned": true }] }
            })]),
        ));

        let index = h.client.get("/").dispatch().into_string().unwrap();
        assert!(index.contains(r#"href="/website/acme-partners""#));
        let page = h.client.get("/website/acme-partners").dispatch();
        assert_eq!(page.status(), Status::Ok);
    }

    #[test]
    fn website_header_carries_prompts_and_threat_label() {
        let h = harness(acme());
        let page = h.client.get("/website/acme?tab=overview").dispatch().into_string().unwrap();
        let escaped = r#"data-prompts="[&quot;best agency&quot;,&quot;top studio&quot;]""#;
        let raw = r#"data-prompts="["best agency","top studio"]""#;
        assert!(page.contains(escaped) || page.contains(raw));
        assert!(["Critical", "High", "Medium", "Low"]
            .iter()
            .any(|l| page.contains(&format!("Competitive threat: {l}</h2>"))));
    }

    #[test]
    fn prompt_set_for_editor() {
        let h = harness(acme());
        let set: PromptSet = h.client.get("/api/websites/acme/prompts").dispatch().into_json().unwrap();
        assert_eq!(set.company.name, "Acme");
        assert_eq!(set.prompts, vec!["best agency", "top studio"]);
    }

    #[test]
    fn save_prompts_is_gated_after_first_edit() {
        let h = harness(acme());
        let body = json!({ "scanId": "t1", "prompts": ["one", "two"] }).to_string();

        let first = h.client.post("/api/prompts").header(ContentType::JSON).body(&body).dispatch();
        assert_eq!(first.status(), Status::Ok);
        let second = h.client.post("/api/prompts").header(ContentType::JSON).body(&body).dispatch();
        assert_eq!(second.status(), Status::Forbidden);

        let admin = h
            .client
            .post("/api/prompts")
            .header(ContentType::JSON)
            .header(Header::new("X-User-Email", "owner@example.com"))
            .body(&body)
            .dispatch();
        assert_eq!(admin.status(), Status::Ok);
        assert_eq!(h.fake.count("update_prompts"), 2);
    }

    #[test]
    fn rescan_rejects_too_many_prompts() {
        let h = harness(acme());
        let prompts: Vec<String> = (0..11).map(|i| format!("prompt {i}")).collect();
        let body = json!({ "company": { "name": "Acme" }, "prompts": prompts }).to_string();

        let response = h.client.post("/api/prompts/rescan").header(ContentType::JSON).body(body).dispatch();
        assert_eq!(response.status(), Status::BadRequest);
        assert!(h.fake.calls().iter().all(|c| !c.starts_with("visibility_check")));
    }

    #[test]
    fn scan_job_can_be_polled_and_cancelled() {
        let h = harness(FakeGateway::new());
        let body = json!({ "companyName": "Acme", "prompts": ["best agency"] }).to_string();

        let started = h.client.post("/api/scans").header(ContentType::JSON).body(body).dispatch();
        assert_eq!(started.status(), Status::Accepted);

        let job: Value = h.client.get("/api/jobs/scan/Acme").dispatch().into_json().unwrap();
        assert_eq!(job["subject"], "acme");

        let cancelled: Value = h.client.delete("/api/jobs/scan/acme").dispatch().into_json().unwrap();
        assert_eq!(cancelled["cancelled"], true);
        assert_eq!(h.client.get("/api/jobs/scan/acme").dispatch().status(), Status::NotFound);
        assert_eq!(h.client.get("/api/jobs/bogus/acme").dispatch().status(), Status::NotFound);
    }

    #[test]
    fn google_scans_report_each_platform() {
        let h = harness(FakeGateway::new().fail("scan_google_ai_overview"));
        let body = json!({ "companyName": "Acme", "prompts": ["best agency"] }).to_string();

        let result: Value = h
            .client
            .post("/api/google-scans")
            .header(ContentType::JSON)
            .body(body)
            .dispatch()
            .into_json()
            .unwrap();
        assert_eq!(result["googleAiMode"]["success"], true);
        assert_eq!(result["googleAiOverview"]["success"], false);
    }

    #[test]
    fn deletes_forward_to_gateway() {
        let h = harness(FakeGateway::new());
        let company = h
            .client
            .delete("/api/companies")
            .header(ContentType::JSON)
            .body(json!({ "company": "Acme" }).to_string())
            .dispatch();
        assert_eq!(company.status(), Status::Ok);
        assert_eq!(h.client.delete("/api/rank-checks/42").dispatch().status(), Status::Ok);
        assert_eq!(h.fake.calls(), vec!["delete_company:Acme", "delete_rank_check:42"]);

        assert_eq!(h.client.delete("/api/audit/history/3").dispatch().status(), Status::NotFound);
    }

    #[test]
    fn invalid_audit_url_is_rejected() {
        let h = harness(FakeGateway::new());
        let response = h
            .client
            .post("/api/audit")
            .header(ContentType::JSON)
            .body(json!({ "url": "  " }).to_string())
            .dispatch();
        assert_eq!(response.status(), Status::BadRequest);
        assert!(h.fake.calls().is_empty());
    }
}
