//! Prompt Edit & Rescan workflow. Calls run strictly in order with a pause
//! between prompt probes; a failing call is logged and skipped.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::aggregate::percent;
use crate::config::AppConfig;
use crate::db::LocalStore;
use crate::error::{DashboardError, Result};
use crate::gateway::{PlatformScanRequest, ScanGateway, VisibilityCheckRequest};
use crate::jobs::{JobHandle, JobState};
use crate::models::CompanyRef;
use crate::state::UserContext;

/// Body of `POST /api/prompts` and `POST /api/prompts/rescan`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanRequest {
    pub company: CompanyRef,
    #[serde(default)]
    pub scan_id: Option<String>,
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RescanReport {
    pub prompts: usize,
    pub checked: usize,
    pub failures: Vec<String>,
    pub cancelled: bool,
}

/// Trims prompts, drops blanks, and enforces `1..=max` remaining.
pub fn validate_prompts(prompts: &[String], max: usize) -> Result<Vec<String>> {
    let valid: Vec<String> = prompts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    if valid.is_empty() {
        return Err(DashboardError::Validation(
            "Add at least one prompt before saving".to_string(),
        ));
    }
    if valid.len() > max {
        return Err(DashboardError::Validation(format!(
            "At most {max} prompts can be tracked, got {}",
            valid.len()
        )));
    }
    Ok(valid)
}

/// One edit cycle per user; admins are exempt.
pub fn check_edit_gate(store: &LocalStore, user: &UserContext) -> Result<()> {
    if user.is_admin {
        return Ok(());
    }
    if store.prompts_edited(&user.user_id)? {
        return Err(DashboardError::EditLimit);
    }
    Ok(())
}

/// Gate and validation, run before any network call.
pub fn prepare_rescan(
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    prompts: &[String],
) -> Result<Vec<String>> {
    check_edit_gate(store, user)?;
    validate_prompts(prompts, config.limits.max_prompts)
}

pub async fn save_prompts(
    gateway: &dyn ScanGateway,
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    scan_id: &str,
    prompts: &[String],
) -> Result<Vec<String>> {
    let prompts = prepare_rescan(store, config, user, prompts)?;
    gateway.update_prompts(&user.user_id, scan_id, &prompts).await?;
    store.set_prompts_edited(&user.user_id, true)?;
    Ok(prompts)
}

/// Returns false when cancelled during the wait.
async fn pause(delay: Duration, job: &JobHandle) -> bool {
    let token = job.token();
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn cancelled(mut report: RescanReport) -> Result<RescanReport> {
    info!(checked = report.checked, "Rescan cancelled, no further calls issued");
    report.cancelled = true;
    Ok(report)
}

/// Save, probe each prompt, then Google AI Mode and AI Overviews.
pub async fn run_rescan(
    gateway: &dyn ScanGateway,
    store: &LocalStore,
    config: &AppConfig,
    user: &UserContext,
    request: &RescanRequest,
    job: &JobHandle,
) -> Result<RescanReport> {
    let prompts = prepare_rescan(store, config, user, &request.prompts)?;
    let total = prompts.len();
    let company = &request.company;
    let mut report = RescanReport {
        prompts: total,
        ..Default::default()
    };
    info!(user_id = %user.user_id, company = %company.name, prompts = total, "Starting rescan");

    if let Some(scan_id) = &request.scan_id {
        job.set_progress(0, "Saving prompts...");
        if let Err(e) = gateway.update_prompts(&user.user_id, scan_id, &prompts).await {
            warn!("Saving prompts failed, rescanning anyway: {}", e);
            report.failures.push(format!("save: {e}"));
            job.record_failure(format!("save: {e}"));
        }
    }

    for (i, prompt) in prompts.iter().enumerate() {
        if job.is_cancelled() {
            return cancelled(report);
        }
        let current = i + 1;
        job.set_progress(
            percent(current as u32 * 50, total as u32 * 100),
            format!("ChatGPT & Perplexity: prompt {current}/{total}"),
        );
        let check = VisibilityCheckRequest {
            company_name: company.name.clone(),
            query: prompt.clone(),
            category: company.category.clone(),
        };
        if let Err(e) = gateway.visibility_check(&user.user_id, &check).await {
            warn!(prompt = current, "Prompt check failed: {}", e);
            report.failures.push(format!("prompt {current}: {e}"));
            job.record_failure(format!("prompt {current}: {e}"));
        }
        report.checked += 1;

        if current < total && !pause(config.scan.prompt_delay(), job).await {
            return cancelled(report);
        }
    }

    let scan = PlatformScanRequest {
        company_name: company.name.clone(),
        website: company.website.clone(),
        prompts: prompts.clone(),
        service_area: None,
    };

    if job.is_cancelled() {
        return cancelled(report);
    }
    job.set_progress(70, "Google AI Mode");
    if let Err(e) = gateway.scan_google_ai(&user.user_id, &scan).await {
        warn!("Google AI Mode rescan failed: {}", e);
        report.failures.push(format!("Google AI Mode: {e}"));
        job.record_failure(format!("Google AI Mode: {e}"));
    }

    if job.is_cancelled() {
        return cancelled(report);
    }
    job.set_progress(90, "AI Overviews");
    if let Err(e) = gateway.scan_google_ai_overview(&user.user_id, &scan).await {
        warn!("AI Overviews rescan failed: {}", e);
        report.failures.push(format!("AI Overviews: {e}"));
        job.record_failure(format!("AI Overviews: {e}"));
    }

    store.set_prompts_edited(&user.user_id, true)?;
    info!(company = %company.name, failures = report.failures.len(), "Rescan finished");
    job.finish(
        JobState::Completed,
        Some(match report.failures.len() {
            0 => "Rescan complete".to_string(),
            n => format!("Rescan complete with {n} failed call(s)"),
        }),
    );
    Ok(report)
}

/// Both Google scans issued together.
pub async fn scan_google_both(
    gateway: &dyn ScanGateway,
    user_id: &str,
    request: &PlatformScanRequest,
) -> (Result<()>, Result<()>) {
    let (mode, overview) = tokio::join!(
        gateway.scan_google_ai(user_id, request),
        gateway.scan_google_ai_overview(user_id, request),
    );
    if let Err(e) = &mode {
        warn!("Google AI Mode scan failed: {}", e);
    }
    if let Err(e) = &overview {
        warn!("AI Overviews scan failed: {}", e);
    }
    (mode, overview)
}
